//! Interactive shell.
//!
//! Plain lines are conversational turns: the keyword analyser stands in
//! for the conversation engine and the composed context is printed in
//! place of a reply. Lines starting with `:` are commands.

use anyhow::Result;
use kindred_context::{ContextPackage, NamespaceRegistry, TurnInput};
use kindred_core::{MemoryFilters, Namespace};
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use std::path::PathBuf;
use tracing::warn;

const HELP: &str = "\
Commands:
  :stats            memory summary
  :mood             personality and mood
  :recall <query>   show what would be recalled, without a turn
  :context          last composed context as JSON
  :consolidate      run a consolidation pass now
  :restore          roll memory back to the last checkpoint
  :help             this text
  :quit             leave
Anything else is sent as a conversational turn.";

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Turn(String),
    Stats,
    Mood,
    Recall(String),
    Context,
    Consolidate,
    Restore,
    Help,
    Quit,
    Unknown(String),
}

impl Command {
    pub fn parse(line: &str) -> Option<Self> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }
        let Some(rest) = line.strip_prefix(':') else {
            return Some(Self::Turn(line.to_string()));
        };
        let (name, arg) = match rest.split_once(char::is_whitespace) {
            Some((name, arg)) => (name, arg.trim()),
            None => (rest, ""),
        };
        Some(match name {
            "stats" => Self::Stats,
            "mood" => Self::Mood,
            "recall" if !arg.is_empty() => Self::Recall(arg.to_string()),
            "context" => Self::Context,
            "consolidate" => Self::Consolidate,
            "restore" => Self::Restore,
            "help" | "h" | "?" => Self::Help,
            "quit" | "exit" | "q" => Self::Quit,
            _ => Self::Unknown(rest.to_string()),
        })
    }
}

fn history_path() -> Option<PathBuf> {
    dirs::data_dir().map(|dir| dir.join("kindred").join("history.txt"))
}

pub async fn run(registry: &NamespaceRegistry, namespace: &Namespace) -> Result<()> {
    let mut rl = DefaultEditor::new()?;
    let history = history_path();
    if let Some(path) = &history {
        let _ = rl.load_history(path);
    }

    println!("kindred shell, namespace '{namespace}'. Type :help for commands.");
    let prompt = format!("{namespace}> ");
    let mut last_context: Option<ContextPackage> = None;

    loop {
        let line = match rl.readline(&prompt) {
            Ok(line) => line,
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => break,
            Err(e) => {
                eprintln!("error: {e}");
                break;
            }
        };
        let Some(command) = Command::parse(&line) else {
            continue;
        };
        let _ = rl.add_history_entry(line.trim());

        match command {
            Command::Quit => break,
            Command::Help => println!("{HELP}"),
            Command::Unknown(name) => println!("unknown command ':{name}', try :help"),
            Command::Turn(text) => {
                match registry.handle_turn(namespace, TurnInput::analyzed(text)).await {
                    Ok(outcome) => {
                        print!("{}", outcome.context.render());
                        println!("[mood: {}]", outcome.personality.mood.label());
                        if let Some(e) = &outcome.remember_error {
                            println!("(this turn was not remembered: {e})");
                        }
                        last_context = Some(outcome.context);
                    }
                    Err(e) => eprintln!("error: {e}"),
                }
            }
            Command::Stats => {
                let session = registry.session(namespace).await?;
                let stats = session.memory.stats().await;
                println!(
                    "{} live / {} archived, {} links, average importance {:.2}",
                    stats.live, stats.archived, stats.links, stats.average_importance
                );
                for (kind, count) in &stats.by_kind {
                    println!("  {kind}: {count}");
                }
            }
            Command::Mood => {
                let session = registry.session(namespace).await?;
                let state = session.personality.snapshot().await;
                println!("{}", state.describe());
                let m = state.mood;
                println!(
                    "valence {:.2}, arousal {:.2}, dominance {:.2}",
                    m.valence, m.arousal, m.dominance
                );
            }
            Command::Recall(query) => {
                let session = registry.session(namespace).await?;
                let k = registry.config().memory.default_k;
                match session.memory.recall(&query, k, &MemoryFilters::default()).await {
                    Ok(outcome) => {
                        if let Some(reason) = &outcome.degraded {
                            println!("(degraded: {})", reason.describe());
                        }
                        for hit in &outcome.hits {
                            println!(
                                "{:.3}  [{}] {}",
                                hit.score, hit.entry.kind, hit.entry.content
                            );
                        }
                        if outcome.is_empty() && outcome.degraded.is_none() {
                            println!("nothing relevant");
                        }
                    }
                    Err(e) => eprintln!("error: {e}"),
                }
            }
            Command::Context => match &last_context {
                Some(package) => println!("{}", serde_json::to_string_pretty(package)?),
                None => println!("no turn yet"),
            },
            Command::Consolidate => {
                let session = registry.session(namespace).await?;
                match session.memory.consolidate().await {
                    Ok(report) => println!(
                        "merged {}, linked {}, decayed {}, archived {} ({} pairs examined)",
                        report.merged,
                        report.links_created,
                        report.decayed,
                        report.archived,
                        report.pairs_examined
                    ),
                    Err(e) => eprintln!("error: {e}"),
                }
            }
            Command::Restore => {
                let session = registry.session(namespace).await?;
                match session.memory.restore_last_checkpoint().await {
                    Ok(Some(at)) => println!("restored checkpoint from {at}"),
                    Ok(None) => println!("no checkpoint yet"),
                    Err(e) => eprintln!("error: {e}"),
                }
            }
        }
    }

    if let Some(path) = &history {
        if let Some(dir) = path.parent() {
            let _ = std::fs::create_dir_all(dir);
        }
        if let Err(e) = rl.save_history(path) {
            warn!("Failed to save shell history: {}", e);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_turns_and_commands() {
        assert_eq!(Command::parse("   "), None);
        assert_eq!(
            Command::parse("I love hiking"),
            Some(Command::Turn("I love hiking".into()))
        );
        assert_eq!(Command::parse(":stats"), Some(Command::Stats));
        assert_eq!(Command::parse(" :q "), Some(Command::Quit));
        assert_eq!(
            Command::parse(":recall  outdoor activities "),
            Some(Command::Recall("outdoor activities".into()))
        );
    }

    #[test]
    fn test_parse_rejects_unknown_and_incomplete() {
        assert_eq!(Command::parse(":recall"), Some(Command::Unknown("recall".into())));
        assert_eq!(Command::parse(":dance now"), Some(Command::Unknown("dance now".into())));
    }
}
