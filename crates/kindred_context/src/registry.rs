//! One isolated session (memory + personality) per namespace, and the
//! per-turn pipeline that drives them.
//!
//! The flow of a turn goes one way:
//! signal → personality update → compose context → remember the turn.
//! Nothing read during composition feeds back into the update.

use crate::composer::{ContextError, ContextPackage, RetrievalComposer};
use crate::retry::{with_retry, RetryConfig};
use kindred_core::{
    Clock, ConsolidationReport, KindredConfig, MemoryEntry, MemoryError, MemoryStore, Namespace,
    PersonalityState, PersonalityStore, TurnSignal,
};
use kindred_memory::{Embedder, MemoryManager};
use kindred_persona::PersonalityEngine;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

/// What the conversation engine hands over for one user turn.
#[derive(Debug, Clone)]
pub struct TurnInput {
    pub text: String,
    /// [-1, 1]
    pub sentiment_hint: f32,
    /// [0, 1]
    pub topic_engagement: f32,
}

impl TurnInput {
    pub fn new(text: impl Into<String>, sentiment_hint: f32, topic_engagement: f32) -> Self {
        Self {
            text: text.into(),
            sentiment_hint,
            topic_engagement,
        }
    }

    /// Derive the signal with the built-in keyword analyser.
    pub fn analyzed(text: impl Into<String>) -> Self {
        let text = text.into();
        let signal = kindred_core::analyze_turn(&text);
        Self {
            text,
            sentiment_hint: signal.sentiment,
            topic_engagement: signal.engagement,
        }
    }
}

#[derive(Debug)]
pub struct TurnOutcome {
    pub personality: PersonalityState,
    pub context: ContextPackage,
    /// Entries stored from this turn (empty if the turn was too short).
    pub remembered: Vec<MemoryEntry>,
    /// Set when the turn could not be stored even after retries. The
    /// turn itself still completes.
    pub remember_error: Option<MemoryError>,
}

pub struct Session {
    pub memory: Arc<MemoryManager>,
    pub personality: Arc<PersonalityEngine>,
    composer: RetrievalComposer,
}

impl Session {
    pub async fn compose(&self, query: &str) -> Result<ContextPackage, ContextError> {
        self.composer.compose(query).await
    }
}

pub struct NamespaceRegistry {
    memory_store: Arc<dyn MemoryStore>,
    personality_store: Arc<dyn PersonalityStore>,
    embedder: Arc<dyn Embedder>,
    config: KindredConfig,
    clock: Arc<dyn Clock>,
    retry: RetryConfig,
    sessions: RwLock<HashMap<Namespace, Arc<Session>>>,
}

impl NamespaceRegistry {
    pub fn new<S>(
        store: Arc<S>,
        embedder: Arc<dyn Embedder>,
        config: KindredConfig,
        clock: Arc<dyn Clock>,
    ) -> Self
    where
        S: MemoryStore + PersonalityStore + 'static,
    {
        Self {
            memory_store: store.clone(),
            personality_store: store,
            embedder,
            config,
            clock,
            retry: RetryConfig::default(),
            sessions: RwLock::new(HashMap::new()),
        }
    }

    pub fn with_retry_config(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn config(&self) -> &KindredConfig {
        &self.config
    }

    /// The session of `namespace`, loading it from the store on first use.
    pub async fn session(&self, namespace: &Namespace) -> Result<Arc<Session>, ContextError> {
        if let Some(session) = self.sessions.read().await.get(namespace) {
            return Ok(session.clone());
        }

        let mut sessions = self.sessions.write().await;
        if let Some(session) = sessions.get(namespace) {
            return Ok(session.clone());
        }

        let memory = Arc::new(
            MemoryManager::open(
                namespace.clone(),
                self.memory_store.clone(),
                self.embedder.clone(),
                &self.config,
                self.clock.clone(),
            )
            .await?,
        );
        let personality = Arc::new(
            PersonalityEngine::open(
                namespace.clone(),
                self.personality_store.clone(),
                self.config.personality.clone(),
                self.clock.clone(),
            )
            .await?,
        );
        let composer = RetrievalComposer::new(
            memory.clone(),
            personality.clone(),
            self.clock.clone(),
            self.config.memory.default_k,
        );

        let session = Arc::new(Session {
            memory,
            personality,
            composer,
        });
        sessions.insert(namespace.clone(), session.clone());
        tracing::info!(namespace = %namespace, "Session opened");
        Ok(session)
    }

    pub async fn namespaces(&self) -> Vec<Namespace> {
        let mut names: Vec<Namespace> = self.sessions.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    /// Run one user turn through the pipeline.
    ///
    /// Composition failures are returned. A failure to store the turn is
    /// retried with backoff and then reported in the outcome, along with
    /// whatever was stored before it.
    pub async fn handle_turn(
        &self,
        namespace: &Namespace,
        input: TurnInput,
    ) -> Result<TurnOutcome, ContextError> {
        let session = self.session(namespace).await?;

        let signal = TurnSignal::new(input.sentiment_hint, input.topic_engagement);
        let personality = session.personality.update(signal).await;
        let context = session.compose(&input.text).await?;

        // Each item is retried on its own so a retry never stores an
        // earlier item twice.
        let mut remembered = Vec::new();
        let mut remember_error = None;
        for item in session.memory.plan_turn(&input.text, signal.sentiment) {
            let memory = &session.memory;
            let item = &item;
            match with_retry(&self.retry, "remember", move || async move {
                memory.remember(&item.content, item.kind, item.sentiment).await
            })
            .await
            {
                Ok(entry) => remembered.push(entry),
                Err(e) => {
                    tracing::warn!(namespace = %namespace, "Turn not fully remembered: {}", e);
                    remember_error = Some(e);
                    break;
                }
            }
        }

        Ok(TurnOutcome {
            personality,
            context,
            remembered,
            remember_error,
        })
    }

    /// Consolidate every open namespace, stopping at the first
    /// cancellation. Failures of one namespace do not stop the others.
    pub async fn consolidate_all(
        &self,
        cancel: &CancellationToken,
    ) -> Vec<(Namespace, Result<ConsolidationReport, MemoryError>)> {
        let sessions: Vec<(Namespace, Arc<Session>)> = self
            .sessions
            .read()
            .await
            .iter()
            .map(|(ns, s)| (ns.clone(), s.clone()))
            .collect();

        let mut results = Vec::with_capacity(sessions.len());
        for (namespace, session) in sessions {
            if cancel.is_cancelled() {
                break;
            }
            let result = session.memory.consolidate_with(cancel).await;
            match &result {
                Ok(report) => tracing::info!(namespace = %namespace, ?report, "Consolidated"),
                Err(e) => tracing::warn!(namespace = %namespace, "Consolidation failed: {}", e),
            }
            let aborted = matches!(result, Err(MemoryError::ConsolidationAborted { .. }));
            results.push((namespace, result));
            if aborted {
                break;
            }
        }
        results
    }

    /// Apply idle mood decay to every open namespace. Returns how many
    /// engines were idle and decayed.
    pub async fn decay_all(&self) -> usize {
        let engines: Vec<Arc<PersonalityEngine>> = self
            .sessions
            .read()
            .await
            .values()
            .map(|s| s.personality.clone())
            .collect();

        let mut decayed = 0;
        for engine in engines {
            if engine.decay_if_idle().await.is_some() {
                decayed += 1;
            }
        }
        decayed
    }
}
