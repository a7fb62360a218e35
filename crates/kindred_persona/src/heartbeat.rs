//! Heartbeat for idle mood decay
//!
//! The heartbeat determines how often an engine checks whether the user
//! has gone quiet long enough for mood to drift back to baseline.

use crate::engine::PersonalityEngine;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Configuration for the idle heartbeat
#[derive(Debug, Clone)]
pub struct HeartbeatConfig {
    /// How often to check for idleness (default: 30s)
    pub interval: Duration,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
        }
    }
}

impl HeartbeatConfig {
    /// Very slow heartbeat for long-running daemons
    pub fn slow() -> Self {
        Self {
            interval: Duration::from_secs(300),
        }
    }

    /// Very fast heartbeat for testing
    pub fn testing() -> Self {
        Self {
            interval: Duration::from_millis(10),
        }
    }
}

/// Spawn the background task that decays `engine`'s mood while idle.
/// Runs until `cancel` fires.
pub fn spawn_idle_decay(
    engine: Arc<PersonalityEngine>,
    heartbeat: HeartbeatConfig,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(heartbeat.interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::debug!(namespace = %engine.namespace(), "Idle heartbeat stopped");
                    break;
                }
                _ = interval.tick() => {
                    if let Some(state) = engine.decay_if_idle().await {
                        tracing::trace!(
                            namespace = %engine.namespace(),
                            mood = state.mood.label(),
                            "Idle decay applied"
                        );
                    }
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use kindred_core::{ManualClock, Namespace, PersonalityConfig, TurnSignal};

    #[tokio::test]
    async fn test_heartbeat_decays_idle_engine_and_stops_on_cancel() {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap(),
        ));
        let engine = Arc::new(PersonalityEngine::new(
            Namespace::new("a"),
            PersonalityConfig::default(),
            clock.clone(),
        ));
        engine.update(TurnSignal::new(-1.0, 1.0)).await;
        let stressed = engine.snapshot().await.mood;
        let mut moods = engine.subscribe();

        clock.advance(chrono::Duration::minutes(30));
        let cancel = CancellationToken::new();
        let handle = spawn_idle_decay(engine.clone(), HeartbeatConfig::testing(), cancel.clone());

        tokio::time::timeout(Duration::from_secs(5), moods.changed())
            .await
            .expect("heartbeat should decay within the timeout")
            .unwrap();
        let baseline = engine.snapshot().await.baseline();
        assert!(engine.mood().distance(&baseline) < stressed.distance(&baseline));

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("heartbeat should stop")
            .unwrap();
    }
}
