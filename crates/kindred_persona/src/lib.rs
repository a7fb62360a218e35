//! Personality Engine
//!
//! Holds one namespace's [`PersonalityState`](kindred_core::PersonalityState):
//! slow-moving Big Five traits nudged by every conversational turn, and a
//! fast PAD mood that follows the conversation and relaxes back to the
//! trait baseline while the user is away.

pub mod engine;
pub mod heartbeat;

pub use engine::PersonalityEngine;
pub use heartbeat::{spawn_idle_decay, HeartbeatConfig};
