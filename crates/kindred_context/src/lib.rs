//! # kindred context
//!
//! Glue between the memory and personality subsystems and the
//! conversation engine:
//!
//! - [`RetrievalComposer`] fetches memories and personality concurrently
//! - [`NamespaceRegistry`] keeps one isolated session per namespace and
//!   runs the per-turn pipeline
//! - [`with_retry`] is the caller-side backoff for retryable memory errors

pub mod composer;
pub mod registry;
pub mod retry;

pub use composer::{ContextError, ContextPackage, MemoryRecall, PersonalitySource, RetrievalComposer};
pub use registry::{NamespaceRegistry, Session, TurnInput, TurnOutcome};
pub use retry::{with_retry, RetryConfig};
