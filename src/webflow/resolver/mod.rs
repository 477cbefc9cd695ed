//! The event resolution pipeline.
//!
//! Flow Overview:
//! 1) The delegating resolver runs the primary-factor transaction, enforces
//!    service access, and collects candidate events from every registered
//!    trigger.
//! 2) The selective resolver arbitrates candidates against the live
//!    provider directory down to at most one outcome.
//! 3) The ranked resolver re-validates an existing session against the
//!    required factor and decides between resuming and stepping up.
//!
//! Resolvers are strategies composed by delegation; behavior is extended by
//! registering triggers, not by subclassing.

pub mod delegating;
pub mod ranked;
pub mod selective;

use async_trait::async_trait;

use crate::authn::AuthenticationError;
use crate::webflow::{Event, FlowContext};

pub use delegating::DelegatingEventResolver;
pub use ranked::RankedEventResolver;
pub use selective::{ARBITRATION_ORDERING, ProviderOrdering, SelectiveEventResolver};

/// A resolver always answers with exactly one event or a fatal
/// configuration error; domain failures are translated into terminal
/// failure events, never surfaced raw.
#[async_trait]
pub trait WebflowEventResolver: Send + Sync {
    async fn resolve(&self, ctx: &mut FlowContext) -> Result<Event, AuthenticationError>;
}
