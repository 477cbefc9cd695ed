//! Arbitration of candidate events against the live provider directory.

use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;

use crate::authn::AuthenticationError;
use crate::mfa::{MultifactorProvider, ProviderDirectory};
use crate::webflow::{Event, FlowContext};

/// Direction of the arbitration tie-break over provider `order`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProviderOrdering {
    /// The least-escalated applicable factor wins: never over-challenge
    /// when several policies could apply.
    LowestOrderFirst,
    /// The most-escalated applicable factor wins.
    HighestOrderFirst,
}

/// `order` is a configuration-supplied total order; the tie-break direction
/// is fixed here rather than assumed at call sites.
pub const ARBITRATION_ORDERING: ProviderOrdering = ProviderOrdering::LowestOrderFirst;

/// Narrows the candidate set to the mutual intersection with available
/// providers and picks one winner.
pub struct SelectiveEventResolver {
    directory: Arc<ProviderDirectory>,
}

impl SelectiveEventResolver {
    #[must_use]
    pub fn new(directory: Arc<ProviderDirectory>) -> Self {
        Self { directory }
    }

    /// Arbitrate the candidates down to zero or one final event.
    ///
    /// Candidates whose provider is unregistered or unavailable are
    /// dropped; providers no candidate references are ignored. The winning
    /// event's transition must exist in the flow.
    ///
    /// # Errors
    /// Propagates [`AuthenticationError::ProviderUnavailable`] for a
    /// fail-closed unreachable provider and
    /// [`AuthenticationError::MissingTransition`] for a winner with no
    /// registered transition.
    pub async fn arbitrate(
        &self,
        ctx: &FlowContext,
        candidates: &[Event],
    ) -> Result<Option<Event>, AuthenticationError> {
        if candidates.is_empty() {
            return Ok(None);
        }
        let candidate_ids: HashSet<&str> = candidates.iter().map(Event::id).collect();

        // Mutual intersection: drop providers no candidate references, and
        // (by construction of `matched`) candidates with no live provider.
        let mut matched: Vec<Arc<dyn MultifactorProvider>> = Vec::new();
        for provider in self.directory.all() {
            if !candidate_ids.contains(provider.id()) {
                continue;
            }
            if provider.is_available(ctx.registered_service()).await? {
                matched.push(provider);
            } else {
                debug!(provider = %provider.id(), "dropping unavailable provider from arbitration");
            }
        }

        // `directory.all()` sorts ascending by (order, id).
        let winner = match ARBITRATION_ORDERING {
            ProviderOrdering::LowestOrderFirst => matched.first(),
            ProviderOrdering::HighestOrderFirst => matched.last(),
        };
        let Some(winner) = winner else {
            debug!("no candidate event matches an available provider");
            return Ok(None);
        };
        if matched.len() > 1 {
            debug!(
                provider = %winner.id(),
                "multiple applicable providers; preferring the least escalated"
            );
        }

        let Some(event) = candidates
            .iter()
            .find(|event| event.id() == winner.id())
            .cloned()
        else {
            return Ok(None);
        };
        ctx.require_transition(event).map(Some)
    }
}
