//! Step-up resolution for requests arriving with an existing session.
//!
//! Factor strength is a total order over provider `order`: a previously
//! satisfied factor of greater-or-equal rank subsumes the requested one and
//! the flow resumes; anything weaker requires a fresh challenge.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::authn::AuthenticationError;
use crate::mfa::{MFA_CONTEXT_ATTRIBUTE, MultifactorProvider, ProviderDirectory};
use crate::ticket::registry::TicketRegistrySupport;
use crate::webflow::{Event, FlowContext};

use super::{WebflowEventResolver, delegating::DelegatingEventResolver};

/// Re-validates an established authentication context against the factor
/// the current request resolves to.
pub struct RankedEventResolver {
    registry_support: Arc<dyn TicketRegistrySupport>,
    delegating: Arc<DelegatingEventResolver>,
    directory: Arc<ProviderDirectory>,
}

impl RankedEventResolver {
    #[must_use]
    pub fn new(
        registry_support: Arc<dyn TicketRegistrySupport>,
        delegating: Arc<DelegatingEventResolver>,
        directory: Arc<ProviderDirectory>,
    ) -> Self {
        Self {
            registry_support,
            delegating,
            directory,
        }
    }
}

#[async_trait]
impl WebflowEventResolver for RankedEventResolver {
    async fn resolve(&self, ctx: &mut FlowContext) -> Result<Event, AuthenticationError> {
        // Nothing to rank without a service and a loadable session.
        if ctx.service().is_none() {
            debug!("no service in the request; resuming the flow");
            return Ok(Event::success());
        }
        let Some(tgt_id) = ctx.ticket_granting_ticket_id().map(str::to_string) else {
            debug!("no session ticket in the request; resuming the flow");
            return Ok(Event::success());
        };
        let authentication = match self.registry_support.authentication_from(&tgt_id).await {
            Ok(Some(authentication)) => authentication,
            Ok(None) => {
                debug!("session has no loadable authentication; resuming the flow");
                return Ok(Event::success());
            }
            Err(err) => {
                warn!("failed to load the session authentication: {err}");
                return Ok(Event::success());
            }
        };
        ctx.set_authentication(authentication.clone());

        // Discover what the pipeline would require right now.
        let event = self.delegating.resolve(ctx).await?;
        if event.is_terminal() {
            return Ok(event);
        }

        let Some(requested) = self.directory.get(event.id()) else {
            // Arbitration only emits registered providers; anything else is
            // a wiring error.
            return Err(AuthenticationError::UnknownProvider {
                provider: event.id().to_string(),
            });
        };

        let satisfied = authentication.attribute_values(MFA_CONTEXT_ATTRIBUTE);
        let subsumed = satisfied.iter().any(|id| id == requested.id())
            || satisfied
                .iter()
                .filter_map(|id| self.directory.get(id))
                .any(|provider| provider.order() >= requested.order());
        if subsumed {
            debug!(
                provider = %requested.id(),
                "session already satisfies an equal-or-stronger factor; resuming"
            );
            return Ok(Event::success());
        }

        debug!(provider = %requested.id(), "step-up challenge required");
        ctx.require_transition(event)
    }
}
