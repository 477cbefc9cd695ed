//! Root of the decision pipeline: primary authentication, access
//! enforcement, trigger collection and arbitration.
//!
//! Failure semantics: the resolver never returns an empty result. Domain
//! failures (authentication, ticket, access, fail-closed provider) become a
//! terminal `authenticationFailure` event; anything unexpected becomes a
//! terminal `error` event; both set the unauthorized response status and
//! attach the triggering error for the rendering layer. Configuration
//! errors (missing transition, unknown provider) propagate as fatal.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, error, warn};

use crate::authn::{AuthenticationError, AuthenticationSystemSupport};
use crate::mfa::trigger::TriggerResolver;
use crate::service::{AccessStrategyEnforcer, ServicesManager};
use crate::webflow::{Event, FlowContext, HTTP_UNAUTHORIZED};

use super::{WebflowEventResolver, selective::SelectiveEventResolver};

/// Aggregates candidate events from an ordered list of trigger resolvers
/// and arbitrates them through the selective resolver. MFA is opt-in per
/// request: with no applicable trigger the primary ticket is granted
/// directly.
pub struct DelegatingEventResolver {
    authentication_support: Arc<dyn AuthenticationSystemSupport>,
    services_manager: Arc<dyn ServicesManager>,
    access_enforcer: Arc<dyn AccessStrategyEnforcer>,
    selective: SelectiveEventResolver,
    triggers: Vec<Arc<dyn TriggerResolver>>,
}

impl DelegatingEventResolver {
    #[must_use]
    pub fn new(
        authentication_support: Arc<dyn AuthenticationSystemSupport>,
        services_manager: Arc<dyn ServicesManager>,
        access_enforcer: Arc<dyn AccessStrategyEnforcer>,
        selective: SelectiveEventResolver,
    ) -> Self {
        Self {
            authentication_support,
            services_manager,
            access_enforcer,
            selective,
            triggers: Vec::new(),
        }
    }

    /// Register a trigger; triggers run in registration order.
    #[must_use]
    pub fn with_trigger(mut self, trigger: Arc<dyn TriggerResolver>) -> Self {
        self.triggers.push(trigger);
        self
    }

    async fn resolve_internal(
        &self,
        ctx: &mut FlowContext,
    ) -> Result<Event, AuthenticationError> {
        // Primary-factor transaction, when a credential arrived with the
        // request. A failure here short-circuits; it never reaches
        // arbitration.
        if let Some(credential) = ctx.credential().cloned() {
            let builder = self
                .authentication_support
                .handle_initial_authentication_transaction(ctx.service(), &credential)
                .await?;
            let Some(authentication) = builder.initial_authentication().cloned() else {
                return Err(AuthenticationError::NoAuthentication);
            };
            debug!(principal = %authentication.principal().id(), "primary authentication established");
            ctx.set_authentication(authentication);
            ctx.set_result_builder(builder);
        }

        // Service authorization. A service with no registration is denied.
        if let Some(service) = ctx.service().cloned() {
            let Some(registered) = self.services_manager.find_service_by(&service) else {
                warn!(service = %service.id(), "service is not registered");
                return Err(AuthenticationError::AccessDenied {
                    service: service.id().to_string(),
                });
            };
            self.access_enforcer
                .enforce(&service, &registered, ctx.principal())?;
            ctx.set_registered_service(registered);
        }

        // Collect candidates from every trigger, in registration order.
        let mut candidates: Vec<Event> = Vec::new();
        for trigger in &self.triggers {
            if let Some(event) = trigger.resolve(ctx).await? {
                debug!(trigger = trigger.name(), event = %event.id(), "collected candidate event");
                candidates.push(event);
            }
        }
        candidates.sort_by(|a, b| a.id().cmp(b.id()));
        candidates.dedup_by(|a, b| a.id() == b.id());
        ctx.set_resolved_events(candidates.clone());

        if !candidates.is_empty() {
            if let Some(event) = self.selective.arbitrate(ctx, &candidates).await? {
                return Ok(event);
            }
        }

        // No applicable factor: grant the primary ticket directly.
        Ok(match ctx.authentication() {
            Some(authentication) if authentication.has_warnings() => {
                Event::success_with_warnings()
            }
            _ => Event::success(),
        })
    }
}

#[async_trait]
impl WebflowEventResolver for DelegatingEventResolver {
    async fn resolve(&self, ctx: &mut FlowContext) -> Result<Event, AuthenticationError> {
        match self.resolve_internal(ctx).await {
            Ok(event) => Ok(event),
            Err(err) if err.is_fatal() => Err(err),
            Err(err @ AuthenticationError::Internal(_)) => {
                error!("event resolution failed unexpectedly: {err}");
                ctx.set_response_status(HTTP_UNAUTHORIZED);
                Ok(Event::error(&err))
            }
            Err(err) => {
                warn!("authentication failed: {err}");
                ctx.set_response_status(HTTP_UNAUTHORIZED);
                Ok(Event::authentication_failure(&err))
            }
        }
    }
}
