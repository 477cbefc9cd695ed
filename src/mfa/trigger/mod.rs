//! Multifactor trigger resolvers.
//!
//! Each trigger wraps exactly one activation policy (global, adaptive,
//! timed, request-driven, REST, scripted, attribute-driven, service-driven).
//! Triggers run in registration order against the request context; an
//! applicable trigger emits one candidate event naming the provider it
//! selected, a non-applicable one emits nothing. "No opinion" is a
//! first-class return value, never an error.

pub mod attribute;
pub mod request;
pub mod rest;

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::authn::AuthenticationError;
use crate::config::MultifactorConfig;
use crate::webflow::{Event, FlowContext};

use super::{BypassEvaluator, MultifactorProvider, ProviderDirectory};

pub use attribute::{
    AuthenticationAttributeTrigger, PredicatedPrincipalAttributeTrigger, PrincipalAttributeTrigger,
    RegisteredServicePrincipalAttributeTrigger,
};
pub use request::{AdaptiveTrigger, HttpRequestTrigger, TimedTrigger};
pub use rest::RestEndpointTrigger;

/// One pluggable activation policy in the decision pipeline.
#[async_trait]
pub trait TriggerResolver: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// Inspect the context and optionally emit one candidate event.
    async fn resolve(&self, ctx: &FlowContext) -> Result<Option<Event>, AuthenticationError>;
}

/// Build the candidate event for a selected provider, honoring its bypass
/// rules. A trigger referencing an unregistered provider still emits its
/// candidate; arbitration drops ids with no live provider.
pub(crate) async fn candidate_for(
    directory: &ProviderDirectory,
    ctx: &FlowContext,
    provider_id: &str,
    trigger: &'static str,
) -> Option<Event> {
    let authentication = ctx.authentication()?;
    if let Some(provider) = directory.get(provider_id) {
        if !provider
            .bypass()
            .eval(authentication, ctx.credential())
            .await
        {
            debug!(provider = %provider_id, trigger, "provider bypassed for this request");
            return None;
        }
    } else {
        warn!(provider = %provider_id, trigger, "trigger selected an unregistered provider");
    }
    debug!(provider = %provider_id, trigger, "trigger emitted a candidate");
    Some(Event::for_provider(
        provider_id,
        Some(authentication.principal().clone()),
        ctx.registered_service().cloned(),
    ))
}

/// Pick the least-escalated provider among a set of configured ids.
pub(crate) fn least_escalated<'a>(
    directory: &ProviderDirectory,
    ids: &'a [String],
) -> Option<&'a str> {
    ids.iter()
        .filter_map(|id| directory.get(id).map(|provider| (provider.order(), id)))
        .min_by(|a, b| (a.0, a.1.as_str()).cmp(&(b.0, b.1.as_str())))
        .map(|(_, id)| id.as_str())
        .or_else(|| ids.first().map(String::as_str))
}

/// Applies one configured provider to every authentication request.
pub struct GlobalTrigger {
    directory: Arc<ProviderDirectory>,
    provider_id: Option<String>,
}

impl GlobalTrigger {
    #[must_use]
    pub fn new(directory: Arc<ProviderDirectory>, config: &MultifactorConfig) -> Self {
        Self {
            directory,
            provider_id: config.global_provider_id().map(str::to_string),
        }
    }
}

#[async_trait]
impl TriggerResolver for GlobalTrigger {
    fn name(&self) -> &'static str {
        "global"
    }

    async fn resolve(&self, ctx: &FlowContext) -> Result<Option<Event>, AuthenticationError> {
        let Some(provider_id) = &self.provider_id else {
            return Ok(None);
        };
        Ok(candidate_for(&self.directory, ctx, provider_id, "global").await)
    }
}

/// Operator-supplied hook deciding the provider from the whole context.
pub struct ScriptedTrigger {
    directory: Arc<ProviderDirectory>,
    script: Arc<dyn Fn(&FlowContext) -> Option<String> + Send + Sync>,
}

impl ScriptedTrigger {
    #[must_use]
    pub fn new(
        directory: Arc<ProviderDirectory>,
        script: Arc<dyn Fn(&FlowContext) -> Option<String> + Send + Sync>,
    ) -> Self {
        Self { directory, script }
    }
}

#[async_trait]
impl TriggerResolver for ScriptedTrigger {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn resolve(&self, ctx: &FlowContext) -> Result<Option<Event>, AuthenticationError> {
        let Some(provider_id) = (self.script)(ctx) else {
            return Ok(None);
        };
        Ok(candidate_for(&self.directory, ctx, &provider_id, "scripted").await)
    }
}

/// Applies the provider named by the registered service's multifactor
/// policy. Policies that are attribute-conditional are handled by
/// [`RegisteredServicePrincipalAttributeTrigger`] instead.
pub struct RegisteredServiceTrigger {
    directory: Arc<ProviderDirectory>,
}

impl RegisteredServiceTrigger {
    #[must_use]
    pub fn new(directory: Arc<ProviderDirectory>) -> Self {
        Self { directory }
    }
}

#[async_trait]
impl TriggerResolver for RegisteredServiceTrigger {
    fn name(&self) -> &'static str {
        "registered-service"
    }

    async fn resolve(&self, ctx: &FlowContext) -> Result<Option<Event>, AuthenticationError> {
        let Some(registered) = ctx.registered_service() else {
            return Ok(None);
        };
        let policy = registered.mfa_policy();
        if policy.provider_ids().is_empty() || policy.principal_attribute_name().is_some() {
            return Ok(None);
        }
        let Some(provider_id) = least_escalated(&self.directory, policy.provider_ids()) else {
            return Ok(None);
        };
        let provider_id = provider_id.to_string();
        Ok(candidate_for(&self.directory, ctx, &provider_id, "registered-service").await)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
pub(crate) mod tests {
    use super::*;
    use crate::authn::{Authentication, Principal};
    use crate::mfa::{BypassRules, StaticMultifactorProvider};
    use crate::service::{MultifactorPolicy, RegisteredService};

    pub(crate) fn directory() -> Arc<ProviderDirectory> {
        Arc::new(
            ProviderDirectory::new()
                .with_provider(Arc::new(StaticMultifactorProvider::new("mfa-duo", 10)))
                .with_provider(Arc::new(StaticMultifactorProvider::new("mfa-webauthn", 20))),
        )
    }

    pub(crate) fn authenticated_context() -> FlowContext {
        let mut ctx = FlowContext::new();
        ctx.set_authentication(Authentication::new(
            Principal::new("casuser").with_attribute("groups", ["staff"]),
        ));
        ctx
    }

    #[tokio::test]
    async fn global_trigger_applies_its_configured_provider() {
        let config = MultifactorConfig::new().with_global_provider("mfa-duo");
        let trigger = GlobalTrigger::new(directory(), &config);
        let ctx = authenticated_context();

        let event = trigger.resolve(&ctx).await.unwrap().unwrap();
        assert_eq!(event.id(), "mfa-duo");
        assert_eq!(
            event.attributes().principal().map(Principal::id),
            Some("casuser")
        );
    }

    #[tokio::test]
    async fn unconfigured_global_trigger_has_no_opinion() {
        let trigger = GlobalTrigger::new(directory(), &MultifactorConfig::new());
        assert!(trigger
            .resolve(&authenticated_context())
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn triggers_require_an_authentication() {
        let config = MultifactorConfig::new().with_global_provider("mfa-duo");
        let trigger = GlobalTrigger::new(directory(), &config);
        assert!(trigger.resolve(&FlowContext::new()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn bypassed_provider_emits_nothing() {
        let bypassed = StaticMultifactorProvider::new("mfa-duo", 10).with_bypass(Arc::new(
            BypassRules::new().with_principal_attribute("groups", "^staff$"),
        ));
        let directory = Arc::new(ProviderDirectory::new().with_provider(Arc::new(bypassed)));
        let config = MultifactorConfig::new().with_global_provider("mfa-duo");
        let trigger = GlobalTrigger::new(directory, &config);

        assert!(trigger
            .resolve(&authenticated_context())
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn unregistered_provider_still_produces_a_candidate() {
        let config = MultifactorConfig::new().with_global_provider("mfa-disabled");
        let trigger = GlobalTrigger::new(directory(), &config);
        let event = trigger
            .resolve(&authenticated_context())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.id(), "mfa-disabled");
    }

    #[tokio::test]
    async fn scripted_trigger_consults_the_hook() {
        let trigger = ScriptedTrigger::new(
            directory(),
            Arc::new(|ctx: &FlowContext| {
                ctx.principal()
                    .filter(|principal| principal.id() == "casuser")
                    .map(|_| "mfa-webauthn".to_string())
            }),
        );
        let event = trigger
            .resolve(&authenticated_context())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.id(), "mfa-webauthn");
    }

    #[tokio::test]
    async fn service_trigger_prefers_the_least_escalated_provider() {
        let trigger = RegisteredServiceTrigger::new(directory());
        let mut ctx = authenticated_context();
        ctx.set_registered_service(
            RegisteredService::new(1, "app", ".*").with_mfa_policy(
                MultifactorPolicy::new()
                    .with_provider("mfa-webauthn")
                    .with_provider("mfa-duo"),
            ),
        );

        let event = trigger.resolve(&ctx).await.unwrap().unwrap();
        assert_eq!(event.id(), "mfa-duo");
    }

    #[tokio::test]
    async fn service_trigger_skips_attribute_conditional_policies() {
        let trigger = RegisteredServiceTrigger::new(directory());
        let mut ctx = authenticated_context();
        ctx.set_registered_service(
            RegisteredService::new(1, "app", ".*").with_mfa_policy(
                MultifactorPolicy::new()
                    .with_provider("mfa-duo")
                    .with_principal_attribute("groups", "^vip$"),
            ),
        );
        assert!(trigger.resolve(&ctx).await.unwrap().is_none());

        // And has no opinion for services without a policy at all.
        let mut plain = authenticated_context();
        plain.set_registered_service(RegisteredService::new(2, "plain", ".*"));
        assert!(trigger.resolve(&plain).await.unwrap().is_none());
    }
}
