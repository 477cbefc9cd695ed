//! Attribute-driven multifactor triggers.

use async_trait::async_trait;
use regex::Regex;
use std::sync::Arc;
use tracing::warn;

use crate::authn::{AuthenticationError, Principal};
use crate::mfa::{MultifactorProvider, ProviderDirectory};
use crate::webflow::{Event, FlowContext};

use super::{TriggerResolver, candidate_for, least_escalated};

fn any_value_matches(values: &[String], pattern: &str) -> bool {
    match Regex::new(pattern) {
        Ok(regex) => values.iter().any(|value| regex.is_match(value)),
        Err(err) => {
            warn!("invalid trigger pattern [{pattern}]: {err}");
            false
        }
    }
}

/// Requires a provider when a principal attribute value matches a
/// configured pattern, for every service.
pub struct PrincipalAttributeTrigger {
    directory: Arc<ProviderDirectory>,
    attribute_names: Vec<String>,
    value_pattern: String,
    provider_id: String,
}

impl PrincipalAttributeTrigger {
    #[must_use]
    pub fn new<I, S>(
        directory: Arc<ProviderDirectory>,
        attribute_names: I,
        value_pattern: impl Into<String>,
        provider_id: impl Into<String>,
    ) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            directory,
            attribute_names: attribute_names.into_iter().map(Into::into).collect(),
            value_pattern: value_pattern.into(),
            provider_id: provider_id.into(),
        }
    }
}

#[async_trait]
impl TriggerResolver for PrincipalAttributeTrigger {
    fn name(&self) -> &'static str {
        "principal-attribute"
    }

    async fn resolve(&self, ctx: &FlowContext) -> Result<Option<Event>, AuthenticationError> {
        let Some(principal) = ctx.principal() else {
            return Ok(None);
        };
        let matched = self.attribute_names.iter().any(|name| {
            any_value_matches(principal.attribute_values(name), &self.value_pattern)
        });
        if !matched {
            return Ok(None);
        }
        Ok(candidate_for(&self.directory, ctx, &self.provider_id, "principal-attribute").await)
    }
}

/// Requires a provider when an authentication attribute value matches.
pub struct AuthenticationAttributeTrigger {
    directory: Arc<ProviderDirectory>,
    attribute_names: Vec<String>,
    value_pattern: String,
    provider_id: String,
}

impl AuthenticationAttributeTrigger {
    #[must_use]
    pub fn new<I, S>(
        directory: Arc<ProviderDirectory>,
        attribute_names: I,
        value_pattern: impl Into<String>,
        provider_id: impl Into<String>,
    ) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            directory,
            attribute_names: attribute_names.into_iter().map(Into::into).collect(),
            value_pattern: value_pattern.into(),
            provider_id: provider_id.into(),
        }
    }
}

#[async_trait]
impl TriggerResolver for AuthenticationAttributeTrigger {
    fn name(&self) -> &'static str {
        "authentication-attribute"
    }

    async fn resolve(&self, ctx: &FlowContext) -> Result<Option<Event>, AuthenticationError> {
        let Some(authentication) = ctx.authentication() else {
            return Ok(None);
        };
        let matched = self.attribute_names.iter().any(|name| {
            any_value_matches(authentication.attribute_values(name), &self.value_pattern)
        });
        if !matched {
            return Ok(None);
        }
        Ok(
            candidate_for(
                &self.directory,
                ctx,
                &self.provider_id,
                "authentication-attribute",
            )
            .await,
        )
    }
}

/// Applies the registered service's attribute-conditional multifactor
/// policy: the policy names an attribute and value pattern, and the policy's
/// providers apply only to matching principals.
pub struct RegisteredServicePrincipalAttributeTrigger {
    directory: Arc<ProviderDirectory>,
}

impl RegisteredServicePrincipalAttributeTrigger {
    #[must_use]
    pub fn new(directory: Arc<ProviderDirectory>) -> Self {
        Self { directory }
    }
}

#[async_trait]
impl TriggerResolver for RegisteredServicePrincipalAttributeTrigger {
    fn name(&self) -> &'static str {
        "registered-service-principal-attribute"
    }

    async fn resolve(&self, ctx: &FlowContext) -> Result<Option<Event>, AuthenticationError> {
        let Some(registered) = ctx.registered_service() else {
            return Ok(None);
        };
        let Some(principal) = ctx.principal() else {
            return Ok(None);
        };
        let policy = registered.mfa_policy();
        let (Some(name), Some(pattern)) = (
            policy.principal_attribute_name(),
            policy.principal_attribute_value_pattern(),
        ) else {
            return Ok(None);
        };
        if policy.provider_ids().is_empty()
            || !any_value_matches(principal.attribute_values(name), pattern)
        {
            return Ok(None);
        }
        let Some(provider_id) = least_escalated(&self.directory, policy.provider_ids()) else {
            return Ok(None);
        };
        let provider_id = provider_id.to_string();
        Ok(candidate_for(
            &self.directory,
            ctx,
            &provider_id,
            "registered-service-principal-attribute",
        )
        .await)
    }
}

/// Type of the predicate consulted by
/// [`PredicatedPrincipalAttributeTrigger`]: given the principal and the
/// registered providers, name the one to require.
pub type PrincipalPredicate =
    dyn Fn(&Principal, &[Arc<dyn MultifactorProvider>]) -> Option<String> + Send + Sync;

/// Requires a provider chosen by an operator-supplied predicate over the
/// principal's attributes.
pub struct PredicatedPrincipalAttributeTrigger {
    directory: Arc<ProviderDirectory>,
    predicate: Arc<PrincipalPredicate>,
}

impl PredicatedPrincipalAttributeTrigger {
    #[must_use]
    pub fn new(directory: Arc<ProviderDirectory>, predicate: Arc<PrincipalPredicate>) -> Self {
        Self {
            directory,
            predicate,
        }
    }
}

#[async_trait]
impl TriggerResolver for PredicatedPrincipalAttributeTrigger {
    fn name(&self) -> &'static str {
        "predicated-principal-attribute"
    }

    async fn resolve(&self, ctx: &FlowContext) -> Result<Option<Event>, AuthenticationError> {
        let Some(principal) = ctx.principal() else {
            return Ok(None);
        };
        let providers = self.directory.all();
        let Some(provider_id) = (self.predicate)(principal, &providers) else {
            return Ok(None);
        };
        Ok(candidate_for(
            &self.directory,
            ctx,
            &provider_id,
            "predicated-principal-attribute",
        )
        .await)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::super::tests::{authenticated_context, directory};
    use super::*;
    use crate::authn::{AUTHENTICATION_METHOD_ATTRIBUTE, Authentication};
    use crate::service::{MultifactorPolicy, RegisteredService};

    #[tokio::test]
    async fn principal_attribute_trigger_matches_any_named_attribute() {
        let trigger = PrincipalAttributeTrigger::new(
            directory(),
            ["memberships", "groups"],
            "^staff$",
            "mfa-duo",
        );
        let event = trigger
            .resolve(&authenticated_context())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.id(), "mfa-duo");

        let no_match = PrincipalAttributeTrigger::new(
            directory(),
            ["groups"],
            "^admins$",
            "mfa-duo",
        );
        assert!(no_match
            .resolve(&authenticated_context())
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn authentication_attribute_trigger_reads_authentication_attributes() {
        let mut ctx = authenticated_context();
        let authentication = ctx.authentication().cloned().unwrap();
        ctx.set_authentication(
            authentication.with_attribute(AUTHENTICATION_METHOD_ATTRIBUTE, ["password"]),
        );

        let trigger = AuthenticationAttributeTrigger::new(
            directory(),
            [AUTHENTICATION_METHOD_ATTRIBUTE],
            "^password$",
            "mfa-webauthn",
        );
        let event = trigger.resolve(&ctx).await.unwrap().unwrap();
        assert_eq!(event.id(), "mfa-webauthn");
    }

    #[tokio::test]
    async fn service_attribute_policy_applies_only_to_matching_principals() {
        let trigger = RegisteredServicePrincipalAttributeTrigger::new(directory());
        let mut ctx = authenticated_context();
        ctx.set_registered_service(
            RegisteredService::new(1, "app", ".*").with_mfa_policy(
                MultifactorPolicy::new()
                    .with_provider("mfa-duo")
                    .with_principal_attribute("groups", "^staff$"),
            ),
        );
        let event = trigger.resolve(&ctx).await.unwrap().unwrap();
        assert_eq!(event.id(), "mfa-duo");

        let mut other = authenticated_context();
        other.set_authentication(Authentication::new(
            crate::authn::Principal::new("guest").with_attribute("groups", ["guests"]),
        ));
        other.set_registered_service(
            RegisteredService::new(1, "app", ".*").with_mfa_policy(
                MultifactorPolicy::new()
                    .with_provider("mfa-duo")
                    .with_principal_attribute("groups", "^staff$"),
            ),
        );
        assert!(trigger.resolve(&other).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn predicated_trigger_chooses_among_registered_providers() {
        let trigger = PredicatedPrincipalAttributeTrigger::new(
            directory(),
            Arc::new(|principal: &Principal, providers: &[Arc<dyn MultifactorProvider>]| {
                if principal.attribute_values("groups").iter().any(|g| g == "staff") {
                    providers.last().map(|provider| provider.id().to_string())
                } else {
                    None
                }
            }),
        );
        let event = trigger
            .resolve(&authenticated_context())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.id(), "mfa-webauthn");
    }
}
