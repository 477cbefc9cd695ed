//! Bypass rules deciding whether a provider's challenge should be skipped
//! for a given authentication.
//!
//! Rules are expressed as "bypass when this matches"; an evaluator returns
//! `true` when the provider still applies and `false` when it should be
//! skipped. An unconfigured rule is trivially satisfied.

use async_trait::async_trait;
use regex::Regex;
use reqwest::Client;
use serde_json::json;
use tracing::{debug, warn};
use url::Url;

use crate::authn::{AUTHENTICATION_METHOD_ATTRIBUTE, Authentication, Credential};

/// Decides whether a provider applies to the authentication at hand.
#[async_trait]
pub trait BypassEvaluator: Send + Sync {
    /// `true` = do not bypass, the provider's challenge runs.
    async fn eval(&self, authentication: &Authentication, credential: Option<&Credential>)
        -> bool;
}

/// The provider always applies.
#[derive(Clone, Debug, Default)]
pub struct NeverBypass;

#[async_trait]
impl BypassEvaluator for NeverBypass {
    async fn eval(&self, _authentication: &Authentication, _credential: Option<&Credential>) -> bool {
        true
    }
}

/// Composed match rules; any configured rule that matches bypasses the
/// provider, independently of the others.
#[derive(Clone, Debug, Default)]
pub struct BypassRules {
    principal_attribute: Option<(String, String)>,
    authentication_attribute: Option<(String, String)>,
    authentication_method_pattern: Option<String>,
    handler_name_pattern: Option<String>,
    credential_kind: Option<String>,
}

impl BypassRules {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Bypass when the named principal attribute has a value matching the
    /// pattern.
    #[must_use]
    pub fn with_principal_attribute(
        mut self,
        name: impl Into<String>,
        value_pattern: impl Into<String>,
    ) -> Self {
        self.principal_attribute = Some((name.into(), value_pattern.into()));
        self
    }

    /// Bypass when the named authentication attribute has a matching value.
    #[must_use]
    pub fn with_authentication_attribute(
        mut self,
        name: impl Into<String>,
        value_pattern: impl Into<String>,
    ) -> Self {
        self.authentication_attribute = Some((name.into(), value_pattern.into()));
        self
    }

    /// Bypass when the primary authentication method matches.
    #[must_use]
    pub fn with_authentication_method(mut self, pattern: impl Into<String>) -> Self {
        self.authentication_method_pattern = Some(pattern.into());
        self
    }

    /// Bypass when any successful handler's name matches.
    #[must_use]
    pub fn with_handler_name(mut self, pattern: impl Into<String>) -> Self {
        self.handler_name_pattern = Some(pattern.into());
        self
    }

    /// Bypass when the presented credential is of the given kind.
    #[must_use]
    pub fn with_credential_kind(mut self, kind: impl Into<String>) -> Self {
        self.credential_kind = Some(kind.into());
        self
    }
}

#[async_trait]
impl BypassEvaluator for BypassRules {
    async fn eval(
        &self,
        authentication: &Authentication,
        credential: Option<&Credential>,
    ) -> bool {
        if let Some((name, pattern)) = &self.principal_attribute {
            if any_value_matches(
                authentication.principal().attribute_values(name),
                pattern,
            ) {
                debug!(attribute = %name, "bypassing provider on principal attribute");
                return false;
            }
        }
        if let Some((name, pattern)) = &self.authentication_attribute {
            if any_value_matches(authentication.attribute_values(name), pattern) {
                debug!(attribute = %name, "bypassing provider on authentication attribute");
                return false;
            }
        }
        if let Some(pattern) = &self.authentication_method_pattern {
            if any_value_matches(
                authentication.attribute_values(AUTHENTICATION_METHOD_ATTRIBUTE),
                pattern,
            ) {
                debug!("bypassing provider on authentication method");
                return false;
            }
        }
        if let Some(pattern) = &self.handler_name_pattern {
            let handlers: Vec<String> = authentication.successes().keys().cloned().collect();
            if any_value_matches(&handlers, pattern) {
                debug!("bypassing provider on successful handler name");
                return false;
            }
        }
        if let Some(kind) = &self.credential_kind {
            if credential.is_some_and(|credential| credential.kind() == kind) {
                debug!(kind = %kind, "bypassing provider on credential kind");
                return false;
            }
        }
        true
    }
}

fn any_value_matches(values: &[String], pattern: &str) -> bool {
    match Regex::new(pattern) {
        Ok(regex) => values.iter().any(|value| regex.is_match(value)),
        Err(err) => {
            warn!("invalid bypass pattern [{pattern}]: {err}");
            false
        }
    }
}

/// Delegates the bypass decision to an external endpoint.
///
/// Any 2xx response means "bypass accepted"; errors and non-2xx responses
/// leave the provider applying.
#[derive(Clone, Debug)]
pub struct RestBypassEvaluator {
    client: Client,
    endpoint: Url,
    provider_id: String,
}

impl RestBypassEvaluator {
    #[must_use]
    pub fn new(endpoint: Url, provider_id: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            endpoint,
            provider_id: provider_id.into(),
        }
    }

    #[must_use]
    pub fn with_client(mut self, client: Client) -> Self {
        self.client = client;
        self
    }
}

#[async_trait]
impl BypassEvaluator for RestBypassEvaluator {
    async fn eval(
        &self,
        authentication: &Authentication,
        credential: Option<&Credential>,
    ) -> bool {
        let body = json!({
            "principal": authentication.principal().id(),
            "provider": self.provider_id,
            "credential_kind": credential.map(Credential::kind),
        });
        match self
            .client
            .post(self.endpoint.clone())
            .json(&body)
            .send()
            .await
        {
            Ok(response) if response.status().is_success() => {
                debug!(provider = %self.provider_id, "bypass accepted by endpoint");
                false
            }
            Ok(response) => {
                debug!(
                    provider = %self.provider_id,
                    status = %response.status(),
                    "bypass endpoint declined"
                );
                true
            }
            Err(err) => {
                warn!(provider = %self.provider_id, "bypass endpoint unreachable: {err}");
                true
            }
        }
    }
}
