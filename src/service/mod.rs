//! Relying-service model: the inbound [`Service`] identifier, the
//! pre-registered [`RegisteredService`] policy record, and access
//! enforcement.
//!
//! Security boundaries:
//! - Every request naming a service is matched against the registration
//!   catalog before any ticket is granted.
//! - Access-strategy denial aborts event resolution with a terminal failure;
//!   it is never downgraded to a plain success.

pub mod attribute_release;

use anyhow::Context;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, warn};
use url::Url;

use crate::authn::{AuthenticationError, Principal};
use crate::mfa::FailureMode;

pub use attribute_release::AttributeReleasePolicy;

/// The relying party identifier carried by an authentication request,
/// normalized from the request's service URL.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Service {
    id: String,
}

impl Service {
    /// Build a service from an already-normalized identifier.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }

    /// Parse and normalize a service URL (trailing slash stripped).
    ///
    /// # Errors
    /// Returns an error if the value is not a valid absolute URL.
    pub fn parse(raw: &str) -> anyhow::Result<Self> {
        let url = Url::parse(raw.trim()).with_context(|| format!("invalid service url: {raw}"))?;
        Ok(Self {
            id: url.as_str().trim_end_matches('/').to_string(),
        })
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }
}

/// Authorization policy attached to a registered service.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessStrategy {
    enabled: bool,
    required_attributes: HashMap<String, Vec<String>>,
}

impl Default for AccessStrategy {
    fn default() -> Self {
        Self {
            enabled: true,
            required_attributes: HashMap::new(),
        }
    }
}

impl AccessStrategy {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            required_attributes: HashMap::new(),
        }
    }

    #[must_use]
    pub fn with_required_attribute<I, S>(mut self, name: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.required_attributes
            .insert(name.into(), values.into_iter().map(Into::into).collect());
        self
    }

    /// Whether the strategy authorizes the given principal.
    ///
    /// Required attributes are satisfied when the principal carries at least
    /// one of the accepted values for every required name. A strategy with
    /// required attributes and no principal (no authentication yet) denies.
    #[must_use]
    pub fn permits(&self, principal: Option<&Principal>) -> bool {
        if !self.enabled {
            return false;
        }
        if self.required_attributes.is_empty() {
            return true;
        }
        let Some(principal) = principal else {
            return false;
        };
        self.required_attributes.iter().all(|(name, accepted)| {
            principal
                .attribute_values(name)
                .iter()
                .any(|value| accepted.contains(value))
        })
    }
}

/// Multifactor policy attached to a registered service.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MultifactorPolicy {
    provider_ids: Vec<String>,
    principal_attribute_name: Option<String>,
    principal_attribute_value_pattern: Option<String>,
    failure_mode: Option<FailureMode>,
}

impl MultifactorPolicy {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_provider(mut self, provider_id: impl Into<String>) -> Self {
        self.provider_ids.push(provider_id.into());
        self
    }

    #[must_use]
    pub fn with_principal_attribute(
        mut self,
        name: impl Into<String>,
        value_pattern: impl Into<String>,
    ) -> Self {
        self.principal_attribute_name = Some(name.into());
        self.principal_attribute_value_pattern = Some(value_pattern.into());
        self
    }

    #[must_use]
    pub fn with_failure_mode(mut self, mode: FailureMode) -> Self {
        self.failure_mode = Some(mode);
        self
    }

    #[must_use]
    pub fn provider_ids(&self) -> &[String] {
        &self.provider_ids
    }

    #[must_use]
    pub fn principal_attribute_name(&self) -> Option<&str> {
        self.principal_attribute_name.as_deref()
    }

    #[must_use]
    pub fn principal_attribute_value_pattern(&self) -> Option<&str> {
        self.principal_attribute_value_pattern.as_deref()
    }

    #[must_use]
    pub fn failure_mode(&self) -> Option<FailureMode> {
        self.failure_mode
    }
}

/// A relying party pre-registered with its access, multifactor and
/// attribute-release policies.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RegisteredService {
    id: u64,
    name: String,
    service_id_pattern: String,
    access: AccessStrategy,
    mfa_policy: MultifactorPolicy,
    attribute_release: AttributeReleasePolicy,
}

impl RegisteredService {
    #[must_use]
    pub fn new(id: u64, name: impl Into<String>, service_id_pattern: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            service_id_pattern: service_id_pattern.into(),
            access: AccessStrategy::default(),
            mfa_policy: MultifactorPolicy::default(),
            attribute_release: AttributeReleasePolicy::ReturnAll,
        }
    }

    #[must_use]
    pub fn with_access_strategy(mut self, access: AccessStrategy) -> Self {
        self.access = access;
        self
    }

    #[must_use]
    pub fn with_mfa_policy(mut self, policy: MultifactorPolicy) -> Self {
        self.mfa_policy = policy;
        self
    }

    #[must_use]
    pub fn with_attribute_release(mut self, policy: AttributeReleasePolicy) -> Self {
        self.attribute_release = policy;
        self
    }

    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn access_strategy(&self) -> &AccessStrategy {
        &self.access
    }

    #[must_use]
    pub fn mfa_policy(&self) -> &MultifactorPolicy {
        &self.mfa_policy
    }

    #[must_use]
    pub fn attribute_release(&self) -> &AttributeReleasePolicy {
        &self.attribute_release
    }

    /// Whether the registration's pattern matches the inbound service id.
    #[must_use]
    pub fn matches(&self, service: &Service) -> bool {
        match Regex::new(&self.service_id_pattern) {
            Ok(pattern) => pattern.is_match(service.id()),
            Err(err) => {
                warn!(
                    service = %self.name,
                    "invalid service id pattern [{}]: {err}", self.service_id_pattern
                );
                false
            }
        }
    }
}

/// Catalog of registered services, queried per request.
pub trait ServicesManager: Send + Sync {
    fn find_service_by(&self, service: &Service) -> Option<RegisteredService>;
}

/// Registration catalog backed by an in-memory list, matched in insertion
/// order.
#[derive(Clone, Debug, Default)]
pub struct InMemoryServicesManager {
    services: Vec<RegisteredService>,
}

impl InMemoryServicesManager {
    #[must_use]
    pub fn new(services: Vec<RegisteredService>) -> Self {
        Self { services }
    }
}

impl ServicesManager for InMemoryServicesManager {
    fn find_service_by(&self, service: &Service) -> Option<RegisteredService> {
        let found = self
            .services
            .iter()
            .find(|registered| registered.matches(service))
            .cloned();
        if found.is_none() {
            debug!(service = %service.id(), "no registered service matches");
        }
        found
    }
}

/// Enforces a registered service's access strategy before event resolution
/// proceeds.
pub trait AccessStrategyEnforcer: Send + Sync {
    /// # Errors
    /// Returns [`AuthenticationError::AccessDenied`] when the strategy
    /// rejects the request.
    fn enforce(
        &self,
        service: &Service,
        registered: &RegisteredService,
        principal: Option<&Principal>,
    ) -> Result<(), AuthenticationError>;
}

#[derive(Clone, Debug, Default)]
pub struct DefaultAccessStrategyEnforcer;

impl AccessStrategyEnforcer for DefaultAccessStrategyEnforcer {
    fn enforce(
        &self,
        service: &Service,
        registered: &RegisteredService,
        principal: Option<&Principal>,
    ) -> Result<(), AuthenticationError> {
        if registered.access_strategy().permits(principal) {
            return Ok(());
        }
        warn!(service = %service.id(), "access strategy denied the request");
        Err(AuthenticationError::AccessDenied {
            service: service.id().to_string(),
        })
    }
}
