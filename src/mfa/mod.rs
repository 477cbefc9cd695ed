//! Multifactor authentication providers and their runtime directory.
//!
//! A provider represents one configured secondary-factor mechanism,
//! identified by a stable id that doubles as a webflow transition id. Its
//! `order` is a configuration-supplied rank used for arbitration and
//! step-up comparison.

pub mod bypass;
pub mod trigger;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::warn;

use crate::authn::AuthenticationError;
use crate::service::RegisteredService;

pub use bypass::{BypassEvaluator, BypassRules, NeverBypass, RestBypassEvaluator};

/// Authentication attribute listing the provider ids already satisfied by
/// the current session. Appended after each successful challenge; read by
/// the step-up resolver.
pub const MFA_CONTEXT_ATTRIBUTE: &str = "mfa_context";

/// What an unreachable provider means for the request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureMode {
    /// Fail the authentication hard.
    Closed,
    /// Proceed without the factor.
    Open,
    /// Unconfigured: assume the provider is available.
    None,
}

/// One configured multifactor mechanism.
#[async_trait]
pub trait MultifactorProvider: Send + Sync {
    /// Stable identifier, matching a registered webflow transition id.
    fn id(&self) -> &str;

    /// Configuration-supplied rank; arbitration prefers the lowest.
    fn order(&self) -> i32;

    fn failure_mode(&self) -> FailureMode;

    fn bypass(&self) -> &dyn BypassEvaluator;

    /// Reachability probe for the underlying mechanism.
    async fn ping(&self) -> bool {
        true
    }

    /// Availability for a request, applying the service's failure-mode
    /// override first and the provider's own mode otherwise.
    ///
    /// # Errors
    /// Returns [`AuthenticationError::ProviderUnavailable`] when the
    /// provider is unreachable and the effective mode is
    /// [`FailureMode::Closed`].
    async fn is_available(
        &self,
        registered: Option<&RegisteredService>,
    ) -> Result<bool, AuthenticationError> {
        if self.ping().await {
            return Ok(true);
        }
        let mode = registered
            .and_then(|service| service.mfa_policy().failure_mode())
            .unwrap_or_else(|| self.failure_mode());
        match mode {
            FailureMode::Closed => Err(AuthenticationError::ProviderUnavailable {
                provider: self.id().to_string(),
            }),
            FailureMode::Open => {
                warn!(provider = %self.id(), "provider unreachable; skipping (fail-open)");
                Ok(false)
            }
            FailureMode::None => Ok(true),
        }
    }
}

/// Provider defined entirely by configuration, with a toggleable health
/// flag standing in for the mechanism's reachability probe.
pub struct StaticMultifactorProvider {
    id: String,
    order: i32,
    failure_mode: FailureMode,
    bypass: Arc<dyn BypassEvaluator>,
    healthy: AtomicBool,
}

impl StaticMultifactorProvider {
    #[must_use]
    pub fn new(id: impl Into<String>, order: i32) -> Self {
        Self {
            id: id.into(),
            order,
            failure_mode: FailureMode::None,
            bypass: Arc::new(NeverBypass),
            healthy: AtomicBool::new(true),
        }
    }

    #[must_use]
    pub fn with_failure_mode(mut self, mode: FailureMode) -> Self {
        self.failure_mode = mode;
        self
    }

    #[must_use]
    pub fn with_bypass(mut self, bypass: Arc<dyn BypassEvaluator>) -> Self {
        self.bypass = bypass;
        self
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::Relaxed);
    }
}

#[async_trait]
impl MultifactorProvider for StaticMultifactorProvider {
    fn id(&self) -> &str {
        &self.id
    }

    fn order(&self) -> i32 {
        self.order
    }

    fn failure_mode(&self) -> FailureMode {
        self.failure_mode
    }

    fn bypass(&self) -> &dyn BypassEvaluator {
        self.bypass.as_ref()
    }

    async fn ping(&self) -> bool {
        self.healthy.load(Ordering::Relaxed)
    }
}

/// Directory of providers, populated from configuration at startup and
/// queried by exact id. No runtime scanning.
#[derive(Clone, Default)]
pub struct ProviderDirectory {
    providers: HashMap<String, Arc<dyn MultifactorProvider>>,
}

impl ProviderDirectory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_provider(mut self, provider: Arc<dyn MultifactorProvider>) -> Self {
        self.register(provider);
        self
    }

    pub fn register(&mut self, provider: Arc<dyn MultifactorProvider>) {
        self.providers.insert(provider.id().to_string(), provider);
    }

    #[must_use]
    pub fn get(&self, id: &str) -> Option<Arc<dyn MultifactorProvider>> {
        self.providers.get(id).cloned()
    }

    /// Every registered provider, ordered by `(order, id)` so arbitration
    /// and logs are deterministic.
    #[must_use]
    pub fn all(&self) -> Vec<Arc<dyn MultifactorProvider>> {
        let mut providers: Vec<_> = self.providers.values().cloned().collect();
        providers.sort_by(|a, b| (a.order(), a.id()).cmp(&(b.order(), b.id())));
        providers
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.providers.len()
    }
}
