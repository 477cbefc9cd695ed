//! Authentication domain model and the collaborator seam to the
//! authentication engine.
//!
//! Flow Overview:
//! 1) A credential enters the webflow and is handed to
//!    [`AuthenticationSystemSupport`] for the primary-factor transaction.
//! 2) The resulting [`Authentication`] (principal, per-handler outcomes,
//!    attributes) is carried through the event-resolution pipeline.
//! 3) Multifactor challenges append to the authentication's attributes so a
//!    later request can prove which contexts were already satisfied.
//!
//! The concrete handlers behind [`AuthenticationSystemSupport`] (password,
//! WebAuthn, delegated identity providers) live outside this crate; the core
//! only inspects the transaction outcome.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::SystemTime;
use thiserror::Error;

use crate::service::Service;
use crate::ticket::TicketError;

/// Authentication attribute holding the method name of the primary factor.
pub const AUTHENTICATION_METHOD_ATTRIBUTE: &str = "authentication_method";

/// Domain errors raised by authentication and event resolution.
///
/// Fatal variants ([`AuthenticationError::MissingTransition`],
/// [`AuthenticationError::UnknownProvider`]) indicate deployment
/// misconfiguration and are propagated; everything else is translated into a
/// terminal webflow event at the resolver boundary.
#[derive(Debug, Error)]
pub enum AuthenticationError {
    #[error("authentication failed: {0}")]
    Failed(String),
    #[error("no authentication present in the transaction")]
    NoAuthentication,
    #[error("access to service [{service}] is denied")]
    AccessDenied { service: String },
    #[error("multifactor provider [{provider}] is unavailable")]
    ProviderUnavailable { provider: String },
    #[error("multifactor provider [{provider}] is not registered")]
    UnknownProvider { provider: String },
    #[error("no transition is registered for event [{event}]")]
    MissingTransition { event: String },
    #[error(transparent)]
    Ticket(#[from] TicketError),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl AuthenticationError {
    /// Whether the error is a configuration/programmer error that must not
    /// be recovered into a terminal event.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::MissingTransition { .. } | Self::UnknownProvider { .. }
        )
    }
}

/// The authenticated subject plus released attributes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    id: String,
    attributes: HashMap<String, Vec<String>>,
}

impl Principal {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            attributes: HashMap::new(),
        }
    }

    #[must_use]
    pub fn with_attribute<I, S>(mut self, name: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.attributes
            .insert(name.into(), values.into_iter().map(Into::into).collect());
        self
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[must_use]
    pub fn attributes(&self) -> &HashMap<String, Vec<String>> {
        &self.attributes
    }

    /// Values for a named attribute; empty when the attribute is absent.
    #[must_use]
    pub fn attribute_values(&self, name: &str) -> &[String] {
        self.attributes.get(name).map_or(&[], Vec::as_slice)
    }
}

/// A credential presented for primary-factor authentication.
///
/// The variant name doubles as the credential kind used by bypass rules.
#[derive(Clone, Debug)]
pub enum Credential {
    UsernamePassword {
        username: String,
        password: SecretString,
    },
    OneTimeCode {
        username: String,
        code: String,
    },
    External {
        source: String,
        subject: String,
    },
}

impl Credential {
    #[must_use]
    pub fn username_password(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self::UsernamePassword {
            username: username.into(),
            password: SecretString::from(password.into()),
        }
    }

    /// Stable kind tag, matched by credential-kind bypass rules.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::UsernamePassword { .. } => "username-password",
            Self::OneTimeCode { .. } => "one-time-code",
            Self::External { .. } => "external",
        }
    }

    /// The subject identifier carried by the credential.
    #[must_use]
    pub fn id(&self) -> &str {
        match self {
            Self::UsernamePassword { username, .. } | Self::OneTimeCode { username, .. } => {
                username
            }
            Self::External { subject, .. } => subject,
        }
    }

    /// Expose the password for verification by an authentication handler.
    #[must_use]
    pub fn expose_password(&self) -> Option<&str> {
        match self {
            Self::UsernamePassword { password, .. } => Some(password.expose_secret()),
            _ => None,
        }
    }
}

/// Outcome of one successful authentication handler.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandlerResult {
    handler: String,
    warnings: Vec<String>,
}

impl HandlerResult {
    #[must_use]
    pub fn new(handler: impl Into<String>) -> Self {
        Self {
            handler: handler.into(),
            warnings: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_warning(mut self, warning: impl Into<String>) -> Self {
        self.warnings.push(warning.into());
        self
    }

    #[must_use]
    pub fn handler(&self) -> &str {
        &self.handler
    }

    #[must_use]
    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }
}

/// An established authentication: principal, per-handler outcomes, and the
/// attribute bag carried by the session ticket.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Authentication {
    principal: Principal,
    authenticated_at: SystemTime,
    attributes: HashMap<String, Vec<String>>,
    successes: HashMap<String, HandlerResult>,
    failures: HashMap<String, String>,
}

impl Authentication {
    #[must_use]
    pub fn new(principal: Principal) -> Self {
        Self {
            principal,
            authenticated_at: SystemTime::now(),
            attributes: HashMap::new(),
            successes: HashMap::new(),
            failures: HashMap::new(),
        }
    }

    #[must_use]
    pub fn with_attribute<I, S>(mut self, name: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.attributes
            .insert(name.into(), values.into_iter().map(Into::into).collect());
        self
    }

    #[must_use]
    pub fn with_success(mut self, result: HandlerResult) -> Self {
        self.successes.insert(result.handler().to_string(), result);
        self
    }

    #[must_use]
    pub fn with_failure(mut self, handler: impl Into<String>, reason: impl Into<String>) -> Self {
        self.failures.insert(handler.into(), reason.into());
        self
    }

    #[must_use]
    pub fn principal(&self) -> &Principal {
        &self.principal
    }

    #[must_use]
    pub fn authenticated_at(&self) -> SystemTime {
        self.authenticated_at
    }

    #[must_use]
    pub fn attributes(&self) -> &HashMap<String, Vec<String>> {
        &self.attributes
    }

    /// Values for a named authentication attribute; empty when absent.
    #[must_use]
    pub fn attribute_values(&self, name: &str) -> &[String] {
        self.attributes.get(name).map_or(&[], Vec::as_slice)
    }

    /// Append a value to a (possibly multi-valued) authentication attribute.
    pub fn append_attribute_value(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.attributes
            .entry(name.into())
            .or_default()
            .push(value.into());
    }

    #[must_use]
    pub fn successes(&self) -> &HashMap<String, HandlerResult> {
        &self.successes
    }

    #[must_use]
    pub fn failures(&self) -> &HashMap<String, String> {
        &self.failures
    }

    /// Warnings aggregated across successful handlers.
    #[must_use]
    pub fn warnings(&self) -> Vec<&str> {
        let mut warnings: Vec<&str> = self
            .successes
            .values()
            .flat_map(|result| result.warnings().iter().map(String::as_str))
            .collect();
        warnings.sort_unstable();
        warnings
    }

    #[must_use]
    pub fn has_warnings(&self) -> bool {
        self.successes
            .values()
            .any(|result| !result.warnings().is_empty())
    }
}

/// Accumulates authentications and credentials across a multi-step
/// transaction before the final result is assembled.
#[derive(Clone, Debug, Default)]
pub struct AuthenticationResultBuilder {
    authentications: Vec<Authentication>,
    credentials: Vec<Credential>,
}

impl AuthenticationResultBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn collect_authentication(mut self, authentication: Authentication) -> Self {
        self.authentications.push(authentication);
        self
    }

    #[must_use]
    pub fn collect_credential(mut self, credential: Credential) -> Self {
        self.credentials.push(credential);
        self
    }

    /// The authentication established by the initial (primary-factor)
    /// transaction, when present.
    #[must_use]
    pub fn initial_authentication(&self) -> Option<&Authentication> {
        self.authentications.first()
    }

    /// Merge the collected authentications into a single result.
    ///
    /// The principal comes from the initial authentication; attributes and
    /// handler outcomes are merged across steps in collection order.
    ///
    /// # Errors
    /// Returns [`AuthenticationError::NoAuthentication`] if nothing was
    /// collected.
    pub fn build(&self, service: Option<Service>) -> Result<AuthenticationResult, AuthenticationError> {
        let mut steps = self.authentications.iter();
        let Some(initial) = steps.next() else {
            return Err(AuthenticationError::NoAuthentication);
        };

        let mut merged = initial.clone();
        for step in steps {
            for (name, values) in step.attributes() {
                let slot = merged.attributes.entry(name.clone()).or_default();
                for value in values {
                    if !slot.contains(value) {
                        slot.push(value.clone());
                    }
                }
            }
            merged.successes.extend(
                step.successes
                    .iter()
                    .map(|(name, result)| (name.clone(), result.clone())),
            );
            merged
                .failures
                .extend(step.failures.iter().map(|(k, v)| (k.clone(), v.clone())));
        }

        Ok(AuthenticationResult {
            authentication: merged,
            service,
        })
    }
}

/// The finalized authentication transaction handed to ticket issuance.
#[derive(Clone, Debug)]
pub struct AuthenticationResult {
    authentication: Authentication,
    service: Option<Service>,
}

impl AuthenticationResult {
    #[must_use]
    pub fn authentication(&self) -> &Authentication {
        &self.authentication
    }

    #[must_use]
    pub fn service(&self) -> Option<&Service> {
        self.service.as_ref()
    }
}

/// Seam to the authentication engine proper. The core treats the engine as
/// opaque and only inspects the builders and results it returns.
#[async_trait]
pub trait AuthenticationSystemSupport: Send + Sync {
    /// Run the initial (primary-factor) transaction for a credential.
    async fn handle_initial_authentication_transaction(
        &self,
        service: Option<&Service>,
        credential: &Credential,
    ) -> Result<AuthenticationResultBuilder, AuthenticationError>;

    /// Run a follow-up transaction (e.g. a second factor) against an
    /// existing builder.
    async fn handle_authentication_transaction(
        &self,
        service: Option<&Service>,
        builder: AuthenticationResultBuilder,
        credential: &Credential,
    ) -> Result<AuthenticationResultBuilder, AuthenticationError>;

    /// Seed a builder from an authentication that was established earlier
    /// (an existing single sign-on session).
    async fn establish_authentication_context_from_initial(
        &self,
        authentication: Authentication,
        credential: Option<Credential>,
    ) -> Result<AuthenticationResultBuilder, AuthenticationError>;

    /// Close the transaction and produce the final result.
    async fn finalize_authentication_transaction(
        &self,
        service: Option<&Service>,
        builder: AuthenticationResultBuilder,
    ) -> Result<AuthenticationResult, AuthenticationError>;
}
