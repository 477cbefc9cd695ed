//! Typed webflow context and resolved events.
//!
//! The context is an explicit, typed structure passed by reference through
//! the resolution pipeline: named fields for the credential, service,
//! authentication and candidate events, instead of a stringly attribute
//! bag. Resolvers communicate through it and through their return values
//! only.

pub mod resolver;

use std::collections::{HashMap, HashSet};

use crate::authn::{
    Authentication, AuthenticationError, AuthenticationResultBuilder, Credential, Principal,
};
use crate::service::{RegisteredService, Service};

/// Terminal outcome: grant the primary ticket.
pub const TRANSITION_SUCCESS: &str = "success";
/// Terminal outcome: grant, but surface handler warnings.
pub const TRANSITION_SUCCESS_WITH_WARNINGS: &str = "successWithWarnings";
/// Terminal outcome: authentication-domain failure.
pub const TRANSITION_AUTHENTICATION_FAILURE: &str = "authenticationFailure";
/// Terminal outcome: unexpected failure.
pub const TRANSITION_ERROR: &str = "error";

/// Response status set alongside failure events for the rendering layer.
pub const HTTP_UNAUTHORIZED: u16 = 401;

#[must_use]
pub fn is_terminal_id(id: &str) -> bool {
    matches!(
        id,
        TRANSITION_SUCCESS
            | TRANSITION_SUCCESS_WITH_WARNINGS
            | TRANSITION_AUTHENTICATION_FAILURE
            | TRANSITION_ERROR
    )
}

/// Attributes attached to a resolved event for the downstream transition
/// target.
#[derive(Clone, Debug, Default)]
pub struct EventAttributes {
    principal: Option<Principal>,
    registered_service: Option<RegisteredService>,
    provider_id: Option<String>,
    error: Option<String>,
}

impl EventAttributes {
    #[must_use]
    pub fn principal(&self) -> Option<&Principal> {
        self.principal.as_ref()
    }

    #[must_use]
    pub fn registered_service(&self) -> Option<&RegisteredService> {
        self.registered_service.as_ref()
    }

    #[must_use]
    pub fn provider_id(&self) -> Option<&str> {
        self.provider_id.as_deref()
    }

    /// The triggering error, rendered, for diagnostics.
    #[must_use]
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }
}

/// The resolved outcome of the decision pipeline: a transition id plus
/// attributes.
#[derive(Clone, Debug)]
pub struct Event {
    id: String,
    attributes: EventAttributes,
}

impl Event {
    #[must_use]
    pub fn success() -> Self {
        Self {
            id: TRANSITION_SUCCESS.to_string(),
            attributes: EventAttributes::default(),
        }
    }

    #[must_use]
    pub fn success_with_warnings() -> Self {
        Self {
            id: TRANSITION_SUCCESS_WITH_WARNINGS.to_string(),
            attributes: EventAttributes::default(),
        }
    }

    #[must_use]
    pub fn authentication_failure(error: &AuthenticationError) -> Self {
        Self {
            id: TRANSITION_AUTHENTICATION_FAILURE.to_string(),
            attributes: EventAttributes {
                error: Some(error.to_string()),
                ..EventAttributes::default()
            },
        }
    }

    #[must_use]
    pub fn error(error: &AuthenticationError) -> Self {
        Self {
            id: TRANSITION_ERROR.to_string(),
            attributes: EventAttributes {
                error: Some(error.to_string()),
                ..EventAttributes::default()
            },
        }
    }

    /// A candidate challenge event naming a multifactor provider.
    #[must_use]
    pub fn for_provider(
        provider_id: impl Into<String>,
        principal: Option<Principal>,
        registered_service: Option<RegisteredService>,
    ) -> Self {
        let provider_id = provider_id.into();
        Self {
            id: provider_id.clone(),
            attributes: EventAttributes {
                principal,
                registered_service,
                provider_id: Some(provider_id),
                error: None,
            },
        }
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[must_use]
    pub fn attributes(&self) -> &EventAttributes {
        &self.attributes
    }

    #[must_use]
    pub fn is_terminal(&self) -> bool {
        is_terminal_id(&self.id)
    }
}

/// Immutable view of the inbound request, for request-driven triggers.
#[derive(Clone, Debug, Default)]
pub struct RequestSnapshot {
    parameters: HashMap<String, String>,
    headers: HashMap<String, String>,
    client_address: Option<String>,
    user_agent: Option<String>,
    geo_location: Option<String>,
}

impl RequestSnapshot {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_parameter(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters.insert(name.into(), value.into());
        self
    }

    /// Header names are normalized to lowercase.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into().to_lowercase(), value.into());
        self
    }

    #[must_use]
    pub fn with_client_address(mut self, address: impl Into<String>) -> Self {
        self.client_address = Some(address.into());
        self
    }

    #[must_use]
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    #[must_use]
    pub fn with_geo_location(mut self, location: impl Into<String>) -> Self {
        self.geo_location = Some(location.into());
        self
    }

    #[must_use]
    pub fn parameter(&self, name: &str) -> Option<&str> {
        self.parameters.get(name).map(String::as_str)
    }

    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_lowercase()).map(String::as_str)
    }

    #[must_use]
    pub fn client_address(&self) -> Option<&str> {
        self.client_address.as_deref()
    }

    #[must_use]
    pub fn user_agent(&self) -> Option<&str> {
        self.user_agent.as_deref()
    }

    #[must_use]
    pub fn geo_location(&self) -> Option<&str> {
        self.geo_location.as_deref()
    }
}

/// Mutable per-request pipeline state. One request, one thread, one context;
/// nothing else mutates it concurrently.
#[derive(Clone, Debug, Default)]
pub struct FlowContext {
    request: RequestSnapshot,
    credential: Option<Credential>,
    service: Option<Service>,
    registered_service: Option<RegisteredService>,
    authentication: Option<Authentication>,
    result_builder: Option<AuthenticationResultBuilder>,
    ticket_granting_ticket_id: Option<String>,
    transitions: HashSet<String>,
    resolved_events: Vec<Event>,
    response_status: Option<u16>,
}

impl FlowContext {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_request(mut self, request: RequestSnapshot) -> Self {
        self.request = request;
        self
    }

    #[must_use]
    pub fn with_credential(mut self, credential: Credential) -> Self {
        self.credential = Some(credential);
        self
    }

    #[must_use]
    pub fn with_service(mut self, service: Service) -> Self {
        self.service = Some(service);
        self
    }

    #[must_use]
    pub fn with_ticket_granting_ticket(mut self, tgt_id: impl Into<String>) -> Self {
        self.ticket_granting_ticket_id = Some(tgt_id.into());
        self
    }

    /// Declare a transition id the surrounding flow definition registers.
    #[must_use]
    pub fn with_transition(mut self, id: impl Into<String>) -> Self {
        self.transitions.insert(id.into());
        self
    }

    /// Terminal protocol outcomes are always registered; provider
    /// transitions must be declared by the flow definition.
    #[must_use]
    pub fn has_transition(&self, id: &str) -> bool {
        is_terminal_id(id) || self.transitions.contains(id)
    }

    /// Validate that the flow can take the event's transition.
    ///
    /// # Errors
    /// Returns [`AuthenticationError::MissingTransition`] — a configuration
    /// error, not a silent fallback — when no matching transition exists.
    pub fn require_transition(&self, event: Event) -> Result<Event, AuthenticationError> {
        if self.has_transition(event.id()) {
            Ok(event)
        } else {
            Err(AuthenticationError::MissingTransition {
                event: event.id().to_string(),
            })
        }
    }

    #[must_use]
    pub fn request(&self) -> &RequestSnapshot {
        &self.request
    }

    #[must_use]
    pub fn credential(&self) -> Option<&Credential> {
        self.credential.as_ref()
    }

    #[must_use]
    pub fn service(&self) -> Option<&Service> {
        self.service.as_ref()
    }

    #[must_use]
    pub fn registered_service(&self) -> Option<&RegisteredService> {
        self.registered_service.as_ref()
    }

    pub fn set_registered_service(&mut self, registered: RegisteredService) {
        self.registered_service = Some(registered);
    }

    #[must_use]
    pub fn authentication(&self) -> Option<&Authentication> {
        self.authentication.as_ref()
    }

    pub fn set_authentication(&mut self, authentication: Authentication) {
        self.authentication = Some(authentication);
    }

    #[must_use]
    pub fn principal(&self) -> Option<&Principal> {
        self.authentication.as_ref().map(Authentication::principal)
    }

    #[must_use]
    pub fn result_builder(&self) -> Option<&AuthenticationResultBuilder> {
        self.result_builder.as_ref()
    }

    pub fn set_result_builder(&mut self, builder: AuthenticationResultBuilder) {
        self.result_builder = Some(builder);
    }

    #[must_use]
    pub fn ticket_granting_ticket_id(&self) -> Option<&str> {
        self.ticket_granting_ticket_id.as_deref()
    }

    /// Candidate events collected so far, kept for diagnostics.
    #[must_use]
    pub fn resolved_events(&self) -> &[Event] {
        &self.resolved_events
    }

    pub fn set_resolved_events(&mut self, events: Vec<Event>) {
        self.resolved_events = events;
    }

    #[must_use]
    pub fn response_status(&self) -> Option<u16> {
        self.response_status
    }

    pub fn set_response_status(&mut self, status: u16) {
        self.response_status = Some(status);
    }
}
