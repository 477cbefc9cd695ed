//! Security ticket model.
//!
//! Flow Overview:
//! 1) A successful primary authentication mints a ticket-granting ticket
//!    (TGT) representing the single sign-on session.
//! 2) The TGT grants one service ticket (ST) per relying service; each ST is
//!    consumed exactly once under normal protocol semantics.
//! 3) A validated ST may spawn a proxy-granting ticket (PGT), registered
//!    back into the owning TGT so deletion cascades.
//!
//! Invariants:
//! - An expired ticket is never treated as valid by any protocol operation;
//!   it is reaped lazily on access or by the background cleaner.
//! - Deleting a TGT deletes every ST and PGT it transitively owns.

pub mod expiration;
pub mod factory;
pub mod id;
pub mod registry;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::SystemTime;
use thiserror::Error;

use crate::authn::Authentication;
use crate::service::Service;

pub use expiration::ExpirationPolicy;
pub use factory::TicketFactory;
pub use id::{RandomTicketIdGenerator, TicketIdGenerator};

/// Id prefix of ticket-granting tickets.
pub const TICKET_GRANTING_TICKET_PREFIX: &str = "TGT";
/// Id prefix of service tickets.
pub const SERVICE_TICKET_PREFIX: &str = "ST";
/// Id prefix of proxy-granting tickets.
pub const PROXY_GRANTING_TICKET_PREFIX: &str = "PGT";

/// Ticket domain errors.
///
/// [`TicketError::UnexpectedKind`] signals a programmer error (a typed
/// lookup for the wrong ticket kind) and is meant to propagate, not to be
/// matched on and recovered.
#[derive(Debug, Error)]
pub enum TicketError {
    #[error("ticket [{id}] is a [{actual}] where a [{expected}] was expected")]
    UnexpectedKind {
        id: String,
        expected: &'static str,
        actual: &'static str,
    },
    #[error("ticket [{0}] was not found")]
    NotFound(String),
    #[error("ticket [{id}] has expired")]
    Expired { id: String },
    #[error("ticket encoding failed: {0}")]
    Encoding(String),
    #[error("ticket decoding failed: {0}")]
    Decoding(String),
}

/// State shared by every ticket kind: identity, usage counters and the
/// expiration policy that interprets them.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketState {
    id: String,
    created_at: SystemTime,
    last_used_at: SystemTime,
    use_count: u64,
    revoked: bool,
    expiration: ExpirationPolicy,
}

impl TicketState {
    #[must_use]
    pub fn new(id: impl Into<String>, expiration: ExpirationPolicy) -> Self {
        let now = SystemTime::now();
        Self {
            id: id.into(),
            created_at: now,
            last_used_at: now,
            use_count: 0,
            revoked: false,
            expiration,
        }
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[must_use]
    pub fn created_at(&self) -> SystemTime {
        self.created_at
    }

    #[must_use]
    pub fn last_used_at(&self) -> SystemTime {
        self.last_used_at
    }

    #[must_use]
    pub fn use_count(&self) -> u64 {
        self.use_count
    }

    #[must_use]
    pub fn expiration(&self) -> &ExpirationPolicy {
        &self.expiration
    }

    /// Expired when explicitly revoked or when the policy says so.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.revoked || self.expiration.is_expired(self)
    }

    pub fn record_use(&mut self) {
        self.use_count += 1;
        self.last_used_at = SystemTime::now();
    }

    /// Force expiry regardless of policy (logout, revocation).
    pub fn revoke(&mut self) {
        self.revoked = true;
    }
}

/// The single sign-on session ticket. Owns the established authentication
/// and tracks every child ticket it granted.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketGrantingTicket {
    state: TicketState,
    authentication: Authentication,
    /// service id -> service ticket id
    services: HashMap<String, String>,
    /// proxy-granting ticket id -> service id
    proxy_granting_tickets: HashMap<String, String>,
}

impl TicketGrantingTicket {
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        authentication: Authentication,
        expiration: ExpirationPolicy,
    ) -> Self {
        Self {
            state: TicketState::new(id, expiration),
            authentication,
            services: HashMap::new(),
            proxy_granting_tickets: HashMap::new(),
        }
    }

    #[must_use]
    pub fn id(&self) -> &str {
        self.state.id()
    }

    #[must_use]
    pub fn state(&self) -> &TicketState {
        &self.state
    }

    #[must_use]
    pub fn authentication(&self) -> &Authentication {
        &self.authentication
    }

    pub fn authentication_mut(&mut self) -> &mut Authentication {
        &mut self.authentication
    }

    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.state.is_expired()
    }

    /// Force the session to expire (logout/revocation).
    pub fn mark_expired(&mut self) {
        self.state.revoke();
    }

    /// Grant a service ticket for the given service and track it.
    ///
    /// # Errors
    /// Returns [`TicketError::Expired`] if this ticket is no longer valid.
    pub fn grant_service_ticket(
        &mut self,
        st_id: impl Into<String>,
        service: Service,
        expiration: ExpirationPolicy,
        from_new_login: bool,
    ) -> Result<ServiceTicket, TicketError> {
        if self.is_expired() {
            return Err(TicketError::Expired {
                id: self.id().to_string(),
            });
        }
        let st_id = st_id.into();
        self.services
            .insert(service.id().to_string(), st_id.clone());
        self.state.record_use();
        Ok(ServiceTicket {
            state: TicketState::new(st_id, expiration),
            ticket_granting_ticket_id: self.id().to_string(),
            service,
            from_new_login,
            validated: false,
        })
    }

    /// Register a proxy-granting ticket into this session's tracking map.
    pub fn register_proxy_granting_ticket(&mut self, pgt: &ProxyGrantingTicket) {
        self.proxy_granting_tickets
            .insert(pgt.id().to_string(), pgt.service().id().to_string());
    }

    /// Drop the parent-side reference to a proxy-granting ticket.
    pub fn remove_proxy_granting_ticket(&mut self, pgt_id: &str) -> bool {
        self.proxy_granting_tickets.remove(pgt_id).is_some()
    }

    /// service id -> service ticket id
    #[must_use]
    pub fn services(&self) -> &HashMap<String, String> {
        &self.services
    }

    #[must_use]
    pub fn service_ticket_ids(&self) -> Vec<String> {
        self.services.values().cloned().collect()
    }

    #[must_use]
    pub fn proxy_granting_ticket_ids(&self) -> Vec<String> {
        self.proxy_granting_tickets.keys().cloned().collect()
    }
}

/// A single-use credential granting access to one relying service.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceTicket {
    state: TicketState,
    ticket_granting_ticket_id: String,
    service: Service,
    from_new_login: bool,
    validated: bool,
}

impl ServiceTicket {
    #[must_use]
    pub fn id(&self) -> &str {
        self.state.id()
    }

    #[must_use]
    pub fn state(&self) -> &TicketState {
        &self.state
    }

    #[must_use]
    pub fn ticket_granting_ticket_id(&self) -> &str {
        &self.ticket_granting_ticket_id
    }

    #[must_use]
    pub fn service(&self) -> &Service {
        &self.service
    }

    #[must_use]
    pub fn from_new_login(&self) -> bool {
        self.from_new_login
    }

    #[must_use]
    pub fn validated(&self) -> bool {
        self.validated
    }

    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.state.is_expired()
    }

    /// Consume the ticket during protocol validation.
    ///
    /// # Errors
    /// Returns [`TicketError::Expired`] if the ticket is already expired or
    /// was consumed before.
    pub fn validate(&mut self) -> Result<(), TicketError> {
        if self.is_expired() || self.validated {
            return Err(TicketError::Expired {
                id: self.id().to_string(),
            });
        }
        self.state.record_use();
        self.validated = true;
        Ok(())
    }
}

/// Permits a validated service to authenticate on the user's behalf to
/// further back-end services. Owned by its parent TGT for cascade deletion.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyGrantingTicket {
    state: TicketState,
    ticket_granting_ticket_id: String,
    service: Service,
}

impl ProxyGrantingTicket {
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        ticket_granting_ticket_id: impl Into<String>,
        service: Service,
        expiration: ExpirationPolicy,
    ) -> Self {
        Self {
            state: TicketState::new(id, expiration),
            ticket_granting_ticket_id: ticket_granting_ticket_id.into(),
            service,
        }
    }

    #[must_use]
    pub fn id(&self) -> &str {
        self.state.id()
    }

    #[must_use]
    pub fn state(&self) -> &TicketState {
        &self.state
    }

    #[must_use]
    pub fn ticket_granting_ticket_id(&self) -> &str {
        &self.ticket_granting_ticket_id
    }

    #[must_use]
    pub fn service(&self) -> &Service {
        &self.service
    }

    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.state.is_expired()
    }
}

/// Any concrete ticket, as stored and returned by the registry.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Ticket {
    TicketGranting(TicketGrantingTicket),
    Service(ServiceTicket),
    ProxyGranting(ProxyGrantingTicket),
}

impl Ticket {
    #[must_use]
    pub fn id(&self) -> &str {
        match self {
            Self::TicketGranting(tgt) => tgt.id(),
            Self::Service(st) => st.id(),
            Self::ProxyGranting(pgt) => pgt.id(),
        }
    }

    /// The id prefix acting as the ticket's type tag.
    #[must_use]
    pub fn prefix(&self) -> &'static str {
        match self {
            Self::TicketGranting(_) => TICKET_GRANTING_TICKET_PREFIX,
            Self::Service(_) => SERVICE_TICKET_PREFIX,
            Self::ProxyGranting(_) => PROXY_GRANTING_TICKET_PREFIX,
        }
    }

    #[must_use]
    pub fn is_expired(&self) -> bool {
        match self {
            Self::TicketGranting(tgt) => tgt.is_expired(),
            Self::Service(st) => st.is_expired(),
            Self::ProxyGranting(pgt) => pgt.is_expired(),
        }
    }

    /// The owning principal, for session accounting.
    #[must_use]
    pub fn principal_id(&self) -> Option<&str> {
        match self {
            Self::TicketGranting(tgt) => Some(tgt.authentication().principal().id()),
            Self::Service(_) | Self::ProxyGranting(_) => None,
        }
    }
}

impl From<TicketGrantingTicket> for Ticket {
    fn from(ticket: TicketGrantingTicket) -> Self {
        Self::TicketGranting(ticket)
    }
}

impl From<ServiceTicket> for Ticket {
    fn from(ticket: ServiceTicket) -> Self {
        Self::Service(ticket)
    }
}

impl From<ProxyGrantingTicket> for Ticket {
    fn from(ticket: ProxyGrantingTicket) -> Self {
        Self::ProxyGranting(ticket)
    }
}
