//! Ticket registry: lifecycle, storage and encoding of security tickets.
//!
//! Flow Overview:
//! 1) Minted tickets are added under their id; when a cipher is configured
//!    the registry transparently encodes on write and decodes on read, and
//!    the stored key becomes a digest of the plaintext id.
//! 2) Reads reap lazily: an expired ticket is deleted on access (with its
//!    cascade) and reported as absent.
//! 3) Deleting a ticket-granting ticket cascades over every service ticket
//!    and proxy-granting ticket it owns; the returned count includes the
//!    whole cascade.
//!
//! Backends implement only the storage primitives ([`TicketRegistry::store`],
//! [`TicketRegistry::fetch`], [`TicketRegistry::remove`],
//! [`TicketRegistry::fetch_all`], [`TicketRegistry::clear`]); the contract
//! semantics above are provided on top of them and shared by every store.

pub mod cipher;
pub mod cleaner;

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, trace, warn};

use crate::authn::Authentication;
use crate::ticket::{
    PROXY_GRANTING_TICKET_PREFIX, ProxyGrantingTicket, SERVICE_TICKET_PREFIX, ServiceTicket,
    TICKET_GRANTING_TICKET_PREFIX, Ticket, TicketError, TicketGrantingTicket,
};

pub use cipher::{EncodedTicket, TicketCipher};
pub use cleaner::{
    DefaultTicketRegistryCleaner, InMemoryLockRegistry, LifecycleEventSink,
    NoOpTicketRegistryCleaner, RecordingEventSink, TicketRegistryCleaner, TracingEventSink,
    spawn_cleaner,
};

/// Sentinel returned by count operations when the backing store does not
/// support enumeration.
pub const TICKET_COUNT_UNKNOWN: i64 = i64::MIN;

/// Storage contract plus the shared lifecycle semantics every backend gets
/// for free: lazy expiry, cascading deletion, typed retrieval and counts.
#[async_trait]
pub trait TicketRegistry: Send + Sync {
    /// Storage primitive: insert or overwrite under the ticket's id.
    async fn store(&self, ticket: Ticket) -> Result<(), TicketError>;

    /// Storage primitive: read back a ticket without expiry side effects.
    async fn fetch(&self, id: &str) -> Result<Option<Ticket>, TicketError>;

    /// Storage primitive: remove one entry; `true` when something was there.
    async fn remove(&self, id: &str) -> Result<bool, TicketError>;

    /// Storage primitive: snapshot of every stored ticket. Backends that
    /// cannot enumerate return an empty snapshot and report
    /// `supports_enumeration() == false`.
    async fn fetch_all(&self) -> Result<Vec<Ticket>, TicketError>;

    /// Storage primitive: drop everything, returning the prior size.
    async fn clear(&self) -> Result<usize, TicketError>;

    /// Whether [`TicketRegistry::fetch_all`] yields the full store.
    fn supports_enumeration(&self) -> bool;

    async fn add_ticket(&self, ticket: Ticket) -> Result<(), TicketError> {
        trace!(ticket_id = %ticket.id(), prefix = %ticket.prefix(), "adding ticket");
        self.store(ticket).await
    }

    /// Re-persist mutated ticket state. Mandatory after mutating a session's
    /// child-tracking maps, even for stores where objects appear live.
    async fn update_ticket(&self, ticket: Ticket) -> Result<(), TicketError> {
        trace!(ticket_id = %ticket.id(), "updating ticket");
        self.store(ticket).await
    }

    /// Fetch a live ticket; an expired one is deleted (with its cascade) as
    /// a side effect and reported as absent.
    async fn get_ticket(&self, id: &str) -> Result<Option<Ticket>, TicketError> {
        let Some(ticket) = self.fetch(id).await? else {
            return Ok(None);
        };
        if ticket.is_expired() {
            debug!(ticket_id = %id, "removing expired ticket on access");
            self.delete_ticket(id).await?;
            return Ok(None);
        }
        Ok(Some(ticket))
    }

    /// Typed retrieval of a session ticket.
    ///
    /// # Errors
    /// Returns [`TicketError::UnexpectedKind`] when the stored ticket is of
    /// a different kind; this is a programmer error and intentionally loud.
    async fn ticket_granting_ticket(
        &self,
        id: &str,
    ) -> Result<Option<TicketGrantingTicket>, TicketError> {
        match self.get_ticket(id).await? {
            None => Ok(None),
            Some(Ticket::TicketGranting(ticket)) => Ok(Some(ticket)),
            Some(other) => Err(TicketError::UnexpectedKind {
                id: id.to_string(),
                expected: TICKET_GRANTING_TICKET_PREFIX,
                actual: other.prefix(),
            }),
        }
    }

    /// Typed retrieval of a service ticket; loud on kind mismatch.
    async fn service_ticket(&self, id: &str) -> Result<Option<ServiceTicket>, TicketError> {
        match self.get_ticket(id).await? {
            None => Ok(None),
            Some(Ticket::Service(ticket)) => Ok(Some(ticket)),
            Some(other) => Err(TicketError::UnexpectedKind {
                id: id.to_string(),
                expected: SERVICE_TICKET_PREFIX,
                actual: other.prefix(),
            }),
        }
    }

    /// Typed retrieval of a proxy-granting ticket; loud on kind mismatch.
    async fn proxy_granting_ticket(
        &self,
        id: &str,
    ) -> Result<Option<ProxyGrantingTicket>, TicketError> {
        match self.get_ticket(id).await? {
            None => Ok(None),
            Some(Ticket::ProxyGranting(ticket)) => Ok(Some(ticket)),
            Some(other) => Err(TicketError::UnexpectedKind {
                id: id.to_string(),
                expected: PROXY_GRANTING_TICKET_PREFIX,
                actual: other.prefix(),
            }),
        }
    }

    /// Delete a ticket and everything it owns; returns the total removed.
    ///
    /// Deleting a session removes its service tickets, then its
    /// proxy-granting tickets, then itself. Deleting a proxy-granting ticket
    /// unlinks it from the parent session and re-persists the parent.
    async fn delete_ticket(&self, id: &str) -> Result<usize, TicketError> {
        let Some(ticket) = self.fetch(id).await? else {
            return Ok(0);
        };
        let mut removed = 0;
        match ticket {
            Ticket::TicketGranting(tgt) => {
                debug!(ticket_id = %tgt.id(), "removing session and its children");
                for st_id in tgt.service_ticket_ids() {
                    if self.remove(&st_id).await? {
                        removed += 1;
                    } else {
                        debug!(ticket_id = %st_id, "child service ticket already gone");
                    }
                }
                for pgt_id in tgt.proxy_granting_ticket_ids() {
                    if self.remove(&pgt_id).await? {
                        removed += 1;
                    }
                }
                if self.remove(tgt.id()).await? {
                    removed += 1;
                }
            }
            Ticket::ProxyGranting(pgt) => {
                if let Some(Ticket::TicketGranting(mut parent)) =
                    self.fetch(pgt.ticket_granting_ticket_id()).await?
                {
                    if parent.remove_proxy_granting_ticket(pgt.id()) {
                        self.update_ticket(Ticket::TicketGranting(parent)).await?;
                    }
                }
                if self.remove(pgt.id()).await? {
                    removed += 1;
                }
            }
            Ticket::Service(st) => {
                if self.remove(st.id()).await? {
                    removed += 1;
                }
            }
        }
        Ok(removed)
    }

    /// Clear the whole store; returns the prior size.
    async fn delete_all(&self) -> Result<usize, TicketError> {
        self.clear().await
    }

    /// Filtered snapshot of the enumerable view.
    async fn tickets_matching(
        &self,
        predicate: &(dyn for<'a> Fn(&'a Ticket) -> bool + Send + Sync),
    ) -> Result<Vec<Ticket>, TicketError> {
        Ok(self
            .fetch_all()
            .await?
            .into_iter()
            .filter(|ticket| predicate(ticket))
            .collect())
    }

    /// Number of live single sign-on sessions, or
    /// [`TICKET_COUNT_UNKNOWN`] when the store cannot enumerate.
    async fn session_count(&self) -> i64 {
        self.count_matching(&|ticket| {
            matches!(ticket, Ticket::TicketGranting(_)) && !ticket.is_expired()
        })
        .await
    }

    /// Number of live service tickets, or [`TICKET_COUNT_UNKNOWN`].
    async fn service_ticket_count(&self) -> i64 {
        self.count_matching(&|ticket| {
            matches!(ticket, Ticket::Service(_)) && !ticket.is_expired()
        })
        .await
    }

    /// Number of live sessions owned by a principal, or
    /// [`TICKET_COUNT_UNKNOWN`].
    async fn count_sessions_for(&self, principal_id: &str) -> i64 {
        self.count_matching(&|ticket| {
            !ticket.is_expired()
                && ticket
                    .principal_id()
                    .is_some_and(|id| id.eq_ignore_ascii_case(principal_id))
        })
        .await
    }

    #[doc(hidden)]
    async fn count_matching(&self, predicate: &(dyn for<'a> Fn(&'a Ticket) -> bool + Send + Sync)) -> i64 {
        if !self.supports_enumeration() {
            trace!(
                "count operation is not supported by this registry; returning {}",
                TICKET_COUNT_UNKNOWN
            );
            return TICKET_COUNT_UNKNOWN;
        }
        match self.fetch_all().await {
            Ok(tickets) => {
                let count = tickets.iter().filter(|ticket| predicate(ticket)).count();
                i64::try_from(count).unwrap_or(i64::MAX)
            }
            Err(err) => {
                warn!("failed to enumerate tickets for counting: {err}");
                TICKET_COUNT_UNKNOWN
            }
        }
    }
}

enum StoredTicket {
    Plain(Ticket),
    Encoded(EncodedTicket),
}

/// Default registry: a mutex-guarded map, safe for concurrent request
/// threads plus the cleaner task. With a cipher configured, entries are
/// stored encrypted under digest keys.
pub struct InMemoryTicketRegistry {
    tickets: Mutex<HashMap<String, StoredTicket>>,
    cipher: Option<TicketCipher>,
}

impl Default for InMemoryTicketRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryTicketRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self {
            tickets: Mutex::new(HashMap::new()),
            cipher: None,
        }
    }

    #[must_use]
    pub fn with_cipher(mut self, cipher: TicketCipher) -> Self {
        self.cipher = Some(cipher);
        self
    }

    fn storage_key(&self, id: &str) -> String {
        match &self.cipher {
            Some(cipher) => cipher.digest_id(id),
            None => id.to_string(),
        }
    }

    fn decode(&self, stored: &StoredTicket) -> Result<Ticket, TicketError> {
        match stored {
            StoredTicket::Plain(ticket) => Ok(ticket.clone()),
            StoredTicket::Encoded(encoded) => match &self.cipher {
                Some(cipher) => cipher.decode(encoded),
                None => Err(TicketError::Decoding(
                    "encoded ticket found but no cipher is configured".to_string(),
                )),
            },
        }
    }
}

#[async_trait]
impl TicketRegistry for InMemoryTicketRegistry {
    async fn store(&self, ticket: Ticket) -> Result<(), TicketError> {
        let key = self.storage_key(ticket.id());
        let stored = match &self.cipher {
            Some(cipher) => StoredTicket::Encoded(cipher.encode(&ticket)?),
            None => StoredTicket::Plain(ticket),
        };
        self.tickets.lock().await.insert(key, stored);
        Ok(())
    }

    async fn fetch(&self, id: &str) -> Result<Option<Ticket>, TicketError> {
        let key = self.storage_key(id);
        let tickets = self.tickets.lock().await;
        tickets.get(&key).map(|stored| self.decode(stored)).transpose()
    }

    async fn remove(&self, id: &str) -> Result<bool, TicketError> {
        let key = self.storage_key(id);
        Ok(self.tickets.lock().await.remove(&key).is_some())
    }

    async fn fetch_all(&self) -> Result<Vec<Ticket>, TicketError> {
        let tickets = self.tickets.lock().await;
        tickets.values().map(|stored| self.decode(stored)).collect()
    }

    async fn clear(&self) -> Result<usize, TicketError> {
        let mut tickets = self.tickets.lock().await;
        let size = tickets.len();
        tickets.clear();
        Ok(size)
    }

    fn supports_enumeration(&self) -> bool {
        true
    }
}

/// Read-side seam used by the step-up resolver to load the authentication
/// behind an existing session ticket.
#[async_trait]
pub trait TicketRegistrySupport: Send + Sync {
    async fn authentication_from(&self, tgt_id: &str)
        -> Result<Option<Authentication>, TicketError>;
}

/// [`TicketRegistrySupport`] over any [`TicketRegistry`].
#[derive(Clone)]
pub struct RegistryBackedSupport {
    registry: Arc<dyn TicketRegistry>,
}

impl RegistryBackedSupport {
    #[must_use]
    pub fn new(registry: Arc<dyn TicketRegistry>) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl TicketRegistrySupport for RegistryBackedSupport {
    async fn authentication_from(
        &self,
        tgt_id: &str,
    ) -> Result<Option<Authentication>, TicketError> {
        let ticket = self.registry.ticket_granting_ticket(tgt_id).await?;
        Ok(ticket.map(|tgt| tgt.authentication().clone()))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::authn::Principal;
    use crate::service::Service;
    use crate::ticket::ExpirationPolicy;

    fn session(id: &str, principal: &str) -> TicketGrantingTicket {
        TicketGrantingTicket::new(
            id,
            Authentication::new(Principal::new(principal)),
            ExpirationPolicy::NeverExpires,
        )
    }

    fn service(n: u32) -> Service {
        Service::new(format!("https://app{n}.example.org"))
    }

    #[tokio::test]
    async fn add_and_get_round_trip() {
        let registry = InMemoryTicketRegistry::new();
        registry
            .add_ticket(session("TGT-1", "casuser").into())
            .await
            .unwrap();

        let found = registry.get_ticket("TGT-1").await.unwrap().unwrap();
        assert_eq!(found.id(), "TGT-1");
        assert!(registry.get_ticket("TGT-missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn lazy_expiry_reaps_on_access_only() {
        let registry = InMemoryTicketRegistry::new();
        let ticket = TicketGrantingTicket::new(
            "TGT-doomed",
            Authentication::new(Principal::new("casuser")),
            ExpirationPolicy::AlwaysExpires,
        );
        registry.add_ticket(ticket.into()).await.unwrap();

        // Enumeration sees it; keyed access reaps it.
        assert_eq!(registry.fetch_all().await.unwrap().len(), 1);
        assert!(registry.get_ticket("TGT-doomed").await.unwrap().is_none());
        assert!(registry.fetch_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn deleting_a_session_cascades_and_counts() {
        let registry = InMemoryTicketRegistry::new();
        let mut tgt = session("TGT-1", "casuser");

        for n in 0..3 {
            let st = tgt
                .grant_service_ticket(
                    format!("ST-{n}"),
                    service(n),
                    ExpirationPolicy::NeverExpires,
                    false,
                )
                .unwrap();
            registry.add_ticket(st.into()).await.unwrap();
        }
        let pgt = ProxyGrantingTicket::new(
            "PGT-1",
            "TGT-1",
            service(0),
            ExpirationPolicy::NeverExpires,
        );
        tgt.register_proxy_granting_ticket(&pgt);
        registry.add_ticket(pgt.into()).await.unwrap();
        registry.add_ticket(tgt.into()).await.unwrap();

        let removed = registry.delete_ticket("TGT-1").await.unwrap();
        assert_eq!(removed, 5);
        for id in ["TGT-1", "ST-0", "ST-1", "ST-2", "PGT-1"] {
            assert!(registry.get_ticket(id).await.unwrap().is_none());
        }
        assert_eq!(registry.delete_ticket("TGT-1").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn deleting_a_proxy_granting_ticket_unlinks_the_parent() {
        let registry = InMemoryTicketRegistry::new();
        let mut tgt = session("TGT-1", "casuser");
        let pgt = ProxyGrantingTicket::new(
            "PGT-1",
            "TGT-1",
            service(0),
            ExpirationPolicy::NeverExpires,
        );
        tgt.register_proxy_granting_ticket(&pgt);
        registry.add_ticket(pgt.into()).await.unwrap();
        registry.add_ticket(tgt.into()).await.unwrap();

        assert_eq!(registry.delete_ticket("PGT-1").await.unwrap(), 1);
        let parent = registry
            .ticket_granting_ticket("TGT-1")
            .await
            .unwrap()
            .unwrap();
        assert!(parent.proxy_granting_ticket_ids().is_empty());
    }

    #[tokio::test]
    async fn typed_retrieval_is_loud_on_kind_mismatch() {
        let registry = InMemoryTicketRegistry::new();
        registry
            .add_ticket(session("TGT-1", "casuser").into())
            .await
            .unwrap();

        let err = registry.service_ticket("TGT-1").await.unwrap_err();
        assert!(matches!(
            err,
            TicketError::UnexpectedKind {
                expected: "ST",
                actual: "TGT",
                ..
            }
        ));
        assert!(registry.service_ticket("ST-absent").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn delete_all_reports_prior_size() {
        let registry = InMemoryTicketRegistry::new();
        registry
            .add_ticket(session("TGT-1", "a").into())
            .await
            .unwrap();
        registry
            .add_ticket(session("TGT-2", "b").into())
            .await
            .unwrap();
        assert_eq!(registry.delete_all().await.unwrap(), 2);
        assert_eq!(registry.delete_all().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn counts_cover_sessions_and_service_tickets() {
        let registry = InMemoryTicketRegistry::new();
        let mut tgt = session("TGT-1", "casuser");
        let st = tgt
            .grant_service_ticket("ST-1", service(1), ExpirationPolicy::NeverExpires, false)
            .unwrap();
        registry.add_ticket(tgt.into()).await.unwrap();
        registry.add_ticket(st.into()).await.unwrap();
        registry
            .add_ticket(session("TGT-2", "other").into())
            .await
            .unwrap();

        assert_eq!(registry.session_count().await, 2);
        assert_eq!(registry.service_ticket_count().await, 1);
        assert_eq!(registry.count_sessions_for("CASUSER").await, 1);
        assert_eq!(registry.count_sessions_for("nobody").await, 0);

        let sessions = registry
            .tickets_matching(&|ticket| matches!(ticket, Ticket::TicketGranting(_)))
            .await
            .unwrap();
        assert_eq!(sessions.len(), 2);
    }

    #[tokio::test]
    async fn encoded_store_resolves_plaintext_ids() {
        let registry =
            InMemoryTicketRegistry::new().with_cipher(TicketCipher::new([42u8; 32]));
        let original = session("TGT-secret", "casuser");
        registry.add_ticket(original.clone().into()).await.unwrap();

        // The map key is a digest, never the plaintext id.
        {
            let stored = registry.tickets.lock().await;
            assert!(!stored.contains_key("TGT-secret"));
            assert_eq!(stored.len(), 1);
        }

        let found = registry
            .ticket_granting_ticket("TGT-secret")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found, original);

        assert_eq!(registry.delete_ticket("TGT-secret").await.unwrap(), 1);
        assert!(registry.get_ticket("TGT-secret").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn encoded_cascade_still_deletes_children() {
        let registry =
            InMemoryTicketRegistry::new().with_cipher(TicketCipher::new([42u8; 32]));
        let mut tgt = session("TGT-1", "casuser");
        let st = tgt
            .grant_service_ticket("ST-1", service(1), ExpirationPolicy::NeverExpires, false)
            .unwrap();
        registry.add_ticket(st.into()).await.unwrap();
        registry.add_ticket(tgt.into()).await.unwrap();

        assert_eq!(registry.delete_ticket("TGT-1").await.unwrap(), 2);
        assert!(registry.get_ticket("ST-1").await.unwrap().is_none());
    }

    struct NonEnumerableRegistry;

    #[async_trait]
    impl TicketRegistry for NonEnumerableRegistry {
        async fn store(&self, _ticket: Ticket) -> Result<(), TicketError> {
            Ok(())
        }
        async fn fetch(&self, _id: &str) -> Result<Option<Ticket>, TicketError> {
            Ok(None)
        }
        async fn remove(&self, _id: &str) -> Result<bool, TicketError> {
            Ok(false)
        }
        async fn fetch_all(&self) -> Result<Vec<Ticket>, TicketError> {
            Ok(Vec::new())
        }
        async fn clear(&self) -> Result<usize, TicketError> {
            Ok(0)
        }
        fn supports_enumeration(&self) -> bool {
            false
        }
    }

    #[tokio::test]
    async fn non_enumerable_counts_return_the_unknown_sentinel() {
        let registry = NonEnumerableRegistry;
        assert_eq!(registry.session_count().await, TICKET_COUNT_UNKNOWN);
        assert_eq!(registry.service_ticket_count().await, TICKET_COUNT_UNKNOWN);
        assert_eq!(
            registry.count_sessions_for("casuser").await,
            TICKET_COUNT_UNKNOWN
        );
    }

    #[tokio::test]
    async fn registry_support_loads_session_authentication() {
        let registry = Arc::new(InMemoryTicketRegistry::new());
        registry
            .add_ticket(session("TGT-1", "casuser").into())
            .await
            .unwrap();

        let support = RegistryBackedSupport::new(registry);
        let authentication = support.authentication_from("TGT-1").await.unwrap().unwrap();
        assert_eq!(authentication.principal().id(), "casuser");
        assert!(support.authentication_from("TGT-2").await.unwrap().is_none());
    }
}
