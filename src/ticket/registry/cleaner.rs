//! Background sweep of expired tickets.
//!
//! Flow Overview:
//! 1) On each run, the cleaner snapshots the enumerable ticket stream and
//!    filters to expired entries.
//! 2) Each deletion happens under a per-ticket named lock so a request
//!    thread cannot validate a ticket the cleaner is tearing down.
//! 3) Session tickets fire single-logout and ticket-destroyed lifecycle
//!    notifications before and after their cascading delete.
//!
//! A cleaner run never propagates an error to the scheduler: failures are
//! logged and reported as zero progress.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep};
use tracing::{debug, error, info};

use crate::config::TicketingConfig;
use crate::ticket::{Ticket, TicketError, TicketGrantingTicket};

use super::TicketRegistry;

/// Observer of ticket lifecycle notifications published during cleanup.
pub trait LifecycleEventSink: Send + Sync {
    /// A session is about to be destroyed; relying services should be told
    /// to log the user out.
    fn single_logout(&self, ticket: &TicketGrantingTicket);

    /// A session and its cascade were removed.
    fn ticket_destroyed(&self, ticket_id: &str);
}

/// Default sink: structured log records only.
#[derive(Clone, Debug, Default)]
pub struct TracingEventSink;

impl LifecycleEventSink for TracingEventSink {
    fn single_logout(&self, ticket: &TicketGrantingTicket) {
        info!(
            ticket_id = %ticket.id(),
            principal = %ticket.authentication().principal().id(),
            services = ticket.services().len(),
            "single logout for expiring session"
        );
    }

    fn ticket_destroyed(&self, ticket_id: &str) {
        info!(ticket_id = %ticket_id, "ticket destroyed");
    }
}

/// Recording sink for tests and audit pipelines.
#[derive(Clone, Debug, Default)]
pub struct RecordingEventSink {
    events: Arc<std::sync::Mutex<Vec<String>>>,
}

impl RecordingEventSink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn events(&self) -> Vec<String> {
        self.events.lock().map(|events| events.clone()).unwrap_or_default()
    }
}

impl LifecycleEventSink for RecordingEventSink {
    fn single_logout(&self, ticket: &TicketGrantingTicket) {
        if let Ok(mut events) = self.events.lock() {
            events.push(format!("single-logout:{}", ticket.id()));
        }
    }

    fn ticket_destroyed(&self, ticket_id: &str) {
        if let Ok(mut events) = self.events.lock() {
            events.push(format!("destroyed:{ticket_id}"));
        }
    }
}

/// Named locks keyed by ticket id, serializing cleanup against concurrent
/// validation of the same ticket.
#[derive(Clone, Default)]
pub struct InMemoryLockRegistry {
    locks: Arc<Mutex<HashMap<String, Arc<Mutex<()>>>>>,
}

impl InMemoryLockRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the lock for a ticket id, creating it on first use. Idle
    /// entries are pruned on the way in.
    pub async fn acquire(&self, key: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().await;
            locks.retain(|_, entry| Arc::strong_count(entry) > 1);
            Arc::clone(locks.entry(key.to_string()).or_default())
        };
        lock.lock_owned().await
    }
}

/// One sweep over the registry; returns the number of tickets removed.
#[async_trait]
pub trait TicketRegistryCleaner: Send + Sync {
    async fn clean(&self) -> usize;
}

/// Cleaner for deployments where reaping is handled elsewhere (e.g. by the
/// backing store's own eviction). Injected explicitly where needed.
#[derive(Clone, Debug, Default)]
pub struct NoOpTicketRegistryCleaner;

#[async_trait]
impl TicketRegistryCleaner for NoOpTicketRegistryCleaner {
    async fn clean(&self) -> usize {
        debug!("no-op ticket registry cleaner invoked");
        0
    }
}

/// Default cleaner: scans, locks per ticket, publishes lifecycle events for
/// sessions, and deletes through the registry's cascading delete.
pub struct DefaultTicketRegistryCleaner {
    registry: Arc<dyn TicketRegistry>,
    locks: InMemoryLockRegistry,
    events: Arc<dyn LifecycleEventSink>,
}

impl DefaultTicketRegistryCleaner {
    #[must_use]
    pub fn new(registry: Arc<dyn TicketRegistry>, events: Arc<dyn LifecycleEventSink>) -> Self {
        Self {
            registry,
            locks: InMemoryLockRegistry::new(),
            events,
        }
    }

    async fn sweep(&self) -> Result<usize, TicketError> {
        let expired: Vec<Ticket> = self
            .registry
            .fetch_all()
            .await?
            .into_iter()
            .filter(Ticket::is_expired)
            .collect();
        debug!("found {} expired tickets to clean", expired.len());

        let mut removed = 0;
        for ticket in expired {
            let _guard = self.locks.acquire(ticket.id()).await;
            let session = match &ticket {
                Ticket::TicketGranting(tgt) => {
                    self.events.single_logout(tgt);
                    true
                }
                Ticket::Service(_) | Ticket::ProxyGranting(_) => false,
            };
            let count = self.registry.delete_ticket(ticket.id()).await?;
            if session && count > 0 {
                self.events.ticket_destroyed(ticket.id());
            }
            removed += count;
        }
        Ok(removed)
    }
}

#[async_trait]
impl TicketRegistryCleaner for DefaultTicketRegistryCleaner {
    async fn clean(&self) -> usize {
        if !self.registry.supports_enumeration() {
            info!("ticket registry does not support enumeration; nothing to clean");
            return 0;
        }
        match self.sweep().await {
            Ok(removed) => {
                if removed > 0 {
                    info!("cleaned {removed} expired tickets");
                }
                removed
            }
            Err(err) => {
                error!("ticket cleanup failed: {err}");
                0
            }
        }
    }
}

/// Schedule a cleaner on the runtime, honoring the configured start delay
/// and repeat interval. Returns `None` when cleaning is disabled.
pub fn spawn_cleaner(
    cleaner: Arc<dyn TicketRegistryCleaner>,
    config: &TicketingConfig,
) -> Option<JoinHandle<()>> {
    if !config.cleaner_enabled() {
        info!("ticket registry cleaner is disabled; no cleaner task scheduled");
        return None;
    }
    let start_delay = config.cleaner_start_delay();
    let period = config.cleaner_interval();
    info!(
        "scheduling ticket cleanup every {}s after a {}s delay",
        period.as_secs(),
        start_delay.as_secs()
    );
    Some(tokio::spawn(async move {
        sleep(start_delay).await;
        let mut ticker = interval(period);
        loop {
            ticker.tick().await;
            let removed = cleaner.clean().await;
            debug!("scheduled cleanup removed {removed} tickets");
        }
    }))
}
