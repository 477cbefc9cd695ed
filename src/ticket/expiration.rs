//! Expiration policies deciding ticket validity from creation time, usage
//! counters and elapsed time.

use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime};

use super::TicketState;

/// A pure predicate over a ticket's mutable state.
///
/// Policies are carried inside the ticket so encoded tickets round-trip them
/// losslessly.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExpirationPolicy {
    /// Valid until explicitly revoked.
    NeverExpires,
    /// Expired from the moment of creation (eager-reap support).
    AlwaysExpires,
    /// Expires a fixed interval after creation.
    HardTimeout { ttl: Duration },
    /// Expires after an idle interval since last use.
    SlidingWindow { idle: Duration },
    /// Expires once the use count reaches the limit.
    MultiUse { max_uses: u64 },
    /// Expires after the limit of uses or the interval since creation,
    /// whichever comes first (service-ticket semantics).
    TimeToKill { ttl: Duration, max_uses: u64 },
    /// Expires on hard lifetime since creation or idle interval since last
    /// use, whichever comes first (session-ticket semantics).
    SessionLifetime { ttl: Duration, idle: Duration },
}

impl ExpirationPolicy {
    #[must_use]
    pub fn is_expired(&self, state: &TicketState) -> bool {
        match self {
            Self::NeverExpires => false,
            Self::AlwaysExpires => true,
            Self::HardTimeout { ttl } => age_of(state.created_at()) > *ttl,
            Self::SlidingWindow { idle } => age_of(state.last_used_at()) > *idle,
            Self::MultiUse { max_uses } => state.use_count() >= *max_uses,
            Self::TimeToKill { ttl, max_uses } => {
                state.use_count() >= *max_uses || age_of(state.created_at()) > *ttl
            }
            Self::SessionLifetime { ttl, idle } => {
                age_of(state.created_at()) > *ttl || age_of(state.last_used_at()) > *idle
            }
        }
    }
}

fn age_of(instant: SystemTime) -> Duration {
    SystemTime::now()
        .duration_since(instant)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(policy: ExpirationPolicy) -> TicketState {
        TicketState::new("TGT-1", policy)
    }

    #[test]
    fn never_and_always() {
        assert!(!state(ExpirationPolicy::NeverExpires).is_expired());
        assert!(state(ExpirationPolicy::AlwaysExpires).is_expired());
    }

    #[test]
    fn hard_timeout_respects_ttl() {
        let fresh = state(ExpirationPolicy::HardTimeout {
            ttl: Duration::from_secs(3600),
        });
        assert!(!fresh.is_expired());

        let immediate = state(ExpirationPolicy::HardTimeout {
            ttl: Duration::ZERO,
        });
        std::thread::sleep(Duration::from_millis(5));
        assert!(immediate.is_expired());
    }

    #[test]
    fn multi_use_counts_validations() {
        let mut state = state(ExpirationPolicy::MultiUse { max_uses: 1 });
        assert!(!state.is_expired());
        state.record_use();
        assert!(state.is_expired());
    }

    #[test]
    fn time_to_kill_expires_on_either_limit() {
        let mut by_use = state(ExpirationPolicy::TimeToKill {
            ttl: Duration::from_secs(3600),
            max_uses: 1,
        });
        by_use.record_use();
        assert!(by_use.is_expired());

        let by_time = state(ExpirationPolicy::TimeToKill {
            ttl: Duration::ZERO,
            max_uses: 10,
        });
        std::thread::sleep(Duration::from_millis(5));
        assert!(by_time.is_expired());
    }

    #[test]
    fn sliding_window_tracks_last_use() {
        let mut state = state(ExpirationPolicy::SlidingWindow {
            idle: Duration::from_millis(50),
        });
        std::thread::sleep(Duration::from_millis(20));
        state.record_use();
        assert!(!state.is_expired());
        std::thread::sleep(Duration::from_millis(80));
        assert!(state.is_expired());
    }

    #[test]
    fn session_lifetime_expires_on_either_window() {
        let hard_limit = state(ExpirationPolicy::SessionLifetime {
            ttl: Duration::ZERO,
            idle: Duration::from_secs(3600),
        });
        std::thread::sleep(Duration::from_millis(5));
        assert!(hard_limit.is_expired());

        let mut idle_limit = state(ExpirationPolicy::SessionLifetime {
            ttl: Duration::from_secs(3600),
            idle: Duration::from_millis(40),
        });
        idle_limit.record_use();
        assert!(!idle_limit.is_expired());
        std::thread::sleep(Duration::from_millis(80));
        assert!(idle_limit.is_expired());
    }

    #[test]
    fn revocation_overrides_policy() {
        let mut state = state(ExpirationPolicy::NeverExpires);
        state.revoke();
        assert!(state.is_expired());
    }
}
