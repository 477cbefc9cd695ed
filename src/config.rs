//! Ticketing and multifactor configuration loaded at startup.

use std::time::Duration;

use crate::ticket::ExpirationPolicy;

const DEFAULT_TGT_TTL_SECONDS: u64 = 8 * 60 * 60;
const DEFAULT_TGT_IDLE_SECONDS: u64 = 2 * 60 * 60;
const DEFAULT_ST_TTL_SECONDS: u64 = 10;
const DEFAULT_ST_MAX_USES: u64 = 1;
const DEFAULT_PGT_TTL_SECONDS: u64 = 2 * 60 * 60;
const DEFAULT_CLEANER_INTERVAL_SECONDS: u64 = 120;
const DEFAULT_CLEANER_START_DELAY_SECONDS: u64 = 20;

const ENV_TGT_TTL: &str = "VARCO_TGT_TTL_SECONDS";
const ENV_TGT_IDLE: &str = "VARCO_TGT_IDLE_SECONDS";
const ENV_ST_TTL: &str = "VARCO_ST_TTL_SECONDS";
const ENV_ST_MAX_USES: &str = "VARCO_ST_MAX_USES";
const ENV_CLEANER_ENABLED: &str = "VARCO_CLEANER_ENABLED";
const ENV_CLEANER_INTERVAL: &str = "VARCO_CLEANER_INTERVAL_SECONDS";
const ENV_GLOBAL_MFA_PROVIDER: &str = "VARCO_GLOBAL_MFA_PROVIDER";

/// Ticket lifetimes and cleaner scheduling.
#[derive(Clone, Debug)]
pub struct TicketingConfig {
    tgt_ttl_seconds: u64,
    tgt_idle_seconds: u64,
    st_ttl_seconds: u64,
    st_max_uses: u64,
    pgt_ttl_seconds: u64,
    cleaner_enabled: bool,
    cleaner_interval_seconds: u64,
    cleaner_start_delay_seconds: u64,
}

impl Default for TicketingConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl TicketingConfig {
    #[must_use]
    pub fn new() -> Self {
        Self {
            tgt_ttl_seconds: DEFAULT_TGT_TTL_SECONDS,
            tgt_idle_seconds: DEFAULT_TGT_IDLE_SECONDS,
            st_ttl_seconds: DEFAULT_ST_TTL_SECONDS,
            st_max_uses: DEFAULT_ST_MAX_USES,
            pgt_ttl_seconds: DEFAULT_PGT_TTL_SECONDS,
            cleaner_enabled: true,
            cleaner_interval_seconds: DEFAULT_CLEANER_INTERVAL_SECONDS,
            cleaner_start_delay_seconds: DEFAULT_CLEANER_START_DELAY_SECONDS,
        }
    }

    /// Load configuration from environment variables, falling back to
    /// defaults for anything unset or unparsable.
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::new();
        Self {
            tgt_ttl_seconds: parse_u64_env(ENV_TGT_TTL).unwrap_or(defaults.tgt_ttl_seconds),
            tgt_idle_seconds: parse_u64_env(ENV_TGT_IDLE).unwrap_or(defaults.tgt_idle_seconds),
            st_ttl_seconds: parse_u64_env(ENV_ST_TTL).unwrap_or(defaults.st_ttl_seconds),
            st_max_uses: parse_u64_env(ENV_ST_MAX_USES).unwrap_or(defaults.st_max_uses),
            cleaner_enabled: parse_bool_env(ENV_CLEANER_ENABLED)
                .unwrap_or(defaults.cleaner_enabled),
            cleaner_interval_seconds: parse_u64_env(ENV_CLEANER_INTERVAL)
                .unwrap_or(defaults.cleaner_interval_seconds),
            ..defaults
        }
    }

    #[must_use]
    pub fn with_tgt_ttl_seconds(mut self, seconds: u64) -> Self {
        self.tgt_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_tgt_idle_seconds(mut self, seconds: u64) -> Self {
        self.tgt_idle_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_st_ttl_seconds(mut self, seconds: u64) -> Self {
        self.st_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_st_max_uses(mut self, uses: u64) -> Self {
        self.st_max_uses = uses;
        self
    }

    #[must_use]
    pub fn with_cleaner_enabled(mut self, enabled: bool) -> Self {
        self.cleaner_enabled = enabled;
        self
    }

    #[must_use]
    pub fn with_cleaner_interval_seconds(mut self, seconds: u64) -> Self {
        self.cleaner_interval_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_cleaner_start_delay_seconds(mut self, seconds: u64) -> Self {
        self.cleaner_start_delay_seconds = seconds;
        self
    }

    #[must_use]
    pub fn cleaner_enabled(&self) -> bool {
        self.cleaner_enabled
    }

    #[must_use]
    pub fn cleaner_interval(&self) -> Duration {
        Duration::from_secs(self.cleaner_interval_seconds)
    }

    #[must_use]
    pub fn cleaner_start_delay(&self) -> Duration {
        Duration::from_secs(self.cleaner_start_delay_seconds)
    }

    /// Session tickets expire on hard lifetime or idle window, whichever
    /// comes first.
    #[must_use]
    pub fn tgt_expiration_policy(&self) -> ExpirationPolicy {
        ExpirationPolicy::SessionLifetime {
            ttl: Duration::from_secs(self.tgt_ttl_seconds),
            idle: Duration::from_secs(self.tgt_idle_seconds),
        }
    }

    /// Service tickets are single-use with a short time-to-live.
    #[must_use]
    pub fn st_expiration_policy(&self) -> ExpirationPolicy {
        ExpirationPolicy::TimeToKill {
            ttl: Duration::from_secs(self.st_ttl_seconds),
            max_uses: self.st_max_uses,
        }
    }

    #[must_use]
    pub fn pgt_expiration_policy(&self) -> ExpirationPolicy {
        ExpirationPolicy::HardTimeout {
            ttl: Duration::from_secs(self.pgt_ttl_seconds),
        }
    }
}

/// Multifactor settings that are global rather than per-service.
#[derive(Clone, Debug, Default)]
pub struct MultifactorConfig {
    global_provider_id: Option<String>,
}

impl MultifactorConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn from_env() -> Self {
        Self {
            global_provider_id: std::env::var(ENV_GLOBAL_MFA_PROVIDER)
                .ok()
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty()),
        }
    }

    #[must_use]
    pub fn with_global_provider(mut self, provider_id: impl Into<String>) -> Self {
        self.global_provider_id = Some(provider_id.into());
        self
    }

    #[must_use]
    pub fn global_provider_id(&self) -> Option<&str> {
        self.global_provider_id.as_deref()
    }
}

fn parse_u64_env(key: &str) -> Option<u64> {
    std::env::var(key).ok().and_then(|value| value.trim().parse().ok())
}

fn parse_bool_env(key: &str) -> Option<bool> {
    std::env::var(key)
        .ok()
        .and_then(|value| match value.trim() {
            "1" | "true" | "TRUE" | "yes" | "YES" => Some(true),
            "0" | "false" | "FALSE" | "no" | "NO" => Some(false),
            _ => None,
        })
}
