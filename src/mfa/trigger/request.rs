//! Request-driven multifactor triggers: explicit request parameters,
//! adaptive request-fingerprint rules, and time-of-day windows.

use async_trait::async_trait;
use regex::Regex;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::warn;

use crate::authn::AuthenticationError;
use crate::mfa::ProviderDirectory;
use crate::webflow::{Event, FlowContext};

use super::{TriggerResolver, candidate_for};

const DEFAULT_PARAMETER_NAME: &str = "authn_method";
const DEFAULT_HEADER_NAME: &str = "x-authn-method";

/// Requires the provider named explicitly by a request parameter or header.
pub struct HttpRequestTrigger {
    directory: Arc<ProviderDirectory>,
    parameter_name: String,
    header_name: String,
}

impl HttpRequestTrigger {
    #[must_use]
    pub fn new(directory: Arc<ProviderDirectory>) -> Self {
        Self {
            directory,
            parameter_name: DEFAULT_PARAMETER_NAME.to_string(),
            header_name: DEFAULT_HEADER_NAME.to_string(),
        }
    }

    #[must_use]
    pub fn with_parameter_name(mut self, name: impl Into<String>) -> Self {
        self.parameter_name = name.into();
        self
    }

    #[must_use]
    pub fn with_header_name(mut self, name: impl Into<String>) -> Self {
        self.header_name = name.into();
        self
    }
}

#[async_trait]
impl TriggerResolver for HttpRequestTrigger {
    fn name(&self) -> &'static str {
        "http-request"
    }

    async fn resolve(&self, ctx: &FlowContext) -> Result<Option<Event>, AuthenticationError> {
        let request = ctx.request();
        let Some(provider_id) = request
            .parameter(&self.parameter_name)
            .or_else(|| request.header(&self.header_name))
            .map(str::trim)
            .filter(|value| !value.is_empty())
        else {
            return Ok(None);
        };
        let provider_id = provider_id.to_string();
        Ok(candidate_for(&self.directory, ctx, &provider_id, "http-request").await)
    }
}

#[derive(Clone, Copy, Debug)]
enum AdaptiveField {
    ClientAddress,
    UserAgent,
    GeoLocation,
}

struct AdaptiveRule {
    field: AdaptiveField,
    pattern: String,
    provider_id: String,
}

/// Requires a provider when the request fingerprint (client address, user
/// agent, geo-location hint) matches a configured rule. Rules are checked
/// in configuration order; the first match wins.
pub struct AdaptiveTrigger {
    directory: Arc<ProviderDirectory>,
    rules: Vec<AdaptiveRule>,
}

impl AdaptiveTrigger {
    #[must_use]
    pub fn new(directory: Arc<ProviderDirectory>) -> Self {
        Self {
            directory,
            rules: Vec::new(),
        }
    }

    #[must_use]
    pub fn require_for_client_address(
        mut self,
        pattern: impl Into<String>,
        provider_id: impl Into<String>,
    ) -> Self {
        self.rules.push(AdaptiveRule {
            field: AdaptiveField::ClientAddress,
            pattern: pattern.into(),
            provider_id: provider_id.into(),
        });
        self
    }

    #[must_use]
    pub fn require_for_user_agent(
        mut self,
        pattern: impl Into<String>,
        provider_id: impl Into<String>,
    ) -> Self {
        self.rules.push(AdaptiveRule {
            field: AdaptiveField::UserAgent,
            pattern: pattern.into(),
            provider_id: provider_id.into(),
        });
        self
    }

    #[must_use]
    pub fn require_for_geo_location(
        mut self,
        pattern: impl Into<String>,
        provider_id: impl Into<String>,
    ) -> Self {
        self.rules.push(AdaptiveRule {
            field: AdaptiveField::GeoLocation,
            pattern: pattern.into(),
            provider_id: provider_id.into(),
        });
        self
    }
}

#[async_trait]
impl TriggerResolver for AdaptiveTrigger {
    fn name(&self) -> &'static str {
        "adaptive"
    }

    async fn resolve(&self, ctx: &FlowContext) -> Result<Option<Event>, AuthenticationError> {
        let request = ctx.request();
        for rule in &self.rules {
            let value = match rule.field {
                AdaptiveField::ClientAddress => request.client_address(),
                AdaptiveField::UserAgent => request.user_agent(),
                AdaptiveField::GeoLocation => request.geo_location(),
            };
            let Some(value) = value else {
                continue;
            };
            match Regex::new(&rule.pattern) {
                Ok(regex) if regex.is_match(value) => {
                    return Ok(candidate_for(
                        &self.directory,
                        ctx,
                        &rule.provider_id,
                        "adaptive",
                    )
                    .await);
                }
                Ok(_) => {}
                Err(err) => {
                    warn!("invalid adaptive pattern [{}]: {err}", rule.pattern);
                }
            }
        }
        Ok(None)
    }
}

/// One on-or-after/before window mapped to a provider. Windows spanning
/// midnight are expressed with `from_hour > to_hour`.
struct TimeWindow {
    from_hour: u8,
    to_hour: u8,
    provider_id: String,
}

impl TimeWindow {
    fn contains(&self, hour: u8) -> bool {
        if self.from_hour <= self.to_hour {
            (self.from_hour..self.to_hour).contains(&hour)
        } else {
            hour >= self.from_hour || hour < self.to_hour
        }
    }
}

/// Requires a provider during configured hours of the day (UTC).
pub struct TimedTrigger {
    directory: Arc<ProviderDirectory>,
    windows: Vec<TimeWindow>,
    clock: Arc<dyn Fn() -> u8 + Send + Sync>,
}

impl TimedTrigger {
    #[must_use]
    pub fn new(directory: Arc<ProviderDirectory>) -> Self {
        Self {
            directory,
            windows: Vec::new(),
            clock: Arc::new(current_utc_hour),
        }
    }

    #[must_use]
    pub fn require_between(
        mut self,
        from_hour: u8,
        to_hour: u8,
        provider_id: impl Into<String>,
    ) -> Self {
        self.windows.push(TimeWindow {
            from_hour,
            to_hour,
            provider_id: provider_id.into(),
        });
        self
    }

    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Fn() -> u8 + Send + Sync>) -> Self {
        self.clock = clock;
        self
    }
}

#[async_trait]
impl TriggerResolver for TimedTrigger {
    fn name(&self) -> &'static str {
        "timed"
    }

    async fn resolve(&self, ctx: &FlowContext) -> Result<Option<Event>, AuthenticationError> {
        let hour = (self.clock)();
        for window in &self.windows {
            if window.contains(hour) {
                return Ok(candidate_for(
                    &self.directory,
                    ctx,
                    &window.provider_id,
                    "timed",
                )
                .await);
            }
        }
        Ok(None)
    }
}

fn current_utc_hour() -> u8 {
    let seconds = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    u8::try_from((seconds / 3600) % 24).unwrap_or(0)
}
