//! REST-endpoint multifactor trigger: an external policy service names the
//! provider to require.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, warn};
use url::Url;

use crate::authn::AuthenticationError;
use crate::mfa::ProviderDirectory;
use crate::service::Service;
use crate::webflow::{Event, FlowContext};

use super::{TriggerResolver, candidate_for};

/// Posts the principal, service and released attributes to a policy
/// endpoint; a 2xx response with a non-empty body selects the provider
/// named by the body. Errors and empty responses mean no opinion.
pub struct RestEndpointTrigger {
    directory: Arc<ProviderDirectory>,
    client: Client,
    endpoint: Url,
}

impl RestEndpointTrigger {
    #[must_use]
    pub fn new(directory: Arc<ProviderDirectory>, endpoint: Url) -> Self {
        Self {
            directory,
            client: Client::new(),
            endpoint,
        }
    }

    #[must_use]
    pub fn with_client(mut self, client: Client) -> Self {
        self.client = client;
        self
    }
}

#[async_trait]
impl TriggerResolver for RestEndpointTrigger {
    fn name(&self) -> &'static str {
        "rest-endpoint"
    }

    async fn resolve(&self, ctx: &FlowContext) -> Result<Option<Event>, AuthenticationError> {
        let Some(authentication) = ctx.authentication() else {
            return Ok(None);
        };
        let released = ctx
            .registered_service()
            .map(|registered| {
                registered
                    .attribute_release()
                    .release(authentication.principal())
            })
            .unwrap_or_else(|| authentication.principal().attributes().clone());
        let body = json!({
            "principal": authentication.principal().id(),
            "service": ctx.service().map(Service::id),
            "attributes": released,
        });

        let response = match self
            .client
            .post(self.endpoint.clone())
            .json(&body)
            .send()
            .await
        {
            Ok(response) => response,
            Err(err) => {
                warn!("multifactor policy endpoint unreachable: {err}");
                return Ok(None);
            }
        };
        if !response.status().is_success() {
            debug!(status = %response.status(), "policy endpoint expressed no opinion");
            return Ok(None);
        }
        let provider_id = match response.text().await {
            Ok(text) => text.trim().to_string(),
            Err(err) => {
                warn!("failed to read policy endpoint response: {err}");
                return Ok(None);
            }
        };
        if provider_id.is_empty() {
            return Ok(None);
        }
        Ok(candidate_for(&self.directory, ctx, &provider_id, "rest-endpoint").await)
    }
}
