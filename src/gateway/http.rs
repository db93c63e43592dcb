use async_trait::async_trait;
use reqwest::{header, Client, Method, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::wire::{
    Empty, LabelEnvelope, ListAgentsResponse, ListLabelsResponse, ListSitesResponse,
    ListTestsResponse, SetTestStatusRequest, SiteEnvelope, TestEnvelope,
};
use super::{Gateway, GatewayError};
use crate::models::{Agent, Label, Site, Test, TestStatus};

pub const DEFAULT_SYNTHETICS_URL: &str = "https://grpc.api.kentik.com/synthetics/v202309";
pub const DEFAULT_LABEL_URL: &str = "https://grpc.api.kentik.com/label/v202210";
pub const DEFAULT_SITE_URL: &str = "https://grpc.api.kentik.com/site/v202211";

const AUTH_EMAIL_HEADER: &str = "X-CH-Auth-Email";
const AUTH_TOKEN_HEADER: &str = "X-CH-Auth-API-Token";

#[derive(Debug, Clone)]
pub struct HttpGatewayConfig {
    pub email: String,
    pub api_token: String,
    pub synthetics_url: String,
    pub label_url: String,
    pub site_url: String,
    pub request_timeout: Duration,
    /// Retries after the first attempt for 429, 5xx and network failures.
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    /// Minimum spacing between the start of two consecutive requests.
    pub min_request_interval: Duration,
}

impl HttpGatewayConfig {
    pub fn new(email: impl Into<String>, api_token: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            api_token: api_token.into(),
            synthetics_url: DEFAULT_SYNTHETICS_URL.to_string(),
            label_url: DEFAULT_LABEL_URL.to_string(),
            site_url: DEFAULT_SITE_URL.to_string(),
            request_timeout: Duration::from_secs(30),
            max_retries: 4,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(30),
            min_request_interval: Duration::from_millis(200),
        }
    }

    /// Points all three service families at one base URL.
    pub fn with_base_url(mut self, base: &str) -> Self {
        let base = base.trim_end_matches('/');
        self.synthetics_url = base.to_string();
        self.label_url = base.to_string();
        self.site_url = base.to_string();
        self
    }
}

/// [`Gateway`] over the service's JSON HTTP API.
pub struct HttpGateway {
    client: Client,
    config: HttpGatewayConfig,
    last_request: Mutex<Option<Instant>>,
}

impl HttpGateway {
    pub fn new(config: HttpGatewayConfig) -> Result<Self, GatewayError> {
        let mut headers = header::HeaderMap::new();
        let email = header::HeaderValue::from_str(&config.email).map_err(|e| {
            GatewayError::InvalidConfiguration(format!("Invalid email header: {}", e))
        })?;
        let mut token = header::HeaderValue::from_str(&config.api_token).map_err(|e| {
            GatewayError::InvalidConfiguration(format!("Invalid API token header: {}", e))
        })?;
        token.set_sensitive(true);
        headers.insert(AUTH_EMAIL_HEADER, email);
        headers.insert(AUTH_TOKEN_HEADER, token);

        let client = Client::builder()
            .default_headers(headers)
            .timeout(config.request_timeout)
            .build()?;

        Ok(Self {
            client,
            config,
            last_request: Mutex::new(None),
        })
    }

    fn url(base: &str, path: &str) -> String {
        format!("{}/{}", base.trim_end_matches('/'), path.trim_start_matches('/'))
    }

    async fn pace(&self) {
        let mut last = self.last_request.lock().await;
        if let Some(previous) = *last {
            let elapsed = previous.elapsed();
            if elapsed < self.config.min_request_interval {
                tokio::time::sleep(self.config.min_request_interval - elapsed).await;
            }
        }
        *last = Some(Instant::now());
    }

    async fn execute<R: DeserializeOwned>(
        &self,
        method: Method,
        url: &str,
        body: Option<Value>,
    ) -> Result<R, GatewayError> {
        let mut delay = self.config.initial_backoff;
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            self.pace().await;

            let mut request = self.client.request(method.clone(), url);
            if let Some(payload) = &body {
                request = request.json(payload);
            }
            debug!(%method, url, attempt, "Sending request");

            let reason = match request.send().await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        let text = response.text().await?;
                        let text = if text.trim().is_empty() { "{}" } else { text.as_str() };
                        return serde_json::from_str(text).map_err(|e| {
                            GatewayError::Decode(format!("{} {}: {}", method, url, e))
                        });
                    }
                    let error_body = response
                        .text()
                        .await
                        .unwrap_or_else(|_| "Failed to read error body".to_string());
                    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
                        format!("status {}: {}", status, error_body)
                    } else {
                        return Err(GatewayError::Rejected {
                            status: status.as_u16(),
                            message: error_body,
                        });
                    }
                }
                Err(e) => e.to_string(),
            };

            if attempt > self.config.max_retries {
                return Err(GatewayError::Exhausted {
                    attempts: attempt,
                    message: reason,
                });
            }

            warn!(
                %method,
                url,
                attempt,
                delay_ms = delay.as_millis() as u64,
                reason = %reason,
                "Request failed, retrying after backoff."
            );
            tokio::time::sleep(delay).await;
            delay = (delay * 2).min(self.config.max_backoff);
        }
    }

    fn to_body<T: serde::Serialize>(value: &T) -> Result<Value, GatewayError> {
        serde_json::to_value(value)
            .map_err(|e| GatewayError::Decode(format!("Failed to encode request: {}", e)))
    }
}

#[async_trait]
impl Gateway for HttpGateway {
    async fn list_labels(&self) -> Result<Vec<Label>, GatewayError> {
        let url = Self::url(&self.config.label_url, "labels");
        let response: ListLabelsResponse = self.execute(Method::GET, &url, None).await?;
        Ok(response.labels)
    }

    async fn create_label(&self, label: &Label) -> Result<Label, GatewayError> {
        let url = Self::url(&self.config.label_url, "labels");
        let body = Self::to_body(&LabelEnvelope { label: label.clone() })?;
        let response: LabelEnvelope = self.execute(Method::POST, &url, Some(body)).await?;
        Ok(response.label)
    }

    async fn list_sites(&self) -> Result<Vec<Site>, GatewayError> {
        let url = Self::url(&self.config.site_url, "sites");
        let response: ListSitesResponse = self.execute(Method::GET, &url, None).await?;
        Ok(response.sites)
    }

    async fn create_site(&self, site: &Site) -> Result<Site, GatewayError> {
        let url = Self::url(&self.config.site_url, "sites");
        let body = Self::to_body(&SiteEnvelope { site: site.clone() })?;
        let response: SiteEnvelope = self.execute(Method::POST, &url, Some(body)).await?;
        Ok(response.site)
    }

    async fn list_agents(&self) -> Result<Vec<Agent>, GatewayError> {
        let url = Self::url(&self.config.synthetics_url, "agents");
        let response: ListAgentsResponse = self.execute(Method::GET, &url, None).await?;
        Ok(response.agents)
    }

    async fn list_tests(&self) -> Result<Vec<Test>, GatewayError> {
        let url = Self::url(&self.config.synthetics_url, "tests");
        let response: ListTestsResponse = self.execute(Method::GET, &url, None).await?;
        if let Some(invalid) = response.invalid_count.filter(|n| *n > 0) {
            warn!(invalid_count = invalid, "Service reported invalid tests in listing.");
        }
        Ok(response.tests)
    }

    async fn create_test(&self, test: &Test) -> Result<Test, GatewayError> {
        let url = Self::url(&self.config.synthetics_url, "tests");
        let mut payload = test.clone();
        payload.id = None;
        let body = Self::to_body(&TestEnvelope { test: payload })?;
        let response: TestEnvelope = self.execute(Method::POST, &url, Some(body)).await?;
        Ok(response.test)
    }

    async fn update_test(&self, id: &str, test: &Test) -> Result<Test, GatewayError> {
        let url = Self::url(&self.config.synthetics_url, &format!("tests/{}", id));
        let mut payload = test.clone();
        payload.id = Some(id.to_string());
        let body = Self::to_body(&TestEnvelope { test: payload })?;
        let response: TestEnvelope = self.execute(Method::PUT, &url, Some(body)).await?;
        Ok(response.test)
    }

    async fn delete_test(&self, id: &str) -> Result<(), GatewayError> {
        let url = Self::url(&self.config.synthetics_url, &format!("tests/{}", id));
        let _: Empty = self.execute(Method::DELETE, &url, None).await?;
        Ok(())
    }

    async fn set_test_status(&self, id: &str, status: TestStatus) -> Result<(), GatewayError> {
        let url = Self::url(&self.config.synthetics_url, &format!("tests/{}/status", id));
        let body = Self::to_body(&SetTestStatusRequest { id, status })?;
        let _: Empty = self.execute(Method::PUT, &url, Some(body)).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_joining_trims_slashes() {
        assert_eq!(
            HttpGateway::url("https://example.test/api/", "/tests"),
            "https://example.test/api/tests"
        );
    }

    #[test]
    fn test_base_url_override_applies_to_all_families() {
        let config =
            HttpGatewayConfig::new("a@b.c", "token").with_base_url("http://127.0.0.1:9000/");
        assert_eq!(config.synthetics_url, "http://127.0.0.1:9000");
        assert_eq!(config.label_url, "http://127.0.0.1:9000");
        assert_eq!(config.site_url, "http://127.0.0.1:9000");
    }

    #[test]
    fn test_invalid_header_value_is_configuration_error() {
        let config = HttpGatewayConfig::new("a@b.c", "bad\ntoken");
        match HttpGateway::new(config) {
            Err(GatewayError::InvalidConfiguration(_)) => {}
            other => panic!("expected configuration error, got {:?}", other.err()),
        }
    }
}
