use std::fmt;
use std::time::Duration;

use anyhow::{Context, Result as AnyResult};
use reqwest::Client;
use serde_json::Value;

use super::ClientFactory;
use crate::errors::{RegistryError, Result};

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Handle for an OpenAI-compatible endpoint.
#[derive(Clone)]
pub struct OpenAiClient {
    http: Client,
    base_url: String,
    api_key: String,
}

impl fmt::Debug for OpenAiClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenAiClient")
            .field("base_url", &self.base_url)
            .field("api_key", &"<redacted>")
            .finish()
    }
}

impl OpenAiClient {
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn endpoint(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    /// Ids of the models the upstream reports via `GET /models`.
    pub async fn list_models(&self) -> AnyResult<Vec<String>> {
        let response = self
            .http
            .get(self.endpoint("models"))
            .bearer_auth(&self.api_key)
            .send()
            .await
            .with_context(|| format!("request to {} failed", self.base_url))?
            .error_for_status()?;
        let body: Value = response.json().await?;

        let ids = body
            .get("data")
            .and_then(|data| data.as_array())
            .map(|items| {
                items
                    .iter()
                    .filter_map(|item| item.get("id").and_then(|id| id.as_str()))
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        Ok(ids)
    }
}

#[derive(Debug, Clone)]
pub struct OpenAiClientFactory {
    timeout: Duration,
}

impl Default for OpenAiClientFactory {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(45),
        }
    }
}

impl OpenAiClientFactory {
    pub fn with_timeout(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl ClientFactory for OpenAiClientFactory {
    type Handle = OpenAiClient;

    fn build(&self, base_url: Option<&str>, api_key: &str) -> Result<OpenAiClient> {
        let http = Client::builder()
            .timeout(self.timeout)
            .user_agent(concat!("modelhub/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|err| RegistryError::ClientBuild(err.to_string()))?;
        let base_url = base_url
            .map(str::trim)
            .filter(|url| !url.is_empty())
            .unwrap_or(DEFAULT_BASE_URL)
            .to_string();
        Ok(OpenAiClient {
            http,
            base_url,
            api_key: api_key.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_defaults_and_endpoints_join_cleanly() {
        let factory = OpenAiClientFactory::default();
        let client = factory.build(None, "sk-1").unwrap();
        assert_eq!(client.base_url(), DEFAULT_BASE_URL);
        assert_eq!(client.endpoint("/models"), "https://api.openai.com/v1/models");

        let local = factory.build(Some("http://localhost:11434/v1/"), "x").unwrap();
        assert_eq!(local.endpoint("models"), "http://localhost:11434/v1/models");

        let blank = factory.build(Some("  "), "x").unwrap();
        assert_eq!(blank.base_url(), DEFAULT_BASE_URL);
    }

    #[test]
    fn debug_output_redacts_the_key() {
        let client = OpenAiClientFactory::default().build(None, "sk-secret").unwrap();
        let printed = format!("{client:?}");
        assert!(!printed.contains("sk-secret"));
        assert!(printed.contains("<redacted>"));
    }

    #[tokio::test]
    async fn list_models_reports_unreachable_upstream() {
        let client = OpenAiClientFactory::with_timeout(Duration::from_secs(2))
            .build(Some("http://127.0.0.1:9/v1"), "x")
            .unwrap();
        assert!(client.list_models().await.is_err());
    }
}
