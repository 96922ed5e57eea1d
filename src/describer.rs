//! The external vision-language endpoint, consumed as an opaque
//! `describe(image_bytes) -> text` capability (§1, §6). Modeled as a trait so
//! the worker pool and distributed queue never depend on a concrete HTTP
//! client; `OllamaDescriber` is the production adapter, `MockDescriber` is
//! used by tests and by the health check's dry-run path.

use crate::error::CoreError;
use async_trait::async_trait;
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DESCRIBE_TIMEOUT: Duration = Duration::from_secs(300);
const HEALTH_CHECK_TIMEOUT: Duration = Duration::from_secs(5);

#[async_trait]
pub trait Describer: Send + Sync {
    async fn describe(&self, image_bytes: &[u8]) -> Result<String, CoreError>;

    /// Cheap reachability probe used by the health endpoint's dry-run path
    /// (§6) — never runs a real generate call.
    async fn health_check(&self) -> Result<(), CoreError>;
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    images: Vec<String>,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    response: String,
}

/// `POST {ollama_url}/api/generate`, base64-encoded image, 300s timeout.
/// Non-2xx or network failure is classified per §7: timeouts and 5xx are
/// `DescribeTransient`, other 4xx are `DescribePermanent`.
pub struct OllamaDescriber {
    client: reqwest::Client,
    base_url: String,
    model: String,
}

impl OllamaDescriber {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(DESCRIBE_TIMEOUT)
            .build()
            .expect("reqwest client building with static config never fails");
        Self {
            client,
            base_url: base_url.into(),
            model: model.into(),
        }
    }
}

#[async_trait]
impl Describer for OllamaDescriber {
    async fn describe(&self, image_bytes: &[u8]) -> Result<String, CoreError> {
        let encoded = base64::engine::general_purpose::STANDARD.encode(image_bytes);
        let body = GenerateRequest {
            model: &self.model,
            prompt: "Describe this image in detail.",
            images: vec![encoded],
            stream: false,
        };

        let response = self
            .client
            .post(format!("{}/api/generate", self.base_url))
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    CoreError::DescribeTransient(format!("describe call timed out: {e}"))
                } else {
                    CoreError::DescribeTransient(format!("describe request failed: {e}"))
                }
            })?;

        let status = response.status();
        if status.is_server_error() || status.as_u16() == 429 {
            return Err(CoreError::DescribeTransient(format!(
                "describer returned {status}"
            )));
        }
        if !status.is_success() {
            return Err(CoreError::DescribePermanent(format!(
                "describer returned {status}"
            )));
        }

        let parsed: GenerateResponse = response
            .json()
            .await
            .map_err(|e| CoreError::DescribePermanent(format!("malformed describer response: {e}")))?;
        Ok(parsed.response)
    }

    /// `GET {ollama_url}/api/tags` with a short timeout — lists installed
    /// models, which is cheap enough to call on every `/health` request and
    /// proves the endpoint is reachable without running `describe`.
    async fn health_check(&self) -> Result<(), CoreError> {
        let response = self
            .client
            .get(format!("{}/api/tags", self.base_url))
            .timeout(HEALTH_CHECK_TIMEOUT)
            .send()
            .await
            .map_err(|e| CoreError::DescribeTransient(format!("describer health check failed: {e}")))?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(CoreError::DescribeTransient(format!(
                "describer health check returned {}",
                response.status()
            )))
        }
    }
}

/// In-memory describer for tests: either a fixed response, a fixed error, or
/// a programmable sequence used to exercise retry-with-backoff (§8 S5).
pub struct MockDescriber {
    outcomes: parking_lot::Mutex<Vec<Result<String, CoreError>>>,
    default: Result<String, CoreError>,
}

impl MockDescriber {
    pub fn always(text: impl Into<String>) -> Self {
        Self {
            outcomes: parking_lot::Mutex::new(Vec::new()),
            default: Ok(text.into()),
        }
    }

    pub fn always_failing(kind: impl Fn(String) -> CoreError + Send + Sync + 'static) -> Self {
        Self {
            outcomes: parking_lot::Mutex::new(Vec::new()),
            default: Err(kind("mock describer failure".into())),
        }
    }

    /// Plays back `outcomes` in order, then falls back to `default` forever.
    pub fn sequence(outcomes: Vec<Result<String, CoreError>>, default: Result<String, CoreError>) -> Self {
        Self {
            outcomes: parking_lot::Mutex::new(outcomes.into_iter().rev().collect()),
            default,
        }
    }
}

#[async_trait]
impl Describer for MockDescriber {
    async fn describe(&self, _image_bytes: &[u8]) -> Result<String, CoreError> {
        let mut outcomes = self.outcomes.lock();
        outcomes.pop().unwrap_or_else(|| self.default.clone())
    }

    /// Reflects the configured default outcome rather than calling out
    /// anywhere, so tests can exercise a failing health check deterministically.
    async fn health_check(&self) -> Result<(), CoreError> {
        match &self.default {
            Ok(_) => Ok(()),
            Err(e) => Err(e.clone()),
        }
    }
}
