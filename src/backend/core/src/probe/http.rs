use async_trait::async_trait;
use reqwest::{Client, Url};
use tracing::trace;

use super::{resolve_target, ProbeError, ReadinessProbe, StatusRange};

/// Values of a JSON `status` field that mean ready.
const READY_STATUSES: &[&str] = &["ok", "healthy", "up", "pass", "ready"];

/// Ready once a GET returns a status in the expected range and, when the body
/// is a JSON object carrying a `status` field, that field reads as healthy.
#[derive(Debug, Clone)]
pub struct HttpProbe {
    client: Client,
    url: Url,
    expected: StatusRange,
}

impl HttpProbe {
    pub fn new(client: Client, url: &str, expected: StatusRange) -> Result<Self, String> {
        let url = Url::parse(url).map_err(|e| format!("invalid URL {:?}: {}", url, e))?;

        if !matches!(url.scheme(), "http" | "https") {
            return Err(format!("unsupported URL scheme: {}", url.scheme()));
        }
        if url.host_str().is_none() {
            return Err(format!("URL has no host: {}", url));
        }
        if expected.min > expected.max {
            return Err(format!("empty status range: {}", expected));
        }

        Ok(Self {
            client,
            url,
            expected,
        })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }
}

#[async_trait]
impl ReadinessProbe for HttpProbe {
    fn name(&self) -> &str {
        "http"
    }

    fn target(&self) -> String {
        self.url.to_string()
    }

    async fn check(&self) -> Result<(), ProbeError> {
        // IP literals need no lookup
        if let Some(domain) = self.url.domain() {
            let port = self.url.port_or_known_default().unwrap_or(80);
            resolve_target(domain, port).await?;
        }

        let response = self
            .client
            .get(self.url.clone())
            .header(reqwest::header::ACCEPT, "application/json, */*")
            .send()
            .await
            .map_err(|e| {
                if e.is_builder() {
                    ProbeError::fatal(format!("{}: {}", self.url, e))
                } else {
                    ProbeError::not_ready(format!("{}: {}", self.url, e))
                }
            })?;

        let status = response.status().as_u16();
        if !self.expected.contains(status) {
            return Err(ProbeError::not_ready(format!(
                "{} returned HTTP {} (expected {})",
                self.url, status, self.expected
            )));
        }

        let body = response
            .text()
            .await
            .map_err(|e| ProbeError::not_ready(format!("{}: reading body: {}", self.url, e)))?;

        check_body(&body).map_err(|detail| {
            ProbeError::not_ready(format!("{} reported unhealthy: {}", self.url, detail))
        })?;

        trace!(url = %self.url, status, "HTTP probe succeeded");
        Ok(())
    }
}

/// Inspect an optional JSON `status` field. Non-JSON bodies pass.
fn check_body(body: &str) -> Result<(), String> {
    let Ok(serde_json::Value::Object(fields)) = serde_json::from_str::<serde_json::Value>(body)
    else {
        return Ok(());
    };

    match fields.get("status") {
        None => Ok(()),
        Some(serde_json::Value::String(status))
            if READY_STATUSES
                .iter()
                .any(|ready| status.eq_ignore_ascii_case(ready)) =>
        {
            Ok(())
        }
        Some(other) => Err(format!("status = {}", other)),
    }
}
