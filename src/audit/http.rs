use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::Value;
use tracing::{debug, info};

use crate::config::credentials::redact_credentials;
use crate::errors::{with_retry, AuditError, RetryConfig};
use crate::utils::truncation::truncate_error;
use super::classifier::{AuditRequest, AuditResponse, IssueClassifier};

const AUDIT_PATH: &str = "/api/v1/audit";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// Classifier reached over HTTPS with a bearer token.
pub struct HttpClassifier {
    client: Client,
    base_url: String,
    retry: RetryConfig,
}

impl HttpClassifier {
    pub fn new(base_url: &str, max_retries: u32) -> Result<Self, AuditError> {
        let base_url = base_url.trim().trim_end_matches('/').to_string();
        if base_url.is_empty() {
            return Err(AuditError::simple("No classifier URL configured. Pass --url or set classifier.url"));
        }
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(concat!("fpr-audit/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| AuditError::technical(format!("Unable to build HTTP client: {}", e)))?;
        Ok(Self { client, base_url, retry: RetryConfig { max_retries } })
    }

    fn endpoint(&self) -> String {
        format!("{}{}", self.base_url, AUDIT_PATH)
    }

    async fn send_once(&self, request: &AuditRequest) -> Result<Vec<AuditResponse>, AuditError> {
        let token = request.token.as_deref().unwrap_or_default();
        let resp = self
            .client
            .post(self.endpoint())
            .bearer_auth(token)
            .json(request)
            .send()
            .await
            .map_err(|e| {
                let msg = redact_credentials(&e.to_string(), &[token]);
                if e.is_timeout() {
                    AuditError::Timeout(format!("Classifier request timed out: {}", msg))
                } else {
                    AuditError::Network(format!("Classifier request failed: {}", msg))
                }
            })?;

        let status = resp.status();
        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                return Err(AuditError::Authentication(format!(
                    "Classifier rejected the token (HTTP {})",
                    status.as_u16()
                )));
            }
            StatusCode::TOO_MANY_REQUESTS => {
                return Err(AuditError::RateLimit("Classifier rate limit".into()));
            }
            s if s.is_server_error() => {
                return Err(AuditError::Network(format!("Classifier returned HTTP {}", s.as_u16())));
            }
            s if !s.is_success() => {
                let body = resp.text().await.unwrap_or_default();
                return Err(AuditError::Classifier(format!(
                    "Classifier returned HTTP {}: {}",
                    s.as_u16(),
                    truncate_error(body.trim())
                )));
            }
            _ => {}
        }

        let data: Value = resp
            .json()
            .await
            .map_err(|e| AuditError::Classifier(format!("Failed to parse classifier response: {}", e)))?;
        parse_responses(data)
    }
}

/// Accepts either a bare array or `{ "responses": [...] }`.
fn parse_responses(data: Value) -> Result<Vec<AuditResponse>, AuditError> {
    if let Some(error) = data.get("error") {
        let message = error
            .get("message")
            .and_then(Value::as_str)
            .or_else(|| error.as_str())
            .unwrap_or("Unknown");
        return Err(AuditError::Classifier(message.to_string()));
    }
    let list = match data {
        Value::Array(_) => data,
        Value::Object(mut map) => map
            .remove("responses")
            .ok_or_else(|| AuditError::Classifier("No responses in classifier reply".into()))?,
        _ => return Err(AuditError::Classifier("Unexpected classifier reply".into())),
    };
    Ok(serde_json::from_value(list)?)
}

#[async_trait]
impl IssueClassifier for HttpClassifier {
    async fn classify(&self, request: &AuditRequest) -> Result<Vec<AuditResponse>, AuditError> {
        info!(
            endpoint = %self.endpoint(),
            issues = request.issues.len(),
            project = %request.project,
            "Submitting audit batch"
        );
        let responses = with_retry("classifier batch", &self.retry, || self.send_once(request)).await?;
        debug!(responses = responses.len(), "Classifier batch answered");
        Ok(responses)
    }

    fn name(&self) -> &str {
        "http"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_responses_shapes() {
        let bare = json!([{ "issueId": "A", "status": "SUCCESS" }]);
        assert_eq!(parse_responses(bare).unwrap()[0].issue_id, "A");
        let wrapped = json!({ "responses": [{ "issueId": "B", "status": "FAILED" }] });
        assert_eq!(parse_responses(wrapped).unwrap()[0].issue_id, "B");
        let err = parse_responses(json!({ "error": { "message": "quota exceeded" } })).unwrap_err();
        assert_eq!(err.to_string(), "Classifier error: quota exceeded");
        assert!(parse_responses(json!({ "other": 1 })).is_err());
    }

    #[test]
    fn test_blank_url_is_user_error() {
        let err = HttpClassifier::new("  ", 0).err().unwrap();
        assert!(err.is_user_error());
        let c = HttpClassifier::new("https://aviator.example.com/", 0).unwrap();
        assert_eq!(c.endpoint(), "https://aviator.example.com/api/v1/audit");
    }
}
