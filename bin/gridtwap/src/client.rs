use anyhow::Context;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde_json::Value;

use common::{ClientConfig, ErrorKind};

/// Typed failure returned by the operator API.
#[derive(Debug, thiserror::Error)]
#[error("{code}: {message}")]
pub struct ApiFailure {
    pub status: StatusCode,
    pub code: String,
    pub message: String,
    pub details: Vec<String>,
}

impl ApiFailure {
    fn from_response(status: StatusCode, body: &Value) -> Self {
        let code = body["error"].as_str().unwrap_or("internal").to_string();
        let message = body["message"]
            .as_str()
            .map(str::to_string)
            .unwrap_or_else(|| format!("request failed with HTTP {status}"));
        let details = body["details"]
            .as_array()
            .map(|d| d.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
            .unwrap_or_default();
        Self {
            status,
            code,
            message,
            details,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        ErrorKind::from_code(&self.code)
    }
}

/// Thin HTTP client for a running `gridtwap serve`.
pub struct ApiClient {
    http: Client,
    base_url: String,
    token: String,
}

impl ApiClient {
    pub fn new(config: ClientConfig) -> Self {
        Self {
            http: Client::new(),
            base_url: config.api_url.trim_end_matches('/').to_string(),
            token: config.api_token,
        }
    }

    pub async fn get(&self, path: &str) -> anyhow::Result<Value> {
        let req = self.http.get(format!("{}{path}", self.base_url));
        self.send(req).await
    }

    pub async fn post(&self, path: &str, body: Option<&Value>) -> anyhow::Result<Value> {
        let mut req = self.http.post(format!("{}{path}", self.base_url));
        if let Some(body) = body {
            req = req.json(body);
        }
        self.send(req).await
    }

    async fn send(&self, req: RequestBuilder) -> anyhow::Result<Value> {
        let resp = req
            .bearer_auth(&self.token)
            .send()
            .await
            .with_context(|| format!("failed to reach the daemon at {}", self.base_url))?;

        let status = resp.status();
        let text = resp.text().await.context("failed to read the response body")?;
        let body: Value = serde_json::from_str(&text).unwrap_or(Value::Null);

        if status.is_success() {
            Ok(body)
        } else {
            Err(ApiFailure::from_response(status, &body).into())
        }
    }
}

/// Process exit code for a failed command.
pub fn exit_code(err: &anyhow::Error) -> i32 {
    match err.downcast_ref::<ApiFailure>() {
        Some(failure) => failure.kind().exit_code(),
        None => ErrorKind::Internal.exit_code(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn error_body_maps_to_exit_code() {
        let failure = ApiFailure::from_response(
            StatusCode::CONFLICT,
            &json!({"error": "already_terminal", "message": "run abc is already CANCELLED", "details": []}),
        );
        assert_eq!(failure.kind(), ErrorKind::AlreadyTerminal);
        assert_eq!(exit_code(&failure.into()), 4);
    }

    #[test]
    fn details_are_kept() {
        let failure = ApiFailure::from_response(
            StatusCode::BAD_REQUEST,
            &json!({"error": "invalid_parameters", "message": "invalid parameters", "details": ["chunks must be at least 1"]}),
        );
        assert_eq!(failure.details, vec!["chunks must be at least 1"]);
        assert_eq!(exit_code(&failure.into()), 2);
    }

    #[test]
    fn unparseable_error_body_is_internal() {
        let failure = ApiFailure::from_response(StatusCode::BAD_GATEWAY, &Value::Null);
        assert_eq!(failure.code, "internal");
        assert_eq!(exit_code(&failure.into()), 1);
        assert_eq!(exit_code(&anyhow::anyhow!("connection refused")), 1);
    }
}
