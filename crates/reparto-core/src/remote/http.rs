//! HTTP implementation of the remote store.

use reqwest::{Response, StatusCode};
use serde::Deserialize;

use crate::error::{Error, Result};
use crate::models::ResourceKind;

use super::{RemoteError, RemoteRecord, RemoteStore};

/// Remote store client speaking the Reparto record API
#[derive(Clone)]
pub struct HttpRemoteStore {
    base_url: String,
    client: reqwest::Client,
    auth_token: Option<String>,
}

impl HttpRemoteStore {
    /// Create a client for the given API base URL
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let base_url = normalize_endpoint(base_url.into())?;
        let client = reqwest::Client::builder().build().map_err(|error| {
            Error::InvalidInput(format!("failed to build HTTP client: {error}"))
        })?;
        Ok(Self {
            base_url,
            client,
            auth_token: None,
        })
    }

    /// Attach a bearer token to every request
    #[must_use]
    pub fn with_auth_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }

    fn record_url(&self, resource: ResourceKind, record_id: &str) -> String {
        format!("{}/v1/{}/{}", self.base_url, resource.as_str(), record_id)
    }

    fn apply_auth(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.auth_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn check(response: Response) -> std::result::Result<Response, RemoteError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(classify_response(status, &body))
    }
}

impl RemoteStore for HttpRemoteStore {
    async fn create(
        &self,
        resource: ResourceKind,
        record_id: &str,
        payload: &RemoteRecord,
    ) -> std::result::Result<(), RemoteError> {
        let response = self
            .apply_auth(self.client.put(self.record_url(resource, record_id)))
            .json(payload)
            .send()
            .await
            .map_err(from_transport)?;

        Self::check(response).await.map(|_| ())
    }

    async fn update(
        &self,
        resource: ResourceKind,
        record_id: &str,
        payload: &RemoteRecord,
    ) -> std::result::Result<RemoteRecord, RemoteError> {
        let response = self
            .apply_auth(self.client.patch(self.record_url(resource, record_id)))
            .json(payload)
            .send()
            .await
            .map_err(from_transport)?;

        Self::check(response)
            .await?
            .json::<RemoteRecord>()
            .await
            .map_err(|error| RemoteError::Validation(format!("malformed record payload: {error}")))
    }

    async fn delete(
        &self,
        resource: ResourceKind,
        record_id: &str,
    ) -> std::result::Result<(), RemoteError> {
        let response = self
            .apply_auth(self.client.delete(self.record_url(resource, record_id)))
            .send()
            .await
            .map_err(from_transport)?;

        Self::check(response).await.map(|_| ())
    }

    async fn fetch(
        &self,
        resource: ResourceKind,
        record_id: &str,
    ) -> std::result::Result<RemoteRecord, RemoteError> {
        let response = self
            .apply_auth(self.client.get(self.record_url(resource, record_id)))
            .send()
            .await
            .map_err(from_transport)?;

        Self::check(response)
            .await?
            .json::<RemoteRecord>()
            .await
            .map_err(|error| RemoteError::Validation(format!("malformed record payload: {error}")))
    }
}

fn from_transport(error: reqwest::Error) -> RemoteError {
    if error.is_timeout() {
        RemoteError::Transient(format!("request timed out: {error}"))
    } else {
        RemoteError::Transient(error.to_string())
    }
}

/// Map a non-success response onto the engine's failure taxonomy
fn classify_response(status: StatusCode, body: &str) -> RemoteError {
    let message = parse_api_error(status, body);
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        RemoteError::AuthExpired(message)
    } else if status == StatusCode::NOT_FOUND {
        RemoteError::NotFound
    } else if status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
        || status.is_server_error()
    {
        RemoteError::Transient(message)
    } else {
        RemoteError::Validation(message)
    }
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: Option<String>,
    message: Option<String>,
}

fn parse_api_error(status: StatusCode, body: &str) -> String {
    if let Ok(payload) = serde_json::from_str::<ApiErrorBody>(body) {
        if let Some(message) = payload.message.or(payload.error) {
            return format!("{} ({})", message.trim(), status.as_u16());
        }
    }

    let trimmed = body.trim();
    if trimmed.is_empty() {
        format!("HTTP {}", status.as_u16())
    } else {
        format!("{} ({})", trimmed, status.as_u16())
    }
}

fn normalize_endpoint(raw: String) -> Result<String> {
    let endpoint = raw.trim();
    if endpoint.is_empty() {
        return Err(Error::InvalidInput(
            "API base URL must not be empty".to_string(),
        ));
    }
    if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
        Ok(endpoint.trim_end_matches('/').to_string())
    } else {
        Err(Error::InvalidInput(
            "API base URL must include http:// or https://".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_endpoint_rejects_invalid_values() {
        assert!(normalize_endpoint(String::new()).is_err());
        assert!(normalize_endpoint("api.example.coop".to_string()).is_err());
    }

    #[test]
    fn test_normalize_endpoint_trims_trailing_slash() {
        let endpoint = normalize_endpoint("https://api.example.coop/".to_string()).unwrap();
        assert_eq!(endpoint, "https://api.example.coop");
    }

    #[test]
    fn test_classify_auth_statuses() {
        assert!(matches!(
            classify_response(StatusCode::UNAUTHORIZED, ""),
            RemoteError::AuthExpired(_)
        ));
        assert!(matches!(
            classify_response(StatusCode::FORBIDDEN, ""),
            RemoteError::AuthExpired(_)
        ));
    }

    #[test]
    fn test_classify_transient_statuses() {
        for status in [
            StatusCode::REQUEST_TIMEOUT,
            StatusCode::TOO_MANY_REQUESTS,
            StatusCode::INTERNAL_SERVER_ERROR,
            StatusCode::SERVICE_UNAVAILABLE,
        ] {
            assert!(
                matches!(classify_response(status, ""), RemoteError::Transient(_)),
                "{status} should classify as transient"
            );
        }
    }

    #[test]
    fn test_classify_not_found() {
        assert!(matches!(
            classify_response(StatusCode::NOT_FOUND, ""),
            RemoteError::NotFound
        ));
    }

    #[test]
    fn test_classify_validation_keeps_server_reason() {
        let error = classify_response(
            StatusCode::UNPROCESSABLE_ENTITY,
            r#"{"message": "weight must be positive"}"#,
        );
        match error {
            RemoteError::Validation(reason) => {
                assert!(reason.contains("weight must be positive"));
                assert!(reason.contains("422"));
            }
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_api_error_falls_back_to_raw_body() {
        let message = parse_api_error(StatusCode::BAD_REQUEST, "nope");
        assert_eq!(message, "nope (400)");

        let empty = parse_api_error(StatusCode::BAD_GATEWAY, "");
        assert_eq!(empty, "HTTP 502");
    }
}
