use anyhow::Result;
use reqwest::{
    Client,
    header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE, AUTHORIZATION},
    Method, StatusCode,
};
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, error, warn};

use shared_config::AppConfig;

/// Postgres error codes that indicate a concurrent writer won a race.
const UNIQUE_VIOLATION: &str = "23505";
const EXCLUSION_VIOLATION: &str = "23P01";
const SERIALIZATION_FAILURE: &str = "40001";
/// A referenced row (appointment, patient, branch) does not exist.
const FOREIGN_KEY_VIOLATION: &str = "23503";

#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("API error ({status}): {message}")]
    Api {
        status: u16,
        code: Option<String>,
        message: String,
    },

    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Invalid header value for {0}")]
    InvalidHeader(String),
}

impl DatabaseError {
    fn from_response(status: StatusCode, body: &str) -> Self {
        let parsed: Option<Value> = serde_json::from_str(body).ok();
        let code = parsed
            .as_ref()
            .and_then(|v| v.get("code"))
            .and_then(|c| c.as_str())
            .map(str::to_string);
        let message = parsed
            .as_ref()
            .and_then(|v| v.get("message"))
            .and_then(|m| m.as_str())
            .map(str::to_string)
            .unwrap_or_else(|| body.to_string());

        match status.as_u16() {
            401 | 403 => DatabaseError::Auth(message),
            404 => DatabaseError::NotFound(message),
            _ => DatabaseError::Api { status: status.as_u16(), code, message },
        }
    }

    /// True when the row was rejected by a uniqueness, exclusion or
    /// serialization guard, i.e. the caller lost a race and may retry.
    /// PostgREST also answers 409 for foreign key violations, so only the
    /// SQLSTATE decides.
    pub fn is_contention(&self) -> bool {
        matches!(
            self.sqlstate(),
            Some(UNIQUE_VIOLATION) | Some(EXCLUSION_VIOLATION) | Some(SERIALIZATION_FAILURE)
        )
    }

    pub fn is_missing_reference(&self) -> bool {
        self.sqlstate() == Some(FOREIGN_KEY_VIOLATION)
    }

    fn sqlstate(&self) -> Option<&str> {
        match self {
            DatabaseError::Api { code, .. } => code.as_deref(),
            _ => None,
        }
    }

    /// Classify an error returned by [`SupabaseClient`].
    pub fn is_contention_error(err: &anyhow::Error) -> bool {
        err.downcast_ref::<DatabaseError>()
            .map(DatabaseError::is_contention)
            .unwrap_or(false)
    }

    pub fn is_missing_reference_error(err: &anyhow::Error) -> bool {
        err.downcast_ref::<DatabaseError>()
            .map(DatabaseError::is_missing_reference)
            .unwrap_or(false)
    }
}

pub struct SupabaseClient {
    client: Client,
    base_url: String,
    anon_key: String,
}

impl SupabaseClient {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            client: Client::new(),
            base_url: config.supabase_url.trim_end_matches('/').to_string(),
            anon_key: config.supabase_anon_key.clone(),
        }
    }

    fn get_headers(&self, auth_token: Option<&str>) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();

        headers.insert(
            "apikey",
            HeaderValue::from_str(&self.anon_key)
                .map_err(|_| DatabaseError::InvalidHeader("apikey".to_string()))?,
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        if let Some(token) = auth_token {
            headers.insert(
                AUTHORIZATION,
                HeaderValue::from_str(&format!("Bearer {}", token))
                    .map_err(|_| DatabaseError::InvalidHeader("authorization".to_string()))?,
            );
        }

        Ok(headers)
    }

    pub async fn request<T>(&self, method: Method, path: &str,
                            auth_token: Option<&str>, body: Option<Value>)
                            -> Result<T>
    where T: DeserializeOwned {
        self.request_with_headers(method, path, auth_token, body, &[]).await
    }

    /// Same as [`request`](Self::request) with extra headers such as
    /// `prefer: return=representation`. Header names must be lowercase.
    pub async fn request_with_headers<T>(
        &self,
        method: Method,
        path: &str,
        auth_token: Option<&str>,
        body: Option<Value>,
        extra_headers: &[(&'static str, &str)],
    ) -> Result<T>
    where T: DeserializeOwned {
        let url = format!("{}{}", self.base_url, path);
        debug!("Making request to {}", url);

        let mut headers = self.get_headers(auth_token)?;
        for &(name, value) in extra_headers {
            headers.insert(
                HeaderName::from_static(name),
                HeaderValue::from_str(value)
                    .map_err(|_| DatabaseError::InvalidHeader(name.to_string()))?,
            );
        }

        let mut req = self.client.request(method, &url)
            .headers(headers);

        if let Some(body_data) = body {
            req = req.json(&body_data);
        }

        let response = req.send().await?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await?;
            let db_error = DatabaseError::from_response(status, &error_text);
            if db_error.is_contention() {
                warn!("Write rejected by storage guard ({}): {}", status, error_text);
            } else {
                error!("API error ({}): {}", status, error_text);
            }
            return Err(db_error.into());
        }

        let data = response.json::<T>().await?;
        Ok(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(url: &str) -> SupabaseClient {
        let config = AppConfig {
            supabase_url: url.to_string(),
            supabase_anon_key: "test-anon-key".to_string(),
            ..AppConfig::default()
        };
        SupabaseClient::new(&config)
    }

    #[test]
    fn test_contention_classification() {
        let unique = DatabaseError::from_response(
            StatusCode::CONFLICT,
            r#"{"code":"23505","message":"duplicate key value violates unique constraint"}"#,
        );
        assert!(unique.is_contention());

        let exclusion = DatabaseError::from_response(
            StatusCode::BAD_REQUEST,
            r#"{"code":"23P01","message":"conflicting key value violates exclusion constraint"}"#,
        );
        assert!(exclusion.is_contention());

        let other = DatabaseError::from_response(StatusCode::BAD_REQUEST, "not json");
        assert!(!other.is_contention());

        let bare_conflict = DatabaseError::from_response(StatusCode::CONFLICT, "{}");
        assert!(!bare_conflict.is_contention());
        assert!(matches!(
            DatabaseError::from_response(StatusCode::UNAUTHORIZED, "{}"),
            DatabaseError::Auth(_)
        ));
    }

    #[tokio::test]
    async fn test_request_sends_prefer_header_and_surfaces_contention() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/rest/v1/queue_entries"))
            .and(header("Prefer", "return=representation"))
            .respond_with(ResponseTemplate::new(409).set_body_json(json!({
                "code": "23505",
                "message": "duplicate key value violates unique constraint"
            })))
            .mount(&server)
            .await;

        let client = client_for(&server.uri());
        let result: Result<Vec<Value>> = client
            .request_with_headers(
                Method::POST,
                "/rest/v1/queue_entries",
                Some("token"),
                Some(json!({"queue_number": 1})),
                &[("prefer", "return=representation")],
            )
            .await;

        let err = result.expect_err("conflict expected");
        assert!(DatabaseError::is_contention_error(&err));
    }

    #[tokio::test]
    async fn test_foreign_key_conflict_is_not_contention() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/rest/v1/queue_entries"))
            .respond_with(ResponseTemplate::new(409).set_body_json(json!({
                "code": "23503",
                "message": "insert or update on table \"queue_entries\" violates foreign key constraint"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server.uri());
        let result: Result<Vec<Value>> = client
            .request(Method::POST, "/rest/v1/queue_entries", Some("token"), Some(json!({"queue_number": 1})))
            .await;

        let err = result.expect_err("foreign key violation expected");
        assert!(!DatabaseError::is_contention_error(&err));
        assert!(DatabaseError::is_missing_reference_error(&err));
    }
}
