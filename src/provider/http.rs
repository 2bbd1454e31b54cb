//! An aggregator reached over its JSON REST API.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Response, StatusCode};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use time::Date;
use tracing::debug;

use crate::{
    bank_link::LinkStatus,
    provider::{
        ConsentHandle, ConsentRequest, ProviderError, ProviderGateway, RawTransaction,
        SessionHandle,
    },
    session::SessionStatus,
};

/// Which call an HTTP error status came from, since the same status means different things
/// for different calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Call {
    CreateConsent,
    ConsentStatus,
    CreateSession,
    SessionStatus,
    FetchTransactions,
    Revoke,
}

/// "Too Early", sent while a session's data is still being prepared.
const TOO_EARLY: u16 = 425;

#[derive(Debug, Deserialize)]
struct StatusBody<S> {
    status: S,
}

#[derive(Debug, Serialize)]
struct CreateSessionBody<'a> {
    consent_id: &'a str,
    from_date: Date,
    to_date: Date,
}

#[derive(Debug, Deserialize)]
struct TransactionsBody {
    transactions: Vec<serde_json::Value>,
}

/// Aggregator REST client.
#[derive(Debug, Clone)]
pub struct HttpProvider {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl HttpProvider {
    /// Create a client for the aggregator at `base_url`.
    ///
    /// `call_timeout` bounds every request, independent of any retries around it.
    ///
    /// # Errors
    /// Returns an error if the underlying HTTP client cannot be built.
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        call_timeout: Duration,
    ) -> Result<Self, ProviderError> {
        let http = reqwest::Client::builder()
            .timeout(call_timeout)
            .connect_timeout(call_timeout)
            .build()
            .map_err(|error| ProviderError::InvalidRequest(error.to_string()))?;

        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_owned(),
            api_key: api_key.into(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str, call: Call) -> Result<T, ProviderError> {
        let url = self.url(path);
        debug!("GET {url}");

        let response = self.http.get(&url).bearer_auth(&self.api_key).send().await?;
        read_json(response, call).await
    }

    async fn post_json<B: Serialize + Sync, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
        call: Call,
    ) -> Result<T, ProviderError> {
        let url = self.url(path);
        debug!("POST {url}");

        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await?;
        read_json(response, call).await
    }
}

async fn read_json<T: DeserializeOwned>(response: Response, call: Call) -> Result<T, ProviderError> {
    let status = response.status();

    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(map_error_status(status, body, call));
    }

    let bytes = response.bytes().await?;
    // Some calls answer with an empty body, which reads as JSON null.
    let bytes: &[u8] = if bytes.is_empty() { b"null" } else { &bytes };
    serde_json::from_slice(bytes).map_err(|error| ProviderError::InvalidResponse(error.to_string()))
}

fn map_error_status(status: StatusCode, body: String, call: Call) -> ProviderError {
    match (status, call) {
        (status, _) if status.is_server_error() => {
            ProviderError::Unavailable(format!("aggregator returned {status}: {body}"))
        }
        (StatusCode::TOO_MANY_REQUESTS | StatusCode::REQUEST_TIMEOUT, _) => {
            ProviderError::Unavailable(format!("aggregator returned {status}"))
        }
        (StatusCode::CONFLICT | StatusCode::GONE, Call::Revoke) => ProviderError::AlreadyRevoked,
        (StatusCode::FORBIDDEN | StatusCode::UNPROCESSABLE_ENTITY, Call::CreateSession) => {
            ProviderError::ConsentNotActive
        }
        (status, Call::FetchTransactions)
            if status == StatusCode::CONFLICT || status.as_u16() == TOO_EARLY =>
        {
            ProviderError::SessionNotReady
        }
        (StatusCode::NOT_FOUND, _) => ProviderError::NotFound(body),
        (status, call) => {
            ProviderError::InvalidRequest(format!("{call:?} rejected with {status}: {body}"))
        }
    }
}

#[async_trait]
impl ProviderGateway for HttpProvider {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn create_consent(
        &self,
        request: &ConsentRequest,
    ) -> Result<ConsentHandle, ProviderError> {
        self.post_json("/consents", request, Call::CreateConsent)
            .await
    }

    async fn get_consent_status(&self, consent_id: &str) -> Result<LinkStatus, ProviderError> {
        let body: StatusBody<LinkStatus> = self
            .get_json(&format!("/consents/{consent_id}"), Call::ConsentStatus)
            .await?;
        Ok(body.status)
    }

    async fn create_data_session(
        &self,
        consent_id: &str,
        from_date: Date,
        to_date: Date,
    ) -> Result<SessionHandle, ProviderError> {
        self.post_json(
            "/sessions",
            &CreateSessionBody {
                consent_id,
                from_date,
                to_date,
            },
            Call::CreateSession,
        )
        .await
    }

    async fn get_session_status(&self, session_id: &str) -> Result<SessionStatus, ProviderError> {
        let body: StatusBody<SessionStatus> = self
            .get_json(&format!("/sessions/{session_id}"), Call::SessionStatus)
            .await?;
        Ok(body.status)
    }

    async fn fetch_transactions(
        &self,
        session_id: &str,
    ) -> Result<Vec<RawTransaction>, ProviderError> {
        let body: TransactionsBody = self
            .get_json(
                &format!("/sessions/{session_id}/transactions"),
                Call::FetchTransactions,
            )
            .await?;
        Ok(body
            .transactions
            .into_iter()
            .map(RawTransaction::from_value)
            .collect())
    }

    async fn revoke_consent(&self, consent_id: &str) -> Result<(), ProviderError> {
        let _: serde_json::Value = self
            .post_json(
                &format!("/consents/{consent_id}/revoke"),
                &serde_json::json!({}),
                Call::Revoke,
            )
            .await?;
        Ok(())
    }
}
