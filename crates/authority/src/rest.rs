//! REST implementation of [`AuthorityClient`].
//!
//! Talks JSON to a gateway in front of the authority's web services. HTTP
//! outcomes are folded into the error taxonomy here so everything above
//! this layer only sees `ClientError` values.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use reqwest::StatusCode;
use serde::Deserialize;
use tokio::sync::RwLock;

use fe_core::models::Authorization;
use fe_core::transform::{WireInvoice, WireNote};
use fe_core::{ClientError, ClientResult};

use crate::{AuthGrant, AuthRequest, AuthorityClient, ServiceAvailability, WireDocument};

#[derive(Clone)]
pub struct RestAuthorityClient {
    base_url: String,
    http: reqwest::Client,
    // Bearer cached from the last successful authenticate call.
    token: Arc<RwLock<Option<String>>>,
}

#[derive(Debug, Deserialize)]
struct AuthResponse {
    token: String,
    expiry: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct SubmitResponse {
    authorization_code: String,
    authorization_expiry: NaiveDate,
}

#[derive(Debug, Deserialize)]
struct LastNumberResponse {
    number: u64,
}

/// Map an HTTP status plus response body to the taxonomy.
pub fn error_for_status(status: StatusCode, body: &str) -> ClientError {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            ClientError::Authentication(format!("{status}: {body}"))
        }
        s if s.is_client_error() => ClientError::Validation(format!("{status}: {body}")),
        _ => ClientError::Service(format!("{status}: {body}")),
    }
}

fn transport_error(err: reqwest::Error) -> ClientError {
    ClientError::Connectivity(err.to_string())
}

impl RestAuthorityClient {
    pub fn new(base_url: String) -> Arc<Self> {
        Arc::new(Self {
            base_url,
            http: reqwest::Client::new(),
            token: Arc::new(RwLock::new(None)),
        })
    }

    async fn bearer(&self) -> ClientResult<String> {
        let token = self.token.read().await;
        token
            .as_ref()
            .map(|t| format!("Bearer {t}"))
            .ok_or_else(|| ClientError::Authentication("no active session token".into()))
    }

    async fn post_json<T, B>(&self, path: &str, body: &B) -> ClientResult<T>
    where
        T: serde::de::DeserializeOwned,
        B: serde::Serialize,
    {
        let bearer = self.bearer().await?;
        let resp = self
            .http
            .post(format!("{}{path}", self.base_url))
            .header("Authorization", bearer)
            .json(body)
            .send()
            .await
            .map_err(transport_error)?;
        self.read_json(resp).await
    }

    async fn get_response(&self, path: &str) -> ClientResult<reqwest::Response> {
        let bearer = self.bearer().await?;
        self.http
            .get(format!("{}{path}", self.base_url))
            .header("Authorization", bearer)
            .send()
            .await
            .map_err(transport_error)
    }

    async fn read_json<T: serde::de::DeserializeOwned>(
        &self,
        resp: reqwest::Response,
    ) -> ClientResult<T> {
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(error_for_status(status, &body));
        }
        resp.json::<T>()
            .await
            .map_err(|e| ClientError::Service(format!("malformed authority response: {e}")))
    }
}

#[async_trait]
impl AuthorityClient for RestAuthorityClient {
    async fn authenticate(&self, request: &AuthRequest) -> ClientResult<AuthGrant> {
        let resp = self
            .http
            .post(format!("{}/auth", self.base_url))
            .json(request)
            .send()
            .await
            .map_err(transport_error)?;
        let auth: AuthResponse = self.read_json(resp).await?;

        {
            let mut token = self.token.write().await;
            *token = Some(auth.token.clone());
        }

        tracing::info!(expiry = %auth.expiry, "authenticated against authority");
        Ok(AuthGrant {
            token: auth.token,
            expiry: auth.expiry,
        })
    }

    async fn submit_invoice(&self, invoice: &WireInvoice) -> ClientResult<Authorization> {
        let resp: SubmitResponse = self.post_json("/invoices", invoice).await?;
        tracing::info!(
            type_code = invoice.type_code,
            number = invoice.number,
            "invoice accepted by authority"
        );
        Ok(Authorization {
            code: resp.authorization_code,
            expiry: resp.authorization_expiry,
        })
    }

    async fn submit_note(&self, note: &WireNote) -> ClientResult<Authorization> {
        let resp: SubmitResponse = self.post_json("/notes", note).await?;
        tracing::info!(
            type_code = note.document.type_code,
            number = note.document.number,
            "note accepted by authority"
        );
        Ok(Authorization {
            code: resp.authorization_code,
            expiry: resp.authorization_expiry,
        })
    }

    async fn query_document(&self, type_code: u16, number: u64) -> ClientResult<WireDocument> {
        let resp = self
            .get_response(&format!("/documents/{type_code}/{number}"))
            .await?;
        self.read_json(resp).await
    }

    async fn last_number(&self, type_code: u16) -> ClientResult<u64> {
        let resp = self
            .get_response(&format!("/documents/{type_code}/last-number"))
            .await?;
        let last: LastNumberResponse = self.read_json(resp).await?;
        Ok(last.number)
    }

    async fn download_pdf(&self, type_code: u16, number: u64) -> ClientResult<Vec<u8>> {
        let resp = self
            .get_response(&format!("/documents/{type_code}/{number}/pdf"))
            .await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(error_for_status(status, &body));
        }
        let bytes = resp.bytes().await.map_err(transport_error)?;
        Ok(bytes.to_vec())
    }

    async fn service_status(&self) -> ClientResult<ServiceAvailability> {
        let resp = self.get_response("/status").await?;
        self.read_json(resp).await
    }
}
