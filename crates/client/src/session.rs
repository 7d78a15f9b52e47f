//! Bearer session lifecycle against the authority.
//!
//! Expiry is inferred lazily on access, never polled. A refresh failure
//! leaves the session unauthenticated; callers gate on `is_ready` rather
//! than the refresh result.

use std::sync::Arc;

use chrono::Utc;

use authority::{AuthRequest, AuthorityClient};
use fe_core::models::{Credentials, Session};
use fe_core::{ClientError, ClientResult};

use crate::store::RecordStore;

pub const SESSION_CONFIG_KEY: &str = "session";

pub struct AuthenticationSession {
    credentials: Credentials,
    session: Option<Session>,
    authority: Arc<dyn AuthorityClient>,
    store: Arc<dyn RecordStore>,
}

impl AuthenticationSession {
    pub fn new(
        credentials: Credentials,
        authority: Arc<dyn AuthorityClient>,
        store: Arc<dyn RecordStore>,
    ) -> Self {
        Self {
            credentials,
            session: None,
            authority,
            store,
        }
    }

    /// Restore a cached session if one is still valid for this
    /// environment, otherwise attempt a refresh. The refresh outcome is
    /// reported through `is_ready`, not an error.
    pub async fn load(
        credentials: Credentials,
        authority: Arc<dyn AuthorityClient>,
        store: Arc<dyn RecordStore>,
    ) -> Self {
        let mut this = Self::new(credentials, authority, store);

        match this.store.get_config(SESSION_CONFIG_KEY).await {
            Ok(Some(json)) => match serde_json::from_str::<Session>(&json) {
                Ok(cached)
                    if cached.environment == this.credentials.environment
                        && cached.is_valid(Utc::now()) =>
                {
                    tracing::debug!(expiry = %cached.expiry, "restored cached session");
                    this.session = Some(cached);
                    return this;
                }
                Ok(_) => tracing::debug!("cached session stale, refreshing"),
                Err(e) => tracing::warn!(error = %e, "cached session unreadable"),
            },
            Ok(None) => {}
            Err(e) => tracing::warn!(error = %e, "failed to read cached session"),
        }

        if let Err(e) = this.refresh().await {
            tracing::warn!(error = %e, "initial session refresh failed");
        }
        this
    }

    /// Obtain a fresh token. Requires the certificate bundle; without one
    /// this fails before any network call.
    pub async fn refresh(&mut self) -> ClientResult<()> {
        let certificate = self.credentials.certificate.clone().ok_or_else(|| {
            ClientError::Configuration("certificate bundle not installed".into())
        })?;

        let request = AuthRequest {
            tax_id: self.credentials.tax_id,
            certificate,
            environment: self.credentials.environment,
        };

        match self.authority.authenticate(&request).await {
            Ok(grant) => {
                let session = Session {
                    token: grant.token,
                    expiry: grant.expiry,
                    environment: self.credentials.environment,
                };
                if let Ok(json) = serde_json::to_string(&session) {
                    if let Err(e) = self.store.save_config(SESSION_CONFIG_KEY, &json).await {
                        tracing::warn!(error = %e, "failed to cache session");
                    }
                }
                tracing::info!(expiry = %session.expiry, "session refreshed");
                self.session = Some(session);
                Ok(())
            }
            Err(e) => {
                self.session = None;
                tracing::warn!(error = %e, "session refresh rejected");
                Err(e)
            }
        }
    }

    /// Ready to submit: credentials complete and either a live token or
    /// offline mode, since offline submissions defer authentication to
    /// replay time.
    pub fn is_ready(&self, offline: bool) -> bool {
        if !self.credentials.is_complete() {
            return false;
        }
        if offline {
            return true;
        }
        self.session
            .as_ref()
            .map(|s| s.is_valid(Utc::now()))
            .unwrap_or(false)
    }

    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use authority::mock::MockAuthorityClient;
    use chrono::Duration;
    use fe_core::models::{CertificateBundle, Environment};

    fn credentials(with_cert: bool) -> Credentials {
        Credentials {
            tax_id: 20111111112,
            legal_name: "Test SA".into(),
            point_of_sale: 1,
            certificate: with_cert.then(|| CertificateBundle {
                certificate_pem: "---cert---".into(),
                private_key_pem: "---key---".into(),
            }),
            environment: Environment::Test,
        }
    }

    #[tokio::test]
    async fn missing_certificate_fails_without_network_call() {
        let mock = MockAuthorityClient::new();
        let mut session =
            AuthenticationSession::new(credentials(false), mock.clone(), MemoryStore::new());

        let err = session.refresh().await.unwrap_err();
        assert!(matches!(err, ClientError::Configuration(_)));
        assert!(!session.is_ready(false));
        assert!(mock.calls().is_empty());
    }

    #[tokio::test]
    async fn refresh_persists_session() {
        let mock = MockAuthorityClient::new();
        let store = MemoryStore::new();
        let mut session =
            AuthenticationSession::new(credentials(true), mock.clone(), store.clone());

        session.refresh().await.unwrap();
        assert!(session.is_ready(false));
        assert!(store
            .get_config(SESSION_CONFIG_KEY)
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn expired_token_not_ready_online_but_ready_offline() {
        let store = MemoryStore::new();
        let expired = Session {
            token: "stale".into(),
            expiry: Utc::now() - Duration::minutes(1),
            environment: Environment::Test,
        };
        store
            .save_config(SESSION_CONFIG_KEY, &serde_json::to_string(&expired).unwrap())
            .await
            .unwrap();

        let mock = MockAuthorityClient::new();
        // Refresh on load fails: the authority is unreachable.
        mock.script_auth(Err(ClientError::Connectivity("down".into())));

        let session =
            AuthenticationSession::load(credentials(true), mock.clone(), store).await;
        assert!(!session.is_ready(false));
        assert!(session.is_ready(true));
    }

    #[tokio::test]
    async fn valid_cached_session_restored_without_refresh() {
        let store = MemoryStore::new();
        let live = Session {
            token: "live".into(),
            expiry: Utc::now() + Duration::hours(2),
            environment: Environment::Test,
        };
        store
            .save_config(SESSION_CONFIG_KEY, &serde_json::to_string(&live).unwrap())
            .await
            .unwrap();

        let mock = MockAuthorityClient::new();
        let session = AuthenticationSession::load(credentials(true), mock.clone(), store).await;

        assert!(session.is_ready(false));
        assert!(mock.calls().is_empty());
        assert_eq!(session.session().unwrap().token, "live");
    }

    #[tokio::test]
    async fn failed_refresh_clears_previous_session() {
        let mock = MockAuthorityClient::new();
        let mut session =
            AuthenticationSession::new(credentials(true), mock.clone(), MemoryStore::new());
        session.refresh().await.unwrap();
        assert!(session.is_ready(false));

        mock.script_auth(Err(ClientError::Authentication("revoked".into())));
        assert!(session.refresh().await.is_err());
        assert!(!session.is_ready(false));
        assert!(session.session().is_none());
    }
}
