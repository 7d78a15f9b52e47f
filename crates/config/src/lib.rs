//! Credential and policy configuration.
//!
//! Non-secret settings live in a confy-managed config file; the certificate
//! bundle goes to the OS keychain and is never written to disk in clear.

use serde::{Deserialize, Serialize};

use fe_core::models::{CertificateBundle, Credentials, Environment};
use fe_core::{ClientError, ClientResult};

const APP_NAME: &str = "arfe-invoicing";
const KEYCHAIN_SERVICE: &str = "arfe.invoicing.credentials";
const CERTIFICATE_KEY: &str = "certificate";

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    pub tax_id: Option<u64>,
    pub legal_name: Option<String>,
    pub point_of_sale: Option<u32>,
    #[serde(default)]
    pub environment: Environment,
    /// Base URL of the authority gateway; None selects the built-in
    /// default for the environment.
    pub authority_url: Option<String>,
    /// Documents at or above this total must be issued electronically.
    /// Tracks regulatory changes, so it is a setting rather than a
    /// constant.
    pub electronic_threshold: Option<f64>,
}

impl AppConfig {
    /// Whether a document of the given total must go through the
    /// electronic channel.
    pub fn requires_electronic(&self, total: f64) -> bool {
        match self.electronic_threshold {
            Some(threshold) => total >= threshold,
            None => true,
        }
    }
}

fn config_err(e: impl std::fmt::Display) -> ClientError {
    ClientError::Storage(format!("config store: {e}"))
}

pub fn load() -> ClientResult<AppConfig> {
    confy::load(APP_NAME, None).map_err(config_err)
}

pub fn store(cfg: &AppConfig) -> ClientResult<()> {
    confy::store(APP_NAME, None, cfg).map_err(config_err)
}

/// Store the certificate bundle in the OS keychain.
pub fn store_certificate(bundle: &CertificateBundle) -> ClientResult<()> {
    let entry = keyring::Entry::new(KEYCHAIN_SERVICE, CERTIFICATE_KEY).map_err(config_err)?;
    let json = serde_json::to_string(bundle).map_err(config_err)?;
    entry.set_password(&json).map_err(config_err)?;
    Ok(())
}

/// Retrieve the certificate bundle; None when no certificate was saved.
pub fn get_certificate() -> ClientResult<Option<CertificateBundle>> {
    let entry = keyring::Entry::new(KEYCHAIN_SERVICE, CERTIFICATE_KEY).map_err(config_err)?;
    match entry.get_password() {
        Ok(json) => Ok(Some(serde_json::from_str(&json).map_err(config_err)?)),
        Err(keyring::Error::NoEntry) => Ok(None),
        Err(e) => Err(config_err(e)),
    }
}

pub fn delete_certificate() -> ClientResult<()> {
    let entry = keyring::Entry::new(KEYCHAIN_SERVICE, CERTIFICATE_KEY).map_err(config_err)?;
    match entry.delete_password() {
        Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
        Err(e) => Err(config_err(e)),
    }
}

/// Assemble full credentials from the config file and keychain. Fails with
/// a configuration error when the non-secret settings are incomplete; a
/// missing certificate is represented as `certificate: None` so the caller
/// can still run in offline mode.
pub fn load_credentials() -> ClientResult<Credentials> {
    let cfg = load()?;
    credentials_from(&cfg, get_certificate()?)
}

pub fn credentials_from(
    cfg: &AppConfig,
    certificate: Option<CertificateBundle>,
) -> ClientResult<Credentials> {
    let tax_id = cfg
        .tax_id
        .ok_or_else(|| ClientError::Configuration("tax id not configured".into()))?;
    let point_of_sale = cfg
        .point_of_sale
        .ok_or_else(|| ClientError::Configuration("point of sale not configured".into()))?;

    Ok(Credentials {
        tax_id,
        legal_name: cfg.legal_name.clone().unwrap_or_default(),
        point_of_sale,
        certificate,
        environment: cfg.environment,
    })
}
