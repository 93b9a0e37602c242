//! Credential source backed by configured OAuth clients and static key pairs.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use oauth2::basic::BasicClient;
use oauth2::{ClientId, ClientSecret, RefreshToken, TokenResponse, TokenUrl};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;

use strata_common::{Error, Result, SecretString};

use crate::credentials::{AccessToken, Credential, CredentialSource};

/// OAuth client settings for one provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OAuthClientSettings {
    pub client_id: String,
    #[serde(default)]
    pub client_secret: Option<SecretString>,
    /// Token endpoint of the identity provider.
    pub token_url: String,
    /// Long-lived refresh token. Replaced when the identity provider rotates it.
    pub refresh_token: SecretString,
}

/// Static access key pair for one provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StaticKeys {
    pub access_key_id: String,
    pub secret_access_key: SecretString,
}

/// Credential source that runs the OAuth2 refresh-token grant.
pub struct OAuthCredentialSource {
    http: oauth2::reqwest::Client,
    clients: RwLock<HashMap<String, OAuthClientSettings>>,
    keys: RwLock<HashMap<String, StaticKeys>>,
}

impl OAuthCredentialSource {
    /// Create an empty source.
    ///
    /// # Errors
    /// - HTTP client construction failed
    pub fn new() -> Result<Self> {
        // Token endpoints are never followed through redirects.
        let http = oauth2::reqwest::Client::builder()
            .redirect(oauth2::reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| Error::Network(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http,
            clients: RwLock::new(HashMap::new()),
            keys: RwLock::new(HashMap::new()),
        })
    }

    /// Configure OAuth for a provider, replacing earlier settings.
    ///
    /// # Errors
    /// - `InvalidInput` if the token URL does not parse
    pub fn add_oauth(
        &self,
        provider: impl Into<String>,
        settings: OAuthClientSettings,
    ) -> Result<()> {
        TokenUrl::new(settings.token_url.clone())
            .map_err(|e| Error::InvalidInput(format!("Invalid token URL: {}", e)))?;
        self.clients.write().insert(provider.into(), settings);
        Ok(())
    }

    /// Configure a static key pair for a provider.
    pub fn add_keys(&self, provider: impl Into<String>, keys: StaticKeys) {
        self.keys.write().insert(provider.into(), keys);
    }

    /// Current refresh token for a provider.
    pub fn refresh_token(&self, provider: &str) -> Option<SecretString> {
        self.clients
            .read()
            .get(provider)
            .map(|s| s.refresh_token.clone())
    }
}

#[async_trait]
impl CredentialSource for OAuthCredentialSource {
    async fn get_credential(&self, provider: &str) -> Result<Credential> {
        if let Some(keys) = self.keys.read().get(provider) {
            return Ok(Credential::Keys {
                access_key_id: keys.access_key_id.clone(),
                secret_access_key: keys.secret_access_key.clone(),
            });
        }
        Err(Error::Authentication(format!(
            "No stored credential for '{}'",
            provider
        )))
    }

    async fn refresh_credential(&self, provider: &str) -> Result<AccessToken> {
        let settings = self.clients.read().get(provider).cloned().ok_or_else(|| {
            Error::Authentication(format!("No OAuth client configured for '{}'", provider))
        })?;

        let token_url = TokenUrl::new(settings.token_url.clone())
            .map_err(|e| Error::InvalidInput(format!("Invalid token URL: {}", e)))?;
        let mut client =
            BasicClient::new(ClientId::new(settings.client_id.clone())).set_token_uri(token_url);
        if let Some(secret) = &settings.client_secret {
            client = client.set_client_secret(ClientSecret::new(secret.expose().to_string()));
        }

        let response = client
            .exchange_refresh_token(&RefreshToken::new(settings.refresh_token.expose().to_string()))
            .request_async(&self.http)
            .await
            .map_err(|e| Error::Authentication(format!("Token refresh failed: {}", e)))?;

        // Identity providers may rotate the refresh token.
        if let Some(rotated) = response.refresh_token() {
            debug!("Refresh token rotated for '{}'", provider);
            if let Some(stored) = self.clients.write().get_mut(provider) {
                stored.refresh_token = SecretString::new(rotated.secret().clone());
            }
        }

        let expires_in = response
            .expires_in()
            .unwrap_or_else(|| std::time::Duration::from_secs(3600));
        let expires_at =
            Utc::now() + Duration::from_std(expires_in).unwrap_or_else(|_| Duration::hours(1));

        Ok(AccessToken {
            token: SecretString::new(response.access_token().secret().clone()),
            expires_at: Some(expires_at),
        })
    }
}
