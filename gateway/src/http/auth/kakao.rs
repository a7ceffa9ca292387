//! Kakao as the identity provider: authorize URL, code exchange and profile lookup.
//!
//! Every response is deserialised into a typed struct and validated before the login flow
//! sees it.

use core::future::Future;

use reqwest::redirect::Policy;
use secrecy::{ExposeSecret as _, SecretString};
use serde::Deserialize;
use thiserror::Error;
use url::Url;

use crate::{app::db::CredentialProfile, config::KakaoSettings};

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("{operation} request failed")]
    Transport {
        operation: &'static str,
        #[source]
        source: reqwest::Error,
    },
    #[error("{operation} returned HTTP {status}")]
    Status { operation: &'static str, status: u16 },
    #[error("{operation} returned an invalid body: {reason}")]
    Schema {
        operation: &'static str,
        reason: &'static str,
    },
}

/// Token endpoint response.
#[derive(Debug, Deserialize)]
pub struct KakaoToken {
    pub access_token: SecretString,
    pub token_type: String,
    pub expires_in: i64,
    #[serde(default)]
    pub refresh_token: Option<SecretString>,
    #[serde(default)]
    pub scope: Option<String>,
}

impl KakaoToken {
    /// # Errors
    ///
    /// Returns the name of the first rule the response breaks.
    pub fn validate(self) -> Result<Self, &'static str> {
        if self.access_token.expose_secret().is_empty() {
            return Err("access_token is empty");
        }
        if self.token_type != "bearer" {
            return Err("token_type is not bearer");
        }
        if self.expires_in <= 0 {
            return Err("expires_in is not positive");
        }
        Ok(self)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct KakaoProfile {
    #[serde(default)]
    pub nickname: Option<String>,
    #[serde(default)]
    pub profile_image_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct KakaoAccount {
    #[serde(default)]
    pub profile: Option<KakaoProfile>,
    #[serde(default)]
    pub email: Option<String>,
}

/// `/v2/user/me` response, reduced to the fields the gateway stores.
#[derive(Debug, Clone, Deserialize)]
pub struct KakaoUser {
    pub id: i64,
    #[serde(default)]
    pub kakao_account: Option<KakaoAccount>,
}

impl KakaoUser {
    /// # Errors
    ///
    /// Returns the name of the first rule the response breaks.
    pub fn validate(self) -> Result<Self, &'static str> {
        if self.id <= 0 {
            return Err("id is not positive");
        }
        if let Some(ref account) = self.kakao_account {
            if let Some(ref email) = account.email
                && !looks_like_email(email)
            {
                return Err("email is malformed");
            }
            if let Some(ref url) = account
                .profile
                .as_ref()
                .and_then(|p| p.profile_image_url.as_ref())
                && Url::parse(url).is_err()
            {
                return Err("profile_image_url is not a URL");
            }
        }
        Ok(self)
    }

    #[must_use]
    pub fn into_profile(self) -> CredentialProfile {
        let (email, profile) = self
            .kakao_account
            .map_or((None, None), |a| (a.email, a.profile));
        let (name, profile_url) = profile.map_or((None, None), |p| {
            (
                p.nickname.filter(|n| !n.is_empty()),
                p.profile_image_url,
            )
        });
        CredentialProfile {
            kakao_id: self.id.to_string(),
            email: email.filter(|e| !e.is_empty()),
            name,
            profile_url,
        }
    }
}

fn looks_like_email(email: &str) -> bool {
    email
        .split_once('@')
        .is_some_and(|(local, domain)| !local.is_empty() && domain.contains('.'))
}

/// The three interactions the login flow needs from an OAuth provider.
pub trait IdentityProvider: Send + Sync + 'static {
    /// Browser redirect target carrying `state`.
    fn authorize_url(&self, state: &str) -> Url;

    fn exchange_code(
        &self,
        code: &str,
    ) -> impl Future<Output = Result<KakaoToken, ProviderError>> + Send;

    fn fetch_profile(
        &self,
        access_token: &SecretString,
    ) -> impl Future<Output = Result<KakaoUser, ProviderError>> + Send;
}

pub struct KakaoClient {
    settings: KakaoSettings,
    http: reqwest::Client,
}

impl KakaoClient {
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(settings: KakaoSettings) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder()
            .redirect(Policy::none())
            .timeout(settings.timeout)
            .build()?;
        Ok(Self { settings, http })
    }

    /// Checks HTTP response status; returns the response on success.
    async fn ensure_success(
        response: reqwest::Response,
        operation: &'static str,
    ) -> Result<reqwest::Response, ProviderError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        tracing::error!(operation, status = status.as_u16(), body = %body.chars().take(200).collect::<String>(), "Provider rejected request");
        Err(ProviderError::Status {
            operation,
            status: status.as_u16(),
        })
    }

    async fn read_json<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
        operation: &'static str,
    ) -> Result<T, ProviderError> {
        response.json::<T>().await.map_err(|e| {
            tracing::error!(operation, error = %e, "Provider returned unparseable body");
            ProviderError::Schema {
                operation,
                reason: "body does not match the expected shape",
            }
        })
    }
}

impl IdentityProvider for KakaoClient {
    fn authorize_url(&self, state: &str) -> Url {
        let mut url = self.settings.authorize_url.clone();
        url.query_pairs_mut()
            .append_pair("client_id", &self.settings.client_id)
            .append_pair("redirect_uri", self.settings.redirect_uri.as_str())
            .append_pair("response_type", "code")
            .append_pair("scope", &self.settings.scope)
            .append_pair("state", state);
        url
    }

    async fn exchange_code(&self, code: &str) -> Result<KakaoToken, ProviderError> {
        const OPERATION: &str = "token exchange";
        let params = [
            ("grant_type", "authorization_code"),
            ("client_id", self.settings.client_id.as_str()),
            ("client_secret", self.settings.client_secret.expose_secret()),
            ("code", code),
            ("redirect_uri", self.settings.redirect_uri.as_str()),
        ];
        let response = self
            .http
            .post(self.settings.token_url.clone())
            .form(&params)
            .send()
            .await
            .map_err(|source| ProviderError::Transport {
                operation: OPERATION,
                source,
            })?;
        let response = Self::ensure_success(response, OPERATION).await?;
        Self::read_json::<KakaoToken>(response, OPERATION)
            .await?
            .validate()
            .map_err(|reason| ProviderError::Schema {
                operation: OPERATION,
                reason,
            })
    }

    async fn fetch_profile(&self, access_token: &SecretString) -> Result<KakaoUser, ProviderError> {
        const OPERATION: &str = "profile lookup";
        let response = self
            .http
            .get(self.settings.user_info_url.clone())
            .bearer_auth(access_token.expose_secret())
            .send()
            .await
            .map_err(|source| ProviderError::Transport {
                operation: OPERATION,
                source,
            })?;
        let response = Self::ensure_success(response, OPERATION).await?;
        Self::read_json::<KakaoUser>(response, OPERATION)
            .await?
            .validate()
            .map_err(|reason| ProviderError::Schema {
                operation: OPERATION,
                reason,
            })
    }
}
