//! Firebase Authentication through the Identity Toolkit REST API.
//!
//! Email/password accounts only. The client keeps the signed-in user's ID
//! token in an [`IdToken`] shared with the Firestore and Storage adapters,
//! and publishes the principal on a watch channel.

use async_trait::async_trait;
use lostfound_common::{codes, AuthUser, IdentityService, RemoteError};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, info};

use crate::client::{read_failure, transport_error, ApiFailure, FirebaseEndpoints, IdToken};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PasswordRequest<'a> {
    email: &'a str,
    password: &'a str,
    return_secure_token: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct UpdateRequest<'a> {
    id_token: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    display_name: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    photo_url: Option<&'a str>,
    return_secure_token: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct OobRequest<'a> {
    request_type: &'a str,
    email: &'a str,
}

/// Account fields returned by signUp, signInWithPassword and update.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AccountResponse {
    local_id: String,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    display_name: Option<String>,
    #[serde(default)]
    photo_url: Option<String>,
    #[serde(default)]
    id_token: Option<String>,
}

impl AccountResponse {
    fn principal(&self) -> AuthUser {
        AuthUser {
            uid: self.local_id.clone(),
            email: self.email.clone(),
            display_name: self.display_name.clone().filter(|n| !n.is_empty()),
            photo_url: self.photo_url.clone().filter(|u| !u.is_empty()),
        }
    }
}

/// Maps an Identity Toolkit error message to an `auth/*` code. Messages
/// look like `WEAK_PASSWORD : Password should be at least 6 characters`.
pub fn auth_error_code(message: &str) -> &'static str {
    let key = message.split(':').next().unwrap_or_default().trim();
    match key {
        "EMAIL_EXISTS" => codes::AUTH_EMAIL_IN_USE,
        "INVALID_PASSWORD" => codes::AUTH_WRONG_PASSWORD,
        "EMAIL_NOT_FOUND" => codes::AUTH_USER_NOT_FOUND,
        "USER_NOT_FOUND" => codes::AUTH_USER_NOT_FOUND,
        "INVALID_LOGIN_CREDENTIALS" => codes::AUTH_INVALID_CREDENTIAL,
        "INVALID_EMAIL" => codes::AUTH_INVALID_EMAIL,
        "USER_DISABLED" => codes::AUTH_USER_DISABLED,
        "TOO_MANY_ATTEMPTS_TRY_LATER" => codes::AUTH_TOO_MANY_REQUESTS,
        "WEAK_PASSWORD" => codes::AUTH_WEAK_PASSWORD,
        "CREDENTIAL_TOO_OLD_LOGIN_AGAIN" => codes::AUTH_REQUIRES_RECENT_LOGIN,
        "TOKEN_EXPIRED" | "INVALID_ID_TOKEN" => codes::AUTH_REQUIRES_RECENT_LOGIN,
        _ => codes::UNKNOWN,
    }
}

fn auth_failure(failure: ApiFailure) -> RemoteError {
    if failure.http_status >= 500 {
        return RemoteError::new(codes::AUTH_NETWORK, failure.message);
    }
    RemoteError::new(auth_error_code(&failure.message), failure.message)
}

/// Identity service backed by Firebase Authentication.
pub struct FirebaseAuthClient {
    http: Client,
    base_url: String,
    api_key: String,
    token: IdToken,
    state: watch::Sender<Option<AuthUser>>,
}

impl FirebaseAuthClient {
    pub fn new(http: Client, endpoints: &FirebaseEndpoints, token: IdToken) -> Self {
        let (state, _) = watch::channel(None);
        Self {
            http,
            base_url: endpoints.auth_base_url.clone(),
            api_key: endpoints.api_key.clone(),
            token,
            state,
        }
    }

    fn url(&self, method: &str) -> String {
        format!(
            "{}/accounts:{}?key={}",
            self.base_url,
            method,
            urlencoding::encode(&self.api_key)
        )
    }

    async fn call<B: Serialize + ?Sized>(
        &self,
        method: &str,
        body: &B,
    ) -> Result<reqwest::Response, RemoteError> {
        let response = self
            .http
            .post(self.url(method))
            .json(body)
            .send()
            .await
            .map_err(|e| transport_error(e, codes::AUTH_NETWORK))?;
        if !response.status().is_success() {
            return Err(auth_failure(read_failure(response).await));
        }
        Ok(response)
    }

    async fn account_call<B: Serialize + ?Sized>(
        &self,
        method: &str,
        body: &B,
    ) -> Result<AccountResponse, RemoteError> {
        self.call(method, body)
            .await?
            .json::<AccountResponse>()
            .await
            .map_err(|e| RemoteError::new(codes::UNKNOWN, e.to_string()))
    }

    /// Stores the session and publishes the principal.
    fn establish(&self, account: &AccountResponse) -> AuthUser {
        if let Some(token) = &account.id_token {
            self.token.set(Some(token.clone()));
        }
        let principal = account.principal();
        self.state.send_replace(Some(principal.clone()));
        principal
    }
}

#[async_trait]
impl IdentityService for FirebaseAuthClient {
    async fn sign_up(&self, email: &str, password: &str) -> Result<AuthUser, RemoteError> {
        let account = self
            .account_call(
                "signUp",
                &PasswordRequest {
                    email,
                    password,
                    return_secure_token: true,
                },
            )
            .await?;
        info!("created account {}", account.local_id);
        Ok(self.establish(&account))
    }

    async fn sign_in(&self, email: &str, password: &str) -> Result<AuthUser, RemoteError> {
        let account = self
            .account_call(
                "signInWithPassword",
                &PasswordRequest {
                    email,
                    password,
                    return_secure_token: true,
                },
            )
            .await?;
        debug!("signed in {}", account.local_id);
        Ok(self.establish(&account))
    }

    /// Sign-out is local: the ID token is dropped and expires on its own.
    async fn sign_out(&self) -> Result<(), RemoteError> {
        self.token.set(None);
        self.state.send_replace(None);
        Ok(())
    }

    async fn update_profile(
        &self,
        display_name: Option<&str>,
        photo_url: Option<&str>,
    ) -> Result<(), RemoteError> {
        let id_token = self
            .token
            .get()
            .ok_or_else(|| RemoteError::new(codes::AUTH_NO_SESSION, "No signed-in user"))?;
        let account = self
            .account_call(
                "update",
                &UpdateRequest {
                    id_token: &id_token,
                    display_name,
                    photo_url,
                    return_secure_token: true,
                },
            )
            .await?;
        self.establish(&account);
        Ok(())
    }

    async fn send_password_reset(&self, email: &str) -> Result<(), RemoteError> {
        self.call(
            "sendOobCode",
            &OobRequest {
                request_type: "PASSWORD_RESET",
                email,
            },
        )
        .await?;
        Ok(())
    }

    fn current_user(&self) -> Option<AuthUser> {
        self.state.borrow().clone()
    }

    fn auth_state(&self) -> watch::Receiver<Option<AuthUser>> {
        self.state.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_error_codes() {
        assert_eq!(auth_error_code("EMAIL_EXISTS"), codes::AUTH_EMAIL_IN_USE);
        assert_eq!(
            auth_error_code("WEAK_PASSWORD : Password should be at least 6 characters"),
            codes::AUTH_WEAK_PASSWORD
        );
        assert_eq!(
            auth_error_code("INVALID_LOGIN_CREDENTIALS"),
            codes::AUTH_INVALID_CREDENTIAL
        );
        assert_eq!(
            auth_error_code("CREDENTIAL_TOO_OLD_LOGIN_AGAIN"),
            codes::AUTH_REQUIRES_RECENT_LOGIN
        );
        assert_eq!(auth_error_code("SOMETHING_NEW"), codes::UNKNOWN);
    }

    #[test]
    fn test_server_errors_count_as_network() {
        let err = auth_failure(ApiFailure {
            http_status: 503,
            status: None,
            message: "backend down".into(),
        });
        assert!(err.is_network());
    }
}
