use async_trait::async_trait;
use crate::responses;
use aws_sdk_cognitoidentityprovider::types::AuthFlowType;
use aws_sdk_cognitoidentityprovider::Client as CognitoClient;
use base64::{engine::general_purpose, Engine as _};
use hmac::{Hmac, Mac};
use lambda_http::{http::StatusCode, Body, Error, Response};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

/// Where the console goes after a successful sign-in
pub const DASHBOARD_PATH: &str = "/dashboard";

#[derive(Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Session {
    pub id_token: String,
    pub access_token: String,
    pub refresh_token: String,
    pub expires_in: i32,
}

#[derive(Serialize)]
pub struct LoginResponse {
    #[serde(flatten)]
    pub session: Session,
    pub redirect_to: &'static str,
}

/// Failure kinds the console tells apart
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignInFailure {
    /// Unknown user or wrong password
    InvalidCredential,
    Other,
}

impl SignInFailure {
    pub fn code(self) -> &'static str {
        match self {
            SignInFailure::InvalidCredential => "InvalidCredential",
            SignInFailure::Other => "SignInFailed",
        }
    }

    /// Message shown on the login form
    pub fn message(self) -> &'static str {
        match self {
            SignInFailure::InvalidCredential => "Неверный email или пароль",
            SignInFailure::Other => "Ошибка при входе. Пожалуйста, попробуйте снова.",
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("sign-in failed ({kind:?}): {detail}")]
pub struct SignInError {
    pub kind: SignInFailure,
    detail: String,
}

impl SignInError {
    pub fn new(kind: SignInFailure, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
        }
    }
}

/// External identity service
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn sign_in(&self, email: &str, password: &str) -> Result<Session, SignInError>;
}

type HmacSha256 = Hmac<Sha256>;

/// Compute the SECRET_HASH Cognito expects from app clients with a secret
fn compute_secret_hash(
    username: &str,
    client_id: &str,
    client_secret: &str,
) -> Result<String, SignInError> {
    let message = format!("{}{}", username, client_id);
    let mut mac = HmacSha256::new_from_slice(client_secret.as_bytes())
        .map_err(|e| SignInError::new(SignInFailure::Other, e.to_string()))?;
    mac.update(message.as_bytes());
    let result = mac.finalize();
    Ok(general_purpose::STANDARD.encode(result.into_bytes()))
}

#[derive(Debug, Clone)]
pub struct CognitoIdentity {
    client: CognitoClient,
    client_id: String,
    client_secret: Option<String>,
}

impl CognitoIdentity {
    pub fn new(client: CognitoClient, client_id: String, client_secret: Option<String>) -> Self {
        Self {
            client,
            client_id,
            client_secret,
        }
    }
}

#[async_trait]
impl IdentityProvider for CognitoIdentity {
    async fn sign_in(&self, email: &str, password: &str) -> Result<Session, SignInError> {
        let mut request = self
            .client
            .initiate_auth()
            .auth_flow(AuthFlowType::UserPasswordAuth)
            .client_id(&self.client_id)
            .auth_parameters("USERNAME", email)
            .auth_parameters("PASSWORD", password);

        if let Some(secret) = &self.client_secret {
            let secret_hash = compute_secret_hash(email, &self.client_id, secret)?;
            request = request.auth_parameters("SECRET_HASH", secret_hash);
        }

        match request.send().await {
            Ok(response) => match response.authentication_result() {
                Some(result) => Ok(Session {
                    id_token: result.id_token().unwrap_or_default().to_string(),
                    access_token: result.access_token().unwrap_or_default().to_string(),
                    refresh_token: result.refresh_token().unwrap_or_default().to_string(),
                    expires_in: result.expires_in(),
                }),
                // Challenges (new password, MFA) are not supported by the console
                None => Err(SignInError::new(
                    SignInFailure::Other,
                    format!("unexpected challenge {:?}", response.challenge_name()),
                )),
            },
            Err(e) => {
                let invalid_credential = e.as_service_error().is_some_and(|se| {
                    se.is_not_authorized_exception() || se.is_user_not_found_exception()
                });
                let kind = if invalid_credential {
                    SignInFailure::InvalidCredential
                } else {
                    SignInFailure::Other
                };
                Err(SignInError::new(kind, format!("{:?}", e)))
            }
        }
    }
}

/// Handle `POST /api/auth/login`
pub async fn login<I: IdentityProvider>(identity: &I, body: &[u8]) -> Result<Response<Body>, Error> {
    tracing::info!("Login request received");

    let request: LoginRequest = match responses::parse_body(body) {
        Ok(req) => req,
        Err(resp) => return resp,
    };

    let email = request.email.trim();
    if email.is_empty() || request.password.is_empty() {
        return responses::error(
            StatusCode::BAD_REQUEST,
            "InvalidRequest",
            "Email and password are required",
        );
    }

    tracing::info!("Authenticating user: {}", email);

    match identity.sign_in(email, &request.password).await {
        Ok(session) => {
            tracing::info!("Authentication successful for user: {}", email);
            responses::json(
                StatusCode::OK,
                &LoginResponse {
                    session,
                    redirect_to: DASHBOARD_PATH,
                },
            )
        }
        Err(e) => {
            tracing::warn!("Authentication failed for user {}: {}", email, e);
            responses::error(StatusCode::UNAUTHORIZED, e.kind.code(), e.kind.message())
        }
    }
}
