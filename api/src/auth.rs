//! Bearer-token authentication envelope.
//!
//! Registration and login answer with a signed token in the
//! `Authorization` response header; every protected endpoint expects the
//! token back in the `Authorization` request header and resolves it to the
//! login it was issued for. Handlers receive the result as an
//! [`AuthedUser`] extractor argument; absent or unresolvable tokens never
//! reach the handler and yield a 401.

use std::future::{Ready, ready};

use actix_web::http::header::AUTHORIZATION;
use actix_web::{FromRequest, HttpRequest, dev::Payload, web};
use anyhow::{Context, anyhow};
use jsonwebtoken::{
    Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode,
};
use secrecy::{ExposeSecret, SecretBox};
use serde::{Deserialize, Serialize};

use crate::routes::APIError;
use crate::time::TimeSource;

/// Token lifetime.
const TOKEN_TTL_SECS: i64 = 3 * 60 * 60;

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    /// The login the token was issued for
    sub: String,
    exp: i64,
    iat: i64,
}

/// Issues and verifies the tokens carried in the `Authorization` header.
pub struct TokenProvider {
    encoding: EncodingKey,
    decoding: DecodingKey,
    time_source: TimeSource,
}

impl TokenProvider {
    pub fn new(secret: SecretBox<String>, time_source: TimeSource) -> Self {
        let bytes = secret.expose_secret().as_bytes();
        Self {
            encoding: EncodingKey::from_secret(bytes),
            decoding: DecodingKey::from_secret(bytes),
            time_source,
        }
    }

    /// Sign a fresh token for the login.
    pub fn issue(&self, login: &str) -> anyhow::Result<String> {
        let now = self.time_source.now().as_second();
        let claims = Claims {
            sub: login.to_string(),
            exp: now + TOKEN_TTL_SECS,
            iat: now,
        };
        encode(&Header::default(), &claims, &self.encoding)
            .context("Failed to sign token")
    }

    /// Resolve a token back to the login it was issued for.
    pub fn verify(&self, token: &str) -> anyhow::Result<String> {
        let validation = Validation::new(Algorithm::HS256);
        let data = decode::<Claims>(token, &self.decoding, &validation)
            .context("Invalid bearer token")?;
        Ok(data.claims.sub)
    }
}

/// The authenticated caller, resolved from the `Authorization` header.
pub struct AuthedUser {
    pub login: String,
}

impl FromRequest for AuthedUser {
    type Error = actix_web::Error;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        ready(authed_user(req).map_err(Into::into))
    }
}

fn authed_user(req: &HttpRequest) -> Result<AuthedUser, APIError> {
    let provider =
        req.app_data::<web::Data<TokenProvider>>().ok_or_else(|| {
            APIError::UnexpectedError(anyhow!("token provider not configured"))
        })?;
    let header = req.headers().get(AUTHORIZATION).ok_or_else(|| {
        APIError::AuthError(anyhow!("missing Authorization header"))
    })?;
    let token = header.to_str().map_err(|e| {
        APIError::AuthError(
            anyhow::Error::from(e).context("malformed Authorization header"),
        )
    })?;
    // tokens are issued raw, but accept a conventional Bearer prefix too
    let token = token.strip_prefix("Bearer ").unwrap_or(token);
    let login = provider.verify(token).map_err(APIError::AuthError)?;
    Ok(AuthedUser { login })
}
