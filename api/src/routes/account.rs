use actix_web::http::header;
use actix_web::{HttpResponse, post, web};
use anyhow::anyhow;
use sqlx::PgPool;

use payloads::requests::Credentials;

use crate::auth::TokenProvider;
use crate::time::TimeSource;
use crate::{password, store};

use super::APIError;

#[tracing::instrument(
    skip(credentials, pool, tokens, time_source),
    fields(login = tracing::field::Empty)
)]
#[post("/register")]
pub async fn register(
    credentials: web::Json<Credentials>,
    pool: web::Data<PgPool>,
    tokens: web::Data<TokenProvider>,
    time_source: web::Data<TimeSource>,
) -> Result<HttpResponse, APIError> {
    tracing::Span::current()
        .record("login", tracing::field::display(&credentials.login));
    let Credentials { login: user_login, password } = credentials.into_inner();
    if user_login.is_empty() || password.is_empty() {
        return Err(APIError::BadRequest(anyhow!("empty login or password")));
    }

    if store::is_user_registered(&user_login, &pool).await? {
        return Err(APIError::Conflict(anyhow!("login is already taken")));
    }

    let digest = password::digest(&password);
    let token = tokens.issue(&user_login).map_err(APIError::UnexpectedError)?;
    // racing registrations of the same login surface here as a conflict
    store::create_user(&user_login, &digest, &token, &pool, &time_source).await?;

    Ok(HttpResponse::Ok()
        .insert_header((header::AUTHORIZATION, token))
        .finish())
}

#[tracing::instrument(
    skip(credentials, pool, tokens),
    fields(login = tracing::field::Empty)
)]
#[post("/login")]
pub async fn login(
    credentials: web::Json<Credentials>,
    pool: web::Data<PgPool>,
    tokens: web::Data<TokenProvider>,
) -> Result<HttpResponse, APIError> {
    tracing::Span::current()
        .record("login", tracing::field::display(&credentials.login));
    let Credentials { login: user_login, password } = credentials.into_inner();
    if user_login.is_empty() || password.is_empty() {
        return Err(APIError::BadRequest(anyhow!("empty login or password")));
    }

    let digest = password::digest(&password);
    if !store::authenticate(&user_login, &digest, &pool).await? {
        return Err(APIError::AuthError(anyhow!("bad login or password")));
    }

    let token = tokens.issue(&user_login).map_err(APIError::UnexpectedError)?;
    store::rotate_token(&user_login, &token, &pool).await?;

    Ok(HttpResponse::Ok()
        .insert_header((header::AUTHORIZATION, token))
        .finish())
}
