use actix_web::{HttpResponse, get, post, web};
use anyhow::anyhow;
use sqlx::PgPool;

use payloads::requests::Withdraw;

use crate::AppConfig;
use crate::auth::AuthedUser;
use crate::luhn;
use crate::store::{self, balance};
use crate::time::TimeSource;

use super::APIError;

#[tracing::instrument(skip_all, fields(login = tracing::field::Empty))]
#[get("/balance")]
pub async fn get_balance(
    user: AuthedUser,
    pool: web::Data<PgPool>,
) -> Result<HttpResponse, APIError> {
    tracing::Span::current()
        .record("login", tracing::field::display(&user.login));
    let user_id = store::user_id_by_login(&user.login, &pool).await?;
    let balance = balance::balance_of(user_id, &pool).await?;
    Ok(HttpResponse::Ok().json(balance))
}

#[tracing::instrument(
    skip_all,
    fields(login = tracing::field::Empty, order = %details.order)
)]
#[post("/balance/withdraw")]
pub async fn withdraw(
    details: web::Json<Withdraw>,
    user: AuthedUser,
    pool: web::Data<PgPool>,
    time_source: web::Data<TimeSource>,
    app_config: web::Data<AppConfig>,
) -> Result<HttpResponse, APIError> {
    tracing::Span::current()
        .record("login", tracing::field::display(&user.login));
    let details = details.into_inner();
    let order_number: i64 = details.order.parse().map_err(|e| {
        APIError::BadRequest(
            anyhow::Error::from(e).context("order is not a number"),
        )
    })?;
    if !luhn::is_valid(&details.order) {
        return Err(APIError::UnprocessableOrder(anyhow!(
            "failed the Luhn check"
        )));
    }

    let user_id = store::user_id_by_login(&user.login, &pool).await?;

    if app_config.require_debit_ownership
        && let Some(owner) = store::owner_of_order(order_number, &pool).await?
        && owner != user.login
    {
        return Err(APIError::UnprocessableOrder(anyhow!(
            "order belongs to another user"
        )));
    }

    balance::debit(user_id, order_number, details.sum, &pool, &time_source)
        .await?;

    Ok(HttpResponse::Ok().finish())
}

#[tracing::instrument(skip_all, fields(login = tracing::field::Empty))]
#[get("/withdrawals")]
pub async fn list_withdrawals(
    user: AuthedUser,
    pool: web::Data<PgPool>,
) -> Result<HttpResponse, APIError> {
    tracing::Span::current()
        .record("login", tracing::field::display(&user.login));
    let user_id = store::user_id_by_login(&user.login, &pool).await?;
    let withdrawals = balance::list_debits(user_id, &pool).await?;
    if withdrawals.is_empty() {
        return Ok(HttpResponse::NoContent().finish());
    }
    Ok(HttpResponse::Ok().json(withdrawals))
}
