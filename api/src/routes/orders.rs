use actix_web::http::header;
use actix_web::{HttpRequest, HttpResponse, get, post, web};
use anyhow::anyhow;
use sqlx::PgPool;

use crate::auth::AuthedUser;
use crate::luhn;
use crate::scheduler::AccrualScheduler;
use crate::store::{self, StoreError};
use crate::time::TimeSource;

use super::APIError;

/// The order number arrives as a raw text/plain body.
fn require_text_plain(request: &HttpRequest) -> Result<(), APIError> {
    let is_text_plain = request
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.contains("text/plain"));
    if is_text_plain {
        Ok(())
    } else {
        Err(APIError::BadRequest(anyhow!(
            "need header: 'Content-Type: text/plain'"
        )))
    }
}

#[tracing::instrument(
    skip_all,
    fields(login = tracing::field::Empty, order = tracing::field::Empty)
)]
#[post("/orders")]
pub async fn upload_order(
    request: HttpRequest,
    body: web::Bytes,
    user: AuthedUser,
    pool: web::Data<PgPool>,
    scheduler: web::Data<AccrualScheduler>,
    time_source: web::Data<TimeSource>,
) -> Result<HttpResponse, APIError> {
    tracing::Span::current()
        .record("login", tracing::field::display(&user.login));
    require_text_plain(&request)?;
    let number_str = std::str::from_utf8(&body)
        .map_err(|e| {
            APIError::BadRequest(
                anyhow::Error::from(e).context("body is not utf-8"),
            )
        })?
        .trim();
    tracing::Span::current()
        .record("order", tracing::field::display(number_str));

    if !luhn::is_valid(number_str) {
        return Err(APIError::UnprocessableOrder(anyhow!(
            "failed the Luhn check"
        )));
    }
    let number: i64 = number_str.parse().map_err(|e| {
        APIError::UnprocessableOrder(
            anyhow::Error::from(e).context("order number out of range"),
        )
    })?;

    match store::owner_of_order(number, &pool).await? {
        Some(owner) if owner == user.login => {
            // idempotent re-upload by the same user
            return Ok(HttpResponse::Ok().finish());
        }
        Some(_) => {
            return Err(APIError::Conflict(anyhow!(
                "order was uploaded by another user"
            )));
        }
        None => {}
    }

    let user_id = store::user_id_by_login(&user.login, &pool).await?;
    if let Err(e) =
        store::create_order(user_id, number, &pool, &time_source).await
    {
        // the unique constraint is the authoritative check; losing the
        // insert race means someone owns the number now
        return match e {
            StoreError::NotUnique(_) => {
                match store::owner_of_order(number, &pool).await? {
                    Some(owner) if owner == user.login => {
                        Ok(HttpResponse::Ok().finish())
                    }
                    _ => Err(APIError::Conflict(anyhow!(
                        "order was uploaded by another user"
                    ))),
                }
            }
            e => Err(e.into()),
        };
    }
    scheduler.enqueue(number).await;

    Ok(HttpResponse::Accepted().finish())
}

#[tracing::instrument(skip_all, fields(login = tracing::field::Empty))]
#[get("/orders")]
pub async fn list_orders(
    user: AuthedUser,
    pool: web::Data<PgPool>,
) -> Result<HttpResponse, APIError> {
    tracing::Span::current()
        .record("login", tracing::field::display(&user.login));
    let user_id = store::user_id_by_login(&user.login, &pool).await?;
    let orders = store::list_orders(user_id, &pool).await?;
    if orders.is_empty() {
        return Ok(HttpResponse::NoContent().finish());
    }
    Ok(HttpResponse::Ok().json(orders))
}
