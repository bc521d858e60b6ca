pub mod account;
pub mod balance;
pub mod orders;

use actix_web::http::StatusCode;
use actix_web::{
    HttpResponse, Responder, ResponseError, body::BoxBody,
    dev::HttpServiceFactory, get, web,
};

use crate::store::StoreError;

pub fn api_services() -> impl HttpServiceFactory {
    web::scope("/api")
        .service(health_check)
        .service(
            web::scope("/user")
                .service(account::register)
                .service(account::login)
                .service(orders::upload_order)
                .service(orders::list_orders)
                .service(balance::get_balance)
                .service(balance::withdraw)
                .service(balance::list_withdrawals),
        )
}

#[get("/health_check")]
pub async fn health_check() -> impl Responder {
    HttpResponse::Ok().body("healthy")
}

#[derive(Debug, thiserror::Error)]
pub enum APIError {
    #[error("Authentication failed")]
    AuthError(#[source] anyhow::Error),
    #[error("Bad request")]
    BadRequest(#[source] anyhow::Error),
    #[error("Conflict")]
    Conflict(#[source] anyhow::Error),
    #[error("Insufficient funds")]
    InsufficientFunds,
    #[error("Unprocessable order number")]
    UnprocessableOrder(#[source] anyhow::Error),
    #[error("Something went wrong")]
    UnexpectedError(#[from] anyhow::Error),
}

impl ResponseError for APIError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::AuthError(_) => StatusCode::UNAUTHORIZED,
            Self::InsufficientFunds => StatusCode::PAYMENT_REQUIRED,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::UnprocessableOrder(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::UnexpectedError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Failure responses carry the status code only. Details (including
    /// driver-level error text) stay in the logs.
    fn error_response(&self) -> HttpResponse<BoxBody> {
        match self {
            Self::UnexpectedError(e) => tracing::error!("{e:#}"),
            other => tracing::info!("{other}"),
        }
        HttpResponse::new(self.status_code())
    }
}

impl From<StoreError> for APIError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotUnique(_) => APIError::Conflict(e.into()),
            StoreError::InsufficientFunds => APIError::InsufficientFunds,
            StoreError::AmountMustBePositive | StoreError::FieldTooLong => {
                APIError::BadRequest(e.into())
            }
            _ => APIError::UnexpectedError(e.into()),
        }
    }
}
