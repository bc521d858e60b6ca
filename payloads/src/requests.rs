use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

pub const LOGIN_MAX_LEN: usize = 255;

/// Body for both registration and login.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credentials {
    pub login: String,
    pub password: String,
}

/// Body for `POST /api/user/balance/withdraw`. The order number is the one
/// the customer intends to pay for with points; it is Luhn-checked but does
/// not need to have been uploaded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Withdraw {
    pub order: String,
    #[serde(with = "rust_decimal::serde::float")]
    pub sum: Decimal,
}
