use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::OrderStatus;

/// An order as listed by `GET /api/user/orders`.
///
/// `accrual` is only present once the accrual service has reported a
/// positive reward; `uploaded_at` is RFC-3339 in the reporting offset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub number: String,
    pub status: OrderStatus,
    #[serde(
        default,
        with = "rust_decimal::serde::float_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub accrual: Option<Decimal>,
    pub uploaded_at: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Balance {
    #[serde(with = "rust_decimal::serde::float")]
    pub current: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub withdrawn: Decimal,
}

/// A ledger entry as listed by `GET /api/user/withdrawals`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Withdrawal {
    pub order: String,
    #[serde(with = "rust_decimal::serde::float")]
    pub sum: Decimal,
    pub processed_at: String,
}
