pub mod requests;
pub mod responses;

mod api_client;
pub use api_client::{APIClient, ClientError, ok_body, ok_empty, ok_list};

use derive_more::Display;
use serde::{Deserialize, Serialize};

/// Id type wrappers help ensure we don't mix up ids for different tables.
#[derive(
    Debug, Copy, Clone, PartialEq, Eq, Display, Serialize, Deserialize,
)]
#[cfg_attr(feature = "use-sqlx", derive(sqlx::Type), sqlx(transparent))]
pub struct UserId(pub i64);

/// Lifecycle of an uploaded order.
///
/// `Invalid` and `Processed` are terminal: once an order reaches one of
/// them, its status and accrual are frozen.
#[derive(
    Debug, Copy, Clone, PartialEq, Eq, Display, Serialize, Deserialize,
)]
#[serde(rename_all = "UPPERCASE")]
#[cfg_attr(
    feature = "use-sqlx",
    derive(sqlx::Type),
    sqlx(type_name = "order_status", rename_all = "UPPERCASE")
)]
pub enum OrderStatus {
    #[display("NEW")]
    New,
    #[display("PROCESSING")]
    Processing,
    #[display("INVALID")]
    Invalid,
    #[display("PROCESSED")]
    Processed,
}

impl OrderStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, OrderStatus::Invalid | OrderStatus::Processed)
    }
}
