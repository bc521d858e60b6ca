//! Persistent state: users, orders, balances and the debit ledger.
//!
//! ## Design Decisions
//!
//! ### Transactions
//! - Multi-row mutations (`create_user`, `debit`, `apply_accrual`) commit
//!   atomically; any sub-step error rolls the whole transaction back.
//! - Debit insufficiency is detected by the conditional update affecting
//!   zero rows, not by a pre-read, so concurrent debits against the same
//!   balance cannot both pass.
//! - `apply_accrual` only touches orders that are still `NEW` or
//!   `PROCESSING`. A terminal verdict observed twice is a no-op the
//!   second time.
//!
//! ### Deadlines
//! - Every operation bounds its database work with a deadline (3 seconds;
//!   5 for accrual application, which performs two updates). An elapsed
//!   deadline surfaces as [`StoreError::DeadlineExceeded`] and reaches
//!   clients as a plain 500.
//!
//! ### Numerics
//! - Amounts are `NUMERIC(20, 2)` in storage and `Decimal` in Rust. The
//!   ledger path never round-trips through binary floating point;
//!   rounding happens in the listing conversions only.

use std::future::Future;
use std::time::Duration;

use jiff::Timestamp;
use jiff_sqlx::{Timestamp as SqlxTs, ToSqlx};
use rust_decimal::Decimal;
use sqlx::{FromRow, PgPool};

use payloads::{OrderStatus, UserId, requests, responses};

use crate::time::{TimeSource, report_time};

pub mod balance;

/// Budget for a single store operation's database work.
pub(crate) const OP_DEADLINE: Duration = Duration::from_secs(3);
/// Accrual application performs two updates and gets a larger budget.
pub(crate) const ACCRUAL_DEADLINE: Duration = Duration::from_secs(5);

/// An order row as stored.
#[derive(Debug, Clone, FromRow)]
pub struct Order {
    pub id: i64,
    pub number: i64,
    pub user_id: UserId,
    pub status: OrderStatus,
    pub accrual: Option<Decimal>,
    #[sqlx(try_from = "SqlxTs")]
    pub created_at: Timestamp,
}

impl From<Order> for responses::Order {
    fn from(order: Order) -> Self {
        Self {
            number: order.number.to_string(),
            status: order.status,
            // zero accruals are an artifact of the accrual service and not
            // worth reporting
            accrual: order.accrual.filter(|accrual| !accrual.is_zero()),
            uploaded_at: report_time(order.created_at),
        }
    }
}

/// Run a store operation under a deadline.
pub(crate) async fn with_deadline<T, F>(
    deadline: Duration,
    op: F,
) -> Result<T, StoreError>
where
    F: Future<Output = Result<T, StoreError>>,
{
    match tokio::time::timeout(deadline, op).await {
        Ok(result) => result,
        Err(_) => Err(StoreError::DeadlineExceeded),
    }
}

/// Existence check by login.
#[tracing::instrument(skip(pool))]
pub async fn is_user_registered(
    login: &str,
    pool: &PgPool,
) -> Result<bool, StoreError> {
    with_deadline(OP_DEADLINE, async {
        Ok(sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS (SELECT 1 FROM users WHERE login = $1)",
        )
        .bind(login)
        .fetch_one(pool)
        .await?)
    })
    .await
}

/// True iff a user row matches the login and password digest exactly.
#[tracing::instrument(skip(password_digest, pool))]
pub async fn authenticate(
    login: &str,
    password_digest: &str,
    pool: &PgPool,
) -> Result<bool, StoreError> {
    with_deadline(OP_DEADLINE, async {
        Ok(sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS (
                SELECT 1 FROM users WHERE login = $1 AND password_digest = $2
            )",
        )
        .bind(login)
        .bind(password_digest)
        .fetch_one(pool)
        .await?)
    })
    .await
}

/// Create the user and their zeroed balance in one transaction.
///
/// The unique constraint on `login` makes racing registrations see one
/// success and one [`StoreError::NotUnique`].
#[tracing::instrument(skip(password_digest, token, pool, time_source))]
pub async fn create_user(
    login: &str,
    password_digest: &str,
    token: &str,
    pool: &PgPool,
    time_source: &TimeSource,
) -> Result<UserId, StoreError> {
    if login.len() > requests::LOGIN_MAX_LEN {
        return Err(StoreError::FieldTooLong);
    }
    with_deadline(OP_DEADLINE, async {
        let mut tx = pool.begin().await?;
        let user_id = sqlx::query_scalar::<_, UserId>(
            "INSERT INTO users (login, password_digest, token, created_at)
            VALUES ($1, $2, $3, $4)
            RETURNING id",
        )
        .bind(login)
        .bind(password_digest)
        .bind(token)
        .bind(time_source.now().to_sqlx())
        .fetch_one(&mut *tx)
        .await?;
        sqlx::query(
            "INSERT INTO balances (user_id, current, withdrawn, created_at)
            VALUES ($1, 0, 0, $2)",
        )
        .bind(user_id)
        .bind(time_source.now().to_sqlx())
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        tracing::info!("Registered user '{}'", login);
        Ok(user_id)
    })
    .await
}

/// Replace the stored token for a user, as happens on login.
#[tracing::instrument(skip(token, pool))]
pub async fn rotate_token(
    login: &str,
    token: &str,
    pool: &PgPool,
) -> Result<(), StoreError> {
    with_deadline(OP_DEADLINE, async {
        let rows_affected =
            sqlx::query("UPDATE users SET token = $1 WHERE login = $2")
                .bind(token)
                .bind(login)
                .execute(pool)
                .await?
                .rows_affected();
        if rows_affected == 0 {
            return Err(StoreError::UserNotFound);
        }
        Ok(())
    })
    .await
}

/// The login owning an order number, or `None` when no such order exists.
#[tracing::instrument(skip(pool))]
pub async fn owner_of_order(
    number: i64,
    pool: &PgPool,
) -> Result<Option<String>, StoreError> {
    with_deadline(OP_DEADLINE, async {
        Ok(sqlx::query_scalar::<_, String>(
            "SELECT u.login FROM orders o
            JOIN users u ON o.user_id = u.id
            WHERE o.number = $1",
        )
        .bind(number)
        .fetch_optional(pool)
        .await?)
    })
    .await
}

#[tracing::instrument(skip(pool))]
pub async fn user_id_by_login(
    login: &str,
    pool: &PgPool,
) -> Result<UserId, StoreError> {
    with_deadline(OP_DEADLINE, async {
        sqlx::query_scalar::<_, UserId>(
            "SELECT id FROM users WHERE login = $1",
        )
        .bind(login)
        .fetch_optional(pool)
        .await?
        .ok_or(StoreError::UserNotFound)
    })
    .await
}

/// Insert a fresh order with status `NEW`.
///
/// The unique constraint on `number` is the authoritative ownership check:
/// callers racing on the same number see one success and one
/// [`StoreError::NotUnique`].
#[tracing::instrument(skip(pool, time_source))]
pub async fn create_order(
    user_id: UserId,
    number: i64,
    pool: &PgPool,
    time_source: &TimeSource,
) -> Result<(), StoreError> {
    with_deadline(OP_DEADLINE, async {
        sqlx::query(
            "INSERT INTO orders (number, user_id, status, created_at)
            VALUES ($1, $2, $3, $4)",
        )
        .bind(number)
        .bind(user_id)
        .bind(OrderStatus::New)
        .bind(time_source.now().to_sqlx())
        .execute(pool)
        .await?;
        Ok(())
    })
    .await
}

/// All of a user's orders, newest first.
#[tracing::instrument(skip(pool))]
pub async fn list_orders(
    user_id: UserId,
    pool: &PgPool,
) -> Result<Vec<responses::Order>, StoreError> {
    with_deadline(OP_DEADLINE, async {
        let orders = sqlx::query_as::<_, Order>(
            "SELECT * FROM orders
            WHERE user_id = $1
            ORDER BY created_at DESC",
        )
        .bind(user_id)
        .fetch_all(pool)
        .await?;
        Ok(orders.into_iter().map(Into::into).collect())
    })
    .await
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("User not found")]
    UserNotFound,
    #[error("Order not found")]
    OrderNotFound,
    #[error("Insufficient funds")]
    InsufficientFunds,
    #[error("Amount must be positive")]
    AmountMustBePositive,
    #[error("Field too long")]
    FieldTooLong,
    #[error("Unique constraint violation")]
    NotUnique(#[source] sqlx::Error),
    #[error("Deadline exceeded")]
    DeadlineExceeded,
    #[error("Database error")]
    Database(#[source] sqlx::Error),
    #[error("Unexpected error")]
    UnexpectedError(#[from] anyhow::Error),
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db_err) = &e
            && db_err.is_unique_violation()
        {
            return StoreError::NotUnique(e);
        }
        StoreError::Database(e)
    }
}
