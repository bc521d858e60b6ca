//! Balance reads, debits and accrual application.

use jiff::Timestamp;
use jiff_sqlx::{Timestamp as SqlxTs, ToSqlx};
use rust_decimal::Decimal;
use sqlx::{FromRow, PgPool};

use payloads::{OrderStatus, UserId, responses};

use super::{ACCRUAL_DEADLINE, OP_DEADLINE, StoreError, with_deadline};
use crate::time::{TimeSource, report_time};

#[derive(Debug, Clone, FromRow)]
struct DebitRow {
    order_number: i64,
    sum: Decimal,
    #[sqlx(try_from = "SqlxTs")]
    processed_at: Timestamp,
}

impl From<DebitRow> for responses::Withdrawal {
    fn from(debit: DebitRow) -> Self {
        Self {
            order: debit.order_number.to_string(),
            sum: debit.sum,
            processed_at: report_time(debit.processed_at),
        }
    }
}

/// Current balance, or zeros when no row exists. A user created through
/// [`create_user`](super::create_user) always has one.
#[tracing::instrument(skip(pool))]
pub async fn balance_of(
    user_id: UserId,
    pool: &PgPool,
) -> Result<responses::Balance, StoreError> {
    with_deadline(OP_DEADLINE, async {
        let row: Option<(Decimal, Decimal)> = sqlx::query_as(
            "SELECT current, withdrawn FROM balances WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_optional(pool)
        .await?;
        let (current, withdrawn) =
            row.unwrap_or((Decimal::ZERO, Decimal::ZERO));
        Ok(responses::Balance { current, withdrawn })
    })
    .await
}

/// Atomically move `amount` from `current` to `withdrawn` and record the
/// ledger entry. Returns the new `current`.
///
/// The conditional update is the only insufficiency check: zero affected
/// rows means the funds were not there at commit time.
#[tracing::instrument(skip(pool, time_source))]
pub async fn debit(
    user_id: UserId,
    order_number: i64,
    amount: Decimal,
    pool: &PgPool,
    time_source: &TimeSource,
) -> Result<Decimal, StoreError> {
    if amount <= Decimal::ZERO {
        return Err(StoreError::AmountMustBePositive);
    }
    with_deadline(OP_DEADLINE, async {
        let mut tx = pool.begin().await?;
        let new_current = sqlx::query_scalar::<_, Decimal>(
            "UPDATE balances
            SET current = current - $1, withdrawn = withdrawn + $1
            WHERE user_id = $2 AND current >= $1
            RETURNING current",
        )
        .bind(amount)
        .bind(user_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(StoreError::InsufficientFunds)?;
        sqlx::query(
            "INSERT INTO debits (user_id, order_number, sum, processed_at)
            VALUES ($1, $2, $3, $4)",
        )
        .bind(user_id)
        .bind(order_number)
        .bind(amount)
        .bind(time_source.now().to_sqlx())
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(new_current)
    })
    .await
}

/// A user's debit history, newest first.
#[tracing::instrument(skip(pool))]
pub async fn list_debits(
    user_id: UserId,
    pool: &PgPool,
) -> Result<Vec<responses::Withdrawal>, StoreError> {
    with_deadline(OP_DEADLINE, async {
        let debits = sqlx::query_as::<_, DebitRow>(
            "SELECT order_number, sum, processed_at FROM debits
            WHERE user_id = $1
            ORDER BY processed_at DESC",
        )
        .bind(user_id)
        .fetch_all(pool)
        .await?;
        Ok(debits.into_iter().map(Into::into).collect())
    })
    .await
}

/// Apply a polled accrual verdict: update the order row and credit the
/// owner's balance when the order came back `PROCESSED` with a positive
/// accrual.
///
/// The order update is conditioned on the row still being non-terminal, so
/// a terminal verdict observed twice credits the balance exactly once.
#[tracing::instrument(skip(pool))]
pub async fn apply_accrual(
    order_number: i64,
    accrual: Option<Decimal>,
    status: OrderStatus,
    pool: &PgPool,
) -> Result<(), StoreError> {
    // accrual is only meaningful on a PROCESSED order
    let stored_accrual = match status {
        OrderStatus::Processed => accrual,
        _ => None,
    };
    with_deadline(ACCRUAL_DEADLINE, async {
        let mut tx = pool.begin().await?;
        let owner = sqlx::query_scalar::<_, UserId>(
            "UPDATE orders
            SET status = $2, accrual = $3
            WHERE number = $1 AND status IN ('NEW', 'PROCESSING')
            RETURNING user_id",
        )
        .bind(order_number)
        .bind(status)
        .bind(stored_accrual)
        .fetch_optional(&mut *tx)
        .await?;
        let Some(user_id) = owner else {
            // already terminal, or never uploaded here
            let known = sqlx::query_scalar::<_, bool>(
                "SELECT EXISTS (SELECT 1 FROM orders WHERE number = $1)",
            )
            .bind(order_number)
            .fetch_one(&mut *tx)
            .await?;
            return if known {
                Ok(())
            } else {
                Err(StoreError::OrderNotFound)
            };
        };
        if let Some(accrual) = stored_accrual
            && accrual > Decimal::ZERO
        {
            sqlx::query(
                "UPDATE balances SET current = current + $1
                WHERE user_id = $2",
            )
            .bind(accrual)
            .bind(user_id)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        tracing::info!(
            "Order {} moved to {} with accrual {:?}",
            order_number,
            status,
            stored_accrual
        );
        Ok(())
    })
    .await
}
