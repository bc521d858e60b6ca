//! Store-level tests that drive the store functions directly against the
//! per-test database, for behaviors the HTTP surface cannot reach.

use api::store::{self, StoreError, balance};
use payloads::OrderStatus;
use rust_decimal::{Decimal, dec};

use test_helpers::spawn_app;

const ORDER: i64 = 12345678903;
const ORDER_2: i64 = 79927398713;

#[tokio::test]
async fn terminal_accrual_is_applied_exactly_once() -> anyhow::Result<()> {
    let app = spawn_app().await;
    let user_id = store::create_user(
        "carol",
        "digest",
        "token",
        &app.db_pool,
        &app.time_source,
    )
    .await?;
    store::create_order(user_id, ORDER, &app.db_pool, &app.time_source)
        .await?;

    balance::apply_accrual(
        ORDER,
        Some(dec!(42.50)),
        OrderStatus::Processed,
        &app.db_pool,
    )
    .await?;
    // the poller can observe the same terminal verdict again before the
    // order is purged from its queue; the second application is a no-op
    balance::apply_accrual(
        ORDER,
        Some(dec!(42.50)),
        OrderStatus::Processed,
        &app.db_pool,
    )
    .await?;

    let bal = balance::balance_of(user_id, &app.db_pool).await?;
    assert_eq!(bal.current, dec!(42.50));

    Ok(())
}

#[tokio::test]
async fn terminal_status_never_changes_again() -> anyhow::Result<()> {
    let app = spawn_app().await;
    let user_id = store::create_user(
        "carol",
        "digest",
        "token",
        &app.db_pool,
        &app.time_source,
    )
    .await?;
    store::create_order(user_id, ORDER, &app.db_pool, &app.time_source)
        .await?;

    balance::apply_accrual(
        ORDER,
        Some(dec!(10.00)),
        OrderStatus::Processed,
        &app.db_pool,
    )
    .await?;
    balance::apply_accrual(
        ORDER,
        None,
        OrderStatus::Invalid,
        &app.db_pool,
    )
    .await?;

    assert_eq!(
        app.order_status(ORDER).await?.as_deref(),
        Some("PROCESSED")
    );
    let bal = balance::balance_of(user_id, &app.db_pool).await?;
    assert_eq!(bal.current, dec!(10.00));

    Ok(())
}

#[tokio::test]
async fn accrual_for_an_unknown_order_is_not_found() {
    let app = spawn_app().await;

    let result = balance::apply_accrual(
        ORDER,
        Some(dec!(1.00)),
        OrderStatus::Processed,
        &app.db_pool,
    )
    .await;
    assert!(matches!(result, Err(StoreError::OrderNotFound)));
}

#[tokio::test]
async fn non_terminal_updates_do_not_credit() -> anyhow::Result<()> {
    let app = spawn_app().await;
    let user_id = store::create_user(
        "carol",
        "digest",
        "token",
        &app.db_pool,
        &app.time_source,
    )
    .await?;
    store::create_order(user_id, ORDER, &app.db_pool, &app.time_source)
        .await?;

    // an accrual riding along on a non-terminal status is ignored
    balance::apply_accrual(
        ORDER,
        Some(dec!(5.00)),
        OrderStatus::Processing,
        &app.db_pool,
    )
    .await?;

    assert_eq!(
        app.order_status(ORDER).await?.as_deref(),
        Some("PROCESSING")
    );
    let bal = balance::balance_of(user_id, &app.db_pool).await?;
    assert_eq!(bal.current, Decimal::ZERO);

    let orders = store::list_orders(user_id, &app.db_pool).await?;
    assert_eq!(orders[0].accrual, None);

    Ok(())
}

#[tokio::test]
async fn debit_rejects_non_positive_amounts() -> anyhow::Result<()> {
    let app = spawn_app().await;
    let user_id = store::create_user(
        "carol",
        "digest",
        "token",
        &app.db_pool,
        &app.time_source,
    )
    .await?;

    let result = balance::debit(
        user_id,
        ORDER,
        Decimal::ZERO,
        &app.db_pool,
        &app.time_source,
    )
    .await;
    assert!(matches!(result, Err(StoreError::AmountMustBePositive)));

    let result = balance::debit(
        user_id,
        ORDER,
        dec!(-10.00),
        &app.db_pool,
        &app.time_source,
    )
    .await;
    assert!(matches!(result, Err(StoreError::AmountMustBePositive)));

    let bal = balance::balance_of(user_id, &app.db_pool).await?;
    assert_eq!(bal.withdrawn, Decimal::ZERO);

    Ok(())
}

#[tokio::test]
async fn create_user_seeds_a_zero_balance() -> anyhow::Result<()> {
    let app = spawn_app().await;
    let user_id = store::create_user(
        "carol",
        "digest",
        "token",
        &app.db_pool,
        &app.time_source,
    )
    .await?;

    let bal = balance::balance_of(user_id, &app.db_pool).await?;
    assert_eq!(bal.current, Decimal::ZERO);
    assert_eq!(bal.withdrawn, Decimal::ZERO);

    let result = store::create_user(
        "carol",
        "digest",
        "token",
        &app.db_pool,
        &app.time_source,
    )
    .await;
    assert!(matches!(result, Err(StoreError::NotUnique(_))));

    Ok(())
}

#[tokio::test]
async fn ledger_and_balance_stay_consistent() -> anyhow::Result<()> {
    let app = spawn_app().await;
    let user_id = store::create_user(
        "carol",
        "digest",
        "token",
        &app.db_pool,
        &app.time_source,
    )
    .await?;
    store::create_order(user_id, ORDER, &app.db_pool, &app.time_source)
        .await?;

    balance::apply_accrual(
        ORDER,
        Some(dec!(100.00)),
        OrderStatus::Processed,
        &app.db_pool,
    )
    .await?;
    let remaining = balance::debit(
        user_id,
        ORDER_2,
        dec!(30.00),
        &app.db_pool,
        &app.time_source,
    )
    .await?;
    assert_eq!(remaining, dec!(70.00));
    balance::debit(
        user_id,
        ORDER,
        dec!(20.00),
        &app.db_pool,
        &app.time_source,
    )
    .await?;

    // credits minus cumulative debits equal current; cumulative debits
    // equal withdrawn
    let bal = balance::balance_of(user_id, &app.db_pool).await?;
    assert_eq!(bal.current, dec!(50.00));
    assert_eq!(bal.withdrawn, dec!(50.00));

    let ledger_total = sqlx::query_scalar::<_, Decimal>(
        "SELECT COALESCE(SUM(sum), 0) FROM debits WHERE user_id = $1",
    )
    .bind(user_id)
    .fetch_one(&app.db_pool)
    .await?;
    assert_eq!(ledger_total, bal.withdrawn);

    Ok(())
}
