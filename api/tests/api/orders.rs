use payloads::OrderStatus;
use reqwest::StatusCode;

use test_helpers::{assert_status_code, spawn_app};

const LUHN_VALID: &str = "12345678903";
const LUHN_VALID_2: &str = "79927398713";
const LUHN_INVALID: &str = "12345678902";

#[tokio::test]
async fn upload_is_accepted_then_idempotent() -> anyhow::Result<()> {
    let app = spawn_app().await;
    app.register_alice().await?;

    let status = app.client.upload_order(LUHN_VALID).await?;
    assert_eq!(status, StatusCode::ACCEPTED);

    // re-upload by the same user is a 200, not a new order
    let status = app.client.upload_order(LUHN_VALID).await?;
    assert_eq!(status, StatusCode::OK);

    let orders = app.client.list_orders().await?;
    assert_eq!(orders.len(), 1);
    assert_eq!(orders[0].number, LUHN_VALID);
    assert_eq!(orders[0].status, OrderStatus::New);
    assert_eq!(orders[0].accrual, None);

    Ok(())
}

#[tokio::test]
async fn upload_conflicts_across_users() -> anyhow::Result<()> {
    let app = spawn_app().await;

    app.register_alice().await?;
    app.client.upload_order(LUHN_VALID).await?;

    app.register_bob().await?;
    let result = app.client.upload_order(LUHN_VALID).await;
    assert_status_code(result, StatusCode::CONFLICT);

    Ok(())
}

#[tokio::test]
async fn upload_rejects_luhn_failures() -> anyhow::Result<()> {
    let app = spawn_app().await;
    app.register_alice().await?;

    let result = app.client.upload_order(LUHN_INVALID).await;
    assert_status_code(result, StatusCode::UNPROCESSABLE_ENTITY);

    let result = app.client.upload_order("not-a-number").await;
    assert_status_code(result, StatusCode::UNPROCESSABLE_ENTITY);

    Ok(())
}

#[tokio::test]
async fn upload_requires_text_plain() -> anyhow::Result<()> {
    let app = spawn_app().await;
    let token = app.register_alice().await?;

    let response = app
        .client
        .inner_client
        .post(format!("http://127.0.0.1:{}/api/user/orders", app.port))
        .header("Authorization", token)
        .header("Content-Type", "application/json")
        .body(LUHN_VALID)
        .send()
        .await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    Ok(())
}

#[tokio::test]
async fn upload_tolerates_surrounding_whitespace() -> anyhow::Result<()> {
    let app = spawn_app().await;
    app.register_alice().await?;

    let status = app
        .client
        .upload_order(&format!("  {LUHN_VALID}\n"))
        .await?;
    assert_eq!(status, StatusCode::ACCEPTED);

    Ok(())
}

#[tokio::test]
async fn empty_order_list_is_no_content() -> anyhow::Result<()> {
    let app = spawn_app().await;
    let token = app.register_alice().await?;

    let response = app
        .client
        .inner_client
        .get(format!("http://127.0.0.1:{}/api/user/orders", app.port))
        .header("Authorization", token)
        .send()
        .await?;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    Ok(())
}

#[tokio::test]
async fn orders_are_listed_newest_first() -> anyhow::Result<()> {
    let app = spawn_app().await;
    app.register_alice().await?;

    app.client.upload_order(LUHN_VALID).await?;
    // creation timestamps order the listing; make them distinct
    app.time_source.advance(jiff::Span::new().seconds(1));
    app.client.upload_order(LUHN_VALID_2).await?;

    let orders = app.client.list_orders().await?;
    assert_eq!(orders.len(), 2);
    assert_eq!(orders[0].number, LUHN_VALID_2);
    assert_eq!(orders[1].number, LUHN_VALID);

    Ok(())
}
