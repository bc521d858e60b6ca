use payloads::requests;
use reqwest::StatusCode;
use rust_decimal::Decimal;

use test_helpers::{
    alice_credentials, assert_status_code, bob_credentials, spawn_app,
};

#[tokio::test]
async fn register_returns_a_usable_token() -> anyhow::Result<()> {
    let app = spawn_app().await;

    let token = app.register_alice().await?;
    assert!(!token.is_empty());

    // the token works immediately, no separate login required
    let balance = app.client.balance().await?;
    assert_eq!(balance.current, Decimal::ZERO);
    assert_eq!(balance.withdrawn, Decimal::ZERO);

    Ok(())
}

#[tokio::test]
async fn register_conflict_on_taken_login() -> anyhow::Result<()> {
    let app = spawn_app().await;

    app.register_alice().await?;

    let result = app.client.register(&alice_credentials()).await;
    assert_status_code(result, StatusCode::CONFLICT);

    Ok(())
}

#[tokio::test]
async fn register_rejects_empty_fields() -> anyhow::Result<()> {
    let app = spawn_app().await;

    let result = app
        .client
        .register(&requests::Credentials {
            login: "".into(),
            password: "supersecret".into(),
        })
        .await;
    assert_status_code(result, StatusCode::BAD_REQUEST);

    let result = app
        .client
        .register(&requests::Credentials {
            login: "alice".into(),
            password: "".into(),
        })
        .await;
    assert_status_code(result, StatusCode::BAD_REQUEST);

    Ok(())
}

#[tokio::test]
async fn register_rejects_overlong_login() -> anyhow::Result<()> {
    let app = spawn_app().await;

    let result = app
        .client
        .register(&requests::Credentials {
            login: (0..300).map(|_| "X").collect::<String>(),
            password: "supersecret".into(),
        })
        .await;
    assert_status_code(result, StatusCode::BAD_REQUEST);

    Ok(())
}

#[tokio::test]
async fn register_rejects_wrong_content_type() -> anyhow::Result<()> {
    let app = spawn_app().await;

    let response = app
        .client
        .inner_client
        .post(format!("http://127.0.0.1:{}/api/user/register", app.port))
        .header("Content-Type", "text/plain")
        .body(r#"{"login":"alice","password":"supersecret"}"#)
        .send()
        .await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    Ok(())
}

#[tokio::test]
async fn login_rotates_the_stored_token() -> anyhow::Result<()> {
    let app = spawn_app().await;

    app.register_alice().await?;

    let token = app.client.login(&alice_credentials()).await?;
    assert_eq!(app.stored_token("alice").await?, token);

    // the rotated token authenticates
    app.client.balance().await?;

    Ok(())
}

#[tokio::test]
async fn login_refused_for_bad_credentials() -> anyhow::Result<()> {
    let app = spawn_app().await;

    app.register_alice().await?;

    let result = app
        .client
        .login(&requests::Credentials {
            login: "alice".into(),
            password: "not-her-password".into(),
        })
        .await;
    assert_status_code(result, StatusCode::UNAUTHORIZED);

    // unknown users look the same as wrong passwords
    let result = app.client.login(&bob_credentials()).await;
    assert_status_code(result, StatusCode::UNAUTHORIZED);

    Ok(())
}

#[tokio::test]
async fn protected_endpoints_require_a_token() -> anyhow::Result<()> {
    let app = spawn_app().await;

    assert_status_code(
        app.client.list_orders().await,
        StatusCode::UNAUTHORIZED,
    );
    assert_status_code(app.client.balance().await, StatusCode::UNAUTHORIZED);
    assert_status_code(
        app.client.list_withdrawals().await,
        StatusCode::UNAUTHORIZED,
    );
    assert_status_code(
        app.client.upload_order("12345678903").await,
        StatusCode::UNAUTHORIZED,
    );

    Ok(())
}

#[tokio::test]
async fn garbage_tokens_are_unauthorized() -> anyhow::Result<()> {
    let app = spawn_app().await;

    app.register_alice().await?;
    app.client.set_token(Some("invalid.token.string".into()));

    assert_status_code(app.client.balance().await, StatusCode::UNAUTHORIZED);

    Ok(())
}
