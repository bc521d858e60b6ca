pub mod accrual;
pub mod auth;
pub mod luhn;
pub mod password;
pub mod routes;
pub mod scheduler;
pub mod store;
pub mod telemetry;
pub mod time;

use actix_web::dev::Server;
use actix_web::{App, HttpResponse, HttpServer, web};
use secrecy::{ExposeSecret, SecretBox};
use sqlx::PgPool;
use std::net::TcpListener;
use std::time::Duration;

use crate::auth::TokenProvider;
use crate::scheduler::AccrualScheduler;
use crate::time::TimeSource;

/// Build the server, but not await it.
///
/// Returns the port that the server has bound to by modifying the config.
/// The scheduler is constructed by the caller so the process composition
/// root can stop it after the server exits.
pub async fn build(
    config: &mut Config,
    time_source: TimeSource,
    scheduler: web::Data<AccrualScheduler>,
) -> std::io::Result<Server> {
    let db_pool =
        web::Data::new(PgPool::connect(&config.database_url).await.unwrap());
    let time_source = web::Data::new(time_source);

    let token_secret = match &config.token_secret {
        Some(secret) => secret.expose_secret().clone(),
        None => {
            tracing::warn!(
                "No TOKEN_SECRET provided; using a temporary secret. \
                Tokens will not survive restarts or be shared between \
                multiple instances."
            );
            uuid::Uuid::new_v4().to_string()
        }
    };
    let token_provider = web::Data::new(TokenProvider::new(
        SecretBox::new(Box::new(token_secret)),
        time_source.get_ref().clone(),
    ));

    let app_config = web::Data::new(AppConfig {
        require_debit_ownership: config.require_debit_ownership,
    });

    // OS assigns the port if binding to 0
    let listener = TcpListener::bind(format!("{}:{}", config.ip, config.port))?;
    config.port = listener.local_addr()?.port();
    let server = HttpServer::new(move || {
        App::new()
            // failure responses carry the status code only
            .app_data(web::JsonConfig::default().error_handler(|err, _req| {
                actix_web::error::InternalError::from_response(
                    err,
                    HttpResponse::BadRequest().finish(),
                )
                .into()
            }))
            .service(routes::api_services())
            .app_data(db_pool.clone())
            .app_data(time_source.clone())
            .app_data(token_provider.clone())
            .app_data(scheduler.clone())
            .app_data(app_config.clone())
    })
    .listen(listener)?
    .run();
    Ok(server)
}

/// Configuration loaded from environment variables at startup.
/// Used only during server initialization, not shared as app_data.
pub struct Config {
    pub database_url: String,
    /// set to "0.0.0.0" for public access, "127.0.0.1" for local dev
    pub ip: String,
    /// set to 0 to get an os-assigned port
    pub port: u16,
    /// Base URL of the external accrual service
    pub accrual_address: String,
    /// Optional HS256 secret for bearer tokens.
    /// If not provided, a random secret will be generated on each startup
    pub token_secret: Option<SecretBox<String>>,
    /// Wait between poll sweeps unless the accrual service dictates otherwise
    pub poll_interval: Duration,
    /// Refuse debits that reference an order owned by a different user
    pub require_debit_ownership: bool,
}

/// Runtime configuration shared across the application as app_data.
/// Contains only the fields needed by route handlers at runtime.
pub struct AppConfig {
    /// Refuse debits that reference an order owned by a different user
    pub require_debit_ownership: bool,
}

impl Config {
    pub fn from_env() -> Self {
        use std::env::var;

        let run_address = var("RUN_ADDRESS")
            .unwrap_or_else(|_| "127.0.0.1:8080".to_string());
        let (ip, port) = run_address
            .rsplit_once(':')
            .expect("RUN_ADDRESS must be of the form host:port");

        Config {
            database_url: var("DATABASE_URI")
                .expect("DATABASE_URI must be set"),
            ip: ip.to_string(),
            port: port.parse().expect("RUN_ADDRESS port must be numeric"),
            accrual_address: var("ACCRUAL_SYSTEM_ADDRESS")
                .unwrap_or_else(|_| "http://127.0.0.1:9090".to_string()),
            token_secret: var("TOKEN_SECRET")
                .ok()
                .map(|s| SecretBox::new(Box::new(s))),
            poll_interval: scheduler::DEFAULT_POLL_WAIT,
            require_debit_ownership: var("REQUIRE_DEBIT_OWNERSHIP")
                .is_ok_and(|v| v == "1" || v.eq_ignore_ascii_case("true")),
        }
    }
}
