//! In-process stand-in for the accrual service.
//!
//! Tests program a reply per order number; anything unprogrammed answers
//! `204 No Content`, which is also what the real service says for orders
//! it has never seen. Every request is recorded so tests can assert on
//! polling cadence.

use std::collections::HashMap;
use std::net::TcpListener;
use std::sync::Mutex;
use std::time::Instant;

use actix_web::{App, HttpResponse, HttpServer, get, web};

/// What the stub should answer for a given order number.
#[derive(Debug, Clone)]
pub enum StubReply {
    /// `200` with the given status and optional accrual.
    Ready {
        status: &'static str,
        accrual: Option<f64>,
    },
    /// `204`.
    Unknown,
    /// `429` with an optional `Retry-After` value.
    RateLimited { retry_after: Option<u64> },
    /// `500`.
    Fail,
}

#[derive(Default)]
pub struct StubState {
    replies: Mutex<HashMap<String, StubReply>>,
    hits: Mutex<Vec<(String, Instant)>>,
}

pub struct AccrualStub {
    pub address: String,
    state: web::Data<StubState>,
}

impl AccrualStub {
    /// Program the reply for an order number.
    pub fn set_reply(&self, number: &str, reply: StubReply) {
        self.state
            .replies
            .lock()
            .unwrap()
            .insert(number.to_string(), reply);
    }

    /// Times at which the given order has been polled.
    pub fn hits_for(&self, number: &str) -> Vec<Instant> {
        self.state
            .hits
            .lock()
            .unwrap()
            .iter()
            .filter(|(n, _)| n == number)
            .map(|(_, at)| *at)
            .collect()
    }
}

#[get("/api/orders/{number}")]
async fn order_status(
    path: web::Path<String>,
    state: web::Data<StubState>,
) -> HttpResponse {
    let number = path.into_inner();
    state
        .hits
        .lock()
        .unwrap()
        .push((number.clone(), Instant::now()));
    let reply = state.replies.lock().unwrap().get(&number).cloned();
    match reply {
        Some(StubReply::Ready { status, accrual }) => {
            let mut body =
                serde_json::json!({ "order": number, "status": status });
            if let Some(accrual) = accrual {
                body["accrual"] = serde_json::json!(accrual);
            }
            HttpResponse::Ok().json(body)
        }
        Some(StubReply::RateLimited { retry_after }) => {
            let mut response = HttpResponse::TooManyRequests();
            if let Some(seconds) = retry_after {
                response.insert_header(("Retry-After", seconds.to_string()));
            }
            response.finish()
        }
        Some(StubReply::Fail) => HttpResponse::InternalServerError().finish(),
        Some(StubReply::Unknown) | None => {
            HttpResponse::NoContent().finish()
        }
    }
}

/// Bind the stub on an os-assigned port and spawn it.
pub async fn spawn_stub() -> AccrualStub {
    let state = web::Data::new(StubState::default());
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    let server_state = state.clone();
    let server = HttpServer::new(move || {
        App::new()
            .service(order_status)
            .app_data(server_state.clone())
    })
    .listen(listener)
    .unwrap()
    .run();
    tokio::spawn(server);
    AccrualStub {
        address: format!("http://127.0.0.1:{port}"),
        state,
    }
}
