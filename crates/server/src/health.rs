use std::sync::Arc;

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use chrono::Utc;
use serde::Serialize;

use tutorbot_agent::GuardedCalendar;
use tutorbot_core::resilience::CircuitState;
use tutorbot_db::DbPool;

use crate::webhook::InFlight;

#[derive(Clone)]
pub struct HealthState {
    db_pool: DbPool,
    calendar: Arc<GuardedCalendar>,
    in_flight: InFlight,
}

impl HealthState {
    pub fn new(db_pool: DbPool, calendar: Arc<GuardedCalendar>, in_flight: InFlight) -> Self {
        Self { db_pool, calendar, in_flight }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthCheck {
    pub status: &'static str,
    pub detail: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub database: HealthCheck,
    pub calendar: HealthCheck,
    pub in_flight_messages: usize,
    pub checked_at: String,
}

pub fn router(state: HealthState) -> Router {
    Router::new().route("/health", get(health)).with_state(state)
}

/// Only the database decides readiness; a tripped calendar breaker degrades
/// scheduling answers but messages are still handled.
pub async fn health(State(state): State<HealthState>) -> (StatusCode, Json<HealthResponse>) {
    let database = database_check(&state.db_pool).await;
    let ready = database.status == "ready";

    let payload = HealthResponse {
        status: if ready { "ready" } else { "degraded" },
        database,
        calendar: calendar_check(state.calendar.circuit_state()),
        in_flight_messages: state.in_flight.count(),
        checked_at: Utc::now().to_rfc3339(),
    };

    let status_code = if ready { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (status_code, Json(payload))
}

async fn database_check(pool: &DbPool) -> HealthCheck {
    match sqlx::query_scalar::<_, i64>("SELECT 1").fetch_one(pool).await {
        Ok(_) => HealthCheck { status: "ready", detail: "database query succeeded".to_string() },
        Err(error) => {
            HealthCheck { status: "degraded", detail: format!("database query failed: {error}") }
        }
    }
}

fn calendar_check(circuit: CircuitState) -> HealthCheck {
    let status = match circuit {
        CircuitState::Closed => "ready",
        CircuitState::HalfOpen | CircuitState::Open => "degraded",
    };
    HealthCheck { status, detail: format!("circuit {}", circuit.as_str()) }
}
