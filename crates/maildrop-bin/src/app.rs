//! HTTP surface: dispatch trigger, rate reporting, health.

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use delivery_dispatcher::Dispatcher;
use maildrop_database::AsyncDatabase;
use serde_json::json;
use tracing::error;

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Dispatcher,
    pub db: AsyncDatabase,
}

/// Build the axum Router with all API routes.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/api/dispatch", post(dispatch_batch))
        .route("/api/send-rate", get(send_rate))
        .route("/api/health", get(health))
        .with_state(state)
}

/// POST /api/dispatch - process one batch of due tasks.
///
/// The external scheduler hits this on its cadence; the built-in interval
/// loop (when enabled) runs the same batch call.
async fn dispatch_batch(State(app): State<AppState>) -> (StatusCode, Json<serde_json::Value>) {
    match app.dispatcher.run_batch().await {
        Ok(summary) => (
            StatusCode::OK,
            Json(json!({
                "success": true,
                "processed": summary.processed,
                "rateLimited": summary.rate_limited,
                "timestamp": summary.timestamp.to_rfc3339(),
            })),
        ),
        Err(e) => {
            error!(error = %e, "Dispatch batch failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "success": false, "error": e.to_string() })),
            )
        }
    }
}

/// GET /api/send-rate - configured ceilings and current window counts,
/// for dashboard display. Counts degrade to zero if the counter store is
/// unreachable.
async fn send_rate(State(app): State<AppState>) -> Json<serde_json::Value> {
    let limiter = app.dispatcher.limiter();
    let counts = limiter.window_counts().await.unwrap_or_default();

    Json(json!({
        "sustainedRatePerMinute": limiter.sustained_rate_per_minute(),
        "perSecond": limiter.config().per_second,
        "currentWindows": {
            "second": counts.second,
            "minute": counts.minute,
        },
    }))
}

/// GET /api/health - database liveness.
async fn health(State(app): State<AppState>) -> (StatusCode, Json<serde_json::Value>) {
    match app.db.health_check().await {
        Ok(()) => (StatusCode::OK, Json(json!({ "status": "ok" }))),
        Err(e) => {
            error!(error = %e, "Health check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "status": "unhealthy", "error": e.to_string() })),
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use delivery_dispatcher::{DispatcherConfig, DispatcherPorts};
    use mail_transport::{HttpMailer, MailerConfig};
    use maildrop_database::SqliteStores;
    use send_rate_limiter::{InMemoryCounterStore, RateLimiter, RateLimiterConfig};
    use std::sync::Arc;

    async fn test_state() -> AppState {
        let db = AsyncDatabase::open_in_memory().await.unwrap();
        let stores = Arc::new(SqliteStores::new(db.clone()));
        let limiter = RateLimiter::new(
            Arc::new(InMemoryCounterStore::new()),
            RateLimiterConfig {
                per_second: 5,
                per_minute: 100,
            },
        );
        let transport = Arc::new(HttpMailer::new(
            MailerConfig {
                api_url: "http://127.0.0.1:1".to_string(),
                timeout_secs: 1,
            },
            "test-token",
        ));
        let ports = DispatcherPorts {
            tasks: stores.clone(),
            projects: stores.clone(),
            triggers: stores.clone(),
            campaigns: stores.clone(),
            receipts: stores,
            transport,
        };
        let dispatcher = Dispatcher::new(ports, limiter, DispatcherConfig::default());
        AppState { dispatcher, db }
    }

    #[tokio::test]
    async fn test_dispatch_empty_queue() {
        let state = test_state().await;
        let (status, Json(body)) = dispatch_batch(State(state)).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert_eq!(body["processed"], 0);
        assert_eq!(body["rateLimited"], false);
    }

    #[tokio::test]
    async fn test_send_rate_reports_config() {
        let state = test_state().await;
        let Json(body) = send_rate(State(state)).await;

        assert_eq!(body["sustainedRatePerMinute"], 100);
        assert_eq!(body["perSecond"], 5);
        assert_eq!(body["currentWindows"]["second"], 0);
        assert_eq!(body["currentWindows"]["minute"], 0);
    }

    #[tokio::test]
    async fn test_health_ok() {
        let state = test_state().await;
        let (status, Json(body)) = health(State(state)).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }
}
