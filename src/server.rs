use axum::{
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::api::handler::{
    cancel_schedule, create_schedule, get_schedule, get_transaction, get_wallet, health_check,
    list_user_transactions, pause_schedule, provider_webhook, resume_schedule, retry_transaction,
    AppState,
};

pub fn create_app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/webhooks/:provider", post(provider_webhook))
        .nest(
            "/api/v1",
            Router::new()
                .route("/schedules", post(create_schedule))
                .route("/schedules/:id", get(get_schedule))
                .route("/schedules/:id/pause", post(pause_schedule))
                .route("/schedules/:id/resume", post(resume_schedule))
                .route("/schedules/:id/cancel", post(cancel_schedule))
                .route("/wallets/:user_id", get(get_wallet))
                .route("/transactions/:id", get(get_transaction))
                .route("/transactions/:id/retry", post(retry_transaction))
                .route("/transactions/user/:user_id", get(list_user_transactions)),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn run_server(app: Router, bind_address: &str) -> crate::error::AppResult<()> {
    let listener = tokio::net::TcpListener::bind(bind_address)
        .await
        .map_err(|e| {
            crate::error::AppError::Internal(format!("failed to bind {}: {}", bind_address, e))
        })?;
    info!("listening on {}", bind_address);
    axum::serve(listener, app)
        .await
        .map_err(|e| crate::error::AppError::Internal(format!("server error: {}", e)))?;
    Ok(())
}
