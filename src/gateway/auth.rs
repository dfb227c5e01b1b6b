use axum::{
    body::Body,
    extract::State,
    http::{Request, StatusCode},
    middleware,
    response::IntoResponse,
    Json,
};

use super::AppState;

/// Header the Bot API sets to the `secret_token` given at registration.
pub(crate) const SECRET_HEADER: &str = "x-telegram-bot-api-secret-token";

pub(crate) async fn secret_token_middleware(
    State(state): State<AppState>,
    req: Request<Body>,
    next: middleware::Next,
) -> impl IntoResponse {
    let Some(ref expected) = state.secret else {
        return next.run(req).await;
    };

    let provided = req
        .headers()
        .get(SECRET_HEADER)
        .and_then(|v| v.to_str().ok());

    match provided {
        Some(token) if token == expected => next.run(req).await,
        Some(_) => (
            StatusCode::UNAUTHORIZED,
            Json(serde_json::json!({"error": "invalid secret token"})),
        )
            .into_response(),
        None => (
            StatusCode::UNAUTHORIZED,
            Json(serde_json::json!({"error": "missing secret token"})),
        )
            .into_response(),
    }
}
