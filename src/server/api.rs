use crate::config::persona::Persona;
use crate::models::chat::Message;
use crate::session::{ ChatRooms, ChatSession, RejectReason, SessionState, SubmitOutcome };
use std::any::Any;
use std::error::Error;
use std::net::SocketAddr;
use std::sync::Arc;
use axum::{
    routing::get,
    Router,
    extract::{ Path, Request, State },
    middleware::{ self, Next },
    response::{ IntoResponse, Response },
    http::{ header::AUTHORIZATION, StatusCode },
    Json,
};
use serde::{ Deserialize, Serialize };
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::{ Any as AnyOrigin, CorsLayer };
use log::{ info, error, warn };

#[derive(Deserialize)]
pub struct SendRequest {
    pub message: String,
}

#[derive(Serialize)]
struct ConversationResponse {
    persona: Arc<Persona>,
    state: SessionState,
    messages: Vec<Message>,
}

#[derive(Serialize)]
struct ErrorResponse {
    success: bool,
    message: String,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    retry: bool,
}

impl ErrorResponse {
    fn new(message: impl Into<String>) -> Self {
        Self { success: false, message: message.into(), retry: false }
    }
}

#[derive(Clone)]
struct AppState {
    rooms: Arc<ChatRooms>,
    api_key: Option<String>,
}

fn conversation_of(session: &ChatSession) -> ConversationResponse {
    ConversationResponse {
        persona: Arc::clone(session.persona()),
        state: session.state(),
        messages: session.history(),
    }
}

/// Neutral body for a handler that panicked; the client may simply retry.
fn panic_response(err: Box<dyn Any + Send + 'static>) -> Response {
    let detail = if let Some(s) = err.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = err.downcast_ref::<&str>() {
        s.to_string()
    } else {
        "unknown panic".to_string()
    };
    error!("Handler panicked: {}", detail);
    let body = ErrorResponse {
        success: false,
        message: "Something went wrong".into(),
        retry: true,
    };
    (StatusCode::INTERNAL_SERVER_ERROR, Json(body)).into_response()
}

async fn require_api_key(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let Some(required) = state.api_key.as_deref() else {
        return next.run(req).await;
    };
    let provided = req
        .headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));
    if provided != Some(required) {
        warn!("Rejected request to {} with bad or missing API key", req.uri().path());
        return (StatusCode::UNAUTHORIZED, Json(ErrorResponse::new("Unauthorized"))).into_response();
    }
    next.run(req).await
}

pub fn router(rooms: Arc<ChatRooms>, api_key: Option<String>) -> Router {
    let api_key = api_key.filter(|k| !k.trim().is_empty());
    if api_key.is_some() {
        info!("HTTP API configured with API Key authentication.");
    } else {
        warn!("HTTP API configured WITHOUT API Key authentication.");
    }

    let app_state = AppState { rooms, api_key };

    let cors = CorsLayer::new()
        .allow_origin(AnyOrigin)
        .allow_methods(AnyOrigin)
        .allow_headers(AnyOrigin);

    Router::new()
        .route("/api/personas", get(personas_handler))
        .route("/api/models", get(models_handler))
        .route(
            "/api/chat/{persona}",
            get(history_handler).post(send_handler).delete(clear_handler)
        )
        .layer(middleware::from_fn_with_state(app_state.clone(), require_api_key))
        .layer(CatchPanicLayer::custom(panic_response))
        .layer(cors)
        .with_state(app_state)
}

pub async fn start_http_server(
    addr: &str,
    rooms: Arc<ChatRooms>,
    api_key: Option<String>
) -> Result<(), Box<dyn Error + Send + Sync>> {
    let addr = addr.parse::<SocketAddr>()?;
    let app = router(rooms, api_key);
    let listener = tokio::net::TcpListener::bind(addr).await.map_err(|e| {
        error!("Failed to bind HTTP server to {}: {}. Try a different port.", addr, e);
        e
    })?;
    info!("HTTP API listening on: http://{}", addr);
    axum::serve(listener, app.into_make_service()).await?;
    Ok(())
}

async fn personas_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.rooms.registry().all())
}

async fn models_handler(State(state): State<AppState>) -> Response {
    match state.rooms.client().list_models().await {
        Ok(models) => Json(models).into_response(),
        Err(e) => {
            error!("Error fetching models: {}", e);
            (StatusCode::BAD_GATEWAY, Json(ErrorResponse::new(e.to_string()))).into_response()
        }
    }
}

fn session_for(state: &AppState, persona: &str) -> Result<Arc<ChatSession>, Response> {
    state.rooms.resolve(persona).ok_or_else(|| {
        (StatusCode::NOT_FOUND, Json(ErrorResponse::new("No such chat room"))).into_response()
    })
}

async fn history_handler(State(state): State<AppState>, Path(persona): Path<String>) -> Response {
    match session_for(&state, &persona) {
        Ok(session) => Json(conversation_of(&session)).into_response(),
        Err(resp) => resp,
    }
}

async fn send_handler(
    State(state): State<AppState>,
    Path(persona): Path<String>,
    Json(req): Json<SendRequest>
) -> Response {
    let session = match session_for(&state, &persona) {
        Ok(session) => session,
        Err(resp) => {
            return resp;
        }
    };
    // detached so a client that hangs up does not cut the exchange short
    let exchange = tokio::spawn(async move { session.submit(&req.message).await });
    match exchange.await {
        Ok(SubmitOutcome::Replied(reply)) => Json(reply).into_response(),
        Ok(SubmitOutcome::Rejected(RejectReason::EmptyInput)) =>
            (StatusCode::BAD_REQUEST, Json(ErrorResponse::new("Message is empty"))).into_response(),
        Ok(SubmitOutcome::Rejected(RejectReason::Busy)) =>
            (
                StatusCode::CONFLICT,
                Json(ErrorResponse::new("A reply is still pending for this chat")),
            ).into_response(),
        Err(e) => {
            error!("Send task for {} failed: {}", persona, e);
            let body = ErrorResponse {
                success: false,
                message: "Something went wrong".into(),
                retry: true,
            };
            (StatusCode::INTERNAL_SERVER_ERROR, Json(body)).into_response()
        }
    }
}

async fn clear_handler(State(state): State<AppState>, Path(persona): Path<String>) -> Response {
    match session_for(&state, &persona) {
        Ok(session) => {
            session.clear().await;
            StatusCode::NO_CONTENT.into_response()
        }
        Err(resp) => resp,
    }
}
