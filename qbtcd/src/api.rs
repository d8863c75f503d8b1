//! HTTP API for the QBTC daemon.
//!
//! Provides REST endpoints for:
//! - Health and status
//! - Positions (list, open, get, close) and history
//! - Portfolio aggregates
//! - Unmanaged orders (place, list, cancel)
//! - Trading switches (enable, disable, emergency)
//! - Prometheus metrics
//!
//! plus `GET /ws`, which streams every event bus message to every client.
//!
//! Every JSON response uses the envelope `{ "success": bool, "data" | "message" }`.

use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, Query, State,
    },
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use futures_util::{SinkExt, StreamExt};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{debug, info, warn};
use uuid::Uuid;

use qbtc_domain::{
    CloseReason, OrderRequest, OrderSide, OrderType, PortfolioState, Position, Price, Quantity,
    Symbol,
};
use qbtc_exec::{ExecError, ExchangePort, ExecutionMetrics, TradingState};
use qbtc_store::Store;

use crate::error::DaemonError;
use crate::event_bus::EventBus;
use crate::metrics::DaemonMetrics;
use crate::position_manager::{OpenPositionRequest, PositionManager};

/// Default page size of `/history` and `/orders`
const DEFAULT_LIMIT: usize = 50;

/// Largest page size accepted
const MAX_LIMIT: usize = 1000;

// =============================================================================
// API State
// =============================================================================

/// Shared state for API handlers.
pub struct ApiState<E: ExchangePort + ?Sized + 'static, S: Store + ?Sized + 'static> {
    pub position_manager: Arc<PositionManager<E, S>>,
    pub event_bus: Arc<EventBus>,
    pub metrics: Arc<DaemonMetrics>,
    pub started_at: DateTime<Utc>,
    pub environment: String,
}

// =============================================================================
// Envelope and errors
// =============================================================================

/// Response envelope.
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    fn ok(data: T) -> Json<Self> {
        Json(Self { success: true, data: Some(data), message: None })
    }
}

/// Error half of every handler result.
#[derive(Debug)]
pub struct ApiError(DaemonError);

impl<E: Into<DaemonError>> From<E> for ApiError {
    fn from(err: E) -> Self {
        Self(err.into())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(&self.0);
        if status.is_server_error() {
            warn!(%status, error = %self.0, "Request failed");
        } else {
            debug!(%status, error = %self.0, "Request rejected");
        }
        let body: ApiResponse<()> =
            ApiResponse { success: false, data: None, message: Some(self.0.to_string()) };
        (status, Json(body)).into_response()
    }
}

/// HTTP status for a daemon error.
pub fn status_for(err: &DaemonError) -> StatusCode {
    if err.is_not_found() {
        return StatusCode::NOT_FOUND;
    }
    match err {
        DaemonError::Risk(_) => StatusCode::UNPROCESSABLE_ENTITY,
        DaemonError::Domain(_) | DaemonError::InvalidRequest(_) | DaemonError::Engine(_) => {
            StatusCode::BAD_REQUEST
        },
        DaemonError::Exec(e) => match e {
            ExecError::Validation(_) | ExecError::Domain(_) => StatusCode::BAD_REQUEST,
            ExecError::TradingDisabled(_) => StatusCode::CONFLICT,
            ExecError::Exchange(_)
            | ExecError::Api { .. }
            | ExecError::RateLimited(_)
            | ExecError::OrderRejected(_)
            | ExecError::Timeout(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        },
        DaemonError::ExitIncomplete { .. } => StatusCode::BAD_GATEWAY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

type ApiResult<T> = Result<Json<ApiResponse<T>>, ApiError>;

// =============================================================================
// Request/Response Types
// =============================================================================

/// Health check response.
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// Status response.
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub version: String,
    pub environment: String,
    pub started_at: DateTime<Utc>,
    pub uptime_secs: i64,
    pub trading: TradingState,
    pub open_positions: usize,
    pub total_equity: Decimal,
    pub free_margin: Decimal,
    pub ws_clients: usize,
    pub execution: ExecutionMetrics,
}

/// Pagination.
#[derive(Debug, Deserialize)]
pub struct LimitQuery {
    pub limit: Option<usize>,
}

impl LimitQuery {
    fn limit(&self) -> usize {
        self.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT)
    }
}

/// Request to place an unmanaged order.
#[derive(Debug, Deserialize)]
pub struct PlaceOrderRequest {
    pub symbol: String,
    pub side: OrderSide,
    #[serde(default = "default_order_type")]
    pub order_type: OrderType,
    pub quantity: Decimal,
    #[serde(default)]
    pub price: Option<Decimal>,
    #[serde(default)]
    pub reduce_only: bool,
}

fn default_order_type() -> OrderType {
    OrderType::Market
}

impl PlaceOrderRequest {
    fn into_order(self) -> Result<OrderRequest, DaemonError> {
        let symbol = Symbol::from_pair(&self.symbol)?;
        let quantity = Quantity::new(self.quantity)?;
        let order = match (self.order_type, self.price) {
            (OrderType::Market, _) => OrderRequest::market(symbol, self.side, quantity),
            (OrderType::Limit, Some(price)) => {
                OrderRequest::limit(symbol, self.side, quantity, Price::new(price)?)
            },
            (OrderType::Limit, None) => {
                return Err(DaemonError::InvalidRequest("limit order requires a price".into()))
            },
        };
        Ok(if self.reduce_only { order.reduce_only() } else { order })
    }
}

/// Trading switch action.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TradingAction {
    Enable,
    Disable,
    Emergency,
    ClearEmergency,
}

/// Request body of `POST /trading`.
#[derive(Debug, Deserialize)]
pub struct TradingRequest {
    pub action: TradingAction,
}

// =============================================================================
// Router
// =============================================================================

/// Create the API router.
pub fn create_router<E, S>(state: Arc<ApiState<E, S>>) -> Router
where
    E: ExchangePort + ?Sized + 'static,
    S: Store + ?Sized + 'static,
{
    Router::new()
        .route("/health", get(health_handler::<E, S>))
        .route("/status", get(status_handler::<E, S>))
        .route(
            "/positions",
            get(list_positions_handler::<E, S>).post(open_position_handler::<E, S>),
        )
        .route("/positions/:id", get(get_position_handler::<E, S>))
        .route("/positions/:id/close", post(close_position_handler::<E, S>))
        .route("/portfolio", get(portfolio_handler::<E, S>))
        .route("/history", get(history_handler::<E, S>))
        .route("/orders", get(list_orders_handler::<E, S>).post(place_order_handler::<E, S>))
        .route("/orders/:symbol/:order_id", delete(cancel_order_handler::<E, S>))
        .route("/trading", post(trading_handler::<E, S>))
        .route("/metrics", get(metrics_handler::<E, S>))
        .route("/ws", get(ws_handler::<E, S>))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// =============================================================================
// Handlers
// =============================================================================

/// Health check: the daemon is up and the exchange answers.
async fn health_handler<E, S>(State(state): State<Arc<ApiState<E, S>>>) -> Response
where
    E: ExchangePort + ?Sized + 'static,
    S: Store + ?Sized + 'static,
{
    let version = env!("CARGO_PKG_VERSION").to_string();
    match state.position_manager.executor().exchange().health_check().await {
        Ok(()) => {
            ApiResponse::ok(HealthResponse { status: "healthy".to_string(), version })
                .into_response()
        },
        Err(e) => {
            let body = ApiResponse {
                success: false,
                data: Some(HealthResponse { status: "degraded".to_string(), version }),
                message: Some(e.to_string()),
            };
            (StatusCode::SERVICE_UNAVAILABLE, Json(body)).into_response()
        },
    }
}

async fn status_handler<E, S>(State(state): State<Arc<ApiState<E, S>>>) -> ApiResult<StatusResponse>
where
    E: ExchangePort + ?Sized + 'static,
    S: Store + ?Sized + 'static,
{
    let manager = &state.position_manager;
    let portfolio = manager.portfolio().await?;
    let now = manager.clock().now();

    Ok(ApiResponse::ok(StatusResponse {
        version: env!("CARGO_PKG_VERSION").to_string(),
        environment: state.environment.clone(),
        started_at: state.started_at,
        uptime_secs: (now - state.started_at).num_seconds().max(0),
        trading: manager.executor().trading_state(),
        open_positions: portfolio.open_positions,
        total_equity: portfolio.total_equity,
        free_margin: portfolio.free_margin,
        // The daemon's own logging receiver is not a client
        ws_clients: state.event_bus.receiver_count().saturating_sub(1),
        execution: manager.executor().metrics(),
    }))
}

async fn list_positions_handler<E, S>(
    State(state): State<Arc<ApiState<E, S>>>,
) -> ApiResult<Vec<Position>>
where
    E: ExchangePort + ?Sized + 'static,
    S: Store + ?Sized + 'static,
{
    Ok(ApiResponse::ok(state.position_manager.open_positions().await?))
}

async fn open_position_handler<E, S>(
    State(state): State<Arc<ApiState<E, S>>>,
    Json(req): Json<OpenPositionRequest>,
) -> Result<(StatusCode, Json<ApiResponse<Position>>), ApiError>
where
    E: ExchangePort + ?Sized + 'static,
    S: Store + ?Sized + 'static,
{
    let position = state.position_manager.open_position(req).await?;
    Ok((StatusCode::CREATED, ApiResponse::ok(position)))
}

async fn get_position_handler<E, S>(
    State(state): State<Arc<ApiState<E, S>>>,
    Path(id): Path<Uuid>,
) -> ApiResult<Position>
where
    E: ExchangePort + ?Sized + 'static,
    S: Store + ?Sized + 'static,
{
    Ok(ApiResponse::ok(state.position_manager.find_position(id).await?))
}

async fn close_position_handler<E, S>(
    State(state): State<Arc<ApiState<E, S>>>,
    Path(id): Path<Uuid>,
) -> ApiResult<Position>
where
    E: ExchangePort + ?Sized + 'static,
    S: Store + ?Sized + 'static,
{
    info!(position_id = %id, "Manual close requested");
    let position = state.position_manager.close_position(id, CloseReason::Manual).await?;
    Ok(ApiResponse::ok(position))
}

async fn portfolio_handler<E, S>(
    State(state): State<Arc<ApiState<E, S>>>,
) -> ApiResult<PortfolioState>
where
    E: ExchangePort + ?Sized + 'static,
    S: Store + ?Sized + 'static,
{
    Ok(ApiResponse::ok(state.position_manager.portfolio().await?))
}

async fn history_handler<E, S>(
    State(state): State<Arc<ApiState<E, S>>>,
    Query(query): Query<LimitQuery>,
) -> ApiResult<Vec<Position>>
where
    E: ExchangePort + ?Sized + 'static,
    S: Store + ?Sized + 'static,
{
    Ok(ApiResponse::ok(state.position_manager.history(query.limit()).await?))
}

async fn list_orders_handler<E, S>(
    State(state): State<Arc<ApiState<E, S>>>,
    Query(query): Query<LimitQuery>,
) -> ApiResult<Vec<qbtc_domain::ExecutionRecord>>
where
    E: ExchangePort + ?Sized + 'static,
    S: Store + ?Sized + 'static,
{
    Ok(ApiResponse::ok(state.position_manager.recent_orders(query.limit()).await?))
}

async fn place_order_handler<E, S>(
    State(state): State<Arc<ApiState<E, S>>>,
    Json(req): Json<PlaceOrderRequest>,
) -> Result<(StatusCode, Json<ApiResponse<qbtc_domain::ExecutionRecord>>), ApiError>
where
    E: ExchangePort + ?Sized + 'static,
    S: Store + ?Sized + 'static,
{
    let order = req.into_order()?;
    let record = state.position_manager.place_order(order).await?;
    Ok((StatusCode::CREATED, ApiResponse::ok(record)))
}

async fn cancel_order_handler<E, S>(
    State(state): State<Arc<ApiState<E, S>>>,
    Path((symbol, order_id)): Path<(String, String)>,
) -> ApiResult<String>
where
    E: ExchangePort + ?Sized + 'static,
    S: Store + ?Sized + 'static,
{
    let symbol = Symbol::from_pair(&symbol)?;
    state.position_manager.cancel_order(&symbol, &order_id).await?;
    Ok(ApiResponse::ok(order_id))
}

async fn trading_handler<E, S>(
    State(state): State<Arc<ApiState<E, S>>>,
    Json(req): Json<TradingRequest>,
) -> ApiResult<TradingState>
where
    E: ExchangePort + ?Sized + 'static,
    S: Store + ?Sized + 'static,
{
    let executor = state.position_manager.executor();
    match req.action {
        TradingAction::Enable => {
            if executor.trading_state().emergency {
                return Err(DaemonError::InvalidRequest(
                    "emergency mode active, clear it first".to_string(),
                )
                .into());
            }
            executor.set_trading_enabled(true);
        },
        TradingAction::Disable => executor.set_trading_enabled(false),
        TradingAction::Emergency => {
            executor.enter_emergency("operator request");
        },
        TradingAction::ClearEmergency => state.position_manager.clear_emergency().await?,
    }
    Ok(ApiResponse::ok(executor.trading_state()))
}

async fn metrics_handler<E, S>(
    State(state): State<Arc<ApiState<E, S>>>,
) -> Result<Response, ApiError>
where
    E: ExchangePort + ?Sized + 'static,
    S: Store + ?Sized + 'static,
{
    state.metrics.observe_execution(&state.position_manager.executor().metrics());
    let body = state.metrics.render()?;
    Ok(([(header::CONTENT_TYPE, "text/plain; version=0.0.4")], body).into_response())
}

// =============================================================================
// WebSocket
// =============================================================================

async fn ws_handler<E, S>(
    ws: WebSocketUpgrade,
    State(state): State<Arc<ApiState<E, S>>>,
) -> impl IntoResponse
where
    E: ExchangePort + ?Sized + 'static,
    S: Store + ?Sized + 'static,
{
    let bus = state.event_bus.clone();
    ws.on_upgrade(move |socket| handle_socket(socket, bus))
}

/// Forward bus events to one client until either side goes away.
async fn handle_socket(socket: WebSocket, event_bus: Arc<EventBus>) {
    info!("WebSocket client connected");
    let mut events = event_bus.subscribe();
    let (mut sender, mut receiver) = socket.split();

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(Ok(event)) => {
                    let text = match serde_json::to_string(&event) {
                        Ok(text) => text,
                        Err(e) => {
                            warn!(error = %e, "Event serialization failed");
                            continue;
                        },
                    };
                    if sender.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                },
                // Slow client: skip what it missed
                Some(Err(lag)) => debug!(%lag, "WebSocket client lagged"),
                None => break,
            },
            incoming = receiver.next() => match incoming {
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                Some(Ok(_)) => {},
            },
        }
    }
    info!("WebSocket client disconnected");
}

// =============================================================================
// Tests
// =============================================================================
