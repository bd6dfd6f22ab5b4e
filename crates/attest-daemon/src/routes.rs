//! Axum router and all HTTP handlers for attest-daemon.
//!
//! `build_router` is the single entry point; `main.rs` calls it and attaches
//! middleware layers. Tests compose the bare router directly.

use std::{convert::Infallible, sync::Arc};

use axum::{
    extract::{Path, State},
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{get, post},
    Json, Router,
};
use futures_util::{Stream, StreamExt};
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tracing::info;

use attest_orders::{NewOrder, OrderError, OrderSelector};
use attest_schemas::{Address, AttributeSet, DeviceAddress};

use crate::{
    api_types::{
        BindRequest, CreateOrderRequest, CreateOrderResponse, ErrorResponse, HealthResponse,
        InboundRequest, InboundResponse, SelectorBody, SetDeviceRequest, UnbindRequest,
    },
    state::{AppState, BusMsg},
};

/// Build the complete application router wired to the given shared state.
///
/// Middleware layers (CORS, tracing) are **not** applied here; `main.rs`
/// attaches them after this call so tests can use the bare router.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/v1/health", get(health))
        .route("/v1/status", get(status_handler))
        .route("/v1/stream", get(stream))
        .route("/v1/inbound", post(inbound))
        .route("/v1/orders", post(create_order))
        .route("/v1/orders/bind", post(bind_address))
        .route("/v1/orders/unbind", post(unbind_address))
        .route("/v1/orders/:id", get(get_order))
        .route("/v1/orders/:id/device", post(set_device))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Error mapping
// ---------------------------------------------------------------------------

fn bad_request(code: &str, error: impl ToString) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorResponse {
            code: code.to_string(),
            error: error.to_string(),
            order_id: None,
            unit: None,
        }),
    )
        .into_response()
}

fn order_error(e: OrderError) -> Response {
    let status = match &e {
        OrderError::InvalidData(_) => StatusCode::BAD_REQUEST,
        OrderError::AddressNotFound | OrderError::OrderNotFound => StatusCode::NOT_FOUND,
        OrderError::AlreadyExists { .. }
        | OrderError::AlreadyAttested { .. }
        | OrderError::MismatchAddress { .. }
        | OrderError::IssuanceInProgress { .. } => StatusCode::CONFLICT,
        OrderError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status == StatusCode::INTERNAL_SERVER_ERROR {
        tracing::error!(error = %e, "order store failure");
    }
    let (order_id, unit) = match &e {
        OrderError::AlreadyExists { id, unit, .. } | OrderError::AlreadyAttested { id, unit } => {
            (Some(*id), unit.clone())
        }
        OrderError::MismatchAddress { id } | OrderError::IssuanceInProgress { id } => {
            (Some(*id), None)
        }
        _ => (None, None),
    };
    (
        status,
        Json(ErrorResponse {
            code: e.code().to_string(),
            error: e.to_string(),
            order_id,
            unit,
        }),
    )
        .into_response()
}

fn parse_device(raw: &str) -> Result<DeviceAddress, Response> {
    DeviceAddress::parse(raw).map_err(|e| bad_request("INVALID_DEVICE", e))
}

fn parse_address(raw: &str) -> Result<Address, Response> {
    Address::parse(raw).map_err(|e| bad_request("INVALID_ADDRESS", e))
}

fn parse_data(st: &AppState, raw: &serde_json::Value) -> Result<AttributeSet, Response> {
    AttributeSet::from_json(raw, st.settings.orders.max_attributes)
        .map_err(|e| order_error(OrderError::InvalidData(e)))
}

fn parse_selector(st: &AppState, body: &SelectorBody) -> Result<OrderSelector, Response> {
    if let Some(id) = body.id {
        return Ok(OrderSelector::Id(id));
    }
    if let Some(raw) = &body.data {
        let provider = st
            .settings
            .deployment
            .effective_provider(body.provider.as_deref());
        return Ok(OrderSelector::Data {
            provider,
            data: parse_data(st, raw)?,
        });
    }
    if let Some(device) = &body.device {
        return Ok(OrderSelector::Device(parse_device(device)?));
    }
    Err(bad_request(
        "INVALID_SELECTOR",
        "one of id, data or device is required",
    ))
}

// ---------------------------------------------------------------------------
// GET /v1/health
// ---------------------------------------------------------------------------

pub(crate) async fn health(State(st): State<Arc<AppState>>) -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            ok: true,
            service: st.build.service,
            version: st.build.version,
        }),
    )
}

// ---------------------------------------------------------------------------
// GET /v1/status
// ---------------------------------------------------------------------------

pub(crate) async fn status_handler(State(st): State<Arc<AppState>>) -> Response {
    match st.snapshot().await {
        Ok(snap) => {
            let _ = st.bus.send(BusMsg::Status(snap.clone()));
            (StatusCode::OK, Json(snap)).into_response()
        }
        Err(e) => order_error(OrderError::Store(e)),
    }
}

// ---------------------------------------------------------------------------
// POST /v1/inbound
// ---------------------------------------------------------------------------

pub(crate) async fn inbound(
    State(st): State<Arc<AppState>>,
    Json(req): Json<InboundRequest>,
) -> Response {
    let device = match parse_device(&req.device) {
        Ok(d) => d,
        Err(resp) => return resp,
    };
    let reply = st.inbound.handle(&device, &req.text).await;
    info!(device = %device, reply = reply.code(), "inbound handled");
    (
        StatusCode::OK,
        Json(InboundResponse {
            text: reply.text(),
            reply,
        }),
    )
        .into_response()
}

// ---------------------------------------------------------------------------
// /v1/orders
// ---------------------------------------------------------------------------

pub(crate) async fn create_order(
    State(st): State<Arc<AppState>>,
    Json(req): Json<CreateOrderRequest>,
) -> Response {
    let data = match parse_data(&st, &req.data) {
        Ok(d) => d,
        Err(resp) => return resp,
    };
    let mut new = NewOrder::new(
        st.settings
            .deployment
            .effective_provider(req.provider.as_deref()),
        data,
    );
    if let Some(raw) = &req.address {
        match parse_address(raw) {
            Ok(a) => new.address = Some(a),
            Err(resp) => return resp,
        }
    }
    if let Some(raw) = &req.device {
        match parse_device(raw) {
            Ok(d) => new.device = Some(d),
            Err(resp) => return resp,
        }
    }

    match st.lifecycle.create_order(new, req.allow_duplicates).await {
        Ok(out) => {
            if out.created {
                st.log_line("INFO", format!("order {} created", out.id));
            }
            let status = if out.created {
                StatusCode::CREATED
            } else {
                StatusCode::OK
            };
            (
                status,
                Json(CreateOrderResponse {
                    id: out.id,
                    created: out.created,
                }),
            )
                .into_response()
        }
        Err(e) => order_error(e),
    }
}

pub(crate) async fn get_order(State(st): State<Arc<AppState>>, Path(id): Path<i64>) -> Response {
    match st.lifecycle.get_order(id).await {
        Ok(order) => (StatusCode::OK, Json(order)).into_response(),
        Err(e) => order_error(e),
    }
}

pub(crate) async fn set_device(
    State(st): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Json(req): Json<SetDeviceRequest>,
) -> Response {
    let device = match parse_device(&req.device) {
        Ok(d) => d,
        Err(resp) => return resp,
    };
    match st.lifecycle.rebind_device_address(id, &device).await {
        Ok(order) => (StatusCode::OK, Json(order)).into_response(),
        Err(e) => order_error(e),
    }
}

pub(crate) async fn bind_address(
    State(st): State<Arc<AppState>>,
    Json(req): Json<BindRequest>,
) -> Response {
    let selector = match parse_selector(&st, &req.selector) {
        Ok(s) => s,
        Err(resp) => return resp,
    };
    let address = match parse_address(&req.address) {
        Ok(a) => a,
        Err(resp) => return resp,
    };
    match st.lifecycle.bind_address(&selector, &address).await {
        Ok(order) => (StatusCode::OK, Json(order)).into_response(),
        Err(e) => order_error(e),
    }
}

pub(crate) async fn unbind_address(
    State(st): State<Arc<AppState>>,
    Json(req): Json<UnbindRequest>,
) -> Response {
    let selector = match parse_selector(&st, &req.selector) {
        Ok(s) => s,
        Err(resp) => return resp,
    };
    match st.lifecycle.unbind_address(&selector).await {
        Ok(order) => (StatusCode::OK, Json(order)).into_response(),
        Err(e) => order_error(e),
    }
}

// ---------------------------------------------------------------------------
// GET /v1/stream  (SSE)
// ---------------------------------------------------------------------------

pub(crate) async fn stream(State(st): State<Arc<AppState>>) -> Response {
    let mut headers = HeaderMap::new();
    headers.insert("Cache-Control", HeaderValue::from_static("no-cache"));
    headers.insert("Connection", HeaderValue::from_static("keep-alive"));

    let rx = st.bus.subscribe();
    let events = broadcast_to_sse(rx);

    (headers, Sse::new(events).keep_alive(KeepAlive::new())).into_response()
}

fn broadcast_to_sse(
    rx: broadcast::Receiver<BusMsg>,
) -> impl Stream<Item = Result<Event, Infallible>> {
    BroadcastStream::new(rx).filter_map(|msg| async move {
        match msg {
            Ok(m) => {
                let data = serde_json::to_string(&m).ok()?;
                Some(Ok(Event::default().event(m.event_name()).data(data)))
            }
            Err(_) => None, // lagged / closed
        }
    })
}
