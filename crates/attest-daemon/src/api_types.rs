//! Request and response types for all attest-daemon HTTP endpoints.
//!
//! Inbound bodies keep loosely-typed fields (`serde_json::Value`, `String`)
//! so validation failures surface as structured 400s instead of extractor
//! rejections. No business logic lives here.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use attest_protocol::Reply;
use attest_schemas::UnitId;

// ---------------------------------------------------------------------------
// /v1/health
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub ok: bool,
    pub service: &'static str,
    pub version: &'static str,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Stable code, e.g. "ALREADY_EXISTS".
    pub code: String,
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit: Option<UnitId>,
}

// ---------------------------------------------------------------------------
// /v1/inbound
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundRequest {
    pub device: String,
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundResponse {
    pub reply: Reply,
    pub text: String,
}

// ---------------------------------------------------------------------------
// /v1/orders
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateOrderRequest {
    #[serde(default)]
    pub provider: Option<String>,
    pub data: Value,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub device: Option<String>,
    #[serde(default)]
    pub allow_duplicates: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateOrderResponse {
    pub id: i64,
    pub created: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetDeviceRequest {
    pub device: String,
}

/// Names one order: `id` wins over `data`, which wins over `device`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SelectorBody {
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(default)]
    pub data: Option<Value>,
    #[serde(default)]
    pub device: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BindRequest {
    #[serde(flatten)]
    pub selector: SelectorBody,
    pub address: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnbindRequest {
    #[serde(flatten)]
    pub selector: SelectorBody,
}
