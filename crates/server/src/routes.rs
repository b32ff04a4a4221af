//! HTTP API under /api/v1

use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use engine::{MonitorError, PriceMonitor};
use persistence::repository::{DealFilter, DealKind};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{error, info};

use crate::APP_VERSION;

const DEFAULT_LIMIT: i64 = 50;
const MAX_LIMIT: i64 = 500;

#[derive(Clone)]
pub struct AppState {
    pub monitor: Arc<PriceMonitor>,
}

type ApiResult = Result<Json<Value>, (StatusCode, Json<Value>)>;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(api_health))
        .route("/products", get(api_list_products).post(api_add_product))
        .route("/products/search", get(api_search_products))
        .route(
            "/products/:identifier",
            get(api_get_product).delete(api_remove_product),
        )
        .route("/products/:identifier/alerts", get(api_product_alerts))
        .route("/prices/profit-estimate", post(api_profit_estimate))
        .route("/prices/:identifier/history", get(api_price_history))
        .route("/deals", get(api_list_deals))
        .route("/deals/scan", post(api_scan))
        .route("/deals/:id/dismiss", post(api_dismiss_deal))
        .route("/exports/json", get(api_export_json))
        .route("/exports/csv", get(api_export_csv))
        .with_state(state)
}

fn failure(status: StatusCode, message: impl Into<String>) -> (StatusCode, Json<Value>) {
    (
        status,
        Json(json!({
            "success": false,
            "error": message.into(),
        })),
    )
}

fn monitor_error(e: MonitorError) -> (StatusCode, Json<Value>) {
    let status = match &e {
        MonitorError::NotFound(_) => StatusCode::NOT_FOUND,
        MonitorError::InvalidIdentifier(_) => StatusCode::BAD_REQUEST,
        MonitorError::Db(_) => {
            error!("Request failed: {e}");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    failure(status, e.to_string())
}

fn limit_param(params: &HashMap<String, String>) -> i64 {
    params
        .get("limit")
        .and_then(|s| s.parse().ok())
        .unwrap_or(DEFAULT_LIMIT)
        .clamp(1, MAX_LIMIT)
}

fn offset_param(params: &HashMap<String, String>) -> i64 {
    params
        .get("offset")
        .and_then(|s| s.parse().ok())
        .unwrap_or(0i64)
        .max(0)
}

fn decimal_param(
    params: &HashMap<String, String>,
    name: &str,
) -> Result<Option<Decimal>, (StatusCode, Json<Value>)> {
    params
        .get(name)
        .map(|raw| {
            Decimal::from_str(raw.trim()).map_err(|_| {
                failure(StatusCode::BAD_REQUEST, format!("'{name}' must be a number"))
            })
        })
        .transpose()
}

// ============================================================================
// Health
// ============================================================================

/// GET /api/v1/health
async fn api_health(State(state): State<AppState>) -> ApiResult {
    let health = state.monitor.health().await.map_err(monitor_error)?;
    Ok(Json(json!({
        "status": "ok",
        "service": "price-watch",
        "version": APP_VERSION,
        "providers": {
            "catalog": health.catalog_configured,
            "history": health.history_configured,
        },
        "active_items": health.active_items,
        "active_deals": health.active_deals,
    })))
}

// ============================================================================
// Products
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct AddProductRequest {
    pub identifier: String,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub target_buy_price: Option<Decimal>,
}

/// GET /api/v1/products
async fn api_list_products(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> ApiResult {
    let limit = limit_param(&params);
    let offset = offset_param(&params);
    let items = state
        .monitor
        .list_items(offset, limit)
        .await
        .map_err(monitor_error)?;

    Ok(Json(json!({
        "success": true,
        "data": items,
        "limit": limit,
        "offset": offset,
    })))
}

/// POST /api/v1/products: track an item and check it once
async fn api_add_product(
    State(state): State<AppState>,
    Json(request): Json<AddProductRequest>,
) -> ApiResult {
    let (item, outcome) = state
        .monitor
        .add_item(
            &request.identifier,
            request.label.as_deref(),
            request.target_buy_price,
        )
        .await
        .map_err(monitor_error)?;

    Ok(Json(json!({
        "success": true,
        "item": item,
        "check": outcome,
    })))
}

/// GET /api/v1/products/search?keywords=...&max_results=10
async fn api_search_products(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> ApiResult {
    let keywords = params
        .get("keywords")
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| failure(StatusCode::BAD_REQUEST, "'keywords' is required"))?;
    let max_results: usize = params
        .get("max_results")
        .and_then(|s| s.parse().ok())
        .unwrap_or(10);

    let results = state.monitor.search(keywords, max_results).await;
    Ok(Json(json!({
        "success": true,
        "data": results,
        "total": results.len(),
    })))
}

/// GET /api/v1/products/:identifier
async fn api_get_product(
    State(state): State<AppState>,
    Path(identifier): Path<String>,
) -> ApiResult {
    let detail = state
        .monitor
        .get_item(&identifier)
        .await
        .map_err(monitor_error)?;
    Ok(Json(json!({ "success": true, "data": detail })))
}

/// DELETE /api/v1/products/:identifier: stop tracking
async fn api_remove_product(
    State(state): State<AppState>,
    Path(identifier): Path<String>,
) -> ApiResult {
    state
        .monitor
        .remove_item(&identifier)
        .await
        .map_err(monitor_error)?;
    Ok(Json(json!({ "success": true })))
}

/// GET /api/v1/products/:identifier/alerts
async fn api_product_alerts(
    State(state): State<AppState>,
    Path(identifier): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> ApiResult {
    let alerts = state
        .monitor
        .alerts_for(&identifier, limit_param(&params))
        .await
        .map_err(monitor_error)?;
    Ok(Json(json!({
        "success": true,
        "data": alerts,
        "total": alerts.len(),
    })))
}

// ============================================================================
// Prices
// ============================================================================

/// GET /api/v1/prices/:identifier/history?limit=100
async fn api_price_history(
    State(state): State<AppState>,
    Path(identifier): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> ApiResult {
    let history = state
        .monitor
        .price_history(&identifier, limit_param(&params))
        .await
        .map_err(monitor_error)?;
    Ok(Json(json!({ "success": true, "data": history })))
}

#[derive(Debug, Deserialize)]
pub struct ProfitEstimateRequest {
    pub sale_price: Decimal,
    pub cost: Decimal,
}

/// POST /api/v1/prices/profit-estimate
async fn api_profit_estimate(
    State(state): State<AppState>,
    Json(request): Json<ProfitEstimateRequest>,
) -> ApiResult {
    if request.sale_price <= Decimal::ZERO || request.cost <= Decimal::ZERO {
        return Err(failure(
            StatusCode::BAD_REQUEST,
            "'sale_price' and 'cost' must be greater than zero",
        ));
    }

    let estimate = state.monitor.estimate(request.sale_price, request.cost);
    Ok(Json(json!({ "success": true, "data": estimate })))
}

// ============================================================================
// Deals
// ============================================================================

/// GET /api/v1/deals?kind=..&min_roi=..&offset=..&limit=..
async fn api_list_deals(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> ApiResult {
    let kind = params
        .get("kind")
        .map(|k| DealKind::from_str(k))
        .transpose()
        .map_err(|e| failure(StatusCode::BAD_REQUEST, e))?;
    let filter = DealFilter {
        kind,
        min_roi: decimal_param(&params, "min_roi")?,
        offset: offset_param(&params),
        limit: limit_param(&params),
    };

    let deals = state
        .monitor
        .list_deals(&filter)
        .await
        .map_err(monitor_error)?;
    Ok(Json(json!({
        "success": true,
        "data": deals,
        "total": deals.len(),
        "limit": filter.limit,
        "offset": filter.offset,
    })))
}

/// POST /api/v1/deals/scan: check every active item now
async fn api_scan(State(state): State<AppState>) -> ApiResult {
    info!("Manual scan requested via API");
    let outcomes = state.monitor.check_all().await.map_err(monitor_error)?;
    let deals_found: usize = outcomes.iter().map(|o| o.deals_found).sum();
    Ok(Json(json!({
        "success": true,
        "checked": outcomes.len(),
        "deals_found": deals_found,
        "results": outcomes,
    })))
}

/// POST /api/v1/deals/:id/dismiss
async fn api_dismiss_deal(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult {
    state
        .monitor
        .dismiss_deal(id)
        .await
        .map_err(monitor_error)?;
    Ok(Json(json!({ "success": true })))
}

// ============================================================================
// Exports
// ============================================================================

/// GET /api/v1/exports/json
async fn api_export_json(State(state): State<AppState>) -> ApiResult {
    let export = state.monitor.export().await.map_err(monitor_error)?;
    Ok(Json(json!(export)))
}

/// GET /api/v1/exports/csv
async fn api_export_csv(
    State(state): State<AppState>,
) -> Result<Response, (StatusCode, Json<Value>)> {
    let export = state.monitor.export().await.map_err(monitor_error)?;
    let body = export.to_csv().map_err(|e| {
        error!("CSV export failed: {e:#}");
        failure(StatusCode::INTERNAL_SERVER_ERROR, "CSV export failed")
    })?;

    Ok((
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8"),
            (
                header::CONTENT_DISPOSITION,
                "attachment; filename=\"price-watch-export.csv\"",
            ),
        ],
        body,
    )
        .into_response())
}
