use crate::allowlist::Metric;
use crate::constants::STACKED_PRODUCTS;
use crate::error::PipelineError;
use crate::storage::{
    BubbleRecord, DecadePoint, DistributionPoint, JsonRow, ProductStats, Storage, TopProducerRow,
    TrendPoint,
};
use axum::{
    extract::{
        rejection::{PathRejection, QueryRejection},
        MatchedPath, Path, Query, State,
    },
    http::{Method, Request, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use hyper::Server;
use metrics::counter;
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Deserialize;
use serde_json::json;
use std::net::SocketAddr;
use std::path::Path as FsPath;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::{ServeDir, ServeFile};
use tracing::{error, info, warn};

#[derive(Clone)]
pub struct AppState {
    pub storage: Arc<dyn Storage>,
    pub metrics: Option<PrometheusHandle>,
}

/// Failure of a request, rendered as `{"error": "..."}`.
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    Internal(PipelineError),
}

impl From<PipelineError> for ApiError {
    fn from(e: PipelineError) -> Self {
        ApiError::Internal(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(m) => (StatusCode::BAD_REQUEST, m),
            ApiError::NotFound(m) => (StatusCode::NOT_FOUND, m),
            ApiError::Internal(e) => {
                error!(error = %e, "request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".to_string())
            }
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

impl From<PathRejection> for ApiError {
    fn from(rejection: PathRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

fn metric(state: &AppState, name: &str) -> Result<Metric, ApiError> {
    state.storage.allowlist().check(name).ok_or_else(|| {
        warn!(product = name, "rejected unknown product");
        ApiError::BadRequest(format!("Invalid product name: {name}"))
    })
}

/// Health check endpoint
async fn health() -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "service": "cropstats",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

async fn all_data(State(state): State<AppState>) -> ApiResult<Vec<JsonRow>> {
    Ok(Json(state.storage.all_rows()?))
}

async fn country_year(
    State(state): State<AppState>,
    path: Result<Path<(String, i64)>, PathRejection>,
) -> ApiResult<JsonRow> {
    let Path((country, year)) = path?;
    match state.storage.row_for(&country, year)? {
        Some(row) => Ok(Json(row)),
        None => {
            warn!(%country, year, "no data found");
            Err(ApiError::NotFound("No data found".to_string()))
        }
    }
}

async fn yearly(State(state): State<AppState>) -> ApiResult<Vec<JsonRow>> {
    Ok(Json(state.storage.yearly()?))
}

#[derive(Debug, Deserialize)]
struct ProductQuery {
    product: Option<String>,
}

impl ProductQuery {
    fn metric(&self, state: &AppState) -> Result<Metric, ApiError> {
        match self.product.as_deref() {
            Some(p) if !p.is_empty() => metric(state, p),
            _ => Err(ApiError::BadRequest("Missing product parameter".to_string())),
        }
    }
}

async fn decade(
    State(state): State<AppState>,
    query: Result<Query<ProductQuery>, QueryRejection>,
) -> ApiResult<Vec<DecadePoint>> {
    let Query(q) = query?;
    let m = q.metric(&state)?;
    let points = state.storage.decade_series(&m)?;
    if points.is_empty() {
        return Err(ApiError::NotFound("No data found for the specified product.".to_string()));
    }
    Ok(Json(points))
}

async fn product_stats(
    State(state): State<AppState>,
    query: Result<Query<ProductQuery>, QueryRejection>,
) -> ApiResult<ProductStats> {
    let Query(q) = query?;
    let m = q.metric(&state)?;
    state
        .storage
        .product_stats(&m)?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound("No data available for this product".to_string()))
}

async fn scatter(
    State(state): State<AppState>,
    path: Result<Path<(String, String)>, PathRejection>,
) -> ApiResult<Vec<JsonRow>> {
    let Path((p1, p2)) = path?;
    let (x, y) = match (state.storage.allowlist().check(&p1), state.storage.allowlist().check(&p2)) {
        (Some(x), Some(y)) => (x, y),
        _ => return Err(ApiError::BadRequest("Invalid product name(s)".to_string())),
    };
    Ok(Json(state.storage.scatter(&x, &y)?))
}

async fn stats(State(state): State<AppState>) -> ApiResult<JsonRow> {
    Ok(Json(state.storage.summary()?))
}

async fn countries(State(state): State<AppState>) -> ApiResult<Vec<String>> {
    Ok(Json(state.storage.entities()?))
}

async fn years(State(state): State<AppState>) -> ApiResult<Vec<i64>> {
    Ok(Json(state.storage.years()?))
}

async fn products(State(state): State<AppState>) -> Json<Vec<String>> {
    Json(state.storage.allowlist().names().to_vec())
}

async fn trend(
    State(state): State<AppState>,
    path: Result<Path<(String, String)>, PathRejection>,
) -> ApiResult<Vec<TrendPoint>> {
    let Path((country, product)) = path?;
    let m = metric(&state, &product)?;
    Ok(Json(state.storage.trend(&country, &m)?))
}

async fn country_trends(
    State(state): State<AppState>,
    path: Result<Path<String>, PathRejection>,
) -> ApiResult<Vec<JsonRow>> {
    let Path(country) = path?;
    Ok(Json(state.storage.country_trends(&country)?))
}

async fn distribution(
    State(state): State<AppState>,
    path: Result<Path<(i64, String)>, PathRejection>,
) -> ApiResult<Vec<DistributionPoint>> {
    let Path((year, product)) = path?;
    let m = metric(&state, &product)?;
    Ok(Json(state.storage.distribution(year, &m)?))
}

async fn stacked(
    State(state): State<AppState>,
    path: Result<Path<i64>, PathRejection>,
) -> ApiResult<Vec<JsonRow>> {
    let Path(year) = path?;
    let allow = state.storage.allowlist();
    let metrics: Vec<Metric> = STACKED_PRODUCTS.iter().filter_map(|p| allow.check(p)).collect();
    Ok(Json(state.storage.stacked(year, &metrics)?))
}

async fn bubble(State(state): State<AppState>) -> ApiResult<Vec<BubbleRecord>> {
    Ok(Json(state.storage.bubble()?))
}

#[derive(Debug, Deserialize)]
struct TopProducersQuery {
    crop_type: Option<String>,
    limit: Option<i64>,
}

async fn top_producers(
    State(state): State<AppState>,
    query: Result<Query<TopProducersQuery>, QueryRejection>,
) -> ApiResult<Vec<TopProducerRow>> {
    let Query(q) = query?;
    let crop_type = q.crop_type.unwrap_or_else(|| "Maize_Production".to_string());
    let limit = q.limit.unwrap_or(10);
    if limit < 0 {
        return Err(ApiError::BadRequest("limit must not be negative".to_string()));
    }
    Ok(Json(state.storage.top_producers(&crop_type, limit)?))
}

async fn crop_types(State(state): State<AppState>) -> ApiResult<Vec<String>> {
    Ok(Json(state.storage.crop_types()?))
}

async fn render_metrics(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(handle) => handle.render().into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn track_requests<B>(req: Request<B>, next: Next<B>) -> Response {
    let route = req
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| "unmatched".to_string());
    let response = next.run(req).await;
    counter!(
        "cropstats_http_requests_total",
        "route" => route,
        "status" => response.status().as_u16().to_string()
    )
    .increment(1);
    response
}

/// Create the HTTP router with all API routes and the dashboard's static files.
pub fn create_server(state: AppState, static_dir: &FsPath) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(render_metrics))
        .route("/api/data", get(all_data))
        .route("/api/data/yearly", get(yearly))
        .route("/api/data/decade", get(decade))
        .route("/api/data/stats", get(product_stats))
        .route("/api/data/bubble", get(bubble))
        .route("/api/data/:country/:year", get(country_year))
        .route("/api/scatter/:product1/:product2", get(scatter))
        .route("/api/stats", get(stats))
        .route("/api/countries", get(countries))
        .route("/api/years", get(years))
        .route("/api/products", get(products))
        .route("/api/products/list", get(crop_types))
        .route("/api/trend/:country/:product", get(trend))
        .route("/api/country-trends/:country", get(country_trends))
        .route("/api/map/:year/:product", get(distribution))
        .route("/api/stacked/:year", get(stacked))
        .route("/api/top_producers", get(top_producers))
        .route_layer(middleware::from_fn(track_requests))
        .route_service("/", ServeFile::new(static_dir.join("index.html")))
        .nest_service("/static", ServeDir::new(static_dir))
        .with_state(state)
        .layer(ServiceBuilder::new().layer(cors))
}

/// Serve until ctrl-c.
pub async fn start_server(state: AppState, addr: SocketAddr, static_dir: &FsPath) -> anyhow::Result<()> {
    let app = create_server(state, static_dir);

    info!(%addr, "HTTP server listening");
    println!("🚀 HTTP server running on http://{addr}");
    println!("💚 Health check: http://{addr}/health");

    Server::bind(&addr)
        .serve(app.into_make_service())
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown requested");
        })
        .await?;

    Ok(())
}
