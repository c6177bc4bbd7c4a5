//! HTTP surface over a [`Tracker`]
//!
//! # Endpoints
//!
//! - `POST /track` - form fields `name`, `id`; records presence now (201)
//! - `GET /retention` - `unit`, `interval`, `from_date`, `to_date` (dates as
//!   `YYYY-MM-DD`) and an optional `name`, defaulting to the configured
//!   metric; returns a [`RetentionReport`] as JSON
//! - `GET /health` - PING through the pool (200 or 503)
//!
//! Errors are returned as `{"error": "..."}`. Input problems are 400, store
//! problems are 500.

use crate::error::Error;
use crate::keys::DEFAULT_METRIC;
use crate::redis::PoolMetricsSnapshot;
use crate::retention::{RetentionQuery, RetentionReport};
use crate::tracker::Tracker;
use crate::types::{EntityId, Granularity};
use axum::{
    extract::{
        rejection::{FormRejection, QueryRejection},
        Query, State,
    },
    http::{HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Form, Json, Router,
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::{debug, warn};

/// Shared state handed to every handler
#[derive(Debug, Clone)]
pub struct AppState {
    /// Tracker all requests go through
    pub tracker: Tracker,
    /// Metric reported by retention requests without a `name`
    pub default_metric: String,
}

impl AppState {
    /// Wrap a tracker, reporting retention on [`DEFAULT_METRIC`] by default
    pub fn new(tracker: Tracker) -> Self {
        Self {
            tracker,
            default_metric: DEFAULT_METRIC.to_string(),
        }
    }

    /// Set the metric used when a retention request names none
    pub fn with_default_metric(mut self, name: impl Into<String>) -> Self {
        self.default_metric = name.into();
        self
    }
}

/// Build the application router
pub fn router(state: Arc<AppState>, cors_origins: &[String]) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/track", post(track))
        .route("/retention", get(retention))
        .layer(build_cors_layer(cors_origins))
        .with_state(state)
}

/// Build CORS layer; an empty list allows any origin
pub fn build_cors_layer(cors_origins: &[String]) -> CorsLayer {
    if cors_origins.is_empty() {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
            .allow_headers(Any)
    } else {
        let origins: Vec<HeaderValue> =
            cors_origins.iter().filter_map(|o| o.parse().ok()).collect();
        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
            .allow_headers(Any)
    }
}

// =============================================================================
// Request / Response Types
// =============================================================================

/// Form body of `POST /track`
///
/// Fields are kept as strings so a malformed id is reported as 400 with a
/// message rather than a bare extractor rejection.
#[derive(Debug, Deserialize)]
pub struct TrackForm {
    /// Metric name
    pub name: Option<String>,
    /// Entity id
    pub id: Option<String>,
}

/// Successful `POST /track` response
#[derive(Debug, Serialize)]
pub struct TrackResponse {
    /// Metric name recorded
    pub name: String,
    /// Entity id recorded
    pub id: EntityId,
}

/// Query string of `GET /retention`
#[derive(Debug, Deserialize)]
pub struct RetentionParams {
    /// Metric name, the configured default when absent
    pub name: Option<String>,
    /// month, week, day or hour
    pub unit: Option<String>,
    /// Follow-up periods per cohort
    pub interval: Option<String>,
    /// First cohort day, `YYYY-MM-DD`
    pub from_date: Option<String>,
    /// Last cohort day, `YYYY-MM-DD`
    pub to_date: Option<String>,
}

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// `healthy` or `unhealthy`
    pub status: &'static str,
    /// Crate version
    pub version: &'static str,
    /// PING round trip in microseconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_us: Option<u64>,
    /// Why the store is unreachable
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Pool counters
    pub pool: PoolMetricsSnapshot,
}

/// Error body
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Human readable message
    pub error: String,
}

/// Handler error carrying its status code
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        if err.is_client_error() {
            return Self::bad_request(err.to_string());
        }
        warn!(error = %err, "request failed");
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: err.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(ErrorResponse {
                error: self.message,
            }),
        )
            .into_response()
    }
}

// =============================================================================
// Handlers
// =============================================================================

/// Health check endpoint
pub async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let pool = state.tracker.pool();
    match pool.ping().await {
        Ok(latency) => (
            StatusCode::OK,
            Json(HealthResponse {
                status: "healthy",
                version: env!("CARGO_PKG_VERSION"),
                latency_us: Some(latency.as_micros() as u64),
                error: None,
                pool: pool.metrics(),
            }),
        ),
        Err(e) => {
            warn!(error = %e, "health check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(HealthResponse {
                    status: "unhealthy",
                    version: env!("CARGO_PKG_VERSION"),
                    latency_us: None,
                    error: Some(e.to_string()),
                    pool: pool.metrics(),
                }),
            )
        },
    }
}

/// Record presence of `id` under `name` at the current instant
pub async fn track(
    State(state): State<Arc<AppState>>,
    form: Result<Form<TrackForm>, FormRejection>,
) -> Result<(StatusCode, Json<TrackResponse>), ApiError> {
    let Form(form) = form.map_err(|e| ApiError::bad_request(e.body_text()))?;

    let name = required(form.name, "name")?;
    let id = parse_id(&required(form.id, "id")?)?;

    state.tracker.record_now(&name, id).await?;
    debug!(metric = %name, id, "tracked via http");

    Ok((StatusCode::CREATED, Json(TrackResponse { name, id })))
}

/// Cohort retention report
pub async fn retention(
    State(state): State<Arc<AppState>>,
    params: Result<Query<RetentionParams>, QueryRejection>,
) -> Result<Json<RetentionReport>, ApiError> {
    let Query(params) = params.map_err(|e| ApiError::bad_request(e.body_text()))?;
    let query = parse_retention(params, &state.default_metric)?;
    let report = state.tracker.retention(&query).await?;
    Ok(Json(report))
}

// =============================================================================
// Parsing
// =============================================================================

fn required(value: Option<String>, field: &str) -> Result<String, ApiError> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(ApiError::bad_request(format!("missing field '{}'", field))),
    }
}

fn parse_id(raw: &str) -> Result<EntityId, ApiError> {
    raw.trim().parse::<EntityId>().map_err(|_| {
        ApiError::bad_request(format!(
            "id must be an integer between 0 and {}, got '{}'",
            EntityId::MAX,
            raw
        ))
    })
}

fn parse_date(raw: &str, field: &str) -> Result<NaiveDate, ApiError> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d").map_err(|_| {
        ApiError::bad_request(format!("{} must be YYYY-MM-DD, got '{}'", field, raw))
    })
}

fn parse_retention(
    params: RetentionParams,
    default_metric: &str,
) -> Result<RetentionQuery, ApiError> {
    let name = match params.name {
        Some(name) if !name.trim().is_empty() => name,
        _ => default_metric.to_string(),
    };
    let unit: Granularity = required(params.unit, "unit")?.parse()?;
    let interval_raw = required(params.interval, "interval")?;
    let interval = interval_raw.trim().parse::<u32>().map_err(|_| {
        ApiError::bad_request(format!(
            "interval must be a non-negative integer, got '{}'",
            interval_raw
        ))
    })?;
    let from_date = parse_date(&required(params.from_date, "from_date")?, "from_date")?;
    let to_date = parse_date(&required(params.to_date, "to_date")?, "to_date")?;

    Ok(RetentionQuery {
        name,
        unit,
        interval,
        from_date,
        to_date,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(unit: &str, interval: &str, from: &str, to: &str) -> RetentionParams {
        RetentionParams {
            name: Some("active".to_string()),
            unit: Some(unit.to_string()),
            interval: Some(interval.to_string()),
            from_date: Some(from.to_string()),
            to_date: Some(to.to_string()),
        }
    }

    #[test]
    fn test_parse_id() {
        assert_eq!(parse_id("123").unwrap(), 123);
        assert_eq!(parse_id(" 7 ").unwrap(), 7);
        assert_eq!(parse_id("4294967295").unwrap(), u32::MAX);
        assert!(parse_id("-1").is_err());
        assert!(parse_id("4294967296").is_err());
        assert!(parse_id("12a").is_err());
    }

    #[test]
    fn test_parse_retention() {
        let q = parse_retention(params("week", "4", "2024-01-01", "2024-02-01"), "active")
            .unwrap();
        assert_eq!(q.name, "active");
        assert_eq!(q.unit, Granularity::Week);
        assert_eq!(q.interval, 4);
        assert_eq!(q.from_date, NaiveDate::from_ymd_opt(2024, 1, 1).unwrap());

        for bad in [
            params("fortnight", "4", "2024-01-01", "2024-02-01"),
            params("day", "-4", "2024-01-01", "2024-02-01"),
            params("day", "4", "01/01/2024", "2024-02-01"),
            params("day", "4", "2024-01-01", "2024-02-30"),
        ] {
            let err = parse_retention(bad, "active").unwrap_err();
            assert_eq!(err.status, StatusCode::BAD_REQUEST);
        }
    }

    #[test]
    fn test_parse_retention_default_metric() {
        let mut p = params("day", "12", "2013-06-01", "2013-06-12");
        p.name = None;
        let q = parse_retention(p, "logins").unwrap();
        assert_eq!(q.name, "logins");
        assert_eq!(q.interval, 12);

        let mut p = params("day", "12", "2013-06-01", "2013-06-12");
        p.name = Some("  ".to_string());
        assert_eq!(parse_retention(p, "logins").unwrap().name, "logins");

        let mut p = params("day", "12", "2013-06-01", "2013-06-12");
        p.name = Some("signups".to_string());
        assert_eq!(parse_retention(p, "logins").unwrap().name, "signups");
    }

    #[test]
    fn test_error_status_mapping() {
        let err = ApiError::from(Error::InvalidArgument("bad".into()));
        assert_eq!(err.status, StatusCode::BAD_REQUEST);

        let err = ApiError::from(Error::TransactionError("EXEC aborted".into()));
        assert_eq!(err.status, StatusCode::INTERNAL_SERVER_ERROR);

        let err = ApiError::from(Error::ConnectionError("refused".into()));
        assert_eq!(err.status, StatusCode::INTERNAL_SERVER_ERROR);
    }
}
