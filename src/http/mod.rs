use std::collections::{BTreeMap, HashMap};

use axum::Json;
use axum::Router;
use axum::extract::{Path, Query, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use chrono::NaiveDate;
use serde::Serialize;
use tower_http::trace::TraceLayer;
use tracing::warn;

use crate::aggregate::{
    DateRange, Granularity, SeriesPoint, filter_by_range, measurement_unit, observed_span, preview,
};
use crate::api::{AqiSnapshot, LocationRecord, QuizSubmission, QuizSubmissionResponse};
use crate::app::AppContext;
use crate::error::DataAccessError;
use crate::sources::{self, SensorSource};

pub fn create_router(ctx: AppContext) -> Router {
    let api = Router::new()
        .route("/locations", get(get_locations))
        .route("/locations/:id/parameters", get(get_parameters))
        .route("/locations/:id/:parameter/series", get(get_series))
        .route("/aqi/current", get(get_current_aqi))
        .route("/aqi/current/preset", get(get_preset_aqi))
        .route("/quiz/responses", post(post_quiz_response));

    Router::new()
        .route("/healthz", get(get_healthz))
        .route("/metrics", get(get_metrics))
        .nest("/api/v1", api)
        .layer(TraceLayer::new_for_http())
        .with_state(ctx)
}

#[derive(Serialize)]
struct HealthResponse {
    active_endpoint: String,
    endpoints: Vec<String>,
}

async fn get_healthz(State(ctx): State<AppContext>) -> Json<HealthResponse> {
    let client = ctx.api.client();
    Json(HealthResponse {
        active_endpoint: client.active_endpoint().to_string(),
        endpoints: client.endpoints().iter().map(ToString::to_string).collect(),
    })
}

async fn get_metrics(State(ctx): State<AppContext>) -> Response {
    match ctx.metrics.encode() {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        Err(err) => {
            warn!(error = ?err, "failed to encode metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response()
        }
    }
}

#[derive(Serialize)]
struct LocationSummary {
    #[serde(flatten)]
    record: LocationRecord,
    source: SensorSource,
}

async fn get_locations(
    State(ctx): State<AppContext>,
) -> Result<Json<BTreeMap<String, LocationSummary>>, ApiError> {
    let locations = ctx.api.locations(None).await?;
    Ok(Json(
        locations
            .into_iter()
            .map(|(id, record)| {
                let source = record.source(&id);
                (id, LocationSummary { record, source })
            })
            .collect(),
    ))
}

async fn get_parameters(
    State(ctx): State<AppContext>,
    Path(id): Path<String>,
) -> Result<Json<Vec<String>>, ApiError> {
    let parameters = ctx.api.parameters(&id, None).await?;
    Ok(Json(parameters.to_vec()))
}

#[derive(Serialize)]
struct SeriesResponse {
    location: String,
    parameter: String,
    granularity: Granularity,
    unit: Option<String>,
    source: Option<SensorSource>,
    /// First and last dates with data, for seeding the date pickers.
    available_from: Option<NaiveDate>,
    available_to: Option<NaiveDate>,
    points: Vec<SeriesPoint>,
    truncated: bool,
}

/// Chart series for one location/parameter.
/// Query params:
///   ?granularity=hourly | daily | weekly (default hourly)
///   ?from=YYYY-MM-DD&to=YYYY-MM-DD (inclusive, optional)
///   ?preview=true (keep only the trailing preview window)
async fn get_series(
    State(ctx): State<AppContext>,
    Path((id, parameter)): Path<(String, String)>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<SeriesResponse>, ApiError> {
    let granularity = match params.get("granularity") {
        Some(raw) => raw.parse::<Granularity>().map_err(ApiError::BadRequest)?,
        None => Granularity::Hourly,
    };
    let range = DateRange::new(
        parse_date(params.get("from"))?,
        parse_date(params.get("to"))?,
    );
    let want_preview = params
        .get("preview")
        .is_some_and(|v| v == "true" || v == "1");

    let series = ctx
        .api
        .series(&id, &parameter, granularity, &range, &ctx.locale, None)
        .await?;
    // Served from the request cache populated by `series`.
    let records = ctx.api.measurements(&id, &parameter, None).await?;
    let in_range = filter_by_range(&records, &range, &ctx.locale);
    let unit = measurement_unit(in_range.iter().copied())
        .or_else(|| measurement_unit(records.iter()))
        .map(str::to_string);
    let source = sources::infer_from_records(records.iter());
    let span = observed_span(&records, &ctx.locale).unwrap_or_default();

    let (points, truncated) = if want_preview {
        let tail = preview(&series, ctx.preview_points());
        (tail.to_vec(), tail.len() < series.len())
    } else {
        (series, false)
    };

    Ok(Json(SeriesResponse {
        location: id,
        parameter,
        granularity,
        unit,
        source,
        available_from: span.from,
        available_to: span.to,
        points,
        truncated,
    }))
}

async fn get_current_aqi(
    State(ctx): State<AppContext>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<AqiSnapshot>, ApiError> {
    let query = params.get("query").map(String::as_str).unwrap_or_default();
    Ok(Json(ctx.api.current_aqi(query, None).await?))
}

async fn get_preset_aqi(State(ctx): State<AppContext>) -> Result<Json<Vec<AqiSnapshot>>, ApiError> {
    Ok(Json(ctx.api.preset_aqi(None).await?))
}

async fn post_quiz_response(
    State(ctx): State<AppContext>,
    Json(submission): Json<QuizSubmission>,
) -> Result<Json<QuizSubmissionResponse>, ApiError> {
    Ok(Json(ctx.api.submit_quiz_response(&submission, None).await?))
}

fn parse_date(raw: Option<&String>) -> Result<Option<NaiveDate>, ApiError> {
    raw.filter(|v| !v.trim().is_empty())
        .map(|v| {
            NaiveDate::parse_from_str(v.trim(), "%Y-%m-%d")
                .map_err(|_| ApiError::BadRequest(format!("invalid date `{v}`")))
        })
        .transpose()
}

enum ApiError {
    BadRequest(String),
    Upstream(DataAccessError),
}

impl From<DataAccessError> for ApiError {
    fn from(err: DataAccessError) -> Self {
        Self::Upstream(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            Self::BadRequest(message) => (StatusCode::BAD_REQUEST, message).into_response(),
            Self::Upstream(err) => {
                let status = match &err {
                    DataAccessError::Status { status, .. } if *status == StatusCode::NOT_FOUND => {
                        StatusCode::NOT_FOUND
                    }
                    DataAccessError::AllEndpointsFailed(_) => StatusCode::SERVICE_UNAVAILABLE,
                    DataAccessError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
                    _ => StatusCode::BAD_GATEWAY,
                };
                warn!(error = %err, "upstream request failed");
                (status, err.user_message()).into_response()
            }
        }
    }
}
