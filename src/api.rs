use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

use crate::aggregate::{
    ChartLocale, DateRange, Granularity, SeriesPoint, TimestampedRecord, aggregate,
    filter_by_range,
};
use crate::cache::RequestCache;
use crate::client::{FailoverClient, HttpResponse, RequestOptions};
use crate::error::{DataAccessError, Result};
use crate::metrics::AppMetrics;
use crate::sources::{self, SensorSource};

const PARAMETERS_SCOPE: &str = "parameters";
const MEASUREMENTS_SCOPE: &str = "all";
const QUIZ_RESPONSES_PATH: &str = "/quiz/responses";

/// A monitoring site as listed by `GET /locations`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationRecord {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub files: Vec<String>,
    #[serde(default)]
    pub location_name: Option<String>,
}

impl LocationRecord {
    /// Source guessed from the id and file names, before any measurements
    /// have been seen.
    pub fn source(&self, location_id: &str) -> SensorSource {
        sources::infer_from_metadata(location_id, &self.files)
    }
}

/// Current US AQI reading for a place, from `/aqi/current`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AqiSnapshot {
    #[serde(default)]
    pub slug: Option<String>,
    #[serde(default)]
    pub location_name: Option<String>,
    #[serde(default)]
    pub latitude: Option<f64>,
    #[serde(default)]
    pub longitude: Option<f64>,
    #[serde(default)]
    pub us_aqi: Option<f64>,
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub units: Option<String>,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AqiSnapshot {
    pub fn coordinates(&self) -> Option<(f64, f64)> {
        Some((self.latitude?, self.longitude?))
    }

    /// The reported place name, or `fallback` when it is missing or blank.
    pub fn display_name<'a>(&'a self, fallback: &'a str) -> &'a str {
        self.location_name
            .as_deref()
            .filter(|name| !name.trim().is_empty())
            .unwrap_or(fallback)
    }
}

/// Alert-preference quiz answers, posted to `/quiz/responses`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuizSubmission {
    pub health_sensitivities: Vec<String>,
    pub activity_type: String,
    pub audience: String,
    pub interests: Vec<String>,
    pub region: String,
    pub location_name: String,
    pub latitude: f64,
    pub longitude: f64,
    /// Present only when subscribing to SMS alerts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone_number: Option<String>,
}

impl QuizSubmission {
    /// Build a submission for a region already confirmed via [`DashboardApi::current_aqi`].
    pub fn for_region(
        snapshot: &AqiSnapshot,
        query: &str,
        health_sensitivities: Vec<String>,
        activity_type: impl Into<String>,
        audience: impl Into<String>,
        interests: Vec<String>,
    ) -> Result<Self> {
        let (latitude, longitude) = snapshot.coordinates().ok_or_else(|| {
            DataAccessError::InvalidRequest(
                "no precise coordinates were found for that location".into(),
            )
        })?;
        let name = snapshot.display_name(query.trim()).to_string();
        Ok(Self {
            health_sensitivities,
            activity_type: activity_type.into(),
            audience: audience.into(),
            interests,
            region: name.clone(),
            location_name: name,
            latitude,
            longitude,
            phone_number: None,
        })
    }

    pub fn with_phone_number(mut self, phone_number: &str) -> Self {
        self.phone_number = Some(phone_number.trim().to_string());
        self
    }

    pub fn validate(&self) -> Result<()> {
        let problem = if self.health_sensitivities.is_empty() {
            Some("select at least one health sensitivity (or none)")
        } else if self.activity_type.trim().is_empty() {
            Some("select how you usually spend time outdoors")
        } else if self.audience.trim().is_empty() {
            Some("tell us who you are checking air quality for")
        } else if self.interests.is_empty() {
            Some("pick at least one focus area")
        } else if self.region.trim().is_empty() {
            Some("enter the city or region you care about")
        } else if self.phone_number.as_deref().is_some_and(|p| p.trim().is_empty()) {
            Some("enter a phone number to subscribe")
        } else {
            None
        };
        match problem {
            Some(message) => Err(DataAccessError::InvalidRequest(message.into())),
            None => Ok(()),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SmsStatus {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
}

/// What the backend says after saving quiz answers. Both parts are optional;
/// an unreadable body decodes to the empty response.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QuizSubmissionResponse {
    #[serde(default)]
    pub sms: Option<SmsStatus>,
    /// Personalised insight payload, passed through untouched.
    #[serde(default)]
    pub insights: Option<Value>,
}

impl QuizSubmissionResponse {
    fn sms_status(&self) -> Option<&str> {
        self.sms.as_ref()?.status.as_deref()
    }

    pub fn sms_sent(&self) -> bool {
        self.sms_status() == Some("sent")
    }

    pub fn sms_skipped(&self) -> bool {
        self.sms_status() == Some("skipped")
    }
}

/// Backend operations the dashboard views call into.
pub struct DashboardApi {
    client: Arc<FailoverClient>,
    parameters: RequestCache<String>,
    measurements: RequestCache<TimestampedRecord>,
}

impl DashboardApi {
    pub fn new(client: Arc<FailoverClient>) -> Self {
        Self {
            client,
            parameters: RequestCache::new("parameters"),
            measurements: RequestCache::new("measurements"),
        }
    }

    pub fn with_metrics(client: Arc<FailoverClient>, metrics: AppMetrics) -> Self {
        Self {
            client,
            parameters: RequestCache::new("parameters").with_metrics(metrics.clone()),
            measurements: RequestCache::new("measurements").with_metrics(metrics),
        }
    }

    pub fn client(&self) -> &FailoverClient {
        &self.client
    }

    /// All known locations keyed by id. Not cached; the map view loads it once.
    #[instrument(skip(self, signal))]
    pub async fn locations(
        &self,
        signal: Option<CancellationToken>,
    ) -> Result<BTreeMap<String, LocationRecord>> {
        let path = "/locations";
        let response = self.fetch(path, signal).await?;
        let payload: Value = response.json()?;
        if let Some(message) = error_message(&payload) {
            return Err(DataAccessError::DataShape(message));
        }
        match payload {
            Value::Object(_) => Ok(serde_json::from_value(payload)?),
            _ => Err(DataAccessError::DataShape(
                "unexpected locations response".into(),
            )),
        }
    }

    /// Parameter names measured at a location.
    #[instrument(skip(self, signal))]
    pub async fn parameters(
        &self,
        location_id: &str,
        signal: Option<CancellationToken>,
    ) -> Result<Arc<Vec<String>>> {
        self.parameters
            .get(location_id, PARAMETERS_SCOPE, || async {
                let path = format!("/locations/{location_id}");
                let response = self.fetch(&path, signal).await?;
                let items = decode_collection(&response, "parameter")?;
                Ok(items
                    .into_iter()
                    .filter_map(|item| match item {
                        Value::String(name) => Some(name),
                        _ => None,
                    })
                    .collect())
            })
            .await
    }

    /// Raw measurements for one location and parameter.
    #[instrument(skip(self, signal))]
    pub async fn measurements(
        &self,
        location_id: &str,
        parameter: &str,
        signal: Option<CancellationToken>,
    ) -> Result<Arc<Vec<TimestampedRecord>>> {
        let resource_id = format!("{location_id}:{parameter}");
        self.measurements
            .get(&resource_id, MEASUREMENTS_SCOPE, || async {
                let path = format!("/locations/{location_id}/{parameter}");
                let response = self.fetch(&path, signal).await?;
                let items = decode_collection(&response, "measurement")?;
                let total = items.len();
                let records: Vec<TimestampedRecord> = items
                    .into_iter()
                    .filter(Value::is_object)
                    .filter_map(|item| serde_json::from_value(item).ok())
                    .collect();
                if records.len() < total {
                    debug!(
                        dropped = total - records.len(),
                        "ignored non-record entries in measurement payload"
                    );
                }
                Ok(records)
            })
            .await
    }

    /// Measurements filtered to `range` and bucketed for charting.
    pub async fn series(
        &self,
        location_id: &str,
        parameter: &str,
        granularity: Granularity,
        range: &DateRange,
        locale: &ChartLocale,
        signal: Option<CancellationToken>,
    ) -> Result<Vec<SeriesPoint>> {
        let records = self.measurements(location_id, parameter, signal).await?;
        if range.is_unbounded() {
            return Ok(aggregate(records.iter(), granularity, locale));
        }
        let filtered = filter_by_range(&records, range, locale);
        Ok(aggregate(filtered, granularity, locale))
    }

    /// Current AQI for a free-text city or region.
    #[instrument(skip(self, signal))]
    pub async fn current_aqi(
        &self,
        query: &str,
        signal: Option<CancellationToken>,
    ) -> Result<AqiSnapshot> {
        let query = query.trim();
        if query.is_empty() {
            return Err(DataAccessError::InvalidRequest(
                "enter a city or region to look up".into(),
            ));
        }
        let path = format!("/aqi/current?query={}", urlencoding::encode(query));
        let response = self.fetch(&path, signal).await?;
        let snapshot: AqiSnapshot = response.json()?;
        match snapshot.error {
            Some(message) => Err(DataAccessError::DataShape(message)),
            None => Ok(snapshot),
        }
    }

    /// Snapshots for the preset regions shown on the AQI page.
    #[instrument(skip(self, signal))]
    pub async fn preset_aqi(&self, signal: Option<CancellationToken>) -> Result<Vec<AqiSnapshot>> {
        let response = self.fetch("/aqi/current/preset", signal).await?;
        let items = decode_collection(&response, "AQI")?;
        Ok(items
            .into_iter()
            .filter(Value::is_object)
            .filter_map(|item| serde_json::from_value(item).ok())
            .collect())
    }

    /// Save quiz answers (and optionally an SMS subscription).
    #[instrument(skip_all, fields(region = %submission.region, subscribe = submission.phone_number.is_some()))]
    pub async fn submit_quiz_response(
        &self,
        submission: &QuizSubmission,
        signal: Option<CancellationToken>,
    ) -> Result<QuizSubmissionResponse> {
        submission.validate()?;
        let mut options = RequestOptions::post_json(submission)
            .map_err(|err| DataAccessError::InvalidRequest(err.to_string()))?;
        options.signal = signal;
        let response = self.send(QUIZ_RESPONSES_PATH, &options).await?;
        Ok(response.json().unwrap_or_default())
    }

    async fn fetch(&self, path: &str, signal: Option<CancellationToken>) -> Result<HttpResponse> {
        let mut options = RequestOptions::get();
        options.signal = signal;
        self.send(path, &options).await
    }

    async fn send(&self, path: &str, options: &RequestOptions) -> Result<HttpResponse> {
        let response = self.client.issue(path, options).await?;
        if !response.is_success() {
            return Err(DataAccessError::Status {
                path: path.to_string(),
                status: response.status,
                detail: error_detail(&response),
            });
        }
        Ok(response)
    }
}

/// Accept a JSON array; report `{"error": ...}` bodies and anything else as
/// a shape error.
fn decode_collection(response: &HttpResponse, what: &str) -> Result<Vec<Value>> {
    let payload: Value = response.json()?;
    match payload {
        Value::Array(items) => Ok(items),
        other => Err(DataAccessError::DataShape(
            error_message(&other).unwrap_or_else(|| format!("unexpected {what} response")),
        )),
    }
}

/// FastAPI-style `{"detail": ...}` from an error body.
fn error_detail(response: &HttpResponse) -> Option<String> {
    let payload: Value = response.json().ok()?;
    match payload.as_object()?.get("detail")? {
        Value::String(message) => Some(message.clone()),
        Value::Null => None,
        other => Some(other.to_string()),
    }
}

fn error_message(payload: &Value) -> Option<String> {
    let error = payload.as_object()?.get("error")?;
    Some(match error {
        Value::String(message) => message.clone(),
        Value::Null => "lookup failed".to_string(),
        other => other.to_string(),
    })
}
