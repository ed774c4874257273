use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use chrono::format::{Item, StrftimeItems};
use chrono::{
    DateTime, Datelike, Days, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, Offset, TimeZone,
    Timelike, Utc,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{DataAccessError, Result};

/// Offset-less timestamp layouts accepted in addition to RFC 3339.
const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];

const DEFAULT_HOUR_LABEL: &str = "%b %-d, %H:%M";
const DEFAULT_DAY_LABEL: &str = "%b %-d";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    Hourly,
    Daily,
    Weekly,
}

impl Granularity {
    pub const ALL: [Granularity; 3] = [Self::Hourly, Self::Daily, Self::Weekly];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Hourly => "hourly",
            Self::Daily => "daily",
            Self::Weekly => "weekly",
        }
    }
}

impl fmt::Display for Granularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Granularity {
    type Err = String;

    fn from_str(raw: &str) -> std::result::Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "hourly" | "hour" => Ok(Self::Hourly),
            "daily" | "day" => Ok(Self::Daily),
            "weekly" | "week" => Ok(Self::Weekly),
            other => Err(format!(
                "unknown granularity `{other}` (expected hourly, daily or weekly)"
            )),
        }
    }
}

/// Zone and label layouts used for bucketing and display.
///
/// The zone is a fixed UTC offset. It does not follow daylight-saving
/// changes: with `-05:00` configured, a summer reading at 00:30 EDT
/// (23:30 at the fixed offset) lands in the previous day's bucket.
#[derive(Debug, Clone)]
pub struct ChartLocale {
    offset: FixedOffset,
    hour_format: String,
    day_format: String,
}

impl ChartLocale {
    pub fn new(
        offset: FixedOffset,
        hour_format: impl Into<String>,
        day_format: impl Into<String>,
    ) -> Result<Self> {
        let hour_format = hour_format.into();
        let day_format = day_format.into();
        for layout in [&hour_format, &day_format] {
            if StrftimeItems::new(layout).any(|item| matches!(item, Item::Error)) {
                return Err(DataAccessError::Configuration(format!(
                    "invalid chart label format {layout:?}"
                )));
            }
        }
        Ok(Self {
            offset,
            hour_format,
            day_format,
        })
    }

    pub fn utc() -> Self {
        Self::with_offset(Utc.fix())
    }

    /// Default label layouts in the given zone.
    pub fn with_offset(offset: FixedOffset) -> Self {
        Self {
            offset,
            hour_format: DEFAULT_HOUR_LABEL.to_string(),
            day_format: DEFAULT_DAY_LABEL.to_string(),
        }
    }

    pub fn offset(&self) -> &FixedOffset {
        &self.offset
    }

    fn label(&self, start: &DateTime<FixedOffset>, granularity: Granularity) -> String {
        match granularity {
            Granularity::Hourly => start.format(&self.hour_format).to_string(),
            Granularity::Daily => start.format(&self.day_format).to_string(),
            Granularity::Weekly => {
                let end = start
                    .checked_add_days(Days::new(6))
                    .unwrap_or(*start);
                format!(
                    "{} – {}",
                    start.format(&self.day_format),
                    end.format(&self.day_format)
                )
            }
        }
    }
}

impl Default for ChartLocale {
    fn default() -> Self {
        Self::utc()
    }
}

/// A raw measurement as returned by the backend. Only `value` and the two
/// timestamp fields are interpreted; everything else rides along in `metadata`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TimestampedRecord {
    #[serde(default)]
    pub value: Option<Value>,
    #[serde(default, rename = "datetimeLocal")]
    pub datetime_local: Option<String>,
    #[serde(default, rename = "datetimeUtc")]
    pub datetime_utc: Option<String>,
    #[serde(flatten)]
    pub metadata: Map<String, Value>,
}

impl TimestampedRecord {
    pub fn local(value: f64, timestamp: &str) -> Self {
        Self {
            value: Some(Value::from(value)),
            datetime_local: Some(timestamp.to_string()),
            ..Self::default()
        }
    }

    pub fn utc(value: f64, timestamp: &str) -> Self {
        Self {
            value: Some(Value::from(value)),
            datetime_utc: Some(timestamp.to_string()),
            ..Self::default()
        }
    }

    /// Numbers and numeric strings; `None` for anything non-finite.
    pub fn numeric_value(&self) -> Option<f64> {
        let parsed = match self.value.as_ref()? {
            Value::Number(number) => number.as_f64(),
            Value::String(raw) => raw.trim().parse::<f64>().ok(),
            _ => None,
        };
        parsed.filter(|v| v.is_finite())
    }

    /// The local timestamp when it parses, otherwise the UTC one.
    pub fn instant(&self, zone: &FixedOffset) -> Option<DateTime<FixedOffset>> {
        self.datetime_local
            .as_deref()
            .and_then(|raw| parse_timestamp(raw, zone))
            .or_else(|| {
                self.datetime_utc
                    .as_deref()
                    .and_then(|raw| parse_timestamp(raw, zone))
            })
    }

    pub fn metadata_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(Value::as_str)
    }
}

/// Parse an ISO-8601 timestamp. Offset-less values are read in `zone`;
/// bare dates are UTC midnight.
pub fn parse_timestamp(raw: &str, zone: &FixedOffset) -> Option<DateTime<FixedOffset>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed);
    }
    if let Ok(parsed) = DateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f%:z") {
        return Some(parsed);
    }
    for layout in NAIVE_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, layout) {
            return zone.from_local_datetime(&naive).single();
        }
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .map(|date| Utc.from_utc_datetime(&date.and_time(NaiveTime::MIN)).fixed_offset())
}

/// Start of the bucket containing `instant`, computed on the wall clock of `zone`.
pub fn bucket_start(
    instant: DateTime<FixedOffset>,
    granularity: Granularity,
    zone: &FixedOffset,
) -> Option<DateTime<FixedOffset>> {
    let local = instant.with_timezone(zone).naive_local();
    let start = match granularity {
        Granularity::Hourly => local
            .with_minute(0)?
            .with_second(0)?
            .with_nanosecond(0)?,
        Granularity::Daily => local.date().and_time(NaiveTime::MIN),
        Granularity::Weekly => {
            // Sunday = 0, so Monday is (weekday + 6) % 7 days back.
            let since_monday = (local.weekday().num_days_from_sunday() + 6) % 7;
            local
                .date()
                .checked_sub_days(Days::new(u64::from(since_monday)))?
                .and_time(NaiveTime::MIN)
        }
    };
    zone.from_local_datetime(&start).single()
}

#[derive(Debug, Clone)]
pub struct Bucket {
    pub start: DateTime<FixedOffset>,
    pub label: String,
    pub sum: f64,
    pub count: u32,
}

impl Bucket {
    fn new(start: DateTime<FixedOffset>, label: String) -> Self {
        Self {
            start,
            label,
            sum: 0.0,
            count: 0,
        }
    }

    pub fn mean(&self) -> f64 {
        self.sum / f64::from(self.count)
    }
}

/// One chart point: bucket start, display label and mean value.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SeriesPoint {
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
    pub label: String,
    pub value: f64,
}

impl From<Bucket> for SeriesPoint {
    fn from(bucket: Bucket) -> Self {
        Self {
            timestamp: bucket.start.with_timezone(&Utc),
            value: bucket.mean(),
            label: bucket.label,
        }
    }
}

/// Group records into fixed-width buckets and emit their means in time order.
///
/// Records with a missing or non-finite value, or with no parseable
/// timestamp, are skipped.
pub fn aggregate<'a, I>(records: I, granularity: Granularity, locale: &ChartLocale) -> Vec<SeriesPoint>
where
    I: IntoIterator<Item = &'a TimestampedRecord>,
{
    let mut buckets: HashMap<i64, Bucket> = HashMap::new();

    for record in records {
        let Some(value) = record.numeric_value() else {
            continue;
        };
        let Some(instant) = record.instant(&locale.offset) else {
            continue;
        };
        let Some(start) = bucket_start(instant, granularity, &locale.offset) else {
            continue;
        };

        let bucket = buckets
            .entry(start.timestamp())
            .or_insert_with(|| Bucket::new(start, locale.label(&start, granularity)));
        bucket.sum += value;
        bucket.count += 1;
    }

    let mut ordered: Vec<Bucket> = buckets.into_values().collect();
    ordered.sort_by_key(|bucket| bucket.start);
    ordered.into_iter().map(SeriesPoint::from).collect()
}

/// Inclusive calendar-date window, evaluated in the chart zone.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DateRange {
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
}

impl DateRange {
    pub fn new(from: Option<NaiveDate>, to: Option<NaiveDate>) -> Self {
        Self { from, to }
    }

    pub fn is_unbounded(&self) -> bool {
        self.from.is_none() && self.to.is_none()
    }

    pub fn contains(&self, instant: &DateTime<FixedOffset>, zone: &FixedOffset) -> bool {
        let lower = self
            .from
            .and_then(|d| zone.from_local_datetime(&d.and_time(NaiveTime::MIN)).single());
        let upper = self.to.and_then(|d| {
            let end_of_day = NaiveTime::from_hms_opt(23, 59, 59)?;
            zone.from_local_datetime(&d.and_time(end_of_day)).single()
        });

        lower.is_none_or(|lower| *instant >= lower) && upper.is_none_or(|upper| *instant <= upper)
    }
}

/// Records whose timestamp parses and falls inside `range`.
pub fn filter_by_range<'a>(
    records: &'a [TimestampedRecord],
    range: &DateRange,
    locale: &ChartLocale,
) -> Vec<&'a TimestampedRecord> {
    records
        .iter()
        .filter(|record| {
            record
                .instant(&locale.offset)
                .is_some_and(|instant| range.contains(&instant, &locale.offset))
        })
        .collect()
}

/// First and last calendar dates covered by the records, used to seed an
/// empty date range.
pub fn observed_span(records: &[TimestampedRecord], locale: &ChartLocale) -> Option<DateRange> {
    let mut instants = records
        .iter()
        .filter_map(|record| record.instant(&locale.offset));
    let first = instants.next()?;
    let (min, max) = instants.fold((first, first), |(min, max), instant| {
        (min.min(instant), max.max(instant))
    });
    Some(DateRange::new(
        Some(min.with_timezone(&locale.offset).date_naive()),
        Some(max.with_timezone(&locale.offset).date_naive()),
    ))
}

/// The trailing `limit` points of a series.
pub fn preview(series: &[SeriesPoint], limit: usize) -> &[SeriesPoint] {
    &series[series.len().saturating_sub(limit)..]
}

/// First non-empty `unit` carried in record metadata.
pub fn measurement_unit<'a, I>(records: I) -> Option<&'a str>
where
    I: IntoIterator<Item = &'a TimestampedRecord>,
{
    records
        .into_iter()
        .filter_map(|record| record.metadata_str("unit"))
        .find(|unit| !unit.trim().is_empty())
}
