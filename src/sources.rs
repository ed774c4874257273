use std::fmt;

use serde::{Deserialize, Serialize};

use crate::aggregate::TimestampedRecord;

/// Upstream network a monitoring site reports through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SensorSource {
    OpenAq,
    OpenMeteo,
    Tempo,
    Unknown,
}

impl SensorSource {
    pub fn label(self) -> &'static str {
        match self {
            Self::OpenAq => "OpenAQ",
            Self::OpenMeteo => "Open-Meteo",
            Self::Tempo => "NASA TEMPO",
            Self::Unknown => "Other",
        }
    }
}

impl fmt::Display for SensorSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Guess the source from the location id and its backing file names.
/// Sites that match nothing are OpenAQ, which hosts most of them.
pub fn infer_from_metadata<S: AsRef<str>>(location_id: &str, files: &[S]) -> SensorSource {
    let id = location_id.to_lowercase();
    let files = files
        .iter()
        .map(|f| f.as_ref().to_lowercase())
        .collect::<Vec<_>>()
        .join(" ");
    let matches = |needle: &str| id.starts_with(needle) || files.contains(needle);

    if matches("tempo") {
        SensorSource::Tempo
    } else if matches("openmeteo") {
        SensorSource::OpenMeteo
    } else {
        SensorSource::OpenAq
    }
}

/// The first record whose `provider` or `owner_name` names a known network
/// decides the source. `None` when no record says.
pub fn infer_from_records<'a, I>(records: I) -> Option<SensorSource>
where
    I: IntoIterator<Item = &'a TimestampedRecord>,
{
    records.into_iter().find_map(|record| {
        let provider = record.metadata_str("provider").unwrap_or_default().to_lowercase();
        let owner = record.metadata_str("owner_name").unwrap_or_default().to_lowercase();

        if provider.contains("tempo") || owner.contains("tempo") {
            Some(SensorSource::Tempo)
        } else if provider.contains("open-meteo")
            || provider.contains("openmeteo")
            || owner.contains("open-meteo")
        {
            Some(SensorSource::OpenMeteo)
        } else if ["openaq", "airnow"]
            .iter()
            .any(|name| provider.contains(name) || owner.contains(name))
        {
            Some(SensorSource::OpenAq)
        } else {
            None
        }
    })
}
