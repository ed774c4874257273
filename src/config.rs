use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{Context, Result, bail};
use chrono::FixedOffset;
use reqwest::StatusCode;
use serde::Deserialize;
use tracing::{info, warn};

use crate::aggregate::ChartLocale;
use crate::endpoints::{PageContext, candidate_bases};

const DEFAULT_CONFIG_PATH: &str = "/config/skydash.yaml";

/// Top-level configuration for the dashboard data-access layer.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub charts: ChartConfig,
    #[serde(default)]
    pub http: HttpConfig,
}

/// Backend addresses and failover behaviour.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "ApiConfig::default_primary")]
    pub primary: String,
    #[serde(default)]
    pub secondary: Option<String>,
    #[serde(default)]
    pub fallbacks: Vec<String>,
    /// Origin the dashboard page is served from, e.g. `https://dash.example.org`.
    #[serde(default)]
    pub page_origin: Option<String>,
    /// Whole-request timeout handed to the HTTP transport. Unset keeps the
    /// transport default.
    #[serde(default, with = "humantime_serde")]
    pub request_timeout: Option<Duration>,
    #[serde(default = "ApiConfig::default_retryable_statuses")]
    pub retryable_statuses: Vec<u16>,
}

impl ApiConfig {
    fn default_primary() -> String {
        "http://localhost:8000".to_string()
    }

    fn default_retryable_statuses() -> Vec<u16> {
        vec![502, 503, 504]
    }

    pub fn page(&self) -> PageContext {
        PageContext::new(self.page_origin.as_deref())
    }

    /// Candidate bases in priority order, ready for endpoint resolution.
    pub fn candidates(&self) -> Vec<Option<String>> {
        candidate_bases(
            Some(self.primary.as_str()),
            self.secondary.as_deref(),
            &self.fallbacks,
            &self.page(),
        )
    }

    pub fn retryable(&self) -> Result<Vec<StatusCode>> {
        self.retryable_statuses
            .iter()
            .map(|code| {
                StatusCode::from_u16(*code)
                    .with_context(|| format!("invalid retryable status code {code}"))
            })
            .collect()
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            primary: Self::default_primary(),
            secondary: None,
            fallbacks: Vec::new(),
            page_origin: None,
            request_timeout: None,
            retryable_statuses: Self::default_retryable_statuses(),
        }
    }
}

/// Chart bucketing zone and label layouts (chrono strftime syntax).
#[derive(Debug, Clone, Deserialize)]
pub struct ChartConfig {
    #[serde(default = "ChartConfig::default_utc_offset")]
    pub utc_offset: String,
    #[serde(default = "ChartConfig::default_hour_label")]
    pub hour_label: String,
    #[serde(default = "ChartConfig::default_day_label")]
    pub day_label: String,
    #[serde(default = "ChartConfig::default_preview_points")]
    pub preview_points: usize,
}

impl ChartConfig {
    fn default_utc_offset() -> String {
        "+00:00".to_string()
    }

    fn default_hour_label() -> String {
        "%b %-d, %H:%M".to_string()
    }

    fn default_day_label() -> String {
        "%b %-d".to_string()
    }

    const fn default_preview_points() -> usize {
        12
    }

    pub fn locale(&self) -> Result<ChartLocale> {
        let offset: FixedOffset = self
            .utc_offset
            .trim()
            .parse()
            .map_err(|err| anyhow::anyhow!("invalid charts.utc_offset {:?}: {err}", self.utc_offset))?;
        Ok(ChartLocale::new(
            offset,
            self.hour_label.clone(),
            self.day_label.clone(),
        )?)
    }
}

impl Default for ChartConfig {
    fn default() -> Self {
        Self {
            utc_offset: Self::default_utc_offset(),
            hour_label: Self::default_hour_label(),
            day_label: Self::default_day_label(),
            preview_points: Self::default_preview_points(),
        }
    }
}

/// HTTP listener configuration for `serve` mode.
#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "HttpConfig::default_bind")]
    pub bind: String,
}

impl HttpConfig {
    fn default_bind() -> String {
        "127.0.0.1:8282".to_string()
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            bind: Self::default_bind(),
        }
    }
}

/// Load configuration from YAML disk file, falling back to defaults + env overrides.
pub fn load_config(path: Option<&Path>) -> Result<AppConfig> {
    let target_path = if let Some(path) = path {
        path.to_path_buf()
    } else if let Ok(env_path) = env::var("SKYDASH_CONFIG") {
        PathBuf::from(env_path)
    } else {
        PathBuf::from(DEFAULT_CONFIG_PATH)
    };

    let mut config = match try_parse_file(&target_path)? {
        Some(cfg) => {
            info!(path = %target_path.display(), "loaded configuration");
            cfg
        }
        None => {
            warn!(path = %target_path.display(), "config file not found; using built-in defaults");
            AppConfig::default()
        }
    };

    apply_env_overrides(&mut config)?;
    validate(&config)?;
    Ok(config)
}

fn try_parse_file(path: &Path) -> Result<Option<AppConfig>> {
    match fs::read_to_string(path) {
        Ok(raw) => {
            let cfg = serde_yaml::from_str(&raw)
                .with_context(|| format!("failed to parse YAML config at {}", path.display()))?;
            Ok(Some(cfg))
        }
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(err) => {
            Err(err).with_context(|| format!("failed to read config file at {}", path.display()))
        }
    }
}

fn apply_env_overrides(config: &mut AppConfig) -> Result<()> {
    apply_overrides(config, |name| env::var(name))
}

fn apply_overrides<F>(config: &mut AppConfig, lookup: F) -> Result<()>
where
    F: Fn(&str) -> Result<String, env::VarError>,
{
    if let Some(primary) = non_blank_var(&lookup, "SKYDASH_API_PRIMARY")? {
        config.api.primary = primary;
    }
    if let Some(secondary) = non_blank_var(&lookup, "SKYDASH_API_SECONDARY")? {
        config.api.secondary = Some(secondary);
    }
    if let Some(origin) = non_blank_var(&lookup, "SKYDASH_PAGE_ORIGIN")? {
        config.api.page_origin = Some(origin);
    }
    Ok(())
}

fn non_blank_var<F>(lookup: &F, name: &str) -> Result<Option<String>>
where
    F: Fn(&str) -> Result<String, env::VarError>,
{
    match lookup(name) {
        Ok(value) => {
            if value.trim().is_empty() {
                bail!("Environment variable {name} is set but empty; populate it or unset it.");
            }
            Ok(Some(value))
        }
        Err(env::VarError::NotPresent) => Ok(None),
        Err(err) => Err(err.into()),
    }
}

fn validate(config: &AppConfig) -> Result<()> {
    config.api.retryable()?;
    config.charts.locale()?;
    if config.charts.preview_points == 0 {
        bail!("charts.preview_points must be at least 1");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn yaml_sections_fall_back_to_defaults() {
        let cfg: AppConfig = serde_yaml::from_str(
            r#"
api:
  secondary: "https://backup.example.org"
  request_timeout: 8s
charts:
  utc_offset: "-05:00"
"#,
        )
        .unwrap();

        assert_eq!(cfg.api.primary, "http://localhost:8000");
        assert_eq!(cfg.api.request_timeout, Some(Duration::from_secs(8)));
        assert_eq!(cfg.api.retryable_statuses, vec![502, 503, 504]);
        assert_eq!(cfg.charts.preview_points, 12);
        assert_eq!(cfg.http.bind, "127.0.0.1:8282");

        let locale = cfg.charts.locale().unwrap();
        assert_eq!(locale.offset().local_minus_utc(), -5 * 3600);
    }

    #[test]
    fn candidates_include_page_fallback() {
        let api = ApiConfig {
            page_origin: Some("https://dash.example.org".into()),
            ..ApiConfig::default()
        };
        let candidates = api.candidates();
        assert_eq!(
            candidates.last().cloned().flatten().as_deref(),
            Some("https://dash.example.org/api")
        );
    }

    #[test]
    fn invalid_offset_fails_validation() {
        let cfg = AppConfig {
            charts: ChartConfig {
                utc_offset: "somewhere".into(),
                ..ChartConfig::default()
            },
            ..AppConfig::default()
        };
        assert!(validate(&cfg).is_err());
    }

    fn vars(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Result<String, env::VarError> {
        let pairs: Vec<(String, String)> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name: &str| {
            pairs
                .iter()
                .find(|(k, _)| k == name)
                .map(|(_, v)| v.clone())
                .ok_or(env::VarError::NotPresent)
        }
    }

    #[test]
    fn env_overrides_replace_api_addresses() {
        let mut cfg = AppConfig::default();
        apply_overrides(
            &mut cfg,
            vars(&[
                ("SKYDASH_API_PRIMARY", "https://api.example.org"),
                ("SKYDASH_PAGE_ORIGIN", "https://dash.example.org"),
            ]),
        )
        .unwrap();
        assert_eq!(cfg.api.primary, "https://api.example.org");
        assert_eq!(cfg.api.secondary, None);
        assert_eq!(cfg.api.page_origin.as_deref(), Some("https://dash.example.org"));
    }

    #[test]
    fn blank_env_override_is_a_configuration_error() {
        let mut cfg = AppConfig::default();
        let err = apply_overrides(&mut cfg, vars(&[("SKYDASH_API_PRIMARY", "   ")])).unwrap_err();
        assert!(err.to_string().contains("SKYDASH_API_PRIMARY"));
        assert_eq!(cfg.api.primary, "http://localhost:8000");
    }

    #[test]
    fn invalid_status_fails_validation() {
        let cfg = AppConfig {
            api: ApiConfig {
                retryable_statuses: vec![42],
                ..ApiConfig::default()
            },
            ..AppConfig::default()
        };
        assert!(validate(&cfg).is_err());
    }
}
