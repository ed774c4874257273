use std::sync::Arc;

use anyhow::{Context, Result};

use crate::aggregate::ChartLocale;
use crate::api::DashboardApi;
use crate::client::{FailoverClient, ReqwestTransport, Transport};
use crate::config::AppConfig;
use crate::endpoints;
use crate::metrics::AppMetrics;

/// Shared application context passed to CLI commands and HTTP handlers.
#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<AppConfig>,
    pub api: Arc<DashboardApi>,
    pub locale: ChartLocale,
    pub metrics: AppMetrics,
}

impl AppContext {
    /// Wire the data-access layer over the real HTTP transport.
    pub fn new(config: AppConfig, metrics: AppMetrics) -> Result<Self> {
        let transport = ReqwestTransport::new(config.api.request_timeout)
            .context("failed to build HTTP client")?;
        Self::with_transport(config, metrics, Arc::new(transport))
    }

    pub fn with_transport(
        config: AppConfig,
        metrics: AppMetrics,
        transport: Arc<dyn Transport>,
    ) -> Result<Self> {
        let endpoints = endpoints::resolve(config.api.candidates(), &config.api.page())?;
        let client = FailoverClient::new(endpoints, transport)
            .with_retryable_statuses(config.api.retryable()?)
            .with_metrics(metrics.clone());
        let api = DashboardApi::with_metrics(Arc::new(client), metrics.clone());
        let locale = config.charts.locale()?;

        Ok(Self {
            config: Arc::new(config),
            api: Arc::new(api),
            locale,
            metrics,
        })
    }

    pub fn preview_points(&self) -> usize {
        self.config.charts.preview_points
    }
}
