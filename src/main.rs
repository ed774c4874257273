use std::future::Future;
use std::io::ErrorKind;
use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Context;
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use dotenvy::Error as DotenvError;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

use skydash::aggregate::{self, DateRange, Granularity};
use skydash::api::QuizSubmission;
use skydash::app::AppContext;
use skydash::{config, http, metrics};

#[derive(Debug, Parser)]
#[command(author, version, about = "Air-quality dashboard data access")]
struct Cli {
    /// Path to YAML configuration file. Defaults to env SKYDASH_CONFIG or built-in defaults.
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List monitoring locations.
    Locations,
    /// List the parameters measured at a location.
    Parameters {
        #[arg(short, long)]
        location: String,
    },
    /// Print a bucketed chart series for a location and parameter.
    Series {
        #[arg(short, long)]
        location: String,
        #[arg(short, long)]
        parameter: String,
        #[arg(short, long, default_value = "hourly")]
        granularity: Granularity,
        /// First day to include (YYYY-MM-DD).
        #[arg(long)]
        from: Option<NaiveDate>,
        /// Last day to include (YYYY-MM-DD).
        #[arg(long)]
        to: Option<NaiveDate>,
        /// Only print the trailing preview window.
        #[arg(long)]
        preview: bool,
    },
    /// Current AQI for a place, or for every preset region when no query is given.
    Aqi {
        #[arg(short, long)]
        query: Option<String>,
    },
    /// Submit alert preferences for a region, optionally subscribing to SMS.
    Quiz {
        /// City or region; resolved to coordinates before submitting.
        #[arg(short, long)]
        region: String,
        #[arg(long = "sensitivity", required = true)]
        sensitivities: Vec<String>,
        #[arg(long)]
        activity: String,
        #[arg(long)]
        audience: String,
        #[arg(long = "interest", required = true)]
        interests: Vec<String>,
        #[arg(long)]
        phone: Option<String>,
    },
    /// Serve series and metrics over HTTP.
    Serve,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    load_env();
    init_tracing();

    let cli = Cli::parse();

    let config = config::load_config(cli.config.as_deref())?;
    let metrics = metrics::AppMetrics::new()?;
    let ctx = AppContext::new(config, metrics)?;

    info!(
        endpoints = ctx.api.client().endpoints().len(),
        primary = %ctx.api.client().endpoints().primary(),
        "data access layer ready"
    );

    match cli.command {
        Command::Locations => {
            let locations = cancellable(|signal| ctx.api.locations(Some(signal))).await?;
            for (id, record) in &locations {
                debug!(location = %id, source = %record.source(id), "location source");
            }
            print_json(&locations)?;
        }
        Command::Parameters { location } => {
            let parameters =
                cancellable(|signal| ctx.api.parameters(&location, Some(signal))).await?;
            print_json(&*parameters)?;
        }
        Command::Series {
            location,
            parameter,
            granularity,
            from,
            to,
            preview,
        } => {
            let range = DateRange::new(from, to);
            let series = cancellable(|signal| {
                ctx.api.series(
                    &location,
                    &parameter,
                    granularity,
                    &range,
                    &ctx.locale,
                    Some(signal),
                )
            })
            .await?;
            if preview {
                print_json(aggregate::preview(&series, ctx.preview_points()))?;
            } else {
                print_json(&series)?;
            }
        }
        Command::Aqi { query: Some(query) } => {
            let snapshot = cancellable(|signal| ctx.api.current_aqi(&query, Some(signal))).await?;
            print_json(&snapshot)?;
        }
        Command::Aqi { query: None } => {
            let snapshots = cancellable(|signal| ctx.api.preset_aqi(Some(signal))).await?;
            print_json(&snapshots)?;
        }
        Command::Quiz {
            region,
            sensitivities,
            activity,
            audience,
            interests,
            phone,
        } => {
            let snapshot = cancellable(|signal| ctx.api.current_aqi(&region, Some(signal))).await?;
            let mut submission = QuizSubmission::for_region(
                &snapshot,
                &region,
                sensitivities,
                activity,
                audience,
                interests,
            )?;
            if let Some(phone) = phone.as_deref() {
                submission = submission.with_phone_number(phone);
            }
            info!(region = %submission.location_name, "submitting preferences");
            let response =
                cancellable(|signal| ctx.api.submit_quiz_response(&submission, Some(signal)))
                    .await?;
            if response.sms_sent() {
                info!("subscribed to SMS updates");
            } else if response.sms_skipped() {
                let reason = response
                    .sms
                    .as_ref()
                    .and_then(|sms| sms.reason.as_deref())
                    .unwrap_or("SMS delivery is temporarily disabled");
                info!(reason, "preferences saved without SMS");
            }
            print_json(&response)?;
        }
        Command::Serve => serve(ctx).await?,
    }

    Ok(())
}

/// Run one request, cancelling it on Ctrl+C.
async fn cancellable<F, Fut, T>(request: F) -> Result<T, skydash::DataAccessError>
where
    F: FnOnce(CancellationToken) -> Fut,
    Fut: Future<Output = Result<T, skydash::DataAccessError>>,
{
    let signal = CancellationToken::new();
    let trigger = signal.clone();
    let watcher = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            trigger.cancel();
        }
    });
    let result = request(signal).await;
    watcher.abort();
    result
}

async fn serve(ctx: AppContext) -> anyhow::Result<()> {
    let bind_addr: SocketAddr = ctx
        .config
        .http
        .bind
        .parse()
        .context("invalid http.bind address")?;
    let router = http::create_router(ctx);

    info!("skydash listening on {}", bind_addr);

    let listener = tokio::net::TcpListener::bind(bind_addr)
        .await
        .context("failed to bind HTTP listener")?;

    if let Err(err) = axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        error!(error = ?err, "server terminated with error");
    }
    Ok(())
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn load_env() {
    if let Err(err) = dotenvy::dotenv() {
        match err {
            DotenvError::Io(io_err) if io_err.kind() == ErrorKind::NotFound => {}
            other => eprintln!("warning: failed to load .env file: {other}"),
        }
    }
}

fn init_tracing() {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("skydash=info"));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(error = ?err, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
            sigterm.recv().await;
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("shutdown signal received");
}
