#![forbid(unsafe_code)]

//! `inventory-intake`: batch screenshot intake command-line front end.
//!
//! Bootstraps configuration, the database and the catalog, then runs one
//! operation against a user's session: a screenshot batch, manual text lines,
//! a price refresh, or a catalog snapshot download.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use inventory_intake::catalog::Catalog;
use inventory_intake::config::GlobalConfig;
use inventory_intake::market::client::MarketClient;
use inventory_intake::market::enricher::MarketEnricher;
use inventory_intake::models::report::BatchReport;
use inventory_intake::models::session::SessionKind;
use inventory_intake::orchestrator::intake::BatchIntake;
use inventory_intake::orchestrator::ports::{ChannelReportSink, ReportSink};
use inventory_intake::orchestrator::registry::RunRegistry;
use inventory_intake::orchestrator::session_manager;
use inventory_intake::orchestrator::worker::{BatchWorker, WorkerDeps, WorkerSettings};
use inventory_intake::persistence::item_repo::ItemRepo;
use inventory_intake::persistence::session_repo::SessionRepo;
use inventory_intake::persistence::{db, retention};
use inventory_intake::recognition::gemini::GeminiRecognizer;
use inventory_intake::retry::RetryPolicy;
use inventory_intake::screenshot::{FileScreenshotSource, HttpScreenshotSource, RoutedScreenshotSource};
use inventory_intake::slack::client::SlackService;
use inventory_intake::slack::report::SlackReportSink;
use inventory_intake::{AppError, Result};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum KindArg {
    Oneshot,
    Multishot,
    Edit,
}

impl From<KindArg> for SessionKind {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::Oneshot => Self::Oneshot,
            KindArg::Multishot => Self::Multishot,
            KindArg::Edit => Self::Edit,
        }
    }
}

#[derive(Debug, Parser)]
#[command(name = "inventory-intake", about = "Batch screenshot intake for game inventories", version, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long)]
    config: PathBuf,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Process screenshots (file paths or URLs) as one batch.
    Batch {
        /// Owning user.
        #[arg(long)]
        user: String,
        /// Continue this session instead of starting a new one.
        #[arg(long)]
        session: Option<String>,
        /// Kind of the new session.
        #[arg(long, value_enum, default_value_t = KindArg::Multishot)]
        kind: KindArg,
        /// Screenshot handles in submission order.
        #[arg(required = true)]
        images: Vec<String>,
    },
    /// Merge `Name|Quantity` lines into the user's active session.
    Text {
        /// Owning user.
        #[arg(long)]
        user: String,
        /// Target session; defaults to the user's active one.
        #[arg(long)]
        session: Option<String>,
        /// File with one `Name|Quantity` line per item.
        file: PathBuf,
    },
    /// Re-price every item of the user's active session.
    Refresh {
        /// Owning user.
        #[arg(long)]
        user: String,
        /// Target session; defaults to the user's active one.
        #[arg(long)]
        session: Option<String>,
    },
    /// Download the marketplace item list into the catalog snapshot file.
    FetchCatalog {
        /// Output path; defaults to `catalog.path` from the config.
        #[arg(long)]
        out: Option<PathBuf>,
    },
}

/// Everything a session operation needs.
struct App {
    config: GlobalConfig,
    session_repo: SessionRepo,
    intake: Arc<BatchIntake>,
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;
    info!("inventory-intake bootstrap");

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(args))
}

async fn run(args: Cli) -> Result<()> {
    // ── Load configuration ──────────────────────────────
    let mut config = GlobalConfig::load_from_path(&args.config)?;
    info!("configuration loaded");

    if let Command::FetchCatalog { out } = &args.command {
        let path = out.clone().unwrap_or_else(|| config.catalog.path.clone());
        return fetch_catalog(&config, &path).await;
    }

    config.load_credentials().await?;

    // ── Initialize database ─────────────────────────────
    let db = Arc::new(db::connect(&config.database_path).await?);
    info!("database connected");
    match retention::purge(&db, config.retention_days).await {
        Ok(removed) => info!(removed, "retention purge done"),
        Err(err) => warn!(%err, "retention purge failed"),
    }

    // ── Report delivery ─────────────────────────────────
    let (channel_sink, reports) = ChannelReportSink::new(16);
    let (slack_sink, slack_task) = match &config.slack {
        Some(slack) => {
            let (service, task) = SlackService::start(slack).map_err(|err| {
                error!(%err, "slack service start failed");
                err
            })?;
            (Some(SlackReportSink::new(service, &slack.channel_id)), Some(task))
        }
        None => {
            info!("slack not configured; reports are printed only");
            (None, None)
        }
    };
    let forwarder = spawn_report_forwarder(reports, slack_sink);

    // ── Build the pipeline ──────────────────────────────
    let market = MarketClient::new(&config.market)?;
    let catalog = Arc::new(
        Catalog::load(&config.catalog.path, &config.catalog.language, &market).await?,
    );
    let enricher = Arc::new(MarketEnricher::new(
        Arc::clone(&catalog),
        Arc::new(market),
        config.market.max_concurrent_requests,
        RetryPolicy::new(config.market.max_attempts, config.market.base_backoff_ms),
        &config.market.item_page_base,
    ));
    let session_repo = SessionRepo::new(Arc::clone(&db));
    let deps = WorkerDeps {
        source: Arc::new(RoutedScreenshotSource::new(
            FileScreenshotSource::default(),
            HttpScreenshotSource::new()?,
        )),
        recognizer: Arc::new(GeminiRecognizer::new(&config.recognition)?),
        catalog,
        enricher,
        gate: Arc::new(session_repo.clone()),
        store: Arc::new(ItemRepo::new(Arc::clone(&db))),
        sink: Arc::new(channel_sink),
    };
    let worker = Arc::new(BatchWorker::new(
        deps,
        WorkerSettings::from_config(&config.intake),
        Arc::new(RunRegistry::new()),
    ));
    let intake = BatchIntake::new(worker, config.intake.debounce());

    let app = App {
        config,
        session_repo,
        intake,
    };
    let result = execute(&app, args.command).await;

    // ── Drain report delivery ───────────────────────────
    drop(app);
    if let Err(err) = forwarder.await {
        error!(%err, "report forwarder panicked");
    }
    if let Some(task) = slack_task {
        if let Err(err) = task.await {
            error!(%err, "slack sender panicked");
        }
    }

    info!("inventory-intake done");
    result
}

async fn execute(app: &App, command: Command) -> Result<()> {
    match command {
        Command::Batch {
            user,
            session,
            kind,
            images,
        } => {
            let session = match session {
                Some(id) => session_manager::resolve_session(Some(&id), &user, &app.session_repo).await?,
                None => {
                    session_manager::start_session(
                        &user,
                        kind.into(),
                        &app.config.intake,
                        &app.session_repo,
                        &app.intake,
                    )
                    .await?
                }
            };
            for image in images {
                app.intake.enqueue(&user, &session.id, image);
            }
            let Some(run) = app.intake.flush(&user) else {
                return Err(AppError::Busy("a batch is already running for this user".into()));
            };
            let run = run
                .await
                .map_err(|err| AppError::Io(format!("batch task failed: {err}")))?;
            if run.report.is_none() {
                warn!(outcome = ?run.outcome, "session was no longer active; nothing reported");
            }
            Ok(())
        }
        Command::Text {
            user,
            session,
            file,
        } => {
            let session =
                session_manager::resolve_session(session.as_deref(), &user, &app.session_repo).await?;
            let text = tokio::fs::read_to_string(&file).await?;
            let outcome = app.intake.submit_text(&user, &session.id, &text).await?;
            println!(
                "⚙️ Items added: {}\n📋 Items in session: {}",
                outcome.added, outcome.total_items
            );
            for name in &outcome.unrecognized {
                println!("⚠️ Not recognized: `{name}`");
            }
            Ok(())
        }
        Command::Refresh { user, session } => {
            let session =
                session_manager::resolve_session(session.as_deref(), &user, &app.session_repo).await?;
            let updated = app.intake.refresh_prices(&user, &session.id).await?;
            println!("💰 Prices refreshed for {updated} item(s)");
            Ok(())
        }
        Command::FetchCatalog { .. } => Ok(()),
    }
}

async fn fetch_catalog(config: &GlobalConfig, path: &std::path::Path) -> Result<()> {
    let client = MarketClient::new(&config.market)?;
    let raw = client.fetch_catalog().await?;
    let catalog = Catalog::from_snapshot_json(&raw, &config.catalog.language)?;
    if catalog.is_empty() {
        return Err(AppError::Catalog("marketplace item list contains no named items".into()));
    }
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, raw).await?;
    info!(path = %path.display(), entries = catalog.len(), "catalog snapshot written");
    Ok(())
}

/// Print every report and forward it to Slack when configured.
fn spawn_report_forwarder(
    mut reports: mpsc::Receiver<BatchReport>,
    slack: Option<SlackReportSink>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(report) = reports.recv().await {
            println!("{}", report.render());
            if let Some(sink) = &slack {
                if let Err(err) = sink.deliver(&report).await {
                    error!(%err, "failed to post report to slack");
                }
            }
        }
    })
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt().with_env_filter(env_filter).with_writer(std::io::stderr);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}
