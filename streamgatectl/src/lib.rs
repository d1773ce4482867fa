use std::collections::HashMap;
use std::future::Future;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, Utc};
use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::Serialize;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use streamgate_core::{
    load_streamgate_config, AlertingSink, Assignment, ChannelMetadata, ChannelProvisioner,
    ChannelStatus, Classification, FileAlertingSink, HttpMediaEngineClient, MediaEngineClient,
    MetadataRepository, ReconcileReport, Reconciler, SqliteMetadataStore, StreamGateConfig,
    UploadCompletedEvent, UploadPayload, UPLOAD_COMPLETED_TYPE,
};

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("config error: {0}")]
    Config(#[from] streamgate_core::ConfigError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("store error: {0}")]
    Store(#[from] streamgate_core::ChannelError),
    #[error("provisioning error: {0}")]
    Provision(#[from] streamgate_core::ProvisionError),
    #[error("engine error: {0}")]
    Engine(#[from] streamgate_core::EngineError),
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("authentication failed")]
    Authentication,
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("channel {0} is not ready; nothing to act on")]
    NotReady(String),
}

#[derive(Parser, Debug)]
#[command(author, version, about = "StreamGate operator control interface", long_about = None)]
pub struct Cli {
    /// Path to the streamgate.toml config
    #[arg(long, default_value = "configs/streamgate.toml")]
    pub config: PathBuf,
    /// Override for the channels metadata database
    #[arg(long)]
    pub channels_db: Option<PathBuf>,
    /// Local auth token (checked when SGCTL_TOKEN is set)
    #[arg(long)]
    pub token: Option<String>,
    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Record counts per lifecycle status
    Status,
    /// Channel record operations
    #[command(subcommand)]
    Channels(ChannelCommands),
    /// Run one reconciliation sweep over failed records
    Reconcile(ReconcileArgs),
}

#[derive(Subcommand, Debug)]
pub enum ChannelCommands {
    /// Show one channel record
    Get(ChannelGetArgs),
    /// List channel records
    List(ChannelListArgs),
    /// Manually provision a channel from operator-supplied asset details
    Register(ChannelRegisterArgs),
    /// Delete the engine channel and mark the record retired
    Retire(ChannelGetArgs),
    /// Remove the record entirely (the engine channel is left alone)
    Purge(ChannelGetArgs),
    /// Rotate the engine ingest key for a ready channel
    RotateKey(ChannelGetArgs),
}

#[derive(Args, Debug)]
pub struct ChannelGetArgs {
    /// Content id of the record
    pub content_id: String,
}

#[derive(Args, Debug)]
pub struct ChannelListArgs {
    /// Filter by lifecycle status
    #[arg(long)]
    pub status: Option<String>,
    /// Maximum records returned
    #[arg(long, default_value_t = 20)]
    pub limit: usize,
}

#[derive(Args, Debug)]
pub struct ChannelRegisterArgs {
    pub content_id: String,
    #[arg(long)]
    pub tenant: String,
    /// reel or series
    #[arg(long)]
    pub content_type: String,
    #[arg(long)]
    pub source_uri: String,
    #[arg(long)]
    pub checksum: String,
    #[arg(long, default_value_t = 1)]
    pub duration_seconds: i64,
    #[arg(long)]
    pub ingest_region: Option<String>,
}

#[derive(Args, Debug)]
pub struct ReconcileArgs {
    /// Batch limit; defaults to the configured reconcile.batch_limit
    #[arg(long)]
    pub limit: Option<usize>,
}

pub fn run(cli: Cli) -> Result<()> {
    enforce_token(&cli)?;
    let context = AppContext::new(&cli)?;

    match &cli.command {
        Commands::Status => {
            let report = context.status()?;
            render(&report, cli.format)?;
        }
        Commands::Channels(command) => match command {
            ChannelCommands::Get(args) => {
                let detail = context.channel_get(args)?;
                render(&detail, cli.format)?;
            }
            ChannelCommands::List(args) => {
                let list = context.channel_list(args)?;
                render(&list, cli.format)?;
            }
            ChannelCommands::Register(args) => {
                let detail = block_on(context.channel_register(args))?;
                render(&detail, cli.format)?;
            }
            ChannelCommands::Retire(args) => {
                let outcome = block_on(context.channel_retire(args))?;
                render(&outcome, cli.format)?;
            }
            ChannelCommands::Purge(args) => {
                let outcome = context.channel_purge(args)?;
                render(&outcome, cli.format)?;
            }
            ChannelCommands::RotateKey(args) => {
                let outcome = block_on(context.channel_rotate_key(args))?;
                render(&outcome, cli.format)?;
            }
        },
        Commands::Reconcile(args) => {
            let report = block_on(context.reconcile(args))?;
            render(&report, cli.format)?;
        }
    }

    Ok(())
}

fn enforce_token(cli: &Cli) -> Result<()> {
    if let Ok(expected) = std::env::var("SGCTL_TOKEN") {
        match &cli.token {
            Some(provided) if provided == &expected => Ok(()),
            _ => Err(AppError::Authentication),
        }
    } else {
        Ok(())
    }
}

fn block_on<T>(future: impl Future<Output = Result<T>>) -> Result<T> {
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => handle.block_on(future),
        Err(_) => {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()?;
            runtime.block_on(future)
        }
    }
}

fn render<T>(value: &T, format: OutputFormat) -> Result<()>
where
    T: Serialize + DisplayFallback,
{
    match format {
        OutputFormat::Text => {
            println!("{}", value.display());
            Ok(())
        }
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(value)?;
            println!("{json}");
            Ok(())
        }
    }
}

trait DisplayFallback {
    fn display(&self) -> String;
}

struct AppContext {
    config: StreamGateConfig,
    channels_db: PathBuf,
}

impl AppContext {
    fn new(cli: &Cli) -> Result<Self> {
        let config = load_streamgate_config(&cli.config)?;
        let channels_db = cli
            .channels_db
            .clone()
            .unwrap_or_else(|| PathBuf::from("data/channels.sqlite"));
        Ok(Self {
            config,
            channels_db,
        })
    }

    fn store(&self, read_only: bool) -> Result<SqliteMetadataStore> {
        let store = SqliteMetadataStore::builder()
            .path(&self.channels_db)
            .read_only(read_only)
            .create_if_missing(!read_only)
            .build()?;
        if !read_only {
            store.initialize()?;
        }
        Ok(store)
    }

    fn engine(&self) -> Result<Arc<dyn MediaEngineClient>> {
        let client = HttpMediaEngineClient::new(self.config.engine.clone())?;
        Ok(Arc::new(client))
    }

    fn status(&self) -> Result<StatusReport> {
        let store = self.store(true)?;
        Ok(StatusReport {
            channels_db: self.channels_db.display().to_string(),
            counts: store.count_by_status()?,
        })
    }

    fn channel_get(&self, args: &ChannelGetArgs) -> Result<ChannelDetail> {
        let store = self.store(true)?;
        let record = store.fetch_by_content_id(&args.content_id)?.ok_or_else(|| {
            streamgate_core::ChannelError::NotFound {
                content_id: args.content_id.clone(),
            }
        })?;
        Ok(ChannelDetail { record })
    }

    fn channel_list(&self, args: &ChannelListArgs) -> Result<ChannelList> {
        let status = match &args.status {
            Some(value) => Some(ChannelStatus::from_str(value).map_err(|_| {
                AppError::InvalidArgument(format!("invalid status: {value}"))
            })?),
            None => None,
        };
        let store = self.store(true)?;
        let rows = store
            .fetch_by_status(status, args.limit)?
            .into_iter()
            .map(ChannelEntry::from_record)
            .collect();
        Ok(ChannelList { rows })
    }

    async fn channel_register(&self, args: &ChannelRegisterArgs) -> Result<ChannelDetail> {
        let content_type = Classification::from_str(&args.content_type)
            .map_err(AppError::InvalidArgument)?;
        let store = self.store(false)?;
        let repository = Arc::new(store) as Arc<dyn MetadataRepository>;
        let provisioner =
            ChannelProvisioner::new(repository, self.engine()?, &self.config)?;

        let event = UploadCompletedEvent {
            event_id: Some(format!("manual-{}", Uuid::new_v4().simple())),
            event_type: UPLOAD_COMPLETED_TYPE.to_string(),
            version: None,
            occurred_at: Some(Utc::now()),
            data: UploadPayload {
                content_id: args.content_id.clone(),
                tenant_id: args.tenant.clone(),
                content_type,
                source_uri: args.source_uri.clone(),
                checksum: args.checksum.clone(),
                duration_seconds: args.duration_seconds,
                ingest_region: args
                    .ingest_region
                    .clone()
                    .unwrap_or_else(|| self.config.reconcile.home_region.clone()),
                drm: None,
                availability_window: None,
                geo_restrictions: None,
                acknowledgement: None,
            },
        };

        let cancel = CancellationToken::new();
        let record = provisioner.provision_from_upload(&event, &cancel).await?;
        Ok(ChannelDetail { record })
    }

    async fn channel_retire(&self, args: &ChannelGetArgs) -> Result<ActionOutcome> {
        let store = self.store(false)?;
        let record = store.fetch_by_content_id(&args.content_id)?.ok_or_else(|| {
            streamgate_core::ChannelError::NotFound {
                content_id: args.content_id.clone(),
            }
        })?;

        let mut detail = "record retired".to_string();
        if let Assignment::Assigned(channel_id) = &record.channel_id {
            self.engine()?.delete_channel(channel_id).await?;
            detail = format!("engine channel {channel_id} deleted, record retired");
        }
        store.update_status(&args.content_id, ChannelStatus::Retired)?;
        Ok(ActionOutcome {
            content_id: args.content_id.clone(),
            action: "retire".into(),
            detail,
        })
    }

    fn channel_purge(&self, args: &ChannelGetArgs) -> Result<ActionOutcome> {
        let store = self.store(false)?;
        store.delete(&args.content_id)?;
        Ok(ActionOutcome {
            content_id: args.content_id.clone(),
            action: "purge".into(),
            detail: "record deleted".into(),
        })
    }

    async fn channel_rotate_key(&self, args: &ChannelGetArgs) -> Result<ActionOutcome> {
        let store = self.store(true)?;
        let record = store.fetch_by_content_id(&args.content_id)?.ok_or_else(|| {
            streamgate_core::ChannelError::NotFound {
                content_id: args.content_id.clone(),
            }
        })?;
        let Assignment::Assigned(channel_id) = &record.channel_id else {
            return Err(AppError::NotReady(args.content_id.clone()));
        };
        self.engine()?.rotate_ingest_key(channel_id).await?;
        Ok(ActionOutcome {
            content_id: args.content_id.clone(),
            action: "rotate-key".into(),
            detail: format!("ingest key rotated for engine channel {channel_id}"),
        })
    }

    async fn reconcile(&self, args: &ReconcileArgs) -> Result<ReconcileReport> {
        let store = self.store(false)?;
        let repository = Arc::new(store) as Arc<dyn MetadataRepository>;
        let provisioner = Arc::new(ChannelProvisioner::new(
            Arc::clone(&repository),
            self.engine()?,
            &self.config,
        )?);
        let alerts = Arc::new(FileAlertingSink::new(self.config.alerts.log_path.clone()))
            as Arc<dyn AlertingSink>;
        let reconciler = Reconciler::new(
            repository,
            provisioner,
            alerts,
            self.config.reconcile.clone(),
        );

        let limit = args.limit.unwrap_or(self.config.reconcile.batch_limit);
        let cancel = CancellationToken::new();
        Ok(reconciler.reconcile_failed(limit, &cancel).await?)
    }
}

#[derive(Debug, Serialize)]
struct StatusReport {
    channels_db: String,
    counts: HashMap<String, usize>,
}

impl DisplayFallback for StatusReport {
    fn display(&self) -> String {
        let mut lines = vec![format!("channels db: {}", self.channels_db)];
        let mut counts: Vec<_> = self.counts.iter().collect();
        counts.sort();
        for (status, count) in counts {
            lines.push(format!("  {status:<13} {count}"));
        }
        lines.join("\n")
    }
}

#[derive(Debug, Serialize)]
struct ChannelDetail {
    record: ChannelMetadata,
}

impl DisplayFallback for ChannelDetail {
    fn display(&self) -> String {
        let record = &self.record;
        format!(
            "content {} [{}] status={} retries={}\n  channel {} origin {}\n  playback {}\n  cache {} checksum {}\n  provisioned {}",
            record.content_id,
            record.classification,
            record.status,
            record.retries,
            record.channel_id,
            record.origin_endpoint,
            record.playback_url,
            record.cache_key,
            record.checksum,
            format_datetime(record.last_provisioned_at),
        )
    }
}

#[derive(Debug, Serialize)]
struct ChannelList {
    rows: Vec<ChannelEntry>,
}

#[derive(Debug, Serialize)]
struct ChannelEntry {
    content_id: String,
    status: String,
    classification: String,
    channel_id: String,
    retries: i64,
    last_provisioned_at: String,
}

impl ChannelEntry {
    fn from_record(record: ChannelMetadata) -> Self {
        Self {
            content_id: record.content_id,
            status: record.status.to_string(),
            classification: record.classification.to_string(),
            channel_id: record.channel_id.to_string(),
            retries: record.retries,
            last_provisioned_at: format_datetime(record.last_provisioned_at),
        }
    }
}

impl DisplayFallback for ChannelList {
    fn display(&self) -> String {
        if self.rows.is_empty() {
            return "no channel records".to_string();
        }
        self.rows
            .iter()
            .map(|row| {
                format!(
                    "{:<20} {:<13} {:<7} {:<24} retries={} {}",
                    row.content_id,
                    row.status,
                    row.classification,
                    row.channel_id,
                    row.retries,
                    row.last_provisioned_at,
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[derive(Debug, Serialize)]
struct ActionOutcome {
    content_id: String,
    action: String,
    detail: String,
}

impl DisplayFallback for ActionOutcome {
    fn display(&self) -> String {
        format!("{} {}: {}", self.action, self.content_id, self.detail)
    }
}

impl DisplayFallback for ReconcileReport {
    fn display(&self) -> String {
        format!(
            "reconcile: scanned={} replayed={} failed={}",
            self.scanned, self.replayed, self.failed
        )
    }
}

fn format_datetime(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Secs, true)
}
