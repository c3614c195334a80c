use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use coursync::config::{parse_duration, InterruptPolicy};
use coursync::prompt::{read_credentials, Credentials};
use coursync::{
    plan_work_items, Catalog, Config, PlatformCatalog, Session, SessionSettings, SyncEngine,
    SyncOptions, SyncResult, Topic,
};

#[derive(Parser)]
#[command(name = "coursync")]
#[command(about = "Mirror lecture videos from the courses you are enrolled in")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Configuration file path (defaults to XDG config location)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Download lecture videos of every active course (default)
    Sync(SyncArgs),

    /// List enrolled topics and their courses
    List {
        /// Email address to sign in with
        #[arg(long)]
        email: Option<String>,
    },

    /// Write a default configuration file
    Init {
        /// Directory course folders are created under
        #[arg(short, long)]
        output_dir: Option<String>,
    },
}

#[derive(Args, Default)]
struct SyncArgs {
    /// Directory course folders are created under
    #[arg(short, long)]
    output_dir: Option<String>,

    /// Maximum parallel downloads
    #[arg(long)]
    max_parallel: Option<usize>,

    /// Pause before every request, e.g. "3s" or "500ms"
    #[arg(long)]
    pause: Option<String>,

    /// Show what would be downloaded without downloading
    #[arg(long)]
    dry_run: bool,

    /// Email address to sign in with
    #[arg(long)]
    email: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Some(Commands::Init { output_dir }) = &cli.command {
        init_logging(cli.verbose, "info")?;
        return cmd_init(cli.config.as_deref(), output_dir.clone());
    }

    let config = load_config(cli.config.as_deref())?;
    init_logging(cli.verbose, &config.logging.level)?;
    info!("Starting coursync v{}", env!("CARGO_PKG_VERSION"));

    match cli.command {
        None => cmd_sync(SyncArgs::default(), config).await,
        Some(Commands::Sync(args)) => cmd_sync(args, config).await,
        Some(Commands::List { email }) => cmd_list(email, &config).await,
        Some(Commands::Init { .. }) => Ok(()),
    }
}

/// Initialize logging based on verbosity level
fn init_logging(verbose: bool, level: &str) -> Result<()> {
    let filter = if verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
    };

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    Ok(())
}

/// Load configuration from specified path or default location
fn load_config(config_path: Option<&Path>) -> Result<Config> {
    match config_path {
        Some(path) => Config::load(path),
        None => Config::load_or_default(),
    }
}

/// Write a configuration file, keeping an existing one's other settings
fn cmd_init(config_path: Option<&Path>, output_dir: Option<String>) -> Result<()> {
    let config_path = match config_path {
        Some(path) => path.to_path_buf(),
        None => Config::default_config_path()?,
    };

    let mut config = if config_path.exists() {
        Config::load(&config_path)?
    } else {
        Config::default()
    };

    if let Some(output_dir) = output_dir {
        config.sync.output_directory = output_dir;
    }

    if let Some(parent) = config_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
    }
    config.save(&config_path)?;

    println!("✅ coursync initialized");
    println!("   Config: {}", config_path.display());
    println!("   Output directory: {}", config.sync.output_directory);
    Ok(())
}

/// Sign in and print the resulting greeting
async fn sign_in(config: &Config, credentials: &Credentials) -> Result<Arc<Session>> {
    let settings = SessionSettings::from_config(config)?;

    println!("🔐 Signing in...");
    let session = Session::sign_in(settings, &credentials.email, &credentials.password).await?;
    println!("👋 Welcome, {}!", session.user().full_name);

    Ok(Arc::new(session))
}

fn print_topics(topics: &[Topic]) {
    println!();
    for (i, topic) in topics.iter().enumerate() {
        println!("{}", topic.describe(i + 1));
    }
    println!();
}

/// Download videos of every active course
async fn cmd_sync(args: SyncArgs, mut config: Config) -> Result<()> {
    if let Some(output_dir) = args.output_dir {
        config.sync.output_directory = output_dir;
        config.expand_paths()?;
    }
    if let Some(max_parallel) = args.max_parallel {
        config.sync.max_parallel = max_parallel;
    }
    if let Some(pause) = args.pause {
        parse_duration(&pause).context("Invalid --pause value")?;
        config.session.pause = pause;
    }

    let credentials = read_credentials(args.email.as_deref())?;

    // The password prompt handles Ctrl+C itself, the watcher takes over from here
    let cancel = CancellationToken::new();
    let interrupt_watcher = tokio::spawn(watch_interrupts(config.sync.on_interrupt, cancel.clone()));

    let session = interruptible(&cancel, sign_in(&config, &credentials)).await?;

    println!("📚 Getting your course list...");
    let catalog = PlatformCatalog::new(session.clone());
    let topics = interruptible(&cancel, async {
        catalog
            .list_enrolled_topics()
            .await
            .context("Failed to get your course list")
    })
    .await?;
    print_topics(&topics);

    let output_dir = PathBuf::from(&config.sync.output_directory);
    let plan = plan_work_items(&catalog, &topics, &output_dir, &cancel).await;
    if plan.interrupted {
        interrupt_watcher.abort();
        bail!("Interrupted before any download started");
    }

    for course in &plan.inactive {
        println!("⏭️  {} is not active", course);
    }
    for failure in &plan.failures {
        println!("❌ {}: {}", failure.course, failure.error);
    }

    if args.dry_run {
        println!("\n🔍 Dry run - {} videos planned", plan.items.len());
        for item in &plan.items {
            println!("   📥 {} -> {}", item.label, item.directory.display());
        }
        interrupt_watcher.abort();
        return Ok(());
    }

    println!("\n🔄 Syncing {} videos", plan.items.len());
    let engine = SyncEngine::new(SyncOptions::from_config(&config), session);
    let summary = engine.sync_batch(plan.items, &cancel).await;
    interrupt_watcher.abort();

    for record in &summary.records {
        match &record.result {
            SyncResult::Downloaded { path, .. } => {
                println!("   ✅ {}: downloaded {}", record.item.label, path.display())
            }
            SyncResult::AlreadyPresent { .. } => {
                println!("   ⏭️  {}: already exists", record.item.label)
            }
            SyncResult::Failed { error } => println!("   ❌ {}: {}", record.item.label, error),
        }
    }

    println!("\n🎉 Synchronization Complete!");
    println!("   📊 Total videos: {}", summary.total_items);
    println!("   ✅ Downloaded: {}", summary.downloaded);
    println!("   ⏭️  Already present: {}", summary.already_present);
    println!("   ❌ Failed: {}", summary.failed);
    println!("   ⏱️  Duration: {:.2}s", summary.duration.as_secs_f64());

    if summary.failures().any(|record| {
        matches!(&record.result, SyncResult::Failed { error } if error.is_session_expired())
    }) {
        println!("\n💡 Your session expired mid-run; run coursync again to pick up the rest");
    }

    Ok(())
}

/// List enrolled topics and their courses
async fn cmd_list(email: Option<String>, config: &Config) -> Result<()> {
    let credentials = read_credentials(email.as_deref())?;
    tokio::spawn(watch_interrupts(InterruptPolicy::Abort, CancellationToken::new()));

    let session = sign_in(config, &credentials).await?;
    let topics = PlatformCatalog::new(session)
        .list_enrolled_topics()
        .await
        .context("Failed to get your course list")?;

    println!();
    for (i, topic) in topics.iter().enumerate() {
        println!("{}", topic.describe(i + 1));
        for (j, course) in topic.courses.iter().enumerate() {
            let state = if course.active { "🟢 active" } else { "⚪ inactive" };
            println!("   {}. {} ({})", j + 1, course.name, state);
        }
    }

    Ok(())
}

/// Run `task` unless an interrupt arrives first
async fn interruptible<T>(
    cancel: &CancellationToken,
    task: impl Future<Output = Result<T>>,
) -> Result<T> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => bail!("Interrupted"),
        result = task => result,
    }
}

/// React to Ctrl+C according to the configured policy
async fn watch_interrupts(policy: InterruptPolicy, cancel: CancellationToken) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for Ctrl+C: {}", e);
        return;
    }

    if policy == InterruptPolicy::Abort {
        println!("\n🛑 Interrupted");
        std::process::exit(1);
    }

    println!("\n🛑 Interrupted: stopping after downloads in progress, press Ctrl+C again to abort");
    cancel.cancel();

    if tokio::signal::ctrl_c().await.is_ok() {
        println!("\n🛑 Aborting");
        std::process::exit(1);
    }
}
