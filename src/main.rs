//! apicache CLI entrypoint.
//!
//! This is the main entrypoint for the apicache command-line tool.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use apicache_deploy::cli::{Cli, Commands, LogFormat, OutputFormatter, StateCommands};
use apicache_deploy::config::{find_config_file, ConfigParser, ConfigValidator, DeployConfig};
use apicache_deploy::error::{ProviderError, Result};
use apicache_deploy::planner::CancellationFlag;
use apicache_deploy::provider::{builtin_schemas, ApiCacheAdapter, ProviderRegistry};
use apicache_deploy::reconciler::Reconciler;
use apicache_deploy::resource::ResourceAddr;
use apicache_deploy::state::{open_store, StateStore};
use apicache_deploy::transport::HttpTransport;

use clap::Parser;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

/// Main entrypoint.
fn main() -> ExitCode {
    let cli = Cli::parse();

    init_logging(cli.verbose, cli.log_format);

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Failed to create async runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(cli)) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

/// Initializes the logging system.
///
/// `RUST_LOG` wins over the verbosity flag when set.
fn init_logging(verbose: bool, format: LogFormat) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

/// Main async entry point.
async fn run(cli: Cli) -> Result<ExitCode> {
    let formatter = OutputFormatter::new(cli.output);
    let config_path = cli.config.as_deref();

    match cli.command {
        Commands::Init { path, force } => cmd_init(&path, force, &formatter),
        Commands::Validate { warnings } => cmd_validate(config_path, warnings, &formatter),
        Commands::Plan { detailed } => cmd_plan(config_path, detailed, &formatter).await,
        Commands::Apply {
            yes,
            fail_fast,
            parallelism,
        } => cmd_apply(config_path, yes, fail_fast, parallelism, &formatter).await,
        Commands::Refresh => cmd_refresh(config_path, &formatter).await,
        Commands::Status => cmd_status(config_path, &formatter).await,
        Commands::Drift => cmd_drift(config_path, &formatter).await,
        Commands::Import { addr, id } => cmd_import(config_path, &addr, &id, &formatter).await,
        Commands::Destroy { yes } => cmd_destroy(config_path, yes, &formatter).await,
        Commands::Schema { kind } => cmd_schema(kind.as_deref(), &formatter),
        Commands::State { command } => cmd_state(config_path, command, &formatter).await,
    }
}

/// Initialize a new project.
fn cmd_init(path: &Path, force: bool, formatter: &OutputFormatter) -> Result<ExitCode> {
    info!("Initializing new project in: {}", path.display());

    let config_path = path.join("apicache.deploy.yaml");
    let env_path = path.join(".env.example");
    let gitignore_path = path.join(".gitignore");

    if !force && config_path.exists() {
        eprintln!("Configuration file already exists: {}", config_path.display());
        eprintln!("Use --force to overwrite.");
        return Ok(ExitCode::FAILURE);
    }

    if !path.exists() {
        std::fs::create_dir_all(path)?;
    }

    std::fs::write(&config_path, include_str!("../templates/apicache.deploy.yaml"))?;
    eprintln!("Created: {}", config_path.display());

    std::fs::write(&env_path, include_str!("../templates/.env.example"))?;
    eprintln!("Created: {}", env_path.display());

    if gitignore_path.exists() {
        let existing = std::fs::read_to_string(&gitignore_path)?;
        let missing: Vec<&str> = [".env", ".apicache/"]
            .into_iter()
            .filter(|entry| !existing.lines().any(|line| line.trim() == *entry))
            .collect();
        if !missing.is_empty() {
            let mut file = std::fs::OpenOptions::new().append(true).open(&gitignore_path)?;
            writeln!(file, "\n# apicache")?;
            for entry in missing {
                writeln!(file, "{entry}")?;
            }
            eprintln!("Updated: {}", gitignore_path.display());
        }
    } else {
        std::fs::write(&gitignore_path, ".env\n.apicache/\n")?;
        eprintln!("Created: {}", gitignore_path.display());
    }

    println!("{}", formatter.success("Project initialized"));
    eprintln!("Next steps:");
    eprintln!("  1. Copy .env.example to .env and set APICACHE_API_TOKEN");
    eprintln!("  2. Edit apicache.deploy.yaml with your API caches");
    eprintln!("  3. Run 'apicache validate' to check your configuration");
    eprintln!("  4. Run 'apicache plan' to see what will change");
    eprintln!("  5. Run 'apicache apply' to converge");

    Ok(ExitCode::SUCCESS)
}

/// Validate configuration.
fn cmd_validate(
    config_path: Option<&Path>,
    show_warnings: bool,
    formatter: &OutputFormatter,
) -> Result<ExitCode> {
    let (config_file, config) = load_config(config_path)?;
    info!("Validating configuration: {}", config_file.display());

    let result = ConfigValidator::new().check(&config);
    println!("{}", formatter.format_validation(&result, show_warnings));

    if !formatter.is_json() {
        eprintln!("Configuration summary:");
        eprintln!("  Project: {}", config.project.name);
        eprintln!("  Environment: {}", config.project.environment);
        eprintln!("  State backend: {:?}", config.state.backend);
        eprintln!("  Resources: {}", config.resources.len());
    }

    Ok(exit_code(result.is_valid()))
}

/// Show deployment plan.
async fn cmd_plan(
    config_path: Option<&Path>,
    detailed: bool,
    formatter: &OutputFormatter,
) -> Result<ExitCode> {
    let ctx = Context::load(config_path).await?;
    let plan = ctx.reconciler().plan().await?;

    println!("{}", formatter.format_plan(&plan, detailed));
    Ok(exit_code(plan.passes_guardrails))
}

/// Converge remote resources to the configuration.
async fn cmd_apply(
    config_path: Option<&Path>,
    auto_approve: bool,
    fail_fast: bool,
    parallelism: Option<usize>,
    formatter: &OutputFormatter,
) -> Result<ExitCode> {
    let mut ctx = Context::load(config_path).await?;
    ctx.config.engine.fail_fast |= fail_fast;
    if let Some(parallelism) = parallelism {
        ctx.config.engine.parallelism = parallelism.max(1);
    }

    let plan = ctx.reconciler().plan().await?;
    if plan.is_empty() {
        println!("{}", formatter.success("No changes to apply."));
        return Ok(ExitCode::SUCCESS);
    }

    eprintln!("{}", formatter.format_plan(&plan, false));

    if !auto_approve && !confirm("Do you want to apply this plan? [y/N]: ", "y")? {
        eprintln!("Apply cancelled.");
        return Ok(ExitCode::SUCCESS);
    }

    let cancel = cancel_on_ctrl_c();
    let result = ctx.reconciler().with_cancellation(cancel).reconcile().await?;

    println!("{}", formatter.format_reconciliation(&result));
    Ok(exit_code(result.success))
}

/// Re-read tracked resources.
async fn cmd_refresh(config_path: Option<&Path>, formatter: &OutputFormatter) -> Result<ExitCode> {
    let ctx = Context::load(config_path).await?;
    let cancel = cancel_on_ctrl_c();
    let report = ctx.reconciler().with_cancellation(cancel).refresh().await?;

    println!("{}", formatter.format_refresh(&report));
    Ok(ExitCode::SUCCESS)
}

/// Show deployment status.
async fn cmd_status(config_path: Option<&Path>, formatter: &OutputFormatter) -> Result<ExitCode> {
    let ctx = Context::load(config_path).await?;
    let status = ctx.reconciler().status().await?;

    println!("{}", formatter.format_status(&status));
    Ok(ExitCode::SUCCESS)
}

/// Check for drift.
async fn cmd_drift(config_path: Option<&Path>, formatter: &OutputFormatter) -> Result<ExitCode> {
    let ctx = Context::load(config_path).await?;
    let report = ctx.reconciler().check_drift().await?;

    println!("{}", formatter.format_drift(&report));
    Ok(exit_code(report.is_converged()))
}

/// Track an existing remote resource.
async fn cmd_import(
    config_path: Option<&Path>,
    addr: &ResourceAddr,
    id: &str,
    formatter: &OutputFormatter,
) -> Result<ExitCode> {
    let ctx = Context::load(config_path).await?;
    let record = ctx.reconciler().import(addr, id).await?;

    println!("{}", formatter.format_import(&record));
    Ok(ExitCode::SUCCESS)
}

/// Destroy every tracked resource.
async fn cmd_destroy(
    config_path: Option<&Path>,
    auto_approve: bool,
    formatter: &OutputFormatter,
) -> Result<ExitCode> {
    let ctx = Context::load(config_path).await?;

    let Some(state) = ctx.store.load().await? else {
        println!("{}", formatter.success("No resources to destroy."));
        return Ok(ExitCode::SUCCESS);
    };
    if state.resources.is_empty() {
        println!("{}", formatter.success("No resources to destroy."));
        return Ok(ExitCode::SUCCESS);
    }

    eprintln!("The following resources will be destroyed:");
    for record in state.resources.values() {
        eprintln!("  - {} ({})", record.addr, record.id);
    }

    if !auto_approve
        && !confirm("\nThis action is IRREVERSIBLE. Type 'destroy' to confirm: ", "destroy")?
    {
        eprintln!("Destruction cancelled.");
        return Ok(ExitCode::SUCCESS);
    }

    let cancel = cancel_on_ctrl_c();
    let result = ctx.reconciler().with_cancellation(cancel).destroy().await?;

    println!("{}", formatter.format_reconciliation(&result));
    Ok(exit_code(result.success))
}

/// Describe resource kinds.
fn cmd_schema(kind: Option<&str>, formatter: &OutputFormatter) -> Result<ExitCode> {
    let schemas = builtin_schemas();
    let selected: Vec<_> = schemas
        .iter()
        .filter(|s| kind.is_none_or(|k| s.kind() == k))
        .collect();

    if selected.is_empty() {
        return Err(ProviderError::UnknownKind {
            kind: kind.unwrap_or_default().to_string(),
        }
        .into());
    }

    println!("{}", formatter.format_schemas(&selected));
    Ok(ExitCode::SUCCESS)
}

/// State management commands.
async fn cmd_state(
    config_path: Option<&Path>,
    command: StateCommands,
    formatter: &OutputFormatter,
) -> Result<ExitCode> {
    let (config_file, config) = load_config(config_path)?;
    let store = open_store(&config.state, base_dir(&config_file)).await?;

    match command {
        StateCommands::Show => {
            if let Some(state) = store.load().await? {
                println!("{}", formatter.format_state(&state));
            } else {
                println!("{}", formatter.warning("No state found."));
            }
        }
        StateCommands::Lock { holder } => {
            let lock = store.acquire_lock(holder.as_deref().unwrap_or("")).await?;
            println!("{}", formatter.format_lock(&lock));
        }
        StateCommands::Unlock { lock_id, force } => {
            if force {
                if let Some(lock_info) = store.get_lock_info().await? {
                    warn!("Force-releasing lock held by {}", lock_info.holder);
                    store.release_lock(&lock_info.lock_id).await?;
                    println!("{}", formatter.success("State forcefully unlocked."));
                } else {
                    println!("{}", formatter.warning("State is not locked."));
                }
            } else if let Some(id) = lock_id {
                store.release_lock(&id).await?;
                println!("{}", formatter.success("State unlocked."));
            } else {
                eprintln!("Please provide --lock-id or use --force");
                return Ok(ExitCode::FAILURE);
            }
        }
    }

    Ok(ExitCode::SUCCESS)
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Everything a reconciling command needs.
struct Context {
    config: DeployConfig,
    store: Box<dyn StateStore>,
    registry: Arc<ProviderRegistry>,
}

impl Context {
    /// Loads and validates the configuration, then opens the store and
    /// builds the adapters.
    async fn load(config_path: Option<&Path>) -> Result<Self> {
        let (config_file, config) = load_config(config_path)?;
        ConfigValidator::new().validate(&config)?;

        let store = open_store(&config.state, base_dir(&config_file)).await?;
        let registry = build_registry(&config)?;

        Ok(Self {
            config,
            store,
            registry,
        })
    }

    fn reconciler(&self) -> Reconciler<'_, dyn StateStore> {
        Reconciler::new(&self.config, &*self.store, Arc::clone(&self.registry))
    }
}

/// Resolves the configuration file path.
fn resolve_config_path(config_path: Option<&Path>) -> Result<PathBuf> {
    config_path.map_or_else(|| find_config_file("."), |path| Ok(path.to_path_buf()))
}

fn base_dir(config_file: &Path) -> &Path {
    config_file
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."))
}

/// Loads `.env` next to the configuration, then the configuration itself.
fn load_config(config_path: Option<&Path>) -> Result<(PathBuf, DeployConfig)> {
    let config_file = resolve_config_path(config_path)?;
    debug!("Loading configuration from: {}", config_file.display());

    let parser = ConfigParser::new().with_base_path(base_dir(&config_file));
    parser.load_dotenv()?;
    let config = parser.load_with_env(&config_file)?;

    Ok((config_file, config))
}

/// Builds the adapters over the HTTP transport.
fn build_registry(config: &DeployConfig) -> Result<Arc<ProviderRegistry>> {
    let token = ConfigParser::api_token();
    if token.is_none() {
        warn!("APICACHE_API_TOKEN is not set; requests will be unauthenticated");
    }

    let transport = Arc::new(HttpTransport::from_config(&config.transport, token)?);
    Ok(Arc::new(
        ProviderRegistry::new().with(Arc::new(ApiCacheAdapter::new(transport))),
    ))
}

/// Returns a flag set by the first Ctrl-C.
fn cancel_on_ctrl_c() -> CancellationFlag {
    let cancel = CancellationFlag::new();
    let flag = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted; finishing in-flight actions, no new ones will start");
            flag.cancel();
        }
    });
    cancel
}

/// Asks for confirmation on stderr.
fn confirm(prompt: &str, expected: &str) -> Result<bool> {
    eprint!("{prompt}");
    std::io::stderr().flush()?;

    let mut input = String::new();
    std::io::stdin().read_line(&mut input)?;

    Ok(input.trim().eq_ignore_ascii_case(expected))
}

const fn exit_code(success: bool) -> ExitCode {
    if success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
