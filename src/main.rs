//! Stratus CLI entrypoint.
//!
//! This is the main entrypoint for the stratus command-line tool.

use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;

use stratus::cli::{Cli, Commands, OutputFormatter, StateCommands};
use stratus::config::{find_config_file, ConfigParser, ConfigValidator, StratusConfig};
use stratus::error::{ApplyError, Result, StratusError};
use stratus::graph::{DependencyResolver, GraphBuilder};
use stratus::outputs::cancel_channel;
use stratus::provider::simulated_registry;
use stratus::reconciler::Reconciler;
use stratus::state::{open_store, SnapshotStore};

use clap::Parser;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

/// Main entrypoint.
fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize logging
    init_logging(cli.verbose);

    // Run async runtime
    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Failed to create async runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(cli)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

/// Initializes the logging system.
fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

/// Main async entry point.
async fn run(cli: Cli) -> Result<()> {
    let formatter = OutputFormatter::new(cli.output);

    match cli.command {
        Commands::Init { path, force } => cmd_init(&path, force),
        Commands::Validate { warnings } => cmd_validate(cli.config.as_ref(), warnings),
        Commands::Graph => cmd_graph(cli.config.as_ref(), &formatter),
        Commands::Plan { detailed } => cmd_plan(cli.config.as_ref(), detailed, &formatter).await,
        Commands::Apply { yes } => cmd_apply(cli.config.as_ref(), yes, &formatter).await,
        Commands::Destroy { yes } => cmd_destroy(cli.config.as_ref(), yes, &formatter).await,
        Commands::Outputs => cmd_outputs(cli.config.as_ref(), &formatter).await,
        Commands::State { command } => cmd_state(cli.config.as_ref(), command, &formatter).await,
    }
}

/// Initialize a new project.
fn cmd_init(path: &PathBuf, force: bool) -> Result<()> {
    info!("Initializing new Stratus project in: {}", path.display());

    let config_path = path.join("stratus.yaml");
    let gitignore_path = path.join(".gitignore");

    // Check if files exist
    if !force && config_path.exists() {
        eprintln!("Configuration file already exists: {}", config_path.display());
        eprintln!("Use --force to overwrite.");
        return Ok(());
    }

    // Create directory if needed
    if !path.exists() {
        std::fs::create_dir_all(path)?;
    }

    // Write config template
    let config_template = include_str!("../templates/stratus.yaml");
    std::fs::write(&config_path, config_template)?;
    eprintln!("Created: {}", config_path.display());

    // Write/update .gitignore
    let gitignore_content = ".env\n.stratus/\n";
    if gitignore_path.exists() {
        let existing = std::fs::read_to_string(&gitignore_path)?;
        if !existing.contains(".stratus") {
            let mut file = std::fs::OpenOptions::new()
                .append(true)
                .open(&gitignore_path)?;
            writeln!(file, "\n# Stratus")?;
            writeln!(file, ".stratus/")?;
            eprintln!("Updated: {}", gitignore_path.display());
        }
    } else {
        std::fs::write(&gitignore_path, gitignore_content)?;
        eprintln!("Created: {}", gitignore_path.display());
    }

    eprintln!("\nProject initialized successfully!");
    eprintln!("Next steps:");
    eprintln!("  1. Edit stratus.yaml with your resource declarations");
    eprintln!("  2. Run 'stratus validate' to check your configuration");
    eprintln!("  3. Run 'stratus plan' to see what will change");
    eprintln!("  4. Run 'stratus apply' to converge your resources");

    Ok(())
}

/// Validate configuration.
fn cmd_validate(config_path: Option<&PathBuf>, show_warnings: bool) -> Result<()> {
    let config_file = resolve_config_path(config_path)?;
    info!("Validating configuration: {}", config_file.display());

    let config = load_config(&config_file)?;

    // Validate
    let validator = ConfigValidator::new();
    let result = validator.validate(&config)?;

    if result.is_valid() {
        eprintln!("Configuration is valid!");
        if show_warnings && !result.warnings.is_empty() {
            eprintln!("\nWarnings:");
            for warning in &result.warnings {
                eprintln!("  - {warning}");
            }
        }
    }

    // Show summary
    eprintln!("\nConfiguration summary:");
    eprintln!("  Project: {}", config.project.name);
    eprintln!("  Environment: {}", config.project.environment);
    eprintln!("  Resources: {}", config.resources.len());
    eprintln!("  Exports: {}", config.exports.len());

    Ok(())
}

/// Show the dependency graph.
fn cmd_graph(config_path: Option<&PathBuf>, formatter: &OutputFormatter) -> Result<()> {
    let config_file = resolve_config_path(config_path)?;
    let config = load_config(&config_file)?;

    ConfigValidator::new().validate(&config)?;

    let graph = GraphBuilder.build(&config)?;
    let resolver = DependencyResolver::new(&graph);

    let output = formatter.format_graph(&graph, &resolver);
    eprintln!("{output}");

    Ok(())
}

/// Show execution plan.
async fn cmd_plan(
    config_path: Option<&PathBuf>,
    detailed: bool,
    formatter: &OutputFormatter,
) -> Result<()> {
    let (reconciler, store) = load_reconciler_and_store(config_path).await?;

    let plan = reconciler.plan(store.as_ref()).await?;

    let output = formatter.format_plan(&plan, detailed);
    eprintln!("{output}");

    Ok(())
}

/// Apply the execution plan.
async fn cmd_apply(
    config_path: Option<&PathBuf>,
    auto_approve: bool,
    formatter: &OutputFormatter,
) -> Result<()> {
    let (reconciler, store) = load_reconciler_and_store(config_path).await?;

    // Show plan first
    let plan = reconciler.plan(store.as_ref()).await?;
    if !plan.has_changes() {
        eprintln!("No changes to apply.");
        return Ok(());
    }

    let output = formatter.format_plan(&plan, false);
    eprintln!("{output}");

    // Confirm
    if !auto_approve && !confirm("Do you want to apply this plan? [y/N]: ")? {
        eprintln!("Apply cancelled.");
        return Ok(());
    }

    // Ctrl-C requests graceful cancellation
    let cancel_rx = spawn_ctrl_c_handler();

    let report = reconciler.apply(store.as_ref(), cancel_rx).await?;

    let report_output = formatter.format_report(&report);
    eprintln!("{report_output}");

    if report.is_success() {
        Ok(())
    } else {
        Err(StratusError::Apply(ApplyError::PartialFailure {
            failed: report.failed_count(),
            skipped: report.skipped_count(),
        }))
    }
}

/// Destroy all managed resources.
async fn cmd_destroy(
    config_path: Option<&PathBuf>,
    auto_approve: bool,
    formatter: &OutputFormatter,
) -> Result<()> {
    let (reconciler, store) = load_reconciler_and_store(config_path).await?;

    let Some(snapshot) = store.load().await? else {
        eprintln!("No resources to destroy.");
        return Ok(());
    };

    if snapshot.resources.is_empty() {
        eprintln!("No resources to destroy.");
        return Ok(());
    }

    eprintln!("The following resources will be destroyed:");
    for record in snapshot.resources.values() {
        eprintln!("  - {} ({})", record.name, record.provider_id);
    }

    // Confirm
    if !auto_approve {
        eprint!("\nThis action is IRREVERSIBLE. Type 'destroy' to confirm: ");
        std::io::stderr().flush()?;

        let mut input = String::new();
        std::io::stdin().read_line(&mut input)?;

        if input.trim() != "destroy" {
            eprintln!("Destruction cancelled.");
            return Ok(());
        }
    }

    let cancel_rx = spawn_ctrl_c_handler();

    let report = reconciler.destroy(store.as_ref(), cancel_rx).await?;

    let output = formatter.format_report(&report);
    eprintln!("{output}");

    if report.is_success() {
        eprintln!("All resources destroyed.");
        Ok(())
    } else {
        Err(StratusError::Apply(ApplyError::PartialFailure {
            failed: report.failed_count(),
            skipped: report.skipped_count(),
        }))
    }
}

/// Show exported outputs from the last apply.
async fn cmd_outputs(config_path: Option<&PathBuf>, formatter: &OutputFormatter) -> Result<()> {
    let (reconciler, store) = load_reconciler_and_store(config_path).await?;

    let outputs = reconciler.outputs(store.as_ref()).await?;

    let output = formatter.format_outputs(&outputs);
    eprintln!("{output}");

    Ok(())
}

/// State management commands.
async fn cmd_state(
    config_path: Option<&PathBuf>,
    command: StateCommands,
    formatter: &OutputFormatter,
) -> Result<()> {
    let (_reconciler, store) = load_reconciler_and_store(config_path).await?;

    match command {
        StateCommands::Show => {
            if let Some(snapshot) = store.load().await? {
                let output = formatter.format_snapshot(&snapshot);
                eprintln!("{output}");
            } else {
                eprintln!("No snapshot found.");
            }
        }
        StateCommands::Version => {
            if let Some(snapshot) = store.load().await? {
                eprintln!("{}", snapshot.serial);
            } else {
                eprintln!("No snapshot found.");
            }
        }
        StateCommands::History { limit } => {
            if let Some(snapshot) = store.load().await? {
                let output = formatter.format_history(&snapshot, limit);
                eprintln!("{output}");
            } else {
                eprintln!("No snapshot found.");
            }
        }
        StateCommands::Rm { yes } => {
            if !store.exists().await? {
                eprintln!("No snapshot to delete.");
                return Ok(());
            }
            if !yes && !confirm("Delete the stored snapshot? Resources will NOT be destroyed. [y/N]: ")? {
                eprintln!("Deletion cancelled.");
                return Ok(());
            }
            store.delete().await?;
            eprintln!("Snapshot deleted.");
        }
    }

    Ok(())
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Resolves the configuration file path.
fn resolve_config_path(config_path: Option<&PathBuf>) -> Result<PathBuf> {
    config_path.map_or_else(|| find_config_file("."), |path| Ok(path.clone()))
}

/// Loads the configuration file, expanding environment references.
fn load_config(config_file: &PathBuf) -> Result<StratusConfig> {
    debug!("Loading configuration from: {}", config_file.display());

    let parser = ConfigParser::new().with_base_path(
        config_file
            .parent()
            .unwrap_or_else(|| std::path::Path::new(".")),
    );
    parser.load_dotenv()?;

    parser.load_with_env(config_file)
}

/// Loads configuration, builds the reconciler, and opens the snapshot store.
async fn load_reconciler_and_store(
    config_path: Option<&PathBuf>,
) -> Result<(Reconciler, Box<dyn SnapshotStore>)> {
    let config_file = resolve_config_path(config_path)?;
    let config = load_config(&config_file)?;

    let store = open_store(&config.state).await?;
    let reconciler = Reconciler::new(config, simulated_registry())?;

    Ok((reconciler, store))
}

/// Prompts the user for a yes/no confirmation.
fn confirm(prompt: &str) -> Result<bool> {
    eprint!("{prompt}");
    std::io::stderr().flush()?;

    let mut input = String::new();
    std::io::stdin().read_line(&mut input)?;

    Ok(input.trim().eq_ignore_ascii_case("y"))
}

/// Installs a Ctrl-C handler that flips the returned cancellation channel.
fn spawn_ctrl_c_handler() -> tokio::sync::watch::Receiver<bool> {
    let (cancel_tx, cancel_rx) = cancel_channel();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received, finishing in-flight operations");
            let _ = cancel_tx.send(true);
        }
    });
    cancel_rx
}
