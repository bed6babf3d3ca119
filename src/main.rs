use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use phasewatch::sink::{ConsoleFormat, ConsoleSink, FanoutSink, TracingSink};
use phasewatch::{cancel_on_signal, Controller, PhasewatchConfig, Principal, TerminalResult};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_appender::non_blocking::WorkerGuard;

#[derive(Parser, Debug)]
#[command(name = "phasewatch")]
#[command(about = "Bring a remote instance and its application up or down and watch both converge")]
#[command(version)]
#[command(long_about = "Starts or stops a remote compute instance through operator-configured \
commands, then polls the instance lifecycle and the application's control API until both agree \
on the target phase. Progress is printed one line per change.")]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Path to configuration file
    #[arg(short, long, global = true, default_value = "phasewatch.toml", help = "Path to TOML configuration file")]
    config: String,

    /// Enable debug logging (most verbose)
    #[arg(short, long, global = true, help = "Enable debug level logging")]
    debug: bool,

    /// Enable verbose logging (info level)
    #[arg(short, long, global = true, help = "Enable verbose info level logging")]
    verbose: bool,

    /// Enable quiet mode (errors only)
    #[arg(short, long, global = true, help = "Enable quiet mode - only log errors")]
    quiet: bool,

    /// Override log format (json, pretty, compact)
    #[arg(long, global = true, value_name = "FORMAT", help = "Log output format: json, pretty, or compact")]
    log_format: Option<String>,

    /// Also write logs to a daily rolling file
    #[arg(long, global = true, value_name = "PATH")]
    log_file: Option<PathBuf>,

    /// Print progress and results as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Name to act as (defaults to $USER)
    #[arg(long, global = true, value_name = "NAME")]
    principal: Option<String>,

    /// Role names held; replaces permissions.default_roles when given
    #[arg(long = "role", global = true, value_name = "ROLE")]
    roles: Vec<String>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the instance and wait until the application is running
    Start,
    /// Stop the application and the instance and wait until both are down
    Stop,
    /// Show the current instance and application state
    Status,
    /// Send a console command to the application
    Issue {
        #[arg(required = true, trailing_var_arg = true)]
        command: Vec<String>,
    },
    /// List players connected to the application
    Players,
    /// Validate configuration file and exit
    ValidateConfig,
    /// Print default configuration in TOML format and exit
    PrintConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Handle special modes that don't require full initialization
    if let Command::PrintConfig = args.command {
        return print_default_config();
    }

    let log_guard = init_logging(&args)?;

    info!("Starting phasewatch v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration file: {}", args.config);

    let exit_code = match run(args).await {
        Ok(code) => code,
        Err(e) => {
            error!("{:#}", e);
            eprintln!("✗ {:#}", e);
            1
        }
    };

    // Flush the file writer before exiting
    drop(log_guard);
    std::process::exit(exit_code);
}

async fn run(args: Args) -> Result<i32> {
    let config = PhasewatchConfig::load_from_file(&args.config)
        .with_context(|| format!("Failed to load configuration from {}", args.config))?;

    if let Err(e) = config.validate() {
        error!("Configuration validation failed: {}", e);
        return Err(e).context("Configuration validation failed");
    }

    if let Command::ValidateConfig = args.command {
        info!("Configuration validation successful");
        println!("✓ Configuration is valid");
        return Ok(0);
    }

    let format = if args.json {
        ConsoleFormat::Json
    } else {
        ConsoleFormat::Text
    };
    let sink = FanoutSink::new()
        .with_sink(Arc::new(ConsoleSink::stdout(format)))
        .with_sink(Arc::new(TracingSink));
    let controller = Controller::from_config(&config, Arc::new(sink))?;
    let principal = resolve_principal(&args, &config);

    match args.command {
        Command::Start => {
            let cancel = signal_token();
            let result = controller.start(&principal, &cancel).await?;
            finish(result, args.json)
        }
        Command::Stop => {
            let cancel = signal_token();
            let result = controller.stop(&principal, &cancel).await?;
            finish(result, args.json)
        }
        Command::Status => {
            let report = controller.status(&principal).await?;
            if args.json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!("{}", report);
            }
            Ok(0)
        }
        Command::Issue { command } => {
            controller.issue(&principal, &command.join(" ")).await?;
            println!("✓ Command issued");
            Ok(0)
        }
        Command::Players => {
            let players = controller.players(&principal).await?;
            if args.json {
                println!("{}", serde_json::to_string(&players)?);
            } else if players.is_empty() {
                println!("No-one is online");
            } else {
                println!("{} online: {}", players.len(), players.join(", "));
            }
            Ok(0)
        }
        Command::ValidateConfig | Command::PrintConfig => Ok(0),
    }
}

/// Token cancelled by Ctrl+C or SIGTERM
fn signal_token() -> CancellationToken {
    let cancel = CancellationToken::new();
    cancel_on_signal(cancel.clone());
    cancel
}

fn finish(result: TerminalResult, json: bool) -> Result<i32> {
    if json {
        println!("{}", serde_json::to_string(&result)?);
    } else {
        println!("{}", result);
    }
    Ok(result.exit_code())
}

fn resolve_principal(args: &Args, config: &PhasewatchConfig) -> Principal {
    let name = args
        .principal
        .clone()
        .or_else(|| std::env::var("USER").ok())
        .unwrap_or_else(|| "operator".to_string());

    let roles = if args.roles.is_empty() {
        config.permissions.default_roles.clone()
    } else {
        args.roles.clone()
    };

    Principal::new(&name, roles)
}

fn init_logging(args: &Args) -> Result<Option<WorkerGuard>> {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

    // Determine log level based on flags
    let log_level = if args.debug {
        "debug"
    } else if args.verbose {
        "info"
    } else if args.quiet {
        "error"
    } else {
        "warn"
    };

    // Create environment filter
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("phasewatch={}", log_level)));

    // Configure format based on options
    let fmt_layer = match args.log_format.as_deref() {
        Some("json") => fmt::layer()
            .json()
            .with_target(true)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true)
            .with_writer(std::io::stderr)
            .boxed(),
        Some("compact") => fmt::layer()
            .compact()
            .with_target(false)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
            .with_writer(std::io::stderr)
            .boxed(),
        Some("pretty") | None => fmt::layer()
            .pretty()
            .with_target(true)
            .with_thread_ids(args.debug)
            .with_file(args.debug)
            .with_line_number(args.debug)
            .with_writer(std::io::stderr)
            .boxed(),
        Some(format) => {
            eprintln!("Warning: Unknown log format '{}', using default", format);
            fmt::layer()
                .with_target(true)
                .with_thread_ids(args.debug)
                .with_file(args.debug)
                .with_line_number(args.debug)
                .with_writer(std::io::stderr)
                .boxed()
        }
    };

    // Optional daily rolling file, written off the async threads
    let (file_layer, guard) = match &args.log_file {
        Some(path) => {
            let directory = path
                .parent()
                .filter(|dir| !dir.as_os_str().is_empty())
                .unwrap_or_else(|| std::path::Path::new("."));
            let file_name = path
                .file_name()
                .context("--log-file must name a file")?;

            let appender = tracing_appender::rolling::daily(directory, file_name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer().with_ansi(false).with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(file_layer)
        .with(env_filter)
        .init();

    Ok(guard)
}

/// Print default configuration in TOML format
fn print_default_config() -> Result<()> {
    let rendered = toml::to_string_pretty(&PhasewatchConfig::default())
        .context("Failed to render default configuration")?;

    println!("# Phasewatch Configuration File");
    println!("# This is the default configuration with all available options.");
    println!("# `resource.id` must be set before start or stop will run.");
    println!("# Environment overrides use PHASEWATCH_<SECTION>__<KEY>, e.g.");
    println!("# PHASEWATCH_OBSERVER__POLL_INTERVAL_SECONDS=10");
    println!();
    println!("{}", rendered);
    Ok(())
}
