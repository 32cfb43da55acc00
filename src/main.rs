use anyhow::{anyhow, Context, Result};
use clap::{CommandFactory, Parser};
use crossbeam_channel::{unbounded, Receiver};
use is_terminal::IsTerminal;
use std::fs::File;
use std::io::{self, Write};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use drainflow::config::{DrainflowConfig, LogFormat, LoggingConfig};
use drainflow::config_file::ConfigFile;
use drainflow::drain::DrainFactory;
use drainflow::model::format_templates_output;
use drainflow::parallel::{PipelineOutcome, PipelineProcessor};
use drainflow::platform::{Ctrl, ExitCode, SignalHandler};
use drainflow::readers;
use drainflow::store::{JsonFileStore, NullStore, TemplateStore};
use drainflow::Cli;

fn main() {
    let cli = process_args_with_config();

    if let Some(shell) = cli.completions {
        clap_complete::generate(shell, &mut Cli::command(), "drainflow", &mut io::stdout());
        ExitCode::Success.exit();
    }

    let config = DrainflowConfig::from_cli(&cli);

    if let Err(e) = init_logging(&config.logging) {
        eprintln!("drainflow: Error: {:#}", e);
        ExitCode::InvalidUsage.exit();
    }

    if let Err(e) = config.validate() {
        eprintln!("drainflow: Error: {:#}", e);
        ExitCode::InvalidUsage.exit();
    }

    if !cli.alias.is_empty() {
        eprintln!("drainflow: Error: --alias cannot be used together with --ignore-config");
        ExitCode::InvalidUsage.exit();
    }

    // Nothing piped in and no files: show usage instead of waiting on the terminal
    if config.input.files.is_empty() && io::stdin().is_terminal() {
        let _ = Cli::command().print_help();
        ExitCode::InvalidUsage.exit();
    }

    // Shutdown and stats requests from the signal handler reach the coordinator here
    let (ctrl_tx, ctrl_rx) = unbounded::<Ctrl>();
    let _signal_handler = match SignalHandler::new(ctrl_tx) {
        Ok(handler) => handler,
        Err(e) => {
            eprintln!("drainflow: Failed to initialize signal handling: {}", e);
            ExitCode::GeneralError.exit();
        }
    };

    match run_pipeline(&config, ctrl_rx) {
        Ok(outcome) => {
            print_reports(&config, &outcome);
            if let Some(code) = SignalHandler::shutdown_exit_code() {
                code.exit();
            }
            ExitCode::Success.exit();
        }
        Err(e) => {
            eprintln!("drainflow: Error: {:#}", e);
            ExitCode::GeneralError.exit();
        }
    }
}

fn run_pipeline(config: &DrainflowConfig, ctrl_rx: Receiver<Ctrl>) -> Result<PipelineOutcome> {
    let input = readers::open_input(&config.input.files)?;

    let output: Box<dyn Write + Send> = match &config.output.path {
        Some(path) => Box::new(
            File::create(path)
                .with_context(|| format!("Failed to create output file '{}'", path.display()))?,
        ),
        None => Box::new(io::stdout()),
    };

    let store: Box<dyn TemplateStore> = match &config.store.state {
        Some(path) => {
            debug!(path = %path.display(), "using state file");
            Box::new(JsonFileStore::new(path))
        }
        None => Box::new(NullStore),
    };

    info!(
        processors = config.pipeline.num_processors,
        batch_size = config.pipeline.batch_size,
        sync_period = %humantime::format_duration(config.pipeline.sync_period),
        "starting pipeline"
    );

    PipelineProcessor::new(
        config.pipeline.clone(),
        DrainFactory::new(config.drain.clone()),
        store,
    )
    .with_input_format(config.input.format.clone(), &config.input.message_field)
    .run(input, output, Some(ctrl_rx))
}

fn print_reports(config: &DrainflowConfig, outcome: &PipelineOutcome) {
    let mut stderr = io::stderr().lock();

    if config.report.templates {
        let ranked = outcome.model.ranked();
        let _ = writeln!(stderr, "{}", format_templates_output(&ranked));
    }

    if config.report.stats {
        let _ = writeln!(stderr, "{}", outcome.stats.format_stats());
        if let Some(summary) = outcome.errors.format_summary() {
            let _ = writeln!(stderr, "Dropped lines by error kind:\n{}", summary);
        }
    }
}

/// RUST_LOG wins over --log-level; logs always go to stderr
fn init_logging(logging: &LoggingConfig) -> Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&logging.level)
            .with_context(|| format!("Invalid --log-level '{}'", logging.level))?,
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr);

    let result = match logging.format {
        LogFormat::Pretty => builder
            .with_ansi(io::stderr().is_terminal())
            .with_target(false)
            .try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
    result.map_err(|e| anyhow!("Failed to initialize logging: {}", e))
}

/// Apply config file defaults and aliases, then parse
fn process_args_with_config() -> Cli {
    let raw_args: Vec<String> = std::env::args().collect();

    // --show-config runs before parsing so a broken command line can still be inspected
    if raw_args.iter().any(|arg| arg == "--show-config") {
        ConfigFile::show_config();
        ExitCode::Success.exit();
    }

    let processed_args = if raw_args.iter().any(|arg| arg == "--ignore-config") {
        raw_args
    } else {
        let config_file_path = extract_config_file_arg(&raw_args);
        match ConfigFile::load_with_custom_path(config_file_path.as_deref())
            .and_then(|config_file| config_file.process_args(raw_args))
        {
            Ok(processed) => processed,
            Err(e) => {
                eprintln!("drainflow: Config error: {:#}", e);
                ExitCode::InvalidUsage.exit();
            }
        }
    };

    Cli::parse_from(processed_args)
}

fn extract_config_file_arg(args: &[String]) -> Option<String> {
    args.iter().enumerate().find_map(|(i, arg)| {
        if arg == "--config-file" {
            args.get(i + 1).cloned()
        } else {
            arg.strip_prefix("--config-file=").map(str::to_string)
        }
    })
}
