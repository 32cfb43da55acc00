// CLI structure - contains all command-line arguments and options

use clap::Parser;
use clap_complete::Shell;
use std::path::PathBuf;
use std::time::Duration;

use crate::config::{InputFormat, LogFormat};

#[derive(Parser, Debug)]
#[command(name = "drainflow")]
#[command(about = "A concurrent log ingestion pipeline that mines line templates")]
#[command(
    long_about = "A concurrent log ingestion pipeline that mines line templates\n\nEvery input line becomes one NDJSON record carrying the template it matched.\nWorkers learn new templates in parallel; every --sync-period the pool is\nreplaced and what it learned is merged into one canonical template model\n(persisted with --state).\n\nCOMMON EXAMPLES:\n  drainflow app.log > records.ndjson\n  drainflow -f json --message-field msg service.jsonl.gz --state templates.json\n  tail -F app.log | drainflow --flush-after 500ms --templates"
)]
#[command(author = "Dirk Loss <mail@dirk-loss.de>")]
#[command(version)]
#[command(args_override_self = true)]
pub struct Cli {
    /// Input files (stdin if not specified, or use "-" to explicitly specify stdin)
    pub files: Vec<String>,

    /// Input format: text (whole line is the message) or json (one object per line)
    #[arg(
        short = 'f',
        long = "input-format",
        value_enum,
        default_value_t = InputFormat::Text,
        help_heading = "Input Options"
    )]
    pub input_format: InputFormat,

    /// JSON field holding the message (json input only)
    #[arg(
        long = "message-field",
        default_value = "message",
        help_heading = "Input Options"
    )]
    pub message_field: String,

    /// Write NDJSON records to FILE instead of stdout
    #[arg(short = 'o', long = "output", value_name = "FILE", help_heading = "Output Options")]
    pub output: Option<PathBuf>,

    /// Workers per generation (default: number of CPUs)
    #[arg(short = 'p', long = "processors", help_heading = "Pipeline Options")]
    pub processors: Option<usize>,

    /// Maximum lines per batch
    #[arg(long = "batch-size", default_value_t = 100, help_heading = "Pipeline Options")]
    pub batch_size: usize,

    /// Flush a partial batch after this long without a flush
    #[arg(
        long = "flush-after",
        default_value = "3s",
        value_parser = humantime::parse_duration,
        help_heading = "Pipeline Options"
    )]
    pub flush_after: Duration,

    /// Interval between worker recycles and template syncs
    #[arg(
        long = "sync-period",
        default_value = "60s",
        value_parser = humantime::parse_duration,
        help_heading = "Pipeline Options"
    )]
    pub sync_period: Duration,

    /// Random spread applied to each sync period
    #[arg(
        long = "sync-jitter",
        default_value = "5s",
        value_parser = humantime::parse_duration,
        help_heading = "Pipeline Options"
    )]
    pub sync_jitter: Duration,

    /// Input batches allowed in flight before the reader blocks
    #[arg(long = "input-queue", default_value_t = 10, help_heading = "Pipeline Options")]
    pub input_queue: usize,

    /// Output batches allowed in flight (default: 4 x processors)
    #[arg(long = "output-queue", help_heading = "Pipeline Options")]
    pub output_queue: Option<usize>,

    /// How long a recycle waits for workers to report before giving up on them
    #[arg(
        long = "worker-timeout",
        default_value = "60s",
        value_parser = humantime::parse_duration,
        help_heading = "Pipeline Options"
    )]
    pub worker_timeout: Duration,

    #[arg(
        long = "poll-interval",
        default_value = "100ms",
        value_parser = humantime::parse_duration,
        hide = true
    )]
    pub poll_interval: Duration,

    /// Prefix tree depth of the template miner
    #[arg(long = "drain-depth", default_value_t = 4, help_heading = "Template Options")]
    pub drain_depth: usize,

    /// Maximum children per tree node before tokens share the wildcard branch
    #[arg(
        long = "drain-max-children",
        default_value_t = 100,
        help_heading = "Template Options"
    )]
    pub drain_max_children: usize,

    /// Minimum token similarity (0-1) for a line to join an existing template
    #[arg(
        long = "drain-similarity",
        default_value_t = 0.4,
        help_heading = "Template Options"
    )]
    pub drain_similarity: f64,

    /// Load templates from FILE at startup and sync the model back to it
    #[arg(long = "state", value_name = "FILE", help_heading = "Template Options")]
    pub state: Option<PathBuf>,

    /// Print the final templates ranked by count to stderr
    #[arg(long = "templates", help_heading = "Template Options")]
    pub templates: bool,

    /// Show processing statistics at end
    #[arg(short = 's', long = "stats", help_heading = "Metrics and Stats")]
    pub stats: bool,

    /// Log level filter (overridden by RUST_LOG)
    #[arg(long = "log-level", default_value = "info", help_heading = "Logging Options")]
    pub log_level: String,

    /// Log output format on stderr
    #[arg(
        long = "log-format",
        value_enum,
        default_value_t = LogFormat::Pretty,
        help_heading = "Logging Options"
    )]
    pub log_format: LogFormat,

    /// Specify custom configuration file path
    #[arg(long = "config-file", help_heading = "Configuration Options")]
    pub config_file: Option<String>,

    /// Ignore configuration file
    #[arg(long = "ignore-config", help_heading = "Configuration Options")]
    pub ignore_config: bool,

    /// Use alias from configuration file
    #[arg(short = 'a', long = "alias", help_heading = "Configuration Options")]
    pub alias: Vec<String>,

    /// Show configuration file and exit
    #[arg(long = "show-config", help_heading = "Configuration Options")]
    pub show_config: bool,

    /// Print a shell completion script and exit
    #[arg(long = "completions", value_name = "SHELL", help_heading = "Configuration Options")]
    pub completions: Option<Shell>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_input_options() {
        let cli = Cli::try_parse_from([
            "drainflow",
            "-f",
            "json",
            "--message-field",
            "msg",
            "a.log",
            "-",
        ])
        .unwrap();
        assert_eq!(cli.input_format, InputFormat::Json);
        assert_eq!(cli.message_field, "msg");
        assert_eq!(cli.files, vec!["a.log", "-"]);
    }

    #[test]
    fn rejects_unknown_input_format() {
        assert!(Cli::try_parse_from(["drainflow", "-f", "csv"]).is_err());
    }

    #[test]
    fn rejects_malformed_durations() {
        assert!(Cli::try_parse_from(["drainflow", "--sync-period", "soon"]).is_err());
    }

    #[test]
    fn later_flags_override_earlier_ones() {
        // config-file defaults are prepended, so the user's own flag must win
        let cli =
            Cli::try_parse_from(["drainflow", "--batch-size", "10", "--batch-size", "20"]).unwrap();
        assert_eq!(cli.batch_size, 20);
    }
}
