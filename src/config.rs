use anyhow::{bail, Result};
use clap::ValueEnum;
use std::path::PathBuf;

use crate::cli::Cli;
use crate::drain::DrainConfig;

pub use crate::parallel::PipelineConfig;

/// Main configuration struct for drainflow
#[derive(Debug, Clone)]
pub struct DrainflowConfig {
    pub input: InputConfig,
    pub output: OutputConfig,
    pub pipeline: PipelineConfig,
    pub drain: DrainConfig,
    pub store: StoreConfig,
    pub logging: LoggingConfig,
    pub report: ReportConfig,
}

/// Input configuration
#[derive(Debug, Clone)]
pub struct InputConfig {
    pub files: Vec<String>,
    pub format: InputFormat,
    pub message_field: String,
}

/// Output configuration
#[derive(Debug, Clone, Default)]
pub struct OutputConfig {
    /// NDJSON destination, stdout when unset
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Default)]
pub struct StoreConfig {
    pub state: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Default)]
pub struct ReportConfig {
    pub stats: bool,
    pub templates: bool,
}

/// How each input line is turned into a message
#[derive(ValueEnum, Clone, Debug, Default, PartialEq, Eq)]
pub enum InputFormat {
    /// The whole line is the message
    #[default]
    Text,
    /// The line is a JSON object; the message is one of its string fields
    Json,
}

#[derive(ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

impl DrainflowConfig {
    /// Create configuration from CLI arguments
    pub fn from_cli(cli: &Cli) -> Self {
        let defaults = PipelineConfig::default();
        let num_processors = cli.processors.unwrap_or(defaults.num_processors);

        Self {
            input: InputConfig {
                files: cli.files.clone(),
                format: cli.input_format.clone(),
                message_field: cli.message_field.clone(),
            },
            output: OutputConfig {
                path: cli.output.clone().filter(|p| p.as_os_str() != "-"),
            },
            pipeline: PipelineConfig {
                sync_period: cli.sync_period,
                sync_jitter: cli.sync_jitter,
                num_processors,
                batch_size: cli.batch_size,
                flush_after: cli.flush_after,
                input_queue_capacity: cli.input_queue,
                output_queue_capacity: cli.output_queue.unwrap_or(4 * num_processors),
                poll_interval: cli.poll_interval,
                worker_stop_timeout: cli.worker_timeout,
            },
            drain: DrainConfig {
                depth: cli.drain_depth,
                max_children: cli.drain_max_children,
                similarity: cli.drain_similarity,
            },
            store: StoreConfig {
                state: cli.state.clone(),
            },
            logging: LoggingConfig {
                level: cli.log_level.clone(),
                format: cli.log_format,
            },
            report: ReportConfig {
                stats: cli.stats,
                templates: cli.templates,
            },
        }
    }

    /// Reject settings the pipeline cannot run with
    pub fn validate(&self) -> Result<()> {
        let pipeline = &self.pipeline;

        if pipeline.num_processors == 0 {
            bail!("--processors must be at least 1");
        }
        if pipeline.batch_size == 0 {
            bail!("--batch-size must be at least 1");
        }
        if pipeline.input_queue_capacity == 0 {
            bail!("--input-queue must be at least 1");
        }
        if pipeline.output_queue_capacity == 0 {
            bail!("--output-queue must be at least 1");
        }
        if pipeline.flush_after.is_zero() {
            bail!("--flush-after must be greater than zero");
        }
        if pipeline.sync_period.is_zero() {
            bail!("--sync-period must be greater than zero");
        }
        if pipeline.poll_interval.is_zero() {
            bail!("--poll-interval must be greater than zero");
        }
        if pipeline.sync_jitter >= pipeline.sync_period {
            bail!(
                "--sync-jitter ({}) must be smaller than --sync-period ({})",
                humantime::format_duration(pipeline.sync_jitter),
                humantime::format_duration(pipeline.sync_period)
            );
        }
        if self.input.message_field.trim().is_empty() {
            bail!("--message-field must not be empty");
        }
        if !(0.0..=1.0).contains(&self.drain.similarity) {
            bail!(
                "--drain-similarity must be between 0 and 1, got {}",
                self.drain.similarity
            );
        }
        if self.drain.depth < 2 {
            bail!("--drain-depth must be at least 2");
        }
        if self.drain.max_children == 0 {
            bail!("--drain-max-children must be at least 1");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use std::time::Duration;

    fn config(args: &[&str]) -> DrainflowConfig {
        let cli = Cli::try_parse_from(std::iter::once("drainflow").chain(args.iter().copied()))
            .unwrap();
        DrainflowConfig::from_cli(&cli)
    }

    #[test]
    fn defaults_match_documented_values() {
        let config = config(&[]);
        assert_eq!(config.input.format, InputFormat::Text);
        assert_eq!(config.input.message_field, "message");
        assert_eq!(config.pipeline.batch_size, 100);
        assert_eq!(config.pipeline.flush_after, Duration::from_secs(3));
        assert_eq!(config.pipeline.sync_period, Duration::from_secs(60));
        assert_eq!(config.pipeline.sync_jitter, Duration::from_secs(5));
        assert_eq!(config.pipeline.input_queue_capacity, 10);
        assert_eq!(
            config.pipeline.output_queue_capacity,
            4 * config.pipeline.num_processors
        );
        assert_eq!(config.pipeline.poll_interval, Duration::from_millis(100));
        assert_eq!(config.pipeline.worker_stop_timeout, Duration::from_secs(60));
        assert_eq!(config.logging.level, "info");
        assert!(config.output.path.is_none());
        config.validate().unwrap();
    }

    #[test]
    fn output_queue_follows_processor_count() {
        let config = config(&["-p", "3"]);
        assert_eq!(config.pipeline.num_processors, 3);
        assert_eq!(config.pipeline.output_queue_capacity, 12);

        let config = self::config(&["-p", "3", "--output-queue", "5"]);
        assert_eq!(config.pipeline.output_queue_capacity, 5);
    }

    #[test]
    fn parses_humantime_durations() {
        let config = config(&["--sync-period", "5m", "--sync-jitter", "30s", "--flush-after", "250ms"]);
        assert_eq!(config.pipeline.sync_period, Duration::from_secs(300));
        assert_eq!(config.pipeline.sync_jitter, Duration::from_secs(30));
        assert_eq!(config.pipeline.flush_after, Duration::from_millis(250));
    }

    #[test]
    fn dash_output_means_stdout() {
        assert!(config(&["-o", "-"]).output.path.is_none());
        assert_eq!(
            config(&["-o", "out.ndjson"]).output.path,
            Some(PathBuf::from("out.ndjson"))
        );
    }

    #[test]
    fn validate_rejects_unusable_settings() {
        for args in [
            &["-p", "0"][..],
            &["--batch-size", "0"],
            &["--input-queue", "0"],
            &["--output-queue", "0"],
            &["--flush-after", "0s"],
            &["--message-field", ""],
            &["--sync-period", "5s", "--sync-jitter", "5s"],
            &["--drain-similarity", "1.5"],
        ] {
            assert!(config(args).validate().is_err(), "accepted {:?}", args);
        }
    }
}
