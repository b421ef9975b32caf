#![forbid(unsafe_code)]

mod cmd;
mod csv;
mod output;
mod transport;

use std::env;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use dwell_core::ErrorCode;
use dwell_core::config::{DEFAULT_CONFIG_FILE, load_config};
use output::{CliError, OutputMode, render_error, resolve_output_mode};
use tracing::debug;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};
use transport::MissingCredentials;

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "dwell: Jira time-in-status reporting",
    long_about = None
)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON output instead of human-readable text.
    #[arg(long, global = true)]
    json: bool,

    /// Path to the TOML config file. A missing file means defaults.
    #[arg(long, global = true, value_name = "PATH", default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    #[command(
        about = "Fetch boards, sprints, and issues and write time-in-status CSVs",
        long_about = "Fetch every board, the in-scope sprints, their issues and full \
                      changelogs, reduce them to hours per status, and write a raw \
                      and a summary CSV. Nothing is written unless the whole run succeeds.",
        after_help = "EXAMPLES:\n    # Report using ./dwell.toml and ./.jira-base64-auth\n    \
                      dwell report --base-url https://acme.atlassian.net\n\n    \
                      # Throttle the fetch and write elsewhere\n    \
                      dwell report --max-concurrency 4 --output-dir /tmp/dwell\n\n    \
                      # Machine-readable run summary\n    dwell --json report"
    )]
    Report(cmd::report::ReportArgs),

    #[command(
        about = "Validate and describe the classification tables",
        long_about = "Build the effective issue-type and status tables (built-in or \
                      the [policy] section of the config) and report their sizes. \
                      Fails when a value sits on both sides of a pair or the status \
                      tables disagree.",
        after_help = "EXAMPLES:\n    # Check the built-in tables\n    dwell policy\n\n    \
                      # List every classified value\n    dwell policy --values\n\n    \
                      # Check a custom policy file\n    dwell --config team.toml policy"
    )]
    Policy(cmd::policy::PolicyArgs),
}

fn init_tracing(verbose: bool) {
    let filter = EnvFilter::try_from_env("DWELL_LOG").unwrap_or_else(|_| {
        EnvFilter::new(if verbose || env::var("DEBUG").is_ok() {
            "dwell=debug,info"
        } else {
            "dwell=info,warn"
        })
    });

    let format = env::var("DWELL_LOG_FORMAT").unwrap_or_else(|_| "compact".to_string());

    let registry = tracing_subscriber::registry().with(filter);

    // stdout belongs to command output.
    match format.as_str() {
        "json" => {
            registry
                .with(fmt::layer().json().with_ansi(false).with_writer(std::io::stderr))
                .init();
        }
        _ => {
            registry
                .with(fmt::layer().compact().with_writer(std::io::stderr))
                .init();
        }
    }
}

fn run(cli: &Cli, output: OutputMode) -> anyhow::Result<()> {
    let config = load_config(&cli.config).map_err(dwell_core::Error::from)?;
    debug!(path = %cli.config.display(), "loaded config");

    match &cli.command {
        Commands::Report(args) => cmd::report::run_report(args, &config, output),
        Commands::Policy(args) => cmd::policy::run_policy(args, &config, output),
    }
}

fn to_cli_error(err: &anyhow::Error) -> CliError {
    let message = format!("{err:#}");
    if let Some(core) = err.downcast_ref::<dwell_core::Error>() {
        return CliError::new(message).with_code(core.code());
    }
    if err.downcast_ref::<MissingCredentials>().is_some() {
        return CliError::new(message).with_code(ErrorCode::MissingCredentials);
    }
    CliError::new(message)
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let output = resolve_output_mode(cli.json);
    match run(&cli, output) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            if let Err(render_err) = render_error(output, &to_cli_error(&err)) {
                eprintln!("error: {err:#} ({render_err})");
            }
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use dwell_core::config::ConfigError;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn report_flags_parse() {
        let cli = Cli::parse_from([
            "dwell",
            "report",
            "--base-url",
            "https://acme.atlassian.net",
            "--max-concurrency",
            "4",
            "--output-dir",
            "out",
        ]);
        let Commands::Report(args) = cli.command else {
            panic!("expected report");
        };
        assert_eq!(args.base_url.as_deref(), Some("https://acme.atlassian.net"));
        assert_eq!(args.max_concurrency, Some(4));
        assert_eq!(args.output_dir, Some(PathBuf::from("out")));
        assert_eq!(args.auth_file, PathBuf::from(".jira-base64-auth"));
    }

    #[test]
    fn global_flags_parse_after_subcommand() {
        let cli = Cli::parse_from(["dwell", "policy", "--json", "--config", "team.toml", "-v"]);
        assert!(cli.json);
        assert!(cli.verbose);
        assert_eq!(cli.config, PathBuf::from("team.toml"));
        assert!(matches!(cli.command, Commands::Policy(_)));
    }

    #[test]
    fn config_defaults_to_working_directory_file() {
        let cli = Cli::parse_from(["dwell", "policy"]);
        assert_eq!(cli.config, PathBuf::from("dwell.toml"));
    }

    #[test]
    fn non_numeric_concurrency_is_rejected() {
        assert!(Cli::try_parse_from(["dwell", "report", "--max-concurrency", "many"]).is_err());
    }

    #[test]
    fn core_errors_keep_their_code() {
        let err = anyhow::Error::new(dwell_core::Error::from(ConfigError::Invalid {
            key: "fetch.max_concurrency",
            reason: "must be at least 1".to_string(),
        }));
        let cli_err = to_cli_error(&err);
        assert_eq!(cli_err.error_code.as_deref(), Some("E1003"));
        assert!(cli_err.message.contains("fetch.max_concurrency"));
    }

    #[test]
    fn missing_credentials_get_their_code() {
        let err = anyhow::Error::new(MissingCredentials {
            auth_file: PathBuf::from(".jira-base64-auth"),
        });
        let cli_err = to_cli_error(&err);
        assert_eq!(cli_err.error_code.as_deref(), Some("E1004"));
        assert!(cli_err.suggestion.is_some());
    }

    #[test]
    fn other_errors_have_no_code() {
        let cli_err = to_cli_error(&anyhow::anyhow!("disk full"));
        assert_eq!(cli_err.message, "disk full");
        assert!(cli_err.error_code.is_none());
    }
}
