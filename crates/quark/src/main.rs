mod cmd;
mod exit;
mod logging;
mod output;

use clap::Parser;

use crate::cmd::Command;
use crate::logging::{init_logging, LogFormat, LogLevel};
use crate::output::OutputFormat;

#[derive(Parser, Debug)]
#[command(name = "quark", version, about = "quark RPC client")]
struct Cli {
    /// Output format.
    #[arg(long, value_name = "FORMAT", global = true)]
    format: Option<OutputFormat>,

    /// Log output format (stderr).
    #[arg(long, value_name = "FORMAT", default_value = "text", global = true)]
    log_format: LogFormat,

    /// Minimum log level (stderr).
    #[arg(long, value_name = "LEVEL", default_value = "warn", global = true)]
    log_level: LogLevel,

    #[command(subcommand)]
    command: Command,
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.log_format, cli.log_level);

    let format = cli.format.unwrap_or_else(OutputFormat::default_for_stdout);
    match cmd::run(cli.command, format) {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("error: {err}");
            std::process::exit(err.code);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_call_with_arguments() {
        let cli = Cli::try_parse_from([
            "quark",
            "call",
            "--api",
            "ws://localhost/socket",
            "io.greenscreens.Demo.hello",
            "John Doe",
            "42",
        ])
        .expect("call args should parse");

        let Command::Call(args) = cli.command else {
            panic!("expected call");
        };
        assert_eq!(args.path, "io.greenscreens.Demo.hello");
        assert_eq!(args.args, vec!["John Doe", "42"]);
        assert!(args.connect.service.is_none());
    }

    #[test]
    fn parses_describe_with_flags() {
        let cli = Cli::try_parse_from([
            "quark",
            "--format",
            "json",
            "describe",
            "--api",
            "http://localhost/api",
            "--service",
            "ws://localhost/socket",
            "--timeout",
            "3s",
            "--no-compress",
        ])
        .expect("describe args should parse");

        let Command::Describe(args) = cli.command else {
            panic!("expected describe");
        };
        assert!(args.connect.no_compress);
        assert_eq!(args.connect.timeout, "3s");
    }

    #[test]
    fn call_requires_path() {
        let err = Cli::try_parse_from(["quark", "call", "--api", "ws://localhost/socket"])
            .expect_err("missing path should fail");
        assert_eq!(err.kind(), clap::error::ErrorKind::MissingRequiredArgument);
    }
}
