mod cmd;
mod exit;
mod logging;
mod output;

use clap::Parser;

use crate::cmd::Command;
use crate::logging::{init_logging, LogFormat, LogLevel};
use crate::output::OutputFormat;

#[derive(Parser, Debug)]
#[command(name = "tlj", version, about = "Typed length-prefixed message exchange")]
struct Cli {
    /// Output format for received values.
    #[arg(long, value_name = "FORMAT", global = true)]
    format: Option<OutputFormat>,

    /// Log output format (stderr).
    #[arg(long, value_name = "FORMAT", default_value = "text", global = true)]
    log_format: LogFormat,

    /// Minimum log level (stderr).
    #[arg(
        long,
        value_name = "LEVEL",
        default_value = "info",
        env = "TLJ_LOG_LEVEL",
        global = true
    )]
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
    use std::time::Duration;

    use tlj_transport::Endpoint;

    use super::*;

    #[test]
    fn parses_send_request() {
        let cli = Cli::try_parse_from([
            "tlj",
            "send",
            "unix:/tmp/test.sock",
            "--json",
            r#"{"ID":1}"#,
            "--request",
            "--wait-timeout",
            "250ms",
        ])
        .expect("send args should parse");

        let Command::Send(args) = cli.command else {
            panic!("expected send");
        };
        assert_eq!(args.endpoint, Endpoint::Unix("/tmp/test.sock".into()));
        assert!(args.request);
        assert_eq!(args.wait_timeout, Duration::from_millis(250));
    }

    #[test]
    fn send_rejects_both_sources() {
        let err = Cli::try_parse_from([
            "tlj",
            "send",
            "/tmp/test.sock",
            "--json",
            "{}",
            "--file",
            "doc.json",
        ])
        .expect_err("conflicting args should fail");
        assert_eq!(err.kind(), clap::error::ErrorKind::ArgumentConflict);
    }

    #[test]
    fn send_requires_a_document() {
        let err = Cli::try_parse_from(["tlj", "send", "/tmp/test.sock"])
            .expect_err("missing document should fail");
        assert_eq!(err.kind(), clap::error::ErrorKind::MissingRequiredArgument);
    }

    #[test]
    fn parses_serve_over_tcp() {
        let cli = Cli::try_parse_from([
            "tlj",
            "--format",
            "json",
            "serve",
            "tcp:127.0.0.1:7000",
            "--tag",
            "admin",
            "--count",
            "2",
        ])
        .expect("serve args should parse");

        assert!(matches!(cli.format, Some(OutputFormat::Json)));
        let Command::Serve(args) = cli.command else {
            panic!("expected serve");
        };
        assert_eq!(args.endpoint, Endpoint::Tcp("127.0.0.1:7000".to_string()));
        assert_eq!(args.tag, "admin");
        assert_eq!(args.count, Some(2));
    }

    #[test]
    fn rejects_bad_endpoint() {
        let err = Cli::try_parse_from(["tlj", "serve", "nowhere"])
            .expect_err("endpoint without scheme or path should fail");
        assert_eq!(err.kind(), clap::error::ErrorKind::ValueValidation);
    }

    #[test]
    fn strict_requires_schema_dir() {
        let err = Cli::try_parse_from(["tlj", "serve", "/tmp/x.sock", "--strict"])
            .expect_err("--strict alone should fail");
        assert_eq!(err.kind(), clap::error::ErrorKind::MissingRequiredArgument);
    }
}
