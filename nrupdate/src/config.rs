use clap::Parser;
use reconciler::routing::InvalidTarget;
use reconciler::{AlertTarget, RouteMode};
use std::path::PathBuf;
use std::time::Duration;

/// Points synthetic-monitoring alerts at a forwarder and refreshes the
/// forwarder's per-tenant credentials.
///
/// Database connection strings are read from `PG_CONNECTION` (read-only) and
/// `PG_CONNECTION_RW` (read-write).
#[derive(Parser, Debug)]
#[command(name = "nrupdate", version)]
pub struct Args {
    /// Host and port to send NR alerts to.
    #[arg(long)]
    pub target_host: Option<String>,

    /// Path to ktranslate config.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// How out-of-date device alert routes are rewritten: `overwrite` or `merge`.
    #[arg(long, default_value_t = RouteMode::Overwrite)]
    pub route_mode: RouteMode,

    #[arg(long, default_value_t = 10)]
    pub connect_timeout_secs: u64,

    #[arg(long, default_value_t = 60)]
    pub statement_timeout_secs: u64,

    /// Log filter directives, e.g. `info` or `reconciler=debug`.
    #[arg(long, env = "NRUPDATE_LOG", default_value = "info")]
    pub log_filter: String,

    #[arg(long, env = "SENTRY_DSN")]
    pub sentry_dsn: Option<String>,

    /// Send metrics to this statsd host. Metrics are dropped when unset.
    #[arg(long, env = "STATSD_HOST")]
    pub statsd_host: Option<String>,

    #[arg(long, env = "STATSD_PORT", default_value_t = 8125)]
    pub statsd_port: u16,
}

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum CliError {
    #[error("Flag --{0} is required.")]
    MissingFlag(&'static str),
    #[error("invalid --target-host: {0}")]
    InvalidTarget(#[from] InvalidTarget),
    #[error("--{0} must be greater than zero")]
    ZeroTimeout(&'static str),
}

/// Everything a run needs, checked before any connection is attempted.
#[derive(Debug)]
pub struct Settings {
    pub target: AlertTarget,
    pub config_path: PathBuf,
    pub route_mode: RouteMode,
    pub connect_timeout: Duration,
    pub statement_timeout: Duration,
}

impl Args {
    pub fn validate(&self) -> Result<Settings, CliError> {
        let config_path = self
            .config
            .clone()
            .filter(|p| !p.as_os_str().is_empty())
            .ok_or(CliError::MissingFlag("config"))?;
        let target = self
            .target_host
            .as_deref()
            .filter(|t| !t.is_empty())
            .ok_or(CliError::MissingFlag("target-host"))?
            .parse()?;

        if self.connect_timeout_secs == 0 {
            return Err(CliError::ZeroTimeout("connect-timeout-secs"));
        }
        if self.statement_timeout_secs == 0 {
            return Err(CliError::ZeroTimeout("statement-timeout-secs"));
        }

        Ok(Settings {
            target,
            config_path,
            route_mode: self.route_mode,
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
            statement_timeout: Duration::from_secs(self.statement_timeout_secs),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Args {
        Args::try_parse_from(std::iter::once("nrupdate").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn test_valid_args() {
        let settings = parse(&[
            "--target-host",
            "10.0.0.1:9000",
            "--config",
            "/etc/ktranslate/config.yaml",
            "--route-mode",
            "merge",
            "--statement-timeout-secs",
            "5",
        ])
        .validate()
        .unwrap();

        assert_eq!(settings.target.as_str(), "10.0.0.1:9000");
        assert_eq!(
            settings.config_path,
            PathBuf::from("/etc/ktranslate/config.yaml")
        );
        assert_eq!(settings.route_mode, RouteMode::Merge);
        assert_eq!(settings.connect_timeout, Duration::from_secs(10));
        assert_eq!(settings.statement_timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_missing_flags() {
        assert_eq!(
            parse(&["--target-host", "10.0.0.1:9000"]).validate().unwrap_err(),
            CliError::MissingFlag("config")
        );
        assert_eq!(
            parse(&["--config", "config.yaml"]).validate().unwrap_err(),
            CliError::MissingFlag("target-host")
        );
        assert_eq!(
            parse(&["--config", "config.yaml", "--target-host", ""])
                .validate()
                .unwrap_err(),
            CliError::MissingFlag("target-host")
        );
        assert_eq!(
            CliError::MissingFlag("config").to_string(),
            "Flag --config is required."
        );
    }

    #[test]
    fn test_invalid_values() {
        assert!(matches!(
            parse(&["--config", "c.yaml", "--target-host", "a:1,b:2"])
                .validate()
                .unwrap_err(),
            CliError::InvalidTarget(_)
        ));
        assert_eq!(
            parse(&[
                "--config",
                "c.yaml",
                "--target-host",
                "a:1",
                "--connect-timeout-secs",
                "0"
            ])
            .validate()
            .unwrap_err(),
            CliError::ZeroTimeout("connect-timeout-secs")
        );
        assert!(
            Args::try_parse_from(["nrupdate", "--route-mode", "append"]).is_err()
        );
    }
}
