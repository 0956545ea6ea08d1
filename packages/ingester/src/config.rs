use std::time::Duration;

use anyhow::{ensure, Result};
use serde::{Deserialize, Serialize};
use utils::{config::ConfigExt, evm_client::EvmEndpoint, error::EvmClientError};

use crate::ingest::RetryPolicy;

/// The fully parsed config struct we use in the application
/// this is built up from the ConfigBuilder which can load from multiple sources (in order of preference):
///
/// 1. cli args
/// 2. environment variables
/// 3. config file
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Config {
    /// The log-level to use, in the format of [tracing directives](https://docs.rs/tracing-subscriber/latest/tracing_subscriber/filter/struct.EnvFilter.html#directives).
    /// Default is `["info"]`
    pub log_level: Vec<String>,
    /// Default is `1`
    pub network_id: u64,
    /// Must be `ws://` or `wss://`
    /// Default is `ws://localhost:8546`
    pub rpc_endpoint: String,
    /// Default is `https://weiwatchers.com`
    pub feeds_registry_url: String,
    /// Default is `postgres://localhost:5432/feeds`
    pub database_url: String,
    /// Default is `5`
    pub database_max_connections: u32,
    /// Default is `false`
    pub dry_run: bool,
    /// Default is `60`
    pub discovery_interval_secs: u64,
    /// Default is `10`
    pub probe_timeout_secs: u64,
    /// Default is `500`
    pub retry_initial_ms: u64,
    /// Default is `10000`
    pub retry_max_ms: u64,
    /// Default is `64`
    pub announcement_buffer: usize,
    /// Default is `64`
    pub subscription_buffer: usize,
}

/// Default values for the config struct
/// these are only used to fill in holes after all the parsing and loading is done
impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: vec!["info".to_string()],
            network_id: 1,
            rpc_endpoint: "ws://localhost:8546".to_string(),
            feeds_registry_url: "https://weiwatchers.com".to_string(),
            database_url: "postgres://localhost:5432/feeds".to_string(),
            database_max_connections: 5,
            dry_run: false,
            discovery_interval_secs: 60,
            probe_timeout_secs: 10,
            retry_initial_ms: 500,
            retry_max_ms: 10_000,
            announcement_buffer: 64,
            subscription_buffer: 64,
        }
    }
}

impl ConfigExt for Config {
    const FILENAME: &'static str = "ingester.toml";
    const DIRNAME: &'static str = "ingester";

    fn log_levels(&self) -> impl Iterator<Item = &str> {
        self.log_level.iter().map(|s| s.as_str())
    }
}

impl Config {
    /// Rejects settings that would make a worker spin or panic
    pub fn validate(&self) -> Result<()> {
        ensure!(
            self.discovery_interval_secs > 0,
            "discovery_interval_secs must be greater than zero"
        );
        ensure!(
            self.probe_timeout_secs > 0,
            "probe_timeout_secs must be greater than zero"
        );
        ensure!(
            self.retry_initial_ms > 0,
            "retry_initial_ms must be greater than zero"
        );
        ensure!(
            self.retry_max_ms >= self.retry_initial_ms,
            "retry_max_ms must not be below retry_initial_ms"
        );
        ensure!(
            self.announcement_buffer > 0 && self.subscription_buffer > 0,
            "announcement_buffer and subscription_buffer must be greater than zero"
        );
        Ok(())
    }

    pub fn rpc_endpoint(&self) -> Result<EvmEndpoint, EvmClientError> {
        EvmEndpoint::new_ws(&self.rpc_endpoint)
    }

    pub fn discovery_interval(&self) -> Duration {
        Duration::from_secs(self.discovery_interval_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            Duration::from_millis(self.retry_initial_ms),
            Duration::from_millis(self.retry_max_ms),
        )
    }
}

#[cfg(test)]
mod test {
    use std::{fs, path::Path};

    use utils::config::ConfigBuilder;

    use super::*;
    use crate::args::CliArgs;

    fn build(home: &Path, args: CliArgs) -> Config {
        ConfigBuilder::<Config, CliArgs>::new(CliArgs {
            home: Some(home.to_path_buf()),
            dotenv: Some(home.join("does-not-exist")),
            ..args
        })
        .build()
        .unwrap()
    }

    fn clean_env<R>(f: impl FnOnce() -> R) -> R {
        temp_env::with_vars_unset(
            [
                "INGESTER_HOME",
                "INGESTER_DOTENV",
                "INGESTER_NETWORK_ID",
                "INGESTER_RPC_ENDPOINT",
                "INGESTER_LOG_LEVEL",
            ],
            f,
        )
    }

    #[test]
    fn defaults_without_file() {
        let dir = tempfile::tempdir().unwrap();

        let config = clean_env(|| build(dir.path(), CliArgs::default()));

        assert_eq!(config.network_id, 1);
        assert_eq!(config.database_max_connections, 5);
        assert_eq!(config.discovery_interval(), Duration::from_secs(60));
        assert_eq!(config.probe_timeout(), Duration::from_secs(10));
        assert_eq!(config.retry_policy(), RetryPolicy::default());
        assert!(!config.dry_run);
    }

    #[test]
    fn file_then_env_then_cli() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("ingester.toml"),
            r#"
            [default]
            log_level = ["debug"]

            [ingester]
            network_id = 3
            rpc_endpoint = "wss://ropsten.example.org/ws"
            discovery_interval_secs = 15
            "#,
        )
        .unwrap();

        let config = clean_env(|| {
            temp_env::with_var("INGESTER_NETWORK_ID", Some("42"), || {
                build(
                    dir.path(),
                    CliArgs {
                        discovery_interval_secs: Some(5),
                        ..Default::default()
                    },
                )
            })
        });

        assert_eq!(config.log_level, vec!["debug"]);
        assert_eq!(config.network_id, 42);
        assert_eq!(config.rpc_endpoint, "wss://ropsten.example.org/ws");
        assert_eq!(config.discovery_interval_secs, 5);
        assert!(config.rpc_endpoint().is_ok());
    }

    #[test]
    fn defaults_are_valid() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn zero_retry_delay_is_rejected() {
        let config = Config {
            retry_initial_ms: 0,
            ..Default::default()
        };

        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("retry_initial_ms"));
    }

    #[test]
    fn zero_discovery_interval_is_rejected() {
        let config = Config {
            discovery_interval_secs: 0,
            ..Default::default()
        };

        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("discovery_interval_secs"));
    }

    #[test]
    fn retry_max_below_initial_is_rejected() {
        let config = Config {
            retry_initial_ms: 2_000,
            retry_max_ms: 1_000,
            ..Default::default()
        };

        assert!(config.validate().is_err());
    }

    #[test]
    fn http_rpc_endpoint_is_rejected() {
        let config = Config {
            rpc_endpoint: "http://localhost:8545".to_string(),
            ..Default::default()
        };

        assert!(matches!(
            config.rpc_endpoint(),
            Err(EvmClientError::SubscriptionsNeedWebSocket(_))
        ));
    }

    #[test]
    fn log_level_directives() {
        let config = Config {
            log_level: vec!["info".to_string(), "ingester=debug".to_string()],
            ..Default::default()
        };
        assert!(config.tracing_env_filter().is_ok());

        let config = Config {
            log_level: vec!["ingester=notalevel".to_string()],
            ..Default::default()
        };
        assert!(config.tracing_env_filter().is_err());
    }
}
