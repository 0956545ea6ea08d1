use clap::Parser;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use utils::{config::CliEnvExt, serde::deserialize_vec_string};

/// This struct is used for both args and environment variables
/// every env var can be overriden by a cli arg, and both override the config file
/// env vars follow the pattern of INGESTER_{UPPERCASE_ARG_NAME}
#[derive(Debug, Parser, Serialize, Deserialize, Default)]
#[command(version, about, long_about = None)]
#[serde(default)]
pub struct CliArgs {
    /// The home directory of the application, where the ingester.toml configuration file is stored
    /// if not provided here or in an env var, a series of default directories will be tried
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub home: Option<PathBuf>,

    /// The path to an optional dotenv file to try and load
    /// if not set, will be the current working directory's .env
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dotenv: Option<PathBuf>,

    /// Log level in the format of comma-separated tracing directives.
    #[arg(long, value_delimiter = ',')]
    #[serde(skip_serializing_if = "Vec::is_empty")]
    #[serde(deserialize_with = "deserialize_vec_string")]
    pub log_level: Vec<String>,

    /// Only feeds published for this network id are ingested
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub network_id: Option<u64>,

    /// Websocket RPC endpoint of the chain node
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rpc_endpoint: Option<String>,

    /// Base url serving feeds.json and nodes.json
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub feeds_registry_url: Option<String>,

    /// PostgreSQL connection string
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database_url: Option<String>,

    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database_max_connections: Option<u32>,

    /// Keep rows in memory instead of writing to the database
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dry_run: Option<bool>,

    /// Seconds between two registry polls
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub discovery_interval_secs: Option<u64>,

    /// Seconds a feed contract gets to answer latestRound() during discovery
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub probe_timeout_secs: Option<u64>,

    /// First resubscribe delay, in milliseconds
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_initial_ms: Option<u64>,

    /// Upper bound of the resubscribe delay, in milliseconds
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_max_ms: Option<u64>,

    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub announcement_buffer: Option<usize>,

    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subscription_buffer: Option<usize>,
}

impl CliEnvExt for CliArgs {
    const ENV_VAR_PREFIX: &'static str = "INGESTER";
    const TOML_IDENTIFIER: &'static str = "ingester";

    fn home_dir(&self) -> Option<PathBuf> {
        self.home.clone()
    }

    fn dotenv_path(&self) -> Option<PathBuf> {
        self.dotenv.clone()
    }
}
