use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use serde::Deserialize;

use crate::admission::{BreakerConfig, ShedderConfig};
use crate::logging::LogArgs;
use crate::redact::RedactOptions;

/// An HTTP server hosting per-repository code-knowledge indexes built from
/// SCIP indexer output.
#[derive(Debug, Parser)]
#[command(about, version)]
pub struct Cli {
    #[command(flatten)]
    pub log: LogArgs,

    /// Address to listen on.
    #[arg(long, default_value = "0.0.0.0", env = "CKB_HOST")]
    pub host: String,
    /// Port to listen on.
    #[arg(long, default_value_t = 8347, env = "CKB_PORT")]
    pub port: u16,
    /// Root of the server's data directory.
    #[arg(long, default_value = "./data", env = "CKB_DATA_DIR")]
    pub data_dir: PathBuf,
    /// YAML file declaring read-only `source = config` repos.
    #[arg(long, env = "CKB_REPOS_CONFIG")]
    pub repos_config: Option<PathBuf>,
    /// HMAC secret for pagination cursors. Generated at startup when unset,
    /// which invalidates outstanding cursors across restarts.
    #[arg(long, env = "CKB_CURSOR_SECRET")]
    pub cursor_secret: Option<String>,

    /// Upper bound on upload bodies, before and after decompression.
    #[arg(long, default_value_t = 500 * 1024 * 1024, env = "CKB_MAX_UPLOAD_SIZE")]
    pub max_upload_size: u64,
    /// Hard clamp on the `limit` query parameter.
    #[arg(long, default_value_t = 500, env = "CKB_MAX_PAGE_SIZE")]
    pub max_page_size: usize,
    /// Page size used when the client does not pass `limit`.
    #[arg(long, default_value_t = 100)]
    pub default_page_size: usize,
    /// Refuse auto-creation of repos on first upload.
    #[arg(long, action(clap::ArgAction::SetTrue))]
    pub no_create_repo: bool,
    /// Reject gzip- and zstd-encoded uploads.
    #[arg(long, action(clap::ArgAction::SetTrue))]
    pub disable_compression: bool,
    /// Keep the process up but serve 503 from every /index route.
    #[arg(long, action(clap::ArgAction::SetTrue))]
    pub disable_index: bool,
    /// Suggest a full upload when a delta touches more than this percentage
    /// of indexed files.
    #[arg(long, default_value_t = 40)]
    pub delta_threshold_percent: u32,
    /// Age at which abandoned upload scratch files are swept.
    #[arg(long, value_parser = humantime::parse_duration, default_value = "24h")]
    pub upload_max_age: Duration,
    /// How often the scratch-file janitor runs.
    #[arg(long, value_parser = humantime::parse_duration, default_value = "1h")]
    pub upload_sweep_interval: Duration,

    /// Redact file paths from query responses.
    #[arg(long, action(clap::ArgAction::SetTrue), env = "CKB_HIDE_PATHS")]
    pub hide_paths: bool,
    /// Redact symbol documentation from query responses.
    #[arg(long, action(clap::ArgAction::SetTrue), env = "CKB_HIDE_DOCS")]
    pub hide_docs: bool,
    /// Redact symbol signatures from query responses.
    #[arg(long, action(clap::ArgAction::SetTrue), env = "CKB_HIDE_SIGNATURES")]
    pub hide_signatures: bool,
    /// Strip this prefix from paths in query responses.
    #[arg(long, env = "CKB_PATH_PREFIX_STRIP")]
    pub path_prefix_strip: Option<String>,

    /// Maximum requests handled concurrently before queueing begins.
    #[arg(long, default_value_t = 64, env = "CKB_MAX_CONCURRENT")]
    pub max_concurrent: usize,
    /// Requests allowed to wait for a slot before shedding.
    #[arg(long, default_value_t = 128, env = "CKB_QUEUE_SIZE")]
    pub queue_size: usize,
    /// How long a queued request waits before it is shed.
    #[arg(long, value_parser = humantime::parse_duration, default_value = "2s")]
    pub queue_timeout: Duration,
    /// Retry-After value attached to shed responses.
    #[arg(long, default_value_t = 5)]
    pub retry_after_seconds: u64,
    /// Target request latency; setting it enables adaptive shedding.
    #[arg(long, value_parser = humantime::parse_duration)]
    pub target_latency: Option<Duration>,
    /// Path prefixes admitted unconditionally.
    #[arg(long, value_delimiter = ',', default_values_t = [
        "/health".to_string(),
        "/metrics".to_string(),
    ])]
    pub priority_endpoints: Vec<String>,
    /// Disable admission control entirely.
    #[arg(long, action(clap::ArgAction::SetTrue))]
    pub no_shedding: bool,

    /// Consecutive ingest failures that open the circuit breaker.
    #[arg(long, default_value_t = 5)]
    pub breaker_failure_threshold: u32,
    /// Consecutive half-open successes that close it again.
    #[arg(long, default_value_t = 2)]
    pub breaker_success_threshold: u32,
    /// How long an open breaker rejects before probing.
    #[arg(long, value_parser = humantime::parse_duration, default_value = "30s")]
    pub breaker_timeout: Duration,
}

impl Cli {
    pub fn listen_addr(&self) -> anyhow::Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .context("failed to parse listen address")
    }

    pub fn to_config(&self) -> Config {
        Config {
            data_dir: self.data_dir.clone(),
            max_upload_size: self.max_upload_size,
            max_page_size: self.max_page_size,
            default_page_size: self.default_page_size,
            allow_create_repo: !self.no_create_repo,
            compression_enabled: !self.disable_compression,
            index_enabled: !self.disable_index,
            delta_threshold_percent: self.delta_threshold_percent,
            upload_max_age: self.upload_max_age,
            upload_sweep_interval: self.upload_sweep_interval,
            redact: RedactOptions {
                expose_paths: !self.hide_paths,
                expose_docs: !self.hide_docs,
                expose_signatures: !self.hide_signatures,
                path_prefix_strip: self.path_prefix_strip.clone(),
            },
            shedder: ShedderConfig {
                enabled: !self.no_shedding,
                max_concurrent: self.max_concurrent,
                queue_size: self.queue_size,
                queue_timeout: self.queue_timeout,
                retry_after_seconds: self.retry_after_seconds,
                target_latency: self.target_latency,
                priority_endpoints: self.priority_endpoints.clone(),
            },
            breaker: BreakerConfig {
                failure_threshold: self.breaker_failure_threshold,
                success_threshold: self.breaker_success_threshold,
                timeout: self.breaker_timeout,
            },
        }
    }
}

/// Runtime configuration distilled from [`Cli`].
#[derive(Clone, Debug)]
pub struct Config {
    pub data_dir: PathBuf,
    pub max_upload_size: u64,
    pub max_page_size: usize,
    pub default_page_size: usize,
    pub allow_create_repo: bool,
    pub compression_enabled: bool,
    pub index_enabled: bool,
    pub delta_threshold_percent: u32,
    pub upload_max_age: Duration,
    pub upload_sweep_interval: Duration,
    pub redact: RedactOptions,
    pub shedder: ShedderConfig,
    pub breaker: BreakerConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            max_upload_size: 500 * 1024 * 1024,
            max_page_size: 500,
            default_page_size: 100,
            allow_create_repo: true,
            compression_enabled: true,
            index_enabled: true,
            delta_threshold_percent: 40,
            upload_max_age: Duration::from_secs(24 * 3600),
            upload_sweep_interval: Duration::from_secs(3600),
            redact: RedactOptions::default(),
            shedder: ShedderConfig::default(),
            breaker: BreakerConfig::default(),
        }
    }
}

/// One `source = config` repo registration.
#[derive(Clone, Debug, Deserialize)]
pub struct ConfigRepo {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Checkout root; the repo's store lives at `<path>/.ckb/ckb.db`.
    pub path: PathBuf,
}

#[derive(Debug, Deserialize)]
struct ReposConfigFile {
    #[serde(default)]
    repos: Vec<ConfigRepo>,
}

pub fn load_repos_config(path: &Path) -> anyhow::Result<Vec<ConfigRepo>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read repos config {}", path.display()))?;
    let parsed: ReposConfigFile = serde_yaml::from_str(&raw)
        .with_context(|| format!("failed to parse repos config {}", path.display()))?;
    for repo in &parsed.repos {
        index_store::validate_repo_id(&repo.id)
            .with_context(|| format!("invalid repo id in {}", path.display()))?;
    }
    Ok(parsed.repos)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_repos_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("repos.yaml");
        std::fs::write(
            &path,
            r#"
repos:
  - id: acme/core
    name: Core
    description: primary service
    path: /srv/checkouts/acme-core
  - id: acme/tools
    path: /srv/checkouts/acme-tools
"#,
        )
        .unwrap();

        let repos = load_repos_config(&path).unwrap();
        assert_eq!(repos.len(), 2);
        assert_eq!(repos[0].id, "acme/core");
        assert_eq!(repos[0].name, "Core");
        assert_eq!(repos[1].name, "");
        assert_eq!(
            repos[1].path,
            PathBuf::from("/srv/checkouts/acme-tools"),
        );
    }

    #[test]
    fn rejects_invalid_config_repo_ids() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("repos.yaml");
        std::fs::write(&path, "repos:\n  - id: /bad/\n    path: /srv/x\n").unwrap();
        assert!(load_repos_config(&path).is_err());
    }

    #[test]
    fn cli_defaults_distill_into_config() {
        let cli = Cli::parse_from(["ckbd"]);
        let config = cli.to_config();

        assert!(config.allow_create_repo);
        assert!(config.compression_enabled);
        assert!(config.index_enabled);
        assert_eq!(config.max_upload_size, 500 * 1024 * 1024);
        assert_eq!(config.shedder.priority_endpoints, vec!["/health", "/metrics"]);

        let cli = Cli::parse_from(["ckbd", "--no-create-repo", "--hide-paths"]);
        let config = cli.to_config();
        assert!(!config.allow_create_repo);
        assert!(!config.redact.expose_paths);
    }
}
