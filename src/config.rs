//! Configuration for salient.
//!
//! Configuration sources (highest priority first):
//! 1. Environment variables (secrets are env-only)
//! 2. Config file (.salient/config.yaml, discovered upward from CWD)
//! 3. Defaults (~/.salient)
//!
//! The operator company and account-team roster live here and are
//! injected into the context builder; they are configuration, not code.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::ingest::TeamDirectory;

/// Global cached configuration (stores Result to handle init errors)
static CONFIG: OnceLock<Result<Config, String>> = OnceLock::new();

/// Raw config file schema (matches YAML structure)
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub team: Option<TeamConfig>,
    #[serde(default)]
    pub worker: Option<WorkerConfig>,
    #[serde(default)]
    pub services: Option<ServicesConfig>,
    #[serde(default)]
    pub crm: Option<CrmConfig>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PathsConfig {
    /// Database file (relative to the config file's parent)
    pub database: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TeamConfig {
    pub company: String,
    #[serde(default)]
    pub roster: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct WorkerConfig {
    pub poll_interval_secs: Option<u64>,
    pub max_attempts: Option<u32>,
    pub lease_timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ServicesConfig {
    pub completion_base_url: Option<String>,
    pub completion_model: Option<String>,
    pub recorder_base_url: Option<String>,
    pub crm_base_url: Option<String>,
    pub enrichment_base_url: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CrmConfig {
    pub pipeline_id: Option<String>,
    pub stage_id: Option<String>,
}

/// Worker tuning
#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub poll_interval_secs: u64,
    pub max_attempts: u32,
    pub lease_timeout_secs: u64,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            poll_interval_secs: 5,
            max_attempts: 3,
            lease_timeout_secs: 900,
        }
    }
}

/// Resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// SQLite database file
    pub db_path: PathBuf,

    /// HTTP server bind address
    pub bind_addr: String,

    // Secrets (env-only)
    pub webhook_secret: Option<String>,
    pub pipeline_api_key: Option<String>,
    pub completion_api_key: Option<String>,
    pub recorder_api_key: Option<String>,
    pub crm_api_key: Option<String>,
    pub enrichment_api_key: Option<String>,

    // Collaborator endpoints
    pub completion_base_url: String,
    pub completion_model: String,
    pub recorder_base_url: String,
    pub crm_base_url: String,
    pub enrichment_base_url: String,

    // Default CRM scope for phrase extraction
    pub crm_pipeline_id: Option<String>,
    pub crm_stage_id: Option<String>,

    pub team: TeamDirectory,
    pub worker: WorkerSettings,

    /// Path to config file (if found)
    pub config_file: Option<PathBuf>,
}

/// Find config file by searching current directory and parents
fn find_config_file() -> Option<PathBuf> {
    if let Ok(explicit) = std::env::var("SALIENT_CONFIG") {
        return Some(PathBuf::from(explicit));
    }

    let mut current = std::env::current_dir().ok()?;
    loop {
        let config_path = current.join(".salient").join("config.yaml");
        if config_path.exists() {
            return Some(config_path);
        }
        if !current.pop() {
            break;
        }
    }
    None
}

/// Load and parse config file
fn load_config_file(path: &Path) -> Result<ConfigFile> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

/// Load configuration from all sources
fn load_config() -> Result<Config> {
    let default_home = dirs::home_dir()
        .context("Failed to determine home directory")?
        .join(".salient");

    let config_path = find_config_file();
    let file = match &config_path {
        Some(path) => load_config_file(path)?,
        None => ConfigFile::default(),
    };

    let db_path = if let Some(env_db) = env_opt("SALIENT_DB") {
        PathBuf::from(env_db)
    } else if let Some(rel) = &file.paths.database {
        let base = config_path
            .as_deref()
            .and_then(Path::parent)
            .unwrap_or(Path::new("."));
        base.join(rel)
    } else {
        default_home.join("salient.db")
    };

    let team = file
        .team
        .as_ref()
        .map(|t| TeamDirectory::new(t.company.clone(), t.roster.clone()))
        .unwrap_or_else(|| {
            let company = env_opt("SALIENT_COMPANY").unwrap_or_else(|| "Console".to_string());
            let roster = env_opt("SALIENT_ROSTER")
                .map(|r| r.split(',').map(|s| s.trim().to_string()).collect())
                .unwrap_or_default();
            TeamDirectory::new(company, roster)
        });

    let worker_file = file.worker.unwrap_or_default();
    let defaults = WorkerSettings::default();
    let worker = WorkerSettings {
        poll_interval_secs: worker_file
            .poll_interval_secs
            .unwrap_or(defaults.poll_interval_secs),
        max_attempts: worker_file.max_attempts.unwrap_or(defaults.max_attempts),
        lease_timeout_secs: worker_file
            .lease_timeout_secs
            .unwrap_or(defaults.lease_timeout_secs),
    };

    let services = file.services.unwrap_or_default();
    let crm = file.crm.unwrap_or_default();

    Ok(Config {
        db_path,
        bind_addr: env_opt("SALIENT_BIND").unwrap_or_else(|| "127.0.0.1:8080".to_string()),
        webhook_secret: env_opt("WEBHOOK_SECRET"),
        pipeline_api_key: env_opt("PIPELINE_API_KEY"),
        completion_api_key: env_opt("COMPLETION_API_KEY"),
        recorder_api_key: env_opt("RECORDER_API_KEY"),
        crm_api_key: env_opt("CRM_API_KEY"),
        enrichment_api_key: env_opt("ENRICHMENT_API_KEY"),
        completion_base_url: services
            .completion_base_url
            .or_else(|| env_opt("COMPLETION_BASE_URL"))
            .unwrap_or_else(|| "https://api.openai.com/v1".to_string()),
        completion_model: services
            .completion_model
            .unwrap_or_else(|| "gpt-4o".to_string()),
        recorder_base_url: services
            .recorder_base_url
            .or_else(|| env_opt("RECORDER_BASE_URL"))
            .unwrap_or_else(|| "https://api.fathom.ai/external/v1".to_string()),
        crm_base_url: services
            .crm_base_url
            .or_else(|| env_opt("CRM_BASE_URL"))
            .unwrap_or_else(|| "https://api.hubapi.com".to_string()),
        enrichment_base_url: services
            .enrichment_base_url
            .or_else(|| env_opt("ENRICHMENT_BASE_URL"))
            .unwrap_or_else(|| "https://api.apollo.io".to_string()),
        crm_pipeline_id: crm.pipeline_id.or_else(|| env_opt("CRM_PIPELINE_ID")),
        crm_stage_id: crm.stage_id.or_else(|| env_opt("CRM_STAGE_ID")),
        team,
        worker,
        config_file: config_path,
    })
}

/// Get the global configuration (loads once, then cached)
pub fn config() -> Result<&'static Config> {
    let result = CONFIG.get_or_init(|| load_config().map_err(|e| e.to_string()));
    match result {
        Ok(config) => Ok(config),
        Err(e) => anyhow::bail!("{}", e),
    }
}

/// Force reload configuration (useful for testing)
pub fn reload_config() -> Result<Config> {
    load_config()
}
