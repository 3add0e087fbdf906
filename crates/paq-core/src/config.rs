use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;

/// How fetch requests are partitioned into queues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueMode {
    /// One queue per access-method/host pair; downloads from multiple hosts
    /// of the same method proceed in parallel.
    #[default]
    Host,
    /// One queue per access method; all hosts are serialized.
    Access,
}

/// Global configuration loaded from `~/.config/paq/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcquireConfig {
    /// Directory holding the method helper binaries (one per access method).
    pub methods_dir: PathBuf,
    /// Queue partitioning strategy; methods flagged SingleInstance always
    /// collapse to a single queue regardless of this setting.
    #[serde(default)]
    pub queue_mode: QueueMode,
    /// Maximum retries per item after a transient failure (0 = never retry).
    pub max_retries: u32,
    /// Upper bound on the pipeline depth granted to pipelining methods.
    pub max_pipeline_depth: usize,
    /// A worker with requests in flight and no message for this long is
    /// treated as dead.
    pub stall_timeout_secs: u64,
    /// How long to wait for the Capabilities handshake at worker startup.
    pub startup_timeout_secs: u64,
    /// Free-form option tree pushed to methods that request SendConfig
    /// (proxies, timeouts, credentials). Keys use `::` as separator, e.g.
    /// `acquire::http::proxy` or `auth::example.org::user`.
    #[serde(default)]
    pub options: BTreeMap<String, String>,
}

impl Default for AcquireConfig {
    fn default() -> Self {
        Self {
            methods_dir: PathBuf::from("/usr/lib/paq/methods"),
            queue_mode: QueueMode::Host,
            max_retries: 3,
            max_pipeline_depth: 10,
            stall_timeout_secs: 120,
            startup_timeout_secs: 10,
            options: BTreeMap::new(),
        }
    }
}

impl AcquireConfig {
    /// Look up an option by its full key.
    pub fn option(&self, key: &str) -> Option<&str> {
        self.options.get(key).map(String::as_str)
    }

    /// Credentials for a site, from `auth::<site>::user` / `auth::<site>::password`.
    pub fn credentials_for(&self, site: &str) -> (Option<&str>, Option<&str>) {
        let user = self.option(&format!("auth::{site}::user"));
        let password = self.option(&format!("auth::{site}::password"));
        (user, password)
    }
}

pub fn config_path() -> Result<PathBuf> {
    let xdg_dirs = xdg::BaseDirectories::with_prefix("paq")?;
    Ok(xdg_dirs.place_config_file("config.toml")?)
}

/// Load configuration from disk, creating a default file if none exists.
pub fn load_or_init() -> Result<AcquireConfig> {
    let path = config_path()?;
    if !path.exists() {
        let default_cfg = AcquireConfig::default();
        let toml = toml::to_string_pretty(&default_cfg)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, toml)?;
        tracing::info!("created default config at {}", path.display());
        return Ok(default_cfg);
    }

    let data = fs::read_to_string(&path)?;
    let cfg: AcquireConfig = toml::from_str(&data)?;
    Ok(cfg)
}
