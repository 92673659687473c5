use pushreg_registry::backfill::DEFAULT_CHUNK_SIZE;
use pushreg_registry::dedupe::DEFAULT_PAGE_SIZE;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Environment variable that overrides the configured dedupe page size.
pub const PAGE_SIZE_ENV: &str = "DEDUP_PAGE_SIZE";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdminConfig {
    pub snapshot: PathBuf,
    pub dedupe_page_size: usize,
    pub backfill_chunk_size: usize,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            snapshot: PathBuf::from("devices.json"),
            dedupe_page_size: DEFAULT_PAGE_SIZE,
            backfill_chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

impl AdminConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default();

        let config: AdminConfig = match ext.to_lowercase().as_str() {
            "toml" => toml::from_str(&contents)?,
            "json" => serde_json::from_str(&contents)?,
            _ => anyhow::bail!("Unsupported config file extension: {}", ext),
        };
        config.validate()?;
        Ok(config)
    }

    /// Load `path` if given and present, otherwise fall back to defaults.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        match path {
            Some(path) if path.exists() => Self::from_file(path),
            Some(path) => {
                tracing::warn!("Config file not found, using defaults: {}", path.display());
                Ok(Self::default())
            }
            None => Ok(Self::default()),
        }
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.dedupe_page_size == 0 {
            anyhow::bail!("dedupe_page_size must be positive");
        }
        if self.backfill_chunk_size == 0 {
            anyhow::bail!("backfill_chunk_size must be positive");
        }
        Ok(())
    }

    /// Page size for a dedupe run: CLI flag, then `DEDUP_PAGE_SIZE`, then config.
    pub fn dedupe_page_size(&self, explicit: Option<usize>) -> usize {
        let env = std::env::var(PAGE_SIZE_ENV).ok();
        self.resolve_page_size(explicit, env.as_deref())
    }

    fn resolve_page_size(&self, explicit: Option<usize>, env: Option<&str>) -> usize {
        if let Some(size) = explicit.filter(|s| *s > 0) {
            return size;
        }
        match env.map(str::trim).map(str::parse::<usize>) {
            Some(Ok(size)) if size > 0 => size,
            Some(_) => {
                tracing::warn!("Ignoring invalid {} value", PAGE_SIZE_ENV);
                self.dedupe_page_size
            }
            None => self.dedupe_page_size,
        }
    }

    pub fn backfill_chunk_size(&self, explicit: Option<usize>) -> usize {
        explicit
            .filter(|s| *s > 0)
            .unwrap_or(self.backfill_chunk_size)
    }
}
