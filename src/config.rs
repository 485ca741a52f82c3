//! Runtime configuration.
//!
//! Everything is read from the environment (after `.env` is loaded in `main`).
//! Unit tables come from `UNIT_TABLES_PATH` when set, otherwise the built-in
//! tables are used.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::info;

use crate::batch::DEFAULT_ROW_TIMEOUT;
use crate::ocr::sidecar::SidecarProvider;
use crate::ocr::vision::VisionLlmProvider;
use crate::ocr::{OcrProvider, OcrProviderKind};
use crate::openrouter::OpenRouterClient;
use crate::units::UnitTables;

pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:3000";
pub const DEFAULT_SIDECAR_URL: &str = "http://localhost:3001";
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(60);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr: String,
    pub ocr_provider: OcrProviderKind,
    pub sidecar_url: String,
    pub openrouter_api_key: Option<String>,
    pub openrouter_model: Option<String>,
    pub unit_tables_path: Option<PathBuf>,
    /// Rows processed in parallel by the batch runner.
    pub batch_concurrency: usize,
    /// Output is flushed after this many rows.
    pub checkpoint_every: usize,
    /// Per-request limit for image downloads and OCR calls.
    pub http_timeout: Duration,
    /// Per-row limit in the batch runner.
    pub row_timeout: Duration,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bind_addr: DEFAULT_BIND_ADDR.to_string(),
            ocr_provider: OcrProviderKind::Sidecar,
            sidecar_url: DEFAULT_SIDECAR_URL.to_string(),
            openrouter_api_key: None,
            openrouter_model: None,
            unit_tables_path: None,
            batch_concurrency: 4,
            checkpoint_every: 10,
            http_timeout: DEFAULT_HTTP_TIMEOUT,
            row_timeout: DEFAULT_ROW_TIMEOUT,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable source. Blank values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let defaults = Self::default();

        let ocr_provider = match var("OCR_PROVIDER") {
            Some(name) => OcrProviderKind::parse(&name).with_context(|| {
                format!("Unknown OCR_PROVIDER '{}'. Available: sidecar, openrouter", name)
            })?,
            None => defaults.ocr_provider,
        };

        Ok(Self {
            bind_addr: var("BIND_ADDR").unwrap_or(defaults.bind_addr),
            ocr_provider,
            sidecar_url: var("OCR_SIDECAR_URL").unwrap_or(defaults.sidecar_url),
            openrouter_api_key: var("OPENROUTER_API_KEY"),
            openrouter_model: var("OPENROUTER_MODEL"),
            unit_tables_path: var("UNIT_TABLES_PATH").map(PathBuf::from),
            batch_concurrency: parse_positive(var("BATCH_CONCURRENCY"), "BATCH_CONCURRENCY")?
                .unwrap_or(defaults.batch_concurrency),
            checkpoint_every: parse_positive(var("CHECKPOINT_EVERY"), "CHECKPOINT_EVERY")?
                .unwrap_or(defaults.checkpoint_every),
            http_timeout: parse_positive(var("HTTP_TIMEOUT_SECS"), "HTTP_TIMEOUT_SECS")?
                .map(|secs| Duration::from_secs(secs as u64))
                .unwrap_or(defaults.http_timeout),
            row_timeout: parse_positive(var("ROW_TIMEOUT_SECS"), "ROW_TIMEOUT_SECS")?
                .map(|secs| Duration::from_secs(secs as u64))
                .unwrap_or(defaults.row_timeout),
        })
    }

    /// Shared HTTP client; every request is bounded by `http_timeout`.
    pub fn http_client(&self) -> Result<reqwest::Client> {
        reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT.min(self.http_timeout))
            .timeout(self.http_timeout)
            .build()
            .context("Failed to build HTTP client")
    }

    /// Unit tables from the configured file, or the built-in ones.
    pub fn load_tables(&self) -> Result<UnitTables> {
        match &self.unit_tables_path {
            Some(path) => UnitTables::load_from_file(path),
            None => {
                let tables = UnitTables::builtin();
                info!("Using built-in unit tables ({} entities)", tables.entities().len());
                Ok(tables)
            }
        }
    }

    /// Instantiate the configured OCR provider.
    pub fn build_ocr_provider(&self, http: reqwest::Client) -> Result<Arc<dyn OcrProvider>> {
        let provider: Arc<dyn OcrProvider> = match self.ocr_provider {
            OcrProviderKind::Sidecar => Arc::new(SidecarProvider::new(http, &self.sidecar_url)),
            OcrProviderKind::VisionLlm => {
                let api_key = self
                    .openrouter_api_key
                    .clone()
                    .context("OPENROUTER_API_KEY must be set for OCR_PROVIDER=openrouter")?;
                let mut client = OpenRouterClient::new(http.clone(), api_key);
                if let Some(model) = &self.openrouter_model {
                    client = client.with_model(model);
                }
                Arc::new(VisionLlmProvider::new(client, http))
            }
        };
        info!("OCR provider: {}", provider.name());
        Ok(provider)
    }
}

fn parse_positive(value: Option<String>, key: &str) -> Result<Option<usize>> {
    let Some(raw) = value else {
        return Ok(None);
    };
    let parsed: usize = raw
        .trim()
        .parse()
        .with_context(|| format!("{} must be a positive integer, got '{}'", key, raw))?;
    if parsed == 0 {
        anyhow::bail!("{} must be greater than 0", key);
    }
    Ok(Some(parsed))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(vars: &[(&str, &str)]) -> Result<AppConfig> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config_from(&[]).unwrap();
        assert_eq!(config.bind_addr, DEFAULT_BIND_ADDR);
        assert_eq!(config.ocr_provider, OcrProviderKind::Sidecar);
        assert_eq!(config.batch_concurrency, 4);
        assert_eq!(config.checkpoint_every, 10);
        assert_eq!(config.http_timeout, DEFAULT_HTTP_TIMEOUT);
        assert_eq!(config.row_timeout, DEFAULT_ROW_TIMEOUT);
        assert!(config.unit_tables_path.is_none());
    }

    #[test]
    fn test_overrides() {
        let config = config_from(&[
            ("BIND_ADDR", "127.0.0.1:8080"),
            ("OCR_PROVIDER", "openrouter"),
            ("BATCH_CONCURRENCY", "16"),
            ("CHECKPOINT_EVERY", " 50 "),
            ("UNIT_TABLES_PATH", "configs/units.json"),
            ("OPENROUTER_MODEL", ""),
            ("HTTP_TIMEOUT_SECS", "5"),
            ("ROW_TIMEOUT_SECS", "20"),
        ])
        .unwrap();
        assert_eq!(config.bind_addr, "127.0.0.1:8080");
        assert_eq!(config.ocr_provider, OcrProviderKind::VisionLlm);
        assert_eq!(config.batch_concurrency, 16);
        assert_eq!(config.checkpoint_every, 50);
        assert_eq!(
            config.unit_tables_path,
            Some(PathBuf::from("configs/units.json"))
        );
        assert!(config.openrouter_model.is_none());
        assert_eq!(config.http_timeout, Duration::from_secs(5));
        assert_eq!(config.row_timeout, Duration::from_secs(20));
        config.http_client().unwrap();
    }

    #[test]
    fn test_invalid_values() {
        assert!(config_from(&[("OCR_PROVIDER", "tesseract")]).is_err());
        assert!(config_from(&[("BATCH_CONCURRENCY", "0")]).is_err());
        assert!(config_from(&[("CHECKPOINT_EVERY", "ten")]).is_err());
        assert!(config_from(&[("HTTP_TIMEOUT_SECS", "0")]).is_err());
    }

    #[test]
    fn test_vision_provider_requires_api_key() {
        let config = config_from(&[("OCR_PROVIDER", "openrouter")]).unwrap();
        assert!(config.build_ocr_provider(reqwest::Client::new()).is_err());
    }

    #[test]
    fn test_load_builtin_tables() {
        let tables = AppConfig::default().load_tables().unwrap();
        assert!(tables.entity_units("item_volume").is_some());
    }
}
