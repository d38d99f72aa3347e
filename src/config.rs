use std::sync::Once;

use serde::Deserialize;
use tracing_subscriber::EnvFilter;

use crate::error::Result;
use crate::executor::{Consistency, RequestOptions};

/// Defaults applied to every request the mapper submits.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct MapperConfig {
    pub consistency: Option<Consistency>,
    pub serial_consistency: Option<Consistency>,
    pub fetch_size: Option<u32>,
    pub tracing: bool,
    pub log_filter: String,
}

impl Default for MapperConfig {
    fn default() -> Self {
        Self {
            consistency: None,
            serial_consistency: None,
            fetch_size: None,
            tracing: false,
            log_filter: "cqlmap=info,warn".to_owned(),
        }
    }
}

impl MapperConfig {
    /// Reads `path` if it exists, then `CQLMAP_*` environment variables on top.
    pub fn load(path: &str) -> Result<Self> {
        let settings = ::config::Config::builder()
            .add_source(::config::File::with_name(path).required(false))
            .add_source(::config::Environment::with_prefix("CQLMAP"))
            .build()?;
        Ok(settings.try_deserialize()?)
    }

    pub fn request_defaults(&self) -> RequestOptions {
        RequestOptions {
            consistency: self.consistency,
            serial_consistency: self.serial_consistency,
            fetch_size: self.fetch_size,
            tracing: self.tracing,
            idempotent: None,
        }
    }
}

static TRACING: Once = Once::new();

/// Installs a `fmt` subscriber filtered by `RUST_LOG`, or by `filter` when
/// that is unset. Later calls do nothing.
pub fn init_tracing(filter: &str) {
    TRACING.call_once(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));
        // another subscriber may already be installed by the application
        let _ = tracing_subscriber::fmt()
            .with_target(false)
            .with_env_filter(filter)
            .try_init();
    });
}
