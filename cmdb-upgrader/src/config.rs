//! Upgrader Configuration
//!
//! Supports loading from environment variables with the `CMDB_UPGRADER_`
//! prefix.

use serde::{Deserialize, Serialize};
use std::env;

use crate::error::{UpgradeError, UpgradeResult};
use crate::telemetry::{LogConfig, LogFormat, LogLevel};

/// Upgrader configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpgraderConfig {
    /// Tenant used for rows and objects that carry no tenant field
    #[serde(default = "default_owner_id")]
    pub owner_id: String,
    /// Copy workers running at once
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,
    /// Records read per source page
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    /// Logging
    #[serde(default)]
    pub log: LogConfig,
}

fn default_owner_id() -> String {
    "0".to_string()
}

fn default_worker_count() -> usize {
    200
}

fn default_page_size() -> usize {
    5000
}

impl Default for UpgraderConfig {
    fn default() -> Self {
        Self {
            owner_id: default_owner_id(),
            worker_count: default_worker_count(),
            page_size: default_page_size(),
            log: LogConfig::default(),
        }
    }
}

impl UpgraderConfig {
    /// Load configuration from environment variables
    ///
    /// Environment variables:
    /// - CMDB_UPGRADER_OWNER_ID: fallback tenant
    /// - CMDB_UPGRADER_WORKERS: copy worker count
    /// - CMDB_UPGRADER_PAGE_SIZE: source page size
    /// - CMDB_UPGRADER_LOG_LEVEL: trace/debug/info/warn/error
    /// - CMDB_UPGRADER_LOG_FORMAT: pretty/json/compact
    ///
    /// Unset or unparseable variables keep their defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(owner) = env::var("CMDB_UPGRADER_OWNER_ID") {
            config.owner_id = owner;
        }
        if let Some(workers) = env::var("CMDB_UPGRADER_WORKERS")
            .ok()
            .and_then(|s| s.parse().ok())
        {
            config.worker_count = workers;
        }
        if let Some(size) = env::var("CMDB_UPGRADER_PAGE_SIZE")
            .ok()
            .and_then(|s| s.parse().ok())
        {
            config.page_size = size;
        }
        if let Some(level) = env::var("CMDB_UPGRADER_LOG_LEVEL")
            .ok()
            .and_then(|s| LogLevel::parse(&s))
        {
            config.log.level = level;
        }
        if let Some(format) = env::var("CMDB_UPGRADER_LOG_FORMAT")
            .ok()
            .and_then(|s| LogFormat::parse(&s))
        {
            config.log.format = format;
        }

        config
    }

    /// Set the fallback tenant
    pub fn with_owner_id(mut self, owner_id: impl Into<String>) -> Self {
        self.owner_id = owner_id.into();
        self
    }

    /// Set the worker count
    pub fn with_workers(mut self, worker_count: usize) -> Self {
        self.worker_count = worker_count;
        self
    }

    /// Set the page size
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    /// Reject values the copier cannot run with
    pub fn validate(&self) -> UpgradeResult<()> {
        if self.owner_id.trim().is_empty() {
            return Err(UpgradeError::config("owner_id must not be empty"));
        }
        if self.worker_count == 0 {
            return Err(UpgradeError::config("worker_count must be at least 1"));
        }
        if self.page_size == 0 {
            return Err(UpgradeError::config("page_size must be at least 1"));
        }
        Ok(())
    }
}
