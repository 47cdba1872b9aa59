//! Configuration Management
//!
//! This module resolves the database connection from a named service entry
//! in the standard `pg_service.conf` format, and holds the gateway's own
//! runtime settings.
//!
//! # Service File Locations
//! Search order (first file containing the named section wins):
//! 1. `$PGSERVICEFILE` (explicit override)
//! 2. `~/.pg_service.conf` (per-user)
//! 3. `/etc/pg_service.conf` (system-wide)
//!
//! # Recognised Keys
//! `host`, `port`, `dbname`, `user`, `password`, `application_name`.
//! Unknown keys are ignored so a service entry shared with other tools
//! keeps working.

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{GatewayError, Result};

/// Connection parameters resolved from a service file entry
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServiceEntry {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub dbname: Option<String>,
    pub user: Option<String>,
    pub password: Option<String>,
    pub application_name: Option<String>,
}

impl ServiceEntry {
    /// Build a `tokio_postgres::Config` from this entry
    ///
    /// `user_override` replaces the service file's user when given (the
    /// gateway can run under a dedicated role without editing the file).
    pub fn to_pg_config(&self, user_override: Option<&str>) -> Result<tokio_postgres::Config> {
        let mut config = tokio_postgres::Config::new();

        let host = self
            .host
            .as_deref()
            .ok_or_else(|| GatewayError::config_error("service entry is missing 'host'"))?;
        config.host(host);
        config.port(self.port.unwrap_or(5432));

        let dbname = self
            .dbname
            .as_deref()
            .ok_or_else(|| GatewayError::config_error("service entry is missing 'dbname'"))?;
        config.dbname(dbname);

        if let Some(user) = user_override.or(self.user.as_deref()) {
            config.user(user);
        }
        if let Some(password) = &self.password {
            config.password(password);
        }
        config.application_name(self.application_name.as_deref().unwrap_or("procgate"));

        Ok(config)
    }
}

/// Candidate service file paths in search order
fn service_file_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();

    if let Ok(explicit) = std::env::var("PGSERVICEFILE") {
        if !explicit.is_empty() {
            paths.push(PathBuf::from(explicit));
        }
    }
    if let Some(home) = dirs::home_dir() {
        paths.push(home.join(".pg_service.conf"));
    }
    paths.push(PathBuf::from("/etc/pg_service.conf"));

    paths
}

/// Parse the service file format: `[section]` headers, `key=value` lines,
/// `#` comments, blank lines ignored
pub fn parse_service_file(contents: &str) -> HashMap<String, ServiceEntry> {
    let mut sections: HashMap<String, ServiceEntry> = HashMap::new();
    let mut current: Option<String> = None;

    for line in contents.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        if line.starts_with('[') && line.ends_with(']') {
            let name = line[1..line.len() - 1].trim().to_string();
            sections.entry(name.clone()).or_default();
            current = Some(name);
            continue;
        }

        let Some(section) = &current else { continue };
        let Some((key, value)) = line.split_once('=') else { continue };
        let (key, value) = (key.trim(), value.trim());

        let entry = sections.get_mut(section).expect("section inserted on header");
        match key {
            "host" => entry.host = Some(value.to_string()),
            "port" => entry.port = value.parse().ok(),
            "dbname" => entry.dbname = Some(value.to_string()),
            "user" => entry.user = Some(value.to_string()),
            "password" => entry.password = Some(value.to_string()),
            "application_name" => entry.application_name = Some(value.to_string()),
            _ => {}
        }
    }

    sections
}

/// Look up a named service entry across the standard file locations
pub fn load_service(name: &str) -> Result<ServiceEntry> {
    for path in service_file_paths() {
        if !path.exists() {
            continue;
        }

        let contents = fs::read_to_string(&path).map_err(|e| {
            GatewayError::config_error(format!("could not read {}: {e}", path.display()))
        })?;

        if let Some(entry) = parse_service_file(&contents).remove(name) {
            return Ok(entry);
        }
    }

    Err(GatewayError::config_error(format!("service '{name}' not found in any service file")))
}

/// Gateway runtime settings
#[derive(Debug, Clone)]
pub struct GatewaySettings {
    /// Service name looked up in the service file
    pub service: String,

    /// Role to connect as, overriding the service file's user
    pub user: Option<String>,

    /// Number of facades (one per worker)
    pub pool_size: usize,

    /// Reconnect backoff schedule; the facade sleeps `backoff[k-1]` before
    /// reconnect attempt `k`
    pub backoff: Vec<Duration>,
}

impl GatewaySettings {
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            user: None,
            pool_size: 4,
            backoff: default_backoff(),
        }
    }

    #[must_use]
    pub fn with_user(mut self, user: Option<String>) -> Self {
        self.user = user;
        self
    }

    #[must_use]
    pub fn with_pool_size(mut self, pool_size: usize) -> Self {
        self.pool_size = pool_size.max(1);
        self
    }

    #[must_use]
    pub fn with_backoff(mut self, backoff: Vec<Duration>) -> Self {
        self.backoff = backoff;
        self
    }

    /// Resolve the connection parameters for this gateway
    pub fn pg_config(&self) -> Result<tokio_postgres::Config> {
        load_service(&self.service)?.to_pg_config(self.user.as_deref())
    }
}

/// Linear backoff: attempt k sleeps k * 3 seconds
pub fn default_backoff() -> Vec<Duration> {
    (1..=3).map(|k| Duration::from_secs(k * 3)).collect()
}
