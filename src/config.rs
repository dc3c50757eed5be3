use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::DashboardError;
use crate::projections::{DEFAULT_TOP_N, DEFAULT_WINDOW_DAYS};

const DEFAULT_CONFIG_FILE: &str = "dashboard.toml";
/// One year
pub const MAX_SESSION_TTL_HOURS: i64 = 24 * 365;

/// Service configuration.
///
/// Loaded from an optional TOML file, then overridden by `DASHBOARD_*`
/// environment variables, then validated.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub bind_addr: String,
    /// Base URL of the chatbot backend
    pub api_url: String,
    pub admin_password: String,
    pub session_ttl_hours: i64,
    pub request_timeout_secs: u64,
    pub window_days: u32,
    pub top_n: usize,
    pub palette: Vec<String>,
    pub page_size: usize,
    pub suggestion_limit: usize,
    pub suggestion_threshold: f64,
    pub allowed_origins: Vec<String>,
    /// Where `POST /feedback` forwards the widget's feedback form
    pub feedback_url: Option<String>,
    /// "text" or "json"
    pub log_format: String,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            bind_addr: "127.0.0.1:8080".to_string(),
            api_url: String::new(),
            admin_password: String::new(),
            session_ttl_hours: 24,
            request_timeout_secs: 15,
            window_days: DEFAULT_WINDOW_DAYS,
            top_n: DEFAULT_TOP_N,
            palette: [
                "#FF6B6B", "#4ECDC4", "#45B7D1", "#FFA36C", "#6A4C93", "#FFD93D", "#38B000",
            ]
            .iter()
            .map(|c| c.to_string())
            .collect(),
            page_size: 6,
            suggestion_limit: 3,
            suggestion_threshold: 0.5,
            allowed_origins: Vec::new(),
            feedback_url: None,
            log_format: "text".to_string(),
        }
    }
}

impl Config {
    /// Load from `DASHBOARD_CONFIG` (or `dashboard.toml` when present) plus env overrides.
    pub fn load() -> Result<Self, DashboardError> {
        let explicit = std::env::var_os("DASHBOARD_CONFIG").map(PathBuf::from);
        let path = explicit.clone().unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));

        let mut config = if explicit.is_some() || path.exists() {
            Self::from_file(&path)?
        } else {
            Config::default()
        };

        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, DashboardError> {
        let content = fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| {
            DashboardError::Config(format!("failed to parse {}: {}", path.display(), e))
        })
    }

    /// Apply `DASHBOARD_*` overrides from `lookup`.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("DASHBOARD_API_URL") {
            self.api_url = url;
        }
        if let Some(password) = lookup("DASHBOARD_ADMIN_PASSWORD") {
            self.admin_password = password;
        }
        if let Some(bind) = lookup("DASHBOARD_BIND") {
            self.bind_addr = bind;
        }
        if let Some(format) = lookup("DASHBOARD_LOG_FORMAT") {
            self.log_format = format;
        }
        if let Some(url) = lookup("DASHBOARD_FEEDBACK_URL") {
            self.feedback_url = Some(url);
        }
    }

    pub fn validate(&self) -> Result<(), DashboardError> {
        if self.api_url.trim().is_empty() {
            return Err(DashboardError::Config("api_url must be set".into()));
        }
        if self.admin_password.is_empty() {
            return Err(DashboardError::Config("admin_password must be set".into()));
        }
        if !(1..=31).contains(&self.window_days) {
            return Err(DashboardError::Config(format!(
                "window_days must be between 1 and 31, got {}",
                self.window_days
            )));
        }
        if self.top_n == 0 {
            return Err(DashboardError::Config("top_n must be at least 1".into()));
        }
        // one color per top category plus "Others"
        if self.palette.len() < self.top_n + 1 {
            return Err(DashboardError::Config(format!(
                "palette needs at least {} colors, got {}",
                self.top_n + 1,
                self.palette.len()
            )));
        }
        if self.page_size == 0 {
            return Err(DashboardError::Config("page_size must be at least 1".into()));
        }
        if !(1..=MAX_SESSION_TTL_HOURS).contains(&self.session_ttl_hours) {
            return Err(DashboardError::Config(format!(
                "session_ttl_hours must be between 1 and {}, got {}",
                MAX_SESSION_TTL_HOURS, self.session_ttl_hours
            )));
        }
        if self.request_timeout_secs == 0 {
            return Err(DashboardError::Config("request_timeout_secs must be at least 1".into()));
        }
        self.socket_addr()?;
        Ok(())
    }

    pub fn socket_addr(&self) -> Result<SocketAddr, DashboardError> {
        self.bind_addr.parse().map_err(|e| {
            DashboardError::Config(format!("invalid bind_addr {:?}: {}", self.bind_addr, e))
        })
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn json_logs(&self) -> bool {
        self.log_format.eq_ignore_ascii_case("json")
    }
}
