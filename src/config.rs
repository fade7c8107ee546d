//! Terminal configuration.
//!
//! Values come from `HASHMATO_*` environment variables with defaults that
//! match a backend running on `localhost:8080`. Builder-style `with_*`
//! methods override individual values (tests use them to shorten delays).

use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::TerminalError;
use crate::escpos::PaperWidth;

pub const DEFAULT_API_BASE: &str = "http://localhost:8080";
pub const DEFAULT_SYNC_INTERVAL: Duration = Duration::from_millis(5_000);
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
/// Fixed delay between update channel reconnect attempts.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(2);
pub const DEFAULT_DATA_DIR: &str = "hashmato-data";

const ENV_API_BASE: &str = "HASHMATO_API_BASE";
const ENV_API_WS: &str = "HASHMATO_API_WS";
const ENV_DATA_DIR: &str = "HASHMATO_DATA_DIR";
const ENV_SYNC_INTERVAL_MS: &str = "HASHMATO_SYNC_INTERVAL_MS";
const ENV_REQUEST_TIMEOUT_MS: &str = "HASHMATO_REQUEST_TIMEOUT_MS";
const ENV_PRINTER_ADDR: &str = "HASHMATO_PRINTER_ADDR";
const ENV_LOG_JSON: &str = "HASHMATO_LOG_JSON";
const ENV_PAPER_MM: &str = "HASHMATO_PAPER_MM";

#[derive(Debug, Clone)]
pub struct TerminalConfig {
    /// Normalised REST base URL, no trailing slash.
    pub api_base: String,
    /// Explicit WebSocket base; derived from `api_base` when `None`.
    pub ws_base: Option<String>,
    pub data_dir: PathBuf,
    pub sync_interval: Duration,
    pub request_timeout: Duration,
    pub reconnect_delay: Duration,
    /// `host:port` of an ESC/POS network printer with a drawer attached.
    pub printer_addr: Option<String>,
    pub receipt_paper: PaperWidth,
    pub log_json: bool,
}

impl Default for TerminalConfig {
    fn default() -> Self {
        Self::new(DEFAULT_API_BASE)
    }
}

impl TerminalConfig {
    pub fn new(api_base: impl AsRef<str>) -> Self {
        Self {
            api_base: normalize_base_url(api_base.as_ref()),
            ws_base: None,
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            sync_interval: DEFAULT_SYNC_INTERVAL,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            printer_addr: None,
            receipt_paper: PaperWidth::Mm80,
            log_json: false,
        }
    }

    /// Load configuration from the process environment.
    pub fn from_env() -> Result<Self, TerminalError> {
        let mut config = match env_non_empty(ENV_API_BASE) {
            Some(base) => Self::new(base),
            None => Self::default(),
        };

        config.ws_base = env_non_empty(ENV_API_WS).map(|ws| normalize_base_url(&ws));
        if let Some(dir) = env_non_empty(ENV_DATA_DIR) {
            config.data_dir = PathBuf::from(dir);
        }
        if let Some(ms) = env_millis(ENV_SYNC_INTERVAL_MS)? {
            config.sync_interval = ms;
        }
        if let Some(ms) = env_millis(ENV_REQUEST_TIMEOUT_MS)? {
            config.request_timeout = ms;
        }
        config.printer_addr = env_non_empty(ENV_PRINTER_ADDR);
        if let Some(mm) = env_non_empty(ENV_PAPER_MM) {
            config.receipt_paper = match mm.as_str() {
                "58" => PaperWidth::Mm58,
                "80" => PaperWidth::Mm80,
                other => {
                    return Err(TerminalError::Config(format!(
                        "{ENV_PAPER_MM} must be 58 or 80, got {other:?}"
                    )))
                }
            };
        }
        config.log_json = env_non_empty(ENV_LOG_JSON)
            .map(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
            .unwrap_or(false);

        Ok(config)
    }

    pub fn with_data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.data_dir = dir.into();
        self
    }

    pub fn with_ws_base(mut self, ws_base: impl AsRef<str>) -> Self {
        self.ws_base = Some(normalize_base_url(ws_base.as_ref()));
        self
    }

    pub fn with_sync_interval(mut self, interval: Duration) -> Self {
        self.sync_interval = interval;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    pub fn with_printer_addr(mut self, addr: impl Into<String>) -> Self {
        self.printer_addr = Some(addr.into());
        self
    }

    pub fn with_receipt_paper(mut self, paper: PaperWidth) -> Self {
        self.receipt_paper = paper;
        self
    }

    /// Full URL of the push channel endpoint (`/ws` on the API host).
    pub fn ws_url(&self) -> String {
        let base = self
            .ws_base
            .clone()
            .unwrap_or_else(|| self.api_base.clone());
        let upgraded = if let Some(rest) = base.strip_prefix("https://") {
            format!("wss://{rest}")
        } else if let Some(rest) = base.strip_prefix("http://") {
            format!("ws://{rest}")
        } else {
            base
        };
        format!("{upgraded}/ws")
    }

    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join(crate::db::DB_FILE_NAME)
    }

    pub fn log_dir(&self) -> PathBuf {
        self.data_dir.join("logs")
    }
}

/// Normalise a base URL:
/// - ensure a scheme is present (http for localhost and LAN addresses,
///   https otherwise)
/// - strip trailing slashes
///
/// `ws://` and `wss://` bases are accepted as-is.
pub fn normalize_base_url(url: &str) -> String {
    let mut url = url.trim().to_string();

    let has_scheme = ["http://", "https://", "ws://", "wss://"]
        .iter()
        .any(|scheme| url.starts_with(scheme));
    if !has_scheme {
        if is_local_host(&url) {
            url = format!("http://{url}");
        } else {
            url = format!("https://{url}");
        }
    }

    while url.ends_with('/') {
        url.pop();
    }

    url
}

/// Loopback, private-range or link-local IPv4, `localhost` and `*.local`.
fn is_local_host(url: &str) -> bool {
    let host = url.split(['/', ':']).next().unwrap_or_default();
    if host == "localhost" || host.ends_with(".local") {
        return true;
    }
    host.parse::<Ipv4Addr>()
        .is_ok_and(|ip| ip.is_loopback() || ip.is_private() || ip.is_link_local())
}

fn env_non_empty(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_millis(key: &str) -> Result<Option<Duration>, TerminalError> {
    match env_non_empty(key) {
        None => Ok(None),
        Some(raw) => {
            let ms: u64 = raw
                .parse()
                .map_err(|_| TerminalError::Config(format!("{key} must be milliseconds, got {raw:?}")))?;
            if ms == 0 {
                return Err(TerminalError::Config(format!("{key} must be greater than zero")));
            }
            Ok(Some(Duration::from_millis(ms)))
        }
    }
}
