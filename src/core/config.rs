use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use super::AppCore;

const DEFAULT_BASE_URL: &str = "http://localhost:8080";
const DEFAULT_RECONNECT_DELAY_MS: u64 = 3000;
const DEFAULT_PAGE_SIZE: usize = 10;
const DEFAULT_TOAST_TTL_MS: u64 = 2500;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub(super) struct AppConfig {
    pub(super) disable_network: Option<bool>,
    pub(super) base_url: Option<String>,
    pub(super) ws_url: Option<String>,
    pub(super) reconnect_delay_ms: Option<u64>,
    pub(super) page_size: Option<usize>,
    pub(super) toast_ttl_ms: Option<u64>,
}

pub(super) fn load_app_config(data_dir: &str) -> AppConfig {
    let path = Path::new(data_dir).join("agora_config.json");
    let Ok(bytes) = std::fs::read(&path) else {
        return AppConfig::default();
    };
    serde_json::from_slice::<AppConfig>(&bytes).unwrap_or_default()
}

impl AppConfig {
    pub(super) fn base_url(&self) -> String {
        self.base_url
            .clone()
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
    }

    /// Socket endpoint, derived from the base URL unless set explicitly.
    pub(super) fn ws_url(&self) -> String {
        if let Some(url) = &self.ws_url {
            return url.clone();
        }
        let base = self.base_url();
        let base = base
            .replacen("https://", "wss://", 1)
            .replacen("http://", "ws://", 1);
        format!("{}/api/ws", base.trim_end_matches('/'))
    }

    pub(super) fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms.unwrap_or(DEFAULT_RECONNECT_DELAY_MS))
    }

    pub(super) fn page_size(&self) -> usize {
        self.page_size.unwrap_or(DEFAULT_PAGE_SIZE)
    }

    pub(super) fn toast_ttl(&self) -> Duration {
        Duration::from_millis(self.toast_ttl_ms.unwrap_or(DEFAULT_TOAST_TTL_MS))
    }
}

impl AppCore {
    pub(super) fn network_enabled(&self) -> bool {
        // Used to keep tests deterministic and offline.
        if let Some(disable) = self.config.disable_network {
            return !disable;
        }
        std::env::var("AGORA_DISABLE_NETWORK").ok().as_deref() != Some("1")
    }
}
