use server::SimulationConfig;
use std::time::Duration;

pub const DEFAULT_SERVER_URL: &str = "ws://127.0.0.1:8080";

#[derive(Debug, Clone, PartialEq)]
pub struct ProxyConfig {
    pub server_url: String,
    /// Channel used for the offline bootstrap until an online snapshot names one.
    pub channel_id: String,
    pub connect_timeout: Duration,
    /// Offline tick period, agent and spawn tuning.
    pub simulation: SimulationConfig,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            server_url: DEFAULT_SERVER_URL.to_string(),
            channel_id: shared::DEFAULT_CHANNEL.to_string(),
            connect_timeout: Duration::from_secs(3),
            simulation: SimulationConfig::default(),
        }
    }
}

impl ProxyConfig {
    pub fn new(server_url: impl Into<String>, channel_id: impl Into<String>) -> Self {
        Self {
            server_url: server_url.into(),
            channel_id: channel_id.into(),
            ..Self::default()
        }
    }
}
