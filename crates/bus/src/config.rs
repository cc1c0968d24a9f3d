use serde::{Deserialize, Serialize};
use std::fmt;

/// Network and broker settings shared by every node on the intersection.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    pub wifi_ssid: String,
    pub wifi_password: String,
    pub broker_host: String,
    pub broker_port: u16,
    pub keepalive_s: u16,
    /// Fixed prefix in front of the session namespace.
    pub topic_base: String,
    /// Session/team identifier isolating deployments that share a broker.
    pub team_id: String,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            wifi_ssid: "YOUR_WIFI_SSID".to_string(),
            wifi_password: "YOUR_WIFI_PASSWORD".to_string(),
            broker_host: "broker.emqx.io".to_string(),
            broker_port: 1883,
            keepalive_s: 15,
            topic_base: "stem/Finalize_capstone".to_string(),
            team_id: "LUXOR".to_string(),
        }
    }
}

impl BusConfig {
    pub fn broker_addr(&self) -> String {
        format!("{}:{}", self.broker_host, self.broker_port)
    }
}

impl fmt::Debug for BusConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BusConfig")
            .field("wifi_ssid", &self.wifi_ssid)
            .field("wifi_password", &"<redacted>")
            .field("broker_host", &self.broker_host)
            .field("broker_port", &self.broker_port)
            .field("keepalive_s", &self.keepalive_s)
            .field("topic_base", &self.topic_base)
            .field("team_id", &self.team_id)
            .finish()
    }
}
