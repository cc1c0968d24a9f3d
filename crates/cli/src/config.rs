use anyhow::{Context, Result};
use bus::BusConfig;
use controller::{ControllerSetup, PinMap, TimingConfig};
use detector::DetectorConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Site file: everything an installation overrides, all fields optional.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SiteConfig {
    pub bus: BusConfig,
    pub timing: TimingConfig,
    pub pins: PinMap,
    /// Empty means one reader per approach with the scenario's cooldown.
    pub detectors: Vec<DetectorConfig>,
}

impl SiteConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading site config {}", path.display()))?;
        let cfg: SiteConfig = serde_json::from_str(&text)
            .with_context(|| format!("parsing site config {}", path.display()))?;
        Ok(cfg)
    }

    pub fn controller_setup(&self) -> ControllerSetup {
        ControllerSetup {
            timing: self.timing.clone(),
            pins: self.pins,
            bus: self.bus.clone(),
            monitor: None,
        }
    }
}
