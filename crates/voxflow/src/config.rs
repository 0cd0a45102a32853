//! Top-level tracking configuration.
//!
//! Each stage owns its parameter block; [`TrackConfig`] composes them and
//! carries the motion gate shared by linking and reassignment.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::compute::BackendKind;
use crate::error::{Result, TrackError};
use crate::features::FeatureConfig;
use crate::interpolate::InterpolationConfig;
use crate::linking::AssignmentConfig;
use crate::reassign::ReassignConfig;

/// Temporal direction of label propagation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Propagation {
    /// Seed with frame 0 and walk towards the last frame.
    #[default]
    Forward,
    /// Seed with the last frame and walk towards frame 0.
    Backward,
}

/// Full tracking configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackConfig {
    /// Maximum plausible marker speed in micrometers per second.
    pub max_link_speed_um_per_s: f64,
    pub features: FeatureConfig,
    pub assignment: AssignmentConfig,
    pub interpolation: InterpolationConfig,
    pub reassign: ReassignConfig,
    pub propagation: Propagation,
    pub backend: BackendKind,
}

impl Default for TrackConfig {
    fn default() -> Self {
        Self {
            max_link_speed_um_per_s: 1.0,
            features: FeatureConfig::default(),
            assignment: AssignmentConfig::default(),
            interpolation: InterpolationConfig::default(),
            reassign: ReassignConfig::default(),
            propagation: Propagation::Forward,
            backend: BackendKind::Parallel,
        }
    }
}

impl TrackConfig {
    /// Motion gate in micrometers for one frame interval.
    pub fn max_link_distance_um(&self, frame_interval_s: f64) -> f64 {
        self.max_link_speed_um_per_s * frame_interval_s
    }

    pub fn validate(&self) -> Result<()> {
        if !self.max_link_speed_um_per_s.is_finite() || self.max_link_speed_um_per_s <= 0.0 {
            return Err(TrackError::InvalidConfig(format!(
                "max_link_speed_um_per_s must be finite and > 0 (got {})",
                self.max_link_speed_um_per_s
            )));
        }
        if !self.features.radius_scale.is_finite() || self.features.radius_scale <= 0.0 {
            return Err(TrackError::InvalidConfig(format!(
                "features.radius_scale must be finite and > 0 (got {})",
                self.features.radius_scale
            )));
        }
        self.interpolation.validate()?;
        self.reassign.validate()?;
        Ok(())
    }

    /// Load a configuration from JSON; missing fields take their defaults.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&data)?;
        config.validate()?;
        Ok(config)
    }
}
