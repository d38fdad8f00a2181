#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Analysis configuration.
//!
//! One canonical set of parameters drives every component: buffer radii
//! per facility type, the cover and gap thresholds, density lookup
//! behaviour, the GIS server endpoint, and site-suitability tuning. The
//! defaults are a TOML file embedded at compile time; a user-supplied file
//! replaces them, and a couple of environment variables override the
//! deployment-specific values.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use health_access_facility_models::FacilityType;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Embedded default configuration.
const DEFAULT_TOML: &str = include_str!("../defaults/analysis.toml");

/// Overrides [`ApiConfig::base_url`].
pub const API_URL_ENV: &str = "HEALTH_ACCESS_API_URL";

/// Overrides [`DensityConfig::lookup_timeout_secs`].
pub const DENSITY_TIMEOUT_ENV: &str = "HEALTH_ACCESS_DENSITY_TIMEOUT_SECS";

/// Errors that can occur while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The configuration file is not valid TOML for [`AnalysisConfig`].
    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),

    /// A value is outside its allowed range.
    #[error("Invalid configuration: {message}")]
    Invalid {
        /// Description of what went wrong.
        message: String,
    },
}

/// Top-level analysis configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisConfig {
    /// Facility buffer sizes.
    pub service_area: ServiceAreaConfig,
    /// Ward classification thresholds.
    pub coverage: CoverageConfig,
    /// Population density lookups.
    pub density: DensityConfig,
    /// GIS server access.
    pub api: ApiConfig,
    /// Site-suitability search.
    pub suitability: SuitabilityConfig,
}

/// Facility buffer sizes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceAreaConfig {
    /// Radius for facility types without an explicit entry.
    pub default_radius_km: f64,
    /// Radius per facility type.
    #[serde(default)]
    pub radius_km_by_type: BTreeMap<FacilityType, f64>,
}

impl ServiceAreaConfig {
    /// Returns the buffer radius for `facility_type`.
    #[must_use]
    pub fn radius_for(&self, facility_type: FacilityType) -> f64 {
        self.radius_km_by_type
            .get(&facility_type)
            .copied()
            .unwrap_or(self.default_radius_km)
    }
}

/// Ward classification thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CoverageConfig {
    /// Covered ratio at or below which a ward is underserved.
    pub cover_threshold: f64,
    /// Uncovered percentage above which a ward has a coverage gap.
    pub gap_threshold_pct: f64,
}

/// Population density lookup behaviour.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DensityConfig {
    /// Base density of the offline estimate when no bounds are set.
    pub fallback_density_per_km2: f64,
    /// Per-lookup timeout.
    pub lookup_timeout_secs: u64,
    /// Lookups in flight at once.
    pub max_concurrent_lookups: usize,
    /// County-wide density range for the offline estimate.
    #[serde(default)]
    pub estimate_bounds: Option<EstimateBounds>,
}

/// Known density range used to shape the offline estimate.
///
/// The estimate falls from `max_density` at `center` towards `min_density`
/// further out, and is always clamped into the range.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EstimateBounds {
    /// Lowest density in the county (people/km²).
    pub min_density: f64,
    /// Highest density in the county.
    pub max_density: f64,
    /// Densest point, `[longitude, latitude]`.
    pub center: [f64; 2],
}

impl DensityConfig {
    /// Per-lookup timeout as a [`Duration`].
    #[must_use]
    pub const fn lookup_timeout(&self) -> Duration {
        Duration::from_secs(self.lookup_timeout_secs)
    }
}

/// GIS server access.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Server base URL. `None` runs fully offline.
    #[serde(default)]
    pub base_url: Option<String>,
    /// Whole-request timeout.
    pub request_timeout_secs: u64,
    /// Retries for transient HTTP failures.
    pub max_retries: u32,
}

impl ApiConfig {
    /// Whole-request timeout as a [`Duration`].
    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Site-suitability search parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuitabilityConfig {
    /// Candidate grid spacing in degrees.
    pub grid_step_deg: f64,
    /// Service radius assumed for a new facility.
    pub candidate_radius_km: f64,
    /// Maximum number of recommended sites.
    pub max_sites: usize,
    /// Initial minimum separation between recommended sites, in degrees.
    pub min_separation_deg: f64,
    /// Factor applied to the separation when no candidate qualifies.
    pub separation_decay: f64,
    /// Separation below which the best remaining candidate is taken.
    pub min_separation_floor_deg: f64,
    /// Facility types not counted as existing coverage.
    #[serde(default)]
    pub excluded_facility_types: Vec<FacilityType>,
}

impl AnalysisConfig {
    /// Returns the embedded default configuration.
    ///
    /// # Panics
    ///
    /// Panics if the embedded TOML fails to parse. It is a compile-time
    /// constant, so a failure is a development error caught by the tests.
    #[must_use]
    pub fn embedded() -> Self {
        toml::de::from_str(DEFAULT_TOML)
            .unwrap_or_else(|e| panic!("Failed to parse embedded analysis config: {e}"))
    }

    /// Parses and validates a configuration from TOML text.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the text is not valid TOML or a value is
    /// out of range.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::de::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads the configuration from `path`, or the embedded defaults when
    /// `path` is `None`, then applies environment overrides.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the file cannot be read or parsed, or an
    /// override holds an invalid value.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => {
                log::info!("Loading analysis config from {}", path.display());
                Self::from_toml_str(&std::fs::read_to_string(path)?)?
            }
            None => Self::embedded(),
        };
        config.apply_env_overrides()?;
        Ok(config)
    }

    /// Applies [`API_URL_ENV`] and [`DENSITY_TIMEOUT_ENV`].
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if the timeout override is not a
    /// positive integer.
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides(
            std::env::var(API_URL_ENV).ok(),
            std::env::var(DENSITY_TIMEOUT_ENV).ok(),
        )
    }

    fn apply_overrides(
        &mut self,
        api_url: Option<String>,
        density_timeout: Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(url) = api_url.filter(|u| !u.trim().is_empty()) {
            log::debug!("{API_URL_ENV} overrides api.base_url");
            self.api.base_url = Some(url.trim().trim_end_matches('/').to_string());
        }
        if let Some(raw) = density_timeout {
            let secs = raw
                .trim()
                .parse::<u64>()
                .ok()
                .filter(|secs| *secs > 0)
                .ok_or_else(|| ConfigError::Invalid {
                    message: format!("{DENSITY_TIMEOUT_ENV} must be a positive integer, got {raw:?}"),
                })?;
            self.density.lookup_timeout_secs = secs;
        }
        self.validate()
    }

    /// Checks that every value is within its allowed range.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] describing the first bad value.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |message: String| Err(ConfigError::Invalid { message });

        if !(self.service_area.default_radius_km > 0.0) {
            return invalid(format!(
                "service_area.default_radius_km must be positive, got {}",
                self.service_area.default_radius_km
            ));
        }
        if let Some((facility_type, radius)) = self
            .service_area
            .radius_km_by_type
            .iter()
            .find(|(_, radius)| !(**radius > 0.0))
        {
            return invalid(format!(
                "service_area.radius_km_by_type.{facility_type:?} must be positive, got {radius}"
            ));
        }
        if !(0.0..=1.0).contains(&self.coverage.cover_threshold) {
            return invalid(format!(
                "coverage.cover_threshold must be within [0, 1], got {}",
                self.coverage.cover_threshold
            ));
        }
        if !(0.0..100.0).contains(&self.coverage.gap_threshold_pct) {
            return invalid(format!(
                "coverage.gap_threshold_pct must be within [0, 100), got {}",
                self.coverage.gap_threshold_pct
            ));
        }
        if !(self.density.fallback_density_per_km2 >= 0.0) {
            return invalid(format!(
                "density.fallback_density_per_km2 must not be negative, got {}",
                self.density.fallback_density_per_km2
            ));
        }
        if let Some(bounds) = self
            .density
            .estimate_bounds
            .filter(|b| !(b.min_density >= 0.0 && b.max_density >= b.min_density))
        {
            return invalid(format!(
                "density.estimate_bounds must satisfy 0 <= min_density <= max_density, got {} and {}",
                bounds.min_density, bounds.max_density
            ));
        }
        if self.density.lookup_timeout_secs == 0 || self.density.max_concurrent_lookups == 0 {
            return invalid(
                "density.lookup_timeout_secs and density.max_concurrent_lookups must be positive"
                    .to_string(),
            );
        }
        let s = &self.suitability;
        if !(s.grid_step_deg > 0.0 && s.candidate_radius_km > 0.0) {
            return invalid(
                "suitability.grid_step_deg and suitability.candidate_radius_km must be positive"
                    .to_string(),
            );
        }
        if !(s.separation_decay > 0.0 && s.separation_decay < 1.0) {
            return invalid(format!(
                "suitability.separation_decay must be within (0, 1), got {}",
                s.separation_decay
            ));
        }
        Ok(())
    }
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self::embedded()
    }
}
