#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Input datasets for a coverage analysis session.
//!
//! Facilities, wards, and the county boundary are `GeoJSON` layers read from
//! local files or downloaded from URLs. They are loaded once, normalized
//! into the model types, and treated as immutable afterwards.

mod normalize;

use std::fmt;
use std::path::{Path, PathBuf};

use geo::MultiPolygon;
use geojson::{FeatureCollection, GeoJson};
use health_access_config::ApiConfig;
use health_access_facility_models::{Facility, Ward};
use health_access_fetch::FetchFailure;
use health_access_geometry::{GeometryError, multipolygon_from_geojson};
use thiserror::Error;

pub use normalize::{normalize_facilities, normalize_wards};

/// Errors that can occur while loading a dataset.
#[derive(Debug, Error)]
pub enum DatasetError {
    /// The file could not be read.
    #[error("I/O error reading {path}: {source}")]
    Io {
        /// File that failed.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },

    /// The text is not valid `GeoJSON`.
    #[error("GeoJSON error in {location}: {source}")]
    GeoJson {
        /// Where the text came from.
        location: String,
        /// Underlying error.
        source: Box<geojson::Error>,
    },

    /// Downloading the layer failed.
    #[error("Download of {location} failed: {source}")]
    Fetch {
        /// URL that failed.
        location: String,
        /// Underlying failure.
        source: FetchFailure,
    },

    /// The layer is not a `FeatureCollection`.
    #[error("{location} is not a FeatureCollection")]
    NotFeatureCollection {
        /// Where the layer came from.
        location: String,
    },

    /// The boundary layer has no usable polygon.
    #[error("Boundary in {location} is unusable: {source}")]
    Boundary {
        /// Where the layer came from.
        location: String,
        /// Underlying geometry error.
        source: GeometryError,
    },
}

/// Where a `GeoJSON` layer lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataLocation {
    /// A local file.
    File(PathBuf),
    /// An `http(s)` URL.
    Url(String),
}

impl DataLocation {
    /// Interprets `http://` and `https://` strings as URLs and anything else
    /// as a file path.
    #[must_use]
    pub fn parse(location: &str) -> Self {
        let trimmed = location.trim();
        if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
            Self::Url(trimmed.to_string())
        } else {
            Self::File(PathBuf::from(trimmed))
        }
    }
}

impl fmt::Display for DataLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::File(path) => write!(f, "{}", path.display()),
            Self::Url(url) => f.write_str(url),
        }
    }
}

/// Locations of the three input layers.
#[derive(Debug, Clone)]
pub struct DatasetSources {
    /// Facility points.
    pub facilities: DataLocation,
    /// Ward polygons with census figures.
    pub wards: DataLocation,
    /// County boundary, needed only for site suitability.
    pub boundary: Option<DataLocation>,
}

/// The loaded input layers.
#[derive(Debug, Clone)]
pub struct Dataset {
    /// Facilities.
    pub facilities: Vec<Facility>,
    /// Wards.
    pub wards: Vec<Ward>,
    /// County boundary, when one was loaded.
    pub boundary: Option<MultiPolygon<f64>>,
}

impl Dataset {
    /// Loads every layer named in `sources`.
    ///
    /// # Errors
    ///
    /// Returns [`DatasetError`] if any layer cannot be read or is not a
    /// feature collection, or the boundary has no polygon.
    pub async fn load(sources: &DatasetSources, api: &ApiConfig) -> Result<Self, DatasetError> {
        let facilities = normalize_facilities(load_feature_collection(&sources.facilities, api).await?);
        let wards = normalize_wards(load_feature_collection(&sources.wards, api).await?);

        let boundary = match &sources.boundary {
            Some(location) => Some(load_boundary(location, api).await?),
            None => None,
        };

        Ok(Self {
            facilities,
            wards,
            boundary,
        })
    }
}

/// Reads or downloads a `GeoJSON` object.
///
/// # Errors
///
/// Returns [`DatasetError`] if the layer cannot be read or parsed.
pub async fn load_geojson(location: &DataLocation, api: &ApiConfig) -> Result<GeoJson, DatasetError> {
    match location {
        DataLocation::File(path) => read_geojson_file(path),
        DataLocation::Url(url) => {
            log::info!("Downloading {url}");
            let body = health_access_fetch::get_json_url(url, api.request_timeout(), api.max_retries)
                .await
                .map_err(|source| DatasetError::Fetch {
                    location: url.clone(),
                    source,
                })?;
            GeoJson::from_json_value(body).map_err(|source| DatasetError::GeoJson {
                location: url.clone(),
                source: Box::new(source),
            })
        }
    }
}

fn read_geojson_file(path: &Path) -> Result<GeoJson, DatasetError> {
    log::info!("Reading {}", path.display());
    let text = std::fs::read_to_string(path).map_err(|source| DatasetError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    text.parse::<GeoJson>().map_err(|source| DatasetError::GeoJson {
        location: path.display().to_string(),
        source: Box::new(source),
    })
}

/// Reads or downloads a `FeatureCollection`.
///
/// # Errors
///
/// Returns [`DatasetError::NotFeatureCollection`] for any other `GeoJSON`
/// object, or an error from [`load_geojson`].
pub async fn load_feature_collection(
    location: &DataLocation,
    api: &ApiConfig,
) -> Result<FeatureCollection, DatasetError> {
    match load_geojson(location, api).await? {
        GeoJson::FeatureCollection(collection) => Ok(collection),
        _ => Err(DatasetError::NotFeatureCollection {
            location: location.to_string(),
        }),
    }
}

/// Loads the county boundary as one multi-polygon.
///
/// Any `GeoJSON` object is accepted; all polygons it contains are gathered.
///
/// # Errors
///
/// Returns [`DatasetError::Boundary`] if it contains no polygon.
pub async fn load_boundary(
    location: &DataLocation,
    api: &ApiConfig,
) -> Result<MultiPolygon<f64>, DatasetError> {
    let geojson = load_geojson(location, api).await?;
    let boundary_error = |source| DatasetError::Boundary {
        location: location.to_string(),
        source,
    };
    multipolygon_from_geojson(geojson)
        .map_err(boundary_error)?
        .ok_or_else(|| boundary_error(GeometryError::Empty))
}
