#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Healthcare facility and administrative ward types.
//!
//! These are the immutable inputs of every coverage analysis: facility
//! points loaded from the facility registry and ward polygons carrying
//! census population figures. They are loaded once per session and never
//! mutated by the analysis crates.

use geo::MultiPolygon;
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

/// Category of a healthcare facility as published in the Kenya Master
/// Health Facility List.
///
/// Parsing is case-insensitive and accepts the common registry spellings
/// (e.g. `"Sub-District Hospital"` parses as [`FacilityType::Hospital`]).
/// Use [`FacilityType::from_label`] for free-form labels; it never fails.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(ascii_case_insensitive)]
pub enum FacilityType {
    /// Any hospital level (district, sub-district, provincial, referral).
    #[strum(
        to_string = "Hospital",
        serialize = "District Hospital",
        serialize = "Sub-District Hospital",
        serialize = "Provincial General Hospital",
        serialize = "Other Hospital"
    )]
    Hospital,
    /// Health centre.
    #[strum(to_string = "Health Centre", serialize = "Health Center")]
    HealthCentre,
    /// Dispensary.
    #[strum(to_string = "Dispensary")]
    Dispensary,
    /// Private or faith-based medical clinic.
    #[strum(to_string = "Medical Clinic", serialize = "Clinic")]
    MedicalClinic,
    /// Nursing home.
    #[strum(to_string = "Nursing Home")]
    NursingHome,
    /// Maternity home.
    #[strum(to_string = "Maternity Home")]
    MaternityHome,
    /// Stand-alone pharmacy.
    #[strum(to_string = "Pharmacy")]
    Pharmacy,
    /// Stand-alone laboratory.
    #[strum(to_string = "Laboratory", serialize = "Laboratory (Stand-alone)")]
    Laboratory,
    /// Stand-alone voluntary counselling and testing centre.
    #[strum(to_string = "VCT Centre", serialize = "VCT Centre (Stand-Alone)")]
    VctCentre,
    /// Health programme office.
    #[strum(to_string = "Health Programme")]
    HealthProgramme,
    /// Anything the registry labels differently.
    #[strum(to_string = "Unknown")]
    Unknown,
}

impl FacilityType {
    /// All facility categories, in registry order.
    pub const ALL: &[Self] = &[
        Self::Hospital,
        Self::HealthCentre,
        Self::Dispensary,
        Self::MedicalClinic,
        Self::NursingHome,
        Self::MaternityHome,
        Self::Pharmacy,
        Self::Laboratory,
        Self::VctCentre,
        Self::HealthProgramme,
        Self::Unknown,
    ];

    /// Maps a raw registry label to a category.
    ///
    /// Exact (case-insensitive) matches win. Labels that merely mention a
    /// hospital (e.g. `"Mission Hospital"`) are treated as hospitals;
    /// everything else becomes [`FacilityType::Unknown`].
    #[must_use]
    pub fn from_label(label: &str) -> Self {
        let trimmed = label.trim();
        if let Ok(parsed) = trimmed.parse::<Self>() {
            return parsed;
        }
        if trimmed.to_ascii_lowercase().contains("hospital") {
            Self::Hospital
        } else {
            Self::Unknown
        }
    }
}

/// A WGS84 longitude/latitude pair.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    /// Longitude in decimal degrees.
    pub longitude: f64,
    /// Latitude in decimal degrees.
    pub latitude: f64,
}

impl Coordinate {
    /// Creates a coordinate from longitude and latitude.
    #[must_use]
    pub const fn new(longitude: f64, latitude: f64) -> Self {
        Self {
            longitude,
            latitude,
        }
    }

    /// Converts to a [`geo::Point`] in `(x = lon, y = lat)` order.
    #[must_use]
    pub fn to_point(self) -> geo::Point<f64> {
        geo::Point::new(self.longitude, self.latitude)
    }
}

/// A healthcare facility.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Facility {
    /// Registry identifier (falls back to the feature index when absent).
    pub id: String,
    /// Facility name.
    pub name: String,
    /// Parsed category, used to look up the service radius.
    pub facility_type: FacilityType,
    /// The registry label exactly as supplied.
    pub type_label: String,
    /// Facility location.
    pub location: Coordinate,
}

impl Facility {
    /// Creates a facility, deriving [`FacilityType`] from `type_label`.
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        type_label: impl Into<String>,
        location: Coordinate,
    ) -> Self {
        let type_label = type_label.into();
        Self {
            id: id.into(),
            name: name.into(),
            facility_type: FacilityType::from_label(&type_label),
            type_label,
            location,
        }
    }
}

/// Census population figures for a ward.
///
/// The ward layer has carried both the 2009 and the 2019 census columns.
/// The newer figure is preferred whenever it is present.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CensusPopulation {
    /// 2019 census population (`pop2019`).
    pub pop2019: Option<u64>,
    /// 2009 census population (`pop2009`).
    pub pop2009: Option<u64>,
}

impl CensusPopulation {
    /// Returns the newest available census figure.
    #[must_use]
    pub const fn preferred(self) -> Option<u64> {
        match (self.pop2019, self.pop2009) {
            (Some(newer), _) => Some(newer),
            (None, older) => older,
        }
    }
}

/// An administrative ward.
///
/// `geometry` is `None` when the source feature had no usable polygon;
/// such wards are kept so they can be reported, but every geometric
/// analysis skips them.
#[derive(Debug, Clone, PartialEq)]
pub struct Ward {
    /// Ward name (`ward` property).
    pub name: String,
    /// Sub-county the ward belongs to, when known.
    pub subcounty: Option<String>,
    /// Population used for scoring (see [`CensusPopulation::preferred`]).
    pub population: Option<u64>,
    /// Ward boundary.
    pub geometry: Option<MultiPolygon<f64>>,
}

impl Ward {
    /// Creates a ward from its census figures.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        census: CensusPopulation,
        geometry: Option<MultiPolygon<f64>>,
    ) -> Self {
        Self {
            name: name.into(),
            subcounty: None,
            population: census.preferred(),
            geometry,
        }
    }

    /// Sets the sub-county name.
    #[must_use]
    pub fn with_subcounty(mut self, subcounty: impl Into<String>) -> Self {
        self.subcounty = Some(subcounty.into());
        self
    }
}
