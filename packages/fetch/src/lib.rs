#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Client for the GIS server that backs the dashboard.
//!
//! The server exposes precomputed service areas, population density
//! sampling, travel-time isochrones, and a site-suitability search. Every
//! endpoint may answer with an `{"error": "..."}` envelope instead of data;
//! [`ApiClient`] turns that into [`FetchFailure::Server`] so callers can
//! fall back to local computation uniformly.

mod retry;

use std::collections::BTreeMap;
use std::time::Duration;

use health_access_analysis_models::{IsochroneCoverage, TravelTimeAnalysis};
use health_access_config::ApiConfig;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

/// Merged service-area polygons (GET).
pub const MERGED_SERVICE_AREAS_PATH: &str = "maps/api/merged-service-areas/";

/// Population density statistics for a posted polygon (POST).
pub const POPULATION_DENSITY_PATH: &str = "maps/api/population-density-for-area/";

/// Travel-time isochrones with population coverage (POST).
pub const TRAVEL_TIME_PATH: &str = "maps/travel-time-analysis/";

/// Ranked candidate sites for new facilities (GET).
pub const SITE_SUITABILITY_PATH: &str = "maps/api/site-suitability-analysis/";

/// Why a remote request produced no usable data.
///
/// Distinct from a successful response describing an empty result.
#[derive(Debug, Error)]
pub enum FetchFailure {
    /// Connection, TLS, or timeout failure.
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// The server answered with a non-success status.
    #[error("HTTP {status}")]
    Status {
        /// HTTP status code.
        status: u16,
    },

    /// The payload carried an `error` field.
    #[error("Server reported an error: {message}")]
    Server {
        /// The server's message.
        message: String,
    },

    /// The payload was not in the expected shape.
    #[error("Unexpected payload: {message}")]
    Payload {
        /// What was wrong with it.
        message: String,
    },

    /// The request did not finish in time.
    #[error("Request timed out after {after:?}")]
    Timeout {
        /// The bound that was exceeded.
        after: Duration,
    },

    /// No server is configured.
    #[error("No API base URL configured")]
    NotConfigured,
}

/// HTTP client bound to one GIS server.
#[derive(Debug, Clone)]
pub struct ApiClient {
    client: reqwest::Client,
    base_url: String,
    max_retries: u32,
}

impl ApiClient {
    /// Creates a client for `base_url`.
    ///
    /// # Errors
    ///
    /// Returns [`FetchFailure::Network`] if the HTTP client cannot be built.
    pub fn new(
        base_url: impl Into<String>,
        request_timeout: Duration,
        max_retries: u32,
    ) -> Result<Self, FetchFailure> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .user_agent(concat!("health-access/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            max_retries,
        })
    }

    /// Creates a client from configuration.
    ///
    /// # Errors
    ///
    /// * [`FetchFailure::NotConfigured`] if no base URL is set
    /// * [`FetchFailure::Network`] if the HTTP client cannot be built
    pub fn from_config(config: &ApiConfig) -> Result<Self, FetchFailure> {
        let base_url = config
            .base_url
            .as_deref()
            .ok_or(FetchFailure::NotConfigured)?;
        Self::new(base_url, config.request_timeout(), config.max_retries)
    }

    /// The server base URL, without a trailing slash.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Full URL for an endpoint path.
    #[must_use]
    pub fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    /// GETs `path` and returns the JSON body.
    ///
    /// # Errors
    ///
    /// Returns [`FetchFailure`] on transport failure, a non-success status,
    /// a non-JSON body, or an error envelope.
    pub async fn get_json(&self, path: &str) -> Result<Value, FetchFailure> {
        let url = self.endpoint(path);
        log::debug!("GET {url}");
        let body = retry::send_json(|| self.client.get(&url), self.max_retries).await?;
        check_envelope(body)
    }

    /// POSTs `payload` as JSON to `path` and returns the JSON body.
    ///
    /// # Errors
    ///
    /// Returns [`FetchFailure`] on transport failure, a non-success status,
    /// a non-JSON body, or an error envelope.
    pub async fn post_json<T: Serialize + Sync + ?Sized>(
        &self,
        path: &str,
        payload: &T,
    ) -> Result<Value, FetchFailure> {
        let url = self.endpoint(path);
        log::debug!("POST {url}");
        let body =
            retry::send_json(|| self.client.post(&url).json(payload), self.max_retries).await?;
        check_envelope(body)
    }

    /// Runs the server-side travel-time analysis.
    ///
    /// # Errors
    ///
    /// Returns [`FetchFailure`] if the request fails or the response is
    /// not an object.
    pub async fn fetch_travel_time(&self) -> Result<TravelTimeAnalysis, FetchFailure> {
        let body = self
            .post_json(TRAVEL_TIME_PATH, &serde_json::json!({}))
            .await?;
        let analysis = parse_travel_time(body)?;
        log::info!(
            "Travel-time analysis returned {} isochrones across {} bands",
            analysis.isochrones.len(),
            analysis.population_coverage.len()
        );
        Ok(analysis)
    }
}

/// GETs an absolute URL outside any configured server.
///
/// Used for dataset downloads, which may live on a different host than the
/// GIS server.
///
/// # Errors
///
/// Returns [`FetchFailure`] on transport failure, a non-success status,
/// a non-JSON body, or an error envelope.
pub async fn get_json_url(
    url: &str,
    request_timeout: Duration,
    max_retries: u32,
) -> Result<Value, FetchFailure> {
    let client = reqwest::Client::builder()
        .timeout(request_timeout)
        .user_agent(concat!("health-access/", env!("CARGO_PKG_VERSION")))
        .build()?;
    log::debug!("GET {url}");
    let body = retry::send_json(|| client.get(url), max_retries).await?;
    check_envelope(body)
}

/// Turns an `{"error": ...}` envelope into [`FetchFailure::Server`].
///
/// # Errors
///
/// Returns [`FetchFailure::Server`] when the body is an object with a
/// non-null `error` field.
pub fn check_envelope(body: Value) -> Result<Value, FetchFailure> {
    let message = match body.get("error") {
        None | Some(Value::Null) => None,
        Some(Value::String(message)) => Some(message.clone()),
        Some(other) => Some(other.to_string()),
    };
    match message {
        None => Ok(body),
        Some(message) => Err(FetchFailure::Server { message }),
    }
}

/// Parses a travel-time response.
///
/// Missing `isochrones` or `population_coverage` are treated as empty.
/// Coverage bands whose key is not a whole number of minutes are skipped.
///
/// # Errors
///
/// Returns [`FetchFailure::Payload`] if the body is not an object.
pub fn parse_travel_time(body: Value) -> Result<TravelTimeAnalysis, FetchFailure> {
    let Value::Object(mut object) = body else {
        return Err(FetchFailure::Payload {
            message: "travel-time response is not an object".to_string(),
        });
    };

    let isochrones = match object.remove("isochrones") {
        Some(Value::Array(features)) => features,
        _ => Vec::new(),
    };

    let mut population_coverage = BTreeMap::new();
    if let Some(Value::Object(bands)) = object.remove("population_coverage") {
        for (minutes, band) in bands {
            let Ok(minutes) = minutes.trim().parse::<u32>() else {
                log::warn!("Skipping coverage band with non-numeric key {minutes:?}");
                continue;
            };
            population_coverage.insert(
                minutes,
                IsochroneCoverage {
                    estimated_population: number(&band, "estimated_population")
                        .map_or(0, round_population),
                    coverage_percentage: number(&band, "coverage_percentage").unwrap_or(0.0),
                    area_km2: number(&band, "area_km2").unwrap_or(0.0),
                },
            );
        }
    }

    Ok(TravelTimeAnalysis {
        isochrones,
        population_coverage,
        stats: object.remove("stats").unwrap_or(Value::Null),
    })
}

/// Reads a numeric field, accepting numbers encoded as strings.
#[must_use]
pub fn number(value: &Value, key: &str) -> Option<f64> {
    let parsed = match value.get(key)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    parsed.filter(|n| n.is_finite())
}

/// Rounds a population estimate to a non-negative whole number.
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn round_population(value: f64) -> u64 {
    if value.is_finite() && value > 0.0 {
        value.round() as u64
    } else {
        0
    }
}
