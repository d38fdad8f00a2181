//! Actions shared by the subcommands and the interactive menu.
//!
//! Each action drives an [`AnalysisSession`] and returns its result as
//! JSON, ready to print or save.

use std::error::Error;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use health_access_analysis_models::ServiceArea;
use health_access_cli_utils::{IndicatifProgress, MultiProgress};
use health_access_config::AnalysisConfig;
use health_access_dataset::{DataLocation, Dataset, DatasetSources};
use health_access_fetch::{ApiClient, FetchFailure};
use health_access_geometry::geojson_geometry;
use health_access_session::AnalysisSession;
use health_access_suitability::SuitabilityResult;
use serde_json::{Value, json};

/// Where the input layers live and how to analyze them.
#[derive(Debug, Clone, Default)]
pub struct Inputs {
    /// Facility points (file path or URL).
    pub facilities: String,
    /// Ward polygons (file path or URL).
    pub wards: String,
    /// County boundary (file path or URL).
    pub boundary: Option<String>,
    /// Configuration file replacing the embedded defaults.
    pub config: Option<PathBuf>,
    /// Ignore any configured GIS server.
    pub offline: bool,
}

/// Loads configuration and data and opens a session over them.
///
/// # Errors
///
/// Returns an error if the configuration or any layer cannot be loaded.
pub async fn open_session(inputs: &Inputs) -> Result<AnalysisSession, Box<dyn Error>> {
    let config = AnalysisConfig::load(inputs.config.as_deref())?;

    let sources = DatasetSources {
        facilities: DataLocation::parse(&inputs.facilities),
        wards: DataLocation::parse(&inputs.wards),
        boundary: inputs.boundary.as_deref().map(DataLocation::parse),
    };
    let dataset = Dataset::load(&sources, &config.api).await?;
    log::info!(
        "Loaded {} facilities and {} wards",
        dataset.facilities.len(),
        dataset.wards.len()
    );

    let client = if inputs.offline {
        None
    } else {
        match ApiClient::from_config(&config.api) {
            Ok(client) => {
                log::info!("Using GIS server at {}", client.base_url());
                Some(client)
            }
            Err(FetchFailure::NotConfigured) => {
                log::info!("No GIS server configured, running offline");
                None
            }
            Err(e) => return Err(e.into()),
        }
    };

    Ok(AnalysisSession::new(Arc::new(dataset), config, client))
}

/// Runs gaps, density, and needs analysis, and returns the report.
///
/// # Errors
///
/// Returns an error if the needs analysis fails.
pub async fn analyze(session: &AnalysisSession, multi: &MultiProgress) -> Result<Value, Box<dyn Error>> {
    let steps = IndicatifProgress::steps_bar(multi, "Needs analysis", 3);

    steps.set_message("Finding coverage gaps".to_string());
    let gaps = session.enable_coverage_gaps().await;
    steps.inc(1);

    steps.set_message("Enabling population density".to_string());
    session.set_population_density(true);
    steps.inc(1);

    steps.set_message(format!("Scoring {} areas", gaps.len()));
    let lookups = IndicatifProgress::lookups_bar(multi, "Looking up population density");
    session.analyze_needs(&lookups).await?;
    steps.inc(1);
    steps.finish("Needs analysis complete".to_string());

    let report = session.report();
    for record in report.action_areas() {
        log::info!(
            "{}: {} ({}, score {})",
            record.area_name,
            record.recommendation.action(),
            record.recommendation,
            record.priority_score
        );
    }
    Ok(serde_json::to_value(&report)?)
}

/// Returns the merged service area as a feature, with ward coverage in
/// its properties.
///
/// # Errors
///
/// Returns an error if the result cannot be serialized.
pub async fn service_areas(session: &AnalysisSession) -> Result<Value, Box<dyn Error>> {
    let resolved = session.enable_service_areas().await;
    let wards = session.enable_underserved().await;
    let overview = session.coverage_overview().await;

    let geometry = match &resolved.area {
        ServiceArea::Empty => Value::Null,
        ServiceArea::Covered(area) => serde_json::to_value(geojson_geometry(area))?,
    };

    Ok(json!({
        "type": "Feature",
        "geometry": geometry,
        "properties": {
            "origin": resolved.origin.as_ref(),
            "overview": overview,
            "wards": wards,
        },
    }))
}

/// Runs the site suitability search, locally or on the server.
///
/// # Errors
///
/// Returns an error if the search cannot run.
pub async fn suitability(
    session: &AnalysisSession,
    multi: &MultiProgress,
    remote: bool,
) -> Result<Value, Box<dyn Error>> {
    let result = if remote {
        session.remote_site_suitability().await?
    } else {
        let progress = IndicatifProgress::sites_bar(multi, "Scoring candidate sites");
        session.site_suitability(&progress).await?
    };
    for (rank, site) in result.sites.iter().enumerate() {
        log::info!(
            "#{} ({:.4}, {:.4}) in {}: {} people, score {:.2} ({})",
            rank + 1,
            site.location.latitude,
            site.location.longitude,
            site.ward.as_deref().unwrap_or("Unknown"),
            site.population_served,
            site.composite_score,
            site.rating
        );
    }
    suitability_json(&result)
}

/// Renders a suitability result as a feature collection of sites.
///
/// # Errors
///
/// Returns an error if a site cannot be serialized.
pub fn suitability_json(result: &SuitabilityResult) -> Result<Value, Box<dyn Error>> {
    let features = result
        .sites
        .iter()
        .map(|site| {
            Ok(json!({
                "type": "Feature",
                "geometry": {
                    "type": "Point",
                    "coordinates": [site.location.longitude, site.location.latitude],
                },
                "properties": serde_json::to_value(site)?,
            }))
        })
        .collect::<Result<Vec<Value>, serde_json::Error>>()?;

    let underserved_area = match &result.underserved_area {
        Some(area) => serde_json::to_value(geojson_geometry(area))?,
        None => Value::Null,
    };

    Ok(json!({
        "type": "FeatureCollection",
        "features": features,
        "underserved_area": underserved_area,
        "total_locations_analyzed": result.candidates_analyzed,
        "message": result.message,
    }))
}

/// Fetches the server's travel-time analysis.
///
/// # Errors
///
/// Returns an error without a server or if the request fails.
pub async fn travel_time(session: &AnalysisSession) -> Result<Value, Box<dyn Error>> {
    let analysis = session.travel_time().await?;
    for (minutes, band) in &analysis.population_coverage {
        log::info!(
            "{minutes} min: {} people ({:.1}%)",
            band.estimated_population,
            band.coverage_percentage
        );
    }
    Ok(serde_json::to_value(&analysis)?)
}

/// Prints `value` as pretty JSON, or writes it to `output`.
///
/// # Errors
///
/// Returns an error if the file cannot be written.
pub fn emit(value: &Value, output: Option<&Path>) -> Result<(), Box<dyn Error>> {
    let text = serde_json::to_string_pretty(value)?;
    match output {
        Some(path) => {
            std::fs::write(path, text)?;
            log::info!("Wrote {}", path.display());
        }
        None => println!("{text}"),
    }
    Ok(())
}
