#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Analysis session.
//!
//! One [`AnalysisSession`] owns the layers built from a loaded dataset:
//! the merged service area, the ward classification, the coverage gaps,
//! the needs analysis, and the last suitability search. Enabling a layer
//! builds whatever it depends on first. Every operation computes into
//! locals and only replaces the stored layer once it has succeeded.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use health_access_analysis_models::{
    CoverageGap, CoverageOverview, CoverageResult, NeedsRecord, PreconditionError,
    TravelTimeAnalysis,
};
use health_access_config::AnalysisConfig;
use health_access_coverage::CoverageClassifier;
use health_access_dataset::Dataset;
use health_access_density::{DensitySource, HttpDensitySource};
use health_access_fetch::{ApiClient, FetchFailure};
use health_access_geometry::{GeometrySource, SphericalEngine};
use health_access_needs::{NeedsAnalysisOrchestrator, NeedsError, ProgressCallback, RunState};
use health_access_report::Report;
use health_access_service_area::{
    FacilityFilter, PrecomputedSource, ResolvedServiceArea, ServiceAreaBuilder,
};
use health_access_suitability::{SiteSuitabilityAnalyzer, SuitabilityError, SuitabilityResult};
use thiserror::Error;

/// Why a session operation failed.
#[derive(Debug, Error)]
pub enum SessionError {
    /// A prerequisite layer is not available.
    #[error(transparent)]
    Precondition(#[from] PreconditionError),

    /// The needs analysis did not commit.
    #[error(transparent)]
    Needs(#[from] NeedsError),

    /// The suitability search could not run.
    #[error(transparent)]
    Suitability(#[from] SuitabilityError),

    /// A server request failed.
    #[error(transparent)]
    Fetch(#[from] FetchFailure),

    /// The operation needs a GIS server and none is configured.
    #[error("No GIS server is configured")]
    NoServer,
}

#[derive(Default)]
struct Layers {
    service_area: Option<ResolvedServiceArea>,
    underserved: Option<Vec<CoverageResult>>,
    gaps: Option<Vec<CoverageGap>>,
    suitability: Option<SuitabilityResult>,
}

/// Layer state for one loaded dataset.
pub struct AnalysisSession {
    dataset: Arc<Dataset>,
    config: AnalysisConfig,
    geometry: Arc<dyn GeometrySource>,
    client: Option<ApiClient>,
    precomputed: Option<Arc<dyn PrecomputedSource>>,
    density: Option<Arc<dyn DensitySource>>,
    builder: ServiceAreaBuilder,
    classifier: CoverageClassifier,
    needs: NeedsAnalysisOrchestrator,
    layers: Mutex<Layers>,
}

impl AnalysisSession {
    /// Creates a session. With a `client` the precomputed service area and
    /// the density service are used; without one everything is computed
    /// locally.
    #[must_use]
    pub fn new(dataset: Arc<Dataset>, config: AnalysisConfig, client: Option<ApiClient>) -> Self {
        let precomputed = client
            .clone()
            .map(|client| Arc::new(client) as Arc<dyn PrecomputedSource>);
        let density = client
            .clone()
            .map(|client| Arc::new(HttpDensitySource::new(client)) as Arc<dyn DensitySource>);

        let mut session = Self::with_sources(
            dataset,
            config,
            Arc::new(SphericalEngine::new()),
            precomputed,
            density,
        );
        session.client = client;
        session
    }

    /// Creates a session with explicit collaborators.
    #[must_use]
    pub fn with_sources(
        dataset: Arc<Dataset>,
        config: AnalysisConfig,
        geometry: Arc<dyn GeometrySource>,
        precomputed: Option<Arc<dyn PrecomputedSource>>,
        density: Option<Arc<dyn DensitySource>>,
    ) -> Self {
        let builder = match &dataset.boundary {
            Some(boundary) => ServiceAreaBuilder::new(geometry.clone()).with_boundary(boundary.clone()),
            None => ServiceAreaBuilder::new(geometry.clone()),
        };
        let classifier = CoverageClassifier::new(geometry.clone(), config.coverage);
        let needs = NeedsAnalysisOrchestrator::new(geometry.clone(), density.clone(), config.density);

        log::info!(
            "Session over {} facilities and {} wards ({})",
            dataset.facilities.len(),
            dataset.wards.len(),
            if precomputed.is_some() {
                "server available"
            } else {
                "offline"
            }
        );

        Self {
            dataset,
            config,
            geometry,
            client: None,
            precomputed,
            density,
            builder,
            classifier,
            needs,
            layers: Mutex::new(Layers::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Layers> {
        self.layers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The dataset this session analyzes.
    #[must_use]
    pub fn dataset(&self) -> &Dataset {
        &self.dataset
    }

    /// The configuration in effect.
    #[must_use]
    pub const fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    /// The service area layer, when enabled.
    #[must_use]
    pub fn service_area(&self) -> Option<ResolvedServiceArea> {
        self.lock().service_area.clone()
    }

    /// The ward classification layer, when enabled.
    #[must_use]
    pub fn underserved(&self) -> Option<Vec<CoverageResult>> {
        self.lock().underserved.clone()
    }

    /// The coverage gap layer, when enabled.
    #[must_use]
    pub fn gaps(&self) -> Option<Vec<CoverageGap>> {
        self.lock().gaps.clone()
    }

    /// The last suitability search, if one succeeded.
    #[must_use]
    pub fn suitability(&self) -> Option<SuitabilityResult> {
        self.lock().suitability.clone()
    }

    /// Builds the merged service area of every facility, or returns the
    /// one already built.
    pub async fn enable_service_areas(&self) -> ResolvedServiceArea {
        if let Some(existing) = self.service_area() {
            return existing;
        }

        let resolved = self
            .builder
            .resolve(
                self.precomputed.as_deref(),
                &self.dataset.facilities,
                &FacilityFilter::all(),
                &self.config.service_area,
            )
            .await;

        log::info!("Service area layer ready ({})", resolved.origin);
        self.lock().service_area = Some(resolved.clone());
        resolved
    }

    /// Hides the service area layer. Layers derived from it stay.
    pub fn disable_service_areas(&self) {
        self.lock().service_area = None;
    }

    /// Classifies every ward against the service area, building the
    /// service area first if needed.
    pub async fn enable_underserved(&self) -> Vec<CoverageResult> {
        let service_area = self.enable_service_areas().await;
        let results = self
            .classifier
            .classify_wards(&self.dataset.wards, &service_area.area);

        log::info!(
            "{} of {} wards underserved",
            results.iter().filter(|r| r.is_underserved).count(),
            results.len()
        );
        self.lock().underserved = Some(results.clone());
        results
    }

    /// Hides the ward classification layer.
    pub fn disable_underserved(&self) {
        self.lock().underserved = None;
    }

    /// Finds coverage gaps, building the service area first if needed.
    ///
    /// While the population density layer is on and a density service is
    /// available, the proportional population estimates are replaced by
    /// density samples where the service answers; the needs analysis then
    /// reuses those samples. Replacing the gaps discards any committed
    /// needs analysis.
    pub async fn enable_coverage_gaps(&self) -> Vec<CoverageGap> {
        let service_area = self.enable_service_areas().await;
        let mut gaps = self
            .classifier
            .find_gaps(&self.dataset.wards, &service_area.area);

        if let Some(density) = self.density.as_ref().filter(|_| self.population_density_enabled()) {
            gaps = self
                .classifier
                .refine_gap_populations(gaps, density.as_ref(), &self.config.density)
                .await;
        }

        log::info!("{} coverage gaps", gaps.len());
        self.needs.reset();
        self.lock().gaps = Some(gaps.clone());
        gaps
    }

    /// Hides the coverage gap layer and discards the needs analysis built
    /// on it.
    pub fn disable_coverage_gaps(&self) {
        self.needs.reset();
        self.lock().gaps = None;
    }

    /// Turns the population density layer on or off.
    pub fn set_population_density(&self, enabled: bool) {
        self.needs.set_density_enabled(enabled);
    }

    /// Whether the population density layer is on.
    #[must_use]
    pub fn population_density_enabled(&self) -> bool {
        self.needs.density_enabled()
    }

    /// Coverage figures across all wards, building the service area first
    /// if needed.
    pub async fn coverage_overview(&self) -> CoverageOverview {
        let service_area = self.enable_service_areas().await;
        self.classifier
            .coverage_overview(&self.dataset.wards, &service_area.area)
    }

    /// Runs the needs analysis over the current coverage gaps.
    ///
    /// # Errors
    ///
    /// * [`PreconditionError::CoverageGapsDisabled`] before
    ///   [`Self::enable_coverage_gaps`]
    /// * [`PreconditionError::PopulationDensityDisabled`] while the density
    ///   layer is off
    /// * [`NeedsError`] if the run was superseded or a gap is malformed
    pub async fn analyze_needs(
        &self,
        progress: &Arc<dyn ProgressCallback>,
    ) -> Result<Vec<NeedsRecord>, SessionError> {
        let gaps = self.gaps();
        let records = self.needs.run(gaps.as_deref(), progress).await?;
        Ok(records)
    }

    /// State of the latest needs analysis.
    #[must_use]
    pub fn needs_state(&self) -> RunState {
        self.needs.state()
    }

    /// Report over the committed needs records. Empty until a needs
    /// analysis completes.
    #[must_use]
    pub fn report(&self) -> Report {
        Report::new(self.needs.records())
    }

    /// Searches for new facility sites outside the area served by the
    /// facility types that count as existing coverage.
    ///
    /// # Errors
    ///
    /// * [`PreconditionError::BoundaryMissing`] without a county boundary
    /// * [`SuitabilityError`] if the underserved region cannot be derived
    pub async fn site_suitability(
        &self,
        progress: &Arc<dyn ProgressCallback>,
    ) -> Result<SuitabilityResult, SessionError> {
        let boundary = self
            .dataset
            .boundary
            .as_ref()
            .ok_or(PreconditionError::BoundaryMissing)?;

        let filter = FacilityFilter::from_config(&self.config.suitability);
        let served = self.builder.build_for_facilities(
            filter.apply(&self.dataset.facilities),
            &self.config.service_area,
        );

        let analyzer = SiteSuitabilityAnalyzer::new(
            self.geometry.clone(),
            self.density.clone(),
            self.config.density,
            self.config.suitability.clone(),
        );
        let result = analyzer
            .analyze(Some(boundary), &served, &self.dataset.wards, progress)
            .await?;

        self.lock().suitability = Some(result.clone());
        Ok(result)
    }

    /// Asks the server for its suitability search instead of running it
    /// locally.
    ///
    /// # Errors
    ///
    /// * [`SessionError::NoServer`] without a configured server
    /// * [`SessionError::Fetch`] if the request fails
    pub async fn remote_site_suitability(&self) -> Result<SuitabilityResult, SessionError> {
        let client = self.client.as_ref().ok_or(SessionError::NoServer)?;
        let result = health_access_suitability::fetch_remote(client).await?;
        self.lock().suitability = Some(result.clone());
        Ok(result)
    }

    /// Fetches the server's travel-time isochrones and the population
    /// they reach.
    ///
    /// # Errors
    ///
    /// * [`SessionError::NoServer`] without a configured server
    /// * [`SessionError::Fetch`] if the request fails
    pub async fn travel_time(&self) -> Result<TravelTimeAnalysis, SessionError> {
        let client = self.client.as_ref().ok_or(SessionError::NoServer)?;
        Ok(client.fetch_travel_time().await?)
    }
}
