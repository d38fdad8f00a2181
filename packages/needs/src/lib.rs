#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Needs analysis.
//!
//! For every coverage gap the orchestrator samples population density over
//! the gap polygon, falls back to the offline density estimate when the sample
//! fails or times out, and blends the result with the gap's coverage score
//! into a [`NeedsRecord`].
//!
//! Runs are numbered. Starting a run (or calling
//! [`NeedsAnalysisOrchestrator::reset`]) makes every older run stale, and a
//! stale run never commits its records, however late its lookups finish.

mod progress;

use std::pin::pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::stream::{self, StreamExt as _};
use health_access_analysis_models::{
    CoverageGap, EstimateSource, NeedsRecord, PreconditionError, StructuralError,
};
use health_access_config::DensityConfig;
use health_access_density::{DensityLookup, DensitySource, SimplifiedEstimator, lookup_with_fallback};
use health_access_geometry::GeometrySource;
use health_access_scoring::{density_category, needs_score, recommendation};
use thiserror::Error;

pub use progress::{NullProgress, ProgressCallback, null_progress};

/// Why a needs analysis run produced no records.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NeedsError {
    /// A prerequisite layer is not enabled.
    #[error(transparent)]
    Precondition(#[from] PreconditionError),

    /// A newer run started (or the orchestrator was reset) before this one
    /// finished. Its results were discarded.
    #[error("Needs analysis run {generation} was superseded by run {current}")]
    Superseded {
        /// The discarded run.
        generation: u64,
        /// The run that replaced it.
        current: u64,
    },

    /// The gap set is malformed.
    #[error("Needs analysis failed after {processed} areas: {message}")]
    Failed {
        /// Gaps accepted before the malformed one.
        processed: usize,
        /// What was wrong.
        message: String,
    },
}

/// Lifecycle of the latest run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunState {
    /// No run since creation or the last reset.
    Idle,
    /// A run is looking up density samples.
    Running {
        /// Run number.
        generation: u64,
    },
    /// The run committed its records.
    Completed {
        /// Run number.
        generation: u64,
        /// Records committed.
        records: usize,
    },
    /// The run hit a malformed gap.
    Failed {
        /// Run number.
        generation: u64,
        /// Gaps accepted before the malformed one.
        processed: usize,
        /// What was wrong.
        message: String,
    },
}

struct Inner {
    state: RunState,
    records: Vec<NeedsRecord>,
}

/// Drives density lookups and scoring for a set of coverage gaps.
pub struct NeedsAnalysisOrchestrator {
    geometry: Arc<dyn GeometrySource>,
    density: Option<Arc<dyn DensitySource>>,
    estimator: SimplifiedEstimator,
    config: DensityConfig,
    density_enabled: AtomicBool,
    generation: AtomicU64,
    inner: Mutex<Inner>,
}

impl NeedsAnalysisOrchestrator {
    /// Creates an orchestrator.
    ///
    /// With no `density` source every area uses the offline estimate.
    /// The population density capability starts disabled.
    #[must_use]
    pub fn new(
        geometry: Arc<dyn GeometrySource>,
        density: Option<Arc<dyn DensitySource>>,
        config: DensityConfig,
    ) -> Self {
        Self {
            geometry,
            density,
            estimator: SimplifiedEstimator::from_config(&config),
            config,
            density_enabled: AtomicBool::new(false),
            generation: AtomicU64::new(0),
            inner: Mutex::new(Inner {
                state: RunState::Idle,
                records: Vec::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Enables or disables the population density capability.
    pub fn set_density_enabled(&self, enabled: bool) {
        self.density_enabled.store(enabled, Ordering::SeqCst);
    }

    /// Whether population density is enabled.
    #[must_use]
    pub fn density_enabled(&self) -> bool {
        self.density_enabled.load(Ordering::SeqCst)
    }

    /// State of the latest run.
    #[must_use]
    pub fn state(&self) -> RunState {
        self.lock().state.clone()
    }

    /// Records committed by the latest completed run.
    #[must_use]
    pub fn records(&self) -> Vec<NeedsRecord> {
        self.lock().records.clone()
    }

    /// Number of the latest run.
    #[must_use]
    pub fn current_generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Discards committed records and makes any in-flight run stale.
    pub fn reset(&self) {
        let mut inner = self.lock();
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        inner.state = RunState::Idle;
        inner.records.clear();
        log::debug!("Needs analysis reset (generation {generation})");
    }

    fn superseded(&self, generation: u64) -> NeedsError {
        let current = self.current_generation();
        log::info!("Discarding needs analysis run {generation}, superseded by run {current}");
        NeedsError::Superseded {
            generation,
            current,
        }
    }

    fn check_gap(&self, gap: &CoverageGap) -> Result<f64, StructuralError> {
        if gap.ward_name.trim().is_empty() {
            return Err(StructuralError::new("coverage gap", "area name is empty"));
        }
        if gap.geometry.0.is_empty() {
            return Err(StructuralError::new(&gap.ward_name, "gap geometry is empty"));
        }
        let pct = gap.uncovered_percentage;
        if !(pct > 0.0 && pct <= 100.0) {
            return Err(StructuralError::new(
                &gap.ward_name,
                format!("uncovered percentage {pct} is outside (0, 100]"),
            ));
        }
        self.geometry
            .area_km2(&gap.geometry)
            .map_err(|e| StructuralError::new(&gap.ward_name, e.to_string()))
    }

    /// Analyzes `gaps` and commits the resulting records.
    ///
    /// A gap that already carries a density sample is scored from it.
    /// Every other gap's density lookup runs concurrently with the others
    /// and is bounded by the configured timeout; a failed or slow lookup
    /// uses the offline density estimate for that gap only. Records are returned sorted
    /// by priority, highest first, ties by area name.
    ///
    /// # Errors
    ///
    /// * [`NeedsError::Precondition`] when `gaps` is `None` (the coverage
    ///   gaps layer is off) or population density is disabled
    /// * [`NeedsError::Failed`] when a gap is malformed
    /// * [`NeedsError::Superseded`] when a newer run started first
    pub async fn run(
        &self,
        gaps: Option<&[CoverageGap]>,
        progress: &Arc<dyn ProgressCallback>,
    ) -> Result<Vec<NeedsRecord>, NeedsError> {
        let gaps = gaps.ok_or(PreconditionError::CoverageGapsDisabled)?;
        if !self.density_enabled() {
            return Err(PreconditionError::PopulationDensityDisabled.into());
        }

        let generation = {
            let mut inner = self.lock();
            let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
            inner.state = RunState::Running { generation };
            generation
        };
        log::info!("Needs analysis run {generation} over {} areas", gaps.len());

        let mut prepared = Vec::with_capacity(gaps.len());
        for (processed, gap) in gaps.iter().enumerate() {
            match self.check_gap(gap) {
                Ok(area_km2) => prepared.push((gap, area_km2)),
                Err(e) => {
                    let message = e.to_string();
                    log::error!("Needs analysis run {generation} failed: {message}");
                    let mut inner = self.lock();
                    if self.current_generation() == generation {
                        inner.state = RunState::Failed {
                            generation,
                            processed,
                            message: message.clone(),
                        };
                    }
                    return Err(NeedsError::Failed { processed, message });
                }
            }
        }

        let total = prepared.len();
        progress.set_total(total as u64);

        let timeout = self.config.lookup_timeout();
        let source = self.density.as_ref();
        let estimator = self.estimator;
        let mut lookups = pin!(
            stream::iter(prepared.into_iter().map(|(gap, area_km2)| async move {
                let lookup = match &gap.density_sample {
                    Some(sample) => DensityLookup {
                        sample: sample.clone(),
                        source: EstimateSource::DensityService,
                    },
                    None => {
                        lookup_with_fallback(source, estimator, &gap.geometry, area_km2, timeout)
                            .await
                    }
                };
                needs_record(gap, area_km2, lookup)
            }))
            .buffer_unordered(self.config.max_concurrent_lookups.max(1))
        );

        let mut records = Vec::with_capacity(total);
        while let Some(record) = lookups.next().await {
            if self.current_generation() != generation {
                return Err(self.superseded(generation));
            }
            records.push(record);
            progress.inc(1);
            progress.set_message(format!("Analyzing area {} of {total}", records.len()));
        }

        sort_records(&mut records);

        {
            let mut inner = self.lock();
            if self.current_generation() != generation {
                drop(inner);
                return Err(self.superseded(generation));
            }
            inner.records.clone_from(&records);
            inner.state = RunState::Completed {
                generation,
                records: records.len(),
            };
        }

        progress.finish(format!("Analyzed {} areas", records.len()));
        log::info!("Needs analysis run {generation} committed {} records", records.len());
        Ok(records)
    }
}

/// Scores one gap from its density lookup.
#[must_use]
pub fn needs_record(gap: &CoverageGap, area_km2: f64, lookup: DensityLookup) -> NeedsRecord {
    let sample = lookup.sample;
    let category = density_category(sample.mean_density, sample.percentiles.as_ref());
    let priority_score = needs_score(
        gap.coverage_priority_score,
        Some(category),
        sample.estimated_population,
    );

    NeedsRecord {
        area_name: gap.ward_name.clone(),
        priority_score,
        recommendation: recommendation(priority_score),
        estimated_population: sample.estimated_population,
        population_density: sample.mean_density,
        density_category: category,
        uncovered_percentage: gap.uncovered_percentage,
        area_km2,
        density_source: lookup.source,
    }
}

/// Sorts by priority, highest first, ties by area name.
pub fn sort_records(records: &mut [NeedsRecord]) {
    records.sort_by(|a, b| {
        b.priority_score
            .cmp(&a.priority_score)
            .then_with(|| a.area_name.cmp(&b.area_name))
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use async_trait::async_trait;
    use geo::{MultiPolygon, Rect, coord};
    use health_access_analysis_models::{DensityCategory, PopulationDensitySample, Recommendation};
    use health_access_fetch::FetchFailure;
    use health_access_geometry::SphericalEngine;

    #[derive(Clone, Copy)]
    enum Outcome {
        Sample { mean: f64, population: u64 },
        Fail,
        Hang,
    }

    /// Answers by the west edge of the sampled polygon.
    struct FakeSource {
        answers: Vec<(f64, Duration, Outcome)>,
    }

    #[async_trait]
    impl DensitySource for FakeSource {
        async fn sample(
            &self,
            area: &MultiPolygon<f64>,
        ) -> Result<PopulationDensitySample, FetchFailure> {
            let west = area.0[0]
                .exterior()
                .coords()
                .map(|c| c.x)
                .fold(f64::INFINITY, f64::min);
            let Some(&(_, delay, outcome)) = self
                .answers
                .iter()
                .find(|(x, _, _)| (x - west).abs() < 1e-9)
            else {
                return Err(FetchFailure::NotConfigured);
            };

            tokio::time::sleep(delay).await;
            match outcome {
                Outcome::Sample { mean, population } => Ok(PopulationDensitySample {
                    mean_density: mean,
                    min_density: 0.0,
                    max_density: mean * 3.0,
                    median_density: mean,
                    percentiles: None,
                    area_km2: 30.0,
                    estimated_population: population,
                    year: 2020,
                }),
                Outcome::Fail => Err(FetchFailure::Status { status: 500 }),
                Outcome::Hang => {
                    tokio::time::sleep(Duration::from_secs(3_600)).await;
                    Err(FetchFailure::NotConfigured)
                }
            }
        }
    }

    fn gap(name: &str, west: f64, score: u8) -> CoverageGap {
        CoverageGap {
            ward_name: name.to_string(),
            geometry: MultiPolygon::new(vec![
                Rect::new(coord! { x: west, y: -0.1 }, coord! { x: west + 0.05, y: -0.05 })
                    .to_polygon(),
            ]),
            uncovered_percentage: 90.0,
            estimated_population_affected: 10_000,
            population_source: EstimateSource::Heuristic,
            density_sample: None,
            ward_population: Some(12_000),
            coverage_priority_score: score,
        }
    }

    fn orchestrator(answers: Vec<(f64, Duration, Outcome)>) -> NeedsAnalysisOrchestrator {
        let orchestrator = NeedsAnalysisOrchestrator::new(
            Arc::new(SphericalEngine::new()),
            Some(Arc::new(FakeSource { answers })),
            DensityConfig {
                fallback_density_per_km2: 500.0,
                lookup_timeout_secs: 10,
                max_concurrent_lookups: 4,
                estimate_bounds: None,
            },
        );
        orchestrator.set_density_enabled(true);
        orchestrator
    }

    fn secs(n: u64) -> Duration {
        Duration::from_secs(n)
    }

    fn names(records: &[NeedsRecord]) -> Vec<&str> {
        records.iter().map(|r| r.area_name.as_str()).collect()
    }

    #[tokio::test]
    async fn preconditions_are_checked_first() {
        let orchestrator = orchestrator(vec![]);
        let progress = null_progress();

        assert_eq!(
            orchestrator.run(None, &progress).await,
            Err(NeedsError::Precondition(PreconditionError::CoverageGapsDisabled))
        );

        orchestrator.set_density_enabled(false);
        assert_eq!(
            orchestrator.run(Some(&[]), &progress).await,
            Err(NeedsError::Precondition(PreconditionError::PopulationDensityDisabled))
        );
        assert_eq!(orchestrator.state(), RunState::Idle);
        assert_eq!(orchestrator.current_generation(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn records_are_scored_and_sorted() {
        let orchestrator = orchestrator(vec![
            (34.0, secs(3), Outcome::Sample { mean: 900.0, population: 7_500 }),
            (34.1, secs(1), Outcome::Sample { mean: 50.0, population: 500 }),
            (34.2, secs(2), Outcome::Sample { mean: 2_000.0, population: 40_000 }),
        ]);
        let gaps = [gap("Kolwa", 34.0, 76), gap("Kanyakwar", 34.1, 30), gap("Kondele", 34.2, 90)];

        let records = orchestrator.run(Some(&gaps), &null_progress()).await.unwrap();
        assert_eq!(names(&records), ["Kondele", "Kolwa", "Kanyakwar"]);

        let kolwa = &records[1];
        assert_eq!(kolwa.density_category, DensityCategory::High);
        assert_eq!(kolwa.priority_score, 72);
        assert_eq!(kolwa.recommendation, Recommendation::Moderate);
        assert_eq!(kolwa.density_source, EstimateSource::DensityService);
        assert!((kolwa.uncovered_percentage - 90.0).abs() < f64::EPSILON);

        assert_eq!(orchestrator.records(), records);
        assert_eq!(
            orchestrator.state(),
            RunState::Completed { generation: 1, records: 3 }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn failed_and_slow_lookups_fall_back_per_gap() {
        let orchestrator = orchestrator(vec![
            (34.0, secs(0), Outcome::Fail),
            (34.1, secs(0), Outcome::Hang),
            (34.2, secs(1), Outcome::Sample { mean: 600.0, population: 12_000 }),
        ]);
        let gaps = [gap("A", 34.0, 50), gap("B", 34.1, 50), gap("C", 34.2, 50)];

        let records = orchestrator.run(Some(&gaps), &null_progress()).await.unwrap();
        assert_eq!(records.len(), 3);

        for record in records.iter().filter(|r| r.area_name != "C") {
            assert_eq!(record.density_source, EstimateSource::Heuristic);
            // Gaps above 20 km² get the 0.5 large-area factor.
            assert!(record.area_km2 > 20.0);
            assert_eq!(record.density_category, DensityCategory::Medium);
            assert!((record.population_density - 250.0).abs() < 1e-9);
            let expected = (record.area_km2 * 250.0).round();
            assert!((record.estimated_population as f64 - expected).abs() < 1.0);
        }

        let c = records.iter().find(|r| r.area_name == "C").unwrap();
        assert_eq!(c.density_source, EstimateSource::DensityService);
        assert_eq!(c.estimated_population, 12_000);
    }

    #[tokio::test]
    async fn gaps_with_a_sample_skip_the_lookup() {
        // The source knows no polygon, so any lookup would fall back.
        let orchestrator = orchestrator(vec![]);
        let mut sampled = gap("Sampled", 34.0, 76);
        sampled.density_sample = Some(PopulationDensitySample {
            mean_density: 900.0,
            min_density: 0.0,
            max_density: 2_700.0,
            median_density: 900.0,
            percentiles: None,
            area_km2: 30.0,
            estimated_population: 7_500,
            year: 2020,
        });

        let records = orchestrator
            .run(Some(&[sampled, gap("Unsampled", 34.1, 76)]), &null_progress())
            .await
            .unwrap();

        let sampled = records.iter().find(|r| r.area_name == "Sampled").unwrap();
        assert_eq!(sampled.density_source, EstimateSource::DensityService);
        assert_eq!(sampled.estimated_population, 7_500);
        assert_eq!(sampled.density_category, DensityCategory::High);
        assert_eq!(sampled.priority_score, 72);

        let unsampled = records.iter().find(|r| r.area_name == "Unsampled").unwrap();
        assert_eq!(unsampled.density_source, EstimateSource::Heuristic);
    }

    #[tokio::test(start_paused = true)]
    async fn newer_run_discards_slow_older_run() {
        let orchestrator = orchestrator(vec![
            (34.0, secs(5), Outcome::Sample { mean: 900.0, population: 9_000 }),
            (34.5, secs(1), Outcome::Sample { mean: 300.0, population: 3_000 }),
        ]);
        let first = [gap("Old", 34.0, 80)];
        let second = [gap("New", 34.5, 40)];
        let progress = null_progress();

        let (old, new) = tokio::join!(orchestrator.run(Some(&first), &progress), async {
            tokio::time::sleep(secs(1)).await;
            orchestrator.run(Some(&second), &progress).await
        });

        assert_eq!(old, Err(NeedsError::Superseded { generation: 1, current: 2 }));
        assert_eq!(names(&new.unwrap()), ["New"]);
        assert_eq!(names(&orchestrator.records()), ["New"]);
    }

    #[tokio::test(start_paused = true)]
    async fn older_run_finishing_first_is_still_discarded() {
        let orchestrator = orchestrator(vec![
            (34.0, secs(1), Outcome::Sample { mean: 900.0, population: 9_000 }),
            (34.5, secs(3), Outcome::Sample { mean: 300.0, population: 3_000 }),
        ]);
        let first = [gap("Old", 34.0, 80)];
        let second = [gap("New", 34.5, 40)];
        let progress = null_progress();

        let (old, new) = tokio::join!(orchestrator.run(Some(&first), &progress), async {
            tokio::time::sleep(Duration::from_millis(500)).await;
            orchestrator.run(Some(&second), &progress).await
        });

        assert!(matches!(old, Err(NeedsError::Superseded { generation: 1, .. })));
        assert!(new.is_ok());
        assert_eq!(names(&orchestrator.records()), ["New"]);
    }

    #[tokio::test(start_paused = true)]
    async fn reset_invalidates_in_flight_run() {
        let orchestrator = orchestrator(vec![(34.0, secs(2), Outcome::Sample {
            mean: 900.0,
            population: 9_000,
        })]);
        let gaps = [gap("A", 34.0, 80)];
        let progress = null_progress();

        let (result, ()) = tokio::join!(orchestrator.run(Some(&gaps), &progress), async {
            tokio::time::sleep(secs(1)).await;
            orchestrator.reset();
        });

        assert!(matches!(result, Err(NeedsError::Superseded { .. })));
        assert!(orchestrator.records().is_empty());
        assert_eq!(orchestrator.state(), RunState::Idle);
    }

    #[tokio::test]
    async fn malformed_gap_fails_and_keeps_previous_records() {
        let orchestrator = orchestrator(vec![(34.0, secs(0), Outcome::Sample {
            mean: 900.0,
            population: 9_000,
        })]);
        let progress = null_progress();
        let good = [gap("A", 34.0, 80)];
        orchestrator.run(Some(&good), &progress).await.unwrap();

        let mut nameless = gap("B", 34.0, 80);
        nameless.ward_name = "  ".to_string();
        let mut out_of_range = gap("C", 34.0, 80);
        out_of_range.uncovered_percentage = 140.0;

        let result = orchestrator
            .run(Some(&[gap("A", 34.0, 80), nameless]), &progress)
            .await;
        assert!(matches!(result, Err(NeedsError::Failed { processed: 1, .. })));
        assert!(matches!(
            orchestrator.state(),
            RunState::Failed { generation: 2, processed: 1, .. }
        ));
        assert_eq!(names(&orchestrator.records()), ["A"]);

        let result = orchestrator.run(Some(&[out_of_range]), &progress).await;
        assert!(matches!(result, Err(NeedsError::Failed { processed: 0, .. })));
    }

    #[test]
    fn ties_sort_by_name() {
        let record = |name: &str, score: u8| NeedsRecord {
            area_name: name.to_string(),
            priority_score: score,
            recommendation: recommendation(score),
            estimated_population: 0,
            population_density: 0.0,
            density_category: DensityCategory::Low,
            uncovered_percentage: 50.0,
            area_km2: 1.0,
            density_source: EstimateSource::Heuristic,
        };
        let mut records = vec![record("Nyalenda B", 60), record("Manyatta B", 60), record("Kajulu", 91)];
        sort_records(&mut records);
        assert_eq!(names(&records), ["Kajulu", "Manyatta B", "Nyalenda B"]);
    }
}
