#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Report aggregation.
//!
//! Reduces needs analysis records to the summary figures and priority
//! listings the report renderer shows. Everything here is pure; an empty
//! record set gives an all-zero summary.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use health_access_analysis_models::{NeedsRecord, Recommendation, ReportSummary};
use serde::Serialize;

/// Summarizes `records`.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn summarize(records: &[NeedsRecord]) -> ReportSummary {
    let mut band_counts: BTreeMap<Recommendation, u64> =
        Recommendation::ALL.iter().map(|band| (*band, 0)).collect();

    let mut total_estimated_population = 0_u64;
    let mut total_area_km2 = 0.0;
    let mut score_sum = 0_u64;

    for record in records {
        *band_counts.entry(record.recommendation).or_default() += 1;
        total_estimated_population =
            total_estimated_population.saturating_add(record.estimated_population);
        total_area_km2 += record.area_km2;
        score_sum += u64::from(record.priority_score);
    }

    let area_count = records.len() as u64;
    let mean_priority_score = if area_count == 0 {
        0.0
    } else {
        score_sum as f64 / area_count as f64
    };

    ReportSummary {
        area_count,
        band_counts,
        total_estimated_population,
        total_area_km2,
        mean_priority_score,
    }
}

/// Area names per recommendation band, highest score first within a band.
///
/// Only bands with at least one area appear.
#[must_use]
pub fn priority_groups(records: &[NeedsRecord]) -> BTreeMap<Recommendation, Vec<String>> {
    let mut ranked: Vec<&NeedsRecord> = records.iter().collect();
    ranked.sort_by(|a, b| {
        b.priority_score
            .cmp(&a.priority_score)
            .then_with(|| a.area_name.cmp(&b.area_name))
    });

    let mut groups: BTreeMap<Recommendation, Vec<String>> = BTreeMap::new();
    for record in ranked {
        groups
            .entry(record.recommendation)
            .or_default()
            .push(record.area_name.clone());
    }
    groups
}

/// Everything the report renderer needs.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Report {
    /// When the report was assembled.
    pub generated_at: DateTime<Utc>,
    /// Summary figures.
    pub summary: ReportSummary,
    /// Area names per band.
    pub priority_groups: BTreeMap<Recommendation, Vec<String>>,
    /// All records, highest priority first.
    pub records: Vec<NeedsRecord>,
}

impl Report {
    /// Assembles a report stamped with the current time.
    #[must_use]
    pub fn new(records: Vec<NeedsRecord>) -> Self {
        Self::generated_at(records, Utc::now())
    }

    /// Assembles a report with an explicit timestamp.
    #[must_use]
    pub fn generated_at(mut records: Vec<NeedsRecord>, generated_at: DateTime<Utc>) -> Self {
        records.sort_by(|a, b| {
            b.priority_score
                .cmp(&a.priority_score)
                .then_with(|| a.area_name.cmp(&b.area_name))
        });
        Self {
            generated_at,
            summary: summarize(&records),
            priority_groups: priority_groups(&records),
            records,
        }
    }

    /// Records in the bands that call for action (critical to moderate).
    pub fn action_areas(&self) -> impl Iterator<Item = &NeedsRecord> {
        self.records.iter().filter(|record| {
            matches!(
                record.recommendation,
                Recommendation::Critical | Recommendation::High | Recommendation::Moderate
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone as _;
    use health_access_analysis_models::{DensityCategory, EstimateSource};

    fn record(name: &str, score: u8, recommendation: Recommendation, population: u64, area_km2: f64) -> NeedsRecord {
        NeedsRecord {
            area_name: name.to_string(),
            priority_score: score,
            recommendation,
            estimated_population: population,
            population_density: 400.0,
            density_category: DensityCategory::Medium,
            uncovered_percentage: 75.0,
            area_km2,
            density_source: EstimateSource::DensityService,
        }
    }

    fn sample() -> Vec<NeedsRecord> {
        vec![
            record("Nyalenda A", 62, Recommendation::Moderate, 8_000, 4.5),
            record("Kolwa East", 93, Recommendation::Critical, 21_000, 12.0),
            record("Miwani", 78, Recommendation::High, 15_500, 30.25),
            record("Chemelil", 91, Recommendation::Critical, 18_000, 22.0),
            record("Kisumu North", 30, Recommendation::VeryLow, 600, 1.25),
        ]
    }

    #[test]
    fn empty_summary_is_all_zero() {
        let summary = summarize(&[]);
        assert_eq!(summary.area_count, 0);
        assert_eq!(summary.total_estimated_population, 0);
        assert!(summary.total_area_km2.abs() < f64::EPSILON);
        assert!(summary.mean_priority_score.abs() < f64::EPSILON);
        for band in Recommendation::ALL {
            assert_eq!(summary.band_counts.get(band), Some(&0));
        }
    }

    #[test]
    fn summary_counts_and_totals() {
        let summary = summarize(&sample());
        assert_eq!(summary.area_count, 5);
        assert_eq!(summary.count(Recommendation::Critical), 2);
        assert_eq!(summary.count(Recommendation::High), 1);
        assert_eq!(summary.count(Recommendation::Low), 0);
        assert_eq!(summary.total_estimated_population, 63_100);
        assert!((summary.total_area_km2 - 70.0).abs() < 1e-9);
        assert!((summary.mean_priority_score - 70.8).abs() < 1e-9);
    }

    #[test]
    fn groups_are_ranked_within_band() {
        let groups = priority_groups(&sample());
        assert_eq!(groups[&Recommendation::Critical], ["Kolwa East", "Chemelil"]);
        assert_eq!(groups[&Recommendation::High], ["Miwani"]);
        assert!(!groups.contains_key(&Recommendation::Low));
    }

    #[test]
    fn report_sorts_records_and_serializes() {
        let at = Utc.with_ymd_and_hms(2025, 3, 14, 9, 30, 0).unwrap();
        let report = Report::generated_at(sample(), at);

        let names: Vec<&str> = report.records.iter().map(|r| r.area_name.as_str()).collect();
        assert_eq!(names, ["Kolwa East", "Chemelil", "Miwani", "Nyalenda A", "Kisumu North"]);
        assert_eq!(report.action_areas().count(), 4);

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["generatedAt"], "2025-03-14T09:30:00Z");
        assert_eq!(json["summary"]["areaCount"], 5);
        assert_eq!(json["priorityGroups"]["critical"][0], "Kolwa East");
    }
}
