//! `GeoJSON` feature → facility and ward normalization.
//!
//! Features are read leniently: numeric properties may arrive as numbers or
//! strings, and a feature that cannot become a model is logged as a
//! [`StructuralError`] and skipped rather than failing the whole layer.

use geo::MultiPolygon;
use geojson::{Feature, FeatureCollection, JsonObject};
use health_access_analysis_models::StructuralError;
use health_access_facility_models::{CensusPopulation, Coordinate, Facility, Ward};
use health_access_geometry::{check_coordinate, multipolygon_from_geometry};
use serde_json::Value;

/// Normalizes a facility feature collection.
///
/// Facilities need a name and a valid point location. The location comes
/// from a `Point` geometry, or from `longitude`/`latitude` properties when
/// the geometry is missing.
#[must_use]
pub fn normalize_facilities(collection: FeatureCollection) -> Vec<Facility> {
    let total = collection.features.len();
    let facilities: Vec<Facility> = collection
        .features
        .into_iter()
        .enumerate()
        .filter_map(|(index, feature)| match facility_from_feature(index, feature) {
            Ok(facility) => Some(facility),
            Err(e) => {
                log::warn!("Skipping facility: {e}");
                None
            }
        })
        .collect();

    log::info!("Loaded {} of {total} facilities", facilities.len());
    facilities
}

/// Normalizes a ward feature collection.
///
/// Wards need a `ward` (or `name`) property. A ward whose geometry is
/// missing or unreadable is kept with no geometry so it can still be
/// listed; the analysis skips it.
#[must_use]
pub fn normalize_wards(collection: FeatureCollection) -> Vec<Ward> {
    let total = collection.features.len();
    let wards: Vec<Ward> = collection
        .features
        .into_iter()
        .enumerate()
        .filter_map(|(index, feature)| match ward_from_feature(index, feature) {
            Ok(ward) => Some(ward),
            Err(e) => {
                log::warn!("Skipping ward: {e}");
                None
            }
        })
        .collect();

    let without_geometry = wards.iter().filter(|w| w.geometry.is_none()).count();
    log::info!(
        "Loaded {} of {total} wards ({without_geometry} without geometry)",
        wards.len()
    );
    wards
}

fn facility_from_feature(index: usize, feature: Feature) -> Result<Facility, StructuralError> {
    let item = format!("facility feature #{index}");
    let properties = feature.properties.unwrap_or_default();

    let name = string(&properties, "name")
        .ok_or_else(|| StructuralError::new(&item, "missing name"))?;
    let item = format!("facility {name:?}");

    let location = match feature.geometry.map(|g| g.value) {
        Some(geojson::Value::Point(position)) if position.len() >= 2 => {
            Coordinate::new(position[0], position[1])
        }
        Some(_) => return Err(StructuralError::new(&item, "geometry is not a point")),
        None => match (number(&properties, "longitude"), number(&properties, "latitude")) {
            (Some(longitude), Some(latitude)) => Coordinate::new(longitude, latitude),
            _ => return Err(StructuralError::new(&item, "missing location")),
        },
    };
    check_coordinate(location.longitude, location.latitude)
        .map_err(|e| StructuralError::new(&item, e.to_string()))?;

    let id = feature
        .id
        .map(|id| match id {
            geojson::feature::Id::String(s) => s,
            geojson::feature::Id::Number(n) => n.to_string(),
        })
        .or_else(|| string(&properties, "id"))
        .or_else(|| string(&properties, "pk"))
        .unwrap_or_else(|| index.to_string());

    let type_label = string(&properties, "facility_type").unwrap_or_default();

    Ok(Facility::new(id, name, type_label, location))
}

fn ward_from_feature(index: usize, feature: Feature) -> Result<Ward, StructuralError> {
    let properties = feature.properties.unwrap_or_default();

    let name = string(&properties, "ward")
        .or_else(|| string(&properties, "name"))
        .ok_or_else(|| StructuralError::new(format!("ward feature #{index}"), "missing ward name"))?;

    let census = CensusPopulation {
        pop2019: count(&properties, "pop2019"),
        pop2009: count(&properties, "pop2009"),
    };

    let geometry: Option<MultiPolygon<f64>> = match feature.geometry {
        None => {
            log::debug!("Ward {name} has no geometry");
            None
        }
        Some(geometry) => match multipolygon_from_geometry(geometry) {
            Ok(polygon) => Some(polygon),
            Err(e) => {
                log::warn!("Ward {name} geometry unusable: {e}");
                None
            }
        },
    };

    let ward = Ward::new(name, census, geometry);
    Ok(match string(&properties, "subcounty") {
        Some(subcounty) => ward.with_subcounty(subcounty),
        None => ward,
    })
}

fn string(properties: &JsonObject, key: &str) -> Option<String> {
    match properties.get(key)? {
        Value::String(s) => {
            let trimmed = s.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        }
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn number(properties: &JsonObject, key: &str) -> Option<f64> {
    let parsed = match properties.get(key)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    parsed.filter(|n| n.is_finite())
}

fn count(properties: &JsonObject, key: &str) -> Option<u64> {
    match properties.get(key)? {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(health_access_fetch::round_population)),
        Value::String(s) => s.trim().replace(',', "").parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use health_access_facility_models::FacilityType;
    use serde_json::json;

    fn collection(value: Value) -> FeatureCollection {
        match geojson::GeoJson::from_json_value(value).unwrap() {
            geojson::GeoJson::FeatureCollection(collection) => collection,
            other => panic!("expected a feature collection, got {other:?}"),
        }
    }

    #[test]
    fn facilities_from_django_geojson() {
        let facilities = normalize_facilities(collection(json!({
            "type": "FeatureCollection",
            "features": [
                {
                    "type": "Feature",
                    "properties": { "name": "Kisumu County Referral Hospital", "facility_type": "Provincial General Hospital", "capacity": 400, "pk": 14 },
                    "geometry": { "type": "Point", "coordinates": [34.7617, -0.0917] }
                },
                {
                    "type": "Feature",
                    "properties": { "name": "Kondele Clinic", "facility_type": "Medical Clinic", "longitude": "34.77", "latitude": "-0.08" },
                    "geometry": null
                },
                {
                    "type": "Feature",
                    "properties": { "facility_type": "Dispensary" },
                    "geometry": { "type": "Point", "coordinates": [34.7, -0.1] }
                },
                {
                    "type": "Feature",
                    "properties": { "name": "Nowhere", "facility_type": "Dispensary" },
                    "geometry": null
                }
            ]
        })));

        assert_eq!(facilities.len(), 2);
        assert_eq!(facilities[0].id, "14");
        assert_eq!(facilities[0].facility_type, FacilityType::Hospital);
        assert_eq!(facilities[1].facility_type, FacilityType::MedicalClinic);
        assert!((facilities[1].location.longitude - 34.77).abs() < 1e-12);
        assert_eq!(facilities[1].id, "1");
    }

    #[test]
    fn facility_outside_wgs84_is_skipped() {
        let facilities = normalize_facilities(collection(json!({
            "type": "FeatureCollection",
            "features": [{
                "type": "Feature",
                "properties": { "name": "Swapped", "facility_type": "Dispensary" },
                "geometry": { "type": "Point", "coordinates": [-0.09, 347.6] }
            }]
        })));
        assert!(facilities.is_empty());
    }

    #[test]
    fn wards_prefer_newer_census() {
        let wards = normalize_wards(collection(json!({
            "type": "FeatureCollection",
            "features": [
                {
                    "type": "Feature",
                    "properties": { "ward": "Kondele", "subcounty": "Kisumu Central", "pop2009": 31_000, "pop2019": "38,420" },
                    "geometry": { "type": "Polygon", "coordinates": [[[34.7, -0.1], [34.8, -0.1], [34.8, 0.0], [34.7, 0.0], [34.7, -0.1]]] }
                },
                {
                    "type": "Feature",
                    "properties": { "ward": "Migosi", "pop2009": 24_000 },
                    "geometry": null
                },
                {
                    "type": "Feature",
                    "properties": { "pop2009": 1 },
                    "geometry": null
                }
            ]
        })));

        assert_eq!(wards.len(), 2);
        assert_eq!(wards[0].population, Some(38_420));
        assert_eq!(wards[0].subcounty.as_deref(), Some("Kisumu Central"));
        assert!(wards[0].geometry.is_some());
        assert_eq!(wards[1].population, Some(24_000));
        assert!(wards[1].geometry.is_none());
    }

    #[test]
    fn ward_with_point_geometry_keeps_no_geometry() {
        let wards = normalize_wards(collection(json!({
            "type": "FeatureCollection",
            "features": [{
                "type": "Feature",
                "properties": { "ward": "Odd" },
                "geometry": { "type": "Point", "coordinates": [34.7, -0.1] }
            }]
        })));
        assert_eq!(wards.len(), 1);
        assert!(wards[0].geometry.is_none());
        assert_eq!(wards[0].population, None);
    }
}
