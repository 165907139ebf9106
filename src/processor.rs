use crate::feed::{DecodedFeed, TripRef, epoch_to_instant};
use crate::static_data::ScheduleStore;
use chrono::{DateTime, Utc};
use compact_str::CompactString;
use serde::Serialize;
use std::collections::HashMap;

/// Route id / route short name for a vehicle we cannot resolve.
pub const MISSING: &str = "N/D";
/// Headsign for a vehicle whose trip is unknown.
pub const MISSING_HEADSIGN: &str = "Destinazione N/D";

#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct VehicleSnapshot {
    pub id: CompactString,
    pub label: Option<String>,
    pub trip_id: Option<CompactString>,
    pub route_id: CompactString,
    pub route_name: CompactString,
    pub headsign: String,
    pub lat: f32,
    pub lon: f32,
    pub bearing: Option<f32>,
    /// Seconds since epoch: the vehicle's own timestamp, else the feed's.
    pub timestamp: Option<u64>,
    pub shape_id: Option<CompactString>,
}

#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct ArrivalPrediction {
    pub stop_id: CompactString,
    pub trip_id: Option<CompactString>,
    pub route_id: Option<CompactString>,
    /// `None` when the update carries no arrival time.
    pub arrival: Option<DateTime<Utc>>,
}

/// Stop id -> predictions at that stop, unordered.
pub type PredictionMap = HashMap<CompactString, Vec<ArrivalPrediction>>;

/// Attach schedule identities to every entity that carries a positioned
/// vehicle. Unresolvable trips and routes become sentinels, never errors.
pub fn fuse_vehicles(feed: &DecodedFeed, schedule: &ScheduleStore) -> Vec<VehicleSnapshot> {
    feed.entities
        .iter()
        .filter_map(|entity| {
            let vp = entity.vehicle.as_ref()?;
            let position = vp.position?;

            let trip_ref = vp.trip.as_ref();
            let trip = schedule.trip(trip_ref.and_then(|t| t.trip_id.as_deref()));
            let route_id = resolve_route_id(trip_ref, schedule);
            let route_name = schedule.route_short_name(route_id.as_deref());

            Some(VehicleSnapshot {
                id: CompactString::from(entity.id.as_str()),
                label: vp.label.clone().or_else(|| vp.vehicle_id.clone()),
                trip_id: trip_ref
                    .and_then(|t| t.trip_id.as_deref())
                    .map(CompactString::from),
                route_name: CompactString::from(route_name.unwrap_or(MISSING)),
                route_id: route_id.unwrap_or_else(|| CompactString::from(MISSING)),
                headsign: trip
                    .and_then(|t| t.headsign.clone())
                    .unwrap_or_else(|| MISSING_HEADSIGN.to_string()),
                lat: position.latitude,
                lon: position.longitude,
                bearing: position.bearing,
                timestamp: vp.timestamp.or(feed.header.timestamp),
                shape_id: trip.and_then(|t| t.shape_id.clone()),
            })
        })
        .collect()
}

/// Group every stop-time update with a stop id under that stop. Updates
/// without an arrival time are kept with `arrival: None`.
pub fn fuse_predictions(feed: &DecodedFeed, schedule: &ScheduleStore) -> PredictionMap {
    let mut predictions = PredictionMap::new();

    for entity in &feed.entities {
        let Some(tu) = &entity.trip_update else {
            continue;
        };
        let trip_id = tu.trip.trip_id.as_deref().map(CompactString::from);
        let route_id = resolve_route_id(Some(&tu.trip), schedule);

        for stu in &tu.stop_time_updates {
            let Some(stop_id) = &stu.stop_id else {
                continue;
            };
            predictions
                .entry(CompactString::from(stop_id.as_str()))
                .or_default()
                .push(ArrivalPrediction {
                    stop_id: CompactString::from(stop_id.as_str()),
                    trip_id: trip_id.clone(),
                    route_id: route_id.clone(),
                    arrival: stu.arrival_time.and_then(epoch_to_instant),
                });
        }
    }

    predictions
}

// The descriptor's route id wins; otherwise fall back to the scheduled trip's route.
fn resolve_route_id(trip_ref: Option<&TripRef>, schedule: &ScheduleStore) -> Option<CompactString> {
    let trip_ref = trip_ref?;
    if let Some(route_id) = &trip_ref.route_id {
        return Some(CompactString::from(route_id.as_str()));
    }
    schedule
        .trip(trip_ref.trip_id.as_deref())
        .and_then(|t| t.route_id.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::decode_feed;
    use crate::feed::tests::{encode, header, trip_update_entity, vehicle_entity};
    use crate::static_data::tests::sample_store;

    #[test]
    fn test_fuse_vehicles_resolves_schedule() {
        let schedule = sample_store();
        let buf = encode(
            header(Some(1_000)),
            vec![
                vehicle_entity("v1", Some("T42A"), Some("R42"), Some((41.9, 12.5)), Some(990)),
                vehicle_entity("v2", Some("T2A"), None, Some((41.8, 12.4)), None),
            ],
        );
        let vehicles = fuse_vehicles(&decode_feed(&buf).unwrap(), &schedule);

        assert_eq!(vehicles.len(), 2);
        assert_eq!(vehicles[0].route_name, "42");
        assert_eq!(vehicles[0].headsign, "Termini");
        assert_eq!(vehicles[0].shape_id.as_deref(), Some("SH42"));
        assert_eq!(vehicles[0].timestamp, Some(990), "vehicle timestamp wins");

        assert_eq!(vehicles[1].route_id, "R2", "route taken from scheduled trip");
        assert_eq!(vehicles[1].route_name, "2");
        assert_eq!(vehicles[1].timestamp, Some(1_000), "falls back to header");
    }

    #[test]
    fn test_coordinates_serialize_as_sent() {
        let schedule = sample_store();
        let buf = encode(
            header(None),
            vec![vehicle_entity("v1", Some("T42A"), None, Some((41.9, 12.5)), None)],
        );
        let vehicles = fuse_vehicles(&decode_feed(&buf).unwrap(), &schedule);

        let json = serde_json::to_string(&vehicles[0]).unwrap();
        assert!(json.contains("\"lat\":41.9,"), "{json}");
        assert!(json.contains("\"lon\":12.5,"), "{json}");
    }

    #[test]
    fn test_unknown_trip_kept_with_sentinels() {
        let schedule = sample_store();
        let buf = encode(
            header(None),
            vec![
                vehicle_entity("ghost", Some("NOPE"), None, Some((1.0, 1.0)), None),
                vehicle_entity("known-route", Some("NOPE"), Some("R12"), Some((1.0, 1.0)), None),
            ],
        );
        let vehicles = fuse_vehicles(&decode_feed(&buf).unwrap(), &schedule);

        assert_eq!(vehicles.len(), 2, "unresolved vehicles are not dropped");
        assert_eq!(vehicles[0].route_id, MISSING);
        assert_eq!(vehicles[0].route_name, MISSING);
        assert_eq!(vehicles[0].headsign, MISSING_HEADSIGN);
        assert_eq!(vehicles[0].shape_id, None);
        assert_eq!(vehicles[0].timestamp, None);

        assert_eq!(vehicles[1].route_name, "12");
        assert_eq!(vehicles[1].headsign, MISSING_HEADSIGN);
    }

    #[test]
    fn test_vehicles_without_position_are_skipped() {
        let schedule = sample_store();
        let buf = encode(
            header(None),
            vec![
                vehicle_entity("nopos", Some("T42A"), None, None, None),
                trip_update_entity("tu", Some("T42A"), None, &[(Some("S1"), Some(5))]),
            ],
        );
        assert!(fuse_vehicles(&decode_feed(&buf).unwrap(), &schedule).is_empty());
    }

    #[test]
    fn test_fuse_predictions_groups_by_stop() {
        let schedule = sample_store();
        let buf = encode(
            header(None),
            vec![
                trip_update_entity(
                    "a",
                    Some("T42A"),
                    Some("R42"),
                    &[(Some("S1"), Some(1_700_000_000)), (Some("S2"), None), (None, Some(5))],
                ),
                trip_update_entity("b", Some("T2A"), None, &[(Some("S2"), Some(1_700_000_300))]),
            ],
        );
        let predictions = fuse_predictions(&decode_feed(&buf).unwrap(), &schedule);

        assert_eq!(predictions.len(), 2);
        assert_eq!(predictions["S1"].len(), 1);
        assert_eq!(
            predictions["S1"][0].arrival.map(|t| t.timestamp()),
            Some(1_700_000_000)
        );

        let at_s2 = &predictions["S2"];
        assert_eq!(at_s2.len(), 2);
        assert!(
            at_s2.iter().any(|p| p.arrival.is_none() && p.route_id.as_deref() == Some("R42")),
            "predictions without a time are kept"
        );
        assert!(at_s2.iter().any(|p| p.route_id.as_deref() == Some("R2")));
    }
}
