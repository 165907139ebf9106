//! Pure queries over the schedule indices and the latest fused snapshot.
//!
//! Nothing here mutates state or fails: unknown ids and empty indices simply
//! produce empty results.

use crate::processor::{PredictionMap, VehicleSnapshot};
use crate::static_data::{ScheduleStore, ShapePoint, Stop};
use chrono::{DateTime, Utc};
use compact_str::CompactString;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

/// Predictions at or beyond this many minutes out do not count as an estimate.
pub const ARRIVAL_HORIZON_MINUTES: i64 = 60;

/// Geographic rectangle, inclusive on every edge.
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq)]
pub struct Bounds {
    pub south: f64,
    pub west: f64,
    pub north: f64,
    pub east: f64,
}

impl Bounds {
    pub fn contains(&self, lat: f64, lon: f64) -> bool {
        lat >= self.south && lat <= self.north && lon >= self.west && lon <= self.east
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum StopQuery<'a> {
    Viewport(Bounds),
    Route(&'a str),
    All,
}

impl<'a> StopQuery<'a> {
    /// Viewport mode wins when bounds are given, then a non-empty filter
    /// selects route mode.
    pub fn new(viewport: Option<Bounds>, filter: &'a str) -> Self {
        let filter = filter.trim();
        match viewport {
            Some(bounds) => StopQuery::Viewport(bounds),
            None if !filter.is_empty() => StopQuery::Route(filter),
            None => StopQuery::All,
        }
    }
}

/// One line serving a stop, as shown in the stop popup.
#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct LineArrival {
    pub route_name: CompactString,
    /// Minutes until the soonest arrival within the horizon. 0 means "now".
    pub minutes: Option<i64>,
    pub destination: Option<String>,
}

#[derive(Clone, Debug, Serialize)]
pub struct RouteShape<'a> {
    pub shape_id: CompactString,
    pub points: &'a [ShapePoint],
}

pub fn vehicles_by_route<'a>(vehicles: &'a [VehicleSnapshot], filter: &str) -> Vec<&'a VehicleSnapshot> {
    let filter = filter.trim();
    if filter.is_empty() {
        return vehicles.iter().collect();
    }
    vehicles
        .iter()
        .filter(|v| route_name_eq(&v.route_name, filter))
        .collect()
}

pub fn stops_for<'a>(schedule: &'a ScheduleStore, query: StopQuery<'_>) -> Vec<&'a Stop> {
    match query {
        StopQuery::Viewport(bounds) => schedule
            .stops
            .values()
            .filter(|s| bounds.contains(s.lat, s.lon))
            .collect(),
        StopQuery::Route(filter) => match route_stop_set(schedule, filter) {
            Some(ids) => schedule
                .stops
                .values()
                .filter(|s| ids.contains(&s.id))
                .collect(),
            None => Vec::new(),
        },
        StopQuery::All => schedule.stops.values().collect(),
    }
}

/// Lines serving `stop_id` with their soonest estimate and destination,
/// timed lines first (soonest first), then the rest in natural name order.
pub fn arrivals_and_lines_for_stop(
    schedule: &ScheduleStore,
    predictions: &PredictionMap,
    stop_id: &str,
    now: DateTime<Utc>,
) -> Vec<LineArrival> {
    let lines: Vec<&CompactString> = schedule
        .route_stops
        .iter()
        .filter(|(_, ids)| ids.contains(stop_id))
        .map(|(name, _)| name)
        .collect();

    // folded route label -> (minutes, headsign of that prediction's trip)
    let mut soonest: HashMap<String, (i64, Option<&str>)> = HashMap::new();
    // folded route label -> any live headsign
    let mut live_headsign: HashMap<String, &str> = HashMap::new();

    for prediction in predictions.get(stop_id).into_iter().flatten() {
        let Some(route_id) = prediction.route_id.as_deref() else {
            continue;
        };
        let label = fold(
            schedule
                .route_short_name(Some(route_id))
                .unwrap_or(route_id),
        );
        let headsign = schedule
            .trip(prediction.trip_id.as_deref())
            .and_then(|t| t.headsign.as_deref());
        if let Some(h) = headsign {
            live_headsign.entry(label.clone()).or_insert(h);
        }

        let Some(arrival) = prediction.arrival else {
            continue;
        };
        let minutes = minutes_until(arrival, now);
        if !(0..ARRIVAL_HORIZON_MINUTES).contains(&minutes) {
            continue;
        }
        if soonest.get(&label).is_none_or(|(best, _)| minutes < *best) {
            soonest.insert(label, (minutes, headsign));
        }
    }

    let mut result: Vec<LineArrival> = lines
        .into_iter()
        .map(|name| {
            let key = fold(name);
            let estimate = soonest.get(&key);
            let destination = estimate
                .and_then(|(_, h)| *h)
                .or_else(|| live_headsign.get(&key).copied())
                .map(str::to_string)
                .or_else(|| route_destination(schedule, name).cloned());
            LineArrival {
                route_name: name.clone(),
                minutes: estimate.map(|(m, _)| *m),
                destination,
            }
        })
        .collect();

    result.sort_by(|a, b| match (a.minutes, b.minutes) {
        (Some(x), Some(y)) => x
            .cmp(&y)
            .then_with(|| natural_cmp(&a.route_name, &b.route_name)),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => natural_cmp(&a.route_name, &b.route_name),
    });
    result
}

/// Case-insensitive prefix search over the selectable route names.
pub fn autocomplete<'a>(schedule: &'a ScheduleStore, prefix: &str, limit: usize) -> Vec<&'a str> {
    let prefix = fold(prefix.trim());
    if prefix.is_empty() {
        return Vec::new();
    }
    schedule
        .route_names
        .iter()
        .filter(|name| fold(name).starts_with(&prefix))
        .take(limit)
        .map(|name| name.as_str())
        .collect()
}

/// Polylines for the distinct shapes of `vehicles`, in first-seen order.
pub fn shapes_for_vehicles<'a>(
    schedule: &'a ScheduleStore,
    vehicles: &[&VehicleSnapshot],
) -> Vec<RouteShape<'a>> {
    let mut seen = HashSet::new();
    vehicles
        .iter()
        .filter_map(|v| v.shape_id.as_ref())
        .filter(|id| seen.insert(id.as_str()))
        .filter_map(|id| {
            let points = schedule.shape(id)?;
            (!points.is_empty()).then(|| RouteShape {
                shape_id: id.clone(),
                points,
            })
        })
        .collect()
}

/// Whole minutes from `now` to `arrival`, halves rounded up.
pub fn minutes_until(arrival: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    let millis = (arrival - now).num_milliseconds() as f64;
    (millis / 60_000.0 + 0.5).floor() as i64
}

pub fn route_name_eq(a: &str, b: &str) -> bool {
    a.chars()
        .flat_map(char::to_uppercase)
        .eq(b.chars().flat_map(char::to_uppercase))
}

fn fold(name: &str) -> String {
    name.to_uppercase()
}

fn route_stop_set<'a>(schedule: &'a ScheduleStore, filter: &str) -> Option<&'a HashSet<CompactString>> {
    schedule.route_stops.get(filter).or_else(|| {
        schedule
            .route_stops
            .iter()
            .find(|(name, _)| route_name_eq(name, filter))
            .map(|(_, ids)| ids)
    })
}

fn route_destination<'a>(schedule: &'a ScheduleStore, name: &str) -> Option<&'a String> {
    schedule.route_destinations.get(name).or_else(|| {
        schedule
            .route_destinations
            .iter()
            .find(|(n, _)| route_name_eq(n, name))
            .map(|(_, d)| d)
    })
}

/// Order strings with embedded numbers by value: "2" < "12" < "12b" < "N1".
pub fn natural_cmp(a: &str, b: &str) -> Ordering {
    let mut left = a.chars().peekable();
    let mut right = b.chars().peekable();

    loop {
        match (left.peek().copied(), right.peek().copied()) {
            (None, None) => return a.cmp(b),
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(x), Some(y)) if x.is_ascii_digit() && y.is_ascii_digit() => {
                let l = take_digits(&mut left);
                let r = take_digits(&mut right);
                let (l_trim, r_trim) = (l.trim_start_matches('0'), r.trim_start_matches('0'));
                let ord = l_trim
                    .len()
                    .cmp(&r_trim.len())
                    .then_with(|| l_trim.cmp(r_trim));
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            (Some(x), Some(y)) => {
                if x != y {
                    return x.cmp(&y);
                }
                left.next();
                right.next();
            }
        }
    }
}

fn take_digits(chars: &mut std::iter::Peekable<std::str::Chars<'_>>) -> String {
    let mut digits = String::new();
    while let Some(c) = chars.next_if(char::is_ascii_digit) {
        digits.push(c);
    }
    digits
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processor::ArrivalPrediction;
    use crate::static_data::tests::sample_store;
    use chrono::Duration;

    fn vehicle(id: &str, route_name: &str, shape_id: Option<&str>) -> VehicleSnapshot {
        VehicleSnapshot {
            id: id.into(),
            label: None,
            trip_id: None,
            route_id: "R".into(),
            route_name: route_name.into(),
            headsign: "H".to_string(),
            lat: 0.0,
            lon: 0.0,
            bearing: None,
            timestamp: None,
            shape_id: shape_id.map(CompactString::from),
        }
    }

    fn prediction(
        stop_id: &str,
        trip_id: Option<&str>,
        route_id: Option<&str>,
        arrival: Option<DateTime<Utc>>,
    ) -> ArrivalPrediction {
        ArrivalPrediction {
            stop_id: stop_id.into(),
            trip_id: trip_id.map(CompactString::from),
            route_id: route_id.map(CompactString::from),
            arrival,
        }
    }

    fn now() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    #[test]
    fn test_vehicles_by_route() {
        let vehicles = vec![
            vehicle("a", "42", None),
            vehicle("b", "H8", None),
            vehicle("c", "420", None),
        ];

        assert_eq!(vehicles_by_route(&vehicles, "").len(), 3);
        let ids: Vec<_> = vehicles_by_route(&vehicles, "42").iter().map(|v| v.id.as_str()).collect();
        assert_eq!(ids, vec!["a"], "exact match, not prefix");
        assert_eq!(vehicles_by_route(&vehicles, "h8").len(), 1, "case-insensitive");
        assert!(vehicles_by_route(&vehicles, "99").is_empty());
    }

    #[test]
    fn test_stops_for_modes() {
        let schedule = sample_store();

        assert_eq!(stops_for(&schedule, StopQuery::All).len(), 4);

        let route: Vec<_> = stops_for(&schedule, StopQuery::Route("42"))
            .iter()
            .map(|s| s.id.as_str())
            .collect();
        assert_eq!(route, vec!["S1", "S2"]);

        assert!(
            stops_for(&schedule, StopQuery::Route("999")).is_empty(),
            "unknown route yields nothing, not every stop"
        );

        let rome = Bounds {
            south: 41.85,
            west: 12.4,
            north: 41.95,
            east: 12.6,
        };
        assert_eq!(stops_for(&schedule, StopQuery::Viewport(rome)).len(), 3);
    }

    #[test]
    fn test_stop_query_mode_selection() {
        let b = Bounds {
            south: 0.0,
            west: 0.0,
            north: 1.0,
            east: 1.0,
        };
        assert_eq!(StopQuery::new(Some(b), "42"), StopQuery::Viewport(b));
        assert_eq!(StopQuery::new(None, " 42 "), StopQuery::Route("42"));
        assert_eq!(StopQuery::new(None, ""), StopQuery::All);
        assert!(b.contains(1.0, 0.0), "edges are inclusive");
    }

    #[test]
    fn test_arrivals_sorted_by_time_then_name() {
        let schedule = sample_store();
        let mut predictions = PredictionMap::new();
        predictions.insert(
            "S2".into(),
            vec![
                prediction("S2", Some("T2A"), Some("R2"), Some(now() + Duration::minutes(10))),
                prediction("S2", Some("T42B"), Some("R42"), Some(now() + Duration::minutes(3))),
                prediction("S2", Some("T42A"), Some("R42"), Some(now() + Duration::minutes(7))),
            ],
        );

        let lines = arrivals_and_lines_for_stop(&schedule, &predictions, "S2", now());
        let summary: Vec<_> = lines
            .iter()
            .map(|l| (l.route_name.as_str(), l.minutes))
            .collect();
        assert_eq!(summary, vec![("42", Some(3)), ("2", Some(10)), ("12", None)]);

        assert_eq!(lines[0].destination.as_deref(), Some("Venezia"), "live headsign of soonest trip");
        assert_eq!(lines[1].destination.as_deref(), Some("Colosseo"));
        assert_eq!(lines[2].destination, None);
    }

    #[test]
    fn test_untimed_lines_use_natural_order() {
        let schedule = sample_store();
        let lines = arrivals_and_lines_for_stop(&schedule, &PredictionMap::new(), "S2", now());
        let names: Vec<_> = lines.iter().map(|l| l.route_name.as_str()).collect();
        assert_eq!(names, vec!["2", "12", "42"]);
        assert_eq!(lines[2].destination.as_deref(), Some("Termini"), "falls back to route destination");
    }

    #[test]
    fn test_far_and_past_predictions_do_not_count() {
        let schedule = sample_store();
        let mut predictions = PredictionMap::new();
        predictions.insert(
            "S1".into(),
            vec![
                prediction("S1", None, Some("R42"), Some(now() + Duration::minutes(65))),
                prediction("S1", None, Some("R42"), Some(now() - Duration::minutes(2))),
                prediction("S1", None, Some("R42"), None),
            ],
        );

        let lines = arrivals_and_lines_for_stop(&schedule, &predictions, "S1", now());
        assert_eq!(lines.len(), 1, "line still listed from the route index");
        assert_eq!(lines[0].route_name, "42");
        assert_eq!(lines[0].minutes, None);
    }

    #[test]
    fn test_imminent_arrival_is_zero_minutes() {
        let schedule = sample_store();
        let mut predictions = PredictionMap::new();
        predictions.insert(
            "S1".into(),
            vec![prediction("S1", None, Some("R42"), Some(now() - Duration::seconds(20)))],
        );
        let lines = arrivals_and_lines_for_stop(&schedule, &predictions, "S1", now());
        assert_eq!(lines[0].minutes, Some(0));
    }

    #[test]
    fn test_unknown_stop_has_no_lines() {
        let schedule = sample_store();
        assert!(arrivals_and_lines_for_stop(&schedule, &PredictionMap::new(), "ZZ", now()).is_empty());
        let empty = ScheduleStore::default();
        assert!(arrivals_and_lines_for_stop(&empty, &PredictionMap::new(), "S1", now()).is_empty());
    }

    #[test]
    fn test_minutes_until_rounding() {
        assert_eq!(minutes_until(now() + Duration::seconds(89), now()), 1);
        assert_eq!(minutes_until(now() + Duration::seconds(90), now()), 2);
        assert_eq!(minutes_until(now() - Duration::seconds(30), now()), 0);
        assert_eq!(minutes_until(now() - Duration::seconds(31), now()), -1);
    }

    #[test]
    fn test_autocomplete_prefix() {
        let schedule = sample_store();
        assert_eq!(autocomplete(&schedule, "4", 10), vec!["42"]);
        assert_eq!(autocomplete(&schedule, "1", 10), vec!["12"]);
        assert!(autocomplete(&schedule, "", 10).is_empty());

        let mut many = ScheduleStore::default();
        many.route_names = vec!["N1".into(), "N2".into(), "n3".into(), "X".into()];
        assert_eq!(autocomplete(&many, "n", 2), vec!["N1", "N2"]);
    }

    #[test]
    fn test_shapes_for_vehicles() {
        let schedule = sample_store();
        let vehicles = vec![
            vehicle("a", "42", Some("SH42")),
            vehicle("b", "42", Some("SH42")),
            vehicle("c", "2", Some("SH2")),
            vehicle("d", "2", Some("UNKNOWN")),
            vehicle("e", "2", None),
        ];
        let refs: Vec<_> = vehicles.iter().collect();
        let shapes = shapes_for_vehicles(&schedule, &refs);
        let ids: Vec<_> = shapes.iter().map(|s| s.shape_id.as_str()).collect();
        assert_eq!(ids, vec!["SH42", "SH2"]);
        assert_eq!(shapes[0].points.len(), 2);
    }

    #[test]
    fn test_natural_cmp() {
        assert_eq!(natural_cmp("2", "12"), Ordering::Less);
        assert_eq!(natural_cmp("12", "12b"), Ordering::Less);
        assert_eq!(natural_cmp("N10", "N9"), Ordering::Greater);
        assert_eq!(natural_cmp("H", "12"), Ordering::Greater);
        assert_eq!(natural_cmp("07", "7"), Ordering::Less, "ties fall back to plain order");
        assert_eq!(natural_cmp("42", "42"), Ordering::Equal);
    }
}
