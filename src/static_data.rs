use crate::error::LoadError;
use crate::fetch::{FeedFetcher, join_location};
use chrono::{DateTime, Utc};
use compact_str::CompactString;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use tracing::{debug, info};

pub const STOPS_FILE: &str = "stops.txt";
pub const ROUTES_FILE: &str = "routes.txt";
pub const TRIPS_FILE: &str = "trips.txt";
pub const SHAPES_FILE: &str = "shapes.txt";
pub const ROUTE_STOPS_FILE: &str = "route_stops.json";

/// Display code used when a stop has no `stop_code`.
pub const MISSING_STOP_CODE: &str = "N/D";

#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct Stop {
    pub id: CompactString,
    pub code: CompactString,
    pub name: String,
    pub lat: f64,
    pub lon: f64,
}

#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct Route {
    pub id: CompactString,
    pub short_name: Option<CompactString>,
    pub long_name: Option<String>,
}

#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct Trip {
    pub id: CompactString,
    pub route_id: Option<CompactString>,
    pub headsign: Option<String>,
    pub shape_id: Option<CompactString>,
}

#[derive(Clone, Copy, Debug, Serialize, PartialEq)]
pub struct ShapePoint {
    pub lat: f64,
    pub lon: f64,
    pub sequence: Option<u32>,
}

/// The five raw static payloads, already fetched.
#[derive(Clone, Debug, Default)]
pub struct StaticPayloads {
    pub stops: String,
    pub routes: String,
    pub trips: String,
    pub shapes: String,
    pub route_stops: String,
}

/// Indices built once from the static schedule. Never mutated after load.
#[derive(Debug, Default)]
pub struct ScheduleStore {
    pub stops: BTreeMap<CompactString, Stop>,
    pub routes: HashMap<CompactString, Route>,
    pub trips: HashMap<CompactString, Trip>,
    pub shapes: HashMap<CompactString, Vec<ShapePoint>>,
    /// Route short name -> stop ids served, loaded verbatim from route_stops.json.
    pub route_stops: HashMap<CompactString, HashSet<CompactString>>,
    /// Route short name -> headsign of the first trip seen for that route.
    pub route_destinations: HashMap<CompactString, String>,
    /// Sorted, de-duplicated route short names.
    pub route_names: Vec<CompactString>,
    pub loaded_at: Option<DateTime<Utc>>,
}

// Rows as they appear in the tables. Every column is optional here;
// validation happens when converting to the stored types.

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct StopRow {
    stop_id: Option<String>,
    stop_code: Option<String>,
    stop_name: Option<String>,
    stop_lat: Option<String>,
    stop_lon: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RouteRow {
    route_id: Option<String>,
    route_short_name: Option<String>,
    route_long_name: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct TripRow {
    trip_id: Option<String>,
    route_id: Option<String>,
    trip_headsign: Option<String>,
    shape_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ShapeRow {
    shape_id: Option<String>,
    shape_pt_lat: Option<String>,
    shape_pt_lon: Option<String>,
    shape_pt_sequence: Option<String>,
}

impl ScheduleStore {
    /// Fetch the five static files under `base` concurrently and build the
    /// store. Any failed fetch aborts the whole load.
    pub async fn load<F: FeedFetcher>(fetcher: &F, base: &str) -> Result<Self, LoadError> {
        info!(base, "Loading static schedule");
        let stops_loc = join_location(base, STOPS_FILE);
        let routes_loc = join_location(base, ROUTES_FILE);
        let trips_loc = join_location(base, TRIPS_FILE);
        let shapes_loc = join_location(base, SHAPES_FILE);
        let route_stops_loc = join_location(base, ROUTE_STOPS_FILE);

        let (stops, routes, trips, shapes, route_stops) = tokio::join!(
            fetcher.fetch(&stops_loc),
            fetcher.fetch(&routes_loc),
            fetcher.fetch(&trips_loc),
            fetcher.fetch(&shapes_loc),
            fetcher.fetch(&route_stops_loc),
        );

        let payloads = StaticPayloads {
            stops: into_text(STOPS_FILE, stops)?,
            routes: into_text(ROUTES_FILE, routes)?,
            trips: into_text(TRIPS_FILE, trips)?,
            shapes: into_text(SHAPES_FILE, shapes)?,
            route_stops: into_text(ROUTE_STOPS_FILE, route_stops)?,
        };

        Self::from_payloads(&payloads)
    }

    pub fn from_payloads(payloads: &StaticPayloads) -> Result<Self, LoadError> {
        let mut store = ScheduleStore::default();

        // 1. Stops
        for row in parse_rows::<StopRow>(STOPS_FILE, &payloads.stops)? {
            if let Some(stop) = stop_from_row(row) {
                store.stops.insert(stop.id.clone(), stop);
            }
        }

        // 2. Routes + selectable route names
        let mut names = BTreeSet::new();
        for row in parse_rows::<RouteRow>(ROUTES_FILE, &payloads.routes)? {
            if let Some(route) = route_from_row(row) {
                if let Some(short) = &route.short_name {
                    names.insert(short.clone());
                }
                store.routes.insert(route.id.clone(), route);
            }
        }
        store.route_names = names.into_iter().collect();

        // 3. Trips + first-wins destination per route short name
        for row in parse_rows::<TripRow>(TRIPS_FILE, &payloads.trips)? {
            if let Some(trip) = trip_from_row(row) {
                let short = store
                    .route_short_name(trip.route_id.as_deref())
                    .map(CompactString::from);
                if let (Some(short), Some(headsign)) = (short, &trip.headsign) {
                    store
                        .route_destinations
                        .entry(short)
                        .or_insert_with(|| headsign.clone());
                }
                store.trips.insert(trip.id.clone(), trip);
            }
        }

        // 4. Shapes, sorted once every point is in
        for row in parse_rows::<ShapeRow>(SHAPES_FILE, &payloads.shapes)? {
            if let Some((shape_id, point)) = shape_point_from_row(row) {
                store.shapes.entry(shape_id).or_default().push(point);
            }
        }
        for points in store.shapes.values_mut() {
            // stable; points without a sequence keep file order at the end
            points.sort_by_key(|p| p.sequence.unwrap_or(u32::MAX));
        }

        // 5. Route -> stops mapping
        let raw: HashMap<String, Vec<String>> = serde_json::from_str(&payloads.route_stops)?;
        store.route_stops = raw
            .into_iter()
            .map(|(name, ids)| {
                (
                    CompactString::from(name),
                    ids.into_iter().map(CompactString::from).collect(),
                )
            })
            .collect();

        store.loaded_at = Some(Utc::now());
        info!(
            stops = store.stops.len(),
            routes = store.routes.len(),
            lines = store.route_names.len(),
            trips = store.trips.len(),
            shapes = store.shapes.len(),
            "Static schedule indices built"
        );
        Ok(store)
    }

    pub fn trip(&self, trip_id: Option<&str>) -> Option<&Trip> {
        self.trips.get(trip_id?)
    }

    pub fn route(&self, route_id: Option<&str>) -> Option<&Route> {
        self.routes.get(route_id?)
    }

    pub fn route_short_name(&self, route_id: Option<&str>) -> Option<&str> {
        self.route(route_id)?.short_name.as_deref()
    }

    pub fn shape(&self, shape_id: &str) -> Option<&[ShapePoint]> {
        self.shapes.get(shape_id).map(Vec::as_slice)
    }
}

fn into_text(
    file: &'static str,
    fetched: Result<Vec<u8>, crate::error::FetchError>,
) -> Result<String, LoadError> {
    let body = fetched.map_err(|e| LoadError::from_fetch(file, e))?;
    String::from_utf8(body).map_err(|_| LoadError::Encoding { file })
}

fn parse_rows<R: DeserializeOwned>(file: &'static str, text: &str) -> Result<Vec<R>, LoadError> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(text.as_bytes());
    reader
        .headers()
        .map_err(|source| LoadError::Csv { file, source })?;

    let mut rows = Vec::new();
    let mut unreadable = 0usize;
    for record in reader.deserialize::<R>() {
        match record {
            Ok(row) => rows.push(row),
            Err(_) => unreadable += 1,
        }
    }
    if unreadable > 0 {
        debug!(file, unreadable, "Skipped unreadable rows");
    }
    Ok(rows)
}

fn required(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

fn coordinate(value: Option<String>) -> Option<f64> {
    required(value)?.parse::<f64>().ok().filter(|v| v.is_finite())
}

fn stop_from_row(row: StopRow) -> Option<Stop> {
    let id = required(row.stop_id)?;
    let lat = coordinate(row.stop_lat)?;
    let lon = coordinate(row.stop_lon)?;
    Some(Stop {
        id: CompactString::from(id),
        code: required(row.stop_code)
            .map(CompactString::from)
            .unwrap_or_else(|| CompactString::from(MISSING_STOP_CODE)),
        name: row.stop_name.unwrap_or_default(),
        lat,
        lon,
    })
}

fn route_from_row(row: RouteRow) -> Option<Route> {
    Some(Route {
        id: CompactString::from(required(row.route_id)?),
        short_name: required(row.route_short_name).map(CompactString::from),
        long_name: required(row.route_long_name),
    })
}

fn trip_from_row(row: TripRow) -> Option<Trip> {
    Some(Trip {
        id: CompactString::from(required(row.trip_id)?),
        route_id: required(row.route_id).map(CompactString::from),
        headsign: required(row.trip_headsign),
        shape_id: required(row.shape_id).map(CompactString::from),
    })
}

fn shape_point_from_row(row: ShapeRow) -> Option<(CompactString, ShapePoint)> {
    let shape_id = required(row.shape_id)?;
    let lat = coordinate(row.shape_pt_lat)?;
    let lon = coordinate(row.shape_pt_lon)?;
    let sequence = row.shape_pt_sequence.as_deref().and_then(leading_integer);
    Some((CompactString::from(shape_id), ShapePoint { lat, lon, sequence }))
}

/// Integer prefix of a sequence value, so exports like `"12.0"` still sort.
fn leading_integer(value: &str) -> Option<u32> {
    let value = value.trim_start();
    let end = value
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(value.len());
    value[..end].parse().ok()
}
