use crate::fetch::FeedFetcher;
use crate::processor::VehicleSnapshot;
use crate::query::{
    Bounds, LineArrival, RouteShape, StopQuery, arrivals_and_lines_for_stop, autocomplete,
    shapes_for_vehicles, stops_for, vehicles_by_route,
};
use crate::scheduler::Refresher;
use crate::state::AppState;
use crate::static_data::Stop;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use warp::filters::BoxedFilter;
use warp::http::StatusCode;
use warp::reply::Response;
use warp::{Filter, Reply};

const AUTOCOMPLETE_LIMIT: usize = 10;

#[derive(Debug, Default, Deserialize)]
struct RouteParams {
    route: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct StopParams {
    route: Option<String>,
    south: Option<f64>,
    west: Option<f64>,
    north: Option<f64>,
    east: Option<f64>,
}

impl StopParams {
    fn bounds(&self) -> Option<Bounds> {
        Some(Bounds {
            south: self.south?,
            west: self.west?,
            north: self.north?,
            east: self.east?,
        })
    }
}

#[derive(Debug, Default, Deserialize)]
struct AutocompleteParams {
    prefix: Option<String>,
}

#[derive(Serialize)]
struct VehiclesReply<'a> {
    count: usize,
    vehicles: Vec<&'a VehicleSnapshot>,
}

#[derive(Serialize)]
struct StopsReply<'a> {
    count: usize,
    stops: Vec<&'a Stop>,
}

#[derive(Serialize)]
struct ArrivalsReply<'a> {
    stop: &'a Stop,
    lines: Vec<LineArrival>,
}

#[derive(Serialize)]
struct ShapesReply<'a> {
    shapes: Vec<RouteShape<'a>>,
}

#[derive(Serialize)]
struct ErrorReply {
    error: String,
}

/// HTTP surface consumed by the map client.
pub fn routes<F: FeedFetcher + 'static>(
    state: Arc<AppState>,
    refresher: Arc<Refresher<F>>,
) -> BoxedFilter<(Response,)> {
    let state_filter = warp::any().map(move || state.clone()).boxed();
    let refresher_filter = warp::any().map(move || refresher.clone());

    // GET /vehicles?route=
    let vehicles = warp::path!("vehicles")
        .and(warp::get())
        .and(warp::query::<RouteParams>())
        .and(state_filter.clone())
        .map(get_vehicles);

    // GET /stops?route= or ?south=&west=&north=&east=
    let stops = warp::path!("stops")
        .and(warp::get())
        .and(warp::query::<StopParams>())
        .and(state_filter.clone())
        .map(get_stops);

    // GET /stops/{id}/arrivals
    let arrivals = warp::path!("stops" / String / "arrivals")
        .and(warp::get())
        .and(state_filter.clone())
        .map(get_arrivals);

    // GET /routes?prefix=
    let route_names = warp::path!("routes")
        .and(warp::get())
        .and(warp::query::<AutocompleteParams>())
        .and(state_filter.clone())
        .map(get_routes);

    // GET /shapes?route=
    let shapes = warp::path!("shapes")
        .and(warp::get())
        .and(warp::query::<RouteParams>())
        .and(state_filter.clone())
        .map(get_shapes);

    // GET /status
    let status = warp::path!("status")
        .and(warp::get())
        .and(state_filter)
        .map(|state: Arc<AppState>| warp::reply::json(&state.status()).into_response());

    // POST /refresh
    let refresh = warp::path!("refresh")
        .and(warp::post())
        .and(refresher_filter)
        .then(post_refresh::<F>);

    vehicles
        .or(stops)
        .unify()
        .or(arrivals)
        .unify()
        .or(route_names)
        .unify()
        .or(shapes)
        .unify()
        .or(status)
        .unify()
        .or(refresh)
        .unify()
        .boxed()
}

fn get_vehicles(params: RouteParams, state: Arc<AppState>) -> Response {
    let snapshot = state.realtime();
    let vehicles = vehicles_by_route(&snapshot.vehicles, params.route.as_deref().unwrap_or(""));
    warp::reply::json(&VehiclesReply {
        count: vehicles.len(),
        vehicles,
    })
    .into_response()
}

fn get_stops(params: StopParams, state: Arc<AppState>) -> Response {
    let schedule = state.schedule().unwrap_or_default();
    let query = StopQuery::new(params.bounds(), params.route.as_deref().unwrap_or(""));
    let stops = stops_for(&schedule, query);
    warp::reply::json(&StopsReply {
        count: stops.len(),
        stops,
    })
    .into_response()
}

fn get_arrivals(stop_id: String, state: Arc<AppState>) -> Response {
    let schedule = state.schedule().unwrap_or_default();
    let Some(stop) = schedule.stops.get(stop_id.as_str()) else {
        return warp::reply::with_status(
            warp::reply::json(&ErrorReply {
                error: format!("Stop '{}' not found", stop_id),
            }),
            StatusCode::NOT_FOUND,
        )
        .into_response();
    };
    let snapshot = state.realtime();
    let lines = arrivals_and_lines_for_stop(&schedule, &snapshot.predictions, &stop_id, Utc::now());
    warp::reply::json(&ArrivalsReply { stop, lines }).into_response()
}

fn get_routes(params: AutocompleteParams, state: Arc<AppState>) -> Response {
    let schedule = state.schedule().unwrap_or_default();
    let names: Vec<&str> = match params.prefix.as_deref() {
        Some(prefix) => autocomplete(&schedule, prefix, AUTOCOMPLETE_LIMIT),
        None => schedule.route_names.iter().map(|n| n.as_str()).collect(),
    };
    warp::reply::json(&names).into_response()
}

// The cycle runs on its own task so a dropped connection cannot cut it short.
async fn post_refresh<F: FeedFetcher + 'static>(refresher: Arc<Refresher<F>>) -> Response {
    match tokio::spawn(async move { refresher.refresh().await }).await {
        Ok(outcome) => warp::reply::json(&outcome).into_response(),
        Err(e) => warp::reply::with_status(
            warp::reply::json(&ErrorReply {
                error: format!("refresh task failed: {e}"),
            }),
            StatusCode::INTERNAL_SERVER_ERROR,
        )
        .into_response(),
    }
}

fn get_shapes(params: RouteParams, state: Arc<AppState>) -> Response {
    let schedule = state.schedule().unwrap_or_default();
    let snapshot = state.realtime();
    let vehicles = vehicles_by_route(&snapshot.vehicles, params.route.as_deref().unwrap_or(""));
    warp::reply::json(&ShapesReply {
        shapes: shapes_for_vehicles(&schedule, &vehicles),
    })
    .into_response()
}
