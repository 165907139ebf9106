use crate::error::{FeedError, FetchError};
use crate::feed::decode_feed;
use crate::fetch::FeedFetcher;
use crate::processor::{PredictionMap, VehicleSnapshot, fuse_predictions, fuse_vehicles};
use crate::state::{AppState, FeedStatus, Pipeline};
use crate::static_data::ScheduleStore;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

#[derive(Clone, Debug)]
pub struct FeedUrls {
    pub vehicle_positions: String,
    pub trip_updates: String,
}

#[derive(Clone, Debug, Serialize, PartialEq)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RefreshOutcome {
    Completed {
        vehicles: Result<usize, String>,
        predictions: Result<usize, String>,
    },
    /// Another refresh was in flight; this trigger was dropped.
    Skipped,
    /// The static schedule is not loaded yet.
    NotReady,
}

/// Owns the fetch -> decode -> fuse -> commit cycle for both live feeds.
pub struct Refresher<F> {
    state: Arc<AppState>,
    fetcher: Arc<F>,
    urls: FeedUrls,
}

impl<F: FeedFetcher + 'static> Refresher<F> {
    pub fn new(state: Arc<AppState>, fetcher: Arc<F>, urls: FeedUrls) -> Self {
        Self {
            state,
            fetcher,
            urls,
        }
    }

    /// Run one refresh cycle unless one is already running.
    ///
    /// Both feeds are fetched at the same time. Trip updates are fused and
    /// committed before vehicle positions; each feed commits or fails on its
    /// own, and a failed feed keeps its previous snapshot.
    pub async fn refresh(&self) -> RefreshOutcome {
        let Some(_guard) = self.state.try_begin_refresh() else {
            debug!("Refresh already in flight, dropping trigger");
            return RefreshOutcome::Skipped;
        };
        let Some(schedule) = self.state.schedule() else {
            return RefreshOutcome::NotReady;
        };

        let (trip_updates, vehicle_positions) = tokio::join!(
            self.fetcher.fetch(&self.urls.trip_updates),
            self.fetcher.fetch(&self.urls.vehicle_positions),
        );

        // 1. Trip updates
        let predictions = match fuse_trip_updates(trip_updates, &schedule) {
            Ok(map) => {
                let count: usize = map.values().map(Vec::len).sum();
                let stops = map.len();
                self.state.commit_predictions(map);
                self.state.set_status(
                    Pipeline::TripUpdates,
                    FeedStatus::success([("predictions", count), ("stops", stops)]),
                );
                Ok(count)
            }
            Err(e) => {
                warn!(feed = "trip_updates", error = %e, "Feed refresh failed, keeping previous data");
                self.state.set_status(Pipeline::TripUpdates, FeedStatus::error(&e));
                Err(e.to_string())
            }
        };

        // 2. Vehicle positions
        let vehicles = match fuse_vehicle_positions(vehicle_positions, &schedule) {
            Ok(list) => {
                let count = list.len();
                self.state.commit_vehicles(list);
                self.state
                    .set_status(Pipeline::Vehicles, FeedStatus::success([("vehicles", count)]));
                Ok(count)
            }
            Err(e) => {
                warn!(feed = "vehicle_positions", error = %e, "Feed refresh failed, keeping previous data");
                self.state.set_status(Pipeline::Vehicles, FeedStatus::error(&e));
                Err(e.to_string())
            }
        };

        info!(?vehicles, ?predictions, "Refresh cycle complete");
        RefreshOutcome::Completed {
            vehicles,
            predictions,
        }
    }

    /// Load the static schedule, retrying every `retry` until it succeeds,
    /// then publish it and run the first refresh.
    pub async fn bootstrap(&self, static_base: &str, retry: Duration) {
        loop {
            self.state.set_status(Pipeline::Static, FeedStatus::Loading);
            match ScheduleStore::load(self.fetcher.as_ref(), static_base).await {
                Ok(store) => {
                    let stops = store.stops.len();
                    let lines = store.route_names.len();
                    self.state.publish_schedule(store);
                    self.state.set_status(
                        Pipeline::Static,
                        FeedStatus::success([("stops", stops), ("lines", lines)]),
                    );
                    break;
                }
                Err(e) => {
                    error!(error = %e, "Static schedule load failed, retrying in {:?}", retry);
                    self.state.set_status(Pipeline::Static, FeedStatus::error(&e));
                    tokio::time::sleep(retry).await;
                }
            }
        }
        self.refresh().await;
    }

    /// Refresh every `period`, starting one period from now.
    pub async fn run(self: Arc<Self>, period: Duration) {
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            self.refresh().await;
        }
    }
}

fn fuse_trip_updates(
    fetched: Result<Vec<u8>, FetchError>,
    schedule: &ScheduleStore,
) -> Result<PredictionMap, FeedError> {
    let feed = decode_feed(&fetched?)?;
    debug!(version = %feed.header.version, entities = feed.entities.len(), "Decoded trip updates");
    Ok(fuse_predictions(&feed, schedule))
}

fn fuse_vehicle_positions(
    fetched: Result<Vec<u8>, FetchError>,
    schedule: &ScheduleStore,
) -> Result<Vec<VehicleSnapshot>, FeedError> {
    let feed = decode_feed(&fetched?)?;
    debug!(version = %feed.header.version, entities = feed.entities.len(), "Decoded vehicle positions");
    Ok(fuse_vehicles(&feed, schedule))
}
