use crate::processor::{PredictionMap, VehicleSnapshot};
use crate::static_data::ScheduleStore;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

/// Latest fused real-time data. Immutable once published; each commit builds
/// a new snapshot that shares the untouched half with the previous one.
#[derive(Clone, Debug, Default)]
pub struct RealtimeSnapshot {
    pub vehicles: Arc<Vec<VehicleSnapshot>>,
    pub predictions: Arc<PredictionMap>,
    pub vehicles_updated: Option<DateTime<Utc>>,
    pub predictions_updated: Option<DateTime<Utc>>,
}

#[derive(Clone, Debug, Serialize, PartialEq)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum FeedStatus {
    Loading,
    Success {
        counts: BTreeMap<&'static str, usize>,
        at: DateTime<Utc>,
    },
    Error {
        reason: String,
        at: DateTime<Utc>,
    },
}

impl FeedStatus {
    pub fn success<const N: usize>(counts: [(&'static str, usize); N]) -> Self {
        FeedStatus::Success {
            counts: counts.into_iter().collect(),
            at: Utc::now(),
        }
    }

    pub fn error(reason: impl ToString) -> Self {
        FeedStatus::Error {
            reason: reason.to_string(),
            at: Utc::now(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Pipeline {
    Static,
    Vehicles,
    TripUpdates,
}

#[derive(Clone, Debug, Serialize)]
pub struct StatusBoard {
    pub static_data: FeedStatus,
    pub vehicles: FeedStatus,
    pub trip_updates: FeedStatus,
}

impl Default for StatusBoard {
    fn default() -> Self {
        Self {
            static_data: FeedStatus::Loading,
            vehicles: FeedStatus::Loading,
            trip_updates: FeedStatus::Loading,
        }
    }
}

pub struct AppState {
    // Published once, whole, after a successful static load.
    schedule: RwLock<Option<Arc<ScheduleStore>>>,
    realtime: RwLock<Arc<RealtimeSnapshot>>,
    status: RwLock<StatusBoard>,
    refreshing: AtomicBool,
}

impl AppState {
    pub fn new() -> Self {
        Self {
            schedule: RwLock::new(None),
            realtime: RwLock::new(Arc::new(RealtimeSnapshot::default())),
            status: RwLock::new(StatusBoard::default()),
            refreshing: AtomicBool::new(false),
        }
    }

    pub fn schedule(&self) -> Option<Arc<ScheduleStore>> {
        self.schedule
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn publish_schedule(&self, store: ScheduleStore) {
        *self.schedule.write().unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(store));
    }

    pub fn realtime(&self) -> Arc<RealtimeSnapshot> {
        self.realtime
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn commit_vehicles(&self, vehicles: Vec<VehicleSnapshot>) {
        let mut current = self.realtime.write().unwrap_or_else(PoisonError::into_inner);
        let mut next = RealtimeSnapshot::clone(&current);
        next.vehicles = Arc::new(vehicles);
        next.vehicles_updated = Some(Utc::now());
        *current = Arc::new(next);
    }

    pub fn commit_predictions(&self, predictions: PredictionMap) {
        let mut current = self.realtime.write().unwrap_or_else(PoisonError::into_inner);
        let mut next = RealtimeSnapshot::clone(&current);
        next.predictions = Arc::new(predictions);
        next.predictions_updated = Some(Utc::now());
        *current = Arc::new(next);
    }

    pub fn status(&self) -> StatusBoard {
        self.status
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn set_status(&self, pipeline: Pipeline, status: FeedStatus) {
        let mut board = self.status.write().unwrap_or_else(PoisonError::into_inner);
        match pipeline {
            Pipeline::Static => board.static_data = status,
            Pipeline::Vehicles => board.vehicles = status,
            Pipeline::TripUpdates => board.trip_updates = status,
        }
    }

    /// Claim the refresh slot. Returns `None` while another refresh holds it.
    pub fn try_begin_refresh(&self) -> Option<RefreshGuard<'_>> {
        self.refreshing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| RefreshGuard {
                flag: &self.refreshing,
            })
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::new()
    }
}

/// Releases the refresh slot on drop.
pub struct RefreshGuard<'a> {
    flag: &'a AtomicBool,
}

impl Drop for RefreshGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}
