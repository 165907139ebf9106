use crate::error::FeedError;
use chrono::{DateTime, Utc};
use flate2::read::GzDecoder;
use gtfs_realtime::{FeedEntity, FeedMessage, TripDescriptor};
use prost::Message;
use std::io::Read;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// A decoded GTFS-Realtime message. Only the fields the fusion step reads
/// are carried over, and every optional field stays optional.
#[derive(Debug, Clone, Default)]
pub struct DecodedFeed {
    pub header: FeedHeaderInfo,
    pub entities: Vec<DecodedEntity>,
}

#[derive(Debug, Clone, Default)]
pub struct FeedHeaderInfo {
    pub version: String,
    /// Emission time, seconds since epoch.
    pub timestamp: Option<u64>,
}

#[derive(Debug, Clone, Default)]
pub struct DecodedEntity {
    pub id: String,
    pub vehicle: Option<VehicleRecord>,
    pub trip_update: Option<TripUpdateRecord>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TripRef {
    pub trip_id: Option<String>,
    pub route_id: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct VehicleRecord {
    pub trip: Option<TripRef>,
    pub vehicle_id: Option<String>,
    pub label: Option<String>,
    pub position: Option<PositionRecord>,
    pub timestamp: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PositionRecord {
    pub latitude: f32,
    pub longitude: f32,
    pub bearing: Option<f32>,
}

#[derive(Debug, Clone, Default)]
pub struct TripUpdateRecord {
    pub trip: TripRef,
    pub stop_time_updates: Vec<StopTimeRecord>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct StopTimeRecord {
    pub stop_id: Option<String>,
    /// Predicted arrival, seconds since epoch.
    pub arrival_time: Option<i64>,
}

/// Decode a feed body. Gzip-compressed bodies are inflated first.
///
/// Only structural corruption fails the decode; entities that lack optional
/// payloads decode with those payloads set to `None`.
pub fn decode_feed(body: &[u8]) -> Result<DecodedFeed, FeedError> {
    let msg = if body.starts_with(&GZIP_MAGIC) {
        let mut inflated = Vec::new();
        GzDecoder::new(body).read_to_end(&mut inflated)?;
        FeedMessage::decode(&inflated[..])?
    } else {
        FeedMessage::decode(body)?
    };

    Ok(DecodedFeed {
        header: FeedHeaderInfo {
            version: msg.header.gtfs_realtime_version,
            timestamp: msg.header.timestamp,
        },
        entities: msg.entity.into_iter().map(convert_entity).collect(),
    })
}

/// Convert epoch seconds into an instant. Out-of-range values yield `None`.
pub fn epoch_to_instant(secs: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(secs, 0)
}

fn convert_entity(entity: FeedEntity) -> DecodedEntity {
    let vehicle = entity.vehicle.map(|vp| {
        let (vehicle_id, label) = match vp.vehicle {
            Some(descriptor) => (non_empty(descriptor.id), non_empty(descriptor.label)),
            None => (None, None),
        };
        VehicleRecord {
            trip: vp.trip.map(convert_trip),
            vehicle_id,
            label,
            position: vp.position.map(|p| PositionRecord {
                latitude: p.latitude,
                longitude: p.longitude,
                bearing: p.bearing,
            }),
            timestamp: vp.timestamp,
        }
    });

    let trip_update = entity.trip_update.map(|tu| TripUpdateRecord {
        trip: convert_trip(tu.trip),
        stop_time_updates: tu
            .stop_time_update
            .into_iter()
            .map(|stu| StopTimeRecord {
                stop_id: non_empty(stu.stop_id),
                arrival_time: stu.arrival.and_then(|a| a.time),
            })
            .collect(),
    });

    DecodedEntity {
        id: entity.id,
        vehicle,
        trip_update,
    }
}

fn convert_trip(td: TripDescriptor) -> TripRef {
    TripRef {
        trip_id: non_empty(td.trip_id),
        route_id: non_empty(td.route_id),
    }
}

// Empty strings on the wire mean "not set" for our purposes.
fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.is_empty())
}
