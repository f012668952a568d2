use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds, the only time type.
pub type Ms = i64;

pub const DAY_MS: Ms = 86_400_000;

/// 2025-07-01T00:00:00Z, first instant of the booking season.
pub const SEASON_START: Ms = 1_751_328_000_000;
/// 2025-12-31T00:00:00Z, no booking may end after this.
pub const SEASON_END: Ms = 1_767_139_200_000;

/// Closed availability window `[start, end]`.
///
/// Unlike allocation spans, both endpoints belong to the window: a booking
/// that ends exactly at `start` or begins exactly at `end` still blocks it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Window {
    pub start: Ms,
    pub end: Ms,
}

impl Window {
    pub fn new(start: Ms, end: Ms) -> Result<Self, InvalidWindow> {
        if end <= start {
            return Err(InvalidWindow { start, end });
        }
        Ok(Self { start, end })
    }

    /// Closed-interval overlap against a booking's `[start, end]`.
    pub fn overlaps(&self, start: Ms, end: Ms) -> bool {
        start <= self.end && end >= self.start
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidWindow {
    pub start: Ms,
    pub end: Ms,
}

impl std::fmt::Display for InvalidWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "invalid window: end {} is not after start {}", self.end, self.start)
    }
}

impl std::error::Error for InvalidWindow {}

/// Longitude/latitude pair in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lon: f64,
    pub lat: f64,
}

impl GeoPoint {
    pub fn new(lon: f64, lat: f64) -> Option<Self> {
        if !(-180.0..=180.0).contains(&lon) || !(-90.0..=90.0).contains(&lat) {
            return None;
        }
        Some(Self { lon, lat })
    }

    /// Geohash cell used as the geo index key.
    pub fn cell(&self, precision: usize) -> String {
        geohash::encode(geohash::Coord { x: self.lon, y: self.lat }, precision)
            .unwrap_or_else(|_| "invalid".to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResourceStatus {
    Active,
    Inactive,
    Retired,
}

impl ResourceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceStatus::Active => "active",
            ResourceStatus::Inactive => "inactive",
            ResourceStatus::Retired => "retired",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BookingStatus {
    Reserved,
    Hold,
    Maintenance,
}

impl BookingStatus {
    pub const ALL: [BookingStatus; 3] = [
        BookingStatus::Reserved,
        BookingStatus::Hold,
        BookingStatus::Maintenance,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Reserved => "reserved",
            BookingStatus::Hold => "hold",
            BookingStatus::Maintenance => "maintenance",
        }
    }
}

/// A bookable advertising space.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    pub id: Ulid,
    pub owner_id: Ulid,
    pub category_id: Ulid,
    pub subcategory_id: Ulid,
    pub location: GeoPoint,
    pub status: ResourceStatus,
}

/// A time-bounded occupation of one resource. `end > start`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Booking {
    pub id: Ulid,
    pub resource_id: Ulid,
    pub start: Ms,
    pub end: Ms,
    pub status: BookingStatus,
}

// ── Measurements ─────────────────────────────────────────────────

/// Execution metadata for one query. `None` means the store did not say.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlanStats {
    pub documents_examined: Option<u64>,
    pub keys_examined: Option<u64>,
}

/// One executed benchmark query.
#[derive(Debug, Clone, PartialEq)]
pub struct Measurement {
    pub dataset_size: usize,
    pub query: String,
    pub result_count: usize,
    pub execution_ms: f64,
    pub plan: PlanStats,
    pub total_resources: Option<u64>,
    pub total_bookings: Option<u64>,
    pub resources_size_mb: Option<f64>,
    pub bookings_size_mb: Option<f64>,
}
