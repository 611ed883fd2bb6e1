//! Place-name geocoding with a local SQLite cache.
//!
//! Lookups are cache-aside: the `locations` table is consulted first
//! (case-insensitively), and only on a miss is the provider called. The first
//! provider feature whose label equals the query, ignoring case, is
//! authoritative and gets persisted.

mod mapbox;

pub use mapbox::MapboxGeocoder;

use crate::error::{Error, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use tokio::sync::Mutex;

/// Equatorial Earth radius used for distances.
pub const EARTH_RADIUS_KM: f64 = 6378.137;

const SCHEMA: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA auto_vacuum = 1;

CREATE TABLE IF NOT EXISTS locations (
    name TEXT NOT NULL PRIMARY KEY,
    latitude REAL,
    longitude REAL
);
"#;

/// A point on the globe, in degrees.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Location {
    pub latitude: f64,
    pub longitude: f64,
}

/// One candidate returned by a geocoding provider.
#[derive(Debug, Clone, PartialEq)]
pub struct GeoFeature {
    pub label: String,
    pub location: Location,
}

/// External geocoding service.
pub trait GeocodeProvider: Send + Sync {
    /// Candidates for `place`, in provider relevance order.
    fn lookup(&self, place: &str) -> Result<Vec<GeoFeature>>;
}

/// Great-circle distance in kilometres (haversine).
pub fn distance_km(a: Location, b: Location) -> f64 {
    let lat1 = a.latitude.to_radians();
    let lat2 = b.latitude.to_radians();
    let dlat = (b.latitude - a.latitude).to_radians();
    let dlon = (b.longitude - a.longitude).to_radians();

    let h = (dlat / 2.0).sin().powi(2) + (dlon / 2.0).sin().powi(2) * lat1.cos() * lat2.cos();
    let c = 2.0 * h.sqrt().atan2((1.0 - h).sqrt());
    EARTH_RADIUS_KM * c
}

pub struct GeoCache {
    conn: Mutex<Connection>,
    provider: Box<dyn GeocodeProvider>,
}

impl GeoCache {
    pub fn open(path: &Path, provider: Box<dyn GeocodeProvider>) -> Result<Self> {
        let conn = Connection::open(path).map_err(Error::write("open geocode cache"))?;
        Self::with_connection(conn, provider)
    }

    pub fn open_in_memory(provider: Box<dyn GeocodeProvider>) -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(Error::write("open geocode cache"))?;
        Self::with_connection(conn, provider)
    }

    fn with_connection(conn: Connection, provider: Box<dyn GeocodeProvider>) -> Result<Self> {
        conn.execute_batch(SCHEMA)
            .map_err(Error::write("run geocode schema"))?;
        Ok(Self {
            conn: Mutex::new(conn),
            provider,
        })
    }

    /// Resolve a place name, consulting the provider only on a cache miss.
    pub fn locate(&self, place: &str) -> Result<Location> {
        if let Some(location) = self.cached(place)? {
            return Ok(location);
        }

        let wanted = place.to_lowercase();
        let feature = self
            .provider
            .lookup(place)?
            .into_iter()
            .find(|f| f.label.to_lowercase() == wanted)
            .ok_or_else(|| Error::NotFound(format!("location {}", place)))?;

        if let Err(e) = self.remember(&feature.label, feature.location) {
            tracing::warn!(place, "Failed to cache location: {}", e);
        }
        Ok(feature.location)
    }

    /// Distance between two named places.
    pub fn distance(&self, from: &str, to: &str) -> Result<f64> {
        Ok(distance_km(self.locate(from)?, self.locate(to)?))
    }

    fn cached(&self, place: &str) -> Result<Option<Location>> {
        let conn = self.conn.blocking_lock();
        conn.query_row(
            "SELECT latitude, longitude FROM locations WHERE name = ?1 COLLATE NOCASE",
            params![place],
            |row| {
                Ok(Location {
                    latitude: row.get(0)?,
                    longitude: row.get(1)?,
                })
            },
        )
        .optional()
        .map_err(Error::read("lookup cached location"))
    }

    fn remember(&self, name: &str, location: Location) -> Result<()> {
        let conn = self.conn.blocking_lock();
        conn.execute(
            "INSERT OR IGNORE INTO locations (name, latitude, longitude) VALUES (?1, ?2, ?3)",
            params![name, location.latitude, location.longitude],
        )
        .map_err(Error::write("cache location"))?;
        Ok(())
    }
}
