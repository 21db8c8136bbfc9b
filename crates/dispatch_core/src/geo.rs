//! Geographic primitives: WGS-84 coordinates and great-circle distances.
//!
//! Spatial bucketing uses H3 cells at resolution 9 (~240m cell size), which is
//! fine-grained enough for city-scale dispatch radii of 1-5 km.

use h3o::{CellIndex, LatLng, Resolution};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Mean Earth radius in meters (spherical approximation).
const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// H3 resolution used for all spatial bucketing.
pub const CELL_RESOLUTION: Resolution = Resolution::Nine;

/// Coordinate outside the WGS-84 domain.
#[derive(Debug, Clone, Copy, PartialEq, Error)]
#[error("invalid coordinate: lat {lat}, lng {lng}")]
pub struct InvalidCoordinate {
    pub lat: f64,
    pub lng: f64,
}

/// A (latitude, longitude) pair on the WGS-84 ellipsoid, in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Geocoordinate {
    pub lat: f64,
    pub lng: f64,
}

impl Geocoordinate {
    /// Build a coordinate, rejecting values outside [-90, 90] x [-180, 180].
    pub fn new(lat: f64, lng: f64) -> Result<Self, InvalidCoordinate> {
        if !lat.is_finite() || !lng.is_finite() || lat.abs() > 90.0 || lng.abs() > 180.0 {
            return Err(InvalidCoordinate { lat, lng });
        }
        Ok(Self { lat, lng })
    }

    /// The H3 cell containing this coordinate at [`CELL_RESOLUTION`].
    pub fn to_cell(self) -> CellIndex {
        LatLng::new(self.lat, self.lng)
            .expect("validated on construction")
            .to_cell(CELL_RESOLUTION)
    }
}

/// Haversine distance between two coordinates, in meters.
pub fn haversine_meters(a: Geocoordinate, b: Geocoordinate) -> f64 {
    let (lat1, lon1) = (a.lat.to_radians(), a.lng.to_radians());
    let (lat2, lon2) = (b.lat.to_radians(), b.lng.to_radians());
    let dlat = lat2 - lat1;
    let dlon = lon2 - lon1;
    let sin_dlat = (dlat * 0.5).sin();
    let sin_dlon = (dlon * 0.5).sin();
    let h = sin_dlat * sin_dlat + lat1.cos() * lat2.cos() * sin_dlon * sin_dlon;
    let c = 2.0 * h.sqrt().atan2((1.0 - h).sqrt());
    EARTH_RADIUS_M * c
}
