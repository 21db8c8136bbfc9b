//! Test helpers for common setup and coordinate arithmetic.

use crate::geo::Geocoordinate;

/// Meters per degree of latitude (close enough for test offsets).
const METERS_PER_DEGREE_LAT: f64 = 111_320.0;

/// Build a coordinate, panicking on invalid input.
///
/// # Panics
///
/// Panics if the pair is outside the WGS-84 domain.
pub fn coord(lat: f64, lng: f64) -> Geocoordinate {
    Geocoordinate::new(lat, lng).expect("test coordinate should be valid")
}

/// A point `meters` due north of `origin`, for placing drivers at known
/// distances from a pickup.
pub fn offset_north_m(origin: Geocoordinate, meters: f64) -> Geocoordinate {
    coord(origin.lat + meters / METERS_PER_DEGREE_LAT, origin.lng)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::haversine_meters;

    #[test]
    fn offset_north_lands_near_requested_distance() {
        let origin = coord(37.77, -122.42);
        let moved = offset_north_m(origin, 2_000.0);
        let d = haversine_meters(origin, moved);
        assert!((d - 2_000.0).abs() < 20.0, "got {d}");
    }
}
