//! Geographic math for proximity rooms and nearby-task queries.
//!
//! Two concerns live here:
//!
//! - **Great-circle distance** (Haversine, Earth radius 6371 km), used for
//!   radius queries over contractor locations
//! - **Coordinate bucketing** (rounding to 0.01°), used to derive proximity
//!   room names so nearby contractors share a room instead of each exact
//!   coordinate getting its own

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Mean Earth radius in kilometres.
pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// Bucket granularity: coordinates are rounded to 0.01° (~1.1 km of
/// latitude) when deriving proximity room names.
const BUCKET_SCALE: f64 = 100.0;

/// A geographic point in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    /// Latitude in degrees, -90..=90.
    pub lat: f64,
    /// Longitude in degrees, -180..=180.
    pub lng: f64,
}

impl GeoPoint {
    /// Creates a point, validating coordinate ranges.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidCoordinate`] if latitude is outside -90..=90
    /// or longitude is outside -180..=180, or either value is not finite.
    pub fn new(lat: f64, lng: f64) -> Result<Self> {
        if !lat.is_finite() || !(-90.0..=90.0).contains(&lat) {
            return Err(Error::InvalidCoordinate {
                message: format!("latitude {lat} out of range -90..=90"),
            });
        }
        if !lng.is_finite() || !(-180.0..=180.0).contains(&lng) {
            return Err(Error::InvalidCoordinate {
                message: format!("longitude {lng} out of range -180..=180"),
            });
        }
        Ok(Self { lat, lng })
    }

    /// Returns the bucketed (rounded to 0.01°) latitude scaled to an integer.
    #[must_use]
    pub fn lat_bucket(&self) -> i32 {
        bucket(self.lat)
    }

    /// Returns the bucketed (rounded to 0.01°) longitude scaled to an integer.
    #[must_use]
    pub fn lng_bucket(&self) -> i32 {
        bucket(self.lng)
    }
}

/// Rounds a coordinate to 0.01° and scales it to an integer bucket.
///
/// Integer buckets make room names exact: `29.4241` and `29.4236` both map
/// to bucket `2942`, and formatting never depends on float printing.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn bucket(coord: f64) -> i32 {
    (coord * BUCKET_SCALE).round() as i32
}

/// Formats an integer bucket back into its 0.01°-precision coordinate form.
#[must_use]
pub fn bucket_label(bucket: i32) -> String {
    format!("{:.2}", f64::from(bucket) / BUCKET_SCALE)
}

/// Great-circle distance between two points in kilometres (Haversine).
#[must_use]
pub fn haversine_km(a: GeoPoint, b: GeoPoint) -> f64 {
    let lat_a = a.lat.to_radians();
    let lat_b = b.lat.to_radians();
    let d_lat = (b.lat - a.lat).to_radians();
    let d_lng = (b.lng - a.lng).to_radians();

    let h = (d_lat / 2.0).sin().powi(2) + lat_a.cos() * lat_b.cos() * (d_lng / 2.0).sin().powi(2);

    2.0 * EARTH_RADIUS_KM * h.sqrt().asin()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn san_antonio() -> GeoPoint {
        GeoPoint::new(29.4241, -98.4936).unwrap()
    }

    fn austin() -> GeoPoint {
        GeoPoint::new(30.2672, -97.7431).unwrap()
    }

    #[test]
    fn distance_is_zero_for_identical_points() {
        let p = san_antonio();
        assert_eq!(haversine_km(p, p), 0.0);
    }

    #[test]
    fn distance_is_symmetric() {
        let a = san_antonio();
        let b = austin();
        assert!((haversine_km(a, b) - haversine_km(b, a)).abs() < 1e-9);
    }

    #[test]
    fn san_antonio_to_austin_is_about_118_km() {
        let d = haversine_km(san_antonio(), austin());
        assert!((d - 118.0).abs() < 3.0, "got {d}");
    }

    #[test]
    fn bucket_rounds_to_hundredths() {
        assert_eq!(bucket(29.4241), 2942);
        assert_eq!(bucket(29.4236), 2942);
        assert_eq!(bucket(-98.4936), -9849);
    }

    #[test]
    fn bucket_label_round_trips() {
        assert_eq!(bucket_label(2942), "29.42");
        assert_eq!(bucket_label(-9849), "-98.49");
    }

    #[test]
    fn rejects_out_of_range_latitude() {
        assert!(GeoPoint::new(90.5, 0.0).is_err());
        assert!(GeoPoint::new(f64::NAN, 0.0).is_err());
    }

    #[test]
    fn rejects_out_of_range_longitude() {
        assert!(GeoPoint::new(0.0, -180.1).is_err());
    }

    #[test]
    fn boundary_coordinates_are_accepted() {
        assert!(GeoPoint::new(90.0, 180.0).is_ok());
        assert!(GeoPoint::new(-90.0, -180.0).is_ok());
    }
}
