/// Mean Earth radius used for great-circle distances
pub const EARTH_RADIUS_METERS: f64 = 6_371_000.0;

pub const METERS_PER_FOOT: f64 = 0.3048;

pub fn feet_to_meters(feet: f64) -> f64 {
    feet * METERS_PER_FOOT
}

/// Great-circle distance between two points, in meters.
pub fn haversine_meters(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let (phi1, phi2) = (lat1.to_radians(), lat2.to_radians());
    let d_phi = (lat2 - lat1).to_radians();
    let d_lambda = (lon2 - lon1).to_radians();

    let a = (d_phi / 2.0).sin().powi(2)
        + phi1.cos() * phi2.cos() * (d_lambda / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());
    EARTH_RADIUS_METERS * c
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_distance() {
        assert_eq!(haversine_meters(40.0, -74.0, 40.0, -74.0), 0.0);
    }

    #[test]
    fn test_known_distances() {
        // One degree of latitude is ~111.19 km on a 6371 km sphere
        let one_degree = haversine_meters(0.0, 0.0, 1.0, 0.0);
        assert!((one_degree - 111_194.9).abs() < 1.0);

        // JFK to LAX, ~3974 km on the same sphere
        let d = haversine_meters(40.6413, -73.7781, 33.9416, -118.4085);
        assert!((d - 3_974_336.0).abs() < 100.0);
    }

    #[test]
    fn test_symmetric() {
        let a = haversine_meters(51.5, -0.12, 48.85, 2.35);
        let b = haversine_meters(48.85, 2.35, 51.5, -0.12);
        assert!((a - b).abs() < 1e-6);
    }

    #[test]
    fn test_feet_conversion() {
        assert!((feet_to_meters(100.0) - 30.48).abs() < 1e-9);
    }
}
