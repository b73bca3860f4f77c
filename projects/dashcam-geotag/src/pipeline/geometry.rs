use geo::HaversineBearing;
use geo_types::{Coord, Point};

/// Spherical Web-Mercator radius (meters)
pub const MERCATOR_RADIUS: f64 = 6_378_137.0;

/// Projects (lon, lat) degrees to planar meters. The northing keeps the
/// dashcam tooling's scaling (ln(tan) times meters per degree), which is
/// 180/pi smaller than true Web-Mercator.
pub fn project(longitude: f64, latitude: f64) -> Coord<f64> {
    let scale = MERCATOR_RADIUS * std::f64::consts::PI / 180.0;
    let x = longitude * scale;
    let y = ((90.0 + latitude) * std::f64::consts::PI / 360.0).tan().ln() * scale;
    Coord { x, y }
}

/// Ground distance between consecutive projected points: planar Euclidean
/// distance scaled by cos(latitude). Never negative.
pub fn ground_step(from: Coord<f64>, to: Coord<f64>, latitude: f64) -> f64 {
    let planar = (to.x - from.x).hypot(to.y - from.y);
    let step = planar * latitude.to_radians().cos().max(0.0);
    if step.is_finite() {
        step
    } else {
        0.0
    }
}

/// Initial great-circle heading from one (lat, lon) to another, [0, 360).
pub fn initial_bearing(from: (f64, f64), to: (f64, f64)) -> f64 {
    let a = Point::new(from.1, from.0);
    let b = Point::new(to.1, to.0);
    normalize_bearing(a.haversine_bearing(b))
}

/// Wraps any bearing into [0, 360). Non-finite input maps to 0.
pub fn normalize_bearing(bearing: f64) -> f64 {
    if !bearing.is_finite() {
        return 0.0;
    }
    let wrapped = bearing.rem_euclid(360.0);
    // rem_euclid can round up to exactly 360 for tiny negative inputs.
    if wrapped >= 360.0 {
        0.0
    } else {
        wrapped
    }
}
