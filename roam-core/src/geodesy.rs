//! Geodesic distance and Web Mercator projection.

/// Mean Earth radius used for great-circle distances, in metres.
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Spherical radius of the Web Mercator projection, in metres.
pub const WEB_MERCATOR_RADIUS_M: f64 = 6_378_137.0;

/// Latitude clamp of the Web Mercator projection, in degrees.
pub const WEB_MERCATOR_MAX_LAT_DEG: f64 = 85.051_128_78;

/// Great-circle distance between two WGS84 coordinates, in metres.
///
/// # Examples
/// ```rust
/// use roam_core::haversine_m;
///
/// let d = haversine_m(52.0907, 5.1214, 52.0860, 5.1207);
/// assert!((d - 523.0).abs() < 5.0);
/// ```
#[must_use]
pub fn haversine_m(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let lat1_rad = lat1.to_radians();
    let lat2_rad = lat2.to_radians();
    let dlat = (lat2 - lat1).to_radians();
    let dlon = (lon2 - lon1).to_radians();

    let sin_dlat = (dlat / 2.0).sin();
    let sin_dlon = (dlon / 2.0).sin();
    let h = sin_dlat * sin_dlat + lat1_rad.cos() * lat2_rad.cos() * sin_dlon * sin_dlon;
    let c = 2.0 * h.sqrt().atan2((1.0 - h).sqrt());
    EARTH_RADIUS_M * c
}

/// Project a WGS84 coordinate to spherical Web Mercator metres.
///
/// Latitude is clamped to ±[`WEB_MERCATOR_MAX_LAT_DEG`] before projection.
#[must_use]
pub fn wgs84_to_web_mercator(lat: f64, lon: f64) -> (f64, f64) {
    let lat = lat.clamp(-WEB_MERCATOR_MAX_LAT_DEG, WEB_MERCATOR_MAX_LAT_DEG);
    let lat_rad = lat.to_radians();
    let lon_rad = lon.to_radians();

    let x = WEB_MERCATOR_RADIUS_M * lon_rad;
    let y = WEB_MERCATOR_RADIUS_M * (std::f64::consts::FRAC_PI_4 + lat_rad / 2.0).tan().ln();
    (x, y)
}

/// Inverse of [`wgs84_to_web_mercator`], returning `(lat, lon)` degrees.
#[must_use]
pub fn web_mercator_to_wgs84(x: f64, y: f64) -> (f64, f64) {
    let lon = (x / WEB_MERCATOR_RADIUS_M).to_degrees();
    let lat_rad = 2.0 * (y / WEB_MERCATOR_RADIUS_M).exp().atan() - std::f64::consts::FRAC_PI_2;
    (lat_rad.to_degrees(), lon)
}

/// Report whether `(lat, lon)` lies inside the WGS84 coordinate domain.
#[must_use]
pub fn is_valid_coordinate(lat: f64, lon: f64) -> bool {
    lat.is_finite() && lon.is_finite() && (-90.0..=90.0).contains(&lat)
        && (-180.0..=180.0).contains(&lon)
}
