//! Static ground-site propagator.

use astrons_core::{Config, Geodetic, Propagator, StateVector};

// WGS-84 ellipsoid, kilometres.
const WGS84_A_KM: f64 = 6378.137;
const WGS84_F: f64 = 1.0 / 298.257_223_563;

/// A fixed geodetic site (ground station, fiber terminal, city).
///
/// `location_at` is constant; `coordinates_at` is the WGS-84 ECEF vector
/// with zero velocity. Inertial-frame conversion belongs to the orbital
/// collaborators, not the core.
#[derive(Debug, Clone)]
pub struct GeoPoint {
    lat_deg: f64,
    lon_deg: f64,
    alt_km: f64,
}

impl GeoPoint {
    pub fn new(lat_deg: f64, lon_deg: f64, alt_km: f64) -> Self {
        GeoPoint {
            lat_deg,
            lon_deg,
            alt_km,
        }
    }

    /// Construct from a propagator descriptor (`Lat_deg`, `Lon_deg`,
    /// `Alt_km`; all default to zero).
    pub fn from_config(config: &Config) -> Self {
        GeoPoint {
            lat_deg: config.f64("Lat_deg").unwrap_or(0.0),
            lon_deg: config.f64("Lon_deg").unwrap_or(0.0),
            alt_km: config.f64("Alt_km").unwrap_or(0.0),
        }
    }
}

impl Propagator for GeoPoint {
    fn location_at(&self, _simtime: f64) -> (Geodetic, [f64; 3]) {
        (
            Geodetic {
                lat_deg: self.lat_deg,
                lon_deg: self.lon_deg,
                alt_km: self.alt_km,
            },
            [0.0, 0.0, 0.0],
        )
    }

    fn coordinates_at(&self, _simtime: f64) -> StateVector {
        let lat = self.lat_deg.to_radians();
        let lon = self.lon_deg.to_radians();
        let e2 = WGS84_F * (2.0 - WGS84_F);
        let n = WGS84_A_KM / (1.0 - e2 * lat.sin().powi(2)).sqrt();
        StateVector {
            position_km: [
                (n + self.alt_km) * lat.cos() * lon.cos(),
                (n + self.alt_km) * lat.cos() * lon.sin(),
                (n * (1.0 - e2) + self.alt_km) * lat.sin(),
            ],
            velocity_km_s: [0.0, 0.0, 0.0],
        }
    }
}
