//! Positional-model boundary.
//!
//! A meta-node may carry a propagator answering "where is this platform at
//! virtual time t". The core depends only on this trait; concrete orbit or
//! ephemeris models live with the domain nodes.

/// Geodetic position: degrees, degrees, kilometres above the ellipsoid.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Geodetic {
    pub lat_deg: f64,
    pub lon_deg: f64,
    pub alt_km: f64,
}

/// Cartesian state: kilometres and kilometres per second.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StateVector {
    pub position_km: [f64; 3],
    pub velocity_km_s: [f64; 3],
}

/// A positional model attached to a meta-node.
///
/// `simtime` is seconds since the simulation epoch.
pub trait Propagator: std::fmt::Debug + Send {
    /// Geodetic location plus ground velocity (km/s) at `simtime`.
    fn location_at(&self, simtime: f64) -> (Geodetic, [f64; 3]);

    /// Cartesian position and velocity at `simtime`.
    fn coordinates_at(&self, simtime: f64) -> StateVector;
}
