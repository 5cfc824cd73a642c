//! Geographic primitives: locations, sectors and globe coordinates.
//!
//! All angles are in degrees. Cartesian positions use a spherical globe with
//! the same axis convention as ECEF (Z through the north pole, X through
//! latitude 0 / longitude 0).

use glam::DVec3;
use serde::{Deserialize, Serialize};

/// Mean equatorial radius used when no globe radius is configured.
pub const EARTH_RADIUS: f64 = 6_378_137.0;

/// A geographic location in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LatLon {
    /// Latitude in degrees, positive north.
    pub lat: f64,
    /// Longitude in degrees, positive east.
    pub lon: f64,
}

impl LatLon {
    /// Create a location from degrees.
    #[must_use]
    pub const fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }
}

/// An axis-aligned latitude/longitude rectangle.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sector {
    /// Southern edge.
    pub min_lat: f64,
    /// Northern edge.
    pub max_lat: f64,
    /// Western edge.
    pub min_lon: f64,
    /// Eastern edge.
    pub max_lon: f64,
}

impl Sector {
    /// The whole globe.
    pub const FULL_SPHERE: Sector = Sector {
        min_lat: -90.0,
        max_lat: 90.0,
        min_lon: -180.0,
        max_lon: 180.0,
    };

    /// Create a sector from its edges.
    #[must_use]
    pub const fn new(min_lat: f64, max_lat: f64, min_lon: f64, max_lon: f64) -> Self {
        Self {
            min_lat,
            max_lat,
            min_lon,
            max_lon,
        }
    }

    /// Latitude span in degrees.
    #[must_use]
    pub fn delta_lat(&self) -> f64 {
        self.max_lat - self.min_lat
    }

    /// Longitude span in degrees.
    #[must_use]
    pub fn delta_lon(&self) -> f64 {
        self.max_lon - self.min_lon
    }

    /// Midpoint of the sector.
    #[must_use]
    pub fn centroid(&self) -> LatLon {
        LatLon::new(
            (self.min_lat + self.max_lat) * 0.5,
            (self.min_lon + self.max_lon) * 0.5,
        )
    }

    /// Whether the location lies inside the sector, edges included.
    #[must_use]
    pub fn contains(&self, location: LatLon) -> bool {
        location.lat >= self.min_lat
            && location.lat <= self.max_lat
            && location.lon >= self.min_lon
            && location.lon <= self.max_lon
    }

    /// Whether the two sectors overlap with positive area.
    ///
    /// Sectors that only share an edge or corner do not intersect.
    #[must_use]
    pub fn intersects(&self, other: &Sector) -> bool {
        self.min_lat < other.max_lat
            && self.max_lat > other.min_lat
            && self.min_lon < other.max_lon
            && self.max_lon > other.min_lon
    }

    /// The overlapping part of two sectors, if it has positive area.
    #[must_use]
    pub fn intersection(&self, other: &Sector) -> Option<Sector> {
        if !self.intersects(other) {
            return None;
        }
        Some(Sector::new(
            self.min_lat.max(other.min_lat),
            self.max_lat.min(other.max_lat),
            self.min_lon.max(other.min_lon),
            self.max_lon.min(other.max_lon),
        ))
    }

    /// Area in square degrees.
    #[must_use]
    pub fn area_deg2(&self) -> f64 {
        self.delta_lat() * self.delta_lon()
    }

    /// Split into quadrants `[SW, SE, NW, NE]` by angular bisection.
    ///
    /// Adjacent quadrants share the exact same midpoint value, so the union
    /// of the four reproduces the parent with no gaps or overlap.
    #[must_use]
    pub fn subdivide(&self) -> [Sector; 4] {
        let mid_lat = (self.min_lat + self.max_lat) * 0.5;
        let mid_lon = (self.min_lon + self.max_lon) * 0.5;
        [
            Sector::new(self.min_lat, mid_lat, self.min_lon, mid_lon),
            Sector::new(self.min_lat, mid_lat, mid_lon, self.max_lon),
            Sector::new(mid_lat, self.max_lat, self.min_lon, mid_lon),
            Sector::new(mid_lat, self.max_lat, mid_lon, self.max_lon),
        ]
    }

    /// Corners in counter-clockwise order starting at the south-west.
    #[must_use]
    pub fn corners(&self) -> [LatLon; 4] {
        [
            LatLon::new(self.min_lat, self.min_lon),
            LatLon::new(self.min_lat, self.max_lon),
            LatLon::new(self.max_lat, self.max_lon),
            LatLon::new(self.max_lat, self.min_lon),
        ]
    }

    /// Bounding sphere `(center, radius)` of the sector's surface patch
    /// between two elevations above a globe of radius `globe_radius`.
    #[must_use]
    pub fn bounding_sphere(
        &self,
        globe_radius: f64,
        min_elevation: f64,
        max_elevation: f64,
    ) -> (DVec3, f64) {
        let centroid = self.centroid();
        let mut points = Vec::with_capacity(18);
        for elevation in [min_elevation, max_elevation] {
            let r = globe_radius + elevation;
            for corner in self.corners() {
                points.push(lat_lon_to_cartesian(corner.lat, corner.lon, r));
            }
            points.push(lat_lon_to_cartesian(centroid.lat, centroid.lon, r));
            for edge_mid in [
                LatLon::new(self.min_lat, centroid.lon),
                LatLon::new(self.max_lat, centroid.lon),
                LatLon::new(centroid.lat, self.min_lon),
                LatLon::new(centroid.lat, self.max_lon),
            ] {
                points.push(lat_lon_to_cartesian(edge_mid.lat, edge_mid.lon, r));
            }
        }

        #[allow(clippy::cast_precision_loss)]
        let center = points.iter().copied().sum::<DVec3>() / points.len() as f64;
        let radius = points
            .iter()
            .map(|p| p.distance(center))
            .fold(0.0_f64, f64::max);
        (center, radius)
    }
}

/// Convert latitude, longitude (degrees) and radius to cartesian coordinates.
///
/// Uses a spherical globe.
#[must_use]
pub fn lat_lon_to_cartesian(lat_deg: f64, lon_deg: f64, radius: f64) -> DVec3 {
    let lat_rad = lat_deg.to_radians();
    let lon_rad = lon_deg.to_radians();
    DVec3::new(
        radius * lat_rad.cos() * lon_rad.cos(),
        radius * lat_rad.cos() * lon_rad.sin(),
        radius * lat_rad.sin(),
    )
}

/// Convert cartesian coordinates back to a location (degrees).
#[must_use]
pub fn cartesian_to_lat_lon(position: DVec3) -> LatLon {
    let lat_rad = (position.z / position.length()).asin();
    let lon_rad = position.y.atan2(position.x);
    LatLon::new(lat_rad.to_degrees(), lon_rad.to_degrees())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_subdivide_quadrant_order() {
        let sector = Sector::new(-10.0, 10.0, -20.0, 20.0);
        let [sw, se, nw, ne] = sector.subdivide();
        assert_eq!(sw, Sector::new(-10.0, 0.0, -20.0, 0.0));
        assert_eq!(se, Sector::new(-10.0, 0.0, 0.0, 20.0));
        assert_eq!(nw, Sector::new(0.0, 10.0, -20.0, 0.0));
        assert_eq!(ne, Sector::new(0.0, 10.0, 0.0, 20.0));
    }

    #[test]
    fn test_edge_touching_sectors_do_not_intersect() {
        let a = Sector::new(0.0, 10.0, 0.0, 10.0);
        let b = Sector::new(10.0, 20.0, 0.0, 10.0);
        assert!(!a.intersects(&b));
        assert!(a.intersection(&b).is_none());
        assert!(a.intersects(&Sector::new(5.0, 15.0, 5.0, 15.0)));
    }

    #[test]
    fn test_cartesian_round_trip() {
        let p = lat_lon_to_cartesian(45.0, -120.0, EARTH_RADIUS);
        let back = cartesian_to_lat_lon(p);
        assert!((back.lat - 45.0).abs() < 1e-9);
        assert!((back.lon + 120.0).abs() < 1e-9);
    }

    #[test]
    fn test_bounding_sphere_contains_corners() {
        let sector = Sector::new(10.0, 20.0, 30.0, 40.0);
        let (center, radius) = sector.bounding_sphere(EARTH_RADIUS, 0.0, 1000.0);
        for corner in sector.corners() {
            let p = lat_lon_to_cartesian(corner.lat, corner.lon, EARTH_RADIUS);
            assert!(p.distance(center) <= radius + 1e-6);
        }
    }

    proptest! {
        #[test]
        fn test_subdivide_covers_parent_exactly(
            min_lat in -90.0f64..80.0,
            dlat in 0.001f64..10.0,
            min_lon in -180.0f64..170.0,
            dlon in 0.001f64..10.0,
        ) {
            let parent = Sector::new(min_lat, min_lat + dlat, min_lon, min_lon + dlon);
            let children = parent.subdivide();

            // Shared edges are bit-identical.
            prop_assert_eq!(children[0].max_lon, children[1].min_lon);
            prop_assert_eq!(children[0].max_lat, children[2].min_lat);
            prop_assert_eq!(children[3].min_lat, children[1].max_lat);
            prop_assert_eq!(children[3].min_lon, children[2].max_lon);

            // No pair overlaps with positive area.
            for i in 0..4 {
                for j in (i + 1)..4 {
                    prop_assert!(!children[i].intersects(&children[j]));
                }
            }

            let area: f64 = children.iter().map(Sector::area_deg2).sum();
            prop_assert!((area - parent.area_deg2()).abs() <= parent.area_deg2() * 1e-9);
        }
    }
}
