//! The camera as tile selection sees it: a culling volume for sector
//! bounding spheres and a ground resolution to compare level texel sizes
//! against.

use crate::level::Level;
use glam::{DMat4, DVec3, DVec4};

/// Six inward-facing clip planes. Each plane is `(a, b, c, d)` with a unit
/// normal; a point is inside when `a·x + b·y + c·z + d >= 0`.
#[derive(Debug, Clone, Copy)]
pub struct Frustum {
    planes: [DVec4; 6],
}

impl Frustum {
    /// Extract the clip planes of a combined projection and view matrix.
    #[must_use]
    pub fn from_matrix(view_projection: DMat4) -> Self {
        let [x, y, z, w] = [0, 1, 2, 3].map(|i| view_projection.row(i));
        Self {
            planes: [w + x, w - x, w + y, w - y, w + z, w - z].map(unit_plane),
        }
    }

    /// Culls nothing. Used when tiles are selected without a camera.
    #[must_use]
    pub fn unbounded() -> Self {
        Self {
            planes: [DVec4::new(0.0, 0.0, 0.0, f64::INFINITY); 6],
        }
    }

    /// Whether any part of the sphere may be inside.
    #[must_use]
    pub fn intersects_sphere(&self, center: DVec3, radius: f64) -> bool {
        self.planes
            .iter()
            .all(|plane| plane.truncate().dot(center) + plane.w >= -radius)
    }
}

fn unit_plane(plane: DVec4) -> DVec4 {
    let length = plane.truncate().length();
    if length > 0.0 { plane / length } else { DVec4::ZERO }
}

/// Ground resolution of the screen as a function of distance from the eye.
///
/// A level is detailed enough at a distance when one of its texels covers
/// no more ground than one screen pixel does there.
#[derive(Debug, Clone, Copy)]
pub struct LodMetrics {
    eye: DVec3,
    /// Meters covered by one pixel per meter of distance.
    pixel_spread: f64,
    /// Multiplier on the acceptable texel size; above one selects coarser
    /// levels.
    pub detail_bias: f64,
}

impl LodMetrics {
    /// Metrics for a perspective camera at `eye` with vertical field of view
    /// `fov_y` radians over a viewport `viewport_height` pixels tall.
    #[must_use]
    pub fn new(eye: DVec3, fov_y: f64, viewport_height: f64) -> Self {
        Self {
            eye,
            pixel_spread: 2.0 * (fov_y * 0.5).tan() / viewport_height,
            detail_bias: 1.0,
        }
    }

    #[must_use]
    pub fn eye(&self) -> DVec3 {
        self.eye
    }

    /// Gap between the eye and the surface of a bounding sphere; zero when
    /// the eye is inside it.
    #[must_use]
    pub fn distance_to_sphere(&self, center: DVec3, radius: f64) -> f64 {
        (self.eye.distance(center) - radius).max(0.0)
    }

    /// Meters of ground one pixel covers at `distance`.
    #[must_use]
    pub fn meters_per_pixel(&self, distance: f64) -> f64 {
        distance * self.pixel_spread * self.detail_bias
    }

    /// Coarsest acceptable texel size at `distance`, in radians of arc on a
    /// globe of `globe_radius`. Comparable with [`Level::texel_size`] and
    /// suitable for `LevelSet::level_for_texel_size`.
    #[must_use]
    pub fn wanted_texel_size(&self, distance: f64, globe_radius: f64) -> f64 {
        self.meters_per_pixel(distance) / globe_radius
    }

    /// Whether tiles of `level` at `distance` are too coarse and should be
    /// replaced by their children.
    #[must_use]
    pub fn should_refine(&self, level: &Level, distance: f64, globe_radius: f64) -> bool {
        distance <= 0.0 || level.texel_size() > self.wanted_texel_size(distance, globe_radius)
    }
}

/// Camera state for one frame of tile selection.
#[derive(Debug, Clone, Copy)]
pub struct View {
    pub frustum: Frustum,
    pub lod: LodMetrics,
}

impl View {
    #[must_use]
    pub fn new(frustum: Frustum, lod: LodMetrics) -> Self {
        Self { frustum, lod }
    }

    /// Eye position in world space.
    #[must_use]
    pub fn eye(&self) -> DVec3 {
        self.lod.eye()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        geo::{EARTH_RADIUS, Sector, lat_lon_to_cartesian},
        level::LevelSet,
        testing::test_config,
    };
    use std::f64::consts::FRAC_PI_3;

    fn levels() -> LevelSet {
        // 36, 18, 9, 4.5, 2.25, 1.125 degree tiles of 256 texels.
        LevelSet::from_config(&test_config(6, 36.0, Sector::FULL_SPHERE)).unwrap()
    }

    fn metrics() -> LodMetrics {
        LodMetrics::new(DVec3::ZERO, FRAC_PI_3, 1080.0)
    }

    /// Distance at which `level` texels are just small enough.
    fn distance_for(metrics: &LodMetrics, level: &Level) -> f64 {
        level.texel_size() * EARTH_RADIUS / metrics.pixel_spread * 1.0001
    }

    #[test]
    fn test_wanted_texel_size_picks_level() {
        let levels = levels();
        let metrics = metrics();
        let level3 = levels.level(3).unwrap();
        let distance = distance_for(&metrics, level3);

        let wanted = metrics.wanted_texel_size(distance, EARTH_RADIUS);
        assert_eq!(levels.level_for_texel_size(wanted).number(), 3);
        assert!(metrics.should_refine(levels.level(2).unwrap(), distance, EARTH_RADIUS));
        assert!(!metrics.should_refine(level3, distance, EARTH_RADIUS));
        assert!(!metrics.should_refine(levels.level(4).unwrap(), distance, EARTH_RADIUS));
    }

    #[test]
    fn test_halving_distance_steps_one_level_finer() {
        let levels = levels();
        let metrics = metrics();
        let mut distance = distance_for(&metrics, levels.level(1).unwrap());
        for expected in 1..=5 {
            let wanted = metrics.wanted_texel_size(distance, EARTH_RADIUS);
            assert_eq!(levels.level_for_texel_size(wanted).number(), expected);
            distance *= 0.5;
        }

        // Nothing is fine enough this close; the finest level is used.
        let wanted = metrics.wanted_texel_size(distance * 0.5, EARTH_RADIUS);
        assert_eq!(levels.level_for_texel_size(wanted).number(), 5);
    }

    #[test]
    fn test_detail_bias_coarsens() {
        let levels = levels();
        let mut metrics = metrics();
        let distance = distance_for(&metrics, levels.level(3).unwrap());
        metrics.detail_bias = 2.0;
        let wanted = metrics.wanted_texel_size(distance, EARTH_RADIUS);
        assert_eq!(levels.level_for_texel_size(wanted).number(), 2);
    }

    #[test]
    fn test_eye_inside_tile_sphere_refines() {
        let levels = levels();
        let eye = lat_lon_to_cartesian(10.0, 20.0, EARTH_RADIUS + 50.0);
        let metrics = LodMetrics::new(eye, FRAC_PI_3, 1080.0);
        let sector = levels.level(5).unwrap().tile_sector(88, 177);
        let (center, radius) = sector.bounding_sphere(EARTH_RADIUS, 0.0, 100.0);

        assert!(sector.contains(crate::geo::LatLon::new(10.0, 20.0)));
        assert_eq!(metrics.distance_to_sphere(center, radius), 0.0);
        assert!(metrics.should_refine(levels.last_level(), 0.0, EARTH_RADIUS));
    }

    #[test]
    fn test_frustum_culls_sector_spheres() {
        let eye = lat_lon_to_cartesian(0.0, 0.0, EARTH_RADIUS + 1_000_000.0);
        let north = lat_lon_to_cartesian(90.0, 0.0, 1.0);
        let projection = DMat4::perspective_rh(FRAC_PI_3, 1.0, 1_000.0, 1.0e8);
        let camera = DMat4::look_at_rh(eye, DVec3::ZERO, north);
        let frustum = Frustum::from_matrix(projection * camera);

        let below = Sector::new(-5.0, 5.0, -5.0, 5.0);
        let (center, radius) = below.bounding_sphere(EARTH_RADIUS, 0.0, 1000.0);
        assert!(frustum.intersects_sphere(center, radius));

        // A quarter of the way around the globe lies well outside the
        // 30 degree half angle.
        let aside = Sector::new(-5.0, 5.0, 85.0, 95.0);
        let (center, radius) = aside.bounding_sphere(EARTH_RADIUS, 0.0, 1000.0);
        assert!(!frustum.intersects_sphere(center, radius));

        // Beyond the far plane.
        let far = -eye * 15.0;
        assert!(!frustum.intersects_sphere(far, 1.0));
    }

    #[test]
    fn test_unbounded_frustum_accepts_everything() {
        let frustum = Frustum::unbounded();
        let (center, radius) = Sector::FULL_SPHERE.bounding_sphere(EARTH_RADIUS, 0.0, 0.0);
        assert!(frustum.intersects_sphere(center, radius));
        assert!(frustum.intersects_sphere(DVec3::new(1e12, -1e12, 3.0), 0.0));
    }
}
