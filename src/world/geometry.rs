//! Axis-aligned bounds and the two queries the snapshot builder and the grab
//! modules need: sphere overlap for near grabs and ray casts for far grabs.

use glam::Vec3;

/// Axis-aligned bounding box in world space
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Aabb {
    pub min: Vec3,
    pub max: Vec3,
}

impl Aabb {
    pub fn from_center_dimensions(center: Vec3, dimensions: Vec3) -> Self {
        let half = dimensions.abs() * 0.5;
        Self {
            min: center - half,
            max: center + half,
        }
    }

    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    pub fn contains(&self, point: Vec3) -> bool {
        point.cmpge(self.min).all() && point.cmple(self.max).all()
    }

    pub fn closest_point(&self, point: Vec3) -> Vec3 {
        point.clamp(self.min, self.max)
    }

    /// Distance from `point` to the surface of the box, zero when inside
    pub fn distance_to(&self, point: Vec3) -> f32 {
        self.closest_point(point).distance(point)
    }

    pub fn intersects_sphere(&self, center: Vec3, radius: f32) -> bool {
        self.closest_point(center).distance_squared(center) <= radius * radius
    }

    /// Slab test. Returns the distance along `direction` to the first hit,
    /// or zero when `origin` is already inside the box.
    pub fn ray_intersection(&self, origin: Vec3, direction: Vec3) -> Option<f32> {
        let direction = direction.try_normalize()?;
        let mut t_min = 0.0_f32;
        let mut t_max = f32::INFINITY;

        for axis in 0..3 {
            let o = origin[axis];
            let d = direction[axis];
            let (lo, hi) = (self.min[axis], self.max[axis]);

            if d.abs() < f32::EPSILON {
                if o < lo || o > hi {
                    return None;
                }
                continue;
            }

            let inv = 1.0 / d;
            let mut t0 = (lo - o) * inv;
            let mut t1 = (hi - o) * inv;
            if t0 > t1 {
                std::mem::swap(&mut t0, &mut t1);
            }
            t_min = t_min.max(t0);
            t_max = t_max.min(t1);
            if t_min > t_max {
                return None;
            }
        }

        Some(t_min)
    }

    /// Outward normal of the face nearest to `point`
    pub fn face_normal(&self, point: Vec3) -> Vec3 {
        let faces = [
            (point.x - self.min.x, Vec3::NEG_X),
            (self.max.x - point.x, Vec3::X),
            (point.y - self.min.y, Vec3::NEG_Y),
            (self.max.y - point.y, Vec3::Y),
            (point.z - self.min.z, Vec3::NEG_Z),
            (self.max.z - point.z, Vec3::Z),
        ];
        faces
            .into_iter()
            .min_by(|a, b| a.0.abs().total_cmp(&b.0.abs()))
            .map_or(Vec3::Y, |(_, normal)| normal)
    }
}
