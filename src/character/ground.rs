use log::trace;
use rapier3d::prelude::*;

use super::probe::ProbeVolume;
use crate::constants::{ground as consts, physics::EPSILON};
use crate::physics::PhysicsSpace;

/// Ground contact sampled for a character, recomputed every tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GroundState {
    pub on_ground: bool,
    /// Unit normal of the surface under the feet, up when unknown
    pub ground_normal: Vector<Real>,
    /// The sampled normal passed the slope threshold
    pub walkable: bool,
    /// A floor was found within snapping distance during the last pre-step
    pub pulling_to_ground: bool,
    pub can_uncrouch: bool,
    pub can_air_uncrouch: bool,
}

impl Default for GroundState {
    fn default() -> Self {
        Self {
            on_ground: false,
            ground_normal: Vector::y(),
            walkable: true,
            pulling_to_ground: false,
            can_uncrouch: true,
            can_air_uncrouch: true,
        }
    }
}

impl GroundState {
    pub fn on_ground_or_will_be(&self) -> bool {
        self.on_ground || self.pulling_to_ground
    }

    /// Grounded on a surface flat enough to stand on
    pub fn supported(&self) -> bool {
        self.on_ground_or_will_be() && self.walkable
    }
}

/// Checks the thin probe centred on the feet for anything solid.
pub fn test_on_ground(
    space: &mut PhysicsSpace,
    probe: &mut ProbeVolume,
    filter: QueryFilter,
    feet: Vector<Real>,
    radius: f32,
) -> bool {
    let half_width = (radius - consts::GROUND_TEST_RADIUS_NEGATIVE_MARGIN).max(EPSILON);
    probe.place(
        space,
        feet,
        vector![half_width, consts::GROUND_TEST_HALF_HEIGHT, half_width],
    );
    probe.overlaps(space, filter)
}

/// Averages the normals hit by short vertical rays around the feet.
/// Returns the unit normal and whether it is walkable; steep results fall back to up.
pub fn estimate_ground_normal(
    space: &PhysicsSpace,
    filter: QueryFilter,
    feet: Vector<Real>,
    radius: f32,
    fine: bool,
    slope_threshold: f32,
) -> (Vector<Real>, bool) {
    let diagonals: &[[f32; 2]] = if fine {
        &consts::GROUND_NORMAL_DIAGONAL_OFFSETS
    } else {
        &[]
    };

    let mut sum = Vector::zeros();
    for [ox, oz] in consts::GROUND_NORMAL_OFFSETS.iter().chain(diagonals) {
        let column = feet + vector![ox * radius, 0.0, oz * radius];
        let from = column + vector![0.0, consts::GROUND_NORMAL_RAY_OFFSET, 0.0];
        let to = column - vector![0.0, consts::GROUND_NORMAL_RAY_OFFSET, 0.0];
        if let Some(hit) = space.cast_segment(from, to, filter) {
            sum += hit.normal;
        }
    }

    let length = sum.magnitude();
    if length < EPSILON {
        return (Vector::y(), true);
    }

    let normal = sum / length;
    if normal.dot(&Vector::y()) < slope_threshold {
        return (Vector::y(), false);
    }
    (normal, true)
}

/// Turns a horizontal unit walk direction so it runs along the ground plane
/// while keeping its heading. Zero when there is no direction.
pub fn ground_oriented_direction(walk: Vector<Real>, normal: Vector<Real>) -> Vector<Real> {
    if walk.magnitude_squared() < EPSILON * EPSILON {
        return Vector::zeros();
    }

    let tangent = walk.cross(&normal);
    let tangent_len = tangent.magnitude();
    if tangent_len < EPSILON {
        return Vector::zeros();
    }
    let bitangent = normal.cross(&(tangent / tangent_len));
    let bitangent_len = bitangent.magnitude();
    if bitangent_len < EPSILON {
        return Vector::zeros();
    }
    bitangent / bitangent_len
}

/// Sweeps a flat box from the feet downward. Returns the floor height
/// relative to the feet (negative below), or `None` when nothing is in range.
pub fn probe_floor(
    space: &PhysicsSpace,
    filter: QueryFilter,
    feet: Vector<Real>,
    radius: f32,
    max_distance: f32,
) -> Option<f32> {
    let half_height = consts::GROUND_PULL_BOX_HEIGHT * 0.5;
    let half_width = (radius - EPSILON).max(EPSILON);
    let shape = Cuboid::new(vector![half_width, half_height, half_width]);

    let start_y = feet.y + half_height + EPSILON;
    let end_y = feet.y + half_height - max_distance;
    let start = Isometry::translation(feet.x, start_y, feet.z);

    let hit = space.sweep(&shape, &start, vector![0.0, end_y - start_y, 0.0], filter)?;

    let floor_y = start_y + (end_y - start_y) * hit.fraction - half_height;
    let height = floor_y - feet.y;
    trace!("[Ground] Floor found {:.4} from feet", height);
    Some(height)
}

/// Downward move for one tick that closes a gap of `height` over `settle_time`.
pub fn snap_correction(height: f32, settle_time: f32, dt: f32) -> f32 {
    if height > -EPSILON {
        return 0.0;
    }
    let gap = height.abs();
    let step = if settle_time > EPSILON {
        gap / settle_time * dt
    } else {
        gap
    };
    -step.min(gap)
}
