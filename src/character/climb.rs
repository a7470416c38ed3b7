use log::debug;
use rapier3d::prelude::*;

use super::probe::ProbeVolume;
use crate::config::ClimbConfig;
use crate::constants::{climb as consts, physics::EPSILON};
use crate::physics::PhysicsSpace;

/// Where the character is and where it is heading this tick.
#[derive(Clone, Copy)]
pub struct ClimbQuery<'a> {
    pub feet: Vector<Real>,
    pub radius: f32,
    /// Height of the active shape
    pub height: f32,
    /// Horizontal unit direction of travel
    pub direction: Vector<Real>,
    /// Requested horizontal speed
    pub speed: f32,
    pub vertical_velocity: f32,
    pub jumping: bool,
    pub dt: f32,
    pub filter: QueryFilter<'a>,
}

/// Fraction of wall rays that hit a near-vertical surface ahead.
pub fn wall_confidence(space: &PhysicsSpace, query: &ClimbQuery, config: &ClimbConfig) -> f32 {
    let rays = config.wall_rays.max(1);
    let side = Vector::y().cross(&query.direction);
    let reach = query.radius + config.detection_distance;

    let mut walls = 0;
    for i in 0..rays {
        let spread = if rays == 1 {
            0.0
        } else {
            (i as f32 / (rays - 1) as f32) * 2.0 - 1.0
        };
        let origin = query.feet + vector![0.0, config.ray_height, 0.0] + side * (spread * query.radius);
        let hit = space.cast_segment(origin, origin + query.direction * reach, query.filter);
        if hit.is_some_and(|h| h.normal.y.abs() <= config.wall_normal_max_y) {
            walls += 1;
        }
    }
    walls as f32 / rays as f32
}

/// Lifts the character onto a low static step in front of it.
/// Returns the height to raise the body by, or `None` when no step qualifies.
pub fn try_climb(
    space: &mut PhysicsSpace,
    probe: &mut ProbeVolume,
    query: &ClimbQuery,
    config: &ClimbConfig,
) -> Option<f32> {
    if !config.enabled
        || query.jumping
        || query.speed <= EPSILON
        || query.direction.magnitude_squared() < EPSILON
        || query.vertical_velocity.abs() > config.max_vertical_velocity
    {
        return None;
    }

    if wall_confidence(space, query, config) < config.wall_confidence {
        return None;
    }

    let half = vector![query.radius, query.height * 0.5, query.radius];
    let shape = Cuboid::new(half);
    let frame_advance = query.direction * (query.speed * query.dt);

    let mut best: Option<f32> = None;
    for frame in 1..=config.preview_frames {
        let ahead = query.feet + frame_advance * frame as f32;
        let top = ahead + vector![0.0, config.max_step_height + half.y, 0.0];
        let start = Isometry::translation(top.x, top.y, top.z);

        let Some(hit) = space.sweep(&shape, &start, vector![0.0, -config.max_step_height, 0.0], query.filter)
        else {
            continue;
        };
        // Starting inside something means the obstacle is taller than a step.
        if hit.fraction <= 0.0 || !space.is_static_collider(hit.collider) {
            continue;
        }

        let height = config.max_step_height * (1.0 - hit.fraction);
        if height > consts::CLEARANCE_MARGIN && best.map_or(true, |b| height < b) {
            best = Some(height);
        }
    }

    let height = best?;

    // The raised body must not overlap anything.
    probe.place_on_feet(
        space,
        query.feet + vector![0.0, height + consts::CLEARANCE_MARGIN, 0.0],
        query.radius,
        query.height,
    );
    if probe.overlaps(space, query.filter) {
        return None;
    }

    debug!("[Climb] Stepping up {:.3}", height);
    Some(height + consts::CLEARANCE_MARGIN)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::character::probe::character_filter;
    use nalgebra::UnitQuaternion;

    fn step_world(step_height: f32) -> PhysicsSpace {
        let mut space = PhysicsSpace::new();
        space.add_fixed_box(vector![0.0, -0.5, 0.0], vector![20.0, 0.5, 20.0], UnitQuaternion::identity());
        // Riser at x = 0.3
        space.add_fixed_box(
            vector![1.3, step_height * 0.5, 0.0],
            vector![1.0, step_height * 0.5, 2.0],
            UnitQuaternion::identity(),
        );
        space.refresh_queries();
        space
    }

    fn query(filter: QueryFilter<'_>) -> ClimbQuery<'_> {
        ClimbQuery {
            feet: vector![0.0, 0.0, 0.0],
            radius: 0.25,
            height: 1.65,
            direction: vector![1.0, 0.0, 0.0],
            speed: 5.0,
            vertical_velocity: 0.0,
            jumping: false,
            dt: 1.0 / 60.0,
            filter,
        }
    }

    fn enabled() -> ClimbConfig {
        ClimbConfig {
            enabled: true,
            ..ClimbConfig::default()
        }
    }

    #[test]
    fn test_climbs_low_step() {
        let mut space = step_world(0.2);
        let mut probe = ProbeVolume::attach(&mut space);
        space.refresh_queries();
        let filter = character_filter(RigidBodyHandle::invalid());

        let q = query(filter);
        assert_eq!(wall_confidence(&space, &q, &enabled()), 1.0);

        let height = try_climb(&mut space, &mut probe, &q, &enabled()).expect("Step should be climbable");
        assert!((height - 0.2).abs() < 0.02, "got {}", height);
    }

    #[test]
    fn test_disabled_by_default() {
        let mut space = step_world(0.2);
        let mut probe = ProbeVolume::attach(&mut space);
        space.refresh_queries();
        let filter = character_filter(RigidBodyHandle::invalid());

        assert!(try_climb(&mut space, &mut probe, &query(filter), &ClimbConfig::default()).is_none());
    }

    #[test]
    fn test_tall_wall_is_not_climbed() {
        let mut space = step_world(1.0);
        let mut probe = ProbeVolume::attach(&mut space);
        space.refresh_queries();
        let filter = character_filter(RigidBodyHandle::invalid());

        assert!(try_climb(&mut space, &mut probe, &query(filter), &enabled()).is_none());
    }

    #[test]
    fn test_no_climb_while_jumping_or_falling() {
        let mut space = step_world(0.2);
        let mut probe = ProbeVolume::attach(&mut space);
        space.refresh_queries();
        let filter = character_filter(RigidBodyHandle::invalid());

        let mut q = query(filter);
        q.jumping = true;
        assert!(try_climb(&mut space, &mut probe, &q, &enabled()).is_none());

        let mut q = query(filter);
        q.vertical_velocity = -3.0;
        assert!(try_climb(&mut space, &mut probe, &q, &enabled()).is_none());
    }

    #[test]
    fn test_dynamic_obstacle_is_not_climbed() {
        let mut space = PhysicsSpace::new();
        space.add_fixed_box(vector![0.0, -0.5, 0.0], vector![20.0, 0.5, 20.0], UnitQuaternion::identity());
        space.add_dynamic_box(vector![0.55, 0.1, 0.0], vector![0.3, 0.1, 1.0], 1.0);
        let mut probe = ProbeVolume::attach(&mut space);
        space.refresh_queries();
        let filter = character_filter(RigidBodyHandle::invalid());

        assert!(try_climb(&mut space, &mut probe, &query(filter), &enabled()).is_none());
    }
}
