use log::{debug, trace};
use nalgebra::UnitQuaternion;
use rapier3d::parry::query::ShapeCastOptions;
use rapier3d::prelude::*;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::constants::physics as consts;

static NEXT_SPACE_ID: AtomicU64 = AtomicU64::new(1);

/// Identifies one `PhysicsSpace`, so a controller can tell which space it is attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SpaceId(u64);

/// Two-phase hook invoked once per fixed sub-step.
///
/// `before_integrate` runs before rapier integrates and resolves contacts,
/// `after_integrate` runs right after, with the solved velocities visible.
pub trait TickListener {
    fn before_integrate(&mut self, space: &mut PhysicsSpace, dt: f32);
    fn after_integrate(&mut self, space: &mut PhysicsSpace, dt: f32);
}

/// First hit of a ray cast.
#[derive(Debug, Clone, Copy)]
pub struct RayHit {
    pub collider: ColliderHandle,
    pub point: Point<Real>,
    pub normal: Vector<Real>,
    pub distance: f32,
}

/// First hit of a shape swept along a straight path.
#[derive(Debug, Clone, Copy)]
pub struct SweepHit {
    pub collider: ColliderHandle,
    /// Position of the hit along the path, 0 at the start and 1 at the end.
    pub fraction: f32,
}

/// Wrapper around the rapier pipeline that drives character controllers
/// through fixed sub-steps.
pub struct PhysicsSpace {
    id: SpaceId,
    pub gravity: Vector<Real>,
    pub rigid_body_set: RigidBodySet,
    pub collider_set: ColliderSet,
    pub integration_parameters: IntegrationParameters,
    pub physics_pipeline: PhysicsPipeline,
    pub island_manager: IslandManager,
    pub broad_phase: DefaultBroadPhase,
    pub narrow_phase: NarrowPhase,
    pub impulse_joint_set: ImpulseJointSet,
    pub multibody_joint_set: MultibodyJointSet,
    pub ccd_solver: CCDSolver,
    pub query_pipeline: QueryPipeline,

    /// Length of one sub-step in seconds
    pub time_step: f32,
    /// Most sub-steps `update` runs for a single frame
    pub max_sub_steps: u32,
    accumulator: f32,
}

impl PhysicsSpace {
    /// Creates a new physics space with default gravity and a 120 Hz sub-step
    pub fn new() -> Self {
        Self::with_time_step(consts::TIMESTEP, consts::MAX_SUB_STEPS)
    }

    pub fn with_time_step(time_step: f32, max_sub_steps: u32) -> Self {
        Self {
            id: SpaceId(NEXT_SPACE_ID.fetch_add(1, Ordering::Relaxed)),
            gravity: vector![0.0, -consts::DEFAULT_GRAVITY, 0.0],
            rigid_body_set: RigidBodySet::new(),
            collider_set: ColliderSet::new(),
            integration_parameters: IntegrationParameters::default(),
            physics_pipeline: PhysicsPipeline::new(),
            island_manager: IslandManager::new(),
            broad_phase: DefaultBroadPhase::new(),
            narrow_phase: NarrowPhase::new(),
            impulse_joint_set: ImpulseJointSet::new(),
            multibody_joint_set: MultibodyJointSet::new(),
            ccd_solver: CCDSolver::new(),
            query_pipeline: QueryPipeline::new(),
            time_step,
            max_sub_steps: max_sub_steps.max(1),
            accumulator: 0.0,
        }
    }

    pub fn id(&self) -> SpaceId {
        self.id
    }

    pub fn set_gravity(&mut self, gravity: Vector<Real>) {
        self.gravity = gravity;
    }

    pub fn gravity(&self) -> Vector<Real> {
        self.gravity
    }

    /// Advances the simulation by `frame_dt`, running as many fixed sub-steps as fit.
    /// Time beyond `max_sub_steps` sub-steps is dropped. Returns the number of sub-steps run.
    pub fn update(&mut self, frame_dt: f32, listeners: &mut [&mut dyn TickListener]) -> u32 {
        self.accumulator += frame_dt.max(0.0);

        let mut steps = 0;
        while self.accumulator + consts::EPSILON >= self.time_step && steps < self.max_sub_steps {
            self.step(self.time_step, listeners);
            self.accumulator -= self.time_step;
            steps += 1;
        }

        if self.accumulator + consts::EPSILON >= self.time_step {
            debug!(
                "[PhysicsSpace] Dropping {:.4}s after {} sub-steps",
                self.accumulator, steps
            );
            self.accumulator %= self.time_step;
        }
        self.accumulator = self.accumulator.max(0.0);
        steps
    }

    /// Runs a single sub-step: listeners before, rapier, listeners after.
    pub fn step(&mut self, dt: f32, listeners: &mut [&mut dyn TickListener]) {
        // Newly inserted colliders must be visible to the pre-step queries.
        self.refresh_queries();

        for listener in listeners.iter_mut() {
            listener.before_integrate(self, dt);
        }

        self.integrate(dt);

        for listener in listeners.iter_mut() {
            listener.after_integrate(self, dt);
        }
    }

    /// Steps rapier alone, without notifying listeners
    pub fn integrate(&mut self, dt: f32) {
        self.integration_parameters.dt = dt;
        self.physics_pipeline.step(
            &self.gravity,
            &self.integration_parameters,
            &mut self.island_manager,
            &mut self.broad_phase,
            &mut self.narrow_phase,
            &mut self.rigid_body_set,
            &mut self.collider_set,
            &mut self.impulse_joint_set,
            &mut self.multibody_joint_set,
            &mut self.ccd_solver,
            Some(&mut self.query_pipeline),
            &(),
            &(),
        );
    }

    pub fn refresh_queries(&mut self) {
        self.query_pipeline.update(&self.collider_set);
    }

    /// Adds immovable world geometry: a fixed body holding one box collider
    pub fn add_fixed_box(
        &mut self,
        center: Vector<Real>,
        half_extents: Vector<Real>,
        rotation: UnitQuaternion<f32>,
    ) -> RigidBodyHandle {
        let body = RigidBodyBuilder::fixed()
            .translation(center)
            .rotation(rotation.scaled_axis())
            .build();
        let handle = self.rigid_body_set.insert(body);

        let collider = ColliderBuilder::cuboid(half_extents.x, half_extents.y, half_extents.z).build();
        self.collider_set
            .insert_with_parent(collider, handle, &mut self.rigid_body_set);

        trace!("[PhysicsSpace] Added fixed box at {:?}", center);
        handle
    }

    /// Adds a dynamic box affected by gravity and collisions
    pub fn add_dynamic_box(
        &mut self,
        center: Vector<Real>,
        half_extents: Vector<Real>,
        density: f32,
    ) -> RigidBodyHandle {
        let body = RigidBodyBuilder::dynamic().translation(center).build();
        let handle = self.rigid_body_set.insert(body);

        let collider = ColliderBuilder::cuboid(half_extents.x, half_extents.y, half_extents.z)
            .density(density)
            .build();
        self.collider_set
            .insert_with_parent(collider, handle, &mut self.rigid_body_set);
        handle
    }

    /// Removes a body and every collider attached to it
    pub fn remove_body(&mut self, handle: RigidBodyHandle) -> bool {
        self.rigid_body_set
            .remove(
                handle,
                &mut self.island_manager,
                &mut self.collider_set,
                &mut self.impulse_joint_set,
                &mut self.multibody_joint_set,
                true,
            )
            .is_some()
    }

    /// Inserts a collider that is not attached to any body
    pub fn add_free_collider(&mut self, collider: Collider) -> ColliderHandle {
        self.collider_set.insert(collider)
    }

    pub fn remove_collider(&mut self, handle: ColliderHandle) -> bool {
        self.collider_set
            .remove(
                handle,
                &mut self.island_manager,
                &mut self.rigid_body_set,
                true,
            )
            .is_some()
    }

    /// Gets the position of a rigid body
    pub fn body_translation(&self, handle: RigidBodyHandle) -> Option<Vector<Real>> {
        self.rigid_body_set.get(handle).map(|body| *body.translation())
    }

    /// Applies an impulse at the centre of mass of a body
    pub fn apply_impulse(&mut self, handle: RigidBodyHandle, impulse: Vector<Real>) {
        if let Some(body) = self.rigid_body_set.get_mut(handle) {
            body.apply_impulse(impulse, true);
        }
    }

    /// True for geometry that never moves under simulation: free colliders and
    /// colliders on fixed or kinematic bodies.
    pub fn is_static_collider(&self, handle: ColliderHandle) -> bool {
        let Some(collider) = self.collider_set.get(handle) else {
            return false;
        };
        match collider.parent() {
            None => true,
            Some(parent) => self
                .rigid_body_set
                .get(parent)
                .map(|body| !body.is_dynamic())
                .unwrap_or(false),
        }
    }

    /// Casts a ray from `origin` to `end` and returns the first hit accepted by `filter`.
    /// Hits reported from inside a shape (zero normal) are skipped.
    pub fn cast_segment(
        &self,
        origin: Vector<Real>,
        end: Vector<Real>,
        filter: QueryFilter,
    ) -> Option<RayHit> {
        let path = end - origin;
        let max_dist = path.magnitude();
        if max_dist < consts::EPSILON {
            return None;
        }

        let ray = Ray::new(Point::from(origin), path / max_dist);
        let (collider, hit) = self.query_pipeline.cast_ray_and_get_normal(
            &self.rigid_body_set,
            &self.collider_set,
            &ray,
            max_dist,
            true,
            filter,
        )?;

        if hit.normal.magnitude_squared() < consts::EPSILON {
            return None;
        }

        Some(RayHit {
            collider,
            point: ray.point_at(hit.time_of_impact),
            normal: hit.normal,
            distance: hit.time_of_impact,
        })
    }

    /// Sweeps `shape` from `start` along `translation`; returns the nearest hit.
    pub fn sweep(
        &self,
        shape: &dyn Shape,
        start: &Isometry<Real>,
        translation: Vector<Real>,
        filter: QueryFilter,
    ) -> Option<SweepHit> {
        if translation.magnitude_squared() < consts::EPSILON * consts::EPSILON {
            return None;
        }

        let (collider, hit) = self.query_pipeline.cast_shape(
            &self.rigid_body_set,
            &self.collider_set,
            start,
            &translation,
            shape,
            ShapeCastOptions::with_max_time_of_impact(1.0),
            filter,
        )?;

        Some(SweepHit {
            collider,
            fraction: hit.time_of_impact.clamp(0.0, 1.0),
        })
    }

    /// Checks whether `shape` placed at `position` intersects anything accepted by `filter`
    pub fn overlaps_any(&self, shape: &dyn Shape, position: &Isometry<Real>, filter: QueryFilter) -> bool {
        let mut found = false;
        self.query_pipeline.intersections_with_shape(
            &self.rigid_body_set,
            &self.collider_set,
            position,
            shape,
            filter,
            |_| {
                found = true;
                false // stop at the first intersection
            },
        );
        found
    }
}

impl Default for PhysicsSpace {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct CountingListener {
        before: u32,
        after: u32,
    }

    impl TickListener for CountingListener {
        fn before_integrate(&mut self, _space: &mut PhysicsSpace, _dt: f32) {
            self.before += 1;
        }

        fn after_integrate(&mut self, _space: &mut PhysicsSpace, _dt: f32) {
            assert_eq!(self.before, self.after + 1);
            self.after += 1;
        }
    }

    fn floor(space: &mut PhysicsSpace) {
        // Top face at y = 0
        space.add_fixed_box(
            vector![0.0, -0.5, 0.0],
            vector![50.0, 0.5, 50.0],
            UnitQuaternion::identity(),
        );
    }

    #[test]
    fn test_space_creation() {
        let space = PhysicsSpace::new();
        assert_eq!(space.gravity().y, -consts::DEFAULT_GRAVITY);
        assert_ne!(space.id(), PhysicsSpace::new().id());
    }

    #[test]
    fn test_dynamic_box_falls() {
        let mut space = PhysicsSpace::new();
        let handle = space.add_dynamic_box(vector![0.0, 10.0, 0.0], vector![0.5, 0.5, 0.5], 1.0);

        for _ in 0..10 {
            space.step(1.0 / 60.0, &mut []);
        }

        let pos = space.body_translation(handle).unwrap();
        assert!(pos.y < 10.0);
    }

    #[test]
    fn test_update_runs_fixed_sub_steps() {
        let mut space = PhysicsSpace::with_time_step(1.0 / 120.0, 8);
        let mut listener = CountingListener { before: 0, after: 0 };

        let steps = space.update(1.0 / 60.0, &mut [&mut listener]);
        assert_eq!(steps, 2);
        assert_eq!(listener.before, 2);
        assert_eq!(listener.after, 2);
    }

    #[test]
    fn test_update_caps_sub_steps() {
        let mut space = PhysicsSpace::with_time_step(1.0 / 120.0, 8);
        let mut listener = CountingListener { before: 0, after: 0 };

        // A one second hitch must not spiral into 120 sub-steps.
        let steps = space.update(1.0, &mut [&mut listener]);
        assert_eq!(steps, 8);

        let steps = space.update(0.0, &mut [&mut listener]);
        assert_eq!(steps, 0, "Dropped time must not be replayed");
    }

    #[test]
    fn test_cast_segment_finds_floor() {
        let mut space = PhysicsSpace::new();
        floor(&mut space);
        space.refresh_queries();

        let hit = space
            .cast_segment(vector![0.0, 1.0, 0.0], vector![0.0, -1.0, 0.0], QueryFilter::default())
            .expect("Should detect floor");
        assert!((hit.distance - 1.0).abs() < 1.0e-3, "got {}", hit.distance);
        assert!(hit.normal.y > 0.99);
        assert!(space.is_static_collider(hit.collider));
    }

    #[test]
    fn test_sweep_reports_fraction() {
        let mut space = PhysicsSpace::new();
        floor(&mut space);
        space.refresh_queries();

        let shape = Cuboid::new(vector![0.2, 0.025, 0.2]);
        let start = Isometry::translation(0.0, 0.525, 0.0);
        let hit = space
            .sweep(&shape, &start, vector![0.0, -1.0, 0.0], QueryFilter::default())
            .expect("Sweep should hit the floor");
        assert!((hit.fraction - 0.5).abs() < 1.0e-2, "got {}", hit.fraction);
    }

    #[test]
    fn test_overlap_ignores_sensors_when_filtered() {
        let mut space = PhysicsSpace::new();
        let sensor = ColliderBuilder::cuboid(1.0, 1.0, 1.0)
            .sensor(true)
            .translation(vector![0.0, 5.0, 0.0])
            .build();
        space.add_free_collider(sensor);
        space.refresh_queries();

        let probe = Cuboid::new(vector![0.5, 0.5, 0.5]);
        let at = Isometry::translation(0.0, 5.0, 0.0);
        assert!(space.overlaps_any(&probe, &at, QueryFilter::default()));
        assert!(!space.overlaps_any(&probe, &at, QueryFilter::default().exclude_sensors()));
    }
}
