use log::{debug, trace, warn};
use rapier3d::prelude::*;
use thiserror::Error;

use super::climb::{try_climb, ClimbQuery};
use super::crouch::{CrouchState, CrouchTransition};
use super::ground::{
    estimate_ground_normal, ground_oriented_direction, probe_floor, snap_correction, test_on_ground, GroundState,
};
use super::noclip::{noclip_velocity, NoclipInput};
use super::probe::{character_filter, ProbeSet};
use super::velocity::{GravityRamp, VelocityBudget};
use crate::config::{CharacterConfig, MovementConfig};
use crate::constants::{ground as ground_consts, physics::EPSILON};
use crate::physics::{PhysicsSpace, SpaceId, TickListener};

/// Errors raised by character operations that need a physics space
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ControllerError {
    #[error("character is already attached to a physics space")]
    AlreadyAttached,
    #[error("character is not attached to this physics space")]
    NotAttached,
    #[error("character rigid body is missing from the physics space")]
    MissingBody,
}

/// Handles owned while the character lives in a space
#[derive(Debug)]
struct Attachment {
    space: SpaceId,
    body: RigidBodyHandle,
    collider: ColliderHandle,
    probes: ProbeSet,
}

/// Box-shaped rigid body whose origin is at the feet, with a standing and a crouched height.
#[derive(Debug)]
pub struct CharacterBody {
    pub radius: f32,
    pub standing_height: f32,
    pub crouched_height: f32,
    pub mass: f32,
    attachment: Option<Attachment>,
}

impl CharacterBody {
    pub fn new(radius: f32, standing_height: f32, crouched_height: f32, mass: f32) -> Self {
        Self {
            radius,
            standing_height,
            crouched_height,
            mass,
            attachment: None,
        }
    }

    pub fn is_attached(&self) -> bool {
        self.attachment.is_some()
    }

    pub fn handle(&self) -> Option<RigidBodyHandle> {
        self.attachment.as_ref().map(|a| a.body)
    }

    pub fn collider(&self) -> Option<ColliderHandle> {
        self.attachment.as_ref().map(|a| a.collider)
    }

    /// Height difference between the standing and crouched shapes
    pub fn crouch_offset(&self) -> f32 {
        self.standing_height - self.crouched_height
    }

    /// Creates the rigid body with its feet at `feet`
    pub fn attach(&mut self, space: &mut PhysicsSpace, feet: Vector<Real>) -> Result<(), ControllerError> {
        if self.attachment.is_some() {
            return Err(ControllerError::AlreadyAttached);
        }

        let body = RigidBodyBuilder::dynamic()
            .translation(feet)
            .lock_rotations()
            .gravity_scale(0.0)
            .can_sleep(false)
            .ccd_enabled(true)
            .build();
        let body = space.rigid_body_set.insert(body);

        let half_height = self.standing_height * 0.5;
        let collider = ColliderBuilder::cuboid(self.radius, half_height, self.radius)
            .translation(vector![0.0, half_height, 0.0])
            .friction(0.0)
            .friction_combine_rule(CoefficientCombineRule::Min)
            .restitution(0.0)
            .restitution_combine_rule(CoefficientCombineRule::Min)
            .mass(self.mass)
            .build();
        let collider = space
            .collider_set
            .insert_with_parent(collider, body, &mut space.rigid_body_set);

        let probes = ProbeSet::attach(space);

        debug!("[Character] Attached body {:?} at {:?}", body, feet);
        self.attachment = Some(Attachment {
            space: space.id(),
            body,
            collider,
            probes,
        });
        Ok(())
    }

    /// Removes the rigid body, its collider and the probes
    pub fn detach(&mut self, space: &mut PhysicsSpace) -> Result<(), ControllerError> {
        match &self.attachment {
            Some(a) if a.space == space.id() => {}
            _ => return Err(ControllerError::NotAttached),
        }
        let Some(attachment) = self.attachment.take() else {
            return Err(ControllerError::NotAttached);
        };

        space.remove_body(attachment.body);
        attachment.probes.detach(space);
        debug!("[Character] Detached body {:?}", attachment.body);
        Ok(())
    }

    fn attachment(&self, space: &PhysicsSpace) -> Result<&Attachment, ControllerError> {
        match &self.attachment {
            Some(a) if a.space == space.id() => Ok(a),
            _ => Err(ControllerError::NotAttached),
        }
    }

    fn rigid_body<'a>(&self, space: &'a PhysicsSpace) -> Result<&'a RigidBody, ControllerError> {
        let handle = self.attachment(space)?.body;
        space.rigid_body_set.get(handle).ok_or(ControllerError::MissingBody)
    }

    fn rigid_body_mut<'a>(&self, space: &'a mut PhysicsSpace) -> Result<&'a mut RigidBody, ControllerError> {
        let handle = self.attachment(space)?.body;
        space.rigid_body_set.get_mut(handle).ok_or(ControllerError::MissingBody)
    }

    /// Feet position
    pub fn translation(&self, space: &PhysicsSpace) -> Result<Vector<Real>, ControllerError> {
        Ok(*self.rigid_body(space)?.translation())
    }

    pub fn set_translation(&self, space: &mut PhysicsSpace, feet: Vector<Real>) -> Result<(), ControllerError> {
        self.rigid_body_mut(space)?.set_translation(feet, true);
        Ok(())
    }

    pub fn velocity(&self, space: &PhysicsSpace) -> Result<Vector<Real>, ControllerError> {
        Ok(*self.rigid_body(space)?.linvel())
    }

    /// Changes the velocity by `delta` through a central impulse
    pub fn apply_velocity(&self, space: &mut PhysicsSpace, delta: Vector<Real>) -> Result<(), ControllerError> {
        if delta.magnitude_squared() == 0.0 {
            return Ok(());
        }
        let body = self.rigid_body_mut(space)?;
        let mass = body.mass();
        if mass > EPSILON {
            body.apply_impulse(delta * mass, true);
        } else {
            let velocity = *body.linvel() + delta;
            body.set_linvel(velocity, true);
        }
        Ok(())
    }

    /// Resizes the collider to `height`, keeping its bottom at the feet
    pub fn set_height(&self, space: &mut PhysicsSpace, height: f32) -> Result<(), ControllerError> {
        let handle = self.attachment(space)?.collider;
        let collider = space.collider_set.get_mut(handle).ok_or(ControllerError::MissingBody)?;
        collider.set_shape(SharedShape::cuboid(self.radius, height * 0.5, self.radius));
        collider.set_translation_wrt_parent(vector![0.0, height * 0.5, 0.0]);
        Ok(())
    }

    /// Switches between a kinematic, non-colliding body and the normal dynamic one.
    /// Velocity is zeroed either way.
    pub fn set_noclip(&self, space: &mut PhysicsSpace, enabled: bool) -> Result<(), ControllerError> {
        let collider = self.attachment(space)?.collider;
        {
            let body = self.rigid_body_mut(space)?;
            let body_type = if enabled {
                RigidBodyType::KinematicPositionBased
            } else {
                RigidBodyType::Dynamic
            };
            body.set_body_type(body_type, true);
            body.set_linvel(Vector::zeros(), true);
        }
        if let Some(collider) = space.collider_set.get_mut(collider) {
            collider.set_enabled(!enabled);
        }
        Ok(())
    }

    fn filter(&self, space: &PhysicsSpace) -> Result<QueryFilter<'static>, ControllerError> {
        Ok(character_filter(self.attachment(space)?.body))
    }
}

/// Character controller driven by impulses on a dynamic body.
///
/// Register it with `PhysicsSpace::update` as a `TickListener`; every sub-step
/// it injects walk, jump and gravity velocity before the solver runs and
/// attributes the solved velocity afterwards.
#[derive(Debug)]
pub struct CharacterController {
    body: CharacterBody,
    config: MovementConfig,

    ground: GroundState,
    crouch: CrouchState,
    budget: VelocityBudget,
    gravity_ramp: GravityRamp,

    walk_direction: Vector<Real>,
    walk_speed: f32,
    oriented_direction: Vector<Real>,

    noclip_enabled: bool,
    noclip_changed: bool,
    noclip_input: NoclipInput,

    /// Sub-steps left during which a climb keeps the body lifted
    climb_hold: u32,
}

impl CharacterController {
    pub fn new(body: CharacterBody, config: MovementConfig) -> Self {
        Self {
            body,
            config,
            ground: GroundState::default(),
            crouch: CrouchState::default(),
            budget: VelocityBudget::new(),
            gravity_ramp: GravityRamp::default(),
            walk_direction: Vector::zeros(),
            walk_speed: 0.0,
            oriented_direction: Vector::zeros(),
            noclip_enabled: false,
            noclip_changed: false,
            noclip_input: NoclipInput::default(),
            climb_hold: 0,
        }
    }

    pub fn from_config(character: &CharacterConfig, movement: MovementConfig) -> Self {
        let body = CharacterBody::new(
            character.radius,
            character.standing_height,
            character.crouched_height,
            character.mass,
        );
        Self::new(body, movement)
    }

    pub fn attach(&mut self, space: &mut PhysicsSpace, feet: Vector<Real>) -> Result<(), ControllerError> {
        self.body.attach(space, feet)?;
        self.ground = GroundState::default();
        self.crouch.reset();
        self.budget.reset();
        self.gravity_ramp.reset();
        self.noclip_changed = self.noclip_enabled;
        Ok(())
    }

    pub fn detach(&mut self, space: &mut PhysicsSpace) -> Result<(), ControllerError> {
        self.body.detach(space)
    }

    pub fn body(&self) -> &CharacterBody {
        &self.body
    }

    pub fn config(&self) -> &MovementConfig {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut MovementConfig {
        &mut self.config
    }

    pub fn ground_state(&self) -> &GroundState {
        &self.ground
    }

    pub fn crouch_state(&self) -> &CrouchState {
        &self.crouch
    }

    pub fn budget(&self) -> &VelocityBudget {
        &self.budget
    }

    pub fn position(&self, space: &PhysicsSpace) -> Result<Vector<Real>, ControllerError> {
        self.body.translation(space)
    }

    pub fn set_position(&self, space: &mut PhysicsSpace, feet: Vector<Real>) -> Result<(), ControllerError> {
        self.body.set_translation(space, feet)
    }

    pub fn velocity(&self, space: &PhysicsSpace) -> Result<Vector<Real>, ControllerError> {
        self.body.velocity(space)
    }

    /// Desired horizontal velocity; its length is the walk speed.
    pub fn set_walk_direction(&mut self, x: f32, z: f32) {
        let length = (x * x + z * z).sqrt();
        if length < EPSILON || !length.is_finite() {
            self.walk_direction = Vector::zeros();
            self.walk_speed = 0.0;
        } else {
            self.walk_direction = vector![x / length, 0.0, z / length];
            self.walk_speed = length;
        }
    }

    /// Desired horizontal velocity as set by `set_walk_direction`
    pub fn walk_direction(&self) -> (f32, f32) {
        (
            self.walk_direction.x * self.walk_speed,
            self.walk_direction.z * self.walk_speed,
        )
    }

    /// Walk direction projected on the ground plane during the last tick
    pub fn ground_oriented_walk_direction(&self) -> Vector<Real> {
        self.oriented_direction
    }

    /// Queues a vertical speed change applied once on the next tick
    pub fn jump(&mut self, speed: f32) {
        self.budget.queue_jump(speed);
    }

    /// Jumps only from the ground, when not already jumping and not flying.
    pub fn checked_jump(&mut self, speed: f32, crouch_speed: f32) {
        if !self.on_ground() || self.is_jumping() || self.noclip_enabled {
            return;
        }
        if self.is_crouched() {
            self.jump(crouch_speed);
        } else {
            self.jump(speed);
        }
    }

    pub fn is_jumping(&self) -> bool {
        self.budget.is_jumping()
    }

    pub fn set_crouched(&mut self, crouched: bool) {
        self.crouch.request(crouched);
    }

    pub fn is_crouched(&self) -> bool {
        self.crouch.is_crouched()
    }

    pub fn on_ground(&self) -> bool {
        self.ground.on_ground
    }

    pub fn on_ground_or_will_be(&self) -> bool {
        self.ground.on_ground_or_will_be()
    }

    pub fn ground_normal(&self) -> Vector<Real> {
        self.ground.ground_normal
    }

    pub fn current_height(&self) -> f32 {
        if self.is_crouched() {
            self.body.crouched_height
        } else {
            self.body.standing_height
        }
    }

    /// Half extents of the active box shape
    pub fn current_half_extents(&self) -> Vector<Real> {
        vector![self.body.radius, self.current_height() * 0.5, self.body.radius]
    }

    pub fn radius(&self) -> f32 {
        self.body.radius
    }

    /// Takes effect at the next pre-step
    pub fn set_noclip_enabled(&mut self, enabled: bool) {
        if enabled != self.noclip_enabled {
            self.noclip_enabled = enabled;
            self.noclip_changed = true;
        }
    }

    pub fn is_noclip_enabled(&self) -> bool {
        self.noclip_enabled
    }

    pub fn set_noclip_input(&mut self, input: NoclipInput) {
        self.noclip_input = input;
    }

    fn check_noclip_state(&mut self, space: &mut PhysicsSpace) -> Result<(), ControllerError> {
        if !self.noclip_changed {
            return Ok(());
        }
        self.noclip_changed = false;

        self.body.set_noclip(space, self.noclip_enabled)?;
        self.budget.reset();
        self.gravity_ramp.reset();
        self.ground = GroundState::default();
        self.climb_hold = 0;
        debug!("[Character] Noclip {}", if self.noclip_enabled { "on" } else { "off" });
        Ok(())
    }

    fn fly(&mut self, space: &mut PhysicsSpace, dt: f32) -> Result<(), ControllerError> {
        let velocity = noclip_velocity(&self.noclip_input, &self.config.noclip);
        let next = self.body.translation(space)? + velocity * dt;
        self.body.rigid_body_mut(space)?.set_next_kinematic_translation(next);
        Ok(())
    }

    fn pull_to_ground(&mut self, space: &mut PhysicsSpace, dt: f32) -> Result<(), ControllerError> {
        self.ground.pulling_to_ground = false;

        if self.budget.jump().y.abs() > EPSILON
            || self.budget.pending_jump() != 0.0
            || self.budget.gravity().y.abs() > EPSILON
            || self.budget.external().y.abs() > self.config.ground_pull_max_external_speed
            || !self.ground.walkable
        {
            return Ok(());
        }

        let feet = self.body.translation(space)?;
        let filter = self.body.filter(space)?;
        let Some(height) = probe_floor(space, filter, feet, self.body.radius, self.config.max_ground_pull_distance)
        else {
            return Ok(());
        };

        self.ground.pulling_to_ground = true;
        let correction = snap_correction(height, self.config.ground_pull_settle_time, dt);
        if correction < 0.0 {
            trace!("[Character] Pulling to ground by {:.4}", correction);
            self.body.set_translation(space, feet + vector![0.0, correction, 0.0])?;
        }
        Ok(())
    }

    fn check_if_should_crouch(&mut self, space: &mut PhysicsSpace) -> Result<(), ControllerError> {
        let Some(CrouchTransition::Crouch { in_air }) = self.crouch.try_crouch(self.ground.on_ground_or_will_be())
        else {
            return Ok(());
        };

        self.body.set_height(space, self.body.crouched_height)?;
        if in_air {
            let feet = self.body.translation(space)?;
            self.body
                .set_translation(space, feet + vector![0.0, self.body.crouch_offset(), 0.0])?;
        }
        debug!("[Character] Crouched (in air: {})", in_air);
        Ok(())
    }

    fn climb(&mut self, space: &mut PhysicsSpace, dt: f32) -> Result<(), ControllerError> {
        if !self.config.climb.enabled {
            return Ok(());
        }

        let feet = self.body.translation(space)?;
        let vertical_velocity = self.body.velocity(space)?.y;
        let filter = self.body.filter(space)?;
        let query = ClimbQuery {
            feet,
            radius: self.body.radius,
            height: self.current_height(),
            direction: self.walk_direction,
            speed: self.walk_speed,
            vertical_velocity,
            jumping: self.is_jumping() || self.budget.pending_jump() != 0.0,
            dt,
            filter,
        };

        let attachment = self
            .body
            .attachment
            .as_mut()
            .ok_or(ControllerError::NotAttached)?;
        if let Some(height) = try_climb(space, &mut attachment.probes.ledge, &query, &self.config.climb) {
            self.body.set_translation(space, feet + vector![0.0, height, 0.0])?;
            // Keep the body up while it covers the previewed distance.
            self.climb_hold = self.config.climb.preview_frames.saturating_add(1);
        }
        Ok(())
    }

    fn find_ground_normal(&mut self, space: &PhysicsSpace) -> Result<(), ControllerError> {
        if !self.ground.on_ground_or_will_be() {
            self.ground.ground_normal = Vector::y();
            self.ground.walkable = true;
            return Ok(());
        }

        let feet = self.body.translation(space)?;
        let filter = self.body.filter(space)?;
        let (normal, walkable) = estimate_ground_normal(
            space,
            filter,
            feet,
            self.body.radius,
            self.config.fine_ground_normals,
            self.config.slope_threshold,
        );
        self.ground.ground_normal = normal;
        self.ground.walkable = walkable;
        Ok(())
    }

    fn pre_step(&mut self, space: &mut PhysicsSpace, dt: f32) -> Result<(), ControllerError> {
        self.check_noclip_state(space)?;
        if self.noclip_enabled {
            return self.fly(space, dt);
        }

        let climbing = self.climb_hold > 0;
        if climbing {
            self.ground.pulling_to_ground = false;
        } else {
            self.pull_to_ground(space, dt)?;
        }
        self.check_if_should_crouch(space)?;
        if !climbing {
            self.climb(space, dt)?;
        }

        self.find_ground_normal(space)?;
        self.oriented_direction = ground_oriented_direction(self.walk_direction, self.ground.ground_normal);

        let supported = self.ground.supported() || self.climb_hold > 0;
        self.climb_hold = self.climb_hold.saturating_sub(1);
        let ramp = self.gravity_ramp.advance(supported, dt);
        let roughness = if supported || self.ground.on_ground_or_will_be() {
            self.config.ground_roughness
        } else {
            self.config.air_roughness
        };

        let walk = self
            .budget
            .walk_step(self.oriented_direction * self.walk_speed, roughness, dt);
        let jump = self.budget.take_jump();
        let gravity = self
            .budget
            .gravity_step(space.gravity(), dt, self.config.gravity_multiplier * ramp);
        self.body.apply_velocity(space, walk + jump + gravity)?;

        let recorded = self.body.velocity(space)?;
        self.budget.record(recorded);
        Ok(())
    }

    fn check_if_should_uncrouch(&mut self, space: &mut PhysicsSpace) -> Result<(), ControllerError> {
        if !self.crouch.wants_to_stand() {
            return Ok(());
        }

        let feet = self.body.translation(space)?;
        let filter = self.body.filter(space)?;
        let offset = self.body.crouch_offset();
        let radius = self.body.radius - ground_consts::UNCROUCH_TEST_RADIUS_NEGATIVE_MARGIN;
        let standing = self.body.standing_height;
        let margin = ground_consts::UNCROUCH_TEST_FLOOR_MARGIN;
        let air_crouched = self.crouch.is_air_crouched();

        let attachment = self
            .body
            .attachment
            .as_mut()
            .ok_or(ControllerError::NotAttached)?;
        let probe = &mut attachment.probes.uncrouch;

        probe.place_on_feet(space, feet + vector![0.0, margin, 0.0], radius, standing);
        let can_uncrouch = !probe.overlaps(space, filter);
        let can_air_uncrouch = if can_uncrouch && air_crouched {
            probe.place_on_feet(space, feet + vector![0.0, margin - offset, 0.0], radius, standing);
            !probe.overlaps(space, filter)
        } else {
            false
        };
        self.ground.can_uncrouch = can_uncrouch;
        self.ground.can_air_uncrouch = can_air_uncrouch;

        let Some(CrouchTransition::Stand { lower }) = self.crouch.try_uncrouch(can_uncrouch, can_air_uncrouch) else {
            return Ok(());
        };

        self.body.set_height(space, self.body.standing_height)?;
        if lower {
            self.body.set_translation(space, feet - vector![0.0, offset, 0.0])?;
        }
        debug!("[Character] Stood up (lowered: {})", lower);
        Ok(())
    }

    fn post_step(&mut self, space: &mut PhysicsSpace, dt: f32) -> Result<(), ControllerError> {
        if self.noclip_enabled {
            return Ok(());
        }

        self.check_if_should_uncrouch(space)?;

        let feet = self.body.translation(space)?;
        let filter = self.body.filter(space)?;
        let radius = self.body.radius;
        let attachment = self
            .body
            .attachment
            .as_mut()
            .ok_or(ControllerError::NotAttached)?;
        self.ground.on_ground = test_on_ground(space, &mut attachment.probes.ground, filter, feet, radius);

        let actual = self.body.velocity(space)?;
        self.budget.reconcile(actual);

        let friction = if self.ground.on_ground {
            self.config.ground_friction
        } else {
            self.config.air_friction
        };
        let friction = self.budget.friction_step(friction, dt);
        self.body.apply_velocity(space, friction)
    }
}

impl TickListener for CharacterController {
    fn before_integrate(&mut self, space: &mut PhysicsSpace, dt: f32) {
        if !self.body.is_attached() {
            return;
        }
        if let Err(e) = self.pre_step(space, dt) {
            warn!("[Character] Pre-step skipped: {}", e);
        }
    }

    fn after_integrate(&mut self, space: &mut PhysicsSpace, dt: f32) {
        if !self.body.is_attached() {
            return;
        }
        if let Err(e) = self.post_step(space, dt) {
            warn!("[Character] Post-step skipped: {}", e);
        }
    }
}
