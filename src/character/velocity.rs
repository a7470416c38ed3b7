use nalgebra::Vector3;

use crate::constants::{character as character_consts, ground as ground_consts, physics::EPSILON};

/// Sign function that returns 0 for 0 (and for NaN), unlike `f32::signum`.
pub fn sign(value: f32) -> f32 {
    if value > 0.0 {
        1.0
    } else if value < 0.0 {
        -1.0
    } else {
        0.0
    }
}

/// Limits `value` to the range between 0 and `max`: 0 when the signs disagree,
/// `max` when `value` is larger in magnitude.
pub fn clamp_to(value: f32, max: f32) -> f32 {
    if sign(value) != sign(max) {
        0.0
    } else if value.abs() > max.abs() {
        max
    } else {
        value
    }
}

/// `value / total`, or 0 when the total is too small to divide by
fn share(value: f32, total: f32) -> f32 {
    if total.abs() < EPSILON {
        0.0
    } else {
        value / total
    }
}

/// Splits one axis between three parts in proportion to their signed values.
/// Parts pulling against the total get nothing; the rest are renormalized to sum to 1.
fn proportions(parts: [f32; 3]) -> [f32; 3] {
    let total: f32 = parts.iter().sum();
    let mut out = parts.map(|p| share(p, total).max(0.0));
    let sum: f32 = out.iter().sum();
    for p in out.iter_mut() {
        *p = share(*p, sum);
    }
    out
}

/// One velocity vector per internal cause.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Contributions {
    pub walk: Vector3<f32>,
    pub jump: Vector3<f32>,
    pub gravity: Vector3<f32>,
}

impl Default for Contributions {
    fn default() -> Self {
        Self {
            walk: Vector3::zeros(),
            jump: Vector3::zeros(),
            gravity: Vector3::zeros(),
        }
    }
}

impl Contributions {
    pub fn total(&self) -> Vector3<f32> {
        self.walk + self.jump + self.gravity
    }

    fn axis(&self, axis: usize) -> [f32; 3] {
        [self.walk[axis], self.jump[axis], self.gravity[axis]]
    }

    fn set_axis(&mut self, axis: usize, values: [f32; 3]) {
        self.walk[axis] = values[0];
        self.jump[axis] = values[1];
        self.gravity[axis] = values[2];
    }
}

/// Attribution of the body's velocity to walking, jumping, gravity and
/// everything else (external).
///
/// A tick goes through three phases:
/// 1. injection: `walk_step`, `take_jump` and `gravity_step` report the
///    velocity each cause adds this tick, then `record` stores the velocity
///    seen right after the impulses,
/// 2. the physics step, which may cancel or add velocity,
/// 3. `reconcile` with the solved velocity, followed by `friction_step`.
///
/// After `reconcile` the accumulators plus `external` sum to the solved velocity.
#[derive(Debug, Clone)]
pub struct VelocityBudget {
    accumulated: Contributions,
    external: Vector3<f32>,

    applied: Contributions,
    fractions: Contributions,
    applied_total: Vector3<f32>,
    recorded: Vector3<f32>,

    pending_jump: f32,
}

impl Default for VelocityBudget {
    fn default() -> Self {
        Self {
            accumulated: Contributions::default(),
            external: Vector3::zeros(),
            applied: Contributions::default(),
            fractions: Contributions::default(),
            applied_total: Vector3::zeros(),
            recorded: Vector3::zeros(),
            pending_jump: 0.0,
        }
    }
}

impl VelocityBudget {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn walk(&self) -> Vector3<f32> {
        self.accumulated.walk
    }

    pub fn jump(&self) -> Vector3<f32> {
        self.accumulated.jump
    }

    pub fn gravity(&self) -> Vector3<f32> {
        self.accumulated.gravity
    }

    /// Velocity not explained by walking, jumping or gravity
    pub fn external(&self) -> Vector3<f32> {
        self.external
    }

    /// Sum of walk, jump and gravity
    pub fn internal(&self) -> Vector3<f32> {
        self.accumulated.total()
    }

    /// Contributions injected during the current tick
    pub fn applied(&self) -> &Contributions {
        &self.applied
    }

    /// Per-axis share of each cause in the current tick's injection
    pub fn fractions(&self) -> &Contributions {
        &self.fractions
    }

    pub fn applied_total(&self) -> Vector3<f32> {
        self.applied_total
    }

    pub fn recorded(&self) -> Vector3<f32> {
        self.recorded
    }

    pub fn pending_jump(&self) -> f32 {
        self.pending_jump
    }

    pub fn is_jumping(&self) -> bool {
        self.accumulated.jump.y.abs() > character_consts::JUMPING_SPEED_EPSILON
    }

    /// Queues a vertical speed change for the next tick. Calls within one tick add up.
    pub fn queue_jump(&mut self, speed: f32) {
        self.pending_jump += speed;
    }

    /// Moves the walk accumulator toward `target`. Returns the velocity to inject.
    pub fn walk_step(&mut self, target: Vector3<f32>, roughness: f32, dt: f32) -> Vector3<f32> {
        let mut step = Vector3::zeros();
        for axis in 0..3 {
            let delta = target[axis] - self.accumulated.walk[axis];
            let mut s = delta * dt * roughness;
            if s.abs() > delta.abs() || delta.abs() < EPSILON {
                s = delta;
            }
            step[axis] = s;
        }
        self.applied.walk = step;
        step
    }

    /// Consumes the queued jump. Returns the velocity to inject.
    pub fn take_jump(&mut self) -> Vector3<f32> {
        let jump = Vector3::new(0.0, self.pending_jump, 0.0);
        self.pending_jump = 0.0;
        self.applied.jump = jump;
        jump
    }

    /// Scaled gravity for one tick. Returns the velocity to inject.
    pub fn gravity_step(&mut self, gravity: Vector3<f32>, dt: f32, multiplier: f32) -> Vector3<f32> {
        let step = gravity * dt * multiplier;
        self.applied.gravity = step;
        step
    }

    /// Closes the injection phase: stores the per-axis fractions and the
    /// velocity observed right after the impulses.
    pub fn record(&mut self, velocity: Vector3<f32>) {
        self.applied_total = self.applied.total();
        for axis in 0..3 {
            self.fractions.set_axis(axis, proportions(self.applied.axis(axis)));
        }
        self.recorded = velocity;
    }

    /// Attributes the velocity solved by the physics step.
    pub fn reconcile(&mut self, actual: Vector3<f32>) {
        let delta = actual - self.recorded;

        for axis in 0..3 {
            // Part of this tick's injection that survived the step
            let kept = clamp_to(self.applied_total[axis] + delta[axis], self.applied_total[axis]);
            self.applied_total[axis] = kept;

            let fractions = self.fractions.axis(axis);
            let mut parts = self.accumulated.axis(axis);
            for (part, fraction) in parts.iter_mut().zip(fractions) {
                *part += fraction * kept;
            }

            let internal: f32 = parts.iter().sum();
            let shares = proportions(parts);
            let internal = clamp_to(internal, actual[axis]);
            self.accumulated.set_axis(axis, shares.map(|s| s * internal));
        }

        self.external = actual - self.accumulated.total();
        self.applied = Contributions::default();
    }

    /// Decays the external velocity. Returns the velocity to inject; never
    /// overshoots past zero.
    pub fn friction_step(&mut self, friction: f32, dt: f32) -> Vector3<f32> {
        let mut step = Vector3::zeros();
        for axis in 0..3 {
            let d = self.external[axis];
            let mut f = -d * dt * friction;
            if sign(f + d) != sign(d) {
                f = -d;
            }
            step[axis] = f;
        }
        self.external += step;
        step
    }

    /// Zeroes every accumulator and the queued jump.
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Fades internal gravity out while the character stays on walkable ground.
#[derive(Debug, Clone, Copy, Default)]
pub struct GravityRamp {
    grounded_time: f32,
}

impl GravityRamp {
    /// Advances by `dt` and returns the multiplier for this tick: 1 when
    /// airborne, falling linearly to 0 over the cutoff time.
    pub fn advance(&mut self, grounded: bool, dt: f32) -> f32 {
        if !grounded {
            self.grounded_time = 0.0;
            return 1.0;
        }

        self.grounded_time = (self.grounded_time + dt).min(ground_consts::GRAVITY_CUTOFF_TIME);
        if self.grounded_time + EPSILON >= ground_consts::GRAVITY_CUTOFF_TIME {
            return 0.0;
        }
        1.0 - self.grounded_time / ground_consts::GRAVITY_CUTOFF_TIME
    }

    pub fn grounded_time(&self) -> f32 {
        self.grounded_time
    }

    pub fn reset(&mut self) {
        self.grounded_time = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DT: f32 = 1.0 / 60.0;

    fn assert_conserved(budget: &VelocityBudget, velocity: Vector3<f32>) {
        let sum = budget.internal() + budget.external();
        assert!(
            (sum - velocity).amax() < 1.0e-4,
            "walk+jump+gravity+external = {:?}, velocity = {:?}",
            sum,
            velocity
        );
    }

    /// Runs one tick against a fake body whose solver replaces the velocity with `solve(v)`.
    fn tick(
        budget: &mut VelocityBudget,
        velocity: &mut Vector3<f32>,
        target: Vector3<f32>,
        multiplier: f32,
        solve: impl Fn(Vector3<f32>) -> Vector3<f32>,
    ) {
        *velocity += budget.walk_step(target, 10.0, DT);
        *velocity += budget.take_jump();
        *velocity += budget.gravity_step(Vector3::new(0.0, -9.81, 0.0), DT, multiplier);
        budget.record(*velocity);

        *velocity = solve(*velocity);
        budget.reconcile(*velocity);
        assert_conserved(budget, *velocity);

        *velocity += budget.friction_step(6.0, DT);
        assert_conserved(budget, *velocity);
    }

    #[test]
    fn test_sign_is_zero_aware() {
        assert_eq!(sign(0.0), 0.0);
        assert_eq!(sign(-0.0), 0.0);
        assert_eq!(sign(3.0), 1.0);
        assert_eq!(sign(-0.5), -1.0);
    }

    #[test]
    fn test_clamp_to() {
        assert_eq!(clamp_to(2.0, 1.0), 1.0);
        assert_eq!(clamp_to(0.5, 1.0), 0.5);
        assert_eq!(clamp_to(-0.5, 1.0), 0.0);
        assert_eq!(clamp_to(-3.0, -1.0), -1.0);
        assert_eq!(clamp_to(1.0, 0.0), 0.0);
        assert_eq!(clamp_to(0.0, 0.0), 0.0);
    }

    #[test]
    fn test_fractions_normalize_and_drop_opposing_parts() {
        let mut budget = VelocityBudget::new();
        budget.applied = Contributions {
            walk: Vector3::new(1.0, 1.0, 0.0),
            jump: Vector3::new(0.0, 3.0, 0.0),
            gravity: Vector3::new(0.0, -0.5, 0.0),
        };
        budget.record(Vector3::zeros());

        let f = budget.fractions();
        assert_eq!(f.walk.x, 1.0);
        assert!((f.walk.y - 0.25).abs() < 1.0e-6);
        assert!((f.jump.y - 0.75).abs() < 1.0e-6);
        assert_eq!(f.gravity.y, 0.0);
        assert_eq!(f.walk.z, 0.0, "Empty axis gets no fractions");
    }

    #[test]
    fn test_conservation_under_arbitrary_solver() {
        let mut budget = VelocityBudget::new();
        let mut velocity = Vector3::zeros();
        let target = Vector3::new(3.0, 0.0, -4.0);

        for i in 0..120 {
            if i == 10 {
                budget.queue_jump(8.0);
            }
            // Wall on +x, floor that absorbs half of any downward motion, a push along z.
            tick(&mut budget, &mut velocity, target, 1.0, |v| {
                Vector3::new(v.x.min(1.5), if v.y < 0.0 { v.y * 0.5 } else { v.y }, v.z + 0.3)
            });
        }
    }

    #[test]
    fn test_walk_approach_is_monotonic() {
        let mut budget = VelocityBudget::new();
        let mut velocity = Vector3::zeros();
        let target = Vector3::new(5.0, 0.0, 0.0);

        let mut previous = f32::MAX;
        for _ in 0..30 {
            tick(&mut budget, &mut velocity, target, 0.0, |v| v);
            let remaining = (target - budget.walk()).norm();
            assert!(remaining < previous, "{} !< {}", remaining, previous);
            previous = remaining;
        }
        assert!(previous < 0.05, "walk should be within 1% of target, missing {}", previous);
        assert!((velocity.x - budget.walk().x).abs() < 1.0e-4);
    }

    #[test]
    fn test_walk_step_is_exact_with_high_roughness() {
        let mut budget = VelocityBudget::new();
        let target = Vector3::new(5.0, 0.0, -2.0);
        let step = budget.walk_step(target, 120.0, DT);
        assert_eq!(step, target);
    }

    #[test]
    fn test_friction_never_flips_external() {
        let mut budget = VelocityBudget::new();
        budget.external = Vector3::new(2.0, -1.0, 0.001);

        let mut previous = budget.external();
        for _ in 0..200 {
            // dt * friction > 1 would overshoot without the guard.
            budget.friction_step(200.0, DT);
            let external = budget.external();
            for axis in 0..3 {
                assert!(sign(external[axis]) == sign(previous[axis]) || external[axis] == 0.0);
                assert!(external[axis].abs() <= previous[axis].abs());
            }
            previous = external;
        }
        assert_eq!(previous, Vector3::zeros());
    }

    #[test]
    fn test_jump_is_applied_once() {
        let mut budget = VelocityBudget::new();
        budget.queue_jump(5.0);
        budget.queue_jump(3.0);
        assert_eq!(budget.pending_jump(), 8.0);

        assert_eq!(budget.take_jump(), Vector3::new(0.0, 8.0, 0.0));
        assert_eq!(budget.take_jump(), Vector3::zeros());
    }

    #[test]
    fn test_jump_decays_into_gravity() {
        let mut budget = VelocityBudget::new();
        let mut velocity = Vector3::zeros();
        budget.queue_jump(8.0);

        tick(&mut budget, &mut velocity, Vector3::zeros(), 1.0, |v| v);
        assert!(budget.is_jumping());
        assert!((budget.jump().y - (8.0 - 9.81 * DT)).abs() < 1.0e-4);

        for _ in 0..120 {
            tick(&mut budget, &mut velocity, Vector3::zeros(), 1.0, |v| v);
        }
        assert!(!budget.is_jumping(), "Gravity should have used up the jump");
        assert!(budget.gravity().y < 0.0);
        assert!(budget.external().norm() < 1.0e-4);
    }

    #[test]
    fn test_blocked_gravity_is_not_accumulated() {
        let mut budget = VelocityBudget::new();
        let mut velocity = Vector3::zeros();

        for _ in 0..10 {
            tick(&mut budget, &mut velocity, Vector3::zeros(), 1.0, |v| Vector3::new(v.x, v.y.max(0.0), v.z));
        }
        assert_eq!(budget.gravity().y, 0.0);
        assert_eq!(velocity, Vector3::zeros());
    }

    #[test]
    fn test_reset_clears_everything() {
        let mut budget = VelocityBudget::new();
        let mut velocity = Vector3::zeros();
        budget.queue_jump(4.0);
        tick(&mut budget, &mut velocity, Vector3::new(1.0, 0.0, 0.0), 1.0, |v| v + Vector3::new(0.0, 0.0, 1.0));
        budget.queue_jump(2.0);

        budget.reset();
        assert_eq!(budget.internal(), Vector3::zeros());
        assert_eq!(budget.external(), Vector3::zeros());
        assert_eq!(budget.pending_jump(), 0.0);
    }

    #[test]
    fn test_gravity_ramp_cuts_off_after_grace_period() {
        let mut ramp = GravityRamp::default();
        let dt = ground_consts::GRAVITY_CUTOFF_TIME / 4.0;

        assert_eq!(ramp.advance(false, dt), 1.0);
        let mut previous = 1.0;
        for _ in 0..3 {
            let m = ramp.advance(true, dt);
            assert!(m < previous && m > 0.0);
            previous = m;
        }
        assert_eq!(ramp.advance(true, dt), 0.0, "Zero after exactly the cutoff time");
        assert_eq!(ramp.advance(true, dt), 0.0);

        assert_eq!(ramp.advance(false, dt), 1.0, "Leaving the ground restores gravity");
        assert_eq!(ramp.grounded_time(), 0.0);
    }
}
