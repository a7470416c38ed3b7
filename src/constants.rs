//! Controller and physics constants.
//! Centralizing these keeps the probes, snap and climb code from drifting apart.

/// Physics space constants
pub mod physics {
    /// Default gravity in m/s²
    pub const DEFAULT_GRAVITY: f32 = 9.81;

    /// Fixed sub-step length (120 Hz)
    pub const TIMESTEP: f32 = 1.0 / 120.0;

    /// Upper bound of sub-steps run for a single rendered frame
    pub const MAX_SUB_STEPS: u32 = 8;

    /// Small epsilon for float comparisons
    pub const EPSILON: f32 = 0.00001;
}

/// Default character dimensions and speeds
pub mod character {
    /// Standing height, feet to head
    pub const STANDING_HEIGHT: f32 = 1.65;

    /// Crouched height, feet to head
    pub const CROUCHED_HEIGHT: f32 = 1.0;

    /// Half width of the character box
    pub const RADIUS: f32 = 0.25;

    /// Body mass in kg
    pub const MASS: f32 = 65.0;

    pub const WALK_SPEED: f32 = 5.0;

    pub const JUMP_SPEED: f32 = 8.0;

    pub const CROUCH_JUMP_SPEED: f32 = 6.0;

    pub const NOCLIP_SPEED: f32 = 4.5;

    pub const NOCLIP_RUN_SPEED: f32 = 13.0;

    /// Divisor applied to the noclip speed while the slow modifier is held
    pub const NOCLIP_SLOW_DIVISOR: f32 = 4.0;

    /// Vertical speed below which the jump accumulator counts as spent
    pub const JUMPING_SPEED_EPSILON: f32 = 0.001;
}

/// Ground probe, normal sampling and pull-to-ground constants
pub mod ground {
    /// Shrinks the ground probe so touching walls is not mistaken for ground
    pub const GROUND_TEST_RADIUS_NEGATIVE_MARGIN: f32 = 0.025;

    /// Half height of the ground probe, centred on the feet
    pub const GROUND_TEST_HALF_HEIGHT: f32 = 0.082;

    /// Ground normal rays start this far above and end this far below the feet
    pub const GROUND_NORMAL_RAY_OFFSET: f32 = 1.0;

    /// Height of the box swept down by the ground snap
    pub const GROUND_PULL_BOX_HEIGHT: f32 = 0.05;

    /// Seconds of continuous grounded time until internal gravity is fully off
    pub const GRAVITY_CUTOFF_TIME: f32 = 0.1;

    /// Shrinks the uncrouch probe so touching walls does not block standing up
    pub const UNCROUCH_TEST_RADIUS_NEGATIVE_MARGIN: f32 = 0.01;

    /// Lift of the uncrouch probe off the floor the character rests on
    pub const UNCROUCH_TEST_FLOOR_MARGIN: f32 = 0.01;

    /// Centre and the four axis offsets, scaled by the radius
    pub const GROUND_NORMAL_OFFSETS: [[f32; 2]; 5] = [
        [0.0, 0.0],
        [1.0, 0.0],
        [-1.0, 0.0],
        [0.0, 1.0],
        [0.0, -1.0],
    ];

    /// Diagonal offsets added by fine sampling (half radius along each diagonal)
    pub const GROUND_NORMAL_DIAGONAL_OFFSETS: [[f32; 2]; 4] = [
        [0.353_553_4, 0.353_553_4],
        [-0.353_553_4, -0.353_553_4],
        [-0.353_553_4, 0.353_553_4],
        [0.353_553_4, -0.353_553_4],
    ];
}

/// Ledge climb defaults
pub mod climb {
    /// Vertical speed above which climbing is skipped
    pub const MAX_CLIMB_VERTICAL_VELOCITY: f32 = 0.1;

    /// Height above the feet the wall rays are cast at
    pub const SLOPE_OFFSET: f32 = 0.075;

    /// Ray length past the character radius
    pub const SLOPE_DETECTION: f32 = 0.3;

    /// Tallest step the climb will lift the body over
    pub const MAX_STEP_HEIGHT: f32 = 0.3;

    pub const WALL_RAYS: u32 = 5;

    /// Fraction of wall rays that must report a vertical wall
    pub const WALL_CONFIDENCE: f32 = 0.6;

    /// Largest |normal.y| still treated as a wall
    pub const WALL_NORMAL_MAX_Y: f32 = 0.1;

    pub const PREVIEW_FRAMES: u32 = 4;

    /// Upper bound accepted for the preview frame count
    pub const MAX_PREVIEW_FRAMES: u32 = 64;

    /// Clearance kept between the raised body and the step top during validation
    pub const CLEARANCE_MARGIN: f32 = 0.005;
}
