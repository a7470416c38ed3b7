use rapier3d::prelude::*;

use crate::config::NoclipConfig;

const INVERSE_SQRT_2: f32 = std::f32::consts::FRAC_1_SQRT_2;

/// Camera-relative flight input.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NoclipInput {
    /// Camera front vector
    pub forward: Vector<Real>,
    /// Camera right vector
    pub right: Vector<Real>,
    /// Movement along `right`, -1 to 1
    pub strafe: f32,
    /// Movement along `forward`, -1 to 1
    pub advance: f32,
    pub run: bool,
    pub slow: bool,
}

impl Default for NoclipInput {
    fn default() -> Self {
        Self {
            forward: vector![0.0, 0.0, -1.0],
            right: vector![1.0, 0.0, 0.0],
            strafe: 0.0,
            advance: 0.0,
            run: false,
            slow: false,
        }
    }
}

/// World-space flight velocity for the given input.
pub fn noclip_velocity(input: &NoclipInput, config: &NoclipConfig) -> Vector<Real> {
    let strafe = input.strafe.clamp(-1.0, 1.0);
    let advance = input.advance.clamp(-1.0, 1.0);

    let diagonal = if strafe != 0.0 && advance != 0.0 {
        INVERSE_SQRT_2
    } else {
        1.0
    };

    let mut speed = if input.run { config.run_speed } else { config.speed };
    if input.slow && config.slow_divisor > 0.0 {
        speed /= config.slow_divisor;
    }

    (input.right * strafe + input.forward * advance) * (speed * diagonal)
}
