//! Impulse-driven character controller
//!
//! The controller owns one dynamic rigid body per character and splits its
//! velocity into walk, jump, gravity and external parts every sub-step.

pub mod climb;
pub mod controller;
pub mod crouch;
pub mod ground;
pub mod noclip;
pub mod probe;
pub mod velocity;

pub use controller::{CharacterBody, CharacterController, ControllerError};
pub use crouch::{CrouchState, Stance};
pub use ground::GroundState;
pub use noclip::NoclipInput;
pub use velocity::VelocityBudget;
