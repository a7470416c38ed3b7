//! Impulse-driven character controller on top of rapier3d
//!
//! This module exposes the physics space wrapper, the controller and the
//! headless sandbox used by the `charsim` binary and the tests.

pub mod character;
pub mod config;
pub mod constants;
pub mod physics;
pub mod sandbox;
