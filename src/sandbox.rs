//! Headless world used by the CLI and the scenario tests: static boxes from
//! config, one character, and scripted input played back frame by frame.

use log::{debug, info};
use nalgebra::UnitQuaternion;
use rapier3d::prelude::*;
use serde::Serialize;
use thiserror::Error;

use crate::character::{CharacterController, ControllerError, NoclipInput, Stance};
use crate::config::{ConfigError, SandboxConfig};
use crate::physics::PhysicsSpace;

#[derive(Debug, Error)]
pub enum SandboxError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Controller(#[from] ControllerError),
}

/// State of the character after one frame, written as one JSON line by `charsim run --trace`
#[derive(Debug, Clone, Serialize)]
pub struct TickRecord {
    pub frame: u32,
    pub sub_steps: u32,
    pub position: [f32; 3],
    pub velocity: [f32; 3],
    pub on_ground: bool,
    pub pulling_to_ground: bool,
    pub ground_normal: [f32; 3],
    pub stance: Stance,
    pub noclip: bool,
    pub walk: [f32; 3],
    pub jump: [f32; 3],
    pub gravity: [f32; 3],
    pub external: [f32; 3],
    /// Largest per-axis gap between the velocity and its attributed parts
    pub accounting_error: f32,
}

/// Totals over a whole run
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub frames: u32,
    pub sub_steps: u32,
    pub final_position: [f32; 3],
    pub max_height: f32,
    pub grounded_frames: u32,
    pub crouched_frames: u32,
    pub max_accounting_error: f32,
}

fn to_array(v: Vector<Real>) -> [f32; 3] {
    [v.x, v.y, v.z]
}

fn in_window(windows: &[[u32; 2]], frame: u32) -> bool {
    windows.iter().any(|[start, end]| (*start..*end).contains(&frame))
}

pub struct Sandbox {
    pub space: PhysicsSpace,
    pub controller: CharacterController,
    config: SandboxConfig,
    frame: u32,
}

impl Sandbox {
    pub fn new(config: SandboxConfig) -> Result<Self, SandboxError> {
        config.validate()?;

        let mut space = PhysicsSpace::with_time_step(config.space.time_step, config.space.max_sub_steps);
        let [gx, gy, gz] = config.space.gravity;
        space.set_gravity(vector![gx, gy, gz]);

        for obstacle in &config.obstacles {
            let [cx, cy, cz] = obstacle.center;
            let [hx, hy, hz] = obstacle.half_extents;
            let [roll, pitch, yaw] = obstacle.rotation_deg;
            let rotation = UnitQuaternion::from_euler_angles(roll.to_radians(), pitch.to_radians(), yaw.to_radians());
            space.add_fixed_box(vector![cx, cy, cz], vector![hx, hy, hz], rotation);
        }
        debug!("[Sandbox] Built {} obstacles", config.obstacles.len());

        let mut controller = CharacterController::from_config(&config.character, config.movement.clone());
        let [sx, sy, sz] = config.character.spawn;
        controller.attach(&mut space, vector![sx, sy, sz])?;

        Ok(Self {
            space,
            controller,
            config,
            frame: 0,
        })
    }

    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    pub fn frame(&self) -> u32 {
        self.frame
    }

    /// Feeds the scripted input for the current frame to the controller
    fn apply_script(&mut self) {
        let script = &self.config.script;
        let movement = &self.config.movement;
        let frame = self.frame;
        let [wx, wz] = script.walk;

        let noclip = in_window(&script.noclip, frame);
        self.controller.set_noclip_enabled(noclip);
        if noclip {
            self.controller.set_noclip_input(NoclipInput {
                strafe: wx,
                advance: -wz,
                ..NoclipInput::default()
            });
        }

        self.controller
            .set_walk_direction(wx * movement.walk_speed, wz * movement.walk_speed);
        self.controller.set_crouched(in_window(&script.crouch, frame));
        if script.jump_at.contains(&frame) {
            self.controller
                .checked_jump(movement.jump_speed, movement.crouch_jump_speed);
        }
    }

    /// Runs one rendered frame of scripted input
    pub fn step_frame(&mut self) -> Result<TickRecord, SandboxError> {
        self.apply_script();
        let sub_steps = self
            .space
            .update(self.config.space.frame_dt, &mut [&mut self.controller]);
        let record = self.record(sub_steps)?;
        self.frame += 1;
        Ok(record)
    }

    fn record(&self, sub_steps: u32) -> Result<TickRecord, SandboxError> {
        let position = self.controller.position(&self.space)?;
        let velocity = self.controller.velocity(&self.space)?;
        let budget = self.controller.budget();
        let ground = self.controller.ground_state();
        let noclip = self.controller.is_noclip_enabled();

        let accounting_error = if noclip {
            0.0
        } else {
            (budget.internal() + budget.external() - velocity).amax()
        };

        Ok(TickRecord {
            frame: self.frame,
            sub_steps,
            position: to_array(position),
            velocity: to_array(velocity),
            on_ground: ground.on_ground,
            pulling_to_ground: ground.pulling_to_ground,
            ground_normal: to_array(ground.ground_normal),
            stance: self.controller.crouch_state().stance(),
            noclip,
            walk: to_array(budget.walk()),
            jump: to_array(budget.jump()),
            gravity: to_array(budget.gravity()),
            external: to_array(budget.external()),
            accounting_error,
        })
    }

    /// Plays `frames` frames (the script length when `None`), handing each record to `on_frame`
    pub fn run(
        &mut self,
        frames: Option<u32>,
        mut on_frame: impl FnMut(&TickRecord),
    ) -> Result<RunSummary, SandboxError> {
        let frames = frames.unwrap_or(self.config.script.ticks);
        let start = to_array(self.controller.position(&self.space)?);
        let mut summary = RunSummary {
            frames: 0,
            sub_steps: 0,
            final_position: start,
            max_height: start[1],
            grounded_frames: 0,
            crouched_frames: 0,
            max_accounting_error: 0.0,
        };

        for _ in 0..frames {
            let record = self.step_frame()?;
            on_frame(&record);

            summary.frames += 1;
            summary.sub_steps += record.sub_steps;
            summary.final_position = record.position;
            summary.max_height = summary.max_height.max(record.position[1]);
            summary.grounded_frames += u32::from(record.on_ground);
            summary.crouched_frames += u32::from(record.stance == Stance::Crouched);
            summary.max_accounting_error = summary.max_accounting_error.max(record.accounting_error);
        }

        info!(
            "[Sandbox] {} frames, {} sub-steps, final position {:?}",
            summary.frames, summary.sub_steps, summary.final_position
        );
        Ok(summary)
    }
}
