//! Sandbox configuration parsing from TOML files

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::constants::{character as character_consts, climb as climb_consts, physics as physics_consts};

/// Physics space section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpaceConfig {
    pub gravity: [f32; 3],
    /// Fixed sub-step length in seconds
    pub time_step: f32,
    pub max_sub_steps: u32,
    /// Frame length fed to the sub-step driver
    pub frame_dt: f32,
}

impl Default for SpaceConfig {
    fn default() -> Self {
        Self {
            gravity: [0.0, -physics_consts::DEFAULT_GRAVITY, 0.0],
            time_step: physics_consts::TIMESTEP,
            max_sub_steps: physics_consts::MAX_SUB_STEPS,
            frame_dt: 1.0 / 60.0,
        }
    }
}

/// Character dimensions and spawn point
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CharacterConfig {
    pub radius: f32,
    pub standing_height: f32,
    pub crouched_height: f32,
    pub mass: f32,
    /// Feet position at spawn
    pub spawn: [f32; 3],
}

impl Default for CharacterConfig {
    fn default() -> Self {
        Self {
            radius: character_consts::RADIUS,
            standing_height: character_consts::STANDING_HEIGHT,
            crouched_height: character_consts::CROUCHED_HEIGHT,
            mass: character_consts::MASS,
            spawn: [0.0, 0.0, 0.0],
        }
    }
}

/// Ledge climb tuning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClimbConfig {
    pub enabled: bool,
    pub max_vertical_velocity: f32,
    /// Height above the feet the wall rays are cast at
    pub ray_height: f32,
    /// How far past the radius the wall rays reach
    pub detection_distance: f32,
    pub max_step_height: f32,
    pub wall_rays: u32,
    pub wall_confidence: f32,
    pub wall_normal_max_y: f32,
    pub preview_frames: u32,
}

impl Default for ClimbConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            max_vertical_velocity: climb_consts::MAX_CLIMB_VERTICAL_VELOCITY,
            ray_height: climb_consts::SLOPE_OFFSET,
            detection_distance: climb_consts::SLOPE_DETECTION,
            max_step_height: climb_consts::MAX_STEP_HEIGHT,
            wall_rays: climb_consts::WALL_RAYS,
            wall_confidence: climb_consts::WALL_CONFIDENCE,
            wall_normal_max_y: climb_consts::WALL_NORMAL_MAX_Y,
            preview_frames: climb_consts::PREVIEW_FRAMES,
        }
    }
}

/// Noclip flight speeds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NoclipConfig {
    pub speed: f32,
    pub run_speed: f32,
    pub slow_divisor: f32,
}

impl Default for NoclipConfig {
    fn default() -> Self {
        Self {
            speed: character_consts::NOCLIP_SPEED,
            run_speed: character_consts::NOCLIP_RUN_SPEED,
            slow_divisor: character_consts::NOCLIP_SLOW_DIVISOR,
        }
    }
}

/// Tunables of the movement model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MovementConfig {
    /// Multiplier on world gravity for the character
    pub gravity_multiplier: f32,
    /// Walk approach rate while airborne
    pub air_roughness: f32,
    /// Walk approach rate while grounded
    pub ground_roughness: f32,
    pub ground_friction: f32,
    pub air_friction: f32,
    /// Minimum dot(normal, up) of walkable ground
    pub slope_threshold: f32,
    pub max_ground_pull_distance: f32,
    /// Seconds the ground snap takes to close a gap
    pub ground_pull_settle_time: f32,
    /// Largest vertical external speed the ground snap still runs at
    pub ground_pull_max_external_speed: f32,
    pub walk_speed: f32,
    pub jump_speed: f32,
    pub crouch_jump_speed: f32,
    /// Sample 8 offsets around the feet instead of 4
    pub fine_ground_normals: bool,
    pub climb: ClimbConfig,
    pub noclip: NoclipConfig,
}

impl Default for MovementConfig {
    fn default() -> Self {
        Self {
            gravity_multiplier: 2.5,
            air_roughness: 3.0,
            ground_roughness: 10.0,
            ground_friction: 6.0,
            air_friction: 1.0,
            slope_threshold: 0.75,
            max_ground_pull_distance: 0.6,
            ground_pull_settle_time: 0.1,
            ground_pull_max_external_speed: 2.0,
            walk_speed: character_consts::WALK_SPEED,
            jump_speed: character_consts::JUMP_SPEED,
            crouch_jump_speed: character_consts::CROUCH_JUMP_SPEED,
            fine_ground_normals: false,
            climb: ClimbConfig::default(),
            noclip: NoclipConfig::default(),
        }
    }
}

/// Immovable box in the sandbox world
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObstacleConfig {
    pub center: [f32; 3],
    pub half_extents: [f32; 3],
    /// Euler angles (roll, pitch, yaw) in degrees
    #[serde(default)]
    pub rotation_deg: [f32; 3],
}

/// Scripted input played back by the sandbox
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScriptConfig {
    pub ticks: u32,
    /// Walk direction (x, z); scaled by `movement.walk_speed`
    pub walk: [f32; 2],
    /// Frames on which a checked jump is requested
    pub jump_at: Vec<u32>,
    /// Frame windows [start, end) during which crouch is held
    pub crouch: Vec<[u32; 2]>,
    /// Frame windows [start, end) with noclip on
    pub noclip: Vec<[u32; 2]>,
}

impl Default for ScriptConfig {
    fn default() -> Self {
        Self {
            ticks: 240,
            walk: [1.0, 0.0],
            jump_at: vec![60],
            crouch: vec![[120, 180]],
            noclip: Vec::new(),
        }
    }
}

/// Sandbox configuration from a TOML file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SandboxConfig {
    #[serde(default)]
    pub space: SpaceConfig,
    #[serde(default)]
    pub character: CharacterConfig,
    #[serde(default)]
    pub movement: MovementConfig,
    #[serde(default = "default_obstacles")]
    pub obstacles: Vec<ObstacleConfig>,
    #[serde(default)]
    pub script: ScriptConfig,
}

/// A floor whose top face is at y = 0 and a 0.2 m step ahead on +x
fn default_obstacles() -> Vec<ObstacleConfig> {
    vec![
        ObstacleConfig {
            center: [0.0, -0.5, 0.0],
            half_extents: [50.0, 0.5, 50.0],
            rotation_deg: [0.0; 3],
        },
        ObstacleConfig {
            center: [8.0, 0.1, 0.0],
            half_extents: [2.0, 0.1, 2.0],
            rotation_deg: [0.0; 3],
        },
    ]
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            space: SpaceConfig::default(),
            character: CharacterConfig::default(),
            movement: MovementConfig::default(),
            obstacles: default_obstacles(),
            script: ScriptConfig::default(),
        }
    }
}

impl SandboxConfig {
    /// Load and validate sandbox configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::Parse(path.to_path_buf(), e))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Rejects values the controller cannot work with
    pub fn validate(&self) -> Result<(), ConfigError> {
        fn positive(name: &str, value: f32) -> Result<(), ConfigError> {
            if value.is_finite() && value > 0.0 {
                Ok(())
            } else {
                Err(ConfigError::Invalid(format!("{} must be positive, got {}", name, value)))
            }
        }

        fn non_negative(name: &str, value: f32) -> Result<(), ConfigError> {
            if value.is_finite() && value >= 0.0 {
                Ok(())
            } else {
                Err(ConfigError::Invalid(format!("{} must be zero or more, got {}", name, value)))
            }
        }

        positive("space.time_step", self.space.time_step)?;
        positive("space.frame_dt", self.space.frame_dt)?;
        if self.space.max_sub_steps == 0 {
            return Err(ConfigError::Invalid("space.max_sub_steps must be at least 1".to_string()));
        }

        let c = &self.character;
        positive("character.radius", c.radius)?;
        positive("character.standing_height", c.standing_height)?;
        positive("character.crouched_height", c.crouched_height)?;
        positive("character.mass", c.mass)?;
        if c.crouched_height > c.standing_height {
            return Err(ConfigError::Invalid(format!(
                "character.crouched_height ({}) exceeds standing_height ({})",
                c.crouched_height, c.standing_height
            )));
        }

        let m = &self.movement;
        if !(0.0..=1.0).contains(&m.slope_threshold) {
            return Err(ConfigError::Invalid(format!(
                "movement.slope_threshold must be within [0, 1], got {}",
                m.slope_threshold
            )));
        }
        positive("movement.ground_pull_settle_time", m.ground_pull_settle_time)?;
        non_negative("movement.gravity_multiplier", m.gravity_multiplier)?;
        non_negative("movement.air_roughness", m.air_roughness)?;
        non_negative("movement.ground_roughness", m.ground_roughness)?;
        non_negative("movement.ground_friction", m.ground_friction)?;
        non_negative("movement.air_friction", m.air_friction)?;
        non_negative("movement.max_ground_pull_distance", m.max_ground_pull_distance)?;
        non_negative("movement.ground_pull_max_external_speed", m.ground_pull_max_external_speed)?;
        non_negative("movement.walk_speed", m.walk_speed)?;
        non_negative("movement.jump_speed", m.jump_speed)?;
        non_negative("movement.crouch_jump_speed", m.crouch_jump_speed)?;
        non_negative("movement.noclip.speed", m.noclip.speed)?;
        non_negative("movement.noclip.run_speed", m.noclip.run_speed)?;
        non_negative("movement.noclip.slow_divisor", m.noclip.slow_divisor)?;
        if m.climb.enabled {
            positive("movement.climb.max_step_height", m.climb.max_step_height)?;
            if m.climb.wall_rays == 0 || m.climb.preview_frames == 0 {
                return Err(ConfigError::Invalid(
                    "movement.climb needs at least one wall ray and one preview frame".to_string(),
                ));
            }
            if m.climb.preview_frames > climb_consts::MAX_PREVIEW_FRAMES {
                return Err(ConfigError::Invalid(format!(
                    "movement.climb.preview_frames must be at most {}, got {}",
                    climb_consts::MAX_PREVIEW_FRAMES,
                    m.climb.preview_frames
                )));
            }
        }

        for (i, obstacle) in self.obstacles.iter().enumerate() {
            for extent in obstacle.half_extents {
                positive(&format!("obstacles[{}].half_extents", i), extent)?;
            }
        }
        Ok(())
    }
}

/// Errors that can occur when loading sandbox configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read {}: {1}", .0.display())]
    Io(PathBuf, #[source] std::io::Error),
    #[error("Failed to parse {}: {1}", .0.display())]
    Parse(PathBuf, #[source] toml::de::Error),
    #[error("Failed to encode config: {0}")]
    Encode(#[from] toml::ser::Error),
    #[error("Invalid config: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_minimal_config() {
        let config: SandboxConfig = toml::from_str("").unwrap();
        assert_eq!(config, SandboxConfig::default());
        assert!(!config.movement.climb.enabled);
        assert_eq!(config.movement.gravity_multiplier, 2.5);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_full_config() {
        let toml = r#"
            [space]
            gravity = [0.0, -20.0, 0.0]
            max_sub_steps = 4

            [character]
            radius = 0.3
            spawn = [1.0, 2.0, 3.0]

            [movement]
            ground_roughness = 60.0
            fine_ground_normals = true

            [movement.climb]
            enabled = true
            wall_rays = 3

            [[obstacles]]
            center = [0.0, -1.0, 0.0]
            half_extents = [10.0, 1.0, 10.0]

            [[obstacles]]
            center = [3.0, 0.5, 0.0]
            half_extents = [1.0, 0.5, 1.0]
            rotation_deg = [0.0, 45.0, 0.0]

            [script]
            ticks = 10
            jump_at = [1, 5]
            crouch = [[2, 4]]
        "#;
        let config: SandboxConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.space.gravity[1], -20.0);
        assert_eq!(config.space.max_sub_steps, 4);
        assert_eq!(config.space.time_step, physics_consts::TIMESTEP);
        assert_eq!(config.character.radius, 0.3);
        assert_eq!(config.character.mass, character_consts::MASS);
        assert_eq!(config.movement.ground_roughness, 60.0);
        assert!(config.movement.fine_ground_normals);
        assert!(config.movement.climb.enabled);
        assert_eq!(config.movement.climb.wall_rays, 3);
        assert_eq!(config.movement.climb.preview_frames, climb_consts::PREVIEW_FRAMES);
        assert_eq!(config.obstacles.len(), 2);
        assert_eq!(config.obstacles[1].rotation_deg[1], 45.0);
        assert_eq!(config.script.crouch, vec![[2, 4]]);
        assert!(config.script.noclip.is_empty());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_default_config_round_trips_through_toml() {
        let config = SandboxConfig::default();
        let text = config.to_toml().unwrap();
        let parsed: SandboxConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = SandboxConfig::default();
        config.movement.slope_threshold = 1.5;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = SandboxConfig::default();
        config.space.time_step = 0.0;
        assert!(config.validate().is_err());

        let mut config = SandboxConfig::default();
        config.character.crouched_height = 2.0;
        assert!(config.validate().is_err());

        let mut config = SandboxConfig::default();
        config.obstacles[0].half_extents[1] = -1.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_negative_rates() {
        let mut config = SandboxConfig::default();
        config.movement.ground_friction = -1.0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("movement.ground_friction"), "got {}", err);

        let mut config = SandboxConfig::default();
        config.movement.air_roughness = f32::NAN;
        assert!(config.validate().is_err());

        let mut config = SandboxConfig::default();
        config.movement.noclip.run_speed = -13.0;
        assert!(config.validate().is_err());

        let mut config = SandboxConfig::default();
        config.movement.air_friction = 0.0;
        assert!(config.validate().is_ok(), "zero friction is allowed");
    }

    #[test]
    fn test_validate_caps_preview_frames() {
        let mut config = SandboxConfig::default();
        config.movement.climb.enabled = true;
        config.movement.climb.preview_frames = u32::MAX;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        config.movement.climb.preview_frames = climb_consts::MAX_PREVIEW_FRAMES;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_file_reports_missing_file() {
        let err = SandboxConfig::from_file(Path::new("/nonexistent/sandbox.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io(_, _)));
        assert!(err.to_string().contains("/nonexistent/sandbox.toml"));
    }
}
