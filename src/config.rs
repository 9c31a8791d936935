//! Engine configuration
//!
//! Loaded from a TOML file; every section and field has a default, so a
//! partial file (or none at all) is valid.

use crate::constants::{classification, flocking, particles};
use crate::error::{EngineError, EngineResult};
use crate::hot_reload::HotReloadConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Which device implementation drives the scenes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Software,
    #[default]
    Wgpu,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Directory holding the WGSL stage sources
    pub shader_dir: PathBuf,

    pub backend: BackendKind,

    /// Frames the runner renders before exiting
    pub frames: u32,

    pub hot_reload: HotReloadConfig,

    pub classification: ClassificationConfig,

    pub flocking: FlockingConfig,

    pub particles: ParticleConfig,

    pub render_target: RenderTargetConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            shader_dir: PathBuf::from(concat!(env!("CARGO_MANIFEST_DIR"), "/src/shaders")),
            backend: BackendKind::default(),
            frames: 120,
            hot_reload: HotReloadConfig::default(),
            classification: ClassificationConfig::default(),
            flocking: FlockingConfig::default(),
            particles: ParticleConfig::default(),
            render_target: RenderTargetConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassificationConfig {
    pub instance_count: u32,

    /// Records per output stream; the instance count when unset
    pub output_capacity: Option<u32>,

    /// Instances closer than this are drawn as meshes
    pub lod_distance: f32,

    pub spawn_extent: f32,

    pub seed: u64,
}

impl Default for ClassificationConfig {
    fn default() -> Self {
        Self {
            instance_count: classification::DEFAULT_INSTANCE_COUNT,
            output_capacity: None,
            lod_distance: classification::DEFAULT_LOD_DISTANCE,
            spawn_extent: classification::DEFAULT_SPAWN_EXTENT,
            seed: 0x5eed,
        }
    }
}

impl ClassificationConfig {
    pub fn output_capacity(&self) -> u32 {
        self.output_capacity.unwrap_or(self.instance_count)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlockingConfig {
    pub instance_count: u32,
    pub spawn_extent: f32,
    pub seed: u64,
    pub params: FlockingParams,
}

impl Default for FlockingConfig {
    fn default() -> Self {
        Self {
            instance_count: flocking::DEFAULT_INSTANCE_COUNT,
            spawn_extent: flocking::DEFAULT_SPAWN_EXTENT,
            seed: 0xb01d,
            params: FlockingParams::default(),
        }
    }
}

/// Live-tunable flocking parameters, uploaded every frame
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlockingParams {
    pub max_speed: f32,
    pub max_force: f32,
    pub alignment: f32,
    pub cohesion: f32,
    pub separation: f32,
    pub perception_radius: f32,
    pub bounds_half_extent: f32,
    pub paused: bool,
}

impl Default for FlockingParams {
    fn default() -> Self {
        Self {
            max_speed: flocking::DEFAULT_MAX_SPEED,
            max_force: flocking::DEFAULT_MAX_FORCE,
            alignment: flocking::DEFAULT_ALIGNMENT,
            cohesion: flocking::DEFAULT_COHESION,
            separation: flocking::DEFAULT_SEPARATION,
            perception_radius: flocking::DEFAULT_PERCEPTION_RADIUS,
            bounds_half_extent: flocking::DEFAULT_BOUNDS_HALF_EXTENT,
            paused: false,
        }
    }
}

impl FlockingParams {
    /// Restore every parameter to its default
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// No steering at all: boids drift along their velocity
    pub fn without_steering(mut self) -> Self {
        self.alignment = 0.0;
        self.cohesion = 0.0;
        self.separation = 0.0;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParticleConfig {
    pub particle_count: u32,
    pub spawn_extent: f32,
    pub seed: u64,

    /// Mass the attractor takes while held; released it has none
    pub attractor_mass: f32,
}

impl Default for ParticleConfig {
    fn default() -> Self {
        Self {
            particle_count: particles::DEFAULT_PARTICLE_COUNT,
            spawn_extent: particles::DEFAULT_SPAWN_EXTENT,
            seed: 0x9a27,
            attractor_mass: particles::DEFAULT_ATTRACTOR_MASS,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderTargetConfig {
    pub width: u32,
    pub height: u32,
}

impl Default for RenderTargetConfig {
    fn default() -> Self {
        Self {
            width: 800,
            height: 600,
        }
    }
}

impl RenderTargetConfig {
    pub fn aspect(&self) -> f32 {
        self.width as f32 / self.height.max(1) as f32
    }
}

impl EngineConfig {
    /// Read and validate a TOML config file
    pub fn load(path: impl AsRef<Path>) -> EngineResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| EngineError::io(path, e))?;
        let config = Self::from_toml_str(&text)?;
        log::info!("Loaded engine config from {}", path.display());
        Ok(config)
    }

    pub fn from_toml_str(text: &str) -> EngineResult<Self> {
        let config: Self = toml::from_str(text).map_err(|e| EngineError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> EngineResult<String> {
        toml::to_string_pretty(self).map_err(|e| EngineError::Config(e.to_string()))
    }

    pub fn validate(&self) -> EngineResult<()> {
        if self.classification.instance_count == 0 {
            return Err(EngineError::Config("classification.instance_count must be positive".into()));
        }
        if self.classification.output_capacity() == 0 {
            return Err(EngineError::Config("classification.output_capacity must be positive".into()));
        }
        if !(self.classification.lod_distance > 0.0) {
            return Err(EngineError::Config(format!(
                "classification.lod_distance must be positive, got {}",
                self.classification.lod_distance
            )));
        }
        if self.flocking.instance_count == 0 {
            return Err(EngineError::Config("flocking.instance_count must be positive".into()));
        }
        if self.particles.particle_count == 0 {
            return Err(EngineError::Config("particles.particle_count must be positive".into()));
        }
        if !self.particles.attractor_mass.is_finite() {
            return Err(EngineError::Config(format!(
                "particles.attractor_mass must be finite, got {}",
                self.particles.attractor_mass
            )));
        }
        if self.render_target.width == 0 || self.render_target.height == 0 {
            return Err(EngineError::Config(format!(
                "render target must be non-empty, got {}x{}",
                self.render_target.width, self.render_target.height
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_gives_defaults() {
        let config = EngineConfig::from_toml_str("").unwrap();
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.classification.output_capacity(), 10_000);
        assert_eq!(config.flocking.params.max_force, 0.005);
        assert!(config.hot_reload.enabled);
    }

    #[test]
    fn test_partial_sections() {
        let config = EngineConfig::from_toml_str(
            r#"
            backend = "software"
            frames = 3

            [classification]
            instance_count = 64
            output_capacity = 16

            [flocking.params]
            paused = true

            [particles]
            attractor_mass = 4.0
            "#,
        )
        .unwrap();

        assert_eq!(config.backend, BackendKind::Software);
        assert_eq!(config.frames, 3);
        assert_eq!(config.classification.instance_count, 64);
        assert_eq!(config.classification.output_capacity(), 16);
        assert_eq!(config.classification.lod_distance, 15.0);
        assert!(config.flocking.params.paused);
        assert_eq!(config.flocking.params.max_speed, 2.0);
        assert_eq!(config.particles.attractor_mass, 4.0);
        assert_eq!(config.particles.particle_count, 100_000);
    }

    #[test]
    fn test_round_trip_through_toml() {
        let mut config = EngineConfig::default();
        config.flocking.params.cohesion = 0.25;
        config.hot_reload.debounce_ms = 250;

        let text = config.to_toml_string().unwrap();
        assert_eq!(EngineConfig::from_toml_str(&text).unwrap(), config);
    }

    #[test]
    fn test_validation_rejects_degenerate_values() {
        assert!(EngineConfig::from_toml_str("[classification]\ninstance_count = 0").is_err());
        assert!(EngineConfig::from_toml_str("[classification]\nlod_distance = 0.0").is_err());
        assert!(EngineConfig::from_toml_str("[flocking]\ninstance_count = 0").is_err());
        assert!(EngineConfig::from_toml_str("[particles]\nparticle_count = 0").is_err());
        assert!(EngineConfig::from_toml_str("[particles]\nattractor_mass = inf").is_err());
        assert!(EngineConfig::from_toml_str("[render_target]\nwidth = 0").is_err());
        assert!(matches!(
            EngineConfig::from_toml_str("frames = \"many\""),
            Err(EngineError::Config(_))
        ));
    }

    #[test]
    fn test_flocking_params_reset() {
        let mut params = FlockingParams::default().without_steering();
        params.max_speed = 9.0;
        params.paused = true;
        params.reset();
        assert_eq!(params, FlockingParams::default());
    }

    #[test]
    fn test_load_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.toml");
        std::fs::write(&path, "frames = 7\n").unwrap();
        assert_eq!(EngineConfig::load(&path).unwrap().frames, 7);

        let missing = EngineConfig::load(dir.path().join("missing.toml"));
        assert!(matches!(missing, Err(EngineError::Io { .. })));
    }
}
