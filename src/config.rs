//! Engine configuration
//!
//! Everything a cycle consumes from the outside: transform instructions,
//! buffer capacities, grid shape and the reduction code path. Loadable from
//! TOML; every field has a default.

use crate::affine::{compile, compile_transform_set, TransformInstructions, TransformSet};
use crate::bounds::low_detail_plan;
use crate::constants::bounds::DEFAULT_SCALE_PADDING;
use crate::constants::capacity::{
    DEFAULT_CAPACITY, DEFAULT_LOW_DETAIL_GENERATIONS, MAX_POINT_CAPACITY,
};
use crate::constants::dispatch::MAX_LANES_PER_GROUP;
use crate::constants::voxel::{
    DEFAULT_OCCLUSION_RADIUS, DEFAULT_VOXEL_BOUNDS, DEFAULT_VOXEL_SIZE, MAX_OCCLUSION_RADIUS,
};
use crate::error::{EngineError, EngineResult, ErrorContext};
use crate::generation::SeedMode;
use crate::reduction::{validate_settings, ReductionSettings};
use crate::voxel::{grid_desc, sample_count, VoxelSource};
use glam::{Mat4, Vec3};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Points per full-detail batch
    pub capacity: u32,
    pub seed_mode: SeedMode,
    /// Depth of the low-detail surrogate used for bounds prediction
    pub low_detail_generations: u32,
    pub reduction: ReductionSettings,
    /// Multiplier on the measured extent, at least 1
    pub scale_padding: f32,
    /// Derive the final transform from the low-detail population
    pub predict_origin: bool,
    /// Side of the voxelized cube
    pub voxel_bounds: f32,
    pub voxel_size: f32,
    pub voxel_source: VoxelSource,
    /// Rasterize every point once per transform
    pub instanced_voxelization: bool,
    pub occlusion_radius: u32,
    /// Check the configured reduction against the single-threaded scan every cycle
    pub verify_reduction: bool,
    pub transforms: Vec<TransformInstructions>,
    /// Used as the final transform when `predict_origin` is off
    pub final_transform: Option<TransformInstructions>,
}

/// Sierpinski tetrahedron: four half-scale maps towards the corners
pub fn sierpinski_tetrahedron() -> Vec<TransformInstructions> {
    [
        Vec3::new(1.0, 1.0, 1.0),
        Vec3::new(1.0, -1.0, -1.0),
        Vec3::new(-1.0, 1.0, -1.0),
        Vec3::new(-1.0, -1.0, 1.0),
    ]
    .iter()
    .map(|corner| TransformInstructions::uniform(0.5, *corner * 0.5))
    .collect()
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            seed_mode: SeedMode::Origin,
            low_detail_generations: DEFAULT_LOW_DETAIL_GENERATIONS,
            reduction: ReductionSettings::default(),
            scale_padding: DEFAULT_SCALE_PADDING,
            predict_origin: true,
            voxel_bounds: DEFAULT_VOXEL_BOUNDS,
            voxel_size: DEFAULT_VOXEL_SIZE,
            voxel_source: VoxelSource::FullDetail,
            instanced_voxelization: false,
            occlusion_radius: DEFAULT_OCCLUSION_RADIUS,
            verify_reduction: false,
            transforms: sierpinski_tetrahedron(),
            final_transform: None,
        }
    }
}

impl EngineConfig {
    /// Parse a TOML document; missing fields take their defaults
    pub fn from_toml_str(source: &str) -> EngineResult<Self> {
        toml::from_str(source).map_err(|e| EngineError::ConfigParse {
            path: "<inline>".to_string(),
            error: e.to_string(),
        })
    }

    /// Load and validate a TOML config file
    pub fn load(path: impl AsRef<Path>) -> EngineResult<Self> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|e| EngineError::ConfigIo {
            path: path.display().to_string(),
            error: e.to_string(),
        })?;
        let config: Self = toml::from_str(&source).map_err(|e| EngineError::ConfigParse {
            path: path.display().to_string(),
            error: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> EngineResult<String> {
        toml::to_string_pretty(self).context("serialize config")
    }

    pub fn transform_count(&self) -> u32 {
        self.transforms.len() as u32
    }

    pub fn compile_transforms(&self) -> TransformSet {
        compile_transform_set(&self.transforms)
    }

    /// Authored final transform, identity when none is set
    pub fn authored_final_transform(&self) -> Mat4 {
        self.final_transform
            .as_ref()
            .map_or(Mat4::IDENTITY, compile)
    }

    /// Validate configuration parameters
    ///
    /// Runs before any buffer is allocated or kernel dispatched.
    pub fn validate(&self) -> EngineResult<()> {
        let t = self.transform_count();
        if t == 0 {
            return Err(EngineError::invalid_config(
                "transforms",
                0,
                "at least one transform is required",
            ));
        }

        if self.capacity < t {
            return Err(EngineError::invalid_config(
                "capacity",
                self.capacity,
                format!("must hold generation 0 ({} points)", t),
            ));
        }
        if self.capacity as u64 > MAX_POINT_CAPACITY {
            return Err(EngineError::invalid_config(
                "capacity",
                self.capacity,
                format!("exceeds the safe limit of {} points", MAX_POINT_CAPACITY),
            ));
        }

        let grid = grid_desc(self.voxel_bounds, self.voxel_size)?;
        validate_settings(&self.reduction, MAX_LANES_PER_GROUP)?;

        if !self.scale_padding.is_finite() || self.scale_padding < 1.0 {
            return Err(EngineError::invalid_config(
                "scale_padding",
                self.scale_padding,
                "must be at least 1",
            ));
        }

        if self.occlusion_radius > MAX_OCCLUSION_RADIUS {
            return Err(EngineError::invalid_config(
                "occlusion_radius",
                self.occlusion_radius,
                format!("must be at most {}", MAX_OCCLUSION_RADIUS),
            ));
        }

        let low_detail = low_detail_plan(t, self.low_detail_generations)?;
        let voxel_points = match self.voxel_source {
            VoxelSource::FullDetail => self.capacity,
            VoxelSource::LowDetail => low_detail.final_count,
        };
        sample_count(voxel_points, t, self.instanced_voxelization)?;

        log::info!(
            "[EngineConfig] Validation: {} transforms, capacity={}, low_detail={} points, grid={}^3",
            t,
            self.capacity,
            low_detail.capacity,
            grid.dimension
        );
        Ok(())
    }
}
