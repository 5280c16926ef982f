//! Pipeline configuration, loaded once at startup.

use std::path::Path;

use lattice_meshlet::MeshletBudget;
use serde::{Deserialize, Serialize};

use crate::error::{RenderError, RenderResult};

/// Threads per culling workgroup in the baseline shader.
pub const DEFAULT_WORKGROUP_SIZE: u32 = 64;

/// Per-frame buffer sets rotated across frames.
pub const DEFAULT_FRAMES_IN_FLIGHT: u32 = 2;

/// Upper bound of `workgroup_size`, the WebGPU default invocation limit.
pub const MAX_WORKGROUP_SIZE: u32 = 256;

/// Upper bound of `frames_in_flight`.
pub const MAX_FRAMES_IN_FLIGHT: u32 = 4;

/// Meshlet pipeline configuration.
///
/// Missing TOML keys take their default:
///
/// ```toml
/// workgroup_size = 64
/// frames_in_flight = 2
/// debug_readback = false
///
/// [budget]
/// max_vertices = 64
/// max_triangles = 126
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MeshletPipelineConfig {
    /// Meshlet vertex and triangle budget.
    pub budget: MeshletBudget,
    /// Culling threads per workgroup.
    pub workgroup_size: u32,
    /// Draw buffer sets kept per mesh.
    pub frames_in_flight: u32,
    /// Read back visible lists each frame. Only honored when the crate is
    /// built with the `debug-readback` feature.
    pub debug_readback: bool,
}

impl Default for MeshletPipelineConfig {
    fn default() -> Self {
        Self {
            budget: MeshletBudget::default(),
            workgroup_size: DEFAULT_WORKGROUP_SIZE,
            frames_in_flight: DEFAULT_FRAMES_IN_FLIGHT,
            debug_readback: false,
        }
    }
}

impl MeshletPipelineConfig {
    /// Parses and validates a TOML document.
    ///
    /// # Errors
    ///
    /// [`RenderError::Config`] on a parse error or an invalid value.
    pub fn from_toml_str(source: &str) -> RenderResult<Self> {
        let config: Self = toml::from_str(source).map_err(|e| RenderError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a TOML file.
    ///
    /// # Errors
    ///
    /// [`RenderError::Config`] if the file cannot be read or is invalid.
    pub fn from_toml_file(path: impl AsRef<Path>) -> RenderResult<Self> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path)
            .map_err(|e| RenderError::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&source)
    }

    /// Checks every field.
    ///
    /// # Errors
    ///
    /// [`RenderError::Config`] naming the first invalid field.
    pub fn validate(&self) -> RenderResult<()> {
        self.budget
            .validate()
            .map_err(|e| RenderError::Config(e.to_string()))?;
        if !(1..=MAX_WORKGROUP_SIZE).contains(&self.workgroup_size) {
            return Err(RenderError::Config(format!(
                "workgroup_size must be in 1..={MAX_WORKGROUP_SIZE}, got {}",
                self.workgroup_size
            )));
        }
        if !(1..=MAX_FRAMES_IN_FLIGHT).contains(&self.frames_in_flight) {
            return Err(RenderError::Config(format!(
                "frames_in_flight must be in 1..={MAX_FRAMES_IN_FLIGHT}, got {}",
                self.frames_in_flight
            )));
        }
        Ok(())
    }

    /// Workgroups needed to test every (meshlet, instance) pair.
    #[inline]
    #[must_use]
    pub fn workgroup_count(&self, meshlets: u32, instances: u32) -> u32 {
        let pairs = u64::from(meshlets) * u64::from(instances);
        pairs.div_ceil(u64::from(self.workgroup_size)) as u32
    }
}
