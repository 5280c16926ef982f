//! # Lattice Rendering
//!
//! Runtime half of the meshlet pipeline. Caches meshlet geometry once per
//! unique mesh and, every frame, culls (meshlet, instance) pairs on the GPU
//! and draws the survivors with one indirect call per mesh.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    FRAME PIPELINE                            │
//! ├─────────────────────────────────────────────────────────────┤
//! │  MeshAsset → MeshletCache (ref-counted GPU geometry)        │
//! │       ↓                                                      │
//! │  InstanceGroup → rayon transforms → Cull Dispatch (Compute) │
//! │       ↓                                   ↓                  │
//! │  Visibility Append → Counter Copy → Draw Indexed Indirect   │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Rules
//!
//! - One geometry buffer set per unique mesh, never per instance
//! - No CPU readback on the frame path
//! - Draw buffers reallocate only when their size changes
//! - A failing mesh group is skipped, never the whole frame

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(
    clippy::cast_possible_truncation,
    clippy::cast_precision_loss,
    clippy::module_name_repetitions
)]

pub mod cache;
pub mod camera;
pub mod config;
pub mod culling;
pub mod draw;
pub mod error;
pub mod gpu;
pub mod renderer;

pub use cache::{CacheStats, InstanceHandle, MeshAsset, MeshId, MeshletCache};
pub use camera::{Camera, CameraRole, FrameCameras};
pub use config::MeshletPipelineConfig;
pub use culling::{Aabb, Frustum, InstanceCull, Plane};
pub use draw::{CullDrawOrchestrator, FrameReport, FrameStats, GroupReadback};
pub use error::{RenderError, RenderResult};
pub use gpu::{CpuBackend, GpuBackend, GpuError, WgpuBackend};
pub use renderer::MeshletRenderer;
