//! Cameras for one frame.
//!
//! Drawing always uses the active camera. Culling uses the main camera
//! whenever the active one is a secondary view, so an editor or debug
//! camera shows exactly what the game camera would keep.

use glam::{Mat4, Vec3};

use crate::culling::Frustum;

/// What a camera is used for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum CameraRole {
    /// The game view.
    #[default]
    Main,
    /// Editor, debug or preview view.
    Secondary,
}

/// View and projection of one camera.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Camera {
    /// World to view.
    pub view: Mat4,
    /// View to clip, depth in [0, 1].
    pub projection: Mat4,
    /// World-space eye position.
    pub position: Vec3,
    /// Camera role.
    pub role: CameraRole,
}

impl Camera {
    /// Creates a camera. The position is recovered from `view`.
    #[must_use]
    pub fn new(view: Mat4, projection: Mat4, role: CameraRole) -> Self {
        Self {
            view,
            projection,
            position: view.inverse().w_axis.truncate(),
            role,
        }
    }

    /// Right-handed perspective camera at `eye` looking at `target`.
    #[must_use]
    pub fn look_at(eye: Vec3, target: Vec3, fov_y_radians: f32, aspect: f32, near: f32, far: f32) -> Self {
        Self {
            view: Mat4::look_at_rh(eye, target, Vec3::Y),
            projection: Mat4::perspective_rh(fov_y_radians, aspect, near, far),
            position: eye,
            role: CameraRole::Main,
        }
    }

    /// Same camera with another role.
    #[must_use]
    pub const fn with_role(mut self, role: CameraRole) -> Self {
        self.role = role;
        self
    }

    /// Projection times view.
    #[inline]
    #[must_use]
    pub fn view_projection(&self) -> Mat4 {
        self.projection * self.view
    }

    /// Normalized frustum planes.
    #[must_use]
    pub fn frustum(&self) -> Frustum {
        Frustum::from_view_projection(&self.view_projection())
    }
}

/// Cameras resolved for one frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameCameras {
    /// Camera being rendered.
    pub active: Camera,
    /// Game camera, if one exists.
    pub main: Option<Camera>,
}

impl FrameCameras {
    /// Only an active camera.
    #[must_use]
    pub const fn new(active: Camera) -> Self {
        Self { active, main: None }
    }

    /// Active camera plus the game camera.
    #[must_use]
    pub const fn with_main(active: Camera, main: Camera) -> Self {
        Self {
            active,
            main: Some(main),
        }
    }

    /// Camera whose frustum and position drive culling.
    #[must_use]
    pub fn cull_camera(&self) -> &Camera {
        match (self.active.role, &self.main) {
            (CameraRole::Secondary, Some(main)) => main,
            _ => &self.active,
        }
    }
}
