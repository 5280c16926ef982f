//! Per-frame cull dispatch and indirect draw, run on the CPU backend.

use glam::{Mat4, Vec3};
use lattice_meshlet::primitives;
use lattice_rendering::culling::is_meshlet_visible;
use lattice_rendering::gpu::{BufferKind, CpuBackend};
use lattice_rendering::{Camera, CameraRole, FrameCameras, MeshAsset, MeshletPipelineConfig, MeshletRenderer};

fn camera(eye: Vec3, target: Vec3) -> Camera {
    Camera::look_at(eye, target, 60_f32.to_radians(), 1.0, 0.1, 200.0)
}

fn front_view() -> FrameCameras {
    FrameCameras::new(camera(Vec3::new(0.0, 0.0, 8.0), Vec3::ZERO))
}

fn config(frames_in_flight: u32) -> MeshletPipelineConfig {
    MeshletPipelineConfig {
        frames_in_flight,
        ..MeshletPipelineConfig::default()
    }
}

fn renderer(gpu: &mut CpuBackend, frames_in_flight: u32) -> MeshletRenderer<&mut CpuBackend> {
    MeshletRenderer::new(gpu, config(frames_in_flight)).unwrap()
}

/// 2x2 grid in the XY plane facing +Z, centered on `center`.
fn panel() -> MeshAsset {
    MeshAsset::new(primitives::grid(4, 4, 0.5))
}

fn panel_at(center: Vec3) -> Mat4 {
    Mat4::from_translation(center - Vec3::new(1.0, 1.0, 0.0))
}

#[test]
fn test_workgroups_cover_every_pair() {
    let mut gpu = CpuBackend::new();
    let mut r = renderer(&mut gpu, 2);
    let sphere = MeshAsset::new(primitives::uv_sphere(1.0, 32, 16));
    for x in [-2.0, 0.0, 2.0] {
        r.spawn(&sphere, Mat4::from_translation(Vec3::X * x)).unwrap();
    }

    let report = r.render_frame(&front_view());
    let meshlets = r.cache().entry(sphere.id()).unwrap().meshlet_count() as u32;
    assert!(meshlets > 1);

    let dispatches = r.backend_mut().take_dispatches();
    assert_eq!(dispatches.len(), 1);
    assert_eq!(dispatches[0].meshlet_count, meshlets);
    assert_eq!(dispatches[0].instance_count, 3);
    assert_eq!(dispatches[0].workgroups, (meshlets * 3).div_ceil(64));
    assert_eq!(report.stats.dispatched_workgroups, u64::from(dispatches[0].workgroups));
    assert_eq!(report.stats.meshlet_tests, u64::from(meshlets * 3));
}

#[test]
fn test_args_instance_count_matches_visible_list() {
    let mut gpu = CpuBackend::new();
    let mut r = renderer(&mut gpu, 2);
    let sphere = MeshAsset::new(primitives::uv_sphere(1.0, 32, 16));
    let models = [Mat4::IDENTITY, Mat4::from_translation(Vec3::new(2.5, 0.0, 0.0))];
    for model in models {
        r.spawn(&sphere, model).unwrap();
    }

    let cameras = front_view();
    r.render_frame(&cameras);
    let draws = r.backend_mut().take_draws();
    assert_eq!(draws.len(), 1);
    let draw = &draws[0];
    assert_eq!(draw.args.instance_count as usize, draw.visible.len());
    assert_eq!(draw.args.index_count, 126 * 3);

    // Same decision as the reference test, pair by pair.
    let entry = r.cache().entry(sphere.id()).unwrap();
    let cull = cameras.cull_camera();
    let frustum = cull.frustum();
    let mut expected = Vec::new();
    for (i, model) in models.iter().enumerate() {
        for (m, data) in entry.geometry().cull_data.iter().enumerate() {
            if is_meshlet_visible(data, model, &frustum, cull.position) {
                expected.push((m as u32, i as u32));
            }
        }
    }
    let mut actual: Vec<_> = draw.visible.iter().map(|v| (v.meshlet(), v.instance())).collect();
    actual.sort_unstable();
    expected.sort_unstable();
    assert_eq!(actual, expected);

    // Back halves of the spheres are cone-culled.
    assert!(!actual.is_empty());
    assert!(actual.len() < entry.meshlet_count() * 2);
}

#[test]
fn test_back_facing_panel_is_culled() {
    let mut gpu = CpuBackend::new();
    let mut r = renderer(&mut gpu, 1);
    r.spawn(&panel(), panel_at(Vec3::ZERO)).unwrap();

    let front = FrameCameras::new(camera(Vec3::new(0.0, 0.0, 5.0), Vec3::ZERO));
    r.render_frame(&front);
    let draws = r.backend_mut().take_draws();
    assert_eq!(draws[0].args.instance_count, 1);

    let behind = FrameCameras::new(camera(Vec3::new(0.0, 0.0, -5.0), Vec3::ZERO));
    r.render_frame(&behind);
    let draws = r.backend_mut().take_draws();
    assert_eq!(draws.len(), 1);
    assert_eq!(draws[0].args.instance_count, 0);
    assert!(draws[0].visible.is_empty());
}

#[test]
fn test_stretched_panel_culls_by_world_normal() {
    let mut gpu = CpuBackend::new();
    let mut r = renderer(&mut gpu, 1);
    // Faces (1, 0, 1) before the stretch and (1, 0, 4) after it.
    let model = Mat4::from_scale(Vec3::new(4.0, 1.0, 1.0))
        * Mat4::from_rotation_y(45_f32.to_radians())
        * panel_at(Vec3::ZERO);
    r.spawn(&panel(), model).unwrap();

    let facing = FrameCameras::new(camera(Vec3::new(-10.0, 0.0, 4.0), Vec3::ZERO));
    r.render_frame(&facing);
    let draws = r.backend_mut().take_draws();
    assert_eq!(draws[0].args.instance_count, 1);

    let behind = FrameCameras::new(camera(Vec3::new(2.0, 0.0, -10.0), Vec3::ZERO));
    r.render_frame(&behind);
    let draws = r.backend_mut().take_draws();
    assert_eq!(draws[0].args.instance_count, 0);
}

#[test]
fn test_instance_outside_frustum_is_culled() {
    let mut gpu = CpuBackend::new();
    let mut r = renderer(&mut gpu, 1);
    let panel = panel();
    r.spawn(&panel, panel_at(Vec3::ZERO)).unwrap();
    r.spawn(&panel, panel_at(Vec3::new(40.0, 0.0, 0.0))).unwrap();

    r.render_frame(&front_view());
    let draws = r.backend_mut().take_draws();
    assert_eq!(draws[0].args.instance_count, 1);
    assert!(draws[0].visible.iter().all(|v| v.instance() == 0));
}

#[test]
fn test_group_outside_frustum_is_not_dispatched() {
    let mut gpu = CpuBackend::new();
    let mut r = renderer(&mut gpu, 1);
    r.spawn(&panel(), panel_at(Vec3::new(0.0, 0.0, 50.0))).unwrap();

    let report = r.render_frame(&front_view());
    assert_eq!(report.stats.groups_frustum_culled, 1);
    assert_eq!(report.stats.groups_drawn, 0);
    assert!(r.backend().dispatches().is_empty());
    assert!(r.backend().draws().is_empty());
}

#[test]
fn test_secondary_camera_culls_with_main_frustum() {
    let mut gpu = CpuBackend::new();
    let mut r = renderer(&mut gpu, 1);
    r.spawn(&panel(), panel_at(Vec3::ZERO)).unwrap();

    let main = camera(Vec3::new(0.0, 0.0, 5.0), Vec3::ZERO);
    let editor = camera(Vec3::new(0.0, 0.0, -5.0), Vec3::ZERO).with_role(CameraRole::Secondary);

    // The editor sees the panel from behind but culls as the game camera.
    r.render_frame(&FrameCameras::with_main(editor, main));
    let draws = r.backend_mut().take_draws();
    assert_eq!(draws[0].args.instance_count, 1);

    // Alone, the editor culls for itself.
    r.render_frame(&FrameCameras::new(editor));
    let draws = r.backend_mut().take_draws();
    assert_eq!(draws[0].args.instance_count, 0);
}

#[test]
fn test_disabled_instances_are_not_submitted() {
    let mut gpu = CpuBackend::new();
    let mut r = renderer(&mut gpu, 1);
    let panel = panel();
    let handles: Vec<_> = (0..3)
        .map(|i| r.spawn(&panel, panel_at(Vec3::X * (i as f32 - 1.0))).unwrap())
        .collect();
    r.set_enabled(handles[1], false).unwrap();

    let report = r.render_frame(&front_view());
    assert_eq!(report.stats.instances_submitted, 2);
    let dispatches = r.backend_mut().take_dispatches();
    assert_eq!(dispatches[0].instance_count, 2);
    let draws = r.backend_mut().take_draws();
    assert!(draws[0].visible.iter().all(|v| v.instance() < 2));
}

#[test]
fn test_empty_group_touches_no_buffers() {
    let mut gpu = CpuBackend::new();
    let mut r = renderer(&mut gpu, 1);
    let handle = r.spawn(&panel(), Mat4::IDENTITY).unwrap();
    r.set_enabled(handle, false).unwrap();
    let allocations = r.backend().allocation_count();

    let report = r.render_frame(&front_view());
    assert_eq!(report.stats.groups_skipped_empty, 1);
    assert_eq!(report.stats.groups_drawn, 0);
    assert_eq!(r.backend().allocation_count(), allocations);
    assert_eq!(r.backend().live_buffers(), 4);
    assert!(r.backend().dispatches().is_empty());
    assert!(r.backend().draws().is_empty());
}

#[test]
fn test_draw_buffers_reused_while_sizes_are_stable() {
    let mut gpu = CpuBackend::new();
    let mut r = renderer(&mut gpu, 1);
    let panel = panel();
    let first = r.spawn(&panel, panel_at(Vec3::ZERO)).unwrap();

    assert_eq!(r.render_frame(&front_view()).stats.buffer_allocations, 1);
    let allocations = r.backend().allocation_count();
    for step in 0..3 {
        // Moving an instance changes contents, not sizes.
        r.set_transform(first, panel_at(Vec3::Y * step as f32 * 0.1)).unwrap();
        assert_eq!(r.render_frame(&front_view()).stats.buffer_allocations, 0);
    }
    assert_eq!(r.backend().allocation_count(), allocations);

    r.spawn(&panel, panel_at(Vec3::X)).unwrap();
    assert_eq!(r.render_frame(&front_view()).stats.buffer_allocations, 1);
    assert_eq!(r.backend().live_buffers_of(BufferKind::Append), 1);
    assert_eq!(r.backend().live_buffers_of(BufferKind::IndirectArgs), 1);
}

#[test]
fn test_draw_buffers_rotate_across_frames_in_flight() {
    let mut gpu = CpuBackend::new();
    let mut r = renderer(&mut gpu, 2);
    r.spawn(&panel(), panel_at(Vec3::ZERO)).unwrap();

    let allocations: Vec<u32> = (0..4)
        .map(|_| r.render_frame(&front_view()).stats.buffer_allocations)
        .collect();
    assert_eq!(allocations, vec![1, 1, 0, 0]);
    assert_eq!(r.backend().live_buffers_of(BufferKind::Append), 2);

    let frames: Vec<u64> = r.backend().draws().iter().map(|d| d.frame).collect();
    assert_eq!(frames, vec![0, 1, 2, 3]);
}

#[test]
fn test_out_of_memory_group_is_skipped() {
    let mut gpu = CpuBackend::new();
    let mut r = renderer(&mut gpu, 1);
    let small = panel();
    let crowded = MeshAsset::new(primitives::cube(0.1));
    r.spawn(&small, panel_at(Vec3::ZERO)).unwrap();
    for i in 0..200 {
        let at = Vec3::new((i % 20) as f32 * 0.2 - 2.0, (i / 20) as f32 * 0.2 - 1.0, 0.0);
        r.spawn(&crowded, Mat4::from_translation(at)).unwrap();
    }

    // Room for the panel's draw set only.
    let headroom = 1024;
    let budget = r.backend().allocated_bytes() + headroom;
    r.backend_mut().set_memory_budget(Some(budget));

    let report = r.render_frame(&front_view());
    assert_eq!(report.stats.groups_drawn, 1);
    assert_eq!(report.stats.groups_failed, 1);
    let draws = r.backend_mut().take_draws();
    assert_eq!(draws.len(), 1);
    assert_eq!(draws[0].args.instance_count, 1);
    // Geometry of both meshes plus one draw set; the partial set was freed.
    assert_eq!(r.backend().live_buffers(), 12);

    r.backend_mut().set_memory_budget(None);
    let report = r.render_frame(&front_view());
    assert_eq!(report.stats.groups_drawn, 2);
    assert_eq!(report.stats.groups_failed, 0);
}

#[test]
fn test_removed_mesh_releases_draw_buffers_next_frame() {
    let mut gpu = CpuBackend::new();
    let mut r = renderer(&mut gpu, 1);
    let handle = r.spawn(&panel(), panel_at(Vec3::ZERO)).unwrap();
    r.render_frame(&front_view());
    assert_eq!(r.backend().live_buffers(), 8);

    r.despawn(handle).unwrap();
    assert_eq!(r.backend().live_buffers(), 4);
    r.render_frame(&front_view());
    assert_eq!(r.backend().live_buffers(), 0);
}

#[test]
fn test_reload_and_drop_release_everything() {
    let mut gpu = CpuBackend::new();
    {
        let mut r = renderer(&mut gpu, 2);
        let panel = panel();
        for i in 0..4 {
            r.spawn(&panel, panel_at(Vec3::X * i as f32)).unwrap();
        }
        r.render_frame(&front_view());
        r.render_frame(&front_view());

        r.reload();
        assert_eq!(r.backend().live_buffers(), 0);
        assert_eq!(r.instance_count(), 0);

        r.spawn(&panel, Mat4::IDENTITY).unwrap();
        r.render_frame(&front_view());
        assert!(r.backend().live_buffers() > 0);
    }
    assert_eq!(gpu.live_buffers(), 0);
    assert_eq!(gpu.allocated_bytes(), 0);
}

#[test]
fn test_frames_without_instances_record_nothing() {
    let mut gpu = CpuBackend::new();
    let mut r = renderer(&mut gpu, 1);
    let report = r.render_frame(&front_view());
    assert_eq!(report.frame_index, 0);
    assert_eq!(report.stats, Default::default());
    assert_eq!(r.render_frame(&front_view()).frame_index, 1);
    assert!(r.backend().dispatches().is_empty());
}

#[cfg(feature = "debug-readback")]
#[test]
fn test_debug_readback_reports_visible_list() {
    let mut gpu = CpuBackend::new();
    let config = MeshletPipelineConfig {
        debug_readback: true,
        ..config(1)
    };
    let mut r = MeshletRenderer::new(&mut gpu, config).unwrap();
    let panel = panel();
    r.spawn(&panel, panel_at(Vec3::ZERO)).unwrap();

    let report = r.render_frame(&front_view());
    assert_eq!(report.readbacks.len(), 1);
    assert_eq!(report.readbacks[0].mesh_id, panel.id());
    assert_eq!(report.readbacks[0].visible_count, 1);
    assert_eq!(report.readbacks[0].visible[0].instance(), 0);
}

#[test]
fn test_large_dispatch_runs_on_cpu_backend() {
    let mut gpu = CpuBackend::with_workgroup_size(64);
    let mut r = renderer(&mut gpu, 1);
    let sphere = MeshAsset::new(primitives::uv_sphere(0.2, 16, 8));
    for i in 0..300 {
        let at = Vec3::new((i % 30) as f32 * 0.3 - 4.5, (i / 30) as f32 * 0.3 - 1.5, 0.0);
        r.spawn(&sphere, Mat4::from_translation(at)).unwrap();
    }

    let report = r.render_frame(&front_view());
    let draws = r.backend_mut().take_draws();
    assert_eq!(report.stats.instances_submitted, 300);
    assert_eq!(draws[0].args.instance_count as usize, draws[0].visible.len());
    assert!(draws[0].visible.iter().all(|v| v.instance() < 300));
}
