//! Structural properties of the meshlet build across procedural meshes.

use lattice_meshlet::glam::Vec3;
use lattice_meshlet::{
    decode_unit_byte, encode_unit_byte, primitives, MeshletBudget, MeshletBuilder,
    MeshletGeometry, SourceMesh, MAX_TRIANGLES, MAX_VERTICES,
};

fn build(mesh: &SourceMesh) -> MeshletGeometry {
    MeshletBuilder::default().build(mesh).unwrap()
}

/// Every source triangle appears in exactly one meshlet, with its corners
/// in the original order.
fn assert_coverage(mesh: &SourceMesh, geometry: &MeshletGeometry) {
    let partition = &geometry.partition;
    let mut seen = vec![0_u32; mesh.triangle_count()];

    for meshlet in &geometry.meshlets {
        let vertices = partition.meshlet_vertices(meshlet);
        let first = meshlet.triangle_offset as usize / 3;
        for (k, tri) in partition.meshlet_triangles(meshlet).chunks_exact(3).enumerate() {
            let source = partition.source_triangles[first + k] as usize;
            seen[source] += 1;
            let corners = [
                vertices[tri[0] as usize],
                vertices[tri[1] as usize],
                vertices[tri[2] as usize],
            ];
            assert_eq!(corners, mesh.triangle(source));
        }
    }

    assert!(seen.iter().all(|&n| n == 1), "coverage is not a bijection");
}

fn assert_budgets(geometry: &MeshletGeometry) {
    for meshlet in &geometry.meshlets {
        assert!(meshlet.vertex_count <= MAX_VERTICES);
        assert!(meshlet.triangle_count <= MAX_TRIANGLES);
        assert!(meshlet.triangle_count > 0);
    }
}

#[test]
fn test_cube_is_one_meshlet() {
    let mesh = primitives::cube(1.0);
    let geometry = build(&mesh);

    assert_eq!(geometry.meshlet_count(), 1);
    assert_eq!(geometry.meshlets[0].triangle_count, 12);
    assert_eq!(geometry.meshlets[0].vertex_count, 8);
    assert_coverage(&mesh, &geometry);
}

#[test]
fn test_strip_of_300_triangles() {
    let mesh = primitives::strip(300);
    let geometry = build(&mesh);

    assert!(geometry.meshlet_count() >= 3);
    assert_budgets(&geometry);
    assert_coverage(&mesh, &geometry);
    assert_eq!(geometry.triangle_count(), 300);
}

#[test]
fn test_sphere_coverage_and_budgets() {
    let mesh = primitives::uv_sphere(2.0, 48, 32);
    let geometry = build(&mesh);

    assert!(geometry.meshlet_count() > 1);
    assert_budgets(&geometry);
    assert_coverage(&mesh, &geometry);
}

#[test]
fn test_small_budget_still_covers_everything() {
    let mesh = primitives::grid(16, 16, 0.5);
    let geometry = MeshletBuilder::new(MeshletBudget::new(8, 5)).build(&mesh).unwrap();

    for meshlet in &geometry.meshlets {
        assert!(meshlet.vertex_count <= 8);
        assert!(meshlet.triangle_count <= 5);
    }
    assert_coverage(&mesh, &geometry);
}

#[test]
fn test_bounding_sphere_contains_meshlet_vertices() {
    let mesh = primitives::uv_sphere(3.0, 32, 16);
    let geometry = build(&mesh);

    for (meshlet, cull) in geometry.meshlets.iter().zip(&geometry.cull_data) {
        let (center, radius) = cull.bounding_sphere();
        for &v in geometry.partition.meshlet_vertices(meshlet) {
            let d = mesh.positions[v as usize].distance(center);
            assert!(d <= radius + 1e-4, "vertex {v} at {d} outside radius {radius}");
        }
    }
}

#[test]
fn test_unit_byte_round_trip() {
    for step in -127..=127 {
        let x = step as f32 / 127.0;
        let back = decode_unit_byte(encode_unit_byte(x));
        assert!((back - x).abs() <= 1.0 / 127.0, "x = {x}, decoded = {back}");
    }
}

#[test]
fn test_degenerate_triangle_produces_no_nan() {
    let mut mesh = primitives::grid(2, 2, 1.0);
    // Zero-area triangle sharing an edge with the grid.
    mesh.positions.push(Vec3::new(0.5, 0.0, 0.0));
    let extra = (mesh.positions.len() - 1) as u32;
    mesh.indices.extend_from_slice(&[0, 1, extra]);
    mesh.normals = None;

    let geometry = build(&mesh);
    for cull in &geometry.cull_data {
        let cone = cull.cone();
        assert!(cone.axis.is_finite());
        assert!(cone.cutoff.is_finite());
        assert!(cull.apex_offset.is_finite());
        assert!(cull.radius.is_finite());
    }
    assert_coverage(&mesh, &geometry);
}

#[test]
fn test_flat_meshlets_share_axis() {
    let geometry = build(&primitives::grid(20, 20, 1.0));
    for cull in &geometry.cull_data {
        let cone = cull.cone();
        assert!((cone.axis - Vec3::Z).length() < 0.01);
        assert!(!cone.is_disabled());
    }
}

#[test]
fn test_build_is_deterministic() {
    let mesh = primitives::uv_sphere(1.0, 24, 12);
    assert_eq!(build(&mesh), build(&mesh));
}

#[test]
fn test_small_scale_meshes_keep_cones() {
    let geometry = build(&primitives::grid(20, 20, 1e-4));
    for cull in &geometry.cull_data {
        let cone = cull.cone();
        assert!(!cone.is_disabled());
        assert!((cone.axis - Vec3::Z).length() < 0.01);
    }

    // Same cones as the unit-scale sphere.
    let tiny = build(&primitives::uv_sphere(1e-3, 24, 12));
    let unit = build(&primitives::uv_sphere(1.0, 24, 12));
    assert_eq!(tiny.meshlets, unit.meshlets);
    for (a, b) in tiny.cull_data.iter().zip(&unit.cull_data) {
        assert_eq!(a.cone().is_disabled(), b.cone().is_disabled());
        assert!((a.cone().axis - b.cone().axis).length() < 0.02);
    }
}
