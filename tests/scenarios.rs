//! End-to-end meshing scenarios
use isodual::{
    ChunkStore, ContourVariant, Mesh, Octree, Settings, contour_manifold,
    contour_simple,
    field::Sphere,
};
use nalgebra::Vector3;
use std::collections::{BTreeMap, BTreeSet};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn sphere() -> Sphere {
    Sphere {
        center: Vector3::new(1.0, 1.0, 1.0),
        radius: 0.7,
    }
}

fn settings(depth: u8, error_threshold: f32) -> Settings {
    Settings {
        depth,
        error_threshold,
        scale: Vector3::repeat(2.0 / (1 << depth) as f32),
        ..Settings::default()
    }
}

/// Every vertex in the output is distinct
fn check_for_vertex_dupes(mesh: &Mesh) {
    let mut verts = BTreeSet::new();
    for v in &mesh.vertices {
        let key = (
            v.pos.x.to_bits(),
            v.pos.y.to_bits(),
            v.pos.z.to_bits(),
        );
        assert!(verts.insert(key), "duplicate vertex at {:?}", v.pos);
    }
}

/// Every directed edge appears exactly once, paired with its reverse; this
/// holds exactly when the mesh is closed and consistently wound
fn check_for_edge_matching(mesh: &Mesh) {
    let mut edges: BTreeMap<(usize, usize), usize> = BTreeMap::new();
    for t in &mesh.triangles {
        let [a, b, c] = t.vertices;
        for (u, v) in [(a, b), (b, c), (c, a)] {
            *edges.entry((u, v)).or_default() += 1;
        }
    }
    for ((u, v), count) in &edges {
        assert_eq!(*count, 1, "duplicate directed edge ({u}, {v})");
        assert!(
            edges.contains_key(&(*v, *u)),
            "unpaired directed edge ({u}, {v})"
        );
    }
}

fn check_on_sphere(mesh: &Mesh, f: &Sphere, tolerance: f32) {
    for v in &mesh.vertices {
        let d = (v.pos - f.center).norm() - f.radius;
        assert!(
            d.abs() < tolerance,
            "vertex {:?} is {d} away from the surface",
            v.pos
        );
    }
}

#[test]
fn simple_sphere_is_closed() {
    init_logging();
    let f = sphere();
    let s = settings(4, 2e-2);
    let o = Octree::build(&f, [0; 3], &s).unwrap().unwrap();
    let mesh = contour_simple(&o, |_, _| 0);

    assert!(
        mesh.vertices.len() > 50 && mesh.vertices.len() < 1200,
        "unexpected vertex count {}",
        mesh.vertices.len()
    );
    check_for_vertex_dupes(&mesh);
    check_for_edge_matching(&mesh);
    check_on_sphere(&mesh, &f, 0.15);

    // Every solved vertex in the tree honors the error budget
    for id in o.reachable() {
        if let Some(v) = &o[id].vertex {
            assert!(
                v.error <= s.error_threshold,
                "vertex error {} over budget at node {id}",
                v.error
            );
        }
    }
}

#[test]
fn manifold_sphere_is_watertight() {
    init_logging();
    let f = sphere();
    let s = settings(4, 1e-3);
    let o = Octree::build_full(&f, [0; 3], &s).unwrap().unwrap();
    let mesh = contour_manifold(&o, &s, |_, _| 0).unwrap();

    assert!(!mesh.triangles.is_empty());
    check_for_vertex_dupes(&mesh);
    check_for_edge_matching(&mesh);
    check_on_sphere(&mesh, &f, 0.1);
}

#[test]
fn manifold_promotion_simplifies() {
    let f = sphere();
    let o = {
        let s = settings(4, 1e-3);
        Octree::build_full(&f, [0; 3], &s).unwrap().unwrap()
    };
    let fine = contour_manifold(&o, &settings(4, 1e-6), |_, _| 0).unwrap();
    let coarse = contour_manifold(&o, &settings(4, 1e-2), |_, _| 0).unwrap();
    let flat = contour_manifold(&o, &settings(4, 1e9), |_, _| 0).unwrap();

    // Promotion must actually coarsen the mesh once the budget allows it
    assert!(!coarse.triangles.is_empty());
    assert!(
        coarse.vertices.len() < fine.vertices.len(),
        "no vertex was promoted: {} vs {}",
        coarse.vertices.len(),
        fine.vertices.len()
    );
    check_for_edge_matching(&coarse);
    check_on_sphere(&coarse, &f, 0.15);

    // With an unlimited budget, only the non-disc root stops promotion;
    // the mesh stays closed over a handful of coarse cap vertices
    assert!(!flat.triangles.is_empty());
    assert!(flat.vertices.len() <= coarse.vertices.len());
    check_for_edge_matching(&flat);
}

#[test]
fn chunk_seam_is_continuous() {
    init_logging();
    // Two chunks along X, with all shared faces pinned to unit resolution.
    // The overlap layer samples identical corners from both sides, so the
    // geometry inside it must match bit for bit.
    let f = Sphere {
        center: Vector3::new(2.0, 1.0, 1.0),
        radius: 0.5,
    };
    let s = Settings {
        boundary_mask: 0x3f,
        ..settings(3, 1e-3)
    };
    let stride = (1 << s.depth) - 1;
    let a = Octree::build(&f, [0; 3], &s).unwrap().unwrap();
    let b = Octree::build(&f, [stride, 0, 0], &s).unwrap().unwrap();
    let mesh_a = contour_simple(&a, |_, _| 0);
    let mesh_b = contour_simple(&b, |_, _| 0);

    // World extent of the shared cell layer, shrunk a little so vertices
    // that clamp right onto the layer's boundary planes don't flicker in
    // and out of the comparison
    let lo = stride as f32 * s.scale.x + 0.01;
    let hi = (stride + 1) as f32 * s.scale.x - 0.01;
    let slab = |mesh: &Mesh| -> BTreeSet<(u32, u32, u32)> {
        mesh.vertices
            .iter()
            .filter(|v| v.pos.x > lo && v.pos.x < hi)
            .map(|v| {
                (v.pos.x.to_bits(), v.pos.y.to_bits(), v.pos.z.to_bits())
            })
            .collect()
    };
    let sa = slab(&mesh_a);
    let sb = slab(&mesh_b);
    assert!(!sa.is_empty(), "no geometry crosses the seam");
    assert_eq!(sa, sb, "seam vertex sets differ");
}

#[test]
fn manifold_store_round_trip() {
    init_logging();
    let settings = settings(4, 1e-3);
    let store = ChunkStore::new(sphere(), settings, ContourVariant::Manifold);
    store.mark_dirty_region([0, 0, 0], [16, 16, 16]);
    assert!(store.rebuild_dirty().unwrap() >= 1);
    let mesh = store.mesh([0, 0, 0]).unwrap();
    check_for_edge_matching(&mesh);

    let mut stl = vec![];
    mesh.write_stl(&mut stl).unwrap();
    assert_eq!(stl.len(), 84 + 50 * mesh.triangles.len());
}
