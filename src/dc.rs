//! Recursive cell/face/edge contour traversal
//!
//! The traversal walks every minimal grid edge of the octree exactly once,
//! recursing through the three right-handed coordinate frames.  It is shared
//! between the simple extractor below and the manifold extractor in
//! [`crate::manifold`], which differ only in how a cell's participant vertex
//! around an edge is resolved.
use crate::{
    mesh::{Mesh, MeshBuilder, TileInfo, Vertex},
    octree::{NodeId, NodeKind, Octree},
    types::{Corner, Edge, Frame, X, XYZ, Y, YZX, Z, ZXY},
};
use arrayvec::ArrayVec;

pub(crate) trait DcOutput {
    /// Resolves the mesh-vertex index that `cell` contributes around `edge`
    ///
    /// `None` means the cell has no participant for this edge; the tile
    /// degrades to a triangle over the remaining corners (or is dropped).
    /// Over a fully-subdivided tree every participant of a bipolar minimal
    /// edge is a unit leaf sampling the same grid, so `None` only arises
    /// for collapsed or mismatched inputs; it keeps [`TileWriter`] total
    /// rather than panicking on them.
    fn tile_vertex(
        &mut self,
        octree: &Octree,
        cell: NodeId,
        edge: Edge,
    ) -> Option<usize>;

    /// Emits one tile, corners in winding order around the grid edge
    fn quad(&mut self, info: &TileInfo, slots: [Option<usize>; 4]);
}

/// Runs the traversal over the whole tree
pub(crate) fn walk<B: DcOutput>(octree: &Octree, out: &mut B) {
    cell_proc(octree, octree.root(), out);
}

fn cell_proc<B: DcOutput>(octree: &Octree, cell: NodeId, out: &mut B) {
    if octree[cell].kind != NodeKind::Internal {
        return;
    }
    for i in Corner::iter() {
        if let Some(c) = octree.child(cell, i) {
            cell_proc(octree, c, out);
        }
    }

    // Inner faces between child pairs along each axis
    fn faces<T: Frame, B: DcOutput>(
        octree: &Octree,
        cell: NodeId,
        out: &mut B,
    ) {
        let (t, u, v) = T::frame();
        for c in [Corner::new(0), u.into(), v.into(), u | v] {
            if let (Some(lo), Some(hi)) =
                (octree.child(cell, c), octree.child(cell, c | t))
            {
                face_proc::<T, B>(octree, lo, hi, out);
            }
        }
    }
    faces::<XYZ, B>(octree, cell, out);
    faces::<YZX, B>(octree, cell, out);
    faces::<ZXY, B>(octree, cell, out);

    // Inner edges between child quadruples along each axis
    #[allow(unused_parens)]
    for i in [false, true] {
        let sub = [
            octree.child(cell, (X * i).into()),
            octree.child(cell, (X * i) | Y),
            octree.child(cell, (X * i) | Y | Z),
            octree.child(cell, (X * i) | Z),
        ];
        if let [Some(a), Some(b), Some(c), Some(d)] = sub {
            edge_proc::<XYZ, B>(octree, [a, b, c, d], out);
        }
        let sub = [
            octree.child(cell, (Y * i).into()),
            octree.child(cell, (Y * i) | Z),
            octree.child(cell, (Y * i) | X | Z),
            octree.child(cell, (Y * i) | X),
        ];
        if let [Some(a), Some(b), Some(c), Some(d)] = sub {
            edge_proc::<YZX, B>(octree, [a, b, c, d], out);
        }
        let sub = [
            octree.child(cell, (Z * i).into()),
            octree.child(cell, (Z * i) | X),
            octree.child(cell, (Z * i) | X | Y),
            octree.child(cell, (Z * i) | Y),
        ];
        if let [Some(a), Some(b), Some(c), Some(d)] = sub {
            edge_proc::<ZXY, B>(octree, [a, b, c, d], out);
        }
    }
}

/// Handles two cells which share a common face
///
/// `lo` is below `hi` on the `T` axis; the cells share a `UV` face where
/// `T-U-V` is a right-handed coordinate system.
fn face_proc<T: Frame, B: DcOutput>(
    octree: &Octree,
    lo: NodeId,
    hi: NodeId,
    out: &mut B,
) {
    if octree[lo].kind != NodeKind::Internal
        && octree[hi].kind != NodeKind::Internal
    {
        return;
    }
    let (t, u, v) = T::frame();
    for c in [Corner::new(0), u.into(), v.into(), u | v] {
        if let (Some(a), Some(b)) =
            (octree.child(lo, c | t), octree.child(hi, c))
        {
            face_proc::<T, B>(octree, a, b, out);
        }
    }
    #[allow(unused_parens)]
    for i in [false, true] {
        let sub = [
            octree.child(lo, (u * i) | t),
            octree.child(lo, (u * i) | v | t),
            octree.child(hi, (u * i) | v),
            octree.child(hi, (u * i).into()),
        ];
        if let [Some(a), Some(b), Some(c), Some(d)] = sub {
            edge_proc::<T::Next, B>(octree, [a, b, c, d], out);
        }
        let sub = [
            octree.child(lo, (v * i) | t),
            octree.child(hi, (v * i).into()),
            octree.child(hi, (v * i) | u),
            octree.child(lo, (v * i) | u | t),
        ];
        if let [Some(a), Some(b), Some(c), Some(d)] = sub {
            edge_proc::<<T::Next as Frame>::Next, B>(
                octree,
                [a, b, c, d],
                out,
            );
        }
    }
}

/// Handles four cells that share a common edge aligned on axis `T`
///
/// Cell positions are in the order `[0, U, U | V, V]`, i.e. a right-handed
/// winding about `+T` (where `T, U, V` is a right-handed coordinate frame):
///
/// - `edge_proc<X>` is `[0, Y, Y | Z, Z]`
/// - `edge_proc<Y>` is `[0, Z, Z | X, X]`
/// - `edge_proc<Z>` is `[0, X, X | Y, Y]`
fn edge_proc<T: Frame, B: DcOutput>(
    octree: &Octree,
    cells: [NodeId; 4],
    out: &mut B,
) {
    if cells
        .iter()
        .all(|&c| octree[c].kind != NodeKind::Internal)
    {
        process_edge::<T, B>(octree, cells, out);
    } else {
        let (t, u, v) = T::frame();
        #[allow(unused_parens)]
        for i in [false, true] {
            let sub = [
                octree.child(cells[0], (t * i) | u | v),
                octree.child(cells[1], (t * i) | v),
                octree.child(cells[2], (t * i).into()),
                octree.child(cells[3], (t * i) | u),
            ];
            if let [Some(a), Some(b), Some(c), Some(d)] = sub {
                edge_proc::<T, B>(octree, [a, b, c, d], out);
            }
        }
    }
}

/// Emits the tile around one minimal grid edge
fn process_edge<T: Frame, B: DcOutput>(
    octree: &Octree,
    cells: [NodeId; 4],
    out: &mut B,
) {
    let (t, _u, _v) = T::frame();

    // Sample the deepest cell's copy of the shared edge; every cell at that
    // depth sees the same sign pair.
    let deepest = (0..4)
        .max_by_key(|&i| octree.depth_of(cells[i]))
        .unwrap_or(0);

    // Each cell has its own copy of the shared edge
    #[allow(clippy::identity_op)]
    let edges = [
        Edge::new((t.index() * 4 + 3) as u8),
        Edge::new((t.index() * 4 + 2) as u8),
        Edge::new((t.index() * 4 + 0) as u8),
        Edge::new((t.index() * 4 + 1) as u8),
    ];

    let (start, end) = edges[deepest].corners();
    let mask = octree[cells[deepest]].corners;
    let start_inside = mask & (1 << start.index()) != 0;
    let end_inside = mask & (1 << end.index()) != 0;
    if start_inside == end_inside {
        return;
    }

    let mut slots = [None; 4];
    for i in 0..4 {
        slots[i] = out.tile_vertex(octree, cells[i], edges[i]);
    }

    // Flip the winding when the edge points out of the surface
    let slots = if start_inside {
        slots
    } else {
        [slots[0], slots[3], slots[2], slots[1]]
    };

    let info = TileInfo {
        axis: t,
        depth: octree.depth_of(cells[deepest]),
        cell: octree.world_cell(cells[deepest]),
    };
    out.quad(&info, slots);
}

/// Shared tile-to-triangle emission, used by both extractors
pub(crate) struct TileWriter<C> {
    pub builder: MeshBuilder,
    pub classify: C,
}

impl<C: Fn(&TileInfo, [Vertex; 3]) -> u32> TileWriter<C> {
    pub fn quad(&mut self, info: &TileInfo, slots: [Option<usize>; 4]) {
        let present: ArrayVec<usize, 4> =
            slots.iter().copied().flatten().collect();
        match present.len() {
            4 => {
                let (a, b, c, d) =
                    (present[0], present[1], present[2], present[3]);
                // Split on the diagonal whose endpoint normals agree most,
                // which avoids creasing curved tiles
                let d_ac = self
                    .builder
                    .vertex(a)
                    .normal
                    .dot(&self.builder.vertex(c).normal);
                let d_bd = self
                    .builder
                    .vertex(b)
                    .normal
                    .dot(&self.builder.vertex(d).normal);
                if d_ac >= d_bd {
                    self.triangle(info, [a, b, c]);
                    self.triangle(info, [a, c, d]);
                } else {
                    self.triangle(info, [b, c, d]);
                    self.triangle(info, [b, d, a]);
                }
            }
            // A tile missing one participant degrades to a triangle
            3 => self.triangle(info, [present[0], present[1], present[2]]),
            _ => (),
        }
    }

    /// Records one triangle, dropping degenerate (repeated-index) ones
    fn triangle(&mut self, info: &TileInfo, tri: [usize; 3]) {
        if tri[0] == tri[1] || tri[1] == tri[2] || tri[0] == tri[2] {
            return;
        }
        let vs = [
            *self.builder.vertex(tri[0]),
            *self.builder.vertex(tri[1]),
            *self.builder.vertex(tri[2]),
        ];
        let sub = (self.classify)(info, vs);
        self.builder.push(tri, sub);
    }
}

struct SimpleDc<C> {
    writer: TileWriter<C>,
}

impl<C: Fn(&TileInfo, [Vertex; 3]) -> u32> DcOutput for SimpleDc<C> {
    fn tile_vertex(
        &mut self,
        octree: &Octree,
        cell: NodeId,
        _edge: Edge,
    ) -> Option<usize> {
        // Terminal cells carry exactly one vertex
        let v = octree[cell].vertex.as_ref()?;
        Some(self.writer.builder.get(cell as usize, v.pos, v.normal))
    }

    fn quad(&mut self, info: &TileInfo, slots: [Option<usize>; 4]) {
        self.writer.quad(info, slots);
    }
}

/// Extracts a mesh from a collapsed octree, one vertex per terminal cell
///
/// `classify` assigns each triangle a sub-mesh id from per-tile grid
/// metadata; pass `|_, _| 0` when sub-meshes don't matter.
pub fn contour_simple<C: Fn(&TileInfo, [Vertex; 3]) -> u32>(
    octree: &Octree,
    classify: C,
) -> Mesh {
    let mut out = SimpleDc {
        writer: TileWriter {
            builder: MeshBuilder::default(),
            classify,
        },
    };
    walk(octree, &mut out);
    out.writer.builder.take()
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{Settings, field::Sphere};
    use nalgebra::Vector3;

    #[test]
    fn sphere_mesh_faces_outward() {
        let depth = 4;
        let s = Settings {
            depth,
            scale: Vector3::repeat(2.0 / (1 << depth) as f32),
            ..Settings::default()
        };
        let center = Vector3::new(1.0, 1.0, 1.0);
        let f = Sphere {
            center,
            radius: 0.7,
        };
        let o = Octree::build(&f, [0; 3], &s).unwrap().unwrap();
        let mesh = contour_simple(&o, |_, _| 0);
        assert!(!mesh.triangles.is_empty());
        for t in &mesh.triangles {
            let a = mesh.vertices[t.vertices[0]].pos;
            let b = mesh.vertices[t.vertices[1]].pos;
            let c = mesh.vertices[t.vertices[2]].pos;
            let n = (b - a).cross(&(c - a));
            let outward = (a + b + c) / 3.0 - center;
            assert!(
                n.dot(&outward) > 0.0,
                "inward-facing triangle {:?}",
                t.vertices
            );
        }
        for v in &mesh.vertices {
            // Vertex normals point away from the center too
            assert!(v.normal.dot(&(v.pos - center)) > 0.0);
        }
    }

    #[test]
    fn partial_tiles_degrade_to_triangles() {
        let mut w = TileWriter {
            builder: MeshBuilder::default(),
            classify: |_: &TileInfo, _: [Vertex; 3]| 0u32,
        };
        let n = Vector3::z();
        let a = w.builder.get(0, Vector3::new(0.0, 0.0, 0.0), n);
        let b = w.builder.get(1, Vector3::new(1.0, 0.0, 0.0), n);
        let c = w.builder.get(2, Vector3::new(1.0, 1.0, 0.0), n);
        let info = TileInfo {
            axis: X,
            depth: 0,
            cell: [0; 3],
        };
        // Three participants: one triangle
        w.quad(&info, [Some(a), None, Some(b), Some(c)]);
        // Two participants: dropped
        w.quad(&info, [Some(a), None, Some(b), None]);
        // A repeated participant sheds the degenerate half of the quad
        w.quad(&info, [Some(a), Some(a), Some(b), Some(c)]);
        let mesh = w.builder.take();
        assert_eq!(mesh.triangles.len(), 2);
    }

    #[test]
    fn classifier_tags_triangles() {
        let depth = 3;
        let s = Settings {
            depth,
            scale: Vector3::repeat(2.0 / (1 << depth) as f32),
            ..Settings::default()
        };
        let f = Sphere {
            center: Vector3::new(1.0, 1.0, 1.0),
            radius: 0.7,
        };
        let o = Octree::build(&f, [0; 3], &s).unwrap().unwrap();
        let mesh = contour_simple(&o, |info, _| info.axis.index() as u32);
        assert!(!mesh.triangles.is_empty());
        assert!(mesh.triangles.iter().all(|t| t.sub_mesh < 3));
        // All three edge axes contribute tiles on a sphere
        for axis in 0..3 {
            assert!(mesh.triangles.iter().any(|t| t.sub_mesh == axis));
        }
    }
}
