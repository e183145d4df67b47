//! Manifold vertex clustering over a fully-subdivided octree
//!
//! Instead of one vertex per cell, each leaf gets one vertex per surface
//! fragment (from the [`crate::tables`] topology table).  Fragments that
//! touch the same grid edge are clustered bottom-up into coarser points, and
//! extraction promotes each leaf fragment to the coarsest ancestor that is
//! still a manifold patch within the error budget.  This simplifies the mesh
//! like octree collapsing does, without ever merging separate surface sheets
//! through a cell.
use crate::{
    Error, Settings,
    dc::{self, DcOutput, TileWriter},
    mesh::{Mesh, MeshBuilder, TileInfo, Vertex},
    octree::{NodeId, NodeKind, Octree},
    qef::QuadraticErrorSolver,
    tables::CELL_TOPOLOGY,
    types::Edge,
};
use nalgebra::Vector3;
use std::collections::{BTreeMap, HashMap};

/// Index of a point in the cluster arena
pub type PointId = u32;

/// A global grid edge, identified by its axis and lower corner
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
struct EdgeKey {
    axis: u8,
    base: [i32; 3],
}

/// One clustered surface-fragment vertex
#[derive(Clone, Debug)]
pub struct ManifoldPoint {
    /// Merged QEF of every crossing in the fragment
    pub qef: QuadraticErrorSolver,
    /// Summed (normalized) crossing normals
    pub normal: Vector3<f32>,
    /// Solved vertex position, in world units
    pub vertex: Vector3<f32>,
    /// Residual QEF error at `vertex`
    pub error: f32,
    /// Euler characteristic of the fragment's patch; 1 for a disc, 2 for a
    /// closed surface
    pub euler: i32,
    /// Whether each face of the owning cell is crossed by 0 or 2 edges
    pub face_proper: bool,
    /// Fragment label assigned when the parent level merged this point;
    /// -1 until then
    pub surface: i32,
    /// The coarser point this fragment merged into, if any
    pub parent: Option<PointId>,
    /// Distinct grid edges crossed by the fragment
    crossings: Vec<EdgeKey>,
}

/// The clustered point arena for one octree
pub struct ManifoldClusters {
    points: Vec<ManifoldPoint>,
    /// Per-leaf point ids, indexed by topology-table group
    leaf_groups: HashMap<NodeId, Vec<PointId>>,
    /// Points remaining at the root after clustering
    top: Vec<PointId>,
}

impl ManifoldClusters {
    /// Clusters the given octree bottom-up
    ///
    /// The octree should come from [`Octree::build_full`]; collapsed
    /// (`Pseudo`) nodes carry no Hermite data to cluster.
    pub fn build(
        octree: &Octree,
        settings: &Settings,
    ) -> Result<Self, Error> {
        let mut out = Self {
            points: vec![],
            leaf_groups: HashMap::new(),
            top: vec![],
        };
        out.top = out.cluster(octree, octree.root(), settings)?;
        Ok(out)
    }

    /// Looks up a point by id
    pub fn point(&self, id: PointId) -> &ManifoldPoint {
        &self.points[id as usize]
    }

    /// Total number of points in the arena
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// Whether the arena is empty
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Points that survived to the root (one per connected surface)
    pub fn top_points(&self) -> &[PointId] {
        &self.top
    }

    /// Point ids for one leaf, indexed by topology-table group
    pub fn leaf_points(&self, leaf: NodeId) -> Option<&[PointId]> {
        self.leaf_groups.get(&leaf).map(Vec::as_slice)
    }

    fn cluster(
        &mut self,
        octree: &Octree,
        node: NodeId,
        settings: &Settings,
    ) -> Result<Vec<PointId>, Error> {
        match octree[node].kind {
            NodeKind::Leaf => self.cluster_leaf(octree, node, settings),
            NodeKind::Internal => self.cluster_cell(octree, node, settings),
            NodeKind::Pseudo => {
                debug_assert!(false, "clustering a collapsed octree");
                Ok(vec![])
            }
        }
    }

    /// Creates one point per surface fragment of a leaf cell
    fn cluster_leaf(
        &mut self,
        octree: &Octree,
        node: NodeId,
        settings: &Settings,
    ) -> Result<Vec<PointId>, Error> {
        let n = &octree[node];
        let topo = &CELL_TOPOLOGY[n.corners as usize];
        let mut ids = Vec::with_capacity(topo.groups.len());
        for group in &topo.groups {
            let mut qef = QuadraticErrorSolver::new();
            let mut normal = Vector3::zeros();
            let mut crossings = Vec::with_capacity(group.len());
            for c in &n.crossings {
                if group.iter().any(|d| d.undirected() == c.edge) {
                    qef.add_plane(c.pos, c.normal);
                    normal += c.normal.normalize();
                    crossings.push(edge_key(octree, node, c.edge));
                }
            }
            debug_assert_eq!(crossings.len(), group.len());
            let (vertex, error) =
                solve_clamped(&qef, octree.bounds(node), settings)?;
            let face_proper = face_proper(octree, node, &crossings);
            let pid = self.points.len() as PointId;
            self.points.push(ManifoldPoint {
                qef,
                normal,
                vertex,
                error,
                euler: 1,
                face_proper,
                surface: -1,
                parent: None,
                crossings,
            });
            ids.push(pid);
        }
        self.leaf_groups.insert(node, ids.clone());
        Ok(ids)
    }

    /// Merges the child points of an internal node into coarser fragments
    fn cluster_cell(
        &mut self,
        octree: &Octree,
        node: NodeId,
        settings: &Settings,
    ) -> Result<Vec<PointId>, Error> {
        let mut child_pts: Vec<PointId> = vec![];
        for &child in octree[node].children.iter().flatten() {
            child_pts.extend(self.cluster(octree, child, settings)?);
        }
        if child_pts.is_empty() {
            return Ok(vec![]);
        }

        // Union child points that cross the same grid edge
        let mut sets = UnionFind::new(child_pts.len());
        let mut owner: HashMap<EdgeKey, usize> = HashMap::new();
        for (i, &pid) in child_pts.iter().enumerate() {
            for k in &self.points[pid as usize].crossings {
                match owner.entry(*k) {
                    std::collections::hash_map::Entry::Occupied(o) => {
                        sets.union(*o.get(), i);
                    }
                    std::collections::hash_map::Entry::Vacant(v) => {
                        v.insert(i);
                    }
                }
            }
        }

        // Gather components in first-appearance order
        let mut comp_of_root: HashMap<usize, usize> = HashMap::new();
        let mut comps: Vec<Vec<usize>> = vec![];
        for i in 0..child_pts.len() {
            let root = sets.find(i);
            let c = *comp_of_root.entry(root).or_insert_with(|| {
                comps.push(vec![]);
                comps.len() - 1
            });
            comps[c].push(i);
        }

        let mut out = Vec::with_capacity(comps.len());
        for (label, comp) in comps.into_iter().enumerate() {
            let mut qef = QuadraticErrorSolver::new();
            let mut normal = Vector3::zeros();
            let mut euler = 0i32;
            let mut counts: BTreeMap<EdgeKey, u32> = BTreeMap::new();
            for &i in &comp {
                let p = &mut self.points[child_pts[i] as usize];
                p.surface = label as i32;
                qef += p.qef;
                normal += p.normal;
                euler += p.euler;
                for k in &p.crossings {
                    *counts.entry(*k).or_insert(0) += 1;
                }
            }
            // Merging glues the child patches along the contour segments of
            // the faces on the node's three split planes.  Each shared
            // crossing is a glue point counted once per fragment, and each
            // seam segment (one contractible arc per face contour) joins two
            // fragments: the Euler characteristic loses the duplicate glue
            // points and gains one per segment.  Segments are counted by
            // their two ends, which always land on shared crossings.
            let min = octree.world_cell(node);
            let size = octree[node].size as i32;
            let mut seam_ends = 0i32;
            for (k, &c) in &counts {
                if c > 1 {
                    euler -= (c - 1) as i32;
                    seam_ends += seam_faces(k, min, size);
                }
            }
            debug_assert_eq!(seam_ends % 2, 0);
            euler += seam_ends / 2;
            let crossings: Vec<EdgeKey> = counts.into_keys().collect();

            let (vertex, error) =
                solve_clamped(&qef, octree.bounds(node), settings)?;
            let face_proper = face_proper(octree, node, &crossings);
            let pid = self.points.len() as PointId;
            self.points.push(ManifoldPoint {
                qef,
                normal,
                vertex,
                error,
                euler,
                face_proper,
                surface: -1,
                parent: None,
                crossings,
            });
            for &i in &comp {
                self.points[child_pts[i] as usize].parent = Some(pid);
            }
            out.push(pid);
        }
        Ok(out)
    }
}

/// Global key for one of a leaf cell's edges
fn edge_key(octree: &Octree, node: NodeId, edge: Edge) -> EdgeKey {
    let cell = octree.world_cell(node);
    let off = edge.corners().0.offset();
    EdgeKey {
        axis: edge.axis().index() as u8,
        base: [cell[0] + off[0], cell[1] + off[1], cell[2] + off[2]],
    }
}

/// Number of faces on the node's internal split planes that contain the
/// given leaf edge
///
/// Every such face carries a contour segment ending at the edge's crossing,
/// so summing this over a merge's shared crossings counts both ends of every
/// seam segment between sibling regions.
fn seam_faces(key: &EdgeKey, min: [i32; 3], size: i32) -> i32 {
    let t = key.axis as usize;
    let u = (t + 1) % 3;
    let v = (t + 2) % 3;
    let half = size / 2;
    match (key.base[u] == min[u] + half, key.base[v] == min[v] + half) {
        // On two split planes at once: the node's center line, with four
        // split-plane faces around the edge
        (true, true) => 4,
        // On one split plane: the two in-plane faces beside the edge,
        // clipped to the node
        (true, false) => in_node_faces(key.base[v], min[v], size),
        (false, true) => in_node_faces(key.base[u], min[u], size),
        // A crossing shared between siblings always sits on a split plane
        (false, false) => unreachable!("shared crossing off the split planes"),
    }
}

fn in_node_faces(b: i32, lo: i32, size: i32) -> i32 {
    (b > lo) as i32 + (b < lo + size) as i32
}

/// Checks that every face of the node has 0 or 2 crossings on its boundary
///
/// The boundary crossing count is twice the number of contour segments on
/// the face; a fragment whose vertex replaced finer ones across a face with
/// two segments would pinch the surface, so such points are never promoted
/// to.  Crossings interior to the face don't split the contour and are
/// ignored.
fn face_proper(octree: &Octree, node: NodeId, crossings: &[EdgeKey]) -> bool {
    let min = octree.world_cell(node);
    let s = octree[node].size as i32;
    for axis in 0..3usize {
        for side in [0, s] {
            let plane = min[axis] + side;
            let cuts = crossings
                .iter()
                .filter(|k| {
                    let t = k.axis as usize;
                    if t == axis || k.base[axis] != plane {
                        return false;
                    }
                    // The remaining in-plane axis decides whether the edge
                    // lies on the face's boundary
                    let w = 3 - axis - t;
                    k.base[w] == min[w] || k.base[w] == min[w] + s
                })
                .count();
            if cuts != 0 && cuts != 2 {
                return false;
            }
        }
    }
    true
}

/// Solves a fragment QEF, falling back to the mass point when the minimizer
/// escapes the owning cell
fn solve_clamped(
    qef: &QuadraticErrorSolver,
    bounds: (Vector3<f32>, Vector3<f32>),
    settings: &Settings,
) -> Result<(Vector3<f32>, f32), Error> {
    let (pos, error) = qef.solve(settings.qef_sweeps)?;
    let (lo, hi) = bounds;
    let eps = (hi - lo) * 1e-3;
    let inside =
        (0..3).all(|i| pos[i] >= lo[i] - eps[i] && pos[i] <= hi[i] + eps[i]);
    if inside {
        Ok((pos, error))
    } else {
        let m = qef.mass_point();
        Ok((m, qef.error(m)))
    }
}

struct UnionFind(Vec<usize>);

impl UnionFind {
    fn new(n: usize) -> Self {
        Self((0..n).collect())
    }
    fn find(&mut self, mut i: usize) -> usize {
        while self.0[i] != i {
            self.0[i] = self.0[self.0[i]];
            i = self.0[i];
        }
        i
    }
    fn union(&mut self, a: usize, b: usize) {
        let ra = self.find(a);
        let rb = self.find(b);
        self.0[ra.max(rb)] = ra.min(rb);
    }
}

struct ManifoldDc<'a, C> {
    clusters: &'a ManifoldClusters,
    threshold: f32,
    writer: TileWriter<C>,
}

impl<C: Fn(&TileInfo, [Vertex; 3]) -> u32> DcOutput for ManifoldDc<'_, C> {
    fn tile_vertex(
        &mut self,
        octree: &Octree,
        cell: NodeId,
        edge: Edge,
    ) -> Option<usize> {
        let node = &octree[cell];
        let g = CELL_TOPOLOGY[node.corners as usize].edge_to_group
            [edge.index()];
        if g < 0 {
            return None;
        }
        let mut pid = *self
            .clusters
            .leaf_groups
            .get(&cell)?
            .get(g as usize)?;

        // Promote to the coarsest ancestor that is still a disc with proper
        // faces and within the error budget.  Promotion only depends on the
        // chain itself, so neighboring tiles resolve identically.
        while let Some(up) = self.clusters.points[pid as usize].parent {
            let a = &self.clusters.points[up as usize];
            if a.euler == 1 && a.face_proper && a.error <= self.threshold {
                pid = up;
            } else {
                break;
            }
        }

        let p = &self.clusters.points[pid as usize];
        let n = p.normal.try_normalize(1e-12).unwrap_or_else(Vector3::z);
        Some(self.writer.builder.get(pid as usize, p.vertex, n))
    }

    fn quad(&mut self, info: &TileInfo, slots: [Option<usize>; 4]) {
        self.writer.quad(info, slots);
    }
}

/// Extracts a manifold mesh from a fully-subdivided octree
///
/// Clusters surface fragments bottom-up, then walks the same traversal as
/// [`crate::dc::contour_simple`] with per-fragment vertices and promotion.
pub fn contour_manifold<C: Fn(&TileInfo, [Vertex; 3]) -> u32>(
    octree: &Octree,
    settings: &Settings,
    classify: C,
) -> Result<Mesh, Error> {
    let clusters = ManifoldClusters::build(octree, settings)?;
    let mut out = ManifoldDc {
        clusters: &clusters,
        threshold: settings.error_threshold,
        writer: TileWriter {
            builder: MeshBuilder::default(),
            classify,
        },
    };
    dc::walk(octree, &mut out);
    Ok(out.writer.builder.take())
}
