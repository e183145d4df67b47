//! Bottom-up construction of an adaptive octree over a sampled density field
use crate::{
    Error, Settings,
    field::{self, DensityField},
    qef::QuadraticErrorSolver,
    types::{Corner, Edge},
};
use arrayvec::ArrayVec;
use nalgebra::Vector3;
use std::collections::BTreeMap;

/// Index of a node in the octree arena
pub type NodeId = u32;

/// Role of a node in the finished tree
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum NodeKind {
    /// A unit cell crossed by the surface, with Hermite data on its edges
    Leaf,
    /// A collapsed subtree whose merged QEF stayed under the error budget
    Pseudo,
    /// A subdivided node; its vertex is unset
    Internal,
}

/// One surface crossing on a leaf cell edge
#[derive(Copy, Clone, Debug)]
pub struct EdgeCrossing {
    /// Which of the cell's 12 edges this crossing sits on
    pub edge: Edge,
    /// Crossing position, in world units
    pub pos: Vector3<f32>,
    /// Field gradient at the crossing (not normalized)
    pub normal: Vector3<f32>,
}

/// A solved dual vertex
#[derive(Copy, Clone, Debug)]
pub struct OctreeVertex {
    /// Vertex position, in world units
    pub pos: Vector3<f32>,
    /// Normalized sum of the contributing crossing normals
    pub normal: Vector3<f32>,
    /// Residual QEF error at `pos`
    pub error: f32,
}

/// Octree node; see [`NodeKind`] for the role invariants
#[derive(Clone, Debug)]
pub struct Node {
    /// Node role
    pub kind: NodeKind,
    /// Minimum corner, in chunk-local cell coordinates
    pub min: [i32; 3],
    /// Edge length in leaf cells (a power of two)
    pub size: u32,
    /// Corner sign mask; bit `i` is set when corner `i` samples inside
    pub corners: u8,
    /// Merged QEF of every leaf constraint in this subtree
    pub qef: QuadraticErrorSolver,
    /// Summed (normalized) crossing normals in this subtree
    pub normal: Vector3<f32>,
    /// Solved vertex; `Some` exactly for `Leaf` and `Pseudo` nodes
    pub vertex: Option<OctreeVertex>,
    /// Child node ids, indexed by corner; cleared when a node collapses
    pub children: [Option<NodeId>; 8],
    /// Edge crossings; populated for `Leaf` nodes only
    pub crossings: ArrayVec<EdgeCrossing, 12>,
}

/// An adaptive octree over one chunk of a density field
///
/// Nodes live in a flat arena and refer to each other by [`NodeId`]; the
/// whole tree is rebuilt wholesale when its chunk changes, so there is no
/// free list.
pub struct Octree {
    nodes: Vec<Node>,
    root: NodeId,
    cells: u32,
    origin: [i32; 3],
    scale: Vector3<f32>,
}

impl std::ops::Index<NodeId> for Octree {
    type Output = Node;
    fn index(&self, id: NodeId) -> &Node {
        &self.nodes[id as usize]
    }
}

impl Octree {
    /// Builds a collapsing octree for one chunk
    ///
    /// `origin` is the world-grid coordinate of the chunk's minimum corner,
    /// in leaf-cell units.  Sibling groups whose merged QEF solves under
    /// `settings.error_threshold` collapse into `Pseudo` nodes (unless they
    /// touch a face flagged in `settings.boundary_mask`).
    ///
    /// Returns `None` when no cell in the chunk crosses the surface.
    pub fn build<F: DensityField>(
        field: &F,
        origin: [i32; 3],
        settings: &Settings,
    ) -> Result<Option<Self>, Error> {
        Builder::new(field, origin, settings)?.run(true)
    }

    /// Builds a fully-subdivided octree for one chunk
    ///
    /// No collapsing is performed; every non-leaf node is `Internal`.  This
    /// is the input shape the manifold clusterer wants, since it does its
    /// own error-bounded simplification by vertex promotion.
    pub fn build_full<F: DensityField>(
        field: &F,
        origin: [i32; 3],
        settings: &Settings,
    ) -> Result<Option<Self>, Error> {
        Builder::new(field, origin, settings)?.run(false)
    }

    /// Root node id
    pub fn root(&self) -> NodeId {
        self.root
    }

    /// Chunk edge length, in leaf cells
    pub fn cells(&self) -> u32 {
        self.cells
    }

    /// Subdivision depth of the given node (0 at the root)
    pub fn depth_of(&self, id: NodeId) -> u8 {
        (self.cells.trailing_zeros() - self[id].size.trailing_zeros()) as u8
    }

    /// The node's minimum corner in world-grid cell coordinates
    pub fn world_cell(&self, id: NodeId) -> [i32; 3] {
        let min = self[id].min;
        [
            self.origin[0] + min[0],
            self.origin[1] + min[1],
            self.origin[2] + min[2],
        ]
    }

    /// World-space position of one of the node's corners
    pub fn corner_position(&self, id: NodeId, c: Corner) -> Vector3<f32> {
        let node = &self[id];
        let off = c.offset();
        let s = node.size as i32;
        Vector3::new(
            (self.origin[0] + node.min[0] + off[0] * s) as f32 * self.scale.x,
            (self.origin[1] + node.min[1] + off[1] * s) as f32 * self.scale.y,
            (self.origin[2] + node.min[2] + off[2] * s) as f32 * self.scale.z,
        )
    }

    /// World-space bounding box of the given node
    pub fn bounds(&self, id: NodeId) -> (Vector3<f32>, Vector3<f32>) {
        (
            self.corner_position(id, Corner::new(0)),
            self.corner_position(id, Corner::new(7)),
        )
    }

    /// Steps into the given corner of a cell
    ///
    /// Terminal cells return themselves; subdivided cells return the child,
    /// which is `None` where the subtree is homogeneous.
    pub(crate) fn child(&self, id: NodeId, c: Corner) -> Option<NodeId> {
        let node = &self[id];
        if node.kind == NodeKind::Internal {
            node.children[c.index()]
        } else {
            Some(id)
        }
    }

    /// Number of nodes reachable from the root
    pub fn node_count(&self) -> usize {
        self.count_below(self.root)
    }

    fn count_below(&self, id: NodeId) -> usize {
        1 + if self[id].kind == NodeKind::Internal {
            self[id]
                .children
                .iter()
                .flatten()
                .map(|&c| self.count_below(c))
                .sum()
        } else {
            0
        }
    }

    /// Iterates over every node reachable from the root
    pub fn reachable(&self) -> Vec<NodeId> {
        let mut out = vec![];
        let mut stack = vec![self.root];
        while let Some(id) = stack.pop() {
            out.push(id);
            if self[id].kind == NodeKind::Internal {
                stack.extend(self[id].children.iter().flatten());
            }
        }
        out
    }
}

struct Builder<'a, F> {
    field: &'a F,
    settings: &'a Settings,
    origin: [i32; 3],
    n: u32,
    samples: Vec<f32>,
    nodes: Vec<Node>,
}

impl<'a, F: DensityField> Builder<'a, F> {
    fn new(
        field: &'a F,
        origin: [i32; 3],
        settings: &'a Settings,
    ) -> Result<Self, Error> {
        settings.validate()?;
        let n = 1u32 << settings.depth;
        let side = (n + 1) as usize;
        let scale = settings.scale;
        let mut samples = Vec::with_capacity(side * side * side);
        for z in 0..side {
            for y in 0..side {
                for x in 0..side {
                    let p = Vector3::new(
                        (origin[0] + x as i32) as f32 * scale.x,
                        (origin[1] + y as i32) as f32 * scale.y,
                        (origin[2] + z as i32) as f32 * scale.z,
                    );
                    samples.push(field.density(p));
                }
            }
        }
        Ok(Self {
            field,
            settings,
            origin,
            n,
            samples,
            nodes: vec![],
        })
    }

    fn sample(&self, g: [i32; 3]) -> f32 {
        let side = (self.n + 1) as usize;
        debug_assert!(g.iter().all(|&v| v >= 0 && v <= self.n as i32));
        self.samples
            [(g[2] as usize * side + g[1] as usize) * side + g[0] as usize]
    }

    fn world(&self, g: [i32; 3]) -> Vector3<f32> {
        let scale = self.settings.scale;
        Vector3::new(
            (self.origin[0] + g[0]) as f32 * scale.x,
            (self.origin[1] + g[1]) as f32 * scale.y,
            (self.origin[2] + g[2]) as f32 * scale.z,
        )
    }

    fn corner_mask(&self, min: [i32; 3], size: u32) -> u8 {
        let mut mask = 0;
        for c in Corner::iter() {
            let off = c.offset();
            let g = [
                min[0] + off[0] * size as i32,
                min[1] + off[1] * size as i32,
                min[2] + off[2] * size as i32,
            ];
            if self.sample(g) < 0.0 {
                mask |= 1 << c.index();
            }
        }
        mask
    }

    /// Solves the vertex for a cell, substituting the mass point when the
    /// minimizer escapes the cell's bounds
    fn solve_vertex(
        &self,
        qef: &QuadraticErrorSolver,
        min: [i32; 3],
        size: u32,
        normal_sum: Vector3<f32>,
    ) -> Result<OctreeVertex, Error> {
        let (pos, error) = qef.solve(self.settings.qef_sweeps)?;
        let lo = self.world(min);
        let s = size as i32;
        let hi = self.world([min[0] + s, min[1] + s, min[2] + s]);
        let eps = (hi - lo) * 1e-3;
        let inside = (0..3).all(|i| {
            pos[i] >= lo[i] - eps[i] && pos[i] <= hi[i] + eps[i]
        });
        let (pos, error) = if inside {
            (pos, error)
        } else {
            let m = qef.mass_point();
            (m, qef.error(m))
        };
        let normal = normal_sum
            .try_normalize(1e-12)
            .unwrap_or_else(Vector3::z);
        Ok(OctreeVertex { pos, normal, error })
    }

    /// Builds a leaf for the given unit cell, or `None` if it's homogeneous
    fn build_leaf(&mut self, min: [i32; 3]) -> Result<Option<NodeId>, Error> {
        let mask = self.corner_mask(min, 1);
        if mask == 0 || mask == 255 {
            return Ok(None);
        }
        let step = self.settings.crossing_step;
        let mut qef = QuadraticErrorSolver::new();
        let mut normal = Vector3::zeros();
        let mut crossings = ArrayVec::new();
        for e in Edge::iter() {
            let (ca, cb) = e.corners();
            let oa = ca.offset();
            let ob = cb.offset();
            let ga = [min[0] + oa[0], min[1] + oa[1], min[2] + oa[2]];
            let gb = [min[0] + ob[0], min[1] + ob[1], min[2] + ob[2]];
            let inside_a = mask & (1 << ca.index()) != 0;
            let inside_b = mask & (1 << cb.index()) != 0;
            if inside_a == inside_b {
                continue;
            }
            let a = self.world(ga);
            let b = self.world(gb);
            let pos = field::scan_crossing(self.field, a, b, inside_a, step);
            let h = self.settings.scale * step;
            let mut grad = field::central_normal(self.field, pos, h);
            if grad.norm() < 1e-12 {
                // Flat gradient at the crossing; point from inside out
                grad = if inside_a { b - a } else { a - b };
            }
            qef.add_plane(pos, grad);
            normal += grad.normalize();
            crossings.push(EdgeCrossing {
                edge: e,
                pos,
                normal: grad,
            });
        }
        debug_assert!(!crossings.is_empty());
        let vertex = self.solve_vertex(&qef, min, 1, normal)?;
        let id = self.nodes.len() as NodeId;
        self.nodes.push(Node {
            kind: NodeKind::Leaf,
            min,
            size: 1,
            corners: mask,
            qef,
            normal,
            vertex: Some(vertex),
            children: [None; 8],
            crossings,
        });
        Ok(Some(id))
    }

    /// Whether a node's footprint touches a face flagged in `boundary_mask`
    ///
    /// Flagged faces must stay subdivided so the neighboring chunk sees
    /// unit-cell resolution along the shared seam.
    fn boundary_blocked(&self, min: [i32; 3], size: u32) -> bool {
        let m = self.settings.boundary_mask;
        let n = self.n as i32;
        let s = size as i32;
        (m & 0x01 != 0 && min[0] == 0)
            || (m & 0x02 != 0 && min[0] + s == n)
            || (m & 0x04 != 0 && min[1] == 0)
            || (m & 0x08 != 0 && min[1] + s == n)
            || (m & 0x10 != 0 && min[2] == 0)
            || (m & 0x20 != 0 && min[2] + s == n)
    }

    fn build_parent(
        &mut self,
        min: [i32; 3],
        size: u32,
        children: [Option<NodeId>; 8],
        collapse: bool,
    ) -> Result<NodeId, Error> {
        let mask = self.corner_mask(min, size);
        let mut qef = QuadraticErrorSolver::new();
        let mut normal = Vector3::zeros();
        let mut any_internal = false;
        for &child in children.iter().flatten() {
            let c = &self.nodes[child as usize];
            qef += c.qef;
            normal += c.normal;
            any_internal |= c.kind == NodeKind::Internal;
        }

        let mut kind = NodeKind::Internal;
        let mut vertex = None;
        let mut children = children;
        if collapse && !any_internal && !self.boundary_blocked(min, size) {
            let v = self.solve_vertex(&qef, min, size, normal)?;
            if v.error <= self.settings.error_threshold {
                kind = NodeKind::Pseudo;
                vertex = Some(v);
                children = [None; 8];
            }
        }

        let id = self.nodes.len() as NodeId;
        self.nodes.push(Node {
            kind,
            min,
            size,
            corners: mask,
            qef,
            normal,
            vertex,
            children,
            crossings: ArrayVec::new(),
        });
        Ok(id)
    }

    fn run(mut self, collapse: bool) -> Result<Option<Octree>, Error> {
        let n = self.n as i32;
        let mut level: BTreeMap<[i32; 3], NodeId> = BTreeMap::new();
        for z in 0..n {
            for y in 0..n {
                for x in 0..n {
                    if let Some(id) = self.build_leaf([x, y, z])? {
                        level.insert([x, y, z], id);
                    }
                }
            }
        }
        if level.is_empty() {
            log::trace!("chunk at {:?} is homogeneous", self.origin);
            return Ok(None);
        }

        let mut size = 1i32;
        while size < n {
            let parent = size * 2;
            let mut groups: BTreeMap<[i32; 3], [Option<NodeId>; 8]> =
                BTreeMap::new();
            for (&min, &id) in &level {
                let pmin = [
                    min[0] / parent * parent,
                    min[1] / parent * parent,
                    min[2] / parent * parent,
                ];
                let oct = ((min[0] / size) & 1)
                    | (((min[1] / size) & 1) << 1)
                    | (((min[2] / size) & 1) << 2);
                groups.entry(pmin).or_insert([None; 8])[oct as usize] =
                    Some(id);
            }
            let mut next = BTreeMap::new();
            for (pmin, children) in groups {
                let id = self.build_parent(
                    pmin,
                    parent as u32,
                    children,
                    collapse,
                )?;
                next.insert(pmin, id);
            }
            level = next;
            size = parent;
        }

        debug_assert_eq!(level.len(), 1);
        let root = level.into_values().next().unwrap_or_default();
        Ok(Some(Octree {
            nodes: self.nodes,
            root,
            cells: self.n,
            origin: self.origin,
            scale: self.settings.scale,
        }))
    }
}
