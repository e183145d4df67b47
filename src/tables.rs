//! Per-corner-configuration topology tables for manifold contouring
//!
//! For each of the 256 corner sign masks, the table partitions the cell's
//! sign-crossing edges into connected surface fragments: two crossing edges
//! belong to the same fragment when the face contour on one of the cell's
//! six faces connects them.  Ambiguous faces (two diagonally-opposite inside
//! corners) are resolved by keeping the inside regions separate, which is
//! what makes the per-fragment vertices manifold.
//!
//! The tables are built once, on first use.
use crate::types::{Axis, Corner, DirectedEdge, Edge, X, Y, Z};
use std::sync::LazyLock;

/// Edge partition for one corner configuration
pub struct CellTopology {
    /// Sign-crossing edges, grouped by surface fragment and directed from
    /// the inside corner to the outside corner
    ///
    /// Groups are ordered by their smallest edge index, so group numbering
    /// is deterministic.  A cell has between 0 and 4 groups.
    pub groups: Vec<Vec<DirectedEdge>>,

    /// Maps each of the 12 edges to its group, or -1 for edges with no sign
    /// change
    pub edge_to_group: [i8; 12],
}

/// Topology table indexed by corner mask
///
/// Indexing with anything other than a `u8` mask is a caller bug and panics.
pub static CELL_TOPOLOGY: LazyLock<Box<[CellTopology; 256]>> =
    LazyLock::new(|| {
        let v: Vec<CellTopology> =
            (0..256).map(|m| build_topology(m as u8)).collect();
        let boxed: Box<[CellTopology]> = v.into_boxed_slice();
        boxed.try_into().unwrap_or_else(|_| unreachable!())
    });

fn inside(mask: u8, c: Corner) -> bool {
    mask & (1 << c.index()) != 0
}

fn crossing(mask: u8, e: Edge) -> bool {
    let (a, b) = e.corners();
    inside(mask, a) != inside(mask, b)
}

/// Minimal union-find over the 12 cell edges
struct EdgeSets([u8; 12]);

impl EdgeSets {
    fn new() -> Self {
        Self(core::array::from_fn(|i| i as u8))
    }
    fn find(&mut self, i: u8) -> u8 {
        let mut i = i;
        while self.0[i as usize] != i {
            let up = self.0[self.0[i as usize] as usize];
            self.0[i as usize] = up;
            i = up;
        }
        i
    }
    fn union(&mut self, a: Edge, b: Edge) {
        let ra = self.find(a.index() as u8);
        let rb = self.find(b.index() as u8);
        self.0[rb.max(ra) as usize] = ra.min(rb);
    }
}

fn build_topology(mask: u8) -> CellTopology {
    let mut sets = EdgeSets::new();

    // Connect crossing edges across each face
    for axis in [X, Y, Z] {
        for side in [false, true] {
            connect_face(mask, axis, side, &mut sets);
        }
    }

    // Collect components in edge-index order
    let mut groups: Vec<Vec<DirectedEdge>> = vec![];
    let mut group_of_root = [None; 12];
    let mut edge_to_group = [-1i8; 12];
    for e in Edge::iter() {
        if !crossing(mask, e) {
            continue;
        }
        let root = sets.find(e.index() as u8) as usize;
        let g = *group_of_root[root].get_or_insert_with(|| {
            groups.push(vec![]);
            groups.len() - 1
        });
        let (a, b) = e.corners();
        groups[g].push(if inside(mask, a) {
            DirectedEdge::new(a, b)
        } else {
            DirectedEdge::new(b, a)
        });
        edge_to_group[e.index()] = g as i8;
    }
    CellTopology {
        groups,
        edge_to_group,
    }
}

/// Links the crossing edges of one cell face according to its contour
fn connect_face(mask: u8, axis: Axis, side: bool, sets: &mut EdgeSets) {
    let on_face = |c: Corner| c.get(axis) == side;
    let cuts: Vec<Edge> = Edge::iter()
        .filter(|e| {
            let (a, b) = e.corners();
            e.axis() != axis
                && on_face(a)
                && on_face(b)
                && crossing(mask, *e)
        })
        .collect();
    match cuts.len() {
        0 => (),
        // One contour segment joins the two crossings
        2 => sets.union(cuts[0], cuts[1]),
        // Ambiguous face: two diagonally-opposite inside corners.  Pair the
        // crossings around each inside corner, keeping the inside regions
        // separate.
        4 => {
            for c in Corner::iter().filter(|c| on_face(*c) && inside(mask, *c))
            {
                let incident: Vec<Edge> = cuts
                    .iter()
                    .copied()
                    .filter(|e| {
                        let (a, b) = e.corners();
                        a == c || b == c
                    })
                    .collect();
                debug_assert_eq!(incident.len(), 2);
                sets.union(incident[0], incident[1]);
            }
        }
        n => unreachable!("face with {n} crossing edges"),
    }
}
