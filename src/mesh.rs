//! Output mesh container, vertex deduplication, and STL export
use crate::types::Axis;
use nalgebra::Vector3;
use std::io::{BufWriter, Write};

/// A single mesh vertex
#[derive(Copy, Clone, Debug)]
pub struct Vertex {
    /// Position, in world units
    pub pos: Vector3<f32>,
    /// Normalized surface normal
    pub normal: Vector3<f32>,
}

/// An indexed triangle, tagged with its sub-mesh
#[derive(Copy, Clone, Debug)]
pub struct Triangle {
    /// Indexes into [`Mesh::vertices`]
    pub vertices: [usize; 3],
    /// Sub-mesh id assigned by the caller's classifier
    pub sub_mesh: u32,
}

/// An indexed 3D mesh
#[derive(Clone, Debug, Default)]
pub struct Mesh {
    /// Deduplicated vertices
    pub vertices: Vec<Vertex>,
    /// Triangles, with counter-clockwise (outward-facing) winding
    pub triangles: Vec<Triangle>,
}

/// Grid-space metadata handed to the sub-mesh classifier per tile
#[derive(Copy, Clone, Debug)]
pub struct TileInfo {
    /// Axis of the grid edge the tile wraps around
    pub axis: Axis,
    /// Subdivision depth of the deepest cell sharing the edge
    pub depth: u8,
    /// Minimum corner of that cell, in world-grid cell coordinates
    pub cell: [i32; 3],
}

impl Mesh {
    /// Builds a new, empty mesh
    pub fn new() -> Self {
        Self::default()
    }

    /// Writes a binary STL to the given output
    pub fn write_stl<W: std::io::Write>(
        &self,
        out: &mut W,
    ) -> Result<(), crate::Error> {
        // Many small writes, typically to a file; buffer them.
        let mut out = BufWriter::new(out);
        const HEADER: &[u8] = b"binary STL exported by isodual";
        static_assertions::const_assert!(HEADER.len() <= 80);
        out.write_all(HEADER)?;
        out.write_all(&[0u8; 80 - HEADER.len()])?;
        out.write_all(&(self.triangles.len() as u32).to_le_bytes())?;
        for t in &self.triangles {
            // Not the _best_ way to calculate a normal, but good enough
            let a = self.vertices[t.vertices[0]].pos;
            let b = self.vertices[t.vertices[1]].pos;
            let c = self.vertices[t.vertices[2]].pos;
            let normal = (b - a).cross(&(c - a));
            for p in &normal {
                out.write_all(&p.to_le_bytes())?;
            }
            for v in t.vertices {
                for p in &self.vertices[v].pos {
                    out.write_all(&p.to_le_bytes())?;
                }
            }
            out.write_all(&[0u8; std::mem::size_of::<u16>()])?; // attributes
        }
        Ok(())
    }
}

/// Container used during construction of a [`Mesh`]
#[derive(Default)]
pub(crate) struct MeshBuilder {
    /// Map from source vertex keys to `out.vertices`
    ///
    /// `usize::MAX` is used as a marker for an unmapped vertex.
    map: Vec<usize>,
    out: Mesh,
}

impl MeshBuilder {
    /// Looks up the given source vertex, inserting it on first use
    ///
    /// `key` identifies the vertex in the producer's own arena (node or
    /// point id), so each source vertex lands in the output exactly once.
    pub fn get(
        &mut self,
        key: usize,
        pos: Vector3<f32>,
        normal: Vector3<f32>,
    ) -> usize {
        if key >= self.map.len() {
            self.map.resize(key + 1, usize::MAX);
        }
        match self.map[key] {
            usize::MAX => {
                let next_vert = self.out.vertices.len();
                self.out.vertices.push(Vertex { pos, normal });
                self.map[key] = next_vert;
                next_vert
            }
            u => u,
        }
    }

    pub fn vertex(&self, i: usize) -> &Vertex {
        &self.out.vertices[i]
    }

    pub fn push(&mut self, tri: [usize; 3], sub_mesh: u32) {
        self.out.triangles.push(Triangle {
            vertices: tri,
            sub_mesh,
        });
    }

    pub fn take(self) -> Mesh {
        self.out
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn builder_dedups_by_key() {
        let mut b = MeshBuilder::default();
        let p = Vector3::new(1.0, 2.0, 3.0);
        let n = Vector3::z();
        let a = b.get(17, p, n);
        let c = b.get(17, p, n);
        assert_eq!(a, c);
        let d = b.get(3, p * 2.0, n);
        assert_ne!(a, d);
        let m = b.take();
        assert_eq!(m.vertices.len(), 2);
    }

    #[test]
    fn stl_size() {
        let mut m = Mesh::new();
        let n = Vector3::z();
        for i in 0..3 {
            m.vertices.push(Vertex {
                pos: Vector3::new(i as f32, 0.0, 0.0),
                normal: n,
            });
        }
        m.triangles.push(Triangle {
            vertices: [0, 1, 2],
            sub_mesh: 0,
        });
        let mut buf = vec![];
        m.write_stl(&mut buf).unwrap();
        assert_eq!(buf.len(), 80 + 4 + 50);
    }
}
