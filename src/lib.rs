//! Isodual converts scalar **density fields** into closed triangle meshes
//! using adaptive dual contouring.
//!
//! A density field is any function `f(x, y, z)`; by convention, if
//! `f(x, y, z) < 0` then that position is **inside** the surface, and if
//! it's `> 0` then it's **outside**.  Signed distance fields work well, but
//! only the sign and local gradient are used, so any scalar field with a
//! well-defined zero crossing will do.  Fields implement the
//! [`DensityField`] trait, which is blanket-implemented for closures:
//!
//! ```
//! use nalgebra::Vector3;
//! use isodual::{Octree, Settings, contour_simple};
//!
//! let sphere = |p: Vector3<f32>| (p - Vector3::repeat(1.0)).norm() - 0.7;
//! let settings = Settings {
//!     scale: Vector3::repeat(2.0 / 16.0),
//!     ..Settings::default()
//! };
//! let octree = Octree::build(&sphere, [0; 3], &settings)?.unwrap();
//! let mesh = contour_simple(&octree, |_, _| 0);
//! assert!(!mesh.triangles.is_empty());
//! # Ok::<(), isodual::Error>(())
//! ```
//!
//! # Pipeline
//! Meshing one chunk of space runs in three stages:
//!
//! 1. [`Octree::build`] samples the field on a dense corner grid, finds the
//!    surface crossing and gradient on every bipolar cell edge, and merges
//!    sibling cells bottom-up while their combined [QEF](qef) error stays
//!    under budget.
//! 2. The recursive traversal in [`dc`] visits every minimal grid edge that
//!    crosses the surface and stitches the adjacent cells' vertices into
//!    quads (split along the better diagonal).
//! 3. For the manifold variant, [`manifold`] first clusters per-fragment
//!    vertices over a fully-subdivided tree ([`Octree::build_full`]), so
//!    cells crossed by separate surface sheets keep separate vertices.
//!
//! [`ChunkStore`](chunk::ChunkStore) runs this pipeline over a grid of
//! overlapping chunks with dirty tracking, for fields that change over time.
#![warn(missing_docs)]

mod error;
pub use error::Error;

pub mod chunk;
pub mod dc;
pub mod field;
pub mod manifold;
pub mod mesh;
pub mod octree;
pub mod qef;
pub mod tables;
pub mod types;

pub use chunk::{ChunkStore, ContourVariant};
pub use dc::contour_simple;
pub use field::DensityField;
pub use manifold::contour_manifold;
pub use mesh::{Mesh, TileInfo};
pub use octree::Octree;

use nalgebra::Vector3;

/// Settings when building an octree and meshing it
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Settings {
    /// Chunk subdivision depth; the leaf grid is `2^depth` cells per axis
    pub depth: u8,

    /// Error budget for merging cells (and promoting manifold vertices)
    ///
    /// The residual QEF error of a merged vertex must stay at or under this
    /// value, in squared world units.
    pub error_threshold: f32,

    /// Jacobi rotation sweeps per QEF solve
    pub qef_sweeps: u8,

    /// Chunk faces that must stay subdivided to unit cells, as a 6-bit mask
    /// in -X, +X, -Y, +Y, -Z, +Z order
    ///
    /// Flag the faces a chunk shares with neighbors so both sides mesh the
    /// seam at the same resolution.
    pub boundary_mask: u8,

    /// Step size of the linear crossing scan, as a fraction of a cell edge
    pub crossing_step: f32,

    /// Cell size per axis, in world units
    pub scale: Vector3<f32>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            depth: 4,
            error_threshold: 1e-2,
            qef_sweeps: 8,
            boundary_mask: 0,
            crossing_step: 1.0 / 8.0,
            scale: Vector3::repeat(1.0),
        }
    }
}

impl Settings {
    /// Checks every field against its legal range
    pub fn validate(&self) -> Result<(), Error> {
        if self.depth == 0 || self.depth > 8 {
            return Err(Error::InvalidSettings("depth must be in 1..=8"));
        }
        if !(self.crossing_step > 0.0 && self.crossing_step <= 1.0) {
            return Err(Error::InvalidSettings(
                "crossing_step must be in (0, 1]",
            ));
        }
        if self.qef_sweeps == 0 {
            return Err(Error::InvalidSettings("qef_sweeps must be nonzero"));
        }
        if !(self.error_threshold >= 0.0 && self.error_threshold.is_finite())
        {
            return Err(Error::InvalidSettings(
                "error_threshold must be finite and non-negative",
            ));
        }
        if !self.scale.iter().all(|s| *s > 0.0 && s.is_finite()) {
            return Err(Error::InvalidSettings(
                "scale must be positive and finite",
            ));
        }
        Ok(())
    }
}
