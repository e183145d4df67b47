//! Chunked meshing, with shared-halo seams and dirty tracking
//!
//! The world grid is split into chunks of `2^depth` cells per axis, placed
//! `2^depth - 1` cells apart: adjacent chunks overlap by exactly one cell
//! layer (the halo) and sample identical corner values there, so their
//! meshes meet at the seam without any cross-chunk communication.
//!
//! A density edit is reported with [`ChunkStore::mark_dirty`]; every chunk
//! whose sampled extent contains the edited voxel is flagged (up to 8 for a
//! corner voxel).  [`ChunkStore::rebuild`] snapshots the chunk's dirty
//! generation, builds outside the lock, and discards the result if the
//! chunk was re-dirtied meanwhile; in-flight rebuilds are never interrupted.
use crate::{
    Error, Settings,
    dc::contour_simple,
    field::DensityField,
    manifold::contour_manifold,
    mesh::{Mesh, TileInfo, Vertex},
    octree::Octree,
};
use parking_lot::{
    RwLock, RwLockReadGuard, RwLockUpgradableReadGuard, RwLockWriteGuard,
};
use rayon::prelude::*;
use std::{collections::HashMap, sync::Arc, time::Duration};

/// Chunk coordinates, in units of the chunk stride
pub type ChunkId = [i32; 3];

/// Caller-supplied triangle classifier; see [`TileInfo`]
pub type SubMeshClassifier =
    Arc<dyn Fn(&TileInfo, [Vertex; 3]) -> u32 + Send + Sync>;

/// Which extraction algorithm a store runs per chunk
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum ContourVariant {
    /// One vertex per terminal octree cell ([`contour_simple`])
    #[default]
    Simple,
    /// One vertex per surface fragment ([`contour_manifold`])
    Manifold,
}

/// Bound on any single lock acquisition; timeouts warn and retry
const LOCK_TIMEOUT: Duration = Duration::from_millis(100);

#[derive(Default)]
struct ChunkEntry {
    dirty: bool,
    /// Bumped on every mark; a rebuild installs only if it still matches
    generation: u64,
    mesh: Option<Mesh>,
}

/// A set of chunk meshes over one density field
///
/// All methods take `&self`; the chunk map sits behind a single `RwLock`
/// which is only ever held in the fixed order write → upgradable → read,
/// and never across a field sample or an octree build.
pub struct ChunkStore<F> {
    field: F,
    settings: Settings,
    variant: ContourVariant,
    classify: SubMeshClassifier,
    chunks: RwLock<HashMap<ChunkId, ChunkEntry>>,
}

impl<F: DensityField> ChunkStore<F> {
    /// Builds an empty store over the given field
    pub fn new(field: F, settings: Settings, variant: ContourVariant) -> Self {
        Self {
            field,
            settings,
            variant,
            classify: Arc::new(|_, _| 0),
            chunks: RwLock::new(HashMap::new()),
        }
    }

    /// Replaces the sub-mesh classifier applied to every triangle
    pub fn with_classifier(mut self, classify: SubMeshClassifier) -> Self {
        self.classify = classify;
        self
    }

    /// Settings shared by every chunk build
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Distance between chunk origins, in cells
    pub fn stride(&self) -> i32 {
        (1i32 << self.settings.depth) - 1
    }

    /// World-grid coordinate of the chunk's minimum corner
    pub fn origin(&self, id: ChunkId) -> [i32; 3] {
        let s = self.stride();
        [id[0] * s, id[1] * s, id[2] * s]
    }

    /// Flags every chunk whose sampled extent contains the given voxel
    pub fn mark_dirty(&self, voxel: [i32; 3]) {
        self.mark_dirty_region(voxel, voxel);
    }

    /// Flags every chunk overlapping the inclusive voxel region
    pub fn mark_dirty_region(&self, min: [i32; 3], max: [i32; 3]) {
        let n = 1i32 << self.settings.depth;
        let stride = self.stride();
        let mut lo = [0; 3];
        let mut hi = [0; 3];
        for i in 0..3 {
            // A voxel touches the cells on both of its sides
            let a = min[i] - 1;
            let b = max[i];
            lo[i] = (a - n + stride).div_euclid(stride);
            hi[i] = b.div_euclid(stride);
        }
        let mut chunks = self.write_chunks();
        let mut flagged = 0usize;
        for z in lo[2]..=hi[2] {
            for y in lo[1]..=hi[1] {
                for x in lo[0]..=hi[0] {
                    let e = chunks.entry([x, y, z]).or_default();
                    e.dirty = true;
                    e.generation += 1;
                    flagged += 1;
                }
            }
        }
        log::debug!("flagged {flagged} chunks dirty for {min:?}..={max:?}");
    }

    /// Whether the given chunk is flagged for rebuild
    pub fn is_dirty(&self, id: ChunkId) -> bool {
        self.read_chunks().get(&id).is_some_and(|e| e.dirty)
    }

    /// Ids of every dirty chunk
    pub fn dirty_chunks(&self) -> Vec<ChunkId> {
        self.read_chunks()
            .iter()
            .filter(|(_, e)| e.dirty)
            .map(|(id, _)| *id)
            .collect()
    }

    /// Returns a copy of the chunk's current mesh, if it has one
    pub fn mesh(&self, id: ChunkId) -> Option<Mesh> {
        self.read_chunks().get(&id).and_then(|e| e.mesh.clone())
    }

    /// Rebuilds one chunk if it is dirty
    ///
    /// Returns `Ok(true)` when a non-empty mesh was installed; a chunk with
    /// no surface yields `Ok(false)` with an empty result, which is legal.
    /// If the chunk is re-dirtied while the build runs, the result is
    /// discarded and the chunk stays dirty.
    pub fn rebuild(&self, id: ChunkId) -> Result<bool, Error> {
        let generation = {
            let chunks = self.upgradable_chunks();
            match chunks.get(&id) {
                Some(e) if e.dirty => e.generation,
                _ => return Ok(false),
            }
        };

        // Voxelize, build, and extract outside the lock; readers keep the
        // previous mesh until the swap below
        let origin = self.origin(id);
        let mesh = match self.variant {
            ContourVariant::Simple => {
                Octree::build(&self.field, origin, &self.settings)?
                    .map(|o| contour_simple(&o, |i, v| (self.classify)(i, v)))
            }
            ContourVariant::Manifold => {
                match Octree::build_full(&self.field, origin, &self.settings)?
                {
                    Some(o) => Some(contour_manifold(
                        &o,
                        &self.settings,
                        |i, v| (self.classify)(i, v),
                    )?),
                    None => None,
                }
            }
        };

        let mut chunks = self.write_chunks();
        let Some(entry) = chunks.get_mut(&id) else {
            return Ok(false);
        };
        if entry.generation != generation {
            log::debug!("chunk {id:?} re-dirtied during rebuild; discarding");
            return Ok(false);
        }
        entry.dirty = false;
        let built = mesh.as_ref().is_some_and(|m| !m.triangles.is_empty());
        entry.mesh = mesh;
        Ok(built)
    }

    /// Rebuilds every dirty chunk in parallel
    ///
    /// Returns the number of chunks that installed a non-empty mesh.
    pub fn rebuild_dirty(&self) -> Result<usize, Error> {
        let dirty = self.dirty_chunks();
        let built: Result<Vec<bool>, Error> =
            dirty.par_iter().map(|&id| self.rebuild(id)).collect();
        Ok(built?.into_iter().filter(|&b| b).count())
    }

    fn read_chunks(&self) -> RwLockReadGuard<'_, HashMap<ChunkId, ChunkEntry>> {
        loop {
            if let Some(g) = self.chunks.try_read_for(LOCK_TIMEOUT) {
                return g;
            }
            log::warn!("chunk map read lock timed out; retrying");
        }
    }

    fn upgradable_chunks(
        &self,
    ) -> RwLockUpgradableReadGuard<'_, HashMap<ChunkId, ChunkEntry>> {
        loop {
            if let Some(g) = self.chunks.try_upgradable_read_for(LOCK_TIMEOUT)
            {
                return g;
            }
            log::warn!("chunk map upgradable lock timed out; retrying");
        }
    }

    fn write_chunks(
        &self,
    ) -> RwLockWriteGuard<'_, HashMap<ChunkId, ChunkEntry>> {
        loop {
            if let Some(g) = self.chunks.try_write_for(LOCK_TIMEOUT) {
                return g;
            }
            log::warn!("chunk map write lock timed out; retrying");
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::field::Sphere;
    use nalgebra::Vector3;

    fn store(depth: u8, variant: ContourVariant) -> ChunkStore<Sphere> {
        let field = Sphere {
            center: Vector3::new(1.0, 1.0, 1.0),
            radius: 0.7,
        };
        let settings = Settings {
            depth,
            scale: Vector3::repeat(2.0 / (1 << depth) as f32),
            ..Settings::default()
        };
        ChunkStore::new(field, settings, variant)
    }

    #[test]
    fn halo_voxel_dirties_both_chunks() {
        let s = store(4, ContourVariant::Simple);
        // Voxel 15 sits on the shared layer between chunks 0 and 1
        assert_eq!(s.stride(), 15);
        s.mark_dirty([15, 3, 3]);
        assert!(s.is_dirty([0, 0, 0]));
        assert!(s.is_dirty([1, 0, 0]));
        assert!(!s.is_dirty([2, 0, 0]));
        assert_eq!(s.dirty_chunks().len(), 2);
    }

    #[test]
    fn corner_voxel_dirties_eight_chunks() {
        let s = store(4, ContourVariant::Simple);
        s.mark_dirty([15, 15, 15]);
        assert_eq!(s.dirty_chunks().len(), 8);
        for x in 0..2 {
            for y in 0..2 {
                for z in 0..2 {
                    assert!(s.is_dirty([x, y, z]));
                }
            }
        }
    }

    #[test]
    fn interior_voxel_dirties_one_chunk() {
        let s = store(4, ContourVariant::Simple);
        s.mark_dirty([7, 8, 3]);
        assert_eq!(s.dirty_chunks(), vec![[0, 0, 0]]);
    }

    #[test]
    fn rebuild_lifecycle() {
        let s = store(3, ContourVariant::Simple);
        // Nothing to do before any mark
        assert!(!s.rebuild([0, 0, 0]).unwrap());
        assert!(s.mesh([0, 0, 0]).is_none());

        s.mark_dirty([4, 4, 4]);
        assert!(s.rebuild([0, 0, 0]).unwrap());
        assert!(!s.is_dirty([0, 0, 0]));
        let mesh = s.mesh([0, 0, 0]).unwrap();
        assert!(!mesh.triangles.is_empty());

        // A clean chunk is a no-op
        assert!(!s.rebuild([0, 0, 0]).unwrap());

        // Re-dirtying keeps the previous mesh readable
        s.mark_dirty([4, 4, 4]);
        assert!(s.is_dirty([0, 0, 0]));
        assert_eq!(
            s.mesh([0, 0, 0]).unwrap().triangles.len(),
            mesh.triangles.len()
        );
    }

    #[test]
    fn empty_chunk_rebuild_is_false_but_clean() {
        let s = store(3, ContourVariant::Simple);
        // The sphere is nowhere near chunk [5, 5, 5]
        s.mark_dirty_region([35, 35, 35], [36, 36, 36]);
        assert!(s.is_dirty([5, 5, 5]));
        assert!(!s.rebuild([5, 5, 5]).unwrap());
        assert!(!s.is_dirty([5, 5, 5]));
        assert!(s.mesh([5, 5, 5]).is_none());
    }

    #[test]
    fn rebuild_dirty_rebuilds_everything() {
        let s = store(3, ContourVariant::Manifold);
        s.mark_dirty_region([0, 0, 0], [8, 8, 8]);
        assert!(!s.dirty_chunks().is_empty());
        let built = s.rebuild_dirty().unwrap();
        // Only the chunk containing the sphere installs triangles
        assert_eq!(built, 1);
        assert!(s.dirty_chunks().is_empty());
        assert!(!s.mesh([0, 0, 0]).unwrap().triangles.is_empty());
    }
}
