//! Quadratic error function accumulation and minimization
use crate::Error;
use nalgebra::{Matrix3, Vector3, Vector4};

/// Relative cutoff for discarding eigenvalues in the pseudo-inverse
///
/// Eigenvalues whose magnitude is below this fraction of the largest
/// eigenvalue are treated as zero, which drops the corresponding direction
/// from the solve (e.g. the in-plane directions of a flat surface patch).
const EIGENVALUE_CUTOFF_RELATIVE: f32 = 1e-3;

/// Solver for a quadratic error function to position a vertex within a cell
///
/// This is a sum over plane constraints `(pᵢ, nᵢ)` of `(nᵢ·x − nᵢ·pᵢ)²`,
/// stored in the usual expanded form so that two accumulators can be merged
/// by plain field-wise addition.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct QuadraticErrorSolver {
    /// A^T A term, which is symmetric
    ata: Matrix3<f32>,

    /// A^T B term
    atb: Vector3<f32>,

    /// B^T B term
    btb: f32,

    /// Mass point of the input constraints, with a count in the `w` field
    mass_point: Vector4<f32>,
}

impl std::ops::AddAssign for QuadraticErrorSolver {
    fn add_assign(&mut self, rhs: Self) {
        self.ata += rhs.ata;
        self.atb += rhs.atb;
        self.btb += rhs.btb;
        self.mass_point += rhs.mass_point;
    }
}

impl std::ops::Add for QuadraticErrorSolver {
    type Output = Self;
    fn add(mut self, rhs: Self) -> Self {
        self += rhs;
        self
    }
}

impl QuadraticErrorSolver {
    /// Builds an empty accumulator with no constraints
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of constraints folded into this accumulator
    pub fn count(&self) -> usize {
        self.mass_point.w as usize
    }

    /// Center of mass of the constraint positions
    ///
    /// Only valid when [`count`](Self::count) is nonzero.
    pub fn mass_point(&self) -> Vector3<f32> {
        debug_assert!(self.mass_point.w > 0.0);
        self.mass_point.xyz() / self.mass_point.w
    }

    /// Adds a plane constraint through `pos` with the given normal
    ///
    /// The normal is normalized on entry, so every constraint carries the
    /// same weight.  Zero-length normals are a caller bug.
    pub fn add_plane(&mut self, pos: Vector3<f32>, normal: Vector3<f32>) {
        let norm = normal.norm();
        debug_assert!(norm > 0.0, "plane constraint with a zero normal");
        let n = normal.unscale(norm);
        let d = n.dot(&pos);
        self.ata += n * n.transpose();
        self.atb += n * d;
        self.btb += d * d;
        self.mass_point += Vector4::new(pos.x, pos.y, pos.z, 1.0);
    }

    /// Evaluates the accumulated error at the given position
    ///
    /// The value is clamped to zero, since float cancellation can otherwise
    /// produce a slightly negative result for near-perfect fits.
    pub fn error(&self, pos: Vector3<f32>) -> f32 {
        (pos.dot(&(self.ata * pos)) - 2.0 * pos.dot(&self.atb) + self.btb)
            .max(0.0)
    }

    /// Minimizes the accumulated error, returning the position and its error
    ///
    /// The solve is performed relative to the mass point, and rank-deficient
    /// directions (detected by a relative eigenvalue cutoff) fall back to the
    /// mass point along that direction.  At least one constraint must have
    /// been added.
    ///
    /// The result is *not* clamped to any bounding region; the octree layer
    /// substitutes the mass point when a solution escapes its cell.
    pub fn solve(&self, sweeps: u8) -> Result<(Vector3<f32>, f32), Error> {
        debug_assert!(
            self.mass_point.w > 0.0,
            "solve requires at least one constraint"
        );
        let center = self.mass_point.xyz() / self.mass_point.w;
        let atb = self.atb - self.ata * center;

        let (eigs, v) = jacobi(self.ata, sweeps);
        if !eigs.iter().chain(v.iter()).all(|e| e.is_finite()) {
            return Err(Error::EigenSolverDiverged(sweeps));
        }

        let cutoff = EIGENVALUE_CUTOFF_RELATIVE * eigs.amax();
        let inv = eigs.map(|e| if e.abs() > cutoff { 1.0 / e } else { 0.0 });
        let pinv = v * Matrix3::from_diagonal(&inv) * v.transpose();

        let pos = center + pinv * atb;
        Ok((pos, self.error(pos)))
    }
}

/// Eigen-decomposition of a symmetric 3×3 matrix by cyclic Jacobi rotations
///
/// Each sweep zeroes the three off-diagonal entries in turn.  Returns the
/// diagonal (eigenvalues) and the accumulated rotation (eigenvectors as
/// columns).
fn jacobi(mut a: Matrix3<f32>, sweeps: u8) -> (Vector3<f32>, Matrix3<f32>) {
    let mut v = Matrix3::identity();
    for _ in 0..sweeps {
        for (p, q) in [(0, 1), (0, 2), (1, 2)] {
            let apq = a[(p, q)];
            if apq.abs() < 1e-12 {
                continue;
            }
            let theta = (a[(q, q)] - a[(p, p)]) / (2.0 * apq);
            let t = theta.signum() / (theta.abs() + (theta * theta + 1.0).sqrt());
            let c = 1.0 / (t * t + 1.0).sqrt();
            let s = t * c;

            let mut j = Matrix3::identity();
            j[(p, p)] = c;
            j[(q, q)] = c;
            j[(p, q)] = s;
            j[(q, p)] = -s;

            a = j.transpose() * a * j;
            v *= j;
        }
    }
    (a.diagonal(), v)
}

#[cfg(test)]
mod test {
    use super::*;
    use approx::assert_relative_eq;
    use rand::{Rng, SeedableRng, rngs::StdRng};

    const SWEEPS: u8 = 8;

    fn random_unit(rng: &mut StdRng) -> Vector3<f32> {
        loop {
            let v = Vector3::new(
                rng.gen_range(-1.0..1.0f32),
                rng.gen_range(-1.0..1.0f32),
                rng.gen_range(-1.0..1.0f32),
            );
            let n = v.norm();
            if n > 0.1 {
                return v.unscale(n);
            }
        }
    }

    #[test]
    fn solve_three_axis_planes() {
        let mut q = QuadraticErrorSolver::new();
        q.add_plane(Vector3::new(0.3, 0.0, 0.0), Vector3::new(1.0, 0.0, 0.0));
        q.add_plane(Vector3::new(0.0, -0.2, 0.0), Vector3::new(0.0, 1.0, 0.0));
        q.add_plane(Vector3::new(0.0, 0.0, 0.7), Vector3::new(0.0, 0.0, 1.0));
        let (pos, err) = q.solve(SWEEPS).unwrap();
        assert_relative_eq!(
            pos,
            Vector3::new(0.3, -0.2, 0.7),
            epsilon = 1e-4
        );
        assert!(err < 1e-6);
    }

    #[test]
    fn solve_random_planes_through_point() {
        let mut rng = StdRng::seed_from_u64(0x1de5);
        for _ in 0..32 {
            let target = random_unit(&mut rng) * 2.0;
            let mut q = QuadraticErrorSolver::new();
            for _ in 0..8 {
                let n = random_unit(&mut rng);
                // Offset the sample point within the plane, so the mass
                // point doesn't trivially coincide with the target
                let w = random_unit(&mut rng);
                let p = target + (w - n * n.dot(&w));
                q.add_plane(p, n);
            }
            let (pos, err) = q.solve(SWEEPS).unwrap();
            assert_relative_eq!(pos, target, epsilon = 1e-3);
            // f32 accumulation over 8 planes at radius ~2 leaves a small
            // residual even for an exact intersection
            assert!(err < 1e-4, "residual {err} at {pos:?}");
            assert!(q.error(target) < 1e-4);
        }
    }

    #[test]
    fn solve_rank_deficient_plane() {
        // All constraints share one normal, so only that direction is
        // determined; the rest falls back to the mass point.
        let mut q = QuadraticErrorSolver::new();
        let n = Vector3::new(0.0, 0.0, 1.0);
        q.add_plane(Vector3::new(0.0, 0.0, 0.25), n);
        q.add_plane(Vector3::new(1.0, 0.0, 0.25), n);
        q.add_plane(Vector3::new(0.0, 1.0, 0.25), n);
        let (pos, err) = q.solve(SWEEPS).unwrap();
        assert_relative_eq!(pos.z, 0.25, epsilon = 1e-4);
        // In-plane position is the mass point
        assert_relative_eq!(pos.x, 1.0 / 3.0, epsilon = 1e-4);
        assert_relative_eq!(pos.y, 1.0 / 3.0, epsilon = 1e-4);
        assert!(err < 1e-6);
    }

    #[test]
    fn merge_matches_bulk_accumulation() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut a = QuadraticErrorSolver::new();
        let mut b = QuadraticErrorSolver::new();
        let mut all = QuadraticErrorSolver::new();
        for i in 0..16 {
            let p = random_unit(&mut rng) * 3.0;
            let n = random_unit(&mut rng);
            if i % 2 == 0 {
                a.add_plane(p, n);
            } else {
                b.add_plane(p, n);
            }
            all.add_plane(p, n);
        }
        let merged = a + b;
        assert_eq!(merged.count(), all.count());
        assert_relative_eq!(merged.mass_point(), all.mass_point(), epsilon = 1e-5);

        let (p0, e0) = merged.solve(SWEEPS).unwrap();
        let (p1, e1) = all.solve(SWEEPS).unwrap();
        assert_relative_eq!(p0, p1, epsilon = 1e-4);
        assert_relative_eq!(e0, e1, epsilon = 1e-4);

        // Merging is commutative
        let flipped = b + a;
        let (p2, _) = flipped.solve(SWEEPS).unwrap();
        assert_relative_eq!(p0, p2, epsilon = 1e-5);
    }
}
