//! Scalar density fields and the sampling helpers built on them
use nalgebra::Vector3;

/// A scalar density field over world-space positions
///
/// By convention, if `density(p) < 0` then `p` is **inside** the surface; if
/// it's `> 0` then `p` is **outside**; otherwise it's on the boundary.
///
/// The field may be sampled from many threads at once during chunk rebuilds,
/// so implementations must be `Sync`.
pub trait DensityField: Sync {
    /// Samples the field at the given position
    fn density(&self, p: Vector3<f32>) -> f32;
}

impl<F: Fn(Vector3<f32>) -> f32 + Sync> DensityField for F {
    fn density(&self, p: Vector3<f32>) -> f32 {
        self(p)
    }
}

/// A solid sphere, as a signed distance field
#[derive(Copy, Clone, Debug)]
pub struct Sphere {
    /// Sphere center, in world units
    pub center: Vector3<f32>,
    /// Sphere radius, in world units
    pub radius: f32,
}

impl DensityField for Sphere {
    fn density(&self, p: Vector3<f32>) -> f32 {
        (p - self.center).norm() - self.radius
    }
}

/// A half-space bounded by a plane
///
/// Positions with `dot(normal, p) > offset` are outside.
#[derive(Copy, Clone, Debug)]
pub struct Plane {
    /// Outward-facing plane normal
    pub normal: Vector3<f32>,
    /// Distance from the origin along `normal`
    pub offset: f32,
}

impl DensityField for Plane {
    fn density(&self, p: Vector3<f32>) -> f32 {
        self.normal.dot(&p) - self.offset
    }
}

/// The union of two fields (pointwise minimum)
#[derive(Copy, Clone, Debug)]
pub struct Union<A, B>(pub A, pub B);

impl<A: DensityField, B: DensityField> DensityField for Union<A, B> {
    fn density(&self, p: Vector3<f32>) -> f32 {
        self.0.density(p).min(self.1.density(p))
    }
}

/// Walks from `a` to `b` in fixed `step`-sized increments, returning the
/// midpoint of the first interval whose far sample flips sign.
///
/// The caller guarantees that the corner samples at `a` and `b` disagree in
/// sign; `inside_at_start` is the sign at `a`.  A fixed-step scan (rather
/// than bisection) keeps the crossing position stable under small field
/// edits, which keeps rebuilt chunk meshes stable too.
pub(crate) fn scan_crossing<F: DensityField>(
    field: &F,
    a: Vector3<f32>,
    b: Vector3<f32>,
    inside_at_start: bool,
    step: f32,
) -> Vector3<f32> {
    let steps = (1.0 / step).ceil() as usize;
    let mut prev = 0.0_f32;
    for i in 1..=steps {
        let t = (i as f32 * step).min(1.0);
        let p = a + (b - a) * t;
        if (field.density(p) < 0.0) != inside_at_start {
            return a + (b - a) * (0.5 * (prev + t));
        }
        prev = t;
    }
    // The endpoint samples bracket a crossing, so the scan terminates above
    // unless float noise disagrees with the corner grid; fall back to the
    // edge midpoint.
    a + (b - a) * 0.5
}

/// Estimates the field gradient at `p` by central differences, with a
/// per-axis step of `h`
pub(crate) fn central_normal<F: DensityField>(
    field: &F,
    p: Vector3<f32>,
    h: Vector3<f32>,
) -> Vector3<f32> {
    let dx = Vector3::new(h.x, 0.0, 0.0);
    let dy = Vector3::new(0.0, h.y, 0.0);
    let dz = Vector3::new(0.0, 0.0, h.z);
    Vector3::new(
        (field.density(p + dx) - field.density(p - dx)) / (2.0 * h.x),
        (field.density(p + dy) - field.density(p - dy)) / (2.0 * h.y),
        (field.density(p + dz) - field.density(p - dz)) / (2.0 * h.z),
    )
}

#[cfg(test)]
mod test {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn scan_finds_linear_crossing() {
        let f = |p: Vector3<f32>| p.x - 0.37;
        let a = Vector3::new(0.0, 0.0, 0.0);
        let b = Vector3::new(1.0, 0.0, 0.0);
        let hit = scan_crossing(&f, a, b, true, 1.0 / 16.0);
        // The crossing lands within half a scan step of the true root
        assert!((hit.x - 0.37).abs() <= 0.5 / 16.0);
    }

    #[test]
    fn central_normal_of_plane() {
        let plane = Plane {
            normal: Vector3::new(0.0, 1.0, 0.0),
            offset: 0.5,
        };
        let n = central_normal(
            &plane,
            Vector3::new(0.3, 0.5, 0.9),
            Vector3::repeat(0.125),
        );
        assert_relative_eq!(n, Vector3::new(0.0, 1.0, 0.0), epsilon = 1e-4);
    }

    #[test]
    fn sphere_density() {
        let s = Sphere {
            center: Vector3::new(1.0, 0.0, 0.0),
            radius: 0.5,
        };
        assert!(s.density(Vector3::new(1.0, 0.0, 0.0)) < 0.0);
        assert!(s.density(Vector3::new(2.0, 0.0, 0.0)) > 0.0);
        assert_relative_eq!(s.density(Vector3::new(1.5, 0.0, 0.0)), 0.0);
    }
}
