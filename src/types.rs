//! Strongly-typed indexes for cube geometry, plus the right-handed
//! coordinate frames used by the contour traversal.
use std::ops::{BitOr, Mul};

/// Cell axis, as an OR'able bitfield (X = 1, Y = 2, Z = 4)
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Axis(u8);

/// The X axis
pub const X: Axis = Axis(1);
/// The Y axis
pub const Y: Axis = Axis(2);
/// The Z axis
pub const Z: Axis = Axis(4);

impl Axis {
    /// Builds a new axis; the input must be 1, 2, or 4
    pub fn new(i: u8) -> Self {
        assert_eq!(i.count_ones(), 1);
        assert!(i < 8);
        Self(i)
    }

    /// Returns the axis bitfield value
    pub fn bit(self) -> u8 {
        self.0
    }

    /// Converts from a bitfield to an index in the 0-2 range
    pub fn index(self) -> usize {
        self.0.trailing_zeros() as usize
    }

    /// Cycles to the next axis in the right-handed order X-Y-Z-X
    pub fn next(self) -> Self {
        Axis((self.0 << 1) % 7)
    }
}

impl Mul<bool> for Axis {
    type Output = Axis;
    fn mul(self, rhs: bool) -> Axis {
        if rhs { self } else { Axis(0) }
    }
}

impl BitOr<Axis> for Axis {
    type Output = Corner;
    fn bitor(self, rhs: Axis) -> Self::Output {
        Corner(self.0 | rhs.0)
    }
}

/// Strongly-typed cell corner, in the 0-8 range
///
/// Bit 0 is the X position, bit 1 is Y, bit 2 is Z; corner 0 sits at the
/// cell minimum and corner 7 at the cell maximum.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Corner(u8);

impl Corner {
    /// Builds a new corner; the input must be in the 0-8 range
    pub fn new(i: u8) -> Self {
        assert!(i < 8);
        Self(i)
    }

    /// Converts a corner to an index in the 0-8 range
    pub fn index(self) -> usize {
        self.0 as usize
    }

    /// Iterates over all 8 corners
    pub fn iter() -> impl Iterator<Item = Corner> {
        (0..8).map(Corner)
    }

    /// Checks whether the corner is offset along the given axis
    pub fn get(self, axis: Axis) -> bool {
        (self.0 & axis.0) != 0
    }

    /// Returns the corner's offset from the cell minimum, in cell units
    pub fn offset(self) -> [i32; 3] {
        [
            (self.0 & 1) as i32,
            ((self.0 >> 1) & 1) as i32,
            ((self.0 >> 2) & 1) as i32,
        ]
    }
}

impl From<Axis> for Corner {
    fn from(a: Axis) -> Self {
        Corner(a.0)
    }
}

impl BitOr<Axis> for Corner {
    type Output = Corner;
    fn bitor(self, rhs: Axis) -> Self::Output {
        Corner(self.0 | rhs.0)
    }
}

/// Strongly-typed cell edge, in the 0-12 range
///
/// Edges are numbered in groups of 4 by axis: edge `4t + 2v + u` runs along
/// axis `t` starting from the corner offset by `u` along the next axis and
/// `v` along the axis after that (right-handed order).
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Edge(u8);

impl Edge {
    /// Builds a new edge; the input must be in the 0-12 range
    pub fn new(i: u8) -> Self {
        assert!(i < 12);
        Self(i)
    }

    /// Converts an edge to an index in the 0-12 range
    pub fn index(self) -> usize {
        self.0 as usize
    }

    /// Iterates over all 12 edges
    pub fn iter() -> impl Iterator<Item = Edge> {
        (0..12).map(Edge)
    }

    /// Returns the axis the edge runs along
    pub fn axis(self) -> Axis {
        Axis(1 << (self.0 / 4))
    }

    /// Returns the corners at the lower and upper ends of this edge
    ///
    /// "Lower" means the corner without the edge's own axis bit set.
    pub fn corners(self) -> (Corner, Corner) {
        let (t, u, v) = match self.0 / 4 {
            0 => XYZ::frame(),
            1 => YZX::frame(),
            2 => ZXY::frame(),
            _ => unreachable!(),
        };
        let start = (u * ((self.0 % 4) & 1 != 0)) | (v * ((self.0 % 4) & 2 != 0));
        (start, start | t)
    }
}

/// A directed edge, from an inside corner to an outside corner
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DirectedEdge {
    start: Corner,
    end: Corner,
}

impl DirectedEdge {
    /// Builds a new directed edge between two corners sharing an axis
    pub fn new(start: Corner, end: Corner) -> Self {
        debug_assert_eq!((start.0 ^ end.0).count_ones(), 1);
        Self { start, end }
    }

    /// The corner this edge points away from
    pub fn start(self) -> Corner {
        self.start
    }

    /// The corner this edge points toward
    pub fn end(self) -> Corner {
        self.end
    }

    /// Discards the direction, returning the cell edge
    pub fn undirected(self) -> Edge {
        let t = (self.start.0 ^ self.end.0).trailing_zeros() as u8;
        let t_axis = Axis(1 << t);
        let u = t_axis.next();
        let v = u.next();
        let u_bit = self.start.get(u) as u8;
        let v_bit = self.start.get(v) as u8;
        Edge(4 * t + 2 * v_bit + u_bit)
    }
}

/// A right-handed coordinate frame
///
/// The contour traversal recurses through the three cyclic permutations of
/// the axes; `Next` rotates the frame one step.
pub trait Frame {
    /// The frame that is next in terms of rotation
    type Next: Frame;

    /// Returns the x, y, z axes for this frame
    fn frame() -> (Axis, Axis, Axis);
}

/// The X-Y-Z coordinate frame
#[allow(clippy::upper_case_acronyms)]
pub enum XYZ {}
/// The Y-Z-X coordinate frame
#[allow(clippy::upper_case_acronyms)]
pub enum YZX {}
/// The Z-X-Y coordinate frame
#[allow(clippy::upper_case_acronyms)]
pub enum ZXY {}

impl Frame for XYZ {
    type Next = YZX;
    fn frame() -> (Axis, Axis, Axis) {
        (X, Y, Z)
    }
}
impl Frame for YZX {
    type Next = ZXY;
    fn frame() -> (Axis, Axis, Axis) {
        (Y, Z, X)
    }
}
impl Frame for ZXY {
    type Next = XYZ;
    fn frame() -> (Axis, Axis, Axis) {
        (Z, X, Y)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn axis_next() {
        assert_eq!(X.next(), Y);
        assert_eq!(Y.next(), Z);
        assert_eq!(Z.next(), X);
    }

    #[test]
    fn edge_corners() {
        // Edge 0 runs along X from corner 0
        let (a, b) = Edge::new(0).corners();
        assert_eq!(a, Corner::new(0));
        assert_eq!(b, Corner::new(1));

        // Edge 7 runs along Y from the corner offset in Z and X
        let (a, b) = Edge::new(7).corners();
        assert_eq!(a, Corner::new(5));
        assert_eq!(b, Corner::new(7));

        for e in Edge::iter() {
            let (a, b) = e.corners();
            assert_eq!(a.0 | e.axis().bit(), b.0);
            assert_eq!(a.0 & e.axis().bit(), 0);
            assert_eq!(DirectedEdge::new(a, b).undirected(), e);
            assert_eq!(DirectedEdge::new(b, a).undirected(), e);
        }
    }

    #[test]
    fn corner_offsets() {
        assert_eq!(Corner::new(0).offset(), [0, 0, 0]);
        assert_eq!(Corner::new(5).offset(), [1, 0, 1]);
        assert_eq!(Corner::new(7).offset(), [1, 1, 1]);
    }
}
