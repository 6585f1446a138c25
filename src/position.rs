use std::fmt;

use glam::{DVec2, IVec2};

/// Integer grid coordinate, usable directly as an index into [`ndarray::Array2`]
/// laid out as `(y, x)`.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Position {
    pub x: i32,
    pub y: i32,
}

impl Position {
    pub const fn new(x: i32, y: i32) -> Self {
        Position { x, y }
    }

    pub const fn add(self, dx: i32, dy: i32) -> Self {
        Position {
            x: self.x + dx,
            y: self.y + dy,
        }
    }

    pub fn as_ivec2(self) -> IVec2 {
        IVec2::new(self.x, self.y)
    }

    pub fn as_dvec2(self) -> DVec2 {
        self.as_ivec2().as_dvec2()
    }

    /// Whether `other` lies on the same row or column.
    pub fn shares_axis(self, other: Position) -> bool {
        self.x == other.x || self.y == other.y
    }

    pub fn is_inside(self, width: usize, height: usize) -> bool {
        self.x >= 0 && (self.x as usize) < width && self.y >= 0 && (self.y as usize) < height
    }
}

impl From<IVec2> for Position {
    fn from(v: IVec2) -> Self {
        Position::new(v.x, v.y)
    }
}

impl From<(i32, i32)> for Position {
    fn from((x, y): (i32, i32)) -> Self {
        Position::new(x, y)
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

unsafe impl ndarray::NdIndex<ndarray::Ix2> for Position {
    fn index_checked(&self, dim: &ndarray::Ix2, strides: &ndarray::Ix2) -> Option<isize> {
        if self.x.is_negative() || self.y.is_negative() {
            None
        } else {
            (self.y as usize, self.x as usize).index_checked(dim, strides)
        }
    }

    fn index_unchecked(&self, strides: &ndarray::Ix2) -> isize {
        (self.y as usize, self.x as usize).index_unchecked(strides)
    }
}

#[cfg(test)]
mod tests {
    use ndarray::array;

    use super::*;

    #[test]
    fn test_index_array() {
        let grid = array![[1.0, 0.0, 4.0], [3.0, 1.0, -1.0]];
        assert_eq!(grid.get(Position::new(2, 0)), Some(&4.0));
        assert_eq!(grid.get(Position::new(0, 1)), Some(&3.0));
        assert_eq!(grid.get(Position::new(-1, 0)), None);
        assert_eq!(grid.get(Position::new(3, 0)), None);
        assert_eq!(grid.get(Position::new(0, 2)), None);
    }

    #[test]
    fn test_shares_axis() {
        let p = Position::new(1, 1);
        assert!(p.shares_axis(Position::new(0, 1)));
        assert!(p.shares_axis(Position::new(1, 2)));
        assert!(!p.shares_axis(Position::new(2, 2)));
    }

    #[test]
    fn test_is_inside() {
        assert!(Position::new(0, 0).is_inside(3, 2));
        assert!(Position::new(2, 1).is_inside(3, 2));
        assert!(!Position::new(3, 1).is_inside(3, 2));
        assert!(!Position::new(0, -1).is_inside(3, 2));
    }
}
