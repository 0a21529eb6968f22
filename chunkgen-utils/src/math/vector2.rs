//! A generic two component vector.

use std::fmt;
use std::ops::{Add, Sub};

/// A two component vector. `y` is the second horizontal axis when used for chunk positions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Vector2<T> {
    /// The first component.
    pub x: T,
    /// The second component.
    pub y: T,
}

impl<T> Vector2<T> {
    /// Creates a new vector.
    #[must_use]
    pub const fn new(x: T, y: T) -> Self {
        Self { x, y }
    }
}

impl<T: Add<Output = T>> Add for Vector2<T> {
    type Output = Self;

    fn add(self, rhs: Self) -> Self::Output {
        Self::new(self.x + rhs.x, self.y + rhs.y)
    }
}

impl<T: Sub<Output = T>> Sub for Vector2<T> {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self::Output {
        Self::new(self.x - rhs.x, self.y - rhs.y)
    }
}

impl<T: fmt::Display> fmt::Display for Vector2<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vector_arithmetic() {
        let a = Vector2::new(3, -2);
        let b = Vector2::new(1, 5);
        assert_eq!(a + b, Vector2::new(4, 3));
        assert_eq!(a - b, Vector2::new(2, -7));
    }
}
