use std::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Integral window dimensions in pixels.
///
/// Used both for the size a window manager or user requests and for the
/// size a [`WindowController`](crate::WindowController) settles on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Size {
    pub width: i32,
    pub height: i32,
}

impl Size {
    pub const fn new(width: i32, height: i32) -> Self {
        Self { width, height }
    }

    /// Parses the `WIDTHxHEIGHT` notation used by environment overrides.
    pub fn parse(text: &str) -> Option<Self> {
        let (width, height) = text.trim().split_once(['x', 'X'])?;
        let width = width.trim().parse().ok()?;
        let height = height.trim().parse().ok()?;
        Some(Self { width, height })
    }

    pub fn is_empty(&self) -> bool {
        self.width <= 0 || self.height <= 0
    }

    /// Width and height clamped to the unsigned range native calls expect.
    pub fn to_unsigned(self) -> (u32, u32) {
        (self.width.max(1) as u32, self.height.max(1) as u32)
    }
}

impl fmt::Display for Size {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

impl From<(i32, i32)> for Size {
    fn from((width, height): (i32, i32)) -> Self {
        Self { width, height }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_dimension_notation() {
        assert_eq!(Size::parse("640x480"), Some(Size::new(640, 480)));
        assert_eq!(Size::parse(" 80 X 80 "), Some(Size::new(80, 80)));
        assert_eq!(Size::parse("640"), None);
        assert_eq!(Size::parse("wide x tall"), None);
    }

    #[test]
    fn unsigned_conversion_never_yields_zero() {
        assert_eq!(Size::new(0, -4).to_unsigned(), (1, 1));
        assert_eq!(Size::new(300, 200).to_unsigned(), (300, 200));
        assert!(Size::new(0, 10).is_empty());
    }
}
