use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Geometry alignment required by every hardware stage, in pixels.
pub const PIXEL_ALIGNMENT: u32 = 16;

/// Round `v` up to the next multiple of [`PIXEL_ALIGNMENT`].
pub fn align16(v: u32) -> u32 {
    v.saturating_add(PIXEL_ALIGNMENT - 1) & !(PIXEL_ALIGNMENT - 1)
}

/// Closed set of raster layouts exchanged between stages.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColorFormat {
    Rgb24,
    Rgba32,
    Yuv420Planar,
    Rgb565,
}

impl ColorFormat {
    /// Bytes per pixel of the (luma) plane.
    pub fn bytes_per_pixel(self) -> u32 {
        match self {
            Self::Rgb24 => 3,
            Self::Rgba32 => 4,
            Self::Yuv420Planar => 1,
            Self::Rgb565 => 2,
        }
    }

    /// Aligned row stride in bytes for a raster `width` pixels wide.
    pub fn stride_for(self, width: u32) -> u32 {
        align16(width).saturating_mul(self.bytes_per_pixel())
    }

    /// Total buffer length for `rows` rows of `stride` bytes.
    ///
    /// Planar 4:2:0 carries two quarter-size chroma planes after the luma plane.
    pub fn buffer_len(self, stride: u32, rows: u32) -> usize {
        let luma = (stride as usize).saturating_mul(rows as usize);
        match self {
            Self::Yuv420Planar => luma.saturating_mul(3) / 2,
            _ => luma,
        }
    }
}

/// Width/height pair in pixels.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

impl Size {
    /// Build a size.
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Swap width and height (quarter-turn rotation).
    pub fn transposed(self) -> Self {
        Self::new(self.height, self.width)
    }

    /// True when either dimension is zero.
    pub fn is_empty(self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// True when `self` fits inside `bounds` without scaling.
    pub fn fits_within(self, bounds: Size) -> bool {
        self.width <= bounds.width && self.height <= bounds.height
    }
}

impl fmt::Display for Size {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

impl FromStr for Size {
    type Err = String;

    /// Parse `WIDTHxHEIGHT`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (w, h) = s
            .trim()
            .split_once(['x', 'X'])
            .ok_or_else(|| format!("expected WIDTHxHEIGHT, got '{s}'"))?;
        let width = w
            .trim()
            .parse::<u32>()
            .map_err(|e| format!("bad width '{w}': {e}"))?;
        let height = h
            .trim()
            .parse::<u32>()
            .map_err(|e| format!("bad height '{h}': {e}"))?;
        if width == 0 || height == 0 {
            return Err(format!("size must be non-zero, got '{s}'"));
        }
        Ok(Self { width, height })
    }
}

/// Axis-aligned rectangle in display pixels.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    /// Build a rectangle from origin and size.
    pub const fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Build a rectangle from two corners. Corners may be given in any order.
    pub fn from_corners(x1: i32, y1: i32, x2: i32, y2: i32) -> Self {
        Self {
            x: x1.min(x2),
            y: y1.min(y2),
            width: x1.abs_diff(x2),
            height: y1.abs_diff(y2),
        }
    }

    /// Size of the rectangle.
    pub fn size(&self) -> Size {
        Size::new(self.width, self.height)
    }

    /// Rectangle of `inner` centered inside `self`.
    pub fn centered(&self, inner: Size) -> Rect {
        let dx = (i64::from(self.width) - i64::from(inner.width)) / 2;
        let dy = (i64::from(self.height) - i64::from(inner.height)) / 2;
        Rect {
            x: self.x.saturating_add(dx as i32),
            y: self.y.saturating_add(dy as i32),
            width: inner.width,
            height: inner.height,
        }
    }
}

impl FromStr for Rect {
    type Err = String;

    /// Parse a window given as `x1,y1,x2,y2` or `x1 y1 x2 y2`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts = s
            .split([',', ' '])
            .filter(|p| !p.is_empty())
            .map(|p| {
                p.trim()
                    .parse::<i32>()
                    .map_err(|e| format!("bad coordinate '{p}': {e}"))
            })
            .collect::<Result<Vec<_>, _>>()?;
        let [x1, y1, x2, y2] = parts[..] else {
            return Err(format!("expected four coordinates, got '{s}'"));
        };
        let rect = Rect::from_corners(x1, y1, x2, y2);
        if rect.width == 0 || rect.height == 0 {
            return Err(format!("window '{s}' has zero area"));
        }
        Ok(rect)
    }
}

#[cfg(test)]
#[path = "../../tests/unit/foundation/core.rs"]
mod tests;
