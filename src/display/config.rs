use serde::{Deserialize, Serialize};

use crate::foundation::core::{Rect, Size};

/// Clockwise rotation applied by the compositor.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "i32", into = "i32")]
pub enum Rotation {
    #[default]
    Deg0,
    Deg90,
    Deg180,
    Deg270,
}

impl Rotation {
    /// Parse a multiple of 90 degrees (negative values and full turns are normalized).
    pub fn from_degrees(deg: i32) -> Option<Self> {
        if deg % 90 != 0 {
            return None;
        }
        Some(Self::from_quarters(deg / 90))
    }

    fn from_quarters(q: i32) -> Self {
        match q.rem_euclid(4) {
            0 => Self::Deg0,
            1 => Self::Deg90,
            2 => Self::Deg180,
            _ => Self::Deg270,
        }
    }

    fn quarters(self) -> i32 {
        match self {
            Self::Deg0 => 0,
            Self::Deg90 => 1,
            Self::Deg180 => 2,
            Self::Deg270 => 3,
        }
    }

    /// Angle in degrees.
    pub fn degrees(self) -> i32 {
        self.quarters() * 90
    }

    /// Add another quarter turn clockwise.
    pub fn rotated_cw(self) -> Self {
        Self::from_quarters(self.quarters() + 1)
    }

    /// Remove a quarter turn.
    pub fn rotated_ccw(self) -> Self {
        Self::from_quarters(self.quarters() - 1)
    }

    /// Rotation by `self` followed by `other`.
    pub fn then(self, other: Rotation) -> Self {
        Self::from_quarters(self.quarters() + other.quarters())
    }

    /// Inverse rotation.
    pub fn inverse(self) -> Self {
        Self::from_quarters(-self.quarters())
    }

    /// True for 90 and 270 degrees, where width and height swap on screen.
    pub fn is_quarter_turn(self) -> bool {
        matches!(self, Self::Deg90 | Self::Deg270)
    }
}

impl TryFrom<i32> for Rotation {
    type Error = String;

    fn try_from(deg: i32) -> Result<Self, Self::Error> {
        Self::from_degrees(deg).ok_or_else(|| format!("rotation must be a multiple of 90, got {deg}"))
    }
}

impl From<Rotation> for i32 {
    fn from(r: Rotation) -> Self {
        r.degrees()
    }
}

/// Compositor transform. Discriminants are the hardware transform codes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum DisplayTransform {
    Rot0 = 0,
    MirrorRot0 = 1,
    MirrorRot180 = 2,
    Rot180 = 3,
    MirrorRot90 = 4,
    Rot270 = 5,
    Rot90 = 6,
    MirrorRot270 = 7,
}

impl DisplayTransform {
    /// Transform for a rotation/mirror pair.
    pub fn from_parts(rotation: Rotation, mirror: bool) -> Self {
        match (rotation, mirror) {
            (Rotation::Deg0, false) => Self::Rot0,
            (Rotation::Deg90, false) => Self::Rot90,
            (Rotation::Deg180, false) => Self::Rot180,
            (Rotation::Deg270, false) => Self::Rot270,
            (Rotation::Deg0, true) => Self::MirrorRot0,
            (Rotation::Deg90, true) => Self::MirrorRot90,
            (Rotation::Deg180, true) => Self::MirrorRot180,
            (Rotation::Deg270, true) => Self::MirrorRot270,
        }
    }

    /// Hardware transform code.
    pub fn code(self) -> u32 {
        self as u32
    }
}

/// How the compositor fits a picture into its destination.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisplayMode {
    #[default]
    Letterbox,
    Fill,
}

bitflags::bitflags! {
    /// Which [`DisplayRegion`] fields the compositor should apply.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct RegionFields: u32 {
        const NUM = 0x001;
        const FULLSCREEN = 0x002;
        const TRANSFORM = 0x004;
        const DEST_RECT = 0x008;
        const NOASPECT = 0x020;
        const MODE = 0x040;
        const ALPHA = 0x100;
        const LAYER = 0x200;
    }
}

/// Compositor parameters derived from a [`DisplayConfig`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DisplayRegion {
    pub set: RegionFields,
    pub display: u32,
    pub fullscreen: bool,
    pub dest_rect: Option<Rect>,
    pub transform: DisplayTransform,
    pub noaspect: bool,
    pub mode: DisplayMode,
    pub alpha: u8,
    pub layer: i32,
}

/// Picture and display geometry needed to center a picture.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Placement {
    pub image: Size,
    pub display: Size,
}

/// Where and how a picture is shown.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct DisplayConfig {
    pub rotation: Rotation,
    pub mirror: bool,
    pub window: Option<Rect>,
    pub layer: i32,
    pub alpha: Option<u8>,
    pub mode: DisplayMode,
    pub keep_aspect: bool,
    pub center: bool,
    pub display: u32,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            rotation: Rotation::Deg0,
            mirror: false,
            window: None,
            layer: 0,
            alpha: None,
            mode: DisplayMode::Letterbox,
            keep_aspect: true,
            center: false,
            display: 0,
        }
    }
}

/// Rotation and mirror encoded by an EXIF orientation tag (1..=8).
///
/// Mirror is applied first. Unknown values map to the identity.
pub fn exif_orientation(tag: u8) -> (Rotation, bool) {
    match tag {
        2 => (Rotation::Deg0, true),
        3 => (Rotation::Deg180, false),
        4 => (Rotation::Deg180, true),
        5 => (Rotation::Deg90, true),
        6 => (Rotation::Deg90, false),
        7 => (Rotation::Deg270, true),
        8 => (Rotation::Deg270, false),
        _ => (Rotation::Deg0, false),
    }
}

impl DisplayConfig {
    /// Compositor transform for the current rotation and mirror.
    pub fn transform(&self) -> DisplayTransform {
        DisplayTransform::from_parts(self.rotation, self.mirror)
    }

    /// Rotate a quarter turn clockwise.
    pub fn rotate_cw(&mut self) {
        self.rotation = self.rotation.rotated_cw();
    }

    /// Rotate a quarter turn counter-clockwise.
    pub fn rotate_ccw(&mut self) {
        self.rotation = self.rotation.rotated_ccw();
    }

    /// Flip the mirror flag.
    pub fn toggle_mirror(&mut self) {
        self.mirror = !self.mirror;
    }

    /// Copy of `self` with the picture's own EXIF orientation applied first.
    pub fn with_orientation(&self, tag: u8) -> Self {
        let (rot, mirror) = exif_orientation(tag);
        // Moving a mirror past a rotation inverts the rotation.
        let rot = if self.mirror { rot.inverse() } else { rot };
        Self {
            rotation: rot.then(self.rotation),
            mirror: self.mirror ^ mirror,
            ..self.clone()
        }
    }

    /// Size a picture of `image` pixels occupies on screen after rotation.
    pub fn on_screen(&self, image: Size) -> Size {
        if self.rotation.is_quarter_turn() {
            image.transposed()
        } else {
            image
        }
    }

    /// Compositor region for this configuration.
    pub fn region(&self, placement: Option<Placement>) -> DisplayRegion {
        let mut set = RegionFields::NUM
            | RegionFields::FULLSCREEN
            | RegionFields::TRANSFORM
            | RegionFields::NOASPECT
            | RegionFields::MODE;

        let dest_rect = match (self.window, placement) {
            (Some(win), _) => Some(win),
            (None, Some(p)) if self.center => {
                let shown = self.on_screen(p.image);
                shown.fits_within(p.display).then(|| {
                    Rect::new(0, 0, p.display.width, p.display.height).centered(shown)
                })
            }
            _ => None,
        };
        if dest_rect.is_some() {
            set |= RegionFields::DEST_RECT;
        }
        if self.alpha.is_some() {
            set |= RegionFields::ALPHA;
        }
        if self.layer != 0 {
            set |= RegionFields::LAYER;
        }

        DisplayRegion {
            set,
            display: self.display,
            fullscreen: dest_rect.is_none(),
            dest_rect,
            transform: self.transform(),
            noaspect: !self.keep_aspect,
            mode: self.mode,
            alpha: self.alpha.unwrap_or(255),
            layer: self.layer,
        }
    }
}

#[cfg(test)]
#[path = "../../tests/unit/display/config.rs"]
mod tests;
