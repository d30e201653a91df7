pub mod animation;
pub mod buffer;

use crate::foundation::core::Size;
use animation::AnimationImage;
use buffer::Image;

/// A decoded asset ready for presentation.
#[derive(Debug)]
pub enum LoadedAsset {
    /// Single picture.
    Still(Image),
    /// Timed frame sequence.
    Animated(AnimationImage),
}

impl LoadedAsset {
    /// Picture size.
    pub fn size(&self) -> Size {
        match self {
            Self::Still(img) => img.size(),
            Self::Animated(anim) => anim.layout().size(),
        }
    }
}
