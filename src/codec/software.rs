use tracing::debug;

use crate::codec::gif::GifFrames;
use crate::codec::probe::{HeaderInfo, probe_header};
use crate::foundation::error::{PipelineError, PipelineResult};
use crate::hw::types::Encoding;
use crate::raster::LoadedAsset;
use crate::raster::animation::{AnimationImage, DecodeMode, FrameDecoder};
use crate::raster::buffer::Image;

/// Decoding collaborator for everything the hardware path does not handle.
pub trait Codec: Send + Sync {
    /// Inspect the header of an encoded asset.
    fn probe_header(&self, bytes: &[u8]) -> PipelineResult<HeaderInfo>;

    /// Decode a whole asset in software. Multi-frame assets become animations.
    fn software_decode(&self, bytes: &[u8], mode: DecodeMode) -> PipelineResult<LoadedAsset>;
}

/// [`Codec`] backed by the `image` and `gif` crates.
#[derive(Clone, Copy, Debug, Default)]
pub struct SoftwareCodec;

impl SoftwareCodec {
    fn decode_still(bytes: &[u8]) -> PipelineResult<Image> {
        let rgba = image::load_from_memory(bytes)
            .map_err(|e| match e {
                image::ImageError::Unsupported(u) => PipelineError::unsupported(u.to_string()),
                other => PipelineError::decode(other.to_string()),
            })?
            .to_rgba8();
        Image::from_rgba(rgba.width(), rgba.height(), rgba.as_raw())
    }
}

impl Codec for SoftwareCodec {
    fn probe_header(&self, bytes: &[u8]) -> PipelineResult<HeaderInfo> {
        probe_header(bytes)
    }

    fn software_decode(&self, bytes: &[u8], mode: DecodeMode) -> PipelineResult<LoadedAsset> {
        if crate::codec::probe::sniff_encoding(bytes)? == Encoding::Gif {
            let mut frames = GifFrames::new(bytes.to_vec())?;
            if frames.frame_count() > 1 {
                debug!(frames = frames.frame_count(), "animated gif");
                let anim = AnimationImage::from_decoder(Box::new(frames), mode)?;
                return Ok(LoadedAsset::Animated(anim));
            }
            return Ok(LoadedAsset::Still(frames.decode_frame(0)?.image));
        }
        Ok(LoadedAsset::Still(Self::decode_still(bytes)?))
    }
}

#[cfg(test)]
#[path = "../../tests/unit/codec/software.rs"]
mod tests;
