//! Cheap header inspection used to pick a decode path before any pixels are decoded.

use std::io::Cursor;

use image::ImageDecoder;

use crate::foundation::error::{PipelineError, PipelineResult};
use crate::hw::types::Encoding;

/// What the header of an encoded asset says about it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HeaderInfo {
    /// Container/codec.
    pub encoding: Encoding,
    /// Progressive (multi-scan) JPEG.
    pub is_progressive: bool,
    /// Colour components in the frame header; 0 when unknown.
    pub component_count: u8,
    /// EXIF orientation tag, 1 when absent.
    pub orientation: u8,
}

/// Identify the encoding from magic bytes.
pub fn sniff_encoding(bytes: &[u8]) -> PipelineResult<Encoding> {
    let format = image::guess_format(bytes)
        .map_err(|_| PipelineError::unsupported("unrecognised image signature"))?;
    match format {
        image::ImageFormat::Jpeg => Ok(Encoding::Jpeg),
        image::ImageFormat::Png => Ok(Encoding::Png),
        image::ImageFormat::Gif => Ok(Encoding::Gif),
        image::ImageFormat::Bmp => Ok(Encoding::Bmp),
        image::ImageFormat::Tiff => Ok(Encoding::Tiff),
        image::ImageFormat::WebP => Ok(Encoding::WebP),
        other => Err(PipelineError::unsupported(format!(
            "{other:?} images are not supported"
        ))),
    }
}

/// Frame-header facts of a JPEG stream, from the first SOFn marker.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct JpegFrame {
    /// SOF2/6/10/14.
    pub progressive: bool,
    /// Components in the frame.
    pub components: u8,
}

/// Walk JPEG marker segments up to the first start-of-frame.
pub fn scan_jpeg_frame(bytes: &[u8]) -> Option<JpegFrame> {
    if bytes.get(..2)? != [0xFF, 0xD8] {
        return None;
    }
    let mut pos = 2;
    loop {
        // Markers may be padded with any number of 0xFF fill bytes.
        while *bytes.get(pos)? != 0xFF {
            pos += 1;
        }
        while *bytes.get(pos)? == 0xFF {
            pos += 1;
        }
        let marker = *bytes.get(pos)?;
        pos += 1;
        match marker {
            0xD0..=0xD7 | 0x01 => continue,
            0xD9 | 0xDA => return None,
            0xC0..=0xCF if !matches!(marker, 0xC4 | 0xC8 | 0xCC) => {
                // length(2) precision(1) height(2) width(2) components(1)
                let components = *bytes.get(pos + 7)?;
                return Some(JpegFrame {
                    progressive: matches!(marker, 0xC2 | 0xC6 | 0xCA | 0xCE),
                    components,
                });
            }
            _ => {
                let len = u16::from_be_bytes([*bytes.get(pos)?, *bytes.get(pos + 1)?]) as usize;
                if len < 2 {
                    return None;
                }
                pos += len;
            }
        }
    }
}

/// EXIF orientation of an encoded picture; 1 when absent or unreadable.
pub fn read_orientation(bytes: &[u8]) -> u8 {
    image::ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .ok()
        .and_then(|r| r.into_decoder().ok())
        .and_then(|mut d| d.orientation().ok())
        .map(|o| o.to_exif())
        .unwrap_or(1)
}

/// Inspect the header of `bytes`.
pub fn probe_header(bytes: &[u8]) -> PipelineResult<HeaderInfo> {
    let encoding = sniff_encoding(bytes)?;
    let (is_progressive, component_count) = match encoding {
        Encoding::Jpeg => {
            let frame = scan_jpeg_frame(bytes)
                .ok_or_else(|| PipelineError::decode("JPEG without a frame header"))?;
            (frame.progressive, frame.components)
        }
        _ => (false, 0),
    };
    Ok(HeaderInfo {
        encoding,
        is_progressive,
        component_count,
        orientation: read_orientation(bytes),
    })
}

#[cfg(test)]
#[path = "../../tests/unit/codec/probe.rs"]
mod tests;
