use crate::foundation::core::{ColorFormat, Size, align16};
use crate::foundation::error::{PipelineError, PipelineResult};
use crate::hw::types::RawFormat;

/// Geometry of an aligned raster.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ImageLayout {
    pub width: u32,
    pub height: u32,
    pub stride: u32,
    pub rows: u32,
    pub format: ColorFormat,
}

impl ImageLayout {
    /// Layout with stride and rows rounded up to the hardware alignment.
    pub fn aligned(width: u32, height: u32, format: ColorFormat) -> Self {
        Self {
            width,
            height,
            stride: format.stride_for(width),
            rows: align16(height),
            format,
        }
    }

    /// Bytes needed for this layout.
    pub fn byte_len(&self) -> usize {
        self.format.buffer_len(self.stride, self.rows)
    }

    /// Visible bytes per row.
    pub fn row_bytes(&self) -> usize {
        (self.width as usize).saturating_mul(self.format.bytes_per_pixel() as usize)
    }

    /// Visible size.
    pub fn size(&self) -> Size {
        Size::new(self.width, self.height)
    }

    /// Port format describing this layout.
    pub fn raw_format(&self) -> RawFormat {
        RawFormat {
            width: self.width,
            height: self.height,
            stride: self.stride,
            slice_height: self.rows,
            color: self.format,
        }
    }

    /// Layout described by a port format.
    pub fn from_raw(raw: RawFormat) -> Self {
        Self {
            width: raw.width,
            height: raw.height,
            stride: raw.stride,
            rows: raw.slice_height,
            format: raw.color,
        }
    }
}

/// A decoded raster and the memory backing it.
///
/// Owned by whichever stage produced it last; dropping it releases the pixels.
#[derive(Debug)]
pub struct Image {
    layout: ImageLayout,
    data: Vec<u8>,
}

impl Image {
    /// Zero-filled image.
    pub fn new(layout: ImageLayout) -> PipelineResult<Self> {
        let len = layout.byte_len();
        let mut data = Vec::new();
        data.try_reserve_exact(len)
            .map_err(|e| PipelineError::allocation(format!("image of {len} bytes: {e}")))?;
        data.resize(len, 0);
        Ok(Self { layout, data })
    }

    /// Wrap existing memory. `data` must be at least as long as the layout needs.
    pub fn from_parts(layout: ImageLayout, data: Vec<u8>) -> PipelineResult<Self> {
        if layout.stride < layout.row_bytes() as u32 || layout.rows < layout.height {
            return Err(PipelineError::parameter(format!(
                "inconsistent layout {layout:?}"
            )));
        }
        if data.len() < layout.byte_len() {
            return Err(PipelineError::allocation(format!(
                "buffer of {} bytes too small for {}x{} {:?} ({} bytes)",
                data.len(),
                layout.width,
                layout.height,
                layout.format,
                layout.byte_len()
            )));
        }
        Ok(Self { layout, data })
    }

    /// Aligned RGBA copy of tightly packed `width * height * 4` pixels.
    pub fn from_rgba(width: u32, height: u32, pixels: &[u8]) -> PipelineResult<Self> {
        let layout = ImageLayout::aligned(width, height, ColorFormat::Rgba32);
        let row = layout.row_bytes();
        if pixels.len() < row * height as usize {
            return Err(PipelineError::decode(format!(
                "{} pixel bytes for {width}x{height} RGBA",
                pixels.len()
            )));
        }
        let mut img = Self::new(layout)?;
        let stride = layout.stride as usize;
        if row > 0 {
            for (src, dst) in pixels.chunks_exact(row).zip(img.data.chunks_exact_mut(stride)) {
                dst[..row].copy_from_slice(src);
            }
        }
        Ok(img)
    }

    /// Geometry.
    pub fn layout(&self) -> ImageLayout {
        self.layout
    }

    /// Visible width.
    pub fn width(&self) -> u32 {
        self.layout.width
    }

    /// Visible height.
    pub fn height(&self) -> u32 {
        self.layout.height
    }

    /// Visible size.
    pub fn size(&self) -> Size {
        self.layout.size()
    }

    /// Row stride in bytes.
    pub fn stride(&self) -> u32 {
        self.layout.stride
    }

    /// Allocated rows.
    pub fn rows(&self) -> u32 {
        self.layout.rows
    }

    /// Pixel layout.
    pub fn format(&self) -> ColorFormat {
        self.layout.format
    }

    /// Backing memory, including padding.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Backing memory, mutable.
    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Total allocated byte length.
    pub fn byte_len(&self) -> usize {
        self.data.len()
    }

    /// Visible bytes of row `y`.
    pub fn row(&self, y: u32) -> &[u8] {
        let start = (y as usize).saturating_mul(self.layout.stride as usize);
        let end = start.saturating_add(self.layout.row_bytes()).min(self.data.len());
        &self.data[start.min(end)..end]
    }

    /// Split into geometry and memory.
    pub fn into_parts(self) -> (ImageLayout, Vec<u8>) {
        (self.layout, self.data)
    }

    /// Tightly packed RGBA copy for packed RGB(A) images.
    pub fn to_rgba(&self) -> Option<image::RgbaImage> {
        let (w, h) = (self.layout.width, self.layout.height);
        let mut out = Vec::with_capacity(w as usize * h as usize * 4);
        for y in 0..h {
            let row = self.row(y);
            match self.layout.format {
                ColorFormat::Rgba32 => out.extend_from_slice(row),
                ColorFormat::Rgb24 => {
                    for px in row.chunks_exact(3) {
                        out.extend_from_slice(&[px[0], px[1], px[2], 255]);
                    }
                }
                ColorFormat::Yuv420Planar | ColorFormat::Rgb565 => return None,
            }
        }
        image::RgbaImage::from_raw(w, h, out)
    }
}

#[cfg(test)]
#[path = "../../tests/unit/raster/buffer.rs"]
mod tests;
