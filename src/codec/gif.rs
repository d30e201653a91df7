use std::fmt;
use std::io::Cursor;
use std::sync::Arc;

use gif::{ColorOutput, DecodeOptions, DisposalMethod, Repeat};
use tracing::debug;

use crate::foundation::error::{PipelineError, PipelineResult};
use crate::raster::animation::{DecodedFrame, FrameDecoder};
use crate::raster::buffer::Image;

type Reader = gif::Decoder<Cursor<Arc<[u8]>>>;

fn gif_err(e: gif::DecodingError) -> PipelineError {
    PipelineError::decode(format!("gif: {e}"))
}

fn open(data: &Arc<[u8]>) -> PipelineResult<Reader> {
    let mut options = DecodeOptions::new();
    options.set_color_output(ColorOutput::RGBA);
    options.read_info(Cursor::new(Arc::clone(data))).map_err(gif_err)
}

/// Number of plays requested by the NETSCAPE extension; `0` plays forever.
///
/// Files without the extension play once.
pub fn plays(repeat: Repeat) -> i32 {
    match repeat {
        Repeat::Infinite => 0,
        Repeat::Finite(0) => 1,
        Repeat::Finite(n) => i32::from(n),
    }
}

#[derive(Clone, Copy)]
struct Area {
    left: u32,
    top: u32,
    width: u32,
    height: u32,
}

struct Disposal {
    method: DisposalMethod,
    area: Area,
    saved: Option<Vec<u8>>,
}

/// Decoder positioned somewhere in the stream, with the composited canvas so far.
struct Playhead {
    reader: Reader,
    canvas: Vec<u8>,
    next: usize,
    disposal: Option<Disposal>,
}

/// Frames of an animated GIF, composited onto the full canvas on request.
pub struct GifFrames {
    data: Arc<[u8]>,
    width: u32,
    height: u32,
    delays: Vec<u32>,
    loop_count: i32,
    playhead: Option<Playhead>,
}

impl GifFrames {
    /// Index the frames of `data` (delays and loop count) without keeping any pixels.
    pub fn new(data: impl Into<Arc<[u8]>>) -> PipelineResult<Self> {
        let data = data.into();
        let mut reader = open(&data)?;
        let (width, height) = (u32::from(reader.width()), u32::from(reader.height()));
        if width == 0 || height == 0 {
            return Err(PipelineError::decode("gif with an empty logical screen"));
        }
        let mut delays = Vec::new();
        while let Some(frame) = reader.read_next_frame().map_err(gif_err)? {
            delays.push(u32::from(frame.delay));
        }
        if delays.is_empty() {
            return Err(PipelineError::decode("gif has no frames"));
        }
        let loop_count = plays(reader.repeat());
        debug!(width, height, frames = delays.len(), loop_count, "gif indexed");
        Ok(Self {
            data,
            width,
            height,
            delays,
            loop_count,
            playhead: None,
        })
    }

    /// Logical screen width.
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Logical screen height.
    pub fn height(&self) -> u32 {
        self.height
    }

    fn rewind(&self) -> PipelineResult<Playhead> {
        Ok(Playhead {
            reader: open(&self.data)?,
            canvas: vec![0; self.width as usize * self.height as usize * 4],
            next: 0,
            disposal: None,
        })
    }
}

fn for_rows(canvas_width: u32, canvas_height: u32, area: Area, mut f: impl FnMut(usize, usize, usize)) {
    let right = (area.left + area.width).min(canvas_width);
    let bottom = (area.top + area.height).min(canvas_height);
    if area.left >= right {
        return;
    }
    for y in area.top..bottom {
        let dst = ((y * canvas_width + area.left) * 4) as usize;
        let src = (((y - area.top) * area.width) * 4) as usize;
        f(dst, src, ((right - area.left) * 4) as usize);
    }
}

impl fmt::Debug for GifFrames {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GifFrames")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("frames", &self.delays.len())
            .field("loop_count", &self.loop_count)
            .field("playing", &self.playhead.is_some())
            .finish_non_exhaustive()
    }
}

impl FrameDecoder for GifFrames {
    fn frame_count(&self) -> usize {
        self.delays.len()
    }

    fn loop_count(&self) -> i32 {
        self.loop_count
    }

    fn decode_frame(&mut self, index: usize) -> PipelineResult<DecodedFrame> {
        if index >= self.delays.len() {
            return Err(PipelineError::decode(format!(
                "gif frame {index} out of {}",
                self.delays.len()
            )));
        }
        let (width, height) = (self.width, self.height);
        let mut playhead = match self.playhead.take() {
            Some(p) if p.next <= index => p,
            _ => self.rewind()?,
        };
        loop {
            let Playhead {
                reader,
                canvas,
                next,
                disposal,
            } = &mut playhead;
            if let Some(d) = disposal.take() {
                match d.method {
                    DisposalMethod::Background => {
                        for_rows(width, height, d.area, |dst, _, len| {
                            canvas[dst..dst + len].fill(0);
                        });
                    }
                    DisposalMethod::Previous => {
                        if let Some(saved) = d.saved {
                            *canvas = saved;
                        }
                    }
                    _ => {}
                }
            }
            let frame = reader
                .read_next_frame()
                .map_err(gif_err)?
                .ok_or_else(|| PipelineError::decode("gif ended early"))?;
            let area = Area {
                left: u32::from(frame.left),
                top: u32::from(frame.top),
                width: u32::from(frame.width),
                height: u32::from(frame.height),
            };
            let saved = (frame.dispose == DisposalMethod::Previous).then(|| canvas.clone());
            let pixels = &frame.buffer;
            for_rows(width, height, area, |dst, src, len| {
                for (d, s) in canvas[dst..dst + len]
                    .chunks_exact_mut(4)
                    .zip(pixels[src..].chunks_exact(4))
                {
                    // Transparent pixels leave the previous frame visible.
                    if s[3] > 0 {
                        d.copy_from_slice(s);
                    }
                }
            });
            *disposal = Some(Disposal {
                method: frame.dispose,
                area,
                saved,
            });
            let current = *next;
            *next += 1;
            if current == index {
                let image = Image::from_rgba(width, height, canvas)?;
                self.playhead = Some(playhead);
                return Ok(DecodedFrame {
                    image,
                    delay_cs: self.delays[index],
                });
            }
        }
    }
}

#[cfg(test)]
#[path = "../../tests/unit/codec/gif.rs"]
mod tests;
