use std::collections::VecDeque;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::foundation::error::{PipelineError, PipelineResult};
use crate::raster::buffer::{Image, ImageLayout};

/// Frame delays below this many centiseconds are not honoured as given.
pub const MIN_FRAME_DELAY_CS: u32 = 2;
/// Delay used instead of a delay below [`MIN_FRAME_DELAY_CS`].
pub const BUMPED_FRAME_DELAY_CS: u32 = 10;

/// Replace near-zero frame delays with [`BUMPED_FRAME_DELAY_CS`].
pub fn clamp_delay_cs(cs: u32) -> u32 {
    if cs < MIN_FRAME_DELAY_CS {
        BUMPED_FRAME_DELAY_CS
    } else {
        cs
    }
}

/// Display duration of a frame with a delay of `cs` centiseconds, after clamping.
pub fn frame_delay(cs: u32) -> Duration {
    Duration::from_millis(u64::from(clamp_delay_cs(cs)) * 10)
}

/// One full-canvas frame of an animation.
#[derive(Debug)]
pub struct DecodedFrame {
    pub image: Image,
    pub delay_cs: u32,
}

/// Produces frames of an animated asset. Implemented by the codec layer.
pub trait FrameDecoder: Send {
    /// Number of frames in one cycle.
    fn frame_count(&self) -> usize;
    /// Number of cycles to play; `<= 0` plays forever.
    fn loop_count(&self) -> i32;
    /// Decode frame `index` composited onto the full canvas.
    fn decode_frame(&mut self, index: usize) -> PipelineResult<DecodedFrame>;
}

/// How frames of an animation are kept in memory.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DecodeMode {
    PreDecoded,
    OnDemand {
        decode_ahead: usize,
    },
}

impl Default for DecodeMode {
    fn default() -> Self {
        Self::OnDemand { decode_ahead: 2 }
    }
}

struct Stream {
    decoder: Box<dyn FrameDecoder>,
    current: DecodedFrame,
    ahead: VecDeque<(usize, DecodedFrame)>,
    depth: usize,
}

enum Frames {
    Resident(Vec<DecodedFrame>),
    Streamed(Stream),
}

/// Sequence of equally sized frames with per-frame delays and a loop count.
pub struct AnimationImage {
    frames: Frames,
    layout: ImageLayout,
    index: usize,
    count: usize,
    loop_count: i32,
}

fn check_layout(expected: ImageLayout, index: usize, frame: &DecodedFrame) -> PipelineResult<()> {
    if frame.image.layout() != expected {
        return Err(PipelineError::decode(format!(
            "frame {index} is {}x{}, canvas is {}x{}",
            frame.image.width(),
            frame.image.height(),
            expected.width,
            expected.height
        )));
    }
    Ok(())
}

impl Stream {
    fn refill(&mut self, index: usize, count: usize, layout: ImageLayout) -> PipelineResult<()> {
        let last = self.ahead.back().map(|(i, _)| *i).unwrap_or(index);
        let mut next = (last + 1) % count;
        while self.ahead.len() < self.depth && next != index {
            let frame = self.decoder.decode_frame(next)?;
            check_layout(layout, next, &frame)?;
            self.ahead.push_back((next, frame));
            next = (next + 1) % count;
        }
        Ok(())
    }
}

impl AnimationImage {
    /// Animation over already decoded frames.
    pub fn from_frames(frames: Vec<DecodedFrame>, loop_count: i32) -> PipelineResult<Self> {
        let first = frames
            .first()
            .ok_or_else(|| PipelineError::decode("animation has no frames"))?;
        let layout = first.image.layout();
        for (i, f) in frames.iter().enumerate() {
            check_layout(layout, i, f)?;
        }
        Ok(Self {
            count: frames.len(),
            frames: Frames::Resident(frames),
            layout,
            index: 0,
            loop_count,
        })
    }

    /// Animation fed by `decoder`.
    pub fn from_decoder(mut decoder: Box<dyn FrameDecoder>, mode: DecodeMode) -> PipelineResult<Self> {
        let count = decoder.frame_count();
        if count == 0 {
            return Err(PipelineError::decode("animation has no frames"));
        }
        let loop_count = decoder.loop_count();
        match mode {
            DecodeMode::PreDecoded => {
                let frames = (0..count)
                    .map(|i| decoder.decode_frame(i))
                    .collect::<PipelineResult<Vec<_>>>()?;
                Self::from_frames(frames, loop_count)
            }
            DecodeMode::OnDemand { decode_ahead } => {
                let current = decoder.decode_frame(0)?;
                let layout = current.image.layout();
                let mut stream = Stream {
                    decoder,
                    current,
                    ahead: VecDeque::new(),
                    depth: decode_ahead.min(count - 1),
                };
                stream.refill(0, count, layout)?;
                Ok(Self {
                    frames: Frames::Streamed(stream),
                    layout,
                    index: 0,
                    count,
                    loop_count,
                })
            }
        }
    }

    /// Frames per cycle.
    pub fn frame_count(&self) -> usize {
        self.count
    }

    /// Cycles to play; `<= 0` plays forever.
    pub fn loop_count(&self) -> i32 {
        self.loop_count
    }

    /// Geometry shared by every frame.
    pub fn layout(&self) -> ImageLayout {
        self.layout
    }

    /// Index of the current frame.
    pub fn current_index(&self) -> usize {
        self.index
    }

    fn current_frame(&self) -> &DecodedFrame {
        match &self.frames {
            Frames::Resident(v) => &v[self.index],
            Frames::Streamed(s) => &s.current,
        }
    }

    /// Current frame.
    pub fn current(&self) -> &Image {
        &self.current_frame().image
    }

    /// Display duration of the current frame, clamped.
    pub fn current_delay(&self) -> Duration {
        frame_delay(self.current_frame().delay_cs)
    }

    /// Frames held in memory right now.
    pub fn resident_frames(&self) -> usize {
        match &self.frames {
            Frames::Resident(v) => v.len(),
            Frames::Streamed(s) => 1 + s.ahead.len(),
        }
    }

    /// Move to the next frame, wrapping at the end of a cycle. Returns the new index.
    pub fn advance(&mut self) -> PipelineResult<usize> {
        let next = (self.index + 1) % self.count;
        if let Frames::Streamed(s) = &mut self.frames
            && next != self.index
        {
            let frame = match s.ahead.pop_front() {
                Some((i, f)) if i == next => f,
                _ => {
                    s.ahead.clear();
                    let f = s.decoder.decode_frame(next)?;
                    check_layout(self.layout, next, &f)?;
                    f
                }
            };
            s.current = frame;
            s.refill(next, self.count, self.layout)?;
        }
        self.index = next;
        Ok(next)
    }
}

impl fmt::Debug for AnimationImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnimationImage")
            .field("layout", &self.layout)
            .field("index", &self.index)
            .field("count", &self.count)
            .field("loop_count", &self.loop_count)
            .field("resident", &self.resident_frames())
            .finish()
    }
}

#[cfg(test)]
#[path = "../../tests/unit/raster/animation.rs"]
mod tests;
