use std::fmt;
use std::io::{self, BufRead};

use serde::{Deserialize, Serialize};

use crate::foundation::core::ColorFormat;

/// Kind of hardware media component.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComponentKind {
    ImageDecode,
    Resize,
    Render,
}

impl fmt::Display for ComponentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::ImageDecode => "image_decode",
            Self::Resize => "resize",
            Self::Render => "video_render",
        })
    }
}

/// Component lifecycle state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ComponentState {
    Loaded,
    Idle,
    Executing,
}

impl ComponentState {
    /// True when `self -> target` is a single legal lifecycle step.
    pub fn can_step_to(self, target: ComponentState) -> bool {
        use ComponentState::*;
        matches!(
            (self, target),
            (Loaded, Idle) | (Idle, Executing) | (Executing, Idle) | (Idle, Loaded)
        )
    }
}

/// Global port number of a component.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PortIndex(pub u32);

impl fmt::Display for PortIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Data direction of a port, seen from the component.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PortDirection {
    Input,
    Output,
}

/// Compressed encodings known to the pipeline.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Encoding {
    Jpeg,
    Png,
    Gif,
    Bmp,
    Tiff,
    WebP,
}

impl fmt::Display for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Jpeg => "jpeg",
            Self::Png => "png",
            Self::Gif => "gif",
            Self::Bmp => "bmp",
            Self::Tiff => "tiff",
            Self::WebP => "webp",
        })
    }
}

/// Raw raster geometry carried on a port.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RawFormat {
    pub width: u32,
    pub height: u32,
    pub stride: u32,
    pub slice_height: u32,
    pub color: ColorFormat,
}

impl RawFormat {
    /// Bytes needed for one picture in this format.
    pub fn buffer_len(&self) -> usize {
        self.color.buffer_len(self.stride, self.slice_height)
    }
}

/// What a port carries.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PortFormat {
    Unset,
    Encoded(Encoding),
    Raw(RawFormat),
}

impl PortFormat {
    /// Raw geometry, if the port carries raw pictures.
    pub fn raw(&self) -> Option<RawFormat> {
        match self {
            Self::Raw(r) => Some(*r),
            _ => None,
        }
    }
}

/// Port parameters as negotiated with the component.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PortDefinition {
    pub index: PortIndex,
    pub direction: PortDirection,
    pub enabled: bool,
    pub buffer_count_min: u32,
    pub buffer_count_actual: u32,
    pub buffer_size: usize,
    pub format: PortFormat,
}

/// Identifier of a buffer registered with a session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferId(pub u32);

bitflags::bitflags! {
    /// Per-buffer flags.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct BufferFlags: u32 {
        const EOS = 0x01;
    }
}

/// One transferable buffer and its metadata.
///
/// Headers are move-only: whoever holds the value owns the bytes. The host hands a header to the
/// component by submitting it and gets it back only through a buffer-done event.
#[derive(Debug)]
pub struct BufferHeader {
    id: BufferId,
    port: PortIndex,
    data: Vec<u8>,
    pub filled_len: usize,
    pub offset: usize,
    pub flags: BufferFlags,
}

impl BufferHeader {
    /// Wrap `data` as buffer `id` of `port`.
    pub fn new(id: BufferId, port: PortIndex, data: Vec<u8>) -> Self {
        Self {
            id,
            port,
            data,
            filled_len: 0,
            offset: 0,
            flags: BufferFlags::empty(),
        }
    }

    /// Buffer identifier.
    pub fn id(&self) -> BufferId {
        self.id
    }

    /// Port the buffer belongs to.
    pub fn port(&self) -> PortIndex {
        self.port
    }

    /// Allocated length.
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Whole allocation.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Valid bytes.
    pub fn payload(&self) -> &[u8] {
        let end = self.offset.saturating_add(self.filled_len).min(self.data.len());
        &self.data[self.offset.min(end)..end]
    }

    /// True when the end-of-stream flag is set.
    pub fn is_eos(&self) -> bool {
        self.flags.contains(BufferFlags::EOS)
    }

    /// Copy `bytes` to the start of the buffer and mark them valid.
    pub fn load(&mut self, bytes: &[u8], eos: bool) -> bool {
        if bytes.len() > self.data.len() {
            return false;
        }
        self.data[..bytes.len()].copy_from_slice(bytes);
        self.offset = 0;
        self.filled_len = bytes.len();
        self.flags.set(BufferFlags::EOS, eos);
        true
    }

    /// Fill the buffer from `src`. Sets end-of-stream and returns `true` when `src` is exhausted.
    pub fn fill_from(&mut self, src: &mut dyn BufRead) -> io::Result<bool> {
        let mut n = 0;
        while n < self.data.len() {
            match src.read(&mut self.data[n..]) {
                Ok(0) => break,
                Ok(k) => n += k,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        let exhausted = n < self.data.len() || src.fill_buf()?.is_empty();
        self.offset = 0;
        self.filled_len = n;
        self.flags.set(BufferFlags::EOS, exhausted);
        Ok(exhausted)
    }

    /// Give up the allocation.
    pub fn into_data(self) -> Vec<u8> {
        self.data
    }
}

/// Asynchronous command sent to a component.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Command {
    StateSet(ComponentState),
    PortEnable(PortIndex),
    PortDisable(PortIndex),
    Flush(PortIndex),
}

/// Notification raised by a component.
#[derive(Debug)]
pub enum Event {
    CommandComplete(Command),
    PortSettingsChanged(PortIndex),
    BufferFlag {
        port: PortIndex,
        flags: BufferFlags,
    },
    EmptyBufferDone(BufferHeader),
    FillBufferDone(BufferHeader),
    Error(String),
}

/// Awaitable event kinds, as seen by a session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EventKind {
    StateSet(ComponentState),
    PortEnabled,
    PortDisabled,
    Flushed,
    PortSettingsChanged,
    EndOfStream,
    BufferReturned,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::StateSet(s) => write!(f, "state {s:?}"),
            Self::PortEnabled => f.write_str("port enable"),
            Self::PortDisabled => f.write_str("port disable"),
            Self::Flushed => f.write_str("flush"),
            Self::PortSettingsChanged => f.write_str("port settings changed"),
            Self::EndOfStream => f.write_str("end of stream"),
            Self::BufferReturned => f.write_str("buffer return"),
        }
    }
}

impl Command {
    /// Event kind and port that acknowledge this command.
    pub fn completion(self) -> (EventKind, Option<PortIndex>) {
        match self {
            Self::StateSet(s) => (EventKind::StateSet(s), None),
            Self::PortEnable(p) => (EventKind::PortEnabled, Some(p)),
            Self::PortDisable(p) => (EventKind::PortDisabled, Some(p)),
            Self::Flush(p) => (EventKind::Flushed, Some(p)),
        }
    }
}

#[cfg(test)]
#[path = "../../tests/unit/hw/types.rs"]
mod tests;
