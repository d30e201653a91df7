use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::display::fit::{FitPolicy, fit_geometry};
use crate::foundation::core::{ColorFormat, Size, align16};
use crate::foundation::error::{PipelineError, PipelineResult};
use crate::hw::component::{HardwareBackend, Refused};
use crate::hw::session::{ComponentSession, DEFAULT_EVENT_TIMEOUT, SessionOpts};
use crate::hw::types::{
    BufferFlags, BufferId, ComponentKind, ComponentState, EventKind, PortFormat, PortIndex,
    RawFormat,
};
use crate::raster::buffer::{Image, ImageLayout};

/// Output geometry requested from the resizer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResizeTarget {
    /// Exactly this size.
    Exact(Size),
    /// Scale into `bounds` under `policy`.
    Fit {
        /// Bounding box.
        bounds: Size,
        /// Aspect and centering policy.
        policy: FitPolicy,
    },
}

impl ResizeTarget {
    /// Concrete output size for a picture of size `src`.
    pub fn resolve(&self, src: Size) -> Size {
        match *self {
            Self::Exact(size) => size,
            Self::Fit { bounds, policy } => fit_geometry(src, bounds, policy),
        }
    }
}

/// A failed resize, carrying back the input when it survived.
#[derive(Debug, thiserror::Error)]
#[error("resize failed: {error}")]
pub struct ResizeFailure {
    /// What went wrong.
    #[source]
    pub error: PipelineError,
    /// The untouched input picture, when its memory could be recovered.
    pub input: Option<Image>,
}

impl ResizeFailure {
    fn new(error: PipelineError, input: Option<Image>) -> Self {
        Self { error, input }
    }
}

impl From<ResizeFailure> for PipelineError {
    fn from(f: ResizeFailure) -> Self {
        f.error
    }
}

/// Tunables for [`ResizeStage`].
#[derive(Clone, Copy, Debug)]
pub struct ResizeOpts {
    /// Maximum wait for any single hardware event.
    pub timeout: Duration,
}

impl Default for ResizeOpts {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_EVENT_TIMEOUT,
        }
    }
}

/// Scales one raster per call through the hardware resizer.
pub struct ResizeStage {
    backend: Arc<dyn HardwareBackend>,
    opts: ResizeOpts,
}

/// RGBA output format for a `size` picture.
pub(crate) fn target_format(size: Size) -> RawFormat {
    RawFormat {
        width: size.width,
        height: size.height,
        stride: ColorFormat::Rgba32.stride_for(size.width),
        slice_height: align16(size.height),
        color: ColorFormat::Rgba32,
    }
}

/// Lend the input port `data` and queue it as one complete picture.
pub(crate) fn submit_picture(
    s: &mut ComponentSession,
    port: PortIndex,
    data: Vec<u8>,
) -> Result<BufferId, Refused<Vec<u8>>> {
    let id = s.import_buffer(port, data)?;
    let queued = s.buffer_mut(id).map(|h| {
        h.offset = 0;
        h.filled_len = h.capacity();
        h.flags = BufferFlags::EOS;
    });
    if let Err(error) = queued.and_then(|_| s.submit_for_consumption(id)) {
        return match s.free_buffer(id) {
            Ok(value) => Err(Refused::new(error, value)),
            Err(_) => Err(Refused::new(error, Vec::new())),
        };
    }
    Ok(id)
}

impl ResizeStage {
    /// Resizer on `backend`.
    pub fn new(backend: Arc<dyn HardwareBackend>, opts: ResizeOpts) -> Self {
        Self { backend, opts }
    }

    /// Scale `input` to `target`. The input is consumed on success.
    #[tracing::instrument(skip(self, input), fields(width = input.width(), height = input.height()))]
    pub fn resize(&self, input: Image, target: ResizeTarget) -> Result<Image, ResizeFailure> {
        let size = target.resolve(input.size());
        if size.is_empty() {
            return Err(ResizeFailure::new(
                PipelineError::parameter(format!("cannot resize to {size}")),
                Some(input),
            ));
        }
        let session = match ComponentSession::create(
            self.backend.as_ref(),
            ComponentKind::Resize,
            SessionOpts {
                timeout: self.opts.timeout,
            },
        ) {
            Ok(s) => s,
            Err(e) => return Err(ResizeFailure::new(e, Some(input))),
        };
        let layout = input.layout();
        let (mut session, (inp, out)) = match session.setup(|s| {
            let inp = s.expect_ports(2)?;
            s.configure_port(inp, |d| d.format = PortFormat::Raw(layout.raw_format()))?;
            s.set_port_enabled(inp, true)?;
            s.change_state(ComponentState::Idle)?;
            s.change_state(ComponentState::Executing)?;
            Ok((inp, PortIndex(inp.0 + 1)))
        }) {
            Ok(v) => v,
            Err(e) => return Err(ResizeFailure::new(e, Some(input))),
        };

        let (_, data) = input.into_parts();
        let in_id = match submit_picture(&mut session, inp, data) {
            Ok(id) => id,
            Err(Refused { error, value }) => {
                let input = Image::from_parts(layout, value).ok();
                log_unclean(session.teardown().report.flags().bits());
                return Err(ResizeFailure::new(error, input));
            }
        };

        let run = produce(&mut session, out, size);
        let mut teardown = session.teardown();
        let recovered = teardown
            .reclaimed
            .remove(&in_id)
            .and_then(|d| Image::from_parts(layout, d).ok());
        let (out_id, out_layout) = match run {
            Ok(v) => v,
            Err(e) => {
                log_unclean(teardown.report.flags().bits());
                return Err(ResizeFailure::new(e, recovered));
            }
        };
        if let Err(e) = teardown.report.into_result() {
            return Err(ResizeFailure::new(e, recovered));
        }
        let resized = teardown
            .reclaimed
            .remove(&out_id)
            .ok_or_else(|| PipelineError::allocation("resize output buffer was not reclaimed"))
            .and_then(|d| Image::from_parts(out_layout, d));
        match resized {
            Ok(img) => {
                debug!(width = img.width(), height = img.height(), "resize complete");
                Ok(img)
            }
            Err(e) => Err(ResizeFailure::new(e, recovered)),
        }
    }
}

fn log_unclean(flags: u8) {
    if flags != 0 {
        warn!(flags, "resizer teardown after failure was unclean");
    }
}

fn produce(
    s: &mut ComponentSession,
    out: PortIndex,
    size: Size,
) -> PipelineResult<(BufferId, ImageLayout)> {
    s.wait_for_event(EventKind::PortSettingsChanged, Some(out))?;
    let def = s.configure_port(out, |d| d.format = PortFormat::Raw(target_format(size)))?;
    let raw = def
        .format
        .raw()
        .ok_or_else(|| PipelineError::port("resizer dropped the output format"))?;
    s.set_port_enabled(out, true)?;
    let id = s
        .allocate_buffers(out, 1, def.buffer_size)?
        .into_iter()
        .next()
        .ok_or_else(|| PipelineError::allocation("resizer returned no output buffer"))?;
    s.submit_for_production(id)?;
    s.wait_for_event(EventKind::EndOfStream, Some(out))?;
    s.reclaim(id)?;
    Ok((id, ImageLayout::from_raw(raw)))
}

#[cfg(test)]
#[path = "../../tests/unit/stage/resize.rs"]
mod tests;
