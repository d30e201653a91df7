use std::io::BufRead;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::foundation::error::{PipelineError, PipelineResult};
use crate::hw::component::HardwareBackend;
use crate::hw::session::{ComponentSession, DEFAULT_EVENT_TIMEOUT, SessionOpts};
use crate::hw::types::{
    BufferId, ComponentKind, ComponentState, Encoding, EventKind, PortFormat, PortIndex,
};
use crate::raster::buffer::{Image, ImageLayout};

/// Tunables for [`DecodeStage`].
#[derive(Clone, Copy, Debug)]
pub struct DecodeOpts {
    /// Maximum wait for any single hardware event.
    pub timeout: Duration,
    /// Input buffers cycled through the decoder.
    pub input_buffers: u32,
}

impl Default for DecodeOpts {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_EVENT_TIMEOUT,
            input_buffers: 3,
        }
    }
}

/// Streams an encoded still into the hardware decoder and returns the raster it produces.
pub struct DecodeStage {
    backend: Arc<dyn HardwareBackend>,
    opts: DecodeOpts,
}

struct Ports {
    input: PortIndex,
    output: PortIndex,
}

struct Output {
    id: BufferId,
    layout: ImageLayout,
}

impl DecodeStage {
    /// Decoder on `backend`.
    pub fn new(backend: Arc<dyn HardwareBackend>, opts: DecodeOpts) -> Self {
        Self { backend, opts }
    }

    /// Whether the backend decodes `encoding` in hardware.
    pub fn supports(&self, encoding: Encoding) -> bool {
        self.backend.supports_decode(encoding)
    }

    /// Decode the whole of `source`, which holds one `encoding` bitstream.
    ///
    /// The component is torn down before returning, on success and on failure.
    #[tracing::instrument(skip(self, source))]
    pub fn decode(&self, source: &mut dyn BufRead, encoding: Encoding) -> PipelineResult<Image> {
        if self.opts.input_buffers == 0 {
            return Err(PipelineError::parameter("decoder needs at least one input buffer"));
        }
        let session = ComponentSession::create(
            self.backend.as_ref(),
            ComponentKind::ImageDecode,
            SessionOpts {
                timeout: self.opts.timeout,
            },
        )?;
        let (mut session, ports) =
            session.setup(|s| prepare(s, encoding, self.opts.input_buffers))?;

        let run = feed(&mut session, &ports, source);
        let mut teardown = session.teardown();
        let output = match run {
            Ok(output) => output,
            Err(e) => {
                if !teardown.report.is_empty() {
                    warn!(
                        flags = teardown.report.flags().bits(),
                        "decoder teardown after failure was unclean"
                    );
                }
                return Err(e);
            }
        };
        teardown.report.into_result()?;
        let data = teardown.reclaimed.remove(&output.id).ok_or_else(|| {
            PipelineError::allocation("decoder output buffer was not reclaimed")
        })?;
        let image = Image::from_parts(output.layout, data)?;
        info!(
            width = image.width(),
            height = image.height(),
            "hardware decode complete"
        );
        Ok(image)
    }
}

fn prepare(s: &mut ComponentSession, encoding: Encoding, buffers: u32) -> PipelineResult<Ports> {
    let input = s.expect_ports(2)?;
    let output = PortIndex(input.0 + 1);
    let def = s.configure_port(input, |d| {
        d.format = PortFormat::Encoded(encoding);
        d.buffer_count_actual = buffers.max(d.buffer_count_min);
    })?;
    s.set_port_enabled(input, true)?;
    s.allocate_buffers(input, def.buffer_count_actual, def.buffer_size)?;
    s.change_state(ComponentState::Idle)?;
    s.change_state(ComponentState::Executing)?;
    Ok(Ports { input, output })
}

/// Enable the output port with a buffer sized as the decoder announced and queue it.
fn bind_output(s: &mut ComponentSession, port: PortIndex) -> PipelineResult<Output> {
    let def = s.port_definition(port)?;
    let raw = def.format.raw().ok_or_else(|| {
        PipelineError::port(format!("decoder announced port {port} without a raster format"))
    })?;
    let layout = ImageLayout::from_raw(raw);
    if def.buffer_size < layout.byte_len() {
        return Err(PipelineError::port(format!(
            "decoder output buffer of {} bytes cannot hold {}x{}",
            def.buffer_size, raw.width, raw.height
        )));
    }
    debug!(width = raw.width, height = raw.height, "decoder geometry known");
    s.set_port_enabled(port, true)?;
    let mut data = Vec::new();
    data.try_reserve_exact(def.buffer_size).map_err(|e| {
        PipelineError::allocation(format!("decoder output of {} bytes: {e}", def.buffer_size))
    })?;
    data.resize(def.buffer_size, 0);
    let id = s.import_buffer(port, data).map_err(|r| r.error)?;
    s.submit_for_production(id)?;
    Ok(Output { id, layout })
}

fn feed(
    s: &mut ComponentSession,
    ports: &Ports,
    source: &mut dyn BufRead,
) -> PipelineResult<Output> {
    let mut output: Option<Output> = None;
    let mut finished = false;
    let mut chunks = 0u32;
    loop {
        if output.is_none() && s.take_event(EventKind::PortSettingsChanged, Some(ports.output))? {
            output = Some(bind_output(s, ports.output)?);
        }
        let id = match s.idle_buffer(ports.input) {
            Some(id) => id,
            None => {
                // The decoder may hold every input buffer until it gets somewhere to write.
                let mut wanted = vec![(EventKind::BufferReturned, Some(ports.input))];
                if output.is_none() {
                    wanted.push((EventKind::PortSettingsChanged, Some(ports.output)));
                }
                if let (EventKind::PortSettingsChanged, _) = s.wait_for_any(&wanted)? {
                    output = Some(bind_output(s, ports.output)?);
                }
                continue;
            }
        };
        let header = s.buffer_mut(id)?;
        let eos = header
            .fill_from(source)
            .map_err(|e| PipelineError::read(format!("encoded stream: {e}")))?;
        s.submit_for_consumption(id)?;
        chunks += 1;
        if eos {
            break;
        }
        if output.is_some() && s.take_event(EventKind::EndOfStream, Some(ports.output))? {
            finished = true;
            break;
        }
    }
    debug!(chunks, "encoded stream submitted");

    let output = match output {
        Some(o) => o,
        None => {
            s.wait_for_event(EventKind::PortSettingsChanged, Some(ports.output))?;
            bind_output(s, ports.output)?
        }
    };
    if !finished {
        s.wait_for_event(EventKind::EndOfStream, Some(ports.output))?;
    }
    s.reclaim(output.id)?;
    Ok(output)
}

#[cfg(test)]
#[path = "../../tests/unit/stage/decode.rs"]
mod tests;
