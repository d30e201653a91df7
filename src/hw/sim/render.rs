use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::time::Duration;

use crate::display::config::DisplayRegion;
use crate::foundation::error::{PipelineError, PipelineResult};
use crate::hw::component::TunnelHandle;
use crate::hw::sim::resize::{SimTunnel, TunnelFrame};
use crate::hw::sim::{Ctx, DisplayEvent, Engine, SimShared, port_def};
use crate::hw::types::{
    BufferFlags, BufferHeader, Event, PortDefinition, PortDirection, PortFormat, PortIndex,
    RawFormat,
};
use crate::raster::buffer::ImageLayout;

const INPUT: PortIndex = PortIndex(90);

pub(super) fn ports() -> (PortIndex, Vec<PortDefinition>) {
    (
        INPUT,
        vec![port_def(INPUT.0, PortDirection::Input, 1, 0, PortFormat::Unset)],
    )
}

/// Shows every picture it receives on the shared virtual display.
#[derive(Default)]
pub(super) struct RenderEngine {
    format: Option<RawFormat>,
    region: Option<DisplayRegion>,
    tunnel: Option<Receiver<TunnelFrame>>,
    held: Vec<BufferHeader>,
    shown: bool,
}

impl RenderEngine {
    fn show_tunneled(&mut self, ctx: &mut Ctx<'_>, frame: TunnelFrame) {
        ctx.display()
            .present(ctx.id, frame.layout, &frame.data, self.region, true);
        self.shown = true;
        if frame.eos && !ctx.shared.silent_eos(ctx.kind) {
            ctx.events.push_back(Event::BufferFlag {
                port: INPUT,
                flags: BufferFlags::EOS,
            });
        }
    }
}

impl Engine for RenderEngine {
    fn validate_port(
        &mut self,
        def: &mut PortDefinition,
        _current: &PortDefinition,
        _shared: &SimShared,
    ) -> PipelineResult<()> {
        let raw = def
            .format
            .raw()
            .ok_or_else(|| PipelineError::parameter("video_render needs a raw format"))?;
        if raw.width == 0 || raw.height == 0 {
            return Err(PipelineError::parameter("render geometry must be non-zero"));
        }
        if (raw.stride as usize) < raw.width as usize * raw.color.bytes_per_pixel() as usize {
            return Err(PipelineError::parameter("render stride too small"));
        }
        def.buffer_size = raw.buffer_len();
        self.format = Some(raw);
        Ok(())
    }

    fn consume(&mut self, ctx: &mut Ctx<'_>, mut header: BufferHeader) {
        let eos = header.is_eos();
        match self.format {
            Some(raw) => {
                ctx.display().present(
                    ctx.id,
                    ImageLayout::from_raw(raw),
                    header.payload(),
                    self.region,
                    false,
                );
                self.shown = true;
            }
            None => ctx
                .events
                .push_back(Event::Error("render port format not set".into())),
        }
        header.filled_len = 0;
        header.flags = BufferFlags::empty();
        if ctx.shared.behavior.hold_render_buffers {
            self.held.push(header);
        } else {
            ctx.events.push_back(Event::EmptyBufferDone(header));
        }
        if eos && !ctx.shared.silent_eos(ctx.kind) {
            ctx.events.push_back(Event::BufferFlag {
                port: INPUT,
                flags: BufferFlags::EOS,
            });
        }
    }

    fn release(&mut self, port: PortIndex) -> Vec<BufferHeader> {
        if port == INPUT {
            std::mem::take(&mut self.held)
        } else {
            Vec::new()
        }
    }

    fn display_region(&mut self, ctx: &mut Ctx<'_>, region: &DisplayRegion) -> PipelineResult<()> {
        if ctx.shared.behavior.reject_display_region {
            return Err(PipelineError::display("video_render rejected the region"));
        }
        self.region = Some(*region);
        ctx.display().record(DisplayEvent::Region {
            component: ctx.id,
            region: *region,
        });
        Ok(())
    }

    fn tunnel_sink(
        &mut self,
        ctx: &mut Ctx<'_>,
        port: PortIndex,
        handle: TunnelHandle,
    ) -> PipelineResult<()> {
        if port != INPUT || ctx.is_enabled(port) {
            return Err(PipelineError::port(format!(
                "video_render port {port} cannot sink a tunnel now"
            )));
        }
        let tunnel = handle
            .downcast::<SimTunnel>()
            .map_err(|_| PipelineError::port("tunnel handle from a different backend"))?;
        self.tunnel = Some(tunnel.0);
        Ok(())
    }

    fn pump(&mut self, ctx: &mut Ctx<'_>, timeout: Duration) -> bool {
        if !ctx.is_enabled(INPUT) {
            return false;
        }
        let Some(rx) = self.tunnel.take() else {
            return false;
        };
        let mut waited = false;
        if timeout.is_zero() {
            while let Ok(frame) = rx.try_recv() {
                self.show_tunneled(ctx, frame);
            }
        } else {
            waited = true;
            match rx.recv_timeout(timeout) {
                Ok(frame) => self.show_tunneled(ctx, frame),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    // Upstream is gone; nothing more can arrive.
                    std::thread::sleep(timeout);
                }
            }
        }
        self.tunnel = Some(rx);
        waited
    }

    fn destroyed(&mut self, shared: &SimShared, id: u32) {
        if self.shown || self.region.is_some() {
            shared.display.record(DisplayEvent::Removed { component: id });
        }
    }
}
