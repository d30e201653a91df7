use std::sync::mpsc::{Receiver, Sender, channel};

use image::imageops::{self, FilterType};

use crate::foundation::core::{ColorFormat, align16};
use crate::foundation::error::{PipelineError, PipelineResult};
use crate::hw::component::TunnelHandle;
use crate::hw::sim::{Ctx, Engine, SimShared, port_def};
use crate::hw::types::{
    BufferFlags, BufferHeader, Event, PortDefinition, PortDirection, PortFormat, PortIndex,
    RawFormat,
};
use crate::raster::buffer::{Image, ImageLayout};

const INPUT: PortIndex = PortIndex(60);
const OUTPUT: PortIndex = PortIndex(61);

pub(super) fn ports() -> (PortIndex, Vec<PortDefinition>) {
    (
        INPUT,
        vec![
            port_def(INPUT.0, PortDirection::Input, 1, 0, PortFormat::Unset),
            port_def(OUTPUT.0, PortDirection::Output, 1, 0, PortFormat::Unset),
        ],
    )
}

/// Picture travelling through a simulated tunnel.
pub(super) struct TunnelFrame {
    pub(super) layout: ImageLayout,
    pub(super) data: Vec<u8>,
    pub(super) eos: bool,
}

/// Receiving end of a simulated tunnel, carried inside a [`TunnelHandle`].
pub(super) struct SimTunnel(pub(super) Receiver<TunnelFrame>);

fn normalized(raw: RawFormat) -> RawFormat {
    RawFormat {
        stride: raw.color.stride_for(raw.width),
        slice_height: align16(raw.height),
        ..raw
    }
}

/// Scales one picture per run with a triangle filter.
#[derive(Default)]
pub(super) struct ResizeEngine {
    input: Option<RawFormat>,
    target: Option<RawFormat>,
    picture: Option<image::RgbaImage>,
    output: Option<BufferHeader>,
    tunnel: Option<Sender<TunnelFrame>>,
    done: bool,
}

impl ResizeEngine {
    fn run(&mut self, ctx: &mut Ctx<'_>) {
        if self.done {
            return;
        }
        let (Some(target), Some(picture)) = (self.target, self.picture.as_ref()) else {
            return;
        };
        let to_tunnel = self.tunnel.is_some() && ctx.is_enabled(OUTPUT);
        if self.output.is_none() && !to_tunnel {
            return;
        }
        let scaled = imageops::resize(picture, target.width, target.height, FilterType::Triangle);
        let image = match Image::from_rgba(target.width, target.height, scaled.as_raw()) {
            Ok(img) => img,
            Err(e) => {
                ctx.events.push_back(Event::Error(e.to_string()));
                return;
            }
        };
        if ctx.shared.silent_eos(ctx.kind) {
            return;
        }
        self.done = true;
        if let Some(mut out) = self.output.take() {
            if !out.load(image.data(), true) {
                ctx.events.push_back(Event::Error(format!(
                    "output buffer of {} bytes cannot hold {} bytes",
                    out.capacity(),
                    image.byte_len()
                )));
                self.output = Some(out);
                self.done = false;
                return;
            }
            ctx.events.push_back(Event::FillBufferDone(out));
            ctx.events.push_back(Event::BufferFlag {
                port: OUTPUT,
                flags: BufferFlags::EOS,
            });
        } else if let Some(tx) = &self.tunnel {
            let (layout, data) = image.into_parts();
            if tx.send(TunnelFrame { layout, data, eos: true }).is_err() {
                ctx.events
                    .push_back(Event::Error("tunnel sink went away".into()));
            }
        }
    }
}

impl Engine for ResizeEngine {
    fn validate_port(
        &mut self,
        def: &mut PortDefinition,
        _current: &PortDefinition,
        _shared: &SimShared,
    ) -> PipelineResult<()> {
        let raw = def.format.raw().ok_or_else(|| {
            PipelineError::parameter(format!("resize port {} needs a raw format", def.index))
        })?;
        if raw.width == 0 || raw.height == 0 {
            return Err(PipelineError::parameter("resize geometry must be non-zero"));
        }
        if def.index == INPUT {
            if !matches!(raw.color, ColorFormat::Rgba32 | ColorFormat::Rgb24) {
                return Err(PipelineError::parameter(format!(
                    "resize cannot read {:?}",
                    raw.color
                )));
            }
            if (raw.stride as usize) < raw.width as usize * raw.color.bytes_per_pixel() as usize
                || raw.slice_height < raw.height
            {
                return Err(PipelineError::parameter("input stride or slice height too small"));
            }
            def.buffer_size = raw.buffer_len();
            self.input = Some(raw);
        } else {
            if raw.color != ColorFormat::Rgba32 {
                return Err(PipelineError::parameter(format!(
                    "resize cannot write {:?}",
                    raw.color
                )));
            }
            let raw = normalized(raw);
            def.format = PortFormat::Raw(raw);
            def.buffer_size = raw.buffer_len();
            self.target = Some(raw);
        }
        Ok(())
    }

    fn consume(&mut self, ctx: &mut Ctx<'_>, mut header: BufferHeader) {
        let picture = self.input.and_then(|raw| {
            let layout = ImageLayout::from_raw(raw);
            let bytes = header.payload().get(..layout.byte_len())?.to_vec();
            Image::from_parts(layout, bytes).ok()?.to_rgba()
        });
        header.filled_len = 0;
        header.flags = BufferFlags::empty();
        ctx.events.push_back(Event::EmptyBufferDone(header));
        let Some(picture) = picture else {
            ctx.events
                .push_back(Event::Error("input picture does not match port format".into()));
            return;
        };
        let natural = normalized(RawFormat {
            width: picture.width(),
            height: picture.height(),
            stride: 0,
            slice_height: 0,
            color: ColorFormat::Rgba32,
        });
        self.picture = Some(picture);
        if let Some(def) = ctx.port_mut(OUTPUT)
            && def.format == PortFormat::Unset
        {
            def.format = PortFormat::Raw(natural);
            def.buffer_size = natural.buffer_len();
        }
        if !ctx.shared.silent_settings(ctx.kind) {
            ctx.events.push_back(Event::PortSettingsChanged(OUTPUT));
        }
        self.run(ctx);
    }

    fn produce(&mut self, ctx: &mut Ctx<'_>, header: BufferHeader) {
        self.output = Some(header);
        self.run(ctx);
    }

    fn port_enabled(&mut self, ctx: &mut Ctx<'_>, port: PortIndex) {
        if port == OUTPUT {
            self.run(ctx);
        }
    }

    fn release(&mut self, port: PortIndex) -> Vec<BufferHeader> {
        if port == OUTPUT {
            self.output.take().into_iter().collect()
        } else {
            Vec::new()
        }
    }

    fn tunnel_source(&mut self, ctx: &mut Ctx<'_>, port: PortIndex) -> PipelineResult<TunnelHandle> {
        if port != OUTPUT || ctx.is_enabled(port) {
            return Err(PipelineError::port(format!(
                "resize port {port} cannot source a tunnel now"
            )));
        }
        let (tx, rx) = channel();
        self.tunnel = Some(tx);
        Ok(TunnelHandle::new(SimTunnel(rx)))
    }
}
