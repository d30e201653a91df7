use std::io::Cursor;

use crate::foundation::core::ColorFormat;
use crate::foundation::error::{PipelineError, PipelineResult};
use crate::hw::sim::{Ctx, Engine, SimBehavior, SimShared, port_def};
use crate::hw::types::{
    BufferFlags, BufferHeader, Encoding, Event, PortDefinition, PortDirection, PortFormat,
    PortIndex,
};
use crate::raster::buffer::{Image, ImageLayout};

const INPUT: PortIndex = PortIndex(320);
const OUTPUT: PortIndex = PortIndex(321);

pub(super) fn ports(behavior: &SimBehavior) -> (PortIndex, Vec<PortDefinition>) {
    (
        INPUT,
        vec![
            port_def(
                INPUT.0,
                PortDirection::Input,
                2,
                behavior.input_buffer_size,
                PortFormat::Encoded(Encoding::Jpeg),
            ),
            port_def(OUTPUT.0, PortDirection::Output, 1, 0, PortFormat::Unset),
        ],
    )
}

/// Accumulates the bitstream, announces geometry once the header parses, decodes on EOS.
#[derive(Default)]
pub(super) struct DecodeEngine {
    stream: Vec<u8>,
    input_done: bool,
    layout: Option<ImageLayout>,
    output: Option<BufferHeader>,
    finished: bool,
}

impl DecodeEngine {
    fn probe(&mut self, ctx: &mut Ctx<'_>) {
        if self.layout.is_some() {
            return;
        }
        let dims = image::ImageReader::new(Cursor::new(&self.stream))
            .with_guessed_format()
            .ok()
            .and_then(|r| r.into_dimensions().ok());
        match dims {
            Some((w, h)) => {
                let layout = ImageLayout::aligned(w, h, ColorFormat::Rgba32);
                self.layout = Some(layout);
                if let Some(def) = ctx.port_mut(OUTPUT) {
                    def.format = PortFormat::Raw(layout.raw_format());
                    def.buffer_size = layout.byte_len();
                }
                if !ctx.shared.silent_settings(ctx.kind) {
                    ctx.events.push_back(Event::PortSettingsChanged(OUTPUT));
                }
            }
            None if self.input_done => {
                ctx.events
                    .push_back(Event::Error("bitstream header could not be parsed".into()));
            }
            None => {}
        }
    }

    fn finish(&mut self, ctx: &mut Ctx<'_>) {
        if self.finished || !self.input_done {
            return;
        }
        let Some(layout) = self.layout else { return };
        let Some(mut out) = self.output.take() else {
            return;
        };
        let decoded = image::load_from_memory(&self.stream)
            .map_err(|e| PipelineError::decode(e.to_string()))
            .and_then(|img| {
                let rgba = img.to_rgba8();
                Image::from_rgba(rgba.width(), rgba.height(), rgba.as_raw())
            });
        let image = match decoded {
            Ok(img) if img.layout() == layout => img,
            Ok(_) => {
                ctx.events
                    .push_back(Event::Error("decoded geometry changed mid-stream".into()));
                self.output = Some(out);
                return;
            }
            Err(e) => {
                ctx.events.push_back(Event::Error(e.to_string()));
                self.output = Some(out);
                return;
            }
        };
        if !out.load(image.data(), true) {
            ctx.events.push_back(Event::Error(format!(
                "output buffer of {} bytes cannot hold {} bytes",
                out.capacity(),
                image.byte_len()
            )));
            self.output = Some(out);
            return;
        }
        self.finished = true;
        if ctx.shared.silent_eos(ctx.kind) {
            self.output = Some(out);
            return;
        }
        ctx.events.push_back(Event::FillBufferDone(out));
        ctx.events.push_back(Event::BufferFlag {
            port: OUTPUT,
            flags: BufferFlags::EOS,
        });
    }
}

impl Engine for DecodeEngine {
    fn validate_port(
        &mut self,
        def: &mut PortDefinition,
        current: &PortDefinition,
        shared: &SimShared,
    ) -> PipelineResult<()> {
        if def.index == INPUT {
            match def.format {
                PortFormat::Encoded(e) if shared.behavior.hardware_decode.contains(&e) => {}
                other => {
                    return Err(PipelineError::parameter(format!(
                        "image_decode cannot take {other:?}"
                    )));
                }
            }
            def.buffer_size = current.buffer_size;
        } else {
            // Output geometry is dictated by the bitstream.
            def.format = current.format;
            def.buffer_size = current.buffer_size;
        }
        Ok(())
    }

    fn consume(&mut self, ctx: &mut Ctx<'_>, mut header: BufferHeader) {
        if !self.finished {
            self.stream.extend_from_slice(header.payload());
            self.input_done |= header.is_eos();
        }
        header.filled_len = 0;
        header.flags = BufferFlags::empty();
        ctx.events.push_back(Event::EmptyBufferDone(header));
        self.probe(ctx);
        self.finish(ctx);
    }

    fn produce(&mut self, ctx: &mut Ctx<'_>, header: BufferHeader) {
        self.output = Some(header);
        self.finish(ctx);
    }

    fn release(&mut self, port: PortIndex) -> Vec<BufferHeader> {
        if port == OUTPUT {
            self.output.take().into_iter().collect()
        } else {
            Vec::new()
        }
    }
}
