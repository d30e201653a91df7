use std::borrow::Cow;
use std::io::Cursor;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::codec::probe::HeaderInfo;
use crate::codec::software::Codec;
use crate::display::config::DisplayConfig;
use crate::display::fit::plan_resize;
use crate::foundation::core::Size;
use crate::foundation::error::{PipelineError, PipelineResult};
use crate::hw::component::HardwareBackend;
use crate::hw::types::Encoding;
use crate::raster::LoadedAsset;
use crate::stage::decode::{DecodeOpts, DecodeStage};
use crate::stage::render::{RenderOpts, RenderStage};
use crate::stage::resize::{ResizeOpts, ResizeStage, ResizeTarget};
use crate::viewer::config::ViewerConfig;

/// Where an encoded asset comes from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AssetSource {
    Path(PathBuf),
    Bytes {
        name: String,
        data: Vec<u8>,
    },
}

impl AssetSource {
    /// Label used in logs.
    pub fn name(&self) -> Cow<'_, str> {
        match self {
            Self::Path(p) => p.to_string_lossy(),
            Self::Bytes { name, .. } => Cow::Borrowed(name),
        }
    }

    fn read(&self) -> PipelineResult<Cow<'_, [u8]>> {
        match self {
            Self::Path(p) => std::fs::read(p)
                .map(Cow::Owned)
                .map_err(|e| PipelineError::from_io(p, e)),
            Self::Bytes { data, .. } => Ok(Cow::Borrowed(data)),
        }
    }
}

/// Which decoder handles an asset.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DecodePath {
    Hardware,
    Software,
}

/// Pick the decoder for an asset from its header.
///
/// Only baseline three-component JPEG goes to hardware, and only when the backend decodes JPEG.
pub fn choose_decode_path(
    info: &HeaderInfo,
    hardware_jpeg: bool,
    force_software: bool,
) -> DecodePath {
    let eligible = info.encoding == Encoding::Jpeg
        && !info.is_progressive
        && info.component_count == 3
        && hardware_jpeg;
    if eligible && !force_software {
        DecodePath::Hardware
    } else {
        DecodePath::Software
    }
}

/// A decoded asset waiting to be shown.
#[derive(Debug)]
pub struct Prepared {
    pub asset: LoadedAsset,
    pub orientation: u8,
    pub path: DecodePath,
    pub fell_back: bool,
    pub resize_to: Option<Size>,
}

/// Viewer context: owns the backend handles, the stages and the current display settings.
pub struct Viewer {
    backend: Arc<dyn HardwareBackend>,
    codec: Arc<dyn Codec>,
    decode: DecodeStage,
    resize: ResizeStage,
    render: RenderStage,
    config: ViewerConfig,
    display: DisplayConfig,
    orientation: u8,
}

impl Viewer {
    /// Build the viewer and, if configured, blank the background.
    pub fn new(
        backend: Arc<dyn HardwareBackend>,
        codec: Arc<dyn Codec>,
        config: ViewerConfig,
    ) -> PipelineResult<Self> {
        config.validate()?;
        let decode = DecodeStage::new(
            Arc::clone(&backend),
            DecodeOpts {
                timeout: config.event_timeout(),
                input_buffers: config.decode_input_buffers,
            },
        );
        let resize = ResizeStage::new(
            Arc::clone(&backend),
            ResizeOpts {
                timeout: config.event_timeout(),
            },
        );
        let render = RenderStage::new(
            Arc::clone(&backend),
            RenderOpts {
                timeout: config.render_timeout(),
                transition: config.transition,
            },
        );
        if config.blank_background {
            backend.blank_background(config.display.display, config.display.layer)?;
        }
        info!(backend = backend.name(), "viewer ready");
        Ok(Self {
            display: config.display.clone(),
            backend,
            codec,
            decode,
            resize,
            render,
            config,
            orientation: 1,
        })
    }

    /// Active configuration.
    pub fn config(&self) -> &ViewerConfig {
        &self.config
    }

    /// User display settings, before any EXIF orientation.
    pub fn display_config(&self) -> &DisplayConfig {
        &self.display
    }

    /// Whether a picture is on screen.
    pub fn is_showing(&self) -> bool {
        self.render.has_active_session()
    }

    fn effective(&self, orientation: u8) -> DisplayConfig {
        if self.config.ignore_exif {
            self.display.clone()
        } else {
            self.display.with_orientation(orientation)
        }
    }

    fn decode_software(&self, bytes: &[u8]) -> PipelineResult<LoadedAsset> {
        self.codec.software_decode(bytes, self.config.animation.mode())
    }

    /// Read, probe, decode and (unless tunneled) resize one asset.
    #[tracing::instrument(skip_all, fields(asset = %source.name()))]
    pub fn load(&self, source: &AssetSource) -> PipelineResult<Prepared> {
        let bytes = source.read()?;
        let info = self.codec.probe_header(&bytes)?;
        let path = choose_decode_path(
            &info,
            self.backend.supports_decode(Encoding::Jpeg),
            self.config.force_software,
        );
        debug!(?info, ?path, "decode path chosen");

        let mut fell_back = false;
        let asset = match path {
            DecodePath::Software => self.decode_software(&bytes)?,
            DecodePath::Hardware => {
                match self.decode.decode(&mut Cursor::new(&bytes[..]), info.encoding) {
                    Ok(image) => LoadedAsset::Still(image),
                    Err(e) => {
                        warn!(error = %e, "hardware decode failed, retrying in software");
                        fell_back = true;
                        self.decode_software(&bytes)?
                    }
                }
            }
        };
        let software = path == DecodePath::Software || fell_back;
        let (asset, resize_to) = if self.config.resize {
            self.fit(asset, info.orientation, software)?
        } else {
            (asset, None)
        };
        Ok(Prepared {
            asset,
            orientation: info.orientation,
            path: if fell_back { DecodePath::Software } else { path },
            fell_back,
            resize_to,
        })
    }

    /// Scale a still to the display when it needs it. Animations are shown as decoded.
    fn fit(
        &self,
        asset: LoadedAsset,
        orientation: u8,
        software: bool,
    ) -> PipelineResult<(LoadedAsset, Option<Size>)> {
        let image = match asset {
            LoadedAsset::Still(image) => image,
            animated => return Ok((animated, None)),
        };
        let effective = self.effective(orientation);
        let screen = self.backend.display_size(effective.display)?;
        let Some(target) = plan_resize(image.size(), screen, &effective, software) else {
            return Ok((LoadedAsset::Still(image), None));
        };
        if self.config.tunnel {
            return Ok((LoadedAsset::Still(image), Some(target)));
        }
        let from = image.size();
        match self.resize.resize(image, ResizeTarget::Exact(target)) {
            Ok(resized) => Ok((LoadedAsset::Still(resized), None)),
            Err(failure) => match failure.input {
                Some(original) => {
                    warn!(error = %failure.error, %from, %target, "resize failed, showing unscaled");
                    Ok((LoadedAsset::Still(original), None))
                }
                None => Err(failure.error),
            },
        }
    }

    /// Put a prepared asset on screen, replacing what is shown.
    pub fn show(&mut self, prepared: Prepared) -> PipelineResult<()> {
        let effective = self.effective(prepared.orientation);
        match (prepared.asset, prepared.resize_to) {
            (LoadedAsset::Still(image), Some(target)) => {
                self.render.present_resized(image, target, &effective)?
            }
            (asset, _) => self.render.show(asset, &effective)?,
        }
        self.orientation = prepared.orientation;
        Ok(())
    }

    /// Load and show one asset.
    pub fn open(&mut self, source: &AssetSource) -> PipelineResult<()> {
        let prepared = self.load(source)?;
        self.show(prepared)
    }

    /// Replace the user display settings and re-apply them to the picture on screen.
    pub fn set_display_config(&mut self, display: DisplayConfig) -> PipelineResult<()> {
        self.display = display;
        let effective = self.effective(self.orientation);
        self.render.set_display_config(&effective)
    }

    /// Rotate the picture on screen a quarter turn clockwise.
    pub fn rotate_cw(&mut self) -> PipelineResult<()> {
        let mut d = self.display.clone();
        d.rotate_cw();
        self.set_display_config(d)
    }

    /// Rotate the picture on screen a quarter turn counter-clockwise.
    pub fn rotate_ccw(&mut self) -> PipelineResult<()> {
        let mut d = self.display.clone();
        d.rotate_ccw();
        self.set_display_config(d)
    }

    /// Flip the mirror of the picture on screen.
    pub fn toggle_mirror(&mut self) -> PipelineResult<()> {
        let mut d = self.display.clone();
        d.toggle_mirror();
        self.set_display_config(d)
    }

    /// Back to the configured rotation. Mirroring stays as the user left it.
    pub fn reset_orientation(&mut self) {
        self.display.rotation = self.config.display.rotation;
    }

    /// Take the picture off screen and release every component.
    pub fn shutdown(mut self) -> PipelineResult<()> {
        self.render.stop_session()
    }
}

#[cfg(test)]
#[path = "../../tests/unit/viewer/pipeline.rs"]
mod tests;
