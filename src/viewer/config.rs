use std::path::Path;
use std::time::Duration;

use anyhow::Context as _;
use serde::{Deserialize, Serialize};

use crate::display::config::DisplayConfig;
use crate::foundation::error::{PipelineError, PipelineResult};
use crate::raster::animation::DecodeMode;
use crate::stage::render::Transition;

/// How animated assets are decoded.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct AnimationConfig {
    pub decode_ahead: usize,
    pub pre_decode: bool,
}

impl Default for AnimationConfig {
    fn default() -> Self {
        Self {
            decode_ahead: 2,
            pre_decode: false,
        }
    }
}

impl AnimationConfig {
    /// Frame residency mode.
    pub fn mode(&self) -> DecodeMode {
        if self.pre_decode {
            DecodeMode::PreDecoded
        } else {
            DecodeMode::OnDemand {
                decode_ahead: self.decode_ahead,
            }
        }
    }
}

/// Every tunable of the viewer, loadable from JSON.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct ViewerConfig {
    pub event_timeout_ms: u64,
    pub render_timeout_ms: u64,
    pub decode_input_buffers: u32,
    pub resize: bool,
    pub tunnel: bool,
    pub force_software: bool,
    pub ignore_exif: bool,
    pub blank_background: bool,
    pub slideshow_secs: Option<u64>,
    pub transition: Transition,
    pub animation: AnimationConfig,
    pub display: DisplayConfig,
}

impl Default for ViewerConfig {
    fn default() -> Self {
        Self {
            event_timeout_ms: 1500,
            render_timeout_ms: 2000,
            decode_input_buffers: 3,
            resize: true,
            tunnel: false,
            force_software: false,
            ignore_exif: false,
            blank_background: false,
            slideshow_secs: None,
            transition: Transition::default(),
            animation: AnimationConfig::default(),
            display: DisplayConfig::default(),
        }
    }
}

impl ViewerConfig {
    /// Load a JSON config file. Missing keys keep their defaults.
    pub fn from_path(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("read config '{}'", path.display()))?;
        let cfg: Self = serde_json::from_str(&text)
            .with_context(|| format!("parse config JSON '{}'", path.display()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Reject values the pipeline cannot work with.
    pub fn validate(&self) -> PipelineResult<()> {
        if self.event_timeout_ms == 0 || self.render_timeout_ms == 0 {
            return Err(PipelineError::parameter("timeouts must be positive"));
        }
        if self.decode_input_buffers < 2 {
            return Err(PipelineError::parameter(
                "decode-input-buffers must be at least 2",
            ));
        }
        if self.transition.steps == 0 {
            return Err(PipelineError::parameter("transition steps must be positive"));
        }
        if self.slideshow_secs == Some(0) {
            return Err(PipelineError::parameter("slideshow-secs must be positive"));
        }
        if let Some(win) = self.display.window
            && win.size().is_empty()
        {
            return Err(PipelineError::parameter(format!("empty window {win:?}")));
        }
        Ok(())
    }

    /// Decoder and resizer event timeout.
    pub fn event_timeout(&self) -> Duration {
        Duration::from_millis(self.event_timeout_ms)
    }

    /// Render event timeout.
    pub fn render_timeout(&self) -> Duration {
        Duration::from_millis(self.render_timeout_ms)
    }

    /// Slideshow interval, if any.
    pub fn slideshow_interval(&self) -> Option<Duration> {
        self.slideshow_secs.map(Duration::from_secs)
    }
}

#[cfg(test)]
#[path = "../../tests/unit/viewer/config.rs"]
mod tests;
