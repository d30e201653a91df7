#![forbid(unsafe_code)]
//! Image display pipeline for media hardware: decode, resize and render components driven
//! through a port/buffer/event protocol, with animation playback and a slideshow viewer on top.
//!
//! [`hw::sim::SimulatedBackend`] stands in for the vendor stack so the whole pipeline runs and
//! tests on any host.

mod foundation;

pub mod codec;
pub mod display;
pub mod hw;
pub mod playback;
pub mod raster;
pub mod stage;
pub mod viewer;

pub use foundation::{core, error, math};

pub use foundation::core::{ColorFormat, Rect, Size};
pub use display::config::{DisplayConfig, DisplayMode, DisplayTransform, Rotation};
pub use foundation::error::{CleanupReport, ErrorFlags, FailureClass, PipelineError, PipelineResult};
pub use hw::component::HardwareBackend;
pub use hw::session::ComponentSession;
pub use hw::sim::{SimBehavior, SimulatedBackend};
pub use playback::scheduler::{AnimationScheduler, PlaybackOutcome, SchedulerState};
pub use raster::LoadedAsset;
pub use raster::animation::{AnimationImage, DecodeMode};
pub use raster::buffer::{Image, ImageLayout};
pub use stage::decode::DecodeStage;
pub use stage::render::{RenderStage, Transition, TransitionKind};
pub use stage::resize::{ResizeStage, ResizeTarget};
pub use viewer::config::ViewerConfig;
pub use viewer::pipeline::{AssetSource, Viewer};
pub use viewer::slideshow::{Control, Slideshow};
