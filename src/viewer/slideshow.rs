use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::time::{Duration, Instant};

use tracing::{info, warn};

use crate::foundation::error::{FailureClass, PipelineError, PipelineResult};
use crate::viewer::pipeline::{AssetSource, Viewer};

/// How often the run loop checks the slideshow timer.
pub const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Interactive command.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Control {
    /// Leave the viewer.
    Quit,
    /// Show the next asset.
    Next,
    /// Show the previous asset.
    Previous,
    /// Rotate a quarter turn clockwise.
    RotateCw,
    /// Rotate a quarter turn counter-clockwise.
    RotateCcw,
    /// Toggle horizontal mirror.
    Mirror,
    /// Pause or resume the slideshow timer.
    Pause,
}

impl Control {
    /// Map one line of terminal input to a command.
    ///
    /// Letters are case-insensitive; arrow-key escape sequences are understood too.
    pub fn from_key(key: &str) -> Option<Self> {
        match key.trim_end_matches(['\r', '\n']) {
            "\x1b[A" => return Some(Self::RotateCcw),
            "\x1b[B" => return Some(Self::RotateCw),
            "\x1b[C" => return Some(Self::Next),
            "\x1b[D" => return Some(Self::Previous),
            _ => {}
        }
        let mut chars = key.trim().chars();
        let c = chars.next()?;
        if chars.next().is_some() {
            return None;
        }
        match c.to_ascii_lowercase() {
            'q' => Some(Self::Quit),
            'n' => Some(Self::Next),
            'b' => Some(Self::Previous),
            'r' => Some(Self::RotateCw),
            'l' => Some(Self::RotateCcw),
            'm' => Some(Self::Mirror),
            'p' => Some(Self::Pause),
            _ => None,
        }
    }
}

/// Whether the run loop keeps going.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Flow {
    /// Keep running.
    Continue,
    /// Stop.
    Quit,
}

/// Ordered list of assets with a cursor, an optional timer and pause state.
#[derive(Debug)]
pub struct Slideshow {
    sources: Vec<AssetSource>,
    index: usize,
    interval: Option<Duration>,
    paused: bool,
    shown_at: Instant,
    skipped: usize,
}

impl Slideshow {
    /// Slideshow over `sources`, advancing every `interval` if given.
    pub fn new(sources: Vec<AssetSource>, interval: Option<Duration>) -> Self {
        Self {
            sources,
            index: 0,
            interval,
            paused: false,
            shown_at: Instant::now(),
            skipped: 0,
        }
    }

    /// Number of assets.
    pub fn len(&self) -> usize {
        self.sources.len()
    }

    /// True when there is nothing to show.
    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    /// Index of the asset on screen.
    pub fn current_index(&self) -> usize {
        self.index
    }

    /// Asset on screen.
    pub fn current(&self) -> Option<&AssetSource> {
        self.sources.get(self.index)
    }

    /// Whether the timer is paused.
    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// Assets skipped so far because they could not be shown.
    pub fn skipped(&self) -> usize {
        self.skipped
    }

    /// Show the first asset that can be shown.
    pub fn start(&mut self, viewer: &mut Viewer) -> PipelineResult<()> {
        if self.sources.is_empty() {
            return Err(PipelineError::FileNotFound("no images to show".into()));
        }
        self.show_from(viewer, 0, 1)
    }

    /// Try `start`, then each following asset in `step` direction, until one is shown.
    fn show_from(&mut self, viewer: &mut Viewer, start: usize, step: isize) -> PipelineResult<()> {
        let n = self.sources.len();
        let mut last = None;
        for k in 0..n {
            let i = (start as isize + step * k as isize).rem_euclid(n as isize) as usize;
            match viewer.open(&self.sources[i]) {
                Ok(()) => {
                    self.index = i;
                    self.shown_at = Instant::now();
                    info!(index = i, asset = %self.sources[i].name(), "showing");
                    return Ok(());
                }
                Err(e) if e.class() != FailureClass::HardwarePipeline && n > 1 => {
                    warn!(asset = %self.sources[i].name(), error = %e, "skipping asset");
                    self.skipped += 1;
                    last = Some(e);
                }
                Err(e) => return Err(e),
            }
        }
        Err(last.unwrap_or_else(|| PipelineError::execution("nothing could be shown")))
    }

    fn step(&mut self, viewer: &mut Viewer, step: isize) -> PipelineResult<()> {
        if self.sources.len() < 2 {
            return Ok(());
        }
        viewer.reset_orientation();
        let n = self.sources.len() as isize;
        let start = (self.index as isize + step).rem_euclid(n) as usize;
        self.show_from(viewer, start, step)
    }

    /// Apply one interactive command.
    pub fn handle(&mut self, viewer: &mut Viewer, control: Control) -> PipelineResult<Flow> {
        match control {
            Control::Quit => return Ok(Flow::Quit),
            Control::Next => self.step(viewer, 1)?,
            Control::Previous => self.step(viewer, -1)?,
            Control::RotateCw => viewer.rotate_cw()?,
            Control::RotateCcw => viewer.rotate_ccw()?,
            Control::Mirror => viewer.toggle_mirror()?,
            Control::Pause => {
                if self.interval.is_some() {
                    self.paused = !self.paused;
                    info!(paused = self.paused, "slideshow timer");
                }
            }
        }
        Ok(Flow::Continue)
    }

    /// Advance if the timer has run out. Returns whether a new asset was shown.
    pub fn tick(&mut self, viewer: &mut Viewer, now: Instant) -> PipelineResult<bool> {
        let Some(interval) = self.interval else {
            return Ok(false);
        };
        if self.paused || self.sources.len() < 2 || now.duration_since(self.shown_at) < interval {
            return Ok(false);
        }
        self.step(viewer, 1)?;
        Ok(true)
    }

    /// Drive the slideshow from `controls` until `Quit` arrives or the sender goes away.
    pub fn run(&mut self, viewer: &mut Viewer, controls: &Receiver<Control>) -> PipelineResult<()> {
        loop {
            match controls.recv_timeout(POLL_INTERVAL) {
                Ok(control) => {
                    if self.handle(viewer, control)? == Flow::Quit {
                        return Ok(());
                    }
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => return Ok(()),
            }
            self.tick(viewer, Instant::now())?;
        }
    }
}

#[cfg(test)]
#[path = "../../tests/unit/viewer/slideshow.rs"]
mod tests;
