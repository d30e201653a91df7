use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::display::config::{DisplayConfig, DisplayRegion, Placement, RegionFields};
use crate::foundation::core::Size;
use crate::foundation::error::{CleanupReport, PipelineError, PipelineResult};
use crate::foundation::math::ramp_alpha;
use crate::hw::component::HardwareBackend;
use crate::hw::session::{ComponentSession, SessionOpts};
use crate::hw::types::{ComponentKind, ComponentState, EventKind, PortFormat, PortIndex, RawFormat};
use crate::playback::scheduler::{AnimationScheduler, PlaybackOutcome, SchedulerState};
use crate::raster::LoadedAsset;
use crate::raster::animation::AnimationImage;
use crate::raster::buffer::Image;
use crate::stage::resize::{submit_picture, target_format};

/// Default wait for render events.
pub const DEFAULT_RENDER_TIMEOUT: Duration = Duration::from_millis(2000);
/// Default number of opacity steps in a blend.
pub const DEFAULT_BLEND_STEPS: u32 = 24;
// Longest the animation thread holds the render session while a frame is still on screen.
const RECLAIM_SLICE: Duration = Duration::from_millis(5);

/// How one picture replaces the previous one.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TransitionKind {
    #[default]
    #[serde(alias = "none")]
    Cut,
    Blend,
}

/// Transition settings.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct Transition {
    pub kind: TransitionKind,
    pub duration_ms: u64,
    pub steps: u32,
}

impl Default for Transition {
    fn default() -> Self {
        Self {
            kind: TransitionKind::Cut,
            duration_ms: 1000,
            steps: DEFAULT_BLEND_STEPS,
        }
    }
}

impl Transition {
    /// Pause between two blend steps.
    pub fn step_delay(&self) -> Duration {
        Duration::from_millis(self.duration_ms) / self.steps.max(1)
    }
}

/// Tunables for [`RenderStage`].
#[derive(Clone, Copy, Debug)]
pub struct RenderOpts {
    pub timeout: Duration,
    pub transition: Transition,
}

impl Default for RenderOpts {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_RENDER_TIMEOUT,
            transition: Transition::default(),
        }
    }
}

enum Source {
    Still(Image),
    Animated(AnimationImage),
    Tunneled { image: Image, target: Size },
}

/// One picture on screen and the components keeping it there.
///
/// Fields drop in teardown order: playback, then the resizer, then the renderer.
struct RenderSession {
    scheduler: Option<AnimationScheduler>,
    resize: Option<ComponentSession>,
    render: Arc<Mutex<ComponentSession>>,
    display: DisplayConfig,
    applied: DisplayRegion,
    placement: Placement,
}

impl RenderSession {
    fn apply(&mut self, display: &DisplayConfig) -> PipelineResult<()> {
        let mut region = display.region(Some(self.placement));
        // Returning to defaults still has to reach the compositor.
        if region.layer != self.applied.layer {
            region.set |= RegionFields::LAYER;
        }
        if region.alpha != self.applied.alpha {
            region.set |= RegionFields::ALPHA;
        }
        self.render
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .set_display_region(&region)?;
        self.applied = region;
        self.display = display.clone();
        Ok(())
    }

    fn close(mut self) -> CleanupReport {
        let mut report = CleanupReport::new();
        if let Some(mut scheduler) = self.scheduler.take() {
            match scheduler.cancel() {
                PlaybackOutcome::Failed(e) => warn!(error = %e, "animation had stopped on an error"),
                outcome => debug!(?outcome, "animation cancelled"),
            }
        }
        if let Some(resize) = self.resize.take() {
            report.merge(resize.teardown().report);
        }
        match Arc::try_unwrap(self.render) {
            Ok(render) => report.merge(
                render
                    .into_inner()
                    .unwrap_or_else(PoisonError::into_inner)
                    .teardown()
                    .report,
            ),
            Err(_) => report.push(PipelineError::execution(
                "render component still shared after playback stopped",
            )),
        }
        report
    }
}

/// Owns the picture currently on screen and replaces it on request.
pub struct RenderStage {
    backend: Arc<dyn HardwareBackend>,
    opts: RenderOpts,
    active: Option<RenderSession>,
}

impl RenderStage {
    /// Renderer on `backend` with nothing on screen.
    pub fn new(backend: Arc<dyn HardwareBackend>, opts: RenderOpts) -> Self {
        Self {
            backend,
            opts,
            active: None,
        }
    }

    /// Whether a picture is on screen.
    pub fn has_active_session(&self) -> bool {
        self.active.is_some()
    }

    /// Display configuration of the picture on screen.
    pub fn display_config(&self) -> Option<&DisplayConfig> {
        self.active.as_ref().map(|s| &s.display)
    }

    /// Playback state of an animated picture on screen.
    pub fn animation_state(&self) -> Option<SchedulerState> {
        self.active
            .as_ref()
            .and_then(|s| s.scheduler.as_ref())
            .map(AnimationScheduler::state)
    }

    /// Current transition settings.
    pub fn transition(&self) -> Transition {
        self.opts.transition
    }

    /// Change how the next picture replaces the current one.
    pub fn set_transition(&mut self, transition: Transition) {
        self.opts.transition = transition;
    }

    /// Show a still or an animation, replacing whatever is on screen.
    pub fn show(&mut self, asset: LoadedAsset, display: &DisplayConfig) -> PipelineResult<()> {
        match asset {
            LoadedAsset::Still(image) => self.replace(Source::Still(image), display),
            LoadedAsset::Animated(anim) => self.replace(Source::Animated(anim), display),
        }
    }

    /// Show a still through a host buffer.
    pub fn present(&mut self, image: Image, display: &DisplayConfig) -> PipelineResult<()> {
        self.replace(Source::Still(image), display)
    }

    /// Show a still scaled to `target` by a resizer tunneled straight into the renderer.
    pub fn present_resized(
        &mut self,
        image: Image,
        target: Size,
        display: &DisplayConfig,
    ) -> PipelineResult<()> {
        if target.is_empty() {
            return Err(PipelineError::parameter(format!("cannot show at {target}")));
        }
        self.replace(Source::Tunneled { image, target }, display)
    }

    /// Re-apply rotation, mirror, window, layer or opacity to the picture on screen.
    pub fn set_display_config(&mut self, display: &DisplayConfig) -> PipelineResult<()> {
        match self.active.as_mut() {
            Some(session) => session.apply(display),
            None => Ok(()),
        }
    }

    /// Take the picture off screen, stopping playback and freeing every component.
    pub fn stop_session(&mut self) -> PipelineResult<()> {
        match self.active.take() {
            Some(session) => session.close().into_result(),
            None => Ok(()),
        }
    }

    fn replace(&mut self, source: Source, display: &DisplayConfig) -> PipelineResult<()> {
        match self.active.take() {
            Some(outgoing) if self.opts.transition.kind == TransitionKind::Blend => {
                self.blend(outgoing, source, display)
            }
            outgoing => {
                if let Some(outgoing) = outgoing {
                    outgoing.close().into_result()?;
                }
                self.active = Some(self.open(source, display)?);
                Ok(())
            }
        }
    }

    /// Fade `source` in on the layer above `outgoing`, then retire `outgoing`.
    fn blend(
        &mut self,
        mut outgoing: RenderSession,
        source: Source,
        display: &DisplayConfig,
    ) -> PipelineResult<()> {
        let transition = self.opts.transition;
        let steps = transition.steps.max(1);
        let delay = transition.step_delay();

        let mut opaque = outgoing.display.clone();
        opaque.alpha = Some(u8::MAX);
        if let Err(e) = outgoing.apply(&opaque) {
            self.active = Some(outgoing);
            return Err(e);
        }

        let mut fading = display.clone();
        fading.layer = opaque.layer.saturating_add(1);
        fading.alpha = Some(ramp_alpha(1, steps));
        let mut incoming = match self.open(source, &fading) {
            Ok(s) => s,
            Err(e) => {
                self.active = Some(outgoing);
                return Err(e);
            }
        };
        for step in 2..=steps {
            thread::sleep(delay);
            fading.alpha = Some(ramp_alpha(step, steps));
            if let Err(e) = incoming.apply(&fading) {
                warn!(error = %e, step, "blend step rejected");
                let report = incoming.close();
                if !report.is_empty() {
                    warn!(flags = report.flags().bits(), "aborted blend left an unclean session");
                }
                self.active = Some(outgoing);
                return Err(e);
            }
        }
        debug!(steps, "blend complete");

        let report = outgoing.close();
        let settled = incoming.apply(display);
        self.active = Some(incoming);
        report.into_result()?;
        settled
    }

    fn session_opts(&self) -> SessionOpts {
        SessionOpts {
            timeout: self.opts.timeout,
        }
    }

    fn open(&self, source: Source, display: &DisplayConfig) -> PipelineResult<RenderSession> {
        let screen = self.backend.display_size(display.display)?;
        match source {
            Source::Still(image) => self.open_still(image, display, screen),
            Source::Animated(anim) => self.open_animated(anim, display, screen),
            Source::Tunneled { image, target } => {
                self.open_tunneled(image, target, display, screen)
            }
        }
    }

    /// Executing render component with its region set and the input port still disabled.
    fn open_render(
        &self,
        format: Option<RawFormat>,
        picture: Size,
        display: &DisplayConfig,
        screen: Size,
    ) -> PipelineResult<(ComponentSession, PortIndex, DisplayRegion, Placement)> {
        let placement = Placement {
            image: picture,
            display: screen,
        };
        let region = display.region(Some(placement));
        let session =
            ComponentSession::create(self.backend.as_ref(), ComponentKind::Render, self.session_opts())?;
        let (session, port) = session.setup(|s| {
            let port = s.expect_ports(1)?;
            s.set_display_region(&region)?;
            s.change_state(ComponentState::Idle)?;
            s.change_state(ComponentState::Executing)?;
            if let Some(format) = format {
                s.configure_port(port, |d| d.format = PortFormat::Raw(format))?;
            }
            Ok(port)
        })?;
        Ok((session, port, region, placement))
    }

    #[tracing::instrument(skip_all, fields(width = image.width(), height = image.height()))]
    fn open_still(
        &self,
        image: Image,
        display: &DisplayConfig,
        screen: Size,
    ) -> PipelineResult<RenderSession> {
        let layout = image.layout();
        let (mut render, port, applied, placement) =
            self.open_render(Some(layout.raw_format()), layout.size(), display, screen)?;
        render.set_port_enabled(port, true)?;
        let (_, data) = image.into_parts();
        submit_picture(&mut render, port, data).map_err(|r| r.error)?;
        render.wait_for_event(EventKind::EndOfStream, Some(port))?;
        info!("picture on screen");
        Ok(RenderSession {
            scheduler: None,
            resize: None,
            render: Arc::new(Mutex::new(render)),
            display: display.clone(),
            applied,
            placement,
        })
    }

    #[tracing::instrument(skip_all, fields(frames = anim.frame_count(), loops = anim.loop_count()))]
    fn open_animated(
        &self,
        anim: AnimationImage,
        display: &DisplayConfig,
        screen: Size,
    ) -> PipelineResult<RenderSession> {
        let layout = anim.layout();
        let (mut render, port, applied, placement) =
            self.open_render(Some(layout.raw_format()), layout.size(), display, screen)?;
        render.set_port_enabled(port, true)?;
        let id = render
            .import_buffer(port, anim.current().data().to_vec())
            .map_err(|r| r.error)?;

        let render = Arc::new(Mutex::new(render));
        let shared = Arc::clone(&render);
        let timeout = self.opts.timeout;
        let mut scheduler = AnimationScheduler::new();
        scheduler.start(anim, move |frame| {
            // The lock is released between short waits so display updates are not starved.
            let deadline = Instant::now() + timeout;
            let mut s = loop {
                let mut s = shared.lock().unwrap_or_else(PoisonError::into_inner);
                if s.reclaim_within(id, RECLAIM_SLICE)? {
                    break s;
                }
                drop(s);
                if Instant::now() >= deadline {
                    return Err(PipelineError::EventTimeout {
                        event: EventKind::BufferReturned,
                        port: Some(port),
                        timeout,
                    });
                }
                thread::yield_now();
            };
            if !s.buffer_mut(id)?.load(frame.image.data(), false) {
                return Err(PipelineError::allocation(format!(
                    "frame {} does not fit the render buffer",
                    frame.index
                )));
            }
            s.submit_for_consumption(id)
        })?;
        info!("animation playing");
        Ok(RenderSession {
            scheduler: Some(scheduler),
            resize: None,
            render,
            display: display.clone(),
            applied,
            placement,
        })
    }

    #[tracing::instrument(skip_all, fields(%target))]
    fn open_tunneled(
        &self,
        image: Image,
        target: Size,
        display: &DisplayConfig,
        screen: Size,
    ) -> PipelineResult<RenderSession> {
        let (mut render, rport, applied, placement) =
            self.open_render(None, target, display, screen)?;
        let layout = image.layout();
        let resize =
            ComponentSession::create(self.backend.as_ref(), ComponentKind::Resize, self.session_opts())?;
        let (mut resize, (rin, rout)) = resize.setup(|s| {
            let rin = s.expect_ports(2)?;
            s.configure_port(rin, |d| d.format = PortFormat::Raw(layout.raw_format()))?;
            s.set_port_enabled(rin, true)?;
            s.change_state(ComponentState::Idle)?;
            s.change_state(ComponentState::Executing)?;
            Ok((rin, PortIndex(rin.0 + 1)))
        })?;
        let (_, data) = image.into_parts();
        submit_picture(&mut resize, rin, data).map_err(|r| r.error)?;

        resize.wait_for_event(EventKind::PortSettingsChanged, Some(rout))?;
        let def = resize.configure_port(rout, |d| d.format = PortFormat::Raw(target_format(target)))?;
        let raw = def
            .format
            .raw()
            .ok_or_else(|| PipelineError::port("resizer dropped the output format"))?;
        resize.tunnel_to(rout, &mut render, rport)?;
        render.configure_port(rport, |d| d.format = PortFormat::Raw(raw))?;
        render.set_port_enabled(rport, true)?;
        resize.set_port_enabled(rout, true)?;
        render.wait_for_event(EventKind::EndOfStream, Some(rport))?;
        info!("tunneled picture on screen");
        Ok(RenderSession {
            scheduler: None,
            resize: Some(resize),
            render: Arc::new(Mutex::new(render)),
            display: display.clone(),
            applied,
            placement,
        })
    }
}

impl Drop for RenderStage {
    fn drop(&mut self) {
        if let Some(session) = self.active.take() {
            let report = session.close();
            if !report.is_empty() {
                warn!(flags = report.flags().bits(), "render teardown on drop was unclean");
            }
        }
    }
}

#[cfg(test)]
#[path = "../../tests/unit/stage/render.rs"]
mod tests;
