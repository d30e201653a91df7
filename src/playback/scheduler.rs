use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::foundation::error::{PipelineError, PipelineResult};
use crate::raster::animation::AnimationImage;
use crate::raster::buffer::Image;

/// Scheduler lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Running,
    CancelRequested,
    Stopped,
}

/// Frame handed to the presentation callback.
#[derive(Debug)]
pub struct PresentedFrame<'a> {
    pub index: usize,
    pub cycle: u32,
    pub delay: Duration,
    pub image: &'a Image,
}

/// How a playback run ended.
#[derive(Debug)]
pub enum PlaybackOutcome {
    NotStarted,
    Completed {
        presented: u64,
    },
    Cancelled {
        presented: u64,
    },
    Failed(PipelineError),
}

struct Shared {
    state: Mutex<SchedulerState>,
    wake: Condvar,
}

impl Shared {
    fn set(&self, state: SchedulerState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = state;
        self.wake.notify_all();
    }

    fn get(&self) -> SchedulerState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Sleep until `deadline`; returns `false` if cancellation arrived first.
    fn sleep_until(&self, deadline: Instant) -> bool {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        loop {
            if *state != SchedulerState::Running {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            state = self
                .wake
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }
}

/// Drives timed, cancellable animation playback on one background thread.
pub struct AnimationScheduler {
    shared: Arc<Shared>,
    handle: Option<JoinHandle<PlaybackOutcome>>,
    outcome: Option<PlaybackOutcome>,
}

impl Default for AnimationScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl AnimationScheduler {
    /// Idle scheduler.
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(SchedulerState::Idle),
                wake: Condvar::new(),
            }),
            handle: None,
            outcome: None,
        }
    }

    /// Current state.
    pub fn state(&self) -> SchedulerState {
        self.shared.get()
    }

    /// Start playing `anim`, calling `present` once per frame from the background thread.
    ///
    /// A scheduler that already ran is reset first; state is never shared between runs.
    pub fn start<F>(&mut self, anim: AnimationImage, present: F) -> PipelineResult<()>
    where
        F: FnMut(&PresentedFrame<'_>) -> PipelineResult<()> + Send + 'static,
    {
        if self.handle.is_some() {
            return Err(PipelineError::execution("animation already running"));
        }
        let shared = Arc::new(Shared {
            state: Mutex::new(SchedulerState::Running),
            wake: Condvar::new(),
        });
        self.shared = Arc::clone(&shared);
        self.outcome = None;
        let handle = std::thread::Builder::new()
            .name("hwview-anim".to_string())
            .spawn(move || {
                let outcome = play(&shared, anim, present);
                shared.set(SchedulerState::Stopped);
                outcome
            })
            .map_err(|e| {
                self.shared.set(SchedulerState::Stopped);
                PipelineError::execution(format!("spawning animation thread: {e}"))
            })?;
        self.handle = Some(handle);
        Ok(())
    }

    fn join(&mut self) -> PlaybackOutcome {
        match self.handle.take() {
            Some(h) => {
                let outcome = h.join().unwrap_or_else(|_| {
                    PlaybackOutcome::Failed(PipelineError::execution("animation thread panicked"))
                });
                self.shared.set(SchedulerState::Stopped);
                outcome
            }
            None => self.outcome.take().unwrap_or(PlaybackOutcome::NotStarted),
        }
    }

    /// Request cancellation and block until the background thread has stopped.
    pub fn cancel(&mut self) -> PlaybackOutcome {
        {
            let mut state = self
                .shared
                .state
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if *state == SchedulerState::Running {
                *state = SchedulerState::CancelRequested;
            }
        }
        self.shared.wake.notify_all();
        let outcome = self.join();
        debug!(?outcome, "animation stopped");
        outcome
    }

    /// Block until playback ends on its own (finite loop count or failure).
    pub fn wait(&mut self) -> PlaybackOutcome {
        self.join()
    }

    /// True once the background thread has exited (or was never started).
    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().is_none_or(|h| h.is_finished())
    }
}

impl Drop for AnimationScheduler {
    fn drop(&mut self) {
        if self.handle.is_some() {
            self.cancel();
        }
    }
}

fn play<F>(shared: &Shared, mut anim: AnimationImage, mut present: F) -> PlaybackOutcome
where
    F: FnMut(&PresentedFrame<'_>) -> PipelineResult<()>,
{
    let frames = anim.frame_count();
    let loops = anim.loop_count();
    let mut cycle = 0u32;
    let mut presented = 0u64;
    debug!(frames, loops, "animation started");
    loop {
        let delay = anim.current_delay();
        let wake = Instant::now() + delay;
        let index = anim.current_index();
        let frame = PresentedFrame {
            index,
            cycle,
            delay,
            image: anim.current(),
        };
        if let Err(e) = present(&frame) {
            warn!(error = %e, index, "presenting animation frame failed");
            return PlaybackOutcome::Failed(e);
        }
        presented += 1;

        let end_of_cycle = index + 1 == frames;
        let finished = loops > 0 && end_of_cycle && cycle + 1 >= loops as u32;
        if !finished && let Err(e) = anim.advance() {
            warn!(error = %e, "decoding next animation frame failed");
            return PlaybackOutcome::Failed(e);
        }
        if !shared.sleep_until(wake) {
            return PlaybackOutcome::Cancelled { presented };
        }
        if finished {
            return PlaybackOutcome::Completed { presented };
        }
        if end_of_cycle {
            cycle += 1;
        }
    }
}

#[cfg(test)]
#[path = "../../tests/unit/playback/scheduler.rs"]
mod tests;
