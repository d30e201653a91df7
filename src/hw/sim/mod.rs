//! Deterministic in-process stand-in for the hardware media stack.
//!
//! Components run synchronously inside the calling thread: submitting a buffer performs the work
//! and queues the resulting events, which [`HardwareComponent::next_event`] then hands out in
//! order. A component with nothing to report stays silent for the whole wait, like real hardware
//! that never answers, so timeouts behave as they would on a device.

mod decode;
mod display;
mod render;
mod resize;

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use tracing::trace;

use crate::display::config::DisplayRegion;
use crate::foundation::core::Size;
use crate::foundation::error::{PipelineError, PipelineResult};
use crate::hw::component::{HardwareBackend, HardwareComponent, Refused, TunnelHandle};
use crate::hw::types::{
    BufferHeader, BufferId, Command, ComponentKind, ComponentState, Encoding, Event,
    PortDefinition, PortDirection, PortFormat, PortIndex,
};

pub use display::{DisplayEvent, Presentation, SimDisplay};

/// Knobs that make the simulated hardware misbehave in controlled ways.
#[derive(Clone, Debug)]
pub struct SimBehavior {
    pub display_size: Size,
    pub hardware_decode: Vec<Encoding>,
    pub fail_create: Vec<ComponentKind>,
    pub silent_port_settings: Vec<ComponentKind>,
    pub silent_eos: Vec<ComponentKind>,
    pub input_buffer_size: usize,
    pub reject_display_region: bool,
    pub hold_render_buffers: bool,
}

impl Default for SimBehavior {
    fn default() -> Self {
        Self {
            display_size: Size::new(1920, 1080),
            hardware_decode: vec![Encoding::Jpeg],
            fail_create: Vec::new(),
            silent_port_settings: Vec::new(),
            silent_eos: Vec::new(),
            input_buffer_size: 80 * 1024,
            reject_display_region: false,
            hold_render_buffers: false,
        }
    }
}

impl SimBehavior {
    /// Report `size` for every display.
    pub fn with_display_size(mut self, size: Size) -> Self {
        self.display_size = size;
        self
    }

    /// Advertise `size` byte input buffers on the decoder.
    pub fn with_input_buffer_size(mut self, size: usize) -> Self {
        self.input_buffer_size = size.max(1);
        self
    }

    /// Fail creation of `kind`.
    pub fn failing(mut self, kind: ComponentKind) -> Self {
        self.fail_create.push(kind);
        self
    }

    /// Never raise port-settings-changed on `kind`.
    pub fn without_port_settings(mut self, kind: ComponentKind) -> Self {
        self.silent_port_settings.push(kind);
        self
    }

    /// Never complete output on `kind`.
    pub fn without_eos(mut self, kind: ComponentKind) -> Self {
        self.silent_eos.push(kind);
        self
    }

    /// Reject every display region.
    pub fn rejecting_display_region(mut self) -> Self {
        self.reject_display_region = true;
        self
    }

    /// Render components keep every frame they were given until flushed.
    pub fn holding_render_buffers(mut self) -> Self {
        self.hold_render_buffers = true;
        self
    }
}

#[derive(Debug, Default)]
struct SimCounters {
    components_created: AtomicU64,
    components_destroyed: AtomicU64,
    buffers_registered: AtomicU64,
    buffers_freed: AtomicU64,
}

/// Snapshot of the simulated hardware's resource counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SimStats {
    pub components_created: u64,
    pub components_destroyed: u64,
    pub buffers_registered: u64,
    pub buffers_freed: u64,
}

impl SimStats {
    /// Components still alive.
    pub fn live_components(&self) -> u64 {
        self.components_created.saturating_sub(self.components_destroyed)
    }

    /// Buffers still registered.
    pub fn live_buffers(&self) -> u64 {
        self.buffers_registered.saturating_sub(self.buffers_freed)
    }
}

pub(crate) struct SimShared {
    behavior: SimBehavior,
    counters: SimCounters,
    display: Arc<SimDisplay>,
}

impl SimShared {
    fn silent_settings(&self, kind: ComponentKind) -> bool {
        self.behavior.silent_port_settings.contains(&kind)
    }

    fn silent_eos(&self, kind: ComponentKind) -> bool {
        self.behavior.silent_eos.contains(&kind)
    }
}

/// Simulated hardware backend.
pub struct SimulatedBackend {
    shared: Arc<SimShared>,
    next_component: AtomicU32,
}

impl Default for SimulatedBackend {
    fn default() -> Self {
        Self::new(SimBehavior::default())
    }
}

impl SimulatedBackend {
    /// Backend with the given behavior.
    pub fn new(behavior: SimBehavior) -> Self {
        Self {
            shared: Arc::new(SimShared {
                behavior,
                counters: SimCounters::default(),
                display: Arc::new(SimDisplay::default()),
            }),
            next_component: AtomicU32::new(1),
        }
    }

    /// Virtual display recording everything the render components show.
    pub fn display(&self) -> Arc<SimDisplay> {
        Arc::clone(&self.shared.display)
    }

    /// Resource counters.
    pub fn stats(&self) -> SimStats {
        let c = &self.shared.counters;
        SimStats {
            components_created: c.components_created.load(Ordering::SeqCst),
            components_destroyed: c.components_destroyed.load(Ordering::SeqCst),
            buffers_registered: c.buffers_registered.load(Ordering::SeqCst),
            buffers_freed: c.buffers_freed.load(Ordering::SeqCst),
        }
    }

    /// Configured behavior.
    pub fn behavior(&self) -> &SimBehavior {
        &self.shared.behavior
    }
}

impl HardwareBackend for SimulatedBackend {
    fn name(&self) -> &str {
        "sim"
    }

    fn create_component(&self, kind: ComponentKind) -> PipelineResult<Box<dyn HardwareComponent>> {
        if self.shared.behavior.fail_create.contains(&kind) {
            return Err(PipelineError::creation(kind, "insufficient resources"));
        }
        let id = self.next_component.fetch_add(1, Ordering::SeqCst);
        let shared = Arc::clone(&self.shared);
        shared
            .counters
            .components_created
            .fetch_add(1, Ordering::SeqCst);
        let component: Box<dyn HardwareComponent> = match kind {
            ComponentKind::ImageDecode => {
                let (first, defs) = decode::ports(&shared.behavior);
                Box::new(SimComponent::new(id, kind, first, defs, decode::DecodeEngine::default(), shared))
            }
            ComponentKind::Resize => {
                let (first, defs) = resize::ports();
                Box::new(SimComponent::new(id, kind, first, defs, resize::ResizeEngine::default(), shared))
            }
            ComponentKind::Render => {
                let (first, defs) = render::ports();
                Box::new(SimComponent::new(id, kind, first, defs, render::RenderEngine::default(), shared))
            }
        };
        Ok(component)
    }

    fn supports_decode(&self, encoding: Encoding) -> bool {
        self.shared.behavior.hardware_decode.contains(&encoding)
    }

    fn display_size(&self, display: u32) -> PipelineResult<Size> {
        if display > 2 {
            return Err(PipelineError::display(format!("no display {display}")));
        }
        Ok(self.shared.behavior.display_size)
    }

    fn blank_background(&self, display: u32, layer: i32) -> PipelineResult<()> {
        self.display_size(display)?;
        self.shared.display.record(DisplayEvent::Blanked {
            display,
            layer: layer.saturating_sub(1),
        });
        Ok(())
    }
}

pub(crate) fn port_def(
    index: u32,
    direction: PortDirection,
    buffer_count_min: u32,
    buffer_size: usize,
    format: PortFormat,
) -> PortDefinition {
    PortDefinition {
        index: PortIndex(index),
        direction,
        enabled: false,
        buffer_count_min,
        buffer_count_actual: buffer_count_min,
        buffer_size,
        format,
    }
}

/// View of the generic component state handed to an engine.
pub(crate) struct Ctx<'a> {
    pub(crate) id: u32,
    pub(crate) kind: ComponentKind,
    pub(crate) first: PortIndex,
    pub(crate) events: &'a mut VecDeque<Event>,
    pub(crate) ports: &'a mut [PortDefinition],
    pub(crate) shared: &'a SimShared,
}

impl Ctx<'_> {
    pub(crate) fn port_mut(&mut self, port: PortIndex) -> Option<&mut PortDefinition> {
        let i = port.0.checked_sub(self.first.0)? as usize;
        self.ports.get_mut(i)
    }

    pub(crate) fn is_enabled(&self, port: PortIndex) -> bool {
        port.0
            .checked_sub(self.first.0)
            .and_then(|i| self.ports.get(i as usize))
            .is_some_and(|d| d.enabled)
    }

    pub(crate) fn display(&self) -> &SimDisplay {
        &self.shared.display
    }
}

/// Per-kind behavior plugged into [`SimComponent`].
pub(crate) trait Engine: Send {
    /// Check and normalize a definition proposed by the host.
    fn validate_port(
        &mut self,
        def: &mut PortDefinition,
        current: &PortDefinition,
        shared: &SimShared,
    ) -> PipelineResult<()>;

    /// Take an input buffer. The engine must eventually hand it back through an event.
    fn consume(&mut self, ctx: &mut Ctx<'_>, header: BufferHeader);

    /// Take an output buffer to fill.
    fn produce(&mut self, ctx: &mut Ctx<'_>, mut header: BufferHeader) {
        header.filled_len = 0;
        ctx.events.push_back(Event::FillBufferDone(header));
    }

    /// A port finished enabling.
    fn port_enabled(&mut self, ctx: &mut Ctx<'_>, port: PortIndex) {
        let _ = (ctx, port);
    }

    /// Give back every buffer held on `port`.
    fn release(&mut self, port: PortIndex) -> Vec<BufferHeader> {
        let _ = port;
        Vec::new()
    }

    fn display_region(&mut self, ctx: &mut Ctx<'_>, region: &DisplayRegion) -> PipelineResult<()> {
        let _ = region;
        Err(PipelineError::parameter(format!(
            "{}: display region not supported",
            ctx.kind
        )))
    }

    fn tunnel_source(&mut self, ctx: &mut Ctx<'_>, port: PortIndex) -> PipelineResult<TunnelHandle> {
        Err(PipelineError::port(format!(
            "{}: port {port} cannot source a tunnel",
            ctx.kind
        )))
    }

    fn tunnel_sink(
        &mut self,
        ctx: &mut Ctx<'_>,
        port: PortIndex,
        handle: TunnelHandle,
    ) -> PipelineResult<()> {
        let _ = handle;
        Err(PipelineError::port(format!(
            "{}: port {port} cannot sink a tunnel",
            ctx.kind
        )))
    }

    /// Drain upstream input. With a non-zero `timeout`, block for new input and return `true` if
    /// the engine did the waiting itself.
    fn pump(&mut self, ctx: &mut Ctx<'_>, timeout: Duration) -> bool {
        let _ = (ctx, timeout);
        false
    }

    /// Component is being destroyed.
    fn destroyed(&mut self, shared: &SimShared, id: u32) {
        let _ = (shared, id);
    }
}

struct SimComponent<E: Engine> {
    id: u32,
    kind: ComponentKind,
    state: ComponentState,
    first: PortIndex,
    ports: Vec<PortDefinition>,
    events: VecDeque<Event>,
    registered: HashMap<BufferId, PortIndex>,
    engine: E,
    shared: Arc<SimShared>,
}

impl<E: Engine> SimComponent<E> {
    fn new(
        id: u32,
        kind: ComponentKind,
        first: PortIndex,
        ports: Vec<PortDefinition>,
        engine: E,
        shared: Arc<SimShared>,
    ) -> Self {
        Self {
            id,
            kind,
            state: ComponentState::Loaded,
            first,
            ports,
            events: VecDeque::new(),
            registered: HashMap::new(),
            engine,
            shared,
        }
    }

    fn split(&mut self) -> (&mut E, Ctx<'_>) {
        (
            &mut self.engine,
            Ctx {
                id: self.id,
                kind: self.kind,
                first: self.first,
                events: &mut self.events,
                ports: &mut self.ports,
                shared: &self.shared,
            },
        )
    }

    fn index(&self, port: PortIndex) -> PipelineResult<usize> {
        port.0
            .checked_sub(self.first.0)
            .map(|i| i as usize)
            .filter(|i| *i < self.ports.len())
            .ok_or_else(|| PipelineError::port(format!("{} has no port {port}", self.kind)))
    }

    fn return_held(&mut self, port: PortIndex) {
        let direction = self
            .index(port)
            .map(|i| self.ports[i].direction)
            .unwrap_or(PortDirection::Input);
        for mut h in self.engine.release(port) {
            h.filled_len = 0;
            self.events.push_back(match direction {
                PortDirection::Input => Event::EmptyBufferDone(h),
                PortDirection::Output => Event::FillBufferDone(h),
            });
        }
    }

    fn check_buffer_port(&self, port: PortIndex, size: usize) -> PipelineResult<()> {
        let def = &self.ports[self.index(port)?];
        if !def.enabled {
            return Err(PipelineError::allocation(format!(
                "{}: port {port} is disabled",
                self.kind
            )));
        }
        if size < def.buffer_size {
            return Err(PipelineError::allocation(format!(
                "{}: buffer of {size} bytes is below the port minimum of {}",
                self.kind, def.buffer_size
            )));
        }
        Ok(())
    }

    fn register(&mut self, id: BufferId, port: PortIndex) {
        self.registered.insert(id, port);
        self.shared
            .counters
            .buffers_registered
            .fetch_add(1, Ordering::SeqCst);
    }

    fn check_submit(&self, header: &BufferHeader, direction: PortDirection) -> PipelineResult<()> {
        if self.state != ComponentState::Executing {
            return Err(PipelineError::execution(format!(
                "{} is {:?}, not executing",
                self.kind, self.state
            )));
        }
        if self.registered.get(&header.id()) != Some(&header.port()) {
            return Err(PipelineError::allocation(format!(
                "{}: buffer {} is not registered on port {}",
                self.kind,
                header.id().0,
                header.port()
            )));
        }
        let def = &self.ports[self.index(header.port())?];
        if def.direction != direction || !def.enabled {
            return Err(PipelineError::port(format!(
                "{}: port {} cannot take this buffer",
                self.kind,
                header.port()
            )));
        }
        if header.offset.saturating_add(header.filled_len) > header.capacity() {
            return Err(PipelineError::parameter("filled length exceeds buffer"));
        }
        Ok(())
    }
}

impl<E: Engine> HardwareComponent for SimComponent<E> {
    fn kind(&self) -> ComponentKind {
        self.kind
    }

    fn ports(&self) -> (PortIndex, u32) {
        (self.first, self.ports.len() as u32)
    }

    fn port_definition(&self, port: PortIndex) -> PipelineResult<PortDefinition> {
        Ok(self.ports[self.index(port)?].clone())
    }

    fn set_port_definition(&mut self, def: &PortDefinition) -> PipelineResult<()> {
        let i = self.index(def.index)?;
        let current = self.ports[i].clone();
        if current.enabled && self.state != ComponentState::Loaded {
            return Err(PipelineError::parameter(format!(
                "{}: port {} must be disabled to change its definition",
                self.kind, def.index
            )));
        }
        if def.direction != current.direction {
            return Err(PipelineError::parameter("port direction is fixed"));
        }
        if def.buffer_count_actual < current.buffer_count_min {
            return Err(PipelineError::parameter(format!(
                "{}: port {} needs at least {} buffers",
                self.kind, def.index, current.buffer_count_min
            )));
        }
        let mut next = def.clone();
        next.enabled = current.enabled;
        self.engine.validate_port(&mut next, &current, &self.shared)?;
        self.ports[i] = next;
        Ok(())
    }

    fn send_command(&mut self, cmd: Command) -> PipelineResult<()> {
        match cmd {
            Command::StateSet(target) => {
                if !self.state.can_step_to(target) {
                    return Err(PipelineError::execution(format!(
                        "{}: {:?} -> {target:?} is not a legal transition",
                        self.kind, self.state
                    )));
                }
                if self.state == ComponentState::Executing {
                    let ports: Vec<PortIndex> = self.ports.iter().map(|d| d.index).collect();
                    for port in ports {
                        self.return_held(port);
                    }
                }
                self.state = target;
            }
            Command::PortEnable(port) => {
                let i = self.index(port)?;
                self.ports[i].enabled = true;
                self.events.push_back(Event::CommandComplete(cmd));
                let (engine, mut ctx) = self.split();
                engine.port_enabled(&mut ctx, port);
                trace!(id = self.id, port = port.0, "sim port enabled");
                return Ok(());
            }
            Command::PortDisable(port) => {
                let i = self.index(port)?;
                self.return_held(port);
                self.ports[i].enabled = false;
            }
            Command::Flush(port) => {
                self.index(port)?;
                self.return_held(port);
            }
        }
        self.events.push_back(Event::CommandComplete(cmd));
        Ok(())
    }

    fn allocate_buffer(
        &mut self,
        port: PortIndex,
        id: BufferId,
        size: usize,
    ) -> PipelineResult<BufferHeader> {
        self.check_buffer_port(port, size)?;
        self.register(id, port);
        Ok(BufferHeader::new(id, port, vec![0; size]))
    }

    fn use_buffer(
        &mut self,
        port: PortIndex,
        id: BufferId,
        data: Vec<u8>,
    ) -> Result<BufferHeader, Refused<Vec<u8>>> {
        if let Err(e) = self.check_buffer_port(port, data.len()) {
            return Err(Refused::new(e, data));
        }
        self.register(id, port);
        Ok(BufferHeader::new(id, port, data))
    }

    fn free_buffer(&mut self, header: BufferHeader) -> PipelineResult<Vec<u8>> {
        if self.registered.remove(&header.id()).is_none() {
            return Err(PipelineError::allocation(format!(
                "{}: freeing unregistered buffer {}",
                self.kind,
                header.id().0
            )));
        }
        self.shared
            .counters
            .buffers_freed
            .fetch_add(1, Ordering::SeqCst);
        Ok(header.into_data())
    }

    fn empty_this_buffer(&mut self, header: BufferHeader) -> Result<(), Refused<BufferHeader>> {
        if let Err(e) = self.check_submit(&header, PortDirection::Input) {
            return Err(Refused::new(e, header));
        }
        let (engine, mut ctx) = self.split();
        engine.consume(&mut ctx, header);
        Ok(())
    }

    fn fill_this_buffer(&mut self, header: BufferHeader) -> Result<(), Refused<BufferHeader>> {
        if let Err(e) = self.check_submit(&header, PortDirection::Output) {
            return Err(Refused::new(e, header));
        }
        let (engine, mut ctx) = self.split();
        engine.produce(&mut ctx, header);
        Ok(())
    }

    fn set_display_region(&mut self, region: &DisplayRegion) -> PipelineResult<()> {
        let (engine, mut ctx) = self.split();
        engine.display_region(&mut ctx, region)
    }

    fn tunnel_source(&mut self, port: PortIndex) -> PipelineResult<TunnelHandle> {
        let (engine, mut ctx) = self.split();
        engine.tunnel_source(&mut ctx, port)
    }

    fn tunnel_sink(&mut self, port: PortIndex, handle: TunnelHandle) -> PipelineResult<()> {
        let (engine, mut ctx) = self.split();
        engine.tunnel_sink(&mut ctx, port, handle)
    }

    fn next_event(&mut self, timeout: Duration) -> Option<Event> {
        let executing = self.state == ComponentState::Executing;
        if executing {
            let (engine, mut ctx) = self.split();
            engine.pump(&mut ctx, Duration::ZERO);
        }
        if let Some(ev) = self.events.pop_front() {
            return Some(ev);
        }
        if timeout.is_zero() {
            return None;
        }
        let waited = executing && {
            let (engine, mut ctx) = self.split();
            engine.pump(&mut ctx, timeout)
        };
        if !waited {
            std::thread::sleep(timeout);
        }
        self.events.pop_front()
    }
}

impl<E: Engine> Drop for SimComponent<E> {
    fn drop(&mut self) {
        self.engine.destroyed(&self.shared, self.id);
        self.shared
            .counters
            .components_destroyed
            .fetch_add(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
#[path = "../../../tests/unit/hw/sim.rs"]
mod tests;
