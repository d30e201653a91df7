use std::collections::{BTreeMap, VecDeque};
use std::time::{Duration, Instant};

use smallvec::SmallVec;
use tracing::{debug, warn};

use crate::display::config::DisplayRegion;
use crate::foundation::error::{CleanupReport, PipelineError, PipelineResult};
use crate::hw::component::{HardwareBackend, HardwareComponent, Refused};
use crate::hw::types::{
    BufferFlags, BufferHeader, BufferId, Command, ComponentKind, ComponentState, Event, EventKind,
    PortDefinition, PortIndex,
};

/// Default wait for any asynchronous completion.
pub const DEFAULT_EVENT_TIMEOUT: Duration = Duration::from_millis(1500);

/// Session configuration.
#[derive(Clone, Copy, Debug)]
pub struct SessionOpts {
    pub timeout: Duration,
}

impl Default for SessionOpts {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_EVENT_TIMEOUT,
        }
    }
}

/// Buffer bookkeeping counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SessionStats {
    pub registered: u64,
    pub freed: u64,
}

impl SessionStats {
    /// Buffers registered and not yet freed.
    pub fn live(&self) -> u64 {
        self.registered.saturating_sub(self.freed)
    }
}

#[derive(Debug)]
enum Owner {
    Host(BufferHeader),
    Hardware,
}

#[derive(Debug)]
struct Slot {
    port: PortIndex,
    owner: Owner,
}

/// Result of tearing a session down.
#[derive(Debug)]
pub struct Teardown {
    pub report: CleanupReport,
    pub reclaimed: BTreeMap<BufferId, Vec<u8>>,
    pub stats: SessionStats,
}

/// Lifecycle wrapper around one hardware component.
///
/// Owns the component handle and every buffer registered on it. A buffer is either held by the
/// session (host side) or by the component; the two states are exclusive and the header value
/// itself moves between them, so the host cannot touch bytes the hardware owns.
pub struct ComponentSession {
    kind: ComponentKind,
    component: Box<dyn HardwareComponent>,
    state: ComponentState,
    first_port: PortIndex,
    port_count: u32,
    enabled: SmallVec<[PortIndex; 2]>,
    tunneled: SmallVec<[PortIndex; 2]>,
    buffers: BTreeMap<BufferId, Slot>,
    next_buffer: u32,
    pending: VecDeque<(EventKind, Option<PortIndex>)>,
    fault: Option<String>,
    opts: SessionOpts,
    stats: SessionStats,
    closed: bool,
}

impl ComponentSession {
    /// Create a component of `kind` on `backend`.
    #[tracing::instrument(skip(backend, opts), fields(backend = backend.name()))]
    pub fn create(
        backend: &dyn HardwareBackend,
        kind: ComponentKind,
        opts: SessionOpts,
    ) -> PipelineResult<Self> {
        let component = backend.create_component(kind).map_err(|e| match e {
            e @ PipelineError::ComponentCreationFailed { .. } => e,
            other => PipelineError::creation(kind, other.to_string()),
        })?;
        let (first_port, port_count) = component.ports();
        debug!(%kind, first_port = first_port.0, port_count, "component created");
        Ok(Self {
            kind,
            component,
            state: ComponentState::Loaded,
            first_port,
            port_count,
            enabled: SmallVec::new(),
            tunneled: SmallVec::new(),
            buffers: BTreeMap::new(),
            next_buffer: 0,
            pending: VecDeque::new(),
            fault: None,
            opts,
            stats: SessionStats::default(),
            closed: false,
        })
    }

    /// Run `f` on a freshly created session; tear the session down if `f` fails.
    pub fn setup<T>(
        mut self,
        f: impl FnOnce(&mut Self) -> PipelineResult<T>,
    ) -> PipelineResult<(Self, T)> {
        match f(&mut self) {
            Ok(v) => Ok((self, v)),
            Err(e) => {
                let t = self.teardown();
                if !t.report.is_empty() {
                    warn!(flags = t.report.flags().bits(), "teardown after failed setup was not clean");
                }
                Err(e)
            }
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ComponentState {
        self.state
    }

    /// Buffer counters.
    pub fn stats(&self) -> SessionStats {
        self.stats
    }

    /// Buffers registered and not yet freed.
    pub fn live_buffers(&self) -> usize {
        self.buffers.len()
    }

    /// Check that the component exposes exactly `count` ports and return the first.
    pub fn expect_ports(&self, count: u32) -> PipelineResult<PortIndex> {
        if self.port_count != count {
            return Err(PipelineError::port(format!(
                "{} exposes {} port(s), expected {count}",
                self.kind, self.port_count
            )));
        }
        Ok(self.first_port)
    }

    fn check_port(&self, port: PortIndex) -> PipelineResult<()> {
        let start = self.first_port.0;
        if port.0 < start || port.0 >= start.saturating_add(self.port_count) {
            return Err(PipelineError::port(format!(
                "{} has no port {port}",
                self.kind
            )));
        }
        Ok(())
    }

    /// True when `port` is enabled.
    pub fn is_enabled(&self, port: PortIndex) -> bool {
        self.enabled.contains(&port)
    }

    /// Current definition of `port`.
    pub fn port_definition(&self, port: PortIndex) -> PipelineResult<PortDefinition> {
        self.check_port(port)?;
        self.component.port_definition(port)
    }

    /// Read, modify and write back the definition of `port`; returns what the component settled on.
    pub fn configure_port(
        &mut self,
        port: PortIndex,
        f: impl FnOnce(&mut PortDefinition),
    ) -> PipelineResult<PortDefinition> {
        let mut def = self.port_definition(port)?;
        f(&mut def);
        self.component.set_port_definition(&def)?;
        self.component.port_definition(port)
    }

    fn command(&mut self, cmd: Command) -> PipelineResult<()> {
        self.component.send_command(cmd)?;
        let (kind, port) = cmd.completion();
        self.wait_for_event(kind, port)
    }

    /// Enable or disable `port` and wait for the acknowledgement.
    pub fn set_port_enabled(&mut self, port: PortIndex, enabled: bool) -> PipelineResult<()> {
        self.check_port(port)?;
        if self.is_enabled(port) == enabled {
            return Ok(());
        }
        if enabled {
            self.command(Command::PortEnable(port))?;
            self.enabled.push(port);
        } else {
            let held = self.in_flight(port);
            if held > 0 {
                return Err(PipelineError::port(format!(
                    "cannot disable port {port}: {held} buffer(s) still owned by hardware"
                )));
            }
            self.command(Command::PortDisable(port))?;
            self.enabled.retain(|p| *p != port);
        }
        debug!(kind = %self.kind, port = port.0, enabled, "port state changed");
        Ok(())
    }

    fn next_id(&mut self) -> BufferId {
        let id = BufferId(self.next_buffer);
        self.next_buffer = self.next_buffer.wrapping_add(1);
        id
    }

    fn check_enabled_for_buffers(&self, port: PortIndex) -> PipelineResult<()> {
        self.check_port(port)?;
        if !self.is_enabled(port) {
            return Err(PipelineError::allocation(format!(
                "port {port} is disabled; enable it before registering buffers"
            )));
        }
        if self.tunneled.contains(&port) {
            return Err(PipelineError::allocation(format!(
                "port {port} is tunneled and takes no host buffers"
            )));
        }
        Ok(())
    }

    /// Allocate `count` component-owned buffers of `size` bytes on `port`.
    pub fn allocate_buffers(
        &mut self,
        port: PortIndex,
        count: u32,
        size: usize,
    ) -> PipelineResult<Vec<BufferId>> {
        self.check_enabled_for_buffers(port)?;
        let mut ids = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let id = self.next_id();
            let header = self.component.allocate_buffer(port, id, size)?;
            self.buffers.insert(
                id,
                Slot {
                    port,
                    owner: Owner::Host(header),
                },
            );
            self.stats.registered += 1;
            ids.push(id);
        }
        Ok(ids)
    }

    /// Register host memory as a buffer on `port` without copying it.
    pub fn import_buffer(
        &mut self,
        port: PortIndex,
        data: Vec<u8>,
    ) -> Result<BufferId, Refused<Vec<u8>>> {
        if let Err(e) = self.check_enabled_for_buffers(port) {
            return Err(Refused::new(e, data));
        }
        let id = self.next_id();
        let header = self.component.use_buffer(port, id, data)?;
        self.buffers.insert(
            id,
            Slot {
                port,
                owner: Owner::Host(header),
            },
        );
        self.stats.registered += 1;
        Ok(id)
    }

    /// Host access to a buffer the host currently owns.
    pub fn buffer_mut(&mut self, id: BufferId) -> PipelineResult<&mut BufferHeader> {
        match self.buffers.get_mut(&id) {
            Some(Slot {
                owner: Owner::Host(h),
                ..
            }) => Ok(h),
            Some(_) => Err(PipelineError::allocation(format!(
                "buffer {} is owned by the component",
                id.0
            ))),
            None => Err(PipelineError::allocation(format!("unknown buffer {}", id.0))),
        }
    }

    /// Free a host-owned buffer and return its memory.
    pub fn free_buffer(&mut self, id: BufferId) -> PipelineResult<Vec<u8>> {
        match self.buffers.get(&id) {
            None => {
                return Err(PipelineError::allocation(format!(
                    "buffer {} is not registered",
                    id.0
                )));
            }
            Some(Slot {
                owner: Owner::Hardware,
                ..
            }) => {
                return Err(PipelineError::allocation(format!(
                    "buffer {} is still owned by the component",
                    id.0
                )));
            }
            Some(_) => {}
        }
        let Some(Slot {
            owner: Owner::Host(header),
            ..
        }) = self.buffers.remove(&id)
        else {
            return Err(PipelineError::allocation(format!(
                "buffer {} vanished",
                id.0
            )));
        };
        self.stats.freed += 1;
        self.component.free_buffer(header)
    }

    fn hand_over(&mut self, id: BufferId) -> PipelineResult<BufferHeader> {
        let slot = self
            .buffers
            .get_mut(&id)
            .ok_or_else(|| PipelineError::allocation(format!("unknown buffer {}", id.0)))?;
        match std::mem::replace(&mut slot.owner, Owner::Hardware) {
            Owner::Host(h) => Ok(h),
            Owner::Hardware => Err(PipelineError::allocation(format!(
                "buffer {} submitted twice",
                id.0
            ))),
        }
    }

    fn take_back(&mut self, refused: Refused<BufferHeader>) -> PipelineError {
        let Refused { error, value } = refused;
        if let Some(slot) = self.buffers.get_mut(&value.id()) {
            slot.owner = Owner::Host(value);
        }
        error
    }

    /// Hand a filled buffer to the component ("empty this buffer").
    pub fn submit_for_consumption(&mut self, id: BufferId) -> PipelineResult<()> {
        let header = self.hand_over(id)?;
        self.component
            .empty_this_buffer(header)
            .map_err(|r| self.take_back(r))
    }

    /// Hand an empty buffer to the component to be filled ("fill this buffer").
    pub fn submit_for_production(&mut self, id: BufferId) -> PipelineResult<()> {
        let header = self.hand_over(id)?;
        self.component
            .fill_this_buffer(header)
            .map_err(|r| self.take_back(r))
    }

    /// Number of buffers on `port` currently owned by the component.
    pub fn in_flight(&self, port: PortIndex) -> usize {
        self.buffers
            .values()
            .filter(|s| s.port == port && matches!(s.owner, Owner::Hardware))
            .count()
    }

    /// A host-owned buffer on `port`, if one is free right now.
    pub fn idle_buffer(&self, port: PortIndex) -> Option<BufferId> {
        self.host_owned(port)
    }

    fn host_owned(&self, port: PortIndex) -> Option<BufferId> {
        self.buffers
            .iter()
            .find(|(_, s)| s.port == port && matches!(s.owner, Owner::Host(_)))
            .map(|(id, _)| *id)
    }

    /// First host-owned buffer on `port`, waiting for the component to return one if necessary.
    pub fn acquire_buffer(&mut self, port: PortIndex) -> PipelineResult<BufferId> {
        loop {
            if let Some(id) = self.host_owned(port) {
                self.pending
                    .retain(|(k, p)| !(*k == EventKind::BufferReturned && *p == Some(port)));
                return Ok(id);
            }
            self.wait_for_event(EventKind::BufferReturned, Some(port))?;
        }
    }

    /// Wait until buffer `id` is back in host hands.
    pub fn reclaim(&mut self, id: BufferId) -> PipelineResult<()> {
        loop {
            let port = match self.buffers.get(&id) {
                None => {
                    return Err(PipelineError::allocation(format!(
                        "buffer {} is not registered",
                        id.0
                    )));
                }
                Some(Slot {
                    owner: Owner::Host(_),
                    ..
                }) => return Ok(()),
                Some(slot) => slot.port,
            };
            self.wait_for_event(EventKind::BufferReturned, Some(port))?;
        }
    }

    /// Like [`reclaim`](Self::reclaim) but gives up after `timeout`, returning `false` when
    /// the buffer is still held by the component.
    pub fn reclaim_within(&mut self, id: BufferId, timeout: Duration) -> PipelineResult<bool> {
        loop {
            let port = match self.buffers.get(&id) {
                None => {
                    return Err(PipelineError::allocation(format!(
                        "buffer {} is not registered",
                        id.0
                    )));
                }
                Some(Slot {
                    owner: Owner::Host(_),
                    ..
                }) => return Ok(true),
                Some(slot) => slot.port,
            };
            match self.wait_for_event_within(EventKind::BufferReturned, Some(port), timeout) {
                Ok(()) => {}
                Err(e) if e.is_timeout() => return Ok(false),
                Err(e) => return Err(e),
            }
        }
    }

    fn absorb(&mut self, event: Event) {
        match event {
            Event::CommandComplete(cmd) => self.pending.push_back(cmd.completion()),
            Event::PortSettingsChanged(port) => self
                .pending
                .push_back((EventKind::PortSettingsChanged, Some(port))),
            Event::BufferFlag { port, flags } => {
                if flags.contains(BufferFlags::EOS) {
                    self.pending.push_back((EventKind::EndOfStream, Some(port)));
                }
            }
            Event::EmptyBufferDone(h) | Event::FillBufferDone(h) => {
                let (id, port) = (h.id(), h.port());
                match self.buffers.get_mut(&id) {
                    Some(slot) => {
                        slot.owner = Owner::Host(h);
                        self.pending
                            .push_back((EventKind::BufferReturned, Some(port)));
                    }
                    None => warn!(kind = %self.kind, buffer = id.0, "component returned an unknown buffer"),
                }
            }
            Event::Error(msg) => {
                warn!(kind = %self.kind, error = %msg, "component reported an error");
                self.fault = Some(msg);
            }
        }
    }

    fn has_pending(&self, kind: EventKind, port: Option<PortIndex>) -> bool {
        self.pending.iter().any(|(k, p)| *k == kind && *p == port)
    }

    fn take_pending(&mut self, kind: EventKind, port: Option<PortIndex>) -> bool {
        match self
            .pending
            .iter()
            .position(|(k, p)| *k == kind && *p == port)
        {
            Some(i) => {
                self.pending.remove(i);
                true
            }
            None => false,
        }
    }

    fn check_fault(&mut self, kind: EventKind) -> PipelineResult<()> {
        match self.fault.take() {
            Some(msg) => Err(PipelineError::execution(format!(
                "{} failed while waiting for {kind}: {msg}",
                self.kind
            ))),
            None => Ok(()),
        }
    }

    /// Wait for `kind` on `port` for at most the session timeout.
    pub fn wait_for_event(&mut self, kind: EventKind, port: Option<PortIndex>) -> PipelineResult<()> {
        self.wait_for_event_within(kind, port, self.opts.timeout)
    }

    /// Wait for `kind` on `port` for at most `timeout`. Unrelated events are kept for later waits.
    pub fn wait_for_event_within(
        &mut self,
        kind: EventKind,
        port: Option<PortIndex>,
        timeout: Duration,
    ) -> PipelineResult<()> {
        self.wait_for_any_within(&[(kind, port)], timeout).map(|_| ())
    }

    /// Wait for whichever of `wanted` is raised first and consume it.
    ///
    /// A timeout is reported against the first entry.
    pub fn wait_for_any(
        &mut self,
        wanted: &[(EventKind, Option<PortIndex>)],
    ) -> PipelineResult<(EventKind, Option<PortIndex>)> {
        self.wait_for_any_within(wanted, self.opts.timeout)
    }

    fn wait_for_any_within(
        &mut self,
        wanted: &[(EventKind, Option<PortIndex>)],
        timeout: Duration,
    ) -> PipelineResult<(EventKind, Option<PortIndex>)> {
        let Some(&(first, first_port)) = wanted.first() else {
            return Err(PipelineError::parameter("waiting for no event"));
        };
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(&(kind, port)) = wanted.iter().find(|(k, p)| self.has_pending(*k, *p)) {
                self.take_pending(kind, port);
                return Ok((kind, port));
            }
            self.check_fault(first)?;
            let now = Instant::now();
            if now >= deadline {
                return Err(PipelineError::EventTimeout {
                    event: first,
                    port: first_port,
                    timeout,
                });
            }
            if let Some(ev) = self.component.next_event(deadline - now) {
                self.absorb(ev);
            }
        }
    }

    /// Consume `kind` on `port` if it has already been raised. Never blocks.
    pub fn take_event(&mut self, kind: EventKind, port: Option<PortIndex>) -> PipelineResult<bool> {
        while let Some(ev) = self.component.next_event(Duration::ZERO) {
            self.absorb(ev);
        }
        if self.take_pending(kind, port) {
            return Ok(true);
        }
        self.check_fault(kind)?;
        Ok(false)
    }

    /// Move one lifecycle step to `target` and wait for the acknowledgement.
    pub fn change_state(&mut self, target: ComponentState) -> PipelineResult<()> {
        if self.state == target {
            return Ok(());
        }
        if !self.state.can_step_to(target) {
            return Err(PipelineError::execution(format!(
                "{}: illegal transition {:?} -> {target:?}",
                self.kind, self.state
            )));
        }
        self.command(Command::StateSet(target))?;
        debug!(kind = %self.kind, from = ?self.state, to = ?target, "state changed");
        self.state = target;
        Ok(())
    }

    /// Make the component return every buffer it holds on `port`.
    pub fn flush(&mut self, port: PortIndex) -> PipelineResult<()> {
        self.check_port(port)?;
        self.command(Command::Flush(port))?;
        while self.in_flight(port) > 0 {
            self.wait_for_event(EventKind::BufferReturned, Some(port))?;
        }
        Ok(())
    }

    /// Apply a display region (render components).
    pub fn set_display_region(&mut self, region: &DisplayRegion) -> PipelineResult<()> {
        self.component.set_display_region(region)
    }

    /// Bind output `port` of this session directly to input `sink_port` of `sink`.
    ///
    /// Both ports must still be disabled; they are enabled afterwards without host buffers.
    pub fn tunnel_to(
        &mut self,
        port: PortIndex,
        sink: &mut ComponentSession,
        sink_port: PortIndex,
    ) -> PipelineResult<()> {
        self.check_port(port)?;
        sink.check_port(sink_port)?;
        if self.is_enabled(port) || sink.is_enabled(sink_port) {
            return Err(PipelineError::port(format!(
                "tunnel {}:{port} -> {}:{sink_port} requires disabled ports",
                self.kind, sink.kind
            )));
        }
        let handle = self.component.tunnel_source(port)?;
        sink.component.tunnel_sink(sink_port, handle)?;
        self.tunneled.push(port);
        sink.tunneled.push(sink_port);
        debug!(source = %self.kind, sink = %sink.kind, "tunnel established");
        Ok(())
    }

    /// Tear down in the mandatory order: flush, disable ports, free buffers, Idle, Loaded, destroy.
    ///
    /// Every step is attempted even if an earlier one failed.
    pub fn teardown(mut self) -> Teardown {
        self.shutdown()
    }

    fn shutdown(&mut self) -> Teardown {
        let mut report = CleanupReport::new();
        let mut reclaimed = BTreeMap::new();
        self.closed = true;

        let busy: SmallVec<[PortIndex; 2]> = self
            .enabled
            .iter()
            .copied()
            .filter(|p| self.in_flight(*p) > 0)
            .collect();
        for port in busy {
            report.record("flush", self.flush(port));
        }

        let enabled = self.enabled.clone();
        for port in enabled {
            report.record("disable port", self.set_port_enabled(port, false));
        }

        let ids: Vec<BufferId> = self.buffers.keys().copied().collect();
        for id in ids {
            if let Some(data) = report.record("free buffer", self.free_buffer(id)) {
                reclaimed.insert(id, data);
            }
        }

        if self.state == ComponentState::Executing {
            report.record("state idle", self.change_state(ComponentState::Idle));
        }
        if self.state == ComponentState::Idle {
            report.record("state loaded", self.change_state(ComponentState::Loaded));
        }
        if self.state != ComponentState::Loaded {
            report.push(PipelineError::execution(format!(
                "{} left in state {:?}",
                self.kind, self.state
            )));
        }

        debug!(
            kind = %self.kind,
            failures = report.len(),
            live = self.stats.live(),
            "component torn down"
        );
        Teardown {
            report,
            reclaimed,
            stats: self.stats,
        }
    }
}

impl Drop for ComponentSession {
    fn drop(&mut self) {
        if !self.closed {
            let t = self.shutdown();
            if !t.report.is_empty() {
                warn!(kind = %self.kind, flags = t.report.flags().bits(), "implicit teardown was not clean");
            }
        }
    }
}

#[cfg(test)]
#[path = "../../tests/unit/hw/session.rs"]
mod tests;
