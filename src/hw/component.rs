use std::any::Any;
use std::fmt;
use std::time::Duration;

use crate::display::config::DisplayRegion;
use crate::foundation::core::Size;
use crate::foundation::error::{PipelineError, PipelineResult};
use crate::hw::types::{
    BufferHeader, BufferId, Command, ComponentKind, Encoding, Event, PortDefinition, PortIndex,
};

/// A value the component refused, handed back together with the reason.
#[derive(Debug)]
pub struct Refused<T> {
    pub error: PipelineError,
    pub value: T,
}

impl<T> Refused<T> {
    /// Pair an error with the refused value.
    pub fn new(error: PipelineError, value: T) -> Self {
        Self { error, value }
    }
}

/// Opaque backend-specific binding passed from a tunnel source port to its sink port.
pub struct TunnelHandle(Box<dyn Any + Send>);

impl TunnelHandle {
    /// Wrap a backend value.
    pub fn new<T: Any + Send>(value: T) -> Self {
        Self(Box::new(value))
    }

    /// Recover the backend value, or give the handle back on a type mismatch.
    pub fn downcast<T: Any + Send>(self) -> Result<T, Self> {
        match self.0.downcast::<T>() {
            Ok(v) => Ok(*v),
            Err(inner) => Err(Self(inner)),
        }
    }
}

impl fmt::Debug for TunnelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("TunnelHandle(..)")
    }
}

/// Factory and global queries of a hardware media stack.
pub trait HardwareBackend: Send + Sync {
    /// Short backend name for logs.
    fn name(&self) -> &str;

    /// Instantiate a component.
    fn create_component(&self, kind: ComponentKind) -> PipelineResult<Box<dyn HardwareComponent>>;

    /// True when the decode component accepts `encoding`.
    fn supports_decode(&self, encoding: Encoding) -> bool;

    /// Resolution of display `display`.
    fn display_size(&self, display: u32) -> PipelineResult<Size>;

    /// Put an opaque black layer directly below `layer` on `display`.
    fn blank_background(&self, display: u32, layer: i32) -> PipelineResult<()> {
        let _ = (display, layer);
        Err(PipelineError::display(format!(
            "{}: background blanking is not supported",
            self.name()
        )))
    }
}

/// One hardware media component, driven through ports, buffers and asynchronous events.
///
/// Every call returns promptly; completions are reported through [`HardwareComponent::next_event`].
pub trait HardwareComponent: Send {
    /// Component kind.
    fn kind(&self) -> ComponentKind;

    /// First port number and number of ports.
    fn ports(&self) -> (PortIndex, u32);

    /// Current definition of `port`.
    fn port_definition(&self, port: PortIndex) -> PipelineResult<PortDefinition>;

    /// Propose a new definition for `def.index`.
    fn set_port_definition(&mut self, def: &PortDefinition) -> PipelineResult<()>;

    /// Issue an asynchronous command. Completion arrives as [`Event::CommandComplete`].
    fn send_command(&mut self, cmd: Command) -> PipelineResult<()>;

    /// Allocate a component-owned buffer of `size` bytes on `port`.
    fn allocate_buffer(
        &mut self,
        port: PortIndex,
        id: BufferId,
        size: usize,
    ) -> PipelineResult<BufferHeader>;

    /// Register host memory as a buffer on `port` without copying.
    fn use_buffer(
        &mut self,
        port: PortIndex,
        id: BufferId,
        data: Vec<u8>,
    ) -> Result<BufferHeader, Refused<Vec<u8>>>;

    /// Unregister a buffer and return its memory.
    fn free_buffer(&mut self, header: BufferHeader) -> PipelineResult<Vec<u8>>;

    /// Hand a filled input buffer to the component.
    fn empty_this_buffer(&mut self, header: BufferHeader) -> Result<(), Refused<BufferHeader>>;

    /// Hand an empty output buffer to the component.
    fn fill_this_buffer(&mut self, header: BufferHeader) -> Result<(), Refused<BufferHeader>>;

    /// Apply a display region. Only meaningful for render components.
    fn set_display_region(&mut self, region: &DisplayRegion) -> PipelineResult<()> {
        let _ = region;
        Err(PipelineError::parameter(format!(
            "{}: display region not supported",
            self.kind()
        )))
    }

    /// Bind `port` as the source end of a tunnel.
    fn tunnel_source(&mut self, port: PortIndex) -> PipelineResult<TunnelHandle> {
        Err(PipelineError::port(format!(
            "{}: port {port} cannot source a tunnel",
            self.kind()
        )))
    }

    /// Bind `port` as the sink end of a tunnel.
    fn tunnel_sink(&mut self, port: PortIndex, handle: TunnelHandle) -> PipelineResult<()> {
        let _ = handle;
        Err(PipelineError::port(format!(
            "{}: port {port} cannot sink a tunnel",
            self.kind()
        )))
    }

    /// Next pending event, waiting at most `timeout`.
    fn next_event(&mut self, timeout: Duration) -> Option<Event>;
}
