use std::path::PathBuf;
use std::time::Duration;

use crate::hw::types::{ComponentKind, EventKind, PortIndex};

/// Convenience result type used across the pipeline.
pub type PipelineResult<T> = Result<T, PipelineError>;

bitflags::bitflags! {
    /// Process exit bitmask. Each bit names one failure family.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct ErrorFlags: u8 {
        const MEMORY = 0x01;
        const PORT = 0x02;
        const PARAMETER = 0x04;
        const EXECUTION = 0x08;
        const NO_EOS = 0x10;
        const DISPLAY_CONFIG = 0x20;
        const FILE_NOT_FOUND = 0x40;
        const READ = 0x80;
    }
}

/// What the caller should do about a failure.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FailureClass {
    AssetUnreadable,
    UnsupportedFormat,
    HardwarePipeline,
}

/// Top-level error taxonomy used by pipeline APIs.
#[derive(thiserror::Error, Debug)]
pub enum PipelineError {
    #[error("component creation failed: {kind}: {reason}")]
    ComponentCreationFailed {
        kind: ComponentKind,
        reason: String,
    },

    #[error("port negotiation failed: {0}")]
    PortNegotiation(String),

    #[error("parameter rejected: {0}")]
    ParameterRejected(String),

    #[error("buffer allocation failed: {0}")]
    BufferAllocation(String),

    #[error("execution state change failed: {0}")]
    ExecutionState(String),

    #[error("timed out after {}ms waiting for {event}{}", .timeout.as_millis(), port_suffix(.port))]
    EventTimeout {
        event: EventKind,
        port: Option<PortIndex>,
        timeout: Duration,
    },

    #[error("display configuration rejected: {0}")]
    DisplayConfigRejected(String),

    #[error("upstream decode failed: {0}")]
    UpstreamDecode(String),

    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("file not found: {}", .0.display())]
    FileNotFound(PathBuf),

    #[error("read error: {0}")]
    Read(String),

    #[error("{count} cleanup step(s) failed, first: {first}")]
    Cleanup {
        flags: ErrorFlags,
        count: usize,
        first: Box<PipelineError>,
    },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

fn port_suffix(port: &Option<PortIndex>) -> String {
    port.map(|p| format!(" on port {p}")).unwrap_or_default()
}

impl PipelineError {
    pub fn creation(kind: ComponentKind, reason: impl Into<String>) -> Self {
        Self::ComponentCreationFailed {
            kind,
            reason: reason.into(),
        }
    }

    pub fn port(msg: impl Into<String>) -> Self {
        Self::PortNegotiation(msg.into())
    }

    pub fn parameter(msg: impl Into<String>) -> Self {
        Self::ParameterRejected(msg.into())
    }

    pub fn allocation(msg: impl Into<String>) -> Self {
        Self::BufferAllocation(msg.into())
    }

    pub fn execution(msg: impl Into<String>) -> Self {
        Self::ExecutionState(msg.into())
    }

    pub fn display(msg: impl Into<String>) -> Self {
        Self::DisplayConfigRejected(msg.into())
    }

    pub fn decode(msg: impl Into<String>) -> Self {
        Self::UpstreamDecode(msg.into())
    }

    pub fn unsupported(msg: impl Into<String>) -> Self {
        Self::UnsupportedFormat(msg.into())
    }

    pub fn read(msg: impl Into<String>) -> Self {
        Self::Read(msg.into())
    }

    /// Map an IO error on `path` to the not-found or read variant.
    pub fn from_io(path: impl Into<PathBuf>, err: std::io::Error) -> Self {
        let path = path.into();
        match err.kind() {
            std::io::ErrorKind::NotFound => Self::FileNotFound(path),
            _ => Self::Read(format!("{}: {err}", path.display())),
        }
    }

    /// Exit-code bits for this error.
    pub fn flags(&self) -> ErrorFlags {
        match self {
            Self::ComponentCreationFailed { .. } | Self::ExecutionState(_) => {
                ErrorFlags::EXECUTION
            }
            Self::PortNegotiation(_) => ErrorFlags::PORT,
            Self::ParameterRejected(_) => ErrorFlags::PARAMETER,
            Self::BufferAllocation(_) => ErrorFlags::MEMORY,
            Self::EventTimeout { event, .. } => match event {
                EventKind::PortSettingsChanged | EventKind::EndOfStream => ErrorFlags::NO_EOS,
                EventKind::StateSet(_) => ErrorFlags::EXECUTION,
                EventKind::PortEnabled
                | EventKind::PortDisabled
                | EventKind::Flushed
                | EventKind::BufferReturned => ErrorFlags::PORT,
            },
            Self::DisplayConfigRejected(_) => ErrorFlags::DISPLAY_CONFIG,
            Self::FileNotFound(_) => ErrorFlags::FILE_NOT_FOUND,
            Self::UpstreamDecode(_) | Self::UnsupportedFormat(_) | Self::Read(_) => {
                ErrorFlags::READ
            }
            Self::Cleanup { flags, .. } => *flags,
            Self::Other(_) => ErrorFlags::EXECUTION,
        }
    }

    /// Recovery class for this error.
    pub fn class(&self) -> FailureClass {
        match self {
            Self::FileNotFound(_) | Self::Read(_) | Self::UpstreamDecode(_) => {
                FailureClass::AssetUnreadable
            }
            Self::UnsupportedFormat(_) => FailureClass::UnsupportedFormat,
            _ => FailureClass::HardwarePipeline,
        }
    }

    /// True when the error came from an awaited event never arriving.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::EventTimeout { .. })
    }
}

/// Accumulates failures from teardown steps that must all be attempted.
#[derive(Debug, Default)]
pub struct CleanupReport {
    flags: ErrorFlags,
    errors: Vec<PipelineError>,
}

impl CleanupReport {
    /// Create an empty report.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the outcome of one step, keeping its value on success.
    pub fn record<T>(&mut self, step: &str, res: PipelineResult<T>) -> Option<T> {
        match res {
            Ok(v) => Some(v),
            Err(e) => {
                tracing::warn!(step, error = %e, "cleanup step failed");
                self.push(e);
                None
            }
        }
    }

    /// Record a failure.
    pub fn push(&mut self, err: PipelineError) {
        self.flags |= err.flags();
        self.errors.push(err);
    }

    /// Fold another report into this one.
    pub fn merge(&mut self, other: CleanupReport) {
        self.flags |= other.flags;
        self.errors.extend(other.errors);
    }

    /// Union of the flags of all recorded failures.
    pub fn flags(&self) -> ErrorFlags {
        self.flags
    }

    /// Number of recorded failures.
    pub fn len(&self) -> usize {
        self.errors.len()
    }

    /// True when no step failed.
    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    /// Collapse into a single result.
    pub fn into_result(self) -> PipelineResult<()> {
        let count = self.errors.len();
        let flags = self.flags;
        match self.errors.into_iter().next() {
            None => Ok(()),
            Some(first) if count == 1 => Err(first),
            Some(first) => Err(PipelineError::Cleanup {
                flags,
                count,
                first: Box::new(first),
            }),
        }
    }
}

#[cfg(test)]
#[path = "../../tests/unit/foundation/error.rs"]
mod tests;
