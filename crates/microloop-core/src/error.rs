//! Error types for the microloop reactor

use core::fmt;
use std::os::unix::io::RawFd;

/// Result type for reactor operations
pub type LoopResult<T> = Result<T, LoopError>;

/// A kernel facility call failed.
///
/// Carries the name of the failing operation and the raw errno. These are
/// never retried; they propagate to the registering/constructing caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KernelError {
    pub op: &'static str,
    pub errno: i32,
}

impl KernelError {
    pub fn new(op: &'static str, errno: i32) -> Self {
        Self { op, errno }
    }

    /// Build from the calling thread's current errno.
    pub fn last(op: &'static str) -> Self {
        Self::new(op, nix::errno::Errno::last_raw())
    }

    pub fn from_nix(op: &'static str, err: nix::Error) -> Self {
        Self::new(op, err as i32)
    }
}

impl fmt::Display for KernelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: errno {} ({})",
            self.op,
            self.errno,
            nix::errno::Errno::from_raw(self.errno).desc()
        )
    }
}

impl std::error::Error for KernelError {}

/// Errors that can occur in reactor operations
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopError {
    /// Multiplexer, eventfd or signal mask operation failed
    Kernel(KernelError),

    /// A source is already registered on this descriptor
    DescriptorInUse(RawFd),

    /// Worker pool is shutting down
    PoolShutdown,

    /// Process-wide loop already constructed
    AlreadyInitialized,
}

impl fmt::Display for LoopError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoopError::Kernel(e) => write!(f, "kernel facility error: {}", e),
            LoopError::DescriptorInUse(fd) => {
                write!(f, "descriptor {} already has a registered source", fd)
            }
            LoopError::PoolShutdown => write!(f, "worker pool is shut down"),
            LoopError::AlreadyInitialized => write!(f, "event loop already initialized"),
        }
    }
}

impl std::error::Error for LoopError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            LoopError::Kernel(e) => Some(e),
            _ => None,
        }
    }
}

impl From<KernelError> for LoopError {
    fn from(e: KernelError) -> Self {
        LoopError::Kernel(e)
    }
}

impl From<nix::Error> for LoopError {
    fn from(e: nix::Error) -> Self {
        LoopError::Kernel(KernelError::from_nix("nix", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let e = LoopError::DescriptorInUse(7);
        assert_eq!(format!("{}", e), "descriptor 7 already has a registered source");

        let e = LoopError::Kernel(KernelError::new("epoll_create1", libc::EMFILE));
        let text = format!("{}", e);
        assert!(text.starts_with("kernel facility error: epoll_create1: errno"));
    }

    #[test]
    fn test_error_conversion() {
        let loop_err: LoopError = KernelError::new("epoll_ctl", libc::EEXIST).into();
        assert!(matches!(
            loop_err,
            LoopError::Kernel(KernelError { op: "epoll_ctl", errno }) if errno == libc::EEXIST
        ));

        let loop_err: LoopError = nix::Error::EBADF.into();
        assert!(matches!(loop_err, LoopError::Kernel(KernelError { errno, .. }) if errno == libc::EBADF));
    }

    #[test]
    fn test_error_source_chain() {
        use std::error::Error;
        let e = LoopError::Kernel(KernelError::new("eventfd", libc::ENFILE));
        assert!(e.source().is_some());
        assert!(LoopError::PoolShutdown.source().is_none());
    }
}
