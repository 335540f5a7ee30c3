//! # microloop
//!
//! A single-threaded I/O reactor with thread-pool offload for blocking work.
//!
//! This crate provides:
//! - `EventLoop`: owns the readiness multiplexer, the source registry and
//!   the worker pool; `tick()` performs one dispatch round
//! - `FixedPool`: fixed-size worker pool running blocking `start()` calls
//! - `LoopConfig`: compile-time defaults with environment overrides
//! - Bundled sources: `SignalsMonitor`, `WakeSource`, `BlockingTask`
//!
//! ## Dispatch
//!
//! ```text
//!   register(source)
//!        │
//!        ├── interest non-empty ──► epoll_ctl(ADD) + registry insert
//!        │
//!        ├── native_async ──► start() inline
//!        └── blocking     ──► pool.submit(start)
//!
//!   tick()
//!        epoll_wait ──► for each ready fd:
//!             !is_complete            → keep, wait for next readiness
//!             is_complete + retry     → pool.submit(start), keep
//!             is_complete             → run_callback, remove, drop
//! ```
//!
//! ## Quick Start
//!
//! ```ignore
//! use microloop::{EventLoop, LoopConfig, SignalsMonitor};
//! use nix::sys::signal::Signal;
//!
//! let ev = EventLoop::new(LoopConfig::from_env())?;
//! let mut monitor = SignalsMonitor::new()?;
//! monitor.register_signal_handler(Signal::SIGINT, |_| true)?;
//! let can_exit = monitor.exit_flag();
//! ev.register(monitor)?;
//!
//! while ev.tick() && !ev.is_empty() {}
//! ```

pub mod config;
pub mod pool;
pub mod sources;

// Platform detection
cfg_if::cfg_if! {
    if #[cfg(target_os = "linux")] {
        mod poller;
        pub mod reactor;
    } else {
        compile_error!("microloop requires epoll (Linux)");
    }
}

// Re-exports
pub use config::LoopConfig;
pub use pool::FixedPool;
pub use reactor::EventLoop;
pub use sources::{BlockingTask, SignalHandler, SignalsMonitor, WakeHandle, WakeSource};

pub use microloop_core::{EventSource, Interest, KernelError, LoopError, LoopResult, NO_FD};
