//! Signal wait demo
//!
//! Drives the event loop until a delivered signal is allowed to end the
//! process:
//!
//! - SIGHUP: logged, never exits
//! - SIGINT: the first one is vetoed, the second one exits
//! - SIGTERM: exits immediately
//!
//! Each delivery consumes the monitor (sources are one-shot), so a fresh
//! monitor is registered per round. The signals stay blocked on the main
//! thread for the whole run so nothing slips through between rounds.
//!
//! Usage:
//!     cargo run -p microloop-signals
//!     kill -HUP <pid>; kill -INT <pid>; kill -INT <pid>

use microloop::{BlockingTask, EventLoop, LoopConfig, LoopResult, SignalsMonitor};
use microloop_core::{kerror, kinfo, KernelError};

use nix::sys::signal::{pthread_sigmask, SigSet, SigmaskHow, Signal};

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

const WATCHED: [Signal; 3] = [Signal::SIGHUP, Signal::SIGINT, Signal::SIGTERM];

fn main() {
    if let Err(e) = run() {
        kerror!("signals: {}", e);
        std::process::exit(1);
    }
}

fn run() -> LoopResult<()> {
    let mut watched = SigSet::empty();
    for sig in WATCHED {
        watched.add(sig);
    }
    pthread_sigmask(SigmaskHow::SIG_BLOCK, Some(&watched), None)
        .map_err(|e| KernelError::from_nix("pthread_sigmask", e))?;

    let ev = EventLoop::new(LoopConfig::from_env())?;
    kinfo!(
        "pid {} waiting for signals ({} workers)",
        std::process::id(),
        ev.pool().size()
    );

    // Off-thread work completes on a worker while the main thread waits.
    ev.register(BlockingTask::new(
        || std::thread::sleep(std::time::Duration::from_millis(10)),
        || kinfo!("warm-up task finished"),
    ))?;

    let interrupts = Arc::new(AtomicUsize::new(0));
    let mut round = 0u64;

    loop {
        round += 1;
        let monitor = build_monitor(Arc::clone(&interrupts))?;
        let can_exit = monitor.exit_flag();
        ev.register(monitor)?;

        while !ev.is_empty() {
            if !ev.tick() {
                kerror!("event loop wait failed, stopping");
                std::process::exit(1);
            }
        }

        if can_exit.load(Ordering::Acquire) {
            kinfo!("exiting after {} round(s)", round);
            return Ok(());
        }
    }
}

fn build_monitor(interrupts: Arc<AtomicUsize>) -> LoopResult<SignalsMonitor> {
    let mut monitor = SignalsMonitor::new()?;

    monitor.register_signal_handler(Signal::SIGHUP, |sig| {
        kinfo!("{}: nothing to reload", sig);
        false
    })?;

    monitor.register_signal_handler(Signal::SIGINT, move |sig| {
        let n = interrupts.fetch_add(1, Ordering::SeqCst) + 1;
        if n < 2 {
            kinfo!("{}: press Ctrl-C again to exit", sig);
            return false;
        }
        true
    })?;
    monitor.register_signal_handler(Signal::SIGINT, |sig| {
        kinfo!("{}: shutting down", sig);
        true
    })?;

    monitor.register_signal_handler(Signal::SIGTERM, |sig| {
        kinfo!("{}: terminating", sig);
        true
    })?;

    Ok(monitor)
}
