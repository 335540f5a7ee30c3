//! Bundled event sources.
//!
//! | Source           | Descriptor | Interest | native_async | Callback thread |
//! |------------------|------------|----------|--------------|-----------------|
//! | `SignalsMonitor` | signalfd   | READABLE | yes          | driving thread  |
//! | `WakeSource`     | eventfd    | READABLE | yes          | driving thread  |
//! | `BlockingTask`   | none       | NONE     | configurable | runner of start |

mod blocking;
mod signals;
mod wake;

pub use blocking::BlockingTask;
pub use signals::{SignalHandler, SignalsMonitor};
pub use wake::{WakeHandle, WakeSource};
