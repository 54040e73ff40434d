//! drowse-watch — keeps idle applications asleep.
//!
//! One [`IdleWatcher`] runs per binding. Each tick asks the control plane
//! for the application's state and its most recent log/event timestamps,
//! stops the application if it has been idle for at least the configured
//! interval, and reschedules itself.
//!
//! # Architecture
//!
//! ```text
//! WatchManager
//!   ├── TimerRegistry (binding_id → cancellable task)
//!   ├── LeaseKeeper (per-binding ownership across processes)
//!   └── Per-binding IdleWatcher
//!       ├── ActivityEvaluator → ActivityInfo
//!       └── ControlPlane::stop_app when idle
//! ```
//!
//! Ticks for one binding never overlap: the next timer is only armed by
//! the tick that just finished.

pub mod activity;
pub mod clock;
pub mod error;
pub mod lease;
pub mod manager;
pub mod timer;
pub mod watcher;

pub use activity::{ActivityEvaluator, ActivityInfo};
pub use clock::{Clock, ManualClock, SystemClock, epoch_millis};
pub use error::{WatchError, WatchResult};
pub use lease::LeaseKeeper;
pub use manager::{InitReport, WatchManager};
pub use timer::{TimerRegistry, TimerTicket};
pub use watcher::{IdleWatcher, TickOutcome};
