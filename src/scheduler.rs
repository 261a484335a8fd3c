//! Scheduler Layer
//!
//! Drives every source on a wall-clock aligned cycle.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐  each cycle   ┌────────────────────────────┐
//! │  Scheduler   │ ────────────► │ one task per SourceEntry   │
//! │ (aligned     │               │  modified? register        │
//! │  wake-ups)   │ ◄──── join ── │  else      update          │
//! └──────┬───────┘               └─────────────┬──────────────┘
//!        │ config mtime changed                │ outcomes
//!        ▼                                     ▼
//!   reload query lists                 SchedulerMetrics
//! ```

mod clock;
mod metrics;
mod refresh;

pub use clock::{delay_until_next, next_aligned, until_next};
pub use metrics::{DURATION_BUCKETS, Phase, RunStatus, SchedulerMetrics};
pub use refresh::{
    CycleReport, RegistrationPolicy, Scheduler, SchedulerError, SchedulerSettings, SourceOutcome,
    SourceReport,
};
