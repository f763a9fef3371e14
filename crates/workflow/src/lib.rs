//! Scheduling for avatars.
//!
//! Every avatar gets one independent recurring trigger, either a fixed
//! interval with random jitter or a 5-field cron expression. The
//! [`SchedulerService`] ticks the table, runs due avatars on a bounded
//! worker pool, and never starts a second run of an avatar whose previous
//! run is still going.

pub mod cron;
pub mod scheduler;
pub mod service;

pub use cron::CronExpr;
pub use scheduler::{
    ScheduleEntry, ScheduleError, ScheduleSnapshot, Scheduler, Trigger, TriggerOutcome, TriggerStatus,
    TriggerTarget,
};
pub use service::{SchedulerHandle, SchedulerService, SchedulerSettings, ServiceError};
