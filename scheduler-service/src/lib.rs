//! # Alyx Scheduler Service
//!
//! Implements C2: cron/interval/one-time schedule evaluation, a poll loop
//! that fires `execute` events for due schedules with per-schedule
//! concurrency gating, and startup recovery for schedules missed while
//! the process was down.
//!
//! ## Modules
//!
//! | Module | Purpose | Key Types |
//! |--------|---------|-----------|
//! | [`domain`] | Schedule entity | [`domain::Schedule`], [`domain::ScheduleKind`] |
//! | [`evaluator`] | Next-fire computation | [`evaluator::calculate_next_run`] |
//! | [`repository`] | `Store`-backed persistence | [`repository::ScheduleRepository`] |
//! | [`event_bus`] | Execute-event publication | [`event_bus::EventBus`] |
//! | [`scheduler`] | Poll loop | [`scheduler::Scheduler`] |
//! | [`recovery`] | Startup missed-execution recovery | [`recovery::recover`] |

pub mod domain;
pub mod event_bus;
pub mod evaluator;
pub mod recovery;
pub mod repository;
pub mod scheduler;

pub use domain::{Schedule, ScheduleKind};
pub use event_bus::{EventBus, ExecuteEvent};
pub use evaluator::calculate_next_run;
pub use recovery::recover;
pub use repository::ScheduleRepository;
pub use scheduler::Scheduler;
