//! The polling loop: scheduler, per-address check and process wiring.

pub mod checker;
pub mod report;
pub mod scheduler;

pub use checker::{AddressChecker, CheckSummary};
pub use report::BalanceReporter;
pub use scheduler::{Scheduler, SchedulerConfig, SchedulerHandle};
