//! Reference runners on top of a queue store: a polling worker and a
//! periodic housekeeper.

pub mod housekeeper;
pub mod worker;

pub use housekeeper::{Housekeeper, HousekeeperConfig, HousekeepingReport};
pub use worker::{Handler, Worker, WorkerConfig};
