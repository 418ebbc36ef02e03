pub mod engine;
pub mod models;
pub mod time;

pub use engine::ScheduleEngine;
pub use models::{Frequency, NewSchedule, Recipient, Schedule, ScheduleStatus};
pub use time::TimeService;
