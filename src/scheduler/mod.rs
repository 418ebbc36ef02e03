pub mod scanner;
pub mod worker;

pub use scanner::DueScheduleScanner;
pub use worker::{Job, JobDispatcher};
