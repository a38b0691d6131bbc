pub mod config;
pub mod error;
pub mod key;

pub use config::ScheduleConfig;
pub use error::*;
pub use key::*;
