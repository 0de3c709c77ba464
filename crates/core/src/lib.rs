#![forbid(unsafe_code)]

pub mod intervals;
pub mod merge;
pub mod model;
pub mod scheduler;
pub mod time;

pub use time::Clock;
