pub mod error;
pub use error::CoreError;

pub mod build;
pub use build::{Build, BuildRef, BuildSource, Engine, Runnable};

mod config;
pub use config::TrackerConfig;

pub mod running;
pub use running::{Enrollment, RunningSet};

pub mod tracker;
pub use tracker::Tracker;
