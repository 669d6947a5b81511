//! Core library: location planning, resize arithmetic, placement, the
//! per-file conversion state machine and the startup temp sweep.

pub mod config;
pub mod converter;
pub mod error;
pub mod placement;
pub mod planner;
pub mod resize;
pub mod sweep;

pub use config::AppConfig;
pub use converter::{Converter, Outcome, RunSummary};
pub use error::{ConvertError, Step};
pub use planner::{ExpectedPaths, Planner};
