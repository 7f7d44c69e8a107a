//! Vicinity Deterministic Simulation Harness
//!
//! Runs the proximity engine against a controlled world:
//! - **Time**: a virtual clock that moves only when advanced or slept on
//! - **Feeds**: simulated GPS sources with seeded noise and scripted outages
//! - **Randomness**: all entropy derived from a single 64-bit seed
//!
//! # Usage
//!
//! ```ignore
//! use vicinity_sim::{ScenarioRunner, scenarios::ScenarioId};
//!
//! let result = ScenarioRunner::new(42).run(ScenarioId::TruckApproach);
//! assert!(result.passed);
//! ```

mod context;
mod error;
mod exporter;
mod runner;
mod source;
pub mod scenarios;

pub use context::SimContext;
pub use error::{Result, SimError};
pub use exporter::{SimEvent, SimExport, SimFrame};
pub use runner::{ScenarioResult, ScenarioRunner};
pub use source::SimPositionSource;
