//! Vicinity Environment Abstraction Layer
//!
//! This crate provides the seam that lets the proximity engine run against
//! a real device (tokio clock, GPS provider) or inside the deterministic
//! simulation harness (virtual clock, scripted position feeds).
//!
//! Everything the engine would otherwise reach for as an ambient global is
//! injected through these traits:
//! - Time (`Clock::now()`, `Clock::system_time()`, `VicinityContext::sleep()`)
//! - Background work (`VicinityContext::spawn()`)
//! - Position fixes (`PositionSource::current_fix()`)
//!
//! # Example
//!
//! ```ignore
//! use vicinity_env::{PositionSource, VicinityContext};
//!
//! async fn sample_loop<Ctx: VicinityContext, Src: PositionSource>(ctx: &Ctx, gps: &Src) {
//!     loop {
//!         if let Ok(fix) = gps.current_fix().await {
//!             handle_fix(fix);
//!         }
//!         ctx.sleep(Duration::from_secs(5)).await;
//!     }
//! }
//! ```

mod context;
mod source;
mod types;
mod error;
mod tokio_impl;

pub use context::{Clock, VicinityContext};
pub use source::PositionSource;
pub use types::PositionFix;
pub use error::EnvError;
pub use tokio_impl::TokioContext;
