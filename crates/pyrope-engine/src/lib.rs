//! Pyrope profiler engine.
//!
//! A statistical sampling profiler for managed interpreter runtimes. The
//! embedding runtime exposes its threads through the [`RuntimeHost`] seam;
//! the engine periodically snapshots every thread's frame chain under the
//! runtime's global execution lock, folds identical stacks into counts, and
//! serialises the aggregate in the folded text format consumed by
//! `pyrope-flame`.
//!
//! The crate is organised leaves-first:
//! - **frame**: frame records and the canonical-string filter chain
//! - **folded**: the stack folder and aggregation table
//! - **sampler**: the state machine and the two sampling engines
//!   (signal-driven and worker-thread)
//! - **topology**: fork/spawn propagation, exit guarding, and the
//!   per-process save/merge policy
//!
//! # Example
//!
//! ```rust,ignore
//! use pyrope_engine::{Sampler, SamplerConfig, sim::SimRuntime};
//!
//! let host = std::sync::Arc::new(SimRuntime::new());
//! let sampler = Sampler::worker(host, SamplerConfig::default())?;
//! sampler.start()?;
//! // ... run the workload ...
//! sampler.stop()?;
//! println!("{}", sampler.dumps());
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod config;
pub mod error;
pub mod folded;
pub mod frame;
pub mod middleware;
pub mod runtime;
pub mod sampler;
pub mod topology;

pub use config::{SamplerConfig, SaveOptions, SessionConfig, TimerSource, MIN_INTERVAL_US};
pub use error::{EngineError, Result};
pub use folded::StackTable;
pub use frame::{Frame, FrameFilters};
pub use middleware::Middleware;
pub use runtime::{sim, RuntimeHost, ThreadStack};
pub use sampler::{Sampler, SamplerMetrics, SamplerState};
pub use topology::ProcessRole;
