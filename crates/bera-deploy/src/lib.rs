//! Bera Host deploy pipeline.
//!
//! A deploy is a detached tokio task that walks a [`DeployScript`] of
//! timed steps, publishing one build log line per step through the
//! [`EventBus`](bera_stream::EventBus), then marks the application running
//! and records a release.
//!
//! # Components
//!
//! - **`pipeline`**: `DeployPipeline`, start/cancel and the run loop
//! - **`script`**: the step list and the standard build script
//! - **`timer`**: injectable delay between steps

pub mod error;
pub mod pipeline;
pub mod script;
pub mod timer;

pub use error::DeployError;
pub use pipeline::{DeployOutcome, DeployPipeline, DeployRequest, DeployTicket};
pub use script::{DeployScript, LIVE_URL_BASE, Step, StepAction};
pub use timer::{ImmediateTimer, Timer, TokioTimer};
