#![warn(missing_docs)]

//! Plate solving controller for decoded camera images. \
//! It prepares an image for an astrometric solving engine, drives the engine through a single-flight
//! lifecycle, and republishes its log output and exactly one completion event per solve.
//! The extraction and solving algorithm itself is a black box behind the [`SolverBackend`](engine::SolverBackend) trait.
//!
//! ## Interface
//! The central struct of this library is [`SolveController`]. It is created with a backend and a
//! [`SolverListener`] receiving the events. Images are loaded with [`SolveController::set_image()`],
//! hints and the parameter profile are set via `SolveController::set_*()` functions, and
//! [`SolveController::start_solve()`] launches a run. \
//! An `std::sync::mpsc::Sender<ControllerEvent>` is a ready-made listener.
//!
//! Example:
//! ```rust,ignore
//! let mut controller = SolveController::new(backend, Arc::new(tx));
//! controller.set_image(SourceImage::bgra(width, height, &bgra)?)?;
//! controller.set_search_position(true, 83.8, -5.4);
//! controller.start_solve()?;
//! ```
//!
//! Starting a solve while another one is active aborts the old run and waits (bounded by
//! [`ControllerConfig::with_restart_timeout()`]) for it to report before the new one begins.
//! Loading a new image supersedes the active run; a superseded run never reports completion.
//!
//! ## Conversion
//! Images arrive as interleaved BGRA bytes and are split into red, green and blue planes by
//! [`convert()`]. With the `parallel` feature (enabled by default) [`convert_par()`] does the same
//! using rayon. Only 8 bits per channel are currently supported, see [`buffer::ElementType`].
//!
//! ## Parameters
//! Engines offer a catalog of named [`SolveParameters`](params::SolveParameters) profiles, read
//! once when the controller is created. The profile is selected by index with
//! [`SolveController::set_parameter_profile()`]. Every run receives its own snapshot of the
//! selected profile.

pub mod buffer;
pub mod config;
mod controller;
mod convert;
pub mod engine;
mod error;
mod lifecycle;
pub mod params;
pub mod solution;

#[cfg(test)]
mod test_utils;

pub use buffer::{ImageDescriptor, PlanarBuffer, SourceImage};
pub use config::ControllerConfig;
pub use controller::SolveController;
#[cfg(feature = "parallel")]
pub use convert::convert_par;
pub use convert::{CHANNELS, PixelBufferConverter, convert};
pub use error::{Error, Result};
pub use lifecycle::{
    ControllerEvent, LifecycleState, SolveOutcome, SolverLifecycleManager, SolverListener,
};
pub use solution::{Parity, Solution};
