//! The public solving facade.

use std::path::PathBuf;
use std::sync::Arc;

use log::{error, info, warn};

use crate::buffer::{ImageDescriptor, PlanarBuffer, SourceImage};
use crate::config::{
    ControllerConfig, EngineConfig, ExtractorKind, ProcessKind, ScaleUnits, SearchPosition,
    SearchScale, SolverKind,
};
use crate::convert::PixelBufferConverter;
use crate::engine::SolverBackend;
use crate::error::{Error, Result};
use crate::lifecycle::{LifecycleState, SolverLifecycleManager, SolverListener};
use crate::params::ProfileCatalog;

/// Plate solving controller for one image at a time.
///
/// Load an image with [`set_image`](Self::set_image), adjust the search hints and
/// parameter profile, then call [`start_solve`](Self::start_solve). Results are
/// delivered to the [`SolverListener`] given at construction.
///
/// Example:
/// ```rust
/// # use std::sync::{mpsc, Arc};
/// # use platectl::{ControllerEvent, SolveController, SourceImage};
/// # use platectl::engine::{RunContext, RunOutcome, SolveRequest, SolverBackend};
/// struct Nothing;
///
/// impl SolverBackend for Nothing {
///     fn run(&self, _: &SolveRequest, _: &RunContext) -> RunOutcome {
///         RunOutcome::NoSolution
///     }
/// }
///
/// let (tx, rx) = mpsc::channel();
/// let mut controller = SolveController::new(Arc::new(Nothing), Arc::new(tx));
/// let bgra = vec![0u8; 8 * 8 * 4];
/// controller.set_image(SourceImage::bgra(8, 8, &bgra).unwrap()).unwrap();
/// controller.set_search_scale(true, 0.5, 2.);
/// controller.start_solve().unwrap();
///
/// let complete = rx.iter().find_map(|event| match event {
///     ControllerEvent::Complete(outcome) => Some(outcome),
///     ControllerEvent::Log(_) => None,
/// });
/// assert!(!complete.unwrap().success);
/// ```
pub struct SolveController {
    config: ControllerConfig,
    catalog: ProfileCatalog,
    profile: usize,
    scale_enabled: bool,
    scale: SearchScale,
    position_enabled: bool,
    position: SearchPosition,
    converter: PixelBufferConverter,
    lifecycle: SolverLifecycleManager,
    listener: Arc<dyn SolverListener>,
}

impl SolveController {
    /// Create a controller with the default [`ControllerConfig`].
    pub fn new(backend: Arc<dyn SolverBackend>, listener: Arc<dyn SolverListener>) -> Self {
        Self::with_config(backend, listener, ControllerConfig::default())
    }

    /// Create a controller with custom settings.
    ///
    /// The parameter profiles are read from `backend` once, here.
    pub fn with_config(
        backend: Arc<dyn SolverBackend>,
        listener: Arc<dyn SolverListener>,
        config: ControllerConfig,
    ) -> Self {
        let catalog = ProfileCatalog::new(backend.builtin_profiles());
        let profile = if config.default_profile < catalog.len() {
            config.default_profile
        } else {
            0
        };
        let lifecycle =
            SolverLifecycleManager::new(backend, listener.clone(), config.restart_timeout);
        let converter = match config.memory_limit {
            Some(limit) => PixelBufferConverter::new().with_memory_limit(limit),
            None => PixelBufferConverter::new(),
        };

        Self {
            config,
            catalog,
            profile,
            scale_enabled: false,
            scale: SearchScale {
                min: 0.,
                max: 0.,
                units: ScaleUnits::DegWidth,
            },
            position_enabled: false,
            position: SearchPosition {
                ra_deg: 0.,
                dec_deg: 0.,
            },
            converter,
            lifecycle,
            listener,
        }
    }

    /// Convert and install a new image, binding a fresh engine instance to it.
    ///
    /// An active solve is superseded and will not report completion. If the bit
    /// depth is rejected the previous image stays loaded; any other failure leaves
    /// no image loaded.
    ///
    /// The engine instance bound to the previous image is dropped before the new
    /// buffer is allocated. Only a superseded run that is still winding down may
    /// keep the previous buffer alive past this point.
    pub fn set_image(&mut self, source: SourceImage<'_>) -> Result<ImageDescriptor> {
        if let Err(err) = self.converter.check(&source) {
            self.report(&err);
            return Err(err);
        }

        self.lifecycle.release();
        match self.converter.load(source) {
            Ok(buffer) => {
                let descriptor = *buffer.descriptor();
                self.lifecycle.reset(buffer);
                self.listener.on_log_output("Image loaded.");
                Ok(descriptor)
            }
            Err(err) => {
                self.report(&err);
                Err(err)
            }
        }
    }

    /// Restrict the next solves to a field width between `min` and `max` degrees.
    pub fn set_search_scale(&mut self, enabled: bool, min: f64, max: f64) {
        self.scale_enabled = enabled;
        self.scale.min = min;
        self.scale.max = max;
    }

    /// Change the units of the scale hint.
    pub fn set_search_scale_units(&mut self, units: ScaleUnits) {
        self.scale.units = units;
    }

    /// Restrict the next solves to the neighbourhood of a sky position, in degrees.
    pub fn set_search_position(&mut self, enabled: bool, ra_deg: f64, dec_deg: f64) {
        self.position_enabled = enabled;
        self.position = SearchPosition { ra_deg, dec_deg };
    }

    /// Select the parameter profile of the next solves.
    pub fn set_parameter_profile(&mut self, index: usize) -> Result<()> {
        if let Err(err) = self.catalog.get(index) {
            self.report(&err);
            return Err(err);
        }
        self.profile = index;
        Ok(())
    }

    /// Index of the selected parameter profile.
    pub fn parameter_profile(&self) -> usize {
        self.profile
    }

    /// The engine's parameter profiles.
    pub fn profiles(&self) -> &ProfileCatalog {
        &self.catalog
    }

    /// Set the folders searched for index files by the next solves.
    pub fn set_index_folders<I, P>(&mut self, folders: I)
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        self.config.index_folders = folders.into_iter().map(Into::into).collect();
    }

    /// Start solving the loaded image.
    ///
    /// An active solve is aborted first, and this call waits for it to report
    /// completion. Errors found before the run is launched are returned here;
    /// everything after arrives through [`SolverListener::on_solver_complete`].
    pub fn start_solve(&mut self) -> Result<()> {
        let started = self
            .engine_config()
            .and_then(|(buffer, config)| self.lifecycle.start(buffer, config));
        if let Err(err) = &started {
            self.report(err);
        }
        started
    }

    /// Ask the active solve to stop. Does nothing when no solve is active.
    pub fn stop_solve(&self) {
        self.lifecycle.abort();
    }

    /// Whether a solve is in progress.
    ///
    /// An engine instance that was created or configured but not started is not active.
    pub fn is_solving_active(&self) -> bool {
        self.lifecycle.is_active()
    }

    /// Lifecycle state of the current engine instance.
    pub fn state(&self) -> LifecycleState {
        self.lifecycle.state()
    }

    /// Descriptor of the loaded image.
    pub fn descriptor(&self) -> Option<&ImageDescriptor> {
        self.converter.current().map(|b| b.descriptor())
    }

    /// The loaded image.
    pub fn buffer(&self) -> Option<&Arc<PlanarBuffer>> {
        self.converter.current()
    }

    fn engine_config(&self) -> Result<(Arc<PlanarBuffer>, EngineConfig)> {
        let buffer = self.converter.current().cloned().ok_or(Error::NoImage)?;
        let parameters = self.catalog.get(self.profile)?.clone();
        info!("Solving with profile {}.", parameters.list_name);

        let config = EngineConfig {
            process: ProcessKind::Solve,
            extractor: ExtractorKind::Internal,
            solver: SolverKind::Internal,
            parameters,
            subframe: None,
            scale: self.scale_enabled.then_some(self.scale),
            position: self.position_enabled.then_some(self.position),
            index_folders: self.config.index_folders.clone(),
            log: self.config.log.clone(),
        };
        Ok((buffer, config))
    }

    /// Log `err` and forward it to the listener.
    fn report(&self, err: &Error) {
        let text = match err {
            // Already logged by the converter.
            Error::UnsupportedBitDepth(bitpix) => format!("Bit depth {bitpix} is not supported."),
            Error::OutOfMemory(bytes) => {
                error!("Image buffer allocation of {bytes} bytes failed.");
                format!("Not enough memory for image buffer. Requested: {bytes} bytes")
            }
            other => {
                warn!("{other}");
                other.to_string()
            }
        };
        self.listener.on_log_output(&text);
    }
}
