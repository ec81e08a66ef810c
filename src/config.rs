//! Typed engine configuration and controller settings.

use std::path::{Path, PathBuf};
use std::time::Duration;

use log::warn;

use crate::params::{PARALLEL_LARGE_SCALE, SolveParameters};

/// Which process the engine runs.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ProcessKind {
    /// Extract sources only.
    Extract,
    /// Extract sources and measure their half flux radius.
    ExtractWithHfr,
    /// Extract sources and plate solve.
    #[default]
    Solve,
}

/// Source extractor used by the engine.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ExtractorKind {
    /// The engine's built-in extractor.
    #[default]
    Internal,
    /// An external extractor program.
    External,
}

/// Plate solver used by the engine.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SolverKind {
    /// The engine's built-in solver.
    #[default]
    Internal,
    /// A locally installed astrometry.net.
    LocalAstrometry,
    /// The astrometry.net web service.
    OnlineAstrometry,
}

/// Units of a [`SearchScale`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ScaleUnits {
    /// Field width in degrees.
    #[default]
    DegWidth,
    /// Field width in arcminutes.
    ArcminWidth,
    /// Pixel scale in arcseconds per pixel.
    ArcsecPerPixel,
    /// Focal length in millimetres.
    FocalMm,
}

/// Verbosity of engine log output.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    /// No output.
    Off,
    /// Only important messages.
    Minimal,
    /// Progress messages.
    #[default]
    Normal,
    /// Everything.
    All,
}

/// Restrict the search to a range of image scales.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SearchScale {
    /// Lower bound.
    pub min: f64,
    /// Upper bound.
    pub max: f64,
    /// Units of `min` and `max`.
    pub units: ScaleUnits,
}

/// Restrict the search to a neighbourhood of a sky position.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SearchPosition {
    /// Right ascension, degrees.
    pub ra_deg: f64,
    /// Declination, degrees.
    pub dec_deg: f64,
}

/// Rectangle of the image the engine should restrict itself to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SubFrame {
    /// Left edge in pixels.
    pub x: u32,
    /// Top edge in pixels.
    pub y: u32,
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

/// Engine log routing.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct LogSettings {
    /// Verbosity of the solver core.
    pub solver_level: LogLevel,
    /// Verbosity of the engine's own progress messages.
    pub engine_level: LogLevel,
    /// Additional log file, if any.
    pub log_file: Option<PathBuf>,
}

/// Everything an engine instance needs for one run.
///
/// Built fresh for every run; the engine never sees later changes.
#[derive(Clone, Debug, PartialEq)]
pub struct EngineConfig {
    /// Process to run.
    pub process: ProcessKind,
    /// Source extractor.
    pub extractor: ExtractorKind,
    /// Plate solver.
    pub solver: SolverKind,
    /// Parameter snapshot.
    pub parameters: SolveParameters,
    /// Sub-frame restriction. Cleared for every solve.
    pub subframe: Option<SubFrame>,
    /// Scale search hint.
    pub scale: Option<SearchScale>,
    /// Position search hint.
    pub position: Option<SearchPosition>,
    /// Folders containing index files.
    pub index_folders: Vec<PathBuf>,
    /// Log routing.
    pub log: LogSettings,
}

impl EngineConfig {
    /// A solve run with the built-in extractor and solver and no hints.
    pub fn solve(parameters: SolveParameters) -> Self {
        Self {
            process: ProcessKind::Solve,
            extractor: ExtractorKind::Internal,
            solver: SolverKind::Internal,
            parameters,
            subframe: None,
            scale: None,
            position: None,
            index_folders: Vec::new(),
            log: LogSettings::default(),
        }
    }
}

/// Default location of astrometry.net index files.
pub const DEFAULT_INDEX_FOLDER: &str = "/usr/share/astrometry/";

/// Settings of a [`SolveController`](crate::SolveController).
///
/// Use the `with_*` functions to change the defaults.
#[derive(Clone, Debug, PartialEq)]
pub struct ControllerConfig {
    pub(crate) index_folders: Vec<PathBuf>,
    pub(crate) log: LogSettings,
    pub(crate) restart_timeout: Duration,
    pub(crate) default_profile: usize,
    pub(crate) memory_limit: Option<usize>,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            index_folders: vec![PathBuf::from(DEFAULT_INDEX_FOLDER)],
            log: LogSettings {
                solver_level: LogLevel::Off,
                engine_level: LogLevel::Normal,
                log_file: None,
            },
            restart_timeout: Duration::from_secs(30),
            default_profile: PARALLEL_LARGE_SCALE,
            memory_limit: None,
        }
    }
}

impl ControllerConfig {
    /// Set the folders searched for index files.
    pub fn with_index_folders<I, P>(mut self, folders: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        self.index_folders = folders.into_iter().map(Into::into).collect();
        self
    }

    /// Set the solver core and engine log levels.
    pub fn with_log_levels(mut self, solver_level: LogLevel, engine_level: LogLevel) -> Self {
        self.log.solver_level = solver_level;
        self.log.engine_level = engine_level;
        self
    }

    /// Also write engine logs to `path`.
    ///
    /// Ignored with a warning unless the parent folder exists and `path` is not a folder.
    pub fn with_log_file(mut self, path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        let parent_exists = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.is_dir(),
            _ => true,
        };
        if parent_exists && !path.is_dir() {
            self.log.log_file = Some(path.to_path_buf());
        } else {
            warn!("Ignoring log file {}: not a writable file location.", path.display());
        }
        self
    }

    /// Set how long a restart waits for the previous run to stop.
    pub fn with_restart_timeout(mut self, timeout: Duration) -> Self {
        self.restart_timeout = timeout;
        self
    }

    /// Set the profile selected at construction.
    pub fn with_default_profile(mut self, index: usize) -> Self {
        self.default_profile = index;
        self
    }

    /// Limit the planar image data kept alive at once.
    ///
    /// Images that do not fit fail to load with [`Error::OutOfMemory`](crate::Error::OutOfMemory).
    pub fn with_memory_limit(mut self, bytes: usize) -> Self {
        self.memory_limit = Some(bytes);
        self
    }

    /// Folders searched for index files.
    pub fn index_folders(&self) -> &[PathBuf] {
        &self.index_folders
    }

    /// Log routing.
    pub fn log(&self) -> &LogSettings {
        &self.log
    }
}
