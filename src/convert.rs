//! Conversion of interleaved BGRA images into planar RGB buffers.
//!
//! The engine expects one contiguous plane per channel, ordered red, green, blue.
//! Sources carry 8 bits per channel, so only [`ElementType::Byte`] targets are
//! produced at the moment; other entries of the bit depth table are rejected with
//! [`Error::UnsupportedBitDepth`] before anything is allocated.

use std::sync::{Arc, Weak};

use itertools::izip;
use log::{debug, warn};

use crate::buffer::{ElementType, ImageDescriptor, PlanarBuffer, SourceImage};
use crate::error::{Error, Result};

/// Number of planes written for colour sources.
pub const CHANNELS: usize = 3;

/// Convert `source` into a freshly allocated planar buffer.
///
/// # Example:
/// ```
/// # use platectl::{convert, SourceImage};
/// let bgra = [30, 20, 10, 255, 3, 2, 1, 255];
/// let buffer = convert(SourceImage::bgra(2, 1, &bgra).unwrap()).unwrap();
/// assert_eq!(buffer.as_bytes(), &[10, 1, 20, 2, 30, 3]);
/// ```
pub fn convert(source: SourceImage<'_>) -> Result<PlanarBuffer> {
    let mut buffer = prepare(&source)?;
    if let Some((red, green, blue)) = buffer.rgb_planes_mut() {
        deinterleave_bgra(source.data(), red, green, blue);
    }
    Ok(buffer)
}

/// Element type the planes of `source` are written as.
fn target_element_type(source: &SourceImage<'_>) -> Result<ElementType> {
    match ElementType::from_bitpix(source.bitpix())? {
        ElementType::Byte => Ok(ElementType::Byte),
        _ => Err(Error::UnsupportedBitDepth(source.bitpix())),
    }
}

/// Resolve the target element type and allocate the destination.
fn prepare(source: &SourceImage<'_>) -> Result<PlanarBuffer> {
    let element_type = target_element_type(source)?;
    let descriptor = ImageDescriptor::new(source.width(), source.height(), CHANNELS, element_type);
    let buffer = PlanarBuffer::allocate(descriptor)?;
    debug!(
        "Allocated {} byte planar buffer for {}x{} image.",
        buffer.len(),
        descriptor.width(),
        descriptor.height()
    );
    Ok(buffer)
}

/// Split BGRA pixels into separate planes. Alpha is dropped.
///
/// Every pixel, including the last one, is written exactly once.
fn deinterleave_bgra(src: &[u8], red: &mut [u8], green: &mut [u8], blue: &mut [u8]) {
    for (px, r, g, b) in izip!(src.chunks_exact(SourceImage::BYTES_PER_PIXEL), red, green, blue) {
        *r = px[2];
        *g = px[1];
        *b = px[0];
    }
}

/// Owner of the controller's current planar buffer.
///
/// Loading a new image releases the previous buffer before the new one is
/// allocated. A rejected bit depth leaves the previous buffer installed; any
/// later failure leaves no buffer at all.
#[derive(Debug, Default)]
pub struct PixelBufferConverter {
    current: Option<Arc<PlanarBuffer>>,
    last: Weak<PlanarBuffer>,
    memory_limit: Option<usize>,
}

impl PixelBufferConverter {
    /// Create a converter without an image.
    pub fn new() -> Self {
        Self::default()
    }

    /// Refuse allocations that would keep more than `bytes` of planar data alive.
    ///
    /// A previous buffer still shared with an engine counts against the limit.
    pub fn with_memory_limit(mut self, bytes: usize) -> Self {
        self.memory_limit = Some(bytes);
        self
    }

    /// The buffer installed by the last successful [`load`](Self::load).
    pub fn current(&self) -> Option<&Arc<PlanarBuffer>> {
        self.current.as_ref()
    }

    /// Check that `source` can be converted, without touching the current buffer.
    pub fn check(&self, source: &SourceImage<'_>) -> Result<()> {
        match target_element_type(source) {
            Ok(_) => Ok(()),
            Err(err) => {
                warn!("Bit depth {} is not supported.", source.bitpix());
                Err(err)
            }
        }
    }

    /// Convert `source` and install the result as the current buffer.
    pub fn load(&mut self, source: SourceImage<'_>) -> Result<Arc<PlanarBuffer>> {
        self.check(&source)?;
        self.release();
        self.reserve(&source)?;

        #[cfg(feature = "parallel")]
        let converted = convert_par(source);
        #[cfg(not(feature = "parallel"))]
        let converted = convert(source);

        let buffer = Arc::new(converted?);
        self.last = Arc::downgrade(&buffer);
        self.current = Some(buffer.clone());
        Ok(buffer)
    }

    /// Drop the current buffer, if any.
    pub fn release(&mut self) {
        if let Some(previous) = self.current.take() {
            debug!("Releasing {} byte planar buffer.", previous.len());
        }
    }

    /// Enforce the memory limit for converting `source`.
    fn reserve(&self, source: &SourceImage<'_>) -> Result<()> {
        let Some(limit) = self.memory_limit else {
            return Ok(());
        };
        let descriptor = ImageDescriptor::new(
            source.width(),
            source.height(),
            CHANNELS,
            target_element_type(source)?,
        );
        let requested = descriptor.total_size().unwrap_or(usize::MAX);
        let retained = self.last.upgrade().map_or(0, |previous| previous.len());
        if requested.saturating_add(retained) > limit {
            debug!(
                "{requested} bytes requested with {retained} bytes still in use, limit is {limit}."
            );
            return Err(Error::OutOfMemory(requested));
        }
        Ok(())
    }
}

#[cfg(feature = "parallel")]
pub use parallel::*;

#[cfg(feature = "parallel")]
mod parallel {
    use super::*;
    use rayon::prelude::*;

    /// Pixels handled per rayon task.
    const PIXELS_PER_TASK: usize = 1 << 14;

    /// Convert `source` into a planar buffer, deinterleaving in parallel.
    ///
    /// Also see [`convert`] for more details.
    pub fn convert_par(source: SourceImage<'_>) -> Result<PlanarBuffer> {
        let mut buffer = prepare(&source)?;
        if let Some((red, green, blue)) = buffer.rgb_planes_mut() {
            source
                .data()
                .par_chunks(PIXELS_PER_TASK * SourceImage::BYTES_PER_PIXEL)
                .zip(red.par_chunks_mut(PIXELS_PER_TASK))
                .zip(green.par_chunks_mut(PIXELS_PER_TASK))
                .zip(blue.par_chunks_mut(PIXELS_PER_TASK))
                .for_each(|(((src, r), g), b)| deinterleave_bgra(src, r, g, b));
        }
        Ok(buffer)
    }
}
