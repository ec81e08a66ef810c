//! Image descriptors and the planar sample buffer handed to the solving engine.

use ndarray::ArrayView3;

use crate::error::{Error, Result};

/// FITS `BITPIX` codes understood by the element type table.
pub mod bitpix {
    /// 8-bit unsigned integer.
    pub const BYTE_IMG: i32 = 8;
    /// 16-bit signed integer, read as unsigned.
    pub const SHORT_IMG: i32 = 16;
    /// 16-bit unsigned integer.
    pub const USHORT_IMG: i32 = 20;
    /// 32-bit signed integer, read as unsigned.
    pub const LONG_IMG: i32 = 32;
    /// 32-bit unsigned integer.
    pub const ULONG_IMG: i32 = 40;
    /// 32-bit IEEE float.
    pub const FLOAT_IMG: i32 = -32;
    /// 64-bit signed integer.
    pub const LONGLONG_IMG: i32 = 64;
    /// 64-bit IEEE float.
    pub const DOUBLE_IMG: i32 = -64;
}

/// Sample type of a planar buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ElementType {
    /// `u8`
    Byte,
    /// `u16`
    UnsignedShort,
    /// `u32`
    UnsignedLong,
    /// `f32`
    Float,
    /// `i64`
    SignedLongLong,
    /// `f64`
    Double,
}

/// Maps FITS bit depths onto the element type the engine stores them as.
const BITPIX_TABLE: [(i32, ElementType); 8] = [
    (bitpix::BYTE_IMG, ElementType::Byte),
    (bitpix::SHORT_IMG, ElementType::UnsignedShort),
    (bitpix::USHORT_IMG, ElementType::UnsignedShort),
    (bitpix::LONG_IMG, ElementType::UnsignedLong),
    (bitpix::ULONG_IMG, ElementType::UnsignedLong),
    (bitpix::FLOAT_IMG, ElementType::Float),
    (bitpix::LONGLONG_IMG, ElementType::SignedLongLong),
    (bitpix::DOUBLE_IMG, ElementType::Double),
];

impl ElementType {
    /// Look up the element type for a FITS bit depth.
    pub fn from_bitpix(bitpix: i32) -> Result<Self> {
        BITPIX_TABLE
            .iter()
            .find(|(code, _)| *code == bitpix)
            .map(|(_, ty)| *ty)
            .ok_or(Error::UnsupportedBitDepth(bitpix))
    }

    /// Size of one sample in bytes.
    pub const fn bytes_per_element(self) -> usize {
        match self {
            ElementType::Byte => size_of::<u8>(),
            ElementType::UnsignedShort => size_of::<u16>(),
            ElementType::UnsignedLong => size_of::<u32>(),
            ElementType::Float => size_of::<f32>(),
            ElementType::SignedLongLong => size_of::<i64>(),
            ElementType::Double => size_of::<f64>(),
        }
    }
}

/// Shape and sample type of a planar buffer.
///
/// Construct it with [`ImageDescriptor::new`] so that the derived fields
/// (`sample_pixel_count`, `bytes_per_element`) always agree with the others.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ImageDescriptor {
    width: u32,
    height: u32,
    channels: usize,
    sample_pixel_count: usize,
    element_type: ElementType,
    bytes_per_element: usize,
}

impl ImageDescriptor {
    /// Create a descriptor for a `width`x`height` image with `channels` planes.
    pub fn new(width: u32, height: u32, channels: usize, element_type: ElementType) -> Self {
        Self {
            width,
            height,
            channels,
            sample_pixel_count: (width as usize).saturating_mul(height as usize),
            element_type,
            bytes_per_element: element_type.bytes_per_element(),
        }
    }

    /// Width in pixels.
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Height in pixels.
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Number of planes.
    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Samples per plane, `width * height`.
    pub fn sample_pixel_count(&self) -> usize {
        self.sample_pixel_count
    }

    /// Sample type.
    pub fn element_type(&self) -> ElementType {
        self.element_type
    }

    /// Size of one sample in bytes.
    pub fn bytes_per_element(&self) -> usize {
        self.bytes_per_element
    }

    /// Size of one plane in bytes, or `None` on overflow.
    pub fn plane_size(&self) -> Option<usize> {
        self.sample_pixel_count.checked_mul(self.bytes_per_element)
    }

    /// Size of the whole buffer in bytes, or `None` on overflow.
    pub fn total_size(&self) -> Option<usize> {
        self.plane_size()?.checked_mul(self.channels)
    }
}

/// Owned planar sample memory, one contiguous plane per channel.
///
/// Planes are ordered red, green, blue. The buffer is immutable once built, so
/// the controller can lend it to an engine worker without sharing mutation.
#[derive(Debug, PartialEq, Eq)]
pub struct PlanarBuffer {
    descriptor: ImageDescriptor,
    data: Box<[u8]>,
}

impl PlanarBuffer {
    /// Allocate a zeroed buffer matching `descriptor`.
    ///
    /// Fails with [`Error::OutOfMemory`] if the size overflows or the
    /// allocation is refused. Nothing is left allocated on failure.
    pub(crate) fn allocate(descriptor: ImageDescriptor) -> Result<Self> {
        let requested = descriptor.total_size().ok_or(Error::OutOfMemory(usize::MAX))?;
        let mut data = Vec::new();
        data.try_reserve_exact(requested)
            .map_err(|_| Error::OutOfMemory(requested))?;
        data.resize(requested, 0);
        Ok(Self {
            descriptor,
            data: data.into_boxed_slice(),
        })
    }

    /// Shape and sample type.
    pub fn descriptor(&self) -> &ImageDescriptor {
        &self.descriptor
    }

    /// Total size in bytes.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the buffer holds no samples.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// All planes as raw bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// The raw bytes of plane `channel`, or `None` if it does not exist.
    pub fn plane(&self, channel: usize) -> Option<&[u8]> {
        if channel >= self.descriptor.channels {
            return None;
        }
        let plane = self.plane_len();
        self.data.get(channel * plane..(channel + 1) * plane)
    }

    /// Byte buffers viewed as `(channel, row, column)`. `None` for wider samples.
    pub fn planes(&self) -> Option<ArrayView3<'_, u8>> {
        if self.descriptor.element_type != ElementType::Byte {
            return None;
        }
        let shape = (
            self.descriptor.channels,
            self.descriptor.height as usize,
            self.descriptor.width as usize,
        );
        ArrayView3::from_shape(shape, &self.data).ok()
    }

    /// Split the three colour planes for writing.
    pub(crate) fn rgb_planes_mut(&mut self) -> Option<(&mut [u8], &mut [u8], &mut [u8])> {
        if self.descriptor.channels != 3 {
            return None;
        }
        let plane = self.plane_len();
        let (red, rest) = self.data.split_at_mut(plane);
        let (green, blue) = rest.split_at_mut(plane);
        Some((red, green, blue))
    }

    fn plane_len(&self) -> usize {
        self.descriptor.sample_pixel_count * self.descriptor.bytes_per_element
    }
}

/// A decoded, interleaved source image with 4 bytes per pixel in the order blue, green, red, alpha.
#[derive(Clone, Copy, Debug)]
pub struct SourceImage<'a> {
    width: u32,
    height: u32,
    bitpix: i32,
    data: &'a [u8],
}

impl<'a> SourceImage<'a> {
    /// Bytes per interleaved source pixel.
    pub const BYTES_PER_PIXEL: usize = 4;

    /// Wrap a BGRA byte slice. The slice length must be exactly `width * height * 4`.
    pub fn bgra(width: u32, height: u32, data: &'a [u8]) -> Result<Self> {
        let expected = (width as usize)
            .checked_mul(height as usize)
            .and_then(|n| n.checked_mul(Self::BYTES_PER_PIXEL))
            .ok_or_else(|| Error::InvalidImage(format!("{width}x{height} overflows")))?;
        if expected == 0 {
            return Err(Error::InvalidImage(format!("{width}x{height} image is empty")));
        }
        if data.len() != expected {
            return Err(Error::InvalidImage(format!(
                "expected {expected} bytes for {width}x{height} BGRA, got {}",
                data.len()
            )));
        }
        Ok(Self {
            width,
            height,
            bitpix: bitpix::BYTE_IMG,
            data,
        })
    }

    /// Request a target bit depth other than 8 bits per channel.
    pub fn with_bit_depth(mut self, bitpix: i32) -> Self {
        self.bitpix = bitpix;
        self
    }

    /// Width in pixels.
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Height in pixels.
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Requested FITS bit depth.
    pub fn bitpix(&self) -> i32 {
        self.bitpix
    }

    /// Interleaved BGRA bytes.
    pub fn data(&self) -> &'a [u8] {
        self.data
    }
}
