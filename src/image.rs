//! Pixel buffers handed to and returned by codec adapters.
//!
//! [`ImageBuffer`] is a row-major byte buffer with an explicit stride and
//! [`PixelFormat`]. It converts to and from `imgref` images of `rgb` pixels so
//! callers can keep using the same types as the rest of the image stack.

use std::borrow::Cow;
use std::fmt;

use imgref::{ImgRef, ImgVec};
use rgb::{RGB8, RGBA8};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Layout of a single pixel.
///
/// 16-bit formats store samples in native byte order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PixelFormat {
    /// 8-bit luma.
    Gray8,
    /// 8-bit RGB.
    Rgb8,
    /// 8-bit RGBA, straight alpha.
    Rgba8,
    /// 8-bit RGBA, color premultiplied by alpha.
    Rgba8Premultiplied,
    /// 16-bit RGB.
    Rgb16,
    /// 16-bit RGBA, straight alpha.
    Rgba16,
}

impl PixelFormat {
    /// Number of channels, alpha included.
    pub const fn channels(self) -> usize {
        match self {
            Self::Gray8 => 1,
            Self::Rgb8 | Self::Rgb16 => 3,
            Self::Rgba8 | Self::Rgba8Premultiplied | Self::Rgba16 => 4,
        }
    }

    /// Bits per channel.
    pub const fn bits_per_channel(self) -> u32 {
        match self {
            Self::Rgb16 | Self::Rgba16 => 16,
            _ => 8,
        }
    }

    pub const fn bytes_per_channel(self) -> usize {
        (self.bits_per_channel() as usize).div_ceil(8)
    }

    pub const fn bytes_per_pixel(self) -> usize {
        self.channels() * self.bytes_per_channel()
    }

    pub const fn has_alpha(self) -> bool {
        matches!(self, Self::Rgba8 | Self::Rgba8Premultiplied | Self::Rgba16)
    }

    pub const fn is_premultiplied(self) -> bool {
        matches!(self, Self::Rgba8Premultiplied)
    }

    /// Color format holding `bits` per sample, with or without alpha.
    ///
    /// Returns `None` for bit depths no format stores.
    pub const fn rgb(bits: u32, alpha: bool, premultiplied: bool) -> Option<Self> {
        match (bits, alpha, premultiplied) {
            (1..=8, false, _) => Some(Self::Rgb8),
            (1..=8, true, false) => Some(Self::Rgba8),
            (1..=8, true, true) => Some(Self::Rgba8Premultiplied),
            (9..=16, false, _) => Some(Self::Rgb16),
            (9..=16, true, false) => Some(Self::Rgba16),
            _ => None,
        }
    }
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Gray8 => "Gray8",
            Self::Rgb8 => "RGB8",
            Self::Rgba8 => "RGBA8",
            Self::Rgba8Premultiplied => "premultiplied RGBA8",
            Self::Rgb16 => "RGB16",
            Self::Rgba16 => "RGBA16",
        };
        f.write_str(name)
    }
}

/// Owned row-major pixel buffer.
///
/// Invariants (checked at construction):
/// - width and height are non-zero,
/// - `stride >= width * bytes_per_pixel`,
/// - `data.len() >= (height - 1) * stride + width * bytes_per_pixel`.
#[derive(Clone, PartialEq, Eq)]
pub struct ImageBuffer {
    data: Vec<u8>,
    width: u32,
    height: u32,
    stride: usize,
    format: PixelFormat,
}

impl fmt::Debug for ImageBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImageBuffer")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("stride", &self.stride)
            .field("format", &self.format)
            .field("len", &self.data.len())
            .finish()
    }
}

impl ImageBuffer {
    /// Allocate a zeroed, tightly packed buffer.
    ///
    /// Fails instead of aborting when the size overflows or cannot be allocated,
    /// since dimensions often come straight from an untrusted header.
    pub fn new(width: u32, height: u32, format: PixelFormat) -> Result<Self> {
        let too_large = || {
            Error::InvalidImage(format!(
                "{width}x{height} {format} image does not fit in memory"
            ))
        };
        let stride = (width as usize)
            .checked_mul(format.bytes_per_pixel())
            .ok_or_else(too_large)?;
        let len = stride
            .checked_mul(height as usize)
            .ok_or_else(too_large)?;
        let mut data = Vec::new();
        data.try_reserve_exact(len).map_err(|_| too_large())?;
        data.resize(len, 0);
        Self::from_raw(data, width, height, stride, format)
    }

    /// Wrap existing bytes, validating the layout invariants.
    pub fn from_raw(
        data: Vec<u8>,
        width: u32,
        height: u32,
        stride: usize,
        format: PixelFormat,
    ) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(Error::InvalidImage(format!(
                "empty image {width}x{height}"
            )));
        }
        let Some(row_bytes) = (width as usize).checked_mul(format.bytes_per_pixel()) else {
            return Err(Error::InvalidImage(format!(
                "{width} pixel {format} rows overflow"
            )));
        };
        if stride < row_bytes {
            return Err(Error::InvalidImage(format!(
                "stride {stride} is smaller than a {width} pixel {format} row ({row_bytes} bytes)"
            )));
        }
        let Some(required) = Self::required_len(width, height, stride, format) else {
            return Err(Error::InvalidImage(format!(
                "{width}x{height} {format} image with stride {stride} overflows"
            )));
        };
        if data.len() < required {
            return Err(Error::InvalidImage(format!(
                "{} bytes for a {width}x{height} {format} image with stride {stride}, need {required}",
                data.len()
            )));
        }
        Ok(Self {
            data,
            width,
            height,
            stride,
            format,
        })
    }

    /// Minimum byte length of a buffer with this layout, `None` on overflow.
    pub fn required_len(
        width: u32,
        height: u32,
        stride: usize,
        format: PixelFormat,
    ) -> Option<usize> {
        let row_bytes = (width as usize).checked_mul(format.bytes_per_pixel())?;
        (height as usize)
            .saturating_sub(1)
            .checked_mul(stride)?
            .checked_add(row_bytes)
    }

    /// Copy an 8-bit RGB image.
    pub fn from_rgb8(img: ImgRef<'_, RGB8>) -> Result<Self> {
        let mut data = Vec::with_capacity(img.width() * img.height() * 3);
        for row in img.rows() {
            for p in row {
                data.extend_from_slice(&[p.r, p.g, p.b]);
            }
        }
        let stride = img.width() * 3;
        Self::from_raw(
            data,
            img.width() as u32,
            img.height() as u32,
            stride,
            PixelFormat::Rgb8,
        )
    }

    /// Copy an 8-bit RGBA image with straight alpha.
    pub fn from_rgba8(img: ImgRef<'_, RGBA8>) -> Result<Self> {
        let mut data = Vec::with_capacity(img.width() * img.height() * 4);
        for row in img.rows() {
            for p in row {
                data.extend_from_slice(&[p.r, p.g, p.b, p.a]);
            }
        }
        let stride = img.width() * 4;
        Self::from_raw(
            data,
            img.width() as u32,
            img.height() as u32,
            stride,
            PixelFormat::Rgba8,
        )
    }

    /// Copy out an 8-bit RGB image, `None` for other formats.
    pub fn to_rgb8(&self) -> Option<ImgVec<RGB8>> {
        if self.format != PixelFormat::Rgb8 {
            return None;
        }
        let pixels = (0..self.height)
            .flat_map(|y| self.row(y).chunks_exact(3))
            .map(|p| RGB8::new(p[0], p[1], p[2]))
            .collect();
        Some(ImgVec::new(pixels, self.width as usize, self.height as usize))
    }

    /// Copy out an 8-bit straight alpha RGBA image, `None` for other formats.
    pub fn to_rgba8(&self) -> Option<ImgVec<RGBA8>> {
        if self.format != PixelFormat::Rgba8 {
            return None;
        }
        let pixels = (0..self.height)
            .flat_map(|y| self.row(y).chunks_exact(4))
            .map(|p| RGBA8::new(p[0], p[1], p[2], p[3]))
            .collect();
        Some(ImgVec::new(pixels, self.width as usize, self.height as usize))
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Row pitch in bytes.
    pub fn stride(&self) -> usize {
        self.stride
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    /// Backing bytes, including any row padding.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Bytes covered by the image: up to the end of the last row's pixels.
    pub fn byte_len(&self) -> usize {
        (self.height as usize - 1) * self.stride + self.row_bytes()
    }

    fn row_bytes(&self) -> usize {
        self.width as usize * self.format.bytes_per_pixel()
    }

    /// Pixel bytes of row `y`, without padding.
    pub fn row(&self, y: u32) -> &[u8] {
        let start = y as usize * self.stride;
        &self.data[start..start + self.row_bytes()]
    }

    /// Rows without padding, concatenated. Borrows when already packed.
    pub fn packed(&self) -> Cow<'_, [u8]> {
        let row_bytes = self.row_bytes();
        if self.stride == row_bytes {
            return Cow::Borrowed(&self.data[..row_bytes * self.height as usize]);
        }
        let mut packed = Vec::with_capacity(row_bytes * self.height as usize);
        for y in 0..self.height {
            packed.extend_from_slice(self.row(y));
        }
        Cow::Owned(packed)
    }

    /// Whether both images hold the same pixels, ignoring row padding.
    pub fn same_pixels(&self, other: &Self) -> bool {
        self.width == other.width
            && self.height == other.height
            && self.format == other.format
            && (0..self.height).all(|y| self.row(y) == other.row(y))
    }

    /// Packed RGBA8 copy of an RGB8 image with alpha 255. Other formats are cloned.
    ///
    /// Lossless codecs may drop a fully opaque alpha channel; comparing
    /// through this keeps such round trips bit-exact.
    pub fn with_opaque_alpha(&self) -> Self {
        if self.format != PixelFormat::Rgb8 {
            return self.clone();
        }
        let mut data = Vec::with_capacity(self.width as usize * self.height as usize * 4);
        for y in 0..self.height {
            for px in self.row(y).chunks_exact(3) {
                data.extend_from_slice(px);
                data.push(u8::MAX);
            }
        }
        Self {
            data,
            width: self.width,
            height: self.height,
            stride: self.width as usize * 4,
            format: PixelFormat::Rgba8,
        }
    }

    /// Release the backing bytes.
    pub fn into_raw(self) -> Vec<u8> {
        self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_properties() {
        assert_eq!(PixelFormat::Rgb8.bytes_per_pixel(), 3);
        assert_eq!(PixelFormat::Rgba16.bytes_per_pixel(), 8);
        assert!(PixelFormat::Rgba8Premultiplied.has_alpha());
        assert!(PixelFormat::Rgba8Premultiplied.is_premultiplied());
        assert!(!PixelFormat::Gray8.has_alpha());
        assert_eq!(PixelFormat::rgb(8, true, false), Some(PixelFormat::Rgba8));
        assert_eq!(PixelFormat::rgb(12, false, false), Some(PixelFormat::Rgb16));
        assert_eq!(PixelFormat::rgb(16, true, true), None);
        assert_eq!(PixelFormat::rgb(32, false, false), None);
    }

    #[test]
    fn test_from_raw_validates_stride() {
        let result = ImageBuffer::from_raw(vec![0; 64], 4, 2, 8, PixelFormat::Rgb8);
        assert!(matches!(result, Err(Error::InvalidImage(_))));
    }

    #[test]
    fn test_from_raw_validates_length() {
        // Last row does not need its padding: (2 - 1) * 16 + 4 * 3 = 28 bytes.
        assert!(ImageBuffer::from_raw(vec![0; 28], 4, 2, 16, PixelFormat::Rgb8).is_ok());
        assert!(ImageBuffer::from_raw(vec![0; 27], 4, 2, 16, PixelFormat::Rgb8).is_err());
    }

    #[test]
    fn test_from_raw_rejects_empty() {
        assert!(ImageBuffer::new(0, 4, PixelFormat::Rgba8).is_err());
    }

    #[test]
    fn test_from_rgb8() {
        let pixels = vec![
            RGB8::new(1, 2, 3),
            RGB8::new(4, 5, 6),
            RGB8::new(7, 8, 9),
            RGB8::new(10, 11, 12),
        ];
        let image = ImageBuffer::from_rgb8(ImgVec::new(pixels, 2, 2).as_ref()).unwrap();
        assert_eq!(image.format(), PixelFormat::Rgb8);
        assert_eq!(image.stride(), 6);
        assert_eq!(image.row(1), &[7, 8, 9, 10, 11, 12]);
    }

    #[test]
    fn test_rgba8_conversions() {
        let pixels = vec![RGBA8::new(1, 2, 3, 4), RGBA8::new(5, 6, 7, 8)];
        let source = ImgVec::new(pixels.clone(), 1, 2);
        let image = ImageBuffer::from_rgba8(source.as_ref()).unwrap();
        assert_eq!(image.format(), PixelFormat::Rgba8);
        assert_eq!(image.row(1), &[5, 6, 7, 8]);
        assert!(image.to_rgb8().is_none());

        let back = image.to_rgba8().unwrap();
        assert_eq!((back.width(), back.height()), (1, 2));
        assert_eq!(back.buf(), &pixels);
    }

    #[test]
    fn test_to_rgb8_skips_padding() {
        let data = vec![1, 2, 3, 0, 0, 4, 5, 6, 0, 0];
        let image = ImageBuffer::from_raw(data, 1, 2, 5, PixelFormat::Rgb8).unwrap();
        let img = image.to_rgb8().unwrap();
        assert_eq!(img.buf(), &[RGB8::new(1, 2, 3), RGB8::new(4, 5, 6)]);
        assert!(image.to_rgba8().is_none());
    }

    #[test]
    fn test_oversized_dimensions_fail() {
        let huge = ImageBuffer::new(u32::MAX, u32::MAX, PixelFormat::Rgba16);
        assert!(matches!(huge, Err(Error::InvalidImage(_))));
        let huge = ImageBuffer::new(1 << 30, 1 << 30, PixelFormat::Rgba16);
        assert!(matches!(huge, Err(Error::InvalidImage(_))));
        assert_eq!(
            ImageBuffer::required_len(2, u32::MAX, usize::MAX, PixelFormat::Rgb8),
            None
        );
        let overflowing = ImageBuffer::from_raw(vec![0; 8], 2, 3, usize::MAX, PixelFormat::Rgb8);
        assert!(matches!(overflowing, Err(Error::InvalidImage(_))));
    }

    #[test]
    fn test_packed_strips_padding() {
        let data = vec![1, 2, 3, 0, 0, 4, 5, 6, 0, 0];
        let image = ImageBuffer::from_raw(data, 1, 2, 5, PixelFormat::Rgb8).unwrap();
        assert_eq!(image.byte_len(), 8);
        assert_eq!(&*image.packed(), &[1, 2, 3, 4, 5, 6]);

        let tight = ImageBuffer::from_raw(vec![1, 2, 3, 4, 5, 6], 1, 2, 3, PixelFormat::Rgb8)
            .unwrap();
        assert!(matches!(tight.packed(), Cow::Borrowed(_)));
        assert!(image.same_pixels(&tight));
    }

    #[test]
    fn test_with_opaque_alpha() {
        let data = vec![1, 2, 3, 9, 4, 5, 6, 9];
        let rgb = ImageBuffer::from_raw(data, 1, 2, 4, PixelFormat::Rgb8).unwrap();
        let rgba = rgb.with_opaque_alpha();
        assert_eq!(rgba.format(), PixelFormat::Rgba8);
        assert_eq!(rgba.data(), &[1, 2, 3, 255, 4, 5, 6, 255]);
        assert_eq!(rgba.with_opaque_alpha(), rgba);
    }
}
