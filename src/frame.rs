use std::fmt::{self, Debug, Formatter};
use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::error::{CaptureError, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

impl Dimensions {
    pub const fn new(width: u32, height: u32) -> Dimensions {
        Dimensions { width, height }
    }
}

/// Pixel layout of a [`Frame`]'s data.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PixelFormat {
    /// 32 bits per pixel, blue first, alpha last.
    #[default]
    Bgra8,
}

impl PixelFormat {
    pub const fn bytes_per_pixel(self) -> usize {
        match self {
            PixelFormat::Bgra8 => 4,
        }
    }
}

/// One captured image, as published through a [`FrameChannel`].
///
/// Frames are immutable once built and are shared as `Arc<Frame>`.
///
/// [`FrameChannel`]: crate::FrameChannel
pub struct Frame {
    dimensions: Dimensions,
    format: PixelFormat,
    sequence: u64,
    captured_at: Instant,
    data: Box<[u8]>,
}

impl Frame {
    /// Wraps a tightly packed BGRA buffer.
    ///
    /// Fails with [`CaptureError::FrameSize`] unless `data` holds exactly
    /// `width * height` pixels, or with [`CaptureError::FrameTooLarge`] if
    /// that size overflows `usize`.
    ///
    /// # Examples
    ///
    ///     use atomicrefbox::{Dimensions, Frame};
    ///
    ///     let frame = Frame::new(Dimensions::new(2, 1), 0, vec![0; 8]).unwrap();
    ///     assert_eq!(frame.bytes_per_row(), 8);
    ///     assert!(Frame::new(Dimensions::new(2, 1), 1, vec![0; 7]).is_err());
    ///
    pub fn new(dimensions: Dimensions, sequence: u64, data: impl Into<Box<[u8]>>) -> Result<Frame> {
        let format = PixelFormat::Bgra8;
        let data = data.into();
        let expected = (dimensions.width as usize)
            .checked_mul(dimensions.height as usize)
            .and_then(|pixels| pixels.checked_mul(format.bytes_per_pixel()))
            .ok_or(CaptureError::FrameTooLarge {
                width: dimensions.width,
                height: dimensions.height,
            })?;
        if data.len() != expected {
            return Err(CaptureError::FrameSize {
                expected,
                actual: data.len(),
            });
        }
        Ok(Frame {
            dimensions,
            format,
            sequence,
            captured_at: Instant::now(),
            data,
        })
    }

    pub fn dimensions(&self) -> Dimensions {
        self.dimensions
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    /// Position of this frame in its session's capture order.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn captured_at(&self) -> Instant {
        self.captured_at
    }

    pub fn bytes_per_row(&self) -> usize {
        self.dimensions.width as usize * self.format.bytes_per_pixel()
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }
}

impl Debug for Frame {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        f.debug_struct("Frame")
            .field("dimensions", &self.dimensions)
            .field("format", &self.format)
            .field("sequence", &self.sequence)
            .field("len", &self.data.len())
            .finish()
    }
}
