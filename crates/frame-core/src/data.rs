use crate::pixel_format::{PixelFormat, PixelLayout};

/// Element depth of an emitted image channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum ElementDepth {
    /// Unsigned 8-bit.
    U8,
}

impl ElementDepth {
    /// Size of one channel element in bytes.
    pub fn bytes(self) -> usize {
        match self {
            ElementDepth::U8 => 1,
        }
    }

    /// Size of one channel element in bits.
    pub fn bits(self) -> u32 {
        self.bytes() as u32 * 8
    }
}

/// Represents a single captured image.
///
/// Pixel data is stored interleaved, row-major, without row padding:
/// `data.len() == width * height * channels * depth.bytes()`.
///
/// A frame is filled by a byte-exact copy of the transfer buffer at the moment
/// the hardware reports end-of-frame, so the layout is whatever the sensor
/// delivered (e.g. RGB channel order for [`PixelFormat::Rgb888`]).
#[derive(Debug, Clone)]
pub struct Frame {
    /// Width in pixels
    pub width: u32,

    /// Height in pixels
    pub height: u32,

    /// Channel element depth
    pub depth: ElementDepth,

    /// Channels per pixel (1 for mono, 3 for RGB)
    pub channels: u32,

    /// Canonical format of the image contents
    pub format: PixelFormat,

    /// End-of-frame counter within the acquisition epoch, starting at 0
    pub sequence: u64,

    /// Raw pixel data
    pub data: Vec<u8>,
}

impl Frame {
    /// Allocate a zeroed frame for the given layout.
    pub fn zeroed(width: u32, height: u32, layout: &PixelLayout) -> Self {
        let len = width as usize * height as usize * layout.bytes_per_pixel();
        Self {
            width,
            height,
            depth: layout.depth,
            channels: layout.channels,
            format: layout.output_format,
            sequence: 0,
            data: vec![0u8; len],
        }
    }

    /// Number of pixel units (`width * height`).
    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    /// Bytes per row.
    pub fn stride(&self) -> usize {
        self.width as usize * self.channels as usize * self.depth.bytes()
    }

    /// Channel values of the pixel at (x, y).
    pub fn pixel(&self, x: u32, y: u32) -> Option<&[u8]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let unit = self.channels as usize * self.depth.bytes();
        let start = y as usize * self.stride() + x as usize * unit;
        self.data.get(start..start + unit)
    }

    /// Calculate mean element value across all channels.
    pub fn mean(&self) -> f64 {
        if self.data.is_empty() {
            return 0.0;
        }
        let sum: u64 = self.data.iter().map(|&v| v as u64).sum();
        sum as f64 / self.data.len() as f64
    }
}
