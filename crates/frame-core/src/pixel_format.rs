//! Pixel format classification.
//!
//! The acquisition SDK reports the format of the transfer buffer as one of the
//! values in [`PixelFormat`]. We only copy out layouts that map one-to-one onto
//! an 8-bit image: monochrome (one channel) and packed RGB (three channels).
//! Everything else is rejected so that deeper or packed formats are never
//! silently truncated.
//!
//! [`classify`] matches every enumerant explicitly; adding a variant without
//! deciding how to classify it is a compile error.

use crate::data::ElementDepth;
use crate::error::AcquisitionError;
use serde::{Deserialize, Serialize};

/// Buffer pixel formats known to the acquisition SDK.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PixelFormat {
    Unknown,
    Binary,

    // Monochrome
    Mono8,
    Mono9,
    Mono10,
    Mono11,
    Mono12,
    Mono13,
    Mono14,
    Mono15,
    Mono16,
    Mono24,
    Mono32,
    Mono64,
    Mono8P2,
    Mono8P3,
    Mono8P4,
    Mono16P2,
    Mono16P3,
    Mono16P4,

    // Signed integer
    Int8,
    Int9,
    Int10,
    Int11,
    Int12,
    Int13,
    Int14,
    Int15,
    Int16,
    Int24,
    Int32,
    Int64,

    // Bayer-style colour, interlaced / non-interlaced
    ColorI8,
    ColorI9,
    ColorI10,
    ColorI11,
    ColorI12,
    ColorI13,
    ColorI14,
    ColorI15,
    ColorI16,
    ColorNI8,
    ColorNI9,
    ColorNI10,
    ColorNI11,
    ColorNI12,
    ColorNI13,
    ColorNI14,
    ColorNI15,
    ColorNI16,

    // RGB
    Rgb5551,
    Rgb565,
    Rgb888,
    Rgbr888,
    Rgb8888,
    Rgb101010,
    Rgb161616,
    Rgb16161616,
    Rgb888Mono8,
    Rgb161616Mono16,
    RgbP8,
    RgbP16,

    // YUV
    Uyvy,
    Yuy2,
    Yvyu,
    Yuyv,
    Y211,
    Iyu1,
    Iyu2,
    Ayu2,
    YuvP8,
    YuvP16,

    // HSV / HSI / LAB
    Hsv,
    HsvP8,
    HsvP16,
    Hsi,
    HsiP8,
    HsiP16,
    Lab,
    Lab101010,
    Lab16161616,

    // Two-channel
    Bicolor88,
    Bicolor1616,

    // Floating point, coordinates, complex
    Float,
    FPoint,
    Point,
    Complex,
}

impl PixelFormat {
    /// Every enumerant, in declaration order.
    pub const ALL: [PixelFormat; 87] = [
        PixelFormat::Unknown,
        PixelFormat::Binary,
        PixelFormat::Mono8,
        PixelFormat::Mono9,
        PixelFormat::Mono10,
        PixelFormat::Mono11,
        PixelFormat::Mono12,
        PixelFormat::Mono13,
        PixelFormat::Mono14,
        PixelFormat::Mono15,
        PixelFormat::Mono16,
        PixelFormat::Mono24,
        PixelFormat::Mono32,
        PixelFormat::Mono64,
        PixelFormat::Mono8P2,
        PixelFormat::Mono8P3,
        PixelFormat::Mono8P4,
        PixelFormat::Mono16P2,
        PixelFormat::Mono16P3,
        PixelFormat::Mono16P4,
        PixelFormat::Int8,
        PixelFormat::Int9,
        PixelFormat::Int10,
        PixelFormat::Int11,
        PixelFormat::Int12,
        PixelFormat::Int13,
        PixelFormat::Int14,
        PixelFormat::Int15,
        PixelFormat::Int16,
        PixelFormat::Int24,
        PixelFormat::Int32,
        PixelFormat::Int64,
        PixelFormat::ColorI8,
        PixelFormat::ColorI9,
        PixelFormat::ColorI10,
        PixelFormat::ColorI11,
        PixelFormat::ColorI12,
        PixelFormat::ColorI13,
        PixelFormat::ColorI14,
        PixelFormat::ColorI15,
        PixelFormat::ColorI16,
        PixelFormat::ColorNI8,
        PixelFormat::ColorNI9,
        PixelFormat::ColorNI10,
        PixelFormat::ColorNI11,
        PixelFormat::ColorNI12,
        PixelFormat::ColorNI13,
        PixelFormat::ColorNI14,
        PixelFormat::ColorNI15,
        PixelFormat::ColorNI16,
        PixelFormat::Rgb5551,
        PixelFormat::Rgb565,
        PixelFormat::Rgb888,
        PixelFormat::Rgbr888,
        PixelFormat::Rgb8888,
        PixelFormat::Rgb101010,
        PixelFormat::Rgb161616,
        PixelFormat::Rgb16161616,
        PixelFormat::Rgb888Mono8,
        PixelFormat::Rgb161616Mono16,
        PixelFormat::RgbP8,
        PixelFormat::RgbP16,
        PixelFormat::Uyvy,
        PixelFormat::Yuy2,
        PixelFormat::Yvyu,
        PixelFormat::Yuyv,
        PixelFormat::Y211,
        PixelFormat::Iyu1,
        PixelFormat::Iyu2,
        PixelFormat::Ayu2,
        PixelFormat::YuvP8,
        PixelFormat::YuvP16,
        PixelFormat::Hsv,
        PixelFormat::HsvP8,
        PixelFormat::HsvP16,
        PixelFormat::Hsi,
        PixelFormat::HsiP8,
        PixelFormat::HsiP16,
        PixelFormat::Lab,
        PixelFormat::Lab101010,
        PixelFormat::Lab16161616,
        PixelFormat::Bicolor88,
        PixelFormat::Bicolor1616,
        PixelFormat::Float,
        PixelFormat::FPoint,
        PixelFormat::Point,
        PixelFormat::Complex,
    ];
}

/// Image layout produced for a supported buffer format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelLayout {
    pub depth: ElementDepth,
    pub channels: u32,
    /// Canonical format of the emitted image.
    pub output_format: PixelFormat,
}

impl PixelLayout {
    /// Bytes occupied by one pixel unit.
    pub fn bytes_per_pixel(&self) -> usize {
        self.depth.bytes() * self.channels as usize
    }
}

/// Classify a buffer format into the layout of the emitted image.
///
/// Fails with [`AcquisitionError::UnsupportedPixelFormat`] naming the input
/// format for anything other than 8-bit mono (including binary) and 8-bit RGB.
pub fn classify(format: PixelFormat) -> Result<PixelLayout, AcquisitionError> {
    use PixelFormat::*;

    match format {
        Binary | Mono8 => Ok(PixelLayout {
            depth: ElementDepth::U8,
            channels: 1,
            output_format: Mono8,
        }),
        Rgb888 => Ok(PixelLayout {
            depth: ElementDepth::U8,
            channels: 3,
            output_format: Rgb888,
        }),

        Unknown | Mono9 | Mono10 | Mono11 | Mono12 | Mono13 | Mono14 | Mono15 | Mono16
        | Mono24 | Mono32 | Mono64 | Mono8P2 | Mono8P3 | Mono8P4 | Mono16P2 | Mono16P3
        | Mono16P4 | Int8 | Int9 | Int10 | Int11 | Int12 | Int13 | Int14 | Int15 | Int16
        | Int24 | Int32 | Int64 | ColorI8 | ColorI9 | ColorI10 | ColorI11 | ColorI12
        | ColorI13 | ColorI14 | ColorI15 | ColorI16 | ColorNI8 | ColorNI9 | ColorNI10
        | ColorNI11 | ColorNI12 | ColorNI13 | ColorNI14 | ColorNI15 | ColorNI16 | Rgb5551
        | Rgb565 | Rgbr888 | Rgb8888 | Rgb101010 | Rgb161616 | Rgb16161616 | Rgb888Mono8
        | Rgb161616Mono16 | RgbP8 | RgbP16 | Uyvy | Yuy2 | Yvyu | Yuyv | Y211 | Iyu1
        | Iyu2 | Ayu2 | YuvP8 | YuvP16 | Hsv | HsvP8 | HsvP16 | Hsi | HsiP8 | HsiP16 | Lab
        | Lab101010 | Lab16161616 | Bicolor88 | Bicolor1616 | Float | FPoint | Point
        | Complex => Err(AcquisitionError::UnsupportedPixelFormat(format)),
    }
}
