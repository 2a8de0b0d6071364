use std::fmt;

use crate::adler::{Adler32, ZERO_SENTINEL};

/// Pixel depth of a maxvid stream, as stored in the header `bpp` field.
///
/// 16bpp frames hold native `u16` RGB555 pixels. 24bpp and 32bpp frames hold
/// native `u32` `0xAARRGGBB` pixels; 24bpp pixels are opaque and keep a zero
/// alpha byte, 32bpp pixels are premultiplied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[cfg_attr(feature = "jsonschema", derive(schemars::JsonSchema))]
pub enum Depth {
    Bpp16,
    Bpp24,
    Bpp32,
}

impl Depth {
    pub fn from_bits(bits: u32) -> Option<Self> {
        match bits {
            16 => Some(Depth::Bpp16),
            24 => Some(Depth::Bpp24),
            32 => Some(Depth::Bpp32),
            _ => None,
        }
    }

    pub fn bits(self) -> u32 {
        match self {
            Depth::Bpp16 => 16,
            Depth::Bpp24 => 24,
            Depth::Bpp32 => 32,
        }
    }

    /// Bytes one pixel occupies in a framebuffer (not in the source stream).
    pub fn storage_bytes(self) -> usize {
        match self {
            Depth::Bpp16 => 2,
            Depth::Bpp24 | Depth::Bpp32 => 4,
        }
    }

    /// Size of one raw framebuffer in bytes.
    pub fn frame_bytes(self, width: u32, height: u32) -> u64 {
        width as u64 * height as u64 * self.storage_bytes() as u64
    }
}

impl fmt::Display for Depth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}bpp", self.bits())
    }
}

/// A framebuffer element: `u16` for 16bpp, `u32` for 24/32bpp.
pub trait Pixel: Copy + Default + PartialEq + fmt::Debug + 'static {
    const BYTES: usize;

    fn from_le_slice(bytes: &[u8]) -> Self;
    fn extend_le(self, out: &mut Vec<u8>);
}

impl Pixel for u16 {
    const BYTES: usize = 2;

    fn from_le_slice(bytes: &[u8]) -> Self {
        u16::from_le_bytes([bytes[0], bytes[1]])
    }

    fn extend_le(self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.to_le_bytes());
    }
}

impl Pixel for u32 {
    const BYTES: usize = 4;

    fn from_le_slice(bytes: &[u8]) -> Self {
        u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
    }

    fn extend_le(self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.to_le_bytes());
    }
}

/// Owned width x height pixel grid, stored row-major without padding.
#[derive(Clone, PartialEq, Eq)]
pub struct FrameBuffer<P> {
    width: usize,
    height: usize,
    pixels: Vec<P>,
}

impl<P: Pixel> FrameBuffer<P> {
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            pixels: vec![P::default(); width * height],
        }
    }

    pub fn from_pixels(width: usize, height: usize, pixels: Vec<P>) -> Self {
        assert_eq!(pixels.len(), width * height, "pixel count does not match {width}x{height}");
        Self { width, height, pixels }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    /// Total pixel count.
    pub fn len(&self) -> usize {
        self.pixels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pixels.is_empty()
    }

    pub fn pixels(&self) -> &[P] {
        &self.pixels
    }

    pub fn pixels_mut(&mut self) -> &mut [P] {
        &mut self.pixels
    }

    pub fn row(&self, y: usize) -> &[P] {
        debug_assert!(y < self.height, "row {y} out of range ({} rows)", self.height);
        &self.pixels[y * self.width..(y + 1) * self.width]
    }

    pub fn row_mut(&mut self, y: usize) -> &mut [P] {
        debug_assert!(y < self.height, "row {y} out of range ({} rows)", self.height);
        &mut self.pixels[y * self.width..(y + 1) * self.width]
    }

    pub fn get(&self, x: usize, y: usize) -> P {
        self.row(y)[x]
    }

    pub fn clear(&mut self) {
        self.pixels.fill(P::default());
    }

    /// Little-endian byte image of the frame, as stored in raw keyframes.
    pub fn to_le_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.pixels.len() * P::BYTES);
        for &p in &self.pixels {
            p.extend_le(&mut out);
        }
        out
    }

    /// Overwrite every pixel from a little-endian byte image.
    pub fn load_le_bytes(&mut self, bytes: &[u8]) {
        assert_eq!(bytes.len(), self.pixels.len() * P::BYTES, "raw frame size mismatch");
        for (p, chunk) in self.pixels.iter_mut().zip(bytes.chunks_exact(P::BYTES)) {
            *p = P::from_le_slice(chunk);
        }
    }

    /// Adler-32 of the frame's byte image, with the zero sentinel applied.
    pub fn checksum(&self) -> u32 {
        let mut adler = Adler32::new();
        let mut scratch = Vec::with_capacity(4096);
        for chunk in self.pixels.chunks(4096 / P::BYTES) {
            scratch.clear();
            for &p in chunk {
                p.extend_le(&mut scratch);
            }
            adler.update(&scratch);
        }
        match adler.sum() {
            0 => ZERO_SENTINEL,
            sum => sum,
        }
    }
}

impl<P: Pixel> fmt::Debug for FrameBuffer<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameBuffer")
            .field("width", &self.width)
            .field("height", &self.height)
            .finish_non_exhaustive()
    }
}

/// A framebuffer of either storage width, chosen from a stream's [`Depth`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnyFrameBuffer {
    Pixels16(FrameBuffer<u16>),
    Pixels32(FrameBuffer<u32>),
}

impl AnyFrameBuffer {
    pub fn new(depth: Depth, width: usize, height: usize) -> Self {
        match depth {
            Depth::Bpp16 => AnyFrameBuffer::Pixels16(FrameBuffer::new(width, height)),
            Depth::Bpp24 | Depth::Bpp32 => AnyFrameBuffer::Pixels32(FrameBuffer::new(width, height)),
        }
    }

    pub fn width(&self) -> usize {
        match self {
            AnyFrameBuffer::Pixels16(fb) => fb.width(),
            AnyFrameBuffer::Pixels32(fb) => fb.width(),
        }
    }

    pub fn height(&self) -> usize {
        match self {
            AnyFrameBuffer::Pixels16(fb) => fb.height(),
            AnyFrameBuffer::Pixels32(fb) => fb.height(),
        }
    }

    pub fn clear(&mut self) {
        match self {
            AnyFrameBuffer::Pixels16(fb) => fb.clear(),
            AnyFrameBuffer::Pixels32(fb) => fb.clear(),
        }
    }

    pub fn checksum(&self) -> u32 {
        match self {
            AnyFrameBuffer::Pixels16(fb) => fb.checksum(),
            AnyFrameBuffer::Pixels32(fb) => fb.checksum(),
        }
    }

    pub fn to_le_bytes(&self) -> Vec<u8> {
        match self {
            AnyFrameBuffer::Pixels16(fb) => fb.to_le_bytes(),
            AnyFrameBuffer::Pixels32(fb) => fb.to_le_bytes(),
        }
    }

    pub fn load_le_bytes(&mut self, bytes: &[u8]) {
        match self {
            AnyFrameBuffer::Pixels16(fb) => fb.load_le_bytes(bytes),
            AnyFrameBuffer::Pixels32(fb) => fb.load_le_bytes(bytes),
        }
    }

    pub fn as_pixels32(&self) -> Option<&FrameBuffer<u32>> {
        match self {
            AnyFrameBuffer::Pixels32(fb) => Some(fb),
            AnyFrameBuffer::Pixels16(_) => None,
        }
    }

    pub fn as_pixels16(&self) -> Option<&FrameBuffer<u16>> {
        match self {
            AnyFrameBuffer::Pixels16(fb) => Some(fb),
            AnyFrameBuffer::Pixels32(_) => None,
        }
    }
}
