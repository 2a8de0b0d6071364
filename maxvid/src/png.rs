//! PNG image data decoding and APNG canvas compositing.
//!
//! Only 8-bit, non-interlaced images are supported. Decoded pixels are
//! straight-alpha `0xAARRGGBB`.

use std::io::Read;
use std::ops::Range;

use flate2::read::ZlibDecoder;

use crate::apng::{Apng, BlendOp, DisposeOp, FrameControl, ImageHeader};
use crate::error::ApngError;
use crate::fourcc::FourCc;

type Result<T> = std::result::Result<T, ApngError>;

const COLOR_GRAY: u8 = 0;
const COLOR_RGB: u8 = 2;
const COLOR_PALETTE: u8 = 3;
const COLOR_GRAY_ALPHA: u8 = 4;
const COLOR_RGBA: u8 = 6;

/// How to turn scanline bytes into pixels.
#[derive(Debug, Clone)]
pub struct PixelFormat {
    color_type: u8,
    palette: Vec<[u8; 3]>,
    /// Alpha per palette index, from `tRNS`.
    palette_alpha: Vec<u8>,
    /// Fully transparent key colour (gray or RGB), from `tRNS`.
    transparent_key: Option<u32>,
}

impl PixelFormat {
    pub fn new(header: &ImageHeader, palette: Option<&[[u8; 3]]>, transparency: Option<&[u8]>) -> Result<Self> {
        if header.bit_depth != 8 {
            return Err(ApngError::UnsupportedFormat(format!(
                "bit depth {} (only 8 is supported)",
                header.bit_depth
            )));
        }
        if header.interlace != 0 {
            return Err(ApngError::UnsupportedFormat("interlaced images".into()));
        }
        let mut format = Self {
            color_type: header.color_type,
            palette: Vec::new(),
            palette_alpha: Vec::new(),
            transparent_key: None,
        };
        let trns = transparency.unwrap_or_default();
        match header.color_type {
            COLOR_GRAY_ALPHA | COLOR_RGBA => {}
            COLOR_GRAY if trns.len() >= 2 => {
                // 16-bit sample; the low byte holds the 8-bit value.
                format.transparent_key = Some(trns[1] as u32 * 0x01_0101);
            }
            COLOR_RGB if trns.len() >= 6 => {
                format.transparent_key = Some((trns[1] as u32) << 16 | (trns[3] as u32) << 8 | trns[5] as u32);
            }
            COLOR_GRAY | COLOR_RGB => {}
            COLOR_PALETTE => {
                format.palette = palette.ok_or(ApngError::MissingChunk(FourCc::new(b"PLTE")))?.to_vec();
                format.palette_alpha = trns.to_vec();
            }
            other => return Err(ApngError::UnsupportedFormat(format!("color type {other}"))),
        }
        Ok(format)
    }

    pub fn from_apng(apng: &Apng) -> Result<Self> {
        Self::new(&apng.header, apng.palette.as_deref(), apng.transparency.as_deref())
    }

    /// Whether any decoded pixel can be less than fully opaque.
    pub fn has_alpha(&self) -> bool {
        matches!(self.color_type, COLOR_GRAY_ALPHA | COLOR_RGBA)
            || self.transparent_key.is_some()
            || self.palette_alpha.iter().any(|&a| a != 0xFF)
    }

    fn bytes_per_pixel(&self) -> usize {
        match self.color_type {
            COLOR_GRAY | COLOR_PALETTE => 1,
            COLOR_GRAY_ALPHA => 2,
            COLOR_RGB => 3,
            _ => 4,
        }
    }

    fn pixel(&self, px: &[u8]) -> u32 {
        let opaque = |rgb: u32| match self.transparent_key {
            Some(key) if key == rgb => rgb,
            _ => 0xFF00_0000 | rgb,
        };
        match self.color_type {
            COLOR_GRAY => opaque(px[0] as u32 * 0x01_0101),
            COLOR_RGB => opaque((px[0] as u32) << 16 | (px[1] as u32) << 8 | px[2] as u32),
            COLOR_PALETTE => {
                let index = px[0] as usize;
                // Out-of-range indices decode as opaque black.
                let [r, g, b] = self.palette.get(index).copied().unwrap_or([0, 0, 0]);
                let a = self.palette_alpha.get(index).copied().unwrap_or(0xFF);
                (a as u32) << 24 | (r as u32) << 16 | (g as u32) << 8 | b as u32
            }
            COLOR_GRAY_ALPHA => (px[1] as u32) << 24 | px[0] as u32 * 0x01_0101,
            _ => (px[3] as u32) << 24 | (px[0] as u32) << 16 | (px[1] as u32) << 8 | px[2] as u32,
        }
    }
}

fn paeth(a: u8, b: u8, c: u8) -> u8 {
    let p = a as i16 + b as i16 - c as i16;
    let pa = (p - a as i16).abs();
    let pb = (p - b as i16).abs();
    let pc = (p - c as i16).abs();
    if pa <= pb && pa <= pc {
        a
    } else if pb <= pc {
        b
    } else {
        c
    }
}

/// Reverse the per-scanline filter of `row` in place, given the already
/// unfiltered previous row.
fn unfilter_row(filter: u8, row: &mut [u8], prev: &[u8], bpp: usize) -> std::result::Result<(), String> {
    match filter {
        0 => {}
        1 => {
            for i in bpp..row.len() {
                row[i] = row[i].wrapping_add(row[i - bpp]);
            }
        }
        2 => {
            for (x, &up) in row.iter_mut().zip(prev) {
                *x = x.wrapping_add(up);
            }
        }
        3 => {
            for i in 0..row.len() {
                let left = if i >= bpp { row[i - bpp] as u16 } else { 0 };
                row[i] = row[i].wrapping_add(((left + prev[i] as u16) / 2) as u8);
            }
        }
        4 => {
            for i in 0..row.len() {
                let (left, upper_left) = if i >= bpp { (row[i - bpp], prev[i - bpp]) } else { (0, 0) };
                row[i] = row[i].wrapping_add(paeth(left, prev[i], upper_left));
            }
        }
        other => return Err(format!("unknown filter type {other}")),
    }
    Ok(())
}

/// Inflate and unfilter one frame's image data into straight ARGB pixels.
pub fn decode_image(format: &PixelFormat, index: usize, width: u32, height: u32, data: &[u8]) -> Result<Vec<u32>> {
    let bad = |reason: String| ApngError::BadImageData { index, reason };
    let (width, height) = (width as usize, height as usize);
    let bpp = format.bytes_per_pixel();
    let stride = width * bpp;

    let mut raw = Vec::with_capacity(height * (stride + 1));
    ZlibDecoder::new(data)
        .take((height * (stride + 1)) as u64)
        .read_to_end(&mut raw)
        .map_err(|e| bad(e.to_string()))?;
    if raw.len() < height * (stride + 1) {
        return Err(bad(format!(
            "inflated to {} bytes, expected {}",
            raw.len(),
            height * (stride + 1)
        )));
    }

    let mut pixels = Vec::with_capacity(width * height);
    let mut prev = vec![0u8; stride];
    let mut row = vec![0u8; stride];
    for line in raw.chunks_exact(stride + 1) {
        row.copy_from_slice(&line[1..]);
        unfilter_row(line[0], &mut row, &prev, bpp).map_err(bad)?;
        pixels.extend(row.chunks_exact(bpp).map(|px| format.pixel(px)));
        std::mem::swap(&mut row, &mut prev);
    }
    Ok(pixels)
}

/// Straight-alpha source-over.
fn blend_over(src: u32, dst: u32) -> u32 {
    let sa = src >> 24;
    if sa == 0xFF {
        return src;
    }
    if sa == 0 {
        return dst;
    }
    let da = dst >> 24;
    // Alpha scaled by 255.
    let out_a = sa * 255 + da * (255 - sa);
    if out_a == 0 {
        return 0;
    }
    let channel = |shift: u32| {
        let sc = (src >> shift) & 0xFF;
        let dc = (dst >> shift) & 0xFF;
        (sc * sa * 255 + dc * da * (255 - sa) + out_a / 2) / out_a
    };
    ((out_a + 127) / 255) << 24 | channel(16) << 16 | channel(8) << 8 | channel(0)
}

/// Canvas index ranges covered by each row of a frame region.
fn region_spans(c: &FrameControl, canvas_width: usize) -> Vec<Range<usize>> {
    let (x, w) = (c.x_offset as usize, c.width as usize);
    (c.y_offset as usize..c.y_offset as usize + c.height as usize)
        .map(|y| y * canvas_width + x..y * canvas_width + x + w)
        .collect()
}

/// The APNG output buffer, with pending disposal of the last frame.
pub struct Compositor {
    width: usize,
    height: usize,
    canvas: Vec<u32>,
    saved: Option<Vec<u32>>,
    pending: Option<(FrameControl, DisposeOp)>,
    rendered: usize,
}

impl Compositor {
    pub fn new(width: u32, height: u32) -> Self {
        let (width, height) = (width as usize, height as usize);
        Self {
            width,
            height,
            canvas: vec![0; width * height],
            saved: None,
            pending: None,
            rendered: 0,
        }
    }

    pub fn canvas(&self) -> &[u32] {
        &self.canvas
    }

    /// Dispose of the previous frame, then render `pixels` (the frame's
    /// straight ARGB image) into its region.
    pub fn render(&mut self, control: &FrameControl, pixels: &[u32]) -> &[u32] {
        let (x, y) = (control.x_offset as usize, control.y_offset as usize);
        let (w, h) = (control.width as usize, control.height as usize);
        assert!(
            y + h <= self.height && x + w <= self.width,
            "frame region outside canvas"
        );
        assert_eq!(pixels.len(), w * h, "frame pixel count does not match its fcTL region");

        match self.pending.take() {
            Some((prev, DisposeOp::Background)) => {
                for span in region_spans(&prev, self.width) {
                    self.canvas[span].fill(0);
                }
            }
            Some((_, DisposeOp::Previous)) => {
                if let Some(saved) = self.saved.take() {
                    self.canvas = saved;
                }
            }
            Some((_, DisposeOp::None)) | None => {}
        }

        let dispose = match control.dispose {
            DisposeOp::Previous if self.rendered == 0 => DisposeOp::Background,
            DisposeOp::Previous => {
                self.saved = Some(self.canvas.clone());
                DisposeOp::Previous
            }
            other => other,
        };

        for (row, span) in region_spans(control, self.width).into_iter().enumerate() {
            let src = &pixels[row * w..(row + 1) * w];
            let dst = &mut self.canvas[span];
            match control.blend {
                BlendOp::Source => dst.copy_from_slice(src),
                BlendOp::Over => {
                    for (d, &s) in dst.iter_mut().zip(src) {
                        *d = blend_over(s, *d);
                    }
                }
            }
        }
        self.pending = Some((*control, dispose));
        self.rendered += 1;
        &self.canvas
    }
}
