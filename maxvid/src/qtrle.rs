//! QuickTime Animation (`rle `) sample decoding.
//!
//! Sample layout (all fields big-endian):
//!
//! ```text
//! u32  sample size (low 24 bits)
//! u16  header: 0x0000 = whole frame, 0x0008 = partial update
//!      partial only: u16 start line, u16 unused, u16 line count, u16 unused
//! then per run:
//!   u8 skip code   0 = end of stream, otherwise skip (code - 1) pixels
//!   i8 rle code    0 = next skip code, -1 = next line,
//!                  < -1 = repeat one pixel -code times,
//!                  > 0 = copy `code` literal pixels
//! ```
//!
//! Pixels are RGB555 (16bpp), R,G,B (24bpp) or straight-alpha A,R,G,B (32bpp,
//! premultiplied on read). A sample whose size is below 8 bytes updates no
//! pixels.
//!
//! Parsing the movie checks only where samples lie and how long they are, not
//! their contents. A grammar or bounds violation found while decoding panics.

use crate::opcode::OpPixel;
use crate::pixels::{Depth, FrameBuffer};
use crate::premultiply::premultiply_pixel;

/// Longest literal run a single rle code can describe.
const MAX_LITERAL_RUN: usize = 127;

/// Source pixel format of an Animation-codec sample stream.
pub trait RleDepth {
    type Pixel: OpPixel;

    const DEPTH: Depth;
    /// Bytes per pixel in the compressed stream.
    const STREAM_BYTES: usize;

    fn read_pixel(bytes: &[u8]) -> Self::Pixel;
}

/// 16bpp RGB555, opaque.
pub struct Rgb555;

/// 24bpp RGB, opaque; stored in a 32-bit slot with a zero alpha byte.
pub struct Rgb24;

/// 32bpp straight-alpha ARGB; premultiplied on read.
pub struct Argb32;

impl RleDepth for Rgb555 {
    type Pixel = u16;
    const DEPTH: Depth = Depth::Bpp16;
    const STREAM_BYTES: usize = 2;

    #[inline]
    fn read_pixel(bytes: &[u8]) -> u16 {
        u16::from_be_bytes([bytes[0], bytes[1]])
    }
}

impl RleDepth for Rgb24 {
    type Pixel = u32;
    const DEPTH: Depth = Depth::Bpp24;
    const STREAM_BYTES: usize = 3;

    #[inline]
    fn read_pixel(bytes: &[u8]) -> u32 {
        (bytes[0] as u32) << 16 | (bytes[1] as u32) << 8 | bytes[2] as u32
    }
}

impl RleDepth for Argb32 {
    type Pixel = u32;
    const DEPTH: Depth = Depth::Bpp32;
    const STREAM_BYTES: usize = 4;

    #[inline]
    fn read_pixel(bytes: &[u8]) -> u32 {
        premultiply_pixel(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }
}

/// Rows a sample updates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleHeader {
    pub start_line: usize,
    pub line_count: usize,
    /// Offset of the first skip code.
    pub data_offset: usize,
}

/// Parse the sample prefix. Returns `None` for a "no change" sample.
pub fn parse_sample_header(sample: &[u8], height: usize) -> Option<SampleHeader> {
    assert!(sample.len() >= 4, "rle sample shorter than its size field");
    let size = u32::from_be_bytes([sample[0], sample[1], sample[2], sample[3]]) & 0x00FF_FFFF;
    assert_eq!(
        size as usize,
        sample.len(),
        "rle sample size field does not match sample length"
    );
    if sample.len() < 8 {
        return None;
    }

    let be16 = |at: usize| u16::from_be_bytes([sample[at], sample[at + 1]]) as usize;
    let header = SampleHeader {
        start_line: 0,
        line_count: height,
        data_offset: 6,
    };
    let header = match be16(4) {
        0x0000 => header,
        0x0008 => {
            assert!(sample.len() >= 14, "rle sample truncated in extended header");
            SampleHeader {
                start_line: be16(6),
                line_count: be16(10),
                data_offset: 14,
            }
        }
        other => panic!("rle sample header 0x{other:04X} is neither 0x0000 nor 0x0008"),
    };
    assert!(
        header.start_line + header.line_count <= height,
        "rle sample updates lines {}..{} of a {height} line frame",
        header.start_line,
        header.start_line + header.line_count
    );
    Some(header)
}

/// Receives the runs of a sample in stream order, at absolute coordinates.
pub trait RunSink<P> {
    fn dup(&mut self, row: usize, col: usize, pixel: P, count: usize);
    fn copy(&mut self, row: usize, col: usize, pixels: &[P]);
}

/// Walk the run grammar of `sample`, reporting every DUP and COPY to `sink`.
///
/// Returns the parsed header, or `None` when the sample updates nothing.
pub fn walk_sample<D: RleDepth, S: RunSink<D::Pixel>>(
    sample: &[u8],
    width: usize,
    height: usize,
    sink: &mut S,
) -> Option<SampleHeader> {
    let header = parse_sample_header(sample, height)?;
    let end_row = header.start_line + header.line_count;
    let len = sample.len();
    let mut pos = header.data_offset;
    let mut row = header.start_line;
    let mut col = 0usize;
    let mut run = [<D::Pixel as Default>::default(); MAX_LITERAL_RUN];

    let take = |pos: &mut usize, n: usize| -> usize {
        assert!(*pos + n <= len, "rle sample overrun at byte {}", *pos);
        let at = *pos;
        *pos += n;
        at
    };

    loop {
        // Some encoders omit the terminating zero skip code after the last line.
        if pos == len && row == end_row {
            break;
        }
        let skip = sample[take(&mut pos, 1)] as usize;
        if skip == 0 {
            assert_eq!(pos, len, "{} bytes remain after end of rle stream", len - pos);
            break;
        }
        col += skip - 1;
        assert!(col <= width, "rle skip past end of row {row}");

        loop {
            let code = sample[take(&mut pos, 1)] as i8;
            match code {
                0 => break,
                -1 => {
                    row += 1;
                    col = 0;
                    assert!(row <= end_row, "rle stream advances past line {end_row}");
                    break;
                }
                code if code < -1 => {
                    let count = (-(code as i32)) as usize;
                    let at = take(&mut pos, D::STREAM_BYTES);
                    let pixel = D::read_pixel(&sample[at..]);
                    assert!(row < end_row, "rle run on line {row} outside update range");
                    assert!(col + count <= width, "rle duplicate run overflows row {row}");
                    sink.dup(row, col, pixel, count);
                    col += count;
                }
                code => {
                    let count = code as usize;
                    let at = take(&mut pos, count * D::STREAM_BYTES);
                    for (i, p) in run[..count].iter_mut().enumerate() {
                        *p = D::read_pixel(&sample[at + i * D::STREAM_BYTES..]);
                    }
                    assert!(row < end_row, "rle run on line {row} outside update range");
                    assert!(col + count <= width, "rle literal run overflows row {row}");
                    sink.copy(row, col, &run[..count]);
                    col += count;
                }
            }
        }
    }
    Some(header)
}

struct FrameSink<'a, P> {
    fb: &'a mut FrameBuffer<P>,
}

impl<P: OpPixel> RunSink<P> for FrameSink<'_, P> {
    #[inline]
    fn dup(&mut self, row: usize, col: usize, pixel: P, count: usize) {
        self.fb.row_mut(row)[col..col + count].fill(pixel);
    }

    #[inline]
    fn copy(&mut self, row: usize, col: usize, pixels: &[P]) {
        self.fb.row_mut(row)[col..col + pixels.len()].copy_from_slice(pixels);
    }
}

/// Decode one sample on top of `fb`. Keyframes start from a cleared frame.
pub fn decode_sample<D: RleDepth>(sample: &[u8], keyframe: bool, fb: &mut FrameBuffer<D::Pixel>) {
    if keyframe {
        fb.clear();
    }
    let (width, height) = (fb.width(), fb.height());
    let updated = walk_sample::<D, _>(sample, width, height, &mut FrameSink { fb });
    assert!(updated.is_some() || !keyframe, "keyframe sample carries no pixel data");
}

pub fn decode_sample16(sample: &[u8], keyframe: bool, fb: &mut FrameBuffer<u16>) {
    decode_sample::<Rgb555>(sample, keyframe, fb)
}

pub fn decode_sample24(sample: &[u8], keyframe: bool, fb: &mut FrameBuffer<u32>) {
    decode_sample::<Rgb24>(sample, keyframe, fb)
}

pub fn decode_sample32(sample: &[u8], keyframe: bool, fb: &mut FrameBuffer<u32>) {
    decode_sample::<Argb32>(sample, keyframe, fb)
}

/// Builds Animation-codec samples. Used to synthesise test movies.
#[derive(Debug, Default)]
pub struct SampleBuilder {
    body: Vec<u8>,
    partial: Option<(u16, u16)>,
}

impl SampleBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Restrict the sample to `line_count` lines from `start_line`.
    pub fn partial(mut self, start_line: u16, line_count: u16) -> Self {
        self.partial = Some((start_line, line_count));
        self
    }

    pub fn skip_code(&mut self, code: u8) -> &mut Self {
        self.body.push(code);
        self
    }

    pub fn rle_code(&mut self, code: i8) -> &mut Self {
        self.body.push(code as u8);
        self
    }

    pub fn bytes(&mut self, bytes: &[u8]) -> &mut Self {
        self.body.extend_from_slice(bytes);
        self
    }

    /// Finish with a terminating zero skip code and the size prefix.
    pub fn build(&self) -> Vec<u8> {
        let mut out = vec![0u8; 4];
        match self.partial {
            None => out.extend_from_slice(&[0x00, 0x00]),
            Some((start, count)) => {
                out.extend_from_slice(&[0x00, 0x08]);
                out.extend_from_slice(&start.to_be_bytes());
                out.extend_from_slice(&[0, 0]);
                out.extend_from_slice(&count.to_be_bytes());
                out.extend_from_slice(&[0, 0]);
            }
        }
        out.extend_from_slice(&self.body);
        out.push(0);
        let size = out.len() as u32;
        out[..4].copy_from_slice(&size.to_be_bytes());
        out
    }
}
