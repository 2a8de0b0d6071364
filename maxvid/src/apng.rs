//! APNG chunk scanning and frame timing analysis.

use std::io::Read;

use flate2::Crc;

use crate::error::ApngError;
use crate::format::MAX_FRAME_PIXELS;
use crate::fourcc::FourCc;

type Result<T> = std::result::Result<T, ApngError>;

pub const PNG_SIGNATURE: [u8; 8] = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];

/// Delay used for frames that declare a zero delay.
pub const ZERO_DELAY_SECONDS: f64 = 0.010;

/// Chunks longer than this are rejected rather than allocated.
const MAX_CHUNK_LEN: u32 = 0x7FFF_FFFF;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[cfg_attr(feature = "jsonschema", derive(schemars::JsonSchema))]
pub enum DisposeOp {
    None,
    Background,
    Previous,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[cfg_attr(feature = "jsonschema", derive(schemars::JsonSchema))]
pub enum BlendOp {
    Source,
    Over,
}

/// Contents of an `fcTL` chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[cfg_attr(feature = "jsonschema", derive(schemars::JsonSchema))]
pub struct FrameControl {
    pub sequence: u32,
    pub width: u32,
    pub height: u32,
    pub x_offset: u32,
    pub y_offset: u32,
    pub delay_num: u16,
    pub delay_den: u16,
    pub dispose: DisposeOp,
    pub blend: BlendOp,
}

impl FrameControl {
    fn parse(data: &[u8]) -> Result<Self> {
        if data.len() != 26 {
            return Err(ApngError::malformed(b"fcTL", format!("length {} != 26", data.len())));
        }
        let dispose = match data[24] {
            0 => DisposeOp::None,
            1 => DisposeOp::Background,
            2 => DisposeOp::Previous,
            other => return Err(ApngError::malformed(b"fcTL", format!("dispose_op {other}"))),
        };
        let blend = match data[25] {
            0 => BlendOp::Source,
            1 => BlendOp::Over,
            other => return Err(ApngError::malformed(b"fcTL", format!("blend_op {other}"))),
        };
        Ok(Self {
            sequence: be32(data, 0),
            width: be32(data, 4),
            height: be32(data, 8),
            x_offset: be32(data, 12),
            y_offset: be32(data, 16),
            delay_num: u16::from_be_bytes([data[20], data[21]]),
            delay_den: u16::from_be_bytes([data[22], data[23]]),
            dispose,
            blend,
        })
    }

    /// Frame delay in seconds. A zero denominator means 1/100 s units; a
    /// zero delay is replaced by [`ZERO_DELAY_SECONDS`].
    pub fn delay_seconds(&self) -> f64 {
        let den = if self.delay_den == 0 { 100 } else { self.delay_den };
        match self.delay_num {
            0 => ZERO_DELAY_SECONDS,
            num => num as f64 / den as f64,
        }
    }

    /// A 1x1 frame at the origin, which some encoders emit in place of an
    /// unchanged frame.
    pub fn is_probable_noop_marker(&self) -> bool {
        self.width == 1 && self.height == 1 && self.x_offset == 0 && self.y_offset == 0
    }
}

/// Contents of `IHDR`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[cfg_attr(feature = "jsonschema", derive(schemars::JsonSchema))]
pub struct ImageHeader {
    pub width: u32,
    pub height: u32,
    pub bit_depth: u8,
    pub color_type: u8,
    pub interlace: u8,
}

/// One visible animation frame: its control chunk and concatenated
/// compressed image data.
#[derive(Debug, Clone)]
pub struct ApngFrame {
    pub control: FrameControl,
    pub data: Vec<u8>,
}

/// A scanned animated PNG.
#[derive(Debug, Clone)]
pub struct Apng {
    pub header: ImageHeader,
    /// `acTL.num_frames`.
    pub num_frames: u32,
    pub num_plays: u32,
    pub palette: Option<Vec<[u8; 3]>>,
    pub transparency: Option<Vec<u8>>,
    /// The default image is not part of the animation.
    pub hidden_default_image: bool,
    pub frames: Vec<ApngFrame>,
}

/// Timing of an animation expressed in fixed-duration display frames.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
#[cfg_attr(feature = "jsonschema", derive(schemars::JsonSchema))]
pub struct FrameTiming {
    /// Duration of one display frame: the smallest APNG frame delay.
    pub frame_duration: f64,
    /// Display frames each APNG frame occupies; all but the first are no-ops.
    pub repeats: Vec<usize>,
}

impl FrameTiming {
    pub fn total_frames(&self) -> usize {
        self.repeats.iter().sum()
    }
}

pub fn frame_timing(frames: &[FrameControl]) -> FrameTiming {
    let delays: Vec<f64> = frames.iter().map(FrameControl::delay_seconds).collect();
    let smallest = delays.iter().copied().fold(f64::INFINITY, f64::min);
    let repeats = delays
        .iter()
        .map(|d| ((d / smallest).round() as usize).max(1))
        .collect();
    FrameTiming {
        frame_duration: smallest,
        repeats,
    }
}

fn be32(data: &[u8], at: usize) -> u32 {
    u32::from_be_bytes([data[at], data[at + 1], data[at + 2], data[at + 3]])
}

/// Read one chunk, verifying its CRC. Returns `None` at a clean end of input.
fn read_chunk<R: Read>(reader: &mut R, offset: u64) -> Result<Option<(FourCc, Vec<u8>)>> {
    let mut head = [0u8; 8];
    let mut got = 0;
    while got < head.len() {
        match reader.read(&mut head[got..])? {
            0 if got == 0 => return Ok(None),
            0 => {
                return Err(ApngError::Truncated {
                    chunk: FourCc::new(b"????"),
                    offset,
                });
            }
            n => got += n,
        }
    }
    let length = be32(&head, 0);
    let kind = FourCc::new(&[head[4], head[5], head[6], head[7]]);
    let truncated = |_| ApngError::Truncated { chunk: kind, offset };
    if length > MAX_CHUNK_LEN {
        return Err(ApngError::malformed(kind.as_bytes(), format!("length {length}")));
    }

    let mut data = vec![0u8; length as usize];
    reader.read_exact(&mut data).map_err(truncated)?;
    let mut crc_bytes = [0u8; 4];
    reader.read_exact(&mut crc_bytes).map_err(truncated)?;

    let mut crc = Crc::new();
    crc.update(kind.as_bytes());
    crc.update(&data);
    let expected = u32::from_be_bytes(crc_bytes);
    if crc.sum() != expected {
        return Err(ApngError::CrcMismatch {
            chunk: kind,
            offset,
            expected,
            got: crc.sum(),
        });
    }
    Ok(Some((kind, data)))
}

/// Read a PNG signature followed by the chunk stream.
pub fn read_apng<R: Read>(reader: &mut R) -> Result<Apng> {
    let mut signature = [0u8; 8];
    reader.read_exact(&mut signature).map_err(|_| ApngError::BadSignature)?;
    if signature != PNG_SIGNATURE {
        return Err(ApngError::BadSignature);
    }
    scan_chunks(reader)
}

/// Scan chunks from a reader positioned just after the PNG signature.
pub fn scan_chunks<R: Read>(reader: &mut R) -> Result<Apng> {
    let mut header = None;
    let mut actl = None;
    let mut palette = None;
    let mut transparency = None;
    let mut frames: Vec<ApngFrame> = Vec::new();
    let mut hidden_default_image = false;
    let mut seen_idat = false;

    let mut offset = PNG_SIGNATURE.len() as u64;
    while let Some((kind, data)) = read_chunk(reader, offset)? {
        offset += 12 + data.len() as u64;
        match kind.as_bytes() {
            b"IHDR" => {
                if data.len() != 13 {
                    return Err(ApngError::malformed(b"IHDR", format!("length {} != 13", data.len())));
                }
                header = Some(ImageHeader {
                    width: be32(&data, 0),
                    height: be32(&data, 4),
                    bit_depth: data[8],
                    color_type: data[9],
                    interlace: data[12],
                });
            }
            b"PLTE" => {
                if data.len() % 3 != 0 {
                    return Err(ApngError::malformed(b"PLTE", "length is not a multiple of 3"));
                }
                palette = Some(data.chunks_exact(3).map(|c| [c[0], c[1], c[2]]).collect());
            }
            b"tRNS" => transparency = Some(data),
            b"acTL" => {
                if data.len() != 8 {
                    return Err(ApngError::malformed(b"acTL", format!("length {} != 8", data.len())));
                }
                actl = Some((be32(&data, 0), be32(&data, 4)));
            }
            b"fcTL" => {
                let control = FrameControl::parse(&data)?;
                frames.push(ApngFrame {
                    control,
                    data: Vec::new(),
                });
            }
            b"IDAT" => {
                seen_idat = true;
                match frames.last_mut() {
                    // fcTL before IDAT: the default image is frame 0.
                    Some(frame) => frame.data.extend_from_slice(&data),
                    None => hidden_default_image = true,
                }
            }
            b"fdAT" => {
                if data.len() < 4 {
                    return Err(ApngError::malformed(b"fdAT", "missing sequence number"));
                }
                let Some(frame) = frames.last_mut() else {
                    return Err(ApngError::malformed(b"fdAT", "appears before any fcTL"));
                };
                frame.data.extend_from_slice(&data[4..]);
            }
            b"IEND" => break,
            _ => log::debug!("skipping chunk '{kind}' ({} bytes)", data.len()),
        }
    }

    let header = header.ok_or(ApngError::MissingChunk(FourCc::new(b"IHDR")))?;
    let area = header.width as u64 * header.height as u64;
    if area == 0 || area > MAX_FRAME_PIXELS {
        return Err(ApngError::malformed(
            b"IHDR",
            format!("canvas {}x{} is empty or too large", header.width, header.height),
        ));
    }
    if !seen_idat {
        return Err(ApngError::MissingChunk(FourCc::new(b"IDAT")));
    }
    let (num_frames, num_plays) = actl.ok_or(ApngError::MissingChunk(FourCc::new(b"acTL")))?;
    if num_frames as usize != frames.len() {
        return Err(ApngError::FrameCountMismatch {
            declared: num_frames,
            found: frames.len(),
        });
    }
    if frames.len() < 2 {
        return Err(ApngError::TooFewFrames(frames.len()));
    }
    for (index, frame) in frames.iter().enumerate() {
        let c = &frame.control;
        let fits = |offset: u32, size: u32, limit: u32| {
            size > 0 && offset.checked_add(size).is_some_and(|end| end <= limit)
        };
        if !fits(c.x_offset, c.width, header.width) || !fits(c.y_offset, c.height, header.height) {
            return Err(ApngError::FrameOutOfBounds {
                index,
                width: c.width,
                height: c.height,
                x: c.x_offset,
                y: c.y_offset,
                canvas_width: header.width,
                canvas_height: header.height,
            });
        }
        if frame.data.is_empty() {
            return Err(ApngError::BadImageData {
                index,
                reason: "no image data".into(),
            });
        }
    }
    if hidden_default_image {
        log::debug!("default image is hidden, {} animation frames", frames.len());
    }

    Ok(Apng {
        header,
        num_frames,
        num_plays,
        palette,
        transparency,
        hidden_default_image,
        frames,
    })
}
