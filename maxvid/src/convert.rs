//! Conversion of Animation-codec movies and animated PNGs into `.mvid` files.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::Path;

use log::{debug, info};

use crate::apng::{PNG_SIGNATURE, frame_timing, read_apng};
use crate::c4::{C4Pixel, compact_c4_32};
use crate::encode::{encode_delta, encode_keyframe, encode_sample};
use crate::error::{ConvertError, MvidError};
use crate::format::RecordLayout;
use crate::mov::{MovFile, parse_mov};
use crate::pixels::{Depth, FrameBuffer};
use crate::png::{Compositor, PixelFormat, decode_image};
use crate::premultiply::premultiply_pixel;
use crate::qtrle::{Argb32, RleDepth, Rgb24, Rgb555, decode_sample};
use crate::writer::{MvidWriter, StreamInfo};

/// How keyframes are stored in the output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KeyframeMode {
    /// Uncompressed little-endian pixels, page aligned.
    #[default]
    Raw,
    /// c4 opcodes applied to a cleared frame.
    Compressed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConvertOptions {
    pub keyframes: KeyframeMode,
    pub layout: RecordLayout,
}

impl Default for ConvertOptions {
    fn default() -> Self {
        Self {
            keyframes: KeyframeMode::Raw,
            layout: RecordLayout::Large,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[cfg_attr(feature = "jsonschema", derive(schemars::JsonSchema))]
pub enum InputFormat {
    Mov,
    Apng,
}

/// Atom types that may open a QuickTime file.
const MOV_LEADING_ATOMS: [&[u8; 4]; 7] = [b"ftyp", b"moov", b"mdat", b"wide", b"free", b"skip", b"pnot"];

/// Identify an input from its first eight bytes.
pub fn sniff_format(prefix: &[u8]) -> Option<InputFormat> {
    if prefix.starts_with(&PNG_SIGNATURE) {
        return Some(InputFormat::Apng);
    }
    let kind = prefix.get(4..8)?;
    MOV_LEADING_ATOMS
        .iter()
        .any(|atom| kind == atom.as_slice())
        .then_some(InputFormat::Mov)
}

/// What was written for one display frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    Keyframe,
    Delta,
    Nop,
}

/// Totals reported after a conversion.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize)]
#[cfg_attr(feature = "jsonschema", derive(schemars::JsonSchema))]
pub struct ConvertSummary {
    pub width: u32,
    pub height: u32,
    pub bpp: u32,
    pub frame_duration: f32,
    pub frames: usize,
    pub keyframes: usize,
    pub deltas: usize,
    pub nop_frames: usize,
    /// Bytes appended for frame payloads, padding included.
    pub payload_bytes: u64,
}

impl ConvertSummary {
    fn count(&mut self, kind: FrameKind, bytes: u64) {
        self.frames += 1;
        self.payload_bytes += bytes;
        match kind {
            FrameKind::Keyframe => self.keyframes += 1,
            FrameKind::Delta => self.deltas += 1,
            FrameKind::Nop => self.nop_frames += 1,
        }
    }
}

/// Write a keyframe holding `fb` in the requested form.
fn append_keyframe<P: C4Pixel, W: Write + Seek>(
    writer: &mut MvidWriter<W>,
    fb: &FrameBuffer<P>,
    mode: KeyframeMode,
) -> Result<u64, MvidError> {
    match mode {
        KeyframeMode::Raw => writer.write_raw_keyframe(&fb.to_le_bytes(), fb.checksum()),
        KeyframeMode::Compressed => {
            writer.write_compressed_frame(&P::compact_c4(&encode_keyframe(fb)), true, fb.checksum())
        }
    }
}

/// Decode one Animation sample into `fb` and append its converted form.
///
/// Returns the kind of frame written and the bytes appended.
pub fn append_sample<D, W>(
    writer: &mut MvidWriter<W>,
    sample: &[u8],
    keyframe: bool,
    fb: &mut FrameBuffer<D::Pixel>,
    mode: KeyframeMode,
) -> Result<(FrameKind, u64), MvidError>
where
    D: RleDepth,
    D::Pixel: C4Pixel,
    W: Write + Seek,
{
    decode_sample::<D>(sample, keyframe, fb);
    if keyframe && mode == KeyframeMode::Raw {
        let bytes = writer.write_raw_keyframe(&fb.to_le_bytes(), fb.checksum())?;
        return Ok((FrameKind::Keyframe, bytes));
    }
    match encode_sample::<D>(sample, keyframe, fb.width(), fb.height()) {
        None => Ok((FrameKind::Nop, writer.write_nop_frame()?)),
        Some(generic) => {
            let words = <D::Pixel as C4Pixel>::compact_c4(&generic);
            let bytes = writer.write_compressed_frame(&words, keyframe, fb.checksum())?;
            let kind = if keyframe { FrameKind::Keyframe } else { FrameKind::Delta };
            Ok((kind, bytes))
        }
    }
}

fn convert_track<D, R, W>(
    mov: &MovFile,
    input: &mut R,
    writer: &mut MvidWriter<W>,
    mode: KeyframeMode,
    summary: &mut ConvertSummary,
) -> Result<(), ConvertError>
where
    D: RleDepth,
    D::Pixel: C4Pixel,
    R: Read + Seek,
    W: Write + Seek,
{
    let mut fb = FrameBuffer::<D::Pixel>::new(mov.width as usize, mov.height as usize);
    let mut last_sample = None;
    for (frame, &index) in mov.frame_samples.iter().enumerate() {
        // A sample held across several display frames repeats as no-ops.
        if last_sample == Some(index) {
            summary.count(FrameKind::Nop, writer.write_nop_frame()?);
            continue;
        }
        last_sample = Some(index);

        let sample = mov.read_sample(input, index)?;
        let keyframe = mov.samples[index].keyframe;
        let (kind, bytes) = append_sample::<D, W>(writer, &sample, keyframe, &mut fb, mode)?;
        debug!("frame {frame}: sample {index} ({} bytes) -> {kind:?}, {bytes} bytes", sample.len());
        summary.count(kind, bytes);
    }
    Ok(())
}

/// Convert an Animation-codec movie.
pub fn convert_mov<R: Read + Seek, W: Write + Seek>(
    input: &mut R,
    output: W,
    options: &ConvertOptions,
) -> Result<ConvertSummary, ConvertError> {
    let mov = parse_mov(input)?;
    info!(
        "Animation track: {}x{} {}, {} samples, {} frames at {:.4}s",
        mov.width,
        mov.height,
        mov.depth,
        mov.samples.len(),
        mov.frame_count(),
        mov.frame_duration()
    );

    let info = StreamInfo {
        width: mov.width,
        height: mov.height,
        depth: mov.depth,
        frame_duration: mov.frame_duration(),
        num_frames: mov.frame_count(),
    };
    let mut writer = MvidWriter::create(output, info, options.layout)?;
    let mut summary = ConvertSummary {
        width: mov.width,
        height: mov.height,
        bpp: mov.depth.bits(),
        frame_duration: mov.frame_duration(),
        ..Default::default()
    };

    let mode = options.keyframes;
    match mov.depth {
        Depth::Bpp16 => convert_track::<Rgb555, _, _>(&mov, input, &mut writer, mode, &mut summary)?,
        Depth::Bpp24 => convert_track::<Rgb24, _, _>(&mov, input, &mut writer, mode, &mut summary)?,
        Depth::Bpp32 => convert_track::<Argb32, _, _>(&mov, input, &mut writer, mode, &mut summary)?,
    }
    writer.finish()?;
    Ok(summary)
}

/// Convert an animated PNG. Output is 32 bpp premultiplied when the image
/// can carry transparency and 24 bpp otherwise.
pub fn convert_apng<R: Read, W: Write + Seek>(
    input: &mut R,
    output: W,
    options: &ConvertOptions,
) -> Result<ConvertSummary, ConvertError> {
    let apng = read_apng(input)?;
    let format = PixelFormat::from_apng(&apng)?;
    let controls: Vec<_> = apng.frames.iter().map(|f| f.control).collect();
    let timing = frame_timing(&controls);
    let (width, height) = (apng.header.width, apng.header.height);
    let depth = if format.has_alpha() { Depth::Bpp32 } else { Depth::Bpp24 };
    info!(
        "APNG: {width}x{height} {depth}, {} frames shown as {} at {:.4}s",
        apng.frames.len(),
        timing.total_frames(),
        timing.frame_duration
    );

    let frame_duration = timing.frame_duration as f32;
    let info = StreamInfo {
        width,
        height,
        depth,
        frame_duration,
        num_frames: timing.total_frames(),
    };
    let mut writer = MvidWriter::create(output, info, options.layout)?;
    let mut summary = ConvertSummary {
        width,
        height,
        bpp: depth.bits(),
        frame_duration,
        ..Default::default()
    };

    let mut compositor = Compositor::new(width, height);
    // What the output decodes to so far; deltas are taken against it.
    let mut shown: Option<FrameBuffer<u32>> = None;
    for (index, (frame, &repeats)) in apng.frames.iter().zip(&timing.repeats).enumerate() {
        let control = &frame.control;
        let image = decode_image(&format, index, control.width, control.height, &frame.data)?;
        let pixels = compositor
            .render(control, &image)
            .iter()
            .map(|&p| match depth {
                Depth::Bpp32 => premultiply_pixel(p),
                _ => p & 0x00FF_FFFF,
            })
            .collect();
        let current = FrameBuffer::from_pixels(width as usize, height as usize, pixels);

        let (kind, bytes) = match &shown {
            None => (
                FrameKind::Keyframe,
                append_keyframe(&mut writer, &current, options.keyframes)?,
            ),
            Some(prev) if control.is_probable_noop_marker() && current.get(0, 0) == prev.get(0, 0) => {
                debug!("frame {index}: 1x1 marker frame treated as a no-op");
                (FrameKind::Nop, writer.write_nop_frame()?)
            }
            Some(prev) => match encode_delta(prev, &current) {
                None => (FrameKind::Nop, writer.write_nop_frame()?),
                Some(generic) => (
                    FrameKind::Delta,
                    writer.write_compressed_frame(&compact_c4_32(&generic), false, current.checksum())?,
                ),
            },
        };
        debug!("frame {index}: {kind:?}, {bytes} bytes, shown {repeats}x");
        summary.count(kind, bytes);
        if kind != FrameKind::Nop {
            shown = Some(current);
        }

        for _ in 1..repeats {
            summary.count(FrameKind::Nop, writer.write_nop_frame()?);
        }
    }
    writer.finish()?;
    Ok(summary)
}

/// Convert `input` into a new `.mvid` file at `output`, choosing the reader
/// from the input's leading bytes.
///
/// A failed conversion removes the partial output.
pub fn convert_file(input: &Path, output: &Path, options: &ConvertOptions) -> Result<ConvertSummary, ConvertError> {
    let mut reader = BufReader::new(File::open(input)?);
    let mut prefix = Vec::with_capacity(8);
    (&mut reader).take(8).read_to_end(&mut prefix)?;
    reader.seek(SeekFrom::Start(0))?;
    let format = sniff_format(&prefix).ok_or(ConvertError::UnknownFormat)?;
    info!("Converting {} ({format:?}) to {}", input.display(), output.display());

    let writer = BufWriter::new(File::create(output)?);
    let result = match format {
        InputFormat::Mov => convert_mov(&mut reader, writer, options),
        InputFormat::Apng => convert_apng(&mut reader, writer, options),
    };
    match result {
        Ok(summary) => {
            info!(
                "Wrote {} frames ({} keyframes, {} deltas, {} no-ops) to {}",
                summary.frames,
                summary.keyframes,
                summary.deltas,
                summary.nop_frames,
                output.display()
            );
            Ok(summary)
        }
        Err(e) => {
            if let Err(remove) = std::fs::remove_file(output) {
                debug!("Could not remove partial output {}: {remove}", output.display());
            }
            Err(e)
        }
    }
}
