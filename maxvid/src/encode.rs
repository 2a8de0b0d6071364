//! Producing opcode streams: from Animation-codec samples and from
//! framebuffer differences.

use crate::opcode::{GenericEncoder, OpPixel};
use crate::pixels::FrameBuffer;
use crate::qtrle::{RleDepth, RunSink, walk_sample};

/// Word budget for the generic encoding of one Animation-codec sample.
///
/// Every run in the sample costs at least as many bytes as its generic form
/// costs words; the remaining terms cover skips split at the 16-bit count
/// limit, the trailing pad skip and DONE.
pub fn sample_word_budget(sample_len: usize, width: usize, height: usize) -> usize {
    sample_len + width * height / 0xFFFF + 4
}

struct OpcodeSink<P> {
    encoder: GenericEncoder<P>,
    width: usize,
    touched: bool,
}

impl<P: OpPixel> RunSink<P> for OpcodeSink<P> {
    fn dup(&mut self, row: usize, col: usize, pixel: P, count: usize) {
        self.encoder.skip_to(row * self.width + col);
        self.encoder.dup(pixel, count);
        self.touched = true;
    }

    fn copy(&mut self, row: usize, col: usize, pixels: &[P]) {
        self.encoder.skip_to(row * self.width + col);
        self.encoder.copy(pixels);
        self.touched = true;
    }
}

/// Translate one Animation-codec sample straight into generic opcodes,
/// without materialising a framebuffer.
///
/// Returns `None` for a delta sample that changes no pixels. Keyframe output
/// assumes the decoder starts from a cleared frame.
pub fn encode_sample<D: RleDepth>(sample: &[u8], keyframe: bool, width: usize, height: usize) -> Option<Vec<u32>> {
    let mut sink = OpcodeSink {
        encoder: GenericEncoder::<D::Pixel>::new(width * height, sample_word_budget(sample.len(), width, height)),
        width,
        touched: false,
    };
    let header = walk_sample::<D, _>(sample, width, height, &mut sink);
    assert!(header.is_some() || !keyframe, "keyframe sample carries no pixel data");
    if !sink.touched && !keyframe {
        return None;
    }
    Some(sink.encoder.finish())
}

/// Generic opcodes that turn `prev` into `cur`, or `None` when the frames
/// are identical.
pub fn encode_delta<P: OpPixel>(prev: &FrameBuffer<P>, cur: &FrameBuffer<P>) -> Option<Vec<u32>> {
    assert!(
        prev.width() == cur.width() && prev.height() == cur.height(),
        "delta between frames of different sizes"
    );
    let (words, changed) = encode_changes(Some(prev.pixels()), cur.pixels());
    changed.then_some(words)
}

/// Generic opcodes for a compressed keyframe, which decodes onto a cleared
/// frame: zero pixels become skips.
pub fn encode_keyframe<P: OpPixel>(cur: &FrameBuffer<P>) -> Vec<u32> {
    encode_changes(None, cur.pixels()).0
}

fn encode_changes<P: OpPixel>(prev: Option<&[P]>, cur: &[P]) -> (Vec<u32>, bool) {
    let total = cur.len();
    let unchanged = |i: usize| match prev {
        Some(prev) => prev[i] == cur[i],
        None => cur[i] == P::default(),
    };

    // Worst case alternates one changed and one unchanged pixel.
    let mut encoder = GenericEncoder::<P>::new(total, total * 2 + 4);
    let mut changed = false;
    let mut i = 0;
    while i < total {
        if unchanged(i) {
            encoder.skip(1);
            i += 1;
            continue;
        }
        changed = true;

        let run = cur[i..].iter().take_while(|&&p| p == cur[i]).count();
        if run >= 2 {
            encoder.dup(cur[i], run);
            i += run;
            continue;
        }

        // Literal span: stop at an unchanged pixel or where a repeat begins.
        let start = i;
        i += 1;
        while i < total && !unchanged(i) && !(i + 1 < total && cur[i + 1] == cur[i]) {
            i += 1;
        }
        encoder.copy(&cur[start..i]);
    }
    (encoder.finish(), changed)
}
