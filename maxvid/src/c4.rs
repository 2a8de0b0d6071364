//! "c4" wire encoding of maxvid opcodes.
//!
//! The c4 form is what is stored in `.mvid` frame payloads. It is produced by
//! compacting a generic opcode stream:
//!
//! 16bpp: `op << 30 | count << 16 | pixel`, count limited to 14 bits. DUP and
//! single-pixel COPY carry their pixel in the low half-word; a longer COPY
//! leaves it zero and is followed by packed pixel pairs (low half first, odd
//! pixel zero padded). SKIP and DONE leave the low half zero.
//!
//! 24/32bpp: `op << 30 | count`, count limited to 22 bits. DUP is followed by
//! one pixel word, COPY by one word per pixel.

use crate::opcode::{MAX_14_BITS, MAX_22_BITS, Op, OpCode, OpPixel, OpWriter, generic_ops};
use crate::pixels::FrameBuffer;

const OPCODE_SHIFT: u32 = 30;

pub fn c4_word16(op: OpCode, count: u32, pixel: u16) -> u32 {
    op.check_count(count, MAX_14_BITS);
    (op as u32) << OPCODE_SHIFT | count << 16 | pixel as u32
}

pub fn c4_word32(op: OpCode, count: u32) -> u32 {
    op.check_count(count, MAX_22_BITS);
    (op as u32) << OPCODE_SHIFT | count
}

fn flush_skip(out: &mut OpWriter, pending: &mut usize, max: u32, word: fn(u32) -> u32) {
    while *pending > 0 {
        let n = (*pending).min(max as usize);
        out.push(word(n as u32));
        *pending -= n;
    }
}

/// Split `count` into runs no longer than `max`, none of which is 1 unless
/// `count` itself is 1.
fn dup_runs(count: usize, max: usize) -> impl Iterator<Item = usize> {
    let mut remaining = count;
    std::iter::from_fn(move || {
        if remaining == 0 {
            return None;
        }
        let mut n = remaining.min(max);
        if remaining - n == 1 {
            n -= 1;
        }
        remaining -= n;
        Some(n)
    })
}

/// Compact a generic 16bpp opcode stream into c4 words.
pub fn compact_c4_16(generic: &[u32]) -> Vec<u32> {
    let mut out = OpWriter::with_capacity(generic.len() * 5 + 8);
    let mut pending = 0usize;
    let skip_word = |n| c4_word16(OpCode::Skip, n, 0);
    let mut scratch: Vec<u16> = Vec::new();

    for op in generic_ops::<u16>(generic) {
        match op {
            Op::Skip(n) => pending += n,
            Op::Dup { count, word } => {
                flush_skip(&mut out, &mut pending, MAX_14_BITS, skip_word);
                let pixel = u16::from_dup_word(word);
                for n in dup_runs(count, MAX_14_BITS as usize) {
                    let op = if n == 1 { OpCode::Copy } else { OpCode::Dup };
                    out.push(c4_word16(op, n as u32, pixel));
                }
            }
            Op::Copy { count, words } => {
                flush_skip(&mut out, &mut pending, MAX_14_BITS, skip_word);
                scratch.resize(count, 0);
                u16::unpack_copy(words, &mut scratch);
                for run in scratch.chunks(MAX_14_BITS as usize) {
                    if run.len() == 1 {
                        out.push(c4_word16(OpCode::Copy, 1, run[0]));
                    } else {
                        out.push(c4_word16(OpCode::Copy, run.len() as u32, 0));
                        u16::pack_copy(run, &mut out);
                    }
                }
            }
            Op::Done => {
                flush_skip(&mut out, &mut pending, MAX_14_BITS, skip_word);
                out.push(c4_word16(OpCode::Done, 0, 0));
            }
        }
    }
    out.into_words()
}

/// Compact a generic 24/32bpp opcode stream into c4 words.
pub fn compact_c4_32(generic: &[u32]) -> Vec<u32> {
    let mut out = OpWriter::with_capacity(generic.len() + 8);
    let mut pending = 0usize;
    let skip_word = |n| c4_word32(OpCode::Skip, n);

    for op in generic_ops::<u32>(generic) {
        match op {
            Op::Skip(n) => pending += n,
            Op::Dup { count, word } => {
                flush_skip(&mut out, &mut pending, MAX_22_BITS, skip_word);
                out.push(c4_word32(OpCode::Dup, count as u32));
                out.push(word);
            }
            Op::Copy { count, words } => {
                flush_skip(&mut out, &mut pending, MAX_22_BITS, skip_word);
                out.push(c4_word32(OpCode::Copy, count as u32));
                for &w in &words[..count] {
                    out.push(w);
                }
            }
            Op::Done => {
                flush_skip(&mut out, &mut pending, MAX_22_BITS, skip_word);
                out.push(c4_word32(OpCode::Done, 0));
            }
        }
    }
    out.into_words()
}

/// Apply a c4 16bpp stream on top of `fb`, panicking on malformed input.
pub fn apply_c4_16(words: &[u32], fb: &mut FrameBuffer<u16>) {
    let total = fb.len();
    let pixels = fb.pixels_mut();
    let mut cursor = 0usize;
    let mut i = 0usize;

    loop {
        let Some(&word) = words.get(i) else {
            panic!("c4 stream ends without DONE");
        };
        i += 1;
        let op = OpCode::from_word(word);
        let count = (word >> 16) & MAX_14_BITS;
        op.check_count(count, MAX_14_BITS);
        // Only DUP and single-pixel COPY carry a pixel in the low half.
        assert!(
            matches!((op, count), (OpCode::Dup, _) | (OpCode::Copy, 1)) || word & 0xFFFF == 0,
            "c4 word 0x{word:08X} has reserved bits set"
        );
        let count = count as usize;

        match op {
            OpCode::Skip => cursor += count,
            OpCode::Dup => {
                pixels[cursor..cursor + count].fill(word as u16);
                cursor += count;
            }
            OpCode::Copy if count == 1 => {
                pixels[cursor] = word as u16;
                cursor += 1;
            }
            OpCode::Copy => {
                let n = u16::copy_words(count);
                u16::unpack_copy(&words[i..i + n], &mut pixels[cursor..cursor + count]);
                i += n;
                cursor += count;
            }
            OpCode::Done => break,
        }
        assert!(cursor <= total, "c4 stream overruns frame");
    }

    assert_eq!(i, words.len(), "trailing words after DONE");
    assert_eq!(cursor, total, "c4 stream covers {cursor} of {total} pixels");
}

/// Apply a c4 24/32bpp stream on top of `fb`, panicking on malformed input.
pub fn apply_c4_32(words: &[u32], fb: &mut FrameBuffer<u32>) {
    let total = fb.len();
    let pixels = fb.pixels_mut();
    let mut cursor = 0usize;
    let mut i = 0usize;

    loop {
        let Some(&word) = words.get(i) else {
            panic!("c4 stream ends without DONE");
        };
        i += 1;
        assert_eq!(word & 0x3FC0_0000, 0, "c4 word 0x{word:08X} has reserved bits set");
        let op = OpCode::from_word(word);
        let count = word & MAX_22_BITS;
        op.check_count(count, MAX_22_BITS);
        let count = count as usize;

        match op {
            OpCode::Skip => cursor += count,
            OpCode::Dup => {
                pixels[cursor..cursor + count].fill(words[i]);
                i += 1;
                cursor += count;
            }
            OpCode::Copy => {
                pixels[cursor..cursor + count].copy_from_slice(&words[i..i + count]);
                i += count;
                cursor += count;
            }
            OpCode::Done => break,
        }
        assert!(cursor <= total, "c4 stream overruns frame");
    }

    assert_eq!(i, words.len(), "trailing words after DONE");
    assert_eq!(cursor, total, "c4 stream covers {cursor} of {total} pixels");
}

/// Pixel types with a c4 encoding.
pub trait C4Pixel: OpPixel {
    fn compact_c4(generic: &[u32]) -> Vec<u32>;
    fn apply_c4(words: &[u32], fb: &mut FrameBuffer<Self>);
}

impl C4Pixel for u16 {
    fn compact_c4(generic: &[u32]) -> Vec<u32> {
        compact_c4_16(generic)
    }

    fn apply_c4(words: &[u32], fb: &mut FrameBuffer<Self>) {
        apply_c4_16(words, fb)
    }
}

impl C4Pixel for u32 {
    fn compact_c4(generic: &[u32]) -> Vec<u32> {
        compact_c4_32(generic)
    }

    fn apply_c4(words: &[u32], fb: &mut FrameBuffer<Self>) {
        apply_c4_32(words, fb)
    }
}
