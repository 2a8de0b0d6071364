//! `stbl` sample tables: timing, sizes, chunk layout and sync samples.

use std::ops::Range;

use crate::error::MovError;
use crate::format::{MAX_24_BITS, MAX_FRAMES};
use crate::fourcc::FourCc;
use crate::mov::{AtomData, Sample, find, require};

type Result<T> = std::result::Result<T, MovError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ChunkRun {
    first_chunk: u32,
    samples_per_chunk: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SampleTables {
    /// Per-sample duration in media ticks, expanded from `stts`.
    pub durations: Vec<u32>,
    pub sizes: Vec<u32>,
    chunk_runs: Vec<ChunkRun>,
    chunk_offsets: Vec<u64>,
    /// 1-based sync sample numbers; `None` when every sample is a keyframe.
    sync_samples: Option<Vec<u32>>,
}

/// `count` followed by `count` fixed-size entries, starting after the
/// version/flags word.
fn entries<'a>(atom: &AtomData<'a>, entry_size: usize) -> Result<(usize, &'a [u8])> {
    let count = atom.u32(4)? as usize;
    Ok((count, atom.bytes(8, count * entry_size)?))
}

fn be32(bytes: &[u8], at: usize) -> u32 {
    u32::from_be_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
}

impl SampleTables {
    pub fn parse(stbl: &[AtomData], parent: FourCc) -> Result<Self> {
        let stsz = require(stbl, b"stsz", parent)?;
        let uniform = stsz.u32(4)?;
        let sample_count = stsz.u32(8)?;
        if sample_count > MAX_FRAMES {
            return Err(MovError::SampleTable(format!(
                "stsz describes {sample_count} samples, more than the {MAX_FRAMES} frame limit"
            )));
        }
        let sample_count = sample_count as usize;

        // Both tables are checked before either is expanded.
        let stts = require(stbl, b"stts", parent)?;
        let (count, table) = entries(&stts, 8)?;
        let described: u64 = (0..count).map(|i| be32(table, i * 8) as u64).sum();
        if described != sample_count as u64 {
            return Err(MovError::SampleTable(format!(
                "stts describes {described} samples but stsz describes {sample_count}"
            )));
        }
        let sizes = if uniform != 0 {
            vec![uniform; sample_count]
        } else {
            let table = stsz.bytes(12, sample_count * 4)?;
            (0..sample_count).map(|i| be32(table, i * 4)).collect()
        };
        let mut durations = Vec::with_capacity(sample_count);
        for i in 0..count {
            let samples = be32(table, i * 8);
            let duration = be32(table, i * 8 + 4);
            durations.extend(std::iter::repeat_n(duration, samples as usize));
        }

        let stsc = require(stbl, b"stsc", parent)?;
        let (count, table) = entries(&stsc, 12)?;
        let chunk_runs: Vec<ChunkRun> = (0..count)
            .map(|i| ChunkRun {
                first_chunk: be32(table, i * 12),
                samples_per_chunk: be32(table, i * 12 + 4),
            })
            .collect();
        if chunk_runs.first().is_some_and(|r| r.first_chunk != 1)
            || chunk_runs.windows(2).any(|w| w[1].first_chunk <= w[0].first_chunk)
        {
            return Err(MovError::SampleTable(
                "stsc first-chunk numbers must start at 1 and increase".into(),
            ));
        }

        let chunk_offsets = match (find(stbl, b"stco", parent)?, find(stbl, b"co64", parent)?) {
            (Some(stco), _) => {
                let (count, table) = entries(&stco, 4)?;
                (0..count).map(|i| be32(table, i * 4) as u64).collect()
            }
            (None, Some(co64)) => {
                let (count, table) = entries(&co64, 8)?;
                (0..count)
                    .map(|i| (be32(table, i * 8) as u64) << 32 | be32(table, i * 8 + 4) as u64)
                    .collect()
            }
            (None, None) => {
                return Err(MovError::MissingAtom {
                    atom: FourCc::new(b"stco"),
                    parent,
                });
            }
        };

        let sync_samples = match find(stbl, b"stss", parent)? {
            Some(stss) => {
                let (count, table) = entries(&stss, 4)?;
                Some((0..count).map(|i| be32(table, i * 4)).collect())
            }
            None => None,
        };

        Ok(Self {
            durations,
            sizes,
            chunk_runs,
            chunk_offsets,
            sync_samples,
        })
    }

    /// Resolve every sample's file offset and keyframe flag, checking that it
    /// lies inside `mdat`.
    pub fn samples(&self, mdat: Range<u64>) -> Result<Vec<Sample>> {
        let count = self.sizes.len();
        if count == 0 {
            return Err(MovError::SampleTable("track has no samples".into()));
        }
        if self.durations.len() != count {
            return Err(MovError::SampleTable(format!(
                "stts describes {} samples but stsz describes {count}",
                self.durations.len()
            )));
        }

        let mut keyframes = vec![self.sync_samples.is_none(); count];
        for &number in self.sync_samples.iter().flatten() {
            if number == 0 || number as usize > count {
                return Err(MovError::SampleTable(format!(
                    "stss names sample {number} of {count}"
                )));
            }
            keyframes[number as usize - 1] = true;
        }
        if !keyframes[0] {
            let first = self.sync_samples.as_ref().and_then(|s| s.iter().min().copied()).unwrap_or(0);
            return Err(MovError::unsupported(b"stss", "first sync sample", 1, first));
        }

        let mut samples = Vec::with_capacity(count);
        let mut run = 0;
        for (chunk, &chunk_offset) in self.chunk_offsets.iter().enumerate() {
            let chunk_number = chunk as u32 + 1;
            while run + 1 < self.chunk_runs.len() && self.chunk_runs[run + 1].first_chunk <= chunk_number {
                run += 1;
            }
            let per_chunk = self.chunk_runs.get(run).map_or(0, |r| r.samples_per_chunk);
            let mut offset = chunk_offset;
            for _ in 0..per_chunk {
                let index = samples.len();
                if index == count {
                    return Err(MovError::SampleTable(format!(
                        "chunks hold more than the {count} samples in stsz"
                    )));
                }
                let length = self.sizes[index];
                if length > MAX_24_BITS {
                    return Err(MovError::SampleTooLarge { index, length });
                }
                if offset < mdat.start || offset + length as u64 > mdat.end {
                    return Err(MovError::SampleOutsideMdat { index, offset, length });
                }
                samples.push(Sample {
                    offset,
                    length,
                    keyframe: keyframes[index],
                });
                offset += length as u64;
            }
        }
        if samples.len() != count {
            return Err(MovError::SampleTable(format!(
                "chunks hold {} samples but stsz describes {count}",
                samples.len()
            )));
        }
        Ok(samples)
    }
}

/// Map display frames onto samples.
///
/// The shortest sample duration becomes the frame duration; the edit length
/// (in media ticks) divided by it gives the frame count. Frame `f` shows the
/// sample whose `[start, end)` window contains `f * frame_ticks`, with frames
/// past the last window showing the last sample.
pub(crate) fn map_frames(durations: &[u32], edit_ticks: u64) -> Result<(u32, Vec<usize>)> {
    let frame_ticks = *durations
        .iter()
        .min()
        .ok_or_else(|| MovError::SampleTable("track has no samples".into()))?;
    match frame_ticks {
        0 => return Err(MovError::SampleTable("stts has a zero sample duration".into())),
        1 => return Err(MovError::DegenerateFrameDuration),
        _ => {}
    }

    let frames = (edit_ticks as f64 / frame_ticks as f64).round() as u64;
    // The edit may run past the media (the last sample repeats), but by no
    // more than the media's own length.
    let media_ticks: u64 = durations.iter().map(|&d| d as u64).sum();
    if frames > MAX_FRAMES as u64 || frames > (2 * media_ticks).div_ceil(frame_ticks as u64) {
        return Err(MovError::SampleTable(format!(
            "edit of {edit_ticks} ticks gives {frames} frames of {frame_ticks} ticks, \
             more than the samples cover"
        )));
    }
    let frames = frames as usize;
    if durations.len() > frames {
        return Err(MovError::TooManySamples {
            samples: durations.len(),
            frames,
        });
    }

    let mut mapping = Vec::with_capacity(frames);
    let mut sample = 0usize;
    let mut window_end = durations[0] as u64;
    for frame in 0..frames {
        let t = frame as u64 * frame_ticks as u64;
        while t >= window_end && sample + 1 < durations.len() {
            sample += 1;
            window_end += durations[sample] as u64;
        }
        mapping.push(sample);
    }
    Ok((frame_ticks, mapping))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn full_atom(entries: &[u32]) -> Vec<u8> {
        let mut p = vec![0u8; 4];
        for v in entries {
            p.extend_from_slice(&v.to_be_bytes());
        }
        p
    }

    fn try_tables(
        stts: &[u32],
        stsz: &[u32],
        stsc: &[u32],
        stco: &[u32],
        stss: Option<&[u32]>,
    ) -> Result<SampleTables> {
        let payloads: Vec<(&[u8; 4], Vec<u8>)> = [
            Some((b"stts", full_atom(stts))),
            Some((b"stsz", full_atom(stsz))),
            Some((b"stsc", full_atom(stsc))),
            Some((b"stco", full_atom(stco))),
            stss.map(|s| (b"stss", full_atom(s))),
        ]
        .into_iter()
        .flatten()
        .collect();
        let atoms: Vec<AtomData> = payloads
            .iter()
            .map(|(kind, data)| AtomData {
                kind: FourCc::new(kind),
                offset: 0,
                data,
            })
            .collect();
        SampleTables::parse(&atoms, FourCc::new(b"stbl"))
    }

    fn tables(stts: &[u32], stsz: &[u32], stsc: &[u32], stco: &[u32], stss: Option<&[u32]>) -> SampleTables {
        try_tables(stts, stsz, stsc, stco, stss).unwrap()
    }

    #[test]
    fn test_chunk_offsets_accumulate_sizes() {
        // 3 samples: two in chunk 1 at 100, one in chunk 2 at 500.
        let t = tables(
            &[1, 3, 10],
            &[0, 3, 20, 30, 40],
            &[2, 1, 2, 1, 2, 1, 1],
            &[2, 100, 500],
            Some(&[1, 1]),
        );
        let samples = t.samples(0..1000).unwrap();
        let offsets: Vec<(u64, u32, bool)> = samples.iter().map(|s| (s.offset, s.length, s.keyframe)).collect();
        assert_eq!(offsets, vec![(100, 20, true), (120, 30, false), (500, 40, false)]);
    }

    #[test]
    fn test_missing_stss_means_all_keyframes() {
        let t = tables(&[1, 1, 10], &[0, 1, 10], &[1, 1, 1, 1], &[1, 50], None);
        let samples = t.samples(0..100).unwrap();
        assert!(samples[0].keyframe);
        assert_eq!(t.durations, vec![10]);
    }

    #[test]
    fn test_sample_outside_mdat() {
        let t = tables(&[1, 1, 10], &[0, 1, 60], &[1, 1, 1, 1], &[1, 50], None);
        assert!(matches!(
            t.samples(0..100),
            Err(MovError::SampleOutsideMdat { index: 0, offset: 50, length: 60 })
        ));
    }

    #[test]
    fn test_first_sample_must_be_sync() {
        let t = tables(&[1, 2, 10], &[5, 2], &[1, 1, 2, 1], &[1, 10], Some(&[1, 2]));
        assert!(matches!(
            t.samples(0..100),
            Err(MovError::Unsupported { field: "first sync sample", .. })
        ));
    }

    #[test]
    fn test_sample_count_mismatch() {
        let err = try_tables(&[1, 3, 10], &[5, 2], &[1, 1, 2, 1], &[1, 10], None).unwrap_err();
        assert!(matches!(err, MovError::SampleTable(_)));
    }

    #[test]
    fn test_map_frames_expands_long_samples() {
        // Sample 1 lasts three frames.
        let (ticks, frames) = map_frames(&[10, 30, 10], 50).unwrap();
        assert_eq!(ticks, 10);
        assert_eq!(frames, vec![0, 1, 1, 1, 2]);
    }

    #[test]
    fn test_map_frames_uneven_windows() {
        let (_, frames) = map_frames(&[15, 10, 15], 40).unwrap();
        assert_eq!(frames, vec![0, 0, 1, 2]);
    }

    #[test]
    fn test_map_frames_extends_last_sample() {
        let (_, frames) = map_frames(&[10, 10], 40).unwrap();
        assert_eq!(frames, vec![0, 1, 1, 1]);
    }

    #[test]
    fn test_map_frames_rejections() {
        assert!(matches!(map_frames(&[1, 2], 10), Err(MovError::DegenerateFrameDuration)));
        assert!(matches!(
            map_frames(&[10, 10, 10], 20),
            Err(MovError::TooManySamples { samples: 3, frames: 2 })
        ));
        assert!(matches!(map_frames(&[10, 10], 50), Err(MovError::SampleTable(_))));
        assert!(matches!(map_frames(&[10, 10], u64::MAX), Err(MovError::SampleTable(_))));
    }

    #[test]
    fn test_huge_uniform_sample_count_rejected() {
        let err = try_tables(&[1, 3, 10], &[1, 0xFFFF_FFFF], &[1, 1, 1, 1], &[1, 10], None).unwrap_err();
        assert!(matches!(err, MovError::SampleTable(_)));
        assert_eq!(err.code(), 210);

        // Under the limit, but stts disagrees: rejected before sizes are expanded.
        let err = try_tables(&[1, 3, 10], &[1, 1 << 24], &[1, 1, 1, 1], &[1, 10], None).unwrap_err();
        assert!(matches!(err, MovError::SampleTable(_)));
    }
}
