//! Alpha premultiplication via a 256x256 lookup table.
//!
//! `premultiply(a, c) == round(c * a / 255)`, computed once into a table so
//! the decode paths perform a single indexed read per channel.

use std::sync::LazyLock;

/// `TABLE.0[a * 256 + c]` is the premultiplied value of channel `c` at alpha `a`.
struct PremultiplyTable([u8; 256 * 256]);

static TABLE: LazyLock<Box<PremultiplyTable>> = LazyLock::new(build_table);

fn premultiply_float(alpha: u32, channel: u32) -> u8 {
    (channel as f64 * (alpha as f64 / 255.0) + 0.5) as u8
}

fn build_table() -> Box<PremultiplyTable> {
    let mut table = Box::new(PremultiplyTable([0u8; 256 * 256]));
    for alpha in 0..256u32 {
        for channel in 0..256u32 {
            table.0[(alpha * 256 + channel) as usize] = premultiply_float(alpha, channel);
        }
    }
    verify_table(&table);
    table
}

/// Sanity checks run once after the table is filled. A failure means the
/// floating point environment rounds differently than expected.
fn verify_table(table: &PremultiplyTable) {
    let row = |alpha: usize| &table.0[alpha * 256..(alpha + 1) * 256];

    assert!(row(0).iter().all(|&v| v == 0), "premultiply table: alpha 0 row not zero");
    for (channel, &v) in row(255).iter().enumerate() {
        assert!(
            (v as i32 - channel as i32).abs() <= 1,
            "premultiply table: alpha 255 row diverges at {channel}"
        );
    }

    // Re-derive a spread of cells with the integer form of the same rounding.
    for alpha in (0..256u32).step_by(17) {
        for channel in (0..256u32).step_by(13) {
            let expected = (2 * channel * alpha + 255) / 510;
            assert_eq!(
                table.0[(alpha * 256 + channel) as usize] as u32,
                expected,
                "premultiply table: cell ({alpha}, {channel})"
            );
        }
    }
}

/// Force the table to be built. Decoding works without calling this, but
/// startup code can use it to take the one-time cost up front.
pub fn init() {
    LazyLock::force(&TABLE);
}

/// Premultiply one channel value by an alpha value.
#[inline]
pub fn premultiply(alpha: u8, channel: u8) -> u8 {
    TABLE.0[(alpha as usize) << 8 | channel as usize]
}

/// Premultiply a straight-alpha `0xAARRGGBB` pixel.
#[inline]
pub fn premultiply_pixel(pixel: u32) -> u32 {
    let alpha = pixel >> 24;
    if alpha == 0 {
        return 0;
    }
    if alpha == 0xFF {
        return pixel;
    }
    let row = &TABLE.0[(alpha as usize) << 8..((alpha as usize) + 1) << 8];
    let red = row[((pixel >> 16) & 0xFF) as usize] as u32;
    let green = row[((pixel >> 8) & 0xFF) as usize] as u32;
    let blue = row[(pixel & 0xFF) as usize] as u32;
    (alpha << 24) | (red << 16) | (green << 8) | blue
}

/// Recover a straight channel value from a premultiplied one.
///
/// Premultiplication is lossy, so the estimate is checked against the
/// forward table and nudged by one in either direction when needed.
pub fn unpremultiply(alpha: u8, premultiplied: u8) -> u8 {
    if alpha == 0 {
        return 0;
    }
    let estimate = (premultiplied as f64 / (alpha as f64 / 255.0)).round();
    let estimate = estimate.clamp(0.0, 255.0) as i32;

    for candidate in [estimate, estimate - 1, estimate + 1] {
        if (0..=255).contains(&candidate) && premultiply(alpha, candidate as u8) == premultiplied {
            return candidate as u8;
        }
    }
    estimate as u8
}

/// Unpremultiply a `0xAARRGGBB` pixel.
pub fn unpremultiply_pixel(pixel: u32) -> u32 {
    let alpha = (pixel >> 24) as u8;
    if alpha == 0 {
        return 0;
    }
    let red = unpremultiply(alpha, (pixel >> 16) as u8) as u32;
    let green = unpremultiply(alpha, (pixel >> 8) as u8) as u32;
    let blue = unpremultiply(alpha, pixel as u8) as u32;
    ((alpha as u32) << 24) | (red << 16) | (green << 8) | blue
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_premultiply_matches_rounding_everywhere() {
        init();
        for alpha in 0..=255u32 {
            for channel in 0..=255u32 {
                let expected = ((channel * alpha) as f64 / 255.0).round() as u8;
                assert_eq!(premultiply(alpha as u8, channel as u8), expected, "({alpha}, {channel})");
            }
        }
    }

    #[test]
    fn test_premultiply_edges() {
        for c in 0..=255u8 {
            assert_eq!(premultiply(0, c), 0);
            assert_eq!(premultiply(255, c), c);
        }
    }

    #[test]
    fn test_round_trip_finds_preimage() {
        for alpha in 1..=255u8 {
            for c in 0..=255u8 {
                let p = premultiply(alpha, c);
                let back = unpremultiply(alpha, p);
                assert_eq!(premultiply(alpha, back), p, "alpha {alpha} channel {c}");
                if alpha == 255 {
                    assert_eq!(back, c);
                }
            }
        }
    }

    #[test]
    fn test_premultiply_pixel() {
        // Half-transparent red.
        assert_eq!(premultiply_pixel(0x80FF0000), 0x80800000);
        assert_eq!(premultiply_pixel(0x00FFFFFF), 0);
        assert_eq!(premultiply_pixel(0xFF123456), 0xFF123456);
    }

    #[test]
    fn test_unpremultiply_pixel() {
        assert_eq!(unpremultiply_pixel(0x80800000), 0x80FF0000);
        assert_eq!(unpremultiply_pixel(0x00000000), 0);
    }
}
