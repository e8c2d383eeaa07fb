//! Color helpers: hex parsing, luminance and CIE Lab conversion.

use crate::error::{MesherError, Result};
use glam::{Mat3, Vec3};

/// An 8-bit sRGB color.
pub type Rgb = [u8; 3];

/// D65 reference white in XYZ.
const WHITE_D65: Vec3 = Vec3::new(0.950_47, 1.0, 1.088_83);

/// Parse `#rrggbb`, `rrggbb` or the `#rgb` shorthand.
pub fn parse_hex(hex: &str) -> Result<Rgb> {
    let digits = hex.trim().trim_start_matches('#');
    let invalid = || MesherError::InvalidColor(hex.to_string());
    if !digits.is_ascii() {
        return Err(invalid());
    }

    let expanded: String = match digits.len() {
        3 => digits.chars().flat_map(|c| [c, c]).collect(),
        6 => digits.to_string(),
        _ => return Err(invalid()),
    };

    let channel = |i: usize| u8::from_str_radix(&expanded[i..i + 2], 16).map_err(|_| invalid());
    Ok([channel(0)?, channel(2)?, channel(4)?])
}

/// Format a color as lowercase `#rrggbb`.
pub fn to_hex(rgb: Rgb) -> String {
    format!("#{:02x}{:02x}{:02x}", rgb[0], rgb[1], rgb[2])
}

/// Squared distance in RGB space.
pub fn distance_sq(a: Rgb, b: Rgb) -> u32 {
    a.iter()
        .zip(b.iter())
        .map(|(&x, &y)| {
            let d = x as i32 - y as i32;
            (d * d) as u32
        })
        .sum()
}

/// Rec. 709 relative luminance in `[0, 1]`, computed on the gamma-encoded values.
pub fn luminance(rgb: Rgb) -> f32 {
    (0.2126 * rgb[0] as f32 + 0.7152 * rgb[1] as f32 + 0.0722 * rgb[2] as f32) / 255.0
}

fn linearize(channel: u8) -> f32 {
    let c = channel as f32 / 255.0;
    if c <= 0.040_45 {
        c / 12.92
    } else {
        ((c + 0.055) / 1.055).powf(2.4)
    }
}

fn lab_f(t: f32) -> f32 {
    const DELTA: f32 = 6.0 / 29.0;
    if t > DELTA * DELTA * DELTA {
        t.cbrt()
    } else {
        t / (3.0 * DELTA * DELTA) + 4.0 / 29.0
    }
}

/// Convert an sRGB color to CIE L*a*b* (D65), returned as `(L, a, b)`.
pub fn srgb_to_lab(rgb: Rgb) -> Vec3 {
    let srgb_to_xyz = Mat3::from_cols(
        Vec3::new(0.412_456_4, 0.212_672_9, 0.019_333_9),
        Vec3::new(0.357_576_1, 0.715_152_2, 0.119_192_0),
        Vec3::new(0.180_437_5, 0.072_175_0, 0.950_304_1),
    );
    let linear = Vec3::new(linearize(rgb[0]), linearize(rgb[1]), linearize(rgb[2]));
    let xyz = (srgb_to_xyz * linear) / WHITE_D65;

    let (fx, fy, fz) = (lab_f(xyz.x), lab_f(xyz.y), lab_f(xyz.z));
    Vec3::new(116.0 * fy - 16.0, 500.0 * (fx - fy), 200.0 * (fy - fz))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_hex() {
        assert_eq!(parse_hex("#ff8000").unwrap(), [255, 128, 0]);
        assert_eq!(parse_hex("00FF10").unwrap(), [0, 255, 16]);
        assert_eq!(parse_hex("#fa0").unwrap(), [255, 170, 0]);
    }

    #[test]
    fn test_parse_hex_rejects_garbage() {
        assert!(parse_hex("#12345").is_err());
        assert!(parse_hex("#zzzzzz").is_err());
        assert!(parse_hex("").is_err());
    }

    #[test]
    fn test_hex_round_trip() {
        assert_eq!(to_hex([255, 128, 0]), "#ff8000");
        assert_eq!(parse_hex(&to_hex([1, 2, 3])).unwrap(), [1, 2, 3]);
    }

    #[test]
    fn test_luminance_extremes() {
        assert_eq!(luminance([0, 0, 0]), 0.0);
        assert!((luminance([255, 255, 255]) - 1.0).abs() < 1e-5);
        assert!(luminance([0, 255, 0]) > luminance([255, 0, 0]));
    }

    #[test]
    fn test_lab_white_and_black() {
        let white = srgb_to_lab([255, 255, 255]);
        assert!((white.x - 100.0).abs() < 0.1);
        assert!(white.y.abs() < 0.1 && white.z.abs() < 0.1);

        let black = srgb_to_lab([0, 0, 0]);
        assert!(black.length() < 0.1);
    }

    #[test]
    fn test_lab_red_is_positive_a() {
        let red = srgb_to_lab([255, 0, 0]);
        assert!((red.x - 53.24).abs() < 0.5);
        assert!(red.y > 70.0);
    }
}
