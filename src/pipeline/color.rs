use image::{Rgb, RgbImage};

/// Doubles the saturation channel of every pixel in HSV space, clamping at
/// full saturation, and converts back to RGB. Counteracts the washed-out
/// look of equalized inputs; applied to every outgoing image regardless of
/// alignment outcome.
pub fn boost_saturation(image: &RgbImage) -> RgbImage {
    let mut out = RgbImage::new(image.width(), image.height());
    for (x, y, pixel) in image.enumerate_pixels() {
        let (h, s, v) = rgb_to_hsv(*pixel);
        let boosted = (s * 2.0).min(1.0);
        out.put_pixel(x, y, hsv_to_rgb(h, boosted, v));
    }
    out
}

/// RGB -> HSV with hue in degrees [0, 360), saturation and value in [0, 1].
fn rgb_to_hsv(pixel: Rgb<u8>) -> (f32, f32, f32) {
    let r = pixel[0] as f32 / 255.0;
    let g = pixel[1] as f32 / 255.0;
    let b = pixel[2] as f32 / 255.0;

    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    let delta = max - min;

    let h = if delta == 0.0 {
        0.0
    } else if max == r {
        60.0 * (((g - b) / delta).rem_euclid(6.0))
    } else if max == g {
        60.0 * ((b - r) / delta + 2.0)
    } else {
        60.0 * ((r - g) / delta + 4.0)
    };

    let s = if max == 0.0 { 0.0 } else { delta / max };

    (h, s, max)
}

fn hsv_to_rgb(h: f32, s: f32, v: f32) -> Rgb<u8> {
    let c = v * s;
    let x = c * (1.0 - ((h / 60.0).rem_euclid(2.0) - 1.0).abs());
    let m = v - c;

    let (r, g, b) = match h {
        h if h < 60.0 => (c, x, 0.0),
        h if h < 120.0 => (x, c, 0.0),
        h if h < 180.0 => (0.0, c, x),
        h if h < 240.0 => (0.0, x, c),
        h if h < 300.0 => (x, 0.0, c),
        _ => (c, 0.0, x),
    };

    Rgb([
        ((r + m) * 255.0).round() as u8,
        ((g + m) * 255.0).round() as u8,
        ((b + m) * 255.0).round() as u8,
    ])
}
