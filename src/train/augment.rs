use image::imageops::{self, FilterType};
use image::{DynamicImage, Rgb, RgbImage};
use rand::Rng;

pub const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
pub const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

const MAX_ROTATION_DEG: f32 = 20.0;
const BRIGHTNESS: f32 = 0.2;
const CONTRAST: f32 = 0.2;
const SATURATION: f32 = 0.2;
const HUE_TURN: f32 = 0.1;
const CROP_SCALE: (f32, f32) = (0.8, 1.0);
const CROP_RATIO: (f32, f32) = (3.0 / 4.0, 4.0 / 3.0);
const CROP_ATTEMPTS: usize = 10;

/// Flattens an RGB image to normalised CHW floats.
pub fn to_chw_normalized(img: &RgbImage) -> Vec<f32> {
    let (w, h) = img.dimensions();
    let plane = (w * h) as usize;
    let mut out = vec![0f32; 3 * plane];
    for (x, y, px) in img.enumerate_pixels() {
        let i = (y * w + x) as usize;
        for c in 0..3 {
            out[c * plane + i] = (px[c] as f32 / 255.0 - IMAGENET_MEAN[c]) / IMAGENET_STD[c];
        }
    }
    out
}

pub fn eval_transform(img: &DynamicImage, size: u32) -> Vec<f32> {
    let resized = img.resize_exact(size, size, FilterType::Triangle).to_rgb8();
    to_chw_normalized(&resized)
}

/// Training-time transform. Randomness comes from the caller's rng so
/// parallel loaders can seed per sample.
pub fn train_transform<R: Rng + ?Sized>(img: &DynamicImage, size: u32, rng: &mut R) -> Vec<f32> {
    let mut rgb = img.resize_exact(size, size, FilterType::Triangle).to_rgb8();
    if rng.gen_bool(0.5) {
        imageops::flip_horizontal_in_place(&mut rgb);
    }
    let angle = rng.gen_range(-MAX_ROTATION_DEG..=MAX_ROTATION_DEG);
    rgb = rotate(&rgb, angle);
    rgb = color_jitter(&rgb, rng);
    rgb = random_resized_crop(&rgb, size, rng);
    to_chw_normalized(&rgb)
}

/// Rotates about the centre, keeping the canvas size. Uncovered pixels are black.
pub fn rotate(img: &RgbImage, degrees: f32) -> RgbImage {
    let (w, h) = img.dimensions();
    if degrees == 0.0 || w == 0 || h == 0 {
        return img.clone();
    }
    let (sin, cos) = degrees.to_radians().sin_cos();
    let cx = (w as f32 - 1.0) / 2.0;
    let cy = (h as f32 - 1.0) / 2.0;
    RgbImage::from_fn(w, h, |x, y| {
        let dx = x as f32 - cx;
        let dy = y as f32 - cy;
        // inverse mapping: destination -> source
        let sx = cos * dx + sin * dy + cx;
        let sy = -sin * dx + cos * dy + cy;
        let (ix, iy) = (sx.round(), sy.round());
        if ix < 0.0 || iy < 0.0 || ix >= w as f32 || iy >= h as f32 {
            Rgb([0, 0, 0])
        } else {
            *img.get_pixel(ix as u32, iy as u32)
        }
    })
}

fn luma(p: &Rgb<u8>) -> f32 {
    0.299 * p[0] as f32 + 0.587 * p[1] as f32 + 0.114 * p[2] as f32
}

fn clamp_u8(v: f32) -> u8 {
    v.round().clamp(0.0, 255.0) as u8
}

pub fn color_jitter<R: Rng + ?Sized>(img: &RgbImage, rng: &mut R) -> RgbImage {
    let brightness = rng.gen_range(1.0 - BRIGHTNESS..=1.0 + BRIGHTNESS);
    let contrast = rng.gen_range(1.0 - CONTRAST..=1.0 + CONTRAST);
    let saturation = rng.gen_range(1.0 - SATURATION..=1.0 + SATURATION);
    let hue = rng.gen_range(-HUE_TURN..=HUE_TURN);

    let mut out = img.clone();
    for px in out.pixels_mut() {
        for c in 0..3 {
            px[c] = clamp_u8(px[c] as f32 * brightness);
        }
    }

    let n = (out.width() * out.height()).max(1) as f32;
    let mean = out.pixels().map(luma).sum::<f32>() / n;
    for px in out.pixels_mut() {
        for c in 0..3 {
            px[c] = clamp_u8(mean + contrast * (px[c] as f32 - mean));
        }
    }

    for px in out.pixels_mut() {
        let gray = luma(px);
        for c in 0..3 {
            px[c] = clamp_u8(gray + saturation * (px[c] as f32 - gray));
        }
    }

    let degrees = (hue * 360.0).round() as i32;
    if degrees != 0 {
        out = imageops::huerotate(&out, degrees);
    }
    out
}

/// Crops a random region covering 80-100% of the area with aspect ratio in
/// [3/4, 4/3], then resizes to `size`. Falls back to the whole image.
pub fn random_resized_crop<R: Rng + ?Sized>(img: &RgbImage, size: u32, rng: &mut R) -> RgbImage {
    let (w, h) = img.dimensions();
    let area = (w * h) as f32;
    let (log_lo, log_hi) = (CROP_RATIO.0.ln(), CROP_RATIO.1.ln());
    for _ in 0..CROP_ATTEMPTS {
        let target = area * rng.gen_range(CROP_SCALE.0..=CROP_SCALE.1);
        let ratio = rng.gen_range(log_lo..=log_hi).exp();
        let cw = (target * ratio).sqrt().round() as u32;
        let ch = (target / ratio).sqrt().round() as u32;
        if cw == 0 || ch == 0 || cw > w || ch > h {
            continue;
        }
        let x = rng.gen_range(0..=w - cw);
        let y = rng.gen_range(0..=h - ch);
        let crop = imageops::crop_imm(img, x, y, cw, ch).to_image();
        return imageops::resize(&crop, size, size, FilterType::Triangle);
    }
    imageops::resize(img, size, size, FilterType::Triangle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn solid(w: u32, h: u32, c: [u8; 3]) -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_pixel(w, h, Rgb(c)))
    }

    #[test]
    fn eval_transform_shape_and_values() {
        let v = eval_transform(&solid(40, 30, [255, 0, 128]), 8);
        assert_eq!(v.len(), 3 * 8 * 8);
        let r = (1.0 - IMAGENET_MEAN[0]) / IMAGENET_STD[0];
        let g = (0.0 - IMAGENET_MEAN[1]) / IMAGENET_STD[1];
        assert!((v[0] - r).abs() < 1e-4);
        assert!((v[64] - g).abs() < 1e-4);
    }

    #[test]
    fn train_transform_keeps_shape_and_is_seeded() {
        let img = solid(50, 70, [120, 90, 60]);
        let a = train_transform(&img, 16, &mut StdRng::seed_from_u64(7));
        let b = train_transform(&img, 16, &mut StdRng::seed_from_u64(7));
        assert_eq!(a.len(), 3 * 16 * 16);
        assert_eq!(a, b);
        assert!(a.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn rotate_quarter_turn_moves_corner() {
        let mut img = RgbImage::new(3, 3);
        img.put_pixel(0, 0, Rgb([255, 255, 255]));
        let r = rotate(&img, 90.0);
        let lit: Vec<(u32, u32)> = r
            .enumerate_pixels()
            .filter(|(_, _, p)| p[0] == 255)
            .map(|(x, y, _)| (x, y))
            .collect();
        assert_eq!(lit.len(), 1);
        assert_ne!(lit[0], (0, 0));
    }

    #[test]
    fn rotate_fills_corners_black() {
        let img = RgbImage::from_pixel(20, 20, Rgb([200, 200, 200]));
        let r = rotate(&img, 20.0);
        assert_eq!(*r.get_pixel(0, 0), Rgb([0, 0, 0]));
        assert_eq!(*r.get_pixel(10, 10), Rgb([200, 200, 200]));
    }

    #[test]
    fn jitter_leaves_gray_gray() {
        let img = RgbImage::from_pixel(4, 4, Rgb([100, 100, 100]));
        let out = color_jitter(&img, &mut StdRng::seed_from_u64(3));
        for p in out.pixels() {
            assert!((p[0] as i32 - p[1] as i32).abs() <= 1);
            assert!((p[1] as i32 - p[2] as i32).abs() <= 1);
        }
    }

    #[test]
    fn crop_output_size() {
        let img = RgbImage::from_pixel(37, 23, Rgb([1, 2, 3]));
        let out = random_resized_crop(&img, 12, &mut StdRng::seed_from_u64(1));
        assert_eq!(out.dimensions(), (12, 12));
    }
}
