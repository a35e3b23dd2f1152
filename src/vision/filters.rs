//! Image filters for OCR optimization
//!
//! Grayscale conversion, contrast enhancement, denoising, sharpening and
//! binarization primitives used by the candidate recipes. All filters take
//! an 8-bit luminance plane and return a new one; inputs are never mutated.

use anyhow::{bail, Result};
use image::{DynamicImage, GrayImage, ImageBuffer, Luma, Rgb, RgbImage};
use imageproc::distance_transform::Norm;

/// Local threshold weighting used by [`adaptive_threshold`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdaptiveMethod {
    /// Plain mean of the window
    Mean,
    /// Gaussian-weighted mean of the window
    Gaussian,
}

/// Convert to grayscale with the standard luminance weights
pub fn grayscale(image: &DynamicImage) -> GrayImage {
    if let DynamicImage::ImageLuma8(gray) = image {
        return gray.clone();
    }

    let rgb = image.to_rgb8();
    GrayImage::from_fn(rgb.width(), rgb.height(), |x, y| {
        Luma([luminance(rgb.get_pixel(x, y))])
    })
}

fn luminance(pixel: &Rgb<u8>) -> u8 {
    let [r, g, b] = pixel.0;
    (0.299 * r as f32 + 0.587 * g as f32 + 0.114 * b as f32)
        .round()
        .clamp(0.0, 255.0) as u8
}

/// Contrast limited adaptive histogram equalization.
///
/// The image is split into `grid.0 x grid.1` tiles, each tile gets its own
/// clipped equalization table and pixels are bilinearly interpolated between
/// the four nearest tile tables.
pub fn clahe(image: &GrayImage, clip_limit: f32, grid: (u32, u32)) -> Result<GrayImage> {
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
        bail!("CLAHE on empty {}x{} image", width, height);
    }

    let tiles_x = grid.0.max(1);
    let tiles_y = grid.1.max(1);
    let tile_w = width.div_ceil(tiles_x);
    let tile_h = height.div_ceil(tiles_y);

    let mut luts = vec![[0u8; 256]; (tiles_x * tiles_y) as usize];
    for ty in 0..tiles_y {
        for tx in 0..tiles_x {
            let lut = &mut luts[(ty * tiles_x + tx) as usize];
            let x0 = tx * tile_w;
            let y0 = ty * tile_h;
            let x1 = (x0 + tile_w).min(width);
            let y1 = (y0 + tile_h).min(height);

            if x0 >= x1 || y0 >= y1 {
                for (i, v) in lut.iter_mut().enumerate() {
                    *v = i as u8;
                }
                continue;
            }

            let mut hist = [0u32; 256];
            for y in y0..y1 {
                for x in x0..x1 {
                    hist[image.get_pixel(x, y)[0] as usize] += 1;
                }
            }

            let area = (x1 - x0) * (y1 - y0);
            clip_histogram(&mut hist, clip_limit, area);

            let scale = 255.0 / area as f32;
            let mut cumulative = 0u32;
            for (i, count) in hist.iter().enumerate() {
                cumulative += count;
                lut[i] = (cumulative as f32 * scale).round().min(255.0) as u8;
            }
        }
    }

    let inv_tw = 1.0 / tile_w as f32;
    let inv_th = 1.0 / tile_h as f32;
    let tiles_x = tiles_x as usize;
    let tiles_y = tiles_y as usize;

    Ok(GrayImage::from_fn(width, height, |x, y| {
        let (tx1, tx2, xa) = tile_neighbours(x as f32 * inv_tw - 0.5, tiles_x);
        let (ty1, ty2, ya) = tile_neighbours(y as f32 * inv_th - 0.5, tiles_y);
        let v = image.get_pixel(x, y)[0] as usize;
        let lut = |tx: usize, ty: usize| luts[ty * tiles_x + tx][v] as f32;

        let top = lut(tx1, ty1) * (1.0 - xa) + lut(tx2, ty1) * xa;
        let bottom = lut(tx1, ty2) * (1.0 - xa) + lut(tx2, ty2) * xa;
        Luma([(top * (1.0 - ya) + bottom * ya).round().clamp(0.0, 255.0) as u8])
    }))
}

/// Neighbouring tile indices and interpolation weight for a tile coordinate
fn tile_neighbours(position: f32, tiles: usize) -> (usize, usize, f32) {
    let lower = position.floor();
    let weight = position - lower;
    let lower = lower as i64;
    let first = lower.max(0) as usize;
    let second = ((lower + 1).max(0) as usize).min(tiles - 1);
    (first.min(tiles - 1), second, weight)
}

/// Clip a tile histogram and spread the excess evenly over all bins
fn clip_histogram(hist: &mut [u32; 256], clip_limit: f32, area: u32) {
    if clip_limit <= 0.0 {
        return;
    }

    let limit = ((clip_limit * area as f32 / 256.0) as u32).max(1);
    let mut excess = 0u32;
    for count in hist.iter_mut() {
        if *count > limit {
            excess += *count - limit;
            *count = limit;
        }
    }

    let bonus = excess / 256;
    let residual = (excess % 256) as usize;
    for count in hist.iter_mut() {
        *count += bonus;
    }
    if residual > 0 {
        let step = (256 / residual).max(1);
        for count in hist.iter_mut().step_by(step).take(residual) {
            *count += 1;
        }
    }
}

/// Sharpen by mixing the image with a Gaussian-blurred copy:
/// `original * strength + blurred * (1 - strength)`
pub fn unsharp_mask(image: &GrayImage, sigma: f32, strength: f32) -> Result<GrayImage> {
    if sigma <= 0.0 {
        bail!("unsharp mask sigma must be positive, got {}", sigma);
    }

    let blurred = imageproc::filter::gaussian_blur_f32(image, sigma);
    Ok(GrayImage::from_fn(image.width(), image.height(), |x, y| {
        let original = image.get_pixel(x, y)[0] as f32;
        let soft = blurred.get_pixel(x, y)[0] as f32;
        let value = original * strength + soft * (1.0 - strength);
        Luma([value.round().clamp(0.0, 255.0) as u8])
    }))
}

/// Edge-preserving smoothing over a `diameter` window
pub fn bilateral_filter(
    image: &GrayImage,
    diameter: u32,
    sigma_color: f32,
    sigma_space: f32,
) -> GrayImage {
    // imageproc scales its color table by the brightest pixel
    if image.as_raw().iter().all(|&v| v == 0) {
        return image.clone();
    }
    imageproc::filter::bilateral_filter(image, diameter, sigma_color, sigma_space)
}

/// Non-local means denoising.
///
/// Every pixel becomes a weighted mean of the pixels in its search window,
/// weighted by how similar their surrounding patches are. `strength` plays
/// the role of the filter parameter `h`: higher removes more noise and more
/// detail. Patch distances are computed one offset at a time with a
/// separable box sum, so cost grows with the search window but not the
/// patch size.
pub fn non_local_means(
    image: &GrayImage,
    strength: f32,
    patch_radius: u32,
    search_radius: u32,
) -> GrayImage {
    let (width, height) = image.dimensions();
    let (w, h) = (width as usize, height as usize);
    if w == 0 || h == 0 || strength <= 0.0 {
        return image.clone();
    }

    let src = image.as_raw();
    let at = |x: usize, y: usize, dx: i64, dy: i64| -> f32 {
        src[clamp_index(y as i64 + dy, h) * w + clamp_index(x as i64 + dx, w)] as f32
    };
    let patch = patch_radius as i64;
    let search = search_radius as i64;
    let box_kernel = vec![1.0f32; (2 * patch + 1) as usize];
    let patch_area = box_kernel.len().pow(2) as f32;
    let inv_h2 = 1.0 / (strength * strength);

    let mut weight_sum = vec![0.0f32; w * h];
    let mut value_sum = vec![0.0f32; w * h];

    for dy in -search..=search {
        for dx in -search..=search {
            let dist: ImageBuffer<Luma<f32>, Vec<f32>> = ImageBuffer::from_fn(width, height, |x, y| {
                let (x, y) = (x as usize, y as usize);
                let d = at(x, y, 0, 0) - at(x, y, dx, dy);
                Luma([d * d])
            });
            let patch_dist = imageproc::filter::separable_filter_equal(&dist, &box_kernel);

            for (i, d) in patch_dist.as_raw().iter().enumerate() {
                let weight = (-(d / patch_area) * inv_h2).exp();
                weight_sum[i] += weight;
                value_sum[i] += weight * at(i % w, i / w, dx, dy);
            }
        }
    }

    GrayImage::from_fn(width, height, |x, y| {
        let i = y as usize * w + x as usize;
        Luma([(value_sum[i] / weight_sum[i]).round().clamp(0.0, 255.0) as u8])
    })
}

fn clamp_index(i: i64, len: usize) -> usize {
    i.clamp(0, len as i64 - 1) as usize
}

/// Binarize against a per-pixel threshold: the local (mean or Gaussian
/// weighted) average over a `block_size` window minus `c`
pub fn adaptive_threshold(
    image: &GrayImage,
    block_size: u32,
    c: f32,
    method: AdaptiveMethod,
) -> Result<GrayImage> {
    if block_size < 3 || block_size % 2 == 0 {
        bail!("adaptive threshold block size must be odd and >= 3, got {}", block_size);
    }

    let kernel = match method {
        AdaptiveMethod::Mean => vec![1.0 / block_size as f32; block_size as usize],
        AdaptiveMethod::Gaussian => gaussian_kernel(block_size),
    };
    let local = separable_filter(image, &kernel);
    let width = image.width() as usize;

    Ok(GrayImage::from_fn(image.width(), image.height(), |x, y| {
        let threshold = local[y as usize * width + x as usize].round() - c;
        let value = image.get_pixel(x, y)[0] as f32;
        Luma([if value > threshold { 255 } else { 0 }])
    }))
}

/// Normalized Gaussian kernel with the sigma conventionally derived from size
fn gaussian_kernel(size: u32) -> Vec<f32> {
    let sigma = 0.3 * ((size as f32 - 1.0) * 0.5 - 1.0) + 0.8;
    let center = (size / 2) as f32;
    let raw: Vec<f32> = (0..size)
        .map(|i| {
            let d = i as f32 - center;
            (-(d * d) / (2.0 * sigma * sigma)).exp()
        })
        .collect();
    let total: f32 = raw.iter().sum();
    raw.into_iter().map(|v| v / total).collect()
}

/// Apply a 1-D kernel along rows then columns with edge replication.
///
/// Runs on an f32 copy so the local means keep their fractional part.
fn separable_filter(image: &GrayImage, kernel: &[f32]) -> Vec<f32> {
    let float: ImageBuffer<Luma<f32>, Vec<f32>> =
        ImageBuffer::from_fn(image.width(), image.height(), |x, y| Luma([image.get_pixel(x, y)[0] as f32]));
    imageproc::filter::separable_filter_equal(&float, kernel).into_raw()
}

/// Global threshold chosen by Otsu's method
pub fn otsu_threshold(image: &GrayImage) -> GrayImage {
    let level = imageproc::contrast::otsu_level(image);
    binarize(image, level)
}

/// Pixels above `level` become white, the rest black
pub fn binarize(image: &GrayImage, level: u8) -> GrayImage {
    GrayImage::from_fn(image.width(), image.height(), |x, y| {
        Luma([if image.get_pixel(x, y)[0] > level { 255 } else { 0 }])
    })
}

/// Morphological close followed by open with a square kernel of the given
/// radius. Radius 0 is a 1x1 kernel and leaves the image untouched.
pub fn close_then_open(image: &GrayImage, radius: u8) -> GrayImage {
    if radius == 0 {
        return image.clone();
    }
    let closed = imageproc::morphology::close(image, Norm::LInf, radius);
    imageproc::morphology::open(&closed, Norm::LInf, radius)
}

/// Bitwise complement
pub fn invert(image: &GrayImage) -> GrayImage {
    let mut inverted = image.clone();
    image::imageops::invert(&mut inverted);
    inverted
}

/// Tone down glare on color photos: equalize only the lightness channel in
/// Lab space, leaving the chroma channels as they were
pub fn suppress_glare(image: &RgbImage, clip_limit: f32, grid: (u32, u32)) -> Result<RgbImage> {
    let (width, height) = image.dimensions();
    let mut lightness = GrayImage::new(width, height);
    let mut chroma = Vec::with_capacity((width * height) as usize);

    for (x, y, pixel) in image.enumerate_pixels() {
        let (l, a, b) = srgb_to_lab(pixel);
        lightness.put_pixel(x, y, Luma([(l * 255.0 / 100.0).round().clamp(0.0, 255.0) as u8]));
        chroma.push((a, b));
    }

    let equalized = clahe(&lightness, clip_limit, grid)?;

    Ok(RgbImage::from_fn(width, height, |x, y| {
        let (a, b) = chroma[(y * width + x) as usize];
        let l = equalized.get_pixel(x, y)[0] as f32 * 100.0 / 255.0;
        lab_to_srgb(l, a, b)
    }))
}

const D65_XN: f32 = 0.950456;
const D65_ZN: f32 = 1.088754;
const LAB_EPSILON: f32 = 0.008856;

fn srgb_to_lab(pixel: &Rgb<u8>) -> (f32, f32, f32) {
    let [r, g, b] = pixel.0.map(|c| srgb_to_linear(c as f32 / 255.0));

    let x = (0.412453 * r + 0.357580 * g + 0.180423 * b) / D65_XN;
    let y = 0.212671 * r + 0.715160 * g + 0.072169 * b;
    let z = (0.019334 * r + 0.119193 * g + 0.950227 * b) / D65_ZN;

    let (fx, fy, fz) = (lab_f(x), lab_f(y), lab_f(z));
    let l = if y > LAB_EPSILON { 116.0 * y.cbrt() - 16.0 } else { 903.3 * y };
    (l, 500.0 * (fx - fy), 200.0 * (fy - fz))
}

fn lab_to_srgb(l: f32, a: f32, b: f32) -> Rgb<u8> {
    let fy = (l + 16.0) / 116.0;
    let fx = fy + a / 500.0;
    let fz = fy - b / 200.0;

    let y = if l > 903.3 * LAB_EPSILON { fy * fy * fy } else { l / 903.3 };
    let x = lab_f_inv(fx) * D65_XN;
    let z = lab_f_inv(fz) * D65_ZN;

    let r = 3.240479 * x - 1.537150 * y - 0.498535 * z;
    let g = -0.969256 * x + 1.875992 * y + 0.041556 * z;
    let bl = 0.055648 * x - 0.204043 * y + 1.057311 * z;

    Rgb([r, g, bl].map(|c| (linear_to_srgb(c) * 255.0).round().clamp(0.0, 255.0) as u8))
}

fn lab_f(t: f32) -> f32 {
    if t > LAB_EPSILON {
        t.cbrt()
    } else {
        7.787 * t + 16.0 / 116.0
    }
}

fn lab_f_inv(t: f32) -> f32 {
    let cubed = t * t * t;
    if cubed > LAB_EPSILON {
        cubed
    } else {
        (t - 16.0 / 116.0) / 7.787
    }
}

fn srgb_to_linear(c: f32) -> f32 {
    if c <= 0.04045 {
        c / 12.92
    } else {
        ((c + 0.055) / 1.055).powf(2.4)
    }
}

fn linear_to_srgb(c: f32) -> f32 {
    let c = c.clamp(0.0, 1.0);
    if c <= 0.0031308 {
        12.92 * c
    } else {
        1.055 * c.powf(1.0 / 2.4) - 0.055
    }
}
