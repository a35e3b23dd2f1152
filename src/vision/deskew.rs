//! Skew detection and correction
//!
//! The skew angle is the orientation of the minimum-area rectangle enclosing
//! all foreground (non-zero) pixels, folded into [-45, 45] degrees. Hull
//! vertices sit on whole pixels, so the rectangle only gives a coarse
//! angle; it is refined by a line fit through the foreground edge along the
//! rectangle's long sides.

use image::{GrayImage, Luma};
use imageproc::geometry::convex_hull;
use imageproc::point::Point;
use tracing::debug;

use super::filters;

/// Corrections smaller than this (in degrees) are treated as noise
pub const SKEW_NOISE_FLOOR_DEG: f32 = 0.5;

/// Edge pixels within this distance of a rectangle side belong to it
const SIDE_TOLERANCE: f64 = 1.5;

/// Detect the skew of the foreground in degrees.
///
/// Returns `None` when there is not enough foreground to fit a rectangle.
pub fn detect_skew(image: &GrayImage) -> Option<f32> {
    let edge = foreground_edge(image);
    if edge.len() < 3 {
        return None;
    }

    let hull = convex_hull(edge.as_slice());
    let rect = RectFit::min_area(&hull)?;
    let angle = rect.refine(&edge).unwrap_or(rect.angle);
    Some(fold_angle(angle.to_degrees() as f32))
}

/// First and last foreground pixel of every row and every column.
///
/// Their convex hull equals the hull of the full foreground, and they trace
/// the outer edge the line fit runs on.
fn foreground_edge(image: &GrayImage) -> Vec<Point<i32>> {
    let (width, height) = image.dimensions();
    let fg = |x: u32, y: u32| image.get_pixel(x, y)[0] > 0;
    let mut points = Vec::new();

    for y in 0..height {
        let first = (0..width).find(|&x| fg(x, y));
        let last = (0..width).rev().find(|&x| fg(x, y));
        push_extremes(&mut points, first.zip(last).map(|(a, b)| ((a, y), (b, y))));
    }
    for x in 0..width {
        let first = (0..height).find(|&y| fg(x, y));
        let last = (0..height).rev().find(|&y| fg(x, y));
        push_extremes(&mut points, first.zip(last).map(|(a, b)| ((x, a), (x, b))));
    }
    points
}

fn push_extremes(points: &mut Vec<Point<i32>>, extremes: Option<((u32, u32), (u32, u32))>) {
    if let Some((first, last)) = extremes {
        points.push(Point::new(first.0 as i32, first.1 as i32));
        if last != first {
            points.push(Point::new(last.0 as i32, last.1 as i32));
        }
    }
}

/// Rectangle aligned with direction `angle` (radians), as extents of the
/// point projections on `u = (cos, sin)` and `v = (-sin, cos)`
#[derive(Debug, Clone, Copy)]
struct RectFit {
    angle: f64,
    u: (f64, f64),
    v: (f64, f64),
}

impl RectFit {
    fn around(angle: f64, points: &[Point<i32>]) -> Self {
        let (sin, cos) = angle.sin_cos();
        let mut u = (f64::MAX, f64::MIN);
        let mut v = (f64::MAX, f64::MIN);
        for p in points {
            let (x, y) = (p.x as f64, p.y as f64);
            let pu = x * cos + y * sin;
            let pv = -x * sin + y * cos;
            u = (u.0.min(pu), u.1.max(pu));
            v = (v.0.min(pv), v.1.max(pv));
        }
        Self { angle, u, v }
    }

    fn area(&self) -> f64 {
        (self.u.1 - self.u.0) * (self.v.1 - self.v.0)
    }

    /// Rotating calipers: the smallest rectangle has a side on a hull edge
    fn min_area(hull: &[Point<i32>]) -> Option<Self> {
        let mut best: Option<Self> = None;
        for (i, a) in hull.iter().enumerate() {
            let b = hull[(i + 1) % hull.len()];
            let (dx, dy) = ((b.x - a.x) as f64, (b.y - a.y) as f64);
            if dx == 0.0 && dy == 0.0 {
                continue;
            }
            let fit = Self::around(dy.atan2(dx), hull);
            if best.map_or(true, |current| fit.area() < current.area()) {
                best = Some(fit);
            }
        }
        best
    }

    /// Direction of the long sides from a least-squares fit of the edge
    /// pixels lying on them.
    ///
    /// Both sides are centered separately and pooled. The result is kept
    /// only if it stays within the coarse angle's pixel quantization.
    fn refine(&self, edge: &[Point<i32>]) -> Option<f64> {
        let along_u = self.u.1 - self.u.0 >= self.v.1 - self.v.0;
        let (direction, sides, length) = if along_u {
            (self.angle, self.v, self.u.1 - self.u.0)
        } else {
            (self.angle + std::f64::consts::FRAC_PI_2, self.u, self.v.1 - self.v.0)
        };
        if length < 1.0 {
            return None;
        }

        let (sin, cos) = self.angle.sin_cos();
        let offset = |p: &Point<i32>| {
            let (x, y) = (p.x as f64, p.y as f64);
            if along_u {
                -x * sin + y * cos
            } else {
                x * cos + y * sin
            }
        };

        let (mut sxx, mut sxy, mut syy, mut count) = (0.0, 0.0, 0.0, 0usize);
        for level in [sides.0, sides.1] {
            let side: Vec<(f64, f64)> = edge
                .iter()
                .filter(|&p| (offset(p) - level).abs() <= SIDE_TOLERANCE)
                .map(|p| (p.x as f64, p.y as f64))
                .collect();
            if side.len() < 2 {
                continue;
            }
            let n = side.len() as f64;
            let mx = side.iter().map(|p| p.0).sum::<f64>() / n;
            let my = side.iter().map(|p| p.1).sum::<f64>() / n;
            for (x, y) in side.iter() {
                sxx += (x - mx) * (x - mx);
                sxy += (x - mx) * (y - my);
                syy += (y - my) * (y - my);
            }
            count += side.len();
        }
        if count < 8 || sxx + syy == 0.0 {
            return None;
        }

        let fitted = 0.5 * (2.0 * sxy).atan2(sxx - syy);
        let delta = wrap_half_turn(fitted - direction);
        let quantum = (2.0 / length).atan();
        (delta.abs() <= quantum).then_some(direction + delta)
    }
}

/// Fold a line direction difference into (-90, 90] degrees, in radians
fn wrap_half_turn(mut radians: f64) -> f64 {
    use std::f64::consts::{FRAC_PI_2, PI};
    while radians > FRAC_PI_2 {
        radians -= PI;
    }
    while radians <= -FRAC_PI_2 {
        radians += PI;
    }
    radians
}

/// Fold an edge direction into (-45, 45]
fn fold_angle(mut degrees: f32) -> f32 {
    while degrees > 45.0 {
        degrees -= 90.0;
    }
    while degrees <= -45.0 {
        degrees += 90.0;
    }
    degrees
}

/// Deskew a binarized page where text is dark on a light background.
///
/// Detection runs on the complement so the text, not the paper, is the
/// foreground; the correction is applied to the image as given.
pub fn deskew_text(binary: &GrayImage) -> GrayImage {
    correct(binary, detect_skew(&filters::invert(binary)))
}

fn correct(image: &GrayImage, skew: Option<f32>) -> GrayImage {
    match skew {
        Some(angle) if angle.abs() >= SKEW_NOISE_FLOOR_DEG => {
            debug!("Correcting skew of {:.2} degrees", angle);
            rotate_about_center(image, -angle)
        }
        _ => image.clone(),
    }
}

/// Rotate content by `degrees` (positive turns +x towards +y) about the
/// image center with bicubic sampling and replicated borders
pub fn rotate_about_center(image: &GrayImage, degrees: f32) -> GrayImage {
    let (width, height) = image.dimensions();
    let cx = (width / 2) as f32;
    let cy = (height / 2) as f32;
    let (sin, cos) = degrees.to_radians().sin_cos();

    GrayImage::from_fn(width, height, |x, y| {
        let dx = x as f32 - cx;
        let dy = y as f32 - cy;
        let sx = cos * dx + sin * dy + cx;
        let sy = -sin * dx + cos * dy + cy;
        Luma([sample_bicubic(image, sx, sy)])
    })
}

fn sample_bicubic(image: &GrayImage, x: f32, y: f32) -> u8 {
    let (width, height) = image.dimensions();
    let x0 = x.floor();
    let y0 = y.floor();
    let wx = cubic_weights(x - x0);
    let wy = cubic_weights(y - y0);

    let mut acc = 0.0f32;
    for (j, wy) in wy.iter().enumerate() {
        let sy = (y0 as i64 - 1 + j as i64).clamp(0, height as i64 - 1) as u32;
        let mut row = 0.0f32;
        for (i, wx) in wx.iter().enumerate() {
            let sx = (x0 as i64 - 1 + i as i64).clamp(0, width as i64 - 1) as u32;
            row += wx * image.get_pixel(sx, sy)[0] as f32;
        }
        acc += wy * row;
    }
    acc.round().clamp(0.0, 255.0) as u8
}

/// Cubic convolution weights for the four taps around a fractional offset
fn cubic_weights(t: f32) -> [f32; 4] {
    const A: f32 = -0.75;
    let w0 = ((A * (t + 1.0) - 5.0 * A) * (t + 1.0) + 8.0 * A) * (t + 1.0) - 4.0 * A;
    let w1 = ((A + 2.0) * t - (A + 3.0)) * t * t + 1.0;
    let u = 1.0 - t;
    let w2 = ((A + 2.0) * u - (A + 3.0)) * u * u + 1.0;
    [w0, w1, w2, 1.0 - w0 - w1 - w2]
}
