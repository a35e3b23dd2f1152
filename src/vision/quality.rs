//! Image quality assessment
//!
//! Advisory only: the report is attached to every response but never blocks
//! processing.

use image::GrayImage;
use serde::Serialize;

const MIN_BRIGHTNESS: f64 = 40.0;
const MAX_BRIGHTNESS: f64 = 215.0;
const MIN_BLUR_SCORE: f64 = 100.0;
const MIN_CONTRAST: f64 = 30.0;
const MIN_WIDTH: u32 = 800;
const MIN_HEIGHT: u32 = 600;

/// Measured properties of the luminance plane
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QualityMetrics {
    /// Mean luminance
    pub brightness: f64,
    /// Variance of the Laplacian response; low means blurry
    pub blur_score: f64,
    /// Luminance standard deviation
    pub contrast: f64,
    /// "WxH"
    pub resolution: String,
}

/// Quality verdict for one photo
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QualityReport {
    pub suitable: bool,
    /// 0..=100
    pub score: u8,
    pub issues: Vec<String>,
    pub metrics: QualityMetrics,
}

/// Assess a luminance plane
pub fn assess_quality(gray: &GrayImage) -> QualityReport {
    let (width, height) = gray.dimensions();
    let pixels = gray.as_raw();

    let (brightness, contrast) = mean_and_std(pixels.iter().map(|&v| v as f64));
    let blur_score = laplacian_variance(gray);

    let mut score: i32 = 100;
    let mut issues = Vec::new();

    if brightness < MIN_BRIGHTNESS {
        score -= 30;
        issues.push("Image too dark - use better lighting".to_string());
    } else if brightness > MAX_BRIGHTNESS {
        score -= 30;
        issues.push("Image too bright/overexposed - reduce lighting".to_string());
    }

    if blur_score < MIN_BLUR_SCORE {
        score -= 40;
        issues.push("Image too blurry - hold camera steady and focus on text".to_string());
    }

    if contrast < MIN_CONTRAST {
        score -= 20;
        issues.push("Low contrast - improve lighting or try different angle".to_string());
    }

    if width < MIN_WIDTH || height < MIN_HEIGHT {
        if width < MIN_WIDTH {
            score -= 10;
        }
        issues.push("Image resolution too low - get closer to the text".to_string());
    }

    QualityReport {
        suitable: issues.is_empty(),
        score: score.clamp(0, 100) as u8,
        issues,
        metrics: QualityMetrics {
            brightness: round2(brightness),
            blur_score: round2(blur_score),
            contrast: round2(contrast),
            resolution: format!("{}x{}", width, height),
        },
    }
}

/// Variance of the 4-neighbour Laplacian response
fn laplacian_variance(gray: &GrayImage) -> f64 {
    if gray.width() == 0 || gray.height() == 0 {
        return 0.0;
    }
    let response = imageproc::filter::laplacian_filter(gray);
    let (_, std) = mean_and_std(response.as_raw().iter().map(|&v| v as f64));
    std * std
}

fn mean_and_std(values: impl Iterator<Item = f64>) -> (f64, f64) {
    let mut count = 0u64;
    let mut sum = 0.0;
    let mut sum_sq = 0.0;
    for v in values {
        count += 1;
        sum += v;
        sum_sq += v * v;
    }
    if count == 0 {
        return (0.0, 0.0);
    }
    let mean = sum / count as f64;
    let variance = (sum_sq / count as f64 - mean * mean).max(0.0);
    (mean, variance.sqrt())
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    #[test]
    fn test_flat_gray_is_blurry_and_flat() {
        let report = assess_quality(&GrayImage::from_pixel(1000, 800, Luma([128])));

        assert_eq!(report.score, 40);
        assert_eq!(report.issues.len(), 2);
        assert!(!report.suitable);
        assert_eq!(report.metrics.brightness, 128.0);
        assert_eq!(report.metrics.blur_score, 0.0);
        assert_eq!(report.metrics.resolution, "1000x800");
    }

    #[test]
    fn test_sharp_checkerboard_is_suitable() {
        let img = GrayImage::from_fn(1024, 768, |x, y| {
            Luma([if (x / 4 + y / 4) % 2 == 0 { 0 } else { 255 }])
        });
        let report = assess_quality(&img);

        assert_eq!(report.score, 100);
        assert!(report.suitable);
        assert!(report.issues.is_empty());
    }

    #[test]
    fn test_score_floors_at_zero() {
        let report = assess_quality(&GrayImage::from_pixel(100, 100, Luma([10])));

        assert_eq!(report.score, 0);
        assert_eq!(report.issues.len(), 4);
        assert!(report.issues[0].contains("too dark"));
    }

    #[test]
    fn test_short_image_flags_resolution_without_penalty() {
        let img = GrayImage::from_fn(1024, 400, |x, y| {
            Luma([if (x / 4 + y / 4) % 2 == 0 { 0 } else { 255 }])
        });
        let report = assess_quality(&img);

        assert_eq!(report.score, 100);
        assert!(!report.suitable);
        assert_eq!(report.issues, vec!["Image resolution too low - get closer to the text"]);
    }

    #[test]
    fn test_laplacian_variance_of_single_spike() {
        let mut img = GrayImage::new(5, 5);
        img.put_pixel(2, 2, Luma([255]));

        // Responses: -1020 at the spike, +255 on its four neighbours
        let expected = (1020.0f64.powi(2) + 4.0 * 255.0f64.powi(2)) / 25.0;
        assert!((laplacian_variance(&img) - expected).abs() < 1e-6);
        assert_eq!(laplacian_variance(&GrayImage::new(0, 0)), 0.0);
    }

    #[test]
    fn test_overexposed() {
        let report = assess_quality(&GrayImage::from_pixel(900, 700, Luma([250])));
        assert!(report.issues[0].contains("overexposed"));
    }
}
