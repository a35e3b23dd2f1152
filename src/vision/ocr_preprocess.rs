//! Image normalization for OCR
//!
//! Produces a set of named candidate images from one photo. Each candidate
//! follows its own recipe of filters; nothing here mutates the source raster.

use anyhow::Result;
use image::imageops::FilterType;
use image::{DynamicImage, GrayImage};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

use super::deskew;
use super::filters::{self, AdaptiveMethod};
use super::RawImage;
use crate::config::{CandidatePreset, NormalizationSettings};

/// Name of a candidate recipe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CandidateTag {
    Standard,
    ShinyOptimized,
    HighContrast,
    Otsu,
    AdaptiveMean,
    Inverted,
    SimpleThreshold,
}

impl CandidateTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            CandidateTag::Standard => "standard",
            CandidateTag::ShinyOptimized => "shiny_optimized",
            CandidateTag::HighContrast => "high_contrast",
            CandidateTag::Otsu => "otsu",
            CandidateTag::AdaptiveMean => "adaptive_mean",
            CandidateTag::Inverted => "inverted",
            CandidateTag::SimpleThreshold => "simple_threshold",
        }
    }
}

impl fmt::Display for CandidateTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Generation order of the full preset
const FULL_PRESET: [CandidateTag; 6] = [
    CandidateTag::ShinyOptimized,
    CandidateTag::Standard,
    CandidateTag::HighContrast,
    CandidateTag::Inverted,
    CandidateTag::Otsu,
    CandidateTag::AdaptiveMean,
];

/// Generation order of the basic preset
const BASIC_PRESET: [CandidateTag; 3] = [
    CandidateTag::Standard,
    CandidateTag::SimpleThreshold,
    CandidateTag::Inverted,
];

/// One normalized variant of the photo
#[derive(Debug, Clone)]
pub struct CandidateImage {
    pub tag: CandidateTag,
    pub image: Arc<GrayImage>,
}

/// Builds candidate images according to the configured preset
#[derive(Debug, Clone)]
pub struct Normalizer {
    settings: NormalizationSettings,
}

impl Normalizer {
    pub fn new(settings: NormalizationSettings) -> Self {
        Self { settings }
    }

    /// Tags produced by [`Normalizer::candidates`], in generation order
    pub fn tags(&self) -> &'static [CandidateTag] {
        match self.settings.preset {
            CandidatePreset::Full => &FULL_PRESET,
            CandidatePreset::Basic => &BASIC_PRESET,
        }
    }

    /// Generate all candidates for the configured preset.
    ///
    /// Never fails: a recipe that errors degrades to the plain grayscale of
    /// the resized photo.
    pub fn candidates(&self, raw: &RawImage) -> Vec<CandidateImage> {
        let resized = self.resize_for_ocr(raw.image());
        let mut standard: Option<Arc<GrayImage>> = None;
        let mut out = Vec::with_capacity(self.tags().len());

        for &tag in self.tags() {
            let image = match tag {
                CandidateTag::Inverted => {
                    let base = match &standard {
                        Some(base) => base.clone(),
                        None => Arc::new(self.build(CandidateTag::Standard, &resized)),
                    };
                    Arc::new(filters::invert(&base))
                }
                _ => {
                    let image = Arc::new(self.build(tag, &resized));
                    if tag == CandidateTag::Standard {
                        standard = Some(image.clone());
                    }
                    image
                }
            };
            out.push(CandidateImage { tag, image });
        }

        debug!("Generated {} OCR candidates", out.len());
        out
    }

    /// Resize to the target width when the photo is outside half to double
    /// of it, preserving aspect ratio
    pub fn resize_for_ocr(&self, image: &DynamicImage) -> DynamicImage {
        let target = self.settings.target_width;
        let (width, height) = (image.width(), image.height());
        if width == 0 || target == 0 {
            return image.clone();
        }

        if width < target / 2 || width > target * 2 {
            let new_height = ((target as u64 * height as u64) / width as u64).max(1) as u32;
            debug!("Resizing {}x{} -> {}x{}", width, height, target, new_height);
            image.resize_exact(target, new_height, FilterType::CatmullRom)
        } else {
            image.clone()
        }
    }

    fn build(&self, tag: CandidateTag, resized: &DynamicImage) -> GrayImage {
        let result = match tag {
            CandidateTag::Standard => standard(resized),
            CandidateTag::ShinyOptimized => shiny_optimized(resized),
            CandidateTag::HighContrast => high_contrast(resized),
            CandidateTag::Otsu | CandidateTag::SimpleThreshold => {
                Ok(filters::otsu_threshold(&filters::grayscale(resized)))
            }
            CandidateTag::AdaptiveMean => adaptive_mean(resized),
            CandidateTag::Inverted => standard(resized).map(|img| filters::invert(&img)),
        };

        result.unwrap_or_else(|e| {
            warn!("Candidate {} failed, using plain grayscale: {:#}", tag, e);
            filters::grayscale(resized)
        })
    }
}

fn standard(image: &DynamicImage) -> Result<GrayImage> {
    let gray = filters::grayscale(image);
    let denoised = filters::non_local_means(&gray, 10.0, 1, 4);
    let enhanced = filters::clahe(&denoised, 2.0, (8, 8))?;
    let binary = filters::adaptive_threshold(&enhanced, 11, 2.0, AdaptiveMethod::Gaussian)?;
    Ok(filters::close_then_open(&binary, 0))
}

fn shiny_optimized(image: &DynamicImage) -> Result<GrayImage> {
    let gray = if image.color().has_color() {
        let deglared = filters::suppress_glare(&image.to_rgb8(), 3.0, (8, 8))?;
        filters::grayscale(&DynamicImage::ImageRgb8(deglared))
    } else {
        filters::grayscale(image)
    };

    let smoothed = filters::bilateral_filter(&gray, 9, 75.0, 75.0);
    let enhanced = filters::clahe(&smoothed, 3.0, (8, 8))?;
    let sharpened = filters::unsharp_mask(&enhanced, 2.0, 1.5)?;
    let binary = filters::adaptive_threshold(&sharpened, 15, 2.0, AdaptiveMethod::Gaussian)?;
    let straightened = deskew::deskew_text(&binary);
    Ok(filters::close_then_open(&straightened, 1))
}

fn high_contrast(image: &DynamicImage) -> Result<GrayImage> {
    let gray = filters::grayscale(image);
    let enhanced = filters::clahe(&gray, 4.0, (4, 4))?;
    let sharpened = filters::unsharp_mask(&enhanced, 1.5, 2.0)?;
    Ok(filters::otsu_threshold(&sharpened))
}

fn adaptive_mean(image: &DynamicImage) -> Result<GrayImage> {
    let gray = filters::grayscale(image);
    filters::adaptive_threshold(&gray, 11, 2.0, AdaptiveMethod::Mean)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    fn small_settings(preset: CandidatePreset) -> NormalizationSettings {
        NormalizationSettings {
            target_width: 64,
            preset,
        }
    }

    fn label_photo() -> RawImage {
        let img = RgbImage::from_fn(64, 48, |x, y| {
            if (10..54).contains(&x) && (y % 8) < 3 {
                Rgb([20, 20, 30])
            } else {
                Rgb([230, 225, 210])
            }
        });
        RawImage::from_dynamic(DynamicImage::ImageRgb8(img))
    }

    #[test]
    fn test_full_preset_order() {
        let normalizer = Normalizer::new(small_settings(CandidatePreset::Full));
        let tags: Vec<_> = normalizer
            .candidates(&label_photo())
            .iter()
            .map(|c| c.tag)
            .collect();
        assert_eq!(tags, FULL_PRESET.to_vec());
    }

    #[test]
    fn test_basic_preset_order() {
        let normalizer = Normalizer::new(small_settings(CandidatePreset::Basic));
        let tags: Vec<_> = normalizer
            .candidates(&label_photo())
            .iter()
            .map(|c| c.tag.as_str())
            .collect();
        assert_eq!(tags, vec!["standard", "simple_threshold", "inverted"]);
    }

    #[test]
    fn test_candidates_share_dimensions() {
        let normalizer = Normalizer::new(small_settings(CandidatePreset::Full));
        for candidate in normalizer.candidates(&label_photo()) {
            assert_eq!(candidate.image.dimensions(), (64, 48), "{}", candidate.tag);
        }
    }

    #[test]
    fn test_inverted_is_complement_of_standard() {
        let normalizer = Normalizer::new(small_settings(CandidatePreset::Basic));
        let candidates = normalizer.candidates(&label_photo());
        let standard = &candidates[0].image;
        let inverted = &candidates[2].image;

        for (a, b) in standard.as_raw().iter().zip(inverted.as_raw()) {
            assert_eq!(*a, 255 - *b);
        }
    }

    #[test]
    fn test_binary_recipes_are_binary() {
        let normalizer = Normalizer::new(small_settings(CandidatePreset::Full));
        for candidate in normalizer.candidates(&label_photo()) {
            if candidate.tag == CandidateTag::ShinyOptimized {
                continue;
            }
            assert!(
                candidate.image.as_raw().iter().all(|&v| v == 0 || v == 255),
                "{} is not binary",
                candidate.tag
            );
        }
    }

    #[test]
    fn test_resize_only_when_far_from_target() {
        let normalizer = Normalizer::new(NormalizationSettings::default());

        let small = DynamicImage::ImageRgb8(RgbImage::new(100, 50));
        let resized = normalizer.resize_for_ocr(&small);
        assert_eq!((resized.width(), resized.height()), (1500, 750));

        let close = DynamicImage::ImageRgb8(RgbImage::new(1000, 10));
        let kept = normalizer.resize_for_ocr(&close);
        assert_eq!((kept.width(), kept.height()), (1000, 10));
    }

    #[test]
    fn test_tag_serializes_snake_case() {
        let json = serde_json::to_string(&CandidateTag::ShinyOptimized).unwrap();
        assert_eq!(json, "\"shiny_optimized\"");
    }
}
