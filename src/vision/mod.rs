//! Vision/OCR Layer
//!
//! Turns an uploaded photo into text. The raster is decoded once, assessed
//! for quality, scanned for a barcode, normalized into a set of candidate
//! images and finally recognized under several segmentation modes.

pub mod barcode;
pub mod deskew;
pub mod filters;
pub mod ocr;
pub mod ocr_preprocess;
pub mod quality;
pub mod tesseract;

use image::{DynamicImage, GrayImage};

use crate::error::ScanError;

pub use barcode::{BarcodeDecoder, DecodedBarcode, RxingDecoder};
pub use ocr::{
    select_best, DetailedRecognition, OcrEngine, RecognitionEngine, RecognitionResult,
    TextRegion,
};
pub use ocr_preprocess::{CandidateImage, CandidateTag, Normalizer};
pub use quality::{assess_quality, QualityReport};
pub use tesseract::TesseractCli;

/// A decoded photo, read-only for the rest of the pipeline
#[derive(Debug, Clone)]
pub struct RawImage {
    image: DynamicImage,
}

impl RawImage {
    /// Decode an encoded image buffer (PNG, JPEG, ...)
    pub fn decode(bytes: &[u8]) -> Result<Self, ScanError> {
        let image = image::load_from_memory(bytes)?;
        Ok(Self { image })
    }

    #[cfg(test)]
    pub fn from_dynamic(image: DynamicImage) -> Self {
        Self { image }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// Number of color channels in the decoded raster
    pub fn channels(&self) -> u8 {
        self.image.color().channel_count()
    }

    /// Get the underlying image
    pub fn image(&self) -> &DynamicImage {
        &self.image
    }

    /// Single-channel luminance plane
    pub fn luma(&self) -> GrayImage {
        filters::grayscale(&self.image)
    }
}
