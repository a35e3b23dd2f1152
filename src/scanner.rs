//! Scan orchestration
//!
//! One photo in, one nutrition record out: the barcode path is tried first
//! and OCR is the fallback. Each path runs at most once per scan.

use anyhow::Result;
use image::GrayImage;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::config::AppConfig;
use crate::error::ScanError;
use crate::lookup::{OpenFoodFactsClient, ProductDatabase};
use crate::nutrition::{CanonicalNutritionRecord, ProductMapper, TextExtractor};
use crate::vision::{
    assess_quality, select_best, BarcodeDecoder, DetailedRecognition, Normalizer, OcrEngine,
    QualityReport, RawImage, RecognitionEngine, RxingDecoder, TesseractCli, TextRegion,
};

/// Characters of recognized text echoed back in the response
const RAW_TEXT_PREVIEW_CHARS: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScanState {
    BarcodeAttempt,
    BarcodeFound,
    OcrFallback,
    Done,
}

fn enter(state: ScanState) {
    debug!(?state, "Scan state");
}

/// What a scan produced
#[derive(Debug, Clone, PartialEq)]
pub enum ScanOutcome {
    /// Product resolved through its barcode
    Barcode(CanonicalNutritionRecord),
    /// Fields extracted from recognized label text
    Ocr {
        record: CanonicalNutritionRecord,
        raw_text: String,
    },
    /// No barcode resolved and no text recognized
    NoText,
}

/// Scan outcome together with the advisory quality report
#[derive(Debug, Clone, PartialEq)]
pub struct ScanReport {
    pub quality: QualityReport,
    pub outcome: ScanOutcome,
}

/// Response envelope
#[derive(Debug, Serialize)]
pub struct ScanResponse<'a> {
    pub success: bool,
    pub message: &'static str,
    pub method: &'static str,
    pub quality: &'a QualityReport,
    pub data: Option<&'a CanonicalNutritionRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_text: Option<String>,
}

impl ScanReport {
    pub fn record(&self) -> Option<&CanonicalNutritionRecord> {
        match &self.outcome {
            ScanOutcome::Barcode(record) | ScanOutcome::Ocr { record, .. } => Some(record),
            ScanOutcome::NoText => None,
        }
    }

    pub fn response(&self) -> ScanResponse<'_> {
        let (success, message, method, raw_text) = match &self.outcome {
            ScanOutcome::Barcode(_) => (
                true,
                "Product found via barcode from OpenFoodFacts",
                "barcode",
                None,
            ),
            ScanOutcome::Ocr { raw_text, .. } => (
                true,
                "Image processed successfully via OCR",
                "ocr",
                Some(raw_text.chars().take(RAW_TEXT_PREVIEW_CHARS).collect()),
            ),
            ScanOutcome::NoText => (
                false,
                "No barcode found and no text detected in image",
                "ocr",
                None,
            ),
        };

        ScanResponse {
            success,
            message,
            method,
            quality: &self.quality,
            data: self.record(),
            raw_text,
        }
    }
}

/// Barcode-first, OCR-fallback scanner
pub struct Scanner {
    normalizer: Normalizer,
    recognizer: RecognitionEngine,
    extractor: Arc<TextExtractor>,
    mapper: ProductMapper,
    decoder: Arc<dyn BarcodeDecoder>,
    products: Arc<dyn ProductDatabase>,
    barcode_enabled: bool,
}

impl Scanner {
    pub fn new(
        config: &AppConfig,
        engine: Arc<dyn OcrEngine>,
        decoder: Arc<dyn BarcodeDecoder>,
        products: Arc<dyn ProductDatabase>,
    ) -> Result<Self> {
        Ok(Self {
            normalizer: Normalizer::new(config.normalization.clone()),
            recognizer: RecognitionEngine::new(engine, config.recognition.clone()),
            extractor: Arc::new(TextExtractor::new()?),
            mapper: ProductMapper::new(config.barcode.locale.clone()),
            decoder,
            products,
            barcode_enabled: config.barcode.enabled,
        })
    }

    /// Scanner with the tesseract CLI, rxing and Open Food Facts
    pub fn with_default_backends(config: &AppConfig) -> Result<Self> {
        let engine = TesseractCli::new(
            config.recognition.tesseract_cmd.clone(),
            config.recognition.languages.clone(),
        );
        let products = OpenFoodFactsClient::new(&config.barcode)?;
        Self::new(config, Arc::new(engine), Arc::new(RxingDecoder), Arc::new(products))
    }

    /// Scan an encoded photo
    pub async fn scan(&self, bytes: Vec<u8>) -> Result<ScanReport, ScanError> {
        let span = info_span!("scan", request_id = %Uuid::new_v4());
        self.run(bytes).instrument(span).await
    }

    async fn run(&self, bytes: Vec<u8>) -> Result<ScanReport, ScanError> {
        let raw = decode(bytes).await?;

        let luma = {
            let raw = raw.clone();
            Arc::new(tokio::task::spawn_blocking(move || raw.luma()).await?)
        };
        let quality = {
            let luma = luma.clone();
            tokio::task::spawn_blocking(move || assess_quality(&luma)).await?
        };
        if !quality.suitable {
            warn!("Image quality issues: {}", quality.issues.join("; "));
        }

        if self.barcode_enabled {
            enter(ScanState::BarcodeAttempt);
            if let Some(record) = self.try_barcode(luma).await? {
                enter(ScanState::BarcodeFound);
                enter(ScanState::Done);
                return Ok(ScanReport {
                    quality,
                    outcome: ScanOutcome::Barcode(record),
                });
            }
        }

        enter(ScanState::OcrFallback);
        let text = self.recognize_text(raw).await?;

        let outcome = if text.trim().is_empty() {
            warn!("No barcode found and no text detected");
            ScanOutcome::NoText
        } else {
            let extractor = self.extractor.clone();
            let raw_text = text.clone();
            let record = tokio::task::spawn_blocking(move || extractor.extract(&raw_text)).await?;
            ScanOutcome::Ocr {
                record,
                raw_text: text,
            }
        };

        enter(ScanState::Done);
        Ok(ScanReport { quality, outcome })
    }

    /// Decode the first barcode and resolve it; any miss means `None`
    async fn try_barcode(&self, luma: Arc<GrayImage>) -> Result<Option<CanonicalNutritionRecord>, ScanError> {
        let decoder = self.decoder.clone();
        let Some(code) = tokio::task::spawn_blocking(move || decoder.decode_first(&luma)).await? else {
            info!("No barcode detected in image");
            return Ok(None);
        };

        info!("Barcode detected: {} ({})", code.text, code.format);
        match self.products.lookup(&code.text).await {
            Ok(product) => {
                info!("Product found in {}", self.products.name());
                Ok(Some(self.mapper.map_product(&code.text, &product)))
            }
            Err(e) => {
                warn!("Product lookup failed, falling back to OCR: {}", e);
                Ok(None)
            }
        }
    }

    /// Normalize, recognize and select; empty string when nothing was read
    async fn recognize_text(&self, raw: Arc<RawImage>) -> Result<String, ScanError> {
        let normalizer = self.normalizer.clone();
        let candidates = tokio::task::spawn_blocking(move || normalizer.candidates(&raw)).await?;

        let results = self.recognizer.recognize_all(&candidates).await;
        match select_best(&results) {
            Some(best) => {
                info!(
                    "Best result from {} with {:.2}% confidence ({} words)",
                    best.source_tag, best.avg_confidence, best.word_count
                );
                Ok(best.text.clone())
            }
            None => Ok(String::new()),
        }
    }

    async fn primary_candidate(&self, bytes: Vec<u8>) -> Result<Arc<GrayImage>, ScanError> {
        let raw = decode(bytes).await?;
        let normalizer = self.normalizer.clone();
        let image = tokio::task::spawn_blocking(move || {
            normalizer
                .candidates(&raw)
                .into_iter()
                .next()
                .map(|c| c.image)
                .unwrap_or_else(|| Arc::new(raw.luma()))
        })
        .await?;
        Ok(image)
    }

    /// Confident text regions of the primary candidate
    pub async fn regions(&self, bytes: Vec<u8>) -> Result<Vec<TextRegion>, ScanError> {
        let image = self.primary_candidate(bytes).await?;
        let recognizer = self.recognizer.clone();
        Ok(tokio::task::spawn_blocking(move || recognizer.regions(&image)).await??)
    }

    /// Word-level reading of the primary candidate
    pub async fn words(&self, bytes: Vec<u8>) -> Result<DetailedRecognition, ScanError> {
        let image = self.primary_candidate(bytes).await?;
        let recognizer = self.recognizer.clone();
        Ok(tokio::task::spawn_blocking(move || recognizer.detailed(&image)).await??)
    }
}

async fn decode(bytes: Vec<u8>) -> Result<Arc<RawImage>, ScanError> {
    let raw = tokio::task::spawn_blocking(move || RawImage::decode(&bytes)).await??;
    info!(
        "Decoded {}x{} image with {} channels",
        raw.width(),
        raw.height(),
        raw.channels()
    );
    Ok(Arc::new(raw))
}
