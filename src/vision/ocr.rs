//! OCR (Optical Character Recognition) module
//!
//! Runs every candidate image through the OCR engine under several page
//! segmentation modes and keeps the most confident reading.

use image::GrayImage;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use super::ocr_preprocess::CandidateImage;
use crate::config::RecognitionSettings;
use crate::error::RecognitionError;

/// Mode used by the whitelist and detailed passes (single uniform block)
pub const SINGLE_BLOCK_MODE: u8 = 6;
/// Mode used by the region pass (sparse text)
pub const SPARSE_TEXT_MODE: u8 = 11;

/// Axis-aligned box in candidate image pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BoundingBox {
    pub left: u32,
    pub top: u32,
    pub width: u32,
    pub height: u32,
}

impl BoundingBox {
    pub fn right(&self) -> u32 {
        self.left + self.width
    }

    pub fn bottom(&self) -> u32 {
        self.top + self.height
    }

    /// Smallest box containing both
    pub fn union(&self, other: &BoundingBox) -> BoundingBox {
        let left = self.left.min(other.left);
        let top = self.top.min(other.top);
        BoundingBox {
            left,
            top,
            width: self.right().max(other.right()) - left,
            height: self.bottom().max(other.bottom()) - top,
        }
    }
}

/// A single recognized word
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OcrToken {
    pub text: String,
    /// Engine certainty 0..=100; non-positive means "no opinion"
    pub confidence: f32,
    pub bbox: BoundingBox,
    #[serde(skip)]
    pub block: u32,
    #[serde(skip)]
    pub paragraph: u32,
}

/// Raw output of one engine invocation
#[derive(Debug, Clone, Default)]
pub struct EngineOutput {
    /// Text with line breaks as laid out by the engine
    pub text: String,
    pub tokens: Vec<OcrToken>,
}

/// Engine configuration for one pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PassConfig {
    /// Page segmentation mode
    pub mode: u8,
    /// Restrict output to these characters
    pub whitelist: Option<String>,
}

impl PassConfig {
    pub fn mode(mode: u8) -> Self {
        Self {
            mode,
            whitelist: None,
        }
    }
}

/// OCR backend seam
pub trait OcrEngine: Send + Sync {
    /// Recognize a grayscale image with the given pass configuration
    fn recognize(&self, image: &GrayImage, pass: &PassConfig)
        -> Result<EngineOutput, RecognitionError>;

    /// Short backend name for logs
    fn name(&self) -> &str;
}

/// Outcome of one (candidate, mode) pass
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecognitionResult {
    pub text: String,
    /// Mean of the strictly positive token confidences, 0..=100
    pub avg_confidence: f32,
    /// Tokens with non-blank text
    pub word_count: usize,
    /// `{candidate}_psm{mode}`
    pub source_tag: String,
}

impl RecognitionResult {
    fn from_output(output: EngineOutput, source_tag: String) -> Option<Self> {
        if output.text.trim().is_empty() {
            return None;
        }
        Some(Self {
            avg_confidence: average_confidence(&output.tokens),
            word_count: output
                .tokens
                .iter()
                .filter(|t| !t.text.trim().is_empty())
                .count(),
            text: output.text,
            source_tag,
        })
    }
}

/// A block of nearby confident tokens
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TextRegion {
    pub text: String,
    pub bbox: BoundingBox,
}

/// Word-level reading of one image
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DetailedRecognition {
    pub words: Vec<OcrToken>,
    pub total_words: usize,
    /// Rounded to two decimals
    pub average_confidence: f32,
    pub full_text: String,
}

/// Mean of strictly positive confidences; 0 when there are none
pub fn average_confidence(tokens: &[OcrToken]) -> f32 {
    let positive: Vec<f32> = tokens
        .iter()
        .map(|t| t.confidence)
        .filter(|&c| c > 0.0)
        .collect();
    if positive.is_empty() {
        return 0.0;
    }
    (positive.iter().sum::<f32>() / positive.len() as f32).clamp(0.0, 100.0)
}

/// Highest average confidence wins; ties keep the earliest result
pub fn select_best(results: &[RecognitionResult]) -> Option<&RecognitionResult> {
    results.iter().fold(None, |best: Option<&RecognitionResult>, r| match best {
        Some(b) if b.avg_confidence >= r.avg_confidence => Some(b),
        _ => Some(r),
    })
}

/// Group confident tokens into regions.
///
/// A region ends when the next token belongs to another engine block or
/// paragraph, or starts more than `gap_factor` token heights below it.
pub fn group_regions(tokens: &[OcrToken], min_confidence: f32, gap_factor: f32) -> Vec<TextRegion> {
    let mut regions = Vec::new();
    let mut current: Option<(TextRegion, &OcrToken)> = None;

    for token in tokens {
        let word = token.text.trim();
        if token.confidence <= min_confidence || word.is_empty() {
            continue;
        }

        current = match current.take() {
            Some((mut region, previous)) => {
                let same_paragraph =
                    previous.block == token.block && previous.paragraph == token.paragraph;
                let gap_limit = region.bbox.bottom() as f32 + gap_factor * previous.bbox.height as f32;
                if same_paragraph && (token.bbox.top as f32) <= gap_limit {
                    region.text.push(' ');
                    region.text.push_str(word);
                    region.bbox = region.bbox.union(&token.bbox);
                    Some((region, token))
                } else {
                    regions.push(region);
                    Some((TextRegion { text: word.to_string(), bbox: token.bbox }, token))
                }
            }
            None => Some((TextRegion { text: word.to_string(), bbox: token.bbox }, token)),
        };
    }

    if let Some((region, _)) = current {
        regions.push(region);
    }
    regions
}

struct PassJob {
    image: Arc<GrayImage>,
    pass: PassConfig,
    source_tag: String,
}

/// Multi-pass recognition over candidate images
#[derive(Clone)]
pub struct RecognitionEngine {
    engine: Arc<dyn OcrEngine>,
    settings: RecognitionSettings,
}

impl RecognitionEngine {
    pub fn new(engine: Arc<dyn OcrEngine>, settings: RecognitionSettings) -> Self {
        Self { engine, settings }
    }

    fn whitelist_config(&self) -> PassConfig {
        PassConfig {
            mode: SINGLE_BLOCK_MODE,
            whitelist: Some(self.settings.whitelist_chars.clone()),
        }
    }

    /// Sparse-text pass grouped into confident regions
    pub fn regions(&self, image: &GrayImage) -> Result<Vec<TextRegion>, RecognitionError> {
        let output = self.engine.recognize(image, &PassConfig::mode(SPARSE_TEXT_MODE))?;
        Ok(group_regions(
            &output.tokens,
            self.settings.region_min_confidence,
            self.settings.region_gap_factor,
        ))
    }

    /// Word-level tokens with confidences and boxes
    pub fn detailed(&self, image: &GrayImage) -> Result<DetailedRecognition, RecognitionError> {
        let output = self.engine.recognize(image, &PassConfig::mode(SINGLE_BLOCK_MODE))?;
        let words: Vec<OcrToken> = output
            .tokens
            .into_iter()
            .filter(|t| !t.text.trim().is_empty())
            .collect();
        let average = average_confidence(&words);

        Ok(DetailedRecognition {
            total_words: words.len(),
            average_confidence: (average * 100.0).round() / 100.0,
            full_text: output.text.trim().to_string(),
            words,
        })
    }

    fn plan(&self, candidates: &[CandidateImage]) -> Vec<PassJob> {
        let mut jobs = Vec::new();
        for candidate in candidates {
            for &mode in &self.settings.segmentation_modes {
                jobs.push(PassJob {
                    image: candidate.image.clone(),
                    pass: PassConfig::mode(mode),
                    source_tag: format!("{}_psm{}", candidate.tag, mode),
                });
            }
        }

        if self.settings.whitelist_pass {
            if let Some(primary) = candidates.first() {
                let pass = self.whitelist_config();
                jobs.push(PassJob {
                    image: primary.image.clone(),
                    source_tag: format!("whitelist_psm{}", pass.mode),
                    pass,
                });
            }
        }
        jobs
    }

    /// Run every (candidate, mode) pass, at most `max_parallel_passes` at a
    /// time, within the overall pass budget.
    ///
    /// Results come back in generation order regardless of completion
    /// order. Failed passes and passes still running when the budget runs
    /// out are dropped. An abandoned pass stops being awaited, but its
    /// blocking engine call runs until the engine returns.
    pub async fn recognize_all(&self, candidates: &[CandidateImage]) -> Vec<RecognitionResult> {
        let jobs = self.plan(candidates);
        let total = jobs.len();
        info!(
            "Running {} OCR passes with {} (max {} in parallel)",
            total,
            self.engine.name(),
            self.settings.max_parallel_passes
        );

        let permits = Arc::new(Semaphore::new(self.settings.max_parallel_passes.max(1)));
        let mut set = JoinSet::new();

        for (index, job) in jobs.into_iter().enumerate() {
            let engine = self.engine.clone();
            let permits = permits.clone();
            set.spawn(async move {
                let _permit = permits.acquire_owned().await.ok();
                let tag = job.source_tag.clone();
                let outcome = tokio::task::spawn_blocking(move || {
                    engine
                        .recognize(&job.image, &job.pass)
                        .map(|output| RecognitionResult::from_output(output, job.source_tag))
                })
                .await;

                let result = match outcome {
                    Ok(Ok(result)) => result,
                    Ok(Err(e)) => {
                        warn!("OCR pass {} failed: {}", tag, e);
                        None
                    }
                    Err(e) => {
                        warn!("OCR pass {} aborted: {}", tag, e);
                        None
                    }
                };
                (index, result)
            });
        }

        let mut slots: Vec<Option<RecognitionResult>> = vec![None; total];
        let deadline = tokio::time::Instant::now() + Duration::from_secs(self.settings.pass_budget_secs);

        loop {
            let next = tokio::time::timeout_at(deadline, set.join_next()).await;
            match next {
                Ok(Some(Ok((index, result)))) => slots[index] = result,
                Ok(Some(Err(e))) => warn!("OCR pass task failed: {}", e),
                Ok(None) => break,
                Err(_) => {
                    warn!(
                        "OCR pass budget of {}s exhausted, {} passes abandoned",
                        self.settings.pass_budget_secs,
                        set.len()
                    );
                    set.abort_all();
                    break;
                }
            }
        }

        let results: Vec<RecognitionResult> = slots.into_iter().flatten().collect();
        debug!("{} of {} passes produced text", results.len(), total);
        results
    }
}
