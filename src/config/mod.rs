//! Application Configuration
//!
//! Pipeline settings stored in TOML format. Loaded once at startup and
//! handed to every component as read-only configuration.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Application settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Image normalization settings
    pub normalization: NormalizationSettings,
    /// OCR engine and multi-pass settings
    pub recognition: RecognitionSettings,
    /// Barcode decoding and product lookup settings
    pub barcode: BarcodeSettings,
}

/// Which set of candidate images the normalization pipeline produces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CandidatePreset {
    /// shiny_optimized, standard, high_contrast, inverted, otsu, adaptive_mean
    #[default]
    Full,
    /// standard, simple_threshold, inverted
    Basic,
}

/// Normalization-related settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NormalizationSettings {
    /// Width the raster is resized to when it is far off (outside 0.5x..2x)
    pub target_width: u32,
    /// Candidate set to generate
    pub preset: CandidatePreset,
}

impl Default for NormalizationSettings {
    fn default() -> Self {
        Self {
            target_width: 1500,
            preset: CandidatePreset::Full,
        }
    }
}

/// Recognition-related settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecognitionSettings {
    /// Path or name of the tesseract executable
    pub tesseract_cmd: String,
    /// Language set passed to the engine (e.g. "eng" or "tur+eng")
    pub languages: String,
    /// Page segmentation modes tried for every candidate, in order
    pub segmentation_modes: Vec<u8>,
    /// Also run the character-whitelist pass and let it compete in selection
    pub whitelist_pass: bool,
    /// Characters allowed during the whitelist pass
    pub whitelist_chars: String,
    /// Tokens at or below this confidence are dropped by the region pass
    pub region_min_confidence: f32,
    /// Vertical gap (in token heights) that starts a new region
    pub region_gap_factor: f32,
    /// Maximum number of recognition passes running at once
    pub max_parallel_passes: usize,
    /// Overall time budget for all passes of one scan, in seconds
    pub pass_budget_secs: u64,
}

impl Default for RecognitionSettings {
    fn default() -> Self {
        Self {
            tesseract_cmd: "tesseract".to_string(),
            languages: "eng".to_string(),
            segmentation_modes: vec![6, 3, 4, 11, 12],
            whitelist_pass: false,
            whitelist_chars:
                "0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz.,%()- ".to_string(),
            region_min_confidence: 30.0,
            region_gap_factor: 1.5,
            max_parallel_passes: 4,
            pass_budget_secs: 120,
        }
    }
}

/// Barcode-related settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BarcodeSettings {
    /// Try the barcode path before OCR
    pub enabled: bool,
    /// Product endpoint; the barcode is appended as the last path segment
    pub api_base_url: String,
    /// Lookup timeout in seconds
    pub timeout_secs: u64,
    /// Suffix of localized product fields (`product_name_<locale>`)
    pub locale: String,
    /// Responses larger than this are treated as malformed
    pub max_body_bytes: usize,
}

impl Default for BarcodeSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            api_base_url: "https://tr.openfoodfacts.org/api/v2/product".to_string(),
            timeout_secs: 5,
            locale: "tr".to_string(),
            max_body_bytes: 2 * 1024 * 1024,
        }
    }
}

/// Get the configuration directory
pub fn get_config_dir() -> Result<PathBuf> {
    let proj_dirs = directories::ProjectDirs::from("com", "nutriscan", "NutriScan")
        .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;

    Ok(proj_dirs.config_dir().to_path_buf())
}

/// Load configuration from file
pub fn load_config(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {:?}", path))?;
    let config: AppConfig = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file {:?}", path))?;
    Ok(config)
}

/// Save configuration to file
pub fn save_config(config: &AppConfig, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content)?;
    Ok(())
}
