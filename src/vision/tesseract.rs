//! Tesseract CLI backend
//!
//! Each pass writes the candidate to a temporary PNG and runs the
//! `tesseract` executable with TSV output, which carries per-word
//! confidences and layout numbers.

use anyhow::{anyhow, Context, Result};
use image::{GrayImage, ImageFormat};
use std::process::Command;
use tracing::{debug, info};

use super::ocr::{BoundingBox, EngineOutput, OcrEngine, OcrToken, PassConfig};
use crate::error::RecognitionError;

/// TSV row level of a single word
const WORD_LEVEL: u32 = 5;

/// Tesseract invoked as an external process
#[derive(Debug, Clone)]
pub struct TesseractCli {
    command: String,
    languages: String,
}

impl TesseractCli {
    pub fn new(command: impl Into<String>, languages: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            languages: languages.into(),
        }
    }

    /// Version banner; fails when the executable is missing
    pub fn version(&self) -> Result<String> {
        let output = Command::new(&self.command)
            .arg("--version")
            .output()
            .with_context(|| format!("failed to run {} (is it installed?)", self.command))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!("{} --version failed: {}", self.command, stderr.trim()));
        }

        // Older releases print the banner on stderr
        let banner = if output.stdout.is_empty() {
            output.stderr
        } else {
            output.stdout
        };
        let version = String::from_utf8_lossy(&banner)
            .lines()
            .next()
            .unwrap_or_default()
            .trim()
            .to_string();
        info!("OCR engine: {}", version);
        Ok(version)
    }

    fn run_tsv(&self, path: &std::path::Path, pass: &PassConfig) -> Result<String, RecognitionError> {
        let mut command = Command::new(&self.command);
        command
            .arg(path)
            .arg("stdout")
            .arg("--oem")
            .arg("3")
            .arg("--psm")
            .arg(pass.mode.to_string())
            .arg("-l")
            .arg(&self.languages);
        if let Some(whitelist) = &pass.whitelist {
            command.arg("-c").arg(format!("tessedit_char_whitelist={}", whitelist));
        }
        command.arg("tsv");

        let output = command.output().map_err(|source| RecognitionError::Spawn {
            command: self.command.clone(),
            source,
        })?;

        if !output.status.success() {
            return Err(RecognitionError::Engine {
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}

impl OcrEngine for TesseractCli {
    fn recognize(&self, image: &GrayImage, pass: &PassConfig) -> Result<EngineOutput, RecognitionError> {
        let staged = tempfile::Builder::new()
            .prefix("nutriscan-")
            .suffix(".png")
            .tempfile()
            .map_err(|e| RecognitionError::Staging(e.to_string()))?;
        image
            .save_with_format(staged.path(), ImageFormat::Png)
            .map_err(|e| RecognitionError::Staging(e.to_string()))?;

        debug!("tesseract --psm {} on {}x{}", pass.mode, image.width(), image.height());
        let tsv = self.run_tsv(staged.path(), pass)?;
        parse_tsv(&tsv)
    }

    fn name(&self) -> &str {
        "tesseract"
    }
}

/// Parse Tesseract TSV into word tokens and layout-preserving text.
///
/// Words on the same line are joined by spaces, lines by newlines, and a
/// blank line separates paragraphs and blocks.
pub fn parse_tsv(tsv: &str) -> Result<EngineOutput, RecognitionError> {
    let mut tokens = Vec::new();
    let mut text = String::new();
    let mut last_line: Option<(u32, u32, u32, u32)> = None;

    for row in tsv.lines() {
        if row.starts_with("level") || row.trim().is_empty() {
            continue;
        }
        let cols: Vec<&str> = row.split('\t').collect();
        if cols.len() < 11 {
            return Err(RecognitionError::Output(format!(
                "expected 12 TSV columns, got {}",
                cols.len()
            )));
        }

        let number = |i: usize| -> Result<u32, RecognitionError> {
            cols[i]
                .trim()
                .parse()
                .map_err(|_| RecognitionError::Output(format!("bad TSV field {:?}", cols[i])))
        };

        if number(0)? != WORD_LEVEL {
            continue;
        }

        let key = (number(1)?, number(2)?, number(3)?, number(4)?);
        let confidence: f32 = cols[10]
            .trim()
            .parse()
            .map_err(|_| RecognitionError::Output(format!("bad confidence {:?}", cols[10])))?;
        let word = cols.get(11).map(|s| s.trim()).unwrap_or_default();

        if !word.is_empty() {
            match last_line {
                Some(prev) if prev == key => text.push(' '),
                Some(prev) if prev.0 == key.0 && prev.1 == key.1 && prev.2 == key.2 => text.push('\n'),
                Some(_) => text.push_str("\n\n"),
                None => {}
            }
            text.push_str(word);
            last_line = Some(key);
        }

        tokens.push(OcrToken {
            text: word.to_string(),
            confidence: confidence.min(100.0),
            bbox: BoundingBox {
                left: number(6)?,
                top: number(7)?,
                width: number(8)?,
                height: number(9)?,
            },
            block: key.1,
            paragraph: key.2,
        });
    }

    Ok(EngineOutput { text, tokens })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "level\tpage_num\tblock_num\tpar_num\tline_num\tword_num\tleft\ttop\twidth\theight\tconf\ttext
1\t1\t0\t0\t0\t0\t0\t0\t640\t480\t-1\t
2\t1\t1\t0\t0\t0\t20\t20\t300\t60\t-1\t
4\t1\t1\t1\t1\t0\t20\t20\t300\t20\t-1\t
5\t1\t1\t1\t1\t1\t20\t20\t120\t20\t96.5\tServing
5\t1\t1\t1\t1\t2\t150\t20\t60\t20\t91.2\tSize:
5\t1\t1\t1\t1\t3\t220\t20\t40\t20\t88.0\t30g
5\t1\t1\t1\t2\t1\t20\t50\t110\t20\t93.0\tCalories
5\t1\t1\t1\t2\t2\t140\t50\t40\t20\t89.0\t120
5\t1\t2\t1\t1\t1\t20\t120\t160\t20\t-1\t
5\t1\t2\t1\t1\t2\t190\t120\t100\t20\t77.0\tWheat
";

    #[test]
    fn test_parse_tsv_tokens() {
        let output = parse_tsv(SAMPLE).unwrap();

        assert_eq!(output.tokens.len(), 7);
        assert_eq!(output.tokens[0].text, "Serving");
        assert!((output.tokens[0].confidence - 96.5).abs() < 1e-4);
        assert_eq!(output.tokens[3].bbox, BoundingBox { left: 20, top: 50, width: 110, height: 20 });
        assert_eq!(output.tokens[5].confidence, -1.0);
        assert_eq!(output.tokens[6].block, 2);
    }

    #[test]
    fn test_parse_tsv_layout_text() {
        let output = parse_tsv(SAMPLE).unwrap();
        assert_eq!(output.text, "Serving Size: 30g\nCalories 120\n\nWheat");
    }

    #[test]
    fn test_parse_tsv_header_only() {
        let output = parse_tsv("level\tpage_num\tblock_num\tpar_num\tline_num\tword_num\tleft\ttop\twidth\theight\tconf\ttext\n").unwrap();
        assert!(output.text.is_empty());
        assert!(output.tokens.is_empty());
    }

    #[test]
    fn test_parse_tsv_rejects_garbage() {
        assert!(parse_tsv("5\t1\tnot-a-number\t1\t1\t1\t0\t0\t1\t1\t50\tx").is_err());
        assert!(parse_tsv("5\t1\t2").is_err());
    }

    #[test]
    fn test_missing_executable() {
        let engine = TesseractCli::new("nutriscan-no-such-ocr-binary", "eng");
        assert!(engine.version().is_err());

        let result = engine.recognize(&GrayImage::new(4, 4), &PassConfig::mode(6));
        assert!(matches!(result, Err(RecognitionError::Spawn { .. })));
    }
}
