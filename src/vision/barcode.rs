//! Barcode decoding
//!
//! The scanner only needs the first barcode found in a photo; failures to
//! decode are not errors, they just send the request down the OCR path.

use image::GrayImage;
use tracing::debug;

/// A barcode read from the photo
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedBarcode {
    /// Decoded payload, e.g. the EAN-13 digits
    pub text: String,
    /// Symbology name as reported by the decoder
    pub format: String,
}

/// Anything that can find a barcode in a luminance plane
pub trait BarcodeDecoder: Send + Sync {
    /// First barcode in the image, if any
    fn decode_first(&self, gray: &GrayImage) -> Option<DecodedBarcode>;
}

/// Multi-format decoder backed by rxing
#[derive(Debug, Default, Clone, Copy)]
pub struct RxingDecoder;

impl BarcodeDecoder for RxingDecoder {
    fn decode_first(&self, gray: &GrayImage) -> Option<DecodedBarcode> {
        let (width, height) = gray.dimensions();
        if width == 0 || height == 0 {
            return None;
        }

        match rxing::helpers::detect_in_luma(gray.as_raw().clone(), width, height, None) {
            Ok(result) => {
                let text = result.getText().trim().to_string();
                if text.is_empty() {
                    return None;
                }
                let format = format!("{:?}", result.getBarcodeFormat());
                debug!("Decoded {} barcode {}", format, text);
                Some(DecodedBarcode { text, format })
            }
            Err(e) => {
                debug!("No barcode in image: {}", e);
                None
            }
        }
    }
}
