//! Open Food Facts product API client
//!
//! `GET {api_base_url}/{barcode}` returns `{"status": 1, "product": {...}}`
//! for known products.

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info};

use super::{ProductDatabase, ProductRecord};
use crate::config::BarcodeSettings;
use crate::error::LookupError;

const USER_AGENT: &str = concat!("NutriScan/", env!("CARGO_PKG_VERSION"), " (nutrition label scanner)");

/// HTTP client for the Open Food Facts product endpoint
pub struct OpenFoodFactsClient {
    client: Client,
    base_url: String,
    timeout_secs: u64,
    max_body_bytes: usize,
}

impl OpenFoodFactsClient {
    pub fn new(settings: &BarcodeSettings) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .user_agent(USER_AGENT)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url: settings.api_base_url.trim_end_matches('/').to_string(),
            timeout_secs: settings.timeout_secs,
            max_body_bytes: settings.max_body_bytes,
        })
    }

    /// Product URL for a barcode
    pub fn product_url(&self, barcode: &str) -> String {
        format!("{}/{}", self.base_url, barcode)
    }

    fn transport_error(&self, e: reqwest::Error) -> LookupError {
        if e.is_timeout() {
            LookupError::Timeout {
                timeout_secs: self.timeout_secs,
            }
        } else {
            LookupError::Transport(e.to_string())
        }
    }

    fn too_large(&self) -> LookupError {
        LookupError::Malformed(format!("response larger than {} bytes", self.max_body_bytes))
    }
}

#[async_trait]
impl ProductDatabase for OpenFoodFactsClient {
    async fn lookup(&self, barcode: &str) -> Result<ProductRecord, LookupError> {
        // Only plain product codes go into the URL path
        if barcode.is_empty() || !barcode.chars().all(|c| c.is_ascii_alphanumeric()) {
            debug!("Not a product code: {:?}", barcode);
            return Err(LookupError::NotFound {
                barcode: barcode.to_string(),
            });
        }

        let url = self.product_url(barcode);
        info!("Fetching product from OpenFoodFacts: {}", url);

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        if !response.status().is_success() {
            return Err(LookupError::Status {
                status: response.status().as_u16(),
            });
        }

        if let Some(length) = response.content_length() {
            if length > self.max_body_bytes as u64 {
                return Err(self.too_large());
            }
        }

        let mut body = Vec::new();
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| self.transport_error(e))?;
            if body.len() + chunk.len() > self.max_body_bytes {
                return Err(self.too_large());
            }
            body.extend_from_slice(&chunk);
        }

        let json: Value = serde_json::from_slice(&body)
            .map_err(|e| LookupError::Malformed(format!("invalid JSON: {}", e)))?;
        interpret_response(barcode, json)
    }

    fn name(&self) -> &'static str {
        "openfoodfacts"
    }
}

/// Extract the product object from a response body
pub fn interpret_response(barcode: &str, body: Value) -> Result<ProductRecord, LookupError> {
    let Value::Object(mut root) = body else {
        return Err(LookupError::Malformed("expected a JSON object".to_string()));
    };

    let status = root
        .get("status")
        .ok_or_else(|| LookupError::Malformed("missing status".to_string()))?;
    let found = match status {
        Value::Number(n) => n.as_i64() == Some(1),
        Value::String(s) => s.trim() == "1",
        _ => false,
    };

    match root.remove("product") {
        Some(Value::Object(product)) if found && !product.is_empty() => Ok(product),
        _ => Err(LookupError::NotFound {
            barcode: barcode.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serve one canned HTTP response on a local port and return the base URL
    async fn serve_once(response: String, delay: Duration) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 2048];
            let _ = socket.read(&mut buf).await;
            tokio::time::sleep(delay).await;
            let _ = socket.write_all(response.as_bytes()).await;
            let _ = socket.shutdown().await;
        });

        format!("http://{}/api/v2/product", addr)
    }

    fn http_response(status: &str, body: &str) -> String {
        format!(
            "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            status,
            body.len(),
            body
        )
    }

    fn client(base_url: &str, timeout_secs: u64, max_body_bytes: usize) -> OpenFoodFactsClient {
        OpenFoodFactsClient::new(&BarcodeSettings {
            api_base_url: base_url.to_string(),
            timeout_secs,
            max_body_bytes,
            ..BarcodeSettings::default()
        })
        .unwrap()
    }

    #[test]
    fn test_interpret_found() {
        let product = interpret_response(
            "123",
            json!({"status": 1, "product": {"code": "123", "product_name": "Ayran"}}),
        )
        .unwrap();
        assert_eq!(product["product_name"], "Ayran");
    }

    #[test]
    fn test_interpret_not_found() {
        let result = interpret_response("123", json!({"status": 0, "status_verbose": "product not found"}));
        assert!(matches!(result, Err(LookupError::NotFound { .. })));

        let result = interpret_response("123", json!({"status": 1, "product": {}}));
        assert!(matches!(result, Err(LookupError::NotFound { .. })));
    }

    #[test]
    fn test_interpret_shape_drift() {
        assert!(matches!(interpret_response("1", json!([1, 2])), Err(LookupError::Malformed(_))));
        assert!(matches!(interpret_response("1", json!({"product": {}})), Err(LookupError::Malformed(_))));
        assert!(matches!(
            interpret_response("1", json!({"status": 1, "product": "oops"})),
            Err(LookupError::NotFound { .. })
        ));
    }

    #[test]
    fn test_product_url_trims_slash() {
        let client = client("https://tr.openfoodfacts.org/api/v2/product/", 5, 1024);
        assert_eq!(
            client.product_url("8690504000013"),
            "https://tr.openfoodfacts.org/api/v2/product/8690504000013"
        );
    }

    #[tokio::test]
    async fn test_rejects_non_product_codes() {
        let client = client("http://127.0.0.1:9/api", 1, 1024);
        let result = client.lookup("../admin?x=1").await;
        assert!(matches!(result, Err(LookupError::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_lookup_success() {
        let body = r#"{"status":1,"product":{"code":"8690504000013","product_name":"Bisküvi"}}"#;
        let base = serve_once(http_response("200 OK", body), Duration::ZERO).await;

        let product = client(&base, 5, 4096).lookup("8690504000013").await.unwrap();
        assert_eq!(product["product_name"], "Bisküvi");
    }

    #[tokio::test]
    async fn test_lookup_http_error_status() {
        let base = serve_once(http_response("503 Service Unavailable", "{}"), Duration::ZERO).await;

        let result = client(&base, 5, 4096).lookup("123").await;
        assert!(matches!(result, Err(LookupError::Status { status: 503 })));
    }

    #[tokio::test]
    async fn test_lookup_body_too_large() {
        let body = format!(r#"{{"status":1,"product":{{"padding":"{}"}}}}"#, "x".repeat(600));
        let base = serve_once(http_response("200 OK", &body), Duration::ZERO).await;

        let result = client(&base, 5, 256).lookup("123").await;
        assert!(matches!(result, Err(LookupError::Malformed(_))));
    }

    #[tokio::test]
    async fn test_lookup_invalid_json() {
        let base = serve_once(http_response("200 OK", "<html>"), Duration::ZERO).await;

        let result = client(&base, 5, 4096).lookup("123").await;
        assert!(matches!(result, Err(LookupError::Malformed(_))));
    }

    #[tokio::test]
    async fn test_lookup_timeout() {
        let base = serve_once(http_response("200 OK", "{}"), Duration::from_secs(5)).await;

        let result = client(&base, 1, 4096).lookup("123").await;
        assert!(matches!(result, Err(LookupError::Timeout { timeout_secs: 1 })));
    }
}
