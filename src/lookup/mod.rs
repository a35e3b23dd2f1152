//! Product database lookups
//!
//! A decoded barcode is resolved to a product record through a
//! [`ProductDatabase`]. Every failure is reported as a [`LookupError`]; the
//! scanner treats all of them as "not found".

pub mod openfoodfacts;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::error::LookupError;

pub use openfoodfacts::OpenFoodFactsClient;

/// Raw product object as returned by the database
pub type ProductRecord = Map<String, Value>;

/// Trait for product databases keyed by barcode
#[async_trait]
pub trait ProductDatabase: Send + Sync {
    /// Fetch the product for a barcode
    ///
    /// # Returns
    /// The product object, or an error when there is no usable product
    async fn lookup(&self, barcode: &str) -> Result<ProductRecord, LookupError>;

    /// Database name for logging
    fn name(&self) -> &'static str;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct MockDatabase;

    #[async_trait]
    impl ProductDatabase for MockDatabase {
        async fn lookup(&self, barcode: &str) -> Result<ProductRecord, LookupError> {
            if barcode == "42" {
                match json!({"code": "42", "product_name": "Answer"}) {
                    Value::Object(map) => Ok(map),
                    _ => unreachable!(),
                }
            } else {
                Err(LookupError::NotFound {
                    barcode: barcode.to_string(),
                })
            }
        }

        fn name(&self) -> &'static str {
            "mock"
        }
    }

    #[tokio::test]
    async fn test_trait_object_lookup() {
        let db: Box<dyn ProductDatabase> = Box::new(MockDatabase);

        let product = db.lookup("42").await.unwrap();
        assert_eq!(product["product_name"], "Answer");
        assert!(matches!(db.lookup("7").await, Err(LookupError::NotFound { .. })));
        assert_eq!(db.name(), "mock");
    }
}
