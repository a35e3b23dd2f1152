//! Nutrition records
//!
//! The canonical record shape shared by the barcode and OCR paths, plus the
//! extractors that produce it.

pub mod patterns;
pub mod product;
pub mod text;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub use product::ProductMapper;
pub use text::TextExtractor;

/// Where a record came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    Barcode,
    Ocr,
}

/// Energy unit; only kilocalories are reported
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnergyUnit {
    #[default]
    Kcal,
}

/// Mass unit of a nutrient amount
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MassUnit {
    G,
    Mg,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Calories {
    /// Per 100 g (barcode) or as printed (OCR)
    pub value: Option<i64>,
    /// Per serving; barcode path only
    pub value_per_serving: Option<i64>,
    pub unit: EnergyUnit,
    pub found: bool,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ServingSize {
    pub value: Option<String>,
    pub found: bool,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Ingredients {
    pub list: Vec<String>,
    /// Ingredient text before splitting
    pub raw: Option<String>,
    pub found: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NutrientValue {
    pub value: f64,
    pub unit: MassUnit,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Allergens {
    pub list: Vec<String>,
    pub found: bool,
}

/// Unified nutrition data, identical in shape for both sources.
///
/// Barcode-only fields serialize as `null` (or `[]`) on OCR records so the
/// key set never depends on the source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalNutritionRecord {
    pub source: Source,
    pub calories: Calories,
    pub serving_size: ServingSize,
    pub ingredients: Ingredients,
    pub nutrition_facts: BTreeMap<String, NutrientValue>,
    pub allergens: Allergens,
    pub barcode: Option<String>,
    pub product_name: Option<String>,
    pub brands: Option<String>,
    pub categories: Option<String>,
    pub image_url: Option<String>,
    pub nova_group: Option<i64>,
    pub nutriscore_grade: Option<String>,
    pub labels: Vec<String>,
}

impl CanonicalNutritionRecord {
    /// Record with every field present and nothing found
    pub fn empty(source: Source) -> Self {
        Self {
            source,
            calories: Calories::default(),
            serving_size: ServingSize::default(),
            ingredients: Ingredients::default(),
            nutrition_facts: BTreeMap::new(),
            allergens: Allergens::default(),
            barcode: None,
            product_name: None,
            brands: None,
            categories: None,
            image_url: None,
            nova_group: None,
            nutriscore_grade: None,
            labels: Vec::new(),
        }
    }
}

/// Split an ingredient statement on commas and semicolons
pub(crate) fn split_ingredients(raw: &str) -> Vec<String> {
    raw.split([',', ';'])
        .map(|item| item.trim().trim_end_matches('.').trim())
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    fn keys(record: &CanonicalNutritionRecord) -> Vec<String> {
        match serde_json::to_value(record).unwrap() {
            Value::Object(map) => map.keys().cloned().collect(),
            other => panic!("expected object, got {}", other),
        }
    }

    #[test]
    fn test_key_set_independent_of_source() {
        let ocr = CanonicalNutritionRecord::empty(Source::Ocr);
        let mut barcode = CanonicalNutritionRecord::empty(Source::Barcode);
        barcode.barcode = Some("8690504000000".to_string());
        barcode.labels = vec!["en:organic".to_string()];

        assert_eq!(keys(&ocr), keys(&barcode));
        assert_eq!(keys(&ocr).len(), 14);
    }

    #[test]
    fn test_empty_record_serialization() {
        let json = serde_json::to_value(CanonicalNutritionRecord::empty(Source::Ocr)).unwrap();

        assert_eq!(json["source"], "ocr");
        assert_eq!(json["calories"]["unit"], "kcal");
        assert_eq!(json["calories"]["value"], Value::Null);
        assert_eq!(json["calories"]["found"], false);
        assert_eq!(json["barcode"], Value::Null);
        assert_eq!(json["labels"], serde_json::json!([]));
    }

    #[test]
    fn test_mass_unit_lowercase() {
        let value = NutrientValue {
            value: 400.0,
            unit: MassUnit::Mg,
        };
        assert_eq!(serde_json::to_string(&value).unwrap(), r#"{"value":400.0,"unit":"mg"}"#);
    }

    #[test]
    fn test_split_is_separator_order_independent() {
        let expected = vec!["sugar", "salt", "water"];
        assert_eq!(split_ingredients("sugar, salt; water"), expected);
        assert_eq!(split_ingredients("sugar; salt, water"), expected);
    }

    #[test]
    fn test_split_drops_empty_items() {
        assert_eq!(split_ingredients(" Wheat ,, Sugar; ;Salt."), vec!["Wheat", "Sugar", "Salt"]);
        assert!(split_ingredients(" , ; ").is_empty());
    }
}
