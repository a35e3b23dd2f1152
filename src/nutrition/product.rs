//! Product database records to canonical nutrition records

use serde_json::{Map, Value};
use std::collections::BTreeMap;

use super::{
    split_ingredients, Allergens, Calories, CanonicalNutritionRecord, Ingredients, MassUnit,
    NutrientValue, ServingSize, Source,
};

/// Canonical nutrient name, unit, and the product keys tried in order
const NUTRIENT_KEYS: &[(&str, MassUnit, &[&str])] = &[
    ("protein", MassUnit::G, &["proteins_100g", "proteins"]),
    ("fat", MassUnit::G, &["fat_100g", "fat"]),
    ("saturated_fat", MassUnit::G, &["saturated-fat_100g", "saturated-fat"]),
    ("carbohydrates", MassUnit::G, &["carbohydrates_100g", "carbohydrates"]),
    ("sugar", MassUnit::G, &["sugars_100g", "sugars"]),
    ("fiber", MassUnit::G, &["fiber_100g", "fiber"]),
    ("sodium", MassUnit::Mg, &["sodium_100g", "sodium"]),
    ("salt", MassUnit::Mg, &["salt_100g", "salt"]),
];

/// Maps product JSON into the canonical record
#[derive(Debug, Clone)]
pub struct ProductMapper {
    locale: String,
}

impl ProductMapper {
    /// `locale` is the suffix of localized fields, e.g. `tr` for `product_name_tr`
    pub fn new(locale: impl Into<String>) -> Self {
        Self {
            locale: locale.into(),
        }
    }

    /// Map a product object; `barcode` is used when the product has no code
    pub fn map_product(&self, barcode: &str, product: &Map<String, Value>) -> CanonicalNutritionRecord {
        let empty = Map::new();
        let nutriments = product
            .get("nutriments")
            .and_then(Value::as_object)
            .unwrap_or(&empty);

        let localized_name = format!("product_name_{}", self.locale);
        let localized_ingredients = format!("ingredients_text_{}", self.locale);

        let calories_value = first_number(nutriments, &["energy-kcal_100g", "energy-kcal"]);
        let calories = Calories {
            value: calories_value.map(|v| v.round() as i64),
            value_per_serving: first_number(nutriments, &["energy-kcal_serving"]).map(|v| v.round() as i64),
            found: calories_value.is_some(),
            ..Calories::default()
        };

        let serving = first_text(product, &["serving_size", "serving_quantity"]);
        let serving_size = ServingSize {
            found: serving.is_some(),
            value: serving,
        };

        let ingredients_raw = first_text(product, &[localized_ingredients.as_str(), "ingredients_text"]);
        let ingredients = Ingredients {
            list: ingredients_raw.as_deref().map(split_ingredients).unwrap_or_default(),
            found: ingredients_raw.is_some(),
            raw: ingredients_raw,
        };

        let allergen_list: Vec<String> = string_list(product, "allergens_tags")
            .iter()
            .map(|tag| normalize_tag(tag))
            .filter(|tag| !tag.is_empty())
            .collect();
        let allergens = Allergens {
            found: !allergen_list.is_empty(),
            list: allergen_list,
        };

        CanonicalNutritionRecord {
            source: Source::Barcode,
            calories,
            serving_size,
            ingredients,
            nutrition_facts: nutrition_facts(nutriments),
            allergens,
            barcode: first_text(product, &["code"]).or_else(|| Some(barcode.to_string())),
            product_name: first_text(product, &["product_name", localized_name.as_str()]),
            brands: first_text(product, &["brands"]),
            categories: first_text(product, &["categories"]),
            image_url: first_text(product, &["image_url"]),
            nova_group: first_number(product, &["nova_group"]).map(|v| v.round() as i64),
            nutriscore_grade: first_text(product, &["nutriscore_grade"]),
            labels: string_list(product, "labels_tags"),
        }
    }
}

fn nutrition_facts(nutriments: &Map<String, Value>) -> BTreeMap<String, NutrientValue> {
    let mut facts = BTreeMap::new();
    for (name, unit, keys) in NUTRIENT_KEYS {
        if let Some(value) = first_number(nutriments, keys) {
            let value = match unit {
                // Stored in grams
                MassUnit::Mg => round3(value * 1000.0),
                MassUnit::G => value,
            };
            facts.insert(name.to_string(), NutrientValue { value, unit: *unit });
        }
    }
    facts
}

/// Strip the language prefix from a taxonomy tag: `en:tree-nuts` -> `tree nuts`
fn normalize_tag(tag: &str) -> String {
    let name = tag.split_once(':').map_or(tag, |(_, name)| name);
    name.replace('-', " ").trim().to_string()
}

/// First key holding a number or a numeric string
fn first_number(object: &Map<String, Value>, keys: &[&str]) -> Option<f64> {
    keys.iter().find_map(|key| match object.get(*key)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    })
}

/// First key holding a non-empty string or a number
fn first_text(object: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| match object.get(*key)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

fn string_list(object: &Map<String, Value>, key: &str) -> Vec<String> {
    object
        .get(key)
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}
