//! Nutrition fields from OCR text
//!
//! OCR output is cleaned into a single line first, so "rest of line"
//! captures end at the next recognised section label instead.

use regex::{Captures, Regex, RegexBuilder};
use std::collections::BTreeMap;
use tracing::{debug, info};

use super::patterns::{FieldExtractor, PatternChain, SectionBoundary};
use super::{
    split_ingredients, Allergens, Calories, CanonicalNutritionRecord, Ingredients, MassUnit,
    NutrientValue, ServingSize, Source,
};

/// Labels that start a new section of a food label
const SECTION_LABELS: &[&str] = &[
    r"serving\s+size",
    r"servings?\s+per",
    "portion",
    "calories",
    "energy",
    "ingredients?",
    "contains?",
    "allergens?",
    r"may\s+contain",
    r"nutrition(?:\s+facts)?",
];

const NUTRIENT_LABELS: &[&str] = &[
    r"(?:total\s+)?fat",
    "protein",
    r"(?:total\s+)?carbohydrates?",
    "sugars?",
    "fib(?:er|re)",
    "sodium",
    "salt",
];

const ALLERGEN_VOCABULARY: &[&str] = &[
    "milk",
    "eggs",
    "fish",
    "shellfish",
    "tree nuts",
    "peanuts",
    "wheat",
    "soybeans",
    "soy",
    "gluten",
    "sesame",
    "mustard",
];

/// Characters kept by [`TextExtractor::clean`]
const NOISE_PATTERN: &str = r"[^\w\s.,:;\-()%/]";

fn section_labels(except: &[&str], with_nutrients: bool) -> Vec<&'static str> {
    let nutrients: &[&'static str] = if with_nutrients { NUTRIENT_LABELS } else { &[] };
    SECTION_LABELS
        .iter()
        .copied()
        .filter(|label| !except.contains(label))
        .chain(nutrients.iter().copied())
        .collect()
}

pub struct CaloriesExtractor {
    chain: PatternChain,
}

impl CaloriesExtractor {
    pub fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            chain: PatternChain::new(&[
                r"calories?\s*:?\s*(\d+)",
                r"energy\s*:?\s*(\d+)\s*(?:kcal|cal)",
                r"(\d+)\s*(?:kcal|cal)",
                r"caloric\s+value\s*:?\s*(\d+)",
            ])?,
        })
    }
}

impl FieldExtractor for CaloriesExtractor {
    type Field = Calories;

    fn extract(&self, text: &str) -> Calories {
        match self.chain.first_match(text, |c| c[1].parse::<i64>().ok()) {
            Some(value) => {
                info!("Found calories: {}", value);
                Calories {
                    value: Some(value),
                    found: true,
                    ..Calories::default()
                }
            }
            None => {
                debug!("No calorie information found");
                Calories::default()
            }
        }
    }
}

pub struct ServingSizeExtractor {
    labelled: PatternChain,
    quantity: PatternChain,
    boundary: SectionBoundary,
}

impl ServingSizeExtractor {
    pub fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            labelled: PatternChain::new(&[r"serving\s+size\s*:?\s*(.+)", r"portion\s*:?\s*(.+)"])?,
            quantity: PatternChain::new(&[r"per\s+(\d+\s*(?:g|ml|oz|cup))"])?,
            boundary: SectionBoundary::new(&section_labels(&["portion"], true))?,
        })
    }
}

impl FieldExtractor for ServingSizeExtractor {
    type Field = ServingSize;

    fn extract(&self, text: &str) -> ServingSize {
        let labelled = self.labelled.first_match(text, |c| {
            let value = self.boundary.truncate(&c[1]);
            (!value.is_empty()).then(|| value.to_string())
        });
        let value = labelled.or_else(|| self.quantity.first_match(text, |c| Some(c[1].trim().to_string())));

        match value {
            Some(value) => {
                info!("Found serving size: {}", value);
                ServingSize {
                    value: Some(value),
                    found: true,
                }
            }
            None => {
                debug!("No serving size found");
                ServingSize::default()
            }
        }
    }
}

pub struct IngredientsExtractor {
    chain: PatternChain,
    boundary: SectionBoundary,
}

impl IngredientsExtractor {
    pub fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            chain: PatternChain::new(&[r"ingredients?\s*:?\s*(.+)", r"\bcontains?\b\s*:?\s*(.+)"])?,
            // Ingredient lists mention "contains" and "energy" themselves
            boundary: SectionBoundary::headers(&section_labels(&[], false))?,
        })
    }
}

impl FieldExtractor for IngredientsExtractor {
    type Field = Ingredients;

    fn extract(&self, text: &str) -> Ingredients {
        let found = self.chain.first_match(text, |c| {
            let raw = self.boundary.truncate(&c[1]);
            let list = split_ingredients(raw);
            (!list.is_empty()).then(|| (raw.to_string(), list))
        });

        match found {
            Some((raw, list)) => {
                info!("Found {} ingredients", list.len());
                Ingredients {
                    list,
                    raw: Some(raw),
                    found: true,
                }
            }
            None => {
                debug!("No ingredients found");
                Ingredients::default()
            }
        }
    }
}

struct NutrientRule {
    name: &'static str,
    unit: MassUnit,
    chain: PatternChain,
}

impl NutrientRule {
    fn new(name: &'static str, unit: MassUnit, patterns: &[&str]) -> Result<Self, regex::Error> {
        Ok(Self {
            name,
            unit,
            chain: PatternChain::new(patterns)?,
        })
    }

    fn parse(&self, caps: &Captures) -> Option<f64> {
        let value: f64 = caps[1].parse().ok()?;
        match self.unit {
            MassUnit::G => Some(value),
            // Printed grams are converted, bare numbers are already mg
            MassUnit::Mg => match caps.get(2).map(|m| m.as_str().to_ascii_lowercase()) {
                Some(unit) if unit == "g" => Some((value * 1000.0 * 1000.0).round() / 1000.0),
                _ => Some(value),
            },
        }
    }
}

pub struct NutritionFactsExtractor {
    rules: Vec<NutrientRule>,
}

impl NutritionFactsExtractor {
    pub fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            rules: vec![
                NutrientRule::new(
                    "protein",
                    MassUnit::G,
                    &[r"protein\s*:?\s*(\d+\.?\d*)\s*g", r"proteins?\s*(\d+\.?\d*)"],
                )?,
                NutrientRule::new(
                    "fat",
                    MassUnit::G,
                    &[r"(?:total\s+)?fat\s*:?\s*(\d+\.?\d*)\s*g", r"fats?\s*(\d+\.?\d*)"],
                )?,
                NutrientRule::new(
                    "carbohydrates",
                    MassUnit::G,
                    &[
                        r"(?:total\s+)?carbohydrates?\s*:?\s*(\d+\.?\d*)\s*g",
                        r"carbs?\s*(\d+\.?\d*)",
                    ],
                )?,
                NutrientRule::new(
                    "sugar",
                    MassUnit::G,
                    &[r"sugars?\s*:?\s*(\d+\.?\d*)\s*g", r"sugar\s*(\d+\.?\d*)"],
                )?,
                NutrientRule::new(
                    "fiber",
                    MassUnit::G,
                    &[r"(?:dietary\s+)?fiber\s*:?\s*(\d+\.?\d*)\s*g", r"fibre\s*(\d+\.?\d*)"],
                )?,
                // Labels that print only salt report it under sodium
                NutrientRule::new(
                    "sodium",
                    MassUnit::Mg,
                    &[
                        r"sodium\s*:?\s*(\d+\.?\d*)\s*(mg|g)\b",
                        r"salt\s*:?\s*(\d+\.?\d*)\s*(mg|g)?\b",
                    ],
                )?,
            ],
        })
    }
}

impl FieldExtractor for NutritionFactsExtractor {
    type Field = BTreeMap<String, NutrientValue>;

    fn extract(&self, text: &str) -> Self::Field {
        let mut facts = BTreeMap::new();
        for rule in &self.rules {
            if let Some(value) = rule.chain.first_match(text, |c| rule.parse(c)) {
                facts.insert(rule.name.to_string(), NutrientValue { value, unit: rule.unit });
            }
        }
        info!("Extracted nutrition facts for {} nutrients", facts.len());
        facts
    }
}

pub struct AllergenExtractor {
    declaration: Regex,
    boundary: SectionBoundary,
    vocabulary: Vec<(&'static str, Regex)>,
}

impl AllergenExtractor {
    pub fn new() -> Result<Self, regex::Error> {
        let declaration = RegexBuilder::new(r"\b(?:contains?|allergens?|may\s+contain)\b\s*:?\s*(.+)")
            .case_insensitive(true)
            .build()?;
        let boundary = SectionBoundary::new(&section_labels(
            &["contains?", "allergens?", r"may\s+contain"],
            false,
        ))?;
        let vocabulary = ALLERGEN_VOCABULARY
            .iter()
            .map(|term| {
                RegexBuilder::new(&format!(r"\b{}\b", regex::escape(term)))
                    .case_insensitive(true)
                    .build()
                    .map(|re| (*term, re))
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            declaration,
            boundary,
            vocabulary,
        })
    }
}

impl FieldExtractor for AllergenExtractor {
    type Field = Allergens;

    fn extract(&self, text: &str) -> Allergens {
        let hits: Vec<&str> = match self.declaration.captures(text) {
            Some(caps) => {
                let clause = self.boundary.truncate(&caps[1]).to_lowercase();
                ALLERGEN_VOCABULARY
                    .iter()
                    .copied()
                    .filter(|term| clause.contains(term))
                    .collect()
            }
            None => self
                .vocabulary
                .iter()
                .filter(|(_, re)| re.is_match(text))
                .map(|(term, _)| *term)
                .collect(),
        };

        let mut list: Vec<String> = Vec::new();
        for term in hits {
            if !list.iter().any(|known| known == term) {
                list.push(term.to_string());
            }
        }

        Allergens {
            found: !list.is_empty(),
            list,
        }
    }
}

/// Builds an OCR-sourced record from recognized text
pub struct TextExtractor {
    noise: Regex,
    calories: CaloriesExtractor,
    serving_size: ServingSizeExtractor,
    ingredients: IngredientsExtractor,
    nutrition_facts: NutritionFactsExtractor,
    allergens: AllergenExtractor,
}

impl TextExtractor {
    pub fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            noise: Regex::new(NOISE_PATTERN)?,
            calories: CaloriesExtractor::new()?,
            serving_size: ServingSizeExtractor::new()?,
            ingredients: IngredientsExtractor::new()?,
            nutrition_facts: NutritionFactsExtractor::new()?,
            allergens: AllergenExtractor::new()?,
        })
    }

    /// Collapse whitespace runs to single spaces and drop characters OCR
    /// tends to hallucinate
    pub fn clean(&self, text: &str) -> String {
        let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
        self.noise.replace_all(&collapsed, "").trim().to_string()
    }

    /// Extract every field; fields that are not found carry `found: false`
    pub fn extract(&self, raw_text: &str) -> CanonicalNutritionRecord {
        let cleaned = self.clean(raw_text);

        CanonicalNutritionRecord {
            calories: self.calories.extract(&cleaned),
            serving_size: self.serving_size.extract(&cleaned),
            ingredients: self.ingredients.extract(&cleaned),
            nutrition_facts: self.nutrition_facts.extract(&cleaned),
            allergens: self.allergens.extract(&cleaned),
            ..CanonicalNutritionRecord::empty(Source::Ocr)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extractor() -> TextExtractor {
        TextExtractor::new().unwrap()
    }

    #[test]
    fn test_clean_text() {
        let extractor = extractor();
        assert_eq!(extractor.clean("  Calories:\n\t250 ★kcal™ "), "Calories: 250 kcal");
        assert_eq!(extractor.clean("Şeker 5g / 100g"), "Şeker 5g / 100g");
        assert_eq!(extractor.clean("Fat <1g *"), "Fat 1g");
    }

    #[test]
    fn test_calories_found() {
        let calories = CaloriesExtractor::new().unwrap().extract("Calories: 250");
        assert_eq!(calories.value, Some(250));
        assert!(calories.found);

        let json = serde_json::to_value(&calories).unwrap();
        assert_eq!(json["unit"], "kcal");
    }

    #[test]
    fn test_calories_missing() {
        let calories = CaloriesExtractor::new().unwrap().extract("Protein 5g Fat 3g");
        assert_eq!(calories, Calories::default());
        assert!(!calories.found);
    }

    #[test]
    fn test_calories_from_energy_line() {
        let extractor = CaloriesExtractor::new().unwrap();
        assert_eq!(extractor.extract("Energy 1046 kJ / 250 kcal").value, Some(250));
        assert_eq!(extractor.extract("ENERGY: 180 kcal").value, Some(180));
    }

    #[test]
    fn test_serving_size_variants() {
        let extractor = ServingSizeExtractor::new().unwrap();
        assert_eq!(
            extractor.extract("Serving size: 1 cup (240ml) Servings per container 2 Calories 120").value,
            Some("1 cup (240ml)".to_string())
        );
        assert_eq!(
            extractor.extract("Nutrition values per 100 g").value,
            Some("100 g".to_string())
        );
        assert!(!extractor.extract("Calories 120").found);
    }

    #[test]
    fn test_ingredients_stop_at_next_section() {
        let ingredients = IngredientsExtractor::new()
            .unwrap()
            .extract("Ingredients: Oats, Honey; Almonds. Allergens: tree nuts");
        assert_eq!(ingredients.list, vec!["Oats", "Honey", "Almonds"]);
        assert_eq!(ingredients.raw.as_deref(), Some("Oats, Honey; Almonds"));
    }

    #[test]
    fn test_ingredients_keep_inline_section_words() {
        let extractor = IngredientsExtractor::new().unwrap();

        let ingredients = extractor
            .extract("INGREDIENTS: Water, Sugar, Contains 2% or less of: Citric Acid, Natural Flavor, Salt");
        assert_eq!(
            ingredients.list,
            vec!["Water", "Sugar", "Contains 2% or less of: Citric Acid", "Natural Flavor", "Salt"]
        );

        let ingredients = extractor.extract(
            "Ingredients: sugar, cocoa butter, emulsifier (contains soy lecithin), whole milk powder, vanilla",
        );
        assert_eq!(ingredients.list.len(), 5);
        assert_eq!(ingredients.list[2], "emulsifier (contains soy lecithin)");
        assert_eq!(ingredients.list[4], "vanilla");

        let ingredients =
            extractor.extract("Ingredients: carbonated water, energy blend (taurine, caffeine), citric acid");
        assert_eq!(ingredients.list.first().map(String::as_str), Some("carbonated water"));
        assert!(ingredients.list.iter().any(|item| item.starts_with("energy blend")));
        assert_eq!(ingredients.list.last().map(String::as_str), Some("citric acid"));
    }

    #[test]
    fn test_ingredients_missing() {
        let ingredients = IngredientsExtractor::new().unwrap().extract("Calories 120");
        assert!(!ingredients.found);
        assert!(ingredients.list.is_empty());
        assert!(ingredients.raw.is_none());
    }

    #[test]
    fn test_nutrition_facts() {
        let facts = NutritionFactsExtractor::new()
            .unwrap()
            .extract("Total Fat 8g Sodium 160mg Total Carbohydrate 37g Sugars 12g Protein 3g");

        assert_eq!(facts["fat"], NutrientValue { value: 8.0, unit: MassUnit::G });
        assert_eq!(facts["sodium"], NutrientValue { value: 160.0, unit: MassUnit::Mg });
        assert_eq!(facts["carbohydrates"].value, 37.0);
        assert_eq!(facts["sugar"].value, 12.0);
        assert_eq!(facts["protein"].value, 3.0);
        assert!(!facts.contains_key("fiber"));
    }

    #[test]
    fn test_sodium_grams_become_milligrams() {
        let facts = NutritionFactsExtractor::new().unwrap().extract("Sodium 0.4 g Salt 1.2g");
        assert_eq!(facts["sodium"], NutrientValue { value: 400.0, unit: MassUnit::Mg });
        assert!(!facts.contains_key("salt"));
    }

    #[test]
    fn test_salt_only_label_reports_sodium() {
        let facts = NutritionFactsExtractor::new()
            .unwrap()
            .extract("Energy 250 kcal Fat 3g Salt 1.2g");
        assert_eq!(facts.keys().collect::<Vec<_>>(), vec!["fat", "sodium"]);
        assert_eq!(facts["sodium"], NutrientValue { value: 1200.0, unit: MassUnit::Mg });

        let facts = NutritionFactsExtractor::new().unwrap().extract("Tuz 0,5 Salt 350");
        assert_eq!(facts["sodium"].value, 350.0);
    }

    #[test]
    fn test_allergens_from_declaration() {
        let allergens = AllergenExtractor::new()
            .unwrap()
            .extract("Ingredients: flour Contains: Milk, Soybeans and Eggs. Nutrition Facts milk");
        assert_eq!(allergens.list, vec!["milk", "eggs", "soybeans", "soy"]);
        assert!(allergens.found);
    }

    #[test]
    fn test_allergens_word_scan_without_declaration() {
        let allergens = AllergenExtractor::new()
            .unwrap()
            .extract("Ingredients: Wheat flour, sesame seeds, buttermilk");
        assert_eq!(allergens.list, vec!["wheat", "sesame"]);
    }

    #[test]
    fn test_no_allergens() {
        let allergens = AllergenExtractor::new().unwrap().extract("Water");
        assert!(!allergens.found);
        assert!(allergens.list.is_empty());
    }

    #[test]
    fn test_end_to_end_label() {
        let record = extractor().extract("Serving Size: 30g Calories 120 Ingredients: Wheat, Sugar, Salt");

        assert_eq!(record.source, Source::Ocr);
        assert_eq!(record.calories.value, Some(120));
        assert!(record.calories.found);
        assert_eq!(record.serving_size.value.as_deref(), Some("30g"));
        assert!(record.serving_size.found);
        assert_eq!(record.ingredients.list, vec!["Wheat", "Sugar", "Salt"]);
        assert!(record.ingredients.found);
        assert!(record.barcode.is_none());
    }

    #[test]
    fn test_multiline_ocr_text() {
        let record = extractor().extract(
            "NUTRITION FACTS\nServing size 2 biscuits (25 g)\nEnergy 120 kcal\nProtein 2.5 g\n\nINGREDIENTS: wheat flour, sugar,\npalm oil",
        );

        assert_eq!(record.serving_size.value.as_deref(), Some("2 biscuits (25 g)"));
        assert_eq!(record.calories.value, Some(120));
        assert_eq!(record.nutrition_facts["protein"].value, 2.5);
        assert_eq!(record.ingredients.list, vec!["wheat flour", "sugar", "palm oil"]);
    }
}
