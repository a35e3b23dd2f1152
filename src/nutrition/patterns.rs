//! Ordered regex fallbacks for label text

use regex::{Captures, Regex, RegexBuilder};

/// Pulls one field out of cleaned label text
pub trait FieldExtractor {
    type Field;

    fn extract(&self, text: &str) -> Self::Field;
}

/// Case-insensitive patterns tried in order
#[derive(Debug, Clone)]
pub struct PatternChain {
    patterns: Vec<Regex>,
}

impl PatternChain {
    pub fn new(patterns: &[&str]) -> Result<Self, regex::Error> {
        let patterns = patterns
            .iter()
            .map(|p| RegexBuilder::new(p).case_insensitive(true).build())
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { patterns })
    }

    /// First value `parse` accepts.
    ///
    /// Each pattern contributes only its first match; when `parse` rejects
    /// it the next pattern is tried.
    pub fn first_match<T>(&self, text: &str, parse: impl Fn(&Captures) -> Option<T>) -> Option<T> {
        self.patterns
            .iter()
            .filter_map(|pattern| pattern.captures(text))
            .find_map(|caps| parse(&caps))
    }
}

/// Cuts a rest-of-line capture where the next label section begins
#[derive(Debug, Clone)]
pub struct SectionBoundary {
    labels: Regex,
    header: Regex,
}

impl SectionBoundary {
    /// `labels` are alternatives matched case-insensitively on word
    /// boundaries; all-caps `WORD:` headers always end a section.
    pub fn new(labels: &[&str]) -> Result<Self, regex::Error> {
        Self::build(labels, "")
    }

    /// Like [`SectionBoundary::new`], but a label only ends the section
    /// when a colon follows it, so the words may appear inside the span.
    pub fn headers(labels: &[&str]) -> Result<Self, regex::Error> {
        Self::build(labels, r"\s*:")
    }

    fn build(labels: &[&str], suffix: &str) -> Result<Self, regex::Error> {
        let labels = RegexBuilder::new(&format!(r"\b(?:{})\b{}", labels.join("|"), suffix))
            .case_insensitive(true)
            .build()?;
        let header = Regex::new(r"\b\p{Lu}{2,}(?:\s+\p{Lu}{2,})*\s*:")?;
        Ok(Self { labels, header })
    }

    /// Span up to the first boundary, trimmed
    pub fn truncate<'a>(&self, span: &'a str) -> &'a str {
        let end = [self.labels.find(span), self.header.find(span)]
            .into_iter()
            .flatten()
            .map(|m| m.start())
            .min()
            .unwrap_or(span.len());
        span[..end].trim().trim_end_matches(['.', ',', ';']).trim()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_pattern_wins() {
        let chain = PatternChain::new(&[r"calories\s*(\d+)", r"(\d+)\s*kcal"]).unwrap();
        let value = chain.first_match("250 kcal, CALORIES 120", |c| c[1].parse::<i64>().ok());
        assert_eq!(value, Some(120));
    }

    #[test]
    fn test_falls_through_on_parse_failure() {
        let chain = PatternChain::new(&[r"calories\s*(\d+)", r"(\d+)\s*kcal"]).unwrap();
        let value = chain.first_match("calories 99999999999999999999 / 250 kcal", |c| {
            c[1].parse::<i64>().ok()
        });
        assert_eq!(value, Some(250));
    }

    #[test]
    fn test_no_match() {
        let chain = PatternChain::new(&[r"protein\s*(\d+)"]).unwrap();
        assert_eq!(chain.first_match("no numbers here", |c| Some(c[1].to_string())), None);
    }

    #[test]
    fn test_invalid_pattern() {
        assert!(PatternChain::new(&["(unclosed"]).is_err());
    }

    #[test]
    fn test_boundary_cuts_at_label() {
        let boundary = SectionBoundary::new(&["calories", r"ingredients?"]).unwrap();
        assert_eq!(boundary.truncate(" 30g Calories 120"), "30g");
        assert_eq!(boundary.truncate("Wheat, Sugar, Salt."), "Wheat, Sugar, Salt");
    }

    #[test]
    fn test_header_boundary_needs_colon() {
        let boundary = SectionBoundary::headers(&["contains?", "energy"]).unwrap();
        assert_eq!(
            boundary.truncate("water, energy blend (contains taurine) Energy: 45 kcal"),
            "water, energy blend (contains taurine)"
        );
        assert_eq!(boundary.truncate("sugar, salt NUTRITION: per 100g"), "sugar, salt");
    }

    #[test]
    fn test_boundary_cuts_at_caps_header() {
        let boundary = SectionBoundary::new(&["calories"]).unwrap();
        assert_eq!(boundary.truncate("milk, soy STORAGE: keep dry"), "milk, soy");
        assert_eq!(boundary.truncate("Wheat FLOUR, sugar"), "Wheat FLOUR, sugar");
    }
}
