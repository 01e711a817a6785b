//! Deterministic identifier extraction.
//!
//! Two independent patterns run over the uppercased text: one for catalog
//! part numbers (`PS` + digits), one for appliance model numbers. Nothing
//! here consults the catalog.
//!
//! Tie-break: a token carrying the part prefix (`PS` immediately followed by
//! a digit) is only ever reported as a part, never as a model.

use once_cell::sync::Lazy;
use regex::Regex;

static PART_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\bPS\d{5,}\b").expect("part id pattern is valid"));

/// Either a plain alphanumeric token of 6-15 chars or the Kenmore dotted
/// shape (`106.50522500`). Matched against whole tokens only.
static MODEL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:[A-Z0-9]{6,15}|\d{3}\.\d{5,11})$").expect("model id pattern is valid")
});

static PART_PREFIX_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^PS\d").expect("part prefix pattern is valid"));

/// All identifiers found in one turn, in order of appearance, deduplicated
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Extraction {
    pub part_ids: Vec<String>,
    pub model_ids: Vec<String>,
}

impl Extraction {
    pub fn is_empty(&self) -> bool {
        self.part_ids.is_empty() && self.model_ids.is_empty()
    }

    /// First hit of each kind
    pub fn candidate(&self) -> Candidate {
        Candidate {
            part_id: self.part_ids.first().cloned(),
            model_id: self.model_ids.first().cloned(),
            part_matched: !self.part_ids.is_empty(),
            model_matched: !self.model_ids.is_empty(),
        }
    }
}

/// Per-request identifier candidate
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Candidate {
    pub part_id: Option<String>,
    pub model_id: Option<String>,
    pub part_matched: bool,
    pub model_matched: bool,
}

/// Extract part and model identifiers from raw text
pub fn extract(text: &str) -> Extraction {
    let upper = text.to_uppercase();
    let mut out = Extraction::default();

    for m in PART_RE.find_iter(&upper) {
        push_unique(&mut out.part_ids, m.as_str());
    }

    for token in model_tokens(&upper) {
        if is_model_token(token) {
            push_unique(&mut out.model_ids, token);
        }
    }

    out
}

/// Runs of alphanumerics joined by `.`/`-`, with trailing sentence
/// punctuation stripped. A hyphenated phrase stays one token, so "24-inch"
/// never yields a model.
fn model_tokens(upper: &str) -> impl Iterator<Item = &str> {
    upper
        .split(|c: char| !(c.is_ascii_alphanumeric() || c == '.' || c == '-'))
        .map(|t| t.trim_matches(|c: char| c == '.' || c == '-'))
        .filter(|t| !t.is_empty())
}

/// Precision filters applied to whole tokens
fn is_model_token(token: &str) -> bool {
    if PART_PREFIX_RE.is_match(token) {
        return false;
    }
    if !token.chars().any(|c| c.is_ascii_digit()) {
        return false;
    }
    MODEL_RE.is_match(token)
}

/// True when `text` is nothing but a model number plus filler words
/// ("it's 106.50522500", "model WDT780SAEM1")
pub fn is_bare_model_reply(text: &str, extraction: &Extraction) -> bool {
    const FILLER: &[&str] = &[
        "MODEL", "NUMBER", "NO", "#", "IS", "IT'S", "ITS", "IT", "MY", "THE", "OK", "OKAY", "SURE",
        "HERE", "HERE'S", "YES", "THANKS", "A",
    ];
    if extraction.model_ids.len() != 1 || !extraction.part_ids.is_empty() {
        return false;
    }
    let model = &extraction.model_ids[0];
    text.to_uppercase()
        .split_whitespace()
        .map(|w| w.trim_matches(|c: char| matches!(c, ',' | '!' | '?' | ':' | ';' | '"')))
        .map(|w| w.trim_end_matches('.'))
        .filter(|w| !w.is_empty())
        .all(|w| w == model || FILLER.contains(&w))
}

fn push_unique(into: &mut Vec<String>, token: &str) {
    if !into.iter().any(|t| t == token) {
        into.push(token.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_part_id() {
        let ex = extract("How can I install PS11752778?");
        assert_eq!(ex.part_ids, vec!["PS11752778"]);
        assert!(ex.model_ids.is_empty());
    }

    #[test]
    fn test_extract_part_and_model() {
        let ex = extract("Does PS11752778 work with model WDT780SAEM1?");
        assert_eq!(ex.part_ids, vec!["PS11752778"]);
        assert_eq!(ex.model_ids, vec!["WDT780SAEM1"]);
        let c = ex.candidate();
        assert!(c.part_matched && c.model_matched);
    }

    #[test]
    fn test_lowercase_input_is_uppercased() {
        let ex = extract("does ps11752778 fit wdt780saem1");
        assert_eq!(ex.part_ids, vec!["PS11752778"]);
        assert_eq!(ex.model_ids, vec!["WDT780SAEM1"]);
    }

    #[test]
    fn test_part_prefix_never_reported_as_model() {
        // Matches both patterns: the part wins
        let ex = extract("PS11752778");
        assert_eq!(ex.part_ids, vec!["PS11752778"]);
        assert!(ex.model_ids.is_empty());

        // Too short for a part, still carries the prefix: neither
        let ex = extract("PS1234X9");
        assert!(ex.part_ids.is_empty());
        assert!(ex.model_ids.is_empty());
    }

    #[test]
    fn test_dotted_model_number() {
        let ex = extract("106.50522500");
        assert_eq!(ex.model_ids, vec!["106.50522500"]);
        assert!(ex.part_ids.is_empty());
    }

    #[test]
    fn test_plain_words_are_not_models() {
        let ex = extract("My REFRIGERATOR ice maker isn't working");
        assert!(ex.is_empty());
    }

    #[test]
    fn test_prices_and_dates_are_not_models() {
        let ex = extract("I paid 1049.50 on 2024-01-15");
        assert!(ex.model_ids.is_empty());
    }

    #[test]
    fn test_model_length_bounds() {
        assert!(extract("AB123").model_ids.is_empty());
        assert_eq!(extract("AB1234").model_ids, vec!["AB1234"]);
        assert!(extract("ABCDEFGHIJ123456").model_ids.is_empty());
    }

    #[test]
    fn test_hyphenated_phrases_are_not_models() {
        assert!(extract("My 24-inch dishwasher isn't draining").model_ids.is_empty());
        assert!(extract("I replaced the R-134A line").model_ids.is_empty());
        assert!(extract("ABC-123456").model_ids.is_empty());
        assert!(extract("model 106-50522500").model_ids.is_empty());
    }

    #[test]
    fn test_sentence_punctuation_does_not_block_models() {
        assert_eq!(extract("Is it WDT780SAEM1?").model_ids, vec!["WDT780SAEM1"]);
        assert_eq!(extract("It's 106.50522500.").model_ids, vec!["106.50522500"]);
        assert_eq!(
            extract("(WRS325FDAM04) or WDT780SAEM1, which?").model_ids,
            vec!["WRS325FDAM04", "WDT780SAEM1"]
        );
    }

    #[test]
    fn test_duplicates_collapsed() {
        let ex = extract("PS11752778 or PS11752778?");
        assert_eq!(ex.part_ids.len(), 1);
    }

    #[test]
    fn test_bare_model_reply() {
        let text = "it's 106.50522500";
        assert!(is_bare_model_reply(text, &extract(text)));
        let text = "Model number: WDT780SAEM1.";
        assert!(is_bare_model_reply(text, &extract(text)));
        let text = "WDT780SAEM1 and the dishwasher leaks";
        assert!(!is_bare_model_reply(text, &extract(text)));
        let text = "PS11752778";
        assert!(!is_bare_model_reply(text, &extract(text)));
    }
}
