//! Staged caption extraction.
//!
//! Six independent stages pull structure out of free-text captions:
//! product code, vendor UID, purchase date, quantity, notes, product name.
//! A stage that finds nothing records a fallback reason and moves on; the
//! parser itself never fails. Confidence scoring runs over the combined
//! outcome and is clamped to `[0.1, 1.0]`.

use std::ops::Range;
use std::sync::Arc;

use chrono::NaiveDate;
use regex::Regex;
use tracing::debug;

use super::{AnalyzedContent, FallbackReason, ParseMethod, ParsingMetadata};
use crate::time::{Clock, SystemClock};

/// Product names longer than this suggest the staged extraction missed
/// structure; such results are flagged for escalation.
const ESCALATION_NAME_LEN: usize = 23;

/// Quantities at or above this are penalized as implausible.
const QUANTITY_SANE_MAX: u32 = 10_000;

/// Lower and upper clamp bounds for the confidence score.
const CONFIDENCE_FLOOR: f64 = 0.1;
const CONFIDENCE_CEIL: f64 = 1.0;

/// Caption parser with pre-compiled stage regexes.
pub struct CaptionParser {
    clock: Arc<dyn Clock>,
    code: Regex,
    hash_token: Regex,
    quantity: Regex,
    paren: Regex,
    shape: Regex,
    loose_quantity: Regex,
}

impl Default for CaptionParser {
    fn default() -> Self {
        Self::new()
    }
}

impl CaptionParser {
    /// Create a parser using the system clock for date validation.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Create a parser with an injected clock.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            code: Regex::new(r"#([A-Za-z]{1,4})(\d{5,6})\b").expect("code regex"),
            hash_token: Regex::new(r"#\w+").expect("hash token regex"),
            quantity: Regex::new(r"(?i)\bx\s*(\d+)\b|\b(\d+)\s*x\b").expect("quantity regex"),
            paren: Regex::new(r"\(([^)]*)\)").expect("paren regex"),
            shape: Regex::new(r"^[^#\n]+#[A-Za-z]{1,4}\d{5,6}").expect("shape regex"),
            loose_quantity: Regex::new(r"(?i)\d\s*x|x\s*\d").expect("loose quantity regex"),
        }
    }

    /// Analyze a caption. Never fails; malformed sub-extractions degrade to
    /// absent fields plus a fallback reason.
    pub fn parse(&self, caption: &str) -> AnalyzedContent {
        let mut fallbacks = Vec::new();

        // Stages 1-3: product code, vendor UID, purchase date.
        let mut product_code = None;
        let mut vendor_uid = None;
        let mut purchase_date = None;
        let mut code_span: Option<Range<usize>> = None;
        if let Some(caps) = self.code.captures(caption) {
            let full = caps.get(0).expect("whole match");
            let letters = caps.get(1).expect("letter group").as_str();
            let digits = caps.get(2).expect("digit group").as_str();
            code_span = Some(full.range());
            product_code = Some(format!("{}{}", letters.to_uppercase(), digits));
            vendor_uid = Some(letters.to_uppercase());
            match self.derive_purchase_date(digits) {
                Some(date) => purchase_date = Some(date),
                None => {
                    debug!(digits, "product code digits did not form a valid date");
                    fallbacks.push(FallbackReason::InvalidDate);
                }
            }
        } else {
            fallbacks.push(FallbackReason::NoProductCode);
        }

        // Stage 4: quantity.
        let mut quantity = None;
        let mut quantity_span: Option<Range<usize>> = None;
        if let Some(caps) = self.quantity.captures(caption) {
            let digits = caps
                .get(1)
                .or_else(|| caps.get(2))
                .expect("one digit group")
                .as_str();
            match digits.parse::<u32>() {
                Ok(q) if q > 0 => {
                    quantity = Some(q);
                    quantity_span = Some(caps.get(0).expect("whole match").range());
                }
                _ => fallbacks.push(FallbackReason::NoQuantity),
            }
        } else {
            fallbacks.push(FallbackReason::NoQuantity);
        }

        // Stage 6 runs before notes: the leftover computation needs to know
        // which prefix the name claimed.
        let name_end = [
            caption.find('#'),
            quantity_span.as_ref().map(|s| s.start),
            caption.find('\n'),
            caption.find('-'),
        ]
        .into_iter()
        .flatten()
        .min();
        let name_prefix = name_end
            .filter(|&idx| idx > 0)
            .map(|idx| caption[..idx].trim())
            .filter(|prefix| !prefix.is_empty());
        let product_name = match name_prefix {
            Some(prefix) => prefix.to_string(),
            None => {
                fallbacks.push(FallbackReason::NoProductNameMarker);
                caption.trim().to_string()
            }
        };

        // Stage 5: notes.
        let notes = self
            .paren
            .captures(caption)
            .map(|caps| caps.get(1).expect("paren group").as_str().trim().to_string())
            .filter(|text| !text.is_empty())
            .or_else(|| {
                name_prefix.and_then(|_| {
                    self.leftover_notes(caption, name_end, &code_span, &quantity_span)
                })
            });

        let confidence = self.score(
            caption,
            product_code.is_some(),
            vendor_uid.is_some() && purchase_date.is_some(),
            quantity,
            &product_name,
            &fallbacks,
        );

        let needs_escalation = product_name.chars().count() > ESCALATION_NAME_LEN;

        AnalyzedContent {
            product_name,
            product_code,
            vendor_uid,
            purchase_date,
            quantity,
            notes,
            parsing_metadata: ParsingMetadata {
                method: ParseMethod::Manual,
                confidence,
                fallbacks_used: fallbacks,
                timestamp: self.clock.now(),
                needs_escalation,
            },
            sync_metadata: None,
        }
    }

    /// Interpret the code's digit run as MMDDYY. Five digits are left-padded
    /// with a zero before splitting. Rejects impossible and future dates.
    fn derive_purchase_date(&self, digits: &str) -> Option<NaiveDate> {
        let padded = if digits.len() == 5 {
            format!("0{digits}")
        } else {
            digits.to_string()
        };
        let month: u32 = padded[0..2].parse().ok()?;
        let day: u32 = padded[2..4].parse().ok()?;
        let year: i32 = 2000 + padded[4..6].parse::<i32>().ok()?;
        let date = NaiveDate::from_ymd_opt(year, month, day)?;
        let today = self.clock.now().date_naive();
        (date <= today).then_some(date)
    }

    /// Caption text left after excising the name prefix, code token and
    /// quantity token. Used as notes when no parenthetical exists.
    fn leftover_notes(
        &self,
        caption: &str,
        name_end: Option<usize>,
        code_span: &Option<Range<usize>>,
        quantity_span: &Option<Range<usize>>,
    ) -> Option<String> {
        let mut spans: Vec<Range<usize>> = Vec::new();
        if let Some(end) = name_end {
            spans.push(0..end);
        }
        if let Some(span) = code_span {
            spans.push(span.clone());
        }
        if let Some(span) = quantity_span {
            spans.push(span.clone());
        }
        spans.sort_by(|a, b| b.start.cmp(&a.start));

        let mut leftover = caption.to_string();
        for span in spans {
            leftover.replace_range(span, "");
        }
        let trimmed = leftover.trim_matches(|c: char| c.is_whitespace() || c == '-');
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    }

    /// Additive confidence scoring over the combined extraction outcome.
    fn score(
        &self,
        caption: &str,
        code_strict: bool,
        vendor_and_date: bool,
        quantity: Option<u32>,
        product_name: &str,
        fallbacks: &[FallbackReason],
    ) -> f64 {
        let mut score: f64 = 1.0;

        // Caption shape.
        if self.shape.is_match(caption) {
            score += 0.2;
        }
        if !self.loose_quantity.is_match(caption) {
            score -= 0.3;
        }
        if caption.contains('\n') && self.paren.is_match(caption) {
            score += 0.1;
        }

        // Code quality.
        if code_strict {
            score += 0.2;
            if vendor_and_date {
                score += 0.2;
            }
        } else if self.hash_token.is_match(caption) {
            score -= 0.2;
        } else {
            score -= 0.4;
        }

        // Quantity quality.
        match quantity {
            Some(q) if q < QUANTITY_SANE_MAX => score += 0.2,
            Some(_) => score -= 0.1,
            None => score -= 0.3,
        }

        // Product-name quality.
        let name_len = product_name.chars().count();
        if product_name != caption.trim() && name_len > 3 && name_len < 100 {
            score += 0.1;
        } else {
            score -= 0.1;
        }

        // Fallback penalty: critical fallbacks draw one flat penalty,
        // otherwise each fallback costs a little.
        if fallbacks.iter().any(FallbackReason::is_critical) {
            score -= 0.3;
        } else {
            score -= 0.1 * fallbacks.len() as f64;
        }

        score.clamp(CONFIDENCE_FLOOR, CONFIDENCE_CEIL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::testing::FixedClock;

    fn parser() -> CaptionParser {
        CaptionParser::with_clock(Arc::new(FixedClock::at(2026, 8, 1)))
    }

    #[test]
    fn test_full_caption() {
        let result = parser().parse("Blue Widget #AB022524 x5 (fragile)");

        assert_eq!(result.product_name, "Blue Widget");
        assert_eq!(result.product_code.as_deref(), Some("AB022524"));
        assert_eq!(result.vendor_uid.as_deref(), Some("AB"));
        assert_eq!(
            result.purchase_date,
            Some(NaiveDate::from_ymd_opt(2024, 2, 25).unwrap())
        );
        assert_eq!(result.quantity, Some(5));
        assert_eq!(result.notes.as_deref(), Some("fragile"));
        assert!(result.parsing_metadata.fallbacks_used.is_empty());
        assert!((result.parsing_metadata.confidence - 1.0).abs() < f64::EPSILON);
        assert!(!result.parsing_metadata.needs_escalation);
    }

    #[test]
    fn test_five_digit_code_left_pads_date() {
        let result = parser().parse("Cable #C22524 x2");

        assert_eq!(result.product_code.as_deref(), Some("C22524"));
        assert_eq!(result.vendor_uid.as_deref(), Some("C"));
        assert_eq!(
            result.purchase_date,
            Some(NaiveDate::from_ymd_opt(2024, 2, 25).unwrap())
        );
    }

    #[test]
    fn test_empty_caption_degrades_to_floor() {
        let result = parser().parse("");

        assert!(result.product_code.is_none());
        assert!(result.vendor_uid.is_none());
        assert!(result.purchase_date.is_none());
        assert!(result.quantity.is_none());
        assert!(result.notes.is_none());
        assert!(result.product_name.is_empty());
        assert!(result.parsing_metadata.confidence <= 0.2);
        assert!(result.parsing_metadata.confidence >= 0.1);
        assert!(result
            .parsing_metadata
            .fallbacks_used
            .contains(&FallbackReason::NoProductCode));
        assert!(result
            .parsing_metadata
            .fallbacks_used
            .contains(&FallbackReason::NoQuantity));
    }

    #[test]
    fn test_impossible_date_records_fallback() {
        // Month 13 does not exist.
        let result = parser().parse("Widget #AB133124 x1");

        assert_eq!(result.product_code.as_deref(), Some("AB133124"));
        assert!(result.purchase_date.is_none());
        assert!(result
            .parsing_metadata
            .fallbacks_used
            .contains(&FallbackReason::InvalidDate));
    }

    #[test]
    fn test_future_date_records_fallback() {
        // 2099-12-31 is later than the fixed clock.
        let result = parser().parse("Widget #AB123199 x1");

        assert!(result.purchase_date.is_none());
        assert!(result
            .parsing_metadata
            .fallbacks_used
            .contains(&FallbackReason::InvalidDate));
    }

    #[test]
    fn test_quantity_digits_before_x() {
        let result = parser().parse("Lamp #LT050124 3x");
        assert_eq!(result.quantity, Some(3));
    }

    #[test]
    fn test_quantity_zero_is_absent() {
        let result = parser().parse("Lamp #LT050124 x0");
        assert!(result.quantity.is_none());
        assert!(result
            .parsing_metadata
            .fallbacks_used
            .contains(&FallbackReason::NoQuantity));
    }

    #[test]
    fn test_oversized_quantity_penalized_but_kept() {
        let implausible = parser().parse("x50000");
        let sane = parser().parse("x5");
        assert_eq!(implausible.quantity, Some(50_000));
        assert!(
            implausible.parsing_metadata.confidence < sane.parsing_metadata.confidence,
            "out-of-range quantity should score below an in-range one"
        );
    }

    #[test]
    fn test_malformed_hash_token() {
        // Five letters: hash token present but not a valid code.
        let result = parser().parse("Widget #ABCDE12345 x2");

        assert!(result.product_code.is_none());
        assert!(result
            .parsing_metadata
            .fallbacks_used
            .contains(&FallbackReason::NoProductCode));
    }

    #[test]
    fn test_name_stops_at_dash() {
        let result = parser().parse("Desk Fan - white #DF050124 x1");
        assert_eq!(result.product_name, "Desk Fan");
    }

    #[test]
    fn test_name_marker_missing_uses_whole_caption() {
        let result = parser().parse("just some words");

        assert_eq!(result.product_name, "just some words");
        assert!(result
            .parsing_metadata
            .fallbacks_used
            .contains(&FallbackReason::NoProductNameMarker));
    }

    #[test]
    fn test_leftover_text_becomes_notes() {
        let result = parser().parse("Blue Widget #AB022524 x5 extra info");
        assert_eq!(result.notes.as_deref(), Some("extra info"));
    }

    #[test]
    fn test_long_name_needs_escalation() {
        let result = parser().parse("Super Deluxe Widget Extended Edition #AB022524 x5");
        assert!(result.product_name.chars().count() > 23);
        assert!(result.parsing_metadata.needs_escalation);
    }

    #[test]
    fn test_confidence_always_in_bounds() {
        let pathological = [
            "",
            "####",
            "x",
            "((((((",
            "\n\n\n",
            "-#-x-#-",
            "0x0x0x0x0x0",
            &"a".repeat(500),
        ];
        let parser = parser();
        for caption in pathological {
            let result = parser.parse(caption);
            let c = result.parsing_metadata.confidence;
            assert!((0.1..=1.0).contains(&c), "confidence {c} for {caption:?}");
        }
    }

    #[test]
    fn test_newline_and_parenthetical_bonus() {
        let with_structure = parser().parse("Widget #AB022524 x5\n(second line note)");
        let without = parser().parse("Widget #AB022524 x5");
        assert!(
            with_structure.parsing_metadata.confidence
                >= without.parsing_metadata.confidence - f64::EPSILON
        );
    }
}
