use std::sync::OnceLock;

use chrono::NaiveDate;
use regex::{Captures, Regex};
use spendlens_core::{Amount, CategoryTable};

use crate::types::{ExtractedField, ExtractedFields, Merchant, ReceiptDate};

// ── Compiled regex cache ─────────────────────────────────────────────────────

macro_rules! re {
    ($name:ident, $pat:expr) => {
        fn $name() -> &'static Regex {
            static R: OnceLock<Regex> = OnceLock::new();
            R.get_or_init(|| Regex::new($pat).expect("invalid regex"))
        }
    };
}

// Amounts: two decimal places, optional thousands grouping.
re!(re_amount_keyword,
    r"(?i)\b(?:grand\s+total|total|amount(?:\s+due)?|balance\s+due)\b[ \t]*:?[ \t]*(?:[$€£৳]|(?:usd|eur|gbp|bdt)\b)?[ \t]*(\d{1,3}(?:,\d{3})+\.\d{2}|\d+\.\d{2})\b");
re!(re_amount_currency,
    r"(?i)(?:(?:[$€£৳]|\b(?:usd|eur|gbp|bdt)\b)\s*(\d{1,3}(?:,\d{3})+\.\d{2}|\d+\.\d{2})\b|\b(\d{1,3}(?:,\d{3})+\.\d{2}|\d+\.\d{2})\s*(?:usd|eur|gbp|bdt)\b)");
re!(re_amount_bare,
    r"\b(\d{1,3}(?:,\d{3})+\.\d{2}|\d+\.\d{2})\b");

re!(re_date_day_month_year,
    r"\b(\d{1,2})[/-](\d{1,2})[/-](\d{4})\b");
re!(re_date_year_month_day,
    r"\b(\d{4})[/-](\d{1,2})[/-](\d{1,2})\b");

const CONF_AMOUNT_KEYWORD: f32 = 0.90;
const CONF_AMOUNT_CURRENCY: f32 = 0.70;
const CONF_AMOUNT_BARE: f32 = 0.45;
const CONF_DATE_YEAR_FIRST: f32 = 0.90;
const CONF_DATE_NUMERIC: f32 = 0.80;
const CONF_MERCHANT: f32 = 0.60;
const CONF_CATEGORY: f32 = 0.60;

// ── Public extraction API ─────────────────────────────────────────────────────

/// Runs every field extractor over a receipt's OCR text.
#[derive(Debug, Clone, Default)]
pub struct Extractor {
    categories: CategoryTable,
}

impl Extractor {
    pub fn new(categories: CategoryTable) -> Self {
        Self { categories }
    }

    pub fn categories(&self) -> &CategoryTable {
        &self.categories
    }

    /// Extract structured fields, using today's local date as the date fallback.
    pub fn extract(&self, ocr_text: &str) -> ExtractedFields {
        self.extract_on(ocr_text, chrono::Local::now().date_naive())
    }

    pub fn extract_on(&self, ocr_text: &str, today: NaiveDate) -> ExtractedFields {
        ExtractedFields {
            amount: extract_amount(ocr_text),
            date: extract_date_on(ocr_text, today),
            merchant: extract_merchant(ocr_text),
            category: extract_category(ocr_text, &self.categories),
        }
    }
}

// ── Amount ────────────────────────────────────────────────────────────────────

/// Keyword-anchored totals beat currency-marked amounts, which beat bare
/// decimals. Within a pattern family the leftmost hit wins.
pub fn extract_amount(text: &str) -> Option<ExtractedField<Amount>> {
    let families: [(&Regex, f32); 3] = [
        (re_amount_keyword(), CONF_AMOUNT_KEYWORD),
        (re_amount_currency(), CONF_AMOUNT_CURRENCY),
        (re_amount_bare(), CONF_AMOUNT_BARE),
    ];
    families.iter().find_map(|(re, confidence)| {
        re.captures_iter(text)
            .find_map(|c| first_group(&c).and_then(|s| Amount::parse_receipt_token(s).ok()))
            .map(|amount| ExtractedField::new(amount, *confidence))
    })
}

fn first_group<'t>(c: &Captures<'t>) -> Option<&'t str> {
    c.iter().skip(1).flatten().next().map(|m| m.as_str())
}

// ── Date ─────────────────────────────────────────────────────────────────────

/// Extract a receipt date, falling back to the current local date.
pub fn extract_date(text: &str) -> ExtractedField<ReceiptDate> {
    extract_date_on(text, chrono::Local::now().date_naive())
}

/// Scan left to right for `A/B/YYYY` or `YYYY/M/D` (slash or hyphen); the
/// first candidate that is a real calendar date wins. `today` is returned as
/// [`ReceiptDate::Fallback`] when nothing matches.
pub fn extract_date_on(text: &str, today: NaiveDate) -> ExtractedField<ReceiptDate> {
    let mut candidates: Vec<(usize, Option<NaiveDate>, f32)> = re_date_day_month_year()
        .captures_iter(text)
        .map(|c| (c.get(0).map_or(0, |m| m.start()), parse_short_first(&c), CONF_DATE_NUMERIC))
        .chain(re_date_year_month_day().captures_iter(text).map(|c| {
            (c.get(0).map_or(0, |m| m.start()), parse_year_first(&c), CONF_DATE_YEAR_FIRST)
        }))
        .collect();
    candidates.sort_by_key(|(start, _, _)| *start);

    candidates
        .into_iter()
        .find_map(|(_, date, conf)| date.map(|d| ExtractedField::new(ReceiptDate::Parsed(d), conf)))
        .unwrap_or_else(|| ExtractedField::new(ReceiptDate::Fallback(today), 0.0))
}

/// `A/B/YYYY`: month-first (US receipts), then day-first when that is not a valid date.
fn parse_short_first(c: &Captures<'_>) -> Option<NaiveDate> {
    let a: u32 = c.get(1)?.as_str().parse().ok()?;
    let b: u32 = c.get(2)?.as_str().parse().ok()?;
    let year: i32 = c.get(3)?.as_str().parse().ok()?;
    NaiveDate::from_ymd_opt(year, a, b).or_else(|| NaiveDate::from_ymd_opt(year, b, a))
}

fn parse_year_first(c: &Captures<'_>) -> Option<NaiveDate> {
    let year: i32 = c.get(1)?.as_str().parse().ok()?;
    let month: u32 = c.get(2)?.as_str().parse().ok()?;
    let day: u32 = c.get(3)?.as_str().parse().ok()?;
    NaiveDate::from_ymd_opt(year, month, day)
}

// ── Merchant ──────────────────────────────────────────────────────────────────

/// The first non-blank line, trimmed.
pub fn extract_merchant(text: &str) -> ExtractedField<Merchant> {
    text.lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .map(|l| ExtractedField::new(Merchant::Named(l.to_string()), CONF_MERCHANT))
        .unwrap_or_else(|| ExtractedField::new(Merchant::Unknown, 0.0))
}

// ── Category ──────────────────────────────────────────────────────────────────

pub fn extract_category(text: &str, table: &CategoryTable) -> ExtractedField<String> {
    match table.find_matching_rule(text) {
        Some(rule) => ExtractedField::new(rule.label.clone(), CONF_CATEGORY),
        None => ExtractedField::new(table.fallback().to_string(), 0.0),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn today() -> NaiveDate {
        d(2026, 10, 17)
    }

    // ── Amount ────────────────────────────────────────────────────────────────

    #[test]
    fn amount_total_with_currency() {
        let a = extract_amount("Total: $42.50").unwrap();
        assert_eq!(a.value, Amount::from_cents(4250));
        assert!(a.confidence >= 0.9);
    }

    #[test]
    fn amount_none_without_numbers() {
        assert!(extract_amount("no numbers here").is_none());
        assert!(extract_amount("").is_none());
    }

    #[test]
    fn amount_keyword_beats_earlier_bare_decimal() {
        let text = "Milk 3.49\nBread 2.10\nTOTAL 5.59";
        assert_eq!(extract_amount(text).unwrap().value, Amount::from_cents(559));
    }

    #[test]
    fn amount_subtotal_does_not_anchor() {
        let text = "Subtotal 10.00\nTax 0.80\nTotal 10.80";
        assert_eq!(extract_amount(text).unwrap().value, Amount::from_cents(1080));
    }

    #[test]
    fn amount_keyword_must_share_a_line() {
        // "Total" with nothing after it; the next line's number is not anchored.
        let text = "Total\n7.25";
        let a = extract_amount(text).unwrap();
        assert_eq!(a.value, Amount::from_cents(725));
        assert!(a.confidence < 0.5);
    }

    #[test]
    fn amount_keyword_needs_adjacent_number() {
        let a = extract_amount("Total items 3  Tax 0.80").unwrap();
        assert_eq!(a.value, Amount::from_cents(80));
        assert!(a.confidence < 0.5);

        let a = extract_amount("TOTAL USD 12.00").unwrap();
        assert_eq!(a.value, Amount::from_cents(1200));
        assert!(a.confidence >= 0.9);
    }

    #[test]
    fn amount_grouped_thousands() {
        let a = extract_amount("Amount due: 1,234.56").unwrap();
        assert_eq!(a.value, Amount::from_cents(123_456));
    }

    #[test]
    fn amount_currency_prefix_and_suffix() {
        assert_eq!(extract_amount("Paid €19.99").unwrap().value, Amount::from_cents(1999));
        let suffixed = extract_amount("Charge 250.00 BDT").unwrap();
        assert_eq!(suffixed.value, Amount::from_cents(25_000));
        assert!((suffixed.confidence - 0.70).abs() < f32::EPSILON);
    }

    #[test]
    fn amount_currency_beats_bare() {
        let text = "Ref 0012.34\nPaid $8.00";
        assert_eq!(extract_amount(text).unwrap().value, Amount::from_cents(800));
    }

    #[test]
    fn amount_bare_decimal_low_confidence() {
        let a = extract_amount("Coffee 4.75").unwrap();
        assert_eq!(a.value, Amount::from_cents(475));
        assert!(a.confidence < 0.5);
    }

    #[test]
    fn amount_is_deterministic() {
        let text = "ACME\nTotal: $42.50\nCash 50.00";
        let first = extract_amount(text);
        for _ in 0..5 {
            assert_eq!(extract_amount(text), first);
        }
    }

    // ── Date ─────────────────────────────────────────────────────────────────

    #[test]
    fn date_month_first_slash() {
        let f = extract_date_on("Date: 03/14/2024", today());
        assert_eq!(f.value, ReceiptDate::Parsed(d(2024, 3, 14)));
        assert_eq!(f.value.date().to_string(), "2024-03-14");
    }

    #[test]
    fn date_day_first_when_month_first_is_invalid() {
        let f = extract_date_on("14-03-2024 12:01", today());
        assert_eq!(f.value, ReceiptDate::Parsed(d(2024, 3, 14)));
    }

    #[test]
    fn date_year_first() {
        let f = extract_date_on("Printed 2024/1/5", today());
        assert_eq!(f.value, ReceiptDate::Parsed(d(2024, 1, 5)));
        let f = extract_date_on("2024-03-15 10:00", today());
        assert_eq!(f.value, ReceiptDate::Parsed(d(2024, 3, 15)));
    }

    #[test]
    fn date_leftmost_wins_across_patterns() {
        let f = extract_date_on("Issued 2023-12-01 Due 01/15/2024", today());
        assert_eq!(f.value, ReceiptDate::Parsed(d(2023, 12, 1)));
    }

    #[test]
    fn date_skips_impossible_candidates() {
        let f = extract_date_on("Ref 45/45/2024\nDate 02/03/2024", today());
        assert_eq!(f.value, ReceiptDate::Parsed(d(2024, 2, 3)));
    }

    #[test]
    fn date_falls_back_to_today() {
        let f = extract_date_on("ACME\nTotal 4.00", today());
        assert_eq!(f.value, ReceiptDate::Fallback(today()));
        assert!(f.value.is_fallback());
        assert_eq!(f.confidence, 0.0);
    }

    #[test]
    fn date_fallback_uses_clock_when_not_injected() {
        let before = chrono::Local::now().date_naive();
        let f = extract_date("no date");
        let after = chrono::Local::now().date_naive();
        assert!(f.value.is_fallback());
        assert!(f.value.date() >= before && f.value.date() <= after);
    }

    // ── Merchant ──────────────────────────────────────────────────────────────

    #[test]
    fn merchant_first_non_blank_line() {
        let f = extract_merchant("\n\nAcme Store\n123 Main St");
        assert_eq!(f.value, Merchant::Named("Acme Store".into()));
    }

    #[test]
    fn merchant_is_trimmed() {
        let f = extract_merchant("   \t\n   Corner Cafe   \nTotal 3.00");
        assert_eq!(f.value, Merchant::Named("Corner Cafe".into()));
    }

    #[test]
    fn merchant_unknown_for_blank_text() {
        let f = extract_merchant(" \n\t\n  ");
        assert_eq!(f.value, Merchant::Unknown);
        assert_eq!(f.value.to_string(), "Unknown");
        assert_eq!(extract_merchant("").value, Merchant::Unknown);
    }

    // ── Category ──────────────────────────────────────────────────────────────

    #[test]
    fn category_table_order_is_tie_break() {
        let table = CategoryTable::default();
        let text = "Joe's Restaurant\nGas surcharge 1.00";
        for _ in 0..5 {
            assert_eq!(extract_category(text, &table).value, "Transportation");
        }
    }

    #[test]
    fn category_falls_back_to_other() {
        let f = extract_category("Hardware Depot", &CategoryTable::default());
        assert_eq!(f.value, "Other");
        assert_eq!(f.confidence, 0.0);
    }

    #[test]
    fn category_case_insensitive() {
        let f = extract_category("FRESH FOOD MART", &CategoryTable::default());
        assert_eq!(f.value, "Groceries");
        assert!(f.confidence > 0.0);
    }

    // ── Extractor ─────────────────────────────────────────────────────────────

    #[test]
    fn extractor_runs_all_fields() {
        let text = "CITY SUPERMARKET\n123 Main St\nDate: 03/14/2024\nMilk 3.49\nTotal: $42.50";
        let fields = Extractor::default().extract_on(text, today());
        assert_eq!(fields.amount.unwrap().value, Amount::from_cents(4250));
        assert_eq!(fields.date.value, ReceiptDate::Parsed(d(2024, 3, 14)));
        assert_eq!(fields.merchant.value, Merchant::Named("CITY SUPERMARKET".into()));
        assert_eq!(fields.category.value, "Groceries");
    }

    #[test]
    fn extractor_empty_text_is_not_an_error() {
        let fields = Extractor::default().extract_on("", today());
        assert!(fields.is_empty());
        assert_eq!(fields.confidence(), 0.0);
        assert_eq!(fields.date.value, ReceiptDate::Fallback(today()));
    }

    #[test]
    fn extractor_uses_custom_table() {
        let table = CategoryTable::from_toml(
            r#"
            [[category]]
            label = "Pharmacy"
            keywords = ["pharmacy"]
            "#,
        )
        .unwrap();
        let fields = Extractor::new(table).extract_on("Main St Pharmacy\n9.99", today());
        assert_eq!(fields.category.value, "Pharmacy");
    }

    #[test]
    fn no_panic_on_garbage_input() {
        let _ = Extractor::default().extract_on("!@#$%^&*()\n\0\x01\x02৳€", today());
    }
}
