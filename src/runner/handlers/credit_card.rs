use once_cell::sync::Lazy;
use regex::Regex;
use tracing::info;

use crate::runner::error::{Result, TaskError};
use crate::runner::params;
use crate::runner::HandlerContext;
use crate::shared::process::args;

const INPUT: &str = "credit_card.png";
const OUTPUT: &str = "credit-card.txt";

static NUMBER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b\d(?:[ -]?\d){12,18}\b").expect("valid card number regex"));
static EXPIRY_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(0[1-9]|1[0-2])\s*/\s*(\d{4}|\d{2})\b").expect("valid expiry regex")
});
static CVV_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:cvv2?|cvc2?|security\s+code)\b\D{0,5}(\d{3,4})\b").expect("valid cvv regex")
});
static HOLDER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Z][A-Z.'-]+(?: [A-Z][A-Z.'-]*){1,3}$").expect("valid holder regex"));

/// Words printed on cards that look like a holder name but are not.
const NON_NAME_WORDS: &[&str] = &[
    "BANK", "CARD", "CREDIT", "DEBIT", "VALID", "THRU", "GOOD", "EXPIRES", "MEMBER", "SINCE",
    "VISA", "MASTERCARD", "PLATINUM", "GOLD", "CLASSIC",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CardField {
    Number,
    Expiry,
    Cvv,
    Holder,
}

impl CardField {
    pub const ALL: [CardField; 4] = [
        CardField::Number,
        CardField::Expiry,
        CardField::Cvv,
        CardField::Holder,
    ];

    pub fn key(self) -> &'static str {
        match self {
            CardField::Number => "card_number",
            CardField::Expiry => "expiry",
            CardField::Cvv => "cvv",
            CardField::Holder => "card_holder",
        }
    }

    fn keywords(self) -> &'static [&'static str] {
        match self {
            CardField::Number => &["number"],
            CardField::Expiry => &["expir", "valid thru", "valid through"],
            CardField::Cvv => &["cvv", "cvc", "security code"],
            CardField::Holder => &["name", "holder"],
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CardFields {
    pub number: Option<String>,
    pub expiry: Option<String>,
    pub cvv: Option<String>,
    pub holder: Option<String>,
}

impl CardFields {
    fn get(&self, field: CardField) -> Option<&str> {
        match field {
            CardField::Number => self.number.as_deref(),
            CardField::Expiry => self.expiry.as_deref(),
            CardField::Cvv => self.cvv.as_deref(),
            CardField::Holder => self.holder.as_deref(),
        }
    }
}

pub fn luhn_valid(digits: &str) -> bool {
    let mut sum = 0;
    for (i, c) in digits.chars().rev().enumerate() {
        let Some(mut d) = c.to_digit(10) else {
            return false;
        };
        if i % 2 == 1 {
            d *= 2;
            if d > 9 {
                d -= 9;
            }
        }
        sum += d;
    }
    !digits.is_empty() && sum % 10 == 0
}

pub fn select_fields(task: &str) -> Vec<CardField> {
    let lower = task.to_lowercase();
    let selected: Vec<CardField> = CardField::ALL
        .into_iter()
        .filter(|f| params::contains_any(&lower, f.keywords()))
        .collect();
    if selected.is_empty() {
        CardField::ALL.to_vec()
    } else {
        selected
    }
}

/// Pulls card fields out of OCR text. Luhn-valid numbers win over the first
/// candidate.
pub fn parse_card_fields(text: &str) -> CardFields {
    let candidates: Vec<String> = NUMBER_RE
        .find_iter(text)
        .map(|m| m.as_str().chars().filter(char::is_ascii_digit).collect())
        .collect();
    let number = candidates
        .iter()
        .find(|d| luhn_valid(d))
        .or_else(|| candidates.first())
        .cloned();

    let expiry = EXPIRY_RE
        .captures(text)
        .map(|c| format!("{}/{}", &c[1], &c[2]));

    let cvv = CVV_RE.captures(text).map(|c| c[1].to_string());

    let holder = text
        .lines()
        .map(str::trim)
        .filter(|line| HOLDER_RE.is_match(line))
        .find(|line| {
            !line
                .split_whitespace()
                .any(|w| NON_NAME_WORDS.contains(&w))
        })
        .map(str::to_string);

    CardFields {
        number,
        expiry,
        cvv,
        holder,
    }
}

pub async fn run(ctx: &HandlerContext, task: &str) -> Result<String> {
    let input = ctx.input_file(task, &["png", "jpg", "jpeg"], INPUT);
    let image = ctx.workspace.require(&input).await?;
    let image = image.to_string_lossy().to_string();

    let ocr = ctx
        .processes
        .run("tesseract", &args([image.as_str(), "stdout"]), ctx.workspace.root(), None)
        .await?;
    if !ocr.success() {
        return Err(TaskError::Upstream(format!(
            "tesseract exited with {}: {}",
            ocr.exit_code,
            ocr.stderr.trim()
        )));
    }

    let parsed = parse_card_fields(&ocr.stdout);
    let fields = select_fields(task);
    let body: String = fields
        .iter()
        .filter_map(|f| parsed.get(*f).map(|v| format!("{}: {v}\n", f.key())))
        .collect();
    if body.is_empty() {
        return Err(TaskError::Upstream(format!(
            "no {} found in OCR output of {input}",
            fields.iter().map(|f| f.key()).collect::<Vec<_>>().join("/")
        )));
    }
    ctx.workspace.write(OUTPUT, &body).await?;

    info!(handler = "extract_credit_card", %input, output = OUTPUT, "extracted card fields");
    Ok(format!("Extracted card details from {input} to {OUTPUT}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    const OCR: &str = "WORLD BANK\n\
        4111 1111 1111 1112\n\
        4111 1111 1111 1111\n\
        VALID THRU 09/27\n\
        JOHN Q PUBLIC\n\
        CVV 123\n";

    #[test]
    fn luhn_check() {
        assert!(luhn_valid("4111111111111111"));
        assert!(!luhn_valid("4111111111111112"));
        assert!(!luhn_valid(""));
    }

    #[test]
    fn prefers_luhn_valid_number() {
        let fields = parse_card_fields(OCR);
        assert_eq!(fields.number.as_deref(), Some("4111111111111111"));
        assert_eq!(fields.expiry.as_deref(), Some("09/27"));
        assert_eq!(fields.cvv.as_deref(), Some("123"));
        assert_eq!(fields.holder.as_deref(), Some("JOHN Q PUBLIC"));
    }

    #[test]
    fn falls_back_to_first_candidate() {
        let fields = parse_card_fields("5555-4444-3333-2221");
        assert_eq!(fields.number.as_deref(), Some("5555444433332221"));
        assert_eq!(fields.expiry, None);
    }

    #[test]
    fn selects_fields_by_keyword() {
        assert_eq!(
            select_fields("Extract the credit card number from credit_card.png"),
            vec![CardField::Number]
        );
        assert_eq!(
            select_fields("Get the card holder name and expiry"),
            vec![CardField::Expiry, CardField::Holder]
        );
        assert_eq!(select_fields("Read the credit card"), CardField::ALL.to_vec());
    }
}
