//! Card data validation, run before any request leaves the process.

use crate::payments::error::{PaymentError, PaymentResult};
use chrono::{Datelike, NaiveDate, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

#[derive(Clone, Serialize, Deserialize)]
pub struct CardDetails {
    pub number: String,
    /// `MM/YY` or `MM/YYYY`
    pub expiry: String,
    pub cvv: String,
    #[serde(default)]
    pub holder_name: Option<String>,
}

impl std::fmt::Debug for CardDetails {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CardDetails")
            .field("number", &mask_card_number(&self.number))
            .field("expiry", &self.expiry)
            .field("cvv", &"***")
            .field("holder_name", &self.holder_name)
            .finish()
    }
}

/// Expiry month and four-digit year.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CardExpiry {
    pub month: u32,
    pub year: i32,
}

impl CardDetails {
    /// Digits only, with spaces and dashes removed.
    pub fn normalized_number(&self) -> String {
        self.number
            .chars()
            .filter(|c| !c.is_whitespace() && *c != '-')
            .collect()
    }

    pub fn validate(&self) -> PaymentResult<CardExpiry> {
        self.validate_at(Utc::now().date_naive())
    }

    pub fn validate_at(&self, today: NaiveDate) -> PaymentResult<CardExpiry> {
        let number = self.normalized_number();
        if number.len() < 12 || number.len() > 19 || !number.chars().all(|c| c.is_ascii_digit())
        {
            return Err(PaymentError::validation(
                "card number must contain 12 to 19 digits",
                "card.number",
            ));
        }
        if !luhn_valid(&number) {
            return Err(PaymentError::validation(
                "card number failed checksum validation",
                "card.number",
            ));
        }

        let cvv = self.cvv.trim();
        if !(3..=4).contains(&cvv.len()) || !cvv.chars().all(|c| c.is_ascii_digit()) {
            return Err(PaymentError::validation(
                "cvv must be 3 or 4 digits",
                "card.cvv",
            ));
        }

        let expiry = parse_expiry(&self.expiry)?;
        if expiry.has_elapsed(today) {
            return Err(PaymentError::validation("card has expired", "card.expiry"));
        }
        Ok(expiry)
    }
}

impl CardExpiry {
    /// A card stays valid through the last day of its expiry month.
    pub fn has_elapsed(&self, today: NaiveDate) -> bool {
        (self.year, self.month) < (today.year(), today.month())
    }
}

fn expiry_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"^\s*(\d{1,2})\s*/\s*(\d{2}|\d{4})\s*$").ok())
        .as_ref()
}

pub fn parse_expiry(raw: &str) -> PaymentResult<CardExpiry> {
    let pattern = expiry_pattern()
        .ok_or_else(|| PaymentError::validation("expiry could not be checked", "card.expiry"))?;
    let captures = pattern.captures(raw).ok_or_else(|| {
        PaymentError::validation("expiry must be formatted as MM/YY", "card.expiry")
    })?;

    let month: u32 = captures[1]
        .parse()
        .map_err(|_| PaymentError::validation("invalid expiry month", "card.expiry"))?;
    if !(1..=12).contains(&month) {
        return Err(PaymentError::validation(
            "expiry month must be between 01 and 12",
            "card.expiry",
        ));
    }

    let year_raw = &captures[2];
    let mut year: i32 = year_raw
        .parse()
        .map_err(|_| PaymentError::validation("invalid expiry year", "card.expiry"))?;
    if year_raw.len() == 2 {
        year += 2000;
    }

    Ok(CardExpiry { month, year })
}

pub fn luhn_valid(digits: &str) -> bool {
    let mut sum = 0u32;
    for (idx, ch) in digits.chars().rev().enumerate() {
        let Some(mut d) = ch.to_digit(10) else {
            return false;
        };
        if idx % 2 == 1 {
            d *= 2;
            if d > 9 {
                d -= 9;
            }
        }
        sum += d;
    }
    !digits.is_empty() && sum % 10 == 0
}

/// Keep the first six and last four digits, mask the rest.
pub fn mask_card_number(number: &str) -> String {
    let digits: Vec<char> = number.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.len() < 10 {
        return "*".repeat(digits.len());
    }
    digits
        .iter()
        .enumerate()
        .map(|(i, c)| {
            if i < 6 || i >= digits.len() - 4 {
                *c
            } else {
                '*'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn card(number: &str, expiry: &str) -> CardDetails {
        CardDetails {
            number: number.to_string(),
            expiry: expiry.to_string(),
            cvv: "123".to_string(),
            holder_name: None,
        }
    }

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 6, 15).unwrap()
    }

    #[test]
    fn luhn_accepts_known_test_numbers() {
        assert!(luhn_valid("4242424242424242"));
        assert!(luhn_valid("5555555555554444"));
        assert!(!luhn_valid("4242424242424241"));
        assert!(!luhn_valid(""));
    }

    #[test]
    fn spaced_numbers_are_normalized() {
        let result = card("4242 4242 4242 4242", "12/30").validate_at(today());
        assert!(result.is_ok());
    }

    #[test]
    fn expiry_month_of_today_is_still_valid() {
        assert!(card("4242424242424242", "06/26").validate_at(today()).is_ok());
        assert!(card("4242424242424242", "05/2026")
            .validate_at(today())
            .is_err());
    }

    #[test]
    fn malformed_expiry_is_rejected() {
        for raw in ["13/30", "0/30", "1230", "ab/cd", ""] {
            assert!(parse_expiry(raw).is_err(), "expected {raw:?} to fail");
        }
        assert_eq!(
            parse_expiry("7/2031").unwrap(),
            CardExpiry {
                month: 7,
                year: 2031
            }
        );
    }

    #[test]
    fn bad_checksum_reports_field() {
        let err = card("4242424242424241", "12/30")
            .validate_at(today())
            .unwrap_err();
        match err {
            PaymentError::ValidationError { field, .. } => {
                assert_eq!(field.as_deref(), Some("card.number"))
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn debug_output_masks_pan() {
        let rendered = format!("{:?}", card("4242424242424242", "12/30"));
        assert!(rendered.contains("424242******4242"));
        assert!(!rendered.contains("123\""));
    }
}
