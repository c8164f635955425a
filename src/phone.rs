// src/phone.rs

//! Kenyan mobile number handling. Every number is stored and sent upstream
//! in the bare `2547XXXXXXXX` / `2541XXXXXXXX` form.

use crate::error::PaymentError;

const COUNTRY_CODE: &str = "254";
const CANONICAL_LEN: usize = 12;

/// Canonicalizes `07XX..`, `2547XX..` and `+2547XX..` (with any separators)
/// into the 12-digit `254XXXXXXXXX` form.
pub fn normalize(raw: &str) -> Result<String, PaymentError> {
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();

    let formatted = match digits.strip_prefix('0') {
        Some(local) => format!("{COUNTRY_CODE}{local}"),
        None => digits,
    };

    if is_valid_canonical(&formatted) {
        Ok(formatted)
    } else {
        Err(PaymentError::InvalidPhone)
    }
}

/// Carrier check used before an STK push: 12 digits, `254` prefix, carrier
/// digit 7 or 1. Separators are ignored but no local-form rewriting happens.
pub fn is_valid_push_phone(raw: &str) -> bool {
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    is_valid_canonical(&digits)
}

fn is_valid_canonical(digits: &str) -> bool {
    if digits.len() != CANONICAL_LEN || !digits.starts_with(COUNTRY_CODE) {
        return false;
    }
    matches!(digits.as_bytes()[COUNTRY_CODE.len()], b'7' | b'1')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_forms_yield_the_same_number() {
        let expected = "254712345678";
        for raw in ["0712345678", "254712345678", "+254712345678", "0712 345 678", "+254-712-345-678"] {
            assert_eq!(normalize(raw).unwrap(), expected, "input {raw}");
        }
    }

    #[test]
    fn airtel_style_prefix_is_accepted() {
        assert_eq!(normalize("0110123456").unwrap(), "254110123456");
    }

    #[test]
    fn rejects_wrong_carrier_digit() {
        assert!(matches!(normalize("0812345678"), Err(PaymentError::InvalidPhone)));
        assert!(matches!(normalize("254212345678"), Err(PaymentError::InvalidPhone)));
    }

    #[test]
    fn rejects_wrong_length() {
        assert!(normalize("071234567").is_err());
        assert!(normalize("07123456789").is_err());
        assert!(normalize("").is_err());
        assert!(normalize("not a phone").is_err());
    }

    #[test]
    fn rejects_foreign_country_code() {
        assert!(normalize("+255712345678").is_err());
    }

    #[test]
    fn push_phone_check() {
        assert!(is_valid_push_phone("254711000111"));
        assert!(is_valid_push_phone("+254 111 000 111"));
        assert!(!is_valid_push_phone("0711000111"));
        assert!(!is_valid_push_phone("254811000111"));
        assert!(!is_valid_push_phone("25471100011"));
    }
}
