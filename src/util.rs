//! Small shared helpers

use chrono::{Duration, NaiveDate, Utc};
use rand::seq::{IndexedRandom, SliceRandom};
use rand::Rng;

const LOWER: &[u8] = b"abcdefghijklmnopqrstuvwxyz";
const UPPER: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ";
const DIGITS: &[u8] = b"0123456789";
const SPECIAL: &[u8] = b"!@#$%^&*";

/// Generate a random password of `len` characters (minimum 4) containing at
/// least one lowercase letter, one uppercase letter, one digit, and one
/// special character.
pub fn generate_password(len: usize) -> String {
    let len = len.max(4);
    let mut rng = rand::rng();

    let mut chars: Vec<u8> = vec![
        *LOWER.choose(&mut rng).unwrap_or(&b'a'),
        *UPPER.choose(&mut rng).unwrap_or(&b'A'),
        *DIGITS.choose(&mut rng).unwrap_or(&b'0'),
        *SPECIAL.choose(&mut rng).unwrap_or(&b'!'),
    ];

    let all: Vec<u8> = [LOWER, UPPER, DIGITS, SPECIAL].concat();
    while chars.len() < len {
        chars.push(all[rng.random_range(0..all.len())]);
    }
    chars.shuffle(&mut rng);

    String::from_utf8(chars).unwrap_or_else(|_| "Aa1!".to_string())
}

/// Validate a shell account name: 3 to 32 characters, starting with a
/// lowercase letter, followed by lowercase letters, digits, `_` or `-`.
pub fn is_valid_username(username: &str) -> bool {
    let mut chars = username.chars();
    let first_ok = matches!(chars.next(), Some(c) if c.is_ascii_lowercase());
    first_ok
        && (3..=32).contains(&username.len())
        && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-')
}

/// Render a date in the `YYYY-MM-DD` form the remote commands expect.
pub fn format_date(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

/// The date `days` days after `date`. Saturates at the calendar limits.
pub fn add_days(date: NaiveDate, days: i64) -> NaiveDate {
    date.checked_add_signed(Duration::days(days))
        .unwrap_or(NaiveDate::MAX)
}

/// Today's date in UTC.
pub fn today() -> NaiveDate {
    Utc::now().date_naive()
}
