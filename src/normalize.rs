//! Spoken plate normalization
//!
//! Recognizers transcribe plates inconsistently: mixed scripts, spaces,
//! dashes, full-width letters and counted digits ("四個八" for "8888").
//! [`Normalizer::normalize`] reduces all of that to an upper-case ASCII key.

use std::collections::HashMap;
use std::fmt;

/// Separator between a count and the repeated digit ("四個八")
const COUNT_MARKERS: [char; 2] = ['個', '个'];

/// Normalized plate key: upper-case ASCII letters and digits only
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PlateKey(String);

impl PlateKey {
    /// Borrow the key as a string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether normalization produced nothing
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for PlateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for PlateKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Table of native digit words recognized in counted-digit patterns
///
/// ASCII digits are always accepted; the table only adds spoken forms.
#[derive(Debug, Clone)]
pub struct DigitTable {
    words: HashMap<char, u8>,
}

impl Default for DigitTable {
    fn default() -> Self {
        let entries: [(char, u8); 17] = [
            ('零', 0),
            ('〇', 0),
            ('一', 1),
            ('壹', 1),
            ('幺', 1),
            ('二', 2),
            ('兩', 2),
            ('两', 2),
            ('貳', 2),
            ('三', 3),
            ('四', 4),
            ('五', 5),
            ('六', 6),
            ('七', 7),
            ('八', 8),
            ('九', 9),
            ('參', 3),
        ];
        Self {
            words: entries.into_iter().collect(),
        }
    }
}

impl DigitTable {
    /// Build a table from explicit word → digit pairs
    #[must_use]
    pub fn from_pairs(pairs: impl IntoIterator<Item = (char, u8)>) -> Self {
        Self {
            words: pairs.into_iter().filter(|(_, d)| *d <= 9).collect(),
        }
    }

    /// Digit value of a single character, if it is an ASCII digit or a known word
    #[must_use]
    pub fn digit(&self, c: char) -> Option<u8> {
        c.to_digit(10)
            .and_then(|d| u8::try_from(d).ok())
            .or_else(|| self.words.get(&c).copied())
    }
}

/// Turns a raw transcript into a [`PlateKey`]
#[derive(Debug, Clone, Default)]
pub struct Normalizer {
    digits: DigitTable,
}

impl Normalizer {
    /// Create a normalizer over a digit table
    #[must_use]
    pub const fn new(digits: DigitTable) -> Self {
        Self { digits }
    }

    /// Normalize a raw utterance
    ///
    /// Counted digits are expanded left to right over non-overlapping
    /// matches, then everything except ASCII letters and digits is dropped
    /// and the rest upper-cased. Full-width letters and digits are folded to
    /// ASCII first.
    #[must_use]
    pub fn normalize(&self, raw: &str) -> PlateKey {
        let chars: Vec<char> = raw.chars().map(fold_full_width).collect();
        let mut expanded = String::with_capacity(chars.len());

        let mut i = 0;
        while i < chars.len() {
            if let Some((count, digit)) = self.counted_digit(&chars[i..]) {
                for _ in 0..count {
                    expanded.push(char::from(b'0' + digit));
                }
                i += 3;
            } else {
                expanded.push(chars[i]);
                i += 1;
            }
        }

        let key = expanded
            .chars()
            .filter(char::is_ascii_alphanumeric)
            .map(|c| c.to_ascii_uppercase())
            .collect();

        tracing::trace!(raw, key = %key, "normalized utterance");
        PlateKey(key)
    }

    /// Match `<count>個<digit>` at the start of `window`
    fn counted_digit(&self, window: &[char]) -> Option<(u8, u8)> {
        let [count, marker, digit, ..] = window else {
            return None;
        };
        if !COUNT_MARKERS.contains(marker) {
            return None;
        }
        Some((self.digits.digit(*count)?, self.digits.digit(*digit)?))
    }
}

/// Map full-width ASCII variants (U+FF01..U+FF5E) onto ASCII
fn fold_full_width(c: char) -> char {
    let code = u32::from(c);
    if (0xFF01..=0xFF5E).contains(&code) {
        char::from_u32(code - 0xFEE0).unwrap_or(c)
    } else {
        c
    }
}
