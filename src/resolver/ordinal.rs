//! Ordinal replies to a disambiguation prompt ("第一個", "second", "3")

/// Prefixes a speaker may put before the ordinal ("選第二個")
const PREFIXES: [&str; 2] = ["選擇", "選"];

/// Counters and fillers after the ordinal ("第一個", "first one")
const SUFFIXES: [&str; 9] = ["個", "个", "位", "筆", "號", "号", "輛", "台", "one"];

/// Spoken forms for each candidate position
#[derive(Debug, Clone)]
pub struct OrdinalTable {
    positions: Vec<Vec<String>>,
}

impl Default for OrdinalTable {
    fn default() -> Self {
        Self::new(vec![
            vec!["第一", "一", "1", "first", "one"],
            vec!["第二", "二", "兩", "2", "second", "two"],
            vec!["第三", "三", "3", "third", "three"],
        ])
    }
}

impl OrdinalTable {
    /// Build a table; entry `i` lists the words meaning position `i`
    #[must_use]
    pub fn new<S: AsRef<str>>(positions: Vec<Vec<S>>) -> Self {
        Self {
            positions: positions
                .into_iter()
                .map(|words| words.iter().map(|w| w.as_ref().to_lowercase()).collect())
                .collect(),
        }
    }

    /// Zero-based position named by `utterance`, if it is an ordinal at all
    #[must_use]
    pub fn position(&self, utterance: &str) -> Option<usize> {
        let word = strip_fillers(utterance);
        if word.is_empty() {
            return None;
        }
        self.positions
            .iter()
            .position(|words| words.iter().any(|w| *w == word))
    }
}

/// Lower-case, drop punctuation and whitespace, then peel one prefix and one suffix
fn strip_fillers(utterance: &str) -> String {
    let mut word: String = utterance
        .chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .collect();

    for prefix in PREFIXES {
        if let Some(rest) = word.strip_prefix(prefix) {
            if !rest.is_empty() {
                word = rest.to_string();
                break;
            }
        }
    }
    for suffix in SUFFIXES {
        if let Some(rest) = word.strip_suffix(suffix) {
            if !rest.is_empty() {
                word = rest.to_string();
                break;
            }
        }
    }

    word
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_native_ordinals() {
        let table = OrdinalTable::default();
        assert_eq!(table.position("第一個"), Some(0));
        assert_eq!(table.position("第二"), Some(1));
        assert_eq!(table.position("選第三個。"), Some(2));
        assert_eq!(table.position("兩個"), Some(1));
    }

    #[test]
    fn test_english_and_digits() {
        let table = OrdinalTable::default();
        assert_eq!(table.position("Second"), Some(1));
        assert_eq!(table.position("the first one"), None);
        assert_eq!(table.position("first one"), Some(0));
        assert_eq!(table.position("one"), Some(0));
        assert_eq!(table.position(" 3 "), Some(2));
    }

    #[test]
    fn test_only_three_positions() {
        let table = OrdinalTable::default();
        assert_eq!(table.position("第四個"), None);
        assert_eq!(table.position("fourth"), None);
        assert_eq!(table.position("4"), None);
    }

    #[test]
    fn test_plates_are_not_ordinals() {
        let table = OrdinalTable::default();
        assert_eq!(table.position("ABC1234"), None);
        assert_eq!(table.position("11"), None);
        assert_eq!(table.position(""), None);
        assert_eq!(table.position("個"), None);
    }
}
