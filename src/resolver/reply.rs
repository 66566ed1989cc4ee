//! Spoken replies for lookup outcomes and session events
//!
//! Templates use `{name}` placeholders and can be overridden from the
//! `[phrases]` table of the config file.

use serde::Deserialize;

use super::{Candidate, Outcome};
use crate::audio::RouteKind;
use crate::normalize::PlateKey;

/// Reply templates (Taiwanese Mandarin by default)
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Phrasebook {
    /// Exact hit: `{plate}`, `{household}`, `{note}`
    pub exact: String,
    /// Single fuzzy hit, flagged as approximate
    pub approximate: String,
    /// Appended when a record has a note: `{note}`
    pub note: String,
    /// Opening of an enumeration: `{count}`
    pub multiple_intro: String,
    /// One enumerated candidate: `{ordinal}`, `{plate}`, `{household}`
    pub multiple_item: String,
    /// Between enumerated candidates
    pub multiple_separator: String,
    /// Closing ordinal prompt
    pub multiple_prompt: String,
    /// Too many fuzzy hits: `{count}`, `{plate}`
    pub too_many: String,
    /// No hit: `{plate}`
    pub not_found: String,
    /// Store unreachable without a usable cache
    pub failed: String,
    /// Confirmation of an ordinal choice: `{ordinal}`, `{plate}`, `{household}`, `{note}`
    pub selected: String,
    /// Reply that was neither an ordinal nor a plate
    pub selection_unclear: String,
    /// Community switched: `{community}`
    pub switched: String,
    /// Spoken on a stop keyword
    pub farewell: String,
    /// Capture cannot work at all (permission, language pack)
    pub capture_fatal: String,
    /// Status line naming the input route: `{route}`
    pub route_status: String,
    /// Name of the built-in route
    pub route_built_in: String,
    /// Name of the wireless headset route
    pub route_wireless: String,
    /// Status line echoing a final transcript: `{text}`
    pub heard: String,
    /// Spoken ordinal words used in enumerations, by position
    pub ordinal_words: Vec<String>,
    /// Read plates character by character ("A B C 1 2 3 4")
    pub spell_plates: bool,
}

impl Default for Phrasebook {
    fn default() -> Self {
        Self {
            exact: "車牌 {plate}，住戶是 {household}{note}".to_string(),
            approximate: "最接近的是車牌 {plate}，住戶是 {household}{note}，請再確認".to_string(),
            note: "，備註：{note}".to_string(),
            multiple_intro: "找到 {count} 筆相符：".to_string(),
            multiple_item: "第{ordinal}，{plate}，{household}".to_string(),
            multiple_separator: "；".to_string(),
            multiple_prompt: "。請說第幾個".to_string(),
            too_many: "符合 {plate} 的車牌有 {count} 筆，請再多說幾碼".to_string(),
            not_found: "查無車牌 {plate}".to_string(),
            failed: "目前無法連線查詢，請稍後再試".to_string(),
            selected: "第{ordinal}筆，車牌 {plate}，住戶是 {household}{note}".to_string(),
            selection_unclear: "沒有聽懂您的選擇，請重新說車牌".to_string(),
            switched: "已切換至 {community}".to_string(),
            farewell: "好的，已為您結束查詢服務".to_string(),
            capture_fatal: "無法使用麥克風，語音查詢已停止".to_string(),
            route_status: "目前收音路徑：{route}".to_string(),
            route_built_in: "手機內建麥克風".to_string(),
            route_wireless: "藍牙耳機".to_string(),
            heard: "你說：{text}".to_string(),
            ordinal_words: vec!["一".to_string(), "二".to_string(), "三".to_string()],
            spell_plates: true,
        }
    }
}

impl Phrasebook {
    /// Reply for a resolver outcome
    #[must_use]
    pub fn outcome(&self, outcome: &Outcome, key: &PlateKey) -> String {
        match outcome {
            Outcome::SingleExact(candidate) => self.describe(&self.exact, candidate, 0),
            Outcome::SingleFuzzy(candidate) => self.describe(&self.approximate, candidate, 0),
            Outcome::MultipleFuzzy(candidates) => self.enumerate(candidates),
            Outcome::TooManyFuzzy(count) => fill(
                &self.too_many,
                &[("count", &count.to_string()), ("plate", &self.plate(key.as_str()))],
            ),
            Outcome::NotFound => fill(&self.not_found, &[("plate", &self.plate(key.as_str()))]),
            Outcome::Failed(_) => self.failed.clone(),
        }
    }

    /// Confirmation after the user picked `candidate` at `index`
    #[must_use]
    pub fn selected(&self, index: usize, candidate: &Candidate) -> String {
        self.describe(&self.selected, candidate, index)
    }

    /// Announcement after switching communities
    #[must_use]
    pub fn switched(&self, community: &str) -> String {
        fill(&self.switched, &[("community", community)])
    }

    /// Status line for the active input route
    #[must_use]
    pub fn route(&self, kind: RouteKind) -> String {
        let name = match kind {
            RouteKind::BuiltIn => &self.route_built_in,
            RouteKind::WirelessSco => &self.route_wireless,
        };
        fill(&self.route_status, &[("route", name)])
    }

    /// Status line echoing what was heard
    #[must_use]
    pub fn heard(&self, text: &str) -> String {
        fill(&self.heard, &[("text", text)])
    }

    fn enumerate(&self, candidates: &[Candidate]) -> String {
        let items: Vec<String> = candidates
            .iter()
            .enumerate()
            .map(|(i, c)| {
                fill(
                    &self.multiple_item,
                    &[
                        ("ordinal", &self.ordinal(i)),
                        ("plate", &self.plate(&c.external_id)),
                        ("household", &c.household_label),
                    ],
                )
            })
            .collect();

        format!(
            "{}{}{}",
            fill(&self.multiple_intro, &[("count", &candidates.len().to_string())]),
            items.join(&self.multiple_separator),
            self.multiple_prompt
        )
    }

    fn describe(&self, template: &str, candidate: &Candidate, index: usize) -> String {
        let note = if candidate.note.trim().is_empty() {
            String::new()
        } else {
            fill(&self.note, &[("note", candidate.note.trim())])
        };

        fill(
            template,
            &[
                ("ordinal", &self.ordinal(index)),
                ("plate", &self.plate(&candidate.external_id)),
                ("household", &candidate.household_label),
                ("note", &note),
            ],
        )
    }

    fn ordinal(&self, index: usize) -> String {
        self.ordinal_words
            .get(index)
            .cloned()
            .unwrap_or_else(|| (index + 1).to_string())
    }

    fn plate(&self, plate: &str) -> String {
        if self.spell_plates {
            plate
                .chars()
                .map(String::from)
                .collect::<Vec<_>>()
                .join(" ")
        } else {
            plate.to_string()
        }
    }
}

/// Replace `{name}` placeholders
fn fill(template: &str, vars: &[(&str, &str)]) -> String {
    vars.iter().fold(template.to_string(), |text, (name, value)| {
        text.replace(&format!("{{{name}}}"), value)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalize::Normalizer;
    use crate::store::Origin;

    fn candidate(plate: &str, household: &str, note: &str) -> Candidate {
        Candidate {
            external_id: plate.to_string(),
            household_label: household.to_string(),
            note: note.to_string(),
            origin: Origin::Local,
        }
    }

    fn key(raw: &str) -> PlateKey {
        Normalizer::default().normalize(raw)
    }

    #[test]
    fn test_exact_with_note() {
        let phrases = Phrasebook::default();
        let text = phrases.outcome(
            &Outcome::SingleExact(candidate("AB12", "A棟 3樓", "訪客")),
            &key("AB12"),
        );
        assert_eq!(text, "車牌 A B 1 2，住戶是 A棟 3樓，備註：訪客");
    }

    #[test]
    fn test_exact_without_note() {
        let phrases = Phrasebook {
            spell_plates: false,
            ..Phrasebook::default()
        };
        let text = phrases.outcome(
            &Outcome::SingleExact(candidate("AB12", "A棟 3樓", "  ")),
            &key("AB12"),
        );
        assert_eq!(text, "車牌 AB12，住戶是 A棟 3樓");
    }

    #[test]
    fn test_enumeration() {
        let phrases = Phrasebook {
            spell_plates: false,
            ..Phrasebook::default()
        };
        let text = phrases.outcome(
            &Outcome::MultipleFuzzy(vec![
                candidate("AB8888", "A棟", ""),
                candidate("CD8888", "B棟", ""),
            ]),
            &key("8888"),
        );
        assert_eq!(text, "找到 2 筆相符：第一，AB8888，A棟；第二，CD8888，B棟。請說第幾個");
    }

    #[test]
    fn test_failed_differs_from_not_found() {
        let phrases = Phrasebook::default();
        let failed = phrases.outcome(&Outcome::Failed("offline".to_string()), &key("AB12"));
        let missing = phrases.outcome(&Outcome::NotFound, &key("AB12"));
        assert_ne!(failed, missing);
        assert!(missing.contains("A B 1 2"));
    }

    #[test]
    fn test_status_lines() {
        let phrases = Phrasebook::default();
        assert_eq!(phrases.route(RouteKind::WirelessSco), "目前收音路徑：藍牙耳機");
        assert_eq!(phrases.heard("ABC 1234"), "你說：ABC 1234");
        assert_eq!(phrases.switched("大陸豐蒔"), "已切換至 大陸豐蒔");
    }

    #[test]
    fn test_partial_override_from_toml() {
        let phrases: Phrasebook = toml::from_str(r#"not_found = "No plate {plate}""#).unwrap();
        assert_eq!(phrases.not_found, "No plate {plate}");
        assert_eq!(phrases.farewell, Phrasebook::default().farewell);
    }
}
