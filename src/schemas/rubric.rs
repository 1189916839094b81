use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Scored criteria for one competitive event.
///
/// Records are written by the external authoring tool and are read-only for
/// the pipeline. `validate` runs on every load and every put.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rubric {
    #[serde(alias = "event")]
    pub event_code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_description: Option<String>,
    pub total_points: u32,
    pub sections: Vec<RubricSection>,
    #[serde(default)]
    pub required_outline: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RubricSection {
    pub name: String,
    pub max_points: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, with = "scoring_guide")]
    pub scoring_guide: Vec<ScoringTier>,
}

/// One point range of a section, e.g. `"9-10" => "Exceeds expectations"`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScoringTier {
    pub tier: String,
    pub description: String,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RubricError {
    #[error("rubric event code is empty")]
    EmptyEventCode,
    #[error("rubric {0} has no sections")]
    NoSections(String),
    #[error("rubric {event_code} declares {declared} total points but its sections sum to {computed}")]
    PointsMismatch { event_code: String, declared: u32, computed: u64 },
    #[error("rubric {event_code} has a section with an empty name")]
    EmptySectionName { event_code: String },
    #[error("rubric {event_code} lists section {section:?} more than once")]
    DuplicateSection { event_code: String, section: String },
}

impl Rubric {
    pub fn validate(&self) -> Result<(), RubricError> {
        if self.event_code.trim().is_empty() {
            return Err(RubricError::EmptyEventCode);
        }
        if self.sections.is_empty() {
            return Err(RubricError::NoSections(self.event_code.clone()));
        }

        let mut seen = HashSet::new();
        for section in &self.sections {
            let name = section.name.trim();
            if name.is_empty() {
                return Err(RubricError::EmptySectionName { event_code: self.event_code.clone() });
            }
            if !seen.insert(name.to_lowercase()) {
                return Err(RubricError::DuplicateSection {
                    event_code: self.event_code.clone(),
                    section: name.to_string(),
                });
            }
        }

        let computed = self.sections_total();
        if computed != u64::from(self.total_points) {
            return Err(RubricError::PointsMismatch {
                event_code: self.event_code.clone(),
                declared: self.total_points,
                computed,
            });
        }

        Ok(())
    }

    pub fn sections_total(&self) -> u64 {
        self.sections.iter().map(|section| u64::from(section.max_points)).sum()
    }

    pub fn section(&self, name: &str) -> Option<&RubricSection> {
        let wanted = name.trim();
        self.sections.iter().find(|section| section.name.trim().eq_ignore_ascii_case(wanted))
    }

    /// Display name used on results, e.g. `Finance Operations Research (FOR)`.
    pub fn display_name(&self) -> String {
        match self.event_name.as_deref().map(str::trim).filter(|name| !name.is_empty()) {
            Some(name) => format!("{name} ({})", self.event_code),
            None => self.event_code.clone(),
        }
    }

    /// Returns a copy with the event code normalized to the store key format.
    pub fn normalized(mut self) -> Self {
        self.event_code = normalize_event_code(&self.event_code);
        self
    }
}

pub fn normalize_event_code(code: &str) -> String {
    code.trim().to_ascii_uppercase()
}

/// Scoring guides are authored as JSON objects; tier order is significant
/// and is kept as written (serde_json is built with `preserve_order`).
mod scoring_guide {
    use serde::de::Deserializer;
    use serde::ser::{SerializeMap, Serializer};
    use serde::Deserialize;
    use serde_json::{Map, Value};

    use super::ScoringTier;

    pub(super) fn serialize<S>(tiers: &[ScoringTier], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut map = serializer.serialize_map(Some(tiers.len()))?;
        for tier in tiers {
            map.serialize_entry(&tier.tier, &tier.description)?;
        }
        map.end()
    }

    pub(super) fn deserialize<'de, D>(deserializer: D) -> Result<Vec<ScoringTier>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = Map::<String, Value>::deserialize(deserializer)?;
        Ok(raw
            .into_iter()
            .map(|(tier, value)| {
                let description = match value {
                    Value::String(text) => text,
                    other => other.to_string(),
                };
                ScoringTier { tier, description }
            })
            .collect())
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::{Rubric, RubricSection, ScoringTier};

    pub(crate) fn section(name: &str, max_points: u32) -> RubricSection {
        RubricSection {
            name: name.to_string(),
            max_points,
            description: None,
            scoring_guide: vec![
                ScoringTier {
                    tier: format!("0-{}", max_points / 2),
                    description: "Below expectations".to_string(),
                },
                ScoringTier {
                    tier: format!("{}-{}", max_points / 2 + 1, max_points),
                    description: "Meets expectations".to_string(),
                },
            ],
        }
    }

    pub(crate) fn rubric(event_code: &str) -> Rubric {
        Rubric {
            event_code: event_code.to_string(),
            event_name: Some("Finance Operations Research".to_string()),
            event_description: Some("A research study of a specific financial company.".to_string()),
            total_points: 100,
            sections: vec![
                section("Executive Summary", 10),
                section("Research Methods", 30),
                section("Findings and Conclusions", 40),
                section("Appearance and Word Usage", 20),
            ],
            required_outline: vec![
                "Executive Summary".to_string(),
                "Introduction".to_string(),
                "Research Methods Used in the Study".to_string(),
                "Findings and Conclusions of the Study".to_string(),
                "Bibliography".to_string(),
            ],
        }
    }
}
