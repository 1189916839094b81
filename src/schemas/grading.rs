use serde::{Deserialize, Serialize};

pub const STATEMENT_OF_ASSURANCES_CHECK: &str = "Statement of Assurances and Academic Integrity";
pub const REQUIRED_OUTLINE_CHECK: &str = "Written entry follows the required outline";
pub const PAGE_COUNT_CHECK: &str = "Page count within 20 pages (5-pt penalty per extra page)";

pub const STATEMENT_OF_ASSURANCES_POINTS: u32 = 15;
pub const REQUIRED_OUTLINE_POINTS: u32 = 5;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GradingResult {
    pub event_name: String,
    pub total_possible: u32,
    pub total_awarded: u32,
    pub sections: Vec<SectionScore>,
    pub overall_feedback: String,
    #[serde(default)]
    pub penalties: Vec<Penalty>,
    #[serde(default)]
    pub was_truncated: bool,
    #[serde(default)]
    pub truncated_at_tokens: Option<u32>,
    #[serde(default)]
    pub graded_by: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SectionScore {
    pub name: String,
    pub max_points: u32,
    pub awarded_points: u32,
    pub feedback: String,
}

/// Advisory compliance flag. Never contributes to `total_awarded`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Penalty {
    pub description: String,
    pub penalty_points: u32,
    pub status: PenaltyStatus,
    pub note: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PenaltyStatus {
    Flagged,
    Clear,
    ManualCheck,
}

impl GradingResult {
    /// Widened so model-supplied scores cannot overflow the sum.
    pub fn sections_total(&self) -> u64 {
        self.sections.iter().map(|section| u64::from(section.awarded_points)).sum()
    }

    /// Score invariants every completed result must satisfy.
    pub fn is_consistent(&self) -> bool {
        u64::from(self.total_awarded) == self.sections_total()
            && self.sections.iter().all(|section| section.awarded_points <= section.max_points)
    }
}

impl Penalty {
    pub fn matches(&self, description: &str) -> bool {
        self.description.trim().eq_ignore_ascii_case(description.trim())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn penalty_status_uses_snake_case() {
        let penalty = Penalty {
            description: STATEMENT_OF_ASSURANCES_CHECK.to_string(),
            penalty_points: STATEMENT_OF_ASSURANCES_POINTS,
            status: PenaltyStatus::ManualCheck,
            note: "verify signatures".to_string(),
        };
        let encoded = serde_json::to_value(&penalty).expect("encode");
        assert_eq!(encoded["status"], "manual_check");
        assert!(penalty.matches("statement of assurances and academic integrity "));
    }

    #[test]
    fn consistency_checks_totals_and_bounds() {
        let mut result = GradingResult {
            event_name: "FOR".to_string(),
            total_possible: 20,
            total_awarded: 12,
            sections: vec![
                SectionScore {
                    name: "A".to_string(),
                    max_points: 10,
                    awarded_points: 7,
                    feedback: String::new(),
                },
                SectionScore {
                    name: "B".to_string(),
                    max_points: 10,
                    awarded_points: 5,
                    feedback: String::new(),
                },
            ],
            overall_feedback: String::new(),
            penalties: Vec::new(),
            was_truncated: false,
            truncated_at_tokens: None,
            graded_by: None,
        };
        assert!(result.is_consistent());

        result.sections[1].awarded_points = 11;
        result.total_awarded = 18;
        assert!(!result.is_consistent());
    }
}
