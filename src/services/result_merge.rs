use crate::schemas::grading::{GradingResult, Penalty, PenaltyStatus, PAGE_COUNT_CHECK};

const EXCLUDED_PAGES: usize = 3;
const CONTENT_PAGE_LIMIT: usize = 20;
const POINTS_PER_EXTRA_PAGE: u32 = 5;

/// Folds later-stage penalties into a graded result. A penalty whose
/// description matches an existing entry replaces it in place; anything new
/// is appended. Sections and totals are never touched.
pub fn merge(mut result: GradingResult, penalties: Vec<Penalty>) -> GradingResult {
    for penalty in penalties {
        match result.penalties.iter_mut().find(|existing| existing.matches(&penalty.description)) {
            Some(existing) => *existing = penalty,
            None => result.penalties.push(penalty),
        }
    }
    result
}

/// Title page, table of contents and statement of assurances do not count
/// toward the 20 content pages.
pub fn page_count_penalty(page_count: usize) -> Penalty {
    let content_pages = page_count.saturating_sub(EXCLUDED_PAGES);
    let base = format!(
        "Total pages: {page_count}. Excluded: title page, table of contents, statement of \
         assurances ({EXCLUDED_PAGES} pages). Content pages: {content_pages}"
    );

    if content_pages > CONTENT_PAGE_LIMIT {
        let over = content_pages - CONTENT_PAGE_LIMIT;
        Penalty {
            description: PAGE_COUNT_CHECK.to_string(),
            penalty_points: POINTS_PER_EXTRA_PAGE.saturating_mul(over as u32),
            status: PenaltyStatus::Flagged,
            note: format!("{base}, which is {over} page(s) over the {CONTENT_PAGE_LIMIT}-page limit."),
        }
    } else {
        Penalty {
            description: PAGE_COUNT_CHECK.to_string(),
            penalty_points: POINTS_PER_EXTRA_PAGE,
            status: PenaltyStatus::Clear,
            note: format!("{base}, within the {CONTENT_PAGE_LIMIT}-page limit."),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schemas::grading::{SectionScore, STATEMENT_OF_ASSURANCES_CHECK};

    fn penalty(description: &str, status: PenaltyStatus) -> Penalty {
        Penalty {
            description: description.to_string(),
            penalty_points: 15,
            status,
            note: String::new(),
        }
    }

    fn graded() -> GradingResult {
        GradingResult {
            event_name: "FOR".to_string(),
            total_possible: 10,
            total_awarded: 6,
            sections: vec![SectionScore {
                name: "Executive Summary".to_string(),
                max_points: 10,
                awarded_points: 6,
                feedback: "ok".to_string(),
            }],
            overall_feedback: "fine".to_string(),
            penalties: vec![
                penalty(STATEMENT_OF_ASSURANCES_CHECK, PenaltyStatus::ManualCheck),
                penalty("Written entry follows the required outline", PenaltyStatus::Clear),
            ],
            was_truncated: false,
            truncated_at_tokens: None,
            graded_by: None,
        }
    }

    #[test]
    fn matching_penalty_replaces_in_place() {
        let replacement =
            penalty("statement of assurances and academic integrity", PenaltyStatus::Flagged);
        let merged = merge(graded(), vec![replacement.clone()]);

        assert_eq!(merged.penalties.len(), 2);
        assert_eq!(merged.penalties[0], replacement);
    }

    #[test]
    fn new_penalties_are_appended_and_totals_untouched() {
        let before = graded();
        let merged = merge(before.clone(), vec![page_count_penalty(30)]);

        assert_eq!(merged.penalties.len(), 3);
        assert_eq!(merged.penalties[2].description, PAGE_COUNT_CHECK);
        assert_eq!(merged.total_awarded, before.total_awarded);
        assert_eq!(merged.total_possible, before.total_possible);
        assert_eq!(merged.sections, before.sections);
    }

    #[test]
    fn page_count_penalty_thresholds() {
        let within = page_count_penalty(23);
        assert_eq!(within.status, PenaltyStatus::Clear);
        assert_eq!(within.penalty_points, 5);

        let over = page_count_penalty(25);
        assert_eq!(over.status, PenaltyStatus::Flagged);
        assert_eq!(over.penalty_points, 10);
        assert!(over.note.contains("2 page(s) over"));

        assert_eq!(page_count_penalty(1).status, PenaltyStatus::Clear);
    }
}
