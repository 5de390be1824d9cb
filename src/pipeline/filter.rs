//! Final filter: keep choice questions and number them.
//!
//! Runs once over the merged output of every document in a run. It is the
//! only stage that sees questions from more than one document, so `order`
//! is assigned here and nowhere else.

use crate::question::Question;
use tracing::debug;

/// Counts reported by [`finalize`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FilterCounts {
    /// Records dropped because their type is not single/multiple.
    pub removed: usize,
    /// Survivors whose missing explanation was set to `""`.
    pub explanations_backfilled: usize,
}

/// Drop non-choice questions, backfill explanations, assign `order = 0..K-1`.
pub fn finalize(questions: Vec<Question>) -> (Vec<Question>, FilterCounts) {
    let total = questions.len();
    let mut counts = FilterCounts::default();

    let kept: Vec<Question> = questions
        .into_iter()
        .filter(|q| q.question_type.is_choice())
        .enumerate()
        .map(|(order, mut q)| {
            if q.explanation.is_none() {
                q.explanation = Some(String::new());
                counts.explanations_backfilled += 1;
            }
            q.order = order;
            q
        })
        .collect();

    counts.removed = total - kept.len();
    debug!(
        "Final filter: kept {} of {} ({} explanations backfilled)",
        kept.len(),
        total,
        counts.explanations_backfilled
    );
    (kept, counts)
}
