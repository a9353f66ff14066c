// Progressive hint disclosure
use gradebox_common::types::HintView;

/// One hint unlocks per attempt, never more than exist
pub fn revealed_count(attempts: u32, total: usize) -> usize {
    (attempts as usize).min(total)
}

/// Build the hint list for a learner who has made `attempts` attempts.
/// `max_hints` caps how many entries are returned (locked ones included).
pub fn reveal(attempts: u32, hints: &[String], max_hints: Option<usize>) -> Vec<HintView> {
    let unlocked = revealed_count(attempts, hints.len());
    let limit = max_hints.unwrap_or(hints.len());

    hints
        .iter()
        .take(limit)
        .enumerate()
        .map(|(i, text)| {
            let index = i + 1;
            if i < unlocked {
                HintView {
                    index,
                    text: text.clone(),
                    unlocked: true,
                }
            } else {
                HintView {
                    index,
                    text: format!("Hint {} (unlocked after {} attempts)", index, index),
                    unlocked: false,
                }
            }
        })
        .collect()
}
