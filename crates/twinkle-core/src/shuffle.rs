//! Option shuffling.

use rand::seq::SliceRandom;
use rand::Rng;
use tracing::warn;

use crate::domain::Question;

/// Return a copy of `question` with option texts permuted across its option
/// keys and the correct label re-pointed at the key now holding the original
/// correct text.
///
/// The key set is unchanged. A question whose correct label names no present
/// option is returned unchanged with a warning.
pub fn shuffle_options<R: Rng + ?Sized>(question: &Question, rng: &mut R) -> Question {
    let keys = question.option_keys();
    let Some(correct) = question.expected_label() else {
        warn!(question_id = question.id, "no correct label, options not shuffled");
        return question.clone();
    };
    let Some(correct_pos) = keys.iter().position(|k| *k == correct) else {
        warn!(
            question_id = question.id,
            correct = %correct,
            "correct label is not an option key, options not shuffled"
        );
        return question.clone();
    };

    // order[i] is the original position whose text moves to keys[i].
    let mut order: Vec<usize> = (0..keys.len()).collect();
    order.shuffle(rng);

    let texts: Vec<String> = keys
        .iter()
        .map(|k| question.option_text(k).unwrap_or_default().to_string())
        .collect();

    let mut shuffled = question.clone();
    for field in shuffled.fields.iter_mut() {
        if let Some(i) = keys.iter().position(|k| *k == field.key) {
            field.text = texts[order[i]].clone();
        }
    }
    let new_pos = order
        .iter()
        .position(|&orig| orig == correct_pos)
        .unwrap_or(correct_pos);
    shuffled.correct_label = Some(keys[new_pos].clone());
    shuffled
}
