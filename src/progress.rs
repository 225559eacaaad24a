//! Flashcard progress engine.
//!
//! Pure computation over already-fetched deck records; no I/O. A deck keeps
//! two views of study progress: the submitted index lists (`Progress`) and
//! the per-card denormalized fields. Updates store the submitted lists
//! verbatim (minus out-of-range indices) while recomputing the per-card
//! fields from them, so both views stay mutually consistent.

use std::collections::{BTreeMap, HashSet};

use serde_json::Value;

use crate::error::AppError;
use crate::models::{Card, CardState, CardStatus, Deck, Progress, ProgressCounts};

/// Client-submitted progress lists after validation.
#[derive(Debug, Clone, Default)]
pub struct ProgressUpdate {
    pub learned: Vec<usize>,
    pub mastered: Vec<usize>,
    pub unfamiliar: Vec<usize>,
}

/// Validates a submitted progress payload: it must be an object whose
/// `learned`/`mastered`/`unfamiliar` values, when present, are arrays of
/// card indices. Anything else is a validation error and no state changes.
pub fn parse_submitted(value: &Value) -> Result<ProgressUpdate, AppError> {
    let obj = value
        .as_object()
        .ok_or_else(|| AppError::Validation("progress must be an object".to_string()))?;

    let index_list = |key: &str| -> Result<Vec<usize>, AppError> {
        match obj.get(key) {
            None | Some(Value::Null) => Ok(Vec::new()),
            Some(Value::Array(items)) => items
                .iter()
                .map(|item| {
                    item.as_u64().map(|n| n as usize).ok_or_else(|| {
                        AppError::Validation(format!(
                            "progress.{key} must contain card indices"
                        ))
                    })
                })
                .collect(),
            Some(_) => Err(AppError::Validation(format!(
                "progress.{key} must be an array"
            ))),
        }
    };

    Ok(ProgressUpdate {
        learned: index_list("learned")?,
        mastered: index_list("mastered")?,
        unfamiliar: index_list("unfamiliar")?,
    })
}

/// Fresh progress for a deck whose card sequence was just created or
/// wholly replaced: every index unfamiliar, every card state zeroed.
/// This is a destructive reset; prior progress on the old sequence is
/// intentionally discarded.
pub fn initialize(card_count: usize) -> (Progress, BTreeMap<String, CardState>) {
    let progress = Progress {
        learned: Vec::new(),
        mastered: Vec::new(),
        unfamiliar: (0..card_count).collect(),
    };
    let states = (0..card_count)
        .map(|i| (i.to_string(), CardState::default()))
        .collect();
    (progress, states)
}

/// Applies a submitted update to the deck's cards in place and returns the
/// new persisted `Progress`, card-state map and aggregate counts.
///
/// Status resolution: mastered wins over learned when an index appears in
/// both lists; indices in neither resolve to unfamiliar. Indices at or
/// beyond the card count are dropped. Streak and last-answered come from
/// the submitted card states when present, defaulting to zero/none.
pub fn apply_update(
    cards: &mut [Card],
    submitted: &ProgressUpdate,
    submitted_states: &BTreeMap<String, CardState>,
) -> (Progress, BTreeMap<String, CardState>, ProgressCounts) {
    let total = cards.len();

    let in_range = |list: &[usize]| -> Vec<usize> {
        list.iter().copied().filter(|i| *i < total).collect()
    };
    let learned_list = in_range(&submitted.learned);
    let mastered_list = in_range(&submitted.mastered);
    let unfamiliar_list = in_range(&submitted.unfamiliar);

    let learned_set: HashSet<usize> = learned_list.iter().copied().collect();
    let mastered_set: HashSet<usize> = mastered_list.iter().copied().collect();

    let mut states = BTreeMap::new();
    for (i, card) in cards.iter_mut().enumerate() {
        let status = if mastered_set.contains(&i) {
            CardStatus::Mastered
        } else if learned_set.contains(&i) {
            CardStatus::Learned
        } else {
            CardStatus::Unfamiliar
        };

        let (streak, last_answered) = submitted_states
            .get(&i.to_string())
            .map(|s| (s.streak, s.last_answered))
            .unwrap_or((0, None));

        card.status = status;
        card.streak = streak;
        card.learned = status != CardStatus::Unfamiliar;
        card.mastered = status == CardStatus::Mastered;

        states.insert(
            i.to_string(),
            CardState {
                status,
                streak,
                last_answered,
            },
        );
    }

    // Persisted Progress is the submitted data, not a recomputation; the
    // per-card fields above are the derived parallel view.
    let progress = Progress {
        learned: learned_list,
        mastered: mastered_list,
        unfamiliar: unfamiliar_list,
    };
    let counts = counts(cards);

    (progress, states, counts)
}

/// Aggregate counts from the per-card denormalized fields. Unfamiliar is
/// derived by subtraction so the identity
/// `learned + mastered + unfamiliar == total` holds unconditionally.
pub fn counts(cards: &[Card]) -> ProgressCounts {
    let total = cards.len();
    let mastered = cards.iter().filter(|c| c.mastered).count();
    let learned = cards.iter().filter(|c| c.learned && !c.mastered).count();
    ProgressCounts {
        total,
        learned,
        mastered,
        unfamiliar: total - learned - mastered,
    }
}

/// Read-path view: syncs each card's denormalized fields from the stored
/// card states (cards missing a state keep their defaults) and attaches
/// aggregate counts to the deck.
pub fn attach_display_view(deck: &mut Deck) {
    for (i, card) in deck.cards.iter_mut().enumerate() {
        if let Some(state) = deck.card_states.get(&i.to_string()) {
            card.status = state.status;
            card.streak = state.streak;
            card.learned = state.status != CardStatus::Unfamiliar;
            card.mastered = state.status == CardStatus::Mastered;
        }
    }
    deck.progress_counts = Some(counts(&deck.cards));
}
