//! Slot keys address exactly one image field inside a card's quiz schema.
//!
//! The textual grammar (ASCII, case-sensitive) is:
//!
//! - `cards[i].imageUrl`                           -> `cards/i/main.webp`
//! - `cards[i].imageQuiz.options[k].imageUrl`      -> `cards/i/imageQuiz/options/k.webp`
//! - `cards[i].correlationQuiz.items[k].imageUrl`  -> `cards/i/correlation/items/k.webp`
//!
//! Keys are parsed once at the boundary into [`SlotKey`]; everything past the
//! handlers works with the parsed value and its canonical `Display` form.

use crate::errors::StagingError;
use serde::{Serialize, Serializer};
use std::{fmt, str::FromStr};

/// Longest raw slot key accepted before parsing is attempted.
pub const MAX_SLOT_KEY_LEN: usize = 200;

/// Image-quiz options per card.
pub const IMAGE_QUIZ_OPTIONS: u32 = 4;

/// Correlation-quiz items per card.
pub const CORRELATION_ITEMS: u32 = 3;

/// Image slots per card: main image + quiz options + correlation items.
pub const SLOTS_PER_CARD: usize = 1 + IMAGE_QUIZ_OPTIONS as usize + CORRELATION_ITEMS as usize;

/// Parsed slot key. The first index is always the card index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SlotKey {
    CardImage(u32),
    ImageQuizOption(u32, u32),
    CorrelationItem(u32, u32),
}

impl SlotKey {
    /// Parse a raw key, trimming surrounding whitespace first.
    pub fn parse(raw: &str) -> Result<Self, StagingError> {
        let trimmed = raw.trim();
        parse_slot(trimmed).ok_or_else(|| StagingError::InvalidSlotKey(truncate_for_error(trimmed)))
    }

    /// Index of the card this slot belongs to.
    pub fn card_index(&self) -> u32 {
        match *self {
            SlotKey::CardImage(card)
            | SlotKey::ImageQuizOption(card, _)
            | SlotKey::CorrelationItem(card, _) => card,
        }
    }

    /// Path of the slot's file relative to a theme directory, `/`-separated.
    pub fn relative_path(&self) -> String {
        match *self {
            SlotKey::CardImage(card) => format!("cards/{card}/main.webp"),
            SlotKey::ImageQuizOption(card, option) => {
                format!("cards/{card}/imageQuiz/options/{option}.webp")
            }
            SlotKey::CorrelationItem(card, item) => {
                format!("cards/{card}/correlation/items/{item}.webp")
            }
        }
    }

    /// The eight well-known slots of one card, main image first.
    pub fn card_slots(card: u32) -> Vec<SlotKey> {
        let mut slots = Vec::with_capacity(SLOTS_PER_CARD);
        slots.push(SlotKey::CardImage(card));
        slots.extend((0..IMAGE_QUIZ_OPTIONS).map(|k| SlotKey::ImageQuizOption(card, k)));
        slots.extend((0..CORRELATION_ITEMS).map(|k| SlotKey::CorrelationItem(card, k)));
        slots
    }
}

impl fmt::Display for SlotKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            SlotKey::CardImage(card) => write!(f, "cards[{card}].imageUrl"),
            SlotKey::ImageQuizOption(card, option) => {
                write!(f, "cards[{card}].imageQuiz.options[{option}].imageUrl")
            }
            SlotKey::CorrelationItem(card, item) => {
                write!(f, "cards[{card}].correlationQuiz.items[{item}].imageUrl")
            }
        }
    }
}

impl FromStr for SlotKey {
    type Err = StagingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SlotKey::parse(s)
    }
}

impl Serialize for SlotKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

fn parse_slot(raw: &str) -> Option<SlotKey> {
    if raw.is_empty() || raw.len() > MAX_SLOT_KEY_LEN || !raw.is_ascii() {
        return None;
    }

    let (card, rest) = take_index(raw.strip_prefix("cards")?)?;
    if rest == ".imageUrl" {
        return Some(SlotKey::CardImage(card));
    }

    if let Some(rest) = rest.strip_prefix(".imageQuiz.options") {
        let (option, tail) = take_index(rest)?;
        return (tail == ".imageUrl").then_some(SlotKey::ImageQuizOption(card, option));
    }

    if let Some(rest) = rest.strip_prefix(".correlationQuiz.items") {
        let (item, tail) = take_index(rest)?;
        return (tail == ".imageUrl").then_some(SlotKey::CorrelationItem(card, item));
    }

    None
}

/// Consume a `[digits]` group, returning the index and the remaining input.
fn take_index(input: &str) -> Option<(u32, &str)> {
    let inner = input.strip_prefix('[')?;
    let end = inner.find(']')?;
    let digits = &inner[..end];
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let value = digits.parse::<u32>().ok()?;
    Some((value, &inner[end + 1..]))
}

fn truncate_for_error(raw: &str) -> String {
    raw.chars().take(64).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_each_form_to_its_relative_path() {
        let cases = [
            ("cards[0].imageUrl", "cards/0/main.webp"),
            (
                "cards[3].imageQuiz.options[2].imageUrl",
                "cards/3/imageQuiz/options/2.webp",
            ),
            (
                "cards[11].correlationQuiz.items[1].imageUrl",
                "cards/11/correlation/items/1.webp",
            ),
        ];

        for (raw, expected) in cases {
            let slot = SlotKey::parse(raw).unwrap();
            assert_eq!(slot.relative_path(), expected, "slot {raw}");
            assert_eq!(slot.to_string(), raw);
        }
    }

    #[test]
    fn addressing_is_deterministic() {
        let raw = "cards[7].imageQuiz.options[3].imageUrl";
        let first = SlotKey::parse(raw).unwrap().relative_path();
        for _ in 0..10 {
            assert_eq!(SlotKey::parse(raw).unwrap().relative_path(), first);
        }
    }

    #[test]
    fn rejects_keys_outside_the_grammar() {
        let long = format!("cards[{}].imageUrl", "1".repeat(MAX_SLOT_KEY_LEN));
        let rejected = [
            "",
            "   ",
            "cards[].imageUrl",
            "cards[a].imageUrl",
            "cards[-1].imageUrl",
            "Cards[0].imageUrl",
            "cards[0].imageurl",
            "cards[0].imageUrl.extra",
            "cards[0]].imageUrl",
            "cards[0].imageQuiz.options.imageUrl",
            "cards[0].imageQuiz.options[1]",
            "cards[0].correlationQuiz.options[1].imageUrl",
            "cards[0].imageQuiz.items[1].imageUrl",
            "cards[0].textQuiz.options[0].imageUrl",
            "cards[99999999999].imageUrl",
            "cards[٣].imageUrl",
            "../cards[0].imageUrl",
            long.as_str(),
        ];

        for raw in rejected {
            assert!(
                matches!(SlotKey::parse(raw), Err(StagingError::InvalidSlotKey(_))),
                "expected rejection for {raw:?}"
            );
        }
    }

    #[test]
    fn grammar_does_not_bound_indices() {
        let slot = SlotKey::parse("cards[2].imageQuiz.options[9].imageUrl").unwrap();
        assert_eq!(slot, SlotKey::ImageQuizOption(2, 9));
        assert_eq!(slot.relative_path(), "cards/2/imageQuiz/options/9.webp");
    }

    #[test]
    fn leading_zeros_collapse_to_canonical_form() {
        let slot = SlotKey::parse(" cards[007].imageUrl ").unwrap();
        assert_eq!(slot, SlotKey::CardImage(7));
        assert_eq!(slot.to_string(), "cards[7].imageUrl");
    }

    #[test]
    fn card_slots_enumerates_eight_distinct_keys() {
        let slots = SlotKey::card_slots(4);
        assert_eq!(slots.len(), SLOTS_PER_CARD);
        assert_eq!(SLOTS_PER_CARD, 8);
        assert!(slots.iter().all(|s| s.card_index() == 4));

        let mut unique = slots.clone();
        unique.sort();
        unique.dedup();
        assert_eq!(unique.len(), 8);
        assert_eq!(slots[0], SlotKey::CardImage(4));
        assert_eq!(slots[7], SlotKey::CorrelationItem(4, 2));
    }
}
