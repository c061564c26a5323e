//! Theme payloads submitted by authoring clients, and the persisted theme row.

use crate::{
    errors::{FieldErrors, StagingError, StagingResult},
    models::slot::SlotKey,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, types::Json};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Cards a theme needs before it can be played.
pub const READY_TO_PLAY_CARDS: usize = 12;

/// Full theme document, as sent on create and update commits.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ThemePayload {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub resume: Option<String>,
    #[serde(default)]
    pub recommendation: Option<String>,
    /// Cover image: a `data:image/...;base64,` URL or an already stored URL.
    #[serde(default)]
    pub image: String,
    #[serde(default)]
    pub upload_session_id: Option<Uuid>,
    #[serde(default)]
    pub cards: Vec<CardPayload>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CardPayload {
    #[serde(default)]
    pub order_index: i64,
    #[serde(default)]
    pub year: i32,
    #[serde(default)]
    pub era: String,
    #[serde(default)]
    pub caption: String,
    #[serde(default)]
    pub image_url: String,
    #[serde(default)]
    pub image_quiz: Option<ImageQuizPayload>,
    #[serde(default)]
    pub text_quiz: Option<TextQuizPayload>,
    #[serde(default)]
    pub true_false_quiz: Option<TrueFalseQuizPayload>,
    #[serde(default)]
    pub correlation_quiz: Option<CorrelationQuizPayload>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ImageQuizPayload {
    #[serde(default)]
    pub question: String,
    #[serde(default)]
    pub options: Vec<ImageOptionPayload>,
    #[serde(default)]
    pub correct_index: i32,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ImageOptionPayload {
    #[serde(default)]
    pub image_url: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TextQuizPayload {
    #[serde(default)]
    pub question: String,
    #[serde(default)]
    pub options: Vec<TextOptionPayload>,
    #[serde(default)]
    pub correct_index: i32,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TextOptionPayload {
    #[serde(default)]
    pub text: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TrueFalseQuizPayload {
    #[serde(default)]
    pub statement: String,
    #[serde(default)]
    pub answer: bool,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CorrelationQuizPayload {
    #[serde(default)]
    pub items: Vec<CorrelationItemPayload>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CorrelationItemPayload {
    #[serde(default)]
    pub image_url: String,
    #[serde(default)]
    pub text: String,
}

impl CardPayload {
    /// The card's index as used in slot keys, if it has one.
    pub fn slot_index(&self) -> Option<u32> {
        u32::try_from(self.order_index).ok()
    }
}

impl ThemePayload {
    /// Map every image field of every card to its declared URL.
    ///
    /// Built from the payload's shape alone. A card whose `order_index` is not a
    /// valid slot index fails the whole map, so no card escapes slot checks.
    pub fn expected_slots(&self) -> StagingResult<BTreeMap<SlotKey, String>> {
        let mut slots = BTreeMap::new();
        let mut errors = FieldErrors::new();

        for (position, card) in self.cards.iter().enumerate() {
            let Some(i) = card.slot_index() else {
                errors.insert(
                    format!("cards[{position}].orderIndex"),
                    format!("orderIndex must be between 0 and {}", u32::MAX),
                );
                continue;
            };

            slots.insert(SlotKey::CardImage(i), card.image_url.clone());

            if let Some(quiz) = &card.image_quiz {
                for (k, option) in (0u32..).zip(&quiz.options) {
                    slots.insert(SlotKey::ImageQuizOption(i, k), option.image_url.clone());
                }
            }

            if let Some(quiz) = &card.correlation_quiz {
                for (k, item) in (0u32..).zip(&quiz.items) {
                    slots.insert(SlotKey::CorrelationItem(i, k), item.image_url.clone());
                }
            }
        }

        if errors.is_empty() {
            Ok(slots)
        } else {
            Err(StagingError::Validation(errors))
        }
    }

    /// Replace the URL of one image field. Returns false if the slot has no field.
    pub fn set_slot_url(&mut self, slot: SlotKey, url: String) -> bool {
        let Some(card) = self
            .cards
            .iter_mut()
            .find(|card| card.order_index == i64::from(slot.card_index()))
        else {
            return false;
        };

        let target = match slot {
            SlotKey::CardImage(_) => Some(&mut card.image_url),
            SlotKey::ImageQuizOption(_, k) => card
                .image_quiz
                .as_mut()
                .and_then(|quiz| quiz.options.get_mut(k as usize))
                .map(|option| &mut option.image_url),
            SlotKey::CorrelationItem(_, k) => card
                .correlation_quiz
                .as_mut()
                .and_then(|quiz| quiz.items.get_mut(k as usize))
                .map(|item| &mut item.image_url),
        };

        match target {
            Some(field) => {
                *field = url;
                true
            }
            None => false,
        }
    }

    pub fn ready_to_play(&self) -> bool {
        self.cards.len() >= READY_TO_PLAY_CARDS
    }

    /// Trim free-text fields and order cards by index, as stored.
    pub fn into_normalized(mut self) -> Self {
        self.name = self.name.trim().to_string();
        self.image = self.image.trim().to_string();
        self.resume = self.resume.map(|s| s.trim().to_string());
        self.recommendation = self.recommendation.map(|s| s.trim().to_string());
        for card in &mut self.cards {
            card.caption = card.caption.trim().to_string();
            card.era = card.era.trim().to_ascii_uppercase();
            card.image_url = card.image_url.trim().to_string();
        }
        self.cards.sort_by_key(|card| card.order_index);
        self
    }
}

/// Persisted theme. Cards are stored as one JSON document.
#[derive(Serialize, Clone, FromRow, Debug)]
#[serde(rename_all = "camelCase")]
pub struct Theme {
    pub id: Uuid,
    pub creator_user_id: Uuid,
    pub name: String,
    pub resume: Option<String>,
    pub recommendation: Option<String>,
    pub image: String,
    pub ready_to_play: bool,
    pub cards: Json<Vec<CardPayload>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One row of a creator's theme listing.
#[derive(Serialize, Clone, FromRow, Debug)]
#[serde(rename_all = "camelCase")]
pub struct ThemeSummary {
    pub id: Uuid,
    pub name: String,
    pub image: String,
    pub ready_to_play: bool,
    pub created_at: DateTime<Utc>,
    pub card_count: i64,
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    /// A fully populated card whose image URLs live under `{base}/themes/{dir}/`.
    pub fn card(order_index: i64, base: &str, dir: Uuid) -> CardPayload {
        let slot_url = |slot: SlotKey| format!("{base}/themes/{dir}/{}", slot.relative_path());
        let i = order_index as u32;

        CardPayload {
            order_index,
            year: 1500,
            era: "AD".into(),
            caption: format!("Event {order_index}"),
            image_url: slot_url(SlotKey::CardImage(i)),
            image_quiz: Some(ImageQuizPayload {
                question: "Which one?".into(),
                options: (0..4)
                    .map(|k| ImageOptionPayload {
                        image_url: slot_url(SlotKey::ImageQuizOption(i, k)),
                    })
                    .collect(),
                correct_index: 1,
            }),
            text_quiz: Some(TextQuizPayload {
                question: "Which text?".into(),
                options: (0..4)
                    .map(|k| TextOptionPayload {
                        text: format!("option {k}"),
                    })
                    .collect(),
                correct_index: 2,
            }),
            true_false_quiz: Some(TrueFalseQuizPayload {
                statement: "It happened.".into(),
                answer: true,
            }),
            correlation_quiz: Some(CorrelationQuizPayload {
                items: (0..3)
                    .map(|k| CorrelationItemPayload {
                        image_url: slot_url(SlotKey::CorrelationItem(i, k)),
                        text: format!("item {k}"),
                    })
                    .collect(),
            }),
        }
    }

    pub fn theme(cards: usize, base: &str, dir: Uuid) -> ThemePayload {
        ThemePayload {
            name: "Renaissance".into(),
            resume: Some("Art and science".into()),
            recommendation: Some("Ages 10+".into()),
            image: "data:image/png;base64,AAAA".into(),
            upload_session_id: Some(dir),
            cards: (0..cards as i64).map(|i| card(i, base, dir)).collect(),
        }
    }
}
