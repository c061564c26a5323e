//! Shape rules for theme payloads, checked before any slot or file work.

use crate::{
    errors::FieldErrors,
    models::{
        slot::{CORRELATION_ITEMS, IMAGE_QUIZ_OPTIONS},
        theme::{CardPayload, ThemePayload},
    },
};
use std::collections::BTreeMap;

const MAX_THEME_NAME: usize = 50;
const MAX_RESUME: usize = 100;
const MAX_RECOMMENDATION: usize = 50;
const MAX_QUIZ_QUESTION: usize = 70;
const MAX_OPTION_TEXT: usize = 150;
const MAX_STATEMENT: usize = 200;
const TEXT_QUIZ_OPTIONS: usize = 4;

/// Which commit is being validated; they differ only in the cover rules.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CommitKind {
    Create,
    Update,
}

/// Collect every shape error of `payload`, keyed by field path.
pub fn validate(payload: &ThemePayload, kind: CommitKind) -> FieldErrors {
    let mut errors = FieldErrors::new();

    required_text(&mut errors, "theme.name", &payload.name, MAX_THEME_NAME);
    required_text(
        &mut errors,
        "theme.resume",
        payload.resume.as_deref().unwrap_or_default(),
        MAX_RESUME,
    );
    required_text(
        &mut errors,
        "theme.recommendation",
        payload.recommendation.as_deref().unwrap_or_default(),
        MAX_RECOMMENDATION,
    );

    let image = payload.image.trim();
    if image.is_empty() {
        errors.insert("theme.image".into(), "theme image is required".into());
    } else {
        match kind {
            CommitKind::Create if !is_data_url(image) => {
                errors.insert(
                    "theme.image".into(),
                    "theme image must be a base64 data url on create".into(),
                );
            }
            CommitKind::Update if !is_data_url(image) && !is_stored_url(image) => {
                errors.insert(
                    "theme.image".into(),
                    "theme image must be a base64 data url or a url".into(),
                );
            }
            _ => {}
        }
    }

    if kind == CommitKind::Create && payload.upload_session_id.is_none_or(|id| id.is_nil()) {
        errors.insert(
            "theme.uploadSessionId".into(),
            "an upload session is required to create a theme".into(),
        );
    }

    let mut seen = BTreeMap::<i64, usize>::new();
    for card in &payload.cards {
        *seen.entry(card.order_index).or_default() += 1;
    }
    for (order_index, _) in seen.iter().filter(|(_, count)| **count > 1) {
        errors.insert(
            format!("cards.orderIndex[{order_index}]"),
            "duplicate orderIndex".into(),
        );
    }

    for (i, card) in payload.cards.iter().enumerate() {
        validate_card(&mut errors, &format!("cards[{i}]"), card);
    }

    errors
}

fn validate_card(errors: &mut FieldErrors, key: &str, card: &CardPayload) {
    if card.order_index < 0 {
        errors.insert(format!("{key}.orderIndex"), "orderIndex cannot be negative".into());
    } else if card.slot_index().is_none() {
        errors.insert(
            format!("{key}.orderIndex"),
            format!("orderIndex cannot exceed {}", u32::MAX),
        );
    }
    if card.year <= 0 {
        errors.insert(format!("{key}.year"), "year must be greater than 0".into());
    }
    match card.era.trim() {
        "" => {
            errors.insert(format!("{key}.era"), "era is required".into());
        }
        era if era.eq_ignore_ascii_case("BC") || era.eq_ignore_ascii_case("AD") => {}
        _ => {
            errors.insert(format!("{key}.era"), "era must be BC or AD".into());
        }
    }
    if card.caption.trim().is_empty() {
        errors.insert(format!("{key}.caption"), "caption is required".into());
    }
    image_link(errors, format!("{key}.imageUrl"), &card.image_url);

    match &card.image_quiz {
        None => {
            errors.insert(format!("{key}.imageQuiz"), "imageQuiz is required".into());
        }
        Some(quiz) => {
            required_text(
                errors,
                &format!("{key}.imageQuiz.question"),
                &quiz.question,
                MAX_QUIZ_QUESTION,
            );
            if quiz.options.len() != IMAGE_QUIZ_OPTIONS as usize {
                errors.insert(
                    format!("{key}.imageQuiz.options"),
                    format!("imageQuiz needs {IMAGE_QUIZ_OPTIONS} options"),
                );
            } else {
                for (j, option) in quiz.options.iter().enumerate() {
                    image_link(
                        errors,
                        format!("{key}.imageQuiz.options[{j}].imageUrl"),
                        &option.image_url,
                    );
                }
            }
            if !(0..4).contains(&quiz.correct_index) {
                errors.insert(
                    format!("{key}.imageQuiz.correctIndex"),
                    "correctIndex must be between 0 and 3".into(),
                );
            }
        }
    }

    match &card.text_quiz {
        None => {
            errors.insert(format!("{key}.textQuiz"), "textQuiz is required".into());
        }
        Some(quiz) => {
            required_text(
                errors,
                &format!("{key}.textQuiz.question"),
                &quiz.question,
                MAX_QUIZ_QUESTION,
            );
            if quiz.options.len() != TEXT_QUIZ_OPTIONS {
                errors.insert(
                    format!("{key}.textQuiz.options"),
                    format!("textQuiz needs {TEXT_QUIZ_OPTIONS} options"),
                );
            } else {
                for (j, option) in quiz.options.iter().enumerate() {
                    required_text(
                        errors,
                        &format!("{key}.textQuiz.options[{j}].text"),
                        &option.text,
                        MAX_OPTION_TEXT,
                    );
                }
            }
            if !(0..4).contains(&quiz.correct_index) {
                errors.insert(
                    format!("{key}.textQuiz.correctIndex"),
                    "correctIndex must be between 0 and 3".into(),
                );
            }
        }
    }

    match &card.true_false_quiz {
        None => {
            errors.insert(
                format!("{key}.trueFalseQuiz"),
                "trueFalseQuiz is required".into(),
            );
        }
        Some(quiz) => required_text(
            errors,
            &format!("{key}.trueFalseQuiz.statement"),
            &quiz.statement,
            MAX_STATEMENT,
        ),
    }

    match &card.correlation_quiz {
        None => {
            errors.insert(
                format!("{key}.correlationQuiz"),
                "correlationQuiz is required".into(),
            );
        }
        Some(quiz) if quiz.items.len() != CORRELATION_ITEMS as usize => {
            errors.insert(
                format!("{key}.correlationQuiz.items"),
                format!("correlationQuiz needs {CORRELATION_ITEMS} items"),
            );
        }
        Some(quiz) => {
            for (j, item) in quiz.items.iter().enumerate() {
                required_text(
                    errors,
                    &format!("{key}.correlationQuiz.items[{j}].text"),
                    &item.text,
                    MAX_OPTION_TEXT,
                );
                image_link(
                    errors,
                    format!("{key}.correlationQuiz.items[{j}].imageUrl"),
                    &item.image_url,
                );
            }
        }
    }
}

fn required_text(errors: &mut FieldErrors, key: &str, value: &str, max: usize) {
    let value = value.trim();
    if value.is_empty() {
        errors.insert(key.to_string(), "is required".into());
    } else if value.chars().count() > max {
        errors.insert(key.to_string(), format!("cannot exceed {max} characters"));
    }
}

/// Card images are always links to uploaded files, never inline data.
fn image_link(errors: &mut FieldErrors, key: String, value: &str) {
    if value.trim().is_empty() {
        errors.insert(key, "image is required".into());
    } else if is_data_url(value) {
        errors.insert(key, "image must be a url, not base64 data".into());
    }
}

/// `data:image/...` (case-insensitive, leading whitespace ignored).
pub fn is_data_url(value: &str) -> bool {
    value
        .trim_start()
        .get(..11)
        .is_some_and(|prefix| prefix.eq_ignore_ascii_case("data:image/"))
}

/// An absolute http(s) URL or a rooted path, as handed out for stored files.
fn is_stored_url(value: &str) -> bool {
    let lower = value.trim().to_ascii_lowercase();
    let rest = lower
        .strip_prefix("https://")
        .or_else(|| lower.strip_prefix("http://"));
    match rest {
        Some(rest) => rest.split('/').next().is_some_and(|host| !host.is_empty()),
        None => lower.starts_with('/') && !lower.starts_with("//"),
    }
}
