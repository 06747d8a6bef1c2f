//! Question content validation.
//!
//! Drafts arrive as loose JSON objects (authoring form fields, or a stored
//! row's decoded content). `validate` turns a draft into a typed
//! `QuestionContent` or names the exact field that is wrong. The messages are
//! shown to authors as-is.

use serde_json::{Map, Value};
use thiserror::Error;

use crate::domain::{
  FillBlank, JumbledSentence, MatchPair, MatchPairs, QuestionContent, QuestionType, Speaking, Story, StoredQuestion,
  TrueFalse,
};

/// Literal marker an author puts where the fill-in blank belongs.
pub const BLANK_MARKER: &str = "___";

pub const MIN_MATCH_PAIRS: usize = 2;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
  #[error("Unknown question type '{0}'.")]
  UnknownType(String),
  #[error("Question content must be an object.")]
  NotAnObject,
  #[error("Please include '___' in the question text for the blank space.")]
  MissingBlankMarker,
  #[error("Please provide the correct answer.")]
  MissingAnswer,
  #[error("Please enter a statement.")]
  MissingStatement,
  #[error("Please mark the statement as true or false.")]
  MissingTruth,
  #[error("Match pair {row} is missing its {side} side.")]
  IncompletePair { row: usize, side: &'static str },
  #[error("Please add at least 2 valid pairs (found {found}).")]
  TooFewPairs { found: usize },
  #[error("Please fill the {0} field.")]
  MissingStoryField(&'static str),
  #[error("Please enter the correct sentence.")]
  MissingSentence,
  #[error("Please enter the sentence to pronounce.")]
  MissingSpeakingText,
}

/// Validate a draft for the given question type.
pub fn validate(question_type: QuestionType, draft: &Value) -> Result<QuestionContent, ValidationError> {
  let fields = draft.as_object().ok_or(ValidationError::NotAnObject)?;
  match question_type {
    QuestionType::FillBlank => fill_blank(fields).map(QuestionContent::FillBlank),
    QuestionType::TrueFalse => true_false(fields).map(QuestionContent::TrueFalse),
    QuestionType::Match => match_pairs(fields).map(QuestionContent::Match),
    QuestionType::Story => story(fields).map(QuestionContent::Story),
    QuestionType::JumbledSentence => jumbled(fields).map(QuestionContent::JumbledSentence),
    QuestionType::Speaking => speaking(fields).map(QuestionContent::Speaking),
  }
}

/// Same as `validate`, with the tag still in its stored text form.
pub fn validate_tagged(question_type: &str, draft: &Value) -> Result<QuestionContent, ValidationError> {
  let qt = question_type
    .parse::<QuestionType>()
    .map_err(ValidationError::UnknownType)?;
  validate(qt, draft)
}

/// Play-time check of a stored row.
pub fn validate_stored(q: &StoredQuestion) -> Result<QuestionContent, ValidationError> {
  validate_tagged(&q.question_type, &q.content)
}

fn text<'a>(fields: &'a Map<String, Value>, key: &str) -> &'a str {
  fields.get(key).and_then(Value::as_str).unwrap_or("")
}

fn is_blank(s: &str) -> bool { s.trim().is_empty() }

fn fill_blank(fields: &Map<String, Value>) -> Result<FillBlank, ValidationError> {
  let text_v = text(fields, "text");
  if !text_v.contains(BLANK_MARKER) {
    return Err(ValidationError::MissingBlankMarker);
  }
  let answer = text(fields, "answer");
  if is_blank(answer) {
    return Err(ValidationError::MissingAnswer);
  }
  let options = fields
    .get("options")
    .and_then(Value::as_array)
    .map(|opts| {
      opts
        .iter()
        .filter_map(Value::as_str)
        .filter(|o| !is_blank(o))
        .map(str::to_string)
        .collect::<Vec<_>>()
    })
    .filter(|opts| !opts.is_empty());
  Ok(FillBlank { text: text_v.to_string(), answer: answer.to_string(), options })
}

fn true_false(fields: &Map<String, Value>) -> Result<TrueFalse, ValidationError> {
  let statement = text(fields, "statement");
  if is_blank(statement) {
    return Err(ValidationError::MissingStatement);
  }
  // Forms post the radio value as a string.
  let is_true = match fields.get("isTrue") {
    Some(Value::Bool(b)) => *b,
    Some(Value::String(s)) if s == "true" => true,
    Some(Value::String(s)) if s == "false" => false,
    _ => return Err(ValidationError::MissingTruth),
  };
  Ok(TrueFalse { statement: statement.to_string(), is_true })
}

fn match_pairs(fields: &Map<String, Value>) -> Result<MatchPairs, ValidationError> {
  let rows = fields.get("pairs").and_then(Value::as_array).map(Vec::as_slice).unwrap_or(&[]);
  let mut pairs = Vec::with_capacity(rows.len());
  for (i, row) in rows.iter().enumerate() {
    let (left, right) = match row.as_object() {
      Some(r) => (text(r, "left"), text(r, "right")),
      None => ("", ""),
    };
    match (is_blank(left), is_blank(right)) {
      // untouched form row
      (true, true) => continue,
      (false, true) => return Err(ValidationError::IncompletePair { row: i + 1, side: "right" }),
      (true, false) => return Err(ValidationError::IncompletePair { row: i + 1, side: "left" }),
      (false, false) => pairs.push(MatchPair { left: left.to_string(), right: right.to_string() }),
    }
  }
  if pairs.len() < MIN_MATCH_PAIRS {
    return Err(ValidationError::TooFewPairs { found: pairs.len() });
  }
  Ok(MatchPairs { pairs })
}

fn story(fields: &Map<String, Value>) -> Result<Story, ValidationError> {
  let mut out = [""; 3];
  for (slot, key) in out.iter_mut().zip(["story", "question", "answer"]) {
    let v = text(fields, key);
    if is_blank(v) {
      return Err(ValidationError::MissingStoryField(key));
    }
    *slot = v;
  }
  let [story, question, answer] = out;
  Ok(Story { story: story.to_string(), question: question.to_string(), answer: answer.to_string() })
}

fn jumbled(fields: &Map<String, Value>) -> Result<JumbledSentence, ValidationError> {
  let sentence = text(fields, "sentence");
  if sentence.split_whitespace().next().is_none() {
    return Err(ValidationError::MissingSentence);
  }
  Ok(JumbledSentence { sentence: sentence.to_string() })
}

fn speaking(fields: &Map<String, Value>) -> Result<Speaking, ValidationError> {
  let t = text(fields, "text");
  if is_blank(t) {
    return Err(ValidationError::MissingSpeakingText);
  }
  Ok(Speaking { text: t.to_string() })
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn fill_blank_requires_marker_then_answer() {
    let err = validate(QuestionType::FillBlank, &json!({"text": "Le chat dort.", "answer": "dort"})).unwrap_err();
    assert_eq!(err, ValidationError::MissingBlankMarker);
    assert!(err.to_string().contains("'___'"));

    let err = validate(QuestionType::FillBlank, &json!({"text": "Le chat ___.", "answer": "  "})).unwrap_err();
    assert_eq!(err, ValidationError::MissingAnswer);

    let ok = validate(
      QuestionType::FillBlank,
      &json!({"text": "Le chat ___ sur le tapis.", "answer": "dort", "options": ["dort", "", "mange"]}),
    )
    .unwrap();
    match ok {
      QuestionContent::FillBlank(c) => assert_eq!(c.options, Some(vec!["dort".to_string(), "mange".to_string()])),
      other => panic!("unexpected {other:?}"),
    }
  }

  #[test]
  fn true_false_accepts_form_strings_and_booleans() {
    let a = validate(QuestionType::TrueFalse, &json!({"statement": "Le ciel est vert.", "isTrue": "false"})).unwrap();
    let b = validate(QuestionType::TrueFalse, &json!({"statement": "Le ciel est vert.", "isTrue": false})).unwrap();
    assert_eq!(a, b);
    assert_eq!(
      validate(QuestionType::TrueFalse, &json!({"statement": "x"})).unwrap_err(),
      ValidationError::MissingTruth
    );
    assert_eq!(
      validate(QuestionType::TrueFalse, &json!({"statement": "", "isTrue": true})).unwrap_err(),
      ValidationError::MissingStatement
    );
  }

  #[test]
  fn match_needs_two_complete_pairs() {
    let one = json!({"pairs": [{"left": "chat", "right": "cat"}, {"left": "", "right": ""}]});
    assert_eq!(validate(QuestionType::Match, &one).unwrap_err(), ValidationError::TooFewPairs { found: 1 });

    let half = json!({"pairs": [{"left": "chat", "right": "cat"}, {"left": "chien", "right": " "}]});
    let err = validate(QuestionType::Match, &half).unwrap_err();
    assert_eq!(err, ValidationError::IncompletePair { row: 2, side: "right" });
    assert_eq!(err.to_string(), "Match pair 2 is missing its right side.");

    let two = json!({"pairs": [{"left": "chat", "right": "cat"}, {"left": "chien", "right": "dog"}]});
    assert!(matches!(validate(QuestionType::Match, &two), Ok(QuestionContent::Match(m)) if m.pairs.len() == 2));
  }

  #[test]
  fn story_names_the_missing_field() {
    let err = validate(QuestionType::Story, &json!({"story": "Il était une fois...", "question": "Qui?"})).unwrap_err();
    assert_eq!(err, ValidationError::MissingStoryField("answer"));
    assert_eq!(err.to_string(), "Please fill the answer field.");
  }

  #[test]
  fn jumbled_and_speaking_reject_blank_text() {
    assert_eq!(
      validate(QuestionType::JumbledSentence, &json!({"sentence": " \t "})).unwrap_err(),
      ValidationError::MissingSentence
    );
    assert_eq!(validate(QuestionType::Speaking, &json!({})).unwrap_err(), ValidationError::MissingSpeakingText);
    assert!(validate(QuestionType::Speaking, &json!({"text": "Bonjour"})).is_ok());
  }

  #[test]
  fn stored_rows_with_unknown_tag_or_null_content_are_rejected() {
    assert_eq!(
      validate_tagged("essay", &json!({})).unwrap_err(),
      ValidationError::UnknownType("essay".into())
    );
    assert_eq!(validate_tagged("speaking", &Value::Null).unwrap_err(), ValidationError::NotAnObject);
  }
}
