//! Domain models used by the backend: question types and their content shapes,
//! exercises as stored and as served for play, chapters, batches, progress.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The closed set of question interactions. Every consumer of this tag
/// (validation, grading, session interaction) matches on it exhaustively.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestionType {
  FillBlank,
  TrueFalse,
  Match,
  Story,
  JumbledSentence,
  Speaking,
}

impl QuestionType {
  pub const ALL: [QuestionType; 6] = [
    QuestionType::FillBlank,
    QuestionType::TrueFalse,
    QuestionType::Match,
    QuestionType::Story,
    QuestionType::JumbledSentence,
    QuestionType::Speaking,
  ];

  pub fn as_str(&self) -> &'static str {
    match self {
      QuestionType::FillBlank => "fill_blank",
      QuestionType::TrueFalse => "true_false",
      QuestionType::Match => "match",
      QuestionType::Story => "story",
      QuestionType::JumbledSentence => "jumbled_sentence",
      QuestionType::Speaking => "speaking",
    }
  }
}

impl fmt::Display for QuestionType {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

impl FromStr for QuestionType {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    QuestionType::ALL
      .into_iter()
      .find(|t| t.as_str() == s)
      .ok_or_else(|| s.to_string())
  }
}

/// `fill_blank`: `text` holds the `___` marker where the blank goes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FillBlank {
  pub text: String,
  pub answer: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub options: Option<Vec<String>>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrueFalse {
  pub statement: String,
  #[serde(rename = "isTrue")]
  pub is_true: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchPair {
  pub left: String,
  pub right: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchPairs {
  pub pairs: Vec<MatchPair>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Story {
  pub story: String,
  pub question: String,
  pub answer: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct JumbledSentence {
  pub sentence: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Speaking {
  pub text: String,
}

/// Validated question content. Serialized as `{question_type, content}`,
/// the shape used both by the authoring request and the question rows.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "question_type", content = "content", rename_all = "snake_case")]
pub enum QuestionContent {
  FillBlank(FillBlank),
  TrueFalse(TrueFalse),
  Match(MatchPairs),
  Story(Story),
  JumbledSentence(JumbledSentence),
  Speaking(Speaking),
}

impl QuestionContent {
  pub fn question_type(&self) -> QuestionType {
    match self {
      QuestionContent::FillBlank(_) => QuestionType::FillBlank,
      QuestionContent::TrueFalse(_) => QuestionType::TrueFalse,
      QuestionContent::Match(_) => QuestionType::Match,
      QuestionContent::Story(_) => QuestionType::Story,
      QuestionContent::JumbledSentence(_) => QuestionType::JumbledSentence,
      QuestionContent::Speaking(_) => QuestionType::Speaking,
    }
  }

  /// The bare content payload (without the tag), as stored in a question row.
  pub fn payload_json(&self) -> Result<String, serde_json::Error> {
    match self {
      QuestionContent::FillBlank(c) => serde_json::to_string(c),
      QuestionContent::TrueFalse(c) => serde_json::to_string(c),
      QuestionContent::Match(c) => serde_json::to_string(c),
      QuestionContent::Story(c) => serde_json::to_string(c),
      QuestionContent::JumbledSentence(c) => serde_json::to_string(c),
      QuestionContent::Speaking(c) => serde_json::to_string(c),
    }
  }
}

/// Cosmetic only; grading ignores it.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExerciseKind {
  #[default]
  Quiz,
  Game,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Chapter {
  pub chapter_id: i64,
  pub title: String,
  #[serde(default)]
  pub description: String,
  pub sequence_order: i32,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Batch {
  pub batch_id: i64,
  pub batch_name: String,
}

/// Exercise row as persisted.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Exercise {
  pub exercise_id: i64,
  pub chapter_id: i64,
  pub title: String,
  #[serde(rename = "type")]
  pub kind: ExerciseKind,
  pub xp_reward: u32,
}

/// Question row as served for play. `content` is whatever the row decoded to;
/// it is only trusted after passing content validation.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StoredQuestion {
  pub question_id: i64,
  pub exercise_id: i64,
  pub question_type: String,
  pub content: serde_json::Value,
}

/// Exercise plus its questions ordered by `question_id` ascending.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ExerciseForPlay {
  pub exercise_id: i64,
  pub title: String,
  #[serde(rename = "type")]
  pub kind: ExerciseKind,
  pub xp_reward: u32,
  pub questions: Vec<StoredQuestion>,
}

/// A validated exercise creation request, ready to be persisted as one unit.
#[derive(Clone, Debug)]
pub struct NewExercise {
  pub chapter_id: i64,
  pub title: String,
  pub kind: ExerciseKind,
  pub xp_reward: Option<u32>,
  pub questions: Vec<QuestionContent>,
}

/// What a finished session submits. `lesson_id` is the exercise id as text.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Completion {
  pub lesson_id: String,
  pub xp_gained: i64,
  pub mistakes: u32,
}

/// Immutable progress row.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProgressRecord {
  pub progress_id: i64,
  pub user_id: i64,
  pub lesson_id: String,
  pub xp_gained: i64,
  pub mistakes: u32,
  pub completed_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn question_type_parses_every_tag() {
    for t in QuestionType::ALL {
      assert_eq!(t.as_str().parse::<QuestionType>(), Ok(t));
    }
    assert_eq!("essay".parse::<QuestionType>(), Err("essay".to_string()));
  }

  #[test]
  fn content_serializes_with_wire_tag_and_camel_case_truth() {
    let c = QuestionContent::TrueFalse(TrueFalse { statement: "Paris est en France.".into(), is_true: true });
    let v = serde_json::to_value(&c).unwrap();
    assert_eq!(v["question_type"], "true_false");
    assert_eq!(v["content"]["isTrue"], true);
    assert_eq!(c.payload_json().unwrap(), r#"{"statement":"Paris est en France.","isTrue":true}"#);
  }
}
