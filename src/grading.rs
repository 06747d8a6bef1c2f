//! Grading: one rule per question type, strict boolean verdicts.
//!
//! `grade` is pure. Speaking questions are scored elsewhere (see `speech`);
//! here a returned feedback blob simply counts as correct.

use std::collections::BTreeSet;

use thiserror::Error;

use crate::domain::{QuestionContent, QuestionType, StoredQuestion};
use crate::schema::{validate_stored, ValidationError};
use crate::util::{canonical_sentence, normalize_answer};

/// The student's answer state for one question, as handed to the grader.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Candidate {
  /// Typed answer for `fill_blank` and `story`.
  Text(String),
  /// `true_false` choice; `None` if nothing was picked.
  Choice(Option<bool>),
  /// Original pair indices matched so far during play.
  Matched(BTreeSet<usize>),
  /// Words in the order the student arranged them.
  Arranged(Vec<String>),
  /// Feedback returned by the pronunciation service, if any.
  Speech(Option<String>),
}

impl Candidate {
  fn kind(&self) -> &'static str {
    match self {
      Candidate::Text(_) => "text",
      Candidate::Choice(_) => "choice",
      Candidate::Matched(_) => "matched pairs",
      Candidate::Arranged(_) => "arranged words",
      Candidate::Speech(_) => "speech",
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GradingError {
  #[error("Malformed question content: {0}")]
  Malformed(#[from] ValidationError),
  #[error("A {got} answer cannot be graded against a {expected} question.")]
  CandidateMismatch { expected: QuestionType, got: &'static str },
}

/// Decide whether `candidate` answers `content` correctly.
///
/// An untouched question (empty text, no choice, no pairs, no words, no
/// speech result) is incorrect, never an error.
pub fn grade(content: &QuestionContent, candidate: &Candidate) -> Result<bool, GradingError> {
  let verdict = match (content, candidate) {
    (QuestionContent::FillBlank(c), Candidate::Text(answer)) => text_matches(answer, &c.answer),
    (QuestionContent::Story(c), Candidate::Text(answer)) => text_matches(answer, &c.answer),
    (QuestionContent::TrueFalse(c), Candidate::Choice(choice)) => *choice == Some(c.is_true),
    (QuestionContent::Match(c), Candidate::Matched(matched)) => {
      let total = c.pairs.len();
      total > 0 && matched.iter().filter(|i| **i < total).count() == total
    }
    (QuestionContent::JumbledSentence(c), Candidate::Arranged(words)) => {
      !words.is_empty() && words.join(" ") == canonical_sentence(&c.sentence)
    }
    (QuestionContent::Speaking(_), Candidate::Speech(feedback)) => feedback.is_some(),
    (content, other) => {
      return Err(GradingError::CandidateMismatch { expected: content.question_type(), got: other.kind() })
    }
  };
  Ok(verdict)
}

/// Validate a stored row, then grade it.
pub fn grade_stored(question: &StoredQuestion, candidate: &Candidate) -> Result<bool, GradingError> {
  let content = validate_stored(question)?;
  grade(&content, candidate)
}

fn text_matches(candidate: &str, expected: &str) -> bool {
  let c = normalize_answer(candidate);
  !c.is_empty() && c == normalize_answer(expected)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::domain::{FillBlank, JumbledSentence, MatchPair, MatchPairs, Speaking, Story, TrueFalse};
  use serde_json::json;

  fn fill(answer: &str) -> QuestionContent {
    QuestionContent::FillBlank(FillBlank { text: "Le chat ___ sur le tapis.".into(), answer: answer.into(), options: None })
  }

  #[test]
  fn fill_blank_ignores_case_and_surrounding_space() {
    assert_eq!(grade(&fill("dort"), &Candidate::Text(" Dort ".into())), Ok(true));
    assert_eq!(grade(&fill(" Dort"), &Candidate::Text("dort".into())), Ok(true));
    assert_eq!(grade(&fill("dort"), &Candidate::Text("mange".into())), Ok(false));
    assert_eq!(grade(&fill("dort"), &Candidate::Text("   ".into())), Ok(false));
  }

  #[test]
  fn story_uses_the_same_rule() {
    let c = QuestionContent::Story(Story { story: "Marie va au marché.".into(), question: "Où va Marie?".into(), answer: "Au marché".into() });
    assert_eq!(grade(&c, &Candidate::Text("au MARCHÉ".into())), Ok(true));
    assert_eq!(grade(&c, &Candidate::Text(String::new())), Ok(false));
  }

  #[test]
  fn true_false_compares_choice() {
    let c = QuestionContent::TrueFalse(TrueFalse { statement: "x".into(), is_true: false });
    assert_eq!(grade(&c, &Candidate::Choice(Some(false))), Ok(true));
    assert_eq!(grade(&c, &Candidate::Choice(Some(true))), Ok(false));
    assert_eq!(grade(&c, &Candidate::Choice(None)), Ok(false));
  }

  #[test]
  fn match_is_correct_only_when_every_pair_is_matched() {
    let c = QuestionContent::Match(MatchPairs {
      pairs: vec![
        MatchPair { left: "chat".into(), right: "cat".into() },
        MatchPair { left: "chien".into(), right: "dog".into() },
      ],
    });
    assert_eq!(grade(&c, &Candidate::Matched(BTreeSet::from([1]))), Ok(false));
    assert_eq!(grade(&c, &Candidate::Matched(BTreeSet::from([1, 0]))), Ok(true));
    assert_eq!(grade(&c, &Candidate::Matched(BTreeSet::from([0, 5]))), Ok(false));
    assert_eq!(grade(&c, &Candidate::Matched(BTreeSet::new())), Ok(false));
  }

  #[test]
  fn jumbled_compares_joined_words() {
    let c = QuestionContent::JumbledSentence(JumbledSentence { sentence: " Je suis étudiant ".into() });
    let words = |ws: &[&str]| Candidate::Arranged(ws.iter().map(|w| w.to_string()).collect());
    assert_eq!(grade(&c, &words(&["Je", "suis", "étudiant"])), Ok(true));
    assert_eq!(grade(&c, &words(&["suis", "Je", "étudiant"])), Ok(false));
    assert_eq!(grade(&c, &words(&["je", "suis", "étudiant"])), Ok(false));
    assert_eq!(grade(&c, &words(&[])), Ok(false));
  }

  #[test]
  fn speaking_counts_any_feedback_as_correct() {
    let c = QuestionContent::Speaking(Speaking { text: "Bonjour".into() });
    assert_eq!(grade(&c, &Candidate::Speech(Some("<p>ok</p>".into()))), Ok(true));
    assert_eq!(grade(&c, &Candidate::Speech(None)), Ok(false));
  }

  #[test]
  fn mismatched_candidate_is_an_error() {
    let err = grade(&fill("dort"), &Candidate::Choice(Some(true))).unwrap_err();
    assert_eq!(err, GradingError::CandidateMismatch { expected: QuestionType::FillBlank, got: "choice" });
  }

  #[test]
  fn malformed_stored_content_is_reported_not_graded() {
    let q = StoredQuestion { question_id: 1, exercise_id: 1, question_type: "fill_blank".into(), content: json!({"text": "no marker"}) };
    assert!(matches!(grade_stored(&q, &Candidate::Text("x".into())), Err(GradingError::Malformed(_))));
  }
}
