//! Built-in content that makes the app usable without any configuration:
//! one batch, one chapter unlocked for it, and a demo exercise that walks
//! through every question type.

use crate::domain::{
  ExerciseKind, FillBlank, JumbledSentence, MatchPair, MatchPairs, NewExercise, QuestionContent, Speaking, Story,
  TrueFalse,
};

pub const DEMO_BATCH: &str = "Demo";
pub const DEMO_CHAPTER_TITLE: &str = "Premiers pas";
pub const DEMO_CHAPTER_DESCRIPTION: &str = "Greetings and everyday words.";

fn pair(left: &str, right: &str) -> MatchPair {
  MatchPair { left: left.into(), right: right.into() }
}

/// One question of each type, in play order.
pub fn demo_exercise(chapter_id: i64) -> NewExercise {
  NewExercise {
    chapter_id,
    title: "Bonjour !".into(),
    kind: ExerciseKind::Game,
    xp_reward: Some(20),
    questions: vec![
      QuestionContent::FillBlank(FillBlank {
        text: "___ matin, je bois un café.".into(),
        answer: "Le".into(),
        options: Some(vec!["Le".into(), "La".into(), "Les".into()]),
      }),
      QuestionContent::TrueFalse(TrueFalse { statement: "\"Merci\" means \"thank you\".".into(), is_true: true }),
      QuestionContent::Match(MatchPairs {
        pairs: vec![pair("bonjour", "hello"), pair("au revoir", "goodbye"), pair("merci", "thank you")],
      }),
      QuestionContent::Story(Story {
        story: "Marie va au marché. Elle achète trois pommes et du pain.".into(),
        question: "How many apples does Marie buy?".into(),
        answer: "trois".into(),
      }),
      QuestionContent::JumbledSentence(JumbledSentence { sentence: "Je suis très content".into() }),
      QuestionContent::Speaking(Speaking { text: "Bonjour, comment allez-vous ?".into() }),
    ],
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::domain::QuestionType;
  use crate::schema::validate_tagged;

  #[test]
  fn demo_covers_every_type_and_passes_validation() {
    let demo = demo_exercise(1);
    let types: Vec<QuestionType> = demo.questions.iter().map(QuestionContent::question_type).collect();
    assert_eq!(types, QuestionType::ALL.to_vec());
    for q in &demo.questions {
      let payload: serde_json::Value = serde_json::from_str(&q.payload_json().unwrap()).unwrap();
      assert_eq!(validate_tagged(q.question_type().as_str(), &payload).as_ref(), Ok(q));
    }
  }
}
