//! Authoring: a locally held queue of validated questions that is published
//! as one exercise.
//!
//! The draft is a loose field map (what the authoring form holds). Adding it
//! to the queue validates it for the selected question type; only validated
//! content ever reaches the queue.

use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, info, instrument};

use crate::domain::{ExerciseKind, NewExercise, QuestionContent, QuestionType};
use crate::schema::{validate, ValidationError};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PublishError {
  #[error("Exercise Title required")]
  MissingTitle,
  #[error("Please select a Chapter")]
  MissingChapter,
  #[error("Please add at least one question")]
  EmptyQueue,
  #[error("Question {index}: {reason}")]
  InvalidQuestion { index: usize, reason: ValidationError },
}

/// Exercise metadata typed into the authoring form.
#[derive(Clone, Debug, Default)]
pub struct ExerciseMeta {
  pub title: String,
  pub chapter_id: Option<i64>,
  pub kind: ExerciseKind,
  pub xp_reward: Option<u32>,
}

/// The question form being filled in.
#[derive(Clone, Debug)]
pub struct QuestionDraft {
  pub question_type: QuestionType,
  pub fields: Map<String, Value>,
}

impl QuestionDraft {
  pub fn new(question_type: QuestionType) -> Self {
    Self { question_type, fields: Map::new() }
  }

  #[cfg(test)]
  pub fn set(&mut self, field: &str, value: impl Into<Value>) -> &mut Self {
    self.fields.insert(field.to_string(), value.into());
    self
  }

  /// Draft from a submitted `{question_type, content}` entry.
  pub fn from_submitted(question_type: &str, content: Value) -> Result<Self, ValidationError> {
    let question_type = question_type.parse::<QuestionType>().map_err(ValidationError::UnknownType)?;
    let Value::Object(fields) = content else { return Err(ValidationError::NotAnObject) };
    let mut draft = Self::new(question_type);
    draft.fields = fields;
    Ok(draft)
  }

  /// Empty the form, keeping the selected type.
  pub fn clear(&mut self) {
    self.fields.clear();
  }
}

#[derive(Clone, Debug, Default)]
pub struct QuestionQueue {
  items: Vec<QuestionContent>,
}

impl QuestionQueue {
  pub fn new() -> Self { Self::default() }

  pub fn items(&self) -> &[QuestionContent] { &self.items }

  pub fn len(&self) -> usize { self.items.len() }

  pub fn is_empty(&self) -> bool { self.items.is_empty() }

  /// Validate the draft and append it. On success the draft is cleared; on
  /// failure both the queue and the draft are left as they were.
  #[instrument(level = "debug", skip(self, draft), fields(question_type = %draft.question_type, queued = self.items.len()))]
  pub fn add_to_queue(&mut self, draft: &mut QuestionDraft) -> Result<usize, ValidationError> {
    let content = validate(draft.question_type, &Value::Object(draft.fields.clone()))?;
    self.items.push(content);
    draft.clear();
    debug!(target: "authoring", queued = self.items.len(), "Question queued");
    Ok(self.items.len())
  }

  /// Remove one entry; the rest keep their relative order.
  pub fn remove_from_queue(&mut self, index: usize) -> Option<QuestionContent> {
    if index < self.items.len() {
      Some(self.items.remove(index))
    } else {
      None
    }
  }

  /// Build the creation request. The queue is left intact so a failed
  /// persistence step can be retried; call `clear` once it has been saved.
  #[instrument(level = "info", skip(self, meta), fields(title_len = meta.title.len(), queued = self.items.len()))]
  pub fn publish(&self, meta: &ExerciseMeta) -> Result<NewExercise, PublishError> {
    let request = new_exercise(meta, self.items.clone())?;
    info!(target: "authoring", chapter_id = request.chapter_id, questions = request.questions.len(), "Exercise ready to publish");
    Ok(request)
  }

  pub fn clear(&mut self) {
    self.items.clear();
  }
}

fn new_exercise(meta: &ExerciseMeta, questions: Vec<QuestionContent>) -> Result<NewExercise, PublishError> {
  let title = meta.title.trim();
  if title.is_empty() {
    return Err(PublishError::MissingTitle);
  }
  let chapter_id = meta.chapter_id.ok_or(PublishError::MissingChapter)?;
  if questions.is_empty() {
    return Err(PublishError::EmptyQueue);
  }
  Ok(NewExercise {
    chapter_id,
    title: title.to_string(),
    kind: meta.kind,
    xp_reward: meta.xp_reward,
    questions,
  })
}
