//! Core behaviors shared by both HTTP and WebSocket handlers.
//!
//! This includes:
//!   - Publishing an exercise from a creation request (revalidated, atomic)
//!   - An admin's server-held draft queue (add, remove, list, publish)
//!   - Recording a completion submitted over HTTP
//!   - Opening an exercise session for play
//!   - Decoding streamed audio chunks

use base64::Engine;
use rand::rngs::StdRng;
use serde_json::Value;
use tracing::{debug, instrument, warn};

use crate::builder::{ExerciseMeta, PublishError, QuestionDraft, QuestionQueue};
use crate::domain::{Completion, Exercise, ProgressRecord, QuestionContent};
use crate::error::{AppError, AppResult};
use crate::protocol::{CompletionIn, DraftPublishIn, ExerciseIn, QuestionIn};
use crate::session::{ExerciseSession, SessionError};
use crate::state::AppState;

/// Validate every submitted question, then persist exercise and questions as one unit.
#[instrument(level = "info", skip(state, body), fields(title_len = body.title.len(), questions = body.questions.len()))]
pub async fn publish_exercise(state: &AppState, body: ExerciseIn) -> AppResult<Exercise> {
  let meta = ExerciseMeta { title: body.title, chapter_id: body.chapter_id, kind: body.kind, xp_reward: body.xp_reward };
  // Submitted questions go through the same queue an authoring form uses.
  let mut queue = QuestionQueue::new();
  for (index, q) in body.questions.into_iter().enumerate() {
    QuestionDraft::from_submitted(&q.question_type, q.content)
      .and_then(|mut draft| queue.add_to_queue(&mut draft))
      .map_err(|reason| {
        warn!(target: "authoring", index, error = %reason, "Exercise rejected");
        PublishError::InvalidQuestion { index, reason }
      })?;
  }
  save_queue(state, &mut queue, &meta).await
}

/// Publish a queue as one exercise. The queue is emptied only once the store
/// holds every row, so a failed save can be retried as is.
pub async fn save_queue(state: &AppState, queue: &mut QuestionQueue, meta: &ExerciseMeta) -> AppResult<Exercise> {
  let request = queue.publish(meta)?;
  let exercise = state.store.create_exercise(request).await?;
  queue.clear();
  Ok(exercise)
}

/// Validate one question and append it to the admin's draft queue.
#[instrument(level = "info", skip(state, q), fields(%admin_id, question_type = %q.question_type))]
pub async fn queue_draft(state: &AppState, admin_id: i64, q: QuestionIn) -> AppResult<usize> {
  let mut draft = QuestionDraft::from_submitted(&q.question_type, q.content)?;
  let mut drafts = state.drafts.write().await;
  Ok(drafts.entry(admin_id).or_default().add_to_queue(&mut draft)?)
}

/// Drop one queued question; returns how many are left.
#[instrument(level = "info", skip(state), fields(%admin_id, %index))]
pub async fn unqueue_draft(state: &AppState, admin_id: i64, index: usize) -> AppResult<usize> {
  let mut drafts = state.drafts.write().await;
  let queue = drafts.get_mut(&admin_id);
  let left = match queue.and_then(|q| q.remove_from_queue(index).map(|_| q.len())) {
    Some(left) => left,
    None => return Err(AppError::NotFound(format!("No queued question at position {}", index))),
  };
  drafts.retain(|_, q| !q.is_empty());
  debug!(target: "authoring", %admin_id, left, "Question removed from queue");
  Ok(left)
}

pub async fn queued_drafts(state: &AppState, admin_id: i64) -> Vec<QuestionContent> {
  let drafts = state.drafts.read().await;
  drafts.get(&admin_id).map(|q| q.items().to_vec()).unwrap_or_default()
}

/// Publish the admin's draft queue. On failure the queue is kept for a retry.
#[instrument(level = "info", skip(state, body), fields(%admin_id))]
pub async fn publish_drafts(state: &AppState, admin_id: i64, body: DraftPublishIn) -> AppResult<Exercise> {
  let meta = ExerciseMeta { title: body.title, chapter_id: body.chapter_id, kind: body.kind, xp_reward: body.xp_reward };
  let mut drafts = state.drafts.write().await;
  let result = save_queue(state, drafts.entry(admin_id).or_default(), &meta).await;
  drafts.retain(|_, q| !q.is_empty());
  result
}

/// `lesson_id` is kept as text whatever JSON type it arrived as.
pub fn completion_from(body: CompletionIn) -> AppResult<Completion> {
  let missing = || AppError::BadRequest("Missing lesson_id or xp_gained".into());
  let lesson_id = match body.lesson_id {
    Some(Value::String(s)) if !s.trim().is_empty() => s,
    Some(Value::Number(n)) if n.as_f64() != Some(0.0) => n.to_string(),
    _ => return Err(missing()),
  };
  let xp_gained = body.xp_gained.ok_or_else(missing)?;
  Ok(Completion { lesson_id, xp_gained, mistakes: body.mistakes.unwrap_or(0) })
}

#[instrument(level = "info", skip(state, body), fields(%user_id))]
pub async fn record_completion(state: &AppState, user_id: i64, body: CompletionIn) -> AppResult<ProgressRecord> {
  let completion = completion_from(body)?;
  Ok(state.store.add_progress(user_id, &completion).await)
}

/// Load an exercise and start a session on it.
#[instrument(level = "info", skip(state, rng), fields(%user_id, %exercise_id))]
pub async fn open_session(state: &AppState, user_id: i64, exercise_id: i64, rng: StdRng) -> Result<ExerciseSession, String> {
  let exercise = state
    .store
    .exercise_for_play(exercise_id)
    .await
    .ok_or_else(|| format!("Exercise {} not found.", exercise_id))?;
  ExerciseSession::open(user_id, exercise, rng).map_err(|e: SessionError| e.to_string())
}

/// Decode one base64 chunk of the WAV stream.
pub fn decode_audio_chunk(b64: &str) -> Result<Vec<u8>, String> {
  let bytes = base64::engine::general_purpose::STANDARD
    .decode(b64.trim())
    .map_err(|e| format!("Invalid audio chunk: {}", e))?;
  debug!(target: "speech", chunk_bytes = bytes.len(), "Audio chunk decoded");
  Ok(bytes)
}
