//! HTTP endpoint handlers. These are thin wrappers that forward to the store or core logic.
//! Each handler is instrumented and logs its parameters and basic result info.

use std::sync::Arc;
use axum::{extract::{Path, State}, http::StatusCode, Json, response::IntoResponse};
use serde_json::Value;
use tracing::{info, instrument};

use crate::auth::CurrentUser;
use crate::domain::{Batch, Chapter, ExerciseForPlay, QuestionContent};
use crate::error::{ApiJson, AppError, AppResult};
use crate::logic::*;
use crate::protocol::*;
use crate::schema::validate_tagged;
use crate::state::AppState;
use crate::store::{ExerciseSummary, UserProgress};

#[instrument(level = "info")]
pub async fn http_health() -> impl IntoResponse { Json(HealthOut { ok: true }) }

#[instrument(level = "info", skip(state))]
pub async fn http_get_batches(State(state): State<Arc<AppState>>) -> Json<Vec<Batch>> {
  Json(state.store.list_batches().await)
}

/// Exercises in chapters unlocked for the caller's batch. No batch, no exercises.
#[instrument(level = "info", skip(state), fields(user_id = user.id))]
pub async fn http_get_exercises(State(state): State<Arc<AppState>>, user: CurrentUser) -> Json<Vec<ExerciseSummary>> {
  let list = match user.batch_id {
    Some(batch_id) => state.store.exercises_for_batch(batch_id).await,
    None => Vec::new(),
  };
  info!(target: "lingo_backend", user_id = user.id, batch_id = ?user.batch_id, count = list.len(), "Exercise list served");
  Json(list)
}

#[instrument(level = "info", skip(state, _user), fields(%id))]
pub async fn http_get_exercise(
  State(state): State<Arc<AppState>>,
  _user: CurrentUser,
  Path(id): Path<i64>,
) -> AppResult<Json<ExerciseForPlay>> {
  state
    .store
    .exercise_for_play(id)
    .await
    .map(Json)
    .ok_or_else(|| AppError::NotFound("Exercise not found".into()))
}

#[instrument(level = "info", skip(state, body), fields(user_id = user.id))]
pub async fn http_post_progress(
  State(state): State<Arc<AppState>>,
  user: CurrentUser,
  ApiJson(body): ApiJson<CompletionIn>,
) -> AppResult<impl IntoResponse> {
  let record = record_completion(&state, user.id, body).await?;
  Ok((StatusCode::CREATED, Json(record)))
}

#[instrument(level = "info", skip(state), fields(user_id = user.id))]
pub async fn http_get_my_progress(State(state): State<Arc<AppState>>, user: CurrentUser) -> Json<UserProgress> {
  Json(state.store.progress_for_user(user.id).await)
}

#[instrument(level = "info", skip(state, body), fields(user_id = user.id, title = %body.title))]
pub async fn http_post_chapter(
  State(state): State<Arc<AppState>>,
  user: CurrentUser,
  ApiJson(body): ApiJson<ChapterIn>,
) -> AppResult<Json<Chapter>> {
  user.require_admin()?;
  if body.title.trim().is_empty() {
    return Err(AppError::BadRequest("Chapter title required".into()));
  }
  let chapter = state.store.create_chapter(body.title.trim(), &body.description, body.order).await;
  info!(target: "authoring", chapter_id = chapter.chapter_id, order = chapter.sequence_order, "Chapter created");
  Ok(Json(chapter))
}

#[instrument(level = "info", skip(state, _user))]
pub async fn http_get_chapters(State(state): State<Arc<AppState>>, _user: CurrentUser) -> Json<Vec<Chapter>> {
  Json(state.store.list_chapters().await)
}

#[instrument(level = "info", skip(state), fields(user_id = user.id))]
pub async fn http_post_lock(
  State(state): State<Arc<AppState>>,
  user: CurrentUser,
  ApiJson(body): ApiJson<LockIn>,
) -> AppResult<Json<Value>> {
  user.require_admin()?;
  state.store.set_chapter_access(body.batch_id, body.chapter_id, body.unlock).await?;
  let verb = if body.unlock { "unlocked" } else { "locked" };
  info!(target: "authoring", batch_id = body.batch_id, chapter_id = body.chapter_id, %verb, "Chapter visibility changed");
  Ok(Json(serde_json::json!({ "msg": format!("Chapter {} for batch", verb) })))
}

#[instrument(level = "info", skip(state), fields(user_id = user.id))]
pub async fn http_get_access_map(State(state): State<Arc<AppState>>, user: CurrentUser) -> AppResult<Json<Vec<AccessOut>>> {
  user.require_admin()?;
  let rows = state
    .store
    .access_map()
    .await
    .into_iter()
    .map(|(batch_id, chapter_id)| AccessOut { batch_id, chapter_id })
    .collect();
  Ok(Json(rows))
}

#[instrument(level = "info", skip(state, body), fields(user_id = user.id, questions = body.questions.len()))]
pub async fn http_post_exercise(
  State(state): State<Arc<AppState>>,
  user: CurrentUser,
  ApiJson(body): ApiJson<ExerciseIn>,
) -> AppResult<impl IntoResponse> {
  user.require_admin()?;
  let exercise = publish_exercise(&state, body).await?;
  let out = MessageOut { msg: "Exercise created successfully".into(), data: serde_json::json!({ "exercise": exercise }) };
  Ok((StatusCode::CREATED, Json(out)))
}

/// Dry-run validation of one draft question.
#[instrument(level = "info", skip(body), fields(user_id = user.id, question_type = %body.question_type))]
pub async fn http_post_validate_question(user: CurrentUser, ApiJson(body): ApiJson<QuestionIn>) -> AppResult<Json<ValidateOut>> {
  user.require_admin()?;
  let content = validate_tagged(&body.question_type, &body.content)?;
  Ok(Json(ValidateOut { ok: true, content }))
}

/// Validate one question and append it to the caller's draft queue.
#[instrument(level = "info", skip(state, body), fields(user_id = user.id, question_type = %body.question_type))]
pub async fn http_post_queue(
  State(state): State<Arc<AppState>>,
  user: CurrentUser,
  ApiJson(body): ApiJson<QuestionIn>,
) -> AppResult<Json<QueueOut>> {
  user.require_admin()?;
  let queued = queue_draft(&state, user.id, body).await?;
  Ok(Json(QueueOut { queued }))
}

#[instrument(level = "info", skip(state), fields(user_id = user.id))]
pub async fn http_get_queue(State(state): State<Arc<AppState>>, user: CurrentUser) -> AppResult<Json<Vec<QuestionContent>>> {
  user.require_admin()?;
  Ok(Json(queued_drafts(&state, user.id).await))
}

#[instrument(level = "info", skip(state), fields(user_id = user.id, %index))]
pub async fn http_delete_queue(
  State(state): State<Arc<AppState>>,
  user: CurrentUser,
  Path(index): Path<usize>,
) -> AppResult<Json<QueueOut>> {
  user.require_admin()?;
  let queued = unqueue_draft(&state, user.id, index).await?;
  Ok(Json(QueueOut { queued }))
}

#[instrument(level = "info", skip(state, body), fields(user_id = user.id))]
pub async fn http_post_queue_publish(
  State(state): State<Arc<AppState>>,
  user: CurrentUser,
  ApiJson(body): ApiJson<DraftPublishIn>,
) -> AppResult<impl IntoResponse> {
  user.require_admin()?;
  let exercise = publish_drafts(&state, user.id, body).await?;
  let out = MessageOut { msg: "Exercise created successfully".into(), data: serde_json::json!({ "exercise": exercise }) };
  Ok((StatusCode::CREATED, Json(out)))
}
