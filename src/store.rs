//! In-memory persistence: batches, chapters, chapter visibility, exercises,
//! questions, and progress rows.
//!
//! All tables sit behind one `RwLock` so that a multi-row write (an exercise
//! and its questions) commits as one unit. Question content is kept as JSON
//! text, the way the relational schema stores it.

use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{info, instrument, warn};

use crate::domain::{
  Batch, Chapter, Completion, Exercise, ExerciseForPlay, NewExercise, ProgressRecord, StoredQuestion,
};
use crate::session::ProgressSink;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
  #[error("Chapter {0} does not exist.")]
  UnknownChapter(i64),
  #[error("Batch {0} does not exist.")]
  UnknownBatch(i64),
  #[error("Could not encode question {index}: {reason}")]
  Encoding { index: usize, reason: String },
}

#[derive(Clone, Debug)]
struct QuestionRow {
  question_id: i64,
  exercise_id: i64,
  question_type: String,
  content: String,
}

#[derive(Default)]
struct Tables {
  next_id: i64,
  batches: BTreeMap<i64, Batch>,
  chapters: BTreeMap<i64, Chapter>,
  access: BTreeSet<(i64, i64)>,
  exercises: BTreeMap<i64, Exercise>,
  questions: BTreeMap<i64, QuestionRow>,
  progress: Vec<ProgressRecord>,
}

impl Tables {
  fn next_id(&mut self) -> i64 {
    self.next_id += 1;
    self.next_id
  }
}

/// Exercise listed for a student, with its chapter title.
#[derive(Clone, Debug, Serialize)]
pub struct ExerciseSummary {
  pub exercise_id: i64,
  pub title: String,
  #[serde(rename = "type")]
  pub kind: crate::domain::ExerciseKind,
  pub xp_reward: u32,
  pub chapter_title: String,
}

#[derive(Clone, Debug, Serialize)]
pub struct LessonProgress {
  pub lesson_id: String,
  pub xp_gained: i64,
  pub mistakes: u32,
  pub completed_at: DateTime<Utc>,
  pub title: Option<String>,
}

#[derive(Clone, Debug, Serialize)]
pub struct UserProgress {
  pub lessons: Vec<LessonProgress>,
  pub total_xp: i64,
}

pub struct Store {
  tables: RwLock<Tables>,
  default_xp_reward: u32,
}

impl Store {
  pub fn new(default_xp_reward: u32) -> Self {
    Self { tables: RwLock::new(Tables::default()), default_xp_reward }
  }

  pub async fn create_batch(&self, name: &str) -> Batch {
    let mut t = self.tables.write().await;
    let batch = Batch { batch_id: t.next_id(), batch_name: name.to_string() };
    t.batches.insert(batch.batch_id, batch.clone());
    batch
  }

  pub async fn list_batches(&self) -> Vec<Batch> {
    self.tables.read().await.batches.values().cloned().collect()
  }

  #[cfg(test)]
  pub async fn find_batch(&self, name: &str) -> Option<Batch> {
    self.tables.read().await.batches.values().find(|b| b.batch_name == name).cloned()
  }

  /// Insert a chapter. Without an explicit order it goes after the last one.
  #[instrument(level = "debug", skip(self, description))]
  pub async fn create_chapter(&self, title: &str, description: &str, sequence_order: Option<i32>) -> Chapter {
    let mut t = self.tables.write().await;
    let order = sequence_order
      .unwrap_or_else(|| t.chapters.values().map(|c| c.sequence_order).max().unwrap_or(0) + 1);
    let chapter = Chapter {
      chapter_id: t.next_id(),
      title: title.to_string(),
      description: description.to_string(),
      sequence_order: order,
    };
    t.chapters.insert(chapter.chapter_id, chapter.clone());
    chapter
  }

  /// Chapters by `sequence_order`.
  pub async fn list_chapters(&self) -> Vec<Chapter> {
    let mut chapters: Vec<Chapter> = self.tables.read().await.chapters.values().cloned().collect();
    chapters.sort_by_key(|c| (c.sequence_order, c.chapter_id));
    chapters
  }

  /// Lock or unlock a chapter for a batch. Idempotent both ways.
  #[instrument(level = "info", skip(self))]
  pub async fn set_chapter_access(&self, batch_id: i64, chapter_id: i64, unlock: bool) -> Result<(), StoreError> {
    let mut t = self.tables.write().await;
    if !t.batches.contains_key(&batch_id) {
      return Err(StoreError::UnknownBatch(batch_id));
    }
    if !t.chapters.contains_key(&chapter_id) {
      return Err(StoreError::UnknownChapter(chapter_id));
    }
    if unlock {
      t.access.insert((batch_id, chapter_id));
    } else {
      t.access.remove(&(batch_id, chapter_id));
    }
    Ok(())
  }

  pub async fn access_map(&self) -> Vec<(i64, i64)> {
    self.tables.read().await.access.iter().copied().collect()
  }

  /// Persist an exercise and all its questions, or nothing.
  ///
  /// Every row is staged before the first one is written; a failure while
  /// staging leaves the tables untouched.
  #[instrument(level = "info", skip(self, new), fields(chapter_id = new.chapter_id, questions = new.questions.len()))]
  pub async fn create_exercise(&self, new: NewExercise) -> Result<Exercise, StoreError> {
    let mut staged = Vec::with_capacity(new.questions.len());
    for (index, q) in new.questions.iter().enumerate() {
      let content = q
        .payload_json()
        .map_err(|e| StoreError::Encoding { index, reason: e.to_string() })?;
      staged.push((q.question_type().as_str().to_string(), content));
    }

    let mut t = self.tables.write().await;
    if !t.chapters.contains_key(&new.chapter_id) {
      warn!(target: "authoring", chapter_id = new.chapter_id, "Exercise rejected: unknown chapter");
      return Err(StoreError::UnknownChapter(new.chapter_id));
    }
    let xp_reward = new.xp_reward.filter(|xp| *xp > 0).unwrap_or(self.default_xp_reward);
    let exercise = Exercise {
      exercise_id: t.next_id(),
      chapter_id: new.chapter_id,
      title: new.title,
      kind: new.kind,
      xp_reward,
    };
    for (question_type, content) in staged {
      let question_id = t.next_id();
      t.questions.insert(question_id, QuestionRow { question_id, exercise_id: exercise.exercise_id, question_type, content });
    }
    t.exercises.insert(exercise.exercise_id, exercise.clone());
    info!(target: "authoring", exercise_id = exercise.exercise_id, xp_reward, "Exercise created");
    Ok(exercise)
  }

  /// Exercise with its questions in `question_id` order. Undecodable content
  /// comes back as `null` and is rejected later, at play time.
  pub async fn exercise_for_play(&self, exercise_id: i64) -> Option<ExerciseForPlay> {
    let t = self.tables.read().await;
    let ex = t.exercises.get(&exercise_id)?;
    let questions = t
      .questions
      .values()
      .filter(|q| q.exercise_id == exercise_id)
      .map(|q| {
        let content = serde_json::from_str::<Value>(&q.content).unwrap_or_else(|e| {
          warn!(target: "lingo_backend", question_id = q.question_id, error = %e, "Stored question content is not valid JSON");
          Value::Null
        });
        StoredQuestion {
          question_id: q.question_id,
          exercise_id: q.exercise_id,
          question_type: q.question_type.clone(),
          content,
        }
      })
      .collect();
    Some(ExerciseForPlay {
      exercise_id: ex.exercise_id,
      title: ex.title.clone(),
      kind: ex.kind,
      xp_reward: ex.xp_reward,
      questions,
    })
  }

  /// Exercises in chapters unlocked for the batch, by chapter order then id.
  pub async fn exercises_for_batch(&self, batch_id: i64) -> Vec<ExerciseSummary> {
    let t = self.tables.read().await;
    let mut rows: Vec<(i32, ExerciseSummary)> = t
      .exercises
      .values()
      .filter(|e| t.access.contains(&(batch_id, e.chapter_id)))
      .filter_map(|e| {
        let chapter = t.chapters.get(&e.chapter_id)?;
        Some((
          chapter.sequence_order,
          ExerciseSummary {
            exercise_id: e.exercise_id,
            title: e.title.clone(),
            kind: e.kind,
            xp_reward: e.xp_reward,
            chapter_title: chapter.title.clone(),
          },
        ))
      })
      .collect();
    rows.sort_by_key(|(order, e)| (*order, e.exercise_id));
    rows.into_iter().map(|(_, e)| e).collect()
  }

  #[instrument(level = "info", skip(self, completion), fields(lesson_id = %completion.lesson_id))]
  pub async fn add_progress(&self, user_id: i64, completion: &Completion) -> ProgressRecord {
    let mut t = self.tables.write().await;
    let record = ProgressRecord {
      progress_id: t.next_id(),
      user_id,
      lesson_id: completion.lesson_id.clone(),
      xp_gained: completion.xp_gained,
      mistakes: completion.mistakes,
      completed_at: Utc::now(),
    };
    t.progress.push(record.clone());
    info!(target: "lingo_backend", user_id, progress_id = record.progress_id, xp = record.xp_gained, "Progress recorded");
    record
  }

  /// A user's completed lessons, newest first, plus their total XP.
  pub async fn progress_for_user(&self, user_id: i64) -> UserProgress {
    let t = self.tables.read().await;
    let mut lessons: Vec<LessonProgress> = t
      .progress
      .iter()
      .filter(|p| p.user_id == user_id)
      .map(|p| LessonProgress {
        lesson_id: p.lesson_id.clone(),
        xp_gained: p.xp_gained,
        mistakes: p.mistakes,
        completed_at: p.completed_at,
        title: p
          .lesson_id
          .parse::<i64>()
          .ok()
          .and_then(|id| t.exercises.get(&id))
          .map(|e| e.title.clone()),
      })
      .collect();
    lessons.reverse();
    let total_xp = lessons.iter().map(|l| l.xp_gained).sum();
    UserProgress { lessons, total_xp }
  }

  #[cfg(test)]
  async fn insert_raw_question(&self, exercise_id: i64, question_type: &str, content: &str) {
    let mut t = self.tables.write().await;
    let question_id = t.next_id();
    t.questions.insert(
      question_id,
      QuestionRow { question_id, exercise_id, question_type: question_type.into(), content: content.into() },
    );
  }

  #[cfg(test)]
  pub(crate) async fn counts(&self) -> (usize, usize, usize) {
    let t = self.tables.read().await;
    (t.exercises.len(), t.questions.len(), t.progress.len())
  }
}

impl ProgressSink for Store {
  fn submit(&self, user_id: i64, completion: &Completion) -> impl Future<Output = Result<ProgressRecord, StoreError>> + Send {
    async move { Ok(self.add_progress(user_id, completion).await) }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::domain::{ExerciseKind, QuestionContent, Speaking, TrueFalse};

  fn new_exercise(chapter_id: i64, xp_reward: Option<u32>) -> NewExercise {
    NewExercise {
      chapter_id,
      title: "Les couleurs".into(),
      kind: ExerciseKind::Game,
      xp_reward,
      questions: vec![
        QuestionContent::TrueFalse(TrueFalse { statement: "Le ciel est bleu.".into(), is_true: true }),
        QuestionContent::Speaking(Speaking { text: "rouge".into() }),
      ],
    }
  }

  #[tokio::test]
  async fn exercise_and_questions_commit_together() {
    let store = Store::new(10);
    let ch = store.create_chapter("Couleurs", "", None).await;
    let ex = store.create_exercise(new_exercise(ch.chapter_id, Some(15))).await.unwrap();
    assert_eq!(ex.xp_reward, 15);

    let play = store.exercise_for_play(ex.exercise_id).await.unwrap();
    assert_eq!(play.questions.len(), 2);
    assert!(play.questions[0].question_id < play.questions[1].question_id);
    assert_eq!(play.questions[0].question_type, "true_false");
    assert_eq!(play.questions[0].content["isTrue"], true);
  }

  #[tokio::test]
  async fn unknown_chapter_writes_nothing() {
    let store = Store::new(10);
    let err = store.create_exercise(new_exercise(999, None)).await.unwrap_err();
    assert_eq!(err, StoreError::UnknownChapter(999));
    assert_eq!(store.counts().await, (0, 0, 0));
  }

  #[tokio::test]
  async fn missing_or_zero_reward_uses_default() {
    let store = Store::new(10);
    let ch = store.create_chapter("Couleurs", "", None).await;
    assert_eq!(store.create_exercise(new_exercise(ch.chapter_id, None)).await.unwrap().xp_reward, 10);
    assert_eq!(store.create_exercise(new_exercise(ch.chapter_id, Some(0))).await.unwrap().xp_reward, 10);
  }

  #[tokio::test]
  async fn undecodable_content_is_served_as_null() {
    let store = Store::new(10);
    let ch = store.create_chapter("Couleurs", "", None).await;
    let ex = store.create_exercise(new_exercise(ch.chapter_id, None)).await.unwrap();
    store.insert_raw_question(ex.exercise_id, "story", "{not json").await;
    let play = store.exercise_for_play(ex.exercise_id).await.unwrap();
    assert!(play.questions[2].content.is_null());
  }

  #[tokio::test]
  async fn batch_sees_only_unlocked_chapters_in_order() {
    let store = Store::new(10);
    let b = store.create_batch("B1").await;
    let later = store.create_chapter("Chapitre 2", "", Some(2)).await;
    let first = store.create_chapter("Chapitre 1", "", Some(1)).await;
    let hidden = store.create_chapter("Chapitre 3", "", Some(3)).await;
    for ch in [&later, &first, &hidden] {
      store.create_exercise(new_exercise(ch.chapter_id, None)).await.unwrap();
    }
    store.set_chapter_access(b.batch_id, later.chapter_id, true).await.unwrap();
    store.set_chapter_access(b.batch_id, first.chapter_id, true).await.unwrap();
    store.set_chapter_access(b.batch_id, first.chapter_id, true).await.unwrap();

    let titles: Vec<String> = store.exercises_for_batch(b.batch_id).await.into_iter().map(|e| e.chapter_title).collect();
    assert_eq!(titles, vec!["Chapitre 1", "Chapitre 2"]);

    store.set_chapter_access(b.batch_id, later.chapter_id, false).await.unwrap();
    assert_eq!(store.exercises_for_batch(b.batch_id).await.len(), 1);
    assert_eq!(store.set_chapter_access(77, first.chapter_id, true).await, Err(StoreError::UnknownBatch(77)));
  }

  #[tokio::test]
  async fn progress_is_listed_newest_first_with_totals() {
    let store = Store::new(10);
    let ch = store.create_chapter("Couleurs", "", None).await;
    let ex = store.create_exercise(new_exercise(ch.chapter_id, Some(15))).await.unwrap();
    let lesson_id = ex.exercise_id.to_string();
    store.add_progress(5, &Completion { lesson_id: lesson_id.clone(), xp_gained: 15, mistakes: 2 }).await;
    store.add_progress(5, &Completion { lesson_id: "intro-audio".into(), xp_gained: 5, mistakes: 0 }).await;
    store.add_progress(6, &Completion { lesson_id: lesson_id.clone(), xp_gained: 15, mistakes: 0 }).await;

    let p = store.progress_for_user(5).await;
    assert_eq!(p.total_xp, 20);
    assert_eq!(p.lessons[0].lesson_id, "intro-audio");
    assert_eq!(p.lessons[0].title, None);
    assert_eq!(p.lessons[1].title.as_deref(), Some("Les couleurs"));
  }
}
