//! Exercise session: the in-memory state of one student's attempt at one exercise.
//!
//! Phases:
//!   AwaitingAnswer(i) --check--> Feedback(i, verdict)
//!   Feedback(i, _)    --next-->  AwaitingAnswer(i + 1)      (not last)
//!   Feedback(last, _) --next-->  Finished                   (submits one progress record)
//!
//! Each question gets a fresh interaction state on entry (typed text, choice,
//! match board, word board, speech adapter) which is dropped when the session
//! moves on. Nothing is persisted until the final `next`; dropping the session
//! earlier records nothing.

use std::collections::{BTreeSet, HashSet};
use std::future::Future;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::Rng;
use serde::Serialize;
use thiserror::Error;
use tracing::{error, info, instrument, warn};

use crate::domain::{Completion, ExerciseForPlay, ProgressRecord, QuestionContent, QuestionType, StoredQuestion};
use crate::grading::{grade_stored, Candidate, GradingError};
use crate::schema::{validate_stored, ValidationError};
use crate::speech::{AudioClip, InputDevice, PronunciationScorer, SpeechAdapter, SpeechError, SpeechState};
use crate::store::StoreError;

const MAX_SHUFFLE_ATTEMPTS: usize = 8;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
  #[error("This exercise has no questions.")]
  EmptyExercise,
  #[error("The exercise is already finished.")]
  Finished,
  #[error("This question has already been checked; continue to the next one.")]
  AlreadyChecked,
  #[error("Check your answer before moving on.")]
  NotChecked,
  #[error("Question {question_id} can't be played: {reason}")]
  MalformedContent { question_id: i64, reason: ValidationError },
  #[error("That action does not apply to a {0} question.")]
  WrongInteraction(QuestionType),
  #[error("There is no pair {0}.")]
  NoSuchPair(usize),
  #[error("There is no word {0} to move.")]
  NoSuchWord(usize),
  #[error(transparent)]
  Grading(#[from] GradingError),
  #[error(transparent)]
  Speech(#[from] SpeechError),
  #[error("Could not save your progress: {0}")]
  Persistence(#[from] StoreError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum Phase {
  AwaitingAnswer { index: usize },
  Feedback { index: usize, correct: bool },
  Finished,
}

/// Where completed sessions are recorded.
pub trait ProgressSink {
  fn submit(&self, user_id: i64, completion: &Completion) -> impl Future<Output = Result<ProgressRecord, StoreError>> + Send;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WordTile {
  pub id: usize,
  pub word: String,
}

/// Shuffle a sentence's words into a pool of tiles.
///
/// The draw is uniform; when the sentence has at least two distinct words and
/// the draw reproduces the sentence, it is redrawn, and as a last resort
/// rotated by one (a rotation of a non-constant sequence never equals it).
pub fn shuffle_words<R: Rng + ?Sized>(sentence: &str, rng: &mut R) -> Vec<WordTile> {
  let mut tiles: Vec<WordTile> = sentence
    .split_whitespace()
    .enumerate()
    .map(|(id, w)| WordTile { id, word: w.to_string() })
    .collect();
  let canonical: Vec<String> = tiles.iter().map(|t| t.word.clone()).collect();
  let distinct = canonical.iter().collect::<HashSet<_>>().len();
  if distinct < 2 {
    return tiles;
  }
  let is_canonical = |ts: &[WordTile]| ts.iter().map(|t| &t.word).eq(canonical.iter());
  for _ in 0..MAX_SHUFFLE_ATTEMPTS {
    tiles.shuffle(rng);
    if !is_canonical(&tiles) {
      return tiles;
    }
  }
  tiles.rotate_left(1);
  tiles
}

/// Pool of shuffled words and the sentence being built from them.
#[derive(Debug, Clone)]
pub struct WordBoard {
  pool: Vec<WordTile>,
  constructed: Vec<WordTile>,
}

impl WordBoard {
  pub fn new<R: Rng + ?Sized>(sentence: &str, rng: &mut R) -> Self {
    Self { pool: shuffle_words(sentence, rng), constructed: Vec::new() }
  }

  pub fn pool(&self) -> &[WordTile] { &self.pool }
  pub fn constructed(&self) -> &[WordTile] { &self.constructed }

  /// Move a word from the pool to the end of the constructed sentence.
  pub fn pick(&mut self, id: usize) -> Result<(), SessionError> {
    let pos = self.pool.iter().position(|t| t.id == id).ok_or(SessionError::NoSuchWord(id))?;
    let tile = self.pool.remove(pos);
    self.constructed.push(tile);
    Ok(())
  }

  /// Move a word from the constructed sentence back to the end of the pool.
  pub fn put_back(&mut self, id: usize) -> Result<(), SessionError> {
    let pos = self.constructed.iter().position(|t| t.id == id).ok_or(SessionError::NoSuchWord(id))?;
    let tile = self.constructed.remove(pos);
    self.pool.push(tile);
    Ok(())
  }

  fn arranged(&self) -> Vec<String> {
    self.constructed.iter().map(|t| t.word.clone()).collect()
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum MatchOutcome {
  /// One side is selected, waiting for the other.
  Selected,
  /// Left and right agree; the pair leaves play.
  Matched { index: usize },
  /// Left and right disagree; both selections are cleared. Not a mistake.
  Mismatch,
  /// The pair was already matched (its buttons are disabled).
  Ignored,
}

#[derive(Debug, Clone, Copy)]
enum Side {
  Left,
  Right,
}

/// Match-the-pairs board, keyed by each pair's original index.
#[derive(Debug, Clone)]
pub struct MatchBoard {
  pair_count: usize,
  left: Option<usize>,
  right: Option<usize>,
  matched: BTreeSet<usize>,
  right_order: Vec<usize>,
}

impl MatchBoard {
  pub fn new<R: Rng + ?Sized>(pair_count: usize, rng: &mut R) -> Self {
    let mut right_order: Vec<usize> = (0..pair_count).collect();
    right_order.shuffle(rng);
    Self { pair_count, left: None, right: None, matched: BTreeSet::new(), right_order }
  }

  pub fn matched(&self) -> &BTreeSet<usize> { &self.matched }
  /// Display order of the right column (original indices).
  pub fn right_order(&self) -> &[usize] { &self.right_order }
  pub fn selection(&self) -> (Option<usize>, Option<usize>) { (self.left, self.right) }
  pub fn all_matched(&self) -> bool { self.matched.len() == self.pair_count }

  pub fn select_left(&mut self, index: usize) -> Result<MatchOutcome, SessionError> {
    self.select(Side::Left, index)
  }

  pub fn select_right(&mut self, index: usize) -> Result<MatchOutcome, SessionError> {
    self.select(Side::Right, index)
  }

  fn select(&mut self, side: Side, index: usize) -> Result<MatchOutcome, SessionError> {
    if index >= self.pair_count {
      return Err(SessionError::NoSuchPair(index));
    }
    if self.matched.contains(&index) {
      return Ok(MatchOutcome::Ignored);
    }
    let other = match side {
      Side::Left => {
        self.left = Some(index);
        self.right
      }
      Side::Right => {
        self.right = Some(index);
        self.left
      }
    };
    let Some(other) = other else { return Ok(MatchOutcome::Selected) };
    self.left = None;
    self.right = None;
    if other == index {
      self.matched.insert(index);
      Ok(MatchOutcome::Matched { index })
    } else {
      Ok(MatchOutcome::Mismatch)
    }
  }
}

/// Transient answer state of the current question.
#[derive(Debug)]
pub enum Interaction {
  /// Typed answer (`fill_blank`, `story`).
  Text(String),
  Choice(Option<bool>),
  Match(MatchBoard),
  Words(WordBoard),
  Speaking(SpeechAdapter),
}

impl Interaction {
  fn enter<R: Rng + ?Sized>(content: &QuestionContent, rng: &mut R) -> Self {
    match content {
      QuestionContent::FillBlank(_) | QuestionContent::Story(_) => Interaction::Text(String::new()),
      QuestionContent::TrueFalse(_) => Interaction::Choice(None),
      QuestionContent::Match(m) => Interaction::Match(MatchBoard::new(m.pairs.len(), rng)),
      QuestionContent::JumbledSentence(j) => Interaction::Words(WordBoard::new(&j.sentence, rng)),
      QuestionContent::Speaking(_) => Interaction::Speaking(SpeechAdapter::new()),
    }
  }

  fn candidate(&self) -> Candidate {
    match self {
      Interaction::Text(s) => Candidate::Text(s.clone()),
      Interaction::Choice(c) => Candidate::Choice(*c),
      Interaction::Match(b) => Candidate::Matched(b.matched.clone()),
      Interaction::Words(w) => Candidate::Arranged(w.arranged()),
      Interaction::Speaking(a) => Candidate::Speech(a.feedback().map(str::to_string)),
    }
  }
}

/// Result of `next`.
#[derive(Debug, Clone)]
pub enum Advance {
  Question { index: usize },
  Finished(ProgressRecord),
}

#[derive(Debug)]
pub struct ExerciseSession {
  user_id: i64,
  exercise_id: i64,
  xp_reward: u32,
  questions: Vec<StoredQuestion>,
  phase: Phase,
  score: u32,
  mistakes: u32,
  content: Result<QuestionContent, ValidationError>,
  interaction: Option<Interaction>,
  device: InputDevice,
  rng: StdRng,
}

impl ExerciseSession {
  /// Open an exercise for a student. Questions are played in `question_id` order.
  #[instrument(level = "info", skip(exercise, rng), fields(exercise_id = exercise.exercise_id, questions = exercise.questions.len()))]
  pub fn open(user_id: i64, exercise: ExerciseForPlay, rng: StdRng) -> Result<Self, SessionError> {
    if exercise.questions.is_empty() {
      return Err(SessionError::EmptyExercise);
    }
    let mut questions = exercise.questions;
    questions.sort_by_key(|q| q.question_id);
    let mut session = Self {
      user_id,
      exercise_id: exercise.exercise_id,
      xp_reward: exercise.xp_reward,
      questions,
      phase: Phase::AwaitingAnswer { index: 0 },
      score: 0,
      mistakes: 0,
      content: Err(ValidationError::NotAnObject),
      interaction: None,
      device: InputDevice::new(),
      rng,
    };
    session.enter(0);
    info!(target: "session", user_id, exercise_id = session.exercise_id, "Session opened");
    Ok(session)
  }

  fn enter(&mut self, index: usize) {
    let question = &self.questions[index];
    self.content = validate_stored(question);
    self.interaction = match &self.content {
      Ok(c) => Some(Interaction::enter(c, &mut self.rng)),
      Err(e) => {
        error!(target: "session", question_id = question.question_id, exercise_id = self.exercise_id, error = %e, "Malformed question content");
        None
      }
    };
  }

  pub fn exercise_id(&self) -> i64 { self.exercise_id }
  pub fn phase(&self) -> Phase { self.phase }
  pub fn score(&self) -> u32 { self.score }
  pub fn mistakes(&self) -> u32 { self.mistakes }
  pub fn total(&self) -> usize { self.questions.len() }
  #[cfg(test)]
  pub fn microphone(&self) -> &InputDevice { &self.device }

  /// Index of the current question (the last one once finished).
  pub fn index(&self) -> usize {
    match self.phase {
      Phase::AwaitingAnswer { index } | Phase::Feedback { index, .. } => index,
      Phase::Finished => self.questions.len() - 1,
    }
  }

  pub fn is_last(&self) -> bool { self.index() + 1 == self.questions.len() }

  pub fn current_question(&self) -> &StoredQuestion { &self.questions[self.index()] }

  pub fn content(&self) -> Result<&QuestionContent, &ValidationError> { self.content.as_ref() }

  pub fn interaction(&self) -> Option<&Interaction> { self.interaction.as_ref() }

  fn awaiting(&self) -> Result<usize, SessionError> {
    match self.phase {
      Phase::AwaitingAnswer { index } => Ok(index),
      Phase::Feedback { .. } => Err(SessionError::AlreadyChecked),
      Phase::Finished => Err(SessionError::Finished),
    }
  }

  fn malformed(&self) -> SessionError {
    let reason = self.content.clone().err().unwrap_or(ValidationError::NotAnObject);
    SessionError::MalformedContent { question_id: self.current_question().question_id, reason }
  }

  fn question_type(&self) -> QuestionType {
    match &self.content {
      Ok(c) => c.question_type(),
      // only reached with a live interaction, which implies valid content
      Err(_) => QuestionType::FillBlank,
    }
  }

  /// Current interaction, if the session is waiting for an answer.
  fn interaction_mut(&mut self) -> Result<&mut Interaction, SessionError> {
    self.awaiting()?;
    if self.interaction.is_none() {
      return Err(self.malformed());
    }
    self.interaction.as_mut().ok_or(SessionError::Finished)
  }

  pub fn type_answer(&mut self, text: &str) -> Result<(), SessionError> {
    let qt = self.question_type();
    match self.interaction_mut()? {
      Interaction::Text(s) => {
        *s = text.to_string();
        Ok(())
      }
      _ => Err(SessionError::WrongInteraction(qt)),
    }
  }

  pub fn choose(&mut self, value: bool) -> Result<(), SessionError> {
    let qt = self.question_type();
    match self.interaction_mut()? {
      Interaction::Choice(c) => {
        *c = Some(value);
        Ok(())
      }
      _ => Err(SessionError::WrongInteraction(qt)),
    }
  }

  pub fn select_left(&mut self, index: usize) -> Result<MatchOutcome, SessionError> {
    self.match_board()?.select_left(index)
  }

  pub fn select_right(&mut self, index: usize) -> Result<MatchOutcome, SessionError> {
    self.match_board()?.select_right(index)
  }

  fn match_board(&mut self) -> Result<&mut MatchBoard, SessionError> {
    let qt = self.question_type();
    match self.interaction_mut()? {
      Interaction::Match(b) => Ok(b),
      _ => Err(SessionError::WrongInteraction(qt)),
    }
  }

  pub fn pick_word(&mut self, id: usize) -> Result<&WordBoard, SessionError> {
    let board = self.word_board()?;
    board.pick(id)?;
    Ok(&*board)
  }

  pub fn put_back_word(&mut self, id: usize) -> Result<&WordBoard, SessionError> {
    let board = self.word_board()?;
    board.put_back(id)?;
    Ok(&*board)
  }

  fn word_board(&mut self) -> Result<&mut WordBoard, SessionError> {
    let qt = self.question_type();
    match self.interaction_mut()? {
      Interaction::Words(w) => Ok(w),
      _ => Err(SessionError::WrongInteraction(qt)),
    }
  }

  fn speech(&mut self) -> Result<&mut SpeechAdapter, SessionError> {
    let qt = self.question_type();
    match self.interaction_mut()? {
      Interaction::Speaking(a) => Ok(a),
      _ => Err(SessionError::WrongInteraction(qt)),
    }
  }

  pub fn start_recording(&mut self, permission_granted: bool) -> Result<(), SessionError> {
    let device = self.device.clone();
    Ok(self.speech()?.start(&device, permission_granted)?)
  }

  pub fn push_audio(&mut self, bytes: &[u8]) -> Result<usize, SessionError> {
    Ok(self.speech()?.push_audio(bytes)?)
  }

  pub fn stop_recording(&mut self) -> Result<AudioClip, SessionError> {
    Ok(self.speech()?.stop()?)
  }

  pub fn reset_speaking(&mut self) -> Result<(), SessionError> {
    self.speech()?.reset();
    Ok(())
  }

  /// Send the clip for scoring. A returned feedback blob is graded (and so
  /// counted) immediately; a failure leaves the question open for a retry.
  #[instrument(level = "info", skip(self, scorer, clip), fields(exercise_id = self.exercise_id, index = self.index()))]
  pub async fn analyze<S: PronunciationScorer>(&mut self, scorer: &S, clip: &AudioClip) -> Result<(bool, String), SessionError> {
    let reference = match &self.content {
      Ok(QuestionContent::Speaking(s)) => s.text.clone(),
      Ok(other) => return Err(SessionError::WrongInteraction(other.question_type())),
      Err(_) => return Err(self.malformed()),
    };
    let feedback = self.speech()?.analyze(scorer, clip, &reference).await?.to_string();
    let correct = self.check()?;
    Ok((correct, feedback))
  }

  /// Grade the current interaction state and move to `Feedback`.
  #[instrument(level = "info", skip(self), fields(exercise_id = self.exercise_id))]
  pub fn check(&mut self) -> Result<bool, SessionError> {
    let index = self.awaiting()?;
    if let Err(e) = &self.content {
      error!(target: "session", exercise_id = self.exercise_id, index, error = %e, "Check aborted on malformed content");
      return Err(self.malformed());
    }
    let Some(interaction) = &self.interaction else { return Err(self.malformed()) };
    if let Interaction::Speaking(a) = interaction {
      match a.state() {
        SpeechState::Recording(_) => return Err(SpeechError::AlreadyRecording.into()),
        SpeechState::Analyzing => return Err(SpeechError::AnalysisInFlight.into()),
        _ => {}
      }
    }
    let correct = grade_stored(self.current_question(), &interaction.candidate())?;
    if correct {
      self.score += 1;
    } else {
      self.mistakes += 1;
    }
    self.phase = Phase::Feedback { index, correct };
    info!(target: "session", exercise_id = self.exercise_id, index, correct, score = self.score, mistakes = self.mistakes, "Answer checked");
    Ok(correct)
  }

  /// What a finished session reports: the fixed reward and the mistake count.
  pub fn completion(&self) -> Completion {
    Completion {
      lesson_id: self.exercise_id.to_string(),
      xp_gained: i64::from(self.xp_reward),
      mistakes: self.mistakes,
    }
  }

  /// Leave `Feedback`. On the last question this submits the progress record
  /// first and only then reports `Finished`; a failed submit keeps the
  /// session in `Feedback` so it can be retried.
  #[instrument(level = "info", skip(self, sink), fields(exercise_id = self.exercise_id))]
  pub async fn next<P: ProgressSink>(&mut self, sink: &P) -> Result<Advance, SessionError> {
    let index = match self.phase {
      Phase::Feedback { index, .. } => index,
      Phase::AwaitingAnswer { .. } => return Err(SessionError::NotChecked),
      Phase::Finished => return Err(SessionError::Finished),
    };
    if index + 1 < self.questions.len() {
      self.phase = Phase::AwaitingAnswer { index: index + 1 };
      self.enter(index + 1);
      return Ok(Advance::Question { index: index + 1 });
    }
    let completion = self.completion();
    let record = match sink.submit(self.user_id, &completion).await {
      Ok(r) => r,
      Err(e) => {
        warn!(target: "session", exercise_id = self.exercise_id, error = %e, "Progress submit failed");
        return Err(e.into());
      }
    };
    self.phase = Phase::Finished;
    self.interaction = None;
    info!(target: "session", exercise_id = self.exercise_id, progress_id = record.progress_id, xp = record.xp_gained, mistakes = record.mistakes, "Exercise finished");
    Ok(Advance::Finished(record))
  }
}

impl Drop for ExerciseSession {
  fn drop(&mut self) {
    if self.phase != Phase::Finished {
      info!(target: "session", exercise_id = self.exercise_id, index = self.index(), "Session discarded before finishing; nothing recorded");
    }
  }
}
