//! Public protocol structs for WebSocket and HTTP endpoints (serde ready).
//! Keep this small and stable to evolve backend and frontend independently.
//!
//! Question views never carry answers: the client renders prompts, the
//! server grades.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::{ExerciseKind, ProgressRecord, QuestionContent};
use crate::session::{ExerciseSession, Interaction, MatchOutcome, SessionError, WordTile};

/// Messages the client can send over WebSocket.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientWsMessage {
    Ping,
    OpenExercise {
        #[serde(rename = "exerciseId")]
        exercise_id: i64,
    },
    TypeAnswer {
        text: String,
    },
    ChooseTruth {
        value: bool,
    },
    SelectLeft {
        index: usize,
    },
    SelectRight {
        index: usize,
    },
    PickWord {
        id: usize,
    },
    PutBackWord {
        id: usize,
    },
    Check,
    Next,
    StartRecording {
        #[serde(rename = "permissionGranted")]
        permission_granted: bool,
    },
    AudioChunk {
        #[serde(rename = "audioBase64")]
        audio_base64: String,
    },
    StopRecording,
    ResetSpeaking,
    Leave,
}

/// Messages the server sends back over WebSocket.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerWsMessage {
    Pong,
    Question {
        question: QuestionView,
    },
    Ack,
    MatchUpdate {
        #[serde(flatten)]
        outcome: MatchOutcome,
        matched: Vec<usize>,
        /// Pending one-sided selection, if any.
        #[serde(rename = "selectedLeft")]
        selected_left: Option<usize>,
        #[serde(rename = "selectedRight")]
        selected_right: Option<usize>,
        #[serde(rename = "allMatched")]
        all_matched: bool,
    },
    Words {
        pool: Vec<WordTile>,
        constructed: Vec<WordTile>,
    },
    Verdict {
        correct: bool,
        score: u32,
        mistakes: u32,
        #[serde(rename = "isLast")]
        is_last: bool,
    },
    Recording {
        state: &'static str,
        bytes: usize,
    },
    SpeechResult {
        correct: bool,
        #[serde(rename = "feedbackHtml")]
        feedback_html: String,
        score: u32,
        mistakes: u32,
        #[serde(rename = "isLast")]
        is_last: bool,
    },
    SpeechError {
        message: String,
    },
    Finished {
        progress: ProgressRecord,
    },
    Error {
        message: String,
    },
}

/// Speech failures get their own message so the client can offer a retry.
impl From<SessionError> for ServerWsMessage {
    fn from(e: SessionError) -> Self {
        match e {
            SessionError::Speech(e) => ServerWsMessage::SpeechError { message: e.to_string() },
            other => ServerWsMessage::Error { message: other.to_string() },
        }
    }
}

/// One side of a match question, keyed by the pair's original index.
#[derive(Debug, Serialize)]
pub struct MatchItem {
    pub index: usize,
    pub text: String,
}

/// What the student sees for the current question.
#[derive(Debug, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PromptView {
    FillBlank {
        text: String,
        options: Option<Vec<String>>,
    },
    TrueFalse {
        statement: String,
    },
    Match {
        left: Vec<MatchItem>,
        right: Vec<MatchItem>,
    },
    Story {
        story: String,
        question: String,
    },
    JumbledSentence {
        pool: Vec<WordTile>,
        constructed: Vec<WordTile>,
    },
    Speaking {
        text: String,
    },
    /// Authored content that failed validation; the question can't be played.
    Unplayable {
        message: String,
    },
}

#[derive(Debug, Serialize)]
pub struct QuestionView {
    pub exercise_id: i64,
    pub question_id: i64,
    pub question_type: String,
    pub index: usize,
    pub total: usize,
    pub is_last: bool,
    pub score: u32,
    pub mistakes: u32,
    pub prompt: PromptView,
}

/// Render the session's current question without its answer.
pub fn question_view(session: &ExerciseSession) -> QuestionView {
    let q = session.current_question();
    let prompt = match (session.content(), session.interaction()) {
        (Err(e), _) => PromptView::Unplayable { message: e.to_string() },
        (Ok(QuestionContent::FillBlank(c)), _) => PromptView::FillBlank {
            text: c.text.clone(),
            options: c.options.clone(),
        },
        (Ok(QuestionContent::TrueFalse(c)), _) => PromptView::TrueFalse { statement: c.statement.clone() },
        (Ok(QuestionContent::Match(c)), interaction) => {
            let left = c
                .pairs
                .iter()
                .enumerate()
                .map(|(index, p)| MatchItem { index, text: p.left.clone() })
                .collect();
            let order: Vec<usize> = match interaction {
                Some(Interaction::Match(board)) => board.right_order().to_vec(),
                _ => (0..c.pairs.len()).collect(),
            };
            let right = order
                .into_iter()
                .filter_map(|index| c.pairs.get(index).map(|p| MatchItem { index, text: p.right.clone() }))
                .collect();
            PromptView::Match { left, right }
        }
        (Ok(QuestionContent::Story(c)), _) => PromptView::Story {
            story: c.story.clone(),
            question: c.question.clone(),
        },
        (Ok(QuestionContent::JumbledSentence(_)), Some(Interaction::Words(board))) => PromptView::JumbledSentence {
            pool: board.pool().to_vec(),
            constructed: board.constructed().to_vec(),
        },
        (Ok(QuestionContent::JumbledSentence(_)), _) => PromptView::JumbledSentence { pool: vec![], constructed: vec![] },
        (Ok(QuestionContent::Speaking(c)), _) => PromptView::Speaking { text: c.text.clone() },
    };
    QuestionView {
        exercise_id: session.exercise_id(),
        question_id: q.question_id,
        question_type: q.question_type.clone(),
        index: session.index(),
        total: session.total(),
        is_last: session.is_last(),
        score: session.score(),
        mistakes: session.mistakes(),
        prompt,
    }
}

//
// HTTP request/response DTOs
//

#[derive(Serialize)]
pub struct HealthOut {
    pub ok: bool,
}

/// Completion body. `lesson_id` may arrive as a number or a string.
#[derive(Debug, Deserialize)]
pub struct CompletionIn {
    #[serde(default)]
    pub lesson_id: Option<Value>,
    #[serde(default)]
    pub xp_gained: Option<i64>,
    #[serde(default)]
    pub mistakes: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct ChapterIn {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub order: Option<i32>,
}

#[derive(Debug, Deserialize)]
pub struct LockIn {
    pub batch_id: i64,
    pub chapter_id: i64,
    pub unlock: bool,
}

#[derive(Debug, Serialize)]
pub struct AccessOut {
    pub batch_id: i64,
    pub chapter_id: i64,
}

/// Exercise creation body: `{title, chapter_id, type, xp_reward, questions}`.
#[derive(Debug, Deserialize)]
pub struct ExerciseIn {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub chapter_id: Option<i64>,
    #[serde(default, rename = "type")]
    pub kind: ExerciseKind,
    #[serde(default)]
    pub xp_reward: Option<u32>,
    #[serde(default)]
    pub questions: Vec<QuestionIn>,
}

/// Metadata for publishing the caller's draft queue.
#[derive(Debug, Deserialize)]
pub struct DraftPublishIn {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub chapter_id: Option<i64>,
    #[serde(default, rename = "type")]
    pub kind: ExerciseKind,
    #[serde(default)]
    pub xp_reward: Option<u32>,
}

#[derive(Serialize)]
pub struct QueueOut {
    pub queued: usize,
}

#[derive(Debug, Deserialize)]
pub struct QuestionIn {
    pub question_type: String,
    #[serde(default)]
    pub content: Value,
}

#[derive(Serialize)]
pub struct MessageOut<T: Serialize> {
    pub msg: String,
    #[serde(flatten)]
    pub data: T,
}

#[derive(Serialize)]
pub struct ValidateOut {
    pub ok: bool,
    pub content: QuestionContent,
}
