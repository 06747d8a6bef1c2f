//! WebSocket upgrade + message loop. The socket task owns the caller's exercise
//! session; each client message is parsed as JSON, applied to the session, and
//! answered with one JSON message (two while a recording is being analyzed).
//!
//! Closing the socket drops the session: nothing is recorded and a held
//! microphone lease is released.

use std::future::Future;
use std::sync::Arc;
use axum::{
  extract::{
    ws::{Message, WebSocket},
    State, WebSocketUpgrade,
  },
  response::IntoResponse,
};
use rand::{rngs::StdRng, SeedableRng};
use tracing::{info, error, instrument, debug};

use crate::auth::CurrentUser;
use crate::logic::{decode_audio_chunk, open_session};
use crate::protocol::{question_view, ClientWsMessage, ServerWsMessage};
use crate::session::{Advance, ExerciseSession, Interaction, MatchOutcome, Phase};
use crate::speech::PronunciationScorer;
use crate::state::AppState;

#[instrument(level = "info", skip(ws, state), fields(user_id = user.id))]
pub async fn ws_upgrade(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>, user: CurrentUser) -> impl IntoResponse {
  info!(target: "lingo_backend", "WebSocket upgrade requested");
  ws.on_upgrade(move |socket| handle_ws(socket, state, user))
}

async fn send(socket: &mut WebSocket, msg: &ServerWsMessage) -> bool {
  let out = serde_json::to_string(msg).unwrap_or_else(|e| {
    serde_json::json!({ "type": "error", "message": format!("Serialization error: {}", e) }).to_string()
  });
  match socket.send(Message::Text(out)).await {
    Ok(()) => true,
    Err(e) => {
      error!(target: "lingo_backend", error = %e, "WS send error");
      false
    }
  }
}

#[instrument(level = "info", skip(socket, state, user), fields(user_id = user.id))]
async fn handle_ws(mut socket: WebSocket, state: Arc<AppState>, user: CurrentUser) {
  info!(target: "lingo_backend", "WebSocket connected");
  let mut session: Option<ExerciseSession> = None;
  'conn: while let Some(Ok(msg)) = socket.recv().await {
    match msg {
      Message::Text(txt) => {
        let replies = match serde_json::from_str::<ClientWsMessage>(&txt) {
          Ok(incoming) => {
            debug!(target: "lingo_backend", kind = message_kind(&incoming), "WS received");
            handle_client_ws(incoming, &state, &user, &mut session, &mut socket).await
          }
          Err(e) => vec![ServerWsMessage::Error { message: format!("Invalid JSON: {}", e) }],
        };
        for reply in &replies {
          if !send(&mut socket, reply).await {
            break 'conn;
          }
        }
      }
      Message::Ping(payload) => { let _ = socket.send(Message::Pong(payload)).await; }
      Message::Close(_) => break,
      _ => {}
    }
  }
  drop(session);
  info!(target: "lingo_backend", "WebSocket disconnected");
}

/// Message tag for logs; audio payloads are never logged.
fn message_kind(msg: &ClientWsMessage) -> &'static str {
  match msg {
    ClientWsMessage::Ping => "ping",
    ClientWsMessage::OpenExercise { .. } => "open_exercise",
    ClientWsMessage::TypeAnswer { .. } => "type_answer",
    ClientWsMessage::ChooseTruth { .. } => "choose_truth",
    ClientWsMessage::SelectLeft { .. } => "select_left",
    ClientWsMessage::SelectRight { .. } => "select_right",
    ClientWsMessage::PickWord { .. } => "pick_word",
    ClientWsMessage::PutBackWord { .. } => "put_back_word",
    ClientWsMessage::Check => "check",
    ClientWsMessage::Next => "next",
    ClientWsMessage::StartRecording { .. } => "start_recording",
    ClientWsMessage::AudioChunk { .. } => "audio_chunk",
    ClientWsMessage::StopRecording => "stop_recording",
    ClientWsMessage::ResetSpeaking => "reset_speaking",
    ClientWsMessage::Leave => "leave",
  }
}

async fn handle_client_ws(
  msg: ClientWsMessage,
  state: &AppState,
  user: &CurrentUser,
  slot: &mut Option<ExerciseSession>,
  socket: &mut WebSocket,
) -> Vec<ServerWsMessage> {
  match msg {
    ClientWsMessage::Ping => vec![ServerWsMessage::Pong],

    ClientWsMessage::OpenExercise { exercise_id } => {
      // Opening another exercise abandons the current one.
      *slot = None;
      match open_session(state, user.id, exercise_id, StdRng::from_entropy()).await {
        Ok(session) => {
          let question = question_view(&session);
          *slot = Some(session);
          vec![ServerWsMessage::Question { question }]
        }
        Err(message) => vec![ServerWsMessage::Error { message }],
      }
    }

    ClientWsMessage::Leave => {
      *slot = None;
      vec![ServerWsMessage::Ack]
    }

    other => {
      let Some(session) = slot.as_mut() else {
        return vec![ServerWsMessage::Error { message: "Open an exercise first.".into() }];
      };
      let replies = drive(other, state, session, socket).await.unwrap_or_else(|e| vec![e]);
      if session.phase() == Phase::Finished {
        *slot = None;
      }
      replies
    }
  }
}

/// Apply one in-session action.
async fn drive(
  msg: ClientWsMessage,
  state: &AppState,
  session: &mut ExerciseSession,
  socket: &mut WebSocket,
) -> Result<Vec<ServerWsMessage>, ServerWsMessage> {
  let reply = match msg {
    ClientWsMessage::TypeAnswer { text } => {
      session.type_answer(&text)?;
      ServerWsMessage::Ack
    }
    ClientWsMessage::ChooseTruth { value } => {
      session.choose(value)?;
      ServerWsMessage::Ack
    }
    ClientWsMessage::SelectLeft { index } => {
      let outcome = session.select_left(index)?;
      match_update(session, outcome)
    }
    ClientWsMessage::SelectRight { index } => {
      let outcome = session.select_right(index)?;
      match_update(session, outcome)
    }
    ClientWsMessage::PickWord { id } => {
      let board = session.pick_word(id)?;
      ServerWsMessage::Words { pool: board.pool().to_vec(), constructed: board.constructed().to_vec() }
    }
    ClientWsMessage::PutBackWord { id } => {
      let board = session.put_back_word(id)?;
      ServerWsMessage::Words { pool: board.pool().to_vec(), constructed: board.constructed().to_vec() }
    }
    ClientWsMessage::Check => {
      let correct = session.check()?;
      ServerWsMessage::Verdict {
        correct,
        score: session.score(),
        mistakes: session.mistakes(),
        is_last: session.is_last(),
      }
    }
    ClientWsMessage::Next => match session.next(&state.store).await? {
      Advance::Question { index } => {
        debug!(target: "session", index, total = session.total(), "Next question");
        ServerWsMessage::Question { question: question_view(session) }
      }
      Advance::Finished(progress) => ServerWsMessage::Finished { progress },
    },
    ClientWsMessage::StartRecording { permission_granted } => {
      session.start_recording(permission_granted)?;
      ServerWsMessage::Recording { state: "recording", bytes: 0 }
    }
    ClientWsMessage::AudioChunk { audio_base64 } => {
      let bytes = decode_audio_chunk(&audio_base64).map_err(|message| ServerWsMessage::SpeechError { message })?;
      let total = session.push_audio(&bytes)?;
      ServerWsMessage::Recording { state: "recording", bytes: total }
    }
    ClientWsMessage::StopRecording => {
      let notify = move |msg: ServerWsMessage| async move { send(socket, &msg).await };
      match stop_and_analyze(session, &state.speech, notify).await? {
        Some(reply) => reply,
        None => return Ok(vec![]),
      }
    }
    ClientWsMessage::ResetSpeaking => {
      session.reset_speaking()?;
      ServerWsMessage::Recording { state: "idle", bytes: 0 }
    }
    ClientWsMessage::Ping | ClientWsMessage::OpenExercise { .. } | ClientWsMessage::Leave => return Ok(vec![]),
  };
  Ok(vec![reply])
}

/// Finalize the recording, tell the client analysis has started, then score.
/// `None` means the client was gone before scoring, so the scorer is not called.
async fn stop_and_analyze<S, F, Fut>(
  session: &mut ExerciseSession,
  scorer: &S,
  notify: F,
) -> Result<Option<ServerWsMessage>, ServerWsMessage>
where
  S: PronunciationScorer,
  F: FnOnce(ServerWsMessage) -> Fut,
  Fut: Future<Output = bool>,
{
  let clip = session.stop_recording()?;
  if !notify(ServerWsMessage::Recording { state: "analyzing", bytes: clip.bytes.len() }).await {
    debug!(target: "speech", clip_bytes = clip.bytes.len(), "Client gone before analysis; skipping scorer");
    return Ok(None);
  }
  let (correct, feedback_html) = session.analyze(scorer, &clip).await?;
  Ok(Some(ServerWsMessage::SpeechResult {
    correct,
    feedback_html,
    score: session.score(),
    mistakes: session.mistakes(),
    is_last: session.is_last(),
  }))
}

fn match_update(session: &ExerciseSession, outcome: MatchOutcome) -> ServerWsMessage {
  let (matched, (selected_left, selected_right), all_matched) = match session.interaction() {
    Some(Interaction::Match(board)) => (board.matched().iter().copied().collect(), board.selection(), board.all_matched()),
    _ => (Vec::new(), (None, None), false),
  };
  ServerWsMessage::MatchUpdate { outcome, matched, selected_left, selected_right, all_matched }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::atomic::{AtomicUsize, Ordering};

  use crate::domain::{ExerciseForPlay, ExerciseKind, StoredQuestion};
  use crate::speech::{AudioClip, SpeechError};

  #[derive(Default)]
  struct CountingScorer {
    calls: AtomicUsize,
  }

  impl PronunciationScorer for CountingScorer {
    fn score(&self, _clip: &AudioClip, _reference_text: &str) -> impl Future<Output = Result<String, SpeechError>> + Send {
      self.calls.fetch_add(1, Ordering::SeqCst);
      async { Ok("<p>Bien</p>".to_string()) }
    }
  }

  fn session_with(question_type: &str, content: serde_json::Value) -> ExerciseSession {
    let exercise = ExerciseForPlay {
      exercise_id: 5,
      title: "Parler".into(),
      kind: ExerciseKind::Quiz,
      xp_reward: 10,
      questions: vec![StoredQuestion { question_id: 1, exercise_id: 5, question_type: question_type.into(), content }],
    };
    ExerciseSession::open(1, exercise, StdRng::seed_from_u64(3)).unwrap()
  }

  fn recording_session() -> ExerciseSession {
    let mut s = session_with("speaking", serde_json::json!({ "text": "Bonjour" }));
    s.start_recording(true).unwrap();
    s.push_audio(b"RIFF....").unwrap();
    s
  }

  #[test]
  fn match_update_reports_pending_selection() {
    let mut s = session_with("match", serde_json::json!({ "pairs": [{ "left": "un", "right": "one" }, { "left": "deux", "right": "two" }] }));
    let outcome = s.select_right(1).unwrap();
    let v = serde_json::to_value(match_update(&s, outcome)).unwrap();
    assert_eq!(v["outcome"], "selected");
    assert_eq!(v["selectedLeft"], serde_json::Value::Null);
    assert_eq!(v["selectedRight"], 1);
    let outcome = s.select_left(1).unwrap();
    let v = serde_json::to_value(match_update(&s, outcome)).unwrap();
    assert_eq!(v["matched"], serde_json::json!([1]));
    assert_eq!(v["selectedRight"], serde_json::Value::Null);
    assert_eq!(v["allMatched"], false);
  }

  #[tokio::test]
  async fn gone_client_skips_the_scorer() {
    let mut s = recording_session();
    let scorer = CountingScorer::default();
    let reply = stop_and_analyze(&mut s, &scorer, |_| async { false }).await.unwrap();
    assert!(reply.is_none());
    assert_eq!(scorer.calls.load(Ordering::SeqCst), 0);
  }

  #[tokio::test]
  async fn analyzing_notice_precedes_the_result() {
    let mut s = recording_session();
    let scorer = CountingScorer::default();
    let mut notices = Vec::new();
    let reply = stop_and_analyze(&mut s, &scorer, |m| {
      notices.push(serde_json::to_value(&m).unwrap());
      async { true }
    })
    .await
    .unwrap();
    assert_eq!(notices, vec![serde_json::json!({ "type": "recording", "state": "analyzing", "bytes": 8 })]);
    assert!(matches!(reply, Some(ServerWsMessage::SpeechResult { correct: true, score: 1, .. })));
    assert_eq!(scorer.calls.load(Ordering::SeqCst), 1);
  }
}
