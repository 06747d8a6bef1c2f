//! Minimal client for the external pronunciation-scoring service (a Gradio app).
//!
//! One evaluation is three HTTP calls:
//!   1) upload the WAV clip (multipart) and get a server-side file path
//!   2) start `/call/{api}` with the positional inputs and get an event id
//!   3) read the server-sent-event stream for that event until `complete`
//!
//! Calls are instrumented and log sizes and latencies, never the audio or the
//! feedback contents.

use std::time::Duration;

use reqwest::header::{ACCEPT, USER_AGENT};
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{error, info, instrument};
use uuid::Uuid;

use crate::config::SpeechTags;
use crate::speech::{AudioClip, PronunciationScorer, SpeechError};
use crate::util::trunc_for_log;

#[derive(Clone)]
pub struct SpeechClient {
  pub client: reqwest::Client,
  pub base_url: String,
  pub api_name: String,
  pub tags: SpeechTags,
}

#[derive(Deserialize)]
struct EventId {
  event_id: String,
}

impl SpeechClient {
  /// Construct the client if SPEECH_BASE_URL is set; otherwise return None.
  pub fn from_env(tags: SpeechTags) -> Option<Self> {
    let base_url = std::env::var("SPEECH_BASE_URL").ok()?;
    let api_name = std::env::var("SPEECH_API_NAME").unwrap_or_else(|_| "run_eval".into());
    let timeout_secs = std::env::var("SPEECH_TIMEOUT_SECS")
      .ok()
      .and_then(|s| s.parse::<u64>().ok())
      .unwrap_or(60);

    let client = reqwest::Client::builder()
      .timeout(Duration::from_secs(timeout_secs))
      .build()
      .ok()?;

    Some(Self::new(client, base_url, api_name, tags))
  }

  pub fn new(client: reqwest::Client, base_url: String, api_name: String, tags: SpeechTags) -> Self {
    let base_url = base_url.trim_end_matches('/').to_string();
    let api_name = api_name.trim_start_matches('/').to_string();
    Self { client, base_url, api_name, tags }
  }

  #[instrument(level = "info", skip(self, clip), fields(clip_bytes = clip.bytes.len()))]
  async fn upload(&self, clip: &AudioClip) -> Result<String, SpeechError> {
    let url = format!("{}/gradio_api/upload", self.base_url);
    let part = Part::bytes(clip.bytes.clone())
      .file_name(format!("{}.wav", Uuid::new_v4()))
      .mime_str(clip.mime)
      .map_err(|e| SpeechError::Service(e.to_string()))?;
    let res = self.client.post(&url)
      .header(USER_AGENT, "lingo-backend/0.1")
      .multipart(Form::new().part("files", part))
      .send().await.map_err(|e| SpeechError::Service(e.to_string()))?;
    let paths: Vec<String> = ok_or_status(res).await?.json().await.map_err(|e| SpeechError::Service(e.to_string()))?;
    paths
      .into_iter()
      .next()
      .ok_or_else(|| SpeechError::Service("upload returned no file path".into()))
  }

  #[instrument(level = "info", skip(self, file_path, reference_text), fields(text_len = reference_text.len()))]
  async fn start_call(&self, file_path: &str, reference_text: &str) -> Result<String, SpeechError> {
    let url = format!("{}/gradio_api/call/{}", self.base_url, self.api_name);
    let body = json!({ "data": self.inputs(file_path, reference_text) });
    let res = self.client.post(&url)
      .header(USER_AGENT, "lingo-backend/0.1")
      .json(&body)
      .send().await.map_err(|e| SpeechError::Service(e.to_string()))?;
    let ev: EventId = ok_or_status(res).await?.json().await.map_err(|e| SpeechError::Service(e.to_string()))?;
    Ok(ev.event_id)
  }

  /// Positional inputs: `(audio, mode, null, reference, user, source, role)`.
  fn inputs(&self, file_path: &str, reference_text: &str) -> Value {
    json!([
      { "path": file_path, "meta": { "_type": "gradio.FileData" } },
      self.tags.mode,
      Value::Null,
      reference_text,
      self.tags.user_tag,
      self.tags.source_tag,
      self.tags.role_tag,
    ])
  }

  #[instrument(level = "info", skip(self), fields(%event_id))]
  async fn await_result(&self, event_id: &str) -> Result<String, SpeechError> {
    let url = format!("{}/gradio_api/call/{}/{}", self.base_url, self.api_name, event_id);
    let res = self.client.get(&url)
      .header(USER_AGENT, "lingo-backend/0.1")
      .header(ACCEPT, "text/event-stream")
      .send().await.map_err(|e| SpeechError::Service(e.to_string()))?;
    let body = ok_or_status(res).await?.text().await.map_err(|e| SpeechError::Service(e.to_string()))?;
    parse_event_stream(&body)
  }
}

impl PronunciationScorer for SpeechClient {
  async fn score(&self, clip: &AudioClip, reference_text: &str) -> Result<String, SpeechError> {
    let start = std::time::Instant::now();
    let result = async {
      let path = self.upload(clip).await?;
      let event_id = self.start_call(&path, reference_text).await?;
      self.await_result(&event_id).await
    }
    .await;
    let elapsed = start.elapsed();
    match &result {
      Ok(html) => info!(target: "speech", ?elapsed, feedback_len = html.len(), "Speech service responded"),
      Err(e) => error!(target: "speech", ?elapsed, error = %e, "Speech service call failed"),
    }
    result
  }
}

/// An unconfigured scorer fails every analysis, leaving the adapter retryable.
impl PronunciationScorer for Option<SpeechClient> {
  async fn score(&self, clip: &AudioClip, reference_text: &str) -> Result<String, SpeechError> {
    match self {
      Some(client) => client.score(clip, reference_text).await,
      None => Err(SpeechError::NotConfigured),
    }
  }
}

async fn ok_or_status(res: reqwest::Response) -> Result<reqwest::Response, SpeechError> {
  if res.status().is_success() {
    return Ok(res);
  }
  let status = res.status();
  let body = res.text().await.unwrap_or_default();
  Err(SpeechError::Service(format!("HTTP {}: {}", status, trunc_for_log(&body, 200))))
}

/// Pull the first output out of a Gradio SSE body.
/// `event: complete` carries `data: [<html>, ...]`; `event: error` is a failure.
fn parse_event_stream(body: &str) -> Result<String, SpeechError> {
  let mut event = "";
  for line in body.lines() {
    if let Some(name) = line.strip_prefix("event:") {
      event = name.trim();
      continue;
    }
    let Some(data) = line.strip_prefix("data:") else { continue };
    let data = data.trim();
    match event {
      "complete" => {
        let outputs: Vec<Value> = serde_json::from_str(data)
          .map_err(|e| SpeechError::Service(format!("undecodable result: {e}")))?;
        return match outputs.into_iter().next() {
          Some(Value::String(html)) => Ok(html),
          Some(other) => Ok(other.to_string()),
          None => Err(SpeechError::Service("empty result".into())),
        };
      }
      "error" => {
        return Err(SpeechError::Service(format!("service error: {}", trunc_for_log(data, 200))));
      }
      _ => {}
    }
  }
  Err(SpeechError::Service("result stream ended without a result".into()))
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn complete_event_yields_first_output() {
    let body = "event: generating\ndata: null\n\nevent: complete\ndata: [\"<h3>Score: 87</h3>\", null]\n\n";
    assert_eq!(parse_event_stream(body), Ok("<h3>Score: 87</h3>".to_string()));
  }

  #[test]
  fn error_event_and_truncated_stream_fail() {
    assert!(matches!(parse_event_stream("event: error\ndata: null\n"), Err(SpeechError::Service(_))));
    assert!(matches!(parse_event_stream("event: heartbeat\ndata: null\n"), Err(SpeechError::Service(_))));
  }

  #[test]
  fn inputs_follow_the_positional_contract() {
    let c = SpeechClient::new(reqwest::Client::new(), "http://scorer/".into(), "/run_eval".into(), SpeechTags::default());
    assert_eq!(c.base_url, "http://scorer");
    assert_eq!(c.api_name, "run_eval");
    let v = c.inputs("/tmp/x.wav", "Bonjour");
    assert_eq!(v[0]["path"], "/tmp/x.wav");
    assert_eq!(v[1], "Custom");
    assert!(v[2].is_null());
    assert_eq!(v[3], "Bonjour");
    assert_eq!(v[4], "Guest_User");
    assert_eq!(v[5], "Web_App");
    assert_eq!(v[6], "Student");
  }
}
