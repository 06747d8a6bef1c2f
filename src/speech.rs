//! Speech evaluation adapter: recording lifecycle for one speaking question.
//!
//! States: `Idle -> Recording -> Analyzing -> Result | Error`.
//!
//! The browser captures audio and streams WAV bytes to us; the microphone it
//! records from is represented by an `InputDevice` lease. A lease is released
//! when the recording stops, fails, or is dropped (navigation away, socket
//! close), so the device is never left held.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info, instrument, warn};

pub const WAV_MIME: &str = "audio/wav";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SpeechError {
  #[error("Microphone access denied.")]
  PermissionDenied,
  #[error("The microphone is already in use.")]
  DeviceBusy,
  #[error("A recording is already in progress.")]
  AlreadyRecording,
  #[error("Analysis is still running; wait for the result before recording again.")]
  AnalysisInFlight,
  #[error("No recording is in progress.")]
  NotRecording,
  #[error("Nothing was recorded. Please try again.")]
  EmptyRecording,
  #[error("The speech service is not configured.")]
  NotConfigured,
  #[error("Analysis failed: {0}")]
  Service(String),
}

/// One finalized recording.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioClip {
  pub bytes: Vec<u8>,
  pub mime: &'static str,
}

/// The external pronunciation scorer. Returns the HTML feedback blob.
pub trait PronunciationScorer {
  fn score(&self, clip: &AudioClip, reference_text: &str) -> impl Future<Output = Result<String, SpeechError>> + Send;
}

/// Audio input device of one client. At most one lease is live at a time.
#[derive(Debug, Clone, Default)]
pub struct InputDevice {
  leases: Arc<AtomicUsize>,
}

impl InputDevice {
  pub fn new() -> Self { Self::default() }

  /// Acquire the device. `granted` is the client's permission answer.
  pub fn acquire(&self, granted: bool) -> Result<MicLease, SpeechError> {
    if !granted {
      return Err(SpeechError::PermissionDenied);
    }
    self
      .leases
      .compare_exchange(0, 1, Ordering::AcqRel, Ordering::Acquire)
      .map_err(|_| SpeechError::DeviceBusy)?;
    Ok(MicLease { leases: self.leases.clone() })
  }

  #[cfg(test)]
  pub fn in_use(&self) -> bool { self.leases.load(Ordering::Acquire) > 0 }
}

/// Held while recording; releases the device on drop.
#[derive(Debug)]
pub struct MicLease {
  leases: Arc<AtomicUsize>,
}

impl Drop for MicLease {
  fn drop(&mut self) {
    self.leases.fetch_sub(1, Ordering::AcqRel);
    debug!(target: "speech", "Microphone released");
  }
}

#[derive(Debug)]
pub struct Recording {
  _lease: MicLease,
  buf: Vec<u8>,
}

#[derive(Debug, Default)]
pub enum SpeechState {
  #[default]
  Idle,
  Recording(Recording),
  Analyzing,
  Result { feedback_html: String },
  Error { message: String },
}

impl SpeechState {
  pub fn name(&self) -> &'static str {
    match self {
      SpeechState::Idle => "idle",
      SpeechState::Recording(_) => "recording",
      SpeechState::Analyzing => "analyzing",
      SpeechState::Result { .. } => "result",
      SpeechState::Error { .. } => "error",
    }
  }
}

#[derive(Debug, Default)]
pub struct SpeechAdapter {
  state: SpeechState,
}

impl SpeechAdapter {
  pub fn new() -> Self { Self::default() }

  pub fn state(&self) -> &SpeechState { &self.state }

  /// Feedback blob of a successful analysis, if any.
  pub fn feedback(&self) -> Option<&str> {
    match &self.state {
      SpeechState::Result { feedback_html } => Some(feedback_html),
      _ => None,
    }
  }

  /// `Idle | Error --start--> Recording`. A refused permission stays in `Idle`.
  #[instrument(level = "debug", skip(self, device), fields(state = self.state.name()))]
  pub fn start(&mut self, device: &InputDevice, granted: bool) -> Result<(), SpeechError> {
    match self.state {
      SpeechState::Idle | SpeechState::Error { .. } | SpeechState::Result { .. } => {}
      SpeechState::Recording(_) => return Err(SpeechError::AlreadyRecording),
      SpeechState::Analyzing => return Err(SpeechError::AnalysisInFlight),
    }
    if let SpeechState::Error { message } = &self.state {
      debug!(target: "speech", previous_error = %message, "Retrying after a failed attempt");
    }
    match device.acquire(granted) {
      Ok(lease) => {
        self.state = SpeechState::Recording(Recording { _lease: lease, buf: Vec::new() });
        debug!(target: "speech", "Recording started");
        Ok(())
      }
      Err(e) => {
        self.state = SpeechState::Idle;
        warn!(target: "speech", error = %e, "Could not start recording");
        Err(e)
      }
    }
  }

  /// Append captured bytes to the current recording.
  pub fn push_audio(&mut self, bytes: &[u8]) -> Result<usize, SpeechError> {
    match &mut self.state {
      SpeechState::Recording(r) => {
        r.buf.extend_from_slice(bytes);
        Ok(r.buf.len())
      }
      _ => Err(SpeechError::NotRecording),
    }
  }

  /// `Recording --stop--> Analyzing`. The lease is released on every path.
  #[instrument(level = "debug", skip(self), fields(state = self.state.name()))]
  pub fn stop(&mut self) -> Result<AudioClip, SpeechError> {
    let recording = match std::mem::take(&mut self.state) {
      SpeechState::Recording(r) => r,
      other => {
        self.state = other;
        return Err(SpeechError::NotRecording);
      }
    };
    let Recording { _lease: lease, buf } = recording;
    drop(lease);
    if buf.is_empty() {
      self.state = SpeechState::Error { message: SpeechError::EmptyRecording.to_string() };
      return Err(SpeechError::EmptyRecording);
    }
    self.state = SpeechState::Analyzing;
    info!(target: "speech", clip_bytes = buf.len(), "Recording finalized");
    Ok(AudioClip { bytes: buf, mime: WAV_MIME })
  }

  /// `Analyzing --(network)--> Result | Error`.
  #[instrument(level = "info", skip(self, scorer, clip, reference_text), fields(clip_bytes = clip.bytes.len()))]
  pub async fn analyze<S: PronunciationScorer>(
    &mut self,
    scorer: &S,
    clip: &AudioClip,
    reference_text: &str,
  ) -> Result<&str, SpeechError> {
    if !matches!(self.state, SpeechState::Analyzing) {
      return Err(SpeechError::NotRecording);
    }
    match scorer.score(clip, reference_text).await {
      Ok(feedback_html) => {
        info!(target: "speech", feedback_len = feedback_html.len(), "Pronunciation feedback received");
        self.state = SpeechState::Result { feedback_html };
        Ok(self.feedback().unwrap_or_default())
      }
      Err(e) => {
        warn!(target: "speech", error = %e, "Pronunciation analysis failed");
        self.state = SpeechState::Error { message: e.to_string() };
        Err(e)
      }
    }
  }

  /// Abandon whatever is going on and return to `Idle`.
  pub fn reset(&mut self) {
    self.state = SpeechState::Idle;
  }
}

#[cfg(test)]
pub(crate) mod tests {
  use super::*;

  /// Scorer double: echoes a canned result.
  pub(crate) struct FakeScorer(pub Result<String, SpeechError>);

  impl PronunciationScorer for FakeScorer {
    fn score(&self, _clip: &AudioClip, _reference_text: &str) -> impl Future<Output = Result<String, SpeechError>> + Send {
      let out = self.0.clone();
      async move { out }
    }
  }

  #[test]
  fn permission_denied_returns_to_idle_without_holding_device() {
    let device = InputDevice::new();
    let mut a = SpeechAdapter::new();
    assert_eq!(a.start(&device, false), Err(SpeechError::PermissionDenied));
    assert!(matches!(a.state(), SpeechState::Idle));
    assert!(!device.in_use());
  }

  #[test]
  fn stop_releases_device_and_rejects_empty_clip() {
    let device = InputDevice::new();
    let mut a = SpeechAdapter::new();
    a.start(&device, true).unwrap();
    assert!(device.in_use());
    assert_eq!(a.stop(), Err(SpeechError::EmptyRecording));
    assert!(!device.in_use());
    assert!(matches!(a.state(), SpeechState::Error { .. }));
    // retry from Error
    a.start(&device, true).unwrap();
    assert_eq!(a.push_audio(b"RIFF"), Ok(4));
    let clip = a.stop().unwrap();
    assert_eq!(clip.mime, WAV_MIME);
    assert!(!device.in_use());
  }

  #[test]
  fn dropping_a_recording_releases_the_device() {
    let device = InputDevice::new();
    {
      let mut a = SpeechAdapter::new();
      a.start(&device, true).unwrap();
      assert!(device.in_use());
    }
    assert!(!device.in_use());
  }

  #[tokio::test]
  async fn cannot_start_while_analyzing() {
    let device = InputDevice::new();
    let mut a = SpeechAdapter::new();
    a.start(&device, true).unwrap();
    a.push_audio(b"RIFF....WAVE").unwrap();
    let clip = a.stop().unwrap();
    assert_eq!(a.start(&device, true), Err(SpeechError::AnalysisInFlight));

    let scorer = FakeScorer(Ok("<b>Très bien</b>".into()));
    assert_eq!(a.analyze(&scorer, &clip, "Bonjour").await, Ok("<b>Très bien</b>"));
    assert_eq!(a.feedback(), Some("<b>Très bien</b>"));
  }

  #[tokio::test]
  async fn service_failure_is_an_error_state_not_a_verdict() {
    let device = InputDevice::new();
    let mut a = SpeechAdapter::new();
    a.start(&device, true).unwrap();
    a.push_audio(&[1, 2, 3]).unwrap();
    let clip = a.stop().unwrap();
    let scorer = FakeScorer(Err(SpeechError::Service("HTTP 502".into())));
    assert!(a.analyze(&scorer, &clip, "Bonjour").await.is_err());
    assert!(matches!(a.state(), SpeechState::Error { .. }));
    assert_eq!(a.feedback(), None);
    a.reset();
    assert!(matches!(a.state(), SpeechState::Idle));
  }
}
