//! Loading app configuration (speech tags, exercise defaults, optional seed
//! chapters and batches) from TOML.
//!
//! See `AppConfig` for the expected schema. Everything is optional; missing
//! sections fall back to the defaults below.

use serde::Deserialize;
use tracing::{error, info};

#[derive(Clone, Debug, Deserialize, Default)]
pub struct AppConfig {
  #[serde(default)]
  pub speech: SpeechTags,
  #[serde(default)]
  pub exercise: ExerciseSettings,
  #[serde(default)]
  pub chapters: Vec<ChapterCfg>,
  #[serde(default)]
  pub batches: Vec<BatchCfg>,
}

/// Static identifying metadata sent with every pronunciation request.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct SpeechTags {
  pub mode: String,
  pub user_tag: String,
  pub source_tag: String,
  pub role_tag: String,
}

impl Default for SpeechTags {
  fn default() -> Self {
    Self {
      mode: "Custom".into(),
      user_tag: "Guest_User".into(),
      source_tag: "Web_App".into(),
      role_tag: "Student".into(),
    }
  }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct ExerciseSettings {
  /// Reward stored when an exercise is published without one (or with 0).
  pub default_xp_reward: u32,
}

impl Default for ExerciseSettings {
  fn default() -> Self { Self { default_xp_reward: 10 } }
}

/// Chapter entry accepted in TOML configuration.
#[derive(Clone, Debug, Deserialize)]
pub struct ChapterCfg {
  pub title: String,
  #[serde(default)] pub description: String,
  #[serde(default)] pub sequence_order: Option<i32>,
  /// Batch names the chapter is unlocked for.
  #[serde(default)] pub unlocked_for: Vec<String>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct BatchCfg {
  pub name: String,
}

/// Attempt to load `AppConfig` from LINGO_CONFIG_PATH. On any parsing/IO error, returns None.
pub fn load_app_config_from_env() -> Option<AppConfig> {
  let path = std::env::var("LINGO_CONFIG_PATH").ok()?;
  match std::fs::read_to_string(&path) {
    Ok(s) => match toml::from_str::<AppConfig>(&s) {
      Ok(cfg) => {
        info!(target: "lingo_backend", %path, chapters = cfg.chapters.len(), batches = cfg.batches.len(), "Loaded app config (TOML)");
        Some(cfg)
      }
      Err(e) => {
        error!(target: "lingo_backend", %path, error = %e, "Failed to parse TOML config");
        None
      }
    },
    Err(e) => {
      error!(target: "lingo_backend", %path, error = %e, "Failed to read TOML config file");
      None
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn partial_toml_keeps_defaults() {
    let cfg: AppConfig = toml::from_str(
      r#"
        [speech]
        user_tag = "Lycee_Demo"

        [[chapters]]
        title = "Les salutations"
        unlocked_for = ["B1"]
      "#,
    )
    .unwrap();
    assert_eq!(cfg.speech.user_tag, "Lycee_Demo");
    assert_eq!(cfg.speech.mode, "Custom");
    assert_eq!(cfg.exercise.default_xp_reward, 10);
    assert_eq!(cfg.chapters[0].unlocked_for, vec!["B1".to_string()]);
    assert!(cfg.batches.is_empty());
  }
}
