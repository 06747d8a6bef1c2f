//! Application state: the content/progress store, admins' draft queues, the
//! optional speech client, and the loaded configuration.
//!
//! Startup fills the store with the built-in demo content, then adds any
//! batches and chapters from the TOML config.

use std::collections::HashMap;

use tokio::sync::RwLock;
use tracing::{error, info, instrument, warn};

use crate::builder::QuestionQueue;
use crate::config::{load_app_config_from_env, AppConfig};
use crate::seeds::{demo_exercise, DEMO_BATCH, DEMO_CHAPTER_DESCRIPTION, DEMO_CHAPTER_TITLE};
use crate::speech_client::SpeechClient;
use crate::store::Store;

pub struct AppState {
    pub store: Store,
    /// Unpublished question queues by admin user id.
    pub drafts: RwLock<HashMap<i64, QuestionQueue>>,
    pub speech: Option<SpeechClient>,
    pub config: AppConfig,
}

impl AppState {
    /// Build state from env: load config, init the speech client, seed the store.
    #[instrument(level = "info", skip_all)]
    pub async fn new() -> Self {
        let config = load_app_config_from_env().unwrap_or_default();

        let speech = SpeechClient::from_env(config.speech.clone());
        if let Some(sc) = &speech {
            info!(target: "lingo_backend", base_url = %sc.base_url, api_name = %sc.api_name, "Speech scoring enabled.");
        } else {
            warn!(target: "lingo_backend", "Speech scoring disabled (no SPEECH_BASE_URL). Speaking questions cannot be analyzed.");
        }

        let state = Self::with_parts(Store::new(config.exercise.default_xp_reward), speech, config);
        state.seed().await;
        state
    }

    pub fn with_parts(store: Store, speech: Option<SpeechClient>, config: AppConfig) -> Self {
        Self { store, drafts: RwLock::new(HashMap::new()), speech, config }
    }

    /// Demo content first, then configured batches and chapters.
    async fn seed(&self) {
        let demo_batch = self.store.create_batch(DEMO_BATCH).await;
        let demo_chapter = self
            .store
            .create_chapter(DEMO_CHAPTER_TITLE, DEMO_CHAPTER_DESCRIPTION, None)
            .await;
        if let Err(e) = self
            .store
            .set_chapter_access(demo_batch.batch_id, demo_chapter.chapter_id, true)
            .await
        {
            error!(target: "lingo_backend", error = %e, "Could not unlock demo chapter");
        }
        match self.store.create_exercise(demo_exercise(demo_chapter.chapter_id)).await {
            Ok(ex) => info!(target: "lingo_backend", exercise_id = ex.exercise_id, "Demo exercise ready"),
            Err(e) => error!(target: "lingo_backend", error = %e, "Could not create demo exercise"),
        }

        let mut batch_ids = HashMap::<String, i64>::new();
        batch_ids.insert(demo_batch.batch_name.clone(), demo_batch.batch_id);
        for b in &self.config.batches {
            if batch_ids.contains_key(&b.name) {
                continue;
            }
            let batch = self.store.create_batch(&b.name).await;
            batch_ids.insert(batch.batch_name, batch.batch_id);
        }

        for cc in &self.config.chapters {
            if cc.title.trim().is_empty() {
                error!(target: "lingo_backend", "Skipping configured chapter: missing title.");
                continue;
            }
            let chapter = self
                .store
                .create_chapter(&cc.title, &cc.description, cc.sequence_order)
                .await;
            for name in &cc.unlocked_for {
                let Some(batch_id) = batch_ids.get(name) else {
                    warn!(target: "lingo_backend", chapter = %cc.title, batch = %name, "Unknown batch in unlocked_for");
                    continue;
                };
                if let Err(e) = self.store.set_chapter_access(*batch_id, chapter.chapter_id, true).await {
                    error!(target: "lingo_backend", error = %e, "Could not unlock configured chapter");
                }
            }
        }

        info!(
            target: "lingo_backend",
            batches = batch_ids.len(),
            chapters = self.store.list_chapters().await.len(),
            "Startup content inventory"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::QuestionQueue;
use crate::config::{BatchCfg, ChapterCfg};

    #[tokio::test]
    async fn configured_chapters_are_unlocked_for_named_batches() {
        let config = AppConfig {
            batches: vec![BatchCfg { name: "B1".into() }],
            chapters: vec![ChapterCfg {
                title: "Au café".into(),
                description: String::new(),
                sequence_order: Some(5),
                unlocked_for: vec!["B1".into(), "Nope".into()],
            }],
            ..AppConfig::default()
        };
        let state = AppState::with_parts(Store::new(10), None, config);
        state.seed().await;

        let b1 = state.store.find_batch("B1").await.unwrap();
        let demo = state.store.find_batch(DEMO_BATCH).await.unwrap();
        assert!(state.store.exercises_for_batch(b1.batch_id).await.is_empty());
        assert_eq!(state.store.list_chapters().await.len(), 2);
        assert_eq!(state.store.access_map().await.len(), 2);
        assert_eq!(state.store.exercises_for_batch(demo.batch_id).await.len(), 1);
    }
}
