//! Background task manager for long-running ingestion jobs.
//!
//! Submit creates a record and spawns one worker; the worker owns the whole
//! pending → processing → {completed|failed} lifecycle (transitions are
//! monotone because nothing else writes a task). The uploaded temp file is
//! unlinked on every terminal path. Document parsing itself runs on the
//! blocking pool inside the engine, so concurrent uploads keep the request
//! loop responsive.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use std::time::Instant;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use siliqa_retrieval::RagEngine;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct TaskRecord {
    pub task_id: String,
    pub filename: String,
    pub status: TaskStatus,
    pub chunks_created: usize,
    pub error: Option<String>,
    pub created_at: String,
    pub started_at: Option<String>,
    pub completed_at: Option<String>,
    /// Processing time in seconds, set on completion.
    pub duration: Option<f64>,
    #[serde(skip)]
    pub temp_path: Option<PathBuf>,
}

#[derive(Default)]
pub struct TaskManager {
    tasks: RwLock<HashMap<String, TaskRecord>>,
}

impl TaskManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a task and spawn its worker; returns the id for polling.
    pub fn submit(
        self: &Arc<Self>,
        engine: Arc<RagEngine>,
        filename: String,
        temp_path: PathBuf,
    ) -> String {
        let task_id = Uuid::new_v4().simple().to_string()[..12].to_string();
        let record = TaskRecord {
            task_id: task_id.clone(),
            filename: filename.clone(),
            status: TaskStatus::Pending,
            chunks_created: 0,
            error: None,
            created_at: Utc::now().to_rfc3339(),
            started_at: None,
            completed_at: None,
            duration: None,
            temp_path: Some(temp_path.clone()),
        };
        self.tasks
            .write()
            .expect("task table lock poisoned")
            .insert(task_id.clone(), record);

        let manager = Arc::clone(self);
        let id = task_id.clone();
        tokio::spawn(async move {
            manager.run_task(engine, id, filename, temp_path).await;
        });

        task_id
    }

    async fn run_task(
        &self,
        engine: Arc<RagEngine>,
        task_id: String,
        filename: String,
        temp_path: PathBuf,
    ) {
        self.update(&task_id, |task| {
            task.status = TaskStatus::Processing;
            task.started_at = Some(Utc::now().to_rfc3339());
        });
        let started = Instant::now();

        let outcome = engine.ingest_document(&temp_path, &filename).await;

        let duration = started.elapsed().as_secs_f64();
        match outcome {
            Ok(chunks) => {
                info!(task = %task_id, file = %filename, chunks, "ingestion task completed");
                self.update(&task_id, |task| {
                    task.status = TaskStatus::Completed;
                    task.chunks_created = chunks;
                    task.completed_at = Some(Utc::now().to_rfc3339());
                    task.duration = Some(duration);
                });
            }
            Err(e) => {
                warn!(task = %task_id, file = %filename, error = %e, "ingestion task failed");
                self.update(&task_id, |task| {
                    task.status = TaskStatus::Failed;
                    task.error = Some(e.to_string());
                    task.completed_at = Some(Utc::now().to_rfc3339());
                    task.duration = Some(duration);
                });
            }
        }

        // Temp file cleanup on every terminal path.
        if temp_path.exists() {
            if let Err(e) = std::fs::remove_file(&temp_path) {
                warn!(path = %temp_path.display(), error = %e, "temp file cleanup failed");
            }
        }
        self.update(&task_id, |task| task.temp_path = None);
    }

    fn update(&self, task_id: &str, mutate: impl FnOnce(&mut TaskRecord)) {
        if let Some(task) = self
            .tasks
            .write()
            .expect("task table lock poisoned")
            .get_mut(task_id)
        {
            mutate(task);
        }
    }

    /// Snapshot of one task.
    pub fn get(&self, task_id: &str) -> Option<TaskRecord> {
        self.tasks
            .read()
            .expect("task table lock poisoned")
            .get(task_id)
            .cloned()
    }

    /// All tasks, newest first.
    pub fn list(&self) -> Vec<TaskRecord> {
        let mut tasks: Vec<TaskRecord> = self
            .tasks
            .read()
            .expect("task table lock poisoned")
            .values()
            .cloned()
            .collect();
        tasks.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        tasks
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use siliqa_config::Settings;
    use siliqa_llm::{ChatProvider, EmbeddingProvider, LlmError, Message, TokenStream};
    use std::time::Duration;

    struct StubChat;

    #[async_trait]
    impl ChatProvider for StubChat {
        async fn chat(&self, _m: &[Message]) -> Result<String, LlmError> {
            Ok("ok".to_string())
        }
        async fn chat_with_timeout(
            &self,
            m: &[Message],
            _t: Duration,
        ) -> Result<String, LlmError> {
            self.chat(m).await
        }
        async fn stream(&self, _m: &[Message]) -> Result<TokenStream, LlmError> {
            let (tx, rx) = tokio::sync::mpsc::channel(1);
            drop(tx);
            Ok(rx)
        }
    }

    struct StubEmbedder;

    #[async_trait]
    impl EmbeddingProvider for StubEmbedder {
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, LlmError> {
            Ok(texts.iter().map(|t| vec![t.len() as f32, 1.0]).collect())
        }
    }

    fn engine(dir: &std::path::Path) -> Arc<RagEngine> {
        let mut settings = Settings::from_env();
        settings.persist_dir = dir.to_path_buf();
        settings.rerank_enabled = false;
        RagEngine::with_providers(settings, Arc::new(StubChat), Arc::new(StubEmbedder), None)
            .unwrap()
    }

    async fn wait_terminal(manager: &TaskManager, task_id: &str) -> TaskRecord {
        for _ in 0..200 {
            let task = manager.get(task_id).expect("task exists");
            if matches!(task.status, TaskStatus::Completed | TaskStatus::Failed) {
                return task;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("task never reached a terminal state");
    }

    #[tokio::test]
    async fn submit_completes_and_unlinks_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(dir.path());
        let manager = Arc::new(TaskManager::new());

        let temp = dir.path().join("upload.md");
        std::fs::write(&temp, "# T\n\nbody text for the index\n").unwrap();

        let task_id = manager.submit(engine, "upload.md".to_string(), temp.clone());
        // Immediately visible as pending or already processing.
        assert!(manager.get(&task_id).is_some());

        let task = wait_terminal(&manager, &task_id).await;
        assert_eq!(task.status, TaskStatus::Completed);
        assert!(task.chunks_created > 0);
        assert!(task.error.is_none());
        assert!(task.duration.unwrap() >= 0.0);
        assert!(task.started_at.is_some() && task.completed_at.is_some());
        assert!(!temp.exists(), "temp file must be unlinked");
    }

    #[tokio::test]
    async fn failed_ingestion_marks_task_failed_and_cleans_up() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(dir.path());
        let manager = Arc::new(TaskManager::new());

        let temp = dir.path().join("upload.txt"); // unsupported extension
        std::fs::write(&temp, "plain text").unwrap();

        let task_id = manager.submit(engine, "upload.txt".to_string(), temp.clone());
        let task = wait_terminal(&manager, &task_id).await;

        assert_eq!(task.status, TaskStatus::Failed);
        assert!(task.error.unwrap().contains("unsupported"));
        assert!(!temp.exists());
    }

    #[tokio::test]
    async fn list_returns_newest_first() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(dir.path());
        let manager = Arc::new(TaskManager::new());

        let first = dir.path().join("a.md");
        std::fs::write(&first, "# A\n\nbody\n").unwrap();
        let first_id = manager.submit(engine.clone(), "a.md".to_string(), first);
        wait_terminal(&manager, &first_id).await;

        let second = dir.path().join("b.md");
        std::fs::write(&second, "# B\n\nbody\n").unwrap();
        let second_id = manager.submit(engine, "b.md".to_string(), second);
        wait_terminal(&manager, &second_id).await;

        let listed = manager.list();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].task_id, second_id);
    }

    #[test]
    fn unknown_task_is_none() {
        let manager = TaskManager::new();
        assert!(manager.get("missing").is_none());
    }
}
