use crate::services::ledger::{default_pricing, ModelRate};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskKind {
    /// Creative writing: worth the premium model.
    StoryGeneration,
    /// Classifying a character name.
    NameAnalysis,
    SimpleTask,
    SpeechSynthesis,
}

impl TaskKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskKind::StoryGeneration => "story_generation",
            TaskKind::NameAnalysis => "name_analysis",
            TaskKind::SimpleTask => "simple_tasks",
            TaskKind::SpeechSynthesis => "speech_synthesis",
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ModelConfig {
    #[serde(default = "default_routing")]
    pub routing: BTreeMap<String, String>,
    #[serde(default = "default_model")]
    pub default_model: String,
    #[serde(default = "default_pricing")]
    pub pricing: BTreeMap<String, ModelRate>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            routing: default_routing(),
            default_model: default_model(),
            pricing: default_pricing(),
        }
    }
}

fn default_model() -> String {
    "MiniMax-Text-01".to_string()
}

fn default_routing() -> BTreeMap<String, String> {
    [
        (TaskKind::StoryGeneration, "MiniMax-M1"),
        (TaskKind::NameAnalysis, "MiniMax-Text-01"),
        (TaskKind::SimpleTask, "MiniMax-Text-01"),
        (TaskKind::SpeechSynthesis, "speech-02-hd"),
    ]
    .into_iter()
    .map(|(task, model)| (task.as_str().to_string(), model.to_string()))
    .collect()
}

/// Static task → model policy. Nothing here is inferred at runtime.
#[derive(Debug, Clone)]
pub struct ModelRouter {
    routes: BTreeMap<String, String>,
    fallback: String,
}

impl ModelRouter {
    pub fn new(config: &ModelConfig) -> Self {
        let mut routes = default_routing();
        routes.extend(config.routing.clone());
        Self {
            routes,
            fallback: config.default_model.clone(),
        }
    }

    pub fn select(&self, task: TaskKind) -> &str {
        self.select_named(task.as_str())
    }

    /// Unknown task names get the cheap default model.
    pub fn select_named(&self, task: &str) -> &str {
        self.routes
            .get(task)
            .map(String::as_str)
            .unwrap_or(&self.fallback)
    }
}

impl Default for ModelRouter {
    fn default() -> Self {
        Self::new(&ModelConfig::default())
    }
}
