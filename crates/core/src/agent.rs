//! Routes a free-form request to a project summary, a file listing, or both.

use crate::artifacts::ProjectLayout;
use crate::error::QueryError;
use crate::file_index::{format_file_listing, FileIndex};
use crate::retrieval::{QueryPipeline, RAG_TOP_K};
use crate::traits::{Embedder, GenerationParams, Generator};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

pub const INVALID_PROJECT: &str = "Please specify a valid project name.";

const DECISION_PARAMS: GenerationParams = GenerationParams {
    max_tokens: 64,
    temperature: 0.0,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentAction {
    Summarize,
    FindFiles,
    Both,
}

impl AgentAction {
    fn summarizes(self) -> bool {
        matches!(self, AgentAction::Summarize | AgentAction::Both)
    }

    fn lists_files(self) -> bool {
        matches!(self, AgentAction::FindFiles | AgentAction::Both)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Decision {
    pub action: AgentAction,
    #[serde(default)]
    pub project: Option<String>,
}

pub fn decision_prompt(query: &str) -> String {
    format!(
        r#"You are an intelligent assistant that analyzes user queries to decide what
action to take.

You must always respond in only a valid JSON format as described below:

{{
    "action": "summarize" | "find_files" | "both",
    "project": "<project_name> or null"
}}

Instructions:
- If the user is asking for a summary of a project, return "summarize" as the
    action, and the project name if specified, otherwise null.
- If the user wants to find files in a project, return "find_files" as the
    action, and the project name if specified, otherwise null.
- If the user wants both a summary and to find files, return "both" as the
    action, and the project name if specified, otherwise null.

User Query: {query}

JSON Response:
"#
    )
}

/// Pulls the first balanced JSON object out of a model reply.
fn first_json_object(reply: &str) -> Option<&str> {
    let start = reply.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in reply[start..].char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&reply[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }
    None
}

pub fn parse_decision(reply: &str) -> Result<Decision, QueryError> {
    let object = first_json_object(reply)
        .ok_or_else(|| QueryError::Undecided(format!("no JSON object in {reply:?}")))?;
    let mut decision: Decision = serde_json::from_str(object)
        .map_err(|error| QueryError::Undecided(format!("{error} in {object:?}")))?;

    decision.project = decision
        .project
        .map(|project| project.trim().to_string())
        .filter(|project| !project.is_empty() && !project.eq_ignore_ascii_case("null"));
    Ok(decision)
}

pub struct Agent {
    layout: ProjectLayout,
    file_index: FileIndex,
    embedder: Arc<dyn Embedder>,
    generator: Arc<dyn Generator>,
    params: GenerationParams,
}

impl Agent {
    pub fn new(
        layout: ProjectLayout,
        file_index: FileIndex,
        embedder: Arc<dyn Embedder>,
        generator: Arc<dyn Generator>,
        params: GenerationParams,
    ) -> Self {
        Self {
            layout,
            file_index,
            embedder,
            generator,
            params,
        }
    }

    pub async fn decide(&self, query: &str) -> Result<Decision, QueryError> {
        if query.trim().is_empty() {
            return Err(QueryError::EmptyQuery);
        }
        let reply = self
            .generator
            .generate(None, &decision_prompt(query), DECISION_PARAMS)
            .await?;
        let decision = parse_decision(&reply)?;
        info!(action = ?decision.action, project = ?decision.project, "agent decision");
        Ok(decision)
    }

    /// Runs the decided action. Failures are rendered into the reply text.
    pub async fn execute(&self, decision: &Decision, query: &str) -> String {
        let project = decision
            .project
            .as_deref()
            .filter(|project| self.file_index.contains_key(*project));

        let mut parts = Vec::new();

        if decision.action.summarizes() {
            parts.push(match project {
                Some(project) => self.summarize(project, query).await,
                None => INVALID_PROJECT.to_string(),
            });
        }

        if decision.action.lists_files() {
            parts.push(match project {
                Some(project) => {
                    let files = self.file_index.get(project).map(Vec::as_slice).unwrap_or(&[]);
                    format_file_listing(project, files)
                }
                None => INVALID_PROJECT.to_string(),
            });
        }

        parts.dedup_by(|next, previous| next.as_str() == INVALID_PROJECT && previous.as_str() == INVALID_PROJECT);
        parts.join("\n\n")
    }

    pub async fn handle(&self, query: &str) -> String {
        match self.decide(query).await {
            Ok(decision) => self.execute(&decision, query).await,
            Err(error) => {
                warn!(%error, "agent could not decide");
                format!("error: {error}")
            }
        }
    }

    async fn summarize(&self, project: &str, query: &str) -> String {
        let paths = self.layout.project(project);
        let result = match QueryPipeline::load(&paths, self.embedder.clone()) {
            Ok(pipeline) => {
                pipeline
                    .answer(self.generator.as_ref(), query, RAG_TOP_K, self.params)
                    .await
            }
            Err(error) => Err(error),
        };

        match result {
            Ok(answer) => answer.text,
            Err(error) => {
                warn!(%project, %error, "summary failed");
                format!("error: {error}")
            }
        }
    }
}
