//! Assistant personas and keeping their remote records in sync.

use crate::{
    engine::{self, AssistantSpec, CompletionEngine},
    log_internal,
    tool::ToolRegistry,
};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// Metadata key holding the fingerprint.  Also marks remote assistants as ours.
pub const FINGERPRINT_KEY: &str = "hash";

/// Name of the primary assistant
pub const MILA: &str = "Mila";

const MILA_DESCRIPTION: &str = "The figurehead of the Mila Framework.";

const MILA_INSTRUCTIONS: &str = "\
Act as a friendly professional assistant named Mila. Your role is to assist users with whatever \
they require, using your own knowledge, judgment, and the tools at your disposal. Use the \
`get_assistants` tool to see a JSON object containing all registered assistants. If you encounter \
problems, report them in your response.";

/// Wraps each user message before it is added to a thread.
pub fn new_query(context: &str, query: &str) -> String {
    format!(
        "A new request has arrived. Here is the context:\n\n\
         ```\n{}\n```\n\n\
         Here is the request:\n\n\
         > {}\n\n\
         Please respond appropriately to the user's request, per the terms of your \
         instructions. Use whatever tools are at your disposal to provide the best possible \
         response. If you encounter problems, report them in your response.",
        context, query
    )
}

#[derive(Clone, Debug)]
pub struct AssistantDefinition {
    pub name: String,
    pub description: String,
    pub instructions: String,
    pub tools: ToolRegistry,
    pub model: String,
    pub metadata: BTreeMap<String, String>,
}

impl AssistantDefinition {
    /// Hash over everything that changes the assistant's behavior.  Stored remotely to detect
    /// stale records.
    pub fn fingerprint(&self) -> String {
        let material = serde_json::json!({
            "instructions": self.instructions,
            "tools": self.tools.definitions(),
            "model": self.model,
            "version": env!("CARGO_PKG_VERSION"),
        });
        hex::encode(Sha256::digest(material.to_string().as_bytes()))
    }

    pub fn spec(&self) -> AssistantSpec {
        let mut metadata = self.metadata.clone();
        metadata.insert(FINGERPRINT_KEY.to_owned(), self.fingerprint());
        AssistantSpec {
            name: self.name.clone(),
            description: self.description.clone(),
            instructions: self.instructions.clone(),
            tools: self.tools.definitions(),
            model: self.model.clone(),
            metadata,
        }
    }
}

/// Create-or-update the remote assistant named like `definition`.  Returns its id.
///
/// An unchanged definition costs one list call and no writes.
pub async fn ensure_assistant(
    engine: &dyn CompletionEngine,
    definition: &AssistantDefinition,
) -> engine::Result<String> {
    let fingerprint = definition.fingerprint();
    let existing = engine
        .list_assistants()
        .await?
        .into_iter()
        .find(|a| a.name.as_deref() == Some(definition.name.as_str()));

    let Some(existing) = existing else {
        return Ok(engine.create_assistant(&definition.spec()).await?.id);
    };

    if existing.metadata.get(FINGERPRINT_KEY) == Some(&fingerprint) {
        log_internal!("Assistant {} ({}) is up to date", definition.name, existing.id);
        return Ok(existing.id);
    }

    Ok(engine
        .update_assistant(&existing.id, &definition.spec())
        .await?
        .id)
}

/// Every assistant this process runs.  Built once at startup.
#[derive(Clone, Debug, Default)]
pub struct AssistantRegistry {
    definitions: Vec<AssistantDefinition>,
}

impl AssistantRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The built-in personas, configured from `cfg`.
    pub fn builtin(cfg: &crate::config::Config) -> Self {
        let directory = vec![(MILA.to_owned(), MILA_DESCRIPTION.to_owned())];

        let mila = AssistantDefinition {
            name: MILA.to_owned(),
            description: MILA_DESCRIPTION.to_owned(),
            instructions: MILA_INSTRUCTIONS.to_owned(),
            tools: crate::tools::toolkit(&cfg.tools, directory),
            model: cfg.assistant.model.clone(),
            metadata: BTreeMap::new(),
        };

        Self::new().with(mila)
    }

    pub fn with(mut self, definition: AssistantDefinition) -> Self {
        self.definitions.retain(|d| d.name != definition.name);
        self.definitions.push(definition);
        self
    }

    pub fn iter(&self) -> impl Iterator<Item = &AssistantDefinition> {
        self.definitions.iter()
    }
}
