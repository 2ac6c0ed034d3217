mod assistant;
mod config;
mod discord;
mod engine;
mod handler;
mod logging;
mod router;
mod runs;
mod task;
mod tool;
mod tools;

use crate::{
    assistant::AssistantRegistry,
    engine::{openai::OpenAiEngine, CompletionEngine},
    handler::{assistant::AssistantHandler, loopback::Loopback, Handler},
};
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init();

    let cfg = crate::config::Config::load().await?;
    let engine: Arc<dyn CompletionEngine> = Arc::new(OpenAiEngine::new(&cfg.openai)?);
    let registry = AssistantRegistry::builtin(&cfg);

    let mut handlers: Vec<Box<dyn Handler>> = registry
        .iter()
        .map(|definition| -> Box<dyn Handler> {
            Box::new(AssistantHandler::new(
                engine.clone(),
                definition.clone(),
                &cfg.assistant,
            ))
        })
        .collect();
    handlers.push(Box::new(discord::DiscordHandler::new(&cfg)));
    if cfg.general.enable_loopback {
        handlers.push(Box::new(Loopback::new()));
    }

    let mut router =
        router::Router::new(handlers, &cfg.general.default_handler, cfg.general.tick())?;

    router
        .run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Could not listen for ctrl-c: {}", e);
                std::future::pending::<()>().await;
            }
        })
        .await
        .map_err(Into::into)
}
