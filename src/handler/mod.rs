use crate::{engine::EngineError, task::Task};

pub mod assistant;
pub mod loopback;

#[derive(thiserror::Error, Debug)]
pub enum HandlerError {
    #[error("setup failed: {0}")]
    Setup(String),

    #[error("delivery failed: {0}")]
    Delivery(String),

    #[error("completion engine: {0}")]
    Engine(#[from] EngineError),

    #[error("discord: {0}")]
    Discord(#[from] serenity::Error),
}

pub type Result<T> = std::result::Result<T, HandlerError>;

/// Anything tasks can be routed to or collected from.
#[async_trait::async_trait]
pub trait Handler: Send {
    /// Unique name.  Tasks address handlers by it.
    fn name(&self) -> &str;
    /// Acquire resources.  Called once, before the router's first tick.
    async fn setup(&mut self) -> Result<()> {
        Ok(())
    }
    /// Release resources.  Called once, after the router's last tick, even when stopping early.
    async fn teardown(&mut self) -> Result<()> {
        Ok(())
    }
    /// Tasks that became ready since the last call, in order.
    async fn recv(&mut self) -> Result<Vec<Task>>;
    /// Tasks the router addressed to this handler, in order.
    async fn send(&mut self, tasks: Vec<Task>) -> Result<()>;
}
