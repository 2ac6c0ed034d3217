use super::{Handler, Result};
use crate::task::{Task, TaskState};

pub const LOOPBACK: &str = "Loopback";

/// Echoes every task back to whoever sent it.  Handy for exercising the router without any
/// external service.
#[derive(Default)]
pub struct Loopback {
    tasks: Vec<Task>,
}

impl Loopback {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl Handler for Loopback {
    fn name(&self) -> &str {
        LOOPBACK
    }

    async fn setup(&mut self) -> Result<()> {
        self.tasks.clear();
        Ok(())
    }

    async fn recv(&mut self) -> Result<Vec<Task>> {
        Ok(self
            .tasks
            .drain(..)
            .map(|task| task.reply(task.content.clone(), LOOPBACK))
            .collect())
    }

    async fn send(&mut self, tasks: Vec<Task>) -> Result<()> {
        for task in tasks {
            if !self.tasks.contains(&task) {
                self.tasks.push(task.with_state(TaskState::Processing));
            }
        }
        Ok(())
    }
}
