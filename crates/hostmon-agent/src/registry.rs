use anyhow::Result;
use async_trait::async_trait;
use hostmon_common::types::CommandOutcome;
use serde_json::{Map, Value};
use std::collections::HashMap;

/// Executor bound to one command type tag.
///
/// Handlers are stateless or own only their own resources; the registry
/// owns the instances for the life of the process. A handler reports
/// expected problems (bad payload, local precondition not met) as an ERROR
/// outcome; returning `Err` is reserved for failures the handler could not
/// turn into an outcome itself, and the agent converts those into an ERROR
/// result before reporting.
#[async_trait]
pub trait CommandHandler: Send + Sync {
    /// The command type tag this handler executes (e.g. `"UPDATE_SSH_KEY"`).
    fn kind(&self) -> &str;

    /// Executes the command payload and returns the outcome to report.
    async fn handle(&self, payload: &Map<String, Value>) -> Result<CommandOutcome>;
}

/// Registry of command handlers, built once at process start and handed to
/// the agent by reference. Lookup by an unknown tag is a valid outcome
/// meaning "unsupported command type", not an error.
pub struct CommandRegistry {
    handlers: HashMap<String, Box<dyn CommandHandler>>,
}

impl CommandRegistry {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    pub fn register(&mut self, handler: Box<dyn CommandHandler>) {
        let kind = handler.kind().to_string();
        self.handlers.insert(kind, handler);
    }

    pub fn lookup(&self, kind: &str) -> Option<&dyn CommandHandler> {
        self.handlers.get(kind).map(|handler| handler.as_ref())
    }

    pub fn kinds(&self) -> Vec<&str> {
        self.handlers.keys().map(|kind| kind.as_str()).collect()
    }
}

impl Default for CommandRegistry {
    fn default() -> Self {
        let mut registry = Self::new();
        registry.register(Box::new(crate::handlers::ssh_key::SshKeyUpdater));
        registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EchoHandler;

    #[async_trait]
    impl CommandHandler for EchoHandler {
        fn kind(&self) -> &str {
            "ECHO"
        }

        async fn handle(&self, payload: &Map<String, Value>) -> Result<CommandOutcome> {
            Ok(CommandOutcome::success_with_data(
                "echoed",
                Value::Object(payload.clone()),
            ))
        }
    }

    #[test]
    fn lookup_of_an_unknown_kind_is_none() {
        let registry = CommandRegistry::default();
        assert!(registry.lookup("NOT_A_COMMAND").is_none());
    }

    #[test]
    fn default_registry_carries_the_builtin_handlers() {
        let registry = CommandRegistry::default();
        assert!(registry.lookup("UPDATE_SSH_KEY").is_some());
    }

    #[tokio::test]
    async fn registered_handlers_are_found_by_kind() {
        let mut registry = CommandRegistry::new();
        registry.register(Box::new(EchoHandler));

        let handler = registry.lookup("ECHO").unwrap();
        let outcome = handler.handle(&Map::new()).await.unwrap();
        assert_eq!(outcome.message, "echoed");
    }
}
