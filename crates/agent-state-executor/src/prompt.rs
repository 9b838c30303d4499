//! Prompt assembly for a new turn.

use agent_state_core::PromptMessage;

/// System message used when neither the request nor the config supplies one.
pub const DEFAULT_SYSTEM_MESSAGE: &str =
    "You can use tools to help the user. If a tool call is rejected, tell the user.";

/// Builder for the initial messages of a turn.
#[derive(Debug, Clone)]
pub struct PromptBuilder {
    /// Base system message.
    pub system_message: String,
    /// Long-term memory folded into the system message.
    pub memory: Option<String>,
}

impl Default for PromptBuilder {
    fn default() -> Self {
        Self::new(DEFAULT_SYSTEM_MESSAGE)
    }
}

impl PromptBuilder {
    /// Create a builder with a base system message.
    #[must_use]
    pub fn new<S: Into<String>>(system_message: S) -> Self {
        Self {
            system_message: system_message.into(),
            memory: None,
        }
    }

    /// Replace the system message when the request carries one.
    #[must_use]
    pub fn override_system<S: AsRef<str>>(mut self, system_message: Option<S>) -> Self {
        if let Some(message) = system_message {
            let message = message.as_ref().trim();
            if !message.is_empty() {
                self.system_message = message.to_string();
            }
        }
        self
    }

    /// Attach the user's long-term memory. Blank memory is ignored.
    #[must_use]
    pub fn memory(mut self, memory: Option<String>) -> Self {
        self.memory = memory.filter(|m| !m.trim().is_empty());
        self
    }

    /// Build the system message with memory merged in.
    #[must_use]
    pub fn system_prompt(&self) -> String {
        match &self.memory {
            Some(memory) => format!(
                "{}\n\nUser's long-term memory: {}",
                self.system_message,
                memory.trim()
            ),
            None => self.system_message.clone(),
        }
    }

    /// Build the messages for a query.
    #[must_use]
    pub fn build(&self, query: &str) -> Vec<PromptMessage> {
        vec![
            PromptMessage::system(self.system_prompt()),
            PromptMessage::user(query),
        ]
    }
}

#[cfg(test)]
mod tests {
    use agent_state_core::Role;

    use super::*;

    #[test]
    fn default_prompt_is_system_then_user() {
        let messages = PromptBuilder::default().build("hi");
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, Role::System);
        assert_eq!(messages[0].content, DEFAULT_SYSTEM_MESSAGE);
        assert_eq!(messages[1], PromptMessage::user("hi"));
    }

    #[test]
    fn memory_is_appended_to_system_message() {
        let prompt = PromptBuilder::new("Be brief.")
            .memory(Some("  prefers metric units ".into()))
            .system_prompt();
        assert_eq!(prompt, "Be brief.\n\nUser's long-term memory: prefers metric units");
    }

    #[test]
    fn blank_inputs_are_ignored() {
        let builder = PromptBuilder::new("base")
            .override_system(Some("   "))
            .memory(Some("\n".into()));
        assert_eq!(builder.system_prompt(), "base");

        let overridden = PromptBuilder::new("base").override_system(Some("custom"));
        assert_eq!(overridden.system_prompt(), "custom");
        assert_eq!(
            PromptBuilder::new("base").override_system(None::<&str>).system_prompt(),
            "base"
        );
    }
}
