use anyhow::Result;
use async_trait::async_trait;

use crate::traits::{Message, MessageRole, PromptBuilder};

use super::types::*;
use super::{OpenAi, DEFAULT_MAX_TOKENS};

pub struct OpenAiPromptBuilder {
    agent: OpenAi,
    input: String,
    temperature: Option<f32>,
    messages: Vec<Message>,
}

impl OpenAiPromptBuilder {
    pub(crate) fn new(agent: OpenAi, input: String) -> Self {
        Self {
            agent,
            input,
            temperature: None,
            messages: Vec::new(),
        }
    }

    fn build_request(&self) -> ChatRequest {
        let mut messages: Vec<WireMessage> = self.messages.iter().map(to_wire).collect();

        if !self.input.is_empty() {
            messages.push(WireMessage::user(&self.input));
        }

        let mut request = ChatRequest::new(&self.agent.model)
            .messages(messages)
            .token_limit(DEFAULT_MAX_TOKENS);

        // Reasoning models reject a temperature.
        if let Some(temp) = self.temperature.filter(|_| !uses_max_completion_tokens(&self.agent.model)) {
            request = request.temperature(temp);
        }
        request
    }
}

pub(crate) fn to_wire(msg: &Message) -> WireMessage {
    match msg.role {
        MessageRole::System => WireMessage::system(&msg.content),
        MessageRole::User => WireMessage::user(&msg.content),
    }
}

#[async_trait]
impl PromptBuilder for OpenAiPromptBuilder {
    fn temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    fn messages(mut self, messages: Vec<Message>) -> Self {
        self.messages = messages;
        self
    }

    async fn send(self) -> Result<String> {
        let request = self.build_request();
        Ok(self.agent.client().chat_text(&request).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::Agent;

    #[test]
    fn messages_keep_order_and_input_comes_last() {
        let ai = OpenAi::new("sk-test", "gpt-4o-mini");
        let request = ai
            .prompt("Post: hello")
            .messages(vec![
                Message::system("You are a classifier."),
                Message::user("Existing topics: AI"),
            ])
            .build_request();

        assert_eq!(request.messages.len(), 3);
        assert_eq!(request.messages[0].role, Role::System);
        assert_eq!(request.messages[1].content.as_deref(), Some("Existing topics: AI"));
        assert_eq!(request.messages[2].content.as_deref(), Some("Post: hello"));
        assert_eq!(request.max_tokens, Some(DEFAULT_MAX_TOKENS));
    }

    #[test]
    fn empty_input_adds_no_trailing_user_message() {
        let ai = OpenAi::new("sk-test", "gpt-4o-mini");
        let request = ai.prompt("").messages(vec![Message::system("sys")]).build_request();
        assert_eq!(request.messages.len(), 1);
    }

    #[test]
    fn reasoning_models_get_no_temperature() {
        let ai = OpenAi::new("sk-test", "o3-mini");
        let request = ai.prompt("hi").temperature(0.0).build_request();
        assert!(request.temperature.is_none());

        let ai = OpenAi::new("sk-test", "gpt-4o-mini");
        let request = ai.prompt("hi").temperature(0.0).build_request();
        assert_eq!(request.temperature, Some(0.0));
    }
}
