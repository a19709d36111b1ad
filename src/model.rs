use crate::{config, log_internal};
use anyhow::Result;

/// A text generator.  Implementations may fail or hang; callers always bound the wait.
#[serenity::async_trait]
pub trait ModelClient: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String>;
}

/// LLM generation settings
#[derive(Debug, Clone)]
pub struct LlmSettings {
    pub chat_url: String,
    pub model_name: String,
    pub system: String,
    pub context_size: usize,
    pub temperature: f32,
}

impl LlmSettings {
    pub fn from_config(llm: &config::Llm) -> Self {
        Self {
            chat_url: llm.chat_url.clone(),
            model_name: llm.model_name.clone(),
            system: "You answer support questions for a Discord community using only the \
                     knowledge base entries you are given."
                .to_owned(),
            context_size: llm.context_size,
            temperature: llm.temperature,
        }
    }
}

#[derive(serde::Serialize)]
struct LlmChatRequest<'a> {
    /// LLM model name
    model: &'a str,
    /// Whether to stream one token at a time, or return entire response is one go
    stream: bool,
    messages: Vec<ChatMessage>,
    /// Context size
    num_ctx: usize,
    /// LLM temperature
    temperature: f32,
}

#[derive(serde::Serialize, serde::Deserialize)]
struct ChatMessage {
    role: ChatMessageRole,
    content: String,
}

#[allow(non_camel_case_types)] // Serialized literally; case matters
#[derive(serde::Serialize, serde::Deserialize)]
enum ChatMessageRole {
    system,
    user,
    assistant,
}

#[derive(serde::Deserialize)]
struct LlmChatResponse {
    message: ChatMessage,
}

/// Single-turn client for an Ollama-style `/api/chat` endpoint.
pub struct ChatClient {
    http: reqwest::Client,
    settings: LlmSettings,
}

impl ChatClient {
    pub fn new(settings: LlmSettings) -> Self {
        Self {
            http: reqwest::Client::new(),
            settings,
        }
    }

    fn request<'a>(&'a self, prompt: &str) -> LlmChatRequest<'a> {
        LlmChatRequest {
            model: &self.settings.model_name,
            stream: false,
            messages: vec![
                ChatMessage {
                    role: ChatMessageRole::system,
                    content: self.settings.system.clone(),
                },
                ChatMessage {
                    role: ChatMessageRole::user,
                    content: prompt.to_owned(),
                },
            ],
            num_ctx: self.settings.context_size,
            temperature: self.settings.temperature,
        }
    }
}

#[serenity::async_trait]
impl ModelClient for ChatClient {
    async fn complete(&self, prompt: &str) -> Result<String> {
        let url = self.settings.chat_url.as_str();

        log_internal!("Sending request to chat endpoint {}... ", url);
        let response = self
            .http
            .post(url)
            .json(&self.request(prompt))
            .send()
            .await?
            .error_for_status()?
            .json::<LlmChatResponse>()
            .await?;
        log_internal!("Sending request to chat endpoint {}... done", url);

        match response.message.role {
            ChatMessageRole::assistant => Ok(response.message.content),
            _ => Err(anyhow::anyhow!("Chat endpoint replied with a non-assistant message")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_carries_system_and_prompt() {
        let client = ChatClient::new(LlmSettings {
            chat_url: "http://localhost:11434/api/chat".to_owned(),
            model_name: "llama3".to_owned(),
            system: "be brief".to_owned(),
            context_size: 2048,
            temperature: 0.2,
        });

        let body = serde_json::to_value(client.request("Question: hi")).unwrap();
        assert_eq!(body["model"], "llama3");
        assert_eq!(body["stream"], false);
        assert_eq!(body["num_ctx"], 2048);
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][0]["content"], "be brief");
        assert_eq!(body["messages"][1]["role"], "user");
        assert_eq!(body["messages"][1]["content"], "Question: hi");
    }

    #[test]
    fn response_parses() {
        let response: LlmChatResponse = serde_json::from_str(
            r#"{"model": "llama3", "message": {"role": "assistant", "content": "Hi [1]"}, "done": true}"#,
        )
        .unwrap();
        assert_eq!(response.message.content, "Hi [1]");
    }
}
