pub mod ai;
pub mod clustering;
pub mod config;
pub mod db;
pub mod environment;
pub mod extract;
pub mod fetch;
pub mod logging;
pub mod pipeline;
pub mod prompts;
pub mod providers;
pub mod quality;
pub mod util;

use async_openai::{config::OpenAIConfig, Client as OpenAIClient};
use ollama_rs::Ollama;

pub const TARGET_WEB_REQUEST: &str = "web_request";
pub const TARGET_LLM_REQUEST: &str = "llm_request";
pub const TARGET_DB: &str = "db_query";

#[derive(Clone, Debug)]
pub enum LlmClient {
    Ollama(Ollama),
    OpenAI(OpenAIClient<OpenAIConfig>),
}
