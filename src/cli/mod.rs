use clap::{ Parser, ValueEnum };
use std::fmt;

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Interactive terminal chat
    Chat,
    /// HTTP JSON API for browser clients
    Serve,
    /// Print the upstream model listing and exit
    Models,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Mode::Chat => "chat",
            Mode::Serve => "serve",
            Mode::Models => "models",
        };
        f.write_str(name)
    }
}

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// What to run
    #[arg(long, env = "CHAT_MODE", value_enum, default_value_t = Mode::Chat)]
    pub mode: Mode,

    /// Persona to open in chat mode (security, random, security2). Unknown ids fall back to random.
    #[arg(long, env = "CHAT_PERSONA", default_value = "random")]
    pub persona: String,

    // --- Upstream LLM Args ---
    /// Base URL of the OpenAI-compatible API
    #[arg(long, env = "CHAT_BASE_URL", default_value = crate::llm::DEFAULT_BASE_URL)]
    pub chat_base_url: String,

    /// API key for the upstream API
    #[arg(long, env = "CHAT_API_KEY", default_value = "", hide_env_values = true)]
    pub chat_api_key: String,

    /// Optional JSON file overriding persona name, avatar, model or system prompt
    #[arg(long, env = "PERSONAS_PATH")]
    pub personas_path: Option<String>,

    // --- History Store Args ---
    /// History store type (file, redis, memory)
    #[arg(long, env = "HISTORY_TYPE", default_value = "file")]
    pub history_type: String,

    /// Directory for the file store, or URL for redis (e.g. redis://127.0.0.1:6379)
    #[arg(long, env = "HISTORY_HOST", default_value = ".chat_history")]
    pub history_host: String,

    /// Prefix put in front of the persona identifier to form the storage key
    #[arg(long, env = "HISTORY_KEY_PREFIX", default_value = "chat_history:")]
    pub history_key_prefix: String,

    // --- HTTP Server Args ---
    /// Listen address for serve mode
    #[arg(long, env = "HTTP_ADDR", default_value = "127.0.0.1:3000")]
    pub http_addr: String,

    /// Bearer token required by the HTTP API. Open when unset.
    #[arg(long, env = "SERVER_API_KEY", hide_env_values = true)]
    pub server_api_key: Option<String>,
}
