pub mod boundary;
pub mod cli;
pub mod config;
pub mod history;
pub mod llm;
pub mod models;
pub mod repl;
pub mod server;
pub mod session;

use cli::{ Args, Mode };
use config::persona::load_personas;
use history::initialize_history_store;
use llm::chat::new_client;
use llm::{ LlmConfig, SamplingConfig };
use log::info;
use session::ChatRooms;
use std::error::Error;
use std::sync::Arc;

pub async fn run(args: Args) -> Result<(), Box<dyn Error + Send + Sync>> {
    info!("--- Core Configuration ---");
    info!("Mode: {}", args.mode);
    info!("Chat Base URL: {}", args.chat_base_url);
    info!("API Key Set: {}", !args.chat_api_key.is_empty());
    info!("Personas Path: {}", args.personas_path.as_deref().unwrap_or("built-in"));
    info!("History Store Type: {}", args.history_type);
    info!("History Store Host: {}", args.history_host);
    if args.mode == Mode::Serve {
        info!("HTTP Address: {}", args.http_addr);
    }
    info!("-------------------------");

    let registry = load_personas(args.personas_path.as_deref())?;
    let llm_config = LlmConfig {
        api_key: Some(args.chat_api_key.clone()).filter(|k| !k.is_empty()),
        base_url: Some(args.chat_base_url.clone()),
        sampling: SamplingConfig::default(),
    };
    let client = new_client(&llm_config)?;

    if args.mode == Mode::Models {
        let models = client.list_models().await?;
        println!("{}", serde_json::to_string_pretty(&models)?);
        return Ok(());
    }

    let store = initialize_history_store(&args)?;
    let rooms = Arc::new(ChatRooms::open(registry, client, store).await);

    match args.mode {
        Mode::Serve => server::api::start_http_server(&args.http_addr, rooms, args.server_api_key.clone()).await,
        _ => repl::run_repl(rooms, &args.persona).await,
    }
}
