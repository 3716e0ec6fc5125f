pub mod cli;
pub mod llm;
pub mod models;
pub mod probe;
pub mod server;

use cli::{Args, Command};
use log::info;
use server::Server;
use std::error::Error;

pub async fn run(args: Args) -> Result<(), Box<dyn Error + Send + Sync>> {
    match args.command {
        Command::Serve(serve_args) => {
            info!("--- Bridge Configuration ---");
            info!("Port: {}", serve_args.port);
            info!("Flowise URL: {}", serve_args.flowise_url);
            info!("Chatflow ID: {}", serve_args.chatflow_id);
            info!("----------------------------");
            let server = Server::new(serve_args);
            server.run().await
        }
        Command::Probe(probe_args) => {
            info!("--- Probe Configuration ---");
            info!("Chat Base URL: {}", probe_args.chat_base_url);
            info!("Chat Model: {}", probe_args.chat_model);
            info!("Temperature: {}", probe_args.temperature);
            info!("Max Tokens: {}", probe_args.max_tokens);
            info!(
                "Flowise Probe Configured: {}",
                probe_args.flowise_url.is_some() && probe_args.chatflow_id.is_some()
            );
            info!("---------------------------");
            probe::run(&probe_args).await
        }
    }
}
