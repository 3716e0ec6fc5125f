use clap::{Parser, Subcommand};

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Run the OpenAI-compatible bridge server in front of a Flowise chatflow.
    Serve(ServeArgs),
    /// Exercise a chat completion endpoint and the Flowise prediction API.
    Probe(ProbeArgs),
}

#[derive(clap::Args, Debug, Clone)]
pub struct ServeArgs {
    /// Port for the bridge server to listen on.
    #[arg(long, env = "PORT", default_value = "3001")]
    pub port: u16,

    /// Base URL of the Flowise server (e.g. http://localhost:3000).
    #[arg(long, env = "FLOWISE_API_URL")]
    pub flowise_url: String,

    /// Identifier of the Flowise chatflow to bridge to.
    #[arg(long, env = "FLOWISE_CHATFLOW_ID")]
    pub chatflow_id: String,
}

#[derive(clap::Args, Debug, Clone)]
pub struct ProbeArgs {
    /// Base URL of the OpenAI-compatible chat completion server.
    #[arg(long, env = "CHAT_BASE_URL", default_value = "http://localhost:3001")]
    pub chat_base_url: String,

    /// Model name sent with each chat completion request.
    #[arg(long, env = "CHAT_MODEL", default_value = "gpt-3.5-turbo")]
    pub chat_model: String,

    /// Sampling temperature for chat completion requests.
    #[arg(long, env = "CHAT_TEMPERATURE", default_value = "0.7")]
    pub temperature: f32,

    /// Maximum number of tokens the model may generate per reply.
    #[arg(long, env = "CHAT_MAX_TOKENS", default_value = "1000")]
    pub max_tokens: u32,

    /// User message sent in each probe exchange.
    #[arg(long, env = "PROBE_QUESTION", default_value = "Hello, how are you?")]
    pub question: String,

    /// Seconds to pause after each successful exchange.
    #[arg(long, env = "PROBE_PAUSE_SECS", default_value = "1")]
    pub pause_secs: u64,

    /// Base URL of the Flowise server. The Flowise probe is skipped when unset.
    #[arg(long, env = "FLOWISE_API_URL")]
    pub flowise_url: Option<String>,

    /// Identifier of the Flowise chatflow. The Flowise probe is skipped when unset.
    #[arg(long, env = "FLOWISE_CHATFLOW_ID")]
    pub chatflow_id: Option<String>,
}
