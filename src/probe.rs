use log::error;
use std::error::Error;
use std::io::Write;
use tokio::time::{sleep, Duration};

use crate::cli::ProbeArgs;
use crate::llm::chat::flowise::{parse_prediction_line, FlowiseClient, FlowiseConfig};
use crate::llm::chat::openai::{parse_completion_line, ChatCompletionClient, CompletionParams};
use crate::llm::chat::print_fragment_stream;
use crate::models::chat::Conversation;

pub async fn run(args: &ProbeArgs) -> Result<(), Box<dyn Error + Send + Sync>> {
    run_chat_probe(args).await;
    run_flowise_probe(args).await
}

/// Exercises the chat completion endpoint in non-streaming mode, then in
/// streaming mode. A failed exchange is logged and abandons that mode only.
async fn run_chat_probe(args: &ProbeArgs) {
    let client = ChatCompletionClient::new(&args.chat_base_url);
    let params = CompletionParams {
        model: args.chat_model.clone(),
        temperature: args.temperature,
        max_tokens: args.max_tokens,
        ..CompletionParams::default()
    };

    for streaming in [false, true] {
        let mode = if streaming { "streaming" } else { "non-streaming" };
        println!(
            "\n==================== Testing {} mode ====================",
            mode
        );
        let mut conversation = Conversation::new();

        println!("\nUser: {}", args.question);
        conversation.push_user(&args.question);

        let reply: Result<String, Box<dyn Error + Send + Sync>> = if streaming {
            print!("Assistant (streaming): ");
            let _ = std::io::stdout().flush();
            match client.create_stream(conversation.messages(), &params).await {
                Ok(resp) => print_fragment_stream(resp, parse_completion_line).await,
                Err(e) => Err(Box::new(e) as _),
            }
        } else {
            match client.create(conversation.messages(), &params).await {
                Ok(resp) => match resp.first_content() {
                    Some(text) => Ok(text.to_string()),
                    None => Err("no choices in completion response".into()),
                },
                Err(e) => Err(Box::new(e) as _),
            }
        };

        match reply {
            Ok(text) => {
                if !streaming {
                    println!("Assistant (non-streaming): {}", text);
                }
                conversation.push_assistant(&text);
                sleep(Duration::from_secs(args.pause_secs)).await;
            }
            Err(e) => {
                error!("chat exchange failed: {}", e);
            }
        }
    }
}

/// Streams one prediction from Flowise, printing each token as it arrives.
/// Without both configuration values this prints an instruction and returns
/// before any client is built.
async fn run_flowise_probe(args: &ProbeArgs) -> Result<(), Box<dyn Error + Send + Sync>> {
    let config =
        match FlowiseConfig::resolve(args.flowise_url.as_deref(), args.chatflow_id.as_deref()) {
            Some(config) => config,
            None => {
                println!(
                    "\nPlease set FLOWISE_API_URL and FLOWISE_CHATFLOW_ID to run the Flowise probe"
                );
                return Ok(());
            }
        };

    let client = FlowiseClient::new(config);
    println!("\nSending request to Flowise API...");
    let resp = client.predict_stream(&args.question).await?;
    println!("Response status: {}", resp.status());
    print_fragment_stream(resp, parse_prediction_line).await?;
    Ok(())
}
