//! BridgeTalk command-line entry point.
//!
//! Translates one text read from the arguments or stdin and prints either
//! the JSON response (batch) or SSE frames (streaming).

use std::io::{Read, Write};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use uuid::Uuid;

use bridgetalk::config::AppConfig;
use bridgetalk::context::{self, RequestContext};
use bridgetalk::service::{TranslateRequest, TranslateService};

#[derive(Parser, Debug)]
#[command(name = "bridgetalk")]
#[command(version)]
#[command(about = "Translate between product and engineering language", long_about = None)]
struct Args {
    /// Text to translate, or `-` to read it from stdin
    text: String,

    /// Stream events as server-sent-event frames instead of one JSON response
    #[arg(long)]
    stream: bool,

    /// Realm (tenant) whose checkpoint store is used
    #[arg(long)]
    realm: Option<String>,

    /// Extra context passed along with the text
    #[arg(short, long)]
    context: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    bridgetalk::init_tracing();
    let args = Args::parse();

    let config = AppConfig::from_env();
    let content = read_text(&args.text)?;

    let request = TranslateRequest {
        content,
        stream: args.stream,
        context: args.context,
    };
    request.validate()?;

    let service = Arc::new(
        TranslateService::from_config(&config).context("Failed to initialise translate service")?,
    );

    let realm = args.realm.unwrap_or_else(|| config.default_realm.clone());
    let request_context = RequestContext::new(realm).with_request_id(Uuid::new_v4().to_string());
    context::scope(request_context, run(service, request)).await
}

async fn run(service: Arc<TranslateService>, request: TranslateRequest) -> Result<()> {
    if request.stream {
        let mut events = service.spawn_stream(request.content, request.context);
        let mut stdout = std::io::stdout();
        while let Some(event) = events.recv().await {
            stdout.write_all(event.to_sse().as_bytes())?;
            stdout.flush()?;
        }
    } else {
        let response = service
            .translate(&request.content, request.context.as_deref())
            .await?;
        println!("{}", serde_json::to_string_pretty(&response)?);
    }
    Ok(())
}

fn read_text(arg: &str) -> Result<String> {
    if arg != "-" {
        return Ok(arg.to_string());
    }
    let mut text = String::new();
    std::io::stdin()
        .read_to_string(&mut text)
        .context("Failed to read text from stdin")?;
    Ok(text.trim_end().to_string())
}
