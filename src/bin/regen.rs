use clap::Parser;
use log::{debug, error};
use tokio_util::sync::CancellationToken;

use regen::{
  ChatMessage, ClientConfig, GenerationClient, GenerationOptions,
  GenerationRequest,
};

#[derive(Parser)]
#[command(name = "regen")]
#[command(about = "Send one prompt with retry and provider fallback", long_about = None)]
struct Cli
{   /// Prompt to send
    #[arg(required = true)]
    prompt: String

  , /// JSON config file; flags below override it
    #[arg(short, long)]
    config: Option<String>

  , /// API key for the generation endpoint
    #[arg(long, env = "REGEN_API_KEY", hide_env_values = true)]
    api_key: Option<String>

  , /// Endpoint base URL
    #[arg(long, env = "REGEN_BASE_URL")]
    base_url: Option<String>

  , /// Provider identifier
    #[arg(short, long, default_value = regen::config::DEFAULT_PROVIDER)]
    provider: String

  , /// Sampling temperature in [0, 1]
    #[arg(short, long, default_value = "0.7")]
    temperature: f32

  , /// Maximum output tokens
    #[arg(long, default_value = "1024")]
    max_tokens: u32

  , /// Primary attempts before falling back
    #[arg(short, long, default_value = "3")]
    retries: u32

  , /// Fallback declaration, `provider=fallback` (repeatable)
    #[arg(short, long)]
    fallback: Vec<String>

  , /// System instruction sent ahead of the prompt
    #[arg(short, long)]
    system: Option<String>

  , /// Print the JSON document found in the answer
    #[arg(long)]
    json: bool
}

fn build_config(cli: &Cli) -> Result<ClientConfig, regen::Error>
{   let mut config = match &cli.config
    {   Some(path) => ClientConfig::from_json_file(path)?
      , None => {
          let key = cli.api_key.clone().ok_or_else(|| {
            regen::Error::InvalidConfiguration(
              "no API key: pass --api-key or set REGEN_API_KEY"
                .to_string()
            )
          })?;
          ClientConfig::new(key)
        }
    };

    if let Some(key) = &cli.api_key
    {   config.api_key = key.clone();
    }
    if let Some(base_url) = &cli.base_url
    {   config.base_url = base_url.clone();
    }

    let mut fallbacks = config.fallbacks.clone();
    for declaration in &cli.fallback
    {   let (provider, fallback) = declaration.split_once('=')
          .ok_or_else(|| regen::Error::InvalidConfiguration(format!(
            "fallback must look like provider=fallback, got {:?}",
            declaration
          )))?;
        fallbacks = fallbacks.with(provider.trim(), fallback.trim());
    }
    config = config.with_fallbacks(fallbacks);

    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>>
{   env_logger::init();
    let cli = Cli::parse();
    let config = build_config(&cli)?;
    debug!("Using {:?}", config);

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
      if tokio::signal::ctrl_c().await.is_ok()
      {   on_interrupt.cancel();
      }
    });

    let options = GenerationOptions::for_provider(cli.provider.clone())
      .with_temperature(cli.temperature)
      .with_max_tokens(cli.max_tokens)
      .with_max_retries(cli.retries)
      .with_cancellation(cancel);

    let request = match &cli.system
    {   Some(system) => GenerationRequest::chat(
          vec![
            ChatMessage::system(system.clone())
          , ChatMessage::user(cli.prompt.clone())
          ]
        , options
        )
      , None => GenerationRequest::prompt(cli.prompt.clone(), options)
    };

    let client = GenerationClient::new(config)?;
    let result = client.execute(&request).await.map_err(|e| {
      error!("Generation failed: {}", e);
      e
    })?;

    if result.used_fallback
    {   eprintln!("(answered by fallback {})", result.provider);
    }

    if cli.json
    {   let value = regen::extract_json(&result.text)?;
        println!("{}", serde_json::to_string_pretty(&value)?);
    } else
    {   println!("{}", result.text);
    }
    Ok(())
}
