use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tokio::time::Instant;
use tokio_test::{assert_err, assert_ok};
use tokio_util::sync::CancellationToken;

use regen::{
  ChatMessage, Dispatch, Error, FallbackMap, GenerationClient,
  GenerationOptions, ProviderResponse, RetryConfig, WirePayload,
};

const PRIMARY: &str = "openai/gpt-4o-mini";
const FALLBACK: &str = "google/gemini-1.5-flash";

/// Dispatcher answering from a per-provider script
#[derive(Default)]
struct ScriptedDispatcher
{   replies: Mutex<HashMap<String, VecDeque<Result<ProviderResponse, Error>>>>
  , calls: Mutex<Vec<WirePayload>>
}

impl ScriptedDispatcher
{   fn reply(self, provider: &str, reply: Result<ProviderResponse, Error>)
      -> Self
    {   self.replies.lock().unwrap()
          .entry(provider.to_string())
          .or_default()
          .push_back(reply);
        self
    }

    fn calls_to(&self, provider: &str) -> usize
    {   self.calls.lock().unwrap()
          .iter()
          .filter(|p| p.providers == provider)
          .count()
    }

    fn total_calls(&self) -> usize
    {   self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl Dispatch for ScriptedDispatcher
{   async fn dispatch(&self, payload: &WirePayload)
      -> Result<ProviderResponse, Error>
    {   self.calls.lock().unwrap().push(payload.clone());
        self.replies.lock().unwrap()
          .get_mut(&payload.providers)
          .and_then(VecDeque::pop_front)
          .unwrap_or_else(|| Err(Error::Transport
          {   status: 599
            , body: format!("no scripted reply for {}", payload.providers)
          }))
    }
}

fn text(provider: &str, generated: &str) -> Result<ProviderResponse, Error>
{   ProviderResponse::from_value(json!({
      provider: {"generated_text": generated, "status": "success"}
    }))
}

fn unavailable() -> Result<ProviderResponse, Error>
{   Err(Error::Transport
    {   status: 503
      , body: "overloaded".to_string()
    })
}

fn retry_config() -> RetryConfig
{   RetryConfig
    {   initial_backoff_ms: 100
      , backoff_multiplier: 2.0
      , max_backoff_ms: 10_000
      , jitter: false
    }
}

fn client(
  dispatcher: ScriptedDispatcher
, fallbacks: FallbackMap
) -> GenerationClient<ScriptedDispatcher>
{   let _ = env_logger::builder().is_test(true).try_init();
    GenerationClient::with_dispatcher(dispatcher, retry_config(), fallbacks)
}

fn options(max_retries: u32) -> GenerationOptions
{   GenerationOptions::for_provider(PRIMARY).with_max_retries(max_retries)
}

#[tokio::test(start_paused = true)]
async fn first_attempt_success_is_immediate()
{   let client = client(
      ScriptedDispatcher::default().reply(PRIMARY, text(PRIMARY, "Hi there"))
    , FallbackMap::new()
    );
    let started = Instant::now();

    let answer = assert_ok!(
      client.generate_with_retry("Say hi", &options(3)).await
    );

    assert_eq!(answer, "Hi there");
    assert_eq!(started.elapsed(), Duration::ZERO);
    assert_eq!(client.dispatcher().total_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn success_on_last_attempt_waits_full_backoff_sequence()
{   let client = client(
      ScriptedDispatcher::default()
        .reply(PRIMARY, unavailable())
        .reply(PRIMARY, Err(Error::EmptyResponse(PRIMARY.into())))
        .reply(PRIMARY, unavailable())
        .reply(PRIMARY, text(PRIMARY, "finally"))
    , FallbackMap::new()
    );
    let started = Instant::now();

    let answer = assert_ok!(
      client.generate_with_retry("prompt", &options(4)).await
    );

    assert_eq!(answer, "finally");
    assert_eq!(started.elapsed(), Duration::from_millis(100 + 200 + 400));
    assert_eq!(client.dispatcher().calls_to(PRIMARY), 4);
}

#[tokio::test(start_paused = true)]
async fn exhausted_primary_uses_fallback_once()
{   let client = client(
      ScriptedDispatcher::default()
        .reply(PRIMARY, unavailable())
        .reply(PRIMARY, unavailable())
        .reply(FALLBACK, text(FALLBACK, "from fallback"))
    , FallbackMap::new().with("openai", FALLBACK)
    );
    let request = regen::GenerationRequest::prompt("prompt", options(2));

    let result = assert_ok!(client.execute(&request).await);

    assert_eq!(result.text, "from fallback");
    assert_eq!(result.provider, FALLBACK);
    assert_eq!(result.attempts, 2);
    assert!(result.used_fallback);
    assert_eq!(client.dispatcher().calls_to(PRIMARY), 2);
    assert_eq!(client.dispatcher().calls_to(FALLBACK), 1);
}

#[tokio::test(start_paused = true)]
async fn failed_fallback_surfaces_primary_error()
{   let primary_error = Error::ProviderReported("quota exceeded".into());
    let client = client(
      ScriptedDispatcher::default()
        .reply(PRIMARY, unavailable())
        .reply(PRIMARY, Err(primary_error.clone()))
        .reply(FALLBACK, Err(Error::Timeout))
    , FallbackMap::new().with(PRIMARY, FALLBACK)
    );

    let err = assert_err!(
      client.generate_with_retry("prompt", &options(2)).await
    );

    assert_eq!(err, primary_error);
    assert_eq!(client.dispatcher().calls_to(FALLBACK), 1);
}

#[tokio::test(start_paused = true)]
async fn without_fallback_last_error_propagates()
{   let client = client(
      ScriptedDispatcher::default()
        .reply(PRIMARY, Err(Error::Timeout))
        .reply(PRIMARY, unavailable())
    , FallbackMap::new().with("anthropic", FALLBACK)
    );

    let err = assert_err!(
      client.generate_with_retry("prompt", &options(2)).await
    );

    assert_eq!(err, Error::Transport { status: 503, body: "overloaded".into() });
    assert_eq!(client.dispatcher().calls_to(FALLBACK), 0);
}

#[tokio::test(start_paused = true)]
async fn provider_reported_failure_is_retried()
{   let failing = ProviderResponse::from_value(json!({
      PRIMARY: {"status": "fail", "error": {"message": "upstream hiccup"}}
    }));
    let client = client(
      ScriptedDispatcher::default()
        .reply(PRIMARY, failing)
        .reply(PRIMARY, text(PRIMARY, "recovered"))
    , FallbackMap::new()
    );

    let answer = assert_ok!(
      client.generate_with_retry("prompt", &options(3)).await
    );
    assert_eq!(answer, "recovered");
    assert_eq!(client.dispatcher().total_calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn missing_provider_is_terminal()
{   let client = client(
      ScriptedDispatcher::default()
        .reply(PRIMARY, ProviderResponse::from_value(json!({})))
    , FallbackMap::new().with("openai", FALLBACK)
    );
    let started = Instant::now();

    let err = assert_err!(
      client.generate_with_retry("prompt", &options(5)).await
    );

    assert_eq!(err, Error::NoProviderResponse(PRIMARY.into()));
    assert_eq!(client.dispatcher().total_calls(), 1);
    assert_eq!(started.elapsed(), Duration::ZERO);
}

#[tokio::test(start_paused = true)]
async fn cancellation_aborts_backoff_wait()
{   let mut config = retry_config();
    config.initial_backoff_ms = 5_000;
    let client = GenerationClient::with_dispatcher(
      ScriptedDispatcher::default()
        .reply(PRIMARY, unavailable())
        .reply(PRIMARY, text(PRIMARY, "too late"))
    , config
    , FallbackMap::new().with("openai", FALLBACK)
    );
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
      tokio::time::sleep(Duration::from_millis(50)).await;
      trigger.cancel();
    });
    let started = Instant::now();

    let err = assert_err!(
      client.generate_with_retry(
        "prompt"
      , &options(3).with_cancellation(cancel)
      ).await
    );

    assert_eq!(err, Error::Cancelled);
    assert!(started.elapsed() < Duration::from_millis(5_000));
    assert_eq!(client.dispatcher().total_calls(), 1);
    assert_eq!(client.dispatcher().calls_to(FALLBACK), 0);
}

#[tokio::test]
async fn already_cancelled_token_never_dispatches()
{   let client = client(ScriptedDispatcher::default(), FallbackMap::new());
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = assert_err!(
      client.generate("prompt", &options(1).with_cancellation(cancel)).await
    );
    assert_eq!(err, Error::Cancelled);
    assert_eq!(client.dispatcher().total_calls(), 0);
}

#[tokio::test]
async fn invalid_options_fail_before_dispatch()
{   let client = client(ScriptedDispatcher::default(), FallbackMap::new());

    let err = assert_err!(
      client.generate_with_retry("prompt", &options(3).with_temperature(1.2)).await
    );
    assert!(matches!(err, Error::InvalidConfiguration(_)));

    let err = assert_err!(
      client.generate("   ", &options(3)).await
    );
    assert_eq!(err, Error::EmptyInput);
    assert_eq!(client.dispatcher().total_calls(), 0);
}

#[tokio::test]
async fn single_attempt_generate_does_not_retry()
{   let client = client(
      ScriptedDispatcher::default()
        .reply(PRIMARY, unavailable())
        .reply(PRIMARY, text(PRIMARY, "unused"))
    , FallbackMap::new().with("openai", FALLBACK)
    );

    assert_err!(client.generate("prompt", &options(3)).await);
    assert_eq!(client.dispatcher().total_calls(), 1);
}

#[tokio::test]
async fn chat_sends_flattened_history()
{   let client = client(
      ScriptedDispatcher::default().reply(PRIMARY, text(PRIMARY, "Sure"))
    , FallbackMap::new()
    );
    let messages = vec![
      ChatMessage::system("You are a resume coach.")
    , ChatMessage::user("Rewrite my summary")
    , ChatMessage::assistant("Paste it here")
    , ChatMessage::user("Built payment systems in Rust")
    ];

    let answer = assert_ok!(client.chat(&messages, &options(1)).await);
    assert_eq!(answer, "Sure");

    let calls = client.dispatcher().calls.lock().unwrap();
    let sent = &calls[0];
    assert_eq!(sent.chatbot_global_action, "You are a resume coach.");
    assert_eq!(sent.text, "Built payment systems in Rust");
    assert_eq!(sent.previous_history.len(), 2);
    assert_eq!(sent.previous_history[1].role, "assistant");
}

#[tokio::test]
async fn generate_json_parses_fenced_answer()
{   #[derive(serde::Deserialize)]
    struct Skills
    {   skills: Vec<String>
    }
    let client = client(
      ScriptedDispatcher::default().reply(
        PRIMARY
      , text(PRIMARY, "```json\n{\"skills\": [\"Rust\", \"Postgres\",],}\n```")
      )
    , FallbackMap::new()
    );

    let parsed: Skills = assert_ok!(
      client.generate_json("List skills", &options(1)).await
    );
    assert_eq!(parsed.skills, vec!["Rust", "Postgres"]);
}

#[test]
fn extraction_by_exact_and_base_name()
{   let exact = ProviderResponse::from_value(json!({
      "openai/gpt-4o-mini": {"generated_text": "hi"}
    })).unwrap();
    assert_eq!(exact.extract_text("openai/gpt-4o-mini"), Ok("hi".to_string()));

    let family = ProviderResponse::from_value(json!({
      "openai": {"generated_text": "hi"}
    })).unwrap();
    assert!(matches!(
      family.resolve("openai/gpt-4o-mini")
    , regen::Resolution::BaseName(_)
    ));
    assert_eq!(family.extract_text("openai/gpt-4o-mini"), Ok("hi".to_string()));
}

#[test]
fn extraction_is_idempotent()
{   let resp = ProviderResponse::from_value(json!({
      "mistral": {"generated_text": "stable"}
    , "openai": {"status": "fail", "error": {"message": "nope"}}
    })).unwrap();
    let first = resp.extract_text("google/gemini");
    let second = resp.extract_text("google/gemini");
    assert_eq!(first, Ok("stable".to_string()));
    assert_eq!(first, second);
}

#[test]
fn reported_failure_carries_provider_message()
{   let resp = ProviderResponse::from_value(json!({
      "openai/gpt-4o-mini": {
        "status": "fail"
      , "error": {"message": "quota exceeded"}
      }
    })).unwrap();
    assert_eq!(
      resp.extract_text("openai/gpt-4o-mini")
    , Err(Error::ProviderReported("quota exceeded".into()))
    );
}

#[test]
fn blank_generated_text_is_empty_response()
{   let resp = ProviderResponse::from_value(json!({
      "openai": {"generated_text": "   ", "status": "success"}
    })).unwrap();
    assert_eq!(
      resp.extract_text("openai")
    , Err(Error::EmptyResponse("openai".into()))
    );
}

#[test]
fn extract_json_examples()
{   assert_eq!(
      regen::extract_json("```json\n{\"a\":1,}\n```")
    , Ok(json!({"a": 1}))
    );
    assert_eq!(regen::extract_json(""), Err(Error::EmptyInput));
}
