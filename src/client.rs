use std::sync::Arc;

use log::{debug, info};
use serde::de::DeserializeOwned;

use crate::config::{ClientConfig, FallbackMap, GenerationOptions, RetryConfig};
use crate::dispatch::{Dispatch, HttpDispatcher};
use crate::error::Error;
use crate::failover::{attempt_once, generate_with_failover, RetryPolicy};
use crate::request::{GenerationRequest, GenerationResult};
use crate::ChatMessage;

/// Text-generation client with retry and provider fallback.
///
/// Holds no per-call state: every call carries its own attempt
/// counter and backoff timer, so one client can be cloned into
/// many tasks.
pub struct GenerationClient<D = HttpDispatcher>
{   dispatcher: Arc<D>
  , retry: RetryConfig
  , fallbacks: FallbackMap
}

impl<D> Clone for GenerationClient<D>
{   fn clone(&self) -> Self
    {   GenerationClient
        {   dispatcher: Arc::clone(&self.dispatcher)
          , retry: self.retry.clone()
          , fallbacks: self.fallbacks.clone()
        }
    }
}

impl GenerationClient<HttpDispatcher>
{   /// Create a client talking to the configured endpoint
    pub fn new(config: ClientConfig) -> Result<Self, Error>
    {   let dispatcher = HttpDispatcher::new(&config)?;
        info!(
          "Generation client ready ({} declared fallbacks)",
          if config.fallbacks.is_empty() { "no" } else { "with" }
        );
        Ok(GenerationClient::with_dispatcher(
          dispatcher
        , config.retry
        , config.fallbacks
        ))
    }
}

impl<D> GenerationClient<D>
where
  D: Dispatch
{   /// Create a client over any dispatcher
    pub fn with_dispatcher(
      dispatcher: D
    , retry: RetryConfig
    , fallbacks: FallbackMap
    ) -> Self
    {   GenerationClient
        {   dispatcher: Arc::new(dispatcher)
          , retry
          , fallbacks
        }
    }

    pub fn dispatcher(&self) -> &D
    {   &self.dispatcher
    }

    /// One attempt on the configured provider, no retry
    pub async fn generate(
      &self
    , prompt: &str
    , options: &GenerationOptions
    ) -> Result<String, Error>
    {   let request = GenerationRequest::prompt(prompt, options.clone());
        self.single(&request).await
    }

    /// One attempt on a conversation, no retry
    pub async fn chat(
      &self
    , messages: &[ChatMessage]
    , options: &GenerationOptions
    ) -> Result<String, Error>
    {   let request = GenerationRequest::chat(
          messages.to_vec()
        , options.clone()
        );
        self.single(&request).await
    }

    /// Retry with backoff, then try the declared fallback
    pub async fn generate_with_retry(
      &self
    , prompt: &str
    , options: &GenerationOptions
    ) -> Result<String, Error>
    {   let request = GenerationRequest::prompt(prompt, options.clone());
        self.execute(&request).await.map(|r| r.text)
    }

    pub async fn chat_with_retry(
      &self
    , messages: &[ChatMessage]
    , options: &GenerationOptions
    ) -> Result<String, Error>
    {   let request = GenerationRequest::chat(
          messages.to_vec()
        , options.clone()
        );
        self.execute(&request).await.map(|r| r.text)
    }

    /// Full retry/fallback run with provenance of the answer
    pub async fn execute(&self, request: &GenerationRequest)
      -> Result<GenerationResult, Error>
    {   let policy = RetryPolicy::from_config(
          &self.retry
        , request.options.max_retries
        );
        debug!(
          "Executing on {} with up to {} attempts",
          request.options.provider, policy.max_attempts
        );
        generate_with_failover(
          self.dispatcher.as_ref()
        , request
        , &policy
        , &self.fallbacks
        ).await
    }

    /// Generate with retry and parse the JSON document in the answer
    pub async fn generate_json<T>(
      &self
    , prompt: &str
    , options: &GenerationOptions
    ) -> Result<T, Error>
    where
      T: DeserializeOwned
    {   let text = self.generate_with_retry(prompt, options).await?;
        crate::json::extract_json_as(&text)
    }

    async fn single(&self, request: &GenerationRequest)
      -> Result<String, Error>
    {   request.options.validate()?;
        attempt_once(
          self.dispatcher.as_ref()
        , request
        , &request.options.provider
        ).await
    }
}
