//! Retry and fallback logic for generation calls

use std::time::Duration;

use log::{debug, info, warn};
use tokio_util::sync::CancellationToken;

use crate::config::{FallbackMap, RetryConfig};
use crate::dispatch::{dispatch_cancellable, Dispatch};
use crate::error::Error;
use crate::request::{GenerationRequest, GenerationResult};

/// Retry policy for the primary provider
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy
{   pub max_attempts: u32
  , pub backoff_multiplier: f32
  , pub initial_backoff: Duration
  , pub max_backoff: Duration
  , pub jitter: bool
}

impl RetryPolicy
{   /// Create a new retry policy without jitter or a cap
    pub fn new(
      max_attempts: u32
    , backoff_multiplier: f32
    , initial_backoff_ms: u64
    ) -> Self
    {   RetryPolicy
        {   max_attempts: max_attempts.max(1)
          , backoff_multiplier
          , initial_backoff: Duration::from_millis(initial_backoff_ms)
          , max_backoff: Duration::MAX
          , jitter: false
        }
    }

    /// Policy for one call: backoff shape from config,
    /// attempt count from the call's options.
    pub fn from_config(config: &RetryConfig, max_retries: u32) -> Self
    {   RetryPolicy
        {   max_attempts: max_retries.max(1)
          , backoff_multiplier: config.backoff_multiplier
          , initial_backoff: Duration::from_millis(
              config.initial_backoff_ms
            )
          , max_backoff: Duration::from_millis(config.max_backoff_ms)
          , jitter: config.jitter
        }
    }

    /// Wait after failed attempt `attempt` (1-based):
    /// `initial * multiplier^(attempt - 1)`, capped.
    pub fn backoff_for_attempt(&self, attempt: u32) -> Duration
    {   if self.initial_backoff.is_zero()
        {   return Duration::ZERO;
        }
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let multiplier = (self.backoff_multiplier as f64).powi(exponent);
        let mut delay_ms = (self.initial_backoff.as_millis() as f64
          * multiplier)
          .min(self.max_backoff.as_millis() as f64);

        if self.jitter
        {   let spread = delay_ms * 0.25;
            delay_ms = (delay_ms + (rand_unit() * 2.0 - 1.0) * spread)
              .max(0.0);
        }
        debug!("Backoff after attempt {}: {}ms", attempt, delay_ms as u64);
        Duration::from_millis(delay_ms as u64)
    }

    /// Every wait a fully failing primary run goes through.
    pub fn backoff_schedule(&self) -> Vec<Duration>
    {   (1..self.max_attempts)
          .map(|attempt| self.backoff_for_attempt(attempt))
          .collect()
    }
}

impl Default for RetryPolicy
{   fn default() -> Self
    {   RetryPolicy::from_config(&RetryConfig::default(), 3)
    }
}

// Jitter only needs spread, not quality.
fn rand_unit() -> f64
{   use std::time::SystemTime;
    let nanos = SystemTime::now()
      .duration_since(SystemTime::UNIX_EPOCH)
      .unwrap_or_default()
      .subsec_nanos();
    (nanos % 1000) as f64 / 1000.0
}

/// Retry controller states
#[derive(Debug, Clone, PartialEq)]
pub enum AttemptState
{   Attempting
    {   attempt: u32
    }
  , Succeeded
    {   text: String
      , attempt: u32
    }
  , Exhausted
    {   attempts: u32
      , last_error: Error
    }
}

/// How the primary run ended
#[derive(Debug, Clone, PartialEq)]
pub enum RetryOutcome
{   Succeeded
    {   text: String
      , attempts: u32
    }
  , /// Every attempt failed with a retryable error
    Exhausted
    {   attempts: u32
      , last_error: Error
    }
  , /// A non-retryable error stopped the run
    Terminal
    {   attempts: u32
      , error: Error
    }
}

/// Dispatch and extract once against `provider`.
pub async fn attempt_once<D>(
  dispatcher: &D
, request: &GenerationRequest
, provider: &str
) -> Result<String, Error>
where
  D: Dispatch + ?Sized
{   let payload = request.to_payload(provider)?;
    let response = dispatch_cancellable(
      dispatcher
    , &payload
    , request.options.cancel.as_ref()
    ).await?;
    response.extract_text(provider)
}

async fn sleep_cancellable(
  delay: Duration
, cancel: Option<&CancellationToken>
) -> Result<(), Error>
{   match cancel
    {   Some(token) => {
          tokio::select!
          {   biased;
              _ = token.cancelled() => Err(Error::Cancelled)
            , _ = tokio::time::sleep(delay) => Ok(())
          }
        }
      , None => {
          tokio::time::sleep(delay).await;
          Ok(())
        }
    }
}

/// Drive the primary provider through the attempt state machine.
pub async fn run_primary<D>(
  dispatcher: &D
, request: &GenerationRequest
, policy: &RetryPolicy
) -> RetryOutcome
where
  D: Dispatch + ?Sized
{   let provider = request.options.provider.as_str();
    let cancel = request.options.cancel.as_ref();
    let mut state = AttemptState::Attempting { attempt: 1 };

    loop
    {   state = match state
        {   AttemptState::Attempting { attempt } => {
              debug!("Attempt {}/{} on {}", attempt, policy.max_attempts, provider);
              match attempt_once(dispatcher, request, provider).await
              {   Ok(text) => AttemptState::Succeeded { text, attempt }
                , Err(error) if !error.is_retryable() => {
                    debug!("Terminal error on {}: {}", provider, error);
                    return RetryOutcome::Terminal
                    {   attempts: attempt
                      , error
                    };
                  }
                , Err(last_error) if attempt >= policy.max_attempts => {
                    AttemptState::Exhausted
                    {   attempts: attempt
                      , last_error
                    }
                  }
                , Err(error) => {
                    let delay = policy.backoff_for_attempt(attempt);
                    warn!(
                      "Attempt {} on {} failed: {}. Retrying in {:?}",
                      attempt, provider, error, delay
                    );
                    if let Err(error) = sleep_cancellable(delay, cancel).await
                    {   return RetryOutcome::Terminal
                        {   attempts: attempt
                          , error
                        };
                    }
                    AttemptState::Attempting { attempt: attempt + 1 }
                  }
              }
            }
          , AttemptState::Succeeded { text, attempt } => {
              debug!("{} succeeded on attempt {}", provider, attempt);
              return RetryOutcome::Succeeded
              {   text
                , attempts: attempt
              };
            }
          , AttemptState::Exhausted { attempts, last_error } => {
              warn!(
                "{} exhausted after {} attempts: {}",
                provider, attempts, last_error
              );
              return RetryOutcome::Exhausted
              {   attempts
                , last_error
              };
            }
        };
    }
}

/// Retry the primary provider, then try its declared fallback
/// once. A failing fallback surfaces the primary's last error.
pub async fn generate_with_failover<D>(
  dispatcher: &D
, request: &GenerationRequest
, policy: &RetryPolicy
, fallbacks: &FallbackMap
) -> Result<GenerationResult, Error>
where
  D: Dispatch + ?Sized
{   request.options.validate()?;
    let provider = request.options.provider.as_str();

    let (attempts, last_error) = match run_primary(dispatcher, request, policy).await
    {   RetryOutcome::Succeeded { text, attempts } => {
          return Ok(GenerationResult
          {   text
            , provider: provider.to_string()
            , attempts
            , used_fallback: false
          });
        }
      , RetryOutcome::Terminal { error, .. } => return Err(error)
      , RetryOutcome::Exhausted { attempts, last_error } => {
          (attempts, last_error)
        }
    };

    let Some(fallback) = fallbacks.fallback_for(provider)
    else
    {   return Err(last_error);
    };

    info!("Falling back from {} to {}", provider, fallback);
    match attempt_once(dispatcher, request, fallback).await
    {   Ok(text) => Ok(GenerationResult
        {   text
          , provider: fallback.to_string()
          , attempts
          , used_fallback: true
        })
      , Err(Error::Cancelled) => Err(Error::Cancelled)
      , Err(fallback_error) => {
          warn!("Fallback {} failed: {}", fallback, fallback_error);
          Err(last_error)
        }
    }
}
