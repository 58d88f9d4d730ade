//! Configuration for the generation client, retries and fallbacks

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use log::debug;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::error::Error;

pub const DEFAULT_BASE_URL: &str
  = "https://api.edenai.run/v2";
pub const DEFAULT_PROVIDER: &str = "openai/gpt-4o-mini";

/// Client configuration, built once at process start and
/// injected into [`crate::client::GenerationClient`].
#[derive(Clone, Serialize, Deserialize)]
pub struct ClientConfig
{   /// Bearer token for the generation endpoint
    pub api_key: String
  , /// API base URL
    #[serde(default = "default_base_url")]
    pub base_url: String
  , /// Per-request deadline in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64
  , /// Backoff shape between primary attempts
    #[serde(default)]
    pub retry: RetryConfig
  , /// Declared provider fallbacks
    #[serde(default)]
    pub fallbacks: FallbackMap
}

fn default_base_url() -> String
{   DEFAULT_BASE_URL.to_string()
}

fn default_timeout_secs() -> u64
{   60
}

impl ClientConfig
{   pub fn new(api_key: impl Into<String>) -> Self
    {   ClientConfig
        {   api_key: api_key.into()
          , base_url: default_base_url()
          , timeout_secs: default_timeout_secs()
          , retry: RetryConfig::default()
          , fallbacks: FallbackMap::default()
        }
    }

    /// Read `REGEN_API_KEY`, `REGEN_BASE_URL` and
    /// `REGEN_TIMEOUT_SECS` from the environment.
    pub fn from_env() -> Result<Self, Error>
    {   let api_key = std::env::var("REGEN_API_KEY")
          .map_err(|_| Error::InvalidConfiguration(
            "REGEN_API_KEY is not set".to_string()
          ))?;
        let mut config = ClientConfig::new(api_key);

        if let Ok(base_url) = std::env::var("REGEN_BASE_URL")
        {   config.base_url = base_url;
        }
        if let Ok(secs) = std::env::var("REGEN_TIMEOUT_SECS")
        {   config.timeout_secs = secs.parse().map_err(|_| {
              Error::InvalidConfiguration(format!(
                "REGEN_TIMEOUT_SECS must be an integer, got {:?}",
                secs
              ))
            })?;
        }
        debug!("Loaded client config from environment");
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>)
      -> Result<Self, Error>
    {   let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
          Error::InvalidConfiguration(format!(
            "cannot read {}: {}", path.display(), e
          ))
        })?;
        let config: ClientConfig = serde_json::from_str(&raw)
          .map_err(|e| Error::InvalidConfiguration(format!(
            "cannot parse {}: {}", path.display(), e
          )))?;
        debug!("Loaded client config from {}", path.display());
        config.validate()?;
        Ok(config)
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>)
      -> Self
    {   self.base_url = base_url.into();
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self
    {   self.retry = retry;
        self
    }

    pub fn with_fallbacks(mut self, fallbacks: FallbackMap) -> Self
    {   self.fallbacks = fallbacks;
        self
    }

    pub fn validate(&self) -> Result<(), Error>
    {   if self.api_key.trim().is_empty()
        {   return Err(Error::InvalidConfiguration(
              "api_key is empty".to_string()
            ));
        }
        if self.base_url.trim().is_empty()
        {   return Err(Error::InvalidConfiguration(
              "base_url is empty".to_string()
            ));
        }
        if self.timeout_secs == 0
        {   return Err(Error::InvalidConfiguration(
              "timeout_secs must be positive".to_string()
            ));
        }
        self.retry.validate()
    }
}

// The key must never reach a log line.
impl fmt::Debug for ClientConfig
{   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {   f.debug_struct("ClientConfig")
          .field("api_key", &"<redacted>")
          .field("base_url", &self.base_url)
          .field("timeout_secs", &self.timeout_secs)
          .field("retry", &self.retry)
          .field("fallbacks", &self.fallbacks)
          .finish()
    }
}

/// Backoff configuration between primary attempts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig
{   /// Delay before the second attempt, in milliseconds
    pub initial_backoff_ms: u64
  , /// Growth factor per attempt
    pub backoff_multiplier: f32
  , /// Upper bound on a single delay, in milliseconds
    pub max_backoff_ms: u64
  , /// Spread each delay by up to 25% either way
    pub jitter: bool
}

impl Default for RetryConfig
{   fn default() -> Self
    {   RetryConfig
        {   initial_backoff_ms: 1000
          , backoff_multiplier: 2.0
          , max_backoff_ms: 30_000
          , jitter: false
        }
    }
}

impl RetryConfig
{   pub fn validate(&self) -> Result<(), Error>
    {   if !self.backoff_multiplier.is_finite()
          || self.backoff_multiplier < 1.0
        {   return Err(Error::InvalidConfiguration(format!(
              "backoff_multiplier must be >= 1.0, got {}",
              self.backoff_multiplier
            )));
        }
        if self.max_backoff_ms < self.initial_backoff_ms
        {   return Err(Error::InvalidConfiguration(
              "max_backoff_ms is below initial_backoff_ms".to_string()
            ));
        }
        Ok(())
    }
}

/// Declared mapping from a provider (or provider family) to
/// the provider tried once after the primary is exhausted.
///
/// Keys are either full identifiers (`openai/gpt-4o`) or a
/// family base name (`openai`). Full identifiers win.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FallbackMap(BTreeMap<String, String>);

impl FallbackMap
{   pub fn new() -> Self
    {   FallbackMap(BTreeMap::new())
    }

    /// Declare a fallback for one provider or a whole family.
    pub fn with(
      mut self
    , provider: impl Into<String>
    , fallback: impl Into<String>
    ) -> Self
    {   self.0.insert(provider.into(), fallback.into());
        self
    }

    /// Fallback for `provider`, if one is declared.
    /// A fallback equal to the provider itself is ignored.
    pub fn fallback_for(&self, provider: &str) -> Option<&str>
    {   let found = self.0.get(provider)
          .or_else(|| self.0.get(crate::extract::base_name(provider)))
          .map(String::as_str)?;
        if found == provider
        {   None
        } else
        {   Some(found)
        }
    }

    pub fn is_empty(&self) -> bool
    {   self.0.is_empty()
    }
}

/// Per-call generation options
#[derive(Debug, Clone)]
pub struct GenerationOptions
{   /// Provider identifier, e.g. `openai/gpt-4o-mini`
    pub provider: String
  , /// Sampling temperature in [0, 1]
    pub temperature: f32
  , /// Maximum output tokens
    pub max_tokens: u32
  , /// Primary attempts before fallback; 0 behaves as 1
    pub max_retries: u32
  , /// Aborts in-flight requests and backoff waits
    pub cancel: Option<CancellationToken>
}

impl Default for GenerationOptions
{   fn default() -> Self
    {   GenerationOptions
        {   provider: DEFAULT_PROVIDER.to_string()
          , temperature: 0.7
          , max_tokens: 1024
          , max_retries: 3
          , cancel: None
        }
    }
}

impl GenerationOptions
{   pub fn for_provider(provider: impl Into<String>) -> Self
    {   GenerationOptions
        {   provider: provider.into()
          , ..GenerationOptions::default()
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self
    {   self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self
    {   self.max_tokens = max_tokens;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self
    {   self.max_retries = max_retries;
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken)
      -> Self
    {   self.cancel = Some(token);
        self
    }

    pub fn validate(&self) -> Result<(), Error>
    {   if self.provider.trim().is_empty()
        {   return Err(Error::InvalidConfiguration(
              "provider is empty".to_string()
            ));
        }
        if !self.temperature.is_finite()
          || !(0.0..=1.0).contains(&self.temperature)
        {   return Err(Error::InvalidConfiguration(format!(
              "temperature must be within [0, 1], got {}",
              self.temperature
            )));
        }
        if self.max_tokens == 0
        {   return Err(Error::InvalidConfiguration(
              "max_tokens must be positive".to_string()
            ));
        }
        Ok(())
    }
}
