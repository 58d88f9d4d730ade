use std::fmt;

/// Error type for every regen operation.
/// Implements Clone so the retry controller can keep the
/// last primary failure while a fallback runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error
{   /// Generation endpoint answered with a non-2xx status
    Transport
    {   status: u16
      , body: String
    }
  , /// Network failure before any status was received
    Http(String)
  , /// Request deadline exceeded
    Timeout
  , /// Success body could not be decoded as JSON
    Parse(String)
  , /// No key in the response yielded generated text
    NoProviderResponse(String)
  , /// Matched provider entry carried `status: "fail"`
    ProviderReported(String)
  , /// Matched provider entry had blank generated text
    EmptyResponse(String)
  , /// Generated text held no parseable JSON document
    MalformedJson(String)
  , /// Input text was blank
    EmptyInput
  , /// Invalid configuration or request options
    InvalidConfiguration(String)
  , /// Caller cancelled the invocation
    Cancelled
}

impl Error
{   /// Whether the retry controller may try again after this error.
    ///
    /// Upstream failures are treated as transient. Lookup misses,
    /// malformed JSON and caller mistakes are terminal.
    pub fn is_retryable(&self) -> bool
    {   matches!(
          self
        , Error::Transport { .. }
          | Error::Http(_)
          | Error::Timeout
          | Error::Parse(_)
          | Error::ProviderReported(_)
          | Error::EmptyResponse(_)
        )
    }
}

impl fmt::Display for Error
{   fn fmt(&self, f: &mut fmt::Formatter<'_>)
      -> fmt::Result
    {   match self
        {   Error::Transport { status, body } => {
              write!(f, "Transport error (status {}): {}", status, body)
            }
          , Error::Http(msg) => {
              write!(f, "HTTP error: {}", msg)
            }
          , Error::Timeout => {
              write!(f, "Request timed out")
            }
          , Error::Parse(msg) => {
              write!(f, "Parse error: {}", msg)
            }
          , Error::NoProviderResponse(provider) => {
              write!(f,
                "No provider response with generated text for: {}",
                provider
              )
            }
          , Error::ProviderReported(msg) => {
              write!(f, "Provider error: {}", msg)
            }
          , Error::EmptyResponse(provider) => {
              write!(f, "Empty response from provider: {}", provider)
            }
          , Error::MalformedJson(msg) => {
              write!(f, "Malformed JSON: {}", msg)
            }
          , Error::EmptyInput => {
              write!(f, "Input text is empty")
            }
          , Error::InvalidConfiguration(msg) => {
              write!(f, "Invalid configuration: {}", msg)
            }
          , Error::Cancelled => {
              write!(f, "Generation cancelled")
            }
        }
    }
}

impl std::error::Error for Error {}

impl From<reqwest::Error> for Error
{   fn from(e: reqwest::Error) -> Self
    {   if e.is_timeout()
        {   Error::Timeout
        } else if e.is_decode()
        {   Error::Parse(e.to_string())
        } else
        {   Error::Http(e.to_string())
        }
    }
}

impl From<String> for Error
{   fn from(s: String) -> Self
    {   Error::InvalidConfiguration(s)
    }
}

impl From<&str> for Error
{   fn from(s: &str) -> Self
    {   Error::InvalidConfiguration(s.to_string())
    }
}
