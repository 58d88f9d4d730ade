//! Locating generated text in a provider-keyed response

use log::{debug, trace};
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::error::Error;

const FAIL_STATUS: &str = "fail";

/// Family part of a `vendor/model` identifier.
pub fn base_name(provider: &str) -> &str
{   provider.split('/').next().unwrap_or(provider)
}

/// Raw response body, keyed by provider identifier.
/// Key order follows the response document.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(transparent)]
pub struct ProviderResponse(Map<String, Value>);

impl ProviderResponse
{   pub fn new(entries: Map<String, Value>) -> Self
    {   ProviderResponse(entries)
    }

    pub fn from_value(value: Value) -> Result<Self, Error>
    {   match value
        {   Value::Object(map) => Ok(ProviderResponse(map))
          , other => Err(Error::Parse(format!(
              "expected a JSON object keyed by provider, got {}",
              kind_of(&other)
            )))
        }
    }

    /// Entry stored under exactly `key`, if it is an object.
    fn entry(&self, key: &str) -> Option<ProviderEntry>
    {   self.0.get(key).and_then(ProviderEntry::from_value)
    }

    /// Find the entry answering for `provider`.
    pub fn resolve(&self, provider: &str) -> Resolution
    {   if let Some(entry) = self.entry(provider)
        {   return Resolution::Exact(entry);
        }

        let base = base_name(provider);
        if base != provider
        {   if let Some(entry) = self.entry(base)
            {   return Resolution::BaseName(entry);
            }
        }

        self.0.iter()
          .find_map(|(key, value)| {
            ProviderEntry::from_value(value)
              .filter(|e| e.generated_text.as_deref()
                .is_some_and(|t| !t.trim().is_empty()))
              .map(|e| (key, e))
          })
          .map(|(key, entry)| Resolution::Scanned
          {   key: key.clone()
            , entry
          })
          .unwrap_or(Resolution::NotFound)
    }

    /// Generated text for `provider`, or the typed failure.
    pub fn extract_text(&self, provider: &str)
      -> Result<String, Error>
    {   let entry = match self.resolve(provider)
        {   Resolution::Exact(entry) => entry
          , Resolution::BaseName(entry) => {
              debug!(
                "Matched {} by base name {}",
                provider, base_name(provider)
              );
              entry
            }
          , Resolution::Scanned { key, entry } => {
              debug!("Matched {} by scanning, found {}", provider, key);
              entry
            }
          , Resolution::NotFound => {
              return Err(Error::NoProviderResponse(
                provider.to_string()
              ));
            }
        };
        trace!("Resolved entry for {}: {:?}", provider, entry);
        entry.into_text(provider)
    }
}

fn kind_of(value: &Value) -> &'static str
{   match value
    {   Value::Null => "null"
      , Value::Bool(_) => "a boolean"
      , Value::Number(_) => "a number"
      , Value::String(_) => "a string"
      , Value::Array(_) => "an array"
      , Value::Object(_) => "an object"
    }
}

/// Outcome of looking up a provider in a [`ProviderResponse`]
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution
{   /// Entry under the requested identifier
    Exact(ProviderEntry)
  , /// Entry under the identifier's family name
    BaseName(ProviderEntry)
  , /// First entry anywhere exposing generated text
    Scanned
    {   key: String
      , entry: ProviderEntry
    }
  , NotFound
}

/// One provider's result object
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProviderEntry
{   pub generated_text: Option<String>
  , pub status: Option<String>
  , pub error: Option<ProviderErrorBody>
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProviderErrorBody
{   pub message: Option<String>
}

impl ProviderEntry
{   /// Lenient decode: non-objects are skipped, odd field
    /// types count as absent.
    fn from_value(value: &Value) -> Option<Self>
    {   let obj = value.as_object()?;
        let text_field = |name: &str| obj.get(name)
          .and_then(Value::as_str)
          .map(str::to_string);

        let error = obj.get("error").and_then(|e| match e
        {   Value::Object(body) => Some(ProviderErrorBody
            {   message: body.get("message")
                  .and_then(Value::as_str)
                  .map(str::to_string)
            })
          , Value::String(s) => Some(ProviderErrorBody
            {   message: Some(s.clone())
            })
          , _ => None
        });

        Some(ProviderEntry
        {   generated_text: text_field("generated_text")
          , status: text_field("status")
          , error
        })
    }

    pub fn is_failure(&self) -> bool
    {   self.status.as_deref() == Some(FAIL_STATUS)
    }

    fn into_text(self, provider: &str) -> Result<String, Error>
    {   if self.is_failure()
        {   let message = self.error
              .and_then(|e| e.message)
              .filter(|m| !m.trim().is_empty())
              .unwrap_or_else(|| "provider reported failure".to_string());
            return Err(Error::ProviderReported(message));
        }

        match self.generated_text
        {   Some(text) if !text.trim().is_empty() => Ok(text)
          , _ => Err(Error::EmptyResponse(provider.to_string()))
        }
    }
}
