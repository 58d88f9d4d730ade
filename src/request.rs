//! Generation requests, the wire payload and normalized results

use serde::{Deserialize, Serialize};

use crate::config::GenerationOptions;
use crate::error::Error;
use crate::{ChatMessage, Role};

/// What the caller wants generated
#[derive(Debug, Clone, PartialEq)]
pub enum Input
{   /// Single prompt, no history
    Prompt(String)
  , /// Ordered conversation; the last message is the one answered
    Messages(Vec<ChatMessage>)
}

/// A prompt or conversation plus its options
#[derive(Debug, Clone)]
pub struct GenerationRequest
{   pub input: Input
  , pub options: GenerationOptions
}

impl GenerationRequest
{   pub fn prompt(
      prompt: impl Into<String>
    , options: GenerationOptions
    ) -> Self
    {   GenerationRequest
        {   input: Input::Prompt(prompt.into())
          , options
        }
    }

    pub fn chat(
      messages: Vec<ChatMessage>
    , options: GenerationOptions
    ) -> Self
    {   GenerationRequest
        {   input: Input::Messages(messages)
          , options
        }
    }

    /// Build the wire payload addressed to `provider`.
    ///
    /// A leading system message becomes `chatbot_global_action`;
    /// everything between it and the last message becomes
    /// `previous_history`.
    pub fn to_payload(&self, provider: &str)
      -> Result<WirePayload, Error>
    {   let (text, global_action, history) = match &self.input
        {   Input::Prompt(prompt) => {
              (prompt.clone(), String::new(), Vec::new())
            }
          , Input::Messages(messages) => flatten_messages(messages)?
        };

        if text.trim().is_empty()
        {   return Err(Error::EmptyInput);
        }

        Ok(WirePayload
        {   providers: provider.to_string()
          , text
          , chatbot_global_action: global_action
          , previous_history: history
          , temperature: self.options.temperature
          , max_tokens: self.options.max_tokens
        })
    }
}

fn flatten_messages(messages: &[ChatMessage])
  -> Result<(String, String, Vec<HistoryEntry>), Error>
{   let (global_action, turns) = match messages.split_first()
    {   Some((first, rest)) if first.role == Role::System => {
          (first.content.clone(), rest)
        }
      , Some(_) => (String::new(), messages)
      , None => return Err(Error::EmptyInput)
    };

    let (last, earlier) = turns.split_last()
      .ok_or(Error::EmptyInput)?;

    let history = earlier.iter()
      .map(|m| HistoryEntry
      {   role: wire_role(&m.role).to_string()
        , message: m.content.clone()
      })
      .collect();

    Ok((last.content.clone(), global_action, history))
}

// The history field only knows user and assistant turns.
fn wire_role(role: &Role) -> &'static str
{   match role
    {   Role::Assistant => "assistant"
      , Role::User | Role::System => "user"
    }
}

/// JSON body posted to the generation endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WirePayload
{   pub providers: String
  , pub text: String
  , pub chatbot_global_action: String
  , pub previous_history: Vec<HistoryEntry>
  , pub temperature: f32
  , pub max_tokens: u32
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry
{   pub role: String
  , pub message: String
}

/// Normalized successful generation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationResult
{   /// Extracted text, never blank
    pub text: String
  , /// Provider that produced the text
    pub provider: String
  , /// Primary attempts made
    pub attempts: u32
  , /// Whether the declared fallback answered
    pub used_fallback: bool
}
