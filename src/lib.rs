pub mod error;
pub mod config;
pub mod request;
pub mod extract;
pub mod dispatch;
pub mod failover;
pub mod json;
pub mod client;
use serde::{Deserialize, Serialize};

/*

regen (Resilient GENeration) is an async client for a
provider-multiplexing text-generation endpoint: one request
names the target model in a `providers` string, the answer
comes back keyed by provider.

regen/
├── Cargo.toml
├── src/
│   ├── lib.rs          # Re-exports, chat message types
│   ├── error.rs        # Error taxonomy and retryability
│   ├── config.rs       # Client config, per-call options, fallbacks
│   ├── request.rs      # Requests, wire payload, results
│   ├── dispatch.rs     # Outbound call (trait + reqwest impl)
│   ├── extract.rs      # Finding generated text in a response
│   ├── failover.rs     # Retry state machine, backoff, fallback
│   ├── json.rs         # JSON extraction from generated text
│   ├── client.rs       # Main client interface
│   └── bin/regen.rs    # Command line smoke test
└── tests/              # Integration tests against a mock server

*/

pub use client::GenerationClient;
pub use config::{ClientConfig, FallbackMap, GenerationOptions, RetryConfig};
pub use dispatch::{Dispatch, HttpDispatcher};
pub use error::Error;
pub use extract::{ProviderResponse, Resolution};
pub use failover::{RetryOutcome, RetryPolicy};
pub use json::{extract_json, extract_json_as};
pub use request::{GenerationRequest, GenerationResult, Input, WirePayload};

/// Who authored a chat message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role
{   System
  , User
  , Assistant
}

/// One turn of a conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage
{   pub role: Role
  , pub content: String
}

impl ChatMessage
{   pub fn system(content: impl Into<String>) -> Self
    {   ChatMessage
        {   role: Role::System
          , content: content.into()
        }
    }

    pub fn user(content: impl Into<String>) -> Self
    {   ChatMessage
        {   role: Role::User
          , content: content.into()
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self
    {   ChatMessage
        {   role: Role::Assistant
          , content: content.into()
        }
    }
}
