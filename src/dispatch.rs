//! Request dispatch to the generation endpoint

use std::time::Duration;

use async_trait::async_trait;
use log::{debug, error, trace};
use tokio_util::sync::CancellationToken;

use crate::config::ClientConfig;
use crate::error::Error;
use crate::extract::ProviderResponse;
use crate::request::WirePayload;

const CHAT_PATH: &str = "/text/chat";

/// One outbound generation call.
///
/// Implementations perform exactly one request per call and
/// report non-2xx statuses as [`Error::Transport`].
#[async_trait]
pub trait Dispatch: Send + Sync
{   async fn dispatch(&self, payload: &WirePayload)
      -> Result<ProviderResponse, Error>;
}

/// Run one dispatch, abandoning it if `cancel` fires first.
pub async fn dispatch_cancellable<D>(
  dispatcher: &D
, payload: &WirePayload
, cancel: Option<&CancellationToken>
) -> Result<ProviderResponse, Error>
where
  D: Dispatch + ?Sized
{   match cancel
    {   Some(token) => {
          tokio::select!
          {   biased;
              _ = token.cancelled() => {
                debug!("Dispatch to {} cancelled", payload.providers);
                Err(Error::Cancelled)
              }
            , result = dispatcher.dispatch(payload) => result
          }
        }
      , None => dispatcher.dispatch(payload).await
    }
}

/// reqwest-backed dispatcher with a bounded request deadline.
/// Not `Debug`: it holds the API key.
#[derive(Clone)]
pub struct HttpDispatcher
{   http_client: reqwest::Client
  , endpoint: String
  , api_key: String
}

impl HttpDispatcher
{   pub fn new(config: &ClientConfig) -> Result<Self, Error>
    {   config.validate()?;
        let http_client = reqwest::Client::builder()
          .timeout(Duration::from_secs(config.timeout_secs))
          .build()
          .map_err(|e| {
            error!("Failed to build HTTP client: {}", e);
            Error::InvalidConfiguration(e.to_string())
          })?;
        let endpoint = format!(
          "{}{}",
          config.base_url.trim_end_matches('/'),
          CHAT_PATH
        );
        debug!("Creating HttpDispatcher for {}", endpoint);

        Ok(HttpDispatcher
        {   http_client
          , endpoint
          , api_key: config.api_key.clone()
        })
    }

    pub fn endpoint(&self) -> &str
    {   &self.endpoint
    }
}

#[async_trait]
impl Dispatch for HttpDispatcher
{   async fn dispatch(&self, payload: &WirePayload)
      -> Result<ProviderResponse, Error>
    {   debug!("Dispatching generation to: {}", payload.providers);
        trace!("Generation payload: {:?}", payload);

        let response = self.http_client
          .post(&self.endpoint)
          .bearer_auth(&self.api_key)
          .json(payload)
          .send()
          .await
          .map_err(|e| {
            error!("HTTP error: {}", e);
            Error::from(e)
          })?;

        let status = response.status();
        trace!("Generation response status: {}", status);

        if !status.is_success()
        {   let body = response.text().await
              .unwrap_or_else(|_| "Unknown error".to_string());
            error!("Generation endpoint error {}: {}", status, body);
            return Err(Error::Transport
            {   status: status.as_u16()
              , body
            });
        }

        let value: serde_json::Value = response.json().await
          .map_err(|e| {
            error!("Parse error: {}", e);
            Error::Parse(e.to_string())
          })?;
        ProviderResponse::from_value(value)
    }
}
