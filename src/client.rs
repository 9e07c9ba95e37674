//! High-level bridge: normalize a host conversation into a vendor request,
//! send it, and decode the response stream into canonical events.

use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION, CONTENT_TYPE};

use crate::config::{AppConfig, ProviderConfig};
use crate::error::Error;
use crate::normalize::{
    anthropic::build_anthropic_request, openai::build_openai_request, Conversation,
    GenerationParams, ModelCapabilities, ToolDefinition,
};
use crate::protocol::Dialect;
use crate::stream::decoder::{CancelFlag, EventSink, StreamDecoder, StreamOutcome};
use crate::transport::{HttpTransport, TransportConfig};

const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Source of API keys. Keys are resolved per request and never stored in
/// request state or logged.
pub trait SecretStore: Send + Sync {
    fn get(&self, name: &str) -> Option<String>;
}

/// Resolves secrets from process environment variables.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvSecretStore;

impl SecretStore for EnvSecretStore {
    fn get(&self, name: &str) -> Option<String> {
        std::env::var(name).ok()
    }
}

/// The bridge between a host chat interface and configured vendor endpoints.
pub struct ChatBridge {
    config: AppConfig,
    transport: HttpTransport,
    secrets: Box<dyn SecretStore>,
}

impl ChatBridge {
    /// Build the bridge from a validated config.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Transport`] when the HTTP client cannot be built.
    pub fn new(config: AppConfig, secrets: Box<dyn SecretStore>) -> Result<Self, Error> {
        let transport = HttpTransport::new(&TransportConfig {
            timeout: Duration::from_secs(config.client.timeout),
            pool_max_idle_per_host: config.client.http_pool_max_idle_per_host,
            pool_idle_timeout: Some(Duration::from_secs(config.client.http_pool_idle_timeout_secs)),
            use_env_proxy: config.client.http_use_env_proxy,
        })?;
        Ok(Self {
            config,
            transport,
            secrets,
        })
    }

    /// Send the conversation to the named provider and decode the response
    /// stream, emitting canonical events into `sink`.
    ///
    /// The key is resolved from the secret store before any network traffic;
    /// a missing key fails the request without touching the wire.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for an unknown provider, [`Error::Credential`]
    /// when the API key cannot be resolved, and any error the transport or
    /// decoder raises.
    pub async fn stream_chat<K: EventSink>(
        &self,
        provider_name: &str,
        conversation: &Conversation,
        tools: &[ToolDefinition],
        params: GenerationParams,
        sink: &mut K,
        cancel: &CancelFlag,
    ) -> Result<StreamOutcome, Error> {
        let provider = self
            .config
            .provider(provider_name)
            .ok_or_else(|| Error::Config(format!("unknown provider '{provider_name}'")))?;
        let api_key = self
            .secrets
            .get(&provider.api_key_env)
            .ok_or_else(|| Error::Credential(provider.api_key_env.clone()))?;

        let request_id = uuid::Uuid::new_v4();
        tracing::debug!(
            %request_id,
            provider = provider_name,
            model = %provider.model,
            dialect = ?provider.dialect,
            "dispatching stream request"
        );

        let started = std::time::Instant::now();
        let url = endpoint_url(provider)?;
        let headers = provider_headers(provider, &api_key)?;
        let capabilities = ModelCapabilities {
            tool_calling: provider.tool_calling,
            image_input: provider.image_input,
        };
        let tools = if provider.tool_calling { tools } else { &[] };
        let mut params = params;
        if params.max_tokens.is_none() {
            params.max_tokens = provider.max_tokens.map(u64::from);
        }

        let response = match provider.dialect {
            Dialect::OpenAi => {
                let (request, _) =
                    build_openai_request(&provider.model, conversation, tools, capabilities, params);
                self.transport.post_stream(&url, headers, &request).await?
            }
            Dialect::Anthropic => {
                let (request, _) = build_anthropic_request(
                    &provider.model,
                    conversation,
                    tools,
                    capabilities,
                    params,
                );
                self.transport.post_stream(&url, headers, &request).await?
            }
        };

        let byte_stream = Box::pin(response.bytes_stream());
        let outcome = StreamDecoder::new(provider.dialect)
            .run(byte_stream, sink, cancel)
            .await?;

        if let StreamOutcome::Completed { usage, .. } = &outcome {
            crate::observability::log_stream_complete(&provider.model, usage.as_ref(), started);
        }
        Ok(outcome)
    }
}

fn endpoint_url(provider: &ProviderConfig) -> Result<url::Url, Error> {
    let base = provider.base_url.trim_end_matches('/');
    let path = match provider.dialect {
        Dialect::OpenAi => format!("{base}/chat/completions"),
        Dialect::Anthropic => format!("{base}/messages"),
    };
    url::Url::parse(&path)
        .map_err(|err| Error::Config(format!("invalid endpoint URL '{path}': {err}")))
}

fn provider_headers(provider: &ProviderConfig, api_key: &str) -> Result<HeaderMap, Error> {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

    match provider.dialect {
        Dialect::OpenAi => {
            let value = HeaderValue::from_str(&format!("Bearer {api_key}"))
                .map_err(|_| Error::Credential(provider.api_key_env.clone()))?;
            headers.insert(AUTHORIZATION, value);
        }
        Dialect::Anthropic => {
            let value = HeaderValue::from_str(api_key)
                .map_err(|_| Error::Credential(provider.api_key_env.clone()))?;
            headers.insert("x-api-key", value);
            headers.insert("anthropic-version", HeaderValue::from_static(ANTHROPIC_VERSION));
        }
    }

    for (name, value) in &provider.extra_headers {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|err| Error::Config(format!("invalid extra header '{name}': {err}")))?;
        let value = HeaderValue::from_str(value)
            .map_err(|err| Error::Config(format!("invalid extra header value: {err}")))?;
        headers.insert(name, value);
    }

    Ok(headers)
}
