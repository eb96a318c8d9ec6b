//! Lazily built, cached provider clients

use parking_lot::RwLock;
use reqwest::Client;
use std::sync::Arc;
use tracing::debug;

use conduit_config::ConfigHandle;
use conduit_protocol::{ModelTier, NativeBackend, Provider};

use crate::anthropic::{NativeAuth, NativeClient};
use crate::config::RuntimeConfig;
use crate::error::ProviderError;
use crate::openai::{OpenAICompatClient, DEFAULT_OPENAI_BASE_URL};
use crate::session::SessionState;

/// A built native client and what it was built for
#[derive(Debug, Clone)]
pub struct CachedClientHandle {
    pub provider: Provider,
    pub backend: NativeBackend,
    pub tier: ModelTier,
    /// Index of the configured API key in use, when one was used
    pub key_index: Option<usize>,
    pub client: Arc<NativeClient>,
}

impl CachedClientHandle {
    fn matches(&self, provider: Provider, backend: NativeBackend) -> bool {
        self.provider == provider && self.backend == backend
    }
}

#[derive(Debug, Clone, Default)]
enum ClientSlot {
    #[default]
    Unbuilt,
    Ready(CachedClientHandle),
}

#[derive(Debug, Default)]
struct ClientSlots {
    small: ClientSlot,
    large: ClientSlot,
}

impl ClientSlots {
    fn get(&self, tier: ModelTier) -> &ClientSlot {
        match tier {
            ModelTier::Small => &self.small,
            ModelTier::Large => &self.large,
        }
    }

    fn get_mut(&mut self, tier: ModelTier) -> &mut ClientSlot {
        match tier {
            ModelTier::Small => &mut self.small,
            ModelTier::Large => &mut self.large,
        }
    }
}

/// An OpenAI-compatible client with the key it was given
#[derive(Debug, Clone)]
pub struct OpenAIHandle {
    pub client: OpenAICompatClient,
    pub key_index: Option<usize>,
}

/// Owns the shared HTTP client and the cached native clients
pub struct ClientRegistry {
    config: ConfigHandle,
    runtime: RuntimeConfig,
    session: Arc<SessionState>,
    http: Client,
    slots: RwLock<ClientSlots>,
}

impl ClientRegistry {
    pub fn new(
        config: ConfigHandle,
        runtime: RuntimeConfig,
        session: Arc<SessionState>,
    ) -> Result<Self, ProviderError> {
        let http = Client::builder()
            .timeout(runtime.request_timeout)
            .build()
            .map_err(|e| ProviderError::Configuration(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            config,
            runtime,
            session,
            http,
            slots: RwLock::new(ClientSlots::default()),
        })
    }

    pub fn runtime(&self) -> &RuntimeConfig {
        &self.runtime
    }

    pub fn config(&self) -> &ConfigHandle {
        &self.config
    }

    pub fn session(&self) -> &Arc<SessionState> {
        &self.session
    }

    pub fn get_client(&self, model_hint: &str) -> Result<Arc<NativeClient>, ProviderError> {
        Ok(self.get_handle(model_hint)?.client)
    }

    /// Cached native client for the tier implied by `model_hint`, building
    /// it on first use or after the provider or backend changed
    pub fn get_handle(&self, model_hint: &str) -> Result<CachedClientHandle, ProviderError> {
        let tier = ModelTier::for_model(model_hint);
        let provider = self.config.snapshot().primary_provider;
        let backend = self.runtime.native_backend;

        if let ClientSlot::Ready(handle) = self.slots.read().get(tier) {
            if handle.matches(provider, backend) {
                return Ok(handle.clone());
            }
        }

        let mut slots = self.slots.write();
        if let ClientSlot::Ready(handle) = slots.get(tier) {
            if handle.matches(provider, backend) {
                return Ok(handle.clone());
            }
        }

        let handle = self.build_native(tier, provider, backend)?;
        *slots.get_mut(tier) = ClientSlot::Ready(handle.clone());
        Ok(handle)
    }

    /// Drop every cached client; the next call rebuilds
    pub fn reset_client(&self) {
        debug!("Resetting cached provider clients");
        *self.slots.write() = ClientSlots::default();
    }

    fn build_native(
        &self,
        tier: ModelTier,
        provider: Provider,
        backend: NativeBackend,
    ) -> Result<CachedClientHandle, ProviderError> {
        let config = self.config.snapshot();

        let (auth, key_index) = match backend {
            NativeBackend::Direct => match &self.runtime.anthropic_auth_token {
                Some(token) => (NativeAuth::Bearer(token.clone()), None),
                None => {
                    let (index, key) = self
                        .session
                        .select_key(tier, config.api_keys(tier))
                        .ok_or_else(|| {
                            ProviderError::Configuration(format!(
                                "No usable API key configured for the {tier} model"
                            ))
                        })?;
                    (NativeAuth::ApiKey(key), Some(index))
                }
            },
            NativeBackend::Bedrock => {
                let token = self.runtime.bedrock_token.clone().ok_or_else(|| {
                    ProviderError::Configuration(
                        "AWS_BEARER_TOKEN_BEDROCK is required for Bedrock".to_string(),
                    )
                })?;
                (NativeAuth::Bearer(token), None)
            }
            NativeBackend::Vertex => {
                let token = self.runtime.vertex_access_token.clone().ok_or_else(|| {
                    ProviderError::Configuration(
                        "VERTEX_ACCESS_TOKEN is required for Vertex".to_string(),
                    )
                })?;
                (NativeAuth::Bearer(token), None)
            }
        };

        let client = NativeClient::new(
            self.http.clone(),
            backend,
            auth,
            &self.runtime,
            config.vertex_region.clone(),
        )?;
        debug!(%provider, %backend, %tier, ?key_index, "Built native client");

        Ok(CachedClientHandle {
            provider,
            backend,
            tier,
            key_index,
            client: Arc::new(client),
        })
    }

    /// Client for the tier's OpenAI-compatible endpoint.
    ///
    /// A tier with no keys configured gets a keyless client; a tier whose
    /// keys have all failed is an error.
    pub fn openai_client(&self, tier: ModelTier) -> Result<OpenAIHandle, ProviderError> {
        let config = self.config.snapshot();
        let base_url = config
            .resolved_base_url(tier)
            .unwrap_or_else(|| DEFAULT_OPENAI_BASE_URL.to_string());

        let keys = config.api_keys(tier);
        let (key_index, api_key) = if keys.is_empty() {
            (None, None)
        } else {
            let (index, key) = self.session.select_key(tier, keys).ok_or_else(|| {
                ProviderError::Configuration(format!(
                    "All API keys for the {tier} model have failed"
                ))
            })?;
            (Some(index), Some(key))
        };

        Ok(OpenAIHandle {
            client: OpenAICompatClient::new(
                self.http.clone(),
                config.primary_provider,
                base_url,
                api_key,
            ),
            key_index,
        })
    }
}
