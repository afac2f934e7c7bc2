//! Score providers
//!
//! A provider is anything that can supply a player's scores (`ScoreSource`)
//! and/or accept them (`ScoreSink`). Upstream services and the local score
//! store implement the same traits, so the update chain treats them alike.
//!
//! Providers are looked up by name in a [`ProviderRegistry`]. Each
//! [`ProviderBinding`] carries a factory for a per-run provider instance and
//! a mapper from the chain's [`SyncIdentity`] to the provider's own
//! [`PlayerIdentifier`].

pub mod http;
pub mod local;

use async_trait::async_trait;
use otoge_common::config::ProvidersConfig;
use otoge_common::{PlayerIdentity, ScoreRecord};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::db::ScoreStore;
use http::{HttpProvider, UpstreamClient, UpstreamSettings};
use local::LocalStoreProvider;

pub const LXNS: &str = "lxns";
pub const DIVINGFISH: &str = "divingfish";
pub const WECHAT: &str = "wechat";
pub const ARCADE: &str = "arcade";
/// Self-hosted provider backed by the local score store
pub const USAGICARD: &str = "usagicard";

/// Per-provider failure, never fatal to a whole run
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProviderError {
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("unavailable: {0}")]
    Unavailable(String),

    #[error("not supported: {0}")]
    NotSupported(String),

    #[error("cancelled")]
    Cancelled,
}

impl ProviderError {
    /// Stable machine-readable kind
    pub fn kind(&self) -> &'static str {
        match self {
            ProviderError::Unauthorized(_) => "unauthorized",
            ProviderError::Unavailable(_) => "unavailable",
            ProviderError::NotSupported(_) => "not_supported",
            ProviderError::Cancelled => "cancelled",
        }
    }
}

/// Provider-native way of naming a player
#[derive(Clone, PartialEq, Eq)]
pub enum PlayerIdentifier {
    /// Local score-store credential
    Player(PlayerIdentity),
    /// Numeric in-game friend code
    FriendCode(u64),
    /// Personal API token issued by the provider
    PersonalToken(String),
    Username(String),
    /// Opaque session credentials (login cookies, QR payloads)
    Credentials(String),
}

impl fmt::Debug for PlayerIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlayerIdentifier::Player(identity) => write!(f, "Player({:?})", identity),
            PlayerIdentifier::FriendCode(code) => write!(f, "FriendCode({})", code),
            PlayerIdentifier::PersonalToken(_) => f.write_str("PersonalToken(***)"),
            PlayerIdentifier::Username(name) => write!(f, "Username({})", name),
            PlayerIdentifier::Credentials(_) => f.write_str("Credentials(***)"),
        }
    }
}

/// Identity a chain run operates on: the local player plus whatever
/// credentials the caller supplied for upstream providers (keyed by provider name)
#[derive(Debug, Clone)]
pub struct SyncIdentity {
    pub player: PlayerIdentity,
    pub credentials: HashMap<String, String>,
}

impl SyncIdentity {
    pub fn new(player: PlayerIdentity) -> Self {
        Self {
            player,
            credentials: HashMap::new(),
        }
    }

    pub fn with_credential(mut self, provider: impl Into<String>, value: impl Into<String>) -> Self {
        self.credentials.insert(provider.into(), value.into());
        self
    }

    fn credential(&self, provider: &str) -> Result<&str, ProviderError> {
        self.credentials
            .get(provider)
            .map(String::as_str)
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| ProviderError::Unauthorized(format!("no {} credential supplied", provider)))
    }
}

/// Fetch capability
#[async_trait]
pub trait ScoreSource: Send + Sync {
    /// Every score the provider holds for the player
    async fn fetch_all(&self, player: &PlayerIdentifier) -> Result<Vec<ScoreRecord>, ProviderError>;

    /// Scores for one song across chart types and difficulties
    async fn fetch_one(
        &self,
        player: &PlayerIdentifier,
        song_id: u32,
    ) -> Result<Vec<ScoreRecord>, ProviderError>;
}

/// Push capability
#[async_trait]
pub trait ScoreSink: Send + Sync {
    async fn push(&self, player: &PlayerIdentifier, records: &[ScoreRecord]) -> Result<(), ProviderError>;
}

/// Capabilities of one provider instance
#[derive(Clone, Default)]
pub struct ProviderInstance {
    pub source: Option<Arc<dyn ScoreSource>>,
    pub sink: Option<Arc<dyn ScoreSink>>,
}

impl ProviderInstance {
    /// Instance exposing both capabilities from one object
    pub fn both<P>(provider: Arc<P>) -> Self
    where
        P: ScoreSource + ScoreSink + 'static,
    {
        Self {
            source: Some(provider.clone()),
            sink: Some(provider),
        }
    }

    pub fn fetch_only<P>(provider: Arc<P>) -> Self
    where
        P: ScoreSource + 'static,
    {
        Self {
            source: Some(provider),
            sink: None,
        }
    }
}

pub type ProviderFactory = Arc<dyn Fn() -> ProviderInstance + Send + Sync>;
pub type IdentityMapper = fn(&SyncIdentity) -> Result<PlayerIdentifier, ProviderError>;
/// Provider identifier from one raw caller-supplied credential
pub type CredentialParser = fn(&str) -> Result<PlayerIdentifier, ProviderError>;

/// Named provider: factory plus identity mapping
#[derive(Clone)]
pub struct ProviderBinding {
    name: String,
    factory: ProviderFactory,
    mapper: IdentityMapper,
    parser: Option<CredentialParser>,
}

impl ProviderBinding {
    pub fn new<F>(name: impl Into<String>, factory: F, mapper: IdentityMapper) -> Self
    where
        F: Fn() -> ProviderInstance + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            factory: Arc::new(factory),
            mapper,
            parser: None,
        }
    }

    /// Allow direct lookups by a bare credential (score read routes)
    pub fn with_credential_parser(mut self, parser: CredentialParser) -> Self {
        self.parser = Some(parser);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Fresh provider instance for one run
    pub fn instantiate(&self) -> ProviderInstance {
        (self.factory)()
    }

    pub fn map_identity(&self, identity: &SyncIdentity) -> Result<PlayerIdentifier, ProviderError> {
        (self.mapper)(identity)
    }

    pub fn identify(&self, credential: &str) -> Result<PlayerIdentifier, ProviderError> {
        let parser = self.parser.ok_or_else(|| {
            ProviderError::NotSupported(format!("{} cannot be queried by credential", self.name))
        })?;
        let credential = credential.trim();
        if credential.is_empty() {
            return Err(ProviderError::Unauthorized(format!("no {} credential supplied", self.name)));
        }
        parser(credential)
    }
}

impl fmt::Debug for ProviderBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderBinding").field("name", &self.name).finish()
    }
}

/// Identity mapper for the local store: the chain's own credential
pub fn map_local(identity: &SyncIdentity) -> Result<PlayerIdentifier, ProviderError> {
    Ok(PlayerIdentifier::Player(identity.player.clone()))
}

/// Friend code when numeric, otherwise a personal token
pub fn parse_lxns(credential: &str) -> Result<PlayerIdentifier, ProviderError> {
    Ok(match credential.parse::<u64>() {
        Ok(code) => PlayerIdentifier::FriendCode(code),
        Err(_) => PlayerIdentifier::PersonalToken(credential.to_string()),
    })
}

pub fn parse_username(credential: &str) -> Result<PlayerIdentifier, ProviderError> {
    Ok(PlayerIdentifier::Username(credential.to_string()))
}

pub fn parse_session(credential: &str) -> Result<PlayerIdentifier, ProviderError> {
    Ok(PlayerIdentifier::Credentials(credential.to_string()))
}

pub fn map_lxns(identity: &SyncIdentity) -> Result<PlayerIdentifier, ProviderError> {
    parse_lxns(identity.credential(LXNS)?.trim())
}

pub fn map_divingfish(identity: &SyncIdentity) -> Result<PlayerIdentifier, ProviderError> {
    parse_username(identity.credential(DIVINGFISH)?)
}

pub fn map_wechat(identity: &SyncIdentity) -> Result<PlayerIdentifier, ProviderError> {
    parse_session(identity.credential(WECHAT)?)
}

pub fn map_arcade(identity: &SyncIdentity) -> Result<PlayerIdentifier, ProviderError> {
    parse_session(identity.credential(ARCADE)?)
}

/// Provider names that are not registered
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown provider(s): {}", .0.join(", "))]
pub struct UnknownProviders(pub Vec<String>);

/// Provider bindings by name
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    bindings: BTreeMap<String, ProviderBinding>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Built-in providers: four upstream services plus the local store
    pub fn from_config(config: &ProvidersConfig, store: ScoreStore) -> otoge_common::Result<Self> {
        let timeout = Duration::from_secs(config.request_timeout_secs);
        let settings = |base_url: &Option<String>, developer_token: &Option<String>| UpstreamSettings {
            base_url: base_url.clone(),
            developer_token: developer_token.clone(),
            proxy: None,
            requests_per_second: config.requests_per_second,
            timeout,
        };

        let lxns = Arc::new(UpstreamClient::new(
            LXNS,
            settings(&config.lxns_base_url, &config.lxns_developer_token),
        )?);
        let divingfish = Arc::new(UpstreamClient::new(
            DIVINGFISH,
            settings(&config.divingfish_base_url, &config.divingfish_developer_token),
        )?);
        let wechat = Arc::new(UpstreamClient::new(
            WECHAT,
            settings(&config.wechat_base_url, &None),
        )?);
        let arcade = Arc::new(UpstreamClient::new(
            ARCADE,
            UpstreamSettings {
                proxy: config.arcade_proxy.clone(),
                ..settings(&config.arcade_base_url, &None)
            },
        )?);

        let mut registry = Self::new();
        registry.register(ProviderBinding::new(
            LXNS,
            move || ProviderInstance::both(Arc::new(HttpProvider::new(Arc::clone(&lxns)))),
            map_lxns,
        )
        .with_credential_parser(parse_lxns));
        registry.register(ProviderBinding::new(
            DIVINGFISH,
            move || ProviderInstance::both(Arc::new(HttpProvider::new(Arc::clone(&divingfish)))),
            map_divingfish,
        )
        .with_credential_parser(parse_username));
        registry.register(ProviderBinding::new(
            WECHAT,
            move || ProviderInstance::fetch_only(Arc::new(HttpProvider::new(Arc::clone(&wechat)))),
            map_wechat,
        )
        .with_credential_parser(parse_session));
        registry.register(ProviderBinding::new(
            ARCADE,
            move || ProviderInstance::fetch_only(Arc::new(HttpProvider::new(Arc::clone(&arcade)))),
            map_arcade,
        )
        .with_credential_parser(parse_session));
        registry.register(ProviderBinding::new(
            USAGICARD,
            move || ProviderInstance::both(Arc::new(LocalStoreProvider::new(store.clone()))),
            map_local,
        ));

        tracing::info!(providers = ?registry.names(), "Provider registry ready");
        Ok(registry)
    }

    /// Add or replace a binding
    pub fn register(&mut self, binding: ProviderBinding) {
        self.bindings.insert(binding.name().to_string(), binding);
    }

    pub fn get(&self, name: &str) -> Option<&ProviderBinding> {
        self.bindings.get(name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.bindings.keys().map(String::as_str).collect()
    }

    /// Bindings for `names` in the given order; fails listing every unknown name
    pub fn resolve(&self, names: &[String]) -> Result<Vec<ProviderBinding>, UnknownProviders> {
        let mut unknown = Vec::new();
        let mut bindings = Vec::with_capacity(names.len());
        for name in names {
            match self.bindings.get(name) {
                Some(binding) => bindings.push(binding.clone()),
                None => unknown.push(name.clone()),
            }
        }
        if unknown.is_empty() {
            Ok(bindings)
        } else {
            Err(UnknownProviders(unknown))
        }
    }
}
