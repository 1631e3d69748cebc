// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Verification key resolution and caching.
//!
//! ## Cache
//!
//! - Keyed by `(namespace, instance_id, key_id)`.
//! - A hit returns without I/O.
//! - Entries older than `max_age` are refreshed before use. A failed refresh
//!   surfaces the error; the stale key is never handed out.
//! - Each fetch replaces the cached set for its `(namespace, instance_id)`.
//!   A key dropped upstream is gone after the next refresh.
//! - An unknown key id refreshes the set, unless the set was refreshed less
//!   than `min_refresh_interval` ago. Then it is `KeyNotFound` without I/O.
//!
//! ## Single-flight
//!
//! At most one fetch per cache key is in flight. The first miss spawns the
//! fetch as a detached task and publishes its result on a `watch` channel;
//! concurrent misses subscribe to the same channel. Dropping a waiter does
//! not cancel the fetch. The resolver's shutdown token does, at the next
//! backoff boundary.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use jsonwebtoken::jwk::{AlgorithmParameters, Jwk, JwkSet, KeyAlgorithm};
use jsonwebtoken::{Algorithm, DecodingKey};
use tokio::sync::{watch, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::error::{KeyResolutionError, KeySourceError};
use crate::clock::{Clock, SystemClock};
use crate::retry::{RetryError, RetryPolicy};

/// Default maximum key age before a refresh is attempted (1 hour).
pub const DEFAULT_KEY_MAX_AGE: Duration = Duration::from_secs(3600);

/// Default minimum time between refreshes caused by unknown key ids.
pub const DEFAULT_MIN_REFRESH_INTERVAL: Duration = Duration::from_secs(10);

/// HTTP timeout for a single key fetch.
const FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// Which family of keys a token is signed with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyNamespace {
    /// Interactive session tokens
    Session,
    /// M2M, OAuth and API key tokens
    Machine,
    /// Handshake responses
    Handshake,
}

impl KeyNamespace {
    pub fn as_str(&self) -> &'static str {
        match self {
            KeyNamespace::Session => "session",
            KeyNamespace::Machine => "machine",
            KeyNamespace::Handshake => "handshake",
        }
    }
}

/// Upstream key distribution endpoint.
pub trait KeySource: Send + Sync {
    fn fetch_key_set<'a>(
        &'a self,
        namespace: KeyNamespace,
        instance_id: &'a str,
    ) -> BoxFuture<'a, Result<JwkSet, KeySourceError>>;
}

/// A resolved verification key.
#[derive(Clone)]
pub struct VerificationKey {
    pub instance_id: String,
    pub key_id: String,
    pub namespace: KeyNamespace,
    pub algorithm: Algorithm,
    pub decoding_key: DecodingKey,
    pub fetched_at: DateTime<Utc>,
}

impl std::fmt::Debug for VerificationKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VerificationKey")
            .field("instance_id", &self.instance_id)
            .field("key_id", &self.key_id)
            .field("namespace", &self.namespace)
            .field("algorithm", &self.algorithm)
            .field("fetched_at", &self.fetched_at)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    namespace: KeyNamespace,
    instance_id: String,
    key_id: String,
}

type FetchResult = Result<Arc<VerificationKey>, KeyResolutionError>;

#[derive(Default)]
struct KeyCache {
    keys: HashMap<CacheKey, Arc<VerificationKey>>,
    /// Last successful fetch per `(namespace, instance_id)`
    refreshed: HashMap<(KeyNamespace, String), DateTime<Utc>>,
}

enum Lookup {
    Hit(Arc<VerificationKey>),
    Refresh,
    Unknown,
}

/// Resolver tuning.
#[derive(Clone)]
pub struct KeyResolverConfig {
    pub max_age: Duration,
    /// Unknown key ids do not refresh a set younger than this.
    pub min_refresh_interval: Duration,
    pub retry: RetryPolicy,
    pub clock: Arc<dyn Clock>,
    /// Cancels in-flight fetches at their next backoff boundary.
    pub shutdown: CancellationToken,
}

impl Default for KeyResolverConfig {
    fn default() -> Self {
        Self {
            max_age: DEFAULT_KEY_MAX_AGE,
            min_refresh_interval: DEFAULT_MIN_REFRESH_INTERVAL,
            retry: RetryPolicy::default(),
            clock: Arc::new(SystemClock),
            shutdown: CancellationToken::new(),
        }
    }
}

struct Inner {
    source: Arc<dyn KeySource>,
    config: KeyResolverConfig,
    cache: RwLock<KeyCache>,
    inflight: Mutex<HashMap<CacheKey, watch::Receiver<Option<FetchResult>>>>,
}

/// Caching, coalescing key resolver.
///
/// Cheap to clone; clones share the cache.
#[derive(Clone)]
pub struct KeyResolver {
    inner: Arc<Inner>,
}

impl KeyResolver {
    pub fn new(source: Arc<dyn KeySource>, config: KeyResolverConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                source,
                config,
                cache: RwLock::new(KeyCache::default()),
                inflight: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Resolve a key, fetching on miss.
    ///
    /// A miss refreshes the whole set, so an unknown key id has already been
    /// looked up upstream when this returns `KeyNotFound`.
    ///
    /// `force_refresh` skips the cache and the refresh interval (it still
    /// joins a fetch already in flight for the same key).
    pub async fn resolve(
        &self,
        namespace: KeyNamespace,
        instance_id: &str,
        key_id: &str,
        force_refresh: bool,
    ) -> Result<Arc<VerificationKey>, KeyResolutionError> {
        let key = CacheKey {
            namespace,
            instance_id: instance_id.to_string(),
            key_id: key_id.to_string(),
        };

        if !force_refresh {
            match self.inner.lookup(&key).await {
                Lookup::Hit(hit) => {
                    debug!(namespace = namespace.as_str(), key_id, "Verification key cache hit");
                    return Ok(hit);
                }
                Lookup::Unknown => {
                    debug!(
                        namespace = namespace.as_str(),
                        key_id, "Unknown key id, key set refreshed recently"
                    );
                    return Err(KeyResolutionError::KeyNotFound {
                        key_id: key_id.to_string(),
                    });
                }
                Lookup::Refresh => {}
            }
        }

        let mut rx = self.join_or_spawn(key);
        let outcome = match rx.wait_for(Option::is_some).await {
            Ok(value) => value.clone(),
            Err(_) => None,
        };
        outcome.unwrap_or(Err(KeyResolutionError::Cancelled))
    }

    /// Fetch and cache a whole key set. Returns the number of usable keys.
    ///
    /// Not coalesced; meant for readiness checks and start-up.
    pub async fn warm(
        &self,
        namespace: KeyNamespace,
        instance_id: &str,
    ) -> Result<usize, KeyResolutionError> {
        self.inner
            .fetch_set(namespace, instance_id)
            .await
            .map(|keys| keys.len())
    }

    /// Whether any key of this namespace is cached and fresh.
    pub async fn has_fresh_keys(&self, namespace: KeyNamespace, instance_id: &str) -> bool {
        let now = self.inner.config.clock.now();
        let cache = self.inner.cache.read().await;
        cache.keys.iter().any(|(k, v)| {
            k.namespace == namespace
                && k.instance_id == instance_id
                && self.inner.is_fresh(v.fetched_at, now)
        })
    }

    /// Number of cached keys.
    pub async fn cached_len(&self) -> usize {
        self.inner.cache.read().await.keys.len()
    }

    fn join_or_spawn(&self, key: CacheKey) -> watch::Receiver<Option<FetchResult>> {
        let mut inflight = self.inner.lock_inflight();
        if let Some(rx) = inflight.get(&key) {
            debug!(
                namespace = key.namespace.as_str(),
                key_id = %key.key_id,
                "Joining in-flight key fetch"
            );
            return rx.clone();
        }

        let (tx, rx) = watch::channel(None);
        inflight.insert(key.clone(), rx.clone());
        drop(inflight);

        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            let result = inner.fetch_key(&key).await;
            inner.lock_inflight().remove(&key);
            let _ = tx.send(Some(result));
        });

        rx
    }
}

impl Inner {
    fn lock_inflight(&self) -> MutexGuard<'_, HashMap<CacheKey, watch::Receiver<Option<FetchResult>>>> {
        self.inflight.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn is_fresh(&self, fetched_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        within(fetched_at, now, self.config.max_age)
    }

    async fn lookup(&self, key: &CacheKey) -> Lookup {
        let now = self.config.clock.now();
        let cache = self.cache.read().await;
        match cache.keys.get(key) {
            Some(entry) if self.is_fresh(entry.fetched_at, now) => Lookup::Hit(Arc::clone(entry)),
            Some(_) => {
                debug!(key_id = %key.key_id, "Verification key past max age, refreshing");
                Lookup::Refresh
            }
            None => match cache
                .refreshed
                .get(&(key.namespace, key.instance_id.clone()))
            {
                Some(at) if within(*at, now, self.config.min_refresh_interval) => Lookup::Unknown,
                _ => Lookup::Refresh,
            },
        }
    }

    async fn fetch_key(&self, key: &CacheKey) -> FetchResult {
        let fetched = self.fetch_set(key.namespace, &key.instance_id).await?;

        fetched
            .into_iter()
            .find(|candidate| candidate.key_id == key.key_id)
            .ok_or_else(|| {
                warn!(
                    namespace = key.namespace.as_str(),
                    key_id = %key.key_id,
                    "Key id not present in fetched key set"
                );
                KeyResolutionError::KeyNotFound {
                    key_id: key.key_id.clone(),
                }
            })
    }

    async fn fetch_set(
        &self,
        namespace: KeyNamespace,
        instance_id: &str,
    ) -> Result<Vec<Arc<VerificationKey>>, KeyResolutionError> {
        info!(
            namespace = namespace.as_str(),
            instance_id, "Fetching verification key set"
        );

        let jwks = self
            .config
            .retry
            .run(&self.config.shutdown, |_| {
                self.source.fetch_key_set(namespace, instance_id)
            })
            .await
            .map_err(|err| match err {
                RetryError::Exhausted { error, attempts } => KeyResolutionError::Unavailable {
                    attempts,
                    message: error.to_string(),
                },
                RetryError::Cancelled { .. } => KeyResolutionError::Cancelled,
            })?;

        let fetched_at = self.config.clock.now();
        let mut fresh = Vec::with_capacity(jwks.keys.len());
        for jwk in &jwks.keys {
            let Some(key_id) = jwk.common.key_id.clone() else {
                continue;
            };
            match jwk_to_decoding_key(jwk) {
                Ok((decoding_key, algorithm)) => fresh.push(Arc::new(VerificationKey {
                    instance_id: instance_id.to_string(),
                    key_id,
                    namespace,
                    algorithm,
                    decoding_key,
                    fetched_at,
                })),
                Err(e) => warn!(key_id = %key_id, error = %e, "Skipping unusable JWK"),
            }
        }

        let mut cache = self.cache.write().await;
        cache
            .keys
            .retain(|k, _| !(k.namespace == namespace && k.instance_id == instance_id));
        for key in &fresh {
            cache.keys.insert(
                CacheKey {
                    namespace,
                    instance_id: key.instance_id.clone(),
                    key_id: key.key_id.clone(),
                },
                Arc::clone(key),
            );
        }
        cache
            .refreshed
            .insert((namespace, instance_id.to_string()), fetched_at);
        Ok(fresh)
    }
}

/// Whether `since` is no more than `limit` before `now`.
fn within(since: DateTime<Utc>, now: DateTime<Utc>, limit: Duration) -> bool {
    now.signed_duration_since(since)
        .to_std()
        .map(|age| age <= limit)
        .unwrap_or(true)
}

/// Convert a JWK to a DecodingKey.
fn jwk_to_decoding_key(jwk: &Jwk) -> Result<(DecodingKey, Algorithm), KeySourceError> {
    let decoding_key =
        DecodingKey::from_jwk(jwk).map_err(|e| KeySourceError::Decode(e.to_string()))?;

    let algorithm = match jwk.common.key_algorithm {
        Some(alg) => key_algorithm(alg)?,
        None => match &jwk.algorithm {
            AlgorithmParameters::RSA(_) => Algorithm::RS256,
            AlgorithmParameters::EllipticCurve(_) => Algorithm::ES256,
            AlgorithmParameters::OctetKey(_) => Algorithm::HS256,
            _ => Algorithm::EdDSA,
        },
    };

    Ok((decoding_key, algorithm))
}

fn key_algorithm(alg: KeyAlgorithm) -> Result<Algorithm, KeySourceError> {
    Ok(match alg {
        KeyAlgorithm::HS256 => Algorithm::HS256,
        KeyAlgorithm::HS384 => Algorithm::HS384,
        KeyAlgorithm::HS512 => Algorithm::HS512,
        KeyAlgorithm::ES256 => Algorithm::ES256,
        KeyAlgorithm::ES384 => Algorithm::ES384,
        KeyAlgorithm::RS256 => Algorithm::RS256,
        KeyAlgorithm::RS384 => Algorithm::RS384,
        KeyAlgorithm::RS512 => Algorithm::RS512,
        KeyAlgorithm::PS256 => Algorithm::PS256,
        KeyAlgorithm::PS384 => Algorithm::PS384,
        KeyAlgorithm::PS512 => Algorithm::PS512,
        KeyAlgorithm::EdDSA => Algorithm::EdDSA,
        other => {
            return Err(KeySourceError::Decode(format!(
                "unsupported signing algorithm {other:?}"
            )))
        }
    })
}

/// JWKS fetched from the backend API over HTTPS.
///
/// Each namespace has its own URL; any of them may contain an
/// `{instance_id}` placeholder. When the handshake URL equals the session
/// URL, any session signing key also verifies handshake responses.
pub struct HttpKeySource {
    client: reqwest::Client,
    session_url: String,
    machine_url: String,
    handshake_url: String,
    secret_key: Option<String>,
}

impl HttpKeySource {
    pub fn new(
        session_url: impl Into<String>,
        machine_url: impl Into<String>,
        handshake_url: impl Into<String>,
        secret_key: Option<String>,
    ) -> Result<Self, reqwest::Error> {
        Ok(Self {
            client: reqwest::Client::builder().timeout(FETCH_TIMEOUT).build()?,
            session_url: session_url.into(),
            machine_url: machine_url.into(),
            handshake_url: handshake_url.into(),
            secret_key,
        })
    }

    fn url_for(&self, namespace: KeyNamespace, instance_id: &str) -> String {
        let template = match namespace {
            KeyNamespace::Session => &self.session_url,
            KeyNamespace::Machine => &self.machine_url,
            KeyNamespace::Handshake => &self.handshake_url,
        };
        template.replace("{instance_id}", instance_id)
    }

    async fn fetch(&self, url: String) -> Result<JwkSet, KeySourceError> {
        let mut request = self.client.get(&url);
        if let Some(secret) = &self.secret_key {
            request = request.bearer_auth(secret);
        }

        let response = request
            .send()
            .await
            .map_err(|e| KeySourceError::Network(e.to_string()))?;

        if !response.status().is_success() {
            return Err(KeySourceError::Status(response.status().as_u16()));
        }

        response
            .json::<JwkSet>()
            .await
            .map_err(|e| KeySourceError::Decode(e.to_string()))
    }
}

impl KeySource for HttpKeySource {
    fn fetch_key_set<'a>(
        &'a self,
        namespace: KeyNamespace,
        instance_id: &'a str,
    ) -> BoxFuture<'a, Result<JwkSet, KeySourceError>> {
        Box::pin(self.fetch(self.url_for(namespace, instance_id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::testing::{oct_jwk, CountingKeySource, INSTANCE_ID};
    use crate::clock::ManualClock;
    use crate::retry::NoDelay;
    use futures::future::join_all;

    fn resolver_with(source: Arc<CountingKeySource>, clock: Arc<ManualClock>) -> KeyResolver {
        KeyResolver::new(
            source,
            KeyResolverConfig {
                max_age: Duration::from_secs(60),
                min_refresh_interval: Duration::from_secs(10),
                retry: RetryPolicy::new(3, Duration::from_millis(1)).with_delay(Arc::new(NoDelay)),
                clock,
                shutdown: CancellationToken::new(),
            },
        )
    }

    fn resolver(source: Arc<CountingKeySource>) -> KeyResolver {
        resolver_with(source, Arc::new(ManualClock::at(1_700_000_000)))
    }

    #[tokio::test]
    async fn second_resolve_is_served_from_cache() {
        let source = Arc::new(CountingKeySource::with_keys(vec![oct_jwk("k1", b"secret")]));
        let resolver = resolver(source.clone());

        let first = resolver
            .resolve(KeyNamespace::Session, INSTANCE_ID, "k1", false)
            .await
            .unwrap();
        let second = resolver
            .resolve(KeyNamespace::Session, INSTANCE_ID, "k1", false)
            .await
            .unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(source.fetches(), 1);
    }

    #[tokio::test]
    async fn namespaces_do_not_share_entries() {
        let source = Arc::new(CountingKeySource::with_keys(vec![oct_jwk("k1", b"secret")]));
        let resolver = resolver(source.clone());

        resolver
            .resolve(KeyNamespace::Session, INSTANCE_ID, "k1", false)
            .await
            .unwrap();
        resolver
            .resolve(KeyNamespace::Machine, INSTANCE_ID, "k1", false)
            .await
            .unwrap();

        assert_eq!(source.fetches(), 2);
    }

    #[tokio::test]
    async fn concurrent_misses_share_one_fetch() {
        let source = Arc::new(
            CountingKeySource::with_keys(vec![oct_jwk("k1", b"secret")])
                .with_latency(Duration::from_millis(50)),
        );
        let resolver = resolver(source.clone());

        let results = join_all((0..16).map(|_| {
            resolver.resolve(KeyNamespace::Session, INSTANCE_ID, "k1", false)
        }))
        .await;

        assert_eq!(source.fetches(), 1);
        let first = results[0].as_ref().unwrap();
        for result in &results {
            assert!(Arc::ptr_eq(first, result.as_ref().unwrap()));
        }
    }

    #[tokio::test]
    async fn concurrent_misses_share_one_error() {
        let source = Arc::new(
            CountingKeySource::failing(KeySourceError::Status(401))
                .with_latency(Duration::from_millis(50)),
        );
        let resolver = resolver(source.clone());

        let results = join_all((0..8).map(|_| {
            resolver.resolve(KeyNamespace::Session, INSTANCE_ID, "k1", false)
        }))
        .await;

        assert_eq!(source.fetches(), 1);
        for result in results {
            assert_eq!(
                result.unwrap_err(),
                KeyResolutionError::Unavailable {
                    attempts: 1,
                    message: "HTTP 401 from key endpoint".into()
                }
            );
        }
    }

    #[tokio::test]
    async fn transient_failures_are_retried_then_surfaced() {
        let source = Arc::new(CountingKeySource::failing(KeySourceError::Status(503)));
        let resolver = resolver(source.clone());

        let err = resolver
            .resolve(KeyNamespace::Session, INSTANCE_ID, "k1", false)
            .await
            .unwrap_err();

        assert!(matches!(err, KeyResolutionError::Unavailable { attempts: 3, .. }));
        assert_eq!(source.fetches(), 3);
    }

    #[tokio::test]
    async fn unknown_key_id_is_key_not_found() {
        let source = Arc::new(CountingKeySource::with_keys(vec![oct_jwk("k1", b"secret")]));
        let resolver = resolver(source.clone());

        let err = resolver
            .resolve(KeyNamespace::Session, INSTANCE_ID, "k2", false)
            .await
            .unwrap_err();
        assert_eq!(err, KeyResolutionError::KeyNotFound { key_id: "k2".into() });

        // the sibling key was cached by the same fetch
        resolver
            .resolve(KeyNamespace::Session, INSTANCE_ID, "k1", false)
            .await
            .unwrap();
        assert_eq!(source.fetches(), 1);
    }

    #[tokio::test]
    async fn force_refresh_bypasses_cache() {
        let source = Arc::new(CountingKeySource::with_keys(vec![oct_jwk("k1", b"secret")]));
        let resolver = resolver(source.clone());

        resolver
            .resolve(KeyNamespace::Session, INSTANCE_ID, "k1", false)
            .await
            .unwrap();
        source.set_keys(vec![oct_jwk("k1", b"secret"), oct_jwk("k2", b"rotated")]);
        resolver
            .resolve(KeyNamespace::Session, INSTANCE_ID, "k2", true)
            .await
            .unwrap();

        assert_eq!(source.fetches(), 2);
    }

    #[tokio::test]
    async fn keys_past_max_age_are_refreshed() {
        let source = Arc::new(CountingKeySource::with_keys(vec![oct_jwk("k1", b"secret")]));
        let clock = Arc::new(ManualClock::at(1_700_000_000));
        let resolver = resolver_with(source.clone(), clock.clone());

        resolver
            .resolve(KeyNamespace::Session, INSTANCE_ID, "k1", false)
            .await
            .unwrap();
        clock.advance(Duration::from_secs(61));
        assert!(!resolver.has_fresh_keys(KeyNamespace::Session, INSTANCE_ID).await);

        resolver
            .resolve(KeyNamespace::Session, INSTANCE_ID, "k1", false)
            .await
            .unwrap();
        assert_eq!(source.fetches(), 2);
    }

    #[tokio::test]
    async fn stale_key_is_not_used_when_refresh_fails() {
        let source = Arc::new(CountingKeySource::with_keys(vec![oct_jwk("k1", b"secret")]));
        let clock = Arc::new(ManualClock::at(1_700_000_000));
        let resolver = resolver_with(source.clone(), clock.clone());

        resolver
            .resolve(KeyNamespace::Session, INSTANCE_ID, "k1", false)
            .await
            .unwrap();
        clock.advance(Duration::from_secs(61));
        source.fail_with(KeySourceError::Status(500));

        let err = resolver
            .resolve(KeyNamespace::Session, INSTANCE_ID, "k1", false)
            .await
            .unwrap_err();
        assert!(matches!(err, KeyResolutionError::Unavailable { .. }));
    }

    #[tokio::test]
    async fn key_removed_upstream_is_dropped_on_refresh() {
        let source = Arc::new(CountingKeySource::with_keys(vec![oct_jwk("k1", b"one")]));
        let clock = Arc::new(ManualClock::at(1_700_000_000));
        let resolver = resolver_with(source.clone(), clock.clone());

        resolver
            .resolve(KeyNamespace::Session, INSTANCE_ID, "k1", false)
            .await
            .unwrap();
        source.set_keys(vec![oct_jwk("k2", b"two")]);
        clock.advance(Duration::from_secs(61));

        for _ in 0..3 {
            let err = resolver
                .resolve(KeyNamespace::Session, INSTANCE_ID, "k1", false)
                .await
                .unwrap_err();
            assert_eq!(err, KeyResolutionError::KeyNotFound { key_id: "k1".into() });
        }
        let k2 = resolver
            .resolve(KeyNamespace::Session, INSTANCE_ID, "k2", false)
            .await
            .unwrap();

        assert_eq!(k2.key_id, "k2");
        assert_eq!(resolver.cached_len().await, 1);
        assert_eq!(source.fetches(), 2);
    }

    #[tokio::test]
    async fn unknown_key_ids_wait_for_refresh_interval() {
        let source = Arc::new(CountingKeySource::with_keys(vec![oct_jwk("k1", b"secret")]));
        let clock = Arc::new(ManualClock::at(1_700_000_000));
        let resolver = resolver_with(source.clone(), clock.clone());

        resolver
            .resolve(KeyNamespace::Session, INSTANCE_ID, "k1", false)
            .await
            .unwrap();
        for kid in ["junk1", "junk2", "junk3"] {
            let err = resolver
                .resolve(KeyNamespace::Session, INSTANCE_ID, kid, false)
                .await
                .unwrap_err();
            assert!(matches!(err, KeyResolutionError::KeyNotFound { .. }));
        }
        assert_eq!(source.fetches(), 1);

        clock.advance(Duration::from_secs(11));
        source.set_keys(vec![oct_jwk("k1", b"secret"), oct_jwk("k2", b"rotated")]);
        resolver
            .resolve(KeyNamespace::Session, INSTANCE_ID, "k2", false)
            .await
            .unwrap();
        assert_eq!(source.fetches(), 2);
    }

    #[tokio::test]
    async fn warm_caches_whole_set() {
        let source = Arc::new(CountingKeySource::with_keys(vec![
            oct_jwk("k1", b"one"),
            oct_jwk("k2", b"two"),
        ]));
        let resolver = resolver(source.clone());

        assert_eq!(resolver.warm(KeyNamespace::Session, INSTANCE_ID).await, Ok(2));
        assert!(resolver.has_fresh_keys(KeyNamespace::Session, INSTANCE_ID).await);
        assert_eq!(resolver.cached_len().await, 2);
    }

    #[test]
    fn jwk_without_alg_defaults_by_key_type() {
        let jwk: Jwk = serde_json::from_value(serde_json::json!({
            "kty": "oct",
            "kid": "k1",
            "k": "c2VjcmV0"
        }))
        .unwrap();
        let (_, alg) = jwk_to_decoding_key(&jwk).unwrap();
        assert_eq!(alg, Algorithm::HS256);
    }

    #[test]
    fn http_source_substitutes_instance_id() {
        let source = HttpKeySource::new(
            "https://api.example.com/v1/instances/{instance_id}/jwks",
            "https://api.example.com/v1/jwks?kind=machine",
            "https://api.example.com/v1/instances/{instance_id}/jwks?kind=handshake",
            None,
        )
        .unwrap();
        assert_eq!(
            source.url_for(KeyNamespace::Session, "ins_1"),
            "https://api.example.com/v1/instances/ins_1/jwks"
        );
        assert_eq!(
            source.url_for(KeyNamespace::Handshake, "ins_1"),
            "https://api.example.com/v1/instances/ins_1/jwks?kind=handshake"
        );
        assert_eq!(
            source.url_for(KeyNamespace::Machine, "ins_1"),
            "https://api.example.com/v1/jwks?kind=machine"
        );
    }
}
