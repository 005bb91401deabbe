//! Proxy session management and rotation policy.
//!
//! The [`SessionRotator`] owns the current [`SessionIdentity`]. Every fetch
//! attempt calls [`SessionRotator::acquire`], which applies the session-type
//! policy first:
//!
//! - `const`: the identity is kept until a forced rotation.
//! - `sticky`: the identity is replaced once it reaches `session_duration`.
//! - `rotate`: a fresh identity for every attempt.
//!
//! Blocks trigger [`SessionRotator::force_rotate`], which ignores failures
//! reported against an identity that was already replaced and enforces a
//! minimum spacing between forced rotations. The state is written to the
//! session-state file after every change.

pub mod identity;
pub mod state;

use std::ops::RangeInclusive;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use rand::distributions::Alphanumeric;
use rand::Rng;
use tokio::sync::Mutex;

use crate::config::{ProxyConfig, ResolverConfig, RotationMethod, SessionType};
pub use identity::{ProxyAddress, SessionIdentity};
pub use state::PersistedSession;

/// Why an identity is being replaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RotationReason {
    /// No identity yet (first use, or the persisted one no longer fits the config).
    Initial,
    /// Sticky lifetime reached.
    TtlExpired,
    /// `rotate` session type: one identity per attempt.
    PerRequest,
    /// The site blocked the current identity.
    ForcedFailure,
}

/// Result of a forced rotation request.
#[derive(Debug, Clone, PartialEq)]
pub enum ForcedRotation {
    Rotated(SessionIdentity),
    /// The reported identity was already replaced by someone else.
    Stale,
    /// The previous forced rotation happened less than the minimum spacing ago.
    TooSoon,
}

pub struct SessionRotator {
    proxy: ProxyConfig,
    method: RotationMethod,
    session_type: SessionType,
    session_duration_secs: u64,
    session_id_length: usize,
    ports: RangeInclusive<u16>,
    min_rotation_spacing: chrono::Duration,
    state_path: PathBuf,
    state: Mutex<PersistedSession>,
}

impl SessionRotator {
    /// Build a rotator when a proxy is configured, restoring persisted state.
    pub fn from_config(config: &ResolverConfig) -> Option<Self> {
        let proxy = config.proxy.clone()?;
        let spacing = chrono::Duration::from_std(config.min_rotation_spacing())
            .unwrap_or_else(|_| chrono::Duration::zero());

        let mut rotator = Self {
            proxy,
            method: config.proxy_rotation_method,
            session_type: config.session_type,
            session_duration_secs: config.session_duration,
            session_id_length: config.session_id_length,
            ports: config.port_range_start..=config.port_range_end,
            min_rotation_spacing: spacing,
            state_path: config.session_state_file.clone(),
            state: Mutex::new(PersistedSession::default()),
        };

        let mut restored = state::load(&rotator.state_path);
        if let Some(identity) = &restored.identity {
            if rotator.fits(identity) {
                tracing::info!(
                    "restored proxy session {}:{} (generation {})",
                    identity.proxy_host,
                    identity.proxy_port,
                    identity.generation
                );
            } else {
                tracing::info!("persisted proxy session does not match configuration, discarding");
                restored.identity = None;
            }
        }
        rotator.state = Mutex::new(restored);

        Some(rotator)
    }

    /// Identity to use for the next attempt, after applying the session policy.
    pub async fn acquire(&self) -> SessionIdentity {
        self.acquire_at(Utc::now()).await
    }

    pub(crate) async fn acquire_at(&self, now: DateTime<Utc>) -> SessionIdentity {
        let mut state = self.state.lock().await;

        let reason = match &state.identity {
            None => Some(RotationReason::Initial),
            Some(identity) => match self.session_type {
                SessionType::Const => None,
                SessionType::Sticky if identity.is_expired_at(now) => {
                    Some(RotationReason::TtlExpired)
                }
                SessionType::Sticky => None,
                SessionType::Rotate => Some(RotationReason::PerRequest),
            },
        };

        match (reason, state.identity.clone()) {
            (None, Some(identity)) => identity,
            (reason, _) => {
                let identity =
                    self.replace(&mut state, reason.unwrap_or(RotationReason::Initial), now);
                self.persist(&state);
                identity
            }
        }
    }

    /// Current identity without applying the policy.
    pub async fn current(&self) -> Option<SessionIdentity> {
        self.state.lock().await.identity.clone()
    }

    /// Rotate for `reason` when the session policy allows it.
    ///
    /// Under `const`, and under `sticky` before the lifetime ends, only a
    /// forced failure rotates. Forced failures are subject to the minimum
    /// spacing. When the rotation is declined the current identity is
    /// returned unchanged.
    pub async fn rotate(&self, reason: RotationReason) -> SessionIdentity {
        self.rotate_at(reason, Utc::now()).await
    }

    pub(crate) async fn rotate_at(
        &self,
        reason: RotationReason,
        now: DateTime<Utc>,
    ) -> SessionIdentity {
        let mut state = self.state.lock().await;

        let Some(current) = state.identity.clone() else {
            let identity = self.replace(&mut state, RotationReason::Initial, now);
            self.persist(&state);
            return identity;
        };

        let allowed = match reason {
            RotationReason::Initial => false,
            RotationReason::ForcedFailure => self.spacing_allows(&state, now),
            RotationReason::TtlExpired | RotationReason::PerRequest => match self.session_type {
                SessionType::Const => false,
                SessionType::Sticky => current.is_expired_at(now),
                SessionType::Rotate => true,
            },
        };
        if !allowed {
            tracing::debug!(
                "rotation ({reason:?}) declined under {:?} session",
                self.session_type
            );
            return current;
        }

        if reason == RotationReason::ForcedFailure {
            self.block_current_port(&mut state);
            state.last_forced_rotation_at = Some(now);
        }
        let identity = self.replace(&mut state, reason, now);
        self.persist(&state);
        identity
    }

    /// Rotate away from a blocked identity.
    ///
    /// `observed_generation` is the generation of the identity the failing
    /// attempt used.
    pub async fn force_rotate(&self, observed_generation: u64) -> ForcedRotation {
        self.force_rotate_at(observed_generation, Utc::now()).await
    }

    pub(crate) async fn force_rotate_at(
        &self,
        observed_generation: u64,
        now: DateTime<Utc>,
    ) -> ForcedRotation {
        let mut state = self.state.lock().await;

        let current_generation = state.identity.as_ref().map(|i| i.generation);
        if current_generation != Some(observed_generation) {
            tracing::debug!(
                "skipping rotation for stale generation {observed_generation} (current {:?})",
                current_generation
            );
            return ForcedRotation::Stale;
        }

        if !self.spacing_allows(&state, now) {
            return ForcedRotation::TooSoon;
        }

        self.block_current_port(&mut state);
        state.last_forced_rotation_at = Some(now);
        let identity = self.replace(&mut state, RotationReason::ForcedFailure, now);
        self.persist(&state);
        ForcedRotation::Rotated(identity)
    }

    /// Count a successful fetch.
    pub async fn record_success(&self) {
        let mut state = self.state.lock().await;
        state.request_count += 1;
        state.last_success_at = Some(Utc::now());
        self.persist(&state);
    }

    /// Snapshot of the persisted state.
    pub async fn snapshot(&self) -> PersistedSession {
        self.state.lock().await.clone()
    }

    /// Flush state to disk.
    pub async fn save(&self) -> anyhow::Result<()> {
        let state = self.state.lock().await;
        state::save(&self.state_path, &state)
    }

    /// Proxy server URL and credentials for `identity`.
    pub fn build_proxy_address(&self, identity: &SessionIdentity) -> ProxyAddress {
        identity.proxy_address()
    }

    fn replace(
        &self,
        state: &mut PersistedSession,
        reason: RotationReason,
        now: DateTime<Utc>,
    ) -> SessionIdentity {
        let previous = state.identity.as_ref();
        let generation = previous.map(|i| i.generation + 1).unwrap_or(1);

        let (port, username) = match self.method {
            RotationMethod::Port => {
                let port = self.next_port(previous.map(|i| i.proxy_port), &mut state.blocked_ports);
                (port, self.proxy.username.clone())
            }
            RotationMethod::Username => (self.proxy.port, self.session_username()),
        };

        let identity = SessionIdentity {
            proxy_host: self.proxy.host.clone(),
            proxy_port: port,
            auth_username: username,
            auth_password: self.proxy.password.clone(),
            use_tls: self.proxy.use_tls,
            created_at: now,
            ttl_secs: (self.session_type == SessionType::Sticky)
                .then_some(self.session_duration_secs),
            rotation_method: self.method,
            session_type: self.session_type,
            generation,
        };

        tracing::info!(
            "proxy session rotated ({:?}): {}:{} as {} (generation {})",
            reason,
            identity.proxy_host,
            identity.proxy_port,
            identity.auth_username,
            identity.generation
        );

        state.identity = Some(identity.clone());
        identity
    }

    /// Next unblocked port after `previous`, wrapping at the end of the range.
    fn next_port(&self, previous: Option<u16>, blocked: &mut Vec<u16>) -> u16 {
        let (start, end) = (*self.ports.start(), *self.ports.end());
        let span = usize::from(end - start) + 1;

        if self.ports.clone().all(|p| blocked.contains(&p)) {
            tracing::warn!("all {span} proxy ports blocked, clearing block list");
            blocked.clear();
        }

        let advance = |port: u16| if port >= end || port < start { start } else { port + 1 };
        let mut candidate = match previous {
            Some(port) => advance(port),
            None => start,
        };
        for _ in 0..span {
            if !blocked.contains(&candidate) {
                break;
            }
            candidate = advance(candidate);
        }
        candidate
    }

    fn session_username(&self) -> String {
        let suffix: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(self.session_id_length)
            .map(char::from)
            .collect();
        format!("{}-session-{suffix}", self.proxy.username)
    }

    fn block_current_port(&self, state: &mut PersistedSession) {
        if self.method != RotationMethod::Port {
            return;
        }
        if let Some(port) = state.identity.as_ref().map(|i| i.proxy_port) {
            if !state.blocked_ports.contains(&port) {
                tracing::warn!("marking proxy port {port} as blocked");
                state.blocked_ports.push(port);
            }
        }
    }

    /// Whether enough time passed since the last forced rotation.
    fn spacing_allows(&self, state: &PersistedSession, now: DateTime<Utc>) -> bool {
        match state.last_forced_rotation_at {
            Some(last) if now.signed_duration_since(last) < self.min_rotation_spacing => {
                tracing::debug!("skipping forced rotation, last one was at {last}");
                false
            }
            _ => true,
        }
    }

    /// Whether a restored identity was built from the current configuration.
    fn fits(&self, identity: &SessionIdentity) -> bool {
        if identity.proxy_host != self.proxy.host
            || identity.rotation_method != self.method
            || identity.session_type != self.session_type
        {
            return false;
        }
        match self.method {
            RotationMethod::Port => {
                self.ports.contains(&identity.proxy_port)
                    && identity.auth_username == self.proxy.username
            }
            RotationMethod::Username => {
                identity.proxy_port == self.proxy.port
                    && identity
                        .auth_username
                        .starts_with(&format!("{}-session-", self.proxy.username))
            }
        }
    }

    fn persist(&self, state: &PersistedSession) {
        if let Err(e) = state::save(&self.state_path, state) {
            tracing::warn!("failed to persist session state: {e:#}");
        }
    }
}
