//! Authentication session.
//!
//! Holds the bearer credential attached to every detection request. The
//! credential is fetched once at engine start and re-fetched lazily whenever a
//! caller finds it missing. There is no expiry timer.
//!
//! Concurrent `acquire()` calls share a single in-flight token request: the
//! first caller performs it, later callers block until it settles and receive
//! the same outcome.

use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::AuthError;
use crate::events::{EngineEvent, EventBus};
use crate::lock;

/// Opaque bearer token. Zeroized on drop; `Debug` never prints it.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct AuthCredential {
    token: String,
}

impl AuthCredential {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }

    /// Token value, for placing in a request header.
    pub fn expose(&self) -> &str {
        &self.token
    }
}

impl std::fmt::Debug for AuthCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("AuthCredential(<redacted>)")
    }
}

/// Source of credentials.
pub trait TokenEndpoint: Send + Sync {
    fn fetch_token(&self) -> Result<AuthCredential, AuthError>;
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(default)]
    token: Option<String>,
}

/// Token endpoint reached with `GET`; expects `{"token": "..."}`.
pub struct HttpTokenEndpoint {
    url: String,
    agent: ureq::Agent,
}

impl HttpTokenEndpoint {
    pub fn new(url: impl Into<String>, timeout: Option<Duration>) -> Self {
        let mut builder = ureq::AgentBuilder::new();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        Self {
            url: url.into(),
            agent: builder.build(),
        }
    }
}

impl TokenEndpoint for HttpTokenEndpoint {
    fn fetch_token(&self) -> Result<AuthCredential, AuthError> {
        let response = self.agent.get(&self.url).call().map_err(|e| match e {
            ureq::Error::Status(status, resp) => {
                let body = resp.into_string().unwrap_or_default();
                log::error!("token endpoint answered {}: {}", status, body);
                AuthError::Rejected { status }
            }
            ureq::Error::Transport(t) => AuthError::Transport(t.to_string()),
        })?;
        let parsed: TokenResponse = response
            .into_json()
            .map_err(|e| AuthError::MalformedResponse(e.to_string()))?;
        match parsed.token {
            Some(token) if !token.trim().is_empty() => Ok(AuthCredential::new(token)),
            _ => Err(AuthError::MalformedResponse(
                "token not found in response".to_string(),
            )),
        }
    }
}

/// Observable credential lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthStatus {
    Absent,
    Pending,
    Held,
}

enum AuthState {
    Absent,
    Pending,
    Held(AuthCredential),
}

struct AuthInner {
    state: AuthState,
    /// Incremented each time a token request settles.
    attempts: u64,
    last_outcome: Option<Result<AuthCredential, AuthError>>,
}

pub struct AuthSession {
    endpoint: Arc<dyn TokenEndpoint>,
    events: Arc<EventBus>,
    inner: Mutex<AuthInner>,
    settled: Condvar,
}

impl AuthSession {
    pub fn new(endpoint: Arc<dyn TokenEndpoint>, events: Arc<EventBus>) -> Self {
        Self {
            endpoint,
            events,
            inner: Mutex::new(AuthInner {
                state: AuthState::Absent,
                attempts: 0,
                last_outcome: None,
            }),
            settled: Condvar::new(),
        }
    }

    /// Obtain a credential, fetching one if none is held.
    ///
    /// Joins a pending request instead of issuing a second one.
    pub fn acquire(&self) -> Result<AuthCredential, AuthError> {
        let mut inner = lock(&self.inner);
        if let AuthState::Held(credential) = &inner.state {
            return Ok(credential.clone());
        }
        if matches!(inner.state, AuthState::Pending) {
            let attempt = inner.attempts;
            let inner = self
                .settled
                .wait_while(inner, |i| i.attempts == attempt)
                .unwrap_or_else(PoisonError::into_inner);
            return inner.last_outcome.clone().unwrap_or_else(|| {
                Err(AuthError::Transport("token request abandoned".to_string()))
            });
        }
        inner.state = AuthState::Pending;
        drop(inner);

        log::info!("requesting auth token");
        let outcome = self.endpoint.fetch_token();

        let mut inner = lock(&self.inner);
        inner.state = match &outcome {
            Ok(credential) => AuthState::Held(credential.clone()),
            Err(_) => AuthState::Absent,
        };
        inner.attempts += 1;
        inner.last_outcome = Some(outcome.clone());
        drop(inner);
        self.settled.notify_all();

        match &outcome {
            Ok(_) => {
                log::info!("auth token acquired");
                self.events.publish(EngineEvent::AuthReady);
            }
            Err(err) => {
                log::error!("auth token acquisition failed: {}", err);
                self.events.publish(EngineEvent::AuthFailed(err.clone()));
            }
        }
        outcome
    }

    /// Start a background acquisition unless one is pending or a credential
    /// is already held. Returns whether a request was started.
    pub fn spawn_acquire(self: &Arc<Self>) -> bool {
        if !matches!(lock(&self.inner).state, AuthState::Absent) {
            return false;
        }
        let session = self.clone();
        let spawned = std::thread::Builder::new()
            .name("auth-acquire".to_string())
            .spawn(move || {
                let _ = session.acquire();
            });
        match spawned {
            Ok(_) => true,
            Err(err) => {
                log::error!("failed to spawn auth acquisition: {}", err);
                false
            }
        }
    }

    pub fn current(&self) -> Option<AuthCredential> {
        match &lock(&self.inner).state {
            AuthState::Held(credential) => Some(credential.clone()),
            _ => None,
        }
    }

    pub fn status(&self) -> AuthStatus {
        match lock(&self.inner).state {
            AuthState::Absent => AuthStatus::Absent,
            AuthState::Pending => AuthStatus::Pending,
            AuthState::Held(_) => AuthStatus::Held,
        }
    }

    /// Drop the held credential after the service refused it.
    pub fn invalidate(&self) {
        let mut inner = lock(&self.inner);
        if matches!(inner.state, AuthState::Held(_)) {
            inner.state = AuthState::Absent;
            log::warn!("auth credential invalidated");
        }
    }
}
