//! Collaborators injected into the engine.
//!
//! - [`ExternalService`]: clients reached through `<sraix>`.
//! - [`Persistence`]: storage for rules taught with `<learnf>`/`<unlearnf>`.
//! - [`FuzzyScorer`]: optional similarity fallback for that-patterns.
//!
//! Services and persistence are the only parts of a turn that may block.
//! Each call runs on its own thread and the turn stops waiting after the
//! configured timeout, so a hung client costs one turn its fallback text and nothing
//! else. A timed-out worker is detached, not killed.

use crate::{EngineError, Rule};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;
use thiserror::Error;

/// Optional parameters forwarded from `<sraix>` attributes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServiceParams {
    pub bot_id: Option<String>,
    pub host: Option<String>,
    pub hint: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ServiceError {
    #[error("no service registered under `{0}`")]
    NotRegistered(String),
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error("worker disconnected")]
    Disconnected,
    #[error("{0}")]
    Failed(String),
}

pub trait ExternalService: Send + Sync {
    /// Answer `content` on behalf of `service`. `timeout` is advisory; the
    /// registry enforces it regardless.
    fn invoke(&self, service: &str, content: &str, params: &ServiceParams, timeout: Duration)
    -> Result<String, ServiceError>;
}

pub trait Persistence: Send + Sync {
    fn append_rule(&self, rule: &Rule, source_tag: &str, timeout: Duration) -> Result<(), ServiceError>;
    fn remove_rule(&self, rule: &Rule, timeout: Duration) -> Result<(), ServiceError>;
}

pub trait FuzzyScorer: Send + Sync {
    /// Similarity of `utterance` to `that_pattern`, in `0.0..=1.0`.
    fn score(&self, that_pattern: &str, utterance: &str) -> f32;
}

/// Named `<sraix>` clients plus an optional catch-all.
#[derive(Clone, Default)]
pub struct ServiceRegistry {
    services: HashMap<String, Arc<dyn ExternalService>>,
    fallback: Option<Arc<dyn ExternalService>>,
}

impl fmt::Debug for ServiceRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&str> = self.services.keys().map(String::as_str).collect();
        names.sort_unstable();
        f.debug_struct("ServiceRegistry").field("services", &names).field("fallback", &self.fallback.is_some()).finish()
    }
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: &str, service: Arc<dyn ExternalService>) {
        self.services.insert(name.trim().to_lowercase(), service);
    }

    /// Client used for names with no dedicated registration.
    pub fn set_fallback(&mut self, service: Arc<dyn ExternalService>) {
        self.fallback = Some(service);
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty() && self.fallback.is_none()
    }

    fn resolve(&self, name: &str) -> Option<Arc<dyn ExternalService>> {
        self.services.get(&name.trim().to_lowercase()).or(self.fallback.as_ref()).cloned()
    }

    /// Invoke `service` on a worker thread, waiting at most `timeout`.
    pub fn call(
        &self,
        service: &str,
        content: &str,
        params: &ServiceParams,
        timeout: Duration,
    ) -> Result<String, EngineError> {
        let failed = |err: ServiceError| EngineError::ExternalService { service: service.to_string(), reason: err.to_string() };
        let client = self.resolve(service).ok_or_else(|| failed(ServiceError::NotRegistered(service.to_string())))?;

        let name = service.to_string();
        let content = content.to_string();
        let params = params.clone();
        on_worker(format!("sraix-{name}"), timeout, move || client.invoke(&name, &content, &params, timeout)).map_err(failed)
    }
}

/// Write a learned rule to `store` on a worker thread, waiting at most `timeout`.
pub(crate) fn persist_rule(
    store: &Arc<dyn Persistence>,
    rule: &Rule,
    source_tag: &str,
    timeout: Duration,
) -> Result<(), EngineError> {
    let store = Arc::clone(store);
    let rule = rule.clone();
    let source_tag = source_tag.to_string();
    on_worker("learnf".to_string(), timeout, move || store.append_rule(&rule, &source_tag, timeout))
        .map_err(|err| EngineError::Persistence(err.to_string()))
}

/// Remove a persisted rule from `store`, waiting at most `timeout`.
pub(crate) fn forget_rule(store: &Arc<dyn Persistence>, rule: &Rule, timeout: Duration) -> Result<(), EngineError> {
    let store = Arc::clone(store);
    let rule = rule.clone();
    on_worker("unlearnf".to_string(), timeout, move || store.remove_rule(&rule, timeout))
        .map_err(|err| EngineError::Persistence(err.to_string()))
}

/// Run `job` on a named thread and stop waiting after `timeout`.
fn on_worker<T, F>(name: String, timeout: Duration, job: F) -> Result<T, ServiceError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, ServiceError> + Send + 'static,
{
    let (tx, rx) = mpsc::channel();
    thread::Builder::new()
        .name(name)
        .spawn(move || {
            let _ = tx.send(job());
        })
        .map_err(|err| ServiceError::Failed(err.to_string()))?;

    match rx.recv_timeout(timeout) {
        Ok(result) => result,
        Err(mpsc::RecvTimeoutError::Timeout) => Err(ServiceError::Timeout(timeout)),
        Err(mpsc::RecvTimeoutError::Disconnected) => Err(ServiceError::Disconnected),
    }
}
