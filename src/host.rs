//! Adapters to the environment the session manager runs in: navigation,
//! user confirmation and the optional out-of-page session mirror.

use crate::error::MirrorError;
use crate::session::Session;
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, info};

pub trait Navigator: Send + Sync {
    /// True when the current surface is the login page itself.
    fn on_login_surface(&self) -> bool;

    /// Navigate to login, replacing history so "back" cannot return.
    fn replace_with_login(&self);
}

#[async_trait]
pub trait Prompt: Send + Sync {
    /// Ask a yes/no question and wait for the answer.
    async fn confirm(&self, message: &str) -> bool;
}

#[async_trait]
pub trait SessionMirror: Send + Sync {
    async fn set_user_session(&self, session: &Session) -> Result<(), MirrorError>;
    async fn clear_user_session(&self) -> Result<(), MirrorError>;
}

/// Navigator that only records redirects. Used by the one-shot CLI and tests.
#[derive(Debug, Clone, Default)]
pub struct RecordingNavigator {
    login_surface: bool,
    redirects: Arc<AtomicUsize>,
}

impl RecordingNavigator {
    pub fn new(login_surface: bool) -> Self {
        Self {
            login_surface,
            redirects: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn redirects(&self) -> usize {
        self.redirects.load(Ordering::SeqCst)
    }
}

impl Navigator for RecordingNavigator {
    fn on_login_surface(&self) -> bool {
        self.login_surface
    }

    fn replace_with_login(&self) {
        self.redirects.fetch_add(1, Ordering::SeqCst);
        info!("Redirecting to login");
    }
}

/// Answers every prompt with a fixed value.
#[derive(Debug, Clone, Copy)]
pub struct AutoPrompt(pub bool);

#[async_trait]
impl Prompt for AutoPrompt {
    async fn confirm(&self, message: &str) -> bool {
        debug!(question = message, answer = self.0, "Auto-answered prompt");
        self.0
    }
}

/// Prompt answered later by someone else, e.g. an HTTP client.
#[derive(Debug, Clone, Default)]
pub struct RemotePrompt {
    pending: Arc<Mutex<Option<(String, oneshot::Sender<bool>)>>>,
}

impl RemotePrompt {
    pub fn new() -> Self {
        Self::default()
    }

    /// The question currently waiting for an answer, if any.
    pub fn pending(&self) -> Option<String> {
        let pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        pending
            .as_ref()
            .filter(|(_, tx)| !tx.is_closed())
            .map(|(message, _)| message.clone())
    }

    /// Deliver an answer. Returns false when nothing was waiting.
    pub fn answer(&self, yes: bool) -> bool {
        let waiting = self
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        match waiting {
            Some((_, tx)) => tx.send(yes).is_ok(),
            None => false,
        }
    }
}

#[async_trait]
impl Prompt for RemotePrompt {
    async fn confirm(&self, message: &str) -> bool {
        let (tx, rx) = oneshot::channel();
        *self.pending.lock().unwrap_or_else(PoisonError::into_inner) =
            Some((message.to_string(), tx));
        // A dropped sender means the question was superseded; treat as "no".
        rx.await.unwrap_or(false)
    }
}

/// No host process to mirror into.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoMirror;

#[async_trait]
impl SessionMirror for NoMirror {
    async fn set_user_session(&self, _session: &Session) -> Result<(), MirrorError> {
        Ok(())
    }

    async fn clear_user_session(&self) -> Result<(), MirrorError> {
        Ok(())
    }
}

const MIRROR_TIMEOUT: Duration = Duration::from_secs(5);

/// Mirrors the session into a host process over HTTP.
#[derive(Debug, Clone)]
pub struct HttpMirror {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpMirror {
    pub fn new(base_url: &str) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(MIRROR_TIMEOUT)
                .build()
                .unwrap_or_default(),
            endpoint: format!("{}/session", base_url.trim_end_matches('/')),
        }
    }
}

#[async_trait]
impl SessionMirror for HttpMirror {
    async fn set_user_session(&self, session: &Session) -> Result<(), MirrorError> {
        let response = self.client.post(&self.endpoint).json(session).send().await?;
        if !response.status().is_success() {
            return Err(MirrorError::Rejected(response.status().as_u16()));
        }
        Ok(())
    }

    async fn clear_user_session(&self) -> Result<(), MirrorError> {
        let response = self.client.delete(&self.endpoint).send().await?;
        if !response.status().is_success() {
            return Err(MirrorError::Rejected(response.status().as_u16()));
        }
        Ok(())
    }
}
