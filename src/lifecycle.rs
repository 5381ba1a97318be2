//! Session lifecycle manager.
//!
//! One actor task owns the session record, the warning/expiry timer pair
//! and the activity subscription. Commands and timer shots are handled
//! strictly one at a time, so no state here is shared or locked.
//!
//! States: `NoSession -> Active -> WarningIssued -> Expired`, with
//! `LoggedOut` reachable from anywhere through an explicit logout and
//! `Disabled` when running on the login surface itself.

use crate::activity::InteractionKind;
use crate::config::{self, SessionConfig};
use crate::error::Stopped;
use crate::host::{Navigator, Prompt, SessionMirror};
use crate::session::{BackupSession, Clock, Role, Session};
use crate::store::{
    SessionStore, BACKUP_SESSION_KEY, LOGGING_OUT_KEY, SESSION_TIMEOUT_KEY, TIMEOUT_HOURS_KEY,
    USER_SESSION_KEY,
};
use crate::timer::Timer;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, info, warn};

const LOGOUT_QUESTION: &str = "Are you sure you want to logout?";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Disabled,
    NoSession,
    Active,
    WarningIssued,
    Expired,
    LoggedOut,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SessionNotice {
    Active { username: String },
    WarningIssued { username: String, expires_in_ms: u64 },
    Expired { username: Option<String> },
    LoggedOut { username: Option<String> },
    RedirectToLogin,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionStatus {
    pub state: SessionState,
    pub username: Option<String>,
    pub role: Option<Role>,
    pub display_name: Option<String>,
    pub idle_ms: Option<u64>,
    pub remaining_ms: Option<u64>,
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogoutMode {
    /// Ask the user first; a "no" leaves the session alone.
    Confirm,
    Immediate,
}

/// Collaborators the manager talks to.
#[derive(Clone)]
pub struct SessionDeps {
    pub store: Arc<dyn SessionStore>,
    pub navigator: Arc<dyn Navigator>,
    pub prompt: Arc<dyn Prompt>,
    pub mirror: Arc<dyn SessionMirror>,
}

enum Command {
    Check(oneshot::Sender<SessionState>),
    Login {
        username: String,
        role: Role,
        display_name: String,
        reply: oneshot::Sender<SessionState>,
    },
    Activity {
        kind: InteractionKind,
        reply: Option<oneshot::Sender<bool>>,
    },
    Logout {
        mode: LogoutMode,
        reply: oneshot::Sender<bool>,
    },
    Status(oneshot::Sender<SessionStatus>),
    Shutdown,
}

#[derive(Debug)]
enum TimerEvent {
    Warning(u64),
    Expiry(u64),
}

/// Cloneable handle to a running session manager.
#[derive(Clone)]
pub struct SessionHandle {
    commands: mpsc::UnboundedSender<Command>,
    notices: broadcast::Sender<SessionNotice>,
}

const STOPPED: Stopped = Stopped("session manager");

impl SessionHandle {
    pub fn subscribe(&self) -> broadcast::Receiver<SessionNotice> {
        self.notices.subscribe()
    }

    async fn request<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T, Stopped> {
        let (tx, rx) = oneshot::channel();
        self.commands.send(make(tx)).map_err(|_| STOPPED)?;
        rx.await.map_err(|_| STOPPED)
    }

    /// Validate (or rebuild) the stored session and arm the timers.
    pub async fn check_authentication(&self) -> Result<SessionState, Stopped> {
        self.request(Command::Check).await
    }

    /// Write a fresh session the way the login page does, then check it.
    pub async fn login(
        &self,
        username: &str,
        role: Role,
        display_name: &str,
    ) -> Result<SessionState, Stopped> {
        self.request(|reply| Command::Login {
            username: username.to_string(),
            role,
            display_name: display_name.to_string(),
            reply,
        })
        .await
    }

    /// Deliver an interaction and wait until it has been handled.
    /// Returns whether it counted as activity.
    pub async fn activity(&self, kind: InteractionKind) -> Result<bool, Stopped> {
        self.request(|reply| Command::Activity {
            kind,
            reply: Some(reply),
        })
        .await
    }

    /// Deliver an interaction without waiting.
    pub fn notify(&self, kind: InteractionKind) -> Result<(), Stopped> {
        self.commands
            .send(Command::Activity { kind, reply: None })
            .map_err(|_| STOPPED)
    }

    /// Returns false when the user declined a confirmed logout.
    pub async fn logout(&self, mode: LogoutMode) -> Result<bool, Stopped> {
        self.request(|reply| Command::Logout { mode, reply }).await
    }

    pub async fn status(&self) -> Result<SessionStatus, Stopped> {
        self.request(Command::Status).await
    }

    pub fn shutdown(&self) {
        let _ = self.commands.send(Command::Shutdown);
    }
}

pub struct SessionManager {
    config: SessionConfig,
    deps: SessionDeps,
    clock: Clock,
    state: SessionState,
    session: Option<Session>,
    warning: Timer,
    expiry: Timer,
    expires_at: Option<Instant>,
    listening: bool,
    promoted: bool,
    redirected: bool,
    notices: broadcast::Sender<SessionNotice>,
    timer_tx: mpsc::UnboundedSender<TimerEvent>,
}

impl SessionManager {
    /// Start the manager on the current runtime. It stays in `NoSession`
    /// until [`SessionHandle::check_authentication`] is called.
    pub fn spawn(config: SessionConfig, deps: SessionDeps, clock: Clock) -> SessionHandle {
        let (commands, command_rx) = mpsc::unbounded_channel();
        let (timer_tx, timer_rx) = mpsc::unbounded_channel();
        let (notices, _) = broadcast::channel(64);

        let manager = SessionManager {
            config,
            deps,
            clock,
            state: SessionState::NoSession,
            session: None,
            warning: Timer::new(),
            expiry: Timer::new(),
            expires_at: None,
            listening: false,
            promoted: false,
            redirected: false,
            notices: notices.clone(),
            timer_tx,
        };
        tokio::spawn(manager.run(command_rx, timer_rx));

        SessionHandle { commands, notices }
    }

    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut timers: mpsc::UnboundedReceiver<TimerEvent>,
    ) {
        loop {
            tokio::select! {
                biased;
                cmd = commands.recv() => match cmd {
                    Some(Command::Shutdown) | None => break,
                    Some(cmd) => self.handle(cmd).await,
                },
                Some(event) = timers.recv() => self.on_timer(event).await,
            }
        }
        self.cancel_timers();
        debug!("Session manager stopped");
    }

    async fn handle(&mut self, cmd: Command) {
        match cmd {
            Command::Check(reply) => {
                let state = self.check_authentication().await;
                let _ = reply.send(state);
            }
            Command::Login {
                username,
                role,
                display_name,
                reply,
            } => {
                let state = self.login(&username, role, &display_name).await;
                let _ = reply.send(state);
            }
            Command::Activity { kind, reply } => {
                let counted = self.record_activity(kind);
                if let Some(reply) = reply {
                    let _ = reply.send(counted);
                }
            }
            Command::Logout { mode, reply } => {
                let done = self.logout(mode).await;
                let _ = reply.send(done);
            }
            Command::Status(reply) => {
                let _ = reply.send(self.status());
            }
            Command::Shutdown => {}
        }
    }

    async fn on_timer(&mut self, event: TimerEvent) {
        match event {
            TimerEvent::Warning(generation) => {
                if self.warning.fire(generation) {
                    self.issue_warning().await;
                }
            }
            TimerEvent::Expiry(generation) => {
                if self.expiry.fire(generation) {
                    self.expire().await;
                }
            }
        }
    }

    async fn check_authentication(&mut self) -> SessionState {
        if self.deps.navigator.on_login_surface() {
            self.cancel_timers();
            self.listening = false;
            self.state = SessionState::Disabled;
            debug!("On login surface, session checks disabled");
            return self.state;
        }

        let now = self.clock.now();
        let timeout = self.timeout();
        match self.load_session(now) {
            Some(session) if session.is_valid(now, timeout) => self.activate(session).await,
            Some(session) if session.is_present() => {
                info!(username = %session.username, "Stored session already idle past timeout");
                self.session = Some(session);
                self.expire().await;
            }
            _ => {
                self.cancel_timers();
                self.listening = false;
                self.session = None;
                self.state = SessionState::LoggedOut;
                info!("No valid session, redirecting to login");
                self.redirect();
            }
        }
        self.state
    }

    async fn login(&mut self, username: &str, role: Role, display_name: &str) -> SessionState {
        let session = Session::new(username, role, display_name, self.clock.now());
        self.persist(&session);
        match serde_json::to_string(&session.backup()) {
            Ok(raw) => self.write_key(BACKUP_SESSION_KEY, &raw),
            Err(e) => warn!(error = %e, "Failed to encode backup session"),
        }
        self.remove_key(LOGGING_OUT_KEY);
        self.redirected = false;
        self.check_authentication().await
    }

    /// Read the primary record, falling back to promoting the backup once per load.
    fn load_session(&mut self, now: DateTime<Utc>) -> Option<Session> {
        match self.deps.store.get(USER_SESSION_KEY) {
            Ok(Some(raw)) => match serde_json::from_str::<Session>(&raw) {
                Ok(session) => return Some(session),
                Err(e) => {
                    warn!(error = %e, "Stored session is malformed, treating as absent");
                    self.remove_key(USER_SESSION_KEY);
                    return None;
                }
            },
            Ok(None) => {}
            Err(e) => {
                warn!(error = %e, "Failed to read stored session");
                return None;
            }
        }

        if self.promoted {
            return None;
        }
        let backup = match self.deps.store.get(BACKUP_SESSION_KEY) {
            Ok(Some(raw)) => match serde_json::from_str::<BackupSession>(&raw) {
                Ok(backup) => backup,
                Err(e) => {
                    warn!(error = %e, "Backup session is malformed");
                    return None;
                }
            },
            Ok(None) => return None,
            Err(e) => {
                warn!(error = %e, "Failed to read backup session");
                return None;
            }
        };
        let session = Session::promote(&backup, now)?;
        self.promoted = true;
        info!(username = %session.username, role = ?session.role, "Promoted backup session record");
        self.persist(&session);
        Some(session)
    }

    async fn activate(&mut self, mut session: Session) {
        session.last_activity = self.clock.now();
        self.persist(&session);
        self.listening = true;
        self.redirected = false;
        self.state = SessionState::Active;
        self.arm_timers();

        if let Err(e) = self.deps.mirror.set_user_session(&session).await {
            warn!(error = %e, "Failed to mirror session to host");
        }
        info!(username = %session.username, role = ?session.role, "Session active");
        self.publish(SessionNotice::Active {
            username: session.username.clone(),
        });
        self.session = Some(session);
    }

    fn record_activity(&mut self, kind: InteractionKind) -> bool {
        if !kind.is_activity() || !self.listening || self.session.is_none() {
            return false;
        }
        self.touch();
        true
    }

    /// Refresh `lastActivity`, re-arm both timers and fold a pending warning back to `Active`.
    fn touch(&mut self) {
        let now = self.clock.now();
        let Some(session) = self.session.as_mut() else {
            return;
        };
        session.last_activity = now;
        let session = session.clone();
        self.persist(&session);
        self.arm_timers();

        if self.state == SessionState::WarningIssued {
            self.state = SessionState::Active;
            self.publish(SessionNotice::Active {
                username: session.username,
            });
        }
    }

    async fn issue_warning(&mut self) {
        if self.state != SessionState::Active {
            return;
        }
        let username = self
            .session
            .as_ref()
            .map(|s| s.username.clone())
            .unwrap_or_default();
        let remaining = self
            .expires_at
            .map(|at| at.saturating_duration_since(Instant::now()))
            .unwrap_or(Duration::ZERO);

        self.state = SessionState::WarningIssued;
        info!(username = %username, remaining_ms = remaining.as_millis() as u64, "Session expiry warning");
        self.publish(SessionNotice::WarningIssued {
            username,
            expires_in_ms: remaining.as_millis() as u64,
        });

        let message = format!(
            "Your session will expire in {} minutes due to inactivity. Click OK to stay logged in.",
            remaining.as_secs().div_ceil(60)
        );
        let prompt = self.deps.prompt.clone();
        match tokio::time::timeout(remaining, prompt.confirm(&message)).await {
            Ok(_) => {
                debug!("Expiry warning acknowledged");
                self.touch();
            }
            Err(_) => self.expire().await,
        }
    }

    async fn expire(&mut self) {
        self.cancel_timers();
        self.listening = false;
        let username = self.session.take().map(|s| s.username);
        warn!(username = ?username, "Session expired due to inactivity");

        self.write_key(SESSION_TIMEOUT_KEY, "true");
        self.remove_key(USER_SESSION_KEY);
        self.remove_key(BACKUP_SESSION_KEY);
        if let Err(e) = self.deps.mirror.clear_user_session().await {
            warn!(error = %e, "Failed to clear mirrored session");
        }

        self.state = SessionState::Expired;
        self.publish(SessionNotice::Expired { username });
        self.redirect();
    }

    async fn logout(&mut self, mode: LogoutMode) -> bool {
        if mode == LogoutMode::Confirm && !self.deps.prompt.confirm(LOGOUT_QUESTION).await {
            info!("Logout cancelled by user");
            return false;
        }

        self.cancel_timers();
        self.listening = false;
        let username = self.session.take().map(|s| s.username);
        self.remove_key(USER_SESSION_KEY);
        self.remove_key(BACKUP_SESSION_KEY);
        if let Err(e) = self.deps.mirror.clear_user_session().await {
            warn!(error = %e, "Failed to clear mirrored session");
        }
        self.write_key(LOGGING_OUT_KEY, "true");

        self.state = SessionState::LoggedOut;
        info!(username = ?username, "Logged out");
        self.publish(SessionNotice::LoggedOut { username });
        // Logout always navigates, even after an earlier redirect.
        self.redirected = true;
        self.publish(SessionNotice::RedirectToLogin);
        self.deps.navigator.replace_with_login();
        true
    }

    fn status(&self) -> SessionStatus {
        let now = self.clock.now();
        let live = matches!(
            self.state,
            SessionState::Active | SessionState::WarningIssued
        );
        SessionStatus {
            state: self.state,
            username: self.session.as_ref().map(|s| s.username.clone()),
            role: self.session.as_ref().map(|s| s.role),
            display_name: self.session.as_ref().map(|s| s.display_name.clone()),
            idle_ms: self.session.as_ref().map(|s| s.idle(now).as_millis() as u64),
            remaining_ms: self
                .expires_at
                .filter(|_| live)
                .map(|at| at.saturating_duration_since(Instant::now()).as_millis() as u64),
            timeout_ms: self.timeout().as_millis() as u64,
        }
    }

    fn timeout(&self) -> Duration {
        effective_timeout(self.deps.store.as_ref(), &self.config)
    }

    fn arm_timers(&mut self) {
        let timeout = self.timeout();
        let lead = self.config.warning_lead().min(timeout / 6);
        self.warning
            .arm(timeout - lead, &self.timer_tx, TimerEvent::Warning);
        self.expiry.arm(timeout, &self.timer_tx, TimerEvent::Expiry);
        self.expires_at = Some(Instant::now() + timeout);
    }

    fn cancel_timers(&mut self) {
        self.warning.cancel();
        self.expiry.cancel();
        self.expires_at = None;
    }

    /// Navigate to login at most once until a session is established again.
    fn redirect(&mut self) {
        if self.redirected {
            return;
        }
        self.redirected = true;
        self.publish(SessionNotice::RedirectToLogin);
        self.deps.navigator.replace_with_login();
    }

    fn publish(&self, notice: SessionNotice) {
        let _ = self.notices.send(notice);
    }

    fn persist(&self, session: &Session) {
        match serde_json::to_string(session) {
            Ok(raw) => self.write_key(USER_SESSION_KEY, &raw),
            Err(e) => warn!(error = %e, "Failed to encode session"),
        }
    }

    fn write_key(&self, key: &str, value: &str) {
        if let Err(e) = self.deps.store.set(key, value) {
            warn!(key, error = %e, "Session store write failed");
        }
    }

    fn remove_key(&self, key: &str) {
        if let Err(e) = self.deps.store.remove(key) {
            warn!(key, error = %e, "Session store remove failed");
        }
    }
}

/// Effective timeout: the persisted hours override when valid, else configuration.
fn effective_timeout(store: &dyn SessionStore, config: &SessionConfig) -> Duration {
    match store.get(TIMEOUT_HOURS_KEY) {
        Ok(Some(raw)) => match raw.trim().parse::<f64>().ok().and_then(config::hours) {
            Some(timeout) => timeout,
            None => {
                warn!(value = %raw, "Ignoring invalid timeout override");
                config.timeout()
            }
        },
        Ok(None) => config.timeout(),
        Err(e) => {
            warn!(error = %e, "Failed to read timeout override");
            config.timeout()
        }
    }
}

/// Describe the stored session without touching the store: no heartbeat,
/// no backup promotion, no expiry flag.
pub fn inspect(store: &dyn SessionStore, config: &SessionConfig, now: DateTime<Utc>) -> SessionStatus {
    let timeout = effective_timeout(store, config);
    let session = match store.get(USER_SESSION_KEY) {
        Ok(Some(raw)) => serde_json::from_str::<Session>(&raw).ok(),
        Ok(None) => None,
        Err(e) => {
            warn!(error = %e, "Failed to read stored session");
            None
        }
    };
    let Some(session) = session.filter(Session::is_present) else {
        return SessionStatus {
            state: SessionState::NoSession,
            username: None,
            role: None,
            display_name: None,
            idle_ms: None,
            remaining_ms: None,
            timeout_ms: timeout.as_millis() as u64,
        };
    };

    let idle = session.idle(now);
    let lead = config.warning_lead().min(timeout / 6);
    let (state, remaining) = if !session.is_valid(now, timeout) {
        (SessionState::Expired, None)
    } else if idle >= timeout - lead {
        (SessionState::WarningIssued, Some(timeout - idle))
    } else {
        (SessionState::Active, Some(timeout - idle))
    };
    SessionStatus {
        state,
        username: Some(session.username),
        role: Some(session.role),
        display_name: Some(session.display_name),
        idle_ms: Some(idle.as_millis() as u64),
        remaining_ms: remaining.map(|d| d.as_millis() as u64),
        timeout_ms: timeout.as_millis() as u64,
    }
}

/// Read and clear the "session timed out" flag, for the login surface.
pub fn take_timeout_notice(store: &dyn SessionStore) -> bool {
    take_flag(store, SESSION_TIMEOUT_KEY)
}

/// Read and clear the one-shot "just logged out" marker.
pub fn take_logout_marker(store: &dyn SessionStore) -> bool {
    take_flag(store, LOGGING_OUT_KEY)
}

fn take_flag(store: &dyn SessionStore, key: &str) -> bool {
    match store.get(key) {
        Ok(Some(value)) => {
            if let Err(e) = store.remove(key) {
                warn!(key, error = %e, "Failed to clear flag");
            }
            value == "true"
        }
        Ok(None) => false,
        Err(e) => {
            warn!(key, error = %e, "Failed to read flag");
            false
        }
    }
}
