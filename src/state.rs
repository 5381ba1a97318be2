//! Shared application state: the running session manager and watchdog, and
//! the collaborators the HTTP bridge needs direct access to.

use crate::config::WardenConfig;
use crate::control::FormDocument;
use crate::host::{Navigator, RemotePrompt, SessionMirror};
use crate::lifecycle::{take_logout_marker, SessionDeps, SessionHandle, SessionManager, SessionNotice};
use crate::session::Clock;
use crate::store::SessionStore;
use crate::watchdog::{Watchdog, WatchdogHandle};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing::warn;

#[derive(Clone)]
pub struct AppState {
    pub session: SessionHandle,
    pub watchdog: WatchdogHandle,
    pub document: FormDocument,
    pub prompt: RemotePrompt,
    pub store: Arc<dyn SessionStore>,
}

impl AppState {
    /// Spawn both actors on the current runtime and connect them.
    ///
    /// The "just logged out" marker is consumed here, before either actor
    /// runs, and handed to the watchdog as its startup mode.
    pub fn start(
        config: &WardenConfig,
        store: Arc<dyn SessionStore>,
        navigator: Arc<dyn Navigator>,
        mirror: Arc<dyn SessionMirror>,
        document: FormDocument,
    ) -> Self {
        let after_logout = take_logout_marker(store.as_ref());
        let prompt = RemotePrompt::new();
        let deps = SessionDeps {
            store: store.clone(),
            navigator,
            prompt: Arc::new(prompt.clone()),
            mirror,
        };
        let session = SessionManager::spawn(config.session.clone(), deps, Clock::new());
        let watchdog = Watchdog::spawn(
            config.watchdog.clone(),
            Box::new(document.clone()),
            after_logout,
        );
        forward_logouts(&session, &watchdog);

        Self {
            session,
            watchdog,
            document,
            prompt,
            store,
        }
    }

    pub fn shutdown(&self) {
        self.session.shutdown();
        self.watchdog.shutdown();
    }
}

/// A logout tells the watchdog to drop fast cadence and sweep aggressively.
fn forward_logouts(session: &SessionHandle, watchdog: &WatchdogHandle) {
    let mut notices = session.subscribe();
    let watchdog = watchdog.clone();
    tokio::spawn(async move {
        loop {
            match notices.recv().await {
                Ok(SessionNotice::LoggedOut { .. }) => {
                    if watchdog.session_ended().is_err() {
                        break;
                    }
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Logout forwarder lagged behind session notices");
                }
                Err(RecvError::Closed) => break,
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::{ControlKind, ControlSpec, Fault};
    use crate::host::{NoMirror, RecordingNavigator};
    use crate::lifecycle::LogoutMode;
    use crate::probe::SweepReason;
    use crate::session::Role;
    use crate::store::{MemoryStore, LOGGING_OUT_KEY};
    use crate::watchdog::WatchdogNotice;
    use std::time::Duration;

    fn start(store: &MemoryStore, document: &FormDocument) -> AppState {
        AppState::start(
            &WardenConfig::default(),
            Arc::new(store.clone()),
            Arc::new(RecordingNavigator::new(false)),
            Arc::new(NoMirror),
            document.clone(),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn logout_triggers_watchdog_pass() {
        let store = MemoryStore::new();
        let document = FormDocument::new();
        document.insert(ControlSpec::new("search", ControlKind::Search));
        let state = start(&store, &document);
        let mut notices = state.watchdog.subscribe();

        state.session.login("clerk", Role::User, "Clerk").await.unwrap();
        document.inject("search", Fault::Inert).unwrap();
        assert!(state.session.logout(LogoutMode::Immediate).await.unwrap());

        tokio::time::sleep(Duration::from_millis(50)).await;
        let report = state.watchdog.last_report().await.unwrap().unwrap();
        assert_eq!(report.reason, SweepReason::PostLogout);
        assert_eq!(report.replaced, vec!["search"]);
        assert!(matches!(
            notices.try_recv(),
            Ok(WatchdogNotice::ControlReplaced { .. })
        ));
        assert_eq!(store.get(LOGGING_OUT_KEY).unwrap().as_deref(), Some("true"));
    }

    #[tokio::test(start_paused = true)]
    async fn startup_consumes_logout_marker() {
        let store = MemoryStore::new();
        store.set(LOGGING_OUT_KEY, "true").unwrap();
        let document = FormDocument::new();
        document.insert(ControlSpec::new("user", ControlKind::Text));

        let state = start(&store, &document);
        assert!(store.get(LOGGING_OUT_KEY).unwrap().is_none());

        tokio::time::sleep(Duration::from_millis(120)).await;
        let report = state.watchdog.last_report().await.unwrap().unwrap();
        assert_eq!(report.reason, SweepReason::PostLogout);
        state.shutdown();
    }
}
