//! Input resilience watchdog.
//!
//! Keeps visible form controls write-capable. A single actor task owns the
//! [`ControlHost`] and every sweep timer, so sweeps never overlap; requests
//! for a deferred sweep while one is already pending are coalesced.

use crate::config::WatchdogConfig;
use crate::control::ControlHost;
use crate::error::Stopped;
use crate::probe::{self, SweepReason, SweepReport};
use crate::timer::Timer;
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum WatchdogNotice {
    SweepCompleted { report: SweepReport },
    /// The node behind `id` is new; behaviour bound to the old one must be re-attached.
    ControlReplaced { id: String },
    CadenceChanged { accelerated: bool },
}

enum Command {
    OperationStart(Option<Value>),
    OperationEnd(Option<Value>),
    Click(String),
    NodesInserted(Vec<String>),
    Emergency(oneshot::Sender<Option<SweepReport>>),
    SessionEnded,
    SweepNow(oneshot::Sender<Option<SweepReport>>),
    LastReport(oneshot::Sender<Option<SweepReport>>),
    Shutdown,
}

#[derive(Debug)]
enum TimerEvent {
    Deferred(u64),
    PostOperation(u64),
    PostLogout(u64),
    Reclear(u64),
    AutoEmergency(u64),
}

#[derive(Clone)]
pub struct WatchdogHandle {
    commands: mpsc::UnboundedSender<Command>,
    notices: broadcast::Sender<WatchdogNotice>,
}

const STOPPED: Stopped = Stopped("watchdog");

impl WatchdogHandle {
    pub fn subscribe(&self) -> broadcast::Receiver<WatchdogNotice> {
        self.notices.subscribe()
    }

    fn send(&self, cmd: Command) -> Result<(), Stopped> {
        self.commands.send(cmd).map_err(|_| STOPPED)
    }

    async fn request<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T, Stopped> {
        let (tx, rx) = oneshot::channel();
        self.send(make(tx))?;
        rx.await.map_err(|_| STOPPED)
    }

    pub fn operation_start(&self, detail: Option<Value>) -> Result<(), Stopped> {
        self.send(Command::OperationStart(detail))
    }

    pub fn operation_end(&self, detail: Option<Value>) -> Result<(), Stopped> {
        self.send(Command::OperationEnd(detail))
    }

    /// A click landed on the control with this id.
    pub fn click(&self, id: &str) -> Result<(), Stopped> {
        self.send(Command::Click(id.to_string()))
    }

    /// Nodes were added to the document.
    pub fn nodes_inserted(&self, ids: Vec<String>) -> Result<(), Stopped> {
        self.send(Command::NodesInserted(ids))
    }

    /// The session ended; drop fast cadence and run one aggressive pass.
    pub fn session_ended(&self) -> Result<(), Stopped> {
        self.send(Command::SessionEnded)
    }

    /// Run the emergency recovery now. `None` if even the fallback failed.
    pub async fn emergency(&self) -> Result<Option<SweepReport>, Stopped> {
        self.request(Command::Emergency).await
    }

    pub async fn sweep_now(&self) -> Result<Option<SweepReport>, Stopped> {
        self.request(Command::SweepNow).await
    }

    pub async fn last_report(&self) -> Result<Option<SweepReport>, Stopped> {
        self.request(Command::LastReport).await
    }

    pub fn shutdown(&self) {
        let _ = self.commands.send(Command::Shutdown);
    }
}

pub struct Watchdog {
    config: WatchdogConfig,
    host: Box<dyn ControlHost>,
    notices: broadcast::Sender<WatchdogNotice>,
    timer_tx: mpsc::UnboundedSender<TimerEvent>,
    operation_depth: u32,
    cadence_changed: bool,
    deferred: Timer,
    post_operation: Timer,
    post_operation_confirmed: bool,
    post_logout: Timer,
    post_logout_pass: usize,
    reclear: Timer,
    auto_emergency: Timer,
    last_report: Option<SweepReport>,
}

impl Watchdog {
    /// Start the watchdog. `after_logout` is the one-shot "just logged out"
    /// marker read at startup; when set, the post-logout passes run before
    /// the baseline cadence takes over.
    pub fn spawn(config: WatchdogConfig, host: Box<dyn ControlHost>, after_logout: bool) -> WatchdogHandle {
        let (commands, command_rx) = mpsc::unbounded_channel();
        let (timer_tx, timer_rx) = mpsc::unbounded_channel();
        let (notices, _) = broadcast::channel(256);

        let mut watchdog = Watchdog {
            config,
            host,
            notices: notices.clone(),
            timer_tx,
            operation_depth: 0,
            cadence_changed: false,
            deferred: Timer::new(),
            post_operation: Timer::new(),
            post_operation_confirmed: false,
            post_logout: Timer::new(),
            post_logout_pass: 0,
            reclear: Timer::new(),
            auto_emergency: Timer::new(),
            last_report: None,
        };
        if after_logout {
            watchdog.start_post_logout_passes();
        }
        tokio::spawn(watchdog.run(command_rx, timer_rx));

        WatchdogHandle { commands, notices }
    }

    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut timers: mpsc::UnboundedReceiver<TimerEvent>,
    ) {
        let mut ticker = self.ticker();
        loop {
            tokio::select! {
                biased;
                cmd = commands.recv() => match cmd {
                    Some(Command::Shutdown) | None => break,
                    Some(cmd) => self.handle(cmd),
                },
                Some(event) = timers.recv() => self.on_timer(event),
                _ = ticker.tick() => self.on_tick(),
            }
            if std::mem::take(&mut self.cadence_changed) {
                ticker = self.ticker();
            }
        }
        debug!("Watchdog stopped");
    }

    fn ticker(&self) -> Interval {
        let period = if self.operation_depth > 0 {
            self.config.accelerated_interval()
        } else {
            self.config.baseline_interval()
        };
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker
    }

    fn handle(&mut self, cmd: Command) {
        match cmd {
            Command::OperationStart(detail) => self.operation_start(detail),
            Command::OperationEnd(detail) => self.operation_end(detail),
            Command::Click(id) => self.click(&id),
            Command::NodesInserted(ids) => self.nodes_inserted(ids),
            Command::Emergency(reply) => {
                let report = self.emergency(SweepReason::Emergency);
                let _ = reply.send(report);
            }
            Command::SessionEnded => self.session_ended(),
            Command::SweepNow(reply) => {
                let report = self.run_sweep(SweepReason::Manual);
                let _ = reply.send(report);
            }
            Command::LastReport(reply) => {
                let _ = reply.send(self.last_report.clone());
            }
            Command::Shutdown => {}
        }
    }

    fn on_timer(&mut self, event: TimerEvent) {
        match event {
            TimerEvent::Deferred(g) => {
                if self.deferred.fire(g) {
                    self.run_sweep(SweepReason::Insertion);
                }
            }
            TimerEvent::PostOperation(g) => {
                if self.post_operation.fire(g) {
                    if self.post_operation_confirmed {
                        self.run_sweep(SweepReason::PostOperationConfirm);
                    } else {
                        self.run_sweep(SweepReason::PostOperation);
                        self.post_operation_confirmed = true;
                        let delay = self
                            .config
                            .post_operation_confirm()
                            .saturating_sub(self.config.post_operation_delay());
                        self.post_operation
                            .arm(delay, &self.timer_tx, TimerEvent::PostOperation);
                    }
                }
            }
            TimerEvent::PostLogout(g) => {
                if self.post_logout.fire(g) {
                    self.run_post_logout_pass();
                }
            }
            TimerEvent::Reclear(g) => {
                if self.reclear.fire(g) {
                    match probe::reclear_all(self.host.as_mut()) {
                        Ok(0) => debug!("Emergency re-clear found nothing blocked"),
                        Ok(n) => info!(cleared = n, "Emergency re-clear unblocked controls"),
                        Err(e) => warn!(error = %e, "Emergency re-clear failed"),
                    }
                }
            }
            TimerEvent::AutoEmergency(g) => {
                if self.auto_emergency.fire(g) {
                    self.emergency(SweepReason::Emergency);
                }
            }
        }
    }

    fn on_tick(&mut self) {
        if self.post_logout.is_armed() {
            return;
        }
        let reason = if self.operation_depth > 0 {
            SweepReason::Accelerated
        } else {
            SweepReason::Baseline
        };
        self.run_sweep(reason);
    }

    fn operation_start(&mut self, detail: Option<Value>) {
        self.operation_depth += 1;
        if self.operation_depth == 1 {
            info!(detail = ?detail, "Long operation started, accelerating checks");
            self.post_operation.cancel();
            self.set_cadence(true);
        } else {
            debug!(depth = self.operation_depth, "Nested long operation started");
        }
    }

    fn operation_end(&mut self, detail: Option<Value>) {
        match self.operation_depth {
            0 => debug!(detail = ?detail, "Operation end without matching start"),
            1 => {
                self.operation_depth = 0;
                info!(detail = ?detail, "Long operation finished");
                self.set_cadence(false);
            }
            _ => {
                self.operation_depth -= 1;
                return;
            }
        }
        self.post_operation_confirmed = false;
        self.post_operation.arm(
            self.config.post_operation_delay(),
            &self.timer_tx,
            TimerEvent::PostOperation,
        );
    }

    fn click(&mut self, id: &str) {
        let qualifies = match self.host.interactive_controls() {
            Ok(ids) => ids.iter().any(|c| c == id),
            Err(e) => {
                warn!(error = %e, "Cannot list controls for click check");
                return;
            }
        };
        if qualifies {
            let report = probe::sweep_ids(self.host.as_mut(), &[id.to_string()], SweepReason::Click);
            self.finish(report);
        }
    }

    fn nodes_inserted(&mut self, ids: Vec<String>) {
        if ids.is_empty() {
            return;
        }
        if self.deferred.is_armed() {
            debug!(count = ids.len(), "Sweep already pending, coalescing insertion");
            return;
        }
        self.deferred
            .arm(self.config.insertion_delay(), &self.timer_tx, TimerEvent::Deferred);
    }

    fn session_ended(&mut self) {
        if self.operation_depth > 0 {
            self.operation_depth = 0;
            self.set_cadence(false);
        }
        self.post_operation.cancel();
        info!("Session ended, running aggressive repair pass");
        self.emergency(SweepReason::PostLogout);
    }

    fn set_cadence(&mut self, accelerated: bool) {
        self.cadence_changed = true;
        self.publish(WatchdogNotice::CadenceChanged { accelerated });
    }

    fn start_post_logout_passes(&mut self) {
        info!(passes = self.config.post_logout_passes_ms.len(), "Previous page logged out, scheduling repair passes");
        self.post_logout_pass = 0;
        if let Some(first) = self.config.post_logout_passes_ms.first() {
            self.post_logout.arm(
                Duration::from_millis(*first),
                &self.timer_tx,
                TimerEvent::PostLogout,
            );
        }
    }

    fn run_post_logout_pass(&mut self) {
        let passes = self.config.post_logout_passes_ms.clone();
        let index = self.post_logout_pass;
        debug!(pass = index + 1, of = passes.len(), "Post-logout repair pass");
        self.emergency(SweepReason::PostLogout);

        self.post_logout_pass += 1;
        if let Some(next) = passes.get(index + 1) {
            let gap = next.saturating_sub(passes[index]);
            self.post_logout
                .arm(Duration::from_millis(gap), &self.timer_tx, TimerEvent::PostLogout);
        }
    }

    fn run_sweep(&mut self, reason: SweepReason) -> Option<SweepReport> {
        match probe::sweep(self.host.as_mut(), reason) {
            Ok(report) => Some(self.finish(report)),
            Err(e) => {
                warn!(reason = ?reason, error = %e, "Sweep failed");
                None
            }
        }
    }

    /// Full sweep, then a delayed re-clear of blocking flags to catch
    /// controls disabled again by code racing the repair.
    fn emergency(&mut self, reason: SweepReason) -> Option<SweepReport> {
        info!(reason = ?reason, "Running emergency input recovery");
        match probe::sweep(self.host.as_mut(), reason) {
            Ok(report) => {
                self.reclear
                    .arm(self.config.emergency_reclear(), &self.timer_tx, TimerEvent::Reclear);
                Some(self.finish(report))
            }
            Err(e) => {
                error!(error = %e, "Emergency recovery failed, falling back to blanket unblock");
                self.fallback()
            }
        }
    }

    fn fallback(&mut self) -> Option<SweepReport> {
        match self.host.clear_all_blocking() {
            Ok(cleared) => {
                let mut report = SweepReport::new(SweepReason::Fallback);
                report.checked = cleared;
                Some(self.finish(report))
            }
            Err(e) => {
                error!(error = %e, "Fallback repair failed");
                None
            }
        }
    }

    fn finish(&mut self, report: SweepReport) -> SweepReport {
        if report.repaired() > 0 || !report.unrecovered.is_empty() || report.errors > 0 {
            info!(
                reason = ?report.reason,
                checked = report.checked,
                restored = report.restored.len(),
                replaced = report.replaced.len(),
                unrecovered = report.unrecovered.len(),
                errors = report.errors,
                "Sweep repaired controls"
            );
        } else {
            debug!(reason = ?report.reason, checked = report.checked, "Sweep found all controls healthy");
        }

        for id in &report.replaced {
            self.publish(WatchdogNotice::ControlReplaced { id: id.clone() });
        }
        let escalate = !report.unrecovered.is_empty()
            && !matches!(
                report.reason,
                SweepReason::Emergency | SweepReason::PostLogout | SweepReason::Fallback
            );
        if escalate && !self.auto_emergency.is_armed() {
            self.auto_emergency.arm(
                self.config.auto_emergency_delay(),
                &self.timer_tx,
                TimerEvent::AutoEmergency,
            );
        }

        self.publish(WatchdogNotice::SweepCompleted {
            report: report.clone(),
        });
        self.last_report = Some(report.clone());
        report
    }

    fn publish(&self, notice: WatchdogNotice) {
        let _ = self.notices.send(notice);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::{ControlKind, ControlSpec, Fault, FormDocument};
    use crate::error::ControlError;

    fn document(ids: &[&str]) -> FormDocument {
        let doc = FormDocument::new();
        for id in ids {
            doc.insert(ControlSpec {
                value: format!("{id}-value"),
                ..ControlSpec::new(id, ControlKind::Text)
            });
        }
        doc
    }

    fn start(doc: &FormDocument, after_logout: bool) -> WatchdogHandle {
        Watchdog::spawn(WatchdogConfig::default(), Box::new(doc.clone()), after_logout)
    }

    fn drain(rx: &mut broadcast::Receiver<WatchdogNotice>) -> Vec<WatchdogNotice> {
        std::iter::from_fn(|| rx.try_recv().ok()).collect()
    }

    fn sweeps(notices: &[WatchdogNotice], reason: SweepReason) -> Vec<SweepReport> {
        notices
            .iter()
            .filter_map(|n| match n {
                WatchdogNotice::SweepCompleted { report } if report.reason == reason => {
                    Some(report.clone())
                }
                _ => None,
            })
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn baseline_sweep_repairs_inert_control() {
        let doc = document(&["name", "price"]);
        let watchdog = start(&doc, false);
        let mut notices = watchdog.subscribe();
        let instance = doc.view("price").unwrap().instance;
        doc.inject("price", Fault::Inert).unwrap();

        tokio::time::sleep(Duration::from_millis(2_900)).await;
        assert!(watchdog.last_report().await.unwrap().is_none());

        tokio::time::sleep(Duration::from_millis(200)).await;
        let report = watchdog.last_report().await.unwrap().unwrap();
        assert_eq!(report.reason, SweepReason::Baseline);
        assert_eq!(report.replaced, vec!["price"]);
        assert_ne!(doc.view("price").unwrap().instance, instance);
        assert!(doc.type_text("price", "9.99").unwrap());

        let seen = drain(&mut notices);
        assert!(seen.contains(&WatchdogNotice::ControlReplaced { id: "price".into() }));
    }

    #[tokio::test(start_paused = true)]
    async fn long_operation_accelerates_then_confirms() {
        let doc = document(&["qty"]);
        let watchdog = start(&doc, false);
        let mut notices = watchdog.subscribe();

        watchdog
            .operation_start(Some(serde_json::json!({"op": "export"})))
            .unwrap();
        watchdog.last_report().await.unwrap();
        doc.inject("qty", Fault::Disabled).unwrap();

        tokio::time::sleep(Duration::from_millis(550)).await;
        let report = watchdog.last_report().await.unwrap().unwrap();
        assert_eq!(report.reason, SweepReason::Accelerated);
        assert_eq!(report.restored, vec!["qty"]);

        tokio::time::sleep(Duration::from_millis(1_000)).await;
        watchdog.operation_end(None).unwrap();
        tokio::time::sleep(Duration::from_millis(1_050)).await;

        let seen = drain(&mut notices);
        assert!(seen.contains(&WatchdogNotice::CadenceChanged { accelerated: true }));
        assert!(seen.contains(&WatchdogNotice::CadenceChanged { accelerated: false }));
        assert_eq!(sweeps(&seen, SweepReason::Accelerated).len(), 3);
        assert_eq!(sweeps(&seen, SweepReason::PostOperation).len(), 1);
        assert_eq!(sweeps(&seen, SweepReason::PostOperationConfirm).len(), 1);
        assert!(sweeps(&seen, SweepReason::Baseline).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn nested_operations_keep_fast_cadence_until_last_end() {
        let doc = document(&["qty"]);
        let watchdog = start(&doc, false);
        let mut notices = watchdog.subscribe();

        watchdog.operation_start(None).unwrap();
        watchdog.operation_start(None).unwrap();
        watchdog.operation_end(None).unwrap();
        tokio::time::sleep(Duration::from_millis(1_100)).await;

        let seen = drain(&mut notices);
        assert_eq!(sweeps(&seen, SweepReason::Accelerated).len(), 2);
        assert!(!seen.contains(&WatchdogNotice::CadenceChanged { accelerated: false }));
        assert!(sweeps(&seen, SweepReason::PostOperation).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn insertions_coalesce_into_one_sweep() {
        let doc = document(&["a"]);
        let watchdog = start(&doc, false);
        let mut notices = watchdog.subscribe();

        doc.insert(ControlSpec::new("b", ControlKind::Text));
        doc.inject("b", Fault::Inert).unwrap();
        watchdog.nodes_inserted(vec!["b".into()]).unwrap();
        doc.insert(ControlSpec::new("c", ControlKind::Textarea));
        watchdog.nodes_inserted(vec!["c".into()]).unwrap();
        watchdog.nodes_inserted(Vec::new()).unwrap();

        tokio::time::sleep(Duration::from_millis(150)).await;
        let seen = drain(&mut notices);
        let inserted = sweeps(&seen, SweepReason::Insertion);
        assert_eq!(inserted.len(), 1);
        assert_eq!(inserted[0].checked, 3);
        assert_eq!(inserted[0].replaced, vec!["b"]);
    }

    #[tokio::test(start_paused = true)]
    async fn click_checks_only_the_target() {
        let doc = document(&["a", "b"]);
        doc.insert(ControlSpec::new("save", ControlKind::Button));
        let watchdog = start(&doc, false);
        doc.inject("a", Fault::ReadOnly).unwrap();
        doc.inject("b", Fault::ReadOnly).unwrap();

        watchdog.click("save").unwrap();
        assert!(watchdog.last_report().await.unwrap().is_none());

        watchdog.click("a").unwrap();
        let report = watchdog.last_report().await.unwrap().unwrap();
        assert_eq!(report.reason, SweepReason::Click);
        assert_eq!(report.checked, 1);
        assert_eq!(report.restored, vec!["a"]);
        assert!(doc.view("b").unwrap().flags.read_only);
    }

    #[tokio::test(start_paused = true)]
    async fn post_logout_passes_run_before_baseline() {
        let doc = document(&["user", "pass"]);
        doc.inject("pass", Fault::Inert).unwrap();
        let watchdog = start(&doc, true);
        let mut notices = watchdog.subscribe();

        tokio::time::sleep(Duration::from_millis(150)).await;
        let first = watchdog.last_report().await.unwrap().unwrap();
        assert_eq!(first.reason, SweepReason::PostLogout);
        assert_eq!(first.replaced, vec!["pass"]);

        tokio::time::sleep(Duration::from_millis(2_800)).await;
        let seen = drain(&mut notices);
        assert_eq!(sweeps(&seen, SweepReason::PostLogout).len(), 4);
        assert!(sweeps(&seen, SweepReason::Baseline).is_empty());

        tokio::time::sleep(Duration::from_millis(3_100)).await;
        let seen = drain(&mut notices);
        assert_eq!(sweeps(&seen, SweepReason::PostLogout).len(), 1);
        assert!(!sweeps(&seen, SweepReason::Baseline).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn emergency_reclears_controls_disabled_again() {
        let doc = document(&["sku"]);
        let watchdog = start(&doc, false);

        let report = watchdog.emergency().await.unwrap().unwrap();
        assert_eq!(report.reason, SweepReason::Emergency);
        doc.inject("sku", Fault::Disabled).unwrap();

        tokio::time::sleep(Duration::from_millis(1_050)).await;
        watchdog.last_report().await.unwrap();
        assert!(!doc.view("sku").unwrap().flags.disabled);
    }

    #[tokio::test(start_paused = true)]
    async fn emergency_falls_back_when_listing_fails() {
        let doc = document(&["sku", "qty"]);
        doc.inject("qty", Fault::Disabled).unwrap();
        doc.fail_queries(true);
        let watchdog = start(&doc, false);

        let report = watchdog.emergency().await.unwrap().unwrap();
        assert_eq!(report.reason, SweepReason::Fallback);
        assert_eq!(report.checked, 1);
        assert!(!doc.view("qty").unwrap().flags.disabled);
    }

    #[tokio::test(start_paused = true)]
    async fn session_end_drops_fast_cadence() {
        let doc = document(&["a"]);
        let watchdog = start(&doc, false);
        let mut notices = watchdog.subscribe();

        watchdog.operation_start(None).unwrap();
        watchdog.session_ended().unwrap();
        tokio::time::sleep(Duration::from_millis(2_000)).await;

        let seen = drain(&mut notices);
        assert!(seen.contains(&WatchdogNotice::CadenceChanged { accelerated: false }));
        assert_eq!(sweeps(&seen, SweepReason::PostLogout).len(), 1);
        assert!(sweeps(&seen, SweepReason::Accelerated).is_empty());
    }

    /// Host whose replacement never produces a working control.
    struct StuckHost(FormDocument);

    impl ControlHost for StuckHost {
        fn interactive_controls(&self) -> Result<Vec<String>, ControlError> {
            self.0.interactive_controls()
        }
        fn read_value(&self, id: &str) -> Result<String, ControlError> {
            self.0.read_value(id)
        }
        fn write_value(&mut self, id: &str, value: &str) -> Result<(), ControlError> {
            self.0.write_value(id, value)
        }
        fn blocking(&self, id: &str) -> Result<crate::control::BlockingFlags, ControlError> {
            self.0.blocking(id)
        }
        fn clear_blocking(&mut self, id: &str) -> Result<(), ControlError> {
            self.0.clear_blocking(id)
        }
        fn clear_all_blocking(&mut self) -> Result<usize, ControlError> {
            self.0.clear_all_blocking()
        }
        fn describe(&self, id: &str) -> Result<ControlSpec, ControlError> {
            self.0.describe(id)
        }
        fn replace(&mut self, _spec: &ControlSpec) -> Result<(), ControlError> {
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn unrecovered_control_triggers_one_emergency() {
        let doc = document(&["a"]);
        doc.inject("a", Fault::Inert).unwrap();
        let watchdog = Watchdog::spawn(
            WatchdogConfig::default(),
            Box::new(StuckHost(doc.clone())),
            false,
        );
        let mut notices = watchdog.subscribe();

        let report = watchdog.sweep_now().await.unwrap().unwrap();
        assert_eq!(report.unrecovered, vec!["a"]);
        watchdog.sweep_now().await.unwrap();

        tokio::time::sleep(Duration::from_millis(300)).await;
        let seen = drain(&mut notices);
        assert_eq!(sweeps(&seen, SweepReason::Emergency).len(), 1);
    }
}
