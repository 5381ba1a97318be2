//! Write-capability probe and the two-tier repair applied to controls that fail it.

use crate::control::{ControlHost, ControlKind, ControlSpec};
use crate::error::ControlError;
use serde::Serialize;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SweepReason {
    Baseline,
    Accelerated,
    PostOperation,
    PostOperationConfirm,
    Insertion,
    Click,
    Manual,
    Emergency,
    PostLogout,
    Fallback,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Repair {
    Healthy,
    /// Fixed by clearing blocking flags; same node.
    Restored,
    /// Fixed by swapping in a fresh node.
    Replaced,
    Unrecovered,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SweepReport {
    pub reason: SweepReason,
    pub checked: usize,
    pub healthy: usize,
    pub restored: Vec<String>,
    pub replaced: Vec<String>,
    pub unrecovered: Vec<String>,
    pub errors: usize,
}

impl SweepReport {
    pub fn new(reason: SweepReason) -> Self {
        Self {
            reason,
            checked: 0,
            healthy: 0,
            restored: Vec::new(),
            replaced: Vec::new(),
            unrecovered: Vec::new(),
            errors: 0,
        }
    }

    pub fn repaired(&self) -> usize {
        self.restored.len() + self.replaced.len()
    }
}

/// Pick a value the control should accept that differs from `current`.
/// `None` means the control has no way to show a change (a select with a
/// single option) and is taken as capable.
fn sentinel_for(spec: &ControlSpec, current: &str) -> Option<String> {
    match spec.kind {
        ControlKind::Select => spec.options.iter().find(|o| *o != current).cloned(),
        ControlKind::Number => Some(if current == "1" { "2" } else { "1" }.to_string()),
        ControlKind::Date => Some(
            if current == "2000-01-01" { "2000-01-02" } else { "2000-01-01" }.to_string(),
        ),
        _ => Some(format!("__probe_{}", uuid::Uuid::new_v4().simple())),
    }
}

/// Write a sentinel, read it back and restore the original value.
/// Returns whether the write took effect.
pub fn probe(host: &mut dyn ControlHost, id: &str) -> Result<bool, ControlError> {
    let spec = host.describe(id)?;
    let original = host.read_value(id)?;
    let Some(sentinel) = sentinel_for(&spec, &original) else {
        return Ok(true);
    };

    host.write_value(id, &sentinel)?;
    let observed = host.read_value(id)?;
    if observed != original {
        host.write_value(id, &original)?;
    }
    Ok(observed == sentinel)
}

/// Probe one control and escalate through the repair tiers if it fails.
pub fn check_and_repair(host: &mut dyn ControlHost, id: &str) -> Result<Repair, ControlError> {
    if probe(host, id)? {
        return Ok(Repair::Healthy);
    }

    debug!(control = %id, flags = ?host.blocking(id)?, "Control ignored probe write");
    host.clear_blocking(id)?;
    if probe(host, id)? {
        info!(control = %id, "Control restored by clearing blocking flags");
        return Ok(Repair::Restored);
    }

    let spec = host.describe(id)?;
    host.replace(&spec)?;
    if probe(host, id)? {
        warn!(control = %id, "Unresponsive control replaced");
        Ok(Repair::Replaced)
    } else {
        warn!(control = %id, "Control still unresponsive after replacement");
        Ok(Repair::Unrecovered)
    }
}

/// Check and repair the given controls. A failure on one control is logged
/// and counted; the rest are still checked.
pub fn sweep_ids(host: &mut dyn ControlHost, ids: &[String], reason: SweepReason) -> SweepReport {
    let mut report = SweepReport::new(reason);
    for id in ids {
        report.checked += 1;
        match check_and_repair(host, id) {
            Ok(Repair::Healthy) => report.healthy += 1,
            Ok(Repair::Restored) => report.restored.push(id.clone()),
            Ok(Repair::Replaced) => report.replaced.push(id.clone()),
            Ok(Repair::Unrecovered) => report.unrecovered.push(id.clone()),
            Err(e) => {
                warn!(control = %id, error = %e, "Probe failed, skipping control");
                report.errors += 1;
            }
        }
    }
    report
}

/// One full pass over every visible interactive control.
pub fn sweep(host: &mut dyn ControlHost, reason: SweepReason) -> Result<SweepReport, ControlError> {
    let ids = host.interactive_controls()?;
    Ok(sweep_ids(host, &ids, reason))
}

/// Clear blocking flags on every interactive control that has any set.
pub fn reclear_all(host: &mut dyn ControlHost) -> Result<usize, ControlError> {
    let mut cleared = 0;
    for id in host.interactive_controls()? {
        let blocked = match host.blocking(&id) {
            Ok(flags) => flags.any(),
            Err(e) => {
                warn!(control = %id, error = %e, "Cannot read control flags");
                continue;
            }
        };
        if !blocked {
            continue;
        }
        match host.clear_blocking(&id) {
            Ok(()) => cleared += 1,
            Err(e) => warn!(control = %id, error = %e, "Cannot clear control flags"),
        }
    }
    Ok(cleared)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::{ControlView, Fault, FormDocument};

    fn text(id: &str, value: &str) -> ControlSpec {
        ControlSpec {
            value: value.to_string(),
            ..ControlSpec::new(id, ControlKind::Text)
        }
    }

    fn without_writes(view: ControlView) -> (String, String, bool, u64) {
        (view.id, view.value, view.flags.any(), view.instance)
    }

    #[test]
    fn probe_restores_original_value() {
        let mut doc = FormDocument::new();
        doc.insert(text("customer", "Acme Hardware"));

        assert!(probe(&mut doc, "customer").unwrap());
        assert_eq!(doc.read_value("customer").unwrap(), "Acme Hardware");
        assert_eq!(doc.writes("customer"), 2);
    }

    #[test]
    fn disabled_control_is_fixed_in_place() {
        let mut doc = FormDocument::new();
        let instance = doc.insert(text("qty", "4"));
        doc.inject("qty", Fault::Disabled).unwrap();

        assert!(!probe(&mut doc, "qty").unwrap());
        assert_eq!(check_and_repair(&mut doc, "qty").unwrap(), Repair::Restored);

        let view = doc.view("qty").unwrap();
        assert_eq!(view.instance, instance);
        assert!(!view.flags.disabled);
        assert_eq!(view.value, "4");
    }

    #[test]
    fn inert_control_is_replaced_with_same_configuration() {
        let mut doc = FormDocument::new();
        let spec = ControlSpec {
            name: Some("password".into()),
            placeholder: Some("Password".into()),
            required: true,
            classes: vec!["form-control".into(), "login".into()],
            value: "hunter2".into(),
            ..ControlSpec::new("password", ControlKind::Password)
        };
        let instance = doc.insert(spec.clone());
        doc.inject("password", Fault::Inert).unwrap();
        doc.inject("password", Fault::ReadOnly).unwrap();

        assert_eq!(check_and_repair(&mut doc, "password").unwrap(), Repair::Replaced);

        let view = doc.view("password").unwrap();
        assert_ne!(view.instance, instance);
        assert!(!view.inert);
        assert!(!view.flags.any());
        assert_eq!(doc.spec("password").unwrap(), spec);
        assert!(probe(&mut doc, "password").unwrap());
    }

    #[test]
    fn sweep_repairs_exactly_the_incapable_controls() {
        let mut doc = FormDocument::new();
        for i in 0..6 {
            doc.insert(text(&format!("field{i}"), &format!("v{i}")));
        }
        doc.inject("field1", Fault::Inert).unwrap();
        doc.inject("field4", Fault::ReadOnly).unwrap();
        let healthy: Vec<_> = ["field0", "field2", "field3", "field5"]
            .iter()
            .map(|id| without_writes(doc.view(id).unwrap()))
            .collect();

        let report = sweep(&mut doc, SweepReason::Manual).unwrap();
        assert_eq!(report.checked, 6);
        assert_eq!(report.healthy, 4);
        assert_eq!(report.replaced, vec!["field1"]);
        assert_eq!(report.restored, vec!["field4"]);
        assert_eq!(report.repaired(), 2);

        let after: Vec<_> = ["field0", "field2", "field3", "field5"]
            .iter()
            .map(|id| without_writes(doc.view(id).unwrap()))
            .collect();
        assert_eq!(healthy, after);
        assert_eq!(doc.read_value("field1").unwrap(), "v1");
    }

    #[test]
    fn failing_control_does_not_abort_sweep() {
        let mut doc = FormDocument::new();
        doc.insert(text("a", ""));
        doc.insert(text("b", ""));
        doc.insert(text("c", ""));
        doc.inject("b", Fault::Broken).unwrap();
        doc.inject("c", Fault::Inert).unwrap();

        let report = sweep(&mut doc, SweepReason::Baseline).unwrap();
        assert_eq!(report.errors, 1);
        assert_eq!(report.healthy, 1);
        assert_eq!(report.replaced, vec!["c"]);
    }

    #[test]
    fn selects_probe_with_an_existing_option() {
        let mut doc = FormDocument::new();
        doc.insert(ControlSpec {
            options: vec!["Tools".into(), "Paint".into()],
            value: "Paint".into(),
            ..ControlSpec::new("category", ControlKind::Select)
        });
        doc.insert(ControlSpec {
            options: vec!["Only".into()],
            value: "Only".into(),
            ..ControlSpec::new("single", ControlKind::Select)
        });

        assert!(probe(&mut doc, "category").unwrap());
        assert_eq!(doc.read_value("category").unwrap(), "Paint");
        assert!(probe(&mut doc, "single").unwrap());
        assert_eq!(doc.writes("single"), 0);
    }

    #[test]
    fn reclear_only_touches_blocked_controls() {
        let mut doc = FormDocument::new();
        doc.insert(text("a", ""));
        doc.insert(text("b", ""));
        doc.inject("b", Fault::NoPointer).unwrap();

        assert_eq!(reclear_all(&mut doc).unwrap(), 1);
        assert!(!doc.view("b").unwrap().flags.any());
    }

    #[test]
    fn query_failure_surfaces_from_sweep() {
        let mut doc = FormDocument::new();
        doc.insert(text("a", ""));
        doc.fail_queries(true);
        assert!(sweep(&mut doc, SweepReason::Emergency).is_err());
    }
}
