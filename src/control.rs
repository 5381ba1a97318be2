//! Interactive form controls as seen by the watchdog.
//!
//! [`ControlHost`] is the only way the watchdog touches a rendering surface.
//! [`FormDocument`] is an in-memory surface with injectable faults, used by
//! the HTTP bridge and by tests.

use crate::error::ControlError;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ControlKind {
    Text,
    Password,
    Email,
    Search,
    Tel,
    Url,
    Number,
    Date,
    Textarea,
    Select,
    Checkbox,
    Radio,
    Button,
    Hidden,
}

impl ControlKind {
    /// Text-like inputs, text areas and selects.
    pub fn is_interactive(self) -> bool {
        !matches!(
            self,
            Self::Checkbox | Self::Radio | Self::Button | Self::Hidden
        )
    }
}

/// Attributes and styles that stop a control from taking input.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockingFlags {
    #[serde(default)]
    pub disabled: bool,
    #[serde(default)]
    pub read_only: bool,
    #[serde(default)]
    pub aria_disabled: bool,
    #[serde(default)]
    pub pointer_events_none: bool,
    #[serde(default)]
    pub user_select_none: bool,
}

impl BlockingFlags {
    pub fn any(&self) -> bool {
        self.disabled
            || self.read_only
            || self.aria_disabled
            || self.pointer_events_none
            || self.user_select_none
    }
}

/// Everything needed to rebuild an equivalent control.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlSpec {
    pub id: String,
    pub kind: ControlKind,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub placeholder: Option<String>,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub classes: Vec<String>,
    #[serde(default)]
    pub options: Vec<String>,
    #[serde(default)]
    pub value: String,
    #[serde(default = "default_visible")]
    pub visible: bool,
}

fn default_visible() -> bool {
    true
}

impl ControlSpec {
    pub fn new(id: &str, kind: ControlKind) -> Self {
        Self {
            id: id.to_string(),
            kind,
            name: None,
            placeholder: None,
            required: false,
            classes: Vec::new(),
            options: Vec::new(),
            value: String::new(),
            visible: true,
        }
    }
}

pub trait ControlHost: Send {
    /// Ids of visible interactive controls, in document order.
    fn interactive_controls(&self) -> Result<Vec<String>, ControlError>;

    fn read_value(&self, id: &str) -> Result<String, ControlError>;

    /// Assign a value. An inert control accepts the call and ignores it.
    fn write_value(&mut self, id: &str, value: &str) -> Result<(), ControlError>;

    fn blocking(&self, id: &str) -> Result<BlockingFlags, ControlError>;

    fn clear_blocking(&mut self, id: &str) -> Result<(), ControlError>;

    /// Clear blocking flags on every form control without looking them up
    /// individually. Returns how many controls changed.
    fn clear_all_blocking(&mut self) -> Result<usize, ControlError>;

    fn describe(&self, id: &str) -> Result<ControlSpec, ControlError>;

    /// Discard the control with `spec.id` and insert a new one built from
    /// `spec`, with no blocking flags. Behaviour bound to the old node is lost.
    fn replace(&mut self, spec: &ControlSpec) -> Result<(), ControlError>;
}

/// Ways a [`FormDocument`] control can misbehave.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Fault {
    /// Writes are silently dropped; only replacement helps.
    Inert,
    Disabled,
    ReadOnly,
    NoPointer,
    /// Every access fails.
    Broken,
}

#[derive(Debug, Clone)]
struct Node {
    spec: ControlSpec,
    flags: BlockingFlags,
    inert: bool,
    broken: bool,
    instance: u64,
    writes: u64,
}

impl Node {
    fn accepts_writes(&self) -> bool {
        !self.inert && !self.flags.disabled && !self.flags.read_only
    }
}

#[derive(Debug, Default)]
struct DocumentInner {
    nodes: Vec<Node>,
    next_instance: u64,
    queries_fail: bool,
}

impl DocumentInner {
    fn node(&self, id: &str) -> Result<&Node, ControlError> {
        let node = self
            .nodes
            .iter()
            .find(|n| n.spec.id == id)
            .ok_or_else(|| ControlError::NotFound(id.to_string()))?;
        if node.broken {
            return Err(ControlError::Host(format!("{id} threw on access")));
        }
        Ok(node)
    }

    fn node_mut(&mut self, id: &str) -> Result<&mut Node, ControlError> {
        let node = self
            .nodes
            .iter_mut()
            .find(|n| n.spec.id == id)
            .ok_or_else(|| ControlError::NotFound(id.to_string()))?;
        if node.broken {
            return Err(ControlError::Host(format!("{id} threw on access")));
        }
        Ok(node)
    }

    fn instance(&mut self) -> u64 {
        self.next_instance += 1;
        self.next_instance
    }
}

/// Public view of one control, for listings.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ControlView {
    pub id: String,
    pub kind: ControlKind,
    pub value: String,
    pub flags: BlockingFlags,
    pub inert: bool,
    pub instance: u64,
    pub visible: bool,
}

/// In-memory document. Clones share the same nodes.
#[derive(Debug, Clone, Default)]
pub struct FormDocument {
    inner: Arc<Mutex<DocumentInner>>,
}

impl FormDocument {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, DocumentInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add a control (or swap in a new node for an existing id). Returns its instance number.
    pub fn insert(&self, spec: ControlSpec) -> u64 {
        let mut inner = self.lock();
        let instance = inner.instance();
        let node = Node {
            spec,
            flags: BlockingFlags::default(),
            inert: false,
            broken: false,
            instance,
            writes: 0,
        };
        match inner.nodes.iter().position(|n| n.spec.id == node.spec.id) {
            Some(pos) => inner.nodes[pos] = node,
            None => inner.nodes.push(node),
        }
        instance
    }

    pub fn remove(&self, id: &str) -> bool {
        let mut inner = self.lock();
        let before = inner.nodes.len();
        inner.nodes.retain(|n| n.spec.id != id);
        inner.nodes.len() != before
    }

    pub fn inject(&self, id: &str, fault: Fault) -> Result<(), ControlError> {
        let mut inner = self.lock();
        let node = inner
            .nodes
            .iter_mut()
            .find(|n| n.spec.id == id)
            .ok_or_else(|| ControlError::NotFound(id.to_string()))?;
        match fault {
            Fault::Inert => node.inert = true,
            Fault::Disabled => node.flags.disabled = true,
            Fault::ReadOnly => node.flags.read_only = true,
            Fault::NoPointer => node.flags.pointer_events_none = true,
            Fault::Broken => node.broken = true,
        }
        Ok(())
    }

    /// Make document-wide control queries fail.
    pub fn fail_queries(&self, fail: bool) {
        self.lock().queries_fail = fail;
    }

    /// What a user typing into the control would achieve.
    pub fn type_text(&self, id: &str, value: &str) -> Result<bool, ControlError> {
        let mut inner = self.lock();
        let node = inner.node_mut(id)?;
        if node.accepts_writes() && !node.flags.pointer_events_none {
            node.spec.value = value.to_string();
            Ok(true)
        } else {
            Ok(false)
        }
    }

    pub fn view(&self, id: &str) -> Option<ControlView> {
        self.lock()
            .nodes
            .iter()
            .find(|n| n.spec.id == id)
            .map(Self::to_view)
    }

    pub fn views(&self) -> Vec<ControlView> {
        self.lock().nodes.iter().map(Self::to_view).collect()
    }

    pub fn writes(&self, id: &str) -> u64 {
        self.lock()
            .nodes
            .iter()
            .find(|n| n.spec.id == id)
            .map(|n| n.writes)
            .unwrap_or(0)
    }

    pub fn spec(&self, id: &str) -> Option<ControlSpec> {
        self.lock()
            .nodes
            .iter()
            .find(|n| n.spec.id == id)
            .map(|n| n.spec.clone())
    }

    fn to_view(node: &Node) -> ControlView {
        ControlView {
            id: node.spec.id.clone(),
            kind: node.spec.kind,
            value: node.spec.value.clone(),
            flags: node.flags,
            inert: node.inert,
            instance: node.instance,
            visible: node.spec.visible,
        }
    }
}

impl ControlHost for FormDocument {
    fn interactive_controls(&self) -> Result<Vec<String>, ControlError> {
        let inner = self.lock();
        if inner.queries_fail {
            return Err(ControlError::Host("control query failed".to_string()));
        }
        Ok(inner
            .nodes
            .iter()
            .filter(|n| n.spec.visible && n.spec.kind.is_interactive())
            .map(|n| n.spec.id.clone())
            .collect())
    }

    fn read_value(&self, id: &str) -> Result<String, ControlError> {
        Ok(self.lock().node(id)?.spec.value.clone())
    }

    fn write_value(&mut self, id: &str, value: &str) -> Result<(), ControlError> {
        let mut inner = self.lock();
        let node = inner.node_mut(id)?;
        node.writes += 1;
        if !node.accepts_writes() {
            return Ok(());
        }
        node.spec.value = if node.spec.kind == ControlKind::Select
            && !node.spec.options.iter().any(|o| o == value)
        {
            String::new()
        } else {
            value.to_string()
        };
        Ok(())
    }

    fn blocking(&self, id: &str) -> Result<BlockingFlags, ControlError> {
        Ok(self.lock().node(id)?.flags)
    }

    fn clear_blocking(&mut self, id: &str) -> Result<(), ControlError> {
        self.lock().node_mut(id)?.flags = BlockingFlags::default();
        Ok(())
    }

    fn clear_all_blocking(&mut self) -> Result<usize, ControlError> {
        let mut inner = self.lock();
        let mut cleared = 0;
        for node in inner.nodes.iter_mut().filter(|n| !n.broken) {
            if node.flags.any() {
                node.flags = BlockingFlags::default();
                cleared += 1;
            }
        }
        Ok(cleared)
    }

    fn describe(&self, id: &str) -> Result<ControlSpec, ControlError> {
        Ok(self.lock().node(id)?.spec.clone())
    }

    fn replace(&mut self, spec: &ControlSpec) -> Result<(), ControlError> {
        let mut inner = self.lock();
        let pos = inner
            .nodes
            .iter()
            .position(|n| n.spec.id == spec.id)
            .ok_or_else(|| ControlError::Detached(spec.id.clone()))?;
        let instance = inner.instance();
        inner.nodes[pos] = Node {
            spec: spec.clone(),
            flags: BlockingFlags::default(),
            inert: false,
            broken: false,
            instance,
            writes: 0,
        };
        Ok(())
    }
}
