//! User-interaction notifications and which of them count as activity.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InteractionKind {
    #[serde(alias = "pointerdown")]
    Mousedown,
    #[serde(alias = "pointermove")]
    Mousemove,
    Keypress,
    Scroll,
    Touchstart,
    Click,
    Focus,
    Resize,
}

impl InteractionKind {
    pub const QUALIFYING: [InteractionKind; 6] = [
        Self::Mousedown,
        Self::Mousemove,
        Self::Keypress,
        Self::Scroll,
        Self::Touchstart,
        Self::Click,
    ];

    /// Map a DOM event name onto a kind.
    pub fn from_event_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "mousedown" | "pointerdown" => Some(Self::Mousedown),
            "mousemove" | "pointermove" => Some(Self::Mousemove),
            "keypress" => Some(Self::Keypress),
            "scroll" => Some(Self::Scroll),
            "touchstart" => Some(Self::Touchstart),
            "click" => Some(Self::Click),
            "focus" => Some(Self::Focus),
            "resize" => Some(Self::Resize),
            _ => None,
        }
    }

    /// Whether this notification refreshes the idle clock.
    pub fn is_activity(self) -> bool {
        Self::QUALIFYING.contains(&self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn qualifying_kinds() {
        for name in ["mousedown", "mousemove", "keypress", "scroll", "touchstart", "click"] {
            let kind = InteractionKind::from_event_name(name).unwrap();
            assert!(kind.is_activity(), "{name} should count as activity");
        }
        assert!(!InteractionKind::Focus.is_activity());
        assert!(!InteractionKind::Resize.is_activity());
        assert!(InteractionKind::from_event_name("wheel").is_none());
    }

    #[test]
    fn deserializes_dom_names() {
        let kind: InteractionKind = serde_json::from_str(r#""pointerdown""#).unwrap();
        assert_eq!(kind, InteractionKind::Mousedown);
        let kind: InteractionKind = serde_json::from_str(r#""touchstart""#).unwrap();
        assert_eq!(kind, InteractionKind::Touchstart);
    }
}
