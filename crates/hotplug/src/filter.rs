//! Event filter
//!
//! Checks run in a fixed order: subsystem, then hub heuristics, then action.

use crate::event::Event;
use crate::stage::{SkipReason, Stage};
use std::fmt;

const USB_SUBSYSTEM: &str = "usb";
const HUB_MARKER: &str = "hub";

/// What the hypervisor should do with the matched devices
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Add,
    Remove,
}

impl Action {
    /// Parse a udev `ACTION` value
    pub fn from_udev(action: &str) -> Option<Self> {
        match action {
            "add" => Some(Action::Add),
            "remove" => Some(Action::Remove),
            _ => None,
        }
    }

    /// The virsh sub-command for this action
    pub fn operation(self) -> &'static str {
        match self {
            Action::Add => "attach-device",
            Action::Remove => "detach-device",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Add => f.write_str("add"),
            Action::Remove => f.write_str("remove"),
        }
    }
}

/// Decide whether `event` is something the hook acts on
pub fn classify(event: &Event) -> Stage<Action> {
    if event.subsystem != USB_SUBSYSTEM {
        return Stage::Skip(SkipReason::WrongSubsystem(event.subsystem.clone()));
    }

    if let Some(model) = event
        .model_hints
        .iter()
        .find(|hint| hint.to_lowercase().contains(HUB_MARKER))
    {
        return Stage::Skip(SkipReason::HubDevice(model.clone()));
    }

    match Action::from_udev(&event.action) {
        Some(action) => Stage::Continue(action),
        None => Stage::Skip(SkipReason::UnsupportedAction(event.action.clone())),
    }
}
