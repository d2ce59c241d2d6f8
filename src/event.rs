//! Sketch event names and the payloads the host passes along with them.
//!
//! [`SketchEvent`] is the closed set of lifecycle and input callbacks a sketch
//! may define. Input events may carry an [`EventArg`] describing the key or
//! mouse state at the time the host observed it.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use std::fmt::{Debug, Display};
use std::str::FromStr;

/// Lifecycle and input callbacks a sketch can register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SketchEvent {
    /// Called once before the host surface exists (size, renderer choice)
    Settings,
    /// Called once on the first frame
    Setup,
    /// Called every frame
    Draw,
    KeyPressed,
    KeyTyped,
    KeyReleased,
    MouseClicked,
    MouseDragged,
    MouseMoved,
    MouseEntered,
    MouseExited,
    MousePressed,
    MouseReleased,
    MouseWheel,
    /// Terminal notification that the sketch has stopped
    Exit,
}

impl SketchEvent {
    pub const ALL: [SketchEvent; 15] = [
        SketchEvent::Settings,
        SketchEvent::Setup,
        SketchEvent::Draw,
        SketchEvent::KeyPressed,
        SketchEvent::KeyTyped,
        SketchEvent::KeyReleased,
        SketchEvent::MouseClicked,
        SketchEvent::MouseDragged,
        SketchEvent::MouseMoved,
        SketchEvent::MouseEntered,
        SketchEvent::MouseExited,
        SketchEvent::MousePressed,
        SketchEvent::MouseReleased,
        SketchEvent::MouseWheel,
        SketchEvent::Exit,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SketchEvent::Settings => "settings",
            SketchEvent::Setup => "setup",
            SketchEvent::Draw => "draw",
            SketchEvent::KeyPressed => "key_pressed",
            SketchEvent::KeyTyped => "key_typed",
            SketchEvent::KeyReleased => "key_released",
            SketchEvent::MouseClicked => "mouse_clicked",
            SketchEvent::MouseDragged => "mouse_dragged",
            SketchEvent::MouseMoved => "mouse_moved",
            SketchEvent::MouseEntered => "mouse_entered",
            SketchEvent::MouseExited => "mouse_exited",
            SketchEvent::MousePressed => "mouse_pressed",
            SketchEvent::MouseReleased => "mouse_released",
            SketchEvent::MouseWheel => "mouse_wheel",
            SketchEvent::Exit => "exit",
        }
    }

    /// Stable numeric code used across the C ABI.
    pub fn code(self) -> u32 {
        self as u32
    }

    pub fn from_code(code: u32) -> Option<SketchEvent> {
        Self::ALL.get(code as usize).copied()
    }

    /// True for events the host delivers with a key or mouse payload.
    pub fn is_input(self) -> bool {
        !matches!(
            self,
            SketchEvent::Settings | SketchEvent::Setup | SketchEvent::Draw | SketchEvent::Exit
        )
    }
}

impl Display for SketchEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown sketch event: {0}")]
pub struct UnknownEvent(pub String);

impl FromStr for SketchEvent {
    type Err = UnknownEvent;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|e| e.as_str() == s)
            .ok_or_else(|| UnknownEvent(s.to_string()))
    }
}

/// Represents a mouse button that can be pressed or released
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MouseButton {
    Left,
    Middle,
    Right,
}

impl Display for MouseButton {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MouseButton::Left => write!(f, "Left"),
            MouseButton::Middle => write!(f, "Middle"),
            MouseButton::Right => write!(f, "Right"),
        }
    }
}

bitflags! {
    #[derive(Default)]
    pub struct Modifiers: u8 {
        const SHIFT   = 0b0001;
        const CONTROL = 0b0010;
        const ALT     = 0b0100;
        const META    = 0b1000;
    }
}

impl Display for Modifiers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut parts = Vec::new();

        if self.contains(Modifiers::SHIFT) {
            parts.push("Shift");
        }
        if self.contains(Modifiers::CONTROL) {
            parts.push("Control");
        }
        if self.contains(Modifiers::ALT) {
            parts.push("Alt");
        }
        if self.contains(Modifiers::META) {
            parts.push("Meta");
        }

        if parts.is_empty() {
            write!(f, "None")
        } else {
            write!(f, "{}", parts.join("+"))
        }
    }
}

/// Key state delivered with key events
#[derive(Debug, Clone, PartialEq)]
pub struct KeyEvent {
    /// Character produced by the key, if any
    pub key: Option<char>,
    /// Host-specific key code
    pub code: u32,
    pub modifiers: Modifiers,
}

/// Mouse state delivered with mouse events
#[derive(Debug, Clone, PartialEq)]
pub struct MouseEvent {
    pub x: f32,
    pub y: f32,
    /// Button involved in the event, `None` for plain motion
    pub button: Option<MouseButton>,
    /// Wheel rotation; only meaningful for `mouse_wheel`
    pub wheel: f32,
    pub modifiers: Modifiers,
}

impl MouseEvent {
    pub fn at(x: f32, y: f32) -> Self {
        Self { x, y, button: None, wheel: 0.0, modifiers: Modifiers::empty() }
    }
}

/// Optional argument the host passes to an event callback
#[derive(Debug, Clone, PartialEq)]
pub enum EventArg {
    Key(KeyEvent),
    Mouse(MouseEvent),
}
