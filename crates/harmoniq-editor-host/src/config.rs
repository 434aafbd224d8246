use std::env;

use crate::geometry::Size;

/// Host-side knobs for editor windows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EditorHostConfig {
    /// Smallest size a resizable editor window may be shrunk to.
    pub min_size: Size,
    /// Select `ResizeRedirect` on the host window so resize attempts by other
    /// clients are negotiated with the controller before they take effect.
    pub redirect_resize: bool,
    pub border_width: u32,
}

impl EditorHostConfig {
    pub const DEFAULT_MIN_SIZE: Size = Size::new(80, 80);

    /// Built-in defaults, ignoring the environment.
    pub fn builtin() -> Self {
        Self {
            min_size: Self::DEFAULT_MIN_SIZE,
            redirect_resize: false,
            border_width: 1,
        }
    }

    /// Applies overrides read through `lookup` on top of the built-in defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::builtin();
        if let Some(min_size) = lookup("HARMONIQ_EDITOR_MIN_SIZE").as_deref().and_then(Size::parse) {
            config.min_size = min_size;
        }
        if let Some(flag) = lookup("HARMONIQ_EDITOR_REDIRECT_RESIZE") {
            config.redirect_resize = matches!(
                flag.trim().to_ascii_lowercase().as_str(),
                "1" | "true" | "yes" | "on"
            );
        }
        config
    }
}

impl Default for EditorHostConfig {
    fn default() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }
}
