//! Frame parts: the unordered inputs to tree assembly.

use chassis_core::config::FrameConfig;
use serde_json::Value;

use crate::WORLD;

/// One frame to place in the tree: its config (name, parent, static
/// offset) plus an optional kinematic model kept opaque for the
/// kinematics library.
#[derive(Debug, Clone, PartialEq)]
pub struct FramePart {
    pub name: String,
    pub frame: FrameConfig,
    pub kinematic_model: Option<Value>,
}

impl FramePart {
    pub fn new(name: impl Into<String>, frame: FrameConfig) -> Self {
        Self {
            name: name.into(),
            frame,
            kinematic_model: None,
        }
    }

    #[must_use]
    pub fn with_kinematic_model(mut self, model: Value) -> Self {
        self.kinematic_model = Some(model);
        self
    }
}

/// Rewrite a remote's parts for assembly into the local tree: every name
/// gains the `remote:` prefix, and parts rooted on the remote's world are
/// re-parented onto `mount` (the remote's mount point here).
#[must_use]
pub fn prefix_remote(parts: &[FramePart], remote: &str, mount: &str) -> Vec<FramePart> {
    parts
        .iter()
        .map(|part| {
            let mut out = part.clone();
            out.name = format!("{remote}:{}", part.name);
            out.frame.parent = if part.frame.parent == WORLD {
                mount.to_string()
            } else {
                format!("{remote}:{}", part.frame.parent)
            };
            out
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chassis_core::config::{OrientationConfig, TranslationConfig};
    use pretty_assertions::assert_eq;

    fn frame(parent: &str) -> FrameConfig {
        FrameConfig {
            parent: parent.to_string(),
            translation: TranslationConfig::default(),
            orientation: OrientationConfig::default(),
            geometry: None,
        }
    }

    #[test]
    fn prefixing_rewrites_names_and_world_parents() {
        let parts = vec![
            FramePart::new("base", frame(WORLD)),
            FramePart::new("arm", frame("base")),
        ];
        let prefixed = prefix_remote(&parts, "rover", "rover-mount");

        assert_eq!(prefixed[0].name, "rover:base");
        assert_eq!(prefixed[0].frame.parent, "rover-mount");
        assert_eq!(prefixed[1].name, "rover:arm");
        assert_eq!(prefixed[1].frame.parent, "rover:base");
        // Originals untouched.
        assert_eq!(parts[0].name, "base");
    }
}
