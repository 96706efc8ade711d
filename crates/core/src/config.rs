//! Configuration data model consumed by the reconfigurator.
//!
//! A [`RuntimeConfig`] is the structured document describing the desired
//! machine: components, services, remotes, and host processes. Each
//! component or service entry is a [`ResourceConfig`]. Configuration is
//! declarative — the reconfigurator diffs two of these and mutates the
//! resource graph to match.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::name::{Api, Model, Name};

/// Free-form attribute payload attached to a resource entry.
pub type AttributeMap = serde_json::Map<String, Value>;

/// The distinguished framesystem root.
pub const WORLD_FRAME: &str = "world";

// ---------------------------------------------------------------------------
// Frame configuration
// ---------------------------------------------------------------------------

/// Static translation offset, in millimeters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TranslationConfig {
    #[serde(default)]
    pub x: f64,
    #[serde(default)]
    pub y: f64,
    #[serde(default)]
    pub z: f64,
}

/// Orientation as a unit quaternion. Defaults to identity.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OrientationConfig {
    pub w: f64,
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Default for OrientationConfig {
    fn default() -> Self {
        Self {
            w: 1.0,
            x: 0.0,
            y: 0.0,
            z: 0.0,
        }
    }
}

/// Where a resource sits in the frame system: its parent frame and the
/// static offset from it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameConfig {
    pub parent: String,
    #[serde(default)]
    pub translation: TranslationConfig,
    #[serde(default)]
    pub orientation: OrientationConfig,
    /// Optional collision geometry, kept opaque for the kinematics layer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub geometry: Option<Value>,
}

// ---------------------------------------------------------------------------
// Resource configuration
// ---------------------------------------------------------------------------

/// Configuration payload another resource's config can attach to this one,
/// interpreted by the adapter registered for `api`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssociatedResourceConfig {
    pub api: Api,
    #[serde(default)]
    pub attributes: AttributeMap,
}

/// One component or service entry in the runtime configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceConfig {
    pub name: String,
    pub api: Api,
    pub model: Model,
    #[serde(default)]
    pub attributes: AttributeMap,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frame: Option<FrameConfig>,
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub associated_resource_configs: Vec<AssociatedResourceConfig>,
}

impl ResourceConfig {
    /// Minimal entry with empty attributes.
    pub fn new(api: Api, model: Model, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            api,
            model,
            attributes: AttributeMap::new(),
            frame: None,
            depends_on: Vec::new(),
            associated_resource_configs: Vec::new(),
        }
    }

    /// The canonical name this entry configures.
    #[must_use]
    pub fn resource_name(&self) -> Name {
        Name::new(self.api.clone(), self.name.clone())
    }

    /// Declared plus implied dependency names. A frame parented on anything
    /// but the world is an implied dependency on that parent.
    #[must_use]
    pub fn dependencies(&self) -> Vec<String> {
        let mut deps = self.depends_on.clone();
        if let Some(implied) = self.implied_dependency()
            && !deps.contains(&implied)
        {
            deps.push(implied);
        }
        deps
    }

    fn implied_dependency(&self) -> Option<String> {
        self.frame
            .as_ref()
            .map(|f| f.parent.clone())
            .filter(|p| !p.is_empty() && p != WORLD_FRAME)
    }

    /// Validate the entry. Returns the implied dependencies on success so
    /// callers can resolve them without re-deriving.
    pub fn validate(&self) -> Result<Vec<String>> {
        if self.name.is_empty() {
            return Err(Error::configuration("resource entry has an empty name"));
        }
        self.resource_name().validate()?;
        self.model.validate()?;
        for dep in &self.depends_on {
            if dep.is_empty() {
                return Err(Error::configuration(format!(
                    "resource \"{}\" declares an empty dependency",
                    self.name
                )));
            }
        }
        Ok(self.implied_dependency().into_iter().collect())
    }
}

// ---------------------------------------------------------------------------
// Remotes and processes
// ---------------------------------------------------------------------------

/// A federated sub-runtime whose resources appear here with a name prefix.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteConfig {
    pub name: String,
    pub address: String,
    /// Where the remote's world mounts into the local frame system.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frame: Option<FrameConfig>,
}

/// A host process managed alongside the machine. Processes are diffed and
/// reported but are not graph resources; supervision is the host's job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessConfig {
    pub id: String,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub one_shot: bool,
}

// ---------------------------------------------------------------------------
// Runtime configuration
// ---------------------------------------------------------------------------

/// The full desired state handed to the reconfigurator.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Opaque revision label stamped onto every node this config touches.
    #[serde(default)]
    pub revision: String,
    #[serde(default)]
    pub components: Vec<ResourceConfig>,
    #[serde(default)]
    pub services: Vec<ResourceConfig>,
    #[serde(default)]
    pub remotes: Vec<RemoteConfig>,
    #[serde(default)]
    pub processes: Vec<ProcessConfig>,
}

impl RuntimeConfig {
    /// All component and service entries, components first.
    #[must_use]
    pub fn resource_configs(&self) -> Vec<&ResourceConfig> {
        self.components.iter().chain(self.services.iter()).collect()
    }

    /// Validate every entry, collecting all failures rather than stopping
    /// at the first.
    pub fn validate(&self) -> Result<()> {
        let mut problems = Vec::new();
        for cfg in self.resource_configs() {
            if let Err(err) = cfg.validate() {
                problems.push(format!("{}: {err}", cfg.name));
            }
        }
        for remote in &self.remotes {
            if remote.name.is_empty() || remote.name.contains(':') {
                problems.push(format!("remote \"{}\": invalid name", remote.name));
            }
        }
        for proc in &self.processes {
            if proc.id.is_empty() {
                problems.push("process entry has an empty id".to_string());
            }
        }
        let mut seen = std::collections::HashSet::new();
        for cfg in self.resource_configs() {
            if !seen.insert(cfg.resource_name()) {
                problems.push(format!("duplicate resource name \"{}\"", cfg.name));
            }
        }
        if problems.is_empty() {
            Ok(())
        } else {
            Err(Error::configuration(problems.join("; ")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn motor(name: &str) -> ResourceConfig {
        ResourceConfig::new(Api::new_component("motor"), Model::builtin("fake"), name)
    }

    #[test]
    fn resource_name_combines_api_and_local() {
        let cfg = motor("m1");
        assert_eq!(cfg.resource_name().to_string(), "chassis:component:motor/m1");
    }

    #[test]
    fn frame_parent_is_an_implied_dependency() {
        let mut cfg = motor("m1");
        cfg.frame = Some(FrameConfig {
            parent: "arm1".to_string(),
            translation: TranslationConfig::default(),
            orientation: OrientationConfig::default(),
            geometry: None,
        });
        assert_eq!(cfg.dependencies(), vec!["arm1".to_string()]);
        assert_eq!(cfg.validate().unwrap(), vec!["arm1".to_string()]);
    }

    #[test]
    fn world_frame_parent_implies_nothing() {
        let mut cfg = motor("m1");
        cfg.frame = Some(FrameConfig {
            parent: WORLD_FRAME.to_string(),
            translation: TranslationConfig::default(),
            orientation: OrientationConfig::default(),
            geometry: None,
        });
        assert!(cfg.dependencies().is_empty());
    }

    #[test]
    fn explicit_dep_not_duplicated_by_frame() {
        let mut cfg = motor("m1");
        cfg.depends_on = vec!["arm1".to_string()];
        cfg.frame = Some(FrameConfig {
            parent: "arm1".to_string(),
            translation: TranslationConfig::default(),
            orientation: OrientationConfig::default(),
            geometry: None,
        });
        assert_eq!(cfg.dependencies(), vec!["arm1".to_string()]);
    }

    #[test]
    fn validate_collects_every_problem() {
        let config = RuntimeConfig {
            components: vec![motor(""), motor("ok"), motor("ok")],
            ..RuntimeConfig::default()
        };
        let err = config.validate().unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("empty name"));
        assert!(msg.contains("duplicate resource name"));
    }

    #[test]
    fn validate_rejects_reserved_character_in_names() {
        let config = RuntimeConfig {
            components: vec![motor("bad:name")],
            ..RuntimeConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn config_json_round_trip() {
        let raw = r#"{
            "components": [{
                "name": "m1",
                "api": "chassis:component:motor",
                "model": "fake",
                "attributes": {"max_rpm": 600},
                "frame": {"parent": "world", "translation": {"x": 1.0, "y": 0.0, "z": 0.0}}
            }],
            "services": [],
            "remotes": [{"name": "rover", "address": "rover.local:8080"}],
            "processes": [{"id": "telemetry", "command": "telemetryd"}]
        }"#;
        let config: RuntimeConfig = serde_json::from_str(raw).unwrap();
        assert_eq!(config.components.len(), 1);
        assert_eq!(config.components[0].model, Model::builtin("fake"));
        assert_eq!(config.remotes[0].name, "rover");
        assert!(!config.processes[0].one_shot);
        config.validate().unwrap();

        let back: RuntimeConfig =
            serde_json::from_str(&serde_json::to_string(&config).unwrap()).unwrap();
        assert_eq!(back, config);
    }

    #[test]
    fn structural_equality_tracks_attributes() {
        let mut a = motor("m1");
        let b = motor("m1");
        assert_eq!(a, b);
        a.attributes.insert("max_rpm".to_string(), 600.into());
        assert_ne!(a, b);
    }
}
