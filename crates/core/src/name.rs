//! Canonical identity for every resource the runtime tracks.
//!
//! A [`Name`] is `(Api, remote path, local name)`; an [`Api`] is
//! `(namespace, type, subtype)`; a [`Model`] picks the concrete driver for an
//! API. The fully-qualified wire form is
//! `"ns:type:subtype/[remote1:…:remoteK:]local"` and round-trips through
//! `Display` / `FromStr` byte-identical.

use std::fmt;
use std::str::FromStr;

use serde::de::{self, Deserializer, MapAccess, Visitor};
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Namespace owned by the runtime itself.
pub const DEFAULT_NAMESPACE: &str = "chassis";

/// Model family used when a bare model token is given.
pub const DEFAULT_MODEL_FAMILY: &str = "builtin";

/// Reserved local name for default services started by the runtime.
pub const BUILTIN_NAME: &str = "builtin";

/// Whether `segment` is a legal identifier segment (`[A-Za-z0-9_-]+`).
fn valid_segment(segment: &str) -> bool {
    !segment.is_empty()
        && segment
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
}

/// Validate one identifier segment, distinguishing the reserved `:`.
fn check_segment(segment: &str, what: &str) -> Result<()> {
    if segment.contains(':') {
        return Err(Error::ReservedCharacter {
            segment: segment.to_string(),
        });
    }
    if !valid_segment(segment) {
        return Err(Error::InvalidName {
            name: segment.to_string(),
            reason: format!("{what} must match [A-Za-z0-9_-]+"),
        });
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// ApiType
// ---------------------------------------------------------------------------

/// The two classes of resources the runtime manages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApiType {
    /// A physical or logical device (motor, camera, arm, …).
    Component,
    /// A higher-level capability built on components.
    Service,
}

impl fmt::Display for ApiType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Component => f.write_str("component"),
            Self::Service => f.write_str("service"),
        }
    }
}

impl FromStr for ApiType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "component" => Ok(Self::Component),
            "service" => Ok(Self::Service),
            other => Err(Error::InvalidName {
                name: other.to_string(),
                reason: "type must be \"component\" or \"service\"".to_string(),
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// Api
// ---------------------------------------------------------------------------

/// A `(namespace, type, subtype)` triple identifying a class of resources,
/// e.g. `chassis:component:motor`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Api {
    pub namespace: String,
    pub api_type: ApiType,
    pub subtype: String,
}

impl Api {
    /// Build an API from explicit parts. Not validated; call
    /// [`Api::validate`] before trusting external input.
    pub fn new(namespace: impl Into<String>, api_type: ApiType, subtype: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            api_type,
            subtype: subtype.into(),
        }
    }

    /// Shortcut for a component API in the default namespace.
    pub fn new_component(subtype: impl Into<String>) -> Self {
        Self::new(DEFAULT_NAMESPACE, ApiType::Component, subtype)
    }

    /// Shortcut for a service API in the default namespace.
    pub fn new_service(subtype: impl Into<String>) -> Self {
        Self::new(DEFAULT_NAMESPACE, ApiType::Service, subtype)
    }

    /// Check every segment against the identifier grammar.
    pub fn validate(&self) -> Result<()> {
        check_segment(&self.namespace, "namespace")?;
        check_segment(&self.subtype, "subtype")?;
        Ok(())
    }

    /// The reserved name used for a default service of this API.
    #[must_use]
    pub fn with_builtin_name(&self) -> Name {
        Name::new(self.clone(), BUILTIN_NAME)
    }
}

impl fmt::Display for Api {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.namespace, self.api_type, self.subtype)
    }
}

impl FromStr for Api {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let mut parts = s.split(':');
        match (parts.next(), parts.next(), parts.next(), parts.next()) {
            (Some(ns), Some(ty), Some(subtype), None) if !ns.is_empty() && !subtype.is_empty() => {
                Ok(Self::new(ns, ty.parse()?, subtype))
            }
            _ => Err(Error::InvalidName {
                name: s.to_string(),
                reason: "api must have the form namespace:type:subtype".to_string(),
            }),
        }
    }
}

impl Serialize for Api {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Api {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}

// ---------------------------------------------------------------------------
// Model
// ---------------------------------------------------------------------------

/// The concrete driver choice for an API, stringified as
/// `"namespace:family:name"`. A bare token decodes into the default
/// namespace and family.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Model {
    pub namespace: String,
    pub family: String,
    pub name: String,
}

impl Model {
    /// Build a model from explicit parts.
    pub fn new(
        namespace: impl Into<String>,
        family: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            family: family.into(),
            name: name.into(),
        }
    }

    /// A model in the default namespace and family.
    pub fn builtin(name: impl Into<String>) -> Self {
        Self::new(DEFAULT_NAMESPACE, DEFAULT_MODEL_FAMILY, name)
    }

    /// Check every segment against the identifier grammar.
    pub fn validate(&self) -> Result<()> {
        for (segment, what) in [
            (&self.namespace, "namespace"),
            (&self.family, "family"),
            (&self.name, "name"),
        ] {
            if segment.contains(':') {
                return Err(Error::ReservedCharacter {
                    segment: segment.clone(),
                });
            }
            if !valid_segment(segment) {
                return Err(Error::InvalidModel {
                    model: self.to_string(),
                    reason: format!("{what} must match [A-Za-z0-9_-]+"),
                });
            }
        }
        Ok(())
    }
}

impl fmt::Display for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.namespace, self.family, self.name)
    }
}

impl FromStr for Model {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        if s.is_empty() {
            return Err(Error::InvalidModel {
                model: s.to_string(),
                reason: "model must not be empty".to_string(),
            });
        }
        let parts: Vec<&str> = s.split(':').collect();
        match parts.as_slice() {
            [name] => Ok(Self::builtin(*name)),
            [ns, family, name] => Ok(Self::new(*ns, *family, *name)),
            _ => Err(Error::InvalidModel {
                model: s.to_string(),
                reason: "model must be a bare token or namespace:family:name".to_string(),
            }),
        }
    }
}

impl Serialize for Model {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Models decode from either the string form or the historical nested
/// object `{namespace, model_family, name}`.
impl<'de> Deserialize<'de> for Model {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        struct ModelVisitor;

        impl<'de> Visitor<'de> for ModelVisitor {
            type Value = Model;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a model string or {namespace, model_family, name} object")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> std::result::Result<Model, E> {
                v.parse().map_err(E::custom)
            }

            fn visit_map<A: MapAccess<'de>>(
                self,
                mut map: A,
            ) -> std::result::Result<Model, A::Error> {
                let mut namespace = None;
                let mut family = None;
                let mut name = None;
                while let Some(key) = map.next_key::<String>()? {
                    match key.as_str() {
                        "namespace" => namespace = Some(map.next_value::<String>()?),
                        "model_family" => family = Some(map.next_value::<String>()?),
                        "name" => name = Some(map.next_value::<String>()?),
                        _ => {
                            let _ = map.next_value::<de::IgnoredAny>()?;
                        }
                    }
                }
                Ok(Model::new(
                    namespace.unwrap_or_else(|| DEFAULT_NAMESPACE.to_string()),
                    family.unwrap_or_else(|| DEFAULT_MODEL_FAMILY.to_string()),
                    name.ok_or_else(|| de::Error::missing_field("name"))?,
                ))
            }
        }

        deserializer.deserialize_any(ModelVisitor)
    }
}

// ---------------------------------------------------------------------------
// ApiModel
// ---------------------------------------------------------------------------

/// Registry key: an `(Api, Model)` pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ApiModel {
    pub api: Api,
    pub model: Model,
}

impl ApiModel {
    pub fn new(api: Api, model: Model) -> Self {
        Self { api, model }
    }
}

impl fmt::Display for ApiModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.api, self.model)
    }
}

// ---------------------------------------------------------------------------
// Name
// ---------------------------------------------------------------------------

/// Canonical identity of one resource instance: an API, an optional chain of
/// remote prefixes, and a local name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Name {
    pub api: Api,
    /// Remote path, outermost first. Empty for local resources.
    pub remote: Vec<String>,
    /// The local name within its (possibly remote) runtime.
    pub name: String,
}

impl Name {
    /// A local name with no remote path.
    pub fn new(api: Api, name: impl Into<String>) -> Self {
        Self {
            api,
            remote: Vec::new(),
            name: name.into(),
        }
    }

    /// A name reached through the given remote path.
    pub fn with_remote(
        api: Api,
        remote: impl IntoIterator<Item = impl Into<String>>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            api,
            remote: remote.into_iter().map(Into::into).collect(),
            name: name.into(),
        }
    }

    /// Whether this name traverses at least one remote.
    #[must_use]
    pub fn is_remote(&self) -> bool {
        !self.remote.is_empty()
    }

    /// The remote-qualified short form, `"remote1:remote2:local"`.
    #[must_use]
    pub fn short_name(&self) -> String {
        if self.remote.is_empty() {
            self.name.clone()
        } else {
            let mut s = self.remote.join(":");
            s.push(':');
            s.push_str(&self.name);
            s
        }
    }

    /// The bare local name with every remote prefix stripped.
    #[must_use]
    pub fn shortest_name(&self) -> String {
        self.name.clone()
    }

    /// A copy of this name with `remote` prepended to the remote path.
    /// The original is left untouched.
    #[must_use]
    pub fn prepend_remote(&self, remote: impl Into<String>) -> Self {
        let mut out = self.clone();
        out.remote.insert(0, remote.into());
        out
    }

    /// A copy of this name with the outermost remote removed. Popping a
    /// local name is a no-op copy.
    #[must_use]
    pub fn pop_remote(&self) -> Self {
        let mut out = self.clone();
        if !out.remote.is_empty() {
            out.remote.remove(0);
        }
        out
    }

    /// Check the API, every remote segment, and the local name against the
    /// identifier grammar. An empty local name parses but never validates.
    pub fn validate(&self) -> Result<()> {
        self.api.validate()?;
        for remote in &self.remote {
            check_segment(remote, "remote")?;
        }
        check_segment(&self.name, "name")
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.api, self.short_name())
    }
}

impl FromStr for Name {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let Some((api_part, path)) = s.split_once('/') else {
            return Err(Error::InvalidName {
                name: s.to_string(),
                reason: "name must have the form api/[remotes:]local".to_string(),
            });
        };
        let api: Api = api_part.parse()?;
        let mut segments: Vec<&str> = path.split(':').collect();
        // The last segment is the local name; everything before it is the
        // remote path. An empty local name is representable (and rejected
        // later by validate()).
        let local = segments.pop().unwrap_or_default();
        Ok(Self::with_remote(api, segments, local))
    }
}

impl Serialize for Name {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Name {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}
