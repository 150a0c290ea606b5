//! Simulation platform abstraction.
//!
//! The campaign only needs a handful of primitives from the platform's object
//! tree: search, create, activate/deactivate, attribute access, command
//! execution and project versioning. Two backends implement them:
//!
//! - [`MemoryPlatform`]: in-memory tree for tests and dry runs
//! - [`BridgePlatform`]: JSON-lines bridge to an external platform process

pub mod bridge;
pub mod memory;
pub mod session;

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::CampaignResult;

pub use bridge::BridgePlatform;
pub use memory::MemoryPlatform;
pub use session::{Activation, Session};

/// Opaque handle of an object in the platform's tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObjectHandle(pub u64);

impl fmt::Display for ObjectHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Attribute or argument value exchanged with the platform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Value {
    None,
    Int(i64),
    Float(f64),
    Text(String),
    Object(ObjectHandle),
}

impl Value {
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::Float(f) if f.fract() == 0.0 => Some(*f as i64),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<ObjectHandle> {
        match self {
            Value::Object(h) => Some(*h),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<ObjectHandle> for Value {
    fn from(v: ObjectHandle) -> Self {
        Value::Object(v)
    }
}

/// Well-known project folders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProjectFolder {
    /// Network data (`netdat`)
    #[serde(rename = "netdat")]
    NetworkData,
    /// Network model (`netmod`)
    #[serde(rename = "netmod")]
    NetworkModel,
    /// Variations (`scheme`)
    #[serde(rename = "scheme")]
    Variations,
    /// Study cases (`study`)
    #[serde(rename = "study")]
    StudyCases,
}

impl ProjectFolder {
    /// Folder type code used by the platform.
    pub fn code(self) -> &'static str {
        match self {
            Self::NetworkData => "netdat",
            Self::NetworkModel => "netmod",
            Self::Variations => "scheme",
            Self::StudyCases => "study",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "netdat" => Some(Self::NetworkData),
            "netmod" => Some(Self::NetworkModel),
            "scheme" => Some(Self::Variations),
            "study" => Some(Self::StudyCases),
            _ => None,
        }
    }
}

/// Primitives the campaign needs from a simulation platform.
///
/// Paths use the platform's `\`-separated `name.Class` syntax; a leading `\`
/// makes a path absolute, otherwise it is resolved below `scope`.
pub trait Platform {
    /// Currently active project.
    fn active_project(&mut self) -> CampaignResult<Option<ObjectHandle>>;

    /// Currently active study case.
    fn active_study_case(&mut self) -> CampaignResult<Option<ObjectHandle>>;

    /// Well-known folder of the active project.
    fn project_folder(&mut self, folder: ProjectFolder) -> CampaignResult<Option<ObjectHandle>>;

    /// Find an object by path.
    fn search(&mut self, scope: ObjectHandle, path: &str) -> CampaignResult<Option<ObjectHandle>>;

    /// Children of `parent` with the given class, optionally recursive.
    fn contents(
        &mut self,
        parent: ObjectHandle,
        class: &str,
        recursive: bool,
    ) -> CampaignResult<Vec<ObjectHandle>>;

    fn parent(&mut self, object: ObjectHandle) -> CampaignResult<Option<ObjectHandle>>;

    /// Absolute path of an object.
    fn full_name(&mut self, object: ObjectHandle) -> CampaignResult<String>;

    /// Whether a grid takes part in calculations.
    fn is_calc_relevant(&mut self, object: ObjectHandle) -> CampaignResult<bool>;

    fn create(&mut self, parent: ObjectHandle, class: &str, name: &str)
        -> CampaignResult<ObjectHandle>;

    /// Copy `source` below `parent`.
    fn copy_into(&mut self, parent: ObjectHandle, source: ObjectHandle)
        -> CampaignResult<ObjectHandle>;

    fn delete(&mut self, object: ObjectHandle) -> CampaignResult<()>;

    fn activate(&mut self, object: ObjectHandle) -> CampaignResult<()>;

    fn deactivate(&mut self, object: ObjectHandle) -> CampaignResult<()>;

    fn get_attribute(&mut self, object: ObjectHandle, name: &str) -> CampaignResult<Value>;

    fn set_attribute(&mut self, object: ObjectHandle, name: &str, value: Value)
        -> CampaignResult<()>;

    /// Call a method on an object (`Execute`, `AddVariable`...).
    fn execute(&mut self, object: ObjectHandle, method: &str, args: &[Value])
        -> CampaignResult<Value>;

    /// Object of `class` inside the active study case, created if missing.
    fn from_study_case(&mut self, class: &str) -> CampaignResult<Option<ObjectHandle>>;

    /// Create a named version (checkpoint) of the project.
    fn create_version(&mut self, project: ObjectHandle, name: &str) -> CampaignResult<()>;

    /// Persist pending changes.
    fn write_changes(&mut self) -> CampaignResult<()>;

    /// Switch the platform's output echo.
    fn set_echo(&mut self, on: bool) -> CampaignResult<()>;
}
