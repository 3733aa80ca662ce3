//! Node entries: target identity and attributes
//!
//! The OS family attribute decides whether a delivered script needs a
//! permission grant before it can be invoked.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Node attribute naming the file copier provider
pub const FILE_COPIER_ATTRIBUTE: &str = "file-copier";
/// Node attribute naming the node executor provider
pub const NODE_EXECUTOR_ATTRIBUTE: &str = "node-executor";

/// OS family values that take the POSIX branch (compared case-insensitively)
const POSIX_FAMILIES: &[&str] = &[
    "unix", "linux", "darwin", "macos", "freebsd", "openbsd", "netbsd", "solaris", "aix",
];

/// OS family values that take the non-POSIX branch
const WINDOWS_FAMILIES: &[&str] = &["windows"];

/// Classified OS family of a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OsFamily {
    /// Needs `chmod +x` after delivery
    Posix,
    /// Runs the delivered file directly
    NonPosix,
}

impl OsFamily {
    /// Classify a raw attribute value.
    ///
    /// Returns `None` when the value is missing or unrecognized; callers
    /// fall back to their configured default.
    pub fn classify(raw: Option<&str>) -> Option<Self> {
        let raw = raw?.trim();
        if POSIX_FAMILIES.iter().any(|f| f.eq_ignore_ascii_case(raw)) {
            Some(OsFamily::Posix)
        } else if WINDOWS_FAMILIES.iter().any(|f| f.eq_ignore_ascii_case(raw)) {
            Some(OsFamily::NonPosix)
        } else {
            None
        }
    }
}

impl fmt::Display for OsFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OsFamily::Posix => write!(f, "posix"),
            OsFamily::NonPosix => write!(f, "non-posix"),
        }
    }
}

/// A described target for script execution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeEntry {
    /// Logical node name
    pub name: String,
    /// Hostname (may carry a `:port` suffix for remote transports)
    pub hostname: String,
    /// Raw OS family attribute, e.g. "unix" or "windows"
    #[serde(default, rename = "os-family", alias = "osFamily")]
    pub os_family: Option<String>,
    /// Arbitrary attributes, including provider-selection hints
    #[serde(default)]
    pub attributes: HashMap<String, String>,
}

impl NodeEntry {
    pub fn new(name: impl Into<String>, hostname: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            hostname: hostname.into(),
            os_family: None,
            attributes: HashMap::new(),
        }
    }

    /// The node describing the machine this process runs on
    pub fn local(name: impl Into<String>) -> Self {
        let family = if cfg!(windows) { "windows" } else { "unix" };
        Self::new(name, "localhost").with_os_family(family)
    }

    pub fn with_os_family(mut self, os_family: impl Into<String>) -> Self {
        self.os_family = Some(os_family.into());
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }

    /// Recognized OS family, `None` when missing or unrecognized
    pub fn os_family_kind(&self) -> Option<OsFamily> {
        OsFamily::classify(self.os_family.as_deref())
    }

    /// Provider name requested for file copies, if any
    pub fn file_copier_name(&self) -> Option<&str> {
        self.attribute(FILE_COPIER_ATTRIBUTE).filter(|s| !s.is_empty())
    }

    /// Provider name requested for command execution, if any
    pub fn node_executor_name(&self) -> Option<&str> {
        self.attribute(NODE_EXECUTOR_ATTRIBUTE).filter(|s| !s.is_empty())
    }
}

impl fmt::Display for NodeEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.name, self.hostname)
    }
}
