//! Build-input classification for targets.

mod classifier;

pub use classifier::{classify, enumerate_contents};

use std::path::PathBuf;

use crate::tools_version::ToolsVersion;

/// How a declared resource is treated at build time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceRule {
    /// Processed into the resource bundle; destinations are flattened
    Process {
        localization: Option<ResourceLocalization>,
    },
    /// Copied verbatim under its own name
    Copy,
    /// Embedded into the compiled code
    EmbedInCode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceLocalization {
    /// The resource supplies the default language
    Default,
    /// The resource is base-internationalized
    Base,
}

/// A resource declaration from the manifest, rooted at the target.
#[derive(Debug, Clone)]
pub struct ResourceDescription {
    pub rule: ResourceRule,
    pub path: PathBuf,
}

/// Everything the classifier needs to know about one target.
#[derive(Debug, Clone)]
pub struct TargetDescription {
    pub name: String,
    pub root: PathBuf,
    pub excludes: Vec<PathBuf>,
    pub sources: Option<Vec<PathBuf>>,
    pub resources: Vec<ResourceDescription>,
    pub public_headers_path: Option<PathBuf>,
    pub default_localization: Option<String>,
    pub tools_version: ToolsVersion,
    /// Local packages warn about invalid excludes; remote packages stay
    /// silent.
    pub is_local: bool,
}

impl TargetDescription {
    pub fn new(name: impl Into<String>, root: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            root: root.into(),
            excludes: Vec::new(),
            sources: None,
            resources: Vec::new(),
            public_headers_path: None,
            default_localization: None,
            tools_version: ToolsVersion::CURRENT,
            is_local: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
    Info,
}

#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub severity: Severity,
    pub message: String,
}

impl Diagnostic {
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Error,
            message: message.into(),
        }
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            message: message.into(),
        }
    }

    pub fn info(message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Info,
            message: message.into(),
        }
    }
}

/// A classified resource with its localization, as written on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassifiedResource {
    pub path: PathBuf,
    pub rule: ResourceRule,
    pub localization: Option<String>,
}

/// The four disjoint classification buckets plus diagnostics. Buckets are
/// sorted lexicographically.
#[derive(Debug, Default)]
pub struct ClassifiedSources {
    pub sources: Vec<PathBuf>,
    pub resources: Vec<ClassifiedResource>,
    pub headers: Vec<PathBuf>,
    pub others: Vec<PathBuf>,
    pub diagnostics: Vec<Diagnostic>,
}

impl ClassifiedSources {
    pub fn has_errors(&self) -> bool {
        self.diagnostics
            .iter()
            .any(|d| d.severity == Severity::Error)
    }

    pub fn errors(&self) -> impl Iterator<Item = &Diagnostic> {
        self.diagnostics
            .iter()
            .filter(|d| d.severity == Severity::Error)
    }
}
