//! Project declarations: which secrets and files a project tracks.
//!
//! Declarations come from the project manifest, which is loaded outside this
//! crate. Here they are only data plus the required-entry checks.

use serde::{Deserialize, Serialize};

use crate::snapshot::Snapshot;

/// A secret declared in the project manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretDecl {
    /// Secret name.
    pub name: String,
    /// Whether every environment must provide a value.
    #[serde(default)]
    pub required: bool,
}

/// A tracked file declared in the project manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileDecl {
    /// Path relative to the project root.
    pub path: String,
    /// Whether every environment must provide content.
    #[serde(default)]
    pub required: bool,
}

/// All declarations of a project.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Declarations {
    /// Declared secrets.
    #[serde(default)]
    pub secrets: Vec<SecretDecl>,
    /// Declared tracked files.
    #[serde(default)]
    pub files: Vec<FileDecl>,
}

/// Required entries an environment does not provide.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MissingRequired {
    /// Required secret names with no value.
    pub secrets: Vec<String>,
    /// Required file paths with no content.
    pub files: Vec<String>,
}

impl MissingRequired {
    /// Whether nothing is missing.
    pub fn is_empty(&self) -> bool {
        self.secrets.is_empty() && self.files.is_empty()
    }
}

impl Declarations {
    /// Add a secret declaration.
    pub fn with_secret(mut self, name: &str, required: bool) -> Self {
        self.secrets.push(SecretDecl {
            name: name.to_string(),
            required,
        });
        self
    }

    /// Add a file declaration.
    pub fn with_file(mut self, path: &str, required: bool) -> Self {
        self.files.push(FileDecl {
            path: path.to_string(),
            required,
        });
        self
    }

    /// Whether a secret name is declared.
    pub fn declares_secret(&self, name: &str) -> bool {
        self.secrets.iter().any(|s| s.name == name)
    }

    /// Look up a file declaration.
    pub fn file(&self, path: &str) -> Option<&FileDecl> {
        self.files.iter().find(|f| f.path == path)
    }

    /// Required entries that `snapshot` lacks.
    ///
    /// An empty secret counts as missing; an empty file is present.
    pub fn missing_required(&self, snapshot: &Snapshot) -> MissingRequired {
        MissingRequired {
            secrets: self
                .secrets
                .iter()
                .filter(|s| s.required)
                .filter(|s| snapshot.secrets.get(&s.name).map_or(true, String::is_empty))
                .map(|s| s.name.clone())
                .collect(),
            files: self
                .files
                .iter()
                .filter(|f| f.required)
                .filter(|f| !snapshot.files.contains_key(&f.path))
                .map(|f| f.path.clone())
                .collect(),
        }
    }
}
