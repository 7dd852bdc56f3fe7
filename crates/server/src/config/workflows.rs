use serde::Deserialize;

/// Where workflow definitions are loaded from.
#[derive(Debug, Default, Deserialize)]
pub struct WorkflowsConfig {
    /// Directory of YAML or JSON workflow definitions. Without one the
    /// server starts with no workflows and `/v1/workflows/reload` fails.
    pub directory: Option<String>,
    /// Reload definitions when files in `directory` change.
    #[serde(default)]
    pub watch: bool,
}

/// Seed for the in-memory user and record directory.
#[derive(Debug, Default, Deserialize)]
pub struct DirectoryConfig {
    /// Path to a JSON document with `users`, `policies`, `commissions` and
    /// `phaseProgress` arrays.
    pub seed_path: Option<String>,
}
