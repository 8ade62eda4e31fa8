use serde::Deserialize;

/// Per-server filesystem settings as they appear in the daemon configuration.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct FilesystemConfig {
    /// Maximum bytes the server may hold; zero or less disables the limit.
    pub disk_limit: i64,
    /// Gitignore-style patterns excluded from extraction.
    pub ignore: Vec<String>,
    /// Usage already on disk when the filesystem is mounted.
    pub initial_usage: i64,
}

impl FilesystemConfig {
    pub fn new() -> Self { Self::default() }

    pub fn disk_limit(mut self, bytes: i64) -> Self {
        self.disk_limit = bytes;
        self
    }

    pub fn ignore(mut self, pattern: impl Into<String>) -> Self {
        self.ignore.push(pattern.into());
        self
    }

    pub fn initial_usage(mut self, bytes: i64) -> Self {
        self.initial_usage = bytes;
        self
    }
}
