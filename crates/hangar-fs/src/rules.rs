use std::path::Path;

use ignore::gitignore::{Gitignore, GitignoreBuilder};

use crate::Result;

/// Gitignore-style exclusion rules rooted at the server directory.
#[derive(Clone, Debug)]
pub struct IgnoreRules {
    matcher: Gitignore,
}

impl IgnoreRules {
    pub fn new<S: AsRef<str>>(root: &Path, patterns: &[S]) -> Result<Self> {
        let mut builder = GitignoreBuilder::new(root);
        for pattern in patterns {
            builder.add_line(None, pattern.as_ref())?;
        }
        Ok(Self {
            matcher: builder.build()?,
        })
    }

    pub fn empty() -> Self {
        Self {
            matcher: Gitignore::empty(),
        }
    }

    pub fn is_empty(&self) -> bool { self.matcher.is_empty() }

    /// `relative` is the root-relative path; a match on any parent directory
    /// excludes everything below it.
    pub fn matches(&self, relative: &Path, is_dir: bool) -> bool {
        if self.matcher.is_empty() || relative.as_os_str().is_empty() {
            return false;
        }
        self.matcher
            .matched_path_or_any_parents(relative, is_dir)
            .is_ignore()
    }
}

impl Default for IgnoreRules {
    fn default() -> Self { Self::empty() }
}
