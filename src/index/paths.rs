//! Resolution of configured source directories.

use crate::error::{ServiceError, ServiceResult};
use crate::index::types::SourcePathEntry;
use crate::utils::app_data::expand_home;
use std::path::{Path, PathBuf};

/// Turns user-entered directory strings into existence-checked entries.
///
/// Relative inputs are joined onto `base`. Only read-only filesystem
/// checks are performed.
#[derive(Debug, Clone)]
pub struct PathResolver {
    base: PathBuf,
}

impl PathResolver {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    /// Resolver anchored at the process working directory
    pub fn from_current_dir() -> Self {
        Self::new(std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")))
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    /// Resolve every non-blank input; an invalid entry never fails the batch
    pub fn resolve<S: AsRef<str>>(&self, inputs: &[S]) -> Vec<SourcePathEntry> {
        inputs
            .iter()
            .map(AsRef::as_ref)
            .filter(|input| !input.trim().is_empty())
            .map(|input| self.resolve_one(input))
            .collect()
    }

    fn resolve_one(&self, input: &str) -> SourcePathEntry {
        let candidate = self.normalize(input);
        let resolved = candidate
            .canonicalize()
            .ok()
            .filter(|p| p.is_dir())
            .map(|p| p.to_string_lossy().into_owned());

        SourcePathEntry {
            input: input.to_string(),
            exists: resolved.is_some(),
            resolved,
        }
    }

    /// Absolute form of `input`, for handing a path to another process
    pub fn anchor(&self, input: &str) -> String {
        self.normalize(input).to_string_lossy().into_owned()
    }

    /// Expand `~`, unify separators and anchor relative paths at the base
    fn normalize(&self, input: &str) -> PathBuf {
        let unified = input.trim().replace('\\', "/");
        let expanded = expand_home(&unified);
        if expanded.is_absolute() {
            expanded
        } else {
            self.base.join(expanded)
        }
    }
}

/// Check user-entered paths before they are stored
pub fn validate_inputs<S: AsRef<str>>(inputs: &[S]) -> ServiceResult<Vec<String>> {
    let mut cleaned = Vec::with_capacity(inputs.len());
    for input in inputs {
        let input = input.as_ref();
        if input.contains('\0') {
            return Err(ServiceError::Validation(format!(
                "source path contains a NUL byte: {:?}",
                input
            )));
        }
        let trimmed = input.trim();
        if !trimmed.is_empty() {
            cleaned.push(trimmed.to_string());
        }
    }
    Ok(cleaned)
}
