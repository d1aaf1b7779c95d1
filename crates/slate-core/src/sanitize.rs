//! Error text redaction
//!
//! Only ever applied to stderr-derived text. Program stdout is returned
//! byte-for-byte.

use crate::{Result, SlateError};
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::Path;

/// Prefix of every per-unit private directory
pub const WORKDIR_PREFIX: &str = "slate-";

static OS_ERROR_CODE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\[(?:Errno|WinError) -?\d+\]|\(os error -?\d+\)")
        .expect("os error pattern is valid")
});

const GENERIC_MARKER: &str = "[Error]";

#[derive(Debug, Clone)]
pub struct Sanitizer {
    placeholder: String,
    /// Matches any unit directory under the work root, not just the current one
    foreign_workdir: Regex,
}

impl Sanitizer {
    /// Fails only when the work root makes the directory pattern too large
    pub fn new(placeholder: impl Into<String>, work_root: &Path) -> Result<Self> {
        let roots = path_forms(work_root)
            .iter()
            .map(|root| regex::escape(root.trim_end_matches('/')))
            .collect::<Vec<_>>()
            .join("|");
        let pattern = format!("(?:{roots})/{}[A-Za-z0-9_]+", regex::escape(WORKDIR_PREFIX));
        let foreign_workdir = Regex::new(&pattern).map_err(|e| {
            SlateError::Config(format!(
                "work root {} cannot be redacted: {e}",
                work_root.display()
            ))
        })?;
        Ok(Self {
            placeholder: placeholder.into(),
            foreign_workdir,
        })
    }

    /// Redact host paths and OS error codes from `raw`
    ///
    /// `workdir` is the private directory of the unit that produced the text.
    #[must_use]
    pub fn sanitize(&self, raw: &str, workdir: Option<&Path>) -> String {
        let mut text = raw.to_owned();

        if let Some(dir) = workdir {
            for form in path_forms(dir) {
                if !form.is_empty() && text.contains(form.as_str()) {
                    text = text.replace(form.as_str(), &self.placeholder);
                }
            }
        }

        let text = self
            .foreign_workdir
            .replace_all(&text, regex::NoExpand(&self.placeholder));
        OS_ERROR_CODE
            .replace_all(&text, GENERIC_MARKER)
            .into_owned()
    }
}

/// The path as given and, when different, as resolved (e.g. `/tmp` symlinks)
fn path_forms(dir: &Path) -> Vec<String> {
    let given = dir.to_string_lossy().into_owned();
    let mut forms = vec![given];
    if let Ok(resolved) = dir.canonicalize() {
        let resolved = resolved.to_string_lossy().into_owned();
        if resolved != forms[0] {
            // Longest first so a prefix form never splits a longer one.
            forms.push(resolved);
            forms.sort_by_key(|f| std::cmp::Reverse(f.len()));
        }
    }
    forms
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sanitizer() -> Sanitizer {
        Sanitizer::new("<sandbox>", Path::new("/tmp")).unwrap()
    }

    #[test]
    fn replaces_unit_directory() {
        let dir = Path::new("/srv/units/abc");
        let raw = "Traceback (most recent call last):\n  File \"/srv/units/abc/main.py\", line 1, in <module>\nNameError: name 'x' is not defined\n";
        let clean = sanitizer().sanitize(raw, Some(dir));
        assert!(!clean.contains("/srv/units/abc"));
        assert!(clean.contains("File \"<sandbox>/main.py\", line 1"));
        assert!(clean.ends_with("NameError: name 'x' is not defined\n"));
    }

    #[test]
    fn replaces_other_unit_directories() {
        let raw = "see /tmp/slate-Xy12_ab/data.txt";
        assert_eq!(sanitizer().sanitize(raw, None), "see <sandbox>/data.txt");
    }

    #[test]
    fn replaces_os_error_codes() {
        let raw = "FileNotFoundError: [Errno 2] No such file or directory: 'x.txt'";
        assert_eq!(
            sanitizer().sanitize(raw, None),
            "FileNotFoundError: [Error] No such file or directory: 'x.txt'"
        );
        assert_eq!(
            sanitizer().sanitize("denied (os error 13)", None),
            "denied [Error]"
        );
    }

    #[test]
    fn leaves_unrelated_text_alone() {
        let raw = "ZeroDivisionError: division by zero";
        assert_eq!(sanitizer().sanitize(raw, None), raw);
    }

    #[test]
    fn placeholder_is_literal() {
        let sanitizer = Sanitizer::new("$0", Path::new("/tmp")).unwrap();
        assert_eq!(sanitizer.sanitize("/tmp/slate-a1/x", None), "$0/x");
    }

    #[test]
    fn resolves_symlinked_directories() {
        let dir = tempfile::Builder::new()
            .prefix(WORKDIR_PREFIX)
            .tempdir()
            .unwrap();
        let resolved = dir.path().canonicalize().unwrap();
        let raw = format!("File \"{}/main.py\"", resolved.display());
        let clean = sanitizer().sanitize(&raw, Some(dir.path()));
        assert_eq!(clean, "File \"<sandbox>/main.py\"");
    }

    #[test]
    fn oversized_work_root_is_a_config_error() {
        let root = format!("/{}", "a".repeat(1 << 22));
        let err = Sanitizer::new("<sandbox>", Path::new(&root)).unwrap_err();
        assert!(matches!(err, SlateError::Config(_)));
    }
}
