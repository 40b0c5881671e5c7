//! Mapping from file names to destination buckets
//!
//! The extension of a file name is everything from its last `.` onwards, separator included
//! (`report.PDF` -> `.PDF`, `archive.tar.gz` -> `.gz`). A name has no extension when it
//! contains no dot, when its only dot is the leading one (`.bashrc`) or when it ends with a
//! dot (`notes.`). The bucket is the extension with the separator stripped.

/// Classification policy shared by the scanner, the sorter and the extension summary.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Classifier {
    /// Lowercase buckets and extensions, so that `PDF` and `pdf` end up together
    pub fold_case: bool,
    /// Bucket for files without an extension; such files are skipped when `None`
    pub unclassified: Option<String>,
}

/// Extension of `name` including the leading separator, `None` if it has none.
#[must_use]
pub fn extension(name: &str) -> Option<&str> {
    match name.rfind('.') {
        Some(0) | None => None,
        Some(idx) if idx + 1 == name.len() => None,
        Some(idx) => Some(&name[idx..]),
    }
}

impl Classifier {
    #[must_use]
    pub fn new(fold_case: bool, unclassified: Option<String>) -> Self {
        Self {
            fold_case,
            unclassified,
        }
    }

    /// Extension as reported by the summary, with the case policy applied.
    #[must_use]
    pub fn extension(&self, name: &str) -> Option<String> {
        extension(name).map(|ext| self.apply_case(ext))
    }

    /// Bucket directory name for a file name.
    #[must_use]
    pub fn bucket(&self, name: &str) -> Option<String> {
        match extension(name) {
            Some(ext) => Some(self.apply_case(&ext[1..])),
            None => self.unclassified.clone(),
        }
    }

    /// Whether a file with this name takes part in a sort at all.
    #[must_use]
    pub fn is_classified(&self, name: &str) -> bool {
        extension(name).is_some() || self.unclassified.is_some()
    }

    fn apply_case(&self, value: &str) -> String {
        if self.fold_case {
            value.to_lowercase()
        } else {
            value.to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extension_is_taken_after_last_dot() {
        assert_eq!(extension("report.PDF"), Some(".PDF"));
        assert_eq!(extension("archive.tar.gz"), Some(".gz"));
        assert_eq!(extension("a.b"), Some(".b"));
    }

    #[test]
    fn names_without_extension() {
        assert_eq!(extension("Makefile"), None);
        assert_eq!(extension(".bashrc"), None);
        assert_eq!(extension("notes."), None);
        assert_eq!(extension(""), None);
        assert_eq!(extension("."), None);
    }

    #[test]
    fn hidden_file_with_extension() {
        assert_eq!(extension(".config.toml"), Some(".toml"));
    }

    #[test]
    fn bucket_strips_separator_and_keeps_case() {
        let classifier = Classifier::default();
        assert_eq!(classifier.bucket("report.PDF").as_deref(), Some("PDF"));
        assert_eq!(classifier.bucket("report.pdf").as_deref(), Some("pdf"));
        assert_eq!(classifier.bucket("archive.tar.gz").as_deref(), Some("gz"));
        assert_eq!(classifier.bucket("README"), None);
        assert!(!classifier.is_classified("README"));
        assert!(classifier.is_classified("a.TXT"));
    }

    #[test]
    fn fold_case_merges_buckets() {
        let classifier = Classifier::new(true, None);
        assert_eq!(classifier.bucket("a.TXT"), classifier.bucket("b.txt"));
        assert_eq!(classifier.extension("notes.PDF").as_deref(), Some(".pdf"));
    }

    #[test]
    fn unclassified_bucket_collects_dotless_names() {
        let classifier = Classifier::new(false, Some("no_extension".to_string()));
        assert!(classifier.is_classified("README"));
        assert_eq!(
            classifier.bucket("README").as_deref(),
            Some("no_extension")
        );
        assert_eq!(classifier.bucket(".bashrc").as_deref(), Some("no_extension"));
        // the summary only ever reports real extensions
        assert_eq!(classifier.extension("README"), None);
    }
}
