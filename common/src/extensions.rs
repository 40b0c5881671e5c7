//! Read-only listing of the extensions present in a tree

use std::collections::BTreeSet;
use std::path::Path;

use tracing::instrument;

use crate::classify::Classifier;
use crate::scan::{ScanError, Scanner};

/// Distinct extensions of the regular files under `root`, in byte order.
///
/// Files without an extension are not listed, even when the classifier sends them to an
/// unclassified bucket.
#[instrument(skip(classifier))]
pub async fn read_dir(root: &Path, classifier: Classifier) -> Result<BTreeSet<String>, ScanError> {
    let mut scanner = Scanner::new(root, classifier.clone()).await?;
    let mut extensions = BTreeSet::new();
    while let Some(file) = scanner.next().await? {
        if let Some(extension) = classifier.extension(&file.name_lossy()) {
            extensions.insert(extension);
        }
    }
    tracing::debug!("found {} distinct extensions", extensions.len());
    Ok(extensions)
}

#[must_use]
pub fn format_list(extensions: &BTreeSet<String>) -> String {
    extensions
        .iter()
        .map(String::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutils;
    use tracing_test::traced_test;

    #[tokio::test]
    #[traced_test]
    async fn lists_extensions_case_sensitively() -> Result<(), anyhow::Error> {
        let tmp_dir = tempfile::tempdir()?;
        for name in ["report.pdf", "notes.PDF", "data.csv"] {
            std::fs::write(tmp_dir.path().join(name), name)?;
        }
        let extensions = read_dir(tmp_dir.path(), Classifier::default()).await?;
        assert_eq!(format_list(&extensions), ".PDF, .csv, .pdf");
        Ok(())
    }

    #[tokio::test]
    #[traced_test]
    async fn walks_subdirectories_without_writing() -> Result<(), anyhow::Error> {
        let tmp_dir = testutils::setup_test_dir()?;
        let src = tmp_dir.path().join("src");
        let before = testutils::list_dir(tmp_dir.path())?;
        let extensions = read_dir(&src, Classifier::new(false, Some("other".into()))).await?;
        assert_eq!(
            format_list(&extensions),
            ".PDF, .TXT, .csv, .gz, .pdf, .txt"
        );
        assert_eq!(testutils::list_dir(tmp_dir.path())?, before);
        Ok(())
    }

    #[tokio::test]
    #[traced_test]
    async fn folded_extensions_merge() -> Result<(), anyhow::Error> {
        let tmp_dir = testutils::setup_test_dir()?;
        let extensions =
            read_dir(&tmp_dir.path().join("src"), Classifier::new(true, None)).await?;
        assert_eq!(format_list(&extensions), ".csv, .gz, .pdf, .txt");
        Ok(())
    }

    #[tokio::test]
    #[traced_test]
    async fn empty_tree_lists_nothing() -> Result<(), anyhow::Error> {
        let tmp_dir = tempfile::tempdir()?;
        let extensions = read_dir(tmp_dir.path(), Classifier::default()).await?;
        assert!(extensions.is_empty());
        assert_eq!(format_list(&extensions), "");
        Ok(())
    }

    #[tokio::test]
    #[traced_test]
    async fn missing_root_is_an_error() -> Result<(), anyhow::Error> {
        let tmp_dir = tempfile::tempdir()?;
        assert!(
            read_dir(&tmp_dir.path().join("missing"), Classifier::default())
                .await
                .is_err()
        );
        Ok(())
    }
}
