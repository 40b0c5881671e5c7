use anyhow::Context;

/// Creates the source tree most tests sort:
///
/// ```text
/// src
/// |- report.pdf
/// |- notes.PDF
/// |- data.csv
/// |- README            <- no extension
/// |- .bashrc           <- no extension
/// |- docs
///    |- a.TXT
///    |- b.txt
///    |- archive.tar.gz
///    |- deep
///       |- c.txt
///    |- link.txt -> ../data.csv
/// ```
///
/// Every regular file contains its own name followed by a newline.
pub fn setup_test_dir() -> anyhow::Result<tempfile::TempDir> {
    let tmp_dir = tempfile::tempdir()?;
    let src = tmp_dir.path().join("src");
    let docs = src.join("docs");
    let deep = docs.join("deep");
    std::fs::create_dir_all(&deep)?;
    for (dir, name) in [
        (&src, "report.pdf"),
        (&src, "notes.PDF"),
        (&src, "data.csv"),
        (&src, "README"),
        (&src, ".bashrc"),
        (&docs, "a.TXT"),
        (&docs, "b.txt"),
        (&docs, "archive.tar.gz"),
        (&deep, "c.txt"),
    ] {
        std::fs::write(dir.join(name), format!("{name}\n"))?;
    }
    std::os::unix::fs::symlink("../data.csv", docs.join("link.txt"))?;
    Ok(tmp_dir)
}

/// Names of the entries directly under `dir`, sorted.
pub fn list_dir(dir: &std::path::Path) -> anyhow::Result<Vec<String>> {
    let mut names = std::fs::read_dir(dir)
        .with_context(|| format!("cannot list {dir:?}"))?
        .map(|entry| Ok(entry?.file_name().to_string_lossy().into_owned()))
        .collect::<anyhow::Result<Vec<_>>>()?;
    names.sort();
    Ok(names)
}

/// Asserts that `dst` exists and has the same bytes as `src`.
pub fn check_same_content(src: &std::path::Path, dst: &std::path::Path) -> anyhow::Result<()> {
    let src_contents =
        std::fs::read(src).with_context(|| format!("Source file {src:?} is missing!"))?;
    let dst_contents =
        std::fs::read(dst).with_context(|| format!("Destination file {dst:?} is missing!"))?;
    assert_eq!(src_contents, dst_contents, "{src:?} and {dst:?} differ");
    Ok(())
}

/// Deterministic non-repeating payload, so chunk boundaries show up in comparisons.
pub fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}
