//! Input resolution: turn a user-supplied path into the list of PDFs to process.
//!
//! A path to a file yields that single document; a directory yields every
//! `*.pdf` directly inside it (case-insensitive extension, not recursive),
//! sorted by file name so reruns visit documents in the same order.
//!
//! [`check_pdf_file`] validates existence, read permission and the `%PDF`
//! magic bytes before pdfium ever sees the file, so callers get a
//! `DocumentUnreadable` with a meaningful reason instead of a pdfium crash.

use crate::error::PipelineError;
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Resolve a file or directory argument to an ordered list of PDF paths.
pub async fn resolve_documents(input: &Path) -> Result<Vec<PathBuf>, PipelineError> {
    let meta = tokio::fs::metadata(input)
        .await
        .map_err(|e| PipelineError::SourceDirUnreadable {
            path: input.to_path_buf(),
            source: e,
        })?;

    if meta.is_file() {
        return Ok(vec![input.to_path_buf()]);
    }

    let mut entries =
        tokio::fs::read_dir(input)
            .await
            .map_err(|e| PipelineError::SourceDirUnreadable {
                path: input.to_path_buf(),
                source: e,
            })?;

    let mut docs = Vec::new();
    while let Some(entry) =
        entries
            .next_entry()
            .await
            .map_err(|e| PipelineError::SourceDirUnreadable {
                path: input.to_path_buf(),
                source: e,
            })?
    {
        let path = entry.path();
        let is_file = entry.file_type().await.map(|t| t.is_file()).unwrap_or(false);
        if is_file && is_pdf_name(&path) {
            docs.push(path);
        }
    }
    docs.sort();
    debug!("Found {} PDF(s) in {}", docs.len(), input.display());
    Ok(docs)
}

/// Whether the file name carries a `.pdf` extension.
pub fn is_pdf_name(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("pdf"))
}

/// Validate existence, readability and PDF magic bytes.
pub fn check_pdf_file(path: &Path) -> Result<(), PipelineError> {
    let unreadable = |detail: String| PipelineError::DocumentUnreadable {
        path: path.to_path_buf(),
        detail,
    };

    if !path.exists() {
        return Err(unreadable("file not found".into()));
    }

    match std::fs::File::open(path) {
        Ok(mut f) => {
            let mut magic = [0u8; 4];
            match f.read_exact(&mut magic) {
                Ok(()) if &magic == b"%PDF" => Ok(()),
                Ok(()) => Err(unreadable(format!("not a PDF (first bytes: {magic:?})"))),
                Err(_) => Err(unreadable("file is empty or truncated".into())),
            }
        }
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            Err(unreadable("permission denied".into()))
        }
        Err(e) => Err(unreadable(e.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pdf_extension_is_case_insensitive() {
        assert!(is_pdf_name(Path::new("a.pdf")));
        assert!(is_pdf_name(Path::new("dir/B.PDF")));
        assert!(!is_pdf_name(Path::new("notes.txt")));
        assert!(!is_pdf_name(Path::new("pdf")));
    }

    #[tokio::test]
    async fn directory_listing_is_sorted_and_filtered() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["c.pdf", "a.pdf", "b.txt", "B.PDF"] {
            std::fs::write(dir.path().join(name), b"%PDF-1.7").unwrap();
        }
        std::fs::create_dir(dir.path().join("nested.pdf")).unwrap();

        let docs = resolve_documents(dir.path()).await.unwrap();
        let names: Vec<_> = docs
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["B.PDF", "a.pdf", "c.pdf"]);
    }

    #[tokio::test]
    async fn single_file_input() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("only.pdf");
        std::fs::write(&file, b"%PDF-1.4").unwrap();
        assert_eq!(resolve_documents(&file).await.unwrap(), vec![file]);
    }

    #[tokio::test]
    async fn missing_input_is_an_error() {
        let err = resolve_documents(Path::new("/definitely/not/here"))
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::SourceDirUnreadable { .. }));
    }

    #[test]
    fn magic_bytes_are_checked() {
        let dir = tempfile::tempdir().unwrap();
        let good = dir.path().join("good.pdf");
        let bad = dir.path().join("bad.pdf");
        let empty = dir.path().join("empty.pdf");
        std::fs::write(&good, b"%PDF-1.7\n").unwrap();
        std::fs::write(&bad, b"<html>").unwrap();
        std::fs::write(&empty, b"").unwrap();

        assert!(check_pdf_file(&good).is_ok());
        let err = check_pdf_file(&bad).unwrap_err();
        assert!(err.to_string().contains("not a PDF"), "got: {err}");
        assert!(check_pdf_file(&empty).is_err());
        assert!(check_pdf_file(&dir.path().join("missing.pdf")).is_err());
    }
}
