//! Walks input roots and collects the files the parser registry can read.

use globset::{Glob, GlobSet, GlobSetBuilder};
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;
use tokio::task;
use tracing::debug;
use walkdir::WalkDir;

use crate::error::PipelineError;
use crate::parser::ParserRegistry;

/// Files under `roots` with a supported extension, skipping hidden entries
/// and anything matching `excludes`. A root that is itself a file is
/// returned as is when supported. Sorted for stable batch order.
pub async fn collect_files(
    roots: &[PathBuf],
    excludes: &[String],
    registry: &ParserRegistry,
) -> Result<Vec<PathBuf>, PipelineError> {
    let (tx, mut rx) = mpsc::channel(100);
    let exclude_set = build_globset(excludes)?;
    let roots = roots.to_vec();

    let walker_handle = task::spawn_blocking(move || {
        for root in roots {
            for entry in WalkDir::new(&root)
                .follow_links(true)
                .into_iter()
                .filter_entry(|e| e.depth() == 0 || should_descend(e.path(), &exclude_set))
            {
                let entry = match entry {
                    Ok(e) => e,
                    Err(err) => {
                        debug!(error = %err, "skipping unreadable entry");
                        continue;
                    }
                };
                let path = entry.path();
                if !entry.file_type().is_file() || is_excluded(path, &exclude_set) {
                    continue;
                }
                if tx.blocking_send(path.to_path_buf()).is_err() {
                    // Receiver dropped, stop walking.
                    return;
                }
            }
        }
    });

    let mut files = Vec::new();
    while let Some(path) = rx.recv().await {
        let supported = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| registry.supports(e));
        if supported {
            files.push(path);
        }
    }
    walker_handle.await?;

    files.sort();
    debug!(count = files.len(), "collected input files");
    Ok(files)
}

fn build_globset(patterns: &[String]) -> Result<GlobSet, globset::Error> {
    let mut builder = GlobSetBuilder::new();
    for pat in patterns {
        builder.add(Glob::new(pat)?);
    }
    builder.build()
}

fn should_descend(path: &Path, excludes: &GlobSet) -> bool {
    !is_excluded(path, excludes) && !is_hidden(path)
}

fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|s| s.starts_with('.'))
        .unwrap_or(false)
}

fn is_excluded(path: &Path, excludes: &GlobSet) -> bool {
    excludes.is_match(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[tokio::test]
    async fn collects_supported_visible_files() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("nested")).unwrap();
        fs::create_dir_all(root.join(".cache")).unwrap();
        fs::create_dir_all(root.join("skip")).unwrap();
        fs::write(root.join("a.csv"), "x,y\n1,2\n").unwrap();
        fs::write(root.join("nested/b.md"), "# B\n").unwrap();
        fs::write(root.join("image.png"), [0u8; 4]).unwrap();
        fs::write(root.join(".hidden.txt"), "h").unwrap();
        fs::write(root.join(".cache/c.txt"), "c").unwrap();
        fs::write(root.join("skip/d.json"), "{}").unwrap();

        let files = collect_files(
            &[root.to_path_buf()],
            &["**/skip/**".to_string()],
            &ParserRegistry::with_builtin(),
        )
        .await
        .unwrap();

        let names: Vec<String> = files
            .iter()
            .map(|p| p.strip_prefix(root).unwrap().to_string_lossy().replace('\\', "/"))
            .collect();
        assert_eq!(names, vec!["a.csv", "nested/b.md"]);
    }

    #[tokio::test]
    async fn bad_glob_is_an_error() {
        let err = collect_files(&[], &["[".to_string()], &ParserRegistry::with_builtin()).await;
        assert!(matches!(err, Err(PipelineError::Glob(_))));
    }
}
