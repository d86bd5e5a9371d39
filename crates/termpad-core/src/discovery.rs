use crate::validator::{self, ValidationReport};
use anyhow::{Context as _, Result};
use ignore::WalkBuilder;
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};

pub const MANIFEST_FILE_NAME: &str = "plugin.json";

#[derive(Debug, Clone, PartialEq)]
pub struct DiscoveredManifest {
    pub path: PathBuf,
    pub manifest: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DiscoveredPlugin {
    pub path: PathBuf,
    pub report: ValidationReport,
}

pub fn find_manifest_paths(root: &Path) -> Result<Vec<PathBuf>> {
    if !root.is_dir() {
        anyhow::bail!("plugin root is not a directory: {}", root.display());
    }

    let mut builder = WalkBuilder::new(root);
    builder
        .hidden(true)
        .follow_links(false)
        .ignore(true)
        .git_ignore(true)
        .git_exclude(true)
        .git_global(false)
        .require_git(false);

    let mut paths = Vec::new();
    for result in builder.build() {
        let dent = match result {
            Ok(d) => d,
            Err(err) => {
                tracing::debug!("skipping unreadable entry: {err}");
                continue;
            }
        };
        if dent.file_type().is_some_and(|t| t.is_file())
            && dent.file_name() == MANIFEST_FILE_NAME
        {
            paths.push(dent.into_path());
        }
    }
    paths.sort();
    Ok(paths)
}

pub fn read_manifest(path: &Path) -> Result<Value> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("read manifest: {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parse manifest: {}", path.display()))
}

/// Loads every manifest under `root`. A file that is not valid JSON is kept
/// as `null`, which the validator then rejects.
pub fn load_manifests(root: &Path) -> Result<Vec<DiscoveredManifest>> {
    Ok(find_manifest_paths(root)?
        .into_iter()
        .map(|path| {
            let manifest = read_manifest(&path).unwrap_or_else(|err| {
                tracing::warn!(path = %path.display(), "unreadable manifest: {err:#}");
                Value::Null
            });
            DiscoveredManifest { path, manifest }
        })
        .collect())
}

pub fn validate_dir(root: &Path) -> Result<Vec<DiscoveredPlugin>> {
    let manifests = load_manifests(root)?;
    let reports = validator::validate_batch(manifests.iter().map(|m| (&m.manifest, None)));
    Ok(manifests
        .into_iter()
        .zip(reports)
        .map(|(m, report)| DiscoveredPlugin {
            path: m.path,
            report,
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_dir(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!(
            "termpad_core_discovery_test_{}_{}",
            name,
            std::process::id()
        ))
    }

    fn write(root: &Path, rel: &str, body: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().expect("parent")).expect("create dir");
        fs::write(path, body).expect("write file");
    }

    #[test]
    fn finds_manifests_and_validates_the_set() {
        let root = temp_dir("set");
        let _ = fs::remove_dir_all(&root);

        write(
            &root,
            "word-count/plugin.json",
            r#"{"id":"word-count","name":"Word Count","version":"1.0.0"}"#,
        );
        write(
            &root,
            "dup/plugin.json",
            r#"{"id":"word-count","name":"Copy","version":"1.0.0","dependencies":["missing"]}"#,
        );
        write(&root, "broken/plugin.json", "{ nope");
        write(&root, ".hidden/plugin.json", r#"{"id":"hidden"}"#);
        write(&root, "notes/readme.md", "not a manifest");

        let found = validate_dir(&root).expect("validate dir");
        let names: Vec<_> = found
            .iter()
            .map(|p| {
                p.path
                    .parent()
                    .and_then(Path::file_name)
                    .and_then(|n| n.to_str())
                    .unwrap_or_default()
                    .to_string()
            })
            .collect();
        assert_eq!(names, vec!["broken", "dup", "word-count"]);

        let broken = &found[0].report;
        assert!(!broken.valid);

        let dup = &found[1].report;
        assert!(dup.valid, "first declaration in walk order wins: {dup:?}");
        assert!(dup.warnings().any(|w| w.field == "dependencies"));

        let original = &found[2].report;
        assert!(original.has_error_on("id"));

        let _ = fs::remove_dir_all(&root);
    }

    #[test]
    fn missing_root_is_an_error() {
        let root = temp_dir("missing");
        let _ = fs::remove_dir_all(&root);
        assert!(find_manifest_paths(&root).is_err());
    }
}
