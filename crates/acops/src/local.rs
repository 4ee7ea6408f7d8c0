//! Tools that act on the local machine: directory listing, script execution
//! and project stack detection.

use anyhow::{bail, Context, Result};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    File,
    Directory,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DirEntryInfo {
    pub name: String,
    pub path: String,
    #[serde(rename = "type")]
    pub kind: EntryKind,
    pub size: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DirectoryListing {
    pub path: String,
    pub count: usize,
    pub items: Vec<DirEntryInfo>,
}

fn existing_dir(path: &Path) -> Result<PathBuf> {
    let canonical = fs::canonicalize(path)
        .with_context(|| format!("invalid path: {}", path.display()))?;
    if !canonical.is_dir() {
        bail!("path is not a directory: {}", canonical.display());
    }
    Ok(canonical)
}

/// Entries of `path`, sorted by path. Recursion descends into directories
/// but does not follow symlinks.
pub fn list_directory(path: &Path, recursive: bool) -> Result<DirectoryListing> {
    let root = existing_dir(path)?;
    let mut items = Vec::new();
    let mut pending = vec![root.clone()];

    while let Some(dir) = pending.pop() {
        let entries = fs::read_dir(&dir).with_context(|| format!("list {}", dir.display()))?;
        for entry in entries {
            let entry = entry.with_context(|| format!("read entry in {}", dir.display()))?;
            let meta = entry
                .metadata()
                .with_context(|| format!("stat {}", entry.path().display()))?;
            let kind = if meta.is_dir() {
                EntryKind::Directory
            } else {
                EntryKind::File
            };
            if recursive && kind == EntryKind::Directory && !meta.file_type().is_symlink() {
                pending.push(entry.path());
            }
            items.push(DirEntryInfo {
                name: entry.file_name().to_string_lossy().into_owned(),
                path: entry.path().display().to_string(),
                kind,
                size: if kind == EntryKind::File { meta.len() } else { 0 },
            });
        }
    }

    items.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(DirectoryListing {
        path: root.display().to_string(),
        count: items.len(),
        items,
    })
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScriptOutput {
    pub success: bool,
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

/// Runs `script` through `sh -c`, or as a whitespace-split argv when
/// `shell` is false. The child is killed when the timeout expires.
pub async fn run_shell_script(
    script: &str,
    working_directory: Option<&Path>,
    timeout_secs: u64,
    shell: bool,
) -> Result<ScriptOutput> {
    let mut cmd = if shell {
        let mut c = Command::new("sh");
        c.arg("-c").arg(script);
        c
    } else {
        let mut parts = script.split_whitespace();
        let Some(program) = parts.next() else {
            bail!("script is empty");
        };
        let mut c = Command::new(program);
        c.args(parts);
        c
    };
    if let Some(dir) = working_directory {
        cmd.current_dir(existing_dir(dir)?);
    }
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    debug!("running local script: {script}");
    let out = match tokio::time::timeout(Duration::from_secs(timeout_secs), cmd.output()).await {
        Ok(res) => res.with_context(|| format!("spawn script: {script}"))?,
        Err(_) => bail!("script exceeded timeout of {timeout_secs}s"),
    };

    let code = out.status.code();
    info!("local script finished with exit code {code:?}");
    Ok(ScriptOutput {
        success: out.status.success(),
        exit_code: code,
        stdout: String::from_utf8_lossy(&out.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&out.stderr).into_owned(),
    })
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StackReport {
    pub detected: bool,
    pub package_managers: Vec<String>,
    pub frameworks: Vec<String>,
    pub deployment_methods: Vec<String>,
    pub runtime_versions: BTreeMap<String, String>,
}

impl StackReport {
    fn add(&mut self, manager: &str, framework: Option<&str>, method: &str) {
        push_unique(&mut self.package_managers, manager);
        if let Some(f) = framework {
            push_unique(&mut self.frameworks, f);
        }
        push_unique(&mut self.deployment_methods, method);
    }

    fn version(&mut self, runtime: &str, version: &str) {
        let v = version.trim();
        if !v.is_empty() {
            self.runtime_versions
                .entry(runtime.to_string())
                .or_insert_with(|| v.to_string());
        }
    }
}

fn push_unique(list: &mut Vec<String>, value: &str) {
    if !list.iter().any(|v| v == value) {
        list.push(value.to_string());
    }
}

fn read_opt(dir: &Path, name: &str) -> Option<String> {
    fs::read_to_string(dir.join(name)).ok()
}

/// Detects the build and deployment stack of a project from marker files.
pub fn analyze_deploy_stack(directory: &Path) -> Result<StackReport> {
    let dir = existing_dir(directory)?;
    let mut report = StackReport::default();

    if let Some(text) = read_opt(&dir, "package.json") {
        report.add("npm", Some("nodejs"), "npm");
        let engines = serde_json::from_str::<serde_json::Value>(&text)
            .ok()
            .and_then(|v| v.pointer("/engines/node").and_then(|n| n.as_str()).map(str::to_string));
        if let Some(node) = engines {
            report.version("node", &node);
        }
    }
    if let Some(nvmrc) = read_opt(&dir, ".nvmrc") {
        report.version("node", &nvmrc);
    }
    if dir.join("requirements.txt").is_file() || dir.join("pyproject.toml").is_file() {
        report.add("pip", Some("python"), "python");
    }
    if let Some(v) = read_opt(&dir, ".python-version") {
        report.version("python", &v);
    }
    if dir.join("pom.xml").is_file() {
        report.add("maven", Some("java"), "java");
    }
    if dir.join("build.gradle").is_file() || dir.join("build.gradle.kts").is_file() {
        report.add("gradle", Some("java"), "java");
    }
    if let Some(gomod) = read_opt(&dir, "go.mod") {
        report.add("go", Some("go"), "go");
        if let Some(v) = gomod
            .lines()
            .find_map(|l| l.trim().strip_prefix("go "))
        {
            report.version("go", v);
        }
    }
    if dir.join("Dockerfile").is_file() {
        report.add("docker", None, "docker");
    }

    report.detected = !report.package_managers.is_empty();
    if !report.detected {
        report.deployment_methods.push("unknown".to_string());
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lists_flat_and_recursive() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.txt"), "hello").unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();
        fs::write(dir.path().join("sub/nested.txt"), "x").unwrap();

        let flat = list_directory(dir.path(), false).unwrap();
        assert_eq!(flat.count, 2);
        let a = flat.items.iter().find(|i| i.name == "a.txt").unwrap();
        assert_eq!((a.kind, a.size), (EntryKind::File, 5));

        let deep = list_directory(dir.path(), true).unwrap();
        assert_eq!(deep.count, 3);
        assert!(deep.items.iter().any(|i| i.name == "nested.txt"));

        let v = serde_json::to_value(&deep.items[0]).unwrap();
        assert!(v.get("type").is_some());
    }

    #[test]
    fn listing_rejects_files_and_missing_paths() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("f");
        fs::write(&file, "x").unwrap();
        let err = list_directory(&file, false).unwrap_err();
        assert!(err.to_string().contains("not a directory"));
        assert!(list_directory(&dir.path().join("missing"), false).is_err());
    }

    #[tokio::test]
    async fn runs_shell_and_argv_scripts() {
        let out = run_shell_script("echo \"hello world\"", None, 30, true).await.unwrap();
        assert!(out.success);
        assert_eq!(out.exit_code, Some(0));
        assert!(out.stdout.contains("hello world"));

        let out = run_shell_script("echo hello", None, 30, false).await.unwrap();
        assert!(out.stdout.contains("hello"));

        let out = run_shell_script("exit 1", None, 30, true).await.unwrap();
        assert!(!out.success);
        assert_eq!(out.exit_code, Some(1));
    }

    #[tokio::test]
    async fn script_working_directory() {
        let dir = tempfile::tempdir().unwrap();
        let out = run_shell_script("pwd", Some(dir.path()), 30, true).await.unwrap();
        let canonical = fs::canonicalize(dir.path()).unwrap();
        assert!(out.stdout.contains(&canonical.display().to_string()));

        let missing = dir.path().join("nope");
        assert!(run_shell_script("pwd", Some(&missing), 30, true).await.is_err());
    }

    #[tokio::test]
    async fn script_timeout_is_an_error() {
        let err = run_shell_script("sleep 5", None, 1, true).await.unwrap_err();
        assert!(err.to_string().contains("timeout"));
    }

    #[test]
    fn detects_node_with_engine_version() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("package.json"),
            r#"{"name":"t","engines":{"node":">=16"}}"#,
        )
        .unwrap();
        let r = analyze_deploy_stack(dir.path()).unwrap();
        assert!(r.detected);
        assert_eq!(r.package_managers, vec!["npm"]);
        assert_eq!(r.frameworks, vec!["nodejs"]);
        assert_eq!(r.runtime_versions["node"], ">=16");
    }

    #[test]
    fn detects_python_go_and_docker() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("requirements.txt"), "flask==2.0.0\n").unwrap();
        fs::write(dir.path().join(".python-version"), "3.10.0\n").unwrap();
        fs::write(dir.path().join("go.mod"), "module test\ngo 1.20\n").unwrap();
        fs::write(dir.path().join("Dockerfile"), "FROM python:3.9\n").unwrap();

        let r = analyze_deploy_stack(dir.path()).unwrap();
        assert_eq!(r.package_managers, vec!["pip", "go", "docker"]);
        assert_eq!(r.deployment_methods, vec!["python", "go", "docker"]);
        assert_eq!(r.runtime_versions["python"], "3.10.0");
        assert_eq!(r.runtime_versions["go"], "1.20");
    }

    #[test]
    fn java_builds_share_a_framework() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("pom.xml"), "<project/>").unwrap();
        fs::write(dir.path().join("build.gradle"), "").unwrap();
        let r = analyze_deploy_stack(dir.path()).unwrap();
        assert_eq!(r.package_managers, vec!["maven", "gradle"]);
        assert_eq!(r.frameworks, vec!["java"]);
    }

    #[test]
    fn empty_project_is_unknown() {
        let dir = tempfile::tempdir().unwrap();
        let r = analyze_deploy_stack(dir.path()).unwrap();
        assert!(!r.detected);
        assert_eq!(r.deployment_methods, vec!["unknown"]);
    }
}
