use crate::archive::{ArchiveKind, DeploymentArtifact};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fmt;
use std::str::FromStr;
use tracing::{debug, info};

pub const APP_LOG: &str = "/root/app.log";

const PYTHON_PREFERRED: &[&str] = &["main.py", "app.py", "run.py", "server.py", "application.py"];
const JS_PREFERRED: &[&str] = &["index.js", "app.js", "server.js", "main.js"];
const BINARY_NAMES: &[&str] = &["app", "main", "server", "application"];
const NON_BINARY_NAMES: &[&str] = &[
    "readme",
    "license",
    "makefile",
    "dockerfile",
    "changelog",
    "contributing",
    "authors",
    "version",
    "manifest",
    "config",
    "gitignore",
    "dockerignore",
    "editorconfig",
    "env",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Runtime {
    Docker,
    Java,
    Python,
    Nodejs,
    Golang,
    Nginx,
    Git,
}

impl Runtime {
    pub const ALL: [Runtime; 7] = [
        Runtime::Docker,
        Runtime::Java,
        Runtime::Python,
        Runtime::Nodejs,
        Runtime::Golang,
        Runtime::Nginx,
        Runtime::Git,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Runtime::Docker => "docker",
            Runtime::Java => "java",
            Runtime::Python => "python",
            Runtime::Nodejs => "nodejs",
            Runtime::Golang => "golang",
            Runtime::Nginx => "nginx",
            Runtime::Git => "git",
        }
    }

    /// Orchestration extension package installed on new application groups.
    pub fn extension_package(self) -> &'static str {
        match self {
            Runtime::Docker => "ACS-Extension-DockerCE-1853370294850618",
            Runtime::Java => "ACS-Extension-java-1853370294850618",
            Runtime::Python => "ACS-Extension-python-1853370294850618",
            Runtime::Nodejs => "ACS-Extension-node-1853370294850618",
            Runtime::Golang => "ACS-Extension-golang-1853370294850618",
            Runtime::Nginx => "ACS-Extension-nginx-1853370294850618",
            Runtime::Git => "ACS-Extension-Git-1853370294850618",
        }
    }
}

impl fmt::Display for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Runtime {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_lowercase();
        Runtime::ALL
            .into_iter()
            .find(|r| r.as_str() == lower)
            .ok_or_else(|| {
                let known: Vec<&str> = Runtime::ALL.iter().map(|r| r.as_str()).collect();
                format!("unknown runtime `{s}` (expected one of: {})", known.join(", "))
            })
    }
}

/// Member paths of an artifact sorted into the buckets the start rules look at.
/// Paths are relative to the directory the start command runs in.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExecutablesIndex {
    pub jar_files: Vec<String>,
    pub python_files: Vec<String>,
    pub js_files: Vec<String>,
    pub shell_scripts: Vec<String>,
    pub package_json: Option<String>,
    pub requirements_txt: Option<String>,
    pub dockerfile: Option<String>,
    pub binary_candidates: Vec<String>,
}

impl ExecutablesIndex {
    pub fn build(artifact: &DeploymentArtifact, runtime: Option<Runtime>) -> Self {
        let mut idx = ExecutablesIndex::default();

        // a plain file is its own single member
        let members: Vec<&str> = if artifact.kind.is_archive() {
            artifact.members.iter().map(String::as_str).collect()
        } else {
            vec![artifact.file_name.as_str()]
        };

        for member in members {
            if member.ends_with('/') {
                continue;
            }
            let path = artifact.relative_to_root(member).to_string();
            let base = basename(&path).to_lowercase();
            if base.is_empty() {
                continue;
            }

            if base.ends_with(".jar") {
                idx.jar_files.push(path);
            } else if base.ends_with(".py") {
                idx.python_files.push(path);
            } else if base == "package.json" {
                idx.package_json.get_or_insert(path);
            } else if base.ends_with(".js") {
                idx.js_files.push(path);
            } else if base.ends_with(".sh") {
                idx.shell_scripts.push(path);
            } else if base == "requirements.txt" {
                idx.requirements_txt.get_or_insert(path);
            } else if base == "dockerfile" {
                idx.dockerfile.get_or_insert(path);
            } else if runtime == Some(Runtime::Golang) && is_binary_candidate(&base) {
                idx.binary_candidates.push(path);
            }
        }
        idx
    }
}

fn basename(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

fn is_binary_candidate(lower_base: &str) -> bool {
    let has_extension = lower_base.contains('.') && !lower_base.starts_with('.');
    let stem = lower_base.trim_start_matches('.');
    !has_extension && !NON_BINARY_NAMES.contains(&stem)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandPair {
    pub start: String,
    pub stop: String,
}

/// Outcome of synthesis. `start` is absent when no rule matched and the
/// caller must supply one; `stop` is always produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Synthesis {
    pub start: Option<String>,
    pub stop: String,
    pub index: ExecutablesIndex,
}

impl Synthesis {
    pub fn into_pair(self) -> Option<CommandPair> {
        let stop = self.stop;
        self.start.map(|start| CommandPair { start, stop })
    }
}

pub fn synthesize(
    artifact: &DeploymentArtifact,
    runtime: Option<Runtime>,
    app_name: &str,
    port: Option<u16>,
) -> Synthesis {
    let index = ExecutablesIndex::build(artifact, runtime);
    let start = synthesize_start(artifact, &index, runtime, app_name, port);
    let stop = synthesize_stop(runtime, app_name);
    match &start {
        Some(cmd) => info!("synthesized start command: {cmd}"),
        None => info!(
            "no start rule for runtime {} and artifact {}",
            runtime.map(Runtime::as_str).unwrap_or("unknown"),
            artifact.file_name
        ),
    }
    Synthesis { start, stop, index }
}

/// Full start command: guarded extraction and `cd` for archives, then the
/// runtime entrypoint.
pub fn synthesize_start(
    artifact: &DeploymentArtifact,
    index: &ExecutablesIndex,
    runtime: Option<Runtime>,
    app_name: &str,
    port: Option<u16>,
) -> Option<String> {
    let entry = entry_command(artifact, index, runtime?, app_name, port)?;
    debug!("entrypoint command: {entry}");

    let Some(extract) = extract_command(artifact) else {
        return Some(entry);
    };
    Some(match &artifact.common_root_dir {
        Some(root) => {
            let root = shell_quote(root);
            format!("{extract} && [ -d {root} ] && cd {root} || exit 1 && {entry}")
        }
        None => format!("{extract} && {entry}"),
    })
}

fn extract_command(artifact: &DeploymentArtifact) -> Option<String> {
    let f = shell_quote(&artifact.file_name);
    let tool = match artifact.kind {
        ArchiveKind::None => return None,
        ArchiveKind::Targz => format!("tar -xzf {f}"),
        ArchiveKind::Tar => format!("tar -xf {f}"),
        ArchiveKind::Zip => format!("unzip -o {f}"),
    };
    Some(format!("[ -f {f} ] && {tool} || exit 1"))
}

fn entry_command(
    artifact: &DeploymentArtifact,
    index: &ExecutablesIndex,
    runtime: Runtime,
    app_name: &str,
    port: Option<u16>,
) -> Option<String> {
    match runtime {
        Runtime::Java => {
            let jar = shell_quote(index.jar_files.first().map(String::as_str).unwrap_or("app.jar"));
            Some(format!("[ -f {jar} ] && nohup java -jar {jar} > {APP_LOG} 2>&1 &"))
        }
        Runtime::Python => {
            let py = shell_quote(prefer(&index.python_files, PYTHON_PREFERRED).unwrap_or("app.py"));
            Some(format!("[ -f {py} ] && nohup python {py} > {APP_LOG} 2>&1 &"))
        }
        Runtime::Nodejs => {
            if index.package_json.is_some() {
                let npm = "command -v npm >/dev/null 2>&1 && [ -f package.json ] && npm install";
                let script = index
                    .shell_scripts
                    .iter()
                    .find(|s| basename(s).to_lowercase().contains("start"));
                Some(match script.map(|s| shell_quote(s)) {
                    Some(s) => format!(
                        "{npm} && [ -f {s} ] && chmod +x {s} && nohup ./{s} > {APP_LOG} 2>&1 &"
                    ),
                    None => format!("{npm} && nohup npm start > {APP_LOG} 2>&1 &"),
                })
            } else {
                let js = shell_quote(prefer(&index.js_files, JS_PREFERRED)?);
                Some(format!("[ -f {js} ] && nohup node {js} > {APP_LOG} 2>&1 &"))
            }
        }
        Runtime::Golang => {
            let bin = find_binary(&index.binary_candidates)
                .map(str::to_string)
                .unwrap_or_else(|| artifact.base_name());
            let bin = shell_quote(&bin);
            Some(format!(
                "[ -f {bin} ] && chmod +x {bin} && nohup ./{bin} > {APP_LOG} 2>&1 &"
            ))
        }
        Runtime::Docker => {
            index.dockerfile.as_ref()?;
            let name = container_name(app_name);
            let ports = port.map(|p| format!("-p {p}:{p} ")).unwrap_or_default();
            Some(format!(
                "command -v docker >/dev/null 2>&1 && \
                 docker stop {name} 2>/dev/null || true && \
                 docker rm {name} 2>/dev/null || true && \
                 [ -f Dockerfile ] && docker build -t {name}:latest . && \
                 docker run -d --name {name} {ports}{name}:latest"
            ))
        }
        Runtime::Nginx | Runtime::Git => None,
    }
}

/// Single-quotes `s` unless it only holds characters the shell reads literally.
fn shell_quote(s: &str) -> Cow<'_, str> {
    let plain = !s.is_empty()
        && s
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "._-/+:@%=,".contains(c));
    if plain {
        Cow::Borrowed(s)
    } else {
        Cow::Owned(format!("'{}'", s.replace('\'', r"'\''")))
    }
}

/// First file whose basename matches the preference list, in list order;
/// otherwise the first file.
fn prefer<'a>(files: &'a [String], preferred: &[&str]) -> Option<&'a str> {
    preferred
        .iter()
        .find_map(|want| files.iter().find(|f| basename(f) == *want))
        .or_else(|| files.first())
        .map(String::as_str)
}

fn find_binary(candidates: &[String]) -> Option<&str> {
    BINARY_NAMES
        .iter()
        .find_map(|name| candidates.iter().find(|c| basename(c) == *name))
        .or_else(|| {
            BINARY_NAMES
                .iter()
                .find_map(|name| candidates.iter().find(|c| basename(c).starts_with(name)))
        })
        .map(String::as_str)
}

/// Image and container name: lower-cased, spaces and underscores become `-`.
pub fn container_name(app_name: &str) -> String {
    let name = if app_name.trim().is_empty() { "app" } else { app_name };
    name.to_lowercase().replace([' ', '_'], "-")
}

pub fn synthesize_stop(runtime: Option<Runtime>, app_name: &str) -> String {
    match runtime {
        Some(Runtime::Java) => "pkill -f 'java -jar' || true".to_string(),
        Some(Runtime::Python) => r"pkill -f 'python.*\.py' || true".to_string(),
        Some(Runtime::Nodejs) => r"pkill -f 'node.*\.js' || pkill -f 'npm start' || true".to_string(),
        Some(Runtime::Golang) => {
            "pkill -f './app' || pkill -f './main' || pkill -f './server' || true".to_string()
        }
        Some(Runtime::Docker) => {
            let name = container_name(app_name);
            format!("docker stop {name} 2>/dev/null || true && docker rm {name} 2>/dev/null || true")
        }
        _ => "pkill -f 'app' || true".to_string(),
    }
}
