use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Files whose presence marks a directory as a project root.
pub const PROJECT_INDICATORS: &[&str] = &[
    "package.json",
    "pom.xml",
    "requirements.txt",
    "go.mod",
    "Cargo.toml",
    ".git",
];

const MAX_ASCENT: usize = 5;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectLayout {
    pub root: PathBuf,
}

impl ProjectLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn code_deploy_dir(&self) -> PathBuf {
        self.root.join(".code_deploy")
    }
    pub fn release_dir(&self) -> PathBuf {
        self.code_deploy_dir().join("release")
    }
    pub fn application_json(&self) -> PathBuf {
        self.code_deploy_dir().join("application.json")
    }
}

/// Walks up from `start` (at most five parents) looking for a project indicator.
pub fn discover_project_root(start: &Path) -> Option<PathBuf> {
    let mut cur = Some(start);
    let mut depth = 0;
    while let Some(p) = cur {
        if depth > MAX_ASCENT {
            break;
        }
        if PROJECT_INDICATORS.iter().any(|i| p.join(i).exists()) {
            return Some(p.to_path_buf());
        }
        cur = p.parent();
        depth += 1;
    }
    None
}

/// Explicit project path wins; otherwise discover from the artifact's
/// directory, falling back to that directory itself.
pub fn resolve_layout(project_override: Option<&Path>, artifact: &Path) -> Result<ProjectLayout> {
    if let Some(p) = project_override {
        return Ok(ProjectLayout::new(p));
    }
    let artifact = if artifact.is_absolute() {
        artifact.to_path_buf()
    } else {
        std::env::current_dir()
            .context("get current working directory")?
            .join(artifact)
    };
    let dir = artifact
        .parent()
        .map(Path::to_path_buf)
        .with_context(|| format!("artifact has no parent directory: {}", artifact.display()))?;

    let root = discover_project_root(&dir).unwrap_or_else(|| {
        debug!("no project indicator above {}, using it as root", dir.display());
        dir.clone()
    });
    Ok(ProjectLayout::new(root))
}

/// Layout for read-only queries: explicit path, else the working directory.
pub fn load_layout(project_override: Option<PathBuf>) -> Result<ProjectLayout> {
    let root = match project_override {
        Some(p) => p,
        None => {
            let cwd = std::env::current_dir().context("get current working directory")?;
            discover_project_root(&cwd).unwrap_or(cwd)
        }
    };
    Ok(ProjectLayout { root })
}

/// Copies the artifact into the release directory unless it already lives there.
pub fn stage_artifact(layout: &ProjectLayout, artifact: &Path) -> Result<PathBuf> {
    let release = layout.release_dir();
    fs::create_dir_all(&release).with_context(|| format!("create {}", release.display()))?;

    let name = artifact
        .file_name()
        .with_context(|| format!("artifact path has no file name: {}", artifact.display()))?;
    let dest = release.join(name);

    let same = match (fs::canonicalize(artifact), fs::canonicalize(&dest)) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    };
    if !same {
        fs::copy(artifact, &dest)
            .with_context(|| format!("copy {} -> {}", artifact.display(), dest.display()))?;
        info!("staged {} into {}", artifact.display(), release.display());
    }
    Ok(dest)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn discovers_nearest_indicator() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("svc");
        let nested = root.join("target").join("dist");
        fs::create_dir_all(&nested).unwrap();
        fs::write(root.join("pom.xml"), "<project/>").unwrap();

        assert_eq!(discover_project_root(&nested), Some(root));
    }

    #[test]
    fn ascent_is_bounded() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("go.mod"), "module x\n").unwrap();
        let deep = dir.path().join("a/b/c/d/e/f/g");
        fs::create_dir_all(&deep).unwrap();

        assert_eq!(discover_project_root(&deep), None);
    }

    #[test]
    fn resolve_layout_falls_back_to_artifact_dir() {
        let dir = tempfile::tempdir().unwrap();
        let artifact = dir.path().join("app.jar");
        fs::write(&artifact, "jar").unwrap();

        let layout = resolve_layout(None, &artifact).unwrap();
        // tempdirs can sit under a directory carrying an indicator; only
        // assert the root is an ancestor of the artifact.
        assert!(artifact.starts_with(&layout.root));

        let explicit = resolve_layout(Some(Path::new("/srv/app")), &artifact).unwrap();
        assert_eq!(explicit.root, PathBuf::from("/srv/app"));
        assert_eq!(
            explicit.application_json(),
            PathBuf::from("/srv/app/.code_deploy/application.json")
        );
    }

    #[test]
    fn staging_copies_once() {
        let dir = tempfile::tempdir().unwrap();
        let layout = ProjectLayout::new(dir.path());
        let artifact = dir.path().join("app.tar.gz");
        fs::write(&artifact, "payload").unwrap();

        let staged = stage_artifact(&layout, &artifact).unwrap();
        assert_eq!(staged, layout.release_dir().join("app.tar.gz"));
        assert_eq!(fs::read_to_string(&staged).unwrap(), "payload");

        let again = stage_artifact(&layout, &staged).unwrap();
        assert_eq!(again, staged);
        assert_eq!(fs::read_to_string(&again).unwrap(), "payload");
    }
}
