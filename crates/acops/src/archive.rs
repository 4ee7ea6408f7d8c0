use anyhow::{Context, Result};
use serde::Serialize;
use std::collections::BTreeSet;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ArchiveKind {
    None,
    Tar,
    Targz,
    Zip,
}

impl ArchiveKind {
    /// Kind is decided by file name suffix alone.
    pub fn from_file_name(name: &str) -> Self {
        let lower = name.to_lowercase();
        if lower.ends_with(".tar.gz") || lower.ends_with(".tgz") {
            ArchiveKind::Targz
        } else if lower.ends_with(".tar") {
            ArchiveKind::Tar
        } else if lower.ends_with(".zip") {
            ArchiveKind::Zip
        } else {
            ArchiveKind::None
        }
    }

    pub fn is_archive(self) -> bool {
        self != ArchiveKind::None
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeploymentArtifact {
    pub file_name: String,
    pub kind: ArchiveKind,
    pub members: Vec<String>,
    pub common_root_dir: Option<String>,
}

impl DeploymentArtifact {
    pub fn from_members(file_name: impl Into<String>, kind: ArchiveKind, members: Vec<String>) -> Self {
        let members: Vec<String> = members
            .iter()
            .map(|m| normalize_member(m))
            .filter(|m| !m.is_empty())
            .collect();
        let common_root_dir = common_root_dir(&members);
        Self {
            file_name: file_name.into(),
            kind,
            members,
            common_root_dir,
        }
    }

    /// File name with its archive suffix removed (`app.tar.gz` -> `app`).
    pub fn base_name(&self) -> String {
        let lower = self.file_name.to_lowercase();
        for suffix in [".tar.gz", ".tgz", ".tar", ".zip"] {
            if lower.ends_with(suffix) {
                return self.file_name[..self.file_name.len() - suffix.len()].to_string();
            }
        }
        match self.file_name.rsplit_once('.') {
            Some((stem, _)) if !stem.is_empty() => stem.to_string(),
            _ => self.file_name.clone(),
        }
    }

    /// Member path as seen after extracting and changing into the common root.
    pub fn relative_to_root<'a>(&self, member: &'a str) -> &'a str {
        match &self.common_root_dir {
            Some(root) => member
                .strip_prefix(root.as_str())
                .and_then(|rest| rest.strip_prefix('/'))
                .filter(|rest| !rest.is_empty())
                .unwrap_or(member),
            None => member,
        }
    }
}

/// Lists the artifact without extracting it.
///
/// Unreadable archives yield an empty member list instead of an error; only a
/// missing artifact is fatal.
pub async fn inspect(path: &Path) -> Result<DeploymentArtifact> {
    if !path.is_file() {
        anyhow::bail!("artifact does not exist: {}", path.display());
    }
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .with_context(|| format!("artifact path has no file name: {}", path.display()))?
        .to_string();

    let kind = ArchiveKind::from_file_name(&file_name);
    let listed = match kind {
        ArchiveKind::None => Ok(Vec::new()),
        ArchiveKind::Tar => File::open(path)
            .map_err(anyhow::Error::from)
            .and_then(list_tar),
        ArchiveKind::Targz => File::open(path)
            .map_err(anyhow::Error::from)
            .and_then(|f| list_tar(flate2::read::GzDecoder::new(f))),
        ArchiveKind::Zip => list_zip(path).await,
    };

    let members = match listed {
        Ok(m) => m,
        Err(e) => {
            warn!("failed to read archive {}: {e:#}", path.display());
            Vec::new()
        }
    };

    let artifact = DeploymentArtifact::from_members(file_name, kind, members);
    debug!(
        "inspected {}: kind={:?} members={} root={:?}",
        artifact.file_name,
        artifact.kind,
        artifact.members.len(),
        artifact.common_root_dir
    );
    Ok(artifact)
}

fn list_tar<R: Read>(reader: R) -> Result<Vec<String>> {
    let mut archive = tar::Archive::new(reader);
    let mut out = Vec::new();
    for entry in archive.entries().context("read tar entries")? {
        let entry = entry.context("read tar entry")?;
        let path = entry.path().context("decode tar entry path")?;
        out.push(path.to_string_lossy().into_owned());
    }
    Ok(out)
}

async fn list_zip(path: &Path) -> Result<Vec<String>> {
    let reader = async_zip::tokio::read::fs::ZipFileReader::new(path)
        .await
        .context("open zip")?;
    let mut out = Vec::new();
    for entry in reader.file().entries() {
        let name = entry.filename().as_str().context("decode zip entry name")?;
        out.push(name.to_string());
    }
    Ok(out)
}

fn normalize_member(member: &str) -> String {
    let mut m = member.trim();
    while let Some(rest) = m.strip_prefix("./") {
        m = rest;
    }
    m = m.trim_start_matches('/');
    if m == "." {
        return String::new();
    }
    m.to_string()
}

/// The single first path segment shared by every member, if there is one.
pub fn common_root_dir(members: &[String]) -> Option<String> {
    let firsts: BTreeSet<&str> = members
        .iter()
        .filter_map(|m| m.split('/').next())
        .filter(|s| !s.is_empty())
        .collect();
    if firsts.len() == 1 {
        firsts.into_iter().next().map(str::to_string)
    } else {
        None
    }
}
