//! Directory convention: `<base>/<profile>/` holds incoming files and
//! `<base>/<profile>/<stage>/` holds files by lifecycle stage.

use std::{
    ffi::{OsStr, OsString},
    fmt, io,
    path::{Path, PathBuf},
};

use tracing::{debug, warn};

use crate::types::{Profile, ResultState};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Incoming,
    Pending,
    Malicious,
    Benign,
    Unknown,
}

impl Stage {
    pub const SUBDIRS: [Stage; 4] = [
        Stage::Pending,
        Stage::Malicious,
        Stage::Benign,
        Stage::Unknown,
    ];
}

impl From<ResultState> for Stage {
    fn from(state: ResultState) -> Self {
        match state {
            ResultState::Pending => Stage::Pending,
            ResultState::Malicious => Stage::Malicious,
            ResultState::Benign => Stage::Benign,
            ResultState::Unknown => Stage::Unknown,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Stage::Incoming => "incoming",
            Stage::Pending => "pending",
            Stage::Malicious => "malicious",
            Stage::Benign => "benign",
            Stage::Unknown => "unknown",
        };
        f.write_str(label)
    }
}

/// Sub-directory names for each non-incoming stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageDirs {
    pub pending: String,
    pub malicious: String,
    pub benign: String,
    pub unknown: String,
}

impl Default for StageDirs {
    fn default() -> Self {
        Self {
            pending: "Pending".to_string(),
            malicious: "Malicious".to_string(),
            benign: "Benign".to_string(),
            unknown: "Unknown".to_string(),
        }
    }
}

impl StageDirs {
    fn name(&self, stage: Stage) -> Option<&str> {
        match stage {
            Stage::Incoming => None,
            Stage::Pending => Some(&self.pending),
            Stage::Malicious => Some(&self.malicious),
            Stage::Benign => Some(&self.benign),
            Stage::Unknown => Some(&self.unknown),
        }
    }
}

/// A file waiting in a profile's incoming directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub path: PathBuf,
    pub profile: Profile,
}

#[derive(Debug, Clone)]
pub struct DirectoryLayout {
    base_dir: PathBuf,
    profiles: Vec<Profile>,
    stage_dirs: StageDirs,
}

impl DirectoryLayout {
    pub fn new(
        base_dir: impl Into<PathBuf>,
        profiles: Vec<Profile>,
        stage_dirs: StageDirs,
    ) -> Self {
        Self {
            base_dir: base_dir.into(),
            profiles,
            stage_dirs,
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn profiles(&self) -> &[Profile] {
        &self.profiles
    }

    pub fn profile_dir(&self, profile: &Profile) -> PathBuf {
        self.base_dir.join(profile.as_str())
    }

    pub fn stage_dir(&self, profile: &Profile, stage: Stage) -> PathBuf {
        let profile_dir = self.profile_dir(profile);
        match self.stage_dirs.name(stage) {
            Some(name) => profile_dir.join(name),
            None => profile_dir,
        }
    }

    /// Every directory the layout expects to exist, profiles first.
    pub fn all_dirs(&self) -> Vec<PathBuf> {
        let per_profile = Stage::SUBDIRS.len() + 1;
        let mut dirs = Vec::with_capacity(self.profiles.len() * per_profile);
        for profile in &self.profiles {
            dirs.push(self.profile_dir(profile));
            for stage in Stage::SUBDIRS {
                dirs.push(self.stage_dir(profile, stage));
            }
        }
        dirs
    }

    /// Lists regular files in every incoming directory. Profiles are visited
    /// in configuration order and files sorted by name so a sweep is
    /// reproducible.
    pub async fn discover(&self) -> io::Result<Vec<Candidate>> {
        let mut candidates = Vec::new();
        for profile in &self.profiles {
            let dir = self.profile_dir(profile);
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(err) if err.kind() == io::ErrorKind::NotFound => {
                    warn!(
                        profile = %profile,
                        dir = %dir.display(),
                        "incoming directory missing; run setup"
                    );
                    continue;
                }
                Err(err) => return Err(err),
            };

            let mut files = Vec::new();
            while let Some(entry) = entries.next_entry().await? {
                if entry.file_type().await?.is_file() {
                    files.push(entry.path());
                }
            }
            files.sort();
            debug!(
                profile = %profile,
                count = files.len(),
                "discovered incoming files"
            );

            candidates.extend(files.into_iter().map(|path| Candidate {
                path,
                profile: profile.clone(),
            }));
        }
        Ok(candidates)
    }
}

/// Where `path` lands when moved into `dir` under its own name.
pub fn destination_in(path: &Path, dir: &Path) -> io::Result<PathBuf> {
    Ok(dir.join(file_name_of(path)?))
}

/// Moves `path` into `dir`, keeping its file name. Never replaces a file
/// already there: a taken name fails with `AlreadyExists`.
pub async fn move_into(path: &Path, dir: &Path) -> io::Result<PathBuf> {
    let destination = destination_in(path, dir)?;
    if tokio::fs::try_exists(&destination).await? {
        return Err(io::Error::new(
            io::ErrorKind::AlreadyExists,
            format!("{} already exists", destination.display()),
        ));
    }
    tokio::fs::rename(path, &destination).await?;
    Ok(destination)
}

/// Like [`move_into`], but a taken name is resolved by storing the file as
/// `<stem>.<tag>.<ext>`, then `<stem>.<tag>.<n>.<ext>`.
pub async fn move_into_unique(
    path: &Path,
    dir: &Path,
    tag: &str,
) -> io::Result<PathBuf> {
    let name = Path::new(file_name_of(path)?);
    let mut destination = dir.join(name);
    let mut attempt = 0u32;
    while tokio::fs::try_exists(&destination).await? {
        destination = dir.join(tagged_name(name, tag, attempt));
        attempt += 1;
    }
    tokio::fs::rename(path, &destination).await?;
    Ok(destination)
}

fn file_name_of(path: &Path) -> io::Result<&OsStr> {
    path.file_name().ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("{} has no file name", path.display()),
        )
    })
}

fn tagged_name(name: &Path, tag: &str, attempt: u32) -> OsString {
    let mut tagged = name
        .file_stem()
        .map(OsStr::to_os_string)
        .unwrap_or_default();
    tagged.push(".");
    tagged.push(tag.replace(['/', '\\'], "_"));
    if attempt > 0 {
        tagged.push(format!(".{attempt}"));
    }
    if let Some(extension) = name.extension() {
        tagged.push(".");
        tagged.push(extension);
    }
    tagged
}
