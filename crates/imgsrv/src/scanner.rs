//! Filesystem scanner and classifier.
//!
//! Walks the image tree and classifies every regular file (and symlink) into
//! an [`Image`] record using the per-driver rules compiled from config. Each
//! invocation produces a complete snapshot of the currently discoverable
//! images; the synchronizer diffs that snapshot against the catalog.
//!
//! Per-file failures never abort a scan. They are handed to an injected
//! error sink and the file is skipped, so one unreadable entry cannot hide
//! the rest of the tree until the next timer tick.

use chrono::{DateTime, Utc};
use imgsrv_db::Image;
use regex::Regex;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Component, Path, PathBuf, MAIN_SEPARATOR_STR};
use std::sync::Arc;
use walkdir::{DirEntry, WalkDir};

/// One ordered group rule: the first rule whose pattern matches an image
/// name labels it.
#[derive(Debug, Clone)]
pub struct GroupRule {
    name: String,
    pattern: Regex,
}

impl GroupRule {
    pub fn new(name: &str, pattern: Regex) -> Self {
        Self {
            name: name.to_string(),
            pattern,
        }
    }
}

/// Compiled classification rules for one driver.
#[derive(Debug, Clone)]
pub struct DriverRules {
    name: String,
    categories: HashSet<String>,
    groups: Vec<GroupRule>,
}

impl DriverRules {
    pub fn new(name: &str, categories: HashSet<String>, groups: Vec<GroupRule>) -> Self {
        Self {
            name: name.to_string(),
            categories,
            groups,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn has_category(&self, category: &str) -> bool {
        self.categories.contains(category)
    }

    /// First matching group rule wins; no match means no group.
    pub fn group_for(&self, name: &str) -> &str {
        self.groups
            .iter()
            .find(|rule| rule.pattern.is_match(name))
            .map(|rule| rule.name.as_str())
            .unwrap_or("")
    }
}

/// Per-file and per-walk scan failures. All of them are non-fatal: the file
/// (or subtree) is skipped and scanning continues.
#[derive(Debug, thiserror::Error)]
pub enum ScanError {
    #[error("scan: {}: file sits at the scan root, no driver segment", path.display())]
    NoDriver { path: PathBuf },

    #[error("scan: {}: unknown driver {driver}", path.display())]
    UnknownDriver { path: PathBuf, driver: String },

    #[error("scan: {}: unreadable symlink target: {source}", path.display())]
    Symlink {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("scan: {}: metadata unavailable: {source}", path.display())]
    Metadata {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("scan: walk failed: {0}")]
    Walk(#[from] walkdir::Error),
}

/// Caller-supplied consumer of scan failures, decoupled from control flow.
pub type ErrorSink = Arc<dyn Fn(ScanError) + Send + Sync>;

/// The default sink used by the binary: report through tracing.
pub fn logging_sink() -> ErrorSink {
    Arc::new(|err| tracing::warn!(error = %err, "scan error"))
}

/// Walks a root directory and classifies files into [`Image`] records.
pub struct Scanner {
    root: PathBuf,
    drivers: HashMap<String, DriverRules>,
    errh: ErrorSink,
}

impl Scanner {
    pub fn new(root: PathBuf, drivers: HashMap<String, DriverRules>, errh: ErrorSink) -> Self {
        Self {
            root,
            drivers,
            errh,
        }
    }

    /// Produce a complete snapshot of the image tree.
    ///
    /// Never fails: walk errors are reported to the sink and whatever was
    /// accumulated is returned; the next timer tick retries from scratch.
    pub fn scan(&self) -> Vec<Image> {
        // Resolved targets of symlinks seen during the walk. A file that is
        // itself such a target is dropped in the final pass so it cannot
        // appear twice, once under its real path and once via the link.
        let mut symlink_targets: HashSet<PathBuf> = HashSet::new();

        let mut initial = Vec::new();

        for entry in WalkDir::new(&self.root).sort_by_file_name() {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    (self.errh)(ScanError::Walk(err));
                    continue;
                }
            };

            if entry.file_type().is_dir() {
                continue;
            }

            if let Some(img) = self.classify(&entry, &mut symlink_targets) {
                initial.push(img);
            }
        }

        initial
            .into_iter()
            .filter(|img| !symlink_targets.contains(Path::new(&img.path)))
            .collect()
    }

    fn classify(&self, entry: &DirEntry, symlink_targets: &mut HashSet<PathBuf>) -> Option<Image> {
        let path = entry.path();

        let rel = path.strip_prefix(&self.root).ok()?;
        let mut parts: Vec<String> = rel
            .iter()
            .map(|seg| seg.to_string_lossy().into_owned())
            .collect();

        if parts.len() < 2 {
            (self.errh)(ScanError::NoDriver {
                path: path.to_path_buf(),
            });
            return None;
        }

        let driver_name = parts.remove(0);
        let Some(driver) = self.drivers.get(&driver_name) else {
            (self.errh)(ScanError::UnknownDriver {
                path: path.to_path_buf(),
                driver: driver_name,
            });
            return None;
        };

        let mut category = String::new();
        if driver.has_category(&parts[0]) {
            category = parts.remove(0);
        }

        let name = parts.join(MAIN_SEPARATOR_STR);

        let mut link = String::new();
        let mod_time;

        if entry.path_is_symlink() {
            let raw = match fs::read_link(path) {
                Ok(target) => target,
                Err(source) => {
                    (self.errh)(ScanError::Symlink {
                        path: path.to_path_buf(),
                        source,
                    });
                    return None;
                }
            };

            // Target resolved against the entry's directory; remembered so
            // the final pass can suppress the target's own record.
            let target = match path.parent() {
                Some(dir) => normalize(&dir.join(&raw)),
                None => normalize(&raw),
            };

            symlink_targets.insert(target.clone());

            let meta = match fs::metadata(&target) {
                Ok(meta) => meta,
                Err(source) => {
                    (self.errh)(ScanError::Symlink {
                        path: path.to_path_buf(),
                        source,
                    });
                    return None;
                }
            };
            mod_time = modified(&meta, path, &self.errh)?;

            // The exposed link is relative to the image's own directory.
            link = match Path::new(&name).parent() {
                Some(dir) => normalize(&dir.join(&raw)).to_string_lossy().into_owned(),
                None => raw.to_string_lossy().into_owned(),
            };
        } else {
            let meta = match entry.metadata() {
                Ok(meta) => meta,
                Err(source) => {
                    (self.errh)(ScanError::Walk(source));
                    return None;
                }
            };
            mod_time = modified(&meta, path, &self.errh)?;
        }

        Some(Image {
            path: path.to_string_lossy().into_owned(),
            driver: driver.name().to_string(),
            category,
            group: driver.group_for(&name).to_string(),
            name,
            link,
            mod_time,
        })
    }
}

fn modified(meta: &fs::Metadata, path: &Path, errh: &ErrorSink) -> Option<DateTime<Utc>> {
    match meta.modified() {
        Ok(time) => Some(DateTime::<Utc>::from(time)),
        Err(source) => {
            (errh)(ScanError::Metadata {
                path: path.to_path_buf(),
                source,
            });
            None
        }
    }
}

/// Lexical path cleanup: resolves `.` and `..` components without touching
/// the filesystem, so joined symlink targets compare equal to walked paths.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for comp in path.components() {
        match comp {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push(comp.as_os_str());
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}
