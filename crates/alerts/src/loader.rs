//! Alert configuration sources.
//!
//! [`ConfigSource`] is the contract the scheduler consumes: paginated
//! enumeration of projects and alert groups plus point lookups. The source is
//! authoritative and pull-based — the reconciler and workers read fresh state
//! from it; nothing is pushed.
//!
//! [`DirConfigSource`] is the filesystem implementation. Layout:
//!
//! ```text
//! <root>/<project>/<group>.yml
//! ```
//!
//! Projects are directories; alert groups are YAML documents. Dotfiles and
//! non-YAML files are skipped. A file that fails to parse is reported and
//! skipped; it never aborts enumeration.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use serde::Deserialize;
use tracing::{info, warn};

use crate::error::WatcherError;
use crate::schema::{duration, AlertGroup, NamedRuleSpec, Project};

/// Page size the reconciler uses when draining a source.
pub const CONFIG_PAGE_LIMIT: u64 = 100;

/// One page of listed items plus the cursor for the next page.
#[derive(Debug, Clone)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// `None` when the listing is exhausted.
    pub next_cursor: Option<String>,
}

/// Enumeration and lookup of alert configuration.
#[async_trait]
pub trait ConfigSource: Send + Sync {
    async fn list_projects(
        &self,
        cursor: Option<&str>,
        limit: u64,
    ) -> Result<Page<Project>, WatcherError>;

    async fn list_alert_groups(
        &self,
        project: &str,
        cursor: Option<&str>,
        limit: u64,
    ) -> Result<Page<AlertGroup>, WatcherError>;

    async fn get_project(&self, name: &str) -> Result<Project, WatcherError>;

    async fn get_alert_group(
        &self,
        project: &str,
        name: &str,
    ) -> Result<AlertGroup, WatcherError>;
}

// ── Filesystem-backed source ────────────────────────────────────────

/// Filesystem-backed [`ConfigSource`] with optional change notification.
pub struct DirConfigSource {
    root: PathBuf,
    /// Active filesystem watcher (held to keep it alive).
    _watcher: Option<RecommendedWatcher>,
}

impl DirConfigSource {
    /// Create a source rooted at the given directory.
    ///
    /// Creates the directory (and parents) if it does not exist.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        if !root.exists() {
            if let Err(e) = fs::create_dir_all(&root) {
                warn!(path = %root.display(), error = %e, "failed to create config directory");
            }
        }
        Self {
            root,
            _watcher: None,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Start a filesystem watcher that invokes `on_change` whenever a YAML
    /// file or project directory changes, so a host can trigger a reconcile
    /// without waiting for the periodic one.
    ///
    /// The source itself stays pull-based; `on_change` carries no payload.
    pub fn watch(&mut self, on_change: impl Fn() + Send + 'static) -> Result<(), WatcherError> {
        let mut watcher = notify::recommended_watcher(
            move |res: std::result::Result<notify::Event, notify::Error>| match res {
                Ok(event) => {
                    let relevant = event.paths.iter().any(|p| p.is_dir() || is_yaml(p))
                        || event.paths.is_empty();
                    if relevant {
                        on_change();
                    }
                }
                Err(e) => warn!(error = %e, "filesystem watcher error"),
            },
        )
        .map_err(|e| WatcherError::Watch(e.to_string()))?;

        watcher
            .watch(&self.root, RecursiveMode::Recursive)
            .map_err(|e| WatcherError::Watch(e.to_string()))?;

        let _ = watcher
            .configure(notify::Config::default().with_poll_interval(Duration::from_millis(500)));

        info!(path = %self.root.display(), "watching config directory for changes");
        self._watcher = Some(watcher);
        Ok(())
    }

    /// Scan the whole tree and report the outcome per file. Used by tooling;
    /// the scheduler itself reads through the trait methods.
    pub fn load_all(&self) -> Result<Vec<LoadReport>, WatcherError> {
        let mut reports = Vec::new();
        for project in self.project_names()? {
            for path in self.group_files(&project)? {
                match load_group_file(&path) {
                    Ok(group) => reports.push(LoadReport {
                        path,
                        status: LoadStatus::Loaded {
                            project: project.clone(),
                            group: group.name,
                            rules: group.rules.len(),
                        },
                    }),
                    Err(e) => reports.push(LoadReport {
                        path,
                        status: LoadStatus::Failed {
                            error: e.to_string(),
                        },
                    }),
                }
            }
            // Report skipped files too so tooling can explain them.
            for path in self.skipped_files(&project)? {
                let reason = if is_dotfile(&path) {
                    "dotfile"
                } else {
                    "not a YAML file"
                };
                reports.push(LoadReport {
                    path,
                    status: LoadStatus::Skipped {
                        reason: reason.to_string(),
                    },
                });
            }
        }
        Ok(reports)
    }

    fn project_names(&self) -> Result<Vec<String>, WatcherError> {
        let mut names = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                if !name.starts_with('.') {
                    names.push(name.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }

    fn project_dir(&self, name: &str) -> Option<PathBuf> {
        // Only plain directory names address projects.
        if name.is_empty() || name.contains(['/', '\\']) || name == "." || name == ".." {
            return None;
        }
        let dir = self.root.join(name);
        dir.is_dir().then_some(dir)
    }

    fn group_files(&self, project: &str) -> Result<Vec<PathBuf>, WatcherError> {
        let dir = self
            .project_dir(project)
            .ok_or_else(|| WatcherError::ProjectNotFound(project.to_string()))?;

        let mut files = Vec::new();
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.is_file() && !is_dotfile(&path) && is_yaml(&path) {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }

    fn skipped_files(&self, project: &str) -> Result<Vec<PathBuf>, WatcherError> {
        let dir = self
            .project_dir(project)
            .ok_or_else(|| WatcherError::ProjectNotFound(project.to_string()))?;

        let mut files = Vec::new();
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.is_file() && (is_dotfile(&path) || !is_yaml(&path)) {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }
}

#[async_trait]
impl ConfigSource for DirConfigSource {
    async fn list_projects(
        &self,
        cursor: Option<&str>,
        limit: u64,
    ) -> Result<Page<Project>, WatcherError> {
        let projects = self.project_names()?.into_iter().map(Project::new).collect();
        Ok(paginate(projects, cursor, limit, |p| &p.name))
    }

    async fn list_alert_groups(
        &self,
        project: &str,
        cursor: Option<&str>,
        limit: u64,
    ) -> Result<Page<AlertGroup>, WatcherError> {
        let mut groups = Vec::new();
        for path in self.group_files(project)? {
            match load_group_file(&path) {
                Ok(group) => groups.push(group),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "skipping unparseable group file");
                }
            }
        }
        groups.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(paginate(groups, cursor, limit, |g| &g.name))
    }

    async fn get_project(&self, name: &str) -> Result<Project, WatcherError> {
        self.project_dir(name)
            .map(|_| Project::new(name))
            .ok_or_else(|| WatcherError::ProjectNotFound(name.to_string()))
    }

    async fn get_alert_group(
        &self,
        project: &str,
        name: &str,
    ) -> Result<AlertGroup, WatcherError> {
        let dir = self
            .project_dir(project)
            .ok_or_else(|| WatcherError::ProjectNotFound(project.to_string()))?;

        // Try both extensions.
        for ext in ["yml", "yaml"] {
            let path = dir.join(format!("{name}.{ext}"));
            if path.is_file() {
                return load_group_file(&path);
            }
        }
        Err(WatcherError::GroupNotFound {
            project: project.to_string(),
            group: name.to_string(),
        })
    }
}

// ── Group file parsing ──────────────────────────────────────────────

/// Raw YAML shape of a group file. `name` may be omitted, in which case the
/// file stem names the group.
#[derive(Deserialize)]
struct GroupDocument {
    #[serde(default)]
    name: Option<String>,
    #[serde(default, with = "duration::opt")]
    interval: Option<Duration>,
    #[serde(default)]
    rules: Vec<NamedRuleSpec>,
}

fn load_group_file(path: &Path) -> Result<AlertGroup, WatcherError> {
    let parse_err = |message: String| WatcherError::Parse {
        path: path.display().to_string(),
        message,
    };

    let contents = fs::read_to_string(path)?;
    let doc: GroupDocument =
        serde_yaml::from_str(&contents).map_err(|e| parse_err(e.to_string()))?;

    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .ok_or_else(|| parse_err("file has no usable name".to_string()))?;

    let name = match doc.name {
        Some(name) if name != stem => {
            return Err(parse_err(format!(
                "group name '{name}' does not match file name '{stem}'"
            )));
        }
        Some(name) => name,
        None => stem.to_string(),
    };

    let group = AlertGroup {
        name,
        interval: doc.interval,
        rules: doc.rules,
    };
    group.validate().map_err(parse_err)?;
    Ok(group)
}

fn is_yaml(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e == "yml" || e == "yaml")
        .unwrap_or(false)
}

fn is_dotfile(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.starts_with('.'))
        .unwrap_or(false)
}

fn paginate<T>(items: Vec<T>, cursor: Option<&str>, limit: u64, key: impl Fn(&T) -> &str) -> Page<T> {
    let mut rest: Vec<T> = match cursor {
        Some(cursor) => items.into_iter().filter(|i| key(i) > cursor).collect(),
        None => items,
    };
    let limit = limit as usize;
    let more = rest.len() > limit;
    rest.truncate(limit);
    let next_cursor = if more {
        rest.last().map(|i| key(i).to_string())
    } else {
        None
    };
    Page {
        items: rest,
        next_cursor,
    }
}

// ── Load reporting ──────────────────────────────────────────────────

/// Outcome of scanning one file in the config tree.
#[derive(Debug, Clone)]
pub struct LoadReport {
    pub path: PathBuf,
    pub status: LoadStatus,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadStatus {
    Loaded {
        project: String,
        group: String,
        rules: usize,
    },
    Skipped {
        reason: String,
    },
    Failed {
        error: String,
    },
}
