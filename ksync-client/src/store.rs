//! SecretStore: the on-disk cache of every environment this device knows.
//!
//! ```text
//! <cache>/environments.json            manifest (see [`Manifest`])
//! <cache>/<env>/secrets.json           flat secret map
//! <cache>/<env>/files/<tracked path>   cached file content
//! <cache>/.env                         secrets of the materialized environment
//! ```
//!
//! An environment directory is always replaced whole: the new snapshot is
//! written to a `.staging-*` directory, the old one is renamed to
//! `.old-<env>`, and the staged directory is renamed into place. [`SecretStore::open`]
//! finishes or rolls back a swap that was interrupted.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use ksync_core::{check_tracked_path, Declarations, MissingRequired, PathError, Snapshot};
use ksync_types::{EnvironmentRecord, VersionStamp};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use crate::atomic::{persist, read_optional, remove_if_exists, stage, write_atomic};
use crate::error::{Result, SyncError};
use crate::manifest::{Manifest, MANIFEST_FILE};

const SECRETS_FILE: &str = "secrets.json";
const FILES_DIR: &str = "files";
const DOTENV_FILE: &str = ".env";
const STAGING_PREFIX: &str = ".staging-";
const BACKUP_PREFIX: &str = ".old-";

/// Where a listed secret comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// Declared in the project manifest.
    Declared,
    /// Only present in the local cache.
    CacheOnly,
}

/// A secret with its value in every environment.
#[derive(Clone, PartialEq, Eq)]
pub struct SecretEntry {
    /// Secret name.
    pub name: String,
    /// Whether the project requires it.
    pub required: bool,
    /// Declared or cache-only.
    pub origin: Origin,
    /// Environment name to value; environments without a value are absent.
    pub values: BTreeMap<String, String>,
}

impl std::fmt::Debug for SecretEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretEntry")
            .field("name", &self.name)
            .field("required", &self.required)
            .field("origin", &self.origin)
            .field("environments", &self.values.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// A tracked file with its content in every environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    /// Tracked path.
    pub path: String,
    /// Whether the project requires it.
    pub required: bool,
    /// Declared or cache-only.
    pub origin: Origin,
    /// Environment name to content.
    pub values: BTreeMap<String, Vec<u8>>,
}

/// What a materialization did to the working tree.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MaterializeReport {
    /// Environment now materialized.
    pub environment: String,
    /// Paths written from the cache.
    pub written: Vec<String>,
    /// Optional paths removed because the environment has no content for them.
    pub removed: Vec<String>,
}

/// The local cache plus the working tree it materializes into.
#[derive(Debug, Clone)]
pub struct SecretStore {
    cache_dir: PathBuf,
    working_dir: PathBuf,
    declarations: Declarations,
}

impl SecretStore {
    /// Open (and create if needed) the cache at `cache_dir`.
    ///
    /// Recovers from an interrupted snapshot swap and clears staging leftovers.
    pub fn open(
        cache_dir: impl Into<PathBuf>,
        working_dir: impl Into<PathBuf>,
        declarations: Declarations,
    ) -> Result<Self> {
        let store = Self {
            cache_dir: cache_dir.into(),
            working_dir: working_dir.into(),
            declarations,
        };
        std::fs::create_dir_all(&store.cache_dir).map_err(SyncError::io(&store.cache_dir))?;
        store.recover()?;
        Ok(store)
    }

    fn recover(&self) -> Result<()> {
        let entries = std::fs::read_dir(&self.cache_dir).map_err(SyncError::io(&self.cache_dir))?;
        for entry in entries {
            let entry = entry.map_err(SyncError::io(&self.cache_dir))?;
            let name = entry.file_name().to_string_lossy().into_owned();
            let path = entry.path();
            if name.starts_with(STAGING_PREFIX) {
                debug!(path = %path.display(), "removing staging leftover");
                std::fs::remove_dir_all(&path).map_err(SyncError::io(&path))?;
            } else if let Some(env) = name.strip_prefix(BACKUP_PREFIX) {
                let target = self.cache_dir.join(env);
                if target.exists() {
                    std::fs::remove_dir_all(&path).map_err(SyncError::io(&path))?;
                } else {
                    warn!(environment = env, "restoring snapshot after interrupted swap");
                    std::fs::rename(&path, &target).map_err(SyncError::io(&target))?;
                }
            }
        }
        Ok(())
    }

    /// Cache directory.
    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Working tree the store materializes into.
    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }

    /// Project declarations in use.
    pub fn declarations(&self) -> &Declarations {
        &self.declarations
    }

    fn manifest_path(&self) -> PathBuf {
        self.cache_dir.join(MANIFEST_FILE)
    }

    fn env_dir(&self, name: &str) -> PathBuf {
        self.cache_dir.join(name)
    }

    // ===== Manifest =====

    /// Current manifest.
    pub fn manifest(&self) -> Result<Manifest> {
        Manifest::load(&self.manifest_path())
    }

    fn save_manifest(&self, manifest: &Manifest) -> Result<()> {
        manifest.save(&self.manifest_path())
    }

    /// Record of a known environment.
    pub fn environment(&self, name: &str) -> Result<EnvironmentRecord> {
        self.manifest()?
            .get(name)
            .cloned()
            .ok_or_else(|| SyncError::UnknownEnvironment {
                name: name.to_string(),
            })
    }

    /// Name of the materialized environment, if any.
    pub fn current_environment(&self) -> Result<Option<String>> {
        Ok(self.manifest()?.current().map(str::to_string))
    }

    /// All known environments, sorted by name.
    pub fn list_environments(&self) -> Result<Vec<EnvironmentRecord>> {
        let mut environments = self.manifest()?.environments;
        environments.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(environments)
    }

    /// Register an environment with an empty snapshot.
    pub fn create_environment(&self, record: EnvironmentRecord) -> Result<()> {
        check_environment_name(&record.name)?;
        let dir = self.env_dir(&record.name);
        if !dir.exists() {
            self.replace_snapshot(&record.name, &Snapshot::new())?;
        }
        let mut manifest = self.manifest()?;
        manifest.upsert(record);
        self.save_manifest(&manifest)
    }

    /// Forget an environment and delete its cache. The current one cannot be removed.
    pub fn remove_environment(&self, name: &str) -> Result<()> {
        let mut manifest = self.manifest()?;
        if manifest.current() == Some(name) {
            return Err(SyncError::CannotRemoveCurrent {
                name: name.to_string(),
            });
        }
        if manifest.remove(name).is_none() {
            return Err(SyncError::UnknownEnvironment {
                name: name.to_string(),
            });
        }
        let dir = self.env_dir(name);
        if dir.exists() {
            std::fs::remove_dir_all(&dir).map_err(SyncError::io(&dir))?;
        }
        self.save_manifest(&manifest)
    }

    /// Record the observed state of an environment (adds it if unknown).
    pub fn update_environment(&self, record: EnvironmentRecord) -> Result<()> {
        check_environment_name(&record.name)?;
        let mut manifest = self.manifest()?;
        manifest.upsert(record);
        self.save_manifest(&manifest)
    }

    /// Adopt server stamps for several environments in one manifest write.
    ///
    /// Records for environments unknown locally are added.
    pub fn adopt_versions(&self, records: &[EnvironmentRecord]) -> Result<()> {
        let mut manifest = self.manifest()?;
        for record in records {
            check_environment_name(&record.name)?;
            manifest.upsert(record.clone());
        }
        self.save_manifest(&manifest)
    }

    /// Last observed stamp of an environment.
    pub fn stamp(&self, name: &str) -> Result<VersionStamp> {
        Ok(self.environment(name)?.version_stamp)
    }

    // ===== Snapshots =====

    /// Load an environment's cached snapshot. A missing cache is empty; an
    /// undecodable one is [`SyncError::CorruptCache`].
    pub fn load_snapshot(&self, name: &str) -> Result<Snapshot> {
        check_environment_name(name)?;
        let dir = self.env_dir(name);
        let mut snapshot = Snapshot::new();

        let secrets_path = dir.join(SECRETS_FILE);
        if let Some(bytes) = read_optional(&secrets_path)? {
            snapshot.secrets =
                serde_json::from_slice(&bytes).map_err(|e| SyncError::CorruptCache {
                    path: secrets_path.clone(),
                    reason: e.to_string(),
                })?;
        }

        let files_root = dir.join(FILES_DIR);
        if files_root.is_dir() {
            collect_files(&files_root, &files_root, &mut snapshot.files)?;
        }
        Ok(snapshot)
    }

    /// Replace an environment's snapshot as a whole.
    ///
    /// Either the previous snapshot or the new one is visible afterwards,
    /// never a mix.
    pub fn replace_snapshot(&self, name: &str, snapshot: &Snapshot) -> Result<()> {
        check_environment_name(name)?;
        let staging = tempfile::Builder::new()
            .prefix(STAGING_PREFIX)
            .tempdir_in(&self.cache_dir)
            .map_err(SyncError::io(&self.cache_dir))?;
        let staged = staging.path().to_path_buf();

        let secrets = serde_json::to_vec_pretty(&snapshot.secrets).map_err(|e| SyncError::Payload {
            environment: name.to_string(),
            reason: e.to_string(),
        })?;
        std::fs::write(staged.join(SECRETS_FILE), secrets).map_err(SyncError::io(&staged))?;

        let files_root = staged.join(FILES_DIR);
        std::fs::create_dir_all(&files_root).map_err(SyncError::io(&files_root))?;
        for (path, content) in &snapshot.files {
            check_path(path)?;
            let target = files_root.join(path);
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent).map_err(SyncError::io(parent))?;
            }
            std::fs::write(&target, content).map_err(SyncError::io(&target))?;
        }

        let target = self.env_dir(name);
        let backup = self.cache_dir.join(format!("{}{}", BACKUP_PREFIX, name));
        if backup.exists() {
            std::fs::remove_dir_all(&backup).map_err(SyncError::io(&backup))?;
        }
        let had_previous = target.exists();
        if had_previous {
            std::fs::rename(&target, &backup).map_err(SyncError::io(&target))?;
        }
        if let Err(e) = std::fs::rename(&staged, &target) {
            if had_previous {
                if let Err(restore) = std::fs::rename(&backup, &target) {
                    warn!(
                        environment = name,
                        error = %restore,
                        "could not restore previous snapshot; it is recovered on next open"
                    );
                }
            }
            return Err(SyncError::io(&target)(e));
        }
        // `staging` now points at a moved directory; dropping it is a no-op.
        drop(staging);
        if had_previous {
            std::fs::remove_dir_all(&backup).map_err(SyncError::io(&backup))?;
        }
        debug!(
            environment = name,
            secrets = snapshot.secrets.len(),
            files = snapshot.files.len(),
            "snapshot replaced"
        );
        Ok(())
    }

    // ===== Single-entry edits =====

    /// Set a secret in an environment's cache.
    pub fn set_secret(&self, env: &str, name: &str, value: &str) -> Result<()> {
        self.environment(env)?;
        let mut snapshot = self.load_snapshot(env)?;
        snapshot.secrets.insert(name.to_string(), value.to_string());
        self.replace_snapshot(env, &snapshot)
    }

    /// Remove a secret from an environment's cache.
    pub fn unset_secret(&self, env: &str, name: &str) -> Result<()> {
        self.environment(env)?;
        let mut snapshot = self.load_snapshot(env)?;
        if snapshot.secrets.remove(name).is_some() {
            self.replace_snapshot(env, &snapshot)?;
        }
        Ok(())
    }

    /// Set a tracked file's content in an environment's cache.
    pub fn set_file(&self, env: &str, path: &str, content: &[u8]) -> Result<()> {
        check_path(path)?;
        self.environment(env)?;
        let mut snapshot = self.load_snapshot(env)?;
        snapshot.files.insert(path.to_string(), content.to_vec());
        self.replace_snapshot(env, &snapshot)
    }

    /// Remove a tracked file from an environment's cache.
    pub fn remove_file(&self, env: &str, path: &str) -> Result<()> {
        check_path(path)?;
        self.environment(env)?;
        let mut snapshot = self.load_snapshot(env)?;
        if snapshot.files.remove(path).is_some() {
            self.replace_snapshot(env, &snapshot)?;
        }
        Ok(())
    }

    // ===== Queries =====

    fn snapshots(&self) -> Result<BTreeMap<String, Snapshot>> {
        self.manifest()?
            .names()
            .into_iter()
            .map(|name| {
                let snapshot = self.load_snapshot(&name)?;
                Ok((name, snapshot))
            })
            .collect()
    }

    /// Every declared or cached secret with its value per environment.
    pub fn list_secrets(&self) -> Result<Vec<SecretEntry>> {
        let snapshots = self.snapshots()?;
        let mut entries: BTreeMap<String, SecretEntry> = BTreeMap::new();

        for decl in &self.declarations.secrets {
            entries.insert(
                decl.name.clone(),
                SecretEntry {
                    name: decl.name.clone(),
                    required: decl.required,
                    origin: Origin::Declared,
                    values: BTreeMap::new(),
                },
            );
        }
        for (env, snapshot) in &snapshots {
            for (name, value) in &snapshot.secrets {
                let entry = entries.entry(name.clone()).or_insert_with(|| SecretEntry {
                    name: name.clone(),
                    required: false,
                    origin: Origin::CacheOnly,
                    values: BTreeMap::new(),
                });
                if !value.is_empty() {
                    entry.values.insert(env.clone(), value.clone());
                }
            }
        }
        Ok(entries.into_values().collect())
    }

    /// Every declared or cached file with its content per environment.
    pub fn list_files(&self) -> Result<Vec<FileEntry>> {
        let snapshots = self.snapshots()?;
        let mut entries: BTreeMap<String, FileEntry> = BTreeMap::new();

        for decl in &self.declarations.files {
            entries.insert(
                decl.path.clone(),
                FileEntry {
                    path: decl.path.clone(),
                    required: decl.required,
                    origin: Origin::Declared,
                    values: BTreeMap::new(),
                },
            );
        }
        for (env, snapshot) in &snapshots {
            for (path, content) in &snapshot.files {
                let entry = entries.entry(path.clone()).or_insert_with(|| FileEntry {
                    path: path.clone(),
                    required: false,
                    origin: Origin::CacheOnly,
                    values: BTreeMap::new(),
                });
                entry.values.insert(env.clone(), content.clone());
            }
        }
        Ok(entries.into_values().collect())
    }

    /// Required secrets and files an environment does not provide.
    pub fn missing_required(&self, env: &str) -> Result<MissingRequired> {
        self.environment(env)?;
        let snapshot = self.load_snapshot(env)?;
        Ok(self.declarations.missing_required(&snapshot))
    }

    // ===== Working tree =====

    /// Paths that materialization manages: declared files plus every file
    /// cached for any environment.
    fn tracked_paths(&self, snapshots: &BTreeMap<String, Snapshot>) -> BTreeSet<String> {
        let mut paths: BTreeSet<String> =
            self.declarations.files.iter().map(|f| f.path.clone()).collect();
        for snapshot in snapshots.values() {
            paths.extend(snapshot.files.keys().cloned());
        }
        paths
    }

    /// Make the working tree reflect exactly `env`.
    ///
    /// Every tracked path becomes a copy of the cached content, `.env` is
    /// rendered from the secrets and `env` becomes current. An empty cached
    /// file is written as an empty file. If a required file is not cached the
    /// working tree is left untouched; if a write fails midway, already
    /// replaced paths and `.env` are restored.
    pub fn materialize(&self, env: &str) -> Result<MaterializeReport> {
        self.environment(env)?;
        let snapshots = self.snapshots()?;
        let snapshot = snapshots.get(env).cloned().unwrap_or_default();
        let paths = self.tracked_paths(&snapshots);

        // Phase 1: validate and stage everything before touching the tree.
        for path in &paths {
            check_path(path)?;
            let required = self.declarations.file(path).is_some_and(|f| f.required);
            if required && !snapshot.files.contains_key(path) {
                return Err(SyncError::MissingFile {
                    environment: env.to_string(),
                    path: path.clone(),
                });
            }
        }

        let mut report = MaterializeReport {
            environment: env.to_string(),
            ..Default::default()
        };
        let mut plan: Vec<(PathBuf, Option<NamedTempFile>, Option<Vec<u8>>)> = Vec::new();
        for path in &paths {
            let target = self.working_dir.join(path);
            let original = read_optional(&target)?;
            let staged = match snapshot.files.get(path) {
                Some(content) => {
                    report.written.push(path.clone());
                    Some(stage(&target, content)?)
                }
                None if original.is_none() => continue,
                None => {
                    report.removed.push(path.clone());
                    None
                }
            };
            plan.push((target, staged, original));
        }

        let dotenv = self.cache_dir.join(DOTENV_FILE);
        let dotenv_original = read_optional(&dotenv)?;
        let dotenv_staged = stage(&dotenv, render_dotenv(&snapshot.secrets).as_bytes())?;
        plan.push((dotenv, Some(dotenv_staged), dotenv_original));

        let mut manifest = self.manifest()?;
        manifest.current = env.to_string();

        // Phase 2: swap in, then record the new current environment. Any
        // failure restores what was already replaced.
        let mut applied: Vec<(PathBuf, Option<Vec<u8>>)> = Vec::new();
        for (target, staged, original) in plan {
            let result = match staged {
                Some(temp) => persist(temp, &target),
                None => remove_if_exists(&target),
            };
            if let Err(e) = result {
                warn!(
                    environment = env,
                    path = %target.display(),
                    error = %e,
                    "materialize failed, restoring working tree"
                );
                rollback(applied);
                return Err(e);
            }
            applied.push((target, original));
        }
        if let Err(e) = self.save_manifest(&manifest) {
            warn!(
                environment = env,
                error = %e,
                "could not record current environment, restoring working tree"
            );
            rollback(applied);
            return Err(e);
        }

        for path in &report.removed {
            warn!(environment = env, path = %path, "optional file not cached, removed");
        }
        info!(
            environment = env,
            written = report.written.len(),
            removed = report.removed.len(),
            "environment materialized"
        );
        Ok(report)
    }

    /// Tracked files whose working copy differs from the cached content.
    ///
    /// A file missing on either side is not reported.
    pub fn locally_modified(&self, env: &str) -> Result<Vec<String>> {
        self.environment(env)?;
        let snapshot = self.load_snapshot(env)?;
        let mut modified = Vec::new();
        for (path, cached) in &snapshot.files {
            check_path(path)?;
            if let Some(working) = read_optional(&self.working_dir.join(path))? {
                if &working != cached {
                    modified.push(path.clone());
                }
            }
        }
        Ok(modified)
    }
}

fn rollback(applied: Vec<(PathBuf, Option<Vec<u8>>)>) {
    for (target, original) in applied.into_iter().rev() {
        let restored = match original {
            Some(content) => write_atomic(&target, &content),
            None => remove_if_exists(&target),
        };
        if let Err(e) = restored {
            warn!(path = %target.display(), error = %e, "could not restore file");
        }
    }
}

fn check_path(path: &str) -> Result<()> {
    check_tracked_path(path).map_err(|reason| SyncError::InvalidPath {
        path: path.to_string(),
        reason,
    })
}

/// Environment names become directory names in the cache.
fn check_environment_name(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(())
    } else {
        Err(SyncError::InvalidPath {
            path: name.to_string(),
            reason: PathError::NotNormalized(name.to_string()),
        })
    }
}

fn collect_files(root: &Path, dir: &Path, out: &mut BTreeMap<String, Vec<u8>>) -> Result<()> {
    let entries = std::fs::read_dir(dir).map_err(SyncError::io(dir))?;
    for entry in entries {
        let entry = entry.map_err(SyncError::io(dir))?;
        let path = entry.path();
        let file_type = entry.file_type().map_err(SyncError::io(&path))?;
        if file_type.is_dir() {
            collect_files(root, &path, out)?;
        } else if file_type.is_file() {
            let relative = path
                .strip_prefix(root)
                .map_err(|_| SyncError::InvalidPath {
                    path: path.display().to_string(),
                    reason: PathError::Escapes(path.display().to_string()),
                })?
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            let content = std::fs::read(&path).map_err(SyncError::io(&path))?;
            out.insert(relative, content);
        }
    }
    Ok(())
}

/// Render secrets as a dotenv file, quoting values that need it.
pub(crate) fn render_dotenv(secrets: &BTreeMap<String, String>) -> String {
    let mut out = String::new();
    for (name, value) in secrets {
        let plain = value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./:@,+=".contains(c));
        if plain {
            out.push_str(&format!("{}={}\n", name, value));
        } else {
            let escaped = value
                .replace('\\', "\\\\")
                .replace('"', "\\\"")
                .replace('\n', "\\n");
            out.push_str(&format!("{}=\"{}\"\n", name, escaped));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use ksync_types::EnvironmentId;
    use tempfile::{tempdir, TempDir};

    struct Fixture {
        _dir: TempDir,
        store: SecretStore,
    }

    impl Fixture {
        fn cache(&self) -> &Path {
            self.store.cache_dir()
        }

        fn work(&self) -> &Path {
            self.store.working_dir()
        }
    }

    fn fixture(declarations: Declarations) -> Fixture {
        let dir = tempdir().unwrap();
        let cache = dir.path().join("cache");
        let work = dir.path().join("work");
        std::fs::create_dir_all(&work).unwrap();
        let store = SecretStore::open(cache, work, declarations).unwrap();
        Fixture { _dir: dir, store }
    }

    fn record(name: &str, stamp: &str) -> EnvironmentRecord {
        EnvironmentRecord::new(
            EnvironmentId::new(format!("env-{}", name)),
            name,
            VersionStamp::new(stamp),
        )
    }

    fn snapshot(secrets: &[(&str, &str)], files: &[(&str, &[u8])]) -> Snapshot {
        let mut s = Snapshot::new();
        for (k, v) in secrets {
            s.secrets.insert(k.to_string(), v.to_string());
        }
        for (p, c) in files {
            s.files.insert(p.to_string(), c.to_vec());
        }
        s
    }

    // ===== Layout Tests =====

    #[test]
    fn open_creates_cache_dir() {
        let f = fixture(Declarations::default());
        assert!(f.cache().is_dir());
        assert!(f.store.list_environments().unwrap().is_empty());
        assert!(f.store.current_environment().unwrap().is_none());
    }

    #[test]
    fn create_environment_writes_empty_snapshot() {
        let f = fixture(Declarations::default());
        f.store.create_environment(record("dev", "v1")).unwrap();

        assert!(f.cache().join("dev").join(SECRETS_FILE).is_file());
        assert!(f.store.load_snapshot("dev").unwrap().is_empty());
        assert_eq!(f.store.stamp("dev").unwrap(), VersionStamp::new("v1"));
    }

    #[test]
    fn environment_names_must_be_plain() {
        let f = fixture(Declarations::default());
        for bad in ["", "../x", ".env", "a/b", "environments.json"] {
            assert!(matches!(
                f.store.create_environment(record(bad, "v1")),
                Err(SyncError::InvalidPath { .. })
            ));
        }
    }

    #[test]
    fn unknown_environment() {
        let f = fixture(Declarations::default());
        assert!(matches!(
            f.store.environment("prod"),
            Err(SyncError::UnknownEnvironment { .. })
        ));
        assert!(matches!(
            f.store.set_secret("prod", "A", "1"),
            Err(SyncError::UnknownEnvironment { .. })
        ));
    }

    // ===== Snapshot Tests =====

    #[test]
    fn replace_and_load_snapshot() {
        let f = fixture(Declarations::default());
        f.store.create_environment(record("prod", "v1")).unwrap();
        let new = snapshot(
            &[("PORT", "3000"), ("HOST", "localhost")],
            &[("config/app.yml", b"a: 1\n"), ("certs/tls/key.pem", b"KEY")],
        );

        f.store.replace_snapshot("prod", &new).unwrap();

        assert_eq!(f.store.load_snapshot("prod").unwrap(), new);
    }

    #[test]
    fn replace_is_a_full_overwrite() {
        let f = fixture(Declarations::default());
        f.store.create_environment(record("prod", "v1")).unwrap();
        f.store
            .replace_snapshot("prod", &snapshot(&[("OLD", "1")], &[("old.txt", b"x")]))
            .unwrap();

        let new = snapshot(&[("NEW", "2")], &[]);
        f.store.replace_snapshot("prod", &new).unwrap();

        assert_eq!(f.store.load_snapshot("prod").unwrap(), new);
        // No staging or backup directories left behind
        let leftovers: Vec<_> = std::fs::read_dir(f.cache())
            .unwrap()
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .filter(|n| n.starts_with('.'))
            .collect();
        assert!(leftovers.is_empty(), "leftovers: {:?}", leftovers);
    }

    #[test]
    fn open_restores_interrupted_swap() {
        let f = fixture(Declarations::default());
        f.store.create_environment(record("prod", "v1")).unwrap();
        let saved = snapshot(&[("A", "1")], &[]);
        f.store.replace_snapshot("prod", &saved).unwrap();

        // Simulate a crash after moving the old snapshot aside.
        std::fs::rename(f.cache().join("prod"), f.cache().join(".old-prod")).unwrap();
        std::fs::create_dir_all(f.cache().join(".staging-abc/files")).unwrap();

        let reopened = SecretStore::open(f.cache(), f.work(), Declarations::default()).unwrap();

        assert_eq!(reopened.load_snapshot("prod").unwrap(), saved);
        assert!(!f.cache().join(".old-prod").exists());
        assert!(!f.cache().join(".staging-abc").exists());
    }

    #[test]
    fn unsafe_file_path_rejected() {
        let f = fixture(Declarations::default());
        f.store.create_environment(record("prod", "v1")).unwrap();
        assert!(matches!(
            f.store.set_file("prod", "../escape.txt", b"x"),
            Err(SyncError::InvalidPath { .. })
        ));
    }

    // ===== Manifest Operation Tests =====

    #[test]
    fn adopt_versions_updates_all_at_once() {
        let f = fixture(Declarations::default());
        f.store.create_environment(record("prod", "v1")).unwrap();
        f.store.create_environment(record("dev", "v1")).unwrap();

        f.store
            .adopt_versions(&[record("prod", "v2"), record("dev", "v5")])
            .unwrap();

        assert_eq!(f.store.stamp("prod").unwrap(), VersionStamp::new("v2"));
        assert_eq!(f.store.stamp("dev").unwrap(), VersionStamp::new("v5"));
    }

    #[test]
    fn cannot_remove_current_environment() {
        let f = fixture(Declarations::default());
        f.store.create_environment(record("dev", "v1")).unwrap();
        f.store.create_environment(record("prod", "v1")).unwrap();
        f.store.materialize("dev").unwrap();

        assert!(matches!(
            f.store.remove_environment("dev"),
            Err(SyncError::CannotRemoveCurrent { .. })
        ));
        f.store.remove_environment("prod").unwrap();
        assert!(!f.cache().join("prod").exists());
        assert!(matches!(
            f.store.remove_environment("prod"),
            Err(SyncError::UnknownEnvironment { .. })
        ));
    }

    // ===== Listing Tests =====

    #[test]
    fn list_secrets_with_origin() {
        let decls = Declarations::default().with_secret("DATABASE_URL", true);
        let f = fixture(decls);
        f.store.create_environment(record("dev", "v1")).unwrap();
        f.store.create_environment(record("prod", "v1")).unwrap();
        f.store.set_secret("dev", "DATABASE_URL", "postgres://dev").unwrap();
        f.store.set_secret("prod", "EXTRA", "x").unwrap();

        let secrets = f.store.list_secrets().unwrap();

        assert_eq!(secrets.len(), 2);
        assert_eq!(secrets[0].name, "DATABASE_URL");
        assert_eq!(secrets[0].origin, Origin::Declared);
        assert!(secrets[0].required);
        assert_eq!(secrets[0].values.get("dev").map(String::as_str), Some("postgres://dev"));
        assert!(!secrets[0].values.contains_key("prod"));
        assert_eq!(secrets[1].name, "EXTRA");
        assert_eq!(secrets[1].origin, Origin::CacheOnly);
    }

    #[test]
    fn list_files_and_missing_required() {
        let decls = Declarations::default()
            .with_secret("TOKEN", true)
            .with_file("certs/server.pem", true);
        let f = fixture(decls);
        f.store.create_environment(record("dev", "v1")).unwrap();
        f.store.set_file("dev", "notes.txt", b"hi").unwrap();

        let files = f.store.list_files().unwrap();
        assert_eq!(files.len(), 2);
        assert_eq!(files[0].path, "certs/server.pem");
        assert!(files[0].values.is_empty());
        assert_eq!(files[1].origin, Origin::CacheOnly);

        let missing = f.store.missing_required("dev").unwrap();
        assert_eq!(missing.secrets, vec!["TOKEN"]);
        assert_eq!(missing.files, vec!["certs/server.pem"]);
    }

    #[test]
    fn unset_and_remove_entries() {
        let f = fixture(Declarations::default());
        f.store.create_environment(record("dev", "v1")).unwrap();
        f.store.set_secret("dev", "A", "1").unwrap();
        f.store.set_file("dev", "a.txt", b"a").unwrap();

        f.store.unset_secret("dev", "A").unwrap();
        f.store.remove_file("dev", "a.txt").unwrap();

        assert!(f.store.load_snapshot("dev").unwrap().is_empty());
    }

    // ===== Materialize Tests =====

    #[test]
    fn materialize_missing_required_leaves_tree_untouched() {
        let decls = Declarations::default()
            .with_file("config/app.yml", false)
            .with_file("certs/server.pem", true);
        let f = fixture(decls);
        f.store.create_environment(record("dev", "v1")).unwrap();
        f.store.create_environment(record("staging", "v1")).unwrap();
        f.store.set_file("dev", "config/app.yml", b"dev config").unwrap();
        f.store.set_file("dev", "certs/server.pem", b"dev cert").unwrap();
        f.store.materialize("dev").unwrap();
        f.store.set_file("staging", "config/app.yml", b"staging config").unwrap();

        let result = f.store.materialize("staging");

        assert!(matches!(
            result,
            Err(SyncError::MissingFile { ref environment, ref path })
                if environment == "staging" && path == "certs/server.pem"
        ));
        assert_eq!(
            std::fs::read(f.work().join("config/app.yml")).unwrap(),
            b"dev config"
        );
        assert_eq!(
            std::fs::read(f.work().join("certs/server.pem")).unwrap(),
            b"dev cert"
        );
        assert_eq!(f.store.current_environment().unwrap().as_deref(), Some("dev"));
    }

    #[test]
    fn materialize_switches_environment() {
        let decls = Declarations::default().with_file("config/app.yml", true);
        let f = fixture(decls);
        f.store.create_environment(record("dev", "v1")).unwrap();
        f.store.create_environment(record("prod", "v1")).unwrap();
        f.store.set_file("dev", "config/app.yml", b"dev").unwrap();
        f.store.set_file("dev", "dev-only.txt", b"only dev").unwrap();
        f.store.set_file("prod", "config/app.yml", b"prod").unwrap();
        f.store.set_secret("prod", "PORT", "443").unwrap();

        f.store.materialize("dev").unwrap();
        assert!(f.work().join("dev-only.txt").exists());

        let report = f.store.materialize("prod").unwrap();

        assert_eq!(std::fs::read(f.work().join("config/app.yml")).unwrap(), b"prod");
        assert!(!f.work().join("dev-only.txt").exists());
        assert_eq!(report.written, vec!["config/app.yml"]);
        assert_eq!(report.removed, vec!["dev-only.txt"]);
        assert_eq!(
            std::fs::read_to_string(f.cache().join(DOTENV_FILE)).unwrap(),
            "PORT=443\n"
        );
        assert_eq!(f.store.current_environment().unwrap().as_deref(), Some("prod"));
    }

    #[test]
    fn materialize_is_idempotent() {
        let f = fixture(Declarations::default().with_file("a.txt", false));
        f.store.create_environment(record("dev", "v1")).unwrap();
        f.store.set_file("dev", "a.txt", b"content").unwrap();
        f.store.set_secret("dev", "A", "1").unwrap();

        let first = f.store.materialize("dev").unwrap();
        let tree_first = std::fs::read(f.work().join("a.txt")).unwrap();
        let env_first = std::fs::read(f.cache().join(DOTENV_FILE)).unwrap();
        let second = f.store.materialize("dev").unwrap();

        assert_eq!(first, second);
        assert_eq!(std::fs::read(f.work().join("a.txt")).unwrap(), tree_first);
        assert_eq!(std::fs::read(f.cache().join(DOTENV_FILE)).unwrap(), env_first);
    }

    #[test]
    fn unwritable_dotenv_leaves_tree_and_current_untouched() {
        let f = fixture(Declarations::default().with_file("a.txt", true));
        f.store.create_environment(record("dev", "v1")).unwrap();
        f.store.create_environment(record("prod", "v1")).unwrap();
        f.store.set_file("dev", "a.txt", b"dev").unwrap();
        f.store.set_file("prod", "a.txt", b"prod").unwrap();
        f.store.set_secret("prod", "PORT", "443").unwrap();
        f.store.materialize("dev").unwrap();

        let dotenv = f.cache().join(DOTENV_FILE);
        std::fs::remove_file(&dotenv).unwrap();
        std::fs::create_dir_all(dotenv.join("blocker")).unwrap();

        assert!(f.store.materialize("prod").is_err());
        assert_eq!(std::fs::read(f.work().join("a.txt")).unwrap(), b"dev");
        assert_eq!(f.store.current_environment().unwrap().as_deref(), Some("dev"));
    }

    #[test]
    fn rollback_restores_and_removes() {
        let dir = tempdir().unwrap();
        let existed = dir.path().join("existed.txt");
        let created = dir.path().join("created.txt");
        std::fs::write(&existed, b"new").unwrap();
        std::fs::write(&created, b"new").unwrap();

        rollback(vec![
            (existed.clone(), Some(b"old".to_vec())),
            (created.clone(), None),
        ]);

        assert_eq!(std::fs::read(&existed).unwrap(), b"old");
        assert!(!created.exists());
    }

    #[test]
    fn empty_cached_file_is_written() {
        let decls = Declarations::default()
            .with_file("empty.cfg", true)
            .with_file("optional.cfg", false);
        let f = fixture(decls);
        f.store.create_environment(record("dev", "v1")).unwrap();
        f.store.set_file("dev", "empty.cfg", b"").unwrap();
        f.store.set_file("dev", "optional.cfg", b"").unwrap();
        std::fs::write(f.work().join("optional.cfg"), b"stale").unwrap();

        let report = f.store.materialize("dev").unwrap();

        assert_eq!(report.written, vec!["empty.cfg", "optional.cfg"]);
        assert!(report.removed.is_empty());
        assert_eq!(std::fs::read(f.work().join("empty.cfg")).unwrap(), b"");
        assert_eq!(std::fs::read(f.work().join("optional.cfg")).unwrap(), b"");
        assert!(f.store.missing_required("dev").unwrap().files.is_empty());
    }

    #[test]
    fn corrupt_secrets_file_is_reported() {
        let f = fixture(Declarations::default());
        f.store.create_environment(record("dev", "v1")).unwrap();
        let secrets = f.cache().join("dev").join(SECRETS_FILE);
        std::fs::write(&secrets, b"{not json").unwrap();

        assert!(matches!(
            f.store.load_snapshot("dev"),
            Err(SyncError::CorruptCache { ref path, .. }) if path == &secrets
        ));
    }

    #[test]
    fn locally_modified_compares_bytes() {
        let f = fixture(Declarations::default());
        f.store.create_environment(record("dev", "v1")).unwrap();
        f.store.set_file("dev", "same.txt", b"same").unwrap();
        f.store.set_file("dev", "edited.txt", b"before").unwrap();
        f.store.set_file("dev", "deleted.txt", b"gone").unwrap();
        f.store.materialize("dev").unwrap();

        std::fs::write(f.work().join("edited.txt"), b"after").unwrap();
        std::fs::remove_file(f.work().join("deleted.txt")).unwrap();
        std::fs::write(f.work().join("untracked.txt"), b"x").unwrap();

        assert_eq!(f.store.locally_modified("dev").unwrap(), vec!["edited.txt"]);
    }

    // ===== Dotenv Tests =====

    #[test]
    fn dotenv_quotes_when_needed() {
        let mut secrets = BTreeMap::new();
        secrets.insert("PLAIN".to_string(), "postgres://db:5432/app".to_string());
        secrets.insert("SPACED".to_string(), "hello world".to_string());
        secrets.insert("TRICKY".to_string(), "a\"b\\c\nd".to_string());

        let rendered = render_dotenv(&secrets);

        assert_eq!(
            rendered,
            "PLAIN=postgres://db:5432/app\nSPACED=\"hello world\"\nTRICKY=\"a\\\"b\\\\c\\nd\"\n"
        );
    }
}
