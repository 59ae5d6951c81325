//! Authorization registry: the set of device identifiers allowed to grant access.
//!
//! The on-disk store is plain text, one identifier per line. Every mutation is
//! written through to disk before the call returns. Storage failures never
//! propagate: a bad store loads as empty, and a failed write leaves the
//! in-memory set authoritative while flagging the disk copy as stale.
//!
//! Several processes may hold a registry over the same file (the daemon and
//! any number of CLI invocations). [`AuthorizationRegistry::refresh_if_changed`]
//! notices when another writer replaced the file and reloads it.

use crate::error::{GateError, GateResult};
use crate::identity::DeviceId;
use log::{error, info, warn};
use std::collections::HashSet;
use std::fs;
use std::io::{ErrorKind, Write};
use std::os::unix::fs::{MetadataExt, PermissionsExt};
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tempfile::NamedTempFile;

/// Identity of the store file as last seen: every write renames a fresh
/// inode into place, so any external write changes this.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct StoreStamp {
    inode: u64,
    len: u64,
    modified: Option<SystemTime>,
}

impl StoreStamp {
    fn of(path: &Path) -> Option<Self> {
        let meta = fs::metadata(path).ok()?;
        Some(Self {
            inode: meta.ino(),
            len: meta.len(),
            modified: meta.modified().ok(),
        })
    }
}

#[derive(Debug)]
pub struct AuthorizationRegistry {
    path: PathBuf,
    members: HashSet<DeviceId>,
    stale_on_disk: bool,
    seen: Option<StoreStamp>,
}

impl AuthorizationRegistry {
    /// Load the registry stored at `path`. Missing or unreadable stores yield an empty set.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let seen = StoreStamp::of(&path);
        let members = load_members(&path);
        Self {
            path,
            members,
            stale_on_disk: false,
            seen,
        }
    }

    /// Replace the in-memory set with whatever the store holds now.
    pub fn reload(&mut self) {
        self.seen = StoreStamp::of(&self.path);
        self.members = load_members(&self.path);
        self.stale_on_disk = false;
    }

    /// Reload if another process rewrote the store since we last read or
    /// wrote it. Returns whether a reload happened.
    ///
    /// Skipped while the disk copy is stale: memory holds changes the file
    /// does not.
    pub fn refresh_if_changed(&mut self) -> bool {
        if self.stale_on_disk || StoreStamp::of(&self.path) == self.seen {
            return false;
        }
        info!(
            "registry {} changed on disk; reloading",
            self.path.display()
        );
        self.reload();
        true
    }

    pub fn is_authorized(&self, id: &DeviceId) -> bool {
        self.members.contains(id)
    }

    /// Add `id` and persist. Returns `false` when it was already present.
    pub fn register(&mut self, id: DeviceId) -> bool {
        if self.members.contains(&id) {
            return false;
        }
        info!("registering device {id}");
        self.members.insert(id);
        self.persist();
        true
    }

    /// Drop `id` and persist. Returns `false` when it was not registered.
    pub fn remove(&mut self, id: &DeviceId) -> bool {
        if !self.members.remove(id) {
            return false;
        }
        info!("removed device {id} from registry");
        self.persist();
        true
    }

    /// Current members, sorted.
    pub fn list(&self) -> Vec<DeviceId> {
        let mut ids: Vec<DeviceId> = self.members.iter().cloned().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// True after a failed write, until the next successful one.
    pub fn is_stale_on_disk(&self) -> bool {
        self.stale_on_disk
    }

    fn persist(&mut self) {
        match write_store(&self.path, &self.list()) {
            Ok(()) => {
                self.seen = StoreStamp::of(&self.path);
                if self.stale_on_disk {
                    info!("registry {} back in sync with memory", self.path.display());
                }
                self.stale_on_disk = false;
            }
            Err(err) => {
                error!(
                    "{err}; on-disk registry is stale, in-memory set ({} devices) stays authoritative",
                    self.members.len()
                );
                self.stale_on_disk = true;
            }
        }
    }
}

fn load_members(path: &Path) -> HashSet<DeviceId> {
    match read_store(path) {
        Ok(members) => {
            info!(
                "loaded {} authorized devices from {}",
                members.len(),
                path.display()
            );
            members
        }
        Err(GateError::Io(err)) if err.kind() == ErrorKind::NotFound => {
            info!(
                "registry {} does not exist yet; starting empty",
                path.display()
            );
            HashSet::new()
        }
        Err(err) => {
            warn!(
                "registry {} unreadable ({err}); treating as empty",
                path.display()
            );
            HashSet::new()
        }
    }
}

/// Parse a store file: one identifier per line, whitespace trimmed, blanks skipped.
pub fn read_store(path: &Path) -> GateResult<HashSet<DeviceId>> {
    let contents = fs::read_to_string(path)?;
    parse_store(&contents)
}

pub fn parse_store(contents: &str) -> GateResult<HashSet<DeviceId>> {
    contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(DeviceId::new)
        .collect()
}

/// Overwrite the store with `ids`, one per line.
///
/// The content goes to a uniquely named temp file in the same directory and
/// is renamed over the target, so readers never observe a half-written store
/// and concurrent writers never share a temp file.
pub fn write_store(path: &Path, ids: &[DeviceId]) -> GateResult<()> {
    write_store_inner(path, ids).map_err(|err| GateError::RegistryPersist {
        path: path.to_path_buf(),
        reason: err.to_string(),
    })
}

fn write_store_inner(path: &Path, ids: &[DeviceId]) -> std::io::Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => {
            fs::create_dir_all(parent)?;
            parent
        }
        _ => Path::new("."),
    };

    let mut tmp = NamedTempFile::new_in(dir)?;
    for id in ids {
        writeln!(tmp, "{id}")?;
    }
    tmp.as_file().sync_all()?;
    tmp.as_file()
        .set_permissions(fs::Permissions::from_mode(0o600))?;
    tmp.persist(path).map_err(|err| err.error)?;
    Ok(())
}
