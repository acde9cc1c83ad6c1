use std::fs;
use std::io;
use std::os::unix::fs::symlink;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{SecondsFormat, Utc};
use git2::build::CheckoutBuilder;
use git2::{Commit, ErrorCode, Oid, Repository, RepositoryInitOptions, Signature};
use log::debug;

use crate::cache::RepoCache;
use crate::error::{VcError, VcResult};
use crate::path_map::history_dir_name;

/// Name of the tracked blob inside every history subdirectory.
pub const VC_FILE_NAME: &str = "init";

/// The conventional primary branch of each per-file repository.
pub const PRIMARY_BRANCH_REF: &str = "refs/heads/master";

/// Shared handle to an open per-file repository.
///
/// The mutex satisfies the sharing rules; exclusion between mutators of the
/// same path is the caller's per-path lock, not this mutex.
pub type RepoHandle = Arc<Mutex<Repository>>;

/// The per-file version control store.
///
/// Maps live files under the working tree to private repositories under the
/// history tree and drives the checkin/checkout state machine. Paths given
/// to the operations are working-tree-relative in `/`-rooted form, exactly
/// as the request gatekeeper resolved them.
#[derive(Clone)]
pub struct VcStore {
    fs_root: PathBuf,
    vc_root: PathBuf,
    cache: RepoCache<PathBuf, RepoHandle>,
    /// Serializes cache misses: a concurrent first version-control of a
    /// path sees either no history directory or a fully initialized one.
    provision_gate: Arc<Mutex<()>>,
}

impl VcStore {
    /// Open (and create if necessary) the working and history trees under
    /// `root`, with a repository cache of `cache_size` entries.
    pub fn open<P: AsRef<Path>>(
        root: P,
        fs_prefix: &str,
        vc_prefix: &str,
        cache_size: usize,
    ) -> VcResult<VcStore> {
        let root = root.as_ref();
        let fs_prefix = if fs_prefix.is_empty() { "root" } else { fs_prefix };
        let vc_prefix = if vc_prefix.is_empty() { "vc_root" } else { vc_prefix };

        fs::create_dir_all(root)?;
        let fs_root = root.join(fs_prefix.trim_start_matches('/'));
        let vc_root = root.join(vc_prefix.trim_start_matches('/'));
        fs::create_dir_all(&fs_root)?;
        fs::create_dir_all(&vc_root)?;

        // Symlink targets must be absolute, so resolve both trees up front.
        Ok(VcStore {
            fs_root: fs_root.canonicalize()?,
            vc_root: vc_root.canonicalize()?,
            cache: RepoCache::new(cache_size),
            provision_gate: Arc::new(Mutex::new(())),
        })
    }

    /// Root of the working tree clients see over WebDAV.
    pub fn fs_root(&self) -> &Path {
        &self.fs_root
    }

    /// Root of the history tree holding one repository per versioned file.
    pub fn vc_root(&self) -> &Path {
        &self.vc_root
    }

    fn file_path(&self, rel: &str) -> PathBuf {
        self.fs_root.join(rel.trim_start_matches('/'))
    }

    /// Place `rel` under version control if it is not already, and return
    /// the commit id HEAD currently points at.
    pub fn version_control(&self, rel: &str) -> VcResult<String> {
        let handle = self.get_repo(rel)?;
        let repo = handle.lock().unwrap();
        let head = repo.head()?;
        let oid = head
            .target()
            .ok_or_else(|| git2::Error::from_str("HEAD does not point at a commit"))?;
        Ok(oid.to_string())
    }

    /// Detach HEAD at the commit `version` resolves to and force the
    /// working copy to that commit's content.
    pub fn checkout(&self, rel: &str, version: &str) -> VcResult<()> {
        let handle = self.get_repo(rel)?;
        let repo = handle.lock().unwrap();

        let object = repo.revparse_single(version).map_err(|err| {
            match err.code() {
                ErrorCode::NotFound | ErrorCode::InvalidSpec | ErrorCode::Ambiguous => {
                    VcError::UnknownVersion(version.to_string())
                }
                _ => VcError::Git(err),
            }
        })?;
        let commit = object
            .peel_to_commit()
            .map_err(|_| VcError::UnknownVersion(version.to_string()))?;

        let mut opts = CheckoutBuilder::new();
        opts.force();
        repo.checkout_tree(commit.as_object(), Some(&mut opts))?;
        repo.set_head_detached(commit.id())?;
        Ok(())
    }

    /// Reattach HEAD to the primary branch and force the working copy back
    /// to its tip. Idempotent when already checked in.
    pub fn uncheckout(&self, rel: &str) -> VcResult<()> {
        let handle = self.get_repo(rel)?;
        let repo = handle.lock().unwrap();

        repo.set_head(PRIMARY_BRANCH_REF)?;
        let mut opts = CheckoutBuilder::new();
        opts.force();
        repo.checkout_head(Some(&mut opts))?;
        Ok(())
    }

    /// Snapshot the current working copy as a new commit on the primary
    /// branch and return its id.
    pub fn checkin(&self, rel: &str) -> VcResult<String> {
        let handle = self.get_repo(rel)?;
        let repo = handle.lock().unwrap();

        let head = repo.head()?;
        if head.name() != Some(PRIMARY_BRANCH_REF) {
            return Err(VcError::CheckedOut);
        }
        drop(head);

        let oid = commit_tracked(&repo)?;
        Ok(oid.to_string())
    }

    /// Resolve the repository handle for a working-tree path, provisioning
    /// the repository on first use.
    fn get_repo(&self, rel: &str) -> VcResult<RepoHandle> {
        let file_path = self.file_path(rel);
        if let Some(handle) = self.cache.get(&file_path) {
            debug!("CacheHit resource={}", file_path.display());
            return Ok(handle);
        }

        let _gate = self.provision_gate.lock().unwrap();
        // The winner of a provisioning race may have inserted the handle
        // while this request waited on the gate.
        if let Some(handle) = self.cache.get(&file_path) {
            debug!("CacheHit resource={}", file_path.display());
            return Ok(handle);
        }

        let history_dir = self.vc_root.join(history_dir_name(rel));
        let repo = match fs::create_dir(&history_dir) {
            Ok(()) => self.provision(&file_path, &history_dir)?,
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
                Repository::open(&history_dir)?
            }
            Err(err) => return Err(err.into()),
        };

        debug!("CacheMiss resource={}", file_path.display());
        let handle = Arc::new(Mutex::new(repo));
        self.cache.put(file_path, handle.clone());
        Ok(handle)
    }

    /// First-time setup of a file's history: move the live file into the
    /// history subdirectory, record the initial commit, then substitute a
    /// symlink at the original path. The commit happens before the symlink
    /// so the history subdirectory plus its blob is the durable commitment
    /// point; a crash in between is a manual-recovery case.
    fn provision(&self, file_path: &Path, history_dir: &Path) -> VcResult<Repository> {
        let blob_path = history_dir.join(VC_FILE_NAME);
        fs::rename(file_path, &blob_path)?;

        let mut opts = RepositoryInitOptions::new();
        opts.initial_head("master");
        let repo = Repository::init_opts(history_dir, &opts)?;
        commit_tracked(&repo)?;

        symlink(&blob_path, file_path)?;
        Ok(repo)
    }
}

/// Stage the tracked blob and commit it with the fixed author identity and
/// the current timestamp as message. Commits that would not change the tree
/// are rejected.
fn commit_tracked(repo: &Repository) -> VcResult<Oid> {
    let mut index = repo.index()?;
    index.add_path(Path::new(VC_FILE_NAME))?;
    index.write()?;
    let tree_id = index.write_tree()?;

    let parent = match repo.head() {
        Ok(head) => Some(head.peel_to_commit()?),
        Err(err)
            if err.code() == ErrorCode::UnbornBranch || err.code() == ErrorCode::NotFound =>
        {
            None
        }
        Err(err) => return Err(err.into()),
    };
    if let Some(parent) = &parent {
        if parent.tree_id() == tree_id {
            return Err(VcError::EmptyCommit);
        }
    }

    let tree = repo.find_tree(tree_id)?;
    let signature = Signature::now("root", "root@root.com")?;
    let message = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
    let parents: Vec<&Commit> = parent.iter().collect();
    let oid = repo.commit(Some("HEAD"), &signature, &signature, &message, &tree, &parents)?;
    Ok(oid)
}
