//! # davvc-engine
//!
//! Per-file version control for a WebDAV working tree.
//!
//! This crate provides:
//! - Mapping from working-tree paths to history-tree directories
//! - A bounded, adaptive cache of open repository handles
//! - Provisioning of one git repository per versioned file
//! - The checkin/checkout/uncheckout state machine over repository HEAD
//!
//! ## Example
//!
//! ```ignore
//! use davvc_engine::VcStore;
//!
//! let store = VcStore::open("/srv/webdav", "root", "vc_root", 512)?;
//!
//! // Place a file under version control and read back its HEAD commit.
//! let head = store.version_control("/notes.txt")?;
//! println!("checked in at {head}");
//! ```

mod cache;
mod error;
mod path_map;
mod store;

pub use cache::RepoCache;
pub use error::{VcError, VcResult};
pub use path_map::history_dir_name;
pub use store::{RepoHandle, VcStore, PRIMARY_BRANCH_REF, VC_FILE_NAME};
