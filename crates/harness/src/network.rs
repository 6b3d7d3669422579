use std::path::{Path, PathBuf};

use iocat_engine::{ConflictReport, EngineError};
use tempfile::TempDir;

use crate::TestPeer;

/// Several devices sharing one catalog through a synced folder.
///
/// Each peer works on its own copy under `devices/`; `publish` and `pull`
/// move catalog files through `cloud/` the way a file-sync service would.
pub struct TestNetwork {
    root: TempDir,
    peers: Vec<TestPeer>,
}

pub const SHARED_NAME: &str = "shared.iocat";

impl TestNetwork {
    pub fn new() -> Result<Self, EngineError> {
        let root = tempfile::tempdir()?;
        std::fs::create_dir_all(root.path().join("cloud"))?;
        std::fs::create_dir_all(root.path().join("devices"))?;
        Ok(Self {
            root,
            peers: Vec::new(),
        })
    }

    pub fn root(&self) -> &Path {
        self.root.path()
    }

    pub fn cloud_path(&self) -> PathBuf {
        self.root.path().join("cloud").join(SHARED_NAME)
    }

    fn devices(&self) -> PathBuf {
        self.root.path().join("devices")
    }

    /// The first peer creates the catalog; later peers start from a copy of
    /// the first peer's file.
    pub fn add_peer(&mut self, name: &str) -> Result<usize, EngineError> {
        let peer = match self.peers.first() {
            None => TestPeer::create(&self.devices(), name)?,
            Some(first) => TestPeer::copy_of(&self.devices(), name, &first.path())?,
        };
        self.peers.push(peer);
        Ok(self.peers.len() - 1)
    }

    pub fn peer(&self, index: usize) -> &TestPeer {
        &self.peers[index]
    }

    pub fn peer_mut(&mut self, index: usize) -> &mut TestPeer {
        &mut self.peers[index]
    }

    /// Copy a peer's catalog file over the shared copy.
    pub fn publish(&self, index: usize) -> Result<(), EngineError> {
        std::fs::copy(self.peers[index].path(), self.cloud_path())?;
        Ok(())
    }

    /// Merge the shared copy into a peer's catalog.
    pub fn pull(&mut self, index: usize) -> Result<ConflictReport, EngineError> {
        let cloud = self.cloud_path();
        self.peers[index].sync_with(&cloud)
    }

    /// Merge peer `from`'s file directly into peer `to`.
    pub fn sync(&mut self, from: usize, to: usize) -> Result<ConflictReport, EngineError> {
        let source = self.peers[from].path();
        self.peers[to].sync_with(&source)
    }
}
