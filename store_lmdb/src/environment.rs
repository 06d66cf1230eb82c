//! LMDB environment setup.

use std::path::Path;

use heed::types::Bytes;
use heed::{Database, Env, EnvOpenOptions};

use crate::LmdbError;

/// Default memory map size (16 GiB). LMDB only reserves address space.
pub const DEFAULT_MAP_SIZE: usize = 16 * 1024 * 1024 * 1024;

const MAX_DBS: u32 = 3;

/// Wraps the LMDB environment and all database handles.
#[derive(Clone)]
pub struct LmdbEnvironment {
    env: Env,
    /// Block bytes, heights and the per-height index.
    pub(crate) blocks_db: Database<Bytes, Bytes>,
    /// Transaction id -> first-seen height.
    pub(crate) tx_ids_db: Database<Bytes, Bytes>,
    pub(crate) meta_db: Database<Bytes, Bytes>,
}

impl LmdbEnvironment {
    /// Open or create an LMDB environment at the given directory.
    pub fn open(path: &Path, map_size: usize) -> Result<Self, LmdbError> {
        std::fs::create_dir_all(path)?;
        // SAFETY: the environment is opened once per directory by this
        // process and never opened twice concurrently.
        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(map_size)
                .max_dbs(MAX_DBS)
                .open(path)?
        };

        let mut wtxn = env.write_txn()?;
        let blocks_db = env.create_database(&mut wtxn, Some("blocks"))?;
        let tx_ids_db = env.create_database(&mut wtxn, Some("tx_ids"))?;
        let meta_db = env.create_database(&mut wtxn, Some("meta"))?;
        wtxn.commit()?;

        tracing::debug!(path = %path.display(), "opened LMDB environment");
        Ok(Self {
            env,
            blocks_db,
            tx_ids_db,
            meta_db,
        })
    }

    pub fn env(&self) -> &Env {
        &self.env
    }
}
