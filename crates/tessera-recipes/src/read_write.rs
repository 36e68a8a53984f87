//! Reader/writer lock pair over one base path
//!
//! Readers and writers queue under the same base path and are ordered by
//! creation. A writer waits for everything ahead of it; a reader only waits
//! for writers ahead of it, so a pending writer is never overtaken by readers
//! that arrive after it. The holder of the write lock may also take the read
//! lock, which allows downgrading by acquiring read and then releasing write.

use std::sync::Arc;

use tessera_client::{ClientError, CoordinationClient};
use tessera_common::{READ_LOCK_NAME, WRITE_LOCK_NAME, make_path};

use crate::driver::LockDriver;
use crate::error::{LockError, Result};
use crate::mutex::{InterProcessMutex, MutexOptions};

pub struct InterProcessReadWriteLock {
    read: InterProcessMutex,
    write: InterProcessMutex,
}

impl InterProcessReadWriteLock {
    pub fn new(client: Arc<dyn CoordinationClient>, path: impl Into<String>) -> Self {
        Self::with_options(client, path, MutexOptions::default())
    }

    /// Build both locks from shared options. The lock name and lease count of
    /// `options` are ignored.
    pub fn with_options(
        client: Arc<dyn CoordinationClient>,
        path: impl Into<String>,
        options: MutexOptions,
    ) -> Self {
        let path = path.into();

        let write = InterProcessMutex::with_driver(
            client.clone(),
            path.clone(),
            LockDriver::Write,
            MutexOptions {
                lock_name: WRITE_LOCK_NAME.to_string(),
                max_leases: 1,
                ..options.clone()
            },
        );
        let read = InterProcessMutex::with_driver(
            client,
            path,
            LockDriver::Read {
                writer: write.registry(),
            },
            MutexOptions {
                lock_name: READ_LOCK_NAME.to_string(),
                max_leases: usize::MAX,
                ..options
            },
        );

        Self { read, write }
    }

    /// The shared lock. Returns the same instance on every call.
    pub fn read_lock(&self) -> &InterProcessMutex {
        &self.read
    }

    /// The exclusive lock. Returns the same instance on every call.
    pub fn write_lock(&self) -> &InterProcessMutex {
        &self.write
    }

    pub fn path(&self) -> &str {
        self.write.path()
    }

    /// Every reader and writer in queue order.
    pub async fn get_participant_nodes(&self) -> Result<Vec<String>> {
        let internals = self.write.internals();
        let children = match internals.get_sorted_children().await {
            Ok(children) => children,
            Err(LockError::Client(ClientError::NoNode(_))) => return Ok(Vec::new()),
            Err(err) => return Err(err),
        };

        Ok(children
            .iter()
            .filter(|name| name.contains(READ_LOCK_NAME) || name.contains(WRITE_LOCK_NAME))
            .map(|name| make_path(&[self.path(), name]))
            .collect())
    }
}
