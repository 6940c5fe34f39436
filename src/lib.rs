//! pypi-private publishes Python package distributions to a private, static
//! package index.
//!
//! ## how?
//!
//! An index is just a tree of files: one directory per package holding its
//! dists, plus an `index.html` in every directory that links to what's
//! there. Installers like pip read those pages as a "simple" repository.
//! [`Publisher`] uploads new dists through a [`Storage`] backend and then
//! regenerates the affected index pages.
//!
//! ## supported storage
//!
//! - Local filesystem
//! - AWS S3 (and S3-compatible endpoints)
//! - Azure blob storage
//!
//! [`Publisher`]: crate::publish::Publisher
//! [`Storage`]: crate::storage::Storage

#[cfg(test)]
mod fs;
pub mod index;
pub mod publish;
pub mod storage;
pub mod util;

pub mod prelude {
    pub use crate::publish::{Dist, PublishError, PublishReport, Publisher};
    pub use crate::storage::{load_storage, Storage, StorageError};
    pub use crate::util::config::{ContentHash, PrivateIndexConfig, StorageType};

    pub mod storage {
        pub use crate::storage::azure;
        pub use crate::storage::{LocalFileSystemStorage, ObjectStoreStorage, S3Storage};
    }

    pub mod index {
        pub use crate::index::{build_index, IndexItem, IndexKind};
    }
}
