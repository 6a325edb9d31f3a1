//! One-shot, thread-safe file construction for generated code.

use super::FileDescriptor;
use crate::error::Result;
use parking_lot::{const_mutex, Mutex};
use std::fmt;
use std::sync::OnceLock;
use tracing::debug;

/// A [`FileDescriptor`] built on first use.
///
/// Intended for `static` items in generated code:
///
/// ```
/// use protolith_core::{DescriptorPool, LazyFileDescriptor};
/// use prost_types::FileDescriptorProto;
///
/// static FILE: LazyFileDescriptor = LazyFileDescriptor::new(|| {
///     let proto = FileDescriptorProto {
///         name: Some("empty.proto".to_string()),
///         ..Default::default()
///     };
///     DescriptorPool::new().add_file_descriptor_proto(proto)
/// });
///
/// assert_eq!(FILE.get().unwrap().name(), "empty.proto");
/// ```
///
/// The first caller runs the builder. Callers arriving while it runs wait
/// for the same build; once it has succeeded every later call is a
/// lock-free read. A failed build is not remembered, so the next call
/// retries it.
pub struct LazyFileDescriptor {
    init: fn() -> Result<FileDescriptor>,
    cell: OnceLock<FileDescriptor>,
    building: Mutex<()>,
}

impl LazyFileDescriptor {
    /// Creates an unbuilt descriptor that will be produced by `init`.
    pub const fn new(init: fn() -> Result<FileDescriptor>) -> Self {
        Self {
            init,
            cell: OnceLock::new(),
            building: const_mutex(()),
        }
    }

    /// Returns the built descriptor, building it first if necessary.
    pub fn get(&self) -> Result<&FileDescriptor> {
        if let Some(file) = self.cell.get() {
            return Ok(file);
        }

        let _guard = self.building.lock();
        if let Some(file) = self.cell.get() {
            return Ok(file);
        }

        let file = (self.init)()?;
        debug!("Lazily built {}", file.name());
        Ok(self.cell.get_or_init(|| file))
    }

    /// Returns true once a build has succeeded.
    pub fn is_built(&self) -> bool {
        self.cell.get().is_some()
    }
}

impl fmt::Debug for LazyFileDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LazyFileDescriptor")
            .field("file", &self.cell.get())
            .finish()
    }
}
