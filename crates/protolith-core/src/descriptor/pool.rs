//! Pool storage: descriptor arenas, the symbol table and field indexes.

use super::{
    build, EnumDescriptor, FieldDescriptor, FileDescriptor, Kind, Label, MessageDescriptor,
    ServiceDescriptor, SharedProto, Syntax,
};
use crate::error::{Error, Result};
use crate::value::Value;
use prost::Message;
use prost_types::{FileDescriptorProto, FileDescriptorSet};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::ops::Range;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, trace};

/// A set of cross-linked files sharing one symbol table.
///
/// The pool is an immutable snapshot behind an [`Arc`]; cloning it is cheap.
/// Adding a file works on a private copy that replaces the snapshot only once
/// the file has been fully validated, so descriptors handed out earlier keep
/// pointing at a consistent graph.
///
/// Arenas only grow, so a descriptor taken from an older snapshot is equal
/// to the same entity taken from any later snapshot of the pool.
#[derive(Clone, Default)]
pub struct DescriptorPool {
    inner: Arc<PoolInner>,
    lineage: Arc<Lineage>,
}

/// Chain of snapshots that extend one another.
///
/// Committing on top of a snapshot that is no longer the head (a clone that
/// was grown elsewhere) starts a new lineage, which shares the parent's
/// entities below the arena lengths it forked at.
#[derive(Default)]
struct Lineage {
    /// File count of the latest committed snapshot
    head: Mutex<usize>,
    parent: Option<(Arc<Lineage>, Watermark)>,
}

/// Arena lengths of a snapshot.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Watermark {
    pub(crate) files: usize,
    pub(crate) messages: usize,
    pub(crate) fields: usize,
    pub(crate) oneofs: usize,
    pub(crate) enums: usize,
    pub(crate) enum_values: usize,
    pub(crate) services: usize,
    pub(crate) methods: usize,
}

impl Watermark {
    fn of(inner: &PoolInner) -> Self {
        Self {
            files: inner.files.len(),
            messages: inner.messages.len(),
            fields: inner.fields.len(),
            oneofs: inner.oneofs.len(),
            enums: inner.enums.len(),
            enum_values: inner.enum_values.len(),
            services: inner.services.len(),
            methods: inner.methods.len(),
        }
    }
}

/// Oldest lineage that already held the entity at `index`.
fn origin(
    mut lineage: &Arc<Lineage>,
    index: usize,
    bound: fn(&Watermark) -> usize,
) -> &Arc<Lineage> {
    while let Some((parent, watermark)) = &lineage.parent {
        if index >= bound(watermark) {
            break;
        }
        lineage = parent;
    }
    lineage
}

#[derive(Clone, Default)]
pub(crate) struct PoolInner {
    pub(crate) files: Vec<FileData>,
    pub(crate) messages: Vec<MessageData>,
    pub(crate) fields: Vec<FieldData>,
    pub(crate) oneofs: Vec<OneofData>,
    pub(crate) enums: Vec<EnumData>,
    pub(crate) enum_values: Vec<EnumValueData>,
    pub(crate) services: Vec<ServiceData>,
    pub(crate) methods: Vec<MethodData>,

    /// Fully-qualified name to symbol. Package entries are shared between
    /// all files declaring that package.
    pub(crate) symbols: HashMap<String, Symbol>,
    pub(crate) file_names: HashMap<String, usize>,
    pub(crate) fields_by_number: HashMap<(usize, u32), usize>,
    pub(crate) fields_by_name: HashMap<(usize, String), usize>,
    pub(crate) extensions_by_number: HashMap<(usize, u32), usize>,
}

/// Entry in the symbol table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Symbol {
    /// A package, recorded with the first file that declared it
    Package(usize),
    Message(usize),
    Field(usize),
    Oneof(usize),
    Enum(usize),
    EnumValue(usize),
    Service(usize),
    Method(usize),
}

impl Symbol {
    /// Returns true for symbols that may be used as a field type
    pub(crate) fn is_type(self) -> bool {
        matches!(self, Symbol::Message(_) | Symbol::Enum(_))
    }

    /// Returns true for symbols that can contain other symbols
    pub(crate) fn is_aggregate(self) -> bool {
        matches!(
            self,
            Symbol::Message(_) | Symbol::Enum(_) | Symbol::Package(_) | Symbol::Service(_)
        )
    }
}

#[derive(Clone)]
pub(crate) struct FileData {
    pub(crate) name: String,
    pub(crate) package: String,
    pub(crate) syntax: Syntax,
    pub(crate) proto: SharedProto,
    pub(crate) allow_unknown_dependencies: bool,
    pub(crate) dependencies: Vec<usize>,
    pub(crate) public_dependencies: Vec<usize>,
    pub(crate) messages: Vec<usize>,
    pub(crate) enums: Vec<usize>,
    pub(crate) services: Vec<usize>,
    pub(crate) extensions: Vec<usize>,
}

#[derive(Clone)]
pub(crate) struct MessageData {
    pub(crate) name: String,
    pub(crate) full_name: String,
    pub(crate) file: usize,
    pub(crate) parent: Option<usize>,
    pub(crate) index: usize,
    pub(crate) fields: Vec<usize>,
    pub(crate) oneofs: Vec<usize>,
    pub(crate) nested_messages: Vec<usize>,
    pub(crate) nested_enums: Vec<usize>,
    pub(crate) extensions: Vec<usize>,
    pub(crate) extension_ranges: Vec<Range<u32>>,
    pub(crate) map_entry: bool,
    pub(crate) message_set: bool,
}

#[derive(Clone)]
pub(crate) struct FieldData {
    pub(crate) name: String,
    pub(crate) full_name: String,
    pub(crate) json_name: String,
    pub(crate) file: usize,
    pub(crate) index: usize,
    pub(crate) number: u32,
    pub(crate) label: Label,
    pub(crate) kind: Kind,
    /// False until the kind is known, either declared or inferred from the
    /// resolved type name.
    pub(crate) kind_declared: bool,
    pub(crate) type_name: Option<String>,
    pub(crate) extendee: Option<String>,
    pub(crate) is_extension: bool,
    /// Containing message; for extensions, filled in when the extendee is
    /// resolved.
    pub(crate) containing: Option<usize>,
    /// Declaring message of an extension
    pub(crate) scope: Option<usize>,
    pub(crate) oneof_index: Option<i32>,
    pub(crate) oneof: Option<usize>,
    pub(crate) message_type: Option<usize>,
    pub(crate) enum_type: Option<usize>,
    pub(crate) packed: Option<bool>,
    pub(crate) raw_default: Option<String>,
    pub(crate) default: Option<Value>,
    pub(crate) proto3_optional: bool,
}

#[derive(Clone)]
pub(crate) struct OneofData {
    pub(crate) name: String,
    pub(crate) full_name: String,
    pub(crate) message: usize,
    pub(crate) index: usize,
    pub(crate) fields: Vec<usize>,
    pub(crate) synthetic: bool,
}

#[derive(Clone)]
pub(crate) struct EnumData {
    pub(crate) name: String,
    pub(crate) full_name: String,
    pub(crate) file: usize,
    pub(crate) parent: Option<usize>,
    pub(crate) values: Vec<usize>,
}

#[derive(Clone)]
pub(crate) struct EnumValueData {
    pub(crate) name: String,
    pub(crate) full_name: String,
    pub(crate) number: i32,
    pub(crate) index: usize,
    pub(crate) parent: usize,
}

#[derive(Clone)]
pub(crate) struct ServiceData {
    pub(crate) name: String,
    pub(crate) full_name: String,
    pub(crate) file: usize,
    pub(crate) methods: Vec<usize>,
}

#[derive(Clone)]
pub(crate) struct MethodData {
    pub(crate) name: String,
    pub(crate) full_name: String,
    pub(crate) service: usize,
    pub(crate) input_type: String,
    pub(crate) output_type: String,
    pub(crate) input: Option<usize>,
    pub(crate) output: Option<usize>,
    pub(crate) client_streaming: bool,
    pub(crate) server_streaming: bool,
}

impl PoolInner {
    /// File that defines a symbol.
    pub(crate) fn symbol_file(&self, symbol: Symbol) -> usize {
        match symbol {
            Symbol::Package(file) => file,
            Symbol::Message(i) => self.messages[i].file,
            Symbol::Field(i) => self.fields[i].file,
            Symbol::Oneof(i) => self.messages[self.oneofs[i].message].file,
            Symbol::Enum(i) => self.enums[i].file,
            Symbol::EnumValue(i) => self.enums[self.enum_values[i].parent].file,
            Symbol::Service(i) => self.services[i].file,
            Symbol::Method(i) => self.services[self.methods[i].service].file,
        }
    }

    /// Registers a symbol, failing if the name is taken.
    pub(crate) fn add_symbol(&mut self, full_name: &str, symbol: Symbol) -> Result<()> {
        if let Some(&existing) = self.symbols.get(full_name) {
            let existing_file = self.symbol_file(existing);
            let new_file = self.symbol_file(symbol);

            let reason = if existing_file == new_file {
                match full_name.rsplit_once('.') {
                    Some((scope, name)) => {
                        format!("\"{}\" is already defined in \"{}\".", name, scope)
                    }
                    None => format!("\"{}\" is already defined.", full_name),
                }
            } else {
                format!(
                    "\"{}\" is already defined in file \"{}\".",
                    full_name, self.files[existing_file].name
                )
            };
            return Err(Error::validation(full_name, reason));
        }

        self.symbols.insert(full_name.to_string(), symbol);
        Ok(())
    }

    /// Registers a package and all its parent packages.
    pub(crate) fn add_package(&mut self, package: &str, file: usize) -> Result<()> {
        if package.is_empty() {
            return Ok(());
        }
        if let Some((parent, _)) = package.rsplit_once('.') {
            self.add_package(parent, file)?;
        }

        match self.symbols.get(package) {
            None => {
                self.symbols
                    .insert(package.to_string(), Symbol::Package(file));
                Ok(())
            }
            Some(Symbol::Package(_)) => Ok(()),
            Some(&other) => {
                let name = package.rsplit('.').next().unwrap_or(package);
                Err(Error::validation(
                    &self.files[file].name,
                    format!(
                        "\"{}\" is already defined (as something other than a package) in file \"{}\".",
                        name,
                        self.files[self.symbol_file(other)].name
                    ),
                ))
            }
        }
    }

    /// Files whose symbols `file` may reference: itself, its direct
    /// dependencies and everything re-exported through their public
    /// dependencies.
    pub(crate) fn visible_files(&self, file: usize) -> HashSet<usize> {
        let mut visible = HashSet::new();
        visible.insert(file);

        let mut pending: Vec<usize> = self.files[file].dependencies.clone();
        while let Some(dep) = pending.pop() {
            if visible.insert(dep) {
                pending.extend(self.files[dep].public_dependencies.iter().copied());
            }
        }
        visible
    }
}

impl DescriptorPool {
    /// Creates an empty pool
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn inner(&self) -> &PoolInner {
        &self.inner
    }

    /// Returns true if the arena record at `index` is the same entity in
    /// both pools.
    pub(crate) fn same_entity(
        &self,
        other: &DescriptorPool,
        index: usize,
        bound: fn(&Watermark) -> usize,
    ) -> bool {
        Arc::ptr_eq(
            origin(&self.lineage, index, bound),
            origin(&other.lineage, index, bound),
        )
    }

    /// Replaces the snapshot with `staged`, a grown copy of it.
    fn commit(&mut self, staged: PoolInner) {
        let forked = {
            let mut head = self.lineage.head.lock();
            if *head == self.inner.files.len() {
                *head = staged.files.len();
                false
            } else {
                true
            }
        };
        if forked {
            trace!("Pool snapshot diverged, starting a new lineage");
            self.lineage = Arc::new(Lineage {
                head: Mutex::new(staged.files.len()),
                parent: Some((self.lineage.clone(), Watermark::of(&self.inner))),
            });
        }
        self.inner = Arc::new(staged);
    }

    /// Decodes a serialized `FileDescriptorSet` and adds every file in order.
    ///
    /// Files must appear after their dependencies, as `protoc
    /// --include_imports` emits them.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let set = FileDescriptorSet::decode(bytes)?;
        let mut pool = Self::new();
        pool.add_file_descriptor_set(set)?;
        Ok(pool)
    }

    /// Adds every file of a descriptor set, in order.
    pub fn add_file_descriptor_set(&mut self, set: FileDescriptorSet) -> Result<()> {
        self.add_file_descriptor_set_with(set, false)
    }

    /// Adds every file of a descriptor set as a unit, optionally tolerating
    /// imports that neither the pool nor the set contain.
    ///
    /// All files are built on one staged copy of the pool. If any file fails,
    /// none of them is added.
    pub fn add_file_descriptor_set_with(
        &mut self,
        set: FileDescriptorSet,
        allow_unknown_dependencies: bool,
    ) -> Result<()> {
        let mut staged: Option<PoolInner> = None;
        for proto in set.file {
            let current = staged.as_ref().unwrap_or_else(|| self.inner.as_ref());
            if existing_file(current, &proto)?.is_some() {
                continue;
            }
            let target = staged.get_or_insert_with(|| (*self.inner).clone());
            build::build_file(target, proto, allow_unknown_dependencies)?;
        }

        if let Some(staged) = staged {
            let added = staged.files.len() - self.inner.files.len();
            self.commit(staged);
            debug!(
                "Added {} files to pool ({} files, {} symbols)",
                added,
                self.inner.files.len(),
                self.inner.symbols.len()
            );
        }
        Ok(())
    }

    /// Adds a single file whose dependencies are already in the pool.
    pub fn add_file_descriptor_proto(
        &mut self,
        proto: FileDescriptorProto,
    ) -> Result<FileDescriptor> {
        self.add_file_descriptor_proto_with(proto, false)
    }

    /// Adds a single file, optionally tolerating imports the pool does not
    /// contain.
    ///
    /// Re-adding a file with an identical proto returns the existing
    /// descriptor; re-adding a different file under the same name fails.
    pub fn add_file_descriptor_proto_with(
        &mut self,
        proto: FileDescriptorProto,
        allow_unknown_dependencies: bool,
    ) -> Result<FileDescriptor> {
        if let Some(existing) = existing_file(&self.inner, &proto)? {
            return Ok(FileDescriptor::new(self.clone(), existing));
        }

        let name = proto.name().to_string();
        let mut staged = (*self.inner).clone();
        let index = build::build_file(&mut staged, proto, allow_unknown_dependencies)?;
        self.commit(staged);

        debug!(
            "Added {} to pool ({} files, {} symbols)",
            name,
            self.inner.files.len(),
            self.inner.symbols.len()
        );

        Ok(FileDescriptor::new(self.clone(), index))
    }

    /// Makes `file` and its dependency closure available in this pool.
    ///
    /// Files already present with identical contents are reused; the rest
    /// are rebuilt from their raw protos, dependencies first. A different
    /// file under a name the pool already holds is an error.
    pub(crate) fn import_file(&mut self, file: &FileDescriptor) -> Result<()> {
        if existing_file(&self.inner, &file.proto())?.is_some() {
            return Ok(());
        }
        for dependency in file.dependencies() {
            self.import_file(&dependency)?;
        }
        let allow_unknown = file.parent_pool().inner().files[file.pool_index()]
            .allow_unknown_dependencies;
        self.add_file_descriptor_proto_with((*file.proto()).clone(), allow_unknown)?;
        Ok(())
    }

    pub(crate) fn file_count(&self) -> usize {
        self.inner.files.len()
    }

    /// Files in the order they were added
    pub fn files(&self) -> impl ExactSizeIterator<Item = FileDescriptor> + '_ {
        (0..self.inner.files.len()).map(|i| FileDescriptor::new(self.clone(), i))
    }

    /// File with the given name
    pub fn get_file_by_name(&self, name: &str) -> Option<FileDescriptor> {
        self.inner
            .file_names
            .get(name)
            .map(|&i| FileDescriptor::new(self.clone(), i))
    }

    /// Message with the given fully-qualified name (leading dot optional)
    pub fn get_message_by_name(&self, name: &str) -> Option<MessageDescriptor> {
        match self.inner.symbols.get(name.trim_start_matches('.')) {
            Some(&Symbol::Message(i)) => Some(MessageDescriptor::new(self.clone(), i)),
            _ => None,
        }
    }

    /// Enum with the given fully-qualified name (leading dot optional)
    pub fn get_enum_by_name(&self, name: &str) -> Option<EnumDescriptor> {
        match self.inner.symbols.get(name.trim_start_matches('.')) {
            Some(&Symbol::Enum(i)) => Some(EnumDescriptor::new(self.clone(), i)),
            _ => None,
        }
    }

    /// Service with the given fully-qualified name (leading dot optional)
    pub fn get_service_by_name(&self, name: &str) -> Option<ServiceDescriptor> {
        match self.inner.symbols.get(name.trim_start_matches('.')) {
            Some(&Symbol::Service(i)) => Some(ServiceDescriptor::new(self.clone(), i)),
            _ => None,
        }
    }

    /// Extension with the given fully-qualified name (leading dot optional)
    pub fn get_extension_by_name(&self, name: &str) -> Option<FieldDescriptor> {
        match self.inner.symbols.get(name.trim_start_matches('.')) {
            Some(&Symbol::Field(i)) if self.inner.fields[i].is_extension => {
                Some(FieldDescriptor::new(self.clone(), i))
            }
            _ => None,
        }
    }

    /// Messages of every file, nested ones included
    pub fn all_messages(&self) -> impl ExactSizeIterator<Item = MessageDescriptor> + '_ {
        (0..self.inner.messages.len()).map(|i| MessageDescriptor::new(self.clone(), i))
    }

    /// Enums of every file, nested ones included
    pub fn all_enums(&self) -> impl ExactSizeIterator<Item = EnumDescriptor> + '_ {
        (0..self.inner.enums.len()).map(|i| EnumDescriptor::new(self.clone(), i))
    }

    /// Looks up the extension of `extendee` with the given number.
    pub fn get_extension(&self, extendee: &str, number: u32) -> Option<FieldDescriptor> {
        self.get_message_by_name(extendee)?.get_extension(number)
    }
}

/// Index of a file named like `proto` if the pool already holds it.
///
/// Fails if the held file has different contents.
fn existing_file(inner: &PoolInner, proto: &FileDescriptorProto) -> Result<Option<usize>> {
    match inner.file_names.get(proto.name()) {
        None => Ok(None),
        Some(&index) if **inner.files[index].proto.load() == *proto => Ok(Some(index)),
        Some(_) => Err(Error::validation(
            proto.name(),
            "A file with this name is already in the pool.",
        )),
    }
}

impl fmt::Debug for DescriptorPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DescriptorPool")
            .field(
                "files",
                &self.inner.files.iter().map(|f| &f.name).collect::<Vec<_>>(),
            )
            .field("symbols", &self.inner.symbols.len())
            .finish()
    }
}
