//! Two-phase file construction: translate, then cross-link.

use super::pool::{
    EnumData, EnumValueData, FieldData, FileData, MessageData, MethodData, OneofData, PoolInner,
    ServiceData, Symbol,
};
use super::{qualify, Kind, Label, MappedType, Syntax};
use crate::error::{Error, Result};
use crate::value::Value;
use crate::wire::{MAX_FIELD_NUMBER, RESERVED_FIELD_NUMBERS};
use arc_swap::ArcSwap;
use bytes::Bytes;
use prost_types::field_descriptor_proto::{self, Type};
use prost_types::{
    DescriptorProto, EnumDescriptorProto, FieldDescriptorProto, FileDescriptorProto,
    ServiceDescriptorProto,
};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, trace};

/// Translates and cross-links `proto` into `pool`, returning the new file's
/// index.
///
/// `pool` is expected to be a private copy: on error it is left half-built
/// and must be discarded by the caller.
pub(super) fn build_file(
    pool: &mut PoolInner,
    proto: FileDescriptorProto,
    allow_unknown_dependencies: bool,
) -> Result<usize> {
    let syntax = Syntax::try_from(proto.syntax())?;
    if proto.name().is_empty() {
        return Err(Error::validation(proto.package(), "Missing file name."));
    }

    let mark = Mark::of(pool);
    let file = pool.files.len();
    pool.files.push(FileData {
        name: proto.name().to_string(),
        package: proto.package().to_string(),
        syntax,
        proto: Arc::new(ArcSwap::from_pointee(FileDescriptorProto::default())),
        allow_unknown_dependencies,
        dependencies: Vec::new(),
        public_dependencies: Vec::new(),
        messages: Vec::new(),
        enums: Vec::new(),
        services: Vec::new(),
        extensions: Vec::new(),
    });
    pool.file_names.insert(proto.name().to_string(), file);

    Translator {
        pool: &mut *pool,
        file,
        syntax,
    }
    .translate(&proto)?;

    Linker {
        pool: &mut *pool,
        file,
        syntax,
        allow_unknown_dependencies,
        mark,
        visible: HashSet::new(),
    }
    .link(&proto)?;

    debug!(
        "Built {} ({} messages, {} fields, {} enums)",
        proto.name(),
        pool.messages.len() - mark.messages,
        pool.fields.len() - mark.fields,
        pool.enums.len() - mark.enums
    );

    pool.files[file].proto.store(Arc::new(proto));
    Ok(file)
}

/// Arena lengths before a file was added; records past the mark belong to
/// the file being built.
#[derive(Debug, Clone, Copy)]
struct Mark {
    messages: usize,
    fields: usize,
    enums: usize,
    methods: usize,
}

impl Mark {
    fn of(pool: &PoolInner) -> Self {
        Self {
            messages: pool.messages.len(),
            fields: pool.fields.len(),
            enums: pool.enums.len(),
            methods: pool.methods.len(),
        }
    }
}

/// Phase 1: one record and one symbol per declared entity.
struct Translator<'a> {
    pool: &'a mut PoolInner,
    file: usize,
    syntax: Syntax,
}

impl Translator<'_> {
    fn translate(&mut self, proto: &FileDescriptorProto) -> Result<()> {
        let package = proto.package();
        for component in package.split('.').filter(|_| !package.is_empty()) {
            validate_name(component, package)?;
        }
        self.pool.add_package(package, self.file)?;

        for (i, message) in proto.message_type.iter().enumerate() {
            let index = self.add_message(message, package, None, i)?;
            self.pool.files[self.file].messages.push(index);
        }
        for (i, enum_type) in proto.enum_type.iter().enumerate() {
            let index = self.add_enum(enum_type, package, None, i)?;
            self.pool.files[self.file].enums.push(index);
        }
        for (i, service) in proto.service.iter().enumerate() {
            let index = self.add_service(service, package, i)?;
            self.pool.files[self.file].services.push(index);
        }
        for (i, extension) in proto.extension.iter().enumerate() {
            let index = self.add_field(extension, package, None, true, i)?;
            self.pool.files[self.file].extensions.push(index);
        }
        Ok(())
    }

    fn add_message(
        &mut self,
        proto: &DescriptorProto,
        scope: &str,
        parent: Option<usize>,
        index: usize,
    ) -> Result<usize> {
        let full_name = qualify(scope, proto.name());
        validate_name(proto.name(), &full_name)?;

        let options = proto.options.as_ref();
        let message = self.pool.messages.len();
        self.pool.messages.push(MessageData {
            name: proto.name().to_string(),
            full_name: full_name.clone(),
            file: self.file,
            parent,
            index,
            fields: Vec::new(),
            oneofs: Vec::new(),
            nested_messages: Vec::new(),
            nested_enums: Vec::new(),
            extensions: Vec::new(),
            extension_ranges: proto
                .extension_range
                .iter()
                .map(|r| r.start().max(0) as u32..r.end().max(0) as u32)
                .collect(),
            map_entry: options.map(|o| o.map_entry()).unwrap_or(false),
            message_set: options.map(|o| o.message_set_wire_format()).unwrap_or(false),
        });
        self.pool.add_symbol(&full_name, Symbol::Message(message))?;

        for (i, nested) in proto.nested_type.iter().enumerate() {
            let child = self.add_message(nested, &full_name, Some(message), i)?;
            self.pool.messages[message].nested_messages.push(child);
        }
        for (i, enum_type) in proto.enum_type.iter().enumerate() {
            let child = self.add_enum(enum_type, &full_name, Some(message), i)?;
            self.pool.messages[message].nested_enums.push(child);
        }
        for (i, oneof) in proto.oneof_decl.iter().enumerate() {
            let oneof_name = qualify(&full_name, oneof.name());
            validate_name(oneof.name(), &oneof_name)?;
            let index = self.pool.oneofs.len();
            self.pool.oneofs.push(OneofData {
                name: oneof.name().to_string(),
                full_name: oneof_name.clone(),
                message,
                index: i,
                fields: Vec::new(),
                synthetic: false,
            });
            self.pool.add_symbol(&oneof_name, Symbol::Oneof(index))?;
            self.pool.messages[message].oneofs.push(index);
        }
        for (i, field) in proto.field.iter().enumerate() {
            let child = self.add_field(field, &full_name, Some(message), false, i)?;
            self.pool.messages[message].fields.push(child);
        }
        for (i, extension) in proto.extension.iter().enumerate() {
            let child = self.add_field(extension, &full_name, Some(message), true, i)?;
            self.pool.messages[message].extensions.push(child);
        }

        Ok(message)
    }

    fn add_field(
        &mut self,
        proto: &FieldDescriptorProto,
        scope: &str,
        parent: Option<usize>,
        is_extension: bool,
        index: usize,
    ) -> Result<usize> {
        let full_name = qualify(scope, proto.name());
        validate_name(proto.name(), &full_name)?;

        let number = validate_field_number(proto.number(), &full_name)?;

        let label = match proto.label() {
            field_descriptor_proto::Label::Optional => Label::Optional,
            field_descriptor_proto::Label::Required => Label::Required,
            field_descriptor_proto::Label::Repeated => Label::Repeated,
        };
        if label == Label::Required && self.syntax == Syntax::Proto3 {
            return Err(Error::validation(
                &full_name,
                "Required fields are not allowed in proto3.",
            ));
        }

        let (kind, kind_declared) = match proto.r#type {
            Some(raw) => {
                let ty = Type::try_from(raw).map_err(|_| {
                    Error::validation(&full_name, format!("Unknown field type {}.", raw))
                })?;
                (Kind::from(ty), true)
            }
            None => (Kind::Message, false),
        };
        if kind == Kind::Group && self.syntax == Syntax::Proto3 {
            return Err(Error::validation(
                &full_name,
                "Groups are not supported in proto3 syntax.",
            ));
        }

        let extendee = proto.extendee.clone().filter(|s| !s.is_empty());
        if is_extension {
            if extendee.is_none() {
                return Err(Error::validation(
                    &full_name,
                    "FieldDescriptorProto.extendee not set for extension field.",
                ));
            }
            if proto.oneof_index.is_some() {
                return Err(Error::validation(
                    &full_name,
                    "FieldDescriptorProto.oneof_index set for extension field.",
                ));
            }
        } else if extendee.is_some() {
            return Err(Error::validation(
                &full_name,
                "FieldDescriptorProto.extendee set for non-extension field.",
            ));
        }

        let field = self.pool.fields.len();
        self.pool.fields.push(FieldData {
            name: proto.name().to_string(),
            full_name: full_name.clone(),
            json_name: proto
                .json_name
                .clone()
                .unwrap_or_else(|| to_lower_camel_case(proto.name())),
            file: self.file,
            index,
            number,
            label,
            kind,
            kind_declared,
            type_name: proto.type_name.clone().filter(|s| !s.is_empty()),
            extendee,
            is_extension,
            containing: if is_extension { None } else { parent },
            scope: if is_extension { parent } else { None },
            oneof_index: proto.oneof_index,
            oneof: None,
            message_type: None,
            enum_type: None,
            packed: proto.options.as_ref().and_then(|o| o.packed),
            raw_default: proto.default_value.clone(),
            default: None,
            proto3_optional: proto.proto3_optional(),
        });
        self.pool.add_symbol(&full_name, Symbol::Field(field))?;

        if let (false, Some(message)) = (is_extension, parent) {
            if let Some(&other) = self.pool.fields_by_number.get(&(message, number)) {
                return Err(Error::validation(
                    &full_name,
                    format!(
                        "Field number {} has already been used in \"{}\" by field \"{}\".",
                        number, self.pool.messages[message].full_name, self.pool.fields[other].name
                    ),
                ));
            }
            self.pool.fields_by_number.insert((message, number), field);
            self.pool
                .fields_by_name
                .insert((message, proto.name().to_string()), field);
        }

        Ok(field)
    }

    fn add_enum(
        &mut self,
        proto: &EnumDescriptorProto,
        scope: &str,
        parent: Option<usize>,
        _index: usize,
    ) -> Result<usize> {
        let full_name = qualify(scope, proto.name());
        validate_name(proto.name(), &full_name)?;

        if proto.value.is_empty() {
            return Err(Error::validation(
                &full_name,
                "Enums must contain at least one value.",
            ));
        }
        if self.syntax == Syntax::Proto3 && proto.value[0].number() != 0 {
            return Err(Error::validation(
                &full_name,
                "The first enum value must be zero in proto3.",
            ));
        }

        let enum_index = self.pool.enums.len();
        self.pool.enums.push(EnumData {
            name: proto.name().to_string(),
            full_name: full_name.clone(),
            file: self.file,
            parent,
            values: Vec::new(),
        });
        self.pool.add_symbol(&full_name, Symbol::Enum(enum_index))?;

        for (i, value) in proto.value.iter().enumerate() {
            // Values are siblings of their enum, not children of it.
            let value_name = qualify(scope, value.name());
            validate_name(value.name(), &value_name)?;

            let index = self.pool.enum_values.len();
            self.pool.enum_values.push(EnumValueData {
                name: value.name().to_string(),
                full_name: value_name.clone(),
                number: value.number(),
                index: i,
                parent: enum_index,
            });
            self.pool.add_symbol(&value_name, Symbol::EnumValue(index))?;
            self.pool.enums[enum_index].values.push(index);
        }

        Ok(enum_index)
    }

    fn add_service(
        &mut self,
        proto: &ServiceDescriptorProto,
        scope: &str,
        _index: usize,
    ) -> Result<usize> {
        let full_name = qualify(scope, proto.name());
        validate_name(proto.name(), &full_name)?;

        let service = self.pool.services.len();
        self.pool.services.push(ServiceData {
            name: proto.name().to_string(),
            full_name: full_name.clone(),
            file: self.file,
            methods: Vec::new(),
        });
        self.pool.add_symbol(&full_name, Symbol::Service(service))?;

        for method in &proto.method {
            let method_name = qualify(&full_name, method.name());
            validate_name(method.name(), &method_name)?;

            let index = self.pool.methods.len();
            self.pool.methods.push(MethodData {
                name: method.name().to_string(),
                full_name: method_name.clone(),
                service,
                input_type: method.input_type().to_string(),
                output_type: method.output_type().to_string(),
                input: None,
                output: None,
                client_streaming: method.client_streaming(),
                server_streaming: method.server_streaming(),
            });
            self.pool.add_symbol(&method_name, Symbol::Method(index))?;
            self.pool.services[service].methods.push(index);
        }

        Ok(service)
    }
}

/// Which symbols a lookup accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Filter {
    TypesOnly,
    AggregatesOnly,
}

enum Found {
    Visible(Symbol),
    /// Defined, but in a file the current file does not import
    Hidden(usize),
    Missing,
}

/// Phase 2: resolve names and check the rules that need the whole graph.
struct Linker<'a> {
    pool: &'a mut PoolInner,
    file: usize,
    syntax: Syntax,
    allow_unknown_dependencies: bool,
    mark: Mark,
    visible: HashSet<usize>,
}

impl Linker<'_> {
    fn link(mut self, proto: &FileDescriptorProto) -> Result<()> {
        self.link_dependencies(proto)?;
        self.visible = self.pool.visible_files(self.file);

        for message in self.mark.messages..self.pool.messages.len() {
            self.link_oneofs(message)?;
        }
        for field in self.mark.fields..self.pool.fields.len() {
            self.link_field(field)?;
        }
        for message in self.mark.messages..self.pool.messages.len() {
            self.check_message_set(message)?;
        }
        for method in self.mark.methods..self.pool.methods.len() {
            self.link_method(method)?;
        }
        Ok(())
    }

    fn link_dependencies(&mut self, proto: &FileDescriptorProto) -> Result<()> {
        let mut resolved = Vec::with_capacity(proto.dependency.len());
        let mut dependencies = Vec::new();

        for name in &proto.dependency {
            match self.pool.file_names.get(name) {
                Some(&dep) if dep != self.file => {
                    resolved.push(Some(dep));
                    dependencies.push(dep);
                }
                _ if self.allow_unknown_dependencies => {
                    debug!("Dropping unknown dependency {} of {}", name, proto.name());
                    resolved.push(None);
                }
                _ => {
                    return Err(Error::validation(
                        proto.name(),
                        format!("Depends on file \"{}\", but it has not been loaded.", name),
                    ));
                }
            }
        }

        let mut public = Vec::new();
        for &index in &proto.public_dependency {
            let slot = usize::try_from(index)
                .ok()
                .and_then(|i| resolved.get(i))
                .ok_or_else(|| {
                    Error::validation(proto.name(), "Invalid public dependency index.")
                })?;
            if let Some(dep) = slot {
                public.push(*dep);
            }
        }

        let file = &mut self.pool.files[self.file];
        file.dependencies = dependencies;
        file.public_dependencies = public;
        Ok(())
    }

    fn link_oneofs(&mut self, message: usize) -> Result<()> {
        let fields = self.pool.messages[message].fields.clone();
        let oneofs = self.pool.messages[message].oneofs.clone();

        for field in fields {
            let data = &self.pool.fields[field];
            let Some(raw) = data.oneof_index else {
                if data.proto3_optional {
                    return Err(Error::validation(
                        &data.full_name,
                        "Fields with proto3_optional set must be a member of a one-field oneof.",
                    ));
                }
                continue;
            };
            let oneof = usize::try_from(raw)
                .ok()
                .and_then(|i| oneofs.get(i).copied())
                .ok_or_else(|| {
                    Error::validation(
                        &data.full_name,
                        format!(
                            "FieldDescriptorProto.oneof_index {} is out of range for type \"{}\".",
                            raw, self.pool.messages[message].name
                        ),
                    )
                })?;
            self.pool.fields[field].oneof = Some(oneof);
            self.pool.oneofs[oneof].fields.push(field);
        }

        let mut seen_synthetic = false;
        for oneof in oneofs {
            let data = &self.pool.oneofs[oneof];
            if data.fields.is_empty() {
                return Err(Error::validation(
                    &data.full_name,
                    "Oneof must have at least one field.",
                ));
            }
            let synthetic =
                data.fields.len() == 1 && self.pool.fields[data.fields[0]].proto3_optional;
            if synthetic {
                seen_synthetic = true;
            } else if seen_synthetic {
                return Err(Error::validation(
                    &data.full_name,
                    "Synthetic oneofs must come last.",
                ));
            }
            self.pool.oneofs[oneof].synthetic = synthetic;
        }
        Ok(())
    }

    fn link_field(&mut self, field: usize) -> Result<()> {
        let full_name = self.pool.fields[field].full_name.clone();

        if let Some(extendee) = self.pool.fields[field].extendee.clone() {
            self.link_extendee(field, &extendee, &full_name)?;
        }

        let data = &self.pool.fields[field];
        match data.type_name.clone() {
            Some(type_name) => {
                let symbol = self.lookup(&type_name, &full_name, Filter::TypesOnly)?;
                if !self.pool.fields[field].kind_declared {
                    self.pool.fields[field].kind = match symbol {
                        Symbol::Message(_) => Kind::Message,
                        Symbol::Enum(_) => Kind::Enum,
                        _ => {
                            return Err(Error::validation(
                                &full_name,
                                format!("\"{}\" is not a type.", type_name),
                            ))
                        }
                    };
                    self.pool.fields[field].kind_declared = true;
                }

                let data = &mut self.pool.fields[field];
                match data.kind.mapped_type() {
                    MappedType::Message => {
                        let Symbol::Message(target) = symbol else {
                            return Err(Error::validation(
                                &full_name,
                                format!("\"{}\" is not a message type.", type_name),
                            ));
                        };
                        if data.raw_default.is_some() {
                            return Err(Error::validation(
                                &full_name,
                                "Messages can't have default values.",
                            ));
                        }
                        data.message_type = Some(target);
                    }
                    MappedType::Enum => {
                        let Symbol::Enum(target) = symbol else {
                            return Err(Error::validation(
                                &full_name,
                                format!("\"{}\" is not an enum type.", type_name),
                            ));
                        };
                        data.enum_type = Some(target);
                    }
                    _ => {
                        return Err(Error::validation(
                            &full_name,
                            "Field with primitive type has type_name.",
                        ))
                    }
                }
            }
            None => {
                if !data.kind_declared
                    || matches!(
                        data.kind.mapped_type(),
                        MappedType::Message | MappedType::Enum
                    )
                {
                    return Err(Error::validation(
                        &full_name,
                        "Field with message or enum type missing type_name.",
                    ));
                }
            }
        }

        let data = &self.pool.fields[field];
        let packable = data.label == Label::Repeated && data.kind.is_packable();
        if data.packed == Some(true) && !packable {
            return Err(Error::validation(
                &full_name,
                "[packed = true] can only be specified for repeated primitive fields.",
            ));
        }

        if let Some(raw) = data.raw_default.clone() {
            if self.syntax == Syntax::Proto3 {
                return Err(Error::validation(
                    &full_name,
                    "Explicit default values are not allowed in proto3.",
                ));
            }
            if data.label == Label::Repeated {
                return Err(Error::validation(
                    &full_name,
                    "Repeated fields cannot have default values.",
                ));
            }
            let default = self
                .parse_default(field, &raw)
                .map_err(|reason| Error::validation(&full_name, reason))?;
            self.pool.fields[field].default = Some(default);
        }

        trace!("Linked field {}", full_name);
        Ok(())
    }

    fn link_extendee(&mut self, field: usize, extendee: &str, full_name: &str) -> Result<()> {
        let Symbol::Message(target) = self.lookup(extendee, full_name, Filter::TypesOnly)? else {
            return Err(Error::validation(
                full_name,
                format!("\"{}\" is not a message type.", extendee),
            ));
        };

        let number = self.pool.fields[field].number;
        let target_data = &self.pool.messages[target];
        if !target_data.extension_ranges.iter().any(|r| r.contains(&number)) {
            return Err(Error::validation(
                full_name,
                format!(
                    "\"{}\" does not declare {} as an extension number.",
                    target_data.full_name, number
                ),
            ));
        }
        if let Some(&other) = self.pool.extensions_by_number.get(&(target, number)) {
            return Err(Error::validation(
                full_name,
                format!(
                    "Extension number {} has already been used in \"{}\" by extension \"{}\".",
                    number, target_data.full_name, self.pool.fields[other].full_name
                ),
            ));
        }

        if target_data.message_set {
            let data = &self.pool.fields[field];
            // The kind may still be inferred from the type name, so accept an
            // undeclared kind here and let type resolution reject enums.
            let is_message = !data.kind_declared || data.kind == Kind::Message;
            if data.label != Label::Optional || !is_message {
                return Err(Error::validation(
                    full_name,
                    "Extensions of MessageSets must be optional messages.",
                ));
            }
        }

        self.pool.fields[field].containing = Some(target);
        self.pool.extensions_by_number.insert((target, number), field);
        Ok(())
    }

    fn check_message_set(&self, message: usize) -> Result<()> {
        let data = &self.pool.messages[message];
        if data.message_set && !data.fields.is_empty() {
            return Err(Error::validation(
                &data.full_name,
                "MessageSets cannot have fields, only extensions.",
            ));
        }
        Ok(())
    }

    fn link_method(&mut self, method: usize) -> Result<()> {
        let full_name = self.pool.methods[method].full_name.clone();

        let input_type = self.pool.methods[method].input_type.clone();
        let Symbol::Message(input) = self.lookup(&input_type, &full_name, Filter::TypesOnly)? else {
            return Err(Error::validation(
                &full_name,
                format!("\"{}\" is not a message type.", input_type),
            ));
        };

        let output_type = self.pool.methods[method].output_type.clone();
        let Symbol::Message(output) = self.lookup(&output_type, &full_name, Filter::TypesOnly)?
        else {
            return Err(Error::validation(
                &full_name,
                format!("\"{}\" is not a message type.", output_type),
            ));
        };

        let data = &mut self.pool.methods[method];
        data.input = Some(input);
        data.output = Some(output);
        Ok(())
    }

    fn find(&self, full_name: &str, filter: Filter) -> Found {
        let Some(&symbol) = self.pool.symbols.get(full_name) else {
            return Found::Missing;
        };
        let accepted = match filter {
            Filter::TypesOnly => symbol.is_type(),
            Filter::AggregatesOnly => symbol.is_aggregate(),
        };
        if !accepted {
            return Found::Missing;
        }
        if matches!(symbol, Symbol::Package(_)) {
            return Found::Visible(symbol);
        }
        let file = self.pool.symbol_file(symbol);
        if self.visible.contains(&file) {
            Found::Visible(symbol)
        } else {
            Found::Hidden(file)
        }
    }

    /// Resolves `name` relative to the scope of `relative_to`.
    ///
    /// Partially-qualified names are resolved by finding the first component
    /// in the innermost enclosing scope that declares it, then looking up
    /// the rest inside that scope only.
    fn lookup(&self, name: &str, relative_to: &str, filter: Filter) -> Result<Symbol> {
        let found = if let Some(fully_qualified) = name.strip_prefix('.') {
            self.find(fully_qualified, filter)
        } else {
            let first = name.split('.').next().unwrap_or(name);
            let mut scope = relative_to;
            let mut hidden = None;
            let found = loop {
                let Some((parent, _)) = scope.rsplit_once('.') else {
                    break self.find(name, filter);
                };
                scope = parent;

                let candidate = qualify(scope, first);
                if first.len() == name.len() {
                    match self.find(&candidate, filter) {
                        Found::Visible(symbol) => break Found::Visible(symbol),
                        Found::Hidden(file) => {
                            hidden.get_or_insert(file);
                        }
                        Found::Missing => {}
                    }
                    continue;
                }
                // Only the first component has to be found here; the rest
                // must then resolve inside that scope or nowhere.
                if let Found::Visible(_) = self.find(&candidate, Filter::AggregatesOnly) {
                    break self.find(&qualify(scope, name), filter);
                }
            };
            match (found, hidden) {
                (Found::Missing, Some(file)) => Found::Hidden(file),
                (found, _) => found,
            }
        };

        match found {
            Found::Visible(symbol) => Ok(symbol),
            Found::Hidden(file) => Err(Error::validation(
                relative_to,
                format!(
                    "\"{}\" seems to be defined in \"{}\", which is not imported by \"{}\".",
                    name, self.pool.files[file].name, self.pool.files[self.file].name
                ),
            )),
            Found::Missing => Err(Error::validation(
                relative_to,
                format!("\"{}\" is not defined.", name),
            )),
        }
    }

    fn parse_default(&self, field: usize, raw: &str) -> std::result::Result<Value, String> {
        let data = &self.pool.fields[field];
        let invalid = || format!("Couldn't parse default value \"{}\".", raw);

        let value = match data.kind {
            Kind::Int32 | Kind::Sint32 | Kind::Sfixed32 => {
                let v = parse_signed(raw).ok_or_else(invalid)?;
                Value::I32(i32::try_from(v).map_err(|_| invalid())?)
            }
            Kind::Int64 | Kind::Sint64 | Kind::Sfixed64 => {
                Value::I64(parse_signed(raw).ok_or_else(invalid)?)
            }
            Kind::Uint32 | Kind::Fixed32 => {
                let v = parse_unsigned(raw).ok_or_else(invalid)?;
                Value::U32(u32::try_from(v).map_err(|_| invalid())?)
            }
            Kind::Uint64 | Kind::Fixed64 => Value::U64(parse_unsigned(raw).ok_or_else(invalid)?),
            Kind::Float => Value::F32(raw.parse::<f32>().map_err(|_| invalid())?),
            Kind::Double => Value::F64(raw.parse::<f64>().map_err(|_| invalid())?),
            Kind::Bool => match raw {
                "true" => Value::Bool(true),
                "false" => Value::Bool(false),
                _ => return Err(invalid()),
            },
            Kind::String => Value::String(raw.to_string()),
            Kind::Bytes => Value::Bytes(Bytes::from(unescape_bytes(raw)?)),
            Kind::Enum => {
                let enum_type = data.enum_type.ok_or_else(invalid)?;
                let number = self.pool.enums[enum_type]
                    .values
                    .iter()
                    .map(|&v| &self.pool.enum_values[v])
                    .find(|v| v.name == raw)
                    .map(|v| v.number)
                    .ok_or_else(|| format!("Unknown enum default value: \"{}\"", raw))?;
                Value::EnumNumber(number)
            }
            Kind::Message | Kind::Group => {
                return Err("Message type had default value.".to_string())
            }
        };
        Ok(value)
    }
}

/// Checks that a name is a valid identifier: ASCII letters, digits and
/// underscores, not starting with a digit.
fn validate_name(name: &str, full_name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::validation(full_name, "Missing name."));
    }
    let valid = name.char_indices().all(|(i, c)| {
        c.is_ascii_alphabetic() || c == '_' || (c.is_ascii_digit() && i > 0)
    });
    if !valid {
        return Err(Error::validation(
            full_name,
            format!("\"{}\" is not a valid identifier.", name),
        ));
    }
    Ok(())
}

fn validate_field_number(number: i32, full_name: &str) -> Result<u32> {
    if number <= 0 {
        return Err(Error::validation(
            full_name,
            "Field numbers must be positive integers.",
        ));
    }
    let number = number as u32;
    if number > MAX_FIELD_NUMBER {
        return Err(Error::validation(
            full_name,
            format!("Field numbers cannot be greater than {}.", MAX_FIELD_NUMBER),
        ));
    }
    if RESERVED_FIELD_NUMBERS.contains(&number) {
        return Err(Error::validation(
            full_name,
            format!(
                "Field numbers {} through {} are reserved for the protocol buffer library implementation.",
                RESERVED_FIELD_NUMBERS.start(),
                RESERVED_FIELD_NUMBERS.end()
            ),
        ));
    }
    Ok(number)
}

/// Parses a decimal, hex (`0x`) or octal (leading `0`) magnitude.
fn parse_magnitude(text: &str) -> Option<u64> {
    if let Some(hex) = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        u64::from_str_radix(hex, 16).ok()
    } else if text.len() > 1 && text.starts_with('0') {
        u64::from_str_radix(&text[1..], 8).ok()
    } else {
        text.parse::<u64>().ok()
    }
}

fn parse_unsigned(text: &str) -> Option<u64> {
    parse_magnitude(text)
}

fn parse_signed(text: &str) -> Option<i64> {
    match text.strip_prefix('-') {
        Some(rest) => {
            let magnitude = parse_magnitude(rest)?;
            if magnitude <= i64::MAX as u64 + 1 {
                Some((magnitude as i64).wrapping_neg())
            } else {
                None
            }
        }
        None => i64::try_from(parse_magnitude(text)?).ok(),
    }
}

/// Reverses C-style escaping as used for `bytes` defaults.
fn unescape_bytes(text: &str) -> std::result::Result<Vec<u8>, String> {
    let bytes = text.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        let b = bytes[i];
        i += 1;
        if b != b'\\' {
            out.push(b);
            continue;
        }

        let Some(&escape) = bytes.get(i) else {
            return Err("Invalid escape sequence: '\\' at end of string.".to_string());
        };
        i += 1;
        match escape {
            b'a' => out.push(0x07),
            b'b' => out.push(0x08),
            b'f' => out.push(0x0C),
            b'n' => out.push(b'\n'),
            b'r' => out.push(b'\r'),
            b't' => out.push(b'\t'),
            b'v' => out.push(0x0B),
            b'\\' | b'\'' | b'"' | b'?' => out.push(escape),
            b'0'..=b'7' => {
                let mut code = u32::from(escape - b'0');
                for _ in 0..2 {
                    match bytes.get(i) {
                        Some(&d @ b'0'..=b'7') => {
                            code = code * 8 + u32::from(d - b'0');
                            i += 1;
                        }
                        _ => break,
                    }
                }
                let byte = u8::try_from(code)
                    .map_err(|_| format!("Couldn't parse default value \"{}\".", text))?;
                out.push(byte);
            }
            b'x' | b'X' => {
                let start = i;
                while i < bytes.len() && i - start < 2 && bytes[i].is_ascii_hexdigit() {
                    i += 1;
                }
                if start == i {
                    return Err("Invalid escape sequence: '\\x' with no digits".to_string());
                }
                let digits = std::str::from_utf8(&bytes[start..i]).map_err(|e| e.to_string())?;
                out.push(u8::from_str_radix(digits, 16).map_err(|e| e.to_string())?);
            }
            other => {
                return Err(format!(
                    "Invalid escape sequence: '\\{}'",
                    char::from(other)
                ))
            }
        }
    }

    Ok(out)
}

/// Convert a snake_case name to lowerCamelCase
fn to_lower_camel_case(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    let mut capitalize_next = false;

    for c in s.chars() {
        if c == '_' {
            capitalize_next = true;
        } else if capitalize_next {
            result.push(c.to_ascii_uppercase());
            capitalize_next = false;
        } else {
            result.push(c);
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_lower_camel_case() {
        assert_eq!(to_lower_camel_case("hello_world"), "helloWorld");
        assert_eq!(to_lower_camel_case("my_field_name"), "myFieldName");
        assert_eq!(to_lower_camel_case("simple"), "simple");
    }

    #[test]
    fn test_validate_name() {
        assert!(validate_name("Foo_1", "x").is_ok());
        assert!(validate_name("_foo", "x").is_ok());
        assert!(validate_name("1foo", "x").is_err());
        assert!(validate_name("foo-bar", "x").is_err());
        assert!(validate_name("", "x").is_err());
    }

    #[test]
    fn test_validate_field_number() {
        assert_eq!(validate_field_number(1, "f").unwrap(), 1);
        assert!(validate_field_number(0, "f").is_err());
        assert!(validate_field_number(-3, "f").is_err());
        assert!(validate_field_number(19_000, "f").is_err());
        assert!(validate_field_number(536_870_912, "f").is_err());
    }

    #[test]
    fn test_parse_integers() {
        assert_eq!(parse_signed("-42"), Some(-42));
        assert_eq!(parse_signed("0x10"), Some(16));
        assert_eq!(parse_signed("010"), Some(8));
        assert_eq!(parse_signed("-9223372036854775808"), Some(i64::MIN));
        assert_eq!(parse_signed("9223372036854775808"), None);
        assert_eq!(parse_unsigned("18446744073709551615"), Some(u64::MAX));
        assert_eq!(parse_unsigned("-1"), None);
        assert_eq!(parse_unsigned("0"), Some(0));
    }

    #[test]
    fn test_unescape_bytes() {
        assert_eq!(unescape_bytes("abc").unwrap(), b"abc");
        assert_eq!(unescape_bytes("a\\nb").unwrap(), b"a\nb");
        assert_eq!(unescape_bytes("\\000\\x7f\\177").unwrap(), vec![0, 0x7f, 0x7f]);
        assert_eq!(unescape_bytes("\\\"q\\'").unwrap(), b"\"q'");
        assert!(unescape_bytes("bad\\").is_err());
        assert!(unescape_bytes("\\q").is_err());
    }

    #[test]
    fn test_unescape_octal_range() {
        assert_eq!(unescape_bytes("\\377\\1").unwrap(), vec![0xff, 0x01]);
        assert_eq!(
            unescape_bytes("a\\777").unwrap_err(),
            "Couldn't parse default value \"a\\777\"."
        );
        assert!(unescape_bytes("\\400").is_err());
    }
}
