//! protolith - Inspect descriptor sets and decode Protocol Buffer messages
//!
//! Loads a serialized `FileDescriptorSet` (as written by `protoc
//! --include_imports -o`), cross-links it into a descriptor pool and either
//! lists its symbols or decodes binary messages against one of its types.

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use prost::Message;
use prost_types::FileDescriptorSet;
use protolith_core::codec::{self, UnknownFieldSet, UnknownValue};
use protolith_core::{
    AccessTable, DecodeOptions, Decoder, DescriptorPool, DynamicMessage, EnumValue,
    ExtensionRegistry, FieldDescriptor, Holder, Label, MessageDescriptor, Utf8Policy, Value,
};
use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, trace, warn, Level};
use tracing_subscriber::EnvFilter;

/// Inspect descriptor sets and decode Protocol Buffer messages
#[derive(Parser, Debug)]
#[command(name = "protolith")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List the files, messages, enums, services and extensions of a descriptor set
    Describe(DescribeArgs),
    /// Decode a binary message against a type from a descriptor set
    Decode(DecodeArgs),
}

#[derive(Args, Debug)]
struct SchemaArgs {
    /// Serialized FileDescriptorSet
    #[arg(short = 'd', long, env = "PROTOLITH_DESCRIPTOR_SET")]
    descriptor_set: PathBuf,

    /// Link files whose imports are missing from the set
    #[arg(long)]
    allow_unknown_deps: bool,
}

#[derive(Args, Debug)]
struct DescribeArgs {
    #[command(flatten)]
    schema: SchemaArgs,

    /// Also list the fields of every message
    #[arg(long)]
    fields: bool,
}

#[derive(Args, Debug)]
struct DecodeArgs {
    #[command(flatten)]
    schema: SchemaArgs,

    /// Fully-qualified message type, e.g. `shop.Order`
    #[arg(short, long = "type")]
    type_name: String,

    /// Encoded message (reads stdin when omitted)
    #[arg(short, long)]
    input: Option<PathBuf>,

    /// Handling of invalid UTF-8 in string fields
    #[arg(long, value_enum, default_value = "per-dialect")]
    utf8: Utf8Mode,

    /// Maximum message nesting depth
    #[arg(long, default_value_t = codec::DEFAULT_RECURSION_LIMIT)]
    max_depth: u32,

    /// Fail if required fields are missing from the decoded message
    #[arg(long)]
    check_required: bool,

    /// Re-encode the decoded message and check it reproduces the input
    #[arg(long)]
    roundtrip: bool,
}

/// Command-line spelling of [`Utf8Policy`]
#[derive(Debug, Clone, Copy, ValueEnum)]
enum Utf8Mode {
    /// Fail on invalid UTF-8
    Reject,
    /// Replace invalid sequences with U+FFFD
    Lossy,
    /// Reject in proto3 files, repair in proto2 files
    PerDialect,
}

impl From<Utf8Mode> for Utf8Policy {
    fn from(mode: Utf8Mode) -> Self {
        match mode {
            Utf8Mode::Reject => Utf8Policy::Reject,
            Utf8Mode::Lossy => Utf8Policy::Lossy,
            Utf8Mode::PerDialect => Utf8Policy::PerDialect,
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let level = match cli.verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(level.into()))
        .with_target(false)
        .with_writer(io::stderr)
        .init();

    let stdout = io::stdout();
    let mut out = stdout.lock();

    match &cli.command {
        Command::Describe(args) => {
            let pool = load_pool(&args.schema)?;
            describe(&pool, args.fields, &mut out)
        }
        Command::Decode(args) => {
            let pool = load_pool(&args.schema)?;
            let data = read_input(args.input.as_deref())?;
            decode(&pool, args, &data, &mut out)
        }
    }
}

/// Reads a descriptor set and links it into a fresh pool.
fn load_pool(args: &SchemaArgs) -> Result<DescriptorPool> {
    let path = &args.descriptor_set;
    let bytes = fs::read(path)
        .with_context(|| format!("Failed to read descriptor set: {}", path.display()))?;
    let set = FileDescriptorSet::decode(bytes.as_slice())
        .with_context(|| format!("Not a FileDescriptorSet: {}", path.display()))?;

    trace!("Read {} files from {}", set.file.len(), path.display());

    let mut pool = DescriptorPool::new();
    pool.add_file_descriptor_set_with(set, args.allow_unknown_deps)
        .with_context(|| format!("Failed to link {}", path.display()))?;

    info!(
        "Loaded {} files, {} messages, {} enums",
        pool.files().len(),
        pool.all_messages().len(),
        pool.all_enums().len()
    );

    Ok(pool)
}

fn read_input(input: Option<&Path>) -> Result<Vec<u8>> {
    match input {
        Some(path) => {
            fs::read(path).with_context(|| format!("Failed to read input file: {}", path.display()))
        }
        None => {
            let mut data = Vec::new();
            io::stdin()
                .read_to_end(&mut data)
                .context("Failed to read stdin")?;
            Ok(data)
        }
    }
}

/// Writes a symbol listing of every file in the pool.
fn describe(pool: &DescriptorPool, fields: bool, out: &mut impl Write) -> Result<()> {
    for file in pool.files() {
        write!(out, "file {} ({}", file.name(), file.syntax().as_str())?;
        if !file.package().is_empty() {
            write!(out, ", package {}", file.package())?;
        }
        writeln!(out, ")")?;

        for dependency in file.dependencies() {
            writeln!(out, "  import {}", dependency.name())?;
        }
        for message in file.messages() {
            describe_message(&message, fields, out)?;
        }
        for enum_type in file.enums() {
            writeln!(out, "  enum {}", enum_type.full_name())?;
        }
        for service in file.services() {
            writeln!(out, "  service {}", service.full_name())?;
            for method in service.methods() {
                writeln!(
                    out,
                    "    rpc {}({}{}) returns ({}{})",
                    method.name(),
                    if method.is_client_streaming() { "stream " } else { "" },
                    method.input().full_name(),
                    if method.is_server_streaming() { "stream " } else { "" },
                    method.output().full_name(),
                )?;
            }
        }
        for extension in file.all_extensions() {
            writeln!(
                out,
                "  extend {} {{ {} = {} }}",
                extension.containing_type().full_name(),
                extension.full_name(),
                extension.number()
            )?;
        }
    }
    Ok(())
}

fn describe_message(message: &MessageDescriptor, fields: bool, out: &mut impl Write) -> Result<()> {
    // Map entries are listed through their map field
    if message.is_map_entry() {
        return Ok(());
    }

    writeln!(out, "  message {}", message.full_name())?;
    if fields {
        for field in message.fields() {
            writeln!(out, "    {} = {}", field_signature(&field), field.number())?;
        }
    }
    for nested in message.nested_messages() {
        describe_message(&nested, fields, out)?;
    }
    for enum_type in message.nested_enums() {
        writeln!(out, "  enum {}", enum_type.full_name())?;
    }
    Ok(())
}

fn field_signature(field: &FieldDescriptor) -> String {
    let type_name = |f: &FieldDescriptor| match (f.message_type(), f.enum_type()) {
        (Some(message), _) => message.full_name().to_string(),
        (_, Some(enum_type)) => enum_type.full_name().to_string(),
        _ => f.kind().as_str().to_string(),
    };

    if field.is_map() {
        if let Some(entry) = field.message_type() {
            if let (Some(key), Some(value)) = (entry.map_entry_key(), entry.map_entry_value()) {
                return format!("map<{}, {}> {}", type_name(&key), type_name(&value), field.name());
            }
        }
    }

    let label = match field.label() {
        Label::Repeated => "repeated ",
        Label::Required => "required ",
        Label::Optional if field.has_presence() && field.real_containing_oneof().is_none() => {
            "optional "
        }
        Label::Optional => "",
    };
    format!("{}{} {}", label, type_name(field), field.name())
}

/// Decodes `data` as the requested type and writes its fields.
fn decode(
    pool: &DescriptorPool,
    args: &DecodeArgs,
    data: &[u8],
    out: &mut impl Write,
) -> Result<()> {
    let descriptor = match pool.get_message_by_name(&args.type_name) {
        Some(descriptor) => descriptor,
        None => bail!("Message type not found in descriptor set: {}", args.type_name),
    };

    let table = AccessTable::build(&descriptor, &descriptor)
        .with_context(|| format!("Failed to build access table for {}", args.type_name))?;
    let registry = ExtensionRegistry::from_pool(pool).context("Failed to collect extensions")?;
    debug!("{} extensions registered", registry.len());

    let options = DecodeOptions::new()
        .recursion_limit(args.max_depth)
        .utf8_policy(args.utf8.into())
        .check_required(args.check_required);
    let message = Decoder::with_options(options)
        .registry(&registry)
        .decode_dynamic(data, &table)
        .with_context(|| format!("Failed to decode {} bytes as {}", data.len(), args.type_name))?;

    writeln!(out, "{} {{", descriptor.full_name())?;
    write_fields(&message, 1, out)?;
    writeln!(out, "}}")?;

    if args.roundtrip {
        let encoded = codec::encode(&message, &table).context("Failed to re-encode message")?;
        if encoded.as_ref() != data {
            // Expected for non-canonical input such as unsorted map entries
            warn!(
                "Re-encoded {} bytes differ from the {} input bytes",
                encoded.len(),
                data.len()
            );
            bail!("Round trip changed the encoding of {}", args.type_name);
        }
        info!("Round trip reproduced all {} bytes", data.len());
    }

    Ok(())
}

fn write_fields(message: &DynamicMessage, depth: usize, out: &mut impl Write) -> Result<()> {
    let indent = "  ".repeat(depth);

    for field in message.descriptor().fields() {
        if !message.has_field(&field)? {
            continue;
        }
        let value = message.get_field(&field)?;
        write_value(&indent, field.name(), &field, &value, depth, out)?;
    }

    for (extension, value) in message.extensions().iter() {
        let name = format!("[{}]", extension.full_name());
        write_value(&indent, &name, extension, value, depth, out)?;
    }

    write_unknown(message.unknown_fields(), depth, out)
}

fn write_value(
    indent: &str,
    name: &str,
    field: &FieldDescriptor,
    value: &Value,
    depth: usize,
    out: &mut impl Write,
) -> Result<()> {
    match value {
        Value::List(items) => {
            for item in items {
                write_value(indent, name, field, item, depth, out)?;
            }
        }
        Value::Map(entries) => {
            let value_field = field.message_type().and_then(|e| e.map_entry_value());
            let mut keys: Vec<_> = entries.keys().collect();
            keys.sort();
            for key in keys {
                writeln!(out, "{}{} {{", indent, name)?;
                writeln!(out, "{}  key: {}", indent, format_scalar(&Value::from(key.clone())))?;
                if let (Some(value_field), Some(entry)) = (&value_field, entries.get(key)) {
                    let indent = format!("{}  ", indent);
                    write_value(&indent, "value", value_field, entry, depth + 1, out)?;
                }
                writeln!(out, "{}}}", indent)?;
            }
        }
        Value::Message(holder) => {
            writeln!(out, "{}{} {{", indent, name)?;
            match holder.downcast_ref::<DynamicMessage>() {
                Some(nested) => write_fields(nested, depth + 1, out)?,
                None => writeln!(out, "{}  {:?}", indent, holder)?,
            }
            writeln!(out, "{}}}", indent)?;
        }
        Value::EnumNumber(number) => match field.enum_type() {
            Some(enum_type) => {
                writeln!(out, "{}{}: {}", indent, name, EnumValue::resolve(&enum_type, *number))?
            }
            None => writeln!(out, "{}{}: {}", indent, name, number)?,
        },
        scalar => writeln!(out, "{}{}: {}", indent, name, format_scalar(scalar))?,
    }
    Ok(())
}

fn format_scalar(value: &Value) -> String {
    match value {
        Value::Bool(v) => v.to_string(),
        Value::I32(v) => v.to_string(),
        Value::I64(v) => v.to_string(),
        Value::U32(v) => v.to_string(),
        Value::U64(v) => v.to_string(),
        Value::F32(v) => v.to_string(),
        Value::F64(v) => v.to_string(),
        Value::String(v) => format!("{:?}", v),
        Value::Bytes(v) => format!("{:?}", v),
        other => format!("{:?}", other),
    }
}

fn write_unknown(unknown: &UnknownFieldSet, depth: usize, out: &mut impl Write) -> Result<()> {
    let indent = "  ".repeat(depth);

    for field in unknown.iter() {
        match &field.value {
            UnknownValue::Varint(v) => writeln!(out, "{}#{}: {}", indent, field.number, v)?,
            UnknownValue::Fixed32(v) => writeln!(out, "{}#{}: 0x{:08x}", indent, field.number, v)?,
            UnknownValue::Fixed64(v) => writeln!(out, "{}#{}: 0x{:016x}", indent, field.number, v)?,
            UnknownValue::LengthDelimited(bytes) => {
                writeln!(out, "{}#{}: {:?}", indent, field.number, bytes)?
            }
            UnknownValue::Group(group) => {
                writeln!(out, "{}#{} {{", indent, field.number)?;
                write_unknown(group, depth + 1, out)?;
                writeln!(out, "{}}}", indent)?;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use prost_types::field_descriptor_proto::{Label as ProtoLabel, Type};
    use prost_types::{
        DescriptorProto, EnumDescriptorProto, EnumValueDescriptorProto, FieldDescriptorProto,
        FileDescriptorProto,
    };
    use tempfile::TempDir;

    fn field(name: &str, number: i32, label: ProtoLabel, ty: Type) -> FieldDescriptorProto {
        FieldDescriptorProto {
            name: Some(name.to_string()),
            number: Some(number),
            label: Some(label as i32),
            r#type: Some(ty as i32),
            ..Default::default()
        }
    }

    /// ```text
    /// syntax = "proto3";
    /// package shop;
    /// enum Status { UNKNOWN = 0; PAID = 1; }
    /// message Order { int64 id = 1; repeated string items = 2; Status status = 3; }
    /// ```
    fn shop_set() -> FileDescriptorSet {
        let mut status = field("status", 3, ProtoLabel::Optional, Type::Enum);
        status.type_name = Some(".shop.Status".to_string());

        FileDescriptorSet {
            file: vec![FileDescriptorProto {
                name: Some("shop.proto".to_string()),
                package: Some("shop".to_string()),
                syntax: Some("proto3".to_string()),
                message_type: vec![DescriptorProto {
                    name: Some("Order".to_string()),
                    field: vec![
                        field("id", 1, ProtoLabel::Optional, Type::Int64),
                        field("items", 2, ProtoLabel::Repeated, Type::String),
                        status,
                    ],
                    ..Default::default()
                }],
                enum_type: vec![EnumDescriptorProto {
                    name: Some("Status".to_string()),
                    value: vec![
                        EnumValueDescriptorProto {
                            name: Some("UNKNOWN".to_string()),
                            number: Some(0),
                            ..Default::default()
                        },
                        EnumValueDescriptorProto {
                            name: Some("PAID".to_string()),
                            number: Some(1),
                            ..Default::default()
                        },
                    ],
                    ..Default::default()
                }],
                ..Default::default()
            }],
        }
    }

    fn write_set(dir: &TempDir) -> PathBuf {
        let path = dir.path().join("shop.binpb");
        fs::write(&path, shop_set().encode_to_vec()).unwrap();
        path
    }

    fn decode_args(descriptor_set: PathBuf, roundtrip: bool) -> DecodeArgs {
        DecodeArgs {
            schema: SchemaArgs {
                descriptor_set,
                allow_unknown_deps: false,
            },
            type_name: "shop.Order".to_string(),
            input: None,
            utf8: Utf8Mode::PerDialect,
            max_depth: codec::DEFAULT_RECURSION_LIMIT,
            check_required: false,
            roundtrip,
        }
    }

    // id=7, items=["a", "b"], status=PAID, unknown field 9 = 1
    const ORDER: &[u8] = &[
        0x08, 0x07, 0x12, 0x01, b'a', 0x12, 0x01, b'b', 0x18, 0x01, 0x48, 0x01,
    ];

    #[test]
    fn test_describe_lists_symbols() {
        let dir = TempDir::new().unwrap();
        let args = SchemaArgs {
            descriptor_set: write_set(&dir),
            allow_unknown_deps: false,
        };
        let pool = load_pool(&args).unwrap();

        let mut out = Vec::new();
        describe(&pool, true, &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();

        assert!(text.contains("file shop.proto (proto3, package shop)"));
        assert!(text.contains("  message shop.Order"));
        assert!(text.contains("    int64 id = 1"));
        assert!(text.contains("    repeated string items = 2"));
        assert!(text.contains("    shop.Status status = 3"));
        assert!(text.contains("  enum shop.Status"));
    }

    #[test]
    fn test_decode_prints_fields() {
        let dir = TempDir::new().unwrap();
        let args = decode_args(write_set(&dir), false);
        let pool = load_pool(&args.schema).unwrap();

        let mut out = Vec::new();
        decode(&pool, &args, ORDER, &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();

        assert_eq!(
            text,
            "shop.Order {\n  id: 7\n  items: \"a\"\n  items: \"b\"\n  status: PAID\n  #9: 1\n}\n"
        );
    }

    #[test]
    fn test_decode_roundtrip() {
        let dir = TempDir::new().unwrap();
        let args = decode_args(write_set(&dir), true);
        let pool = load_pool(&args.schema).unwrap();

        let mut out = Vec::new();
        decode(&pool, &args, ORDER, &mut out).unwrap();

        // Unknown field ahead of a known one re-encodes after it
        let reordered = [0x48, 0x01, 0x08, 0x07];
        assert!(decode(&pool, &args, &reordered, &mut Vec::new()).is_err());
    }

    #[test]
    fn test_decode_unknown_type() {
        let dir = TempDir::new().unwrap();
        let mut args = decode_args(write_set(&dir), false);
        args.type_name = "shop.Missing".to_string();
        let pool = load_pool(&args.schema).unwrap();

        let err = decode(&pool, &args, ORDER, &mut Vec::new()).unwrap_err();
        assert!(err.to_string().contains("shop.Missing"));
    }

    #[test]
    fn test_load_pool_rejects_garbage() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("garbage.binpb");
        fs::write(&path, [0xff, 0xff, 0xff]).unwrap();

        let args = SchemaArgs {
            descriptor_set: path,
            allow_unknown_deps: false,
        };
        assert!(load_pool(&args).is_err());
    }

    #[test]
    fn verify_cli() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
