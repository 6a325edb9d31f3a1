//! Schema builders shared by the integration tests.

#![allow(dead_code)]

use prost_types::field_descriptor_proto::{Label, Type};
use prost_types::{
    DescriptorProto, EnumDescriptorProto, EnumValueDescriptorProto, FieldDescriptorProto,
    FileDescriptorProto, MessageOptions, OneofDescriptorProto,
};

pub fn file(name: &str, package: &str, syntax: &str) -> FileDescriptorProto {
    FileDescriptorProto {
        name: Some(name.to_string()),
        package: (!package.is_empty()).then(|| package.to_string()),
        syntax: Some(syntax.to_string()),
        ..Default::default()
    }
}

pub fn message(name: &str, fields: Vec<FieldDescriptorProto>) -> DescriptorProto {
    DescriptorProto {
        name: Some(name.to_string()),
        field: fields,
        ..Default::default()
    }
}

pub fn field(name: &str, number: i32, label: Label, ty: Type) -> FieldDescriptorProto {
    FieldDescriptorProto {
        name: Some(name.to_string()),
        number: Some(number),
        label: Some(label as i32),
        r#type: Some(ty as i32),
        ..Default::default()
    }
}

/// A message, enum or group field referring to `type_name`.
pub fn typed_field(
    name: &str,
    number: i32,
    label: Label,
    ty: Type,
    type_name: &str,
) -> FieldDescriptorProto {
    FieldDescriptorProto {
        type_name: Some(type_name.to_string()),
        ..field(name, number, label, ty)
    }
}

pub fn in_oneof(mut field: FieldDescriptorProto, index: i32) -> FieldDescriptorProto {
    field.oneof_index = Some(index);
    field
}

pub fn with_default(mut field: FieldDescriptorProto, default: &str) -> FieldDescriptorProto {
    field.default_value = Some(default.to_string());
    field
}

pub fn oneof(name: &str) -> OneofDescriptorProto {
    OneofDescriptorProto {
        name: Some(name.to_string()),
        ..Default::default()
    }
}

pub fn enumeration(name: &str, values: &[(&str, i32)]) -> EnumDescriptorProto {
    EnumDescriptorProto {
        name: Some(name.to_string()),
        value: values
            .iter()
            .map(|(name, number)| EnumValueDescriptorProto {
                name: Some(name.to_string()),
                number: Some(*number),
                ..Default::default()
            })
            .collect(),
        ..Default::default()
    }
}

/// Synthesized entry type for a `map<key, value>` field.
pub fn map_entry(name: &str, key: Type, value: FieldDescriptorProto) -> DescriptorProto {
    let mut value = value;
    value.name = Some("value".to_string());
    value.number = Some(2);
    value.label = Some(Label::Optional as i32);

    DescriptorProto {
        name: Some(name.to_string()),
        field: vec![field("key", 1, Label::Optional, key), value],
        options: Some(MessageOptions {
            map_entry: Some(true),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// The two-field message with a oneof used throughout the codec tests:
///
/// ```text
/// syntax = "proto2";
/// package demo;
/// message M {
///   optional int32 a = 1;
///   optional string b = 2;
///   oneof o { int32 c = 3; string d = 4; }
/// }
/// ```
pub fn demo_file() -> FileDescriptorProto {
    let mut m = message(
        "M",
        vec![
            field("a", 1, Label::Optional, Type::Int32),
            field("b", 2, Label::Optional, Type::String),
            in_oneof(field("c", 3, Label::Optional, Type::Int32), 0),
            in_oneof(field("d", 4, Label::Optional, Type::String), 0),
        ],
    );
    m.oneof_decl.push(oneof("o"));

    let mut file = file("demo.proto", "demo", "proto2");
    file.message_type.push(m);
    file
}
