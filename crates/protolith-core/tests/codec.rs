//! Wire-format encoding and decoding.

mod common;

use bytes::Bytes;
use common::*;
use pretty_assertions::assert_eq;
use prost::Message;
use prost_types::field_descriptor_proto::{Label, Type};
use prost_types::{descriptor_proto::ExtensionRange, FileDescriptorProto, MessageOptions};
use protolith_core::codec::{self, UnknownValue};
use protolith_core::{
    AccessTable, DecodeOptions, Decoder, DescriptorPool, DynamicMessage, Error, ExtensionRegistry,
    Holder, MapKey, MessageDescriptor, Utf8Policy, Value,
};
use std::collections::HashMap;

fn pool_of(files: Vec<FileDescriptorProto>) -> DescriptorPool {
    let mut pool = DescriptorPool::new();
    for file in files {
        pool.add_file_descriptor_proto(file).unwrap();
    }
    pool
}

fn single_message(
    name: &str,
    package: &str,
    syntax: &str,
    fields: Vec<prost_types::FieldDescriptorProto>,
) -> FileDescriptorProto {
    let mut f = file(&format!("{}.proto", package), package, syntax);
    f.message_type.push(message(name, fields));
    f
}

#[test]
fn test_worked_example() {
    let pool = pool_of(vec![demo_file()]);
    let m = pool.get_message_by_name("demo.M").unwrap();

    let mut message = DynamicMessage::new(m.clone());
    message.set_field_by_name("c", 7).unwrap();
    message.set_field_by_name("a", 5).unwrap();

    let bytes = message.encode().unwrap();
    assert_eq!(bytes.as_ref(), &[0x08, 0x05, 0x18, 0x07]);

    let decoded = DynamicMessage::decode(m, &bytes).unwrap();
    assert_eq!(decoded.get_field_by_name("a").unwrap(), Value::I32(5));
    assert!(decoded.has_field_by_name("c").unwrap());
    assert!(!decoded.has_field_by_name("d").unwrap());
    assert!(!decoded.has_field_by_name("b").unwrap());
    assert_eq!(decoded, message);
}

#[test]
fn test_last_oneof_member_on_wire_wins() {
    let pool = pool_of(vec![demo_file()]);
    let m = pool.get_message_by_name("demo.M").unwrap();

    // c = 7, then d = "x"
    let decoded = DynamicMessage::decode(m, &[0x18, 0x07, 0x22, 0x01, b'x']).unwrap();
    assert!(!decoded.has_field_by_name("c").unwrap());
    assert_eq!(decoded.get_field_by_name("d").unwrap(), Value::from("x"));
}

/// ```text
/// syntax = "proto3";
/// package oracle;
/// message Sample { every scalar type = 1..15; Color color = 16;
///   repeated int32 nums = 17; repeated string words = 18;
///   Inner inner = 19; repeated Inner inners = 20;
///   oneof pick { int32 num = 21; string word = 22; } }
/// message Inner { int32 v = 1; int32 w = 2; }
/// enum Color { COLOR_NONE = 0; COLOR_RED = 1; }
/// ```
fn sample_file() -> FileDescriptorProto {
    let scalar = |name: &str, number: i32, ty: Type| field(name, number, Label::Optional, ty);
    let mut sample = message(
        "Sample",
        vec![
            scalar("i32", 1, Type::Int32),
            scalar("i64", 2, Type::Int64),
            scalar("u32", 3, Type::Uint32),
            scalar("u64", 4, Type::Uint64),
            scalar("s32", 5, Type::Sint32),
            scalar("s64", 6, Type::Sint64),
            scalar("f32", 7, Type::Fixed32),
            scalar("f64", 8, Type::Fixed64),
            scalar("sf32", 9, Type::Sfixed32),
            scalar("sf64", 10, Type::Sfixed64),
            scalar("fl", 11, Type::Float),
            scalar("db", 12, Type::Double),
            scalar("flag", 13, Type::Bool),
            scalar("text", 14, Type::String),
            scalar("data", 15, Type::Bytes),
            typed_field("color", 16, Label::Optional, Type::Enum, "Color"),
            field("nums", 17, Label::Repeated, Type::Int32),
            field("words", 18, Label::Repeated, Type::String),
            typed_field("inner", 19, Label::Optional, Type::Message, "Inner"),
            typed_field("inners", 20, Label::Repeated, Type::Message, "Inner"),
            in_oneof(scalar("num", 21, Type::Int32), 0),
            in_oneof(scalar("word", 22, Type::String), 0),
        ],
    );
    sample.oneof_decl.push(oneof("pick"));

    let mut f = file("oracle.proto", "oracle", "proto3");
    f.message_type.push(sample);
    f.message_type.push(message(
        "Inner",
        vec![
            field("v", 1, Label::Optional, Type::Int32),
            field("w", 2, Label::Optional, Type::Int32),
        ],
    ));
    f.enum_type
        .push(enumeration("Color", &[("COLOR_NONE", 0), ("COLOR_RED", 1)]));
    f
}

fn inner(descriptor: &MessageDescriptor, v: i32) -> Value {
    let mut message = DynamicMessage::new(descriptor.clone());
    message.set_field_by_name("v", v).unwrap();
    Value::Message(Box::new(message))
}

fn filled_sample(pool: &DescriptorPool) -> DynamicMessage {
    let sample = pool.get_message_by_name("oracle.Sample").unwrap();
    let inner_type = pool.get_message_by_name("oracle.Inner").unwrap();

    let mut message = DynamicMessage::new(sample);
    message.set_field_by_name("i32", -7).unwrap();
    message.set_field_by_name("i64", -(1_i64 << 40)).unwrap();
    message.set_field_by_name("u32", 4_000_000_000_u32).unwrap();
    message.set_field_by_name("u64", u64::MAX).unwrap();
    message.set_field_by_name("s32", Value::I32(-3)).unwrap();
    message.set_field_by_name("s64", Value::I64(-300)).unwrap();
    message.set_field_by_name("f32", Value::U32(7)).unwrap();
    message.set_field_by_name("f64", Value::U64(8)).unwrap();
    message.set_field_by_name("sf32", Value::I32(-9)).unwrap();
    message.set_field_by_name("sf64", Value::I64(-10)).unwrap();
    message.set_field_by_name("fl", 1.5_f32).unwrap();
    message.set_field_by_name("db", -2.25_f64).unwrap();
    message.set_field_by_name("flag", true).unwrap();
    message.set_field_by_name("text", "héllo").unwrap();
    message
        .set_field_by_name("data", Bytes::from_static(&[0, 1, 2]))
        .unwrap();
    message.set_field_by_name("color", Value::EnumNumber(1)).unwrap();
    message
        .set_field_by_name(
            "nums",
            Value::List(vec![Value::I32(1), Value::I32(-1), Value::I32(300)]),
        )
        .unwrap();
    message
        .set_field_by_name("words", Value::List(vec![Value::from("a"), Value::from("b")]))
        .unwrap();
    message.set_field_by_name("inner", inner(&inner_type, 5)).unwrap();
    message
        .set_field_by_name(
            "inners",
            Value::List(vec![inner(&inner_type, 1), inner(&inner_type, 2)]),
        )
        .unwrap();
    message.set_field_by_name("word", "pick").unwrap();
    message
}

#[test]
fn test_roundtrip_preserves_every_field() {
    let pool = pool_of(vec![sample_file()]);
    let original = filled_sample(&pool);
    let table = AccessTable::build(original.descriptor(), original.descriptor()).unwrap();

    let bytes = codec::encode(&original, &table).unwrap();
    assert_eq!(codec::encoded_len(&original, &table).unwrap(), bytes.len());

    let decoded = codec::decode(&bytes, original.descriptor(), &table, None).unwrap();
    assert_eq!(decoded, original);

    let mut buf = bytes::BytesMut::new();
    codec::encode_to(&decoded, &table, &mut buf).unwrap();
    assert_eq!(buf.freeze(), bytes);
}

fn oracle_sample(pool: &prost_reflect::DescriptorPool) -> prost_reflect::DynamicMessage {
    use prost_reflect::Value as V;

    let inner_type = pool.get_message_by_name("oracle.Inner").unwrap();
    let inner = |v: i32| {
        let mut message = prost_reflect::DynamicMessage::new(inner_type.clone());
        message.set_field_by_name("v", V::I32(v));
        V::Message(message)
    };

    let mut message =
        prost_reflect::DynamicMessage::new(pool.get_message_by_name("oracle.Sample").unwrap());
    message.set_field_by_name("i32", V::I32(-7));
    message.set_field_by_name("i64", V::I64(-(1_i64 << 40)));
    message.set_field_by_name("u32", V::U32(4_000_000_000));
    message.set_field_by_name("u64", V::U64(u64::MAX));
    message.set_field_by_name("s32", V::I32(-3));
    message.set_field_by_name("s64", V::I64(-300));
    message.set_field_by_name("f32", V::U32(7));
    message.set_field_by_name("f64", V::U64(8));
    message.set_field_by_name("sf32", V::I32(-9));
    message.set_field_by_name("sf64", V::I64(-10));
    message.set_field_by_name("fl", V::F32(1.5));
    message.set_field_by_name("db", V::F64(-2.25));
    message.set_field_by_name("flag", V::Bool(true));
    message.set_field_by_name("text", V::String("héllo".to_string()));
    message.set_field_by_name("data", V::Bytes(Bytes::from_static(&[0, 1, 2])));
    message.set_field_by_name("color", V::EnumNumber(1));
    message.set_field_by_name("nums", V::List(vec![V::I32(1), V::I32(-1), V::I32(300)]));
    message.set_field_by_name(
        "words",
        V::List(vec![V::String("a".to_string()), V::String("b".to_string())]),
    );
    message.set_field_by_name("inner", inner(5));
    message.set_field_by_name("inners", V::List(vec![inner(1), inner(2)]));
    message.set_field_by_name("word", V::String("pick".to_string()));
    message
}

#[test]
fn test_encoding_matches_reference_implementation() {
    let pool = pool_of(vec![sample_file()]);
    let ours = filled_sample(&pool);

    let mut reference_pool = prost_reflect::DescriptorPool::new();
    reference_pool
        .add_file_descriptor_proto(sample_file())
        .unwrap();
    let reference = oracle_sample(&reference_pool).encode_to_vec();

    assert_eq!(ours.encode_to_vec().unwrap(), reference);

    let decoded = DynamicMessage::decode(ours.descriptor().clone(), &reference).unwrap();
    assert_eq!(decoded, ours);
}

#[test]
fn test_merging_occurrences() {
    let pool = pool_of(vec![sample_file()]);
    let sample = pool.get_message_by_name("oracle.Sample").unwrap();
    let inner_type = pool.get_message_by_name("oracle.Inner").unwrap();

    let bytes = [
        0x08, 0x01, // i32 = 1
        0x9a, 0x01, 0x02, 0x08, 0x01, // inner { v: 1 }
        0x08, 0x02, // i32 = 2
        0x9a, 0x01, 0x02, 0x10, 0x02, // inner { w: 2 }
        0x88, 0x01, 0x05, // nums += 5
        0x8a, 0x01, 0x01, 0x06, // nums += [6]
    ];
    let decoded = DynamicMessage::decode(sample, &bytes).unwrap();

    // Scalars: last wins. Messages: merged. Repeated: appended.
    assert_eq!(decoded.get_field_by_name("i32").unwrap(), Value::I32(2));
    let merged = decoded.get_field_by_name("inner").unwrap();
    let merged = merged.as_message().unwrap().downcast_ref::<DynamicMessage>().unwrap();
    assert_eq!(merged.descriptor(), &inner_type);
    assert_eq!(merged.get_field_by_name("v").unwrap(), Value::I32(1));
    assert_eq!(merged.get_field_by_name("w").unwrap(), Value::I32(2));
    assert_eq!(
        decoded.get_field_by_name("nums").unwrap(),
        Value::List(vec![Value::I32(5), Value::I32(6)])
    );
}

#[test]
fn test_unknown_fields_survive_roundtrip() {
    let pool = pool_of(vec![single_message(
        "Narrow",
        "narrow",
        "proto3",
        vec![field("a", 1, Label::Optional, Type::Int32)],
    )]);
    let narrow = pool.get_message_by_name("narrow.Narrow").unwrap();

    let input = [
        0x08, 0x01, // a = 1
        0x12, 0x02, b'h', b'i', // 2: "hi"
        0x19, 1, 2, 3, 4, 5, 6, 7, 8, // 3: fixed64
        0x2b, 0x08, 0x01, 0x2c, // 5: group { 1: 1 }
        0x35, 9, 9, 9, 9, // 6: fixed32
    ];
    let decoded = DynamicMessage::decode(narrow, &input).unwrap();
    assert_eq!(decoded.get_field_by_name("a").unwrap(), Value::I32(1));

    let unknown = decoded.unknown_fields();
    assert_eq!(unknown.len(), 4);
    assert_eq!(
        unknown.get(2).collect::<Vec<_>>(),
        vec![&UnknownValue::LengthDelimited(Bytes::from_static(b"hi"))]
    );
    assert!(matches!(unknown.get(5).next(), Some(UnknownValue::Group(g)) if g.len() == 1));

    assert_eq!(decoded.encode_to_vec().unwrap(), input.to_vec());
}

#[test]
fn test_wire_type_mismatch_is_kept_as_unknown() {
    let pool = pool_of(vec![single_message(
        "Narrow",
        "narrow",
        "proto3",
        vec![field("a", 1, Label::Optional, Type::Int32)],
    )]);
    let narrow = pool.get_message_by_name("narrow.Narrow").unwrap();

    // Field 1 as fixed32
    let input = [0x0d, 0x01, 0x00, 0x00, 0x00];
    let decoded = DynamicMessage::decode(narrow, &input).unwrap();
    assert!(!decoded.has_field_by_name("a").unwrap());
    assert_eq!(decoded.unknown_fields().len(), 1);
    assert_eq!(decoded.encode_to_vec().unwrap(), input.to_vec());
}

#[test]
fn test_packed_and_unpacked_are_equivalent() {
    let vals = || vec![field("vals", 1, Label::Repeated, Type::Int32)];
    let pool = pool_of(vec![
        single_message("Nums", "packed", "proto3", vals()),
        single_message("Nums", "expanded", "proto2", vals()),
    ]);
    let packed_form = [0x0a, 0x03, 0x01, 0x02, 0x03];
    let expanded_form = [0x08, 0x01, 0x08, 0x02, 0x08, 0x03];
    let expected = Value::List(vec![Value::I32(1), Value::I32(2), Value::I32(3)]);

    for (name, canonical) in [
        ("packed.Nums", &packed_form[..]),
        ("expanded.Nums", &expanded_form[..]),
    ] {
        let nums = pool.get_message_by_name(name).unwrap();
        for input in [&packed_form[..], &expanded_form[..]] {
            let decoded = DynamicMessage::decode(nums.clone(), input).unwrap();
            assert_eq!(decoded.get_field_by_name("vals").unwrap(), expected);
            assert_eq!(decoded.encode_to_vec().unwrap(), canonical.to_vec());
        }
    }

    // Both forms in one message concatenate
    let nums = pool.get_message_by_name("packed.Nums").unwrap();
    let mut mixed = packed_form.to_vec();
    mixed.extend_from_slice(&[0x08, 0x04]);
    let decoded = DynamicMessage::decode(nums, &mixed).unwrap();
    assert_eq!(
        decoded.get_field_by_name("vals").unwrap(),
        Value::List(vec![Value::I32(1), Value::I32(2), Value::I32(3), Value::I32(4)])
    );
}

fn counts_pool() -> DescriptorPool {
    let mut counts = message(
        "Counts",
        vec![typed_field("counts", 1, Label::Repeated, Type::Message, "Counts.CountsEntry")],
    );
    counts.nested_type.push(map_entry(
        "CountsEntry",
        Type::String,
        field("value", 2, Label::Optional, Type::Int32),
    ));
    let mut f = file("maps.proto", "maps", "proto3");
    f.message_type.push(counts);
    pool_of(vec![f])
}

#[test]
fn test_map_entries_are_sorted_by_key() {
    let pool = counts_pool();
    let counts = pool.get_message_by_name("maps.Counts").unwrap();

    let mut entries = HashMap::new();
    for (key, value) in [("b", 2), ("c", 3), ("a", 1)] {
        entries.insert(MapKey::from(key), Value::I32(value));
    }
    let mut message = DynamicMessage::new(counts.clone());
    message.set_field_by_name("counts", Value::Map(entries)).unwrap();

    let entry = |key: u8, value: u8| [0x0a, 0x05, 0x0a, 0x01, key, 0x10, value];
    let expected: Vec<u8> = [entry(b'a', 1), entry(b'b', 2), entry(b'c', 3)].concat();
    let bytes = message.encode_to_vec().unwrap();
    assert_eq!(bytes, expected);

    assert_eq!(DynamicMessage::decode(counts, &bytes).unwrap(), message);
}

#[test]
fn test_map_entry_missing_parts_read_as_defaults() {
    let pool = counts_pool();
    let counts = pool.get_message_by_name("maps.Counts").unwrap();

    // { key: "a" } and { value: 4 }
    let bytes = [0x0a, 0x03, 0x0a, 0x01, b'a', 0x0a, 0x02, 0x10, 0x04];
    let decoded = DynamicMessage::decode(counts, &bytes).unwrap();

    let mut expected = HashMap::new();
    expected.insert(MapKey::from("a"), Value::I32(0));
    expected.insert(MapKey::from(""), Value::I32(4));
    assert_eq!(decoded.get_field_by_name("counts").unwrap(), Value::Map(expected));
}

/// ```text
/// syntax = "proto3";
/// package maps;
/// message Catalog { map<string, Item> items = 1; }
/// message Item { int32 v = 1; int32 w = 2; }
/// ```
fn catalog_pool() -> DescriptorPool {
    let mut catalog = message(
        "Catalog",
        vec![typed_field("items", 1, Label::Repeated, Type::Message, "Catalog.ItemsEntry")],
    );
    catalog.nested_type.push(map_entry(
        "ItemsEntry",
        Type::String,
        typed_field("value", 2, Label::Optional, Type::Message, "Item"),
    ));
    let item = message(
        "Item",
        vec![
            field("v", 1, Label::Optional, Type::Int32),
            field("w", 2, Label::Optional, Type::Int32),
        ],
    );
    let mut f = file("catalog.proto", "maps", "proto3");
    f.message_type = vec![catalog, item];
    pool_of(vec![f])
}

fn item_entry(decoded: &DynamicMessage, key: &str) -> DynamicMessage {
    let Value::Map(entries) = decoded.get_field_by_name("items").unwrap() else {
        panic!("items is not a map");
    };
    let value = entries.get(&MapKey::from(key)).unwrap();
    value.as_message().unwrap().downcast_ref::<DynamicMessage>().unwrap().clone()
}

#[test]
fn test_map_message_values() {
    let pool = catalog_pool();
    let catalog = pool.get_message_by_name("maps.Catalog").unwrap();
    let item = pool.get_message_by_name("maps.Item").unwrap();

    // An empty value message is still written, as an empty field 2
    let mut entries = HashMap::new();
    entries.insert(
        MapKey::from("k"),
        Value::Message(Box::new(DynamicMessage::new(item.clone()))),
    );
    let mut message = DynamicMessage::new(catalog.clone());
    message.set_field_by_name("items", Value::Map(entries)).unwrap();

    let bytes = message.encode_to_vec().unwrap();
    assert_eq!(bytes, vec![0x0a, 0x05, 0x0a, 0x01, b'k', 0x12, 0x00]);
    assert_eq!(DynamicMessage::decode(catalog.clone(), &bytes).unwrap(), message);

    // A populated value nests its own encoding
    let mut entries = HashMap::new();
    entries.insert(MapKey::from("k"), inner(&item, 3));
    message.set_field_by_name("items", Value::Map(entries)).unwrap();
    let bytes = message.encode_to_vec().unwrap();
    assert_eq!(bytes, vec![0x0a, 0x07, 0x0a, 0x01, b'k', 0x12, 0x02, 0x08, 0x03]);

    // An entry without a value reads as an empty message
    let decoded = DynamicMessage::decode(catalog, &[0x0a, 0x03, 0x0a, 0x01, b'k']).unwrap();
    let value = item_entry(&decoded, "k");
    assert_eq!(value.descriptor(), &item);
    assert!(!value.has_field_by_name("v").unwrap());
}

#[test]
fn test_map_message_values_merge_within_an_entry() {
    let pool = catalog_pool();
    let catalog = pool.get_message_by_name("maps.Catalog").unwrap();

    let bytes = [
        0x0a, 0x0b, 0x0a, 0x01, b'k', // entry { key: "k"
        0x12, 0x02, 0x08, 0x01, //   value { v: 1 }
        0x12, 0x02, 0x10, 0x02, //   value { w: 2 } }
        0x0a, 0x07, 0x0a, 0x01, b'j', // entry { key: "j"
        0x12, 0x02, 0x08, 0x05, //   value { v: 5 } }
        0x0a, 0x07, 0x0a, 0x01, b'j', // entry { key: "j"
        0x12, 0x02, 0x10, 0x06, //   value { w: 6 } }
    ];
    let decoded = DynamicMessage::decode(catalog, &bytes).unwrap();

    // Repeated value fields inside one entry merge
    let k = item_entry(&decoded, "k");
    assert_eq!(k.get_field_by_name("v").unwrap(), Value::I32(1));
    assert_eq!(k.get_field_by_name("w").unwrap(), Value::I32(2));

    // A later entry with the same key replaces the earlier one
    let j = item_entry(&decoded, "j");
    assert_eq!(j.get_field_by_name("v").unwrap(), Value::I32(0));
    assert_eq!(j.get_field_by_name("w").unwrap(), Value::I32(6));
}

/// ```text
/// syntax = "proto2";
/// package req;
/// message Order {
///   required int64 id = 1;
///   repeated Line lines = 2;
///   optional Line first = 3;
///   map<string, Line> by_sku = 4;
///   extensions 100 to 199;
/// }
/// message Line { required string sku = 1; optional int32 qty = 2; }
/// extend Order { optional Line gift = 100; }
/// ```
fn required_pool() -> DescriptorPool {
    let mut order = message(
        "Order",
        vec![
            field("id", 1, Label::Required, Type::Int64),
            typed_field("lines", 2, Label::Repeated, Type::Message, "Line"),
            typed_field("first", 3, Label::Optional, Type::Message, "Line"),
            typed_field("by_sku", 4, Label::Repeated, Type::Message, "Order.BySkuEntry"),
        ],
    );
    order.nested_type.push(map_entry(
        "BySkuEntry",
        Type::String,
        typed_field("value", 2, Label::Optional, Type::Message, "Line"),
    ));
    order.extension_range.push(ExtensionRange {
        start: Some(100),
        end: Some(200),
        ..Default::default()
    });
    let line = message(
        "Line",
        vec![
            field("sku", 1, Label::Required, Type::String),
            field("qty", 2, Label::Optional, Type::Int32),
        ],
    );

    let mut gift = typed_field("gift", 100, Label::Optional, Type::Message, "Line");
    gift.extendee = Some("Order".to_string());
    let mut f = file("req.proto", "req", "proto2");
    f.message_type = vec![order, line];
    f.extension.push(gift);
    pool_of(vec![f])
}

#[test]
fn test_missing_required_fields_are_reported_by_path() {
    let pool = required_pool();
    let order = pool.get_message_by_name("req.Order").unwrap();
    let line = pool.get_message_by_name("req.Line").unwrap();
    let gift = pool.get_extension_by_name("req.gift").unwrap();
    let table = AccessTable::build(&order, &order).unwrap();

    let mut message = DynamicMessage::new(order.clone());
    assert_eq!(table.missing_required(&message).unwrap(), vec!["id"]);
    assert!(!message.is_initialized().unwrap());

    message.set_field_by_name("id", 1_i64).unwrap();
    assert!(table.is_initialized(&message).unwrap());

    let empty_line = || Value::Message(Box::new(DynamicMessage::new(line.clone())));
    let mut complete = DynamicMessage::new(line.clone());
    complete.set_field_by_name("sku", "a").unwrap();
    let complete = Value::Message(Box::new(complete));

    message
        .set_field_by_name("lines", Value::List(vec![complete.clone(), empty_line()]))
        .unwrap();
    message.set_field_by_name("first", empty_line()).unwrap();
    let mut by_sku = HashMap::new();
    by_sku.insert(MapKey::from("y"), complete);
    by_sku.insert(MapKey::from("x"), empty_line());
    message.set_field_by_name("by_sku", Value::Map(by_sku)).unwrap();
    message.set_extension(&gift, empty_line()).unwrap();

    assert_eq!(
        table.missing_required(&message).unwrap(),
        vec!["lines[1].sku", "first.sku", "by_sku[\"x\"].sku", "(req.gift).sku"]
    );
    assert!(!message.is_initialized().unwrap());
}

#[test]
fn test_decoder_checks_required_fields_on_request() {
    let pool = required_pool();
    let order = pool.get_message_by_name("req.Order").unwrap();
    let table = AccessTable::build(&order, &order).unwrap();

    // lines { qty: 1 }, no id
    let partial = [0x12, 0x02, 0x10, 0x01];
    let lenient = Decoder::new().decode_dynamic(&partial, &table).unwrap();
    assert!(!lenient.is_initialized().unwrap());

    let strict = Decoder::with_options(DecodeOptions::new().check_required(true));
    match strict.decode_dynamic(&partial, &table) {
        Err(Error::MissingRequired { type_name, fields }) => {
            assert_eq!(type_name, "req.Order");
            assert_eq!(fields, vec!["id", "lines[0].sku"]);
        }
        other => panic!("expected missing required fields, got {:?}", other),
    }

    // id: 1, lines { sku: "a" }
    let complete = [0x08, 0x01, 0x12, 0x03, 0x0a, 0x01, b'a'];
    let decoded = strict.decode_dynamic(&complete, &table).unwrap();
    assert!(decoded.is_initialized().unwrap());
}

fn node_pool() -> DescriptorPool {
    pool_of(vec![single_message(
        "Node",
        "tree",
        "proto3",
        vec![
            typed_field("child", 1, Label::Optional, Type::Message, "Node"),
            field("v", 2, Label::Optional, Type::Int32),
        ],
    )])
}

fn nested_nodes(depth: usize) -> Vec<u8> {
    let mut bytes = Vec::new();
    for _ in 0..depth {
        let mut outer = vec![0x0a, bytes.len() as u8];
        outer.extend_from_slice(&bytes);
        bytes = outer;
    }
    bytes
}

#[test]
fn test_recursion_limit() {
    let pool = node_pool();
    let node = pool.get_message_by_name("tree.Node").unwrap();
    let table = AccessTable::build(&node, &node).unwrap();
    let decoder = Decoder::with_options(DecodeOptions::new().recursion_limit(3));

    assert!(decoder.decode_dynamic(&nested_nodes(3), &table).is_ok());
    assert!(matches!(
        decoder.decode_dynamic(&nested_nodes(4), &table),
        Err(Error::RecursionLimitExceeded { limit: 3 })
    ));

    // The default limit is generous enough for ordinary nesting
    assert!(DynamicMessage::decode(node, &nested_nodes(40)).is_ok());
}

#[test]
fn test_unknown_groups_count_toward_recursion_limit() {
    let pool = node_pool();
    let node = pool.get_message_by_name("tree.Node").unwrap();
    let table = AccessTable::build(&node, &node).unwrap();

    // Field 9 groups nested three deep
    let bytes = [0x4b, 0x4b, 0x4b, 0x4c, 0x4c, 0x4c];
    let shallow = Decoder::with_options(DecodeOptions::new().recursion_limit(2));
    assert!(matches!(
        shallow.decode_dynamic(&bytes, &table),
        Err(Error::RecursionLimitExceeded { .. })
    ));
    let deep = Decoder::with_options(DecodeOptions::new().recursion_limit(3));
    let decoded = deep.decode_dynamic(&bytes, &table).unwrap();
    assert_eq!(decoded.encode_to_vec().unwrap(), bytes.to_vec());
}

#[test]
fn test_utf8_policy() {
    let text = || vec![field("s", 1, Label::Optional, Type::String)];
    let pool = pool_of(vec![
        single_message("Text", "strict", "proto3", text()),
        single_message("Text", "lenient", "proto2", text()),
    ]);
    let bytes = [0x0a, 0x02, 0xff, 0xfe];

    let decode = |name: &str, policy: Utf8Policy| {
        let desc = pool.get_message_by_name(name).unwrap();
        let table = AccessTable::build(&desc, &desc).unwrap();
        Decoder::with_options(DecodeOptions::new().utf8_policy(policy))
            .decode_dynamic(&bytes, &table)
    };
    let repaired = Value::from("\u{FFFD}\u{FFFD}");

    assert!(matches!(
        decode("strict.Text", Utf8Policy::PerDialect),
        Err(Error::InvalidUtf8 { offset: 2, .. })
    ));
    assert_eq!(
        decode("lenient.Text", Utf8Policy::PerDialect)
            .unwrap()
            .get_field_by_name("s")
            .unwrap(),
        repaired
    );
    assert!(decode("lenient.Text", Utf8Policy::Reject).is_err());
    assert_eq!(
        decode("strict.Text", Utf8Policy::Lossy)
            .unwrap()
            .get_field_by_name("s")
            .unwrap(),
        repaired
    );
}

/// ```text
/// syntax = "proto2";
/// package ext;
/// message Base { optional int32 id = 1; extensions 100 to 199; }
/// message Note { optional string text = 1; }
/// extend Base {
///   optional int32 weight = 150;
///   repeated string labels = 151;
///   optional Note note = 152;
/// }
/// ```
fn extension_pool() -> DescriptorPool {
    let mut base = message("Base", vec![field("id", 1, Label::Optional, Type::Int32)]);
    base.extension_range.push(ExtensionRange {
        start: Some(100),
        end: Some(200),
        ..Default::default()
    });
    let extend = |mut f: prost_types::FieldDescriptorProto| {
        f.extendee = Some("Base".to_string());
        f
    };

    let mut f = file("ext.proto", "ext", "proto2");
    f.message_type.push(base);
    f.message_type.push(message(
        "Note",
        vec![field("text", 1, Label::Optional, Type::String)],
    ));
    f.extension = vec![
        extend(field("weight", 150, Label::Optional, Type::Int32)),
        extend(field("labels", 151, Label::Repeated, Type::String)),
        extend(typed_field("note", 152, Label::Optional, Type::Message, "Note")),
    ];
    pool_of(vec![f])
}

#[test]
fn test_extensions_resolve_through_registry() {
    let pool = extension_pool();
    let base = pool.get_message_by_name("ext.Base").unwrap();
    let weight = pool.get_extension_by_name("ext.weight").unwrap();
    let labels = pool.get_extension_by_name("ext.labels").unwrap();
    let note = pool.get_extension_by_name("ext.note").unwrap();

    let mut text = DynamicMessage::new(pool.get_message_by_name("ext.Note").unwrap());
    text.set_field_by_name("text", "memo").unwrap();

    let mut message = DynamicMessage::new(base.clone());
    message.set_field_by_name("id", 1).unwrap();
    message.set_extension(&note, Value::Message(Box::new(text))).unwrap();
    message.set_extension(&weight, Value::I32(3)).unwrap();
    message
        .set_extension(&labels, Value::List(vec![Value::from("x"), Value::from("y")]))
        .unwrap();
    assert!(message.set_extension(&weight, Value::from("heavy")).is_err());

    let bytes = message.encode().unwrap();
    let table = AccessTable::build(&base, &base).unwrap();

    // Without a registry the extensions stay opaque
    let opaque = codec::decode(&bytes, &base, &table, None).unwrap();
    assert!(opaque.get_extension(&weight).is_none());
    assert_eq!(opaque.unknown_fields().len(), 4);
    assert_eq!(opaque.encode().unwrap(), bytes);

    let registry = ExtensionRegistry::from_pool(&pool).unwrap();
    assert_eq!(registry.len(), 3);
    assert_eq!(registry.find("ext.Base", 150), Some(&weight));

    let decoded = codec::decode(&bytes, &base, &table, Some(&registry)).unwrap();
    assert_eq!(decoded.get_extension(&weight), Some(&Value::I32(3)));
    assert_eq!(decoded.get_extension(&labels), message.get_extension(&labels));
    assert_eq!(decoded.get_extension(&note), message.get_extension(&note));
    assert!(decoded.unknown_fields().is_empty());
    assert_eq!(decoded.encode().unwrap(), bytes);
}

#[test]
fn test_registry_rejects_conflicting_extensions() {
    let pool = extension_pool();
    let weight = pool.get_extension_by_name("ext.weight").unwrap();
    let mut registry = ExtensionRegistry::from_pool(&pool).unwrap();

    // Registering the same extension twice is harmless
    registry.add(weight.clone()).unwrap();
    registry.add_file(&weight.parent_file()).unwrap();
    assert_eq!(registry.len(), 3);

    // A separately built extension claiming ext.Base 150
    let other = extension_pool().get_extension_by_name("ext.weight").unwrap();
    let err = registry.add(other).unwrap_err();
    assert!(matches!(err, Error::Validation { .. }), "{}", err);
    assert!(err.to_string().contains("already registered"), "{}", err);
    assert_eq!(registry.find("ext.Base", 150), Some(&weight));
}

#[test]
fn test_extension_numbers_interleave_with_fields() {
    let pool = extension_pool();
    let base = pool.get_message_by_name("ext.Base").unwrap();
    let weight = pool.get_extension_by_name("ext.weight").unwrap();

    let mut message = DynamicMessage::new(base);
    message.set_extension(&weight, Value::I32(3)).unwrap();
    message.set_field_by_name("id", 1).unwrap();

    // id (1) precedes weight (150): tag 150 << 3 is varint b0 09
    assert_eq!(
        message.encode_to_vec().unwrap(),
        vec![0x08, 0x01, 0xb0, 0x09, 0x03]
    );
}

/// ```text
/// syntax = "proto2";
/// package ms;
/// message Container {
///   option message_set_wire_format = true;
///   extensions 4 to max;
/// }
/// message Payload { optional string text = 1; }
/// extend Container { optional Payload payload = 1000; }
/// ```
fn message_set_pool() -> DescriptorPool {
    let mut container = message("Container", vec![]);
    container.options = Some(MessageOptions {
        message_set_wire_format: Some(true),
        ..Default::default()
    });
    container.extension_range.push(ExtensionRange {
        start: Some(4),
        end: Some(536_870_912),
        ..Default::default()
    });
    let mut payload = typed_field("payload", 1000, Label::Optional, Type::Message, "Payload");
    payload.extendee = Some("Container".to_string());

    let mut f = file("ms.proto", "ms", "proto2");
    f.message_type.push(container);
    f.message_type.push(message(
        "Payload",
        vec![field("text", 1, Label::Optional, Type::String)],
    ));
    f.extension.push(payload);
    pool_of(vec![f])
}

// Item { type_id: 1000, message: Payload { text: "hi" } }
const PAYLOAD_ITEM: &[u8] = &[
    0x0b, // start group 1
    0x10, 0xe8, 0x07, // type_id = 1000
    0x1a, 0x04, 0x0a, 0x02, b'h', b'i', // message
    0x0c, // end group 1
];

#[test]
fn test_message_set_items() {
    let pool = message_set_pool();
    let container = pool.get_message_by_name("ms.Container").unwrap();
    let payload = pool.get_extension_by_name("ms.payload").unwrap();
    let table = AccessTable::build(&container, &container).unwrap();
    let registry = ExtensionRegistry::from_pool(&pool).unwrap();

    let mut text = DynamicMessage::new(pool.get_message_by_name("ms.Payload").unwrap());
    text.set_field_by_name("text", "hi").unwrap();
    let mut message = DynamicMessage::new(container.clone());
    message.set_extension(&payload, Value::Message(Box::new(text))).unwrap();

    let bytes = message.encode_to_vec().unwrap();
    assert_eq!(bytes, PAYLOAD_ITEM.to_vec());

    let decoded = codec::decode(&bytes, &container, &table, Some(&registry)).unwrap();
    assert_eq!(decoded, message);

    // Message before type id
    let swapped = [0x0b, 0x1a, 0x04, 0x0a, 0x02, b'h', b'i', 0x10, 0xe8, 0x07, 0x0c];
    let decoded = codec::decode(&swapped, &container, &table, Some(&registry)).unwrap();
    assert_eq!(decoded.get_extension(&payload), message.get_extension(&payload));
    assert_eq!(decoded.encode_to_vec().unwrap(), PAYLOAD_ITEM.to_vec());
}

#[test]
fn test_unregistered_message_set_items_are_kept() {
    let pool = message_set_pool();
    let container = pool.get_message_by_name("ms.Container").unwrap();

    let decoded = DynamicMessage::decode(container, PAYLOAD_ITEM).unwrap();
    let unknown: Vec<_> = decoded.unknown_fields().iter().collect();
    assert_eq!(unknown.len(), 1);
    assert_eq!(unknown[0].number, 1000);
    assert_eq!(
        unknown[0].value,
        UnknownValue::LengthDelimited(Bytes::from_static(&[0x0a, 0x02, b'h', b'i']))
    );
    assert_eq!(decoded.encode_to_vec().unwrap(), PAYLOAD_ITEM.to_vec());
}

#[test]
fn test_malformed_message_set_items() {
    let pool = message_set_pool();
    let container = pool.get_message_by_name("ms.Container").unwrap();
    let decode = |bytes: &[u8]| DynamicMessage::decode(container.clone(), bytes);

    // type_id 0
    let err = decode(&[0x0b, 0x10, 0x00, 0x1a, 0x00, 0x0c]).unwrap_err();
    assert!(matches!(err, Error::InvalidWireFormat { .. }), "{}", err);
    // No END_GROUP
    assert!(decode(&PAYLOAD_ITEM[..PAYLOAD_ITEM.len() - 1]).unwrap_err().is_decode());
    // An item without a message carries nothing
    let empty = decode(&[0x0b, 0x10, 0xe8, 0x07, 0x0c]).unwrap();
    assert!(empty.unknown_fields().is_empty());
}

#[test]
fn test_groups() {
    let mut search = message(
        "Search",
        vec![typed_field("result", 1, Label::Optional, Type::Group, "Result")],
    );
    search.nested_type.push(message(
        "Result",
        vec![field("n", 2, Label::Optional, Type::Int32)],
    ));
    let mut f = file("group.proto", "grp", "proto2");
    f.message_type.push(search);
    let pool = pool_of(vec![f]);
    let search = pool.get_message_by_name("grp.Search").unwrap();

    let bytes = [0x0b, 0x10, 0x05, 0x0c];
    let decoded = DynamicMessage::decode(search.clone(), &bytes).unwrap();
    assert!(decoded.has_field_by_name("result").unwrap());
    assert_eq!(decoded.encode_to_vec().unwrap(), bytes.to_vec());

    // END_GROUP for the wrong field
    let err = DynamicMessage::decode(search.clone(), &[0x0b, 0x10, 0x05, 0x14]).unwrap_err();
    assert!(matches!(err, Error::InvalidWireFormat { .. }), "{}", err);
    // No END_GROUP at all
    assert!(DynamicMessage::decode(search.clone(), &[0x0b, 0x10, 0x05]).is_err());
    // Stray END_GROUP at top level
    assert!(DynamicMessage::decode(search, &[0x0c]).is_err());
}

#[test]
fn test_malformed_input() {
    let pool = pool_of(vec![sample_file()]);
    let sample = pool.get_message_by_name("oracle.Sample").unwrap();
    let decode = |bytes: &[u8]| DynamicMessage::decode(sample.clone(), bytes).unwrap_err();

    // Varint cut short
    assert!(decode(&[0x08]).is_decode());
    assert!(decode(&[0x08, 0xff]).is_decode());
    // Length past the end
    assert!(matches!(decode(&[0x72, 0x05, b'a']), Error::Truncated { .. }));
    // Field number zero
    assert!(matches!(decode(&[0x00]), Error::InvalidFieldNumber { number: 0, .. }));
    // Wire type 7
    assert!(matches!(decode(&[0x0f]), Error::InvalidWireFormat { .. }));
}

#[test]
fn test_decode_checks_table_type() {
    let pool = pool_of(vec![sample_file()]);
    let sample = pool.get_message_by_name("oracle.Sample").unwrap();
    let inner = pool.get_message_by_name("oracle.Inner").unwrap();
    let table = AccessTable::build(&inner, &inner).unwrap();

    assert!(matches!(
        codec::decode(&[], &sample, &table, None),
        Err(Error::ShapeMismatch { .. })
    ));
}
