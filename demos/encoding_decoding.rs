//! AMQP 0-9-1 Field Codec Example
//!
//! Demonstrates round-tripping field values, field tables, and
//! `BasicProperties` through the codec without needing a broker.

use bytes::BytesMut;
use dumq_amqp::codec::{read_value, write_value};
use dumq_amqp::message::BasicProperties;
use dumq_amqp::value::{FieldTable, FieldValue};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("dumq_amqp Field Codec Example");
    println!("==============================");

    println!("\n1. Basic Value Encoding/Decoding:");
    test_basic_values()?;

    println!("\n2. Field Table Round Trip:");
    test_field_table()?;

    println!("\n3. Basic Properties Round Trip:");
    test_basic_properties()?;

    println!("\nField codec example completed successfully!");
    Ok(())
}

fn test_basic_values() -> Result<(), Box<dyn std::error::Error>> {
    let values = vec![
        FieldValue::from("hello, amqp"),
        FieldValue::LongInt(-42),
        FieldValue::Boolean(true),
        FieldValue::Double(3.14159),
        FieldValue::Timestamp(1_700_000_000),
    ];

    for value in values {
        let mut buf = BytesMut::new();
        write_value(&mut buf, &value)?;
        println!("  {:?} -> {} bytes", value, buf.len());

        let mut frozen = buf.freeze();
        let decoded = read_value(&mut frozen)?;
        assert_eq!(decoded, value);
    }
    Ok(())
}

fn test_field_table() -> Result<(), Box<dyn std::error::Error>> {
    let mut table = FieldTable::new();
    table.insert("x-match", FieldValue::from("all"));
    table.insert("retry-count", FieldValue::LongUInt(3));

    let mut buf = BytesMut::new();
    write_value(&mut buf, &FieldValue::Table(table.clone()))?;
    println!("  table with {} entries -> {} bytes", table.len(), buf.len());

    let mut frozen = buf.freeze();
    match read_value(&mut frozen)? {
        FieldValue::Table(decoded) => assert_eq!(decoded, table),
        other => panic!("expected a table, got {:?}", other),
    }
    Ok(())
}

fn test_basic_properties() -> Result<(), Box<dyn std::error::Error>> {
    let props = BasicProperties::builder()
        .content_type("application/json")
        .correlation_id("req-1")
        .persistent()
        .build();

    let (flags, mut body) = props.encode()?;
    println!("  property flags: {:#018b}, {} bytes of payload", flags, body.len());

    let decoded = BasicProperties::decode(flags, &mut body)?;
    assert_eq!(decoded, props);
    Ok(())
}
