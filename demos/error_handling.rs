//! AMQP 0-9-1 Error Handling Example
//!
//! Demonstrates the error taxonomy surfaced by every public operation
//! and the named reply-code constants used when closing a connection
//! or channel.

use dumq_amqp::connection::reply_codes;
use dumq_amqp::error::AmqpError;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("dumq_amqp Error Handling Example");
    println!("==================================");

    println!("\n1. Constructing Each Error Variant:");
    test_error_variants()?;

    println!("\n2. Distinguishing Connection-Fatal Errors:");
    test_connection_fatal_classification()?;

    println!("\n3. Matching on Close Reasons:");
    test_close_reason_matching()?;

    println!("\n4. Reply Code Constants:");
    test_reply_codes()?;

    println!("\nError handling example completed successfully!");
    Ok(())
}

fn test_error_variants() -> Result<(), Box<dyn std::error::Error>> {
    let errors = vec![
        AmqpError::protocol("bad frame end octet"),
        AmqpError::channel_closed(reply_codes::NOT_FOUND, "no queue 'orders'"),
        AmqpError::connection_closed(reply_codes::CONNECTION_FORCED, "broker shutting down"),
        AmqpError::timeout("no CloseOk within 5s"),
        AmqpError::invalid_argument("routing_key must not be empty for direct exchanges"),
        AmqpError::Cancelled,
    ];

    for err in errors {
        println!("    {}", err);
    }
    Ok(())
}

fn test_connection_fatal_classification() -> Result<(), Box<dyn std::error::Error>> {
    let fatal = AmqpError::connection_closed(reply_codes::INTERNAL_ERROR, "unexpected frame");
    let not_fatal = AmqpError::channel_closed(reply_codes::PRECONDITION_FAILED, "queue in use");

    println!("    connection_closed is_connection_fatal: {}", fatal.is_connection_fatal());
    println!("    channel_closed is_connection_fatal:    {}", not_fatal.is_connection_fatal());
    assert!(fatal.is_connection_fatal());
    assert!(!not_fatal.is_connection_fatal());
    Ok(())
}

fn test_close_reason_matching() -> Result<(), Box<dyn std::error::Error>> {
    let result: Result<(), AmqpError> = Err(AmqpError::channel_closed(reply_codes::RESOURCE_LOCKED, "queue locked by another consumer"));

    match result {
        Ok(()) => println!("    operation succeeded"),
        Err(AmqpError::ChannelClosed { code, reply_text }) => {
            println!("    channel closed: {} {}", code, reply_text);
        }
        Err(AmqpError::ConnectionClosed { code, reply_text }) => {
            println!("    connection closed: {} {}", code, reply_text);
        }
        Err(e) => println!("    other error: {}", e),
    }
    Ok(())
}

fn test_reply_codes() -> Result<(), Box<dyn std::error::Error>> {
    let codes = [
        ("SUCCESS", reply_codes::SUCCESS),
        ("CONTENT_TOO_LARGE", reply_codes::CONTENT_TOO_LARGE),
        ("CONNECTION_FORCED", reply_codes::CONNECTION_FORCED),
        ("NOT_FOUND", reply_codes::NOT_FOUND),
        ("RESOURCE_LOCKED", reply_codes::RESOURCE_LOCKED),
        ("PRECONDITION_FAILED", reply_codes::PRECONDITION_FAILED),
        ("FRAME_ERROR", reply_codes::FRAME_ERROR),
        ("SYNTAX_ERROR", reply_codes::SYNTAX_ERROR),
        ("CHANNEL_ERROR", reply_codes::CHANNEL_ERROR),
        ("UNEXPECTED_FRAME", reply_codes::UNEXPECTED_FRAME),
        ("NOT_ALLOWED", reply_codes::NOT_ALLOWED),
        ("NOT_IMPLEMENTED", reply_codes::NOT_IMPLEMENTED),
        ("INTERNAL_ERROR", reply_codes::INTERNAL_ERROR),
    ];

    for (name, code) in codes {
        println!("    {:<20} {}", name, code);
    }
    Ok(())
}
