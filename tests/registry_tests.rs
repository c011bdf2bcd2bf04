//! # Core Layer Tests: Attachments, ServerConfig, ServerBuilder
//!
//! Validates named attachments (typed lookup, collisions, destructor
//! order), TOML configuration, and the builder chain API.

use corral::{Attachments, EngineError, Owner, ServerBuilder, ServerConfig};
use std::net::Ipv4Addr;
use std::sync::{Arc, Mutex};
use std::time::Instant;

/// Verifies typed lookup of an attached value.
#[test]
fn test_attach_and_find() {
    let t = Instant::now();

    let mut registry = Attachments::new(Owner::Server);
    registry.attach("counter", 7u32).unwrap();

    assert_eq!(registry.find::<u32>("counter"), Some(&7));
    assert_eq!(registry.find::<u64>("counter"), None, "Wrong type must not resolve");
    assert_eq!(registry.get("counter").unwrap().size_hint(), 4);
    assert_eq!(registry.get("counter").unwrap().owner(), Owner::Server);

    *registry.find_mut::<u32>("counter").unwrap() += 1;
    assert_eq!(registry.find::<u32>("counter"), Some(&8));

    let overhead = t.elapsed();
    println!("test_attach_and_find: Testing Overhead = {:?}", overhead);
}

/// Verifies that a name collision is rejected and leaves the first entry.
#[test]
fn test_attach_collision_rejected() {
    let t = Instant::now();

    let mut registry = Attachments::new(Owner::Server);
    registry.attach("proto", "http").unwrap();
    let err = registry.attach("proto", "ws").unwrap_err();

    assert!(matches!(err, EngineError::AttachmentExists(name) if name == "proto"));
    assert_eq!(registry.find::<&str>("proto"), Some(&"http"));
    assert_eq!(registry.len(), 1);

    let overhead = t.elapsed();
    println!("test_attach_collision_rejected: Testing Overhead = {:?}", overhead);
}

/// Verifies that detach runs the destructor and that detaching an absent
/// name is an error.
#[test]
fn test_detach_runs_destructor() {
    let t = Instant::now();

    let released = Arc::new(Mutex::new(Vec::new()));
    let mut registry = Attachments::new(Owner::Server);
    let sink = released.clone();
    registry
        .attach_with("session", String::from("abc"), move |value| {
            sink.lock().unwrap().push(value)
        })
        .unwrap();
    assert!(registry.get("session").unwrap().has_destructor());

    registry.detach("session").unwrap();
    assert_eq!(*released.lock().unwrap(), vec![String::from("abc")]);
    assert!(registry.is_empty());

    let err = registry.detach("session").unwrap_err();
    assert!(matches!(err, EngineError::AttachmentMissing(_)));

    let overhead = t.elapsed();
    println!("test_detach_runs_destructor: Testing Overhead = {:?}", overhead);
}

/// Verifies newest-first ordering for names and for teardown.
#[test]
fn test_drop_releases_newest_first() {
    let t = Instant::now();

    let order = Arc::new(Mutex::new(Vec::new()));
    {
        let mut registry = Attachments::new(Owner::Server);
        for name in ["first", "second", "third"] {
            let order = order.clone();
            registry
                .attach_with(name, name, move |value| order.lock().unwrap().push(value))
                .unwrap();
        }
        assert_eq!(
            registry.names().collect::<Vec<_>>(),
            vec!["third", "second", "first"]
        );
    }
    assert_eq!(*order.lock().unwrap(), vec!["third", "second", "first"]);

    let overhead = t.elapsed();
    println!("test_drop_releases_newest_first: Testing Overhead = {:?}", overhead);
}

/// Verifies that `ServerConfig::default()` returns the documented values.
#[test]
fn test_server_config_defaults() {
    let t = Instant::now();

    let config = ServerConfig::default();
    assert_eq!(config.host, Ipv4Addr::UNSPECIFIED);
    assert_eq!(config.port, 0);
    assert_eq!(config.backlog, 5);
    assert_eq!(config.read_chunk, 4096);
    assert_eq!(config.buffer_seed, 256);
    assert_eq!(config.events_capacity, 1024);
    assert_eq!(config.idle_poll_ms, 100);
    assert!(!config.nodelay);
    assert_eq!(config.thread_name, "corral-worker");

    let overhead = t.elapsed();
    println!("test_server_config_defaults: Testing Overhead = {:?}", overhead);
}

/// Verifies TOML parsing: missing keys keep defaults, bad values are
/// rejected as configuration errors.
#[test]
fn test_server_config_from_toml() {
    let t = Instant::now();

    let config = ServerConfig::from_toml_str(
        r#"
        host = "127.0.0.1"
        port = 7000
        nodelay = true
        "#,
    )
    .unwrap();
    assert_eq!(config.host, Ipv4Addr::LOCALHOST);
    assert_eq!(config.port, 7000);
    assert!(config.nodelay);
    assert_eq!(config.backlog, 5);

    let err = ServerConfig::from_toml_str("read_chunk = 0").unwrap_err();
    assert!(matches!(err, EngineError::Config(_)));
    let err = ServerConfig::from_toml_str("port = \"seven\"").unwrap_err();
    assert!(matches!(err, EngineError::Config(_)));

    let overhead = t.elapsed();
    println!("test_server_config_from_toml: Testing Overhead = {:?}", overhead);
}

/// Verifies the `ServerBuilder` fluent API.
#[test]
fn test_server_builder_chain() {
    let t = Instant::now();

    let builder = ServerBuilder::new()
        .host(Ipv4Addr::LOCALHOST)
        .port(9100)
        .nodelay(true)
        .on_join(|_| true);
    assert_eq!(builder.config.port, 9100);
    assert!(builder.config.nodelay);

    let server = builder.build().unwrap();
    assert!(!server.is_open());
    assert!(!server.is_running());
    assert_eq!(server.config().unwrap().host, Ipv4Addr::LOCALHOST);

    let bad = ServerConfig {
        events_capacity: 0,
        ..ServerConfig::default()
    };
    assert!(matches!(
        ServerBuilder::new().with_config(bad).build(),
        Err(EngineError::Config(_))
    ));

    let overhead = t.elapsed();
    println!("test_server_builder_chain: Testing Overhead = {:?}", overhead);
}
