mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use common::Fixture;
use pyopendds::capsule::{CAPSULE_ATTR, Capsule};
use pyopendds::dds::{EntityHandle, EntityKind, Participant, ReturnCode};
use pyopendds::host::{Host, HostError, HostErrorKind};
use pyopendds::{Error, ErrorKind, InitOptions};

#[test]
fn capsule_releases_exactly_once() {
    let released = Arc::new(AtomicUsize::new(0));
    let counter = released.clone();
    let capsule = Capsule::new(Participant(EntityHandle(7)), move |kind, handle| {
        assert_eq!(kind, EntityKind::Participant);
        assert_eq!(handle, EntityHandle(7));
        counter.fetch_add(1, Ordering::SeqCst);
    });
    assert_eq!(capsule.kind(), EntityKind::Participant);
    drop(capsule);
    assert_eq!(released.load(Ordering::SeqCst), 1);
}

#[test]
fn dropping_proxy_releases_participant() {
    let fixture = Fixture::initialized();
    let proxy = fixture.new_proxy(&fixture.classes.participant);
    fixture.bridge.create_participant(&proxy, 42).unwrap();
    assert_eq!(fixture.provider.entity_count(), 1);

    drop(proxy);
    assert_eq!(fixture.provider.entity_count(), 0);
}

#[test]
fn rebinding_releases_previous_entity() {
    let fixture = Fixture::initialized();
    let proxy = fixture.new_proxy(&fixture.classes.participant);
    fixture.bridge.create_participant(&proxy, 1).unwrap();
    let (_, first) = fixture.bridge.fetch_any(&proxy, "participant").unwrap();

    fixture.bridge.create_participant(&proxy, 2).unwrap();
    let (_, second) = fixture.bridge.fetch_any(&proxy, "participant").unwrap();
    assert_ne!(first, second);
    assert_eq!(fixture.provider.entity_count(), 1);
    assert!(!fixture.bridge.provider().is_alive(first));
}

#[test]
fn create_before_init_fails() {
    let fixture = Fixture::new();
    let proxy = fixture.new_proxy(&fixture.classes.participant);
    let err = fixture.bridge.create_participant(&proxy, 0).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Init);
    assert!(fixture.host.get_attr(&proxy, CAPSULE_ATTR).is_err());
}

#[test]
fn init_forwards_options() {
    let fixture = Fixture::new();
    let err = fixture
        .bridge
        .init(&InitOptions::default().with_debug_level(11))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Range);

    let err = fixture
        .bridge
        .init(&InitOptions::default().with_config_file("/nonexistent/rtps.ini"))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Init);
    assert!(err.to_string().contains("Failed to get ParticipantFactory"));
    assert!(!fixture.bridge.is_initialized());

    fixture
        .bridge
        .init(&InitOptions::default().with_debug_level(3))
        .unwrap();
    assert!(fixture.bridge.is_initialized());
    assert_eq!(fixture.provider.debug_level(), 3);
    assert!(fixture.provider.rtps_installed());
    assert!(fixture.bridge.version().to_string().ends_with("-loopback"));
}

#[test]
fn missing_capsule_names_the_role() {
    let fixture = Fixture::initialized();
    let participant = fixture.new_proxy(&fixture.classes.participant);
    let topic = fixture.new_proxy(&fixture.classes.topic);

    let err = fixture
        .bridge
        .create_topic(&topic, &participant, "Readings", "Test::Reading")
        .unwrap_err();
    assert!(matches!(err, Error::HandleMissing { role: "participant", .. }));
}

#[test]
fn wrong_entity_kind_is_missing() {
    let fixture = Fixture::initialized();
    let (participant, topic) = fixture.topic(0);
    let publisher = fixture.new_proxy(&fixture.classes.publisher);

    let err = fixture.bridge.create_publisher(&publisher, &topic).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::HandleMissing);
    fixture.bridge.create_publisher(&publisher, &participant).unwrap();
}

#[test]
fn register_type_records_class() {
    let fixture = Fixture::initialized();
    let participant = fixture.participant(0);
    fixture
        .bridge
        .register_type(&participant, &fixture.reading_class)
        .unwrap();

    fixture
        .bridge
        .register_type(&participant, &fixture.reading_class)
        .unwrap();

    let registered = fixture.host.get_attr(&participant, "_registered_types").unwrap();
    let items = fixture.host.list_items(&registered).unwrap();
    assert_eq!(items.len(), 1);
    assert!(items[0].is(&fixture.reading_class));
    assert_eq!(
        fixture.bridge.type_name(&fixture.reading_class).unwrap(),
        "Test::Reading"
    );

    let topic = fixture.new_proxy(&fixture.classes.topic);
    fixture
        .bridge
        .create_topic(&topic, &participant, "Readings", "Test::Reading")
        .unwrap();
    let class = fixture.host.get_attr(&topic, "type").unwrap();
    assert!(class.is(&fixture.reading_class));
}

#[test]
fn unknown_type_class() {
    let fixture = Fixture::initialized();
    let participant = fixture.participant(0);

    let err = fixture
        .bridge
        .register_type(&participant, &fixture.classes.topic)
        .unwrap_err();
    assert!(matches!(&err, Error::UnknownType(name) if name == "Topic"));

    let derived = fixture
        .host
        .new_class(&fixture.basic, "Derived", &[fixture.reading_class.clone()]);
    let err = fixture.bridge.type_name(&derived).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UnknownType);

    assert!(fixture.bridge.registry().find_by_name("Test::Reading").is_some());
    assert!(fixture.bridge.registry().find_by_name("Test::Other").is_none());
}

#[test]
fn topic_requires_registered_type() {
    let fixture = Fixture::initialized();
    let participant = fixture.participant(0);
    let topic = fixture.new_proxy(&fixture.classes.topic);

    let err = fixture
        .bridge
        .create_topic(&topic, &participant, "Readings", "Test::Reading")
        .unwrap_err();
    assert_eq!(err.return_code(), Some(ReturnCode::PreconditionNotMet));
    assert!(fixture.host.get_attr(&topic, CAPSULE_ATTR).is_err());
}

#[test]
fn cleanup_is_idempotent() {
    let fixture = Fixture::initialized();
    let (participant, topic) = fixture.topic(0);
    let writer = fixture.writer(&participant, &topic, None);

    fixture.bridge.participant_cleanup(&participant).unwrap();
    fixture.bridge.participant_cleanup(&participant).unwrap();

    let sample = fixture.reading(0, 1, "here");
    let err = fixture.bridge.write(&writer, &sample).unwrap_err();
    assert!(matches!(err, Error::HandleMissing { role: "datawriter", .. }));
    assert!(fixture.host.get_attr(&writer, CAPSULE_ATTR).is_err());

    // The participant itself survives cleanup.
    let publisher = fixture.new_proxy(&fixture.classes.publisher);
    fixture.bridge.create_publisher(&publisher, &participant).unwrap();
}

#[test]
fn failed_topic_link_leaves_reader_unbound() {
    let fixture = Fixture::initialized();
    let (participant, topic) = fixture.topic(0);
    let subscriber = fixture.new_proxy(&fixture.classes.subscriber);
    fixture.bridge.create_subscriber(&subscriber, &participant).unwrap();

    let host = &fixture.host;
    let locked = host.new_class(&fixture.basic, "LockedReader", &[]);
    let guard = host.function(|host, args| {
        if host.str_of(&args[1])? == "topic" {
            Err(HostError::attribute("topic is read-only"))
        } else {
            Ok(host.none())
        }
    });
    host.set_attr(&locked, "__setattr__", guard).unwrap();
    let reader = fixture.new_proxy(&locked);

    let before = fixture.provider.entity_count();
    let err = fixture
        .bridge
        .create_datareader(&reader, &subscriber, &topic, None)
        .unwrap_err();
    assert_eq!(err.as_host_error().map(|e| e.kind), Some(HostErrorKind::Attribute));
    assert!(host.get_attr(&reader, CAPSULE_ATTR).is_err());
    assert!(host.get_attr(&reader, "topic").is_err());

    // The unbound reader gave its only reference back.
    assert_eq!(fixture.provider.entity_count(), before + 1);
    let orphan = (0..64)
        .map(EntityHandle)
        .filter(|handle| fixture.bridge.provider().is_alive(*handle))
        .max()
        .unwrap();
    assert_eq!(fixture.provider.proxy_refs(orphan), 0);
}
