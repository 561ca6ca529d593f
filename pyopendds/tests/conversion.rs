mod common;

use common::{Fixture, Reading, ReadingKind};
use pyopendds::encoding::{Ascii, Latin1};
use pyopendds::host::{Host, HostError, HostErrorKind};
use pyopendds::host::memory::MemoryHost;
use pyopendds::topic_type::struct_to_host;
use pyopendds::{ErrorKind, IdlString, Type};

type H = MemoryHost;

#[test]
fn integers_check_native_range() {
    let fixture = Fixture::new();
    let cx = fixture.bridge.context();
    let host = &fixture.host;

    assert_eq!(<i8 as Type<H>>::from_host(&cx, &host.new_i64(-128)).unwrap(), -128);
    let err = <i8 as Type<H>>::from_host(&cx, &host.new_i64(128)).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Range);

    assert_eq!(<u16 as Type<H>>::from_host(&cx, &host.new_i64(65535)).unwrap(), u16::MAX);
    assert_eq!(
        <u16 as Type<H>>::from_host(&cx, &host.new_i64(-1)).unwrap_err().kind(),
        ErrorKind::Range
    );
    assert_eq!(
        <u64 as Type<H>>::from_host(&cx, &host.int(1 << 64)).unwrap_err().kind(),
        ErrorKind::Range
    );
    assert_eq!(
        <i64 as Type<H>>::from_host(&cx, &host.int(i128::from(i64::MIN))).unwrap(),
        i64::MIN
    );

    let back = <i32 as Type<H>>::to_host(&cx, &-200).unwrap();
    assert_eq!(host.as_i64(&back).unwrap(), -200);
}

#[test]
fn integers_reject_other_types() {
    let fixture = Fixture::new();
    let cx = fixture.bridge.context();
    let host = &fixture.host;

    let err = <i32 as Type<H>>::from_host(&cx, &host.new_f64(1.5)).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Type);
    let err = <u8 as Type<H>>::from_host(&cx, &host.new_str("7")).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Type);
}

#[test]
fn floats() {
    let fixture = Fixture::new();
    let cx = fixture.bridge.context();
    let host = &fixture.host;

    assert_eq!(<f64 as Type<H>>::from_host(&cx, &host.new_i64(3)).unwrap(), 3.0);
    assert_eq!(<f32 as Type<H>>::from_host(&cx, &host.new_f64(0.5)).unwrap(), 0.5);
    assert_eq!(
        <f32 as Type<H>>::from_host(&cx, &host.new_f64(1e300)).unwrap_err().kind(),
        ErrorKind::Range
    );
    assert!(<f32 as Type<H>>::from_host(&cx, &host.new_f64(f64::INFINITY))
        .unwrap()
        .is_infinite());
}

#[test]
fn bool_uses_singletons() {
    let fixture = Fixture::new();
    let cx = fixture.bridge.context();
    let host = &fixture.host;

    let yes = <bool as Type<H>>::to_host(&cx, &true).unwrap();
    assert!(host.is_true(&yes));
    assert!(<bool as Type<H>>::from_host(&cx, &yes).unwrap());
    assert!(!<bool as Type<H>>::from_host(&cx, &host.new_bool(false)).unwrap());

    let err = <bool as Type<H>>::from_host(&cx, &host.new_i64(1)).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Type);
}

#[test]
fn strings_follow_their_codec() {
    let fixture = Fixture::new();
    let cx = fixture.bridge.context();
    let host = &fixture.host;

    let text = host.new_str("café");
    let utf8 = <IdlString as Type<H>>::from_host(&cx, &text).unwrap();
    assert_eq!(utf8.as_bytes(), "café".as_bytes());

    let latin1 = <IdlString<Latin1> as Type<H>>::from_host(&cx, &text).unwrap();
    assert_eq!(latin1.as_bytes(), b"caf\xe9");
    let back = <IdlString<Latin1> as Type<H>>::to_host(&cx, &latin1).unwrap();
    assert_eq!(host.str_of(&back).unwrap(), "café");

    let err = <IdlString<Ascii> as Type<H>>::from_host(&cx, &text).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Encoding);

    let five = <IdlString as Type<H>>::from_host(&cx, &host.new_i64(5)).unwrap();
    assert_eq!(five.as_bytes(), b"5");
    let half = <String as Type<H>>::from_host(&cx, &host.new_f64(1.5)).unwrap();
    assert_eq!(half, "1.5");

    let invalid = IdlString::from_bytes(vec![0xff, 0xfe]);
    let err = <IdlString as Type<H>>::to_host(&cx, &invalid).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Encoding);
}

#[test]
fn strings_use_the_str_protocol() {
    let fixture = Fixture::new();
    let cx = fixture.bridge.context();
    let host = &fixture.host;
    let module = host.add_module("labels");

    let label = host.new_class(&module, "Label", &[]);
    let describe = host.function(|host, _| Ok(host.new_str("dock 7")));
    host.set_attr(&label, "__str__", describe).unwrap();
    let obj = host.call(&label, &[]).unwrap();
    let text = <IdlString as Type<H>>::from_host(&cx, &obj).unwrap();
    assert_eq!(text.as_bytes(), b"dock 7");

    let broken = host.new_class(&module, "Broken", &[]);
    let fail = host.function(|_, _| Err(HostError::new(HostErrorKind::Value, "no text")));
    host.set_attr(&broken, "__str__", fail).unwrap();
    let obj = host.call(&broken, &[]).unwrap();
    let err = <IdlString as Type<H>>::from_host(&cx, &obj).unwrap_err();
    assert_eq!(err.as_host_error().map(|e| e.kind), Some(HostErrorKind::Value));

    let numeric = host.new_class(&module, "Numeric", &[]);
    let wrong = host.function(|host, _| Ok(host.new_i64(3)));
    host.set_attr(&numeric, "__str__", wrong).unwrap();
    let obj = host.call(&numeric, &[]).unwrap();
    let err = <String as Type<H>>::from_host(&cx, &obj).unwrap_err();
    assert_eq!(err.as_host_error().map(|e| e.kind), Some(HostErrorKind::Type));
}

#[test]
fn sequences_map_to_lists() {
    let fixture = Fixture::new();
    let cx = fixture.bridge.context();
    let host = &fixture.host;

    let list = <Vec<u8> as Type<H>>::to_host(&cx, &vec![1, 2, 3]).unwrap();
    assert_eq!(host.list_items(&list).unwrap().len(), 3);
    assert_eq!(<Vec<u8> as Type<H>>::from_host(&cx, &list).unwrap(), vec![1, 2, 3]);

    let mixed = host.new_list(vec![host.new_i64(1), host.new_i64(300)]);
    assert_eq!(
        <Vec<u8> as Type<H>>::from_host(&cx, &mixed).unwrap_err().kind(),
        ErrorKind::Range
    );
    assert_eq!(
        <Vec<u8> as Type<H>>::from_host(&cx, &host.new_i64(1)).unwrap_err().kind(),
        ErrorKind::Type
    );
}

#[test]
fn enums_use_their_class() {
    let fixture = Fixture::new();
    let cx = fixture.bridge.context();
    let host = &fixture.host;

    let obj = <ReadingKind as Type<H>>::to_host(&cx, &ReadingKind::Distance).unwrap();
    assert!(host.type_of(&obj).is(&fixture.kind_class));
    assert_eq!(host.as_u64(&obj).unwrap(), 2);
    assert_eq!(
        <ReadingKind as Type<H>>::from_host(&cx, &obj).unwrap(),
        ReadingKind::Distance
    );
    assert_eq!(
        <ReadingKind as Type<H>>::from_host(&cx, &host.new_u64(9)).unwrap_err().kind(),
        ErrorKind::Range
    );
}

#[test]
fn structs_round_trip_through_host() {
    let fixture = Fixture::new();
    let cx = fixture.bridge.context();
    let host = &fixture.host;

    let reading = Reading {
        kind: ReadingKind::Acceleration,
        value: -200,
        r#where: "dock".to_string(),
    };
    let obj = <Reading as Type<H>>::to_host(&cx, &reading).unwrap();
    assert!(host.type_of(&obj).is(&fixture.reading_class));
    assert_eq!(fixture.int_attr(&obj, "value"), -200);
    assert_eq!(fixture.str_attr(&obj, "where"), "dock");
    assert_eq!(<Reading as Type<H>>::from_host(&cx, &obj).unwrap(), reading);
}

#[test]
fn struct_needs_exact_class() {
    let fixture = Fixture::new();
    let cx = fixture.bridge.context();
    let host = &fixture.host;

    let derived = host.new_class(&fixture.basic, "SpecialReading", &[fixture.reading_class.clone()]);
    let obj = host.call(&derived, &[]).unwrap();
    let err = <Reading as Type<H>>::from_host(&cx, &obj).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Type);
}

#[test]
fn missing_field_is_host_error() {
    let fixture = Fixture::new();
    let cx = fixture.bridge.context();
    let host = &fixture.host;

    let obj = host.call(&fixture.reading_class, &[]).unwrap();
    host.set_attr(&obj, "value", host.new_i64(1)).unwrap();
    let err = <Reading as Type<H>>::from_host(&cx, &obj).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Host);
}

#[test]
fn struct_to_host_updates_in_place() {
    let fixture = Fixture::new();
    let cx = fixture.bridge.context();

    let existing = fixture.reading(0, 5, "before");
    let update = Reading {
        kind: ReadingKind::Speed,
        value: 7,
        r#where: "after".to_string(),
    };
    let same = struct_to_host(&cx, &update, Some(&existing)).unwrap();
    assert!(same.is(&existing));
    assert_eq!(fixture.int_attr(&existing, "value"), 7);

    let wrong_class = fixture.host.call(&fixture.classes.topic, &[]).unwrap();
    let err = struct_to_host(&cx, &update, Some(&wrong_class)).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Type);
}

#[test]
fn failed_field_leaves_existing_untouched() {
    let fixture = Fixture::new();
    let cx = fixture.bridge.context();
    let existing = fixture.reading(0, 5, "before");

    // The enum class is resolved lazily, so removing it breaks only `kind`.
    fixture.host.del_attr(&fixture.basic, "ReadingKind").unwrap();
    let update = Reading {
        kind: ReadingKind::Distance,
        value: 9,
        r#where: "after".to_string(),
    };
    assert!(struct_to_host(&cx, &update, Some(&existing)).is_err());
    assert_eq!(fixture.int_attr(&existing, "value"), 5);
    assert_eq!(fixture.str_attr(&existing, "where"), "before");
}
