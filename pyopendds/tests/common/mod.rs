use std::sync::Arc;

use parking_lot::Mutex;
use pyopendds::dds::DdsProvider;
use pyopendds::host::Host;
use pyopendds::host::memory::{MemoryHost, Object};
use pyopendds::loopback::LoopbackProvider;
use pyopendds::{Bridge, Builder, InitOptions, impl_idl_enum, impl_idl_struct};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReadingKind {
    #[default]
    Speed,
    Acceleration,
    Distance,
}

impl_idl_enum!(ReadingKind, module = "basic", class = "ReadingKind", {
    Speed = 0,
    Acceleration = 1,
    Distance = 2,
});

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    pub kind: ReadingKind,
    pub value: i32,
    pub r#where: String,
}

impl_idl_struct!(Reading, "Test::Reading", module = "basic", class = "Reading", {
    kind,
    value,
    r#where => "where",
});

/// Proxy classes mirroring the `pyopendds` package.
#[allow(dead_code)]
pub struct Proxies {
    pub participant: Object,
    pub topic: Object,
    pub publisher: Object,
    pub subscriber: Object,
    pub writer: Object,
    pub reader: Object,
}

/// A bridge over a loopback provider with the `basic` module loaded.
///
/// Every participant created through [`Fixture::participant`] is cleaned up
/// on drop.
#[allow(dead_code)]
pub struct Fixture {
    pub host: MemoryHost,
    pub provider: Arc<LoopbackProvider>,
    pub bridge: Bridge<MemoryHost>,
    pub basic: Object,
    pub reading_class: Object,
    pub kind_class: Object,
    pub classes: Proxies,
    participants: Mutex<Vec<Object>>,
}

#[allow(dead_code)]
impl Fixture {
    pub fn new() -> Self {
        let host = MemoryHost::new();
        let basic = host.add_module("basic");
        let kind_class = host.new_class(&basic, "ReadingKind", &[host.int_class()]);
        host.new_class(&basic, "Reading", &[]);

        let package = host.add_module("pyopendds");
        let classes = Proxies {
            participant: host.new_class(&package, "DomainParticipant", &[]),
            topic: host.new_class(&package, "Topic", &[]),
            publisher: host.new_class(&package, "Publisher", &[]),
            subscriber: host.new_class(&package, "Subscriber", &[]),
            writer: host.new_class(&package, "DataWriter", &[]),
            reader: host.new_class(&package, "DataReader", &[]),
        };

        let provider = Arc::new(LoopbackProvider::builder().build().unwrap());
        let bridge = Bridge::builder(host.clone())
            .with_provider(provider.clone() as Arc<dyn DdsProvider>)
            .build()
            .unwrap();
        let reading_class = bridge.register_topic_type::<Reading>().unwrap();

        Fixture {
            host,
            provider,
            bridge,
            basic,
            reading_class,
            kind_class,
            classes,
            participants: Mutex::new(Vec::new()),
        }
    }

    pub fn initialized() -> Self {
        let fixture = Self::new();
        fixture.bridge.init(&InitOptions::default()).unwrap();
        fixture
    }

    pub fn new_proxy(&self, class: &Object) -> Object {
        self.host.call(class, &[]).unwrap()
    }

    pub fn participant(&self, domain: u32) -> Object {
        let proxy = self.new_proxy(&self.classes.participant);
        self.bridge.create_participant(&proxy, domain).unwrap();
        self.participants.lock().push(proxy.clone());
        proxy
    }

    /// A participant on `domain` with `Test::Reading` registered and a
    /// `Readings` topic.
    pub fn topic(&self, domain: u32) -> (Object, Object) {
        let participant = self.participant(domain);
        self.bridge.register_type(&participant, &self.reading_class).unwrap();
        let topic = self.new_proxy(&self.classes.topic);
        self.bridge
            .create_topic(&topic, &participant, "Readings", "Test::Reading")
            .unwrap();
        (participant, topic)
    }

    pub fn writer(&self, participant: &Object, topic: &Object, qos: Option<&Object>) -> Object {
        let publisher = self.new_proxy(&self.classes.publisher);
        self.bridge.create_publisher(&publisher, participant).unwrap();
        let writer = self.new_proxy(&self.classes.writer);
        self.bridge
            .create_datawriter(&writer, &publisher, topic, qos)
            .unwrap();
        writer
    }

    pub fn reader(&self, participant: &Object, topic: &Object, qos: Option<&Object>) -> Object {
        let subscriber = self.new_proxy(&self.classes.subscriber);
        self.bridge.create_subscriber(&subscriber, participant).unwrap();
        let reader = self.new_proxy(&self.classes.reader);
        self.bridge
            .create_datareader(&reader, &subscriber, topic, qos)
            .unwrap();
        reader
    }

    /// A host `basic.Reading` instance.
    pub fn reading(&self, kind: u64, value: i64, place: &str) -> Object {
        let host = &self.host;
        let obj = host.call(&self.reading_class, &[]).unwrap();
        let kind = host.call(&self.kind_class, &[host.new_u64(kind)]).unwrap();
        host.set_attr(&obj, "kind", kind).unwrap();
        host.set_attr(&obj, "value", host.new_i64(value)).unwrap();
        host.set_attr(&obj, "where", host.new_str(place)).unwrap();
        obj
    }

    pub fn int_attr(&self, obj: &Object, name: &str) -> i64 {
        self.host.as_i64(&self.host.get_attr(obj, name).unwrap()).unwrap()
    }

    pub fn str_attr(&self, obj: &Object, name: &str) -> String {
        self.host.str_of(&self.host.get_attr(obj, name).unwrap()).unwrap()
    }

    /// A host QoS object shaped like `pyopendds.Qos.DataWriterQos`.
    pub fn qos(&self, durability: u32, reliability: u32, history: u32, depth: i32) -> Object {
        let host = &self.host;
        let module = host.add_module("qos");
        let policy = host.new_class(&module, "Policy", &[]);
        let qos = host.new_class(&module, "Qos", &[]);
        let build = |attrs: Vec<(&str, Object)>| {
            let obj = host.call(&policy, &[]).unwrap();
            for (name, value) in attrs {
                host.set_attr(&obj, name, value).unwrap();
            }
            obj
        };
        let obj = host.call(&qos, &[]).unwrap();
        host.set_attr(
            &obj,
            "durability",
            build(vec![("kind", host.new_u64(durability.into()))]),
        )
        .unwrap();
        host.set_attr(
            &obj,
            "reliability",
            build(vec![
                ("kind", host.new_u64(reliability.into())),
                ("max_blocking_time", host.new_f64(0.1)),
            ]),
        )
        .unwrap();
        host.set_attr(
            &obj,
            "history",
            build(vec![
                ("kind", host.new_u64(history.into())),
                ("depth", host.new_i64(depth.into())),
            ]),
        )
        .unwrap();
        obj
    }
}

impl Drop for Fixture {
    fn drop(&mut self) {
        for participant in self.participants.lock().drain(..) {
            let _ = self.bridge.participant_cleanup(&participant);
        }
    }
}
