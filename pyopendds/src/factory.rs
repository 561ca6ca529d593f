//! Entity creation: each `create_*` resolves the parent entities bound to
//! the given proxies, asks the provider for the new entity and only then
//! binds it to `proxy`.

use std::sync::atomic::Ordering;

use tracing::{debug, info, warn};

use crate::bridge::{Bridge, REGISTERED_TYPES_ATTR, TOPIC_ATTR, TYPE_ATTR};
use crate::capsule::{self, Capsule};
use crate::config::InitOptions;
use crate::dds::{
    DataReader, DataWriter, DomainId, Entity, Participant, Publisher, ReturnCode, Subscriber, Topic,
};
use crate::error::{Error, Result};
use crate::host::{Host, HostErrorKind};
use crate::qos::{DataReaderQos, DataWriterQos, PublisherQos, SubscriberQos};

impl<H: Host> Bridge<H> {
    #[tracing::instrument(name = "init", skip(self, options), fields(default_rtps = options.default_rtps()))]
    pub fn init(&self, options: &InitOptions) -> Result<()> {
        let args = options.to_args()?;
        self.provider.init(&args).map_err(|code| {
            warn!("[INIT] provider rejected {args:?}: {code}");
            Error::Init(format!("Failed to get ParticipantFactory ({code})"))
        })?;
        if options.default_rtps() {
            let code = self.provider.install_default_rtps();
            if !code.is_ok() {
                return Err(Error::Init(format!("Failed to install default RTPS config ({code})")));
            }
        }
        self.initialized.store(true, Ordering::Release);
        info!("[INIT] provider {} ready", self.provider.version());
        Ok(())
    }

    fn capsule<E: Entity>(&self, entity: E) -> Capsule {
        let provider = self.provider.clone();
        let forget_listener = self.listeners.release_hook();
        Capsule::new(entity, move |kind, handle| {
            forget_listener(kind, handle);
            provider.release(kind, handle);
        })
    }

    fn bind_entity<E: Entity>(&self, proxy: &H::Object, entity: E) -> Result<()> {
        capsule::bind(&self.host, proxy, self.capsule(entity))
    }

    /// Binds a reader or writer together with its `topic` link. Either both
    /// land on `proxy` or neither does; the previous link is restored on
    /// failure.
    fn bind_endpoint<E: Entity>(&self, proxy: &H::Object, entity: E, topic_proxy: &H::Object) -> Result<()> {
        let capsule = self.capsule(entity);
        let previous = self.host.get_attr(proxy, TOPIC_ATTR).ok();
        self.host.set_attr(proxy, TOPIC_ATTR, topic_proxy.clone())?;
        if let Err(err) = capsule::bind(&self.host, proxy, capsule) {
            let restored = match previous {
                Some(previous) => self.host.set_attr(proxy, TOPIC_ATTR, previous),
                None => self.host.del_attr(proxy, TOPIC_ATTR),
            };
            if let Err(restore) = restored {
                warn!("[FACTORY] could not restore topic link: {restore}");
            }
            return Err(err);
        }
        Ok(())
    }

    fn created<E: Entity>(
        &self,
        operation: &'static str,
        result: std::result::Result<E, ReturnCode>,
    ) -> Result<E> {
        result.map_err(|code| {
            warn!("[FACTORY] {operation} failed: {code}");
            Error::DdsOperation { operation, code }
        })
    }

    pub fn create_participant(&self, proxy: &H::Object, domain: DomainId) -> Result<()> {
        self.require_init("create_participant")?;
        let participant = self.created("create_participant", self.provider.create_participant(domain))?;
        self.bind_entity(proxy, participant)?;
        debug!("[FACTORY] participant {} on domain {domain}", participant.0);
        Ok(())
    }

    /// Creates a topic. If `proxy` has no `type` yet and a registered topic
    /// type carries `type_name`, that class is recorded on the proxy.
    pub fn create_topic(
        &self,
        proxy: &H::Object,
        participant_proxy: &H::Object,
        name: &str,
        type_name: &str,
    ) -> Result<()> {
        self.require_init("create_topic")?;
        let participant: Participant = self.fetch(participant_proxy, "participant")?;
        let topic = self.created(
            "create_topic",
            self.provider.create_topic(participant, name, type_name),
        )?;
        self.bind_entity(proxy, topic)?;

        if self.host.get_attr(proxy, TYPE_ATTR).is_err() {
            if let Some((class, _)) = self.registry.find_by_name(type_name) {
                self.host.set_attr(proxy, TYPE_ATTR, class)?;
            }
        }
        debug!("[FACTORY] topic {name:?} ({type_name}) {}", topic.0);
        Ok(())
    }

    pub fn create_publisher(&self, proxy: &H::Object, participant_proxy: &H::Object) -> Result<()> {
        self.require_init("create_publisher")?;
        let participant: Participant = self.fetch(participant_proxy, "participant")?;
        let publisher = self.created(
            "create_publisher",
            self.provider.create_publisher(participant, &PublisherQos::default()),
        )?;
        self.bind_entity(proxy, publisher)?;
        debug!("[FACTORY] publisher {}", publisher.0);
        Ok(())
    }

    pub fn create_subscriber(&self, proxy: &H::Object, participant_proxy: &H::Object) -> Result<()> {
        self.require_init("create_subscriber")?;
        let participant: Participant = self.fetch(participant_proxy, "participant")?;
        let subscriber = self.created(
            "create_subscriber",
            self.provider.create_subscriber(participant, &SubscriberQos::default()),
        )?;
        self.bind_entity(proxy, subscriber)?;
        debug!("[FACTORY] subscriber {}", subscriber.0);
        Ok(())
    }

    /// Creates a writer. `qos` is a host `DataWriterQos`; `None` selects the
    /// provider default.
    pub fn create_datawriter(
        &self,
        proxy: &H::Object,
        publisher_proxy: &H::Object,
        topic_proxy: &H::Object,
        qos: Option<&H::Object>,
    ) -> Result<()> {
        self.require_init("create_datawriter")?;
        let publisher: Publisher = self.fetch(publisher_proxy, "publisher")?;
        let topic: Topic = self.fetch(topic_proxy, "topic")?;
        let qos = DataWriterQos::from_host(&self.context(), qos)?;
        let writer: DataWriter = self.created(
            "create_datawriter",
            self.provider.create_datawriter(publisher, topic, &qos),
        )?;
        self.bind_endpoint(proxy, writer, topic_proxy)?;
        debug!(
            "[FACTORY] datawriter {} ({}, {}, {})",
            writer.0, qos.reliability.kind, qos.durability.kind, qos.history
        );
        Ok(())
    }

    /// Creates a reader. `qos` is a host `DataReaderQos`; `None` selects the
    /// provider default.
    pub fn create_datareader(
        &self,
        proxy: &H::Object,
        subscriber_proxy: &H::Object,
        topic_proxy: &H::Object,
        qos: Option<&H::Object>,
    ) -> Result<()> {
        self.require_init("create_datareader")?;
        let subscriber: Subscriber = self.fetch(subscriber_proxy, "subscriber")?;
        let topic: Topic = self.fetch(topic_proxy, "topic")?;
        let qos = DataReaderQos::from_host(&self.context(), qos)?;
        let reader: DataReader = self.created(
            "create_datareader",
            self.provider.create_datareader(subscriber, topic, &qos),
        )?;
        self.bind_endpoint(proxy, reader, topic_proxy)?;
        debug!(
            "[FACTORY] datareader {} ({}, {}, {})",
            reader.0, qos.reliability.kind, qos.durability.kind, qos.history
        );
        Ok(())
    }

    /// Registers the topic type of `type_class` with the participant and
    /// appends the class to the participant's `_registered_types` unless it
    /// is already listed.
    pub fn register_type(&self, participant_proxy: &H::Object, type_class: &H::Object) -> Result<()> {
        self.require_init("register_type")?;
        let participant: Participant = self.fetch(participant_proxy, "participant")?;
        let descriptor = self.registry.lookup(&self.host, type_class)?;
        descriptor.register_type(self.provider.as_ref(), participant)?;

        let host = &self.host;
        match host.get_attr(participant_proxy, REGISTERED_TYPES_ATTR) {
            Ok(list) => {
                let mut items = host.list_items(&list)?;
                let class_id = host.id(type_class);
                if !items.iter().any(|item| host.id(item) == class_id) {
                    items.push(type_class.clone());
                    host.set_attr(participant_proxy, REGISTERED_TYPES_ATTR, host.new_list(items))?;
                }
            }
            Err(err) if err.kind == HostErrorKind::Attribute => {
                host.set_attr(
                    participant_proxy,
                    REGISTERED_TYPES_ATTR,
                    host.new_list(vec![type_class.clone()]),
                )?;
            }
            Err(err) => return Err(err.into()),
        }
        debug!("[FACTORY] {} registered on participant {}", descriptor.type_name(), participant.0);
        Ok(())
    }

    /// DDS type name of a registered type class.
    pub fn type_name(&self, type_class: &H::Object) -> Result<&'static str> {
        Ok(self.registry.lookup(&self.host, type_class)?.type_name())
    }

    /// Deletes every entity the participant contains.
    ///
    /// Calling it again on the same participant is a no-op. Proxies of the
    /// deleted entities report [`Error::HandleMissing`] from then on.
    pub fn participant_cleanup(&self, proxy: &H::Object) -> Result<()> {
        let participant: Participant = self.fetch(proxy, "participant")?;
        self.provider
            .delete_contained_entities(participant)
            .into_result("delete_contained_entities")?;
        self.prune_listeners();
        debug!("[FACTORY] participant {} cleaned up", participant.0);
        Ok(())
    }
}
