//! An in-process DDS provider.
//!
//! Writers and readers in the same process match on domain, topic name,
//! type name, partition and QoS, and samples are handed over in memory.
//! Listeners run on a dedicated thread, never under the state lock.

mod dispatch;
mod state;

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::{Condvar, Mutex, MutexGuard};
use tracing::{debug, info, trace, warn};

use crate::Builder;
use crate::config::MAX_DEBUG_LEVEL;
use crate::dds::{
    DataReader, DataWriter, DdsDuration, DdsProvider, DomainId, EntityHandle, EntityKind,
    Participant, ProviderVersion, Publisher, ReaderListener, ReturnCode, SampleInfo,
    StatusCondition, StatusMask, Subscriber, Topic, WaitSet,
};
use crate::error::{Error, Result};
use crate::qos::{
    DataReaderQos, DataWriterQos, HistoryKind, HistoryQosPolicy, PublisherQos, SubscriberQos,
};

use dispatch::{Dispatcher, Job};
use state::{Body, ReaderState, State, WaitSetRecord, WriterState};

pub const DEFAULT_MAX_SAMPLES: usize = 5000;

pub struct LoopbackBuilder {
    max_samples: usize,
}

impl Default for LoopbackBuilder {
    fn default() -> Self {
        Self {
            max_samples: DEFAULT_MAX_SAMPLES,
        }
    }
}

impl LoopbackBuilder {
    /// Per-reader queue bound under `KEEP_ALL_HISTORY_QOS`, also the
    /// durable history bound of a `KEEP_ALL` writer.
    pub fn with_max_samples(mut self, max_samples: usize) -> Self {
        self.max_samples = max_samples.max(1);
        self
    }
}

impl Builder for LoopbackBuilder {
    type Output = LoopbackProvider;

    fn build(self) -> Result<LoopbackProvider> {
        let dispatcher = Dispatcher::spawn()
            .map_err(|e| Error::Init(format!("Failed to start listener thread: {e}")))?;
        Ok(LoopbackProvider {
            shared: Arc::new(Shared {
                state: Mutex::new(State::new(self.max_samples)),
                changed: Condvar::new(),
                dispatcher,
            }),
        })
    }
}

struct Shared {
    state: Mutex<State>,
    changed: Condvar,
    dispatcher: Dispatcher,
}

#[derive(Clone)]
pub struct LoopbackProvider {
    shared: Arc<Shared>,
}

impl LoopbackProvider {
    pub fn builder() -> LoopbackBuilder {
        LoopbackBuilder::default()
    }

    /// Runs `f` on the locked state, then wakes waiters and hands queued
    /// listener calls to the dispatcher.
    fn update<T>(&self, f: impl FnOnce(&mut State, &mut Vec<Job>) -> T) -> T {
        let mut jobs = Vec::new();
        let result = {
            let mut state = self.shared.state.lock();
            f(&mut state, &mut jobs)
        };
        self.shared.changed.notify_all();
        self.shared.dispatcher.submit(jobs);
        result
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.shared.state.lock()
    }

    /// Live entities, across all participants.
    pub fn entity_count(&self) -> usize {
        self.lock().entities.len()
    }

    /// Proxies still holding the entity; 0 for unknown entities.
    pub fn proxy_refs(&self, entity: EntityHandle) -> u32 {
        self.lock().entities.get(&entity).map_or(0, |record| record.refs)
    }

    pub fn waitset_count(&self) -> usize {
        self.lock().waitsets.len()
    }

    /// How many wait sets the entity's status condition is attached to.
    pub fn attached_conditions(&self, entity: EntityHandle) -> usize {
        self.lock().attached_to(entity)
    }

    /// Samples queued on a reader and not yet taken.
    pub fn queued_samples(&self, reader: DataReader) -> usize {
        match self.lock().entities.get(&reader.0).map(|r| &r.body) {
            Some(Body::Reader(state)) => state.queue.len(),
            _ => 0,
        }
    }

    /// Readers currently matched with the writer.
    pub fn matched_readers(&self, writer: DataWriter) -> usize {
        match self.lock().entities.get(&writer.0).map(|r| &r.body) {
            Some(Body::Writer(state)) => state.matched.len(),
            _ => 0,
        }
    }

    pub fn debug_level(&self) -> u8 {
        self.lock().debug_level
    }

    pub fn config_file(&self) -> Option<PathBuf> {
        self.lock().config_file.clone()
    }

    pub fn rtps_installed(&self) -> bool {
        self.lock().rtps_installed
    }
}

#[derive(Debug, Default, PartialEq)]
struct InitArgs {
    debug_level: Option<u8>,
    config_file: Option<PathBuf>,
}

/// Reads the `-DCPS*` options the loopback understands and skips the rest
/// together with their values.
fn parse_args(args: &[String]) -> std::result::Result<InitArgs, ReturnCode> {
    let mut parsed = InitArgs::default();
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "-DCPSDebugLevel" => {
                let value = iter.next().ok_or(ReturnCode::BadParameter)?;
                let level: u8 = value.parse().map_err(|_| ReturnCode::BadParameter)?;
                if i64::from(level) > MAX_DEBUG_LEVEL {
                    return Err(ReturnCode::BadParameter);
                }
                parsed.debug_level = Some(level);
            }
            "-DCPSConfigFile" => {
                let path = iter.next().ok_or(ReturnCode::BadParameter)?;
                if !Path::new(path).is_file() {
                    warn!("[LOOP] config file {path} not found");
                    return Err(ReturnCode::PreconditionNotMet);
                }
                parsed.config_file = Some(PathBuf::from(path));
            }
            flag if flag.starts_with("-DCPS") || flag.starts_with("-ORB") => {
                trace!("[LOOP] ignoring {flag}");
                iter.next();
            }
            _ => {}
        }
    }
    Ok(parsed)
}

fn require_init(state: &State) -> std::result::Result<(), ReturnCode> {
    if state.initialized {
        Ok(())
    } else {
        Err(ReturnCode::PreconditionNotMet)
    }
}

fn history_is_consistent(history: &HistoryQosPolicy) -> bool {
    history.kind == HistoryKind::KeepAll || history.depth >= 1
}

/// The participant an existing child entity belongs to.
fn participant_of(state: &State, handle: EntityHandle, kind: EntityKind) -> std::result::Result<EntityHandle, ReturnCode> {
    state.get(handle, kind).map(|record| record.participant)
}

impl DdsProvider for LoopbackProvider {
    fn version(&self) -> ProviderVersion {
        ProviderVersion {
            major: env!("CARGO_PKG_VERSION_MAJOR").parse().unwrap_or_default(),
            minor: env!("CARGO_PKG_VERSION_MINOR").parse().unwrap_or_default(),
            micro: env!("CARGO_PKG_VERSION_PATCH").parse().unwrap_or_default(),
            metadata: "loopback".to_string(),
            is_release: true,
        }
    }

    fn init(&self, args: &[String]) -> std::result::Result<(), ReturnCode> {
        let parsed = parse_args(args)?;
        let mut state = self.lock();
        if let Some(level) = parsed.debug_level {
            state.debug_level = level;
        }
        if parsed.config_file.is_some() {
            state.config_file = parsed.config_file;
        }
        if !state.initialized {
            info!("[LOOP] participant factory ready (debug level {})", state.debug_level);
        }
        state.initialized = true;
        Ok(())
    }

    fn install_default_rtps(&self) -> ReturnCode {
        let mut state = self.lock();
        if !state.initialized {
            return ReturnCode::PreconditionNotMet;
        }
        state.rtps_installed = true;
        ReturnCode::Ok
    }

    fn is_alive(&self, handle: EntityHandle) -> bool {
        self.lock().entities.contains_key(&handle)
    }

    fn release(&self, kind: EntityKind, handle: EntityHandle) {
        trace!("[LOOP] release {kind} {handle}");
        self.update(|state, _| state.release(handle));
    }

    fn create_participant(&self, domain: DomainId) -> std::result::Result<Participant, ReturnCode> {
        self.update(|state, _| {
            require_init(state)?;
            let handle = state.insert(
                EntityKind::Participant,
                None,
                None,
                Body::Participant {
                    domain,
                    types: HashSet::new(),
                },
            );
            Ok(Participant(handle))
        })
    }

    fn delete_contained_entities(&self, participant: Participant) -> ReturnCode {
        self.update(|state, jobs| state.delete_contained(participant.0, jobs))
    }

    fn register_type(&self, participant: Participant, type_name: &str) -> ReturnCode {
        if type_name.is_empty() {
            return ReturnCode::BadParameter;
        }
        let mut state = self.lock();
        match state.get_mut(participant.0, EntityKind::Participant) {
            Ok(record) => {
                if let Body::Participant { types, .. } = &mut record.body {
                    types.insert(type_name.to_string());
                }
                ReturnCode::Ok
            }
            Err(code) => code,
        }
    }

    fn create_topic(
        &self,
        participant: Participant,
        name: &str,
        type_name: &str,
    ) -> std::result::Result<Topic, ReturnCode> {
        self.update(|state, _| {
            require_init(state)?;
            let record = state.get(participant.0, EntityKind::Participant)?;
            let Body::Participant { types, .. } = &record.body else {
                return Err(ReturnCode::BadParameter);
            };
            if !types.contains(type_name) {
                debug!("[LOOP] type {type_name} not registered on {}", participant.0);
                return Err(ReturnCode::PreconditionNotMet);
            }
            let clash = state.entities.values().any(|record| {
                record.participant == participant.0
                    && matches!(&record.body, Body::Topic { name: n, type_name: t } if n == name && t != type_name)
            });
            if clash {
                return Err(ReturnCode::PreconditionNotMet);
            }
            let handle = state.insert(
                EntityKind::Topic,
                Some(participant.0),
                Some(participant.0),
                Body::Topic {
                    name: name.to_string(),
                    type_name: type_name.to_string(),
                },
            );
            Ok(Topic(handle))
        })
    }

    fn create_publisher(
        &self,
        participant: Participant,
        qos: &PublisherQos,
    ) -> std::result::Result<Publisher, ReturnCode> {
        self.update(|state, _| {
            require_init(state)?;
            state.get(participant.0, EntityKind::Participant)?;
            let handle = state.insert(
                EntityKind::Publisher,
                Some(participant.0),
                Some(participant.0),
                Body::Publisher { qos: qos.clone() },
            );
            Ok(Publisher(handle))
        })
    }

    fn create_subscriber(
        &self,
        participant: Participant,
        qos: &SubscriberQos,
    ) -> std::result::Result<Subscriber, ReturnCode> {
        self.update(|state, _| {
            require_init(state)?;
            state.get(participant.0, EntityKind::Participant)?;
            let handle = state.insert(
                EntityKind::Subscriber,
                Some(participant.0),
                Some(participant.0),
                Body::Subscriber { qos: qos.clone() },
            );
            Ok(Subscriber(handle))
        })
    }

    fn create_datawriter(
        &self,
        publisher: Publisher,
        topic: Topic,
        qos: &DataWriterQos,
    ) -> std::result::Result<DataWriter, ReturnCode> {
        if !history_is_consistent(&qos.history) {
            return Err(ReturnCode::InconsistentPolicy);
        }
        self.update(|state, jobs| {
            require_init(state)?;
            let participant = participant_of(state, publisher.0, EntityKind::Publisher)?;
            if participant_of(state, topic.0, EntityKind::Topic)? != participant {
                return Err(ReturnCode::BadParameter);
            }
            let handle = state.insert(
                EntityKind::DataWriter,
                Some(participant),
                Some(publisher.0),
                Body::Writer(WriterState {
                    topic: topic.0,
                    qos: qos.clone(),
                    matched: Default::default(),
                    history: Default::default(),
                }),
            );
            state.discover(handle, jobs);
            Ok(DataWriter(handle))
        })
    }

    fn create_datareader(
        &self,
        subscriber: Subscriber,
        topic: Topic,
        qos: &DataReaderQos,
    ) -> std::result::Result<DataReader, ReturnCode> {
        if !history_is_consistent(&qos.history) {
            return Err(ReturnCode::InconsistentPolicy);
        }
        self.update(|state, jobs| {
            require_init(state)?;
            let participant = participant_of(state, subscriber.0, EntityKind::Subscriber)?;
            if participant_of(state, topic.0, EntityKind::Topic)? != participant {
                return Err(ReturnCode::BadParameter);
            }
            let handle = state.insert(
                EntityKind::DataReader,
                Some(participant),
                Some(subscriber.0),
                Body::Reader(ReaderState {
                    topic: topic.0,
                    qos: qos.clone(),
                    matched: Default::default(),
                    queue: Default::default(),
                    listener: None,
                }),
            );
            state.discover(handle, jobs);
            Ok(DataReader(handle))
        })
    }

    fn write(&self, writer: DataWriter, payload: &[u8]) -> ReturnCode {
        self.update(|state, jobs| state.write(writer.0, payload, jobs))
    }

    fn take_next_sample(
        &self,
        reader: DataReader,
    ) -> std::result::Result<(Vec<u8>, SampleInfo), ReturnCode> {
        let sample = self.update(|state, _| state.take(reader.0))?;
        Ok((sample.payload, sample.info))
    }

    fn status_condition(&self, entity: EntityHandle) -> std::result::Result<StatusCondition, ReturnCode> {
        self.lock().status_condition(entity)
    }

    fn set_enabled_statuses(&self, condition: StatusCondition, mask: StatusMask) -> ReturnCode {
        self.update(|state, _| match state.conditions.get_mut(&condition) {
            Some(record) => {
                record.enabled = mask;
                ReturnCode::Ok
            }
            None => ReturnCode::BadParameter,
        })
    }

    fn create_waitset(&self) -> WaitSet {
        let mut state = self.lock();
        let waitset = WaitSet(state.allocate());
        state.waitsets.insert(waitset, WaitSetRecord::default());
        waitset
    }

    fn delete_waitset(&self, waitset: WaitSet) -> ReturnCode {
        let mut state = self.lock();
        match state.waitsets.get(&waitset) {
            None => ReturnCode::BadParameter,
            Some(record) if record.waiting => ReturnCode::PreconditionNotMet,
            Some(_) => {
                state.waitsets.remove(&waitset);
                ReturnCode::Ok
            }
        }
    }

    fn attach_condition(&self, waitset: WaitSet, condition: StatusCondition) -> ReturnCode {
        self.update(|state, _| {
            if !state.conditions.contains_key(&condition) {
                return ReturnCode::BadParameter;
            }
            match state.waitsets.get_mut(&waitset) {
                Some(record) => {
                    record.conditions.insert(condition);
                    ReturnCode::Ok
                }
                None => ReturnCode::BadParameter,
            }
        })
    }

    fn detach_condition(&self, waitset: WaitSet, condition: StatusCondition) -> ReturnCode {
        let mut state = self.lock();
        let known = state.conditions.contains_key(&condition);
        match state.waitsets.get_mut(&waitset) {
            None => ReturnCode::BadParameter,
            Some(record) => {
                if record.conditions.remove(&condition) {
                    ReturnCode::Ok
                } else if known {
                    ReturnCode::PreconditionNotMet
                } else {
                    // Deleted with its entity; nothing left to detach.
                    ReturnCode::Ok
                }
            }
        }
    }

    fn wait(&self, waitset: WaitSet, timeout: DdsDuration) -> ReturnCode {
        let deadline = timeout.to_std().and_then(|d| Instant::now().checked_add(d));
        let mut state = self.lock();
        match state.waitsets.get_mut(&waitset) {
            None => return ReturnCode::BadParameter,
            Some(record) if record.waiting => return ReturnCode::PreconditionNotMet,
            Some(record) => record.waiting = true,
        }

        let code = loop {
            if state.any_triggered(waitset) {
                break ReturnCode::Ok;
            }
            match deadline {
                Some(deadline) => {
                    if self.shared.changed.wait_until(&mut state, deadline).timed_out() {
                        break if state.any_triggered(waitset) {
                            ReturnCode::Ok
                        } else {
                            ReturnCode::Timeout
                        };
                    }
                }
                None => self.shared.changed.wait(&mut state),
            }
        };

        if let Some(record) = state.waitsets.get_mut(&waitset) {
            record.waiting = false;
        }
        trace!("[LOOP] wait on {waitset:?} returned {code}");
        code
    }

    fn set_listener(
        &self,
        reader: DataReader,
        listener: Option<ReaderListener>,
        mask: StatusMask,
    ) -> ReturnCode {
        let mut state = self.lock();
        let record = match state.get_mut(reader.0, EntityKind::DataReader) {
            Ok(record) => record,
            Err(code) => return code,
        };
        match &mut record.body {
            Body::Reader(reader_state) => {
                reader_state.listener = listener.map(|listener| (listener, mask));
                ReturnCode::Ok
            }
            _ => ReturnCode::BadParameter,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::dds::{InstanceState, StatusKind};
    use crate::qos::{DurabilityKind, ReliabilityKind};

    struct Domain {
        provider: LoopbackProvider,
        participant: Participant,
        topic: Topic,
        publisher: Publisher,
        subscriber: Subscriber,
    }

    impl Domain {
        fn new(domain: DomainId) -> Self {
            let provider = LoopbackProvider::builder().build().unwrap();
            provider.init(&[]).unwrap();
            let participant = provider.create_participant(domain).unwrap();
            assert!(provider.register_type(participant, "Test::Reading").is_ok());
            let topic = provider.create_topic(participant, "Readings", "Test::Reading").unwrap();
            let publisher = provider.create_publisher(participant, &PublisherQos::default()).unwrap();
            let subscriber = provider.create_subscriber(participant, &SubscriberQos::default()).unwrap();
            Self {
                provider,
                participant,
                topic,
                publisher,
                subscriber,
            }
        }

        fn writer(&self, qos: &DataWriterQos) -> DataWriter {
            self.provider.create_datawriter(self.publisher, self.topic, qos).unwrap()
        }

        fn reader(&self, qos: &DataReaderQos) -> DataReader {
            self.provider.create_datareader(self.subscriber, self.topic, qos).unwrap()
        }
    }

    impl Drop for Domain {
        fn drop(&mut self) {
            self.provider.delete_contained_entities(self.participant);
            self.provider.release(EntityKind::Participant, self.participant.0);
        }
    }

    #[test]
    fn parse_known_args() {
        let args: Vec<String> = ["-DCPSDebugLevel", "4", "-ORBVerboseLogging", "1", "extra"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(
            parse_args(&args),
            Ok(InitArgs {
                debug_level: Some(4),
                config_file: None
            })
        );
        let bad = vec!["-DCPSDebugLevel".to_string(), "11".to_string()];
        assert_eq!(parse_args(&bad), Err(ReturnCode::BadParameter));
        let missing = vec!["-DCPSConfigFile".to_string(), "/nonexistent/rtps.ini".to_string()];
        assert_eq!(parse_args(&missing), Err(ReturnCode::PreconditionNotMet));
    }

    #[test]
    fn create_before_init() {
        let provider = LoopbackProvider::builder().build().unwrap();
        assert_eq!(provider.create_participant(0), Err(ReturnCode::PreconditionNotMet));
        assert_eq!(provider.install_default_rtps(), ReturnCode::PreconditionNotMet);
    }

    #[test]
    fn topic_needs_registered_type() {
        let provider = LoopbackProvider::builder().build().unwrap();
        provider.init(&[]).unwrap();
        let participant = provider.create_participant(0).unwrap();
        assert_eq!(
            provider.create_topic(participant, "Readings", "Test::Reading"),
            Err(ReturnCode::PreconditionNotMet)
        );
        assert!(provider.register_type(participant, "Test::Reading").is_ok());
        assert!(provider.create_topic(participant, "Readings", "Test::Reading").is_ok());
        assert!(provider.register_type(participant, "Test::Other").is_ok());
        assert_eq!(
            provider.create_topic(participant, "Readings", "Test::Other"),
            Err(ReturnCode::PreconditionNotMet)
        );
    }

    #[test]
    fn matched_writer_delivers() {
        let domain = Domain::new(7);
        let reader = domain.reader(&DataReaderQos::default());
        let writer = domain.writer(&DataWriterQos::default());
        assert_eq!(domain.provider.matched_readers(writer), 1);

        assert!(domain.provider.write(writer, &[1, 2, 3]).is_ok());
        let (payload, info) = domain.provider.take_next_sample(reader).unwrap();
        assert_eq!(payload, vec![1, 2, 3]);
        assert!(info.valid_data);
        assert_eq!(info.publication_handle, Some(writer.0));
        assert_eq!(domain.provider.take_next_sample(reader), Err(ReturnCode::NoData));
    }

    #[test]
    fn reliable_reader_rejects_best_effort_writer() {
        let domain = Domain::new(0);
        let mut requested = DataReaderQos::default();
        requested.reliability.kind = ReliabilityKind::Reliable;
        let reader = domain.reader(&requested);
        let mut offered = DataWriterQos::default();
        offered.reliability.kind = ReliabilityKind::BestEffort;
        let writer = domain.writer(&offered);

        assert_eq!(domain.provider.matched_readers(writer), 0);
        let state = domain.provider.lock();
        assert!(state.entities[&writer.0].triggered.contains(StatusKind::OfferedIncompatibleQos));
        assert!(state.entities[&reader.0].triggered.contains(StatusKind::RequestedIncompatibleQos));
    }

    #[test]
    fn keep_last_drops_oldest() {
        let domain = Domain::new(0);
        let mut qos = DataReaderQos::default();
        qos.history.depth = 2;
        let reader = domain.reader(&qos);
        let writer = domain.writer(&DataWriterQos::default());
        for n in 0..5u8 {
            assert!(domain.provider.write(writer, &[n]).is_ok());
        }
        assert_eq!(domain.provider.queued_samples(reader), 2);
        assert_eq!(domain.provider.take_next_sample(reader).unwrap().0, vec![3]);
    }

    #[test]
    fn keep_all_rejects_past_bound() {
        let provider = LoopbackProvider::builder().with_max_samples(2).build().unwrap();
        provider.init(&[]).unwrap();
        let participant = provider.create_participant(0).unwrap();
        provider.register_type(participant, "T");
        let topic = provider.create_topic(participant, "t", "T").unwrap();
        let publisher = provider.create_publisher(participant, &PublisherQos::default()).unwrap();
        let subscriber = provider.create_subscriber(participant, &SubscriberQos::default()).unwrap();
        let mut qos = DataReaderQos::default();
        qos.history.kind = HistoryKind::KeepAll;
        let reader = provider.create_datareader(subscriber, topic, &qos).unwrap();
        let writer = provider.create_datawriter(publisher, topic, &DataWriterQos::default()).unwrap();
        for n in 0..3u8 {
            provider.write(writer, &[n]);
        }
        assert_eq!(provider.queued_samples(reader), 2);
        assert!(provider.lock().entities[&reader.0].triggered.contains(StatusKind::SampleRejected));
    }

    #[test]
    fn transient_local_replays_history() {
        let domain = Domain::new(0);
        let mut offered = DataWriterQos::default();
        offered.durability.kind = DurabilityKind::TransientLocal;
        offered.history.depth = 3;
        let writer = domain.writer(&offered);
        for n in 0..4u8 {
            domain.provider.write(writer, &[n]);
        }

        let mut late = DataReaderQos::default();
        late.durability.kind = DurabilityKind::TransientLocal;
        late.history.depth = 10;
        let reader = domain.reader(&late);
        assert_eq!(domain.provider.queued_samples(reader), 3);

        let volatile = domain.reader(&DataReaderQos::default());
        assert_eq!(domain.provider.queued_samples(volatile), 0);
    }

    #[test]
    fn partitions_separate_endpoints() {
        let domain = Domain::new(0);
        let partitioned = domain
            .provider
            .create_publisher(
                domain.participant,
                &PublisherQos {
                    partition: vec!["north".to_string()],
                },
            )
            .unwrap();
        domain.reader(&DataReaderQos::default());
        let writer = domain
            .provider
            .create_datawriter(partitioned, domain.topic, &DataWriterQos::default())
            .unwrap();
        assert_eq!(domain.provider.matched_readers(writer), 0);
    }

    #[test]
    fn other_domain_does_not_match() {
        let domain = Domain::new(1);
        let provider = &domain.provider;
        let elsewhere = provider.create_participant(2).unwrap();
        provider.register_type(elsewhere, "Test::Reading");
        let topic = provider.create_topic(elsewhere, "Readings", "Test::Reading").unwrap();
        let subscriber = provider.create_subscriber(elsewhere, &SubscriberQos::default()).unwrap();
        let reader = provider
            .create_datareader(subscriber, topic, &DataReaderQos::default())
            .unwrap();

        let writer = domain.writer(&DataWriterQos::default());
        assert_eq!(provider.matched_readers(writer), 0);
        provider.write(writer, &[1]);
        assert_eq!(provider.queued_samples(reader), 0);
    }

    #[test]
    fn wait_times_out_then_triggers() {
        let domain = Domain::new(0);
        let writer = domain.writer(&DataWriterQos::default());
        let provider = &domain.provider;

        let condition = provider.status_condition(writer.0).unwrap();
        assert!(provider.set_enabled_statuses(condition, StatusKind::PublicationMatched.into()).is_ok());
        let waitset = provider.create_waitset();
        assert!(provider.attach_condition(waitset, condition).is_ok());
        assert_eq!(provider.attached_conditions(writer.0), 1);

        assert_eq!(provider.wait(waitset, DdsDuration { sec: 0, nanosec: 1 }), ReturnCode::Timeout);

        let background = provider.clone();
        let (subscriber, topic) = (domain.subscriber, domain.topic);
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            background
                .create_datareader(subscriber, topic, &DataReaderQos::default())
                .unwrap()
        });
        assert_eq!(provider.wait(waitset, DdsDuration::from(Duration::from_secs(5))), ReturnCode::Ok);
        handle.join().unwrap();

        assert!(provider.detach_condition(waitset, condition).is_ok());
        assert!(provider.delete_waitset(waitset).is_ok());
        assert_eq!(provider.attached_conditions(writer.0), 0);
        assert_eq!(provider.waitset_count(), 0);
    }

    #[test]
    fn listener_runs_on_dispatch_thread() {
        let domain = Domain::new(0);
        let reader = domain.reader(&DataReaderQos::default());
        let (tx, rx) = flume::unbounded();
        let caller = std::thread::current().id();
        let listener: ReaderListener = Arc::new(move |reader, status| {
            tx.send((reader, status, std::thread::current().id() != caller)).unwrap();
        });
        assert!(domain.provider.set_listener(reader, Some(listener), StatusKind::DataAvailable.into()).is_ok());

        let writer = domain.writer(&DataWriterQos::default());
        domain.provider.write(writer, &[9]);
        let (who, status, elsewhere) = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(who, reader);
        assert_eq!(status, StatusKind::DataAvailable);
        assert!(elsewhere);
    }

    #[test]
    fn cleanup_notifies_remote_readers() {
        let provider = LoopbackProvider::builder().build().unwrap();
        provider.init(&[]).unwrap();
        let endpoints = |provider: &LoopbackProvider| {
            let participant = provider.create_participant(3).unwrap();
            provider.register_type(participant, "T");
            let topic = provider.create_topic(participant, "t", "T").unwrap();
            let publisher = provider.create_publisher(participant, &PublisherQos::default()).unwrap();
            let subscriber = provider.create_subscriber(participant, &SubscriberQos::default()).unwrap();
            (participant, publisher, subscriber, topic)
        };
        let (writing, publisher, _, topic) = endpoints(&provider);
        let (reading, _, subscriber, their_topic) = endpoints(&provider);
        let reader = provider
            .create_datareader(subscriber, their_topic, &DataReaderQos::default())
            .unwrap();
        provider.create_datawriter(publisher, topic, &DataWriterQos::default()).unwrap();

        assert!(provider.delete_contained_entities(writing).is_ok());
        let (_, info) = provider.take_next_sample(reader).unwrap();
        assert!(!info.valid_data);
        assert_eq!(info.instance_state, InstanceState::NotAliveNoWriters);
        assert!(!provider.is_alive(topic.0));
        assert!(provider.is_alive(writing.0));

        assert!(provider.delete_contained_entities(writing).is_ok());
        provider.release(EntityKind::Participant, writing.0);
        assert!(!provider.is_alive(writing.0));
        assert_eq!(provider.delete_contained_entities(writing), ReturnCode::AlreadyDeleted);
        assert!(provider.is_alive(reading.0));
    }
}
