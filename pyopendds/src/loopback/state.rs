use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::path::PathBuf;

use tracing::{debug, trace};

use crate::dds::{
    DataReader, DomainId, EntityHandle, EntityKind, InstanceState, ReaderListener, ReturnCode,
    SampleInfo, StatusCondition, StatusKind, StatusMask, WaitSet,
};
use crate::qos::{
    DataReaderQos, DataWriterQos, DurabilityKind, HistoryKind, PublisherQos, SubscriberQos,
    incompatible_policy, partitions_match,
};

use super::dispatch::Job;

pub(crate) struct Sample {
    pub payload: Vec<u8>,
    pub info: SampleInfo,
}

pub(crate) struct WriterState {
    pub topic: EntityHandle,
    pub qos: DataWriterQos,
    pub matched: BTreeSet<EntityHandle>,
    pub history: VecDeque<Vec<u8>>,
}

pub(crate) struct ReaderState {
    pub topic: EntityHandle,
    pub qos: DataReaderQos,
    pub matched: BTreeSet<EntityHandle>,
    pub queue: VecDeque<Sample>,
    pub listener: Option<(ReaderListener, StatusMask)>,
}

pub(crate) enum Body {
    Participant { domain: DomainId, types: HashSet<String> },
    Topic { name: String, type_name: String },
    Publisher { qos: PublisherQos },
    Subscriber { qos: SubscriberQos },
    Writer(WriterState),
    Reader(ReaderState),
}

pub(crate) struct Record {
    pub kind: EntityKind,
    pub participant: EntityHandle,
    pub parent: Option<EntityHandle>,
    pub refs: u32,
    pub triggered: StatusMask,
    pub condition: Option<StatusCondition>,
    pub body: Body,
}

pub(crate) struct ConditionRecord {
    pub entity: EntityHandle,
    pub enabled: StatusMask,
}

#[derive(Default)]
pub(crate) struct WaitSetRecord {
    pub conditions: BTreeSet<StatusCondition>,
    pub waiting: bool,
}

/// What a writer or reader matches on.
#[derive(PartialEq, Eq)]
struct EndpointKey {
    domain: DomainId,
    topic_name: String,
    type_name: String,
}

#[derive(Default)]
pub(crate) struct State {
    next_id: u64,
    pub max_samples: usize,
    pub initialized: bool,
    pub rtps_installed: bool,
    pub debug_level: u8,
    pub config_file: Option<PathBuf>,
    pub entities: HashMap<EntityHandle, Record>,
    pub conditions: HashMap<StatusCondition, ConditionRecord>,
    pub waitsets: HashMap<WaitSet, WaitSetRecord>,
}

impl State {
    pub fn new(max_samples: usize) -> Self {
        Self {
            max_samples,
            ..Default::default()
        }
    }

    pub fn allocate(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    pub fn insert(
        &mut self,
        kind: EntityKind,
        participant: Option<EntityHandle>,
        parent: Option<EntityHandle>,
        body: Body,
    ) -> EntityHandle {
        let handle = EntityHandle(self.allocate());
        self.entities.insert(
            handle,
            Record {
                kind,
                participant: participant.unwrap_or(handle),
                parent,
                refs: 1,
                triggered: StatusMask::NONE,
                condition: None,
                body,
            },
        );
        trace!("[LOOP] created {kind} {handle}");
        handle
    }

    /// Handles are never reused, so an unknown handle below the counter was
    /// deleted.
    fn missing(&self, handle: EntityHandle) -> ReturnCode {
        if handle.0 != 0 && handle.0 <= self.next_id {
            ReturnCode::AlreadyDeleted
        } else {
            ReturnCode::BadParameter
        }
    }

    pub fn get(&self, handle: EntityHandle, kind: EntityKind) -> Result<&Record, ReturnCode> {
        match self.entities.get(&handle) {
            Some(record) if record.kind == kind => Ok(record),
            Some(_) => Err(ReturnCode::BadParameter),
            None => Err(self.missing(handle)),
        }
    }

    pub fn get_mut(&mut self, handle: EntityHandle, kind: EntityKind) -> Result<&mut Record, ReturnCode> {
        let missing = self.missing(handle);
        match self.entities.get_mut(&handle) {
            Some(record) if record.kind == kind => Ok(record),
            Some(_) => Err(ReturnCode::BadParameter),
            None => Err(missing),
        }
    }

    fn writer_mut(&mut self, handle: EntityHandle) -> Option<&mut WriterState> {
        match self.entities.get_mut(&handle).map(|r| &mut r.body) {
            Some(Body::Writer(writer)) => Some(writer),
            _ => None,
        }
    }

    fn reader_mut(&mut self, handle: EntityHandle) -> Option<&mut ReaderState> {
        match self.entities.get_mut(&handle).map(|r| &mut r.body) {
            Some(Body::Reader(reader)) => Some(reader),
            _ => None,
        }
    }

    pub fn domain_of(&self, participant: EntityHandle) -> Option<DomainId> {
        match self.entities.get(&participant).map(|r| &r.body) {
            Some(Body::Participant { domain, .. }) => Some(*domain),
            _ => None,
        }
    }

    fn partition_of(&self, group: Option<EntityHandle>) -> &[String] {
        match group.and_then(|g| self.entities.get(&g)).map(|r| &r.body) {
            Some(Body::Publisher { qos }) => &qos.partition,
            Some(Body::Subscriber { qos }) => &qos.partition,
            _ => &[],
        }
    }

    fn endpoint_key(&self, endpoint: EntityHandle) -> Option<EndpointKey> {
        let record = self.entities.get(&endpoint)?;
        let topic = match &record.body {
            Body::Writer(writer) => writer.topic,
            Body::Reader(reader) => reader.topic,
            _ => return None,
        };
        let Body::Topic { name, type_name } = &self.entities.get(&topic)?.body else {
            return None;
        };
        Some(EndpointKey {
            domain: self.domain_of(record.participant)?,
            topic_name: name.clone(),
            type_name: type_name.clone(),
        })
    }

    /// Sets `kind` on the entity and queues its listener if it asked for it.
    pub fn trigger(&mut self, handle: EntityHandle, kind: StatusKind, jobs: &mut Vec<Job>) {
        let Some(record) = self.entities.get_mut(&handle) else {
            return;
        };
        record.triggered.insert(kind);
        if let Body::Reader(ReaderState {
            listener: Some((listener, mask)),
            ..
        }) = &record.body
        {
            if mask.contains(kind) {
                let listener = listener.clone();
                let reader = DataReader(handle);
                jobs.push(Box::new(move || listener(reader, kind)));
            }
        }
    }

    /// Matches a newly created writer or reader against every existing
    /// endpoint of the opposite kind.
    pub fn discover(&mut self, endpoint: EntityHandle, jobs: &mut Vec<Job>) {
        let Some(key) = self.endpoint_key(endpoint) else {
            return;
        };
        let is_writer = matches!(
            self.entities.get(&endpoint).map(|r| &r.body),
            Some(Body::Writer(_))
        );
        let peers: Vec<EntityHandle> = self
            .entities
            .iter()
            .filter(|(handle, record)| {
                **handle != endpoint
                    && match record.body {
                        Body::Writer(_) => !is_writer,
                        Body::Reader(_) => is_writer,
                        _ => false,
                    }
            })
            .map(|(handle, _)| *handle)
            .filter(|peer| self.endpoint_key(*peer).as_ref() == Some(&key))
            .collect();

        for peer in peers {
            let (writer, reader) = if is_writer { (endpoint, peer) } else { (peer, endpoint) };
            self.connect(writer, reader, jobs);
        }
    }

    fn connect(&mut self, writer: EntityHandle, reader: EntityHandle, jobs: &mut Vec<Job>) {
        let writer_group = self.entities.get(&writer).and_then(|r| r.parent);
        let reader_group = self.entities.get(&reader).and_then(|r| r.parent);
        if !partitions_match(self.partition_of(writer_group), self.partition_of(reader_group)) {
            return;
        }

        let (offered, requested) = match (
            self.entities.get(&writer).map(|r| &r.body),
            self.entities.get(&reader).map(|r| &r.body),
        ) {
            (Some(Body::Writer(w)), Some(Body::Reader(r))) => (w.qos.clone(), r.qos.clone()),
            _ => return,
        };

        if let Some(policy) = incompatible_policy(&offered, &requested) {
            debug!("[LOOP] writer {writer} and reader {reader} incompatible on {policy}");
            self.trigger(writer, StatusKind::OfferedIncompatibleQos, jobs);
            self.trigger(reader, StatusKind::RequestedIncompatibleQos, jobs);
            return;
        }

        let replay = match self.writer_mut(writer) {
            Some(state) => {
                state.matched.insert(reader);
                if requested.durability.kind >= DurabilityKind::TransientLocal {
                    state.history.iter().cloned().collect()
                } else {
                    Vec::new()
                }
            }
            None => return,
        };
        if let Some(state) = self.reader_mut(reader) {
            state.matched.insert(writer);
        }
        debug!("[LOOP] matched writer {writer} with reader {reader}");
        self.trigger(writer, StatusKind::PublicationMatched, jobs);
        self.trigger(reader, StatusKind::SubscriptionMatched, jobs);

        for payload in replay {
            self.deliver(
                reader,
                Sample {
                    payload,
                    info: SampleInfo::valid(writer),
                },
                jobs,
            );
        }
    }

    /// Queues `sample` on the reader, honoring its history policy.
    pub fn deliver(&mut self, reader: EntityHandle, sample: Sample, jobs: &mut Vec<Job>) {
        let max_samples = self.max_samples;
        let Some(state) = self.reader_mut(reader) else {
            return;
        };
        let accepted = match state.qos.history.kind {
            HistoryKind::KeepLast => {
                let depth = state.qos.history.depth.max(1) as usize;
                while state.queue.len() >= depth {
                    state.queue.pop_front();
                }
                true
            }
            HistoryKind::KeepAll => state.queue.len() < max_samples,
        };
        if !accepted {
            self.trigger(reader, StatusKind::SampleRejected, jobs);
            return;
        }
        state.queue.push_back(sample);

        let subscriber = self.entities.get(&reader).and_then(|r| r.parent);
        self.trigger(reader, StatusKind::DataAvailable, jobs);
        if let Some(subscriber) = subscriber {
            self.trigger(subscriber, StatusKind::DataOnReaders, jobs);
        }
    }

    pub fn write(&mut self, writer: EntityHandle, payload: &[u8], jobs: &mut Vec<Job>) -> ReturnCode {
        let max_samples = self.max_samples;
        if let Err(code) = self.get(writer, EntityKind::DataWriter) {
            return code;
        }
        let Some(state) = self.writer_mut(writer) else {
            return ReturnCode::BadParameter;
        };

        if state.qos.durability.kind >= DurabilityKind::TransientLocal {
            let keep = match state.qos.history.kind {
                HistoryKind::KeepLast => state.qos.history.depth.max(1) as usize,
                HistoryKind::KeepAll => max_samples,
            };
            state.history.push_back(payload.to_vec());
            while state.history.len() > keep {
                state.history.pop_front();
            }
        }

        let readers: Vec<EntityHandle> = state.matched.iter().copied().collect();
        for reader in readers {
            self.deliver(
                reader,
                Sample {
                    payload: payload.to_vec(),
                    info: SampleInfo::valid(writer),
                },
                jobs,
            );
        }
        ReturnCode::Ok
    }

    pub fn take(&mut self, reader: EntityHandle) -> Result<Sample, ReturnCode> {
        let record = self.get_mut(reader, EntityKind::DataReader)?;
        let Body::Reader(state) = &mut record.body else {
            return Err(ReturnCode::BadParameter);
        };
        let sample = state.queue.pop_front();
        if state.queue.is_empty() {
            record.triggered.remove(StatusKind::DataAvailable);
            let subscriber = record.parent;
            if let Some(subscriber) = subscriber {
                self.settle_subscriber(subscriber);
            }
        }
        sample.ok_or(ReturnCode::NoData)
    }

    /// Clears DATA_ON_READERS once none of the subscriber's readers holds data.
    fn settle_subscriber(&mut self, subscriber: EntityHandle) {
        let has_data = self.entities.values().any(|record| {
            record.parent == Some(subscriber)
                && matches!(&record.body, Body::Reader(reader) if !reader.queue.is_empty())
        });
        if !has_data {
            if let Some(record) = self.entities.get_mut(&subscriber) {
                record.triggered.remove(StatusKind::DataOnReaders);
            }
        }
    }

    /// Deletes every entity the participant contains and tells remote peers.
    pub fn delete_contained(&mut self, participant: EntityHandle, jobs: &mut Vec<Job>) -> ReturnCode {
        if let Err(code) = self.get(participant, EntityKind::Participant) {
            return code;
        }
        let doomed: HashSet<EntityHandle> = self
            .entities
            .iter()
            .filter(|(handle, record)| record.participant == participant && **handle != participant)
            .map(|(handle, _)| *handle)
            .collect();

        for handle in &doomed {
            let peers: Vec<EntityHandle> = match self.entities.get(handle).map(|r| &r.body) {
                Some(Body::Writer(writer)) => writer.matched.iter().copied().collect(),
                Some(Body::Reader(reader)) => reader.matched.iter().copied().collect(),
                _ => continue,
            };
            for peer in peers.into_iter().filter(|peer| !doomed.contains(peer)) {
                self.unmatch(*handle, peer, jobs);
            }
        }

        for handle in &doomed {
            if let Some(record) = self.entities.remove(handle) {
                if let Some(condition) = record.condition {
                    self.drop_condition(condition);
                }
            }
        }
        debug!("[LOOP] participant {participant} deleted {} entities", doomed.len());
        ReturnCode::Ok
    }

    fn unmatch(&mut self, gone: EntityHandle, peer: EntityHandle, jobs: &mut Vec<Job>) {
        if let Some(writer) = self.writer_mut(peer) {
            writer.matched.remove(&gone);
            self.trigger(peer, StatusKind::PublicationMatched, jobs);
            return;
        }
        let Some(reader) = self.reader_mut(peer) else {
            return;
        };
        reader.matched.remove(&gone);
        let orphaned = reader.matched.is_empty();
        self.trigger(peer, StatusKind::SubscriptionMatched, jobs);
        if orphaned {
            self.deliver(
                peer,
                Sample {
                    payload: Vec::new(),
                    info: SampleInfo::notice(InstanceState::NotAliveNoWriters),
                },
                jobs,
            );
        }
    }

    fn drop_condition(&mut self, condition: StatusCondition) {
        self.conditions.remove(&condition);
        for waitset in self.waitsets.values_mut() {
            waitset.conditions.remove(&condition);
        }
    }

    /// Gives back one proxy reference. An unreferenced participant with no
    /// children is deleted.
    pub fn release(&mut self, handle: EntityHandle) {
        let Some(record) = self.entities.get_mut(&handle) else {
            return;
        };
        record.refs = record.refs.saturating_sub(1);
        if record.refs > 0 || record.kind != EntityKind::Participant {
            return;
        }
        let has_children = self
            .entities
            .iter()
            .any(|(child, record)| record.participant == handle && *child != handle);
        if !has_children {
            if let Some(record) = self.entities.remove(&handle) {
                if let Some(condition) = record.condition {
                    self.drop_condition(condition);
                }
            }
            debug!("[LOOP] participant {handle} deleted on release");
        }
    }

    pub fn status_condition(&mut self, entity: EntityHandle) -> Result<StatusCondition, ReturnCode> {
        let missing = self.missing(entity);
        let existing = match self.entities.get(&entity) {
            Some(record) => record.condition,
            None => return Err(missing),
        };
        if let Some(condition) = existing {
            return Ok(condition);
        }
        let condition = StatusCondition(self.allocate());
        self.conditions.insert(
            condition,
            ConditionRecord {
                entity,
                enabled: StatusMask::ALL,
            },
        );
        if let Some(record) = self.entities.get_mut(&entity) {
            record.condition = Some(condition);
        }
        Ok(condition)
    }

    pub fn condition_triggered(&self, condition: StatusCondition) -> bool {
        self.conditions
            .get(&condition)
            .and_then(|c| {
                self.entities
                    .get(&c.entity)
                    .map(|record| record.triggered.intersects(c.enabled))
            })
            .unwrap_or(false)
    }

    pub fn any_triggered(&self, waitset: WaitSet) -> bool {
        self.waitsets
            .get(&waitset)
            .is_some_and(|ws| ws.conditions.iter().any(|c| self.condition_triggered(*c)))
    }

    pub fn attached_to(&self, entity: EntityHandle) -> usize {
        let Some(condition) = self.entities.get(&entity).and_then(|r| r.condition) else {
            return 0;
        };
        self.waitsets
            .values()
            .filter(|ws| ws.conditions.contains(&condition))
            .count()
    }
}
