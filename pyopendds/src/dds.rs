//! The DDS runtime as seen from the bridge.
//!
//! Everything the bridge needs from a DDS implementation goes through
//! [`DdsProvider`]. Entities are referenced by opaque [`EntityHandle`]s owned
//! by the provider; the bridge never frees them itself.

use std::fmt;
use std::ops::{BitAnd, BitOr, BitOrAssign};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use strum::{Display, EnumIter, FromRepr, IntoEnumIterator, IntoStaticStr};

use crate::error::{Error, Result};
use crate::qos::{DataReaderQos, DataWriterQos, PublisherQos, SubscriberQos};

pub type DomainId = u32;

/// `DDS::ReturnCode_t`
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter, FromRepr, IntoStaticStr)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum ReturnCode {
    Ok = 0,
    Error = 1,
    Unsupported = 2,
    BadParameter = 3,
    PreconditionNotMet = 4,
    OutOfResources = 5,
    NotEnabled = 6,
    ImmutablePolicy = 7,
    InconsistentPolicy = 8,
    AlreadyDeleted = 9,
    Timeout = 10,
    NoData = 11,
    IllegalOperation = 12,
}

impl ReturnCode {
    pub fn code(self) -> i32 {
        self as i32
    }

    pub fn is_ok(self) -> bool {
        self == ReturnCode::Ok
    }

    /// Turns a non-OK code into a [`Error::DdsOperation`] naming `operation`.
    pub fn into_result(self, operation: &'static str) -> Result<()> {
        match self {
            ReturnCode::Ok => Ok(()),
            code => Err(Error::DdsOperation { operation, code }),
        }
    }

    /// Name of the host exception class raised for this code,
    /// e.g. `PreconditionNotMetReturnCodeError`.
    pub fn exception_name(self) -> String {
        format!("{self:?}ReturnCodeError")
    }

    /// Every code that signals a failure.
    pub fn failures() -> impl Iterator<Item = ReturnCode> {
        ReturnCode::iter().filter(|code| !code.is_ok())
    }
}

/// Opaque reference to an entity living inside the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityHandle(pub u64);

impl fmt::Display for EntityHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter, IntoStaticStr)]
pub enum EntityKind {
    #[strum(serialize = "DomainParticipant")]
    Participant,
    Topic,
    Publisher,
    Subscriber,
    DataWriter,
    DataReader,
}

/// A typed view of an [`EntityHandle`].
pub trait Entity: Copy + fmt::Debug + Send + Sync + 'static {
    const KIND: EntityKind;

    fn from_handle(handle: EntityHandle) -> Self;

    fn handle(self) -> EntityHandle;
}

macro_rules! entity_handles {
    ($($name:ident => $kind:ident),* $(,)?) => {
        $(
            #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
            pub struct $name(pub EntityHandle);

            impl Entity for $name {
                const KIND: EntityKind = EntityKind::$kind;

                fn from_handle(handle: EntityHandle) -> Self {
                    Self(handle)
                }

                fn handle(self) -> EntityHandle {
                    self.0
                }
            }

            impl From<$name> for EntityHandle {
                fn from(entity: $name) -> Self {
                    entity.0
                }
            }
        )*
    };
}

entity_handles! {
    Participant => Participant,
    Topic => Topic,
    Publisher => Publisher,
    Subscriber => Subscriber,
    DataWriter => DataWriter,
    DataReader => DataReader,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StatusCondition(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WaitSet(pub u64);

/// One bit of a `DDS::StatusMask`.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter, FromRepr, IntoStaticStr)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum StatusKind {
    InconsistentTopic = 0x0001,
    OfferedDeadlineMissed = 0x0002,
    RequestedDeadlineMissed = 0x0004,
    OfferedIncompatibleQos = 0x0020,
    RequestedIncompatibleQos = 0x0040,
    SampleLost = 0x0080,
    SampleRejected = 0x0100,
    DataOnReaders = 0x0200,
    DataAvailable = 0x0400,
    LivelinessLost = 0x0800,
    LivelinessChanged = 0x1000,
    PublicationMatched = 0x2000,
    SubscriptionMatched = 0x4000,
}

impl StatusKind {
    pub fn bit(self) -> u32 {
        self as u32
    }

    /// Constant name exported to the host, e.g. `PUBLICATION_MATCHED_STATUS`.
    pub fn constant_name(self) -> String {
        format!("{self}_STATUS")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct StatusMask(pub u32);

impl StatusMask {
    pub const NONE: StatusMask = StatusMask(0);
    pub const ALL: StatusMask = StatusMask(u32::MAX);

    pub fn bits(self) -> u32 {
        self.0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn contains(self, kind: StatusKind) -> bool {
        self.0 & kind.bit() != 0
    }

    pub fn intersects(self, other: StatusMask) -> bool {
        self.0 & other.0 != 0
    }

    pub fn insert(&mut self, kind: StatusKind) {
        self.0 |= kind.bit();
    }

    pub fn remove(&mut self, kind: StatusKind) {
        self.0 &= !kind.bit();
    }

    pub fn kinds(self) -> impl Iterator<Item = StatusKind> {
        StatusKind::iter().filter(move |kind| self.contains(*kind))
    }
}

impl From<StatusKind> for StatusMask {
    fn from(kind: StatusKind) -> Self {
        StatusMask(kind.bit())
    }
}

impl BitOr for StatusMask {
    type Output = StatusMask;

    fn bitor(self, rhs: StatusMask) -> StatusMask {
        StatusMask(self.0 | rhs.0)
    }
}

impl BitOr<StatusKind> for StatusMask {
    type Output = StatusMask;

    fn bitor(self, rhs: StatusKind) -> StatusMask {
        StatusMask(self.0 | rhs.bit())
    }
}

impl BitOr for StatusKind {
    type Output = StatusMask;

    fn bitor(self, rhs: StatusKind) -> StatusMask {
        StatusMask(self.bit() | rhs.bit())
    }
}

impl BitOrAssign<StatusKind> for StatusMask {
    fn bitor_assign(&mut self, rhs: StatusKind) {
        self.insert(rhs);
    }
}

impl BitAnd for StatusMask {
    type Output = StatusMask;

    fn bitand(self, rhs: StatusMask) -> StatusMask {
        StatusMask(self.0 & rhs.0)
    }
}

impl fmt::Display for StatusMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == StatusMask::ALL {
            return write!(f, "ALL");
        }
        let names: Vec<&'static str> = self.kinds().map(Into::into).collect();
        if names.is_empty() {
            write!(f, "{:#06x}", self.0)
        } else {
            write!(f, "{}", names.join("|"))
        }
    }
}

/// `DDS::Duration_t`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DdsDuration {
    pub sec: i32,
    pub nanosec: u32,
}

impl DdsDuration {
    pub const INFINITE: DdsDuration = DdsDuration {
        sec: 0x7fff_ffff,
        nanosec: 0x7fff_ffff,
    };
    pub const ZERO: DdsDuration = DdsDuration { sec: 0, nanosec: 0 };

    const NANOS_PER_SEC: u32 = 1_000_000_000;

    /// Builds a duration from host-supplied seconds and nanoseconds.
    pub fn from_parts(sec: i64, nanosec: u64) -> Result<Self> {
        let sec = i32::try_from(sec)
            .ok()
            .filter(|sec| *sec >= 0)
            .ok_or_else(|| Error::Range {
                target: "Duration_t.sec",
                value: sec.to_string(),
            })?;
        let nanosec = u32::try_from(nanosec).map_err(|_| Error::Range {
            target: "Duration_t.nanosec",
            value: nanosec.to_string(),
        })?;
        let duration = DdsDuration { sec, nanosec };
        if nanosec >= Self::NANOS_PER_SEC && duration != Self::INFINITE {
            return Err(Error::Range {
                target: "Duration_t.nanosec",
                value: nanosec.to_string(),
            });
        }
        Ok(duration)
    }

    pub fn from_secs_f64(secs: f64) -> Result<Self> {
        if secs.is_infinite() && secs > 0.0 {
            return Ok(Self::INFINITE);
        }
        if !secs.is_finite() || secs < 0.0 || secs >= f64::from(i32::MAX) {
            return Err(Error::Range {
                target: "Duration_t",
                value: secs.to_string(),
            });
        }
        let whole = secs.trunc();
        Ok(DdsDuration {
            sec: whole as i32,
            nanosec: ((secs - whole) * f64::from(Self::NANOS_PER_SEC)) as u32,
        })
    }

    pub fn is_infinite(self) -> bool {
        self == Self::INFINITE
    }

    /// `None` for [`DdsDuration::INFINITE`].
    pub fn to_std(self) -> Option<Duration> {
        if self.is_infinite() {
            None
        } else {
            Some(Duration::new(self.sec.max(0) as u64, self.nanosec))
        }
    }
}

impl From<Duration> for DdsDuration {
    fn from(duration: Duration) -> Self {
        match i32::try_from(duration.as_secs()) {
            Ok(sec) if sec != Self::INFINITE.sec => DdsDuration {
                sec,
                nanosec: duration.subsec_nanos(),
            },
            _ => Self::INFINITE,
        }
    }
}

impl fmt::Display for DdsDuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_infinite() {
            write!(f, "infinite")
        } else if self.nanosec == 0 {
            write!(f, "{}s", self.sec)
        } else {
            write!(f, "{}s {}ns", self.sec, self.nanosec)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum InstanceState {
    Alive,
    NotAliveDisposed,
    NotAliveNoWriters,
}

/// `DDS::SampleInfo`, reduced to what the bridge consumes.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleInfo {
    pub valid_data: bool,
    pub instance_state: InstanceState,
    pub publication_handle: Option<EntityHandle>,
    pub source_timestamp: SystemTime,
}

impl SampleInfo {
    pub fn valid(publication: EntityHandle) -> Self {
        SampleInfo {
            valid_data: true,
            instance_state: InstanceState::Alive,
            publication_handle: Some(publication),
            source_timestamp: SystemTime::now(),
        }
    }

    /// A state-change notice carrying no data.
    pub fn notice(instance_state: InstanceState) -> Self {
        SampleInfo {
            valid_data: false,
            instance_state,
            publication_handle: None,
            source_timestamp: SystemTime::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderVersion {
    pub major: u32,
    pub minor: u32,
    pub micro: u32,
    pub metadata: String,
    pub is_release: bool,
}

impl fmt::Display for ProviderVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.micro)?;
        if !self.metadata.is_empty() {
            write!(f, "-{}", self.metadata)?;
        }
        Ok(())
    }
}

/// Invoked by the provider, on a thread it owns, when a reader status
/// enabled in the listener mask changes.
pub type ReaderListener = Arc<dyn Fn(DataReader, StatusKind) + Send + Sync>;

/// A DDS implementation the bridge can drive.
///
/// Samples cross this boundary as serialized (CDR) payloads. Factory
/// operations return the created handle or the code explaining the failure.
pub trait DdsProvider: Send + Sync {
    fn version(&self) -> ProviderVersion;

    /// Command-line style initialization, `TheParticipantFactoryWithArgs`.
    fn init(&self, args: &[String]) -> std::result::Result<(), ReturnCode>;

    /// Installs a default RTPS discovery and transport configuration.
    fn install_default_rtps(&self) -> ReturnCode;

    /// Whether `handle` still names a live entity.
    fn is_alive(&self, handle: EntityHandle) -> bool;

    /// Drops one external reference held by a host proxy.
    fn release(&self, kind: EntityKind, handle: EntityHandle);

    fn create_participant(&self, domain: DomainId) -> std::result::Result<Participant, ReturnCode>;

    fn delete_contained_entities(&self, participant: Participant) -> ReturnCode;

    fn register_type(&self, participant: Participant, type_name: &str) -> ReturnCode;

    fn create_topic(
        &self,
        participant: Participant,
        name: &str,
        type_name: &str,
    ) -> std::result::Result<Topic, ReturnCode>;

    fn create_publisher(
        &self,
        participant: Participant,
        qos: &PublisherQos,
    ) -> std::result::Result<Publisher, ReturnCode>;

    fn create_subscriber(
        &self,
        participant: Participant,
        qos: &SubscriberQos,
    ) -> std::result::Result<Subscriber, ReturnCode>;

    fn create_datawriter(
        &self,
        publisher: Publisher,
        topic: Topic,
        qos: &DataWriterQos,
    ) -> std::result::Result<DataWriter, ReturnCode>;

    fn create_datareader(
        &self,
        subscriber: Subscriber,
        topic: Topic,
        qos: &DataReaderQos,
    ) -> std::result::Result<DataReader, ReturnCode>;

    fn write(&self, writer: DataWriter, payload: &[u8]) -> ReturnCode;

    fn take_next_sample(
        &self,
        reader: DataReader,
    ) -> std::result::Result<(Vec<u8>, SampleInfo), ReturnCode>;

    fn status_condition(&self, entity: EntityHandle)
    -> std::result::Result<StatusCondition, ReturnCode>;

    fn set_enabled_statuses(&self, condition: StatusCondition, mask: StatusMask) -> ReturnCode;

    fn create_waitset(&self) -> WaitSet;

    fn delete_waitset(&self, waitset: WaitSet) -> ReturnCode;

    fn attach_condition(&self, waitset: WaitSet, condition: StatusCondition) -> ReturnCode;

    fn detach_condition(&self, waitset: WaitSet, condition: StatusCondition) -> ReturnCode;

    /// Blocks until an attached condition triggers or `timeout` elapses.
    fn wait(&self, waitset: WaitSet, timeout: DdsDuration) -> ReturnCode;

    fn set_listener(
        &self,
        reader: DataReader,
        listener: Option<ReaderListener>,
        mask: StatusMask,
    ) -> ReturnCode;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn return_code_names() {
        assert_eq!(ReturnCode::PreconditionNotMet.to_string(), "PRECONDITION_NOT_MET");
        assert_eq!(ReturnCode::Timeout.exception_name(), "TimeoutReturnCodeError");
        assert_eq!(ReturnCode::from_repr(11), Some(ReturnCode::NoData));
        assert_eq!(ReturnCode::failures().count(), 12);
    }

    #[test]
    fn status_mask_display() {
        let mask = StatusKind::PublicationMatched | StatusKind::DataAvailable;
        assert_eq!(mask.bits(), 0x2400);
        assert_eq!(mask.to_string(), "DATA_AVAILABLE|PUBLICATION_MATCHED");
        assert_eq!(StatusKind::PublicationMatched.constant_name(), "PUBLICATION_MATCHED_STATUS");
    }

    #[test]
    fn duration_bounds() {
        let d = DdsDuration::from_parts(0, 1).unwrap();
        assert_eq!(d.to_std(), Some(Duration::from_nanos(1)));
        assert!(DdsDuration::from_parts(-1, 0).is_err());
        assert!(DdsDuration::from_parts(1, 1_000_000_000).is_err());
        assert_eq!(DdsDuration::INFINITE.to_std(), None);
        assert_eq!(
            DdsDuration::from_secs_f64(1.5).unwrap(),
            DdsDuration { sec: 1, nanosec: 500_000_000 }
        );
    }
}
