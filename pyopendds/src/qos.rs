use std::fmt;

use strum::{Display, FromRepr};

use crate::basic_type::Type;
use crate::context::Context;
use crate::dds::DdsDuration;
use crate::error::{Error, Result};
use crate::host::Host;

#[repr(u32)]
#[derive(Debug, Default, Hash, PartialEq, Eq, PartialOrd, Ord, Clone, Copy, Display, FromRepr)]
pub enum DurabilityKind {
    #[default]
    Volatile = 0,
    TransientLocal = 1,
    Transient = 2,
    Persistent = 3,
}

#[repr(u32)]
#[derive(Debug, Default, Hash, PartialEq, Eq, PartialOrd, Ord, Clone, Copy, Display, FromRepr)]
pub enum ReliabilityKind {
    #[default]
    BestEffort = 0,
    Reliable = 1,
}

#[repr(u32)]
#[derive(Debug, Default, Hash, PartialEq, Eq, Clone, Copy, Display, FromRepr)]
pub enum HistoryKind {
    #[default]
    KeepLast = 0,
    KeepAll = 1,
}

#[derive(Debug, Default, Hash, PartialEq, Eq, Clone, Copy)]
pub struct DurabilityQosPolicy {
    pub kind: DurabilityKind,
}

#[derive(Debug, Hash, PartialEq, Eq, Clone, Copy)]
pub struct ReliabilityQosPolicy {
    pub kind: ReliabilityKind,
    pub max_blocking_time: DdsDuration,
}

#[derive(Debug, Hash, PartialEq, Eq, Clone, Copy)]
pub struct HistoryQosPolicy {
    pub kind: HistoryKind,
    pub depth: i32,
}

impl Default for HistoryQosPolicy {
    fn default() -> Self {
        Self {
            kind: HistoryKind::KeepLast,
            depth: 1,
        }
    }
}

impl fmt::Display for HistoryQosPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            HistoryKind::KeepLast => write!(f, "KeepLast({})", self.depth),
            HistoryKind::KeepAll => write!(f, "KeepAll"),
        }
    }
}

#[derive(Debug, Hash, PartialEq, Eq, Clone)]
pub struct DataWriterQos {
    pub durability: DurabilityQosPolicy,
    pub reliability: ReliabilityQosPolicy,
    pub history: HistoryQosPolicy,
}

impl Default for DataWriterQos {
    fn default() -> Self {
        Self {
            durability: DurabilityQosPolicy::default(),
            reliability: ReliabilityQosPolicy {
                kind: ReliabilityKind::Reliable,
                max_blocking_time: DdsDuration {
                    sec: 0,
                    nanosec: 100_000_000,
                },
            },
            history: HistoryQosPolicy::default(),
        }
    }
}

#[derive(Debug, Hash, PartialEq, Eq, Clone)]
pub struct DataReaderQos {
    pub durability: DurabilityQosPolicy,
    pub reliability: ReliabilityQosPolicy,
    pub history: HistoryQosPolicy,
}

impl Default for DataReaderQos {
    fn default() -> Self {
        Self {
            durability: DurabilityQosPolicy::default(),
            reliability: ReliabilityQosPolicy {
                kind: ReliabilityKind::BestEffort,
                max_blocking_time: DdsDuration {
                    sec: 0,
                    nanosec: 100_000_000,
                },
            },
            history: HistoryQosPolicy::default(),
        }
    }
}

#[derive(Debug, Default, Hash, PartialEq, Eq, Clone)]
pub struct PublisherQos {
    pub partition: Vec<String>,
}

#[derive(Debug, Default, Hash, PartialEq, Eq, Clone)]
pub struct SubscriberQos {
    pub partition: Vec<String>,
}

/// Partition match: an empty list is the default partition `""`.
pub fn partitions_match(offered: &[String], requested: &[String]) -> bool {
    let default = [String::new()];
    let offered = if offered.is_empty() { &default[..] } else { offered };
    let requested = if requested.is_empty() { &default[..] } else { requested };
    offered.iter().any(|name| requested.contains(name))
}

/// First policy for which the writer offers less than the reader requests.
pub fn incompatible_policy(offered: &DataWriterQos, requested: &DataReaderQos) -> Option<&'static str> {
    if offered.reliability.kind < requested.reliability.kind {
        Some("RELIABILITY")
    } else if offered.durability.kind < requested.durability.kind {
        Some("DURABILITY")
    } else {
        None
    }
}

fn read_kind<H: Host, K>(
    cx: &Context<'_, H>,
    policy: &H::Object,
    target: &'static str,
    from_repr: fn(u32) -> Option<K>,
) -> Result<K> {
    let raw = <u32 as Type<H>>::from_host(cx, &cx.host().get_attr(policy, "kind")?)?;
    from_repr(raw).ok_or_else(|| Error::Range {
        target,
        value: raw.to_string(),
    })
}

type Policies = (DurabilityQosPolicy, ReliabilityQosPolicy, HistoryQosPolicy);

/// Reads the policies shared by `DataWriterQos` and `DataReaderQos` host
/// objects: `durability.kind`, `reliability.kind`,
/// `reliability.max_blocking_time` (seconds), `history.kind` and
/// `history.depth`.
fn read_policies<H: Host>(cx: &Context<'_, H>, qos: &H::Object) -> Result<Policies> {
    let host = cx.host();

    let durability = host.get_attr(qos, "durability")?;
    let durability = DurabilityQosPolicy {
        kind: read_kind(cx, &durability, "durability.kind", DurabilityKind::from_repr)?,
    };

    let reliability = host.get_attr(qos, "reliability")?;
    let max_blocking_time = <f64 as Type<H>>::from_host(cx, &host.get_attr(&reliability, "max_blocking_time")?)?;
    let reliability = ReliabilityQosPolicy {
        kind: read_kind(cx, &reliability, "reliability.kind", ReliabilityKind::from_repr)?,
        max_blocking_time: DdsDuration::from_secs_f64(max_blocking_time)?,
    };

    let history = host.get_attr(qos, "history")?;
    let history = HistoryQosPolicy {
        kind: read_kind(cx, &history, "history.kind", HistoryKind::from_repr)?,
        depth: <i32 as Type<H>>::from_host(cx, &host.get_attr(&history, "depth")?)?,
    };
    if history.kind == HistoryKind::KeepLast && history.depth < 1 {
        return Err(Error::Range {
            target: "history.depth",
            value: history.depth.to_string(),
        });
    }

    Ok((durability, reliability, history))
}

impl DataWriterQos {
    /// Converts a host `DataWriterQos`. `None` selects the default.
    pub fn from_host<H: Host>(cx: &Context<'_, H>, qos: Option<&H::Object>) -> Result<Self> {
        match qos {
            Some(qos) if !cx.host().is_none(qos) => {
                let (durability, reliability, history) = read_policies(cx, qos)?;
                Ok(Self {
                    durability,
                    reliability,
                    history,
                })
            }
            _ => Ok(Self::default()),
        }
    }
}

impl DataReaderQos {
    /// Converts a host `DataReaderQos`. `None` selects the default.
    pub fn from_host<H: Host>(cx: &Context<'_, H>, qos: Option<&H::Object>) -> Result<Self> {
        match qos {
            Some(qos) if !cx.host().is_none(qos) => {
                let (durability, reliability, history) = read_policies(cx, qos)?;
                Ok(Self {
                    durability,
                    reliability,
                    history,
                })
            }
            _ => Ok(Self::default()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reliability_must_be_offered() {
        let mut writer = DataWriterQos::default();
        let mut reader = DataReaderQos::default();
        reader.reliability.kind = ReliabilityKind::Reliable;
        assert_eq!(incompatible_policy(&writer, &reader), None);

        writer.reliability.kind = ReliabilityKind::BestEffort;
        assert_eq!(incompatible_policy(&writer, &reader), Some("RELIABILITY"));
    }

    #[test]
    fn durability_must_be_offered() {
        let writer = DataWriterQos::default();
        let mut reader = DataReaderQos::default();
        reader.durability.kind = DurabilityKind::TransientLocal;
        assert_eq!(incompatible_policy(&writer, &reader), Some("DURABILITY"));
    }

    #[test]
    fn default_partition() {
        assert!(partitions_match(&[], &[]));
        assert!(partitions_match(&["a".into()], &["b".into(), "a".into()]));
        assert!(!partitions_match(&["a".into()], &[]));
    }
}
