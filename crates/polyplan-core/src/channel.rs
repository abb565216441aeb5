//! Channel model: declared hand-off descriptors, insertable conversions, and
//! the runtime `ChannelInstance` that owns data between producer and consumer.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{Error, Result};
use crate::id::{ChannelId, LineageId, TaskId};
use crate::platform::Platform;
use crate::types::Record;

/// What a channel physically carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Representation {
    RowStream,
    Collection,
    PartitionedCollection,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ChannelDescriptor {
    /// Single-use row stream inside the local engine.
    Stream,
    /// Materialized rows; readable any number of times, by either platform.
    Collection,
    /// Rows split into partitions on the distributed engine.
    Partitioned,
}

impl ChannelDescriptor {
    pub const ALL: [ChannelDescriptor; 3] = [
        ChannelDescriptor::Stream,
        ChannelDescriptor::Collection,
        ChannelDescriptor::Partitioned,
    ];

    pub fn representation(self) -> Representation {
        match self {
            ChannelDescriptor::Stream => Representation::RowStream,
            ChannelDescriptor::Collection => Representation::Collection,
            ChannelDescriptor::Partitioned => Representation::PartitionedCollection,
        }
    }

    /// Reusable channels may feed broadcast inputs.
    pub fn is_reusable(self) -> bool {
        match self {
            ChannelDescriptor::Stream => false,
            ChannelDescriptor::Collection | ChannelDescriptor::Partitioned => true,
        }
    }

    pub fn producers(self) -> &'static [Platform] {
        match self {
            ChannelDescriptor::Stream => &[Platform::Local],
            ChannelDescriptor::Collection => &[Platform::Local, Platform::Distributed],
            ChannelDescriptor::Partitioned => &[Platform::Distributed],
        }
    }

    pub fn consumers(self) -> &'static [Platform] {
        match self {
            ChannelDescriptor::Stream => &[Platform::Local],
            ChannelDescriptor::Collection => &[Platform::Local, Platform::Distributed],
            ChannelDescriptor::Partitioned => &[Platform::Distributed],
        }
    }

    /// True when a hand-off between the two platforms needs no materialization.
    pub fn is_same_platform(from: Platform, to: Platform) -> bool {
        from == to
    }
}

impl fmt::Display for ChannelDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ChannelDescriptor::Stream => "stream",
            ChannelDescriptor::Collection => "collection",
            ChannelDescriptor::Partitioned => "partitioned",
        };
        f.write_str(s)
    }
}

/// An insertable conversion between two descriptors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ChannelConversion {
    pub from: ChannelDescriptor,
    pub to: ChannelDescriptor,
    pub spec_key: &'static str,
}

pub static CONVERSIONS: [ChannelConversion; 4] = [
    ChannelConversion {
        from: ChannelDescriptor::Stream,
        to: ChannelDescriptor::Collection,
        spec_key: "conversion.collect",
    },
    ChannelConversion {
        from: ChannelDescriptor::Collection,
        to: ChannelDescriptor::Stream,
        spec_key: "conversion.stream",
    },
    ChannelConversion {
        from: ChannelDescriptor::Collection,
        to: ChannelDescriptor::Partitioned,
        spec_key: "conversion.parallelize",
    },
    ChannelConversion {
        from: ChannelDescriptor::Partitioned,
        to: ChannelDescriptor::Collection,
        spec_key: "conversion.gather",
    },
];

pub fn conversions_from(from: ChannelDescriptor) -> impl Iterator<Item = &'static ChannelConversion> {
    CONVERSIONS.iter().filter(move |c| c.from == from)
}

/// Payload of a channel instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ChannelData {
    /// Not yet produced.
    Empty,
    Records(Vec<Record>),
    Partitions(Vec<Vec<Record>>),
}

/// Runtime realization of a channel.
///
/// Owned by the driver between production and consumption; consumers take it
/// by value, so a single instance cannot be read twice. Fan-out goes through
/// [`ChannelInstance::duplicate`].
#[derive(Debug, Clone)]
pub struct ChannelInstance {
    id: ChannelId,
    descriptor: ChannelDescriptor,
    producer: TaskId,
    data: ChannelData,
    lineage: Option<LineageId>,
}

impl ChannelInstance {
    pub fn new(id: ChannelId, descriptor: ChannelDescriptor, producer: TaskId) -> Self {
        Self {
            id,
            descriptor,
            producer,
            data: ChannelData::Empty,
            lineage: None,
        }
    }

    pub fn id(&self) -> ChannelId {
        self.id
    }
    pub fn descriptor(&self) -> ChannelDescriptor {
        self.descriptor
    }
    pub fn producer(&self) -> TaskId {
        self.producer
    }
    pub fn lineage(&self) -> Option<LineageId> {
        self.lineage
    }
    pub fn set_lineage(&mut self, node: LineageId) {
        self.lineage = Some(node);
    }

    pub fn is_produced(&self) -> bool {
        !matches!(self.data, ChannelData::Empty)
    }

    /// Fill the instance with rows; partitioned channels get a single partition.
    pub fn accept_records(&mut self, records: Vec<Record>) {
        self.data = match self.descriptor {
            ChannelDescriptor::Partitioned => ChannelData::Partitions(vec![records]),
            ChannelDescriptor::Stream | ChannelDescriptor::Collection => {
                ChannelData::Records(records)
            }
        };
    }

    /// Fill the instance with partitions; non-partitioned channels flatten them.
    pub fn accept_partitions(&mut self, partitions: Vec<Vec<Record>>) {
        self.data = match self.descriptor {
            ChannelDescriptor::Partitioned => ChannelData::Partitions(partitions),
            ChannelDescriptor::Stream | ChannelDescriptor::Collection => {
                ChannelData::Records(partitions.into_iter().flatten().collect())
            }
        };
    }

    pub fn cardinality(&self) -> u64 {
        match &self.data {
            ChannelData::Empty => 0,
            ChannelData::Records(r) => r.len() as u64,
            ChannelData::Partitions(p) => p.iter().map(|p| p.len() as u64).sum(),
        }
    }

    pub fn approx_bytes(&self) -> u64 {
        match &self.data {
            ChannelData::Empty => 0,
            ChannelData::Records(r) => r.iter().map(Record::approx_bytes).sum(),
            ChannelData::Partitions(p) => p.iter().flatten().map(Record::approx_bytes).sum(),
        }
    }

    /// Borrow all rows regardless of partitioning.
    pub fn records(&self) -> Result<Vec<&Record>> {
        match &self.data {
            ChannelData::Empty => Err(self.unproduced()),
            ChannelData::Records(r) => Ok(r.iter().collect()),
            ChannelData::Partitions(p) => Ok(p.iter().flatten().collect()),
        }
    }

    /// Consume the instance, yielding its rows.
    pub fn into_records(self) -> Result<Vec<Record>> {
        match self.data {
            ChannelData::Empty => Err(self.unproduced()),
            ChannelData::Records(r) => Ok(r),
            ChannelData::Partitions(p) => Ok(p.into_iter().flatten().collect()),
        }
    }

    /// Consume the instance, yielding its partitions (one partition if unpartitioned).
    pub fn into_partitions(self) -> Result<Vec<Vec<Record>>> {
        match self.data {
            ChannelData::Empty => Err(self.unproduced()),
            ChannelData::Records(r) => Ok(vec![r]),
            ChannelData::Partitions(p) => Ok(p),
        }
    }

    /// Explicit fan-out copy with a fresh identity; lineage is inherited.
    pub fn duplicate(&self, id: ChannelId) -> ChannelInstance {
        ChannelInstance {
            id,
            descriptor: self.descriptor,
            producer: self.producer,
            data: self.data.clone(),
            lineage: self.lineage,
        }
    }

    /// Apply one conversion step, producing a new instance.
    pub fn convert(
        self,
        conversion: &ChannelConversion,
        id: ChannelId,
        parallelism: usize,
    ) -> Result<ChannelInstance> {
        if conversion.from != self.descriptor {
            return Err(Error::Channel(format!(
                "cannot apply {} -> {} to a {} instance",
                conversion.from, conversion.to, self.descriptor
            )));
        }
        let producer = self.producer;
        let lineage = self.lineage;
        let mut out = ChannelInstance::new(id, conversion.to, producer);
        out.lineage = lineage;
        match conversion.to {
            ChannelDescriptor::Partitioned => {
                let records = self.into_records()?;
                out.accept_partitions(split_round_robin(records, parallelism));
            }
            ChannelDescriptor::Stream | ChannelDescriptor::Collection => {
                out.accept_records(self.into_records()?);
            }
        }
        Ok(out)
    }

    fn unproduced(&self) -> Error {
        Error::Channel(format!(
            "{} ({}) was read before its producer {} filled it",
            self.id, self.descriptor, self.producer
        ))
    }
}

/// Deterministic round-robin split into `parallelism` partitions.
pub fn split_round_robin(records: Vec<Record>, parallelism: usize) -> Vec<Vec<Record>> {
    let n = parallelism.max(1);
    let mut parts: Vec<Vec<Record>> = (0..n).map(|_| Vec::new()).collect();
    for (i, r) in records.into_iter().enumerate() {
        parts[i % n].push(r);
    }
    parts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Scalar;

    fn rows(n: i64) -> Vec<Record> {
        (0..n).map(|i| Record::new().with("i", Scalar::I64(i))).collect()
    }

    #[test]
    fn parallelize_then_gather_preserves_rows() {
        let mut c = ChannelInstance::new(ChannelId::new(0), ChannelDescriptor::Collection, TaskId::new(0));
        c.accept_records(rows(5));
        let p = c.convert(&CONVERSIONS[2], ChannelId::new(1), 2).unwrap();
        assert_eq!(p.descriptor(), ChannelDescriptor::Partitioned);
        assert_eq!(p.cardinality(), 5);
        let g = p.convert(&CONVERSIONS[3], ChannelId::new(2), 2).unwrap();
        assert_eq!(g.into_records().unwrap().len(), 5);
    }

    #[test]
    fn reading_unproduced_instance_fails() {
        let c = ChannelInstance::new(ChannelId::new(3), ChannelDescriptor::Stream, TaskId::new(1));
        assert!(!c.is_produced());
        assert!(c.into_records().is_err());
    }

    #[test]
    fn conversion_must_match_source_descriptor() {
        let mut c = ChannelInstance::new(ChannelId::new(0), ChannelDescriptor::Stream, TaskId::new(0));
        c.accept_records(rows(1));
        assert!(c.convert(&CONVERSIONS[2], ChannelId::new(1), 2).is_err());
    }
}
