//! Input contract of the snapshot writers.
//!
//! Writers consume a [`Snapshot`]: ordered local records plus the local
//! length and the global count. The binary writer chooses the id width, the
//! tagged writer selects fields with a string over `ixvf12`.

use bytemuck::{Pod, Zeroable};
use glam::DVec3;
use serde::{Deserialize, Serialize};

use crate::comm::Communicator;
use crate::error::{Error, Result};
use crate::particle::{Group, ParticleEnsemble};

/// One particle as handed to a writer, viewable as raw bytes.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable, Serialize, Deserialize)]
pub struct ParticleRecord {
    pub id: u64,
    pub position: [f64; 3],
    pub velocity: [f64; 3],
    pub displacement1: [f64; 3],
    pub displacement2: [f64; 3],
    /// Zero when no force has been computed.
    pub force: [f64; 3],
    /// Group index, `-1` for ungrouped.
    pub group: i64,
}

impl ParticleRecord {
    pub fn group(&self) -> Group {
        u32::try_from(self.group).map_or(Group::Ungrouped, Group::Member)
    }
}

#[derive(Clone, Debug)]
pub struct Snapshot {
    pub records: Vec<ParticleRecord>,
    pub local_len: usize,
    /// As cached by the last total-count update.
    pub total_count: u64,
    pub has_forces: bool,
}

impl ParticleEnsemble {
    pub fn snapshot(&self) -> Snapshot {
        let records = self
            .particles
            .iter()
            .zip(&self.force)
            .zip(&self.groups)
            .map(|((p, f), g)| ParticleRecord {
                id: p.id,
                position: p.position.to_array(),
                velocity: p.velocity.to_array(),
                displacement1: p.displacement1.to_array(),
                displacement2: p.displacement2.to_array(),
                force: if self.has_forces() {
                    f.to_array()
                } else {
                    [0.0; 3]
                },
                group: match g {
                    Group::Ungrouped => -1,
                    Group::Member(i) => i64::from(*i),
                },
            })
            .collect();

        Snapshot {
            records,
            local_len: self.len(),
            total_count: self.total_count(),
            has_forces: self.has_forces(),
        }
    }
}

/// Collective: rank 0 receives every node's records in rank order, others `None`.
pub fn gather_to_root(comm: &Communicator, ensemble: &ParticleEnsemble) -> Result<Option<Vec<ParticleRecord>>> {
    let gathered = comm.gather_to_root(ensemble.snapshot().records)?;
    Ok(gathered.map(|parts| parts.into_iter().flatten().collect()))
}

/// A column a tagged writer can emit.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Field {
    Id,
    Position,
    Velocity,
    Force,
    Displacement1,
    Displacement2,
}

impl Field {
    /// Canonical order.
    pub const ALL: [Field; 6] = [
        Field::Id,
        Field::Position,
        Field::Velocity,
        Field::Force,
        Field::Displacement1,
        Field::Displacement2,
    ];

    pub fn letter(self) -> char {
        match self {
            Field::Id => 'i',
            Field::Position => 'x',
            Field::Velocity => 'v',
            Field::Force => 'f',
            Field::Displacement1 => '1',
            Field::Displacement2 => '2',
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Field::Id => "id",
            Field::Position => "x",
            Field::Velocity => "v",
            Field::Force => "f",
            Field::Displacement1 => "dx1",
            Field::Displacement2 => "dx2",
        }
    }

    fn from_letter(c: char) -> Option<Self> {
        Self::ALL.into_iter().find(|f| f.letter() == c)
    }

    /// Three columns per record, or `None` for the scalar id.
    pub fn vectors(self, records: &[ParticleRecord]) -> Option<Vec<DVec3>> {
        let column = |pick: fn(&ParticleRecord) -> [f64; 3]| {
            Some(records.iter().map(|r| DVec3::from_array(pick(r))).collect())
        };
        match self {
            Field::Id => None,
            Field::Position => column(|r| r.position),
            Field::Velocity => column(|r| r.velocity),
            Field::Force => column(|r| r.force),
            Field::Displacement1 => column(|r| r.displacement1),
            Field::Displacement2 => column(|r| r.displacement2),
        }
    }
}

/// Non-empty subset of fields in canonical order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FieldSelector {
    fields: Vec<Field>,
}

impl FieldSelector {
    /// Parse a selector such as `"ixv"`; letters must follow `ixvf12` order without repeats.
    pub fn parse(selector: &str) -> Result<Self> {
        if selector.is_empty() {
            return Err(Error::FileFormat("empty field selector".into()));
        }

        let mut fields: Vec<Field> = Vec::new();
        for c in selector.chars() {
            let field = Field::from_letter(c).ok_or_else(|| {
                Error::FileFormat(format!("unknown field '{}' in selector {:?}", c, selector))
            })?;
            if let Some(&last) = fields.last() {
                if rank_of(field) <= rank_of(last) {
                    let what = if fields.contains(&field) {
                        "repeated"
                    } else {
                        "out of order"
                    };
                    return Err(Error::FileFormat(format!(
                        "field '{}' is {} in selector {:?}, expected order ixvf12",
                        c, what, selector
                    )));
                }
            }
            fields.push(field);
        }
        Ok(Self { fields })
    }

    pub fn all() -> Self {
        Self {
            fields: Field::ALL.to_vec(),
        }
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn contains(&self, field: Field) -> bool {
        self.fields.contains(&field)
    }
}

fn rank_of(field: Field) -> usize {
    Field::ALL.iter().position(|&f| f == field).unwrap_or(usize::MAX)
}

/// Id width of the binary writer.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum IdWidth {
    Four,
    #[default]
    Eight,
}

impl IdWidth {
    pub fn bytes(self) -> usize {
        match self {
            IdWidth::Four => 4,
            IdWidth::Eight => 8,
        }
    }

    /// Native-endian id column; fails if an id does not fit the width.
    pub fn encode_ids(self, records: &[ParticleRecord]) -> Result<Vec<u8>> {
        match self {
            IdWidth::Eight => {
                let ids: Vec<u64> = records.iter().map(|r| r.id).collect();
                Ok(bytemuck::cast_slice(&ids).to_vec())
            }
            IdWidth::Four => {
                let ids = records
                    .iter()
                    .map(|r| {
                        u32::try_from(r.id).map_err(|_| {
                            Error::InvalidArgument(format!("id {} does not fit in 4 bytes", r.id))
                        })
                    })
                    .collect::<Result<Vec<u32>>>()?;
                Ok(bytemuck::cast_slice(&ids).to_vec())
            }
        }
    }
}
