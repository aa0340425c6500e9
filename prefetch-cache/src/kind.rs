/// Keys the cache by `(datum_kind, block)` (spec.md §4.2). Doubles as the
/// `kind` byte in the versioned binary encoding (spec.md §9, "Cross-process
/// cache coherence").
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DatumKind {
    Neurons,
    SubnetState,
    BlockHash,
    BlockTimestamp,
}

impl DatumKind {
    pub const ALL: [DatumKind; 4] = [
        DatumKind::Neurons,
        DatumKind::SubnetState,
        DatumKind::BlockHash,
        DatumKind::BlockTimestamp,
    ];

    pub fn tag(self) -> u8 {
        match self {
            DatumKind::Neurons => 1,
            DatumKind::SubnetState => 2,
            DatumKind::BlockHash => 3,
            DatumKind::BlockTimestamp => 4,
        }
    }
}
