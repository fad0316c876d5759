//! Algorithm catalogs
//!
//! Each backend describes what its native primitives can do as an ordered
//! list of [`Algorithm`]s: for every lane width, which lane counts work on
//! integer and on float data. Resolution walks the list in order and the
//! first algorithm that fits wins, so registration order is observable.
//!
//! Intel and Local build on the KHR catalog: they run the KHR construction
//! first and append their own entries.

use serde::Serialize;
use std::fmt;
use std::ops::BitOr;

use super::capability::{Capabilities, MimicMode};
use crate::config::DeviceQuery;
use crate::types::{ElemKind, VALID_LANES, VecType};

/// Set of supported lane counts, one bit per entry of [`VALID_LANES`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct LaneSet(u8);

impl LaneSet {
    pub const EMPTY: LaneSet = LaneSet(0);
    pub const ONE: LaneSet = LaneSet(0b1);
    pub const ALL: LaneSet = LaneSet(0b11_1111);

    fn bit(lanes: u8) -> Option<u8> {
        VALID_LANES
            .iter()
            .position(|&l| l == lanes)
            .map(|idx| 1u8 << idx)
    }

    pub fn contains(self, lanes: u8) -> bool {
        Self::bit(lanes).is_some_and(|bit| self.0 & bit != 0)
    }

    pub fn without(self, lanes: u8) -> Self {
        match Self::bit(lanes) {
            Some(bit) => LaneSet(self.0 & !bit),
            None => self,
        }
    }

    pub fn when(self, cond: bool) -> Self {
        if cond { self } else { LaneSet::EMPTY }
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

/// Operation features an algorithm provides
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Features(u8);

impl Features {
    pub const NONE: Features = Features(0);
    pub const BROADCAST: Features = Features(0x1);
    pub const SHUFFLE: Features = Features(0x2);
    pub const SHUFFLE_REL: Features = Features(0x4);
    pub const NON_UNIFORM: Features = Features(0x8);
    pub const BITWISE: Features = Features(0x10);
    pub const ARITH: Features = Features(0x20);

    pub fn contains(self, other: Features) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn when(self, cond: bool) -> Self {
        if cond { self } else { Features::NONE }
    }
}

impl BitOr for Features {
    type Output = Features;

    fn bitor(self, rhs: Features) -> Features {
        Features(self.0 | rhs.0)
    }
}

impl fmt::Display for Features {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const NAMES: [(Features, &str); 6] = [
            (Features::BROADCAST, "broadcast"),
            (Features::SHUFFLE, "shuffle"),
            (Features::SHUFFLE_REL, "shuffle_rel"),
            (Features::NON_UNIFORM, "non_uniform"),
            (Features::BITWISE, "bitwise"),
            (Features::ARITH, "arith"),
        ];
        let names: Vec<_> = NAMES
            .iter()
            .filter(|(feat, _)| self.contains(*feat))
            .map(|(_, name)| *name)
            .collect();
        write!(f, "{}", names.join("|"))
    }
}

/// Lane counts supported at one width
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DTypeSupport {
    pub int: LaneSet,
    pub fp: LaneSet,
}

impl DTypeSupport {
    pub const fn new(int: LaneSet, fp: LaneSet) -> Self {
        Self { int, fp }
    }

    pub fn for_kind(&self, kind: ElemKind) -> LaneSet {
        match kind {
            ElemKind::Float => self.fp,
            ElemKind::Unsigned | ElemKind::Signed => self.int,
        }
    }
}

/// Native primitive families
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum AlgoId {
    KhrBroadcast,
    KhrBroadcastNonUniform,
    KhrShuffle,
    KhrReduce,
    IntelShuffle,
    IntelReduce,
    LocalBroadcast,
    LocalShuffle,
    PtxShuffle,
    PtxRedux,
    PtxShflReduce,
}

impl AlgoId {
    /// Name fragment used in generated helper names
    pub fn tag(self) -> &'static str {
        match self {
            AlgoId::KhrBroadcast | AlgoId::KhrReduce => "khr",
            AlgoId::KhrBroadcastNonUniform => "khr_nu",
            AlgoId::KhrShuffle => "khr_shuf",
            AlgoId::IntelShuffle | AlgoId::IntelReduce => "intel",
            AlgoId::LocalBroadcast | AlgoId::LocalShuffle => "local",
            AlgoId::PtxShuffle => "ptx",
            AlgoId::PtxRedux => "ptx_redux",
            AlgoId::PtxShflReduce => "ptx_shfl",
        }
    }
}

/// One catalog entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Algorithm {
    pub id: AlgoId,
    pub features: Features,
    pub bit64: DTypeSupport,
    pub bit32: DTypeSupport,
    pub bit16: DTypeSupport,
    pub bit8: DTypeSupport,
}

impl Algorithm {
    pub fn new(id: AlgoId, features: Features) -> Self {
        Self {
            id,
            features,
            bit64: DTypeSupport::default(),
            bit32: DTypeSupport::default(),
            bit16: DTypeSupport::default(),
            bit8: DTypeSupport::default(),
        }
    }

    fn bits(mut self, bits: u8, int: LaneSet, fp: LaneSet) -> Self {
        let support = DTypeSupport::new(int, fp);
        match bits {
            64 => self.bit64 = support,
            32 => self.bit32 = support,
            16 => self.bit16 = support,
            8 => self.bit8 = support,
            _ => {}
        }
        self
    }

    pub fn support(&self, bits: u8) -> Option<&DTypeSupport> {
        match bits {
            64 => Some(&self.bit64),
            32 => Some(&self.bit32),
            16 => Some(&self.bit16),
            8 => Some(&self.bit8),
            _ => None,
        }
    }

    /// Whether `vtype` is natively handled, lane count included
    pub fn supports(&self, vtype: VecType) -> bool {
        self.support(vtype.bits)
            .is_some_and(|s| s.for_kind(vtype.kind).contains(vtype.lanes))
    }
}

/// Code generation backend, fixed per provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Backend {
    Khr,
    Intel { beignet_fix: bool },
    Local,
    Ptx { sm_version: u32 },
}

impl Backend {
    /// Intel wins when available, then the mimic choice, then plain KHR
    pub fn select(caps: &Capabilities, mimic: MimicMode, device: &dyn DeviceQuery) -> Self {
        let mimic = mimic.resolve(device.vendor());
        if caps.intel {
            return Backend::Intel {
                beignet_fix: device.beignet_fix(),
            };
        }
        match mimic {
            MimicMode::Ptx => {
                let sm_version = device
                    .compute_capability()
                    .map_or(0, |(major, minor)| major * 10 + minor);
                if sm_version == 0 {
                    tracing::warn!("Trying to use PtxSubgroup on non-NV platform.");
                } else if sm_version < 30 {
                    tracing::warn!(
                        "Trying to use PtxSubgroup on sm{}, shuf is introduced since sm30.",
                        sm_version
                    );
                }
                Backend::Ptx { sm_version }
            }
            MimicMode::Local => Backend::Local,
            MimicMode::Auto | MimicMode::None => Backend::Khr,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Backend::Khr => "khr",
            Backend::Intel { .. } => "intel",
            Backend::Local => "local",
            Backend::Ptx { .. } => "ptx",
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Backend::Ptx { sm_version } => write!(f, "ptx(sm{})", sm_version),
            Backend::Intel { beignet_fix: true } => write!(f, "intel(beignet)"),
            other => write!(f, "{}", other.name()),
        }
    }
}

/// Shuffle and reduce algorithms of one backend, in priority order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AlgorithmCatalog {
    pub shuffle: Vec<Algorithm>,
    pub reduce: Vec<Algorithm>,
}

impl AlgorithmCatalog {
    pub fn for_backend(backend: Backend, caps: &Capabilities) -> Self {
        let mut catalog = AlgorithmCatalog::default();
        match backend {
            Backend::Khr => catalog.append_khr(caps),
            Backend::Intel { beignet_fix } => {
                catalog.append_khr(caps);
                catalog.append_intel(caps, beignet_fix);
            }
            Backend::Local => {
                catalog.append_khr(caps);
                catalog.append_local();
            }
            Backend::Ptx { sm_version } => catalog.append_ptx(caps, sm_version),
        }
        catalog
    }

    fn append_khr(&mut self, caps: &Capabilities) {
        let basic = if caps.khr_ext_type { LaneSet::ALL } else { LaneSet::ONE };
        let ext = LaneSet::ALL.when(caps.khr_ext_type);
        if caps.khr {
            self.shuffle.push(
                Algorithm::new(AlgoId::KhrBroadcast, Features::BROADCAST)
                    .bits(64, basic, basic.when(caps.fp64))
                    .bits(32, basic, basic)
                    .bits(16, ext, basic.when(caps.fp16))
                    .bits(8, ext, LaneSet::EMPTY),
            );
        }
        if caps.khr_ballot {
            let all = LaneSet::ALL;
            self.shuffle.push(
                Algorithm::new(
                    AlgoId::KhrBroadcastNonUniform,
                    Features::BROADCAST | Features::NON_UNIFORM,
                )
                .bits(64, all, all.when(caps.fp64))
                .bits(32, all, all)
                .bits(16, all, all.when(caps.fp16))
                .bits(8, all, LaneSet::EMPTY),
            );
        }
        if caps.khr_shuffle {
            let one = LaneSet::ONE;
            let features = Features::BROADCAST
                | Features::SHUFFLE
                | Features::NON_UNIFORM
                | Features::SHUFFLE_REL.when(caps.khr_shuffle_rel);
            self.shuffle.push(
                Algorithm::new(AlgoId::KhrShuffle, features)
                    .bits(64, one, one.when(caps.fp64))
                    .bits(32, one, one)
                    .bits(16, one, one.when(caps.fp16))
                    .bits(8, one, LaneSet::EMPTY),
            );
        }
        if caps.khr {
            let one = LaneSet::ONE;
            let narrow = one.when(caps.khr_ext_type);
            self.reduce.push(
                Algorithm::new(AlgoId::KhrReduce, Features::ARITH)
                    .bits(64, one, one.when(caps.fp64))
                    .bits(32, one, one)
                    .bits(16, narrow, one.when(caps.fp16))
                    .bits(8, narrow, LaneSet::EMPTY),
            );
        }
    }

    fn append_intel(&mut self, caps: &Capabilities, beignet_fix: bool) {
        if !caps.intel {
            return;
        }
        let one = LaneSet::ONE;
        let int16 = match (caps.intel16, beignet_fix) {
            (false, _) => LaneSet::EMPTY,
            (true, true) => one,
            (true, false) => LaneSet::ALL,
        };
        // No SHUFFLE_REL: intel_sub_group_shuffle_down/up take (cur, next, delta)
        self.shuffle.push(
            Algorithm::new(
                AlgoId::IntelShuffle,
                Features::BROADCAST | Features::SHUFFLE | Features::NON_UNIFORM,
            )
            .bits(64, one, one.when(caps.fp64))
            .bits(32, LaneSet::ALL, LaneSet::ALL)
            .bits(16, int16, one.when(caps.fp16))
            .bits(8, LaneSet::ALL.without(3).when(caps.intel8), LaneSet::EMPTY),
        );
        self.reduce.push(
            Algorithm::new(AlgoId::IntelReduce, Features::ARITH)
                .bits(64, one, one.when(caps.fp64))
                .bits(32, one, one)
                .bits(16, one.when(caps.intel16), one.when(caps.fp16))
                .bits(8, one.when(caps.intel8), LaneSet::EMPTY),
        );
    }

    fn append_local(&mut self) {
        let all = LaneSet::ALL;
        let empty = LaneSet::EMPTY;
        for (id, features) in [
            (AlgoId::LocalBroadcast, Features::BROADCAST),
            (AlgoId::LocalShuffle, Features::BROADCAST | Features::SHUFFLE),
        ] {
            self.shuffle.push(
                Algorithm::new(id, features)
                    .bits(64, all, empty)
                    .bits(32, all, empty)
                    .bits(16, all, empty)
                    .bits(8, all, empty),
            );
        }
    }

    fn append_ptx(&mut self, caps: &Capabilities, sm_version: u32) {
        let one = LaneSet::ONE;
        self.shuffle.push(
            Algorithm::new(
                AlgoId::PtxShuffle,
                Features::BROADCAST | Features::SHUFFLE | Features::NON_UNIFORM,
            )
            .bits(64, one, LaneSet::EMPTY)
            .bits(32, one, LaneSet::EMPTY),
        );
        if sm_version >= 80 {
            self.reduce.push(
                Algorithm::new(AlgoId::PtxRedux, Features::ARITH | Features::BITWISE)
                    .bits(32, one, LaneSet::EMPTY),
            );
        }
        self.reduce.push(
            Algorithm::new(AlgoId::PtxShflReduce, Features::ARITH | Features::BITWISE)
                .bits(64, one, one.when(caps.fp64))
                .bits(32, one, one),
        );
    }
}
