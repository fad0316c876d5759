//! Property-based tests for subgroup resolution
//!
//! Key invariants:
//! - A resolved call keeps the requested type at its boundary
//! - Failures for a supported op are always recoverable
//! - Resolution is deterministic for a given capability set
//! - Repeating a request never grows the registry
//! - Every registered block can be emitted
//! - Without a numeric convert the compute type has the caller's total bits

use oclu_subgroup::codegen::PatchRegistry;
use oclu_subgroup::codegen::subgroup::{Backend, Capabilities, ReduceOp, ShuffleOp, SubgroupProvider};
use oclu_subgroup::types::{ElemKind, VALID_BITS, VALID_LANES, VecType};
use proptest::prelude::*;

const TOKENS: [&str; 11] = [
    "sg_khr",
    "sg_khrexttype",
    "sg_khrshuf",
    "sg_khrshufrel",
    "sg_khrballot",
    "sg_intel",
    "sg_intel8",
    "sg_intel16",
    "sg_intel64",
    "fp16",
    "fp64",
];

fn vec_type() -> impl Strategy<Value = VecType> {
    (
        prop_oneof![Just(ElemKind::Unsigned), Just(ElemKind::Signed), Just(ElemKind::Float)],
        prop::sample::select(VALID_BITS.to_vec()),
        prop::sample::select(VALID_LANES.to_vec()),
    )
        .prop_map(|(kind, bits, lanes)| VecType::new(kind, bits, lanes))
        .prop_filter("valid vector type", |v| v.is_valid())
}

fn backend() -> impl Strategy<Value = Backend> {
    prop_oneof![
        Just(Backend::Khr),
        any::<bool>().prop_map(|beignet_fix| Backend::Intel { beignet_fix }),
        Just(Backend::Local),
        prop::sample::select(vec![30u32, 61, 75, 86]).prop_map(|sm_version| Backend::Ptx { sm_version }),
    ]
}

fn caps() -> impl Strategy<Value = String> {
    prop::sample::subsequence(TOKENS.to_vec(), 0..=TOKENS.len()).prop_map(|tokens| tokens.join(","))
}

fn provider(args: &str, backend: Backend) -> SubgroupProvider {
    let mut caps = Capabilities::default();
    caps.apply_args(args);
    let mut provider = SubgroupProvider::with_backend(caps, backend);
    provider.begin("prop_kernel");
    provider
}

fn registry_text(reg: &PatchRegistry) -> String {
    let mut out = String::new();
    reg.write_all(&mut out).expect("emittable");
    out
}

proptest! {
    /// Shuffles keep the caller's type and fail only recoverably.
    #[test]
    fn shuffle_preserves_original_type(
        args in caps(),
        backend in backend(),
        vtype in vec_type(),
        op in prop::sample::select(ShuffleOp::ALL.to_vec()),
    ) {
        let mut p = provider(&args, backend);
        let mut reg = PatchRegistry::new();
        match p.resolve_shuffle(&mut reg, vtype, op, false) {
            Ok(res) => {
                prop_assert_eq!(res.triple().original, vtype);
                prop_assert!(res.compute().is_valid());
                prop_assert!(res.depends.iter().all(|d| reg.contains(d)));
            }
            Err(err) => prop_assert!(err.is_recoverable(), "{}", err),
        }
        prop_assert!(reg.emission_order().is_ok());
    }

    /// Reduces keep the caller's type and fail only recoverably.
    #[test]
    fn reduce_preserves_original_type(
        args in caps(),
        backend in backend(),
        vtype in vec_type(),
        op in prop::sample::select(ReduceOp::ALL.to_vec()),
    ) {
        let mut p = provider(&args, backend);
        let mut reg = PatchRegistry::new();
        match p.resolve_reduce(&mut reg, op, vtype) {
            Ok(res) => {
                prop_assert_eq!(res.triple().original, vtype);
                prop_assert!(res.depends.iter().all(|d| reg.contains(d)));
            }
            Err(err) => prop_assert!(err.is_recoverable(), "{}", err),
        }
        prop_assert!(reg.emission_order().is_ok());
    }

    /// A pure reinterpretation never changes the total bit count.
    #[test]
    fn reinterpret_preserves_total_bits(
        args in caps(),
        backend in backend(),
        vtype in vec_type(),
        shuffle in prop::sample::select(ShuffleOp::ALL.to_vec()),
        reduce in prop::sample::select(ReduceOp::ALL.to_vec()),
    ) {
        let mut p = provider(&args, backend);
        let mut reg = PatchRegistry::new();
        let results = [
            p.resolve_shuffle(&mut reg, vtype, shuffle, false),
            p.resolve_reduce(&mut reg, reduce, vtype),
        ];
        for res in results.into_iter().flatten() {
            let triple = *res.triple();
            if triple.intermediate == triple.original {
                prop_assert_eq!(triple.compute.total_bits(), triple.original.total_bits());
            }
        }
    }

    /// Two fresh providers agree on every call and every block.
    #[test]
    fn resolution_is_deterministic(
        args in caps(),
        backend in backend(),
        vtype in vec_type(),
        op in prop::sample::select(ReduceOp::ALL.to_vec()),
    ) {
        let mut outputs = Vec::new();
        for _ in 0..2 {
            let mut p = provider(&args, backend);
            let mut reg = PatchRegistry::new();
            let shuffle = p.resolve_broadcast(&mut reg, vtype).map(|r| r.call_text("x", Some("i")));
            let reduce = p.resolve_reduce(&mut reg, op, vtype).map(|r| r.call_text("x", None));
            outputs.push((
                shuffle.map_err(|e| e.to_string()),
                reduce.map_err(|e| e.to_string()),
                registry_text(&reg),
            ));
        }
        prop_assert_eq!(&outputs[0], &outputs[1]);
    }

    /// Asking again returns the same call without new blocks.
    #[test]
    fn repeated_requests_are_idempotent(
        args in caps(),
        backend in backend(),
        vtype in vec_type(),
    ) {
        let mut p = provider(&args, backend);
        let mut reg = PatchRegistry::new();
        let first = p.resolve_shuffle_xor(&mut reg, vtype).ok();
        let blocks = reg.len();
        let second = p.resolve_shuffle_xor(&mut reg, vtype).ok();
        prop_assert_eq!(first, second);
        prop_assert_eq!(reg.len(), blocks);
    }
}
