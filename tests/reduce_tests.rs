//! Integration tests for reduce resolution
//!
//! Tests for:
//! - Native reduce, native scalar loop and shuffle-xor tree tiers
//! - Arithmetic widening and bitwise repacking candidates
//! - Shared helpers across call sites

use oclu_subgroup::codegen::PatchRegistry;
use oclu_subgroup::codegen::subgroup::{Backend, Capabilities, ReduceOp, SubgroupProvider, Tier};
use oclu_subgroup::types::VecType;
use pretty_assertions::assert_eq;

fn provider(args: &str, backend: Backend) -> SubgroupProvider {
    let mut caps = Capabilities::default();
    caps.apply_args(args);
    let mut provider = SubgroupProvider::with_backend(caps, backend);
    provider.begin("reduce_kernel");
    provider
}

fn vt(text: &str) -> VecType {
    text.parse().expect("valid vector type")
}

fn emitted(reg: &PatchRegistry) -> Vec<String> {
    reg.emission_order()
        .expect("acyclic")
        .into_iter()
        .filter_map(|id| reg.block(id).map(|b| b.name.clone()))
        .collect()
}

// ==================== Native ====================

#[test]
fn test_khr_scalar_builtin() {
    let mut p = provider("sg_khr", Backend::Khr);
    let mut reg = PatchRegistry::new();
    let res = p.resolve_reduce(&mut reg, ReduceOp::Max, vt("f32")).unwrap();

    assert_eq!(res.call_text("x", None), "sub_group_reduce_max(x)");
    assert_eq!(res.tier, Tier::Exact);
    assert!(p.flags().khr_basic);
    assert!(reg.is_empty());
}

#[test]
fn test_shared_vector_helper_registered_once() {
    let mut p = provider("sg_khr", Backend::Khr);
    let mut reg = PatchRegistry::new();
    let first = p.resolve_reduce(&mut reg, ReduceOp::Sum, vt("i32v4")).unwrap();
    let second = p.resolve_reduce(&mut reg, ReduceOp::Sum, vt("i32v4")).unwrap();

    assert_eq!(first.func_name(), "oclu_subgroup_reduce_sum_khr_i32v4");
    assert_eq!(first.func_name(), second.func_name());
    assert_eq!(first.tier, Tier::ScalarLoop);
    assert_eq!(reg.len(), 1);
    let block = reg.get("oclu_subgroup_reduce_sum_khr_i32v4").unwrap();
    assert!(block.text.contains("ret.s3 = sub_group_reduce_add(val.s3);"));
}

#[test]
fn test_intel_short_promotes_to_int() {
    let mut p = provider("sg_intel", Backend::Intel { beignet_fix: false });
    let mut reg = PatchRegistry::new();
    let res = p.resolve_reduce(&mut reg, ReduceOp::Sum, vt("i16v4")).unwrap();

    insta::assert_snapshot!(res.call_text("x", None), @"convert_short4(oclu_subgroup_reduce_sum_intel_i32v4(convert_int4(x)))");
    assert!(reg.contains("oclu_subgroup_reduce_sum_intel_i32v4"));
    assert!(!reg.contains("oclu_subgroup_reduce_sum_intel_i16v4"));
    assert!(p.flags().intel);
    assert!(!p.flags().intel16);
}

#[test]
fn test_khr_narrow_int_with_ext_type() {
    let mut p = provider("sg_khr,sg_khrexttype", Backend::Khr);
    let mut reg = PatchRegistry::new();
    let res = p.resolve_reduce(&mut reg, ReduceOp::Min, vt("i8")).unwrap();

    assert_eq!(res.call_text("x", None), "sub_group_reduce_min(x)");
    assert!(p.flags().khr_ext_type);
}

// ==================== PTX ====================

#[test]
fn test_ptx_redux_repacks_bytes() {
    let mut p = provider("", Backend::Ptx { sm_version: 86 });
    let mut reg = PatchRegistry::new();
    let res = p.resolve_reduce(&mut reg, ReduceOp::Or, vt("u8v4")).unwrap();

    assert_eq!(
        res.call_text("x", None),
        "as_uchar4(oclu_subgroup_reduce_or_ptx_redux_u32(as_uint(x)))"
    );
    let block = reg.get("oclu_subgroup_reduce_or_ptx_redux_u32").unwrap();
    assert!(block.text.contains("redux.sync.or.b32 %0, %1, 0xffffffff;"));
}

#[test]
fn test_ptx_float_sum_uses_butterfly() {
    let mut p = provider("", Backend::Ptx { sm_version: 75 });
    let mut reg = PatchRegistry::new();
    let res = p.resolve_reduce(&mut reg, ReduceOp::Sum, vt("f32")).unwrap();

    assert_eq!(res.call_text("x", None), "oclu_subgroup_reduce_sum_ptx_shfl_f32(x)");
    let block = reg.get("oclu_subgroup_reduce_sum_ptx_shfl_f32").unwrap();
    assert!(block.text.contains("x = x + tmp;"));
}

// ==================== Tree ====================

#[test]
fn test_khr_bitwise_falls_back_to_tree() {
    let mut p = provider("sg_khr,sg_khrshuf", Backend::Khr);
    let mut reg = PatchRegistry::new();
    let res = p.resolve_reduce(&mut reg, ReduceOp::And, vt("u32")).unwrap();

    assert_eq!(res.call_text("x", None), "oclu_subgroup_reduce_and_tree_u32(x)");
    assert_eq!(res.tier, Tier::Tree);
    let block = reg.get("oclu_subgroup_reduce_and_tree_u32").unwrap();
    assert!(block.text.contains("for (uint mask = get_sub_group_size() / 2; mask > 0; mask /= 2)"));
    assert!(block.text.contains("const uint tmp = sub_group_shuffle_xor(x, mask);"));
    assert!(block.text.contains("x = x & tmp;"));
    assert!(p.flags().khr_shuffle);
}

#[test]
fn test_local_tree_on_vector() {
    let mut p = provider("", Backend::Local);
    let mut reg = PatchRegistry::new();
    let res = p.resolve_reduce(&mut reg, ReduceOp::Xor, vt("u32v2")).unwrap();

    assert_eq!(
        res.call_text("x", None),
        "oclu_subgroup_reduce_xor_tree_u32v2(_oclu_subgroup_local, x)"
    );
    let order = emitted(&reg);
    let pos = |name: &str| order.iter().position(|n| n == name).unwrap();
    assert!(pos("oclu_subgroup_shuffle_xor_local_u32") < pos("oclu_subgroup_reduce_xor_tree_u32"));
    assert!(pos("oclu_subgroup_local_get_size") < pos("oclu_subgroup_reduce_xor_tree_u32"));
    assert!(pos("oclu_subgroup_reduce_xor_tree_u32") < pos("oclu_subgroup_reduce_xor_tree_u32v2"));
    let tree = reg.get("oclu_subgroup_reduce_xor_tree_u32").unwrap();
    assert!(tree.text.contains("oclu_subgroup_local_get_size() / 2"));
}

// ==================== Failures ====================

#[test]
fn test_half_without_fp16_warns() {
    let mut p = provider("sg_khr", Backend::Khr);
    let mut reg = PatchRegistry::new();
    let err = p.resolve_reduce(&mut reg, ReduceOp::Sum, vt("f16")).unwrap_err();

    assert!(err.is_recoverable());
    assert_eq!(
        p.pending_warnings().to_vec(),
        vec!["Potential use of unsupported type[f16] with [SubgroupReduce].".to_string()]
    );
}

#[test]
fn test_no_capability_is_unsupported() {
    let mut p = provider("", Backend::Khr);
    let mut reg = PatchRegistry::new();
    let err = p.resolve_reduce(&mut reg, ReduceOp::Sum, vt("u32")).unwrap_err();
    assert!(err.is_recoverable());
    assert!(err.to_string().contains("SubgroupSum"));
}
