//! Integration tests for the subgroup kernel extension
//!
//! Tests for:
//! - Kernel instance lifecycle through CompilationContext
//! - Extension pragmas and kernel attributes
//! - Local mimic workgroup checks and scratch memory
//! - Argument and meta validation
//! - Program-wide warning deduplication

use std::rc::Rc;

use oclu_subgroup::codegen::subgroup::SubgroupAttributes;
use oclu_subgroup::codegen::{CompilationContext, MetaArg};
use oclu_subgroup::{DeviceProfile, DeviceQuery, SubgroupError, SubgroupExtension, Vendor};
use pretty_assertions::assert_eq;

fn context(device: DeviceProfile, mimic: &str, args: &str) -> CompilationContext {
    let device: Rc<dyn DeviceQuery> = Rc::new(device);
    let ext = SubgroupExtension::new(device.clone(), &SubgroupAttributes::new(mimic, args));
    CompilationContext::new(device).with_extension(Box::new(ext))
}

fn khr_device() -> DeviceProfile {
    DeviceProfile::new("rx", Vendor::Amd).with_extensions(["cl_khr_subgroups"])
}

fn replace(ctx: &mut CompilationContext, func: &str, args: &[&str]) -> String {
    ctx.replace_func(func, args)
        .expect("resolves")
        .expect("claimed by the subgroup extension")
        .text
}

// ==================== KHR ====================

#[test]
fn test_khr_broadcast_enables_pragma() {
    let mut ctx = context(khr_device(), "none", "");
    ctx.begin_kernel("k", [64, 1, 1]).unwrap();
    let text = replace(&mut ctx, "oclu.SubgroupBroadcast", &["u32", "v", "0"]);
    assert_eq!(text, "sub_group_broadcast(v, 0)");
    ctx.finish_kernel().unwrap();

    let prelude = ctx.program_prelude().unwrap();
    assert_eq!(prelude, "#pragma OPENCL EXTENSION cl_khr_subgroups : enable\n\n");
}

#[test]
fn test_xcomp_prefix_accepted() {
    let mut ctx = context(khr_device(), "none", "");
    ctx.begin_kernel("k", [64, 1, 1]).unwrap();
    assert_eq!(replace(&mut ctx, "xcomp.GetSubgroupSize", &[]), "get_sub_group_size()");
    assert_eq!(replace(&mut ctx, "oclu.SubgroupAny", &["flag"]), "sub_group_any(flag)");
}

#[test]
fn test_foreign_function_not_claimed() {
    let mut ctx = context(khr_device(), "none", "");
    ctx.begin_kernel("k", [64, 1, 1]).unwrap();
    assert_eq!(ctx.replace_func("oclu.Barrier", &[]).unwrap(), None);
    assert_eq!(ctx.replace_func("oclu.SubgroupTeleport", &["u32", "x"]).unwrap(), None);
}

#[test]
fn test_double_enables_fp64() {
    let device = khr_device().with_fp(false, true);
    let mut ctx = context(device, "none", "");
    ctx.begin_kernel("k", [64, 1, 1]).unwrap();
    replace(&mut ctx, "oclu.SubgroupBroadcast", &["f64", "v", "0"]);
    ctx.finish_kernel().unwrap();

    let exts: Vec<&str> = ctx.host().enabled_extensions().collect();
    assert_eq!(exts, vec!["cl_khr_subgroups", "cl_khr_fp64"]);
}

// ==================== Intel ====================

#[test]
fn test_intel_required_size_attribute() {
    let device = DeviceProfile::new("uhd", Vendor::Intel)
        .with_extensions(["cl_intel_subgroups", "cl_intel_required_subgroup_size"]);
    let mut ctx = context(device, "auto", "");
    ctx.begin_kernel("k", [128, 1, 1]).unwrap();
    assert!(ctx.apply_meta("oclu.SubgroupSize", &[MetaArg::Int(16)]).unwrap());
    assert_eq!(replace(&mut ctx, "oclu.GetSubgroupLocalId", &[]), "get_sub_group_local_id()");
    let kernel = ctx.finish_kernel().unwrap();

    assert_eq!(
        kernel.attributes.get("reqd_sub_group_size").map(String::as_str),
        Some("__attribute__((intel_reqd_sub_group_size(16)))")
    );
    let exts: Vec<&str> = ctx.host().enabled_extensions().collect();
    assert_eq!(exts, vec!["cl_intel_subgroups", "cl_intel_required_subgroup_size"]);
}

// ==================== Local mimic ====================

#[test]
fn test_local_requires_workgroup_size() {
    let mut ctx = context(DeviceProfile::new("mali", Vendor::Arm), "auto", "");
    ctx.begin_kernel("blur", [0, 0, 0]).unwrap();
    replace(&mut ctx, "oclu.SubgroupShuffle", &["u32", "v", "i"]);
    let err = ctx.finish_kernel().unwrap_err();

    assert!(matches!(err, SubgroupError::InvariantViolation { .. }));
    assert!(err.to_string().contains("blur"));
}

#[test]
fn test_local_rejects_multiple_subgroups() {
    let mut ctx = context(DeviceProfile::new("mali", Vendor::Arm), "local", "");
    ctx.begin_kernel("blur", [64, 1, 1]).unwrap();
    ctx.apply_meta("oclu.SubgroupSize", &[MetaArg::Int(32)]).unwrap();
    replace(&mut ctx, "oclu.SubgroupBroadcast", &["u32", "v", "0"]);
    let err = ctx.finish_kernel().unwrap_err();

    assert!(matches!(err, SubgroupError::InvariantViolation { .. }));
    assert!(err.to_string().contains("subgroup[32]"));
}

#[test]
fn test_local_scratch_and_size_define() {
    let mut ctx = context(DeviceProfile::new("mali", Vendor::Arm), "local", "");
    ctx.begin_kernel("blur", [8, 4, 1]).unwrap();
    let text = replace(&mut ctx, "oclu.SubgroupShuffle", &["u32", "v", "i"]);
    assert_eq!(text, "oclu_subgroup_shuffle_local_u32(_oclu_subgroup_local, v, i)");
    assert_eq!(replace(&mut ctx, "oclu.GetMaxSubgroupSize", &[]), "_oclu_local_sgsize_blur");
    let kernel = ctx.finish_kernel().unwrap();

    assert_eq!(
        kernel.body_prefixes.get("oclu_subgroup_mimic_local_slm").map(String::as_str),
        Some("    local ulong _oclu_subgroup_local[32];")
    );
    let prelude = ctx.program_prelude().unwrap();
    assert!(prelude.contains("#define _oclu_local_sgsize_blur 32"));
    assert!(prelude.contains("// patched block [oclu_subgroup_shuffle_local_u32]"));
}

#[test]
fn test_local_queries_without_scratch() {
    let mut ctx = context(DeviceProfile::new("mali", Vendor::Arm), "local", "");
    ctx.begin_kernel("k", [0, 0, 0]).unwrap();
    assert_eq!(replace(&mut ctx, "oclu.GetSubgroupCount", &[]), "(/*local mimic SubgroupCount*/ 1)");
    assert_eq!(replace(&mut ctx, "oclu.GetSubgroupSize", &[]), "oclu_subgroup_local_get_size()");
    let kernel = ctx.finish_kernel().unwrap();
    assert!(kernel.body_prefixes.is_empty());
}

// ==================== Validation ====================

#[test]
fn test_wrong_arg_count() {
    let mut ctx = context(khr_device(), "none", "");
    ctx.begin_kernel("k", [64, 1, 1]).unwrap();
    let err = ctx.replace_func("oclu.SubgroupBroadcast", &["u32", "v"]).unwrap_err();
    let SubgroupError::ArgCount { expected, found, .. } = err else {
        panic!("expected arg count error");
    };
    assert_eq!((expected, found), (3, 2));
}

#[test]
fn test_bad_vector_type() {
    let mut ctx = context(khr_device(), "none", "");
    ctx.begin_kernel("k", [64, 1, 1]).unwrap();
    let err = ctx.replace_func("oclu.SubgroupSum", &["u7v3", "v"]).unwrap_err();
    assert!(matches!(err, SubgroupError::InvalidVecType { .. }));
    assert!(!err.is_recoverable());
}

#[test]
fn test_invalid_subgroup_size_meta() {
    let mut ctx = context(khr_device(), "none", "");
    ctx.begin_kernel("k", [64, 1, 1]).unwrap();
    for args in [vec![], vec![MetaArg::Int(0)], vec![MetaArg::Str("wide".to_string())]] {
        let err = ctx.apply_meta("oclu.SubgroupSize", &args).unwrap_err();
        assert!(matches!(err, SubgroupError::InvalidMeta { .. }));
    }
    assert!(ctx.apply_meta("oclu.SubgroupSize", &[MetaArg::Str("16".to_string())]).unwrap());
    assert!(!ctx.apply_meta("oclu.Unroll", &[MetaArg::Int(4)]).unwrap());
}

#[test]
fn test_unsupported_is_recoverable() {
    let mut ctx = context(DeviceProfile::new("cpu", Vendor::Other), "none", "");
    ctx.begin_kernel("k", [64, 1, 1]).unwrap();
    let err = ctx.replace_func("oclu.SubgroupBroadcast", &["u32", "v", "0"]).unwrap_err();
    assert!(err.is_recoverable());
    ctx.finish_kernel().unwrap();
    assert_eq!(ctx.host().enabled_extensions().count(), 0);
}

// ==================== Instances ====================

#[test]
fn test_subgroup_ext_meta_switches_backend() {
    let mut ctx = context(khr_device(), "local", "");
    ctx.begin_kernel("k", [32, 1, 1]).unwrap();
    assert_eq!(replace(&mut ctx, "oclu.GetSubgroupId", &[]), "get_sub_group_id()");
    assert!(
        ctx.apply_meta(
            "oclu.SubgroupExt",
            &[MetaArg::Str("local".to_string()), MetaArg::Str("-sg_khr".to_string())]
        )
        .unwrap()
    );
    assert_eq!(replace(&mut ctx, "oclu.GetSubgroupId", &[]), "(/*local mimic SubgroupId*/ 0)");
    ctx.finish_kernel().unwrap();
}

#[test]
fn test_warnings_logged_once_per_program() {
    let mut ctx = context(khr_device(), "none", "");
    let mut logged = Vec::new();
    for name in ["first", "second"] {
        ctx.begin_kernel(name, [64, 1, 1]).unwrap();
        let err = ctx.replace_func("oclu.SubgroupSum", &["f16", "v"]).unwrap_err();
        assert!(err.is_recoverable());
        logged.push(ctx.finish_kernel().unwrap().warnings);
    }
    assert_eq!(
        logged,
        vec![
            vec!["Potential use of unsupported type[f16] with [SubgroupReduce].".to_string()],
            Vec::new(),
        ]
    );
}

#[test]
fn test_blocks_shared_across_kernels() {
    let mut ctx = context(khr_device(), "none", "");
    for name in ["first", "second"] {
        ctx.begin_kernel(name, [64, 1, 1]).unwrap();
        replace(&mut ctx, "oclu.SubgroupBroadcast", &["u8v4", "v", "0"]);
        ctx.finish_kernel().unwrap();
    }
    let blocks: Vec<&str> = ctx.host().patch_registry().names().collect();
    assert_eq!(blocks, vec!["oclu_subgroup_broadcast_khr_u32"]);
}
