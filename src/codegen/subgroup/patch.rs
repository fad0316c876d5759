//! Patched helper recipes
//!
//! A [`PatchRecipe`] holds everything needed to produce one helper function
//! and nothing else; [`PatchRecipe::render`] is pure. The resolver builds a
//! recipe, hands `render` to the registry as the producer, and the registry
//! decides whether it runs.

use std::fmt::Write;

use super::op::{CallSite, ExtraParam, ReduceOp};
use super::ptx::PtxAsm;
use crate::codegen::registry::{BlockId, PatchRegistry};
use crate::types::{VecType, lane_field};

/// Linear local id over all three dimensions
pub const LINEAR_LOCAL_ID: &str = "get_local_id(0) + get_local_id(1) * get_local_size(0) + get_local_id(2) * get_local_size(1) * get_local_size(0)";

/// Barrier-based emulation through a local scratch buffer
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum LocalKind {
    Broadcast,
    Shuffle,
    /// Shuffle to `local_id ^ mask`, built on the plain shuffle helper
    ShuffleXor { shuffle: String, local_id: String },
}

/// Fixed helpers with no type parameter
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Helper {
    LocalSize,
    LocalId,
    /// `#define` carrying a kernel's workgroup size
    SizeDefine { kernel: String, size: u32 },
}

impl Helper {
    pub fn name(&self) -> String {
        match self {
            Helper::LocalSize => "oclu_subgroup_local_get_size".to_string(),
            Helper::LocalId => "oclu_subgroup_local_get_local_id".to_string(),
            Helper::SizeDefine { kernel, .. } => size_define_block(kernel),
        }
    }

    fn render(&self) -> String {
        match self {
            Helper::LocalSize => format!(
                "inline uint {}()\n{{\n    return get_local_size(0) * get_local_size(1) * get_local_size(2);\n}}",
                self.name()
            ),
            Helper::LocalId => format!(
                "inline uint {}()\n{{\n    return {};\n}}",
                self.name(),
                LINEAR_LOCAL_ID
            ),
            Helper::SizeDefine { kernel, size } => {
                format!("#define {} {}", size_define_macro(kernel), size)
            }
        }
    }
}

/// Block holding a kernel's size define
pub fn size_define_block(kernel: &str) -> String {
    format!("oclu_local_sgsize_{}", kernel)
}

/// Macro name of a kernel's size define
pub fn size_define_macro(kernel: &str) -> String {
    format!("_{}", size_define_block(kernel))
}

/// Code shape of one patched helper
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PatchRecipe {
    /// Apply `base` to each lane, optionally reinterpreting lanes as `cast`
    ScalarLoop {
        name: String,
        base: String,
        vtype: VecType,
        cast: VecType,
        extra: Option<ExtraParam>,
        trailing: Option<ExtraParam>,
    },
    /// Apply `base` to both halves, each seen as (bits/2, lanes)
    HiLo {
        name: String,
        base: CallSite,
        vtype: VecType,
        extra: Option<ExtraParam>,
        trailing: Option<ExtraParam>,
    },
    /// Forward to `base` under the repacked type's name
    Repack {
        name: String,
        base: String,
        vtype: VecType,
        extra: Option<ExtraParam>,
        trailing: Option<ExtraParam>,
    },
    /// log2(size) butterfly steps over a resolved shuffle-xor
    TreeReduce {
        name: String,
        op: ReduceOp,
        vtype: VecType,
        xor: CallSite,
        size: String,
        extra: Option<ExtraParam>,
    },
    LocalMimic {
        name: String,
        kind: LocalKind,
        vtype: VecType,
    },
    PtxAsm(PtxAsm),
    Helper(Helper),
}

fn params(extra: &Option<ExtraParam>, main: &str, trailing: &Option<ExtraParam>) -> String {
    let mut list = Vec::with_capacity(3);
    if let Some(extra) = extra {
        list.push(extra.param.as_str());
    }
    list.push(main);
    if let Some(trailing) = trailing {
        list.push(trailing.param.as_str());
    }
    list.join(", ")
}

fn args(extra: &Option<ExtraParam>, main: &str, trailing: &Option<ExtraParam>) -> String {
    let mut list = Vec::with_capacity(3);
    if let Some(extra) = extra {
        list.push(extra.arg.as_str());
    }
    list.push(main);
    if let Some(trailing) = trailing {
        list.push(trailing.arg.as_str());
    }
    list.join(", ")
}

impl PatchRecipe {
    pub fn name(&self) -> String {
        match self {
            PatchRecipe::ScalarLoop { name, .. }
            | PatchRecipe::HiLo { name, .. }
            | PatchRecipe::Repack { name, .. }
            | PatchRecipe::TreeReduce { name, .. }
            | PatchRecipe::LocalMimic { name, .. } => name.clone(),
            PatchRecipe::PtxAsm(asm) => asm.name(),
            PatchRecipe::Helper(helper) => helper.name(),
        }
    }

    /// Register under [`Self::name`], rendering only on first insert
    pub fn register<S: AsRef<str>>(&self, registry: &mut PatchRegistry, deps: &[S]) -> BlockId {
        let name = self.name();
        registry.add_or_get(&name, deps, || self.render()).0
    }

    pub fn render(&self) -> String {
        match self {
            PatchRecipe::ScalarLoop {
                name,
                base,
                vtype,
                cast,
                extra,
                trailing,
            } => render_scalar_loop(name, base, *vtype, *cast, extra, trailing),
            PatchRecipe::HiLo {
                name,
                base,
                vtype,
                extra,
                trailing,
            } => render_hilo(name, base, *vtype, extra, trailing),
            PatchRecipe::Repack {
                name,
                base,
                vtype,
                extra,
                trailing,
            } => {
                let ty = vtype.cl_name();
                format!(
                    "inline {0} {1}({2})\n{{\n    return {3}({4});\n}}",
                    ty,
                    name,
                    params(extra, &format!("const {} val", ty), trailing),
                    base,
                    args(extra, "val", trailing)
                )
            }
            PatchRecipe::TreeReduce {
                name,
                op,
                vtype,
                xor,
                size,
                extra,
            } => {
                let ty = vtype.cl_name();
                let mut out = String::new();
                let _ = writeln!(out, "inline {} {}({})", ty, name, params(extra, &format!("{} x", ty), &None));
                out.push_str("{\n");
                let _ = writeln!(out, "    for (uint mask = {} / 2; mask > 0; mask /= 2)", size);
                out.push_str("    {\n");
                let _ = writeln!(out, "        const {} tmp = {};", ty, xor.render("x", Some("mask")));
                let _ = writeln!(out, "        x = {};", op.combine("x", "tmp"));
                out.push_str("    }\n    return x;\n}");
                out
            }
            PatchRecipe::LocalMimic { name, kind, vtype } => render_local(name, kind, *vtype),
            PatchRecipe::PtxAsm(asm) => asm.render(),
            PatchRecipe::Helper(helper) => helper.render(),
        }
    }
}

fn render_scalar_loop(
    name: &str,
    base: &str,
    vtype: VecType,
    cast: VecType,
    extra: &Option<ExtraParam>,
    trailing: &Option<ExtraParam>,
) -> String {
    let ty = vtype.cl_name();
    let scalar = vtype.scalar();
    let mut out = String::new();
    let _ = writeln!(out, "inline {0} {1}({2})", ty, name, params(extra, &format!("const {} val", ty), trailing));
    let _ = writeln!(out, "{{\n    {} ret;", ty);
    for lane in 0..vtype.lanes {
        let field = lane_field(lane);
        if scalar == cast {
            let _ = writeln!(out, "    ret.s{} = {}({});", field, base, args(extra, &format!("val.s{}", field), trailing));
        } else {
            let _ = writeln!(
                out,
                "    ret.s{} = as_{}({}({}));",
                field,
                scalar.cl_name(),
                base,
                args(extra, &format!("as_{}(val.s{})", cast.cl_name(), field), trailing)
            );
        }
    }
    out.push_str("    return ret;\n}");
    out
}

fn render_hilo(
    name: &str,
    base: &CallSite,
    vtype: VecType,
    extra: &Option<ExtraParam>,
    trailing: &Option<ExtraParam>,
) -> String {
    let ty = vtype.cl_name();
    let mid = vtype.with_bits(vtype.bits / 2);
    let half = vtype.with_lanes(vtype.lanes / 2);
    let trailing_arg = trailing.as_ref().map(|t| t.arg.as_str());
    let mut out = String::new();
    let _ = writeln!(out, "inline {0} {1}({2})", ty, name, params(extra, &format!("const {} val", ty), trailing));
    let _ = writeln!(out, "{{\n    {} ret;", ty);
    for part in ["hi", "lo"] {
        let elem = format!("as_{}(val.{})", mid.cl_name(), part);
        let _ = writeln!(
            out,
            "    ret.{} = as_{}({});",
            part,
            half.cl_name(),
            base.render(&elem, trailing_arg)
        );
    }
    out.push_str("    return ret;\n}");
    out
}

fn render_local(name: &str, kind: &LocalKind, vtype: VecType) -> String {
    let ty = vtype.cl_name();
    let scalar = vtype.scalar().cl_name();
    let mut out = String::new();
    if let LocalKind::ShuffleXor { shuffle, local_id } = kind {
        let _ = writeln!(out, "inline {0} {1}(local ulong* tmp, const {0} val, const uint mask)", ty, name);
        let _ = write!(out, "{{\n    return {}(tmp, val, {}() ^ mask);\n}}", shuffle, local_id);
        return out;
    }
    let _ = writeln!(out, "inline {0} {1}(local ulong* tmp, const {0} val, const uint sgId)", ty, name);
    out.push_str("{\n    barrier(CLK_LOCAL_MEM_FENCE);\n");
    let _ = writeln!(out, "    const uint lid = {};", LINEAR_LOCAL_ID);
    let _ = writeln!(out, "    local {0}* restrict ptr = (local {0}*)(tmp);", scalar);
    match (kind, vtype.is_scalar()) {
        (LocalKind::Broadcast, true) => {
            out.push_str("    if (lid == sgId) ptr[0] = val;\n");
            out.push_str("    barrier(CLK_LOCAL_MEM_FENCE);\n");
            out.push_str("    return ptr[0];\n");
        }
        (LocalKind::Broadcast, false) => {
            // scratch holds at least 16 ulong, one store covers any vector
            let _ = writeln!(out, "    if (lid == sgId) vstore{}(val, 0, ptr);", vtype.lanes);
            out.push_str("    barrier(CLK_LOCAL_MEM_FENCE);\n");
            let _ = writeln!(out, "    return vload{}(0, ptr);", vtype.lanes);
        }
        (_, true) => {
            out.push_str("    ptr[lid] = val;\n");
            out.push_str("    barrier(CLK_LOCAL_MEM_FENCE);\n");
            out.push_str("    return ptr[sgId];\n");
        }
        (_, false) => {
            let _ = writeln!(out, "    {} ret;", ty);
            for lane in 0..vtype.lanes {
                let field = lane_field(lane);
                let _ = writeln!(out, "    ptr[lid] = val.s{};", field);
                out.push_str("    barrier(CLK_LOCAL_MEM_FENCE);\n");
                let _ = writeln!(out, "    ret.s{} = ptr[sgId];", field);
                if lane + 1 < vtype.lanes {
                    out.push_str("    barrier(CLK_LOCAL_MEM_FENCE);\n");
                }
            }
            out.push_str("    return ret;\n");
        }
    }
    out.push('}');
    out
}
