//! PTX inline-assembly helpers
//!
//! NVIDIA's OpenCL stack has no subgroup builtins, but accepts inline PTX.
//! Every helper here wraps one warp-level instruction (or a short loop of
//! them) in an OpenCL function.
//!
//! References:
//! - PTX ISA: https://docs.nvidia.com/cuda/parallel-thread-execution/
//! - shfl: data-movement-and-conversion-instructions-shfl
//! - redux: parallel-synchronization-and-communication-instructions-redux-sync

use std::fmt::Write;

use super::op::ReduceOp;
use crate::types::VecType;

/// Compute-capability dependent instruction spelling
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PtxSync {
    pub sm_version: u32,
}

impl PtxSync {
    pub fn new(sm_version: u32) -> Self {
        Self { sm_version }
    }

    /// `.sync` variants exist since sm70
    pub fn suffix(&self) -> &'static str {
        if self.sm_version >= 70 { ".sync" } else { "" }
    }

    /// Full-warp member mask, assumes a warp of 32
    pub fn mask(&self) -> &'static str {
        if self.sm_version >= 70 { ", 0xffffffff" } else { "" }
    }
}

/// shfl lane selection mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShflMode {
    Idx,
    Bfly,
}

impl ShflMode {
    fn as_str(self) -> &'static str {
        match self {
            ShflMode::Idx => "idx",
            ShflMode::Bfly => "bfly",
        }
    }
}

/// Warp vote operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum VoteOp {
    All,
    Any,
}

/// One PTX-backed helper
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PtxKind {
    /// 32/64-bit unsigned shuffle
    Shuffle {
        name: String,
        vtype: VecType,
        mode: ShflMode,
    },
    /// sm80 `redux.sync`, 32-bit integer only
    Redux {
        name: String,
        op: ReduceOp,
        vtype: VecType,
    },
    /// Butterfly reduction over `shfl.bfly`
    ShflReduce {
        name: String,
        op: ReduceOp,
        vtype: VecType,
    },
    Vote(VoteOp),
    WarpSize,
    WarpCount,
    WarpId,
    LaneId,
}

/// PTX helper recipe
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PtxAsm {
    pub sync: PtxSync,
    pub kind: PtxKind,
}

impl PtxAsm {
    pub fn new(sm_version: u32, kind: PtxKind) -> Self {
        Self {
            sync: PtxSync::new(sm_version),
            kind,
        }
    }

    pub fn name(&self) -> String {
        match &self.kind {
            PtxKind::Shuffle { name, .. }
            | PtxKind::Redux { name, .. }
            | PtxKind::ShflReduce { name, .. } => name.clone(),
            PtxKind::Vote(VoteOp::All) => "oclu_subgroup_ptx_all".to_string(),
            PtxKind::Vote(VoteOp::Any) => "oclu_subgroup_ptx_any".to_string(),
            PtxKind::WarpSize => "oclu_subgroup_ptx_get_size".to_string(),
            PtxKind::WarpCount => "oclu_subgroup_ptx_count".to_string(),
            PtxKind::WarpId => "oclu_subgroup_ptx_get_id".to_string(),
            PtxKind::LaneId => "oclu_subgroup_ptx_get_local_id".to_string(),
        }
    }

    pub fn render(&self) -> String {
        match &self.kind {
            PtxKind::Shuffle { name, vtype, mode } => self.render_shuffle(name, *vtype, *mode),
            PtxKind::Redux { name, op, vtype } => self.render_redux(name, *op, *vtype),
            PtxKind::ShflReduce { name, op, vtype } => self.render_shfl_reduce(name, *op, *vtype),
            PtxKind::Vote(op) => self.render_vote(*op),
            PtxKind::WarpSize => Self::render_mov(&self.name(), "WARP_SZ"),
            PtxKind::WarpCount => Self::render_mov(&self.name(), "%%nwarpid"),
            PtxKind::LaneId => Self::render_mov(&self.name(), "%%laneid"),
            PtxKind::WarpId => format!(
                "inline uint {}()\n{{\n    const uint lid = {};\n    return lid / 32;\n}}",
                self.name(),
                super::patch::LINEAR_LOCAL_ID
            ),
        }
    }

    fn render_shuffle(&self, name: &str, vtype: VecType, mode: ShflMode) -> String {
        let (sync, mask, mode) = (self.sync.suffix(), self.sync.mask(), mode.as_str());
        let ty = vtype.cl_name();
        let mut out = String::new();
        let _ = writeln!(out, "inline {0} {1}(const {0} val, const uint sgId)", ty, name);
        out.push_str("{\n");
        if vtype.bits == 64 {
            out.push_str("    uint2 tmp = as_uint2(val), ret;\n");
            let _ = writeln!(
                out,
                "    asm volatile(\"shfl{0}.{1}.b32 %0, %2, %4, 0x1f{2}; shfl{0}.{1}.b32 %1, %3, %4, 0x1f{2};\"",
                sync, mode, mask
            );
            out.push_str("        : \"=r\"(ret.x), \"=r\"(ret.y) : \"r\"(tmp.x), \"r\"(tmp.y), \"r\"(sgId));\n");
            out.push_str("    return as_ulong(ret);\n");
        } else {
            out.push_str("    uint ret;\n");
            let _ = writeln!(
                out,
                "    asm volatile(\"shfl{}.{}.b32 %0, %1, %2, 0x1f{};\" : \"=r\"(ret) : \"r\"(val), \"r\"(sgId));",
                sync, mode, mask
            );
            out.push_str("    return ret;\n");
        }
        out.push('}');
        out
    }

    fn render_redux(&self, name: &str, op: ReduceOp, vtype: VecType) -> String {
        let ty = vtype.cl_name();
        let opname = match op {
            ReduceOp::Sum => "add",
            other => other.name(),
        };
        let reg = match (op.is_arith(), vtype.kind) {
            (false, _) => 'b',
            (true, crate::types::ElemKind::Unsigned) => 'u',
            (true, _) => 's',
        };
        let mut out = String::new();
        let _ = writeln!(out, "inline {0} {1}({0} x)", ty, name);
        out.push_str("{\n");
        let _ = writeln!(out, "    {} ret;", ty);
        let _ = writeln!(
            out,
            "    asm volatile(\"redux.sync.{}.{}32 %0, %1{};\" : \"=r\"(ret) : \"r\"(x));",
            opname,
            reg,
            self.sync.mask()
        );
        out.push_str("    return ret;\n}");
        out
    }

    fn render_shfl_reduce(&self, name: &str, op: ReduceOp, vtype: VecType) -> String {
        let (sync, mask) = (self.sync.suffix(), self.sync.mask());
        let ty = vtype.cl_name();
        let mut out = String::new();
        let _ = writeln!(out, "inline {0} {1}({0} x)", ty, name);
        out.push_str("{\n    for (uint mask = 32 / 2; mask > 0; mask /= 2)\n    {\n");
        if vtype.bits == 64 {
            out.push_str("        uint2 tmpi = as_uint2(x), tmpo;\n");
            let _ = writeln!(
                out,
                "        asm volatile(\"shfl{0}.bfly.b32 %0, %2, %4, 0x1f{1}; shfl{0}.bfly.b32 %1, %3, %4, 0x1f{1};\"",
                sync, mask
            );
            out.push_str(
                "            : \"=r\"(tmpo.x), \"=r\"(tmpo.y) : \"r\"(tmpi.x), \"r\"(tmpi.y), \"r\"(mask));\n",
            );
        } else {
            out.push_str("        uint tmpi = as_uint(x), tmpo;\n");
            let _ = writeln!(
                out,
                "        asm volatile(\"shfl{}.bfly.b32 %0, %1, %2, 0x1f{};\" : \"=r\"(tmpo) : \"r\"(tmpi), \"r\"(mask));",
                sync, mask
            );
        }
        let _ = writeln!(out, "        const {0} tmp = as_{0}(tmpo);", ty);
        let _ = writeln!(out, "        x = {};", op.combine("x", "tmp"));
        out.push_str("    }\n    return x;\n}");
        out
    }

    fn render_vote(&self, op: VoteOp) -> String {
        let mode = match op {
            VoteOp::All => "all",
            VoteOp::Any => "any",
        };
        let mut out = String::new();
        let _ = writeln!(out, "inline int {}(int predicate)", self.name());
        out.push_str("{\n    int ret;\n");
        out.push_str(r#"    asm volatile("{\n\t\t""#);
        out.push('\n');
        out.push_str(r#"                 ".reg .pred        %%p1, %%p2;     \n\t\t""#);
        out.push('\n');
        out.push_str(r#"                 "setp.ne.u32       %%p1, %1, 0;    \n\t\t""#);
        out.push('\n');
        let _ = writeln!(
            out,
            r#"                 "vote{}.{}.pred  %%p2, %%p1{};  \n\t\t""#,
            self.sync.suffix(),
            mode,
            self.sync.mask()
        );
        out.push_str(r#"                 "selp.s32          %0, 1, 0, %%p2; \n\t""#);
        out.push('\n');
        out.push_str(r#"                 "}" : "=r"(ret) : "r"(predicate));"#);
        out.push_str("\n    return ret;\n}");
        out
    }

    fn render_mov(name: &str, source: &str) -> String {
        format!(
            "inline uint {}()\n{{\n    uint ret;\n    asm volatile(\"mov.u32 %0, {};\" : \"=r\"(ret));\n    return ret;\n}}",
            name, source
        )
    }
}
