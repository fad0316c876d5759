//! Subgroup operations and their resolved call sites

use serde::Serialize;
use std::fmt;

use super::catalog::Features;
use crate::types::VecType;

/// Data movement between lanes of a subgroup
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ShuffleOp {
    Broadcast,
    Shuffle,
    ShuffleXor,
    ShuffleDown,
    ShuffleUp,
}

impl ShuffleOp {
    pub const ALL: [ShuffleOp; 5] = [
        ShuffleOp::Broadcast,
        ShuffleOp::Shuffle,
        ShuffleOp::ShuffleXor,
        ShuffleOp::ShuffleDown,
        ShuffleOp::ShuffleUp,
    ];

    pub fn name(self) -> &'static str {
        match self {
            ShuffleOp::Broadcast => "broadcast",
            ShuffleOp::Shuffle => "shuffle",
            ShuffleOp::ShuffleXor => "shuffle_xor",
            ShuffleOp::ShuffleDown => "shuffle_down",
            ShuffleOp::ShuffleUp => "shuffle_up",
        }
    }

    pub fn dsl_name(self) -> &'static str {
        match self {
            ShuffleOp::Broadcast => "SubgroupBroadcast",
            ShuffleOp::Shuffle => "SubgroupShuffle",
            ShuffleOp::ShuffleXor => "SubgroupShuffleXor",
            ShuffleOp::ShuffleDown => "SubgroupShuffleDown",
            ShuffleOp::ShuffleUp => "SubgroupShuffleUp",
        }
    }

    pub fn is_relative(self) -> bool {
        matches!(self, ShuffleOp::ShuffleDown | ShuffleOp::ShuffleUp)
    }

    /// Features an algorithm must offer to serve this op
    pub fn features(self, non_uniform: bool) -> Features {
        let base = match self {
            ShuffleOp::Broadcast => Features::BROADCAST,
            ShuffleOp::Shuffle | ShuffleOp::ShuffleXor => Features::SHUFFLE,
            ShuffleOp::ShuffleDown | ShuffleOp::ShuffleUp => Features::SHUFFLE_REL,
        };
        base | Features::NON_UNIFORM.when(non_uniform)
    }
}

impl fmt::Display for ShuffleOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Subgroup-wide reduction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReduceOp {
    Sum,
    Min,
    Max,
    And,
    Or,
    Xor,
}

impl ReduceOp {
    pub const ALL: [ReduceOp; 6] = [
        ReduceOp::Sum,
        ReduceOp::Min,
        ReduceOp::Max,
        ReduceOp::And,
        ReduceOp::Or,
        ReduceOp::Xor,
    ];

    pub fn name(self) -> &'static str {
        match self {
            ReduceOp::Sum => "sum",
            ReduceOp::Min => "min",
            ReduceOp::Max => "max",
            ReduceOp::And => "and",
            ReduceOp::Or => "or",
            ReduceOp::Xor => "xor",
        }
    }

    /// Operation fragment of generated names, e.g. `reduce_sum`
    pub fn func_op(self) -> String {
        format!("reduce_{}", self.name())
    }

    pub fn dsl_name(self) -> &'static str {
        match self {
            ReduceOp::Sum => "SubgroupSum",
            ReduceOp::Min => "SubgroupMin",
            ReduceOp::Max => "SubgroupMax",
            ReduceOp::And => "SubgroupAnd",
            ReduceOp::Or => "SubgroupOr",
            ReduceOp::Xor => "SubgroupXor",
        }
    }

    pub fn is_arith(self) -> bool {
        matches!(self, ReduceOp::Sum | ReduceOp::Min | ReduceOp::Max)
    }

    pub fn features(self) -> Features {
        if self.is_arith() { Features::ARITH } else { Features::BITWISE }
    }

    /// OpenCL builtin, arithmetic ops only
    pub fn builtin(self) -> Option<&'static str> {
        match self {
            ReduceOp::Sum => Some("sub_group_reduce_add"),
            ReduceOp::Min => Some("sub_group_reduce_min"),
            ReduceOp::Max => Some("sub_group_reduce_max"),
            ReduceOp::And | ReduceOp::Or | ReduceOp::Xor => None,
        }
    }

    /// Combine two partial results
    pub fn combine(self, lhs: &str, rhs: &str) -> String {
        match self {
            ReduceOp::Sum => format!("{} + {}", lhs, rhs),
            ReduceOp::Min => format!("min({}, {})", lhs, rhs),
            ReduceOp::Max => format!("max({}, {})", lhs, rhs),
            ReduceOp::And => format!("{} & {}", lhs, rhs),
            ReduceOp::Or => format!("{} | {}", lhs, rhs),
            ReduceOp::Xor => format!("{} ^ {}", lhs, rhs),
        }
    }
}

impl fmt::Display for ReduceOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// `oclu_subgroup_{op}_{tag}_{vtype}`
pub fn func_name(op: &str, tag: &str, vtype: VecType) -> String {
    format!("oclu_subgroup_{}_{}_{}", op, tag, vtype)
}

/// Types a value passes through on its way to the primitive and back.
///
/// `original -> intermediate` is a numeric convert, `intermediate ->
/// compute` a bit reinterpret. Both are undone on the result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct CastTriple {
    pub original: VecType,
    pub intermediate: VecType,
    pub compute: VecType,
}

impl CastTriple {
    pub fn new(original: VecType, intermediate: VecType, compute: VecType) -> Self {
        Self {
            original,
            intermediate,
            compute,
        }
    }

    pub fn identity(vtype: VecType) -> Self {
        Self::new(vtype, vtype, vtype)
    }

    pub fn needs_convert(&self) -> bool {
        self.original != self.intermediate
    }

    pub fn needs_reinterpret(&self) -> bool {
        self.intermediate != self.compute
    }
}

/// A fixed leading parameter, declared on helpers and passed at call sites
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct ExtraParam {
    pub param: String,
    pub arg: String,
}

impl ExtraParam {
    pub fn new(param: impl Into<String>, arg: impl Into<String>) -> Self {
        Self {
            param: param.into(),
            arg: arg.into(),
        }
    }

    /// Scratch buffer used by the local mimic
    pub fn local_scratch() -> Self {
        Self::new("local ulong* _oclu_subgroup_local", "_oclu_subgroup_local")
    }

    /// Trailing lane index of shuffles
    pub fn sg_id() -> Self {
        Self::new("const uint sgId", "sgId")
    }
}

/// A function call with its cast wrapping
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct CallSite {
    pub func: String,
    pub triple: CastTriple,
    pub extra_arg: Option<String>,
}

impl CallSite {
    /// `convert_O(as_I(func(extra, as_C(convert_I(elem)), trailing)))`,
    /// each cast present only when its types differ
    pub fn render(&self, elem: &str, trailing: Option<&str>) -> String {
        let convert = self.triple.needs_convert();
        let reinterpret = self.triple.needs_reinterpret();
        let mut txt = String::new();
        if convert {
            txt.push_str(&format!("convert_{}(", self.triple.original.cl_name()));
        }
        if reinterpret {
            txt.push_str(&format!("as_{}(", self.triple.intermediate.cl_name()));
        }
        txt.push_str(&self.func);
        txt.push('(');
        if let Some(extra) = &self.extra_arg {
            txt.push_str(extra);
            txt.push_str(", ");
        }
        if reinterpret {
            txt.push_str(&format!("as_{}(", self.triple.compute.cl_name()));
        }
        if convert {
            txt.push_str(&format!("convert_{}(", self.triple.intermediate.cl_name()));
        }
        txt.push_str(elem);
        if convert {
            txt.push(')');
        }
        if reinterpret {
            txt.push(')');
        }
        if let Some(trailing) = trailing {
            txt.push_str(", ");
            txt.push_str(trailing);
        }
        txt.push(')');
        if reinterpret {
            txt.push(')');
        }
        if convert {
            txt.push(')');
        }
        txt
    }
}

/// Which rung of the fallback ladder produced a result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Exact,
    Alternate,
    ScalarLoop,
    Merge,
    Split,
    HiLo,
    Extend,
    Tree,
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Tier::Exact => "exact",
            Tier::Alternate => "alternate",
            Tier::ScalarLoop => "scalar_loop",
            Tier::Merge => "merge",
            Tier::Split => "split",
            Tier::HiLo => "hilo",
            Tier::Extend => "extend",
            Tier::Tree => "tree",
        };
        write!(f, "{}", name)
    }
}

/// Successful resolution of one request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedOperation {
    pub call: CallSite,
    pub tag: &'static str,
    pub features: Features,
    pub extra_param: Option<ExtraParam>,
    /// Patched blocks the call site needs, empty for bare intrinsics
    pub depends: Vec<String>,
    pub tier: Tier,
}

impl ResolvedOperation {
    pub fn func_name(&self) -> &str {
        &self.call.func
    }

    pub fn triple(&self) -> &CastTriple {
        &self.call.triple
    }

    pub fn compute(&self) -> VecType {
        self.call.triple.compute
    }

    pub fn is_intrinsic(&self) -> bool {
        self.depends.is_empty()
    }

    /// Call-site text for `elem`, with the lane index for shuffles
    pub fn call_text(&self, elem: &str, index: Option<&str>) -> String {
        self.call.render(elem, index)
    }

    pub(crate) fn with_triple(mut self, triple: CastTriple) -> Self {
        self.call.triple = triple;
        self
    }

    pub(crate) fn with_tier(mut self, tier: Tier) -> Self {
        self.tier = tier;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(func: &str, triple: CastTriple) -> CallSite {
        CallSite {
            func: func.to_string(),
            triple,
            extra_arg: None,
        }
    }

    #[test]
    fn test_render_plain() {
        let site = call("sub_group_broadcast", CastTriple::identity(VecType::unsigned(32, 1)));
        assert_eq!(site.render("x", Some("idx")), "sub_group_broadcast(x, idx)");
    }

    #[test]
    fn test_render_reinterpret() {
        let triple = CastTriple::new(
            VecType::unsigned(8, 4),
            VecType::unsigned(8, 4),
            VecType::unsigned(32, 1),
        );
        let site = call("f", triple);
        assert_eq!(site.render("x", Some("idx")), "as_uchar4(f(as_uint(x), idx))");
    }

    #[test]
    fn test_render_convert_then_reinterpret() {
        let triple = CastTriple::new(
            VecType::signed(16, 2),
            VecType::signed(32, 2),
            VecType::unsigned(32, 2),
        );
        let site = CallSite {
            func: "f".to_string(),
            triple,
            extra_arg: Some("_oclu_subgroup_local".to_string()),
        };
        assert_eq!(
            site.render("v", None),
            "convert_short2(as_int2(f(_oclu_subgroup_local, as_uint2(convert_int2(v)))))"
        );
    }

    #[test]
    fn test_shuffle_features() {
        assert_eq!(ShuffleOp::Broadcast.features(false), Features::BROADCAST);
        assert!(ShuffleOp::ShuffleXor.features(true).contains(Features::NON_UNIFORM));
        assert_eq!(ShuffleOp::ShuffleUp.features(false), Features::SHUFFLE_REL);
    }

    #[test]
    fn test_reduce_ops() {
        assert!(ReduceOp::Max.is_arith());
        assert!(!ReduceOp::Xor.is_arith());
        assert_eq!(ReduceOp::Sum.builtin(), Some("sub_group_reduce_add"));
        assert_eq!(ReduceOp::And.builtin(), None);
        assert_eq!(ReduceOp::Min.combine("x", "tmp"), "min(x, tmp)");
        assert_eq!(func_name(&ReduceOp::Sum.func_op(), "khr", VecType::signed(32, 4)), "oclu_subgroup_reduce_sum_khr_i32v4");
    }
}
