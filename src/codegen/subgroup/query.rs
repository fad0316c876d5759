//! Subgroup queries and votes

use serde::Serialize;
use std::fmt;

use super::SubgroupProvider;
use super::catalog::Backend;
use super::patch::{Helper, PatchRecipe, size_define_block, size_define_macro};
use super::ptx::{PtxAsm, PtxKind, VoteOp};
use crate::codegen::registry::PatchRegistry;
use crate::diagnostics::{Result, SubgroupError};

/// Zero-argument subgroup queries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SubgroupQuery {
    Size,
    MaxSize,
    Count,
    Id,
    LocalId,
}

impl SubgroupQuery {
    pub const ALL: [SubgroupQuery; 5] = [
        SubgroupQuery::Size,
        SubgroupQuery::MaxSize,
        SubgroupQuery::Count,
        SubgroupQuery::Id,
        SubgroupQuery::LocalId,
    ];

    pub fn dsl_name(self) -> &'static str {
        match self {
            SubgroupQuery::Size => "GetSubgroupSize",
            SubgroupQuery::MaxSize => "GetMaxSubgroupSize",
            SubgroupQuery::Count => "GetSubgroupCount",
            SubgroupQuery::Id => "GetSubgroupId",
            SubgroupQuery::LocalId => "GetSubgroupLocalId",
        }
    }

    fn builtin(self) -> &'static str {
        match self {
            SubgroupQuery::Size => "get_sub_group_size()",
            SubgroupQuery::MaxSize => "get_max_sub_group_size()",
            SubgroupQuery::Count => "get_num_sub_groups()",
            SubgroupQuery::Id => "get_sub_group_id()",
            SubgroupQuery::LocalId => "get_sub_group_local_id()",
        }
    }
}

impl fmt::Display for SubgroupQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.dsl_name())
    }
}

/// Expression text plus the patched blocks it calls
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueryResult {
    pub text: String,
    pub depends: Vec<String>,
}

impl QueryResult {
    fn plain(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            depends: Vec::new(),
        }
    }

    fn helper(reg: &mut PatchRegistry, recipe: PatchRecipe) -> Self {
        let name = recipe.name();
        recipe.register::<&str>(reg, &[]);
        Self {
            text: format!("{}()", name),
            depends: vec![name],
        }
    }
}

fn vote_name(op: VoteOp) -> &'static str {
    match op {
        VoteOp::All => "SubgroupAll",
        VoteOp::Any => "SubgroupAny",
    }
}

impl SubgroupProvider {
    pub fn resolve_query(&mut self, reg: &mut PatchRegistry, query: SubgroupQuery) -> Result<QueryResult> {
        match self.backend {
            Backend::Khr | Backend::Intel { .. } => self.khr_query(query),
            Backend::Local if self.caps.basic_subgroup => self.khr_query(query),
            Backend::Local => self.local_query(reg, query),
            Backend::Ptx { sm_version } => {
                let kind = match query {
                    SubgroupQuery::Size => PtxKind::WarpSize,
                    SubgroupQuery::MaxSize => return Ok(QueryResult::plain("(/*nv_warp*/32u)")),
                    SubgroupQuery::Count if sm_version < 20 => {
                        return Err(SubgroupError::unsupported(
                            query.dsl_name(),
                            "void",
                            format!("%nwarpid needs sm20, device is sm{}", sm_version),
                        ));
                    }
                    SubgroupQuery::Count => PtxKind::WarpCount,
                    SubgroupQuery::Id => PtxKind::WarpId,
                    SubgroupQuery::LocalId => PtxKind::LaneId,
                };
                Ok(QueryResult::helper(reg, PatchRecipe::PtxAsm(PtxAsm::new(sm_version, kind))))
            }
        }
    }

    /// `SubgroupAll(p)` / `SubgroupAny(p)`
    pub fn resolve_vote(&mut self, reg: &mut PatchRegistry, op: VoteOp, predicate: &str) -> Result<QueryResult> {
        let func = match self.backend {
            Backend::Ptx { sm_version } => {
                let recipe = PatchRecipe::PtxAsm(PtxAsm::new(sm_version, PtxKind::Vote(op)));
                let name = recipe.name();
                recipe.register::<&str>(reg, &[]);
                return Ok(QueryResult {
                    text: format!("{}({})", name, predicate),
                    depends: vec![name],
                });
            }
            _ if self.caps.basic_subgroup => match op {
                VoteOp::All => "sub_group_all",
                VoteOp::Any => "sub_group_any",
            },
            _ => {
                return Err(SubgroupError::unsupported(
                    vote_name(op),
                    "void",
                    format!("{} has no basic subgroup support", self.backend),
                ));
            }
        };
        self.negotiator.flags.khr_basic = true;
        Ok(QueryResult::plain(format!("{}({})", func, predicate)))
    }

    fn khr_query(&mut self, query: SubgroupQuery) -> Result<QueryResult> {
        if !self.caps.basic_subgroup {
            return Err(SubgroupError::unsupported(
                query.dsl_name(),
                "void",
                format!("{} has no basic subgroup support", self.backend),
            ));
        }
        self.negotiator.flags.khr_basic = true;
        Ok(QueryResult::plain(query.builtin()))
    }

    fn local_query(&mut self, reg: &mut PatchRegistry, query: SubgroupQuery) -> Result<QueryResult> {
        let res = match query {
            SubgroupQuery::Size => QueryResult::helper(reg, PatchRecipe::Helper(Helper::LocalSize)),
            SubgroupQuery::LocalId => QueryResult::helper(reg, PatchRecipe::Helper(Helper::LocalId)),
            SubgroupQuery::Count => QueryResult::plain("(/*local mimic SubgroupCount*/ 1)"),
            SubgroupQuery::Id => QueryResult::plain("(/*local mimic SubgroupId*/ 0)"),
            SubgroupQuery::MaxSize => {
                let kernel = self.negotiator.kernel().ok_or_else(|| {
                    SubgroupError::invariant("GetMaxSubgroupSize used outside a kernel instance")
                })?;
                let res = QueryResult {
                    text: size_define_macro(kernel),
                    depends: vec![size_define_block(kernel)],
                };
                self.negotiator.flags.need_subgroup_size = true;
                res
            }
        };
        Ok(res)
    }
}
