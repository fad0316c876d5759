//! Reduce resolution
//!
//! Candidates are `(intermediate, compute)` pairs: the requested type
//! itself, then reshapes that keep the result exact for the op (widening
//! for arithmetic, any same-size reinterpretation for bitwise). Three tiers
//! run over every candidate before moving to the next tier:
//!
//! 1. a native reduce on the whole compute type
//! 2. a native scalar reduce looped over the lanes
//! 3. a butterfly tree over the resolved shuffle-xor

use super::SubgroupProvider;
use super::catalog::{AlgoId, Algorithm};
use super::op::{CastTriple, ReduceOp, ResolvedOperation, ShuffleOp, Tier, func_name};
use super::patch::PatchRecipe;
use super::ptx::{PtxAsm, PtxKind};
use super::query::SubgroupQuery;
use super::resolve::{intrinsic, patched};
use crate::codegen::registry::PatchRegistry;
use crate::diagnostics::{Result, SubgroupError};
use crate::types::{ElemKind, VecType};

/// `(intermediate, compute)` pairs to try, in order, without duplicates
pub fn reduce_candidates(op: ReduceOp, vtype: VecType) -> Vec<(VecType, VecType)> {
    let mut list = Vec::new();
    let mut push = |pair: (VecType, VecType)| {
        if !list.contains(&pair) {
            list.push(pair);
        }
    };
    if op.is_arith() {
        push((vtype, vtype));
        if vtype.is_integer() && vtype.bits < 32 {
            let wide = vtype.with_bits(32);
            push((wide, wide));
        }
        return list;
    }

    push((vtype, vtype.to_unsigned()));
    let total = vtype.total_bits();
    for bits in [32u8, 64] {
        if total % u32::from(bits) == 0 && VecType::is_valid_lanes(total / u32::from(bits)) {
            push((vtype, VecType::unsigned(bits, (total / u32::from(bits)) as u8)));
        }
    }
    if vtype.is_integer() && vtype.bits < 32 {
        push((vtype.with_bits(32), VecType::unsigned(32, vtype.lanes)));
    }
    list
}

impl SubgroupProvider {
    pub fn resolve_reduce(&mut self, reg: &mut PatchRegistry, op: ReduceOp, vtype: VecType) -> Result<ResolvedOperation> {
        if vtype.kind == ElemKind::Float
            && ((vtype.bits == 16 && !self.caps.fp16) || (vtype.bits == 64 && !self.caps.fp64))
        {
            self.negotiator.add_warning(format!(
                "Potential use of unsupported type[f{}] with [SubgroupReduce].",
                vtype.bits
            ));
        }

        let feat = op.features();
        let candidates = reduce_candidates(op, vtype);
        let algos: Vec<Algorithm> = self
            .catalog
            .reduce
            .iter()
            .filter(|algo| algo.features.contains(feat))
            .cloned()
            .collect();

        for &(mid, compute) in &candidates {
            for algo in &algos {
                if !algo.supports(compute) {
                    continue;
                }
                if let Some(res) = self.handle_reduce(reg, algo, op, compute) {
                    return Ok(res.with_triple(CastTriple::new(vtype, mid, compute)));
                }
            }
        }

        for &(mid, compute) in candidates.iter().filter(|(_, c)| !c.is_scalar()) {
            for algo in &algos {
                let scalar_ok = algo
                    .support(compute.bits)
                    .is_some_and(|s| s.for_kind(compute.kind).contains(1));
                if !scalar_ok {
                    continue;
                }
                let Some(base) = self.handle_reduce(reg, algo, op, compute.scalar()) else {
                    continue;
                };
                let name = func_name(&op.func_op(), base.tag, compute);
                PatchRecipe::ScalarLoop {
                    name: name.clone(),
                    base: base.call.func.clone(),
                    vtype: compute,
                    cast: base.compute(),
                    extra: None,
                    trailing: None,
                }
                .register(reg, &base.depends);
                let res = patched(name, base.tag, base.features, compute, None)
                    .with_triple(CastTriple::new(vtype, mid, compute))
                    .with_tier(Tier::ScalarLoop);
                return Ok(res);
            }
        }

        for &(mid, compute) in &candidates {
            match self.tree_reduce(reg, op, compute) {
                Ok(res) => return Ok(res.with_triple(CastTriple::new(vtype, mid, compute))),
                Err(err) if err.is_recoverable() => {
                    tracing::trace!("tree {} on {} unavailable: {}", op, compute, err);
                }
                Err(err) => return Err(err),
            }
        }

        Err(SubgroupError::unsupported(
            op.dsl_name(),
            vtype,
            format!("no {} reduce or shuffle-xor covers it", self.backend),
        ))
    }

    /// log2(size) xor-shuffle steps, looped over lanes for vectors
    fn tree_reduce(&mut self, reg: &mut PatchRegistry, op: ReduceOp, compute: VecType) -> Result<ResolvedOperation> {
        let scalar = compute.scalar();
        let xor = self.resolve_shuffle(reg, scalar, ShuffleOp::ShuffleXor, false)?;
        let size = self.resolve_query(reg, SubgroupQuery::Size)?;

        let name = func_name(&op.func_op(), "tree", scalar);
        let mut deps = xor.depends.clone();
        deps.extend(size.depends.iter().cloned());
        PatchRecipe::TreeReduce {
            name: name.clone(),
            op,
            vtype: scalar,
            xor: xor.call.clone(),
            size: size.text,
            extra: xor.extra_param.clone(),
        }
        .register(reg, &deps);
        let base = patched(name, "tree", op.features(), scalar, xor.extra_param.clone());
        if compute.is_scalar() {
            return Ok(base.with_tier(Tier::Tree));
        }

        let looped = func_name(&op.func_op(), "tree", compute);
        PatchRecipe::ScalarLoop {
            name: looped.clone(),
            base: base.call.func.clone(),
            vtype: compute,
            cast: scalar,
            extra: xor.extra_param.clone(),
            trailing: None,
        }
        .register(reg, &base.depends);
        Ok(patched(looped, "tree", op.features(), compute, xor.extra_param).with_tier(Tier::Tree))
    }

    fn handle_reduce(
        &mut self,
        reg: &mut PatchRegistry,
        algo: &Algorithm,
        op: ReduceOp,
        vtype: VecType,
    ) -> Option<ResolvedOperation> {
        let tag = algo.id.tag();
        let narrow_int = vtype.is_integer() && vtype.bits < 32;
        let res = match algo.id {
            AlgoId::KhrReduce => {
                let builtin = op.builtin()?;
                let flags = &mut self.negotiator.flags;
                flags.khr_basic = true;
                flags.khr_ext_type |= narrow_int;
                intrinsic(builtin, tag, algo.features, vtype)
            }
            AlgoId::IntelReduce => {
                let builtin = op.builtin()?;
                let flags = &mut self.negotiator.flags;
                flags.intel = true;
                flags.intel16 |= vtype.is_integer() && vtype.bits == 16;
                flags.intel8 |= vtype.is_integer() && vtype.bits == 8;
                intrinsic(builtin, tag, algo.features, vtype)
            }
            AlgoId::PtxRedux | AlgoId::PtxShflReduce => {
                let name = func_name(&op.func_op(), tag, vtype);
                let kind = if algo.id == AlgoId::PtxRedux {
                    PtxKind::Redux {
                        name: name.clone(),
                        op,
                        vtype,
                    }
                } else {
                    PtxKind::ShflReduce {
                        name: name.clone(),
                        op,
                        vtype,
                    }
                };
                PatchRecipe::PtxAsm(PtxAsm::new(self.sm_version(), kind)).register::<&str>(reg, &[]);
                patched(name, tag, algo.features, vtype, None)
            }
            _ => return None,
        };
        self.negotiator.flags.enable_vec_type(vtype);
        Some(res)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_arith_candidates_widen_narrow_ints() {
        let cands = reduce_candidates(ReduceOp::Sum, VecType::signed(16, 4));
        assert_eq!(
            cands,
            vec![
                (VecType::signed(16, 4), VecType::signed(16, 4)),
                (VecType::signed(32, 4), VecType::signed(32, 4)),
            ]
        );
        let floats = reduce_candidates(ReduceOp::Max, VecType::float(32, 2));
        assert_eq!(floats.len(), 1);
    }

    #[test]
    fn test_bitwise_candidates_repack() {
        let v = VecType::unsigned(8, 4);
        let cands = reduce_candidates(ReduceOp::Or, v);
        assert_eq!(cands[0], (v, v));
        assert_eq!(cands[1], (v, VecType::unsigned(32, 1)));
        assert_eq!(cands[2], (VecType::unsigned(32, 4), VecType::unsigned(32, 4)));
        assert_eq!(cands.len(), 3);
    }

    #[test]
    fn test_bitwise_candidates_dedup() {
        let v = VecType::unsigned(32, 1);
        assert_eq!(reduce_candidates(ReduceOp::Xor, v), vec![(v, v)]);
    }
}
