//! Shuffle resolution
//!
//! A request `(vtype, op)` is tried against the catalog in three tiers:
//! the exact type, the same width in the other category, then a per-lane
//! loop over a scalar primitive. When all three fail the ladder reshapes the
//! value and retries:
//!
//! ```text
//! merge   u8v4  -> u32       (fewer, wider lanes, same total bits)
//! split   u64   -> u32v2     (narrower lanes; vectors go hi/lo or per lane)
//! extend  i16v2 -> i32v2     (integers only, numeric convert)
//! ```
//!
//! Every success carries the [`CastTriple`] the call site needs to get back
//! to the requested type.

use super::SubgroupProvider;
use super::catalog::{AlgoId, Algorithm, Features};
use super::op::{CallSite, CastTriple, ExtraParam, ResolvedOperation, ShuffleOp, Tier, func_name};
use super::patch::{Helper, LocalKind, PatchRecipe};
use super::ptx::{PtxAsm, PtxKind, ShflMode};
use crate::codegen::registry::PatchRegistry;
use crate::diagnostics::{Result, SubgroupError};
use crate::types::VecType;

/// Call straight into a device builtin
pub(super) fn intrinsic(func: &str, tag: &'static str, features: Features, vtype: VecType) -> ResolvedOperation {
    ResolvedOperation {
        call: CallSite {
            func: func.to_string(),
            triple: CastTriple::identity(vtype),
            extra_arg: None,
        },
        tag,
        features,
        extra_param: None,
        depends: Vec::new(),
        tier: Tier::Exact,
    }
}

/// Call into a registered patched block of the same name
pub(super) fn patched(
    name: String,
    tag: &'static str,
    features: Features,
    vtype: VecType,
    extra: Option<ExtraParam>,
) -> ResolvedOperation {
    ResolvedOperation {
        call: CallSite {
            func: name.clone(),
            triple: CastTriple::identity(vtype),
            extra_arg: extra.as_ref().map(|e| e.arg.clone()),
        },
        tag,
        features,
        extra_param: extra,
        depends: vec![name],
        tier: Tier::Exact,
    }
}

impl SubgroupProvider {
    pub fn resolve_broadcast(&mut self, reg: &mut PatchRegistry, vtype: VecType) -> Result<ResolvedOperation> {
        self.resolve_shuffle(reg, vtype, ShuffleOp::Broadcast, false)
    }

    pub fn resolve_shuffle_xor(&mut self, reg: &mut PatchRegistry, vtype: VecType) -> Result<ResolvedOperation> {
        self.resolve_shuffle(reg, vtype, ShuffleOp::ShuffleXor, false)
    }

    /// Shuffle up or down by a lane delta
    pub fn resolve_shuffle_rel(
        &mut self,
        reg: &mut PatchRegistry,
        vtype: VecType,
        op: ShuffleOp,
    ) -> Result<ResolvedOperation> {
        if !op.is_relative() {
            return Err(SubgroupError::invariant(format!(
                "[{}] is not a relative shuffle",
                op.dsl_name()
            )));
        }
        self.resolve_shuffle(reg, vtype, op, false)
    }

    /// Walk the tiers, then the bit-width ladder
    pub fn resolve_shuffle(
        &mut self,
        reg: &mut PatchRegistry,
        vtype: VecType,
        op: ShuffleOp,
        non_uniform: bool,
    ) -> Result<ResolvedOperation> {
        let feat = op.features(non_uniform);

        if let Some(res) = self.shuffle_tiers(reg, vtype, vtype, false, feat, op) {
            return Ok(self.repack(reg, res, op));
        }

        // merge into fewer, wider lanes
        for bits in [64u8, 32, 16].into_iter().filter(|&b| b > vtype.bits) {
            let total = vtype.total_bits();
            if total % u32::from(bits) != 0 {
                continue;
            }
            let lanes = total / u32::from(bits);
            if !VecType::is_valid_lanes(lanes) {
                continue;
            }
            let merged = VecType::unsigned(bits, lanes as u8);
            if let Some(res) = self.shuffle_tiers(reg, vtype, merged, false, feat, op) {
                tracing::trace!("{} {} merged into {}", op, vtype, merged);
                return Ok(self.repack(reg, res, op).with_tier(Tier::Merge));
            }
        }

        // split into narrower lanes
        for bits in [32u8, 16, 8].into_iter().filter(|&b| b < vtype.bits) {
            let factor = vtype.bits / bits;
            if vtype.is_scalar() {
                let split = VecType::unsigned(bits, factor);
                if let Some(res) = self.shuffle_tiers(reg, vtype, split, false, feat, op) {
                    return Ok(self.repack(reg, res, op).with_tier(Tier::Split));
                }
                continue;
            }
            if vtype.lanes % 2 == 0 && bits == vtype.bits / 2 {
                if let Some(res) = self.split_hilo(reg, vtype, bits, feat, op) {
                    return Ok(res);
                }
                continue;
            }
            let lane = VecType::unsigned(bits, factor);
            if let Some(base) = self.shuffle_tiers(reg, vtype.scalar(), lane, false, feat, op) {
                let name = func_name(op.name(), base.tag, vtype.to_unsigned());
                let res = self.scalar_loop(reg, name, base, vtype.to_unsigned(), vtype, vtype);
                return Ok(res.with_tier(Tier::Split));
            }
        }

        // numeric widening keeps the value, integers only
        if vtype.is_integer() {
            for bits in [16u8, 32, 64].into_iter().filter(|&b| b > vtype.bits) {
                let wide = vtype.with_bits(bits);
                if let Some(res) = self.shuffle_tiers(reg, vtype, wide, true, feat, op) {
                    tracing::trace!("{} {} extended to {}", op, vtype, wide);
                    return Ok(self.repack(reg, res, op).with_tier(Tier::Extend));
                }
            }
        }

        Err(SubgroupError::unsupported(
            op.dsl_name(),
            vtype,
            format!("no {} algorithm covers it", self.backend),
        ))
    }

    /// Tiers 1-3 for `src`, reported against `orig`. With `convert` the
    /// value is numerically converted to `src` first, otherwise `src` is a
    /// reinterpretation of `orig`.
    fn shuffle_tiers(
        &mut self,
        reg: &mut PatchRegistry,
        orig: VecType,
        src: VecType,
        convert: bool,
        feat: Features,
        op: ShuffleOp,
    ) -> Option<ResolvedOperation> {
        let mid = if convert { src } else { orig };
        let algos: Vec<Algorithm> = self
            .catalog
            .shuffle
            .iter()
            .filter(|algo| algo.features.contains(feat))
            .cloned()
            .collect();

        for algo in &algos {
            if algo.supports(src) {
                if let Some(res) = self.handle_shuffle(reg, algo, op, src) {
                    let triple = CastTriple::new(orig, mid, res.compute());
                    return Some(res.with_triple(triple));
                }
            }
        }

        let alt = src.with_kind(src.kind.alternate());
        for algo in &algos {
            if algo.supports(alt) {
                if let Some(res) = self.handle_shuffle(reg, algo, op, alt) {
                    let triple = CastTriple::new(orig, mid, res.compute());
                    return Some(res.with_triple(triple).with_tier(Tier::Alternate));
                }
            }
        }

        if src.is_scalar() {
            return None;
        }
        let lane = VecType::unsigned(src.bits, 1);
        for algo in &algos {
            let scalar_ok = algo.support(src.bits).is_some_and(|s| s.int.contains(1));
            if !scalar_ok {
                continue;
            }
            if let Some(base) = self.handle_shuffle(reg, algo, op, lane) {
                let looped = src.to_unsigned();
                let name = func_name(op.name(), base.tag, looped);
                let res = self.scalar_loop(reg, name, base, looped, orig, mid);
                return Some(res);
            }
        }
        None
    }

    /// Wrap a scalar result into a per-lane loop over `looped`
    fn scalar_loop(
        &mut self,
        reg: &mut PatchRegistry,
        name: String,
        base: ResolvedOperation,
        looped: VecType,
        orig: VecType,
        mid: VecType,
    ) -> ResolvedOperation {
        let recipe = PatchRecipe::ScalarLoop {
            name: name.clone(),
            base: base.call.func.clone(),
            vtype: looped,
            cast: base.compute(),
            extra: base.extra_param.clone(),
            trailing: Some(ExtraParam::sg_id()),
        };
        recipe.register(reg, &base.depends);
        let mut res = patched(name, base.tag, base.features, looped, base.extra_param);
        res.call.triple = CastTriple::new(orig, mid, looped);
        res.with_tier(Tier::ScalarLoop)
    }

    /// Shuffle both halves of an even vector as (bits/2, lanes)
    fn split_hilo(
        &mut self,
        reg: &mut PatchRegistry,
        vtype: VecType,
        bits: u8,
        feat: Features,
        op: ShuffleOp,
    ) -> Option<ResolvedOperation> {
        let mid = VecType::unsigned(bits, vtype.lanes);
        let base = self.shuffle_tiers(reg, mid, mid, false, feat, op)?;
        let looped = vtype.to_unsigned();
        let name = func_name(op.name(), &format!("{}_hilo", base.tag), looped);
        let recipe = PatchRecipe::HiLo {
            name: name.clone(),
            base: base.call.clone(),
            vtype: looped,
            extra: base.extra_param.clone(),
            trailing: Some(ExtraParam::sg_id()),
        };
        recipe.register(reg, &base.depends);
        let mut res = patched(name, base.tag, base.features, looped, base.extra_param);
        res.call.triple = CastTriple::new(vtype, vtype, looped);
        Some(res.with_tier(Tier::HiLo))
    }

    /// A reshaped builtin call gets a named wrapper at the compute type
    fn repack(&mut self, reg: &mut PatchRegistry, res: ResolvedOperation, op: ShuffleOp) -> ResolvedOperation {
        let triple = *res.triple();
        if !res.is_intrinsic() || (!triple.needs_convert() && !triple.needs_reinterpret()) {
            return res;
        }
        let name = func_name(op.name(), res.tag, triple.compute);
        PatchRecipe::Repack {
            name: name.clone(),
            base: res.call.func.clone(),
            vtype: triple.compute,
            extra: res.extra_param.clone(),
            trailing: Some(ExtraParam::sg_id()),
        }
        .register::<&str>(reg, &[]);
        let mut wrapped = patched(name, res.tag, res.features, triple.compute, res.extra_param);
        wrapped.call.triple = triple;
        wrapped.with_tier(res.tier)
    }

    /// Emit `op` on `vtype` with one algorithm, raising the flags it needs.
    /// `vtype` is already known to be supported by `algo`.
    fn handle_shuffle(
        &mut self,
        reg: &mut PatchRegistry,
        algo: &Algorithm,
        op: ShuffleOp,
        vtype: VecType,
    ) -> Option<ResolvedOperation> {
        let tag = algo.id.tag();
        let narrow_int = vtype.is_integer() && vtype.bits < 32;
        let res = match algo.id {
            AlgoId::KhrBroadcast => {
                let flags = &mut self.negotiator.flags;
                flags.khr_basic = true;
                flags.khr_ext_type |= !vtype.is_scalar() || narrow_int;
                intrinsic("sub_group_broadcast", tag, algo.features, vtype)
            }
            AlgoId::KhrBroadcastNonUniform => {
                self.negotiator.flags.khr_ballot = true;
                intrinsic("sub_group_non_uniform_broadcast", tag, algo.features, vtype)
            }
            AlgoId::KhrShuffle => {
                let func = match op {
                    ShuffleOp::Broadcast | ShuffleOp::Shuffle => "sub_group_shuffle",
                    ShuffleOp::ShuffleXor => "sub_group_shuffle_xor",
                    ShuffleOp::ShuffleDown => "sub_group_shuffle_down",
                    ShuffleOp::ShuffleUp => "sub_group_shuffle_up",
                };
                let flags = &mut self.negotiator.flags;
                flags.khr_shuffle = true;
                flags.khr_shuffle_rel |= op.is_relative();
                intrinsic(func, tag, algo.features, vtype)
            }
            AlgoId::IntelShuffle => {
                let func = match op {
                    ShuffleOp::Broadcast | ShuffleOp::Shuffle => "intel_sub_group_shuffle",
                    ShuffleOp::ShuffleXor => "intel_sub_group_shuffle_xor",
                    ShuffleOp::ShuffleDown | ShuffleOp::ShuffleUp => return None,
                };
                let flags = &mut self.negotiator.flags;
                flags.intel = true;
                flags.intel16 |= vtype.is_integer() && vtype.bits == 16;
                flags.intel8 |= vtype.is_integer() && vtype.bits == 8;
                intrinsic(func, tag, algo.features, vtype)
            }
            AlgoId::LocalBroadcast | AlgoId::LocalShuffle => {
                let vtype = vtype.to_unsigned();
                let name = func_name(op.name(), tag, vtype);
                match (algo.id, op) {
                    (AlgoId::LocalBroadcast, ShuffleOp::Broadcast) => {
                        PatchRecipe::LocalMimic {
                            name: name.clone(),
                            kind: LocalKind::Broadcast,
                            vtype,
                        }
                        .register::<&str>(reg, &[]);
                    }
                    (AlgoId::LocalShuffle, ShuffleOp::Broadcast | ShuffleOp::Shuffle) => {
                        PatchRecipe::LocalMimic {
                            name: name.clone(),
                            kind: LocalKind::Shuffle,
                            vtype,
                        }
                        .register::<&str>(reg, &[]);
                    }
                    (AlgoId::LocalShuffle, ShuffleOp::ShuffleXor) => {
                        let shuffle = func_name(ShuffleOp::Shuffle.name(), tag, vtype);
                        PatchRecipe::LocalMimic {
                            name: shuffle.clone(),
                            kind: LocalKind::Shuffle,
                            vtype,
                        }
                        .register::<&str>(reg, &[]);
                        let local_id = Helper::LocalId;
                        PatchRecipe::Helper(local_id.clone()).register::<&str>(reg, &[]);
                        PatchRecipe::LocalMimic {
                            name: name.clone(),
                            kind: LocalKind::ShuffleXor {
                                shuffle: shuffle.clone(),
                                local_id: local_id.name(),
                            },
                            vtype,
                        }
                        .register(reg, &[shuffle, local_id.name()]);
                    }
                    _ => return None,
                }
                let flags = &mut self.negotiator.flags;
                flags.need_local_temp = true;
                flags.need_subgroup_size = true;
                patched(name, tag, algo.features, vtype, Some(ExtraParam::local_scratch()))
            }
            AlgoId::PtxShuffle => {
                let mode = match op {
                    ShuffleOp::Broadcast | ShuffleOp::Shuffle => ShflMode::Idx,
                    ShuffleOp::ShuffleXor => ShflMode::Bfly,
                    ShuffleOp::ShuffleDown | ShuffleOp::ShuffleUp => return None,
                };
                let sm_version = self.sm_version();
                let vtype = vtype.to_unsigned();
                let name = func_name(op.name(), tag, vtype);
                PatchRecipe::PtxAsm(PtxAsm::new(
                    sm_version,
                    PtxKind::Shuffle {
                        name: name.clone(),
                        vtype,
                        mode,
                    },
                ))
                .register::<&str>(reg, &[]);
                patched(name, tag, algo.features, vtype, None)
            }
            AlgoId::KhrReduce | AlgoId::IntelReduce | AlgoId::PtxRedux | AlgoId::PtxShflReduce => {
                return None;
            }
        };
        self.negotiator.flags.enable_vec_type(vtype);
        Some(res)
    }
}
