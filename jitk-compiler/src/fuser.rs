//! Fusion of loop blocks into kernels

use crate::block::{create_nested_block, Block, BlockIdAlloc, LoopB};
use alloc::{collections::BTreeSet, sync::Arc, vec::Vec};
use jitk_core::{
    base::BaseId,
    error::JitError,
    instruction::{data_parallel_compatible, instr_dependency, InstrPtr, Instruction},
    opcode::Opcode,
};

/// Instruction with axis `rank` of its iteration space split into `[size, shape[rank]/size]`
fn split_axis(instr: &Instruction, rank: usize, size: i64) -> Result<Instruction, JitError> {
    let shape = instr.dominating_shape();
    if rank >= shape.len() || size <= 0 || shape[rank] % size != 0 {
        return Err(JitError::invalid_argument(alloc::format!(
            "axis {rank} of {shape:?} can not be split by {size}"
        )));
    }
    let mut new_shape = shape[..rank].to_vec();
    new_shape.push(size);
    new_shape.push(shape[rank] / size);
    new_shape.extend_from_slice(&shape[rank + 1..]);
    instr.reshape(&new_shape)
}

/// Instructions of `l` split so that loop `l` iterates `size` times
fn split_instrs(l: &LoopB, size: i64) -> Result<Vec<InstrPtr>, JitError> {
    let rank = l.rank as usize;
    l.all_instr()
        .iter()
        .map(|i| split_axis(i, rank, size).map(Arc::new))
        .collect()
}

/// Does any instruction in `b` touch what sweeps of `a` at its rank write
fn accesses_sweep_output(a: &LoopB, b: &LoopB) -> bool {
    let b_instrs = b.all_instr();
    a.sweeps.iter().any(|s| {
        let out = &s.operand[0];
        b_instrs.iter().any(|i| i.operand.iter().any(|v| !v.is_constant() && !out.disjoint(v)))
    })
}

fn has_position_dependent(l: &LoopB) -> bool {
    l.all_instr().iter().any(|i| i.is_position_dependent())
}

/// Can `b` be merged into `a`, executing `b` after `a` within each iteration.
/// With `avoid_rank0_sweep` blocks with and without sweeps never share a root loop.
pub fn mergeable(a: &LoopB, b: &LoopB, avoid_rank0_sweep: bool) -> bool {
    if a.is_system_only() || b.is_system_only() {
        return true;
    }
    if a.rank != b.rank {
        return false;
    }
    if avoid_rank0_sweep && a.rank == 0 && a.sweeps.is_empty() != b.sweeps.is_empty() {
        return false;
    }
    if accesses_sweep_output(a, b) || accesses_sweep_output(b, a) {
        return false;
    }
    if (!a.sweeps.is_empty() && has_position_dependent(b)) || (!b.sweeps.is_empty() && has_position_dependent(a)) {
        return false;
    }
    let (a_instrs, b_instrs) = if a.size == b.size {
        (a.all_instr(), b.all_instr())
    } else {
        if a.rank < 0 {
            return false;
        }
        let (large, small) = if a.size > b.size { (a, b) } else { (b, a) };
        if !large.reshapable || small.size <= 0 || large.size % small.size != 0 {
            return false;
        }
        let Ok(split) = split_instrs(large, small.size) else {
            return false;
        };
        if a.size > b.size {
            (split, b.all_instr())
        } else {
            (a.all_instr(), split)
        }
    };
    a_instrs.iter().all(|x| b_instrs.iter().all(|y| data_parallel_compatible(x, y)))
}

/// Merge `b` into `a`. Blocks must be [mergeable].
/// The instruction order of the result is the order of `a` followed by `b`.
pub fn merge(alloc: &mut BlockIdAlloc, a: &LoopB, b: &LoopB) -> Result<LoopB, JitError> {
    debug_assert!(mergeable(a, b, false));
    if b.is_system_only() {
        let mut res = a.clone();
        res.id = alloc.next_id();
        res.frees.extend(b.all_frees());
        return Ok(res);
    }
    if a.is_system_only() {
        let mut res = b.clone();
        res.id = alloc.next_id();
        res.frees.extend(a.all_frees());
        return Ok(res);
    }
    assert_eq!(a.rank, b.rank);
    if a.size != b.size {
        return reshape_and_merge(alloc, a, b);
    }
    let mut res = LoopB::new(alloc, a.rank, a.size);
    res.frees = a.frees.union(&b.frees).copied().collect();
    for blk in a.block_list.iter().chain(b.block_list.iter()) {
        if let (Some(Block::Loop(prev)), Block::Loop(cur)) = (res.block_list.last(), blk) {
            if mergeable(prev, cur, false) {
                let merged = merge(alloc, prev, cur)?;
                if let Some(last) = res.block_list.last_mut() {
                    *last = Block::Loop(merged);
                }
                continue;
            }
        }
        res.block_list.push(blk.clone());
    }
    res.metadata_update();
    Ok(res)
}

/// Merge loops of different sizes by splitting the axis of the larger one.
/// The larger loop must be reshapable and its size divisible by the smaller.
pub fn reshape_and_merge(alloc: &mut BlockIdAlloc, l1: &LoopB, l2: &LoopB) -> Result<LoopB, JitError> {
    debug_assert!(l1.rank >= 0 && l1.rank == l2.rank);
    let size = l1.size.min(l2.size);
    let rank = l1.rank as usize;
    let rebuild = |alloc: &mut BlockIdAlloc, l: &LoopB| -> Result<LoopB, JitError> {
        if l.size == size {
            return Ok(l.clone());
        }
        let instrs = split_instrs(l, size)?;
        let mut res = create_nested_block(alloc, &instrs, rank, BTreeSet::new());
        res.frees = l.all_frees();
        res.metadata_update();
        Ok(res)
    };
    let a = rebuild(alloc, l1)?;
    let b = rebuild(alloc, l2)?;
    merge(alloc, &a, &b)
}

/// Must `b` execute after `a`
pub fn depend_on(a: &LoopB, b: &LoopB) -> bool {
    let (a_instrs, b_instrs) = (a.all_instr(), b.all_instr());
    if a_instrs.iter().any(|x| b_instrs.iter().any(|y| instr_dependency(x, y))) {
        return true;
    }
    let (a_bases, b_bases) = (a.all_bases(), b.all_bases());
    a.all_frees().iter().any(|f| b_bases.contains(f)) || b.all_frees().iter().any(|f| a_bases.contains(f))
}

/// Number of leading ranks that can be executed in parallel, capped at `max_depth`,
/// and the total number of parallel iterations
pub fn parallel_ranks(block: &LoopB, max_depth: usize) -> (usize, i64) {
    let mut ranks = 0;
    let mut total = 1;
    let mut b = block;
    while b.sweeps.is_empty() && ranks < max_depth && b.rank >= 0 {
        ranks += 1;
        total *= b.size;
        match b.block_list.as_slice() {
            [Block::Loop(sub)] => b = sub,
            _ => break,
        }
    }
    (ranks, total)
}

/// Adds base into frees of innermost loop that accesses it last
fn attach_free(l: &mut LoopB, base: BaseId) {
    for blk in l.block_list.iter_mut().rev() {
        match blk {
            Block::Loop(sub) => {
                if sub.all_bases().contains(&base) {
                    attach_free(sub, base);
                    return;
                }
            }
            Block::Instr { instr, .. } => {
                if instr.bases().contains(&base) || instr.pointer_bases().contains(&base) {
                    break;
                }
            }
        }
    }
    l.frees.insert(base);
}

/// Builds kernels from instruction lists
#[derive(Debug, Default)]
pub struct FusionEngine {
    alloc: BlockIdAlloc,
    avoid_rank0_sweep: bool,
}

impl FusionEngine {
    /// New fusion engine
    pub fn new(avoid_rank0_sweep: bool) -> FusionEngine {
        FusionEngine { alloc: BlockIdAlloc::new(), avoid_rank0_sweep }
    }

    /// Block id allocator of this engine
    pub fn alloc(&mut self) -> &mut BlockIdAlloc {
        &mut self.alloc
    }

    /// One block per instruction, frees are attached to the block accessing the base last
    pub fn singleton(&mut self, instr_list: &[InstrPtr]) -> Vec<LoopB> {
        let mut blocks: Vec<LoopB> = Vec::new();
        for instr in instr_list {
            match instr.opcode {
                Opcode::Free => {
                    for base in instr.bases() {
                        match blocks.iter_mut().rev().find(|b| b.all_bases().contains(&base)) {
                            Some(b) => attach_free(b, base),
                            None => {
                                let mut b = LoopB::new(&mut self.alloc, 0, 1);
                                b.frees.insert(base);
                                blocks.push(b);
                            }
                        }
                    }
                }
                op if op.is_system() => {}
                _ => blocks.push(create_nested_block(&mut self.alloc, &[instr.clone()], 0, BTreeSet::new())),
            }
        }
        blocks
    }

    /// Merge consecutive mergeable blocks
    pub fn serial(&mut self, blocks: Vec<LoopB>) -> Result<Vec<LoopB>, JitError> {
        let mut res: Vec<LoopB> = Vec::with_capacity(blocks.len());
        for b in blocks {
            if let Some(last) = res.last_mut() {
                if mergeable(last, &b, self.avoid_rank0_sweep) {
                    *last = merge(&mut self.alloc, last, &b)?;
                    continue;
                }
            }
            res.push(b);
        }
        Ok(res)
    }

    /// Move blocks forward past independent blocks when they can merge with an earlier block
    pub fn greedy(&mut self, mut blocks: Vec<LoopB>) -> Result<Vec<LoopB>, JitError> {
        let mut i = 0;
        while i < blocks.len() {
            let mut j = i + 1;
            while j < blocks.len() {
                let movable = blocks[i + 1..j].iter().all(|k| !depend_on(k, &blocks[j]));
                if movable && mergeable(&blocks[i], &blocks[j], self.avoid_rank0_sweep) {
                    let b = blocks.remove(j);
                    blocks[i] = merge(&mut self.alloc, &blocks[i], &b)?;
                    continue;
                }
                j += 1;
            }
            i += 1;
        }
        Ok(blocks)
    }

    /// Fuse instructions into rank 0 blocks
    pub fn fuse(&mut self, instr_list: &[InstrPtr]) -> Result<Vec<LoopB>, JitError> {
        let blocks = self.singleton(instr_list);
        let n = blocks.len();
        let blocks = self.serial(blocks)?;
        let blocks = self.greedy(blocks)?;
        log::debug!("Fused {} instructions from {n} blocks into {} blocks", instr_list.len(), blocks.len());
        Ok(blocks)
    }

    /// Kernel of rank -1 containing given blocks
    pub fn kernel(&mut self, blocks: Vec<LoopB>) -> LoopB {
        LoopB::kernel(&mut self.alloc, blocks.into_iter().map(Block::Loop).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jitk_core::{dtype::DType, view::View};

    fn view(base: u32, start: i64, shape: &[i64]) -> View {
        let stride = jitk_core::view::contiguous_stride(shape);
        View::from_parts(BaseId::from(base), DType::Float32, start, shape.into(), stride).unwrap()
    }

    fn add(out: View, a: View, b: View) -> InstrPtr {
        Arc::new(Instruction::new(Opcode::Add, alloc::vec![out, a, b], None))
    }

    #[test]
    fn independent_adds_fuse() -> Result<(), JitError> {
        let mut engine = FusionEngine::new(false);
        let i1 = add(view(0, 0, &[10]), view(1, 0, &[10]), view(2, 0, &[10]));
        let i2 = add(view(3, 0, &[10]), view(1, 0, &[10]), view(2, 0, &[10]));
        let blocks = engine.fuse(&[i1.clone(), i2.clone()])?;
        assert_eq!(blocks.len(), 1);
        let b = &blocks[0];
        assert_eq!((b.rank, b.size), (0, 10));
        assert!(b.is_innermost());
        assert_eq!(b.local_instr().len(), 2);
        assert!(Arc::ptr_eq(&b.all_instr()[0], &i1));
        assert!(Arc::ptr_eq(&b.all_instr()[1], &i2));
        Ok(())
    }

    #[test]
    fn shifted_dependency_blocks_fusion() -> Result<(), JitError> {
        let mut engine = FusionEngine::new(false);
        // second reads the output of the first shifted by one element
        let i1 = add(view(0, 0, &[10]), view(1, 0, &[10]), view(2, 0, &[10]));
        let i2 = add(view(3, 0, &[10]), view(0, 1, &[10]), view(2, 0, &[10]));
        let blocks = engine.fuse(&[i1.clone(), i2.clone()])?;
        assert_eq!(blocks.len(), 2);
        assert!(depend_on(&blocks[0], &blocks[1]));
        // same view keeps the order inside one loop
        let i3 = add(view(3, 0, &[10]), view(0, 0, &[10]), view(2, 0, &[10]));
        let blocks = engine.fuse(&[i1.clone(), i3.clone()])?;
        assert_eq!(blocks.len(), 1);
        assert!(Arc::ptr_eq(&blocks[0].all_instr()[0], &i1));
        Ok(())
    }

    #[test]
    fn reduction_output_is_not_read_in_same_loop() -> Result<(), JitError> {
        let mut engine = FusionEngine::new(false);
        let r = Arc::new(Instruction::sweep(Opcode::AddReduce, view(0, 0, &[1]), view(1, 0, &[8]), 0));
        let bcast = View::from_parts(BaseId::from(0), DType::Float32, 0, alloc::vec![8], alloc::vec![0])?;
        let m = add(view(2, 0, &[8]), view(1, 0, &[8]), bcast);
        let blocks = engine.singleton(&[r, m]);
        assert!(!mergeable(&blocks[0], &blocks[1], false));
        Ok(())
    }

    #[test]
    fn avoid_rank0_sweep() {
        let mut engine = FusionEngine::new(true);
        let r = Arc::new(Instruction::sweep(Opcode::AddReduce, view(0, 0, &[1]), view(1, 0, &[8]), 0));
        let e = add(view(2, 0, &[8]), view(1, 0, &[8]), view(3, 0, &[8]));
        let blocks = engine.singleton(&[r, e]);
        assert!(!mergeable(&blocks[0], &blocks[1], true));
        assert!(mergeable(&blocks[0], &blocks[1], false));
    }

    #[test]
    fn merge_keeps_instruction_order() -> Result<(), JitError> {
        let mut engine = FusionEngine::new(false);
        let instrs = [
            add(view(0, 0, &[4, 6]), view(1, 0, &[4, 6]), view(2, 0, &[4, 6])),
            Arc::new(Instruction::sweep(Opcode::MaximumReduce, view(3, 0, &[4]), view(0, 0, &[4, 6]), 1)),
            add(view(4, 0, &[4, 6]), view(1, 0, &[4, 6]), view(2, 0, &[4, 6])),
            add(view(5, 0, &[4]), view(3, 0, &[4]), view(6, 0, &[4])),
        ];
        let blocks = engine.singleton(&instrs);
        let mut acc = blocks[0].clone();
        for b in &blocks[1..] {
            if mergeable(&acc, b, false) {
                let expected: Vec<InstrPtr> = acc.all_instr().into_iter().chain(b.all_instr()).collect();
                acc = merge(engine.alloc(), &acc, b)?;
                let got = acc.all_instr();
                assert_eq!(got.len(), expected.len());
                assert!(got.iter().zip(&expected).all(|(x, y)| Arc::ptr_eq(x, y)));
                assert!(acc.validation());
            }
        }
        assert_eq!(acc.all_instr().len(), 4);
        Ok(())
    }

    #[test]
    fn reshape_merge_of_flat_and_2d() -> Result<(), JitError> {
        let mut engine = FusionEngine::new(false);
        let flat = add(view(0, 0, &[12]), view(1, 0, &[12]), view(2, 0, &[12]));
        let nd = add(view(3, 0, &[3, 4]), view(4, 0, &[3, 4]), view(5, 0, &[3, 4]));
        let blocks = engine.singleton(&[flat, nd]);
        assert!(mergeable(&blocks[0], &blocks[1], false));
        let m = merge(engine.alloc(), &blocks[0], &blocks[1])?;
        assert_eq!((m.rank, m.size), (0, 3));
        assert_eq!(m.local_sub_blocks().len(), 1);
        assert_eq!(m.local_sub_blocks()[0].size, 4);
        assert_eq!(m.all_instr()[0].operand[0].shape, [3, 4]);
        Ok(())
    }

    #[test]
    fn greedy_moves_independent_block() -> Result<(), JitError> {
        let mut engine = FusionEngine::new(false);
        let a = add(view(0, 0, &[8]), view(1, 0, &[8]), view(2, 0, &[8]));
        let b = add(view(3, 0, &[5]), view(4, 0, &[5]), view(4, 0, &[5]));
        let c = add(view(5, 0, &[8]), view(1, 0, &[8]), view(6, 0, &[8]));
        let blocks = engine.fuse(&[a, b, c])?;
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0].all_instr().len(), 2);
        Ok(())
    }

    #[test]
    fn frees_attach_to_last_access() {
        let mut engine = FusionEngine::new(false);
        let t = Arc::new(Instruction::new(Opcode::Identity, alloc::vec![view(3, 0, &[2, 5]), view(1, 0, &[2, 5])], None));
        let free = Arc::new(Instruction::free(view(3, 0, &[10])));
        let orphan = Arc::new(Instruction::free(view(9, 0, &[10])));
        let blocks = engine.singleton(&[t, free, orphan]);
        assert_eq!(blocks.len(), 2);
        assert!(blocks[0].local_sub_blocks()[0].frees.contains(&BaseId::from(3)));
        assert!(blocks[1].is_system_only());
        assert!(blocks[1].frees.contains(&BaseId::from(9)));
    }

    #[test]
    fn parallel_ranks_stop_at_sweep() {
        let mut engine = FusionEngine::new(false);
        let e = add(view(0, 0, &[2, 3, 4, 5]), view(1, 0, &[2, 3, 4, 5]), view(2, 0, &[2, 3, 4, 5]));
        let blocks = engine.singleton(&[e]);
        assert_eq!(parallel_ranks(&blocks[0], 3), (3, 24));
        let r = Arc::new(Instruction::sweep(Opcode::AddReduce, view(0, 0, &[2]), view(1, 0, &[2, 7]), 1));
        let blocks = engine.singleton(&[r]);
        assert_eq!(parallel_ranks(&blocks[0], 3), (1, 2));
    }
}
