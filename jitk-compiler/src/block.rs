//! Loop nest intermediate representation.
//!
//! A kernel is a [LoopB] of rank -1 and size 1. Each [LoopB] of rank `r`
//! iterates over axis `r` of the instructions it contains.

use alloc::{collections::BTreeSet, string::String, vec::Vec};
use core::fmt::{Display, Formatter, Write};
use jitk_core::{
    base::BaseId,
    instruction::{InstrPtr, Instruction},
    opcode::Opcode,
};

/// Id of loop block, unique within one [BlockIdAlloc]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BlockId(u32);

impl From<BlockId> for u32 {
    fn from(value: BlockId) -> Self {
        value.0
    }
}

/// Issues sequential block ids
#[derive(Debug, Default)]
pub struct BlockIdAlloc {
    next: u32,
}

impl BlockIdAlloc {
    /// New allocator starting at zero
    pub fn new() -> Self {
        Self::default()
    }

    /// Next id
    pub fn next_id(&mut self) -> BlockId {
        let id = BlockId(self.next);
        self.next += 1;
        id
    }
}

/// Node of the loop nest, either a loop or a single instruction
#[derive(Debug, Clone)]
pub enum Block {
    /// Loop over one axis
    Loop(LoopB),
    /// Instruction executed in the loop of given rank
    Instr {
        /// The instruction
        instr: InstrPtr,
        /// Rank of the enclosing loop
        rank: i32,
    },
}

/// Loop over one axis
#[derive(Debug, Clone)]
pub struct LoopB {
    /// Unique id
    pub id: BlockId,
    /// Nesting depth, -1 is the whole kernel
    pub rank: i32,
    /// Number of iterations
    pub size: i64,
    /// Children in execution order
    pub block_list: Vec<Block>,
    /// Reductions and accumulates over the axis of this loop
    pub sweeps: Vec<InstrPtr>,
    /// Bases created within this loop
    pub news: BTreeSet<BaseId>,
    /// Bases freed after this loop
    pub frees: BTreeSet<BaseId>,
    /// All instructions can be reshaped
    pub reshapable: bool,
}

impl PartialEq for LoopB {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for LoopB {}

impl Block {
    /// Rank of the block
    pub fn rank(&self) -> i32 {
        match self {
            Block::Loop(l) => l.rank,
            Block::Instr { rank, .. } => *rank,
        }
    }

    /// Get loop, None for instruction leaves
    pub fn as_loop(&self) -> Option<&LoopB> {
        match self {
            Block::Loop(l) => Some(l),
            Block::Instr { .. } => None,
        }
    }

    /// All instructions in this subtree in execution order
    pub fn all_instr(&self) -> Vec<InstrPtr> {
        let mut res = Vec::new();
        self.collect_instr(&mut res);
        res
    }

    fn collect_instr(&self, res: &mut Vec<InstrPtr>) {
        match self {
            Block::Loop(l) => {
                for b in &l.block_list {
                    b.collect_instr(res);
                }
            }
            Block::Instr { instr, .. } => res.push(instr.clone()),
        }
    }

    /// Contains only system instructions
    pub fn is_system_only(&self) -> bool {
        match self {
            Block::Loop(l) => l.is_system_only(),
            Block::Instr { instr, .. } => instr.opcode.is_system(),
        }
    }
}

/// Size of the iteration space along rank, scalars iterate once
fn iter_size(instr: &Instruction, rank: usize) -> i64 {
    instr.dominating_shape().get(rank).copied().unwrap_or(1)
}

impl LoopB {
    /// Empty loop
    pub fn new(alloc: &mut BlockIdAlloc, rank: i32, size: i64) -> LoopB {
        LoopB {
            id: alloc.next_id(),
            rank,
            size,
            block_list: Vec::new(),
            sweeps: Vec::new(),
            news: BTreeSet::new(),
            frees: BTreeSet::new(),
            reshapable: false,
        }
    }

    /// Kernel block of rank -1 containing given blocks
    pub fn kernel(alloc: &mut BlockIdAlloc, block_list: Vec<Block>) -> LoopB {
        let mut kernel = LoopB::new(alloc, -1, 1);
        kernel.block_list = block_list;
        kernel.metadata_update();
        kernel
    }

    /// Recompute sweeps, news and reshapable flag
    pub fn metadata_update(&mut self) {
        let instrs = self.all_instr();
        self.sweeps = instrs
            .iter()
            .filter(|i| i.sweep_axis().is_some_and(|s| s as i32 == self.rank))
            .cloned()
            .collect();
        self.news = instrs.iter().filter(|i| i.constructor).filter_map(|i| i.output_base()).collect();
        self.reshapable = instrs.iter().filter(|i| !i.opcode.is_system()).all(|i| i.reshapable());
    }

    /// All instructions in this subtree in execution order
    pub fn all_instr(&self) -> Vec<InstrPtr> {
        let mut res = Vec::new();
        for b in &self.block_list {
            b.collect_instr(&mut res);
        }
        res
    }

    /// Instructions that are direct children of this loop
    pub fn local_instr(&self) -> Vec<InstrPtr> {
        self.block_list
            .iter()
            .filter_map(|b| match b {
                Block::Instr { instr, .. } => Some(instr.clone()),
                Block::Loop(_) => None,
            })
            .collect()
    }

    /// Loops that are direct children of this loop
    pub fn local_sub_blocks(&self) -> Vec<&LoopB> {
        self.block_list.iter().filter_map(Block::as_loop).collect()
    }

    /// All loops in this subtree, self excluded, in pre-order
    pub fn all_sub_blocks(&self) -> Vec<&LoopB> {
        let mut res = Vec::new();
        for l in self.local_sub_blocks() {
            res.push(l);
            res.extend(l.all_sub_blocks());
        }
        res
    }

    /// Does not contain loops
    pub fn is_innermost(&self) -> bool {
        self.block_list.iter().all(|b| matches!(b, Block::Instr { .. }))
    }

    /// Contains only system instructions
    pub fn is_system_only(&self) -> bool {
        self.all_instr().iter().all(|i| i.opcode.is_system())
    }

    /// All bases accessed in this subtree, including freed bases and index arrays
    pub fn all_bases(&self) -> BTreeSet<BaseId> {
        let mut res = self.all_frees();
        for instr in self.all_instr() {
            res.extend(instr.bases());
            res.extend(instr.pointer_bases());
        }
        res
    }

    /// Bases created in this subtree
    pub fn all_news(&self) -> BTreeSet<BaseId> {
        let mut res = self.news.clone();
        for l in self.all_sub_blocks() {
            res.extend(l.news.iter().copied());
        }
        res
    }

    /// Bases freed in this subtree
    pub fn all_frees(&self) -> BTreeSet<BaseId> {
        let mut res = self.frees.clone();
        for l in self.all_sub_blocks() {
            res.extend(l.frees.iter().copied());
        }
        res
    }

    /// Bases created and freed in this subtree, they need no memory outside of it
    pub fn all_temps(&self) -> BTreeSet<BaseId> {
        let news = self.all_news();
        self.all_frees().into_iter().filter(|b| news.contains(b)).collect()
    }

    /// Temporaries accessed only by direct children of this loop
    pub fn local_temps(&self) -> BTreeSet<BaseId> {
        let deeper: BTreeSet<BaseId> = self
            .local_sub_blocks()
            .iter()
            .flat_map(|l| l.all_bases())
            .collect();
        self.all_temps().into_iter().filter(|b| !deeper.contains(b)).collect()
    }

    /// Bases that must live in memory outside of this subtree
    pub fn all_non_temps(&self) -> BTreeSet<BaseId> {
        let temps = self.all_temps();
        self.all_bases().into_iter().filter(|b| !temps.contains(b)).collect()
    }

    /// Number of iterations that can run in parallel
    pub fn local_threading(&self) -> i64 {
        if self.sweeps.is_empty() && self.rank >= 0 {
            self.size
        } else {
            1
        }
    }

    /// Replace every occurrence of `old` by `new`
    pub fn replace_instr(&mut self, old: &InstrPtr, new: InstrPtr) {
        for b in self.block_list.iter_mut() {
            match b {
                Block::Loop(l) => l.replace_instr(old, new.clone()),
                Block::Instr { instr, .. } => {
                    if alloc::sync::Arc::ptr_eq(instr, old) {
                        *instr = new.clone();
                    }
                }
            }
        }
        self.metadata_update();
    }

    /// Last instruction accessing base and the loop that contains it.
    /// With None any instruction matches.
    pub fn find_last_access_by(&self, base: Option<BaseId>) -> Option<(&LoopB, &InstrPtr)> {
        for b in self.block_list.iter().rev() {
            match b {
                Block::Loop(l) => {
                    if let Some(res) = l.find_last_access_by(base) {
                        return Some(res);
                    }
                }
                Block::Instr { instr, .. } => {
                    let accessed = match base {
                        Some(base) => instr.bases().contains(&base) || instr.pointer_bases().contains(&base),
                        None => true,
                    };
                    if accessed {
                        return Some((self, instr));
                    }
                }
            }
        }
        None
    }

    /// Check structural invariants of the subtree
    pub fn validation(&self) -> bool {
        for b in &self.block_list {
            match b {
                Block::Loop(l) => {
                    if l.rank != self.rank + 1 || l.size < 0 || !l.validation() {
                        return false;
                    }
                }
                Block::Instr { instr, rank } => {
                    if *rank != self.rank || instr.opcode == Opcode::Free {
                        return false;
                    }
                    if self.rank >= 0 && iter_size(instr, self.rank as usize) != self.size && !instr.opcode.is_system() {
                        return false;
                    }
                }
            }
        }
        true
    }

    /// Pretty print with indentation
    pub fn pprint(&self, indent: usize) -> String {
        let mut res = String::new();
        let pad = " ".repeat(indent);
        let _ = write!(res, "{pad}rank: {}, id: {}, size: {}", self.rank, self.id.0, self.size);
        if !self.sweeps.is_empty() {
            let _ = write!(res, ", sweeps: {{");
            for s in &self.sweeps {
                let _ = write!(res, " {}", s.opcode);
            }
            res.push_str(" }");
        }
        if self.reshapable {
            res.push_str(", reshapable");
        }
        if !self.news.is_empty() {
            let _ = write!(res, ", news: {:?}", self.news.iter().map(|b| u32::from(*b)).collect::<Vec<_>>());
        }
        if !self.frees.is_empty() {
            let _ = write!(res, ", frees: {:?}", self.frees.iter().map(|b| u32::from(*b)).collect::<Vec<_>>());
        }
        res.push('\n');
        for b in &self.block_list {
            match b {
                Block::Loop(l) => res.push_str(&l.pprint(indent + 4)),
                Block::Instr { instr, .. } => {
                    let _ = writeln!(res, "{pad}    {instr}");
                }
            }
        }
        res
    }
}

impl Display for LoopB {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.pprint(0))
    }
}

/// Build loop nest from `rank` down to the innermost axis.
/// Instructions must share the iteration space from `rank` on.
/// Frees are attached to the innermost loop.
pub fn create_nested_block(alloc: &mut BlockIdAlloc, instr_list: &[InstrPtr], rank: usize, frees: BTreeSet<BaseId>) -> LoopB {
    let size = instr_list
        .iter()
        .find(|i| !i.opcode.is_system())
        .map_or(1, |i| iter_size(i, rank));
    create_nested_block_sized(alloc, instr_list, rank, size, frees)
}

/// Build loop nest of rank `rank` with explicit size
pub fn create_nested_block_sized(
    alloc: &mut BlockIdAlloc,
    instr_list: &[InstrPtr],
    rank: usize,
    size: i64,
    frees: BTreeSet<BaseId>,
) -> LoopB {
    let mut ret = LoopB::new(alloc, rank as i32, size);
    let mut frees = Some(frees);
    // Consecutive instructions iterating deeper with equal size share one inner loop
    let mut inner: Vec<InstrPtr> = Vec::new();
    let flush = |inner: &mut Vec<InstrPtr>, ret: &mut LoopB, alloc: &mut BlockIdAlloc, last: bool, frees: &mut Option<BTreeSet<BaseId>>| {
        if inner.is_empty() {
            return;
        }
        let f = if last { frees.take().unwrap_or_default() } else { BTreeSet::new() };
        let child = create_nested_block(alloc, inner, rank + 1, f);
        ret.block_list.push(Block::Loop(child));
        inner.clear();
    };
    let n = instr_list.iter().filter(|i| !i.opcode.is_system()).count();
    let mut seen = 0;
    for instr in instr_list {
        if instr.opcode.is_system() {
            continue;
        }
        seen += 1;
        if instr.ndim() <= rank + 1 {
            flush(&mut inner, &mut ret, alloc, false, &mut frees);
            ret.block_list.push(Block::Instr { instr: instr.clone(), rank: rank as i32 });
        } else {
            if let Some(first) = inner.first() {
                if iter_size(first, rank + 1) != iter_size(instr, rank + 1) {
                    flush(&mut inner, &mut ret, alloc, false, &mut frees);
                }
            }
            inner.push(instr.clone());
        }
        if seen == n {
            // Frees go into the innermost loop only if it ends this block
            let last_is_inner = !inner.is_empty();
            flush(&mut inner, &mut ret, alloc, last_is_inner, &mut frees);
        }
    }
    if let Some(f) = frees {
        ret.frees = f;
    }
    ret.metadata_update();
    ret
}

/// First iteration of a sweeping loop as separate blocks, followed by the remaining iterations.
/// Reductions and accumulates over the loop axis become [Opcode::Identity] in the first iteration.
/// The remaining loop is None when the loop has a single iteration.
pub fn peel_first_iteration(alloc: &mut BlockIdAlloc, l: &LoopB) -> (Vec<Block>, Option<LoopB>) {
    debug_assert!(l.rank >= 0);
    let axis = l.rank as usize;
    let mut first = Vec::new();
    let mut run: Vec<InstrPtr> = Vec::new();
    let flush = |run: &mut Vec<InstrPtr>, first: &mut Vec<Block>, alloc: &mut BlockIdAlloc| {
        if !run.is_empty() {
            first.push(Block::Loop(create_nested_block(alloc, run, axis, BTreeSet::new())));
            run.clear();
        }
    };
    for b in &l.block_list {
        match b {
            Block::Instr { instr, .. } => {
                flush(&mut run, &mut first, alloc);
                first.push(Block::Instr {
                    instr: alloc::sync::Arc::new(instr.slice_axis(axis, 0)),
                    rank: l.rank - 1,
                });
            }
            Block::Loop(sub) => {
                for instr in sub.all_instr() {
                    run.push(alloc::sync::Arc::new(instr.slice_axis(axis, 0)));
                }
                flush(&mut run, &mut first, alloc);
            }
        }
    }
    if l.size <= 1 {
        // Frees of a single iteration loop take effect after its only iteration
        if !l.all_frees().is_empty() {
            let mut holder = LoopB::new(alloc, l.rank, 0);
            holder.frees = l.all_frees();
            first.push(Block::Loop(holder));
        }
        return (first, None);
    }
    let mut rest = l.clone();
    rest.id = alloc.next_id();
    rest.size -= 1;
    advance(&mut rest, axis);
    rest.metadata_update();
    (first, Some(rest))
}

fn advance(l: &mut LoopB, axis: usize) {
    for b in l.block_list.iter_mut() {
        match b {
            Block::Loop(sub) => {
                advance(sub, axis);
                sub.metadata_update();
            }
            Block::Instr { instr, .. } => *instr = alloc::sync::Arc::new(instr.advance_axis(axis)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::sync::Arc;
    use jitk_core::{dtype::DType, view::View};

    fn view(base: u32, start: i64, shape: &[i64]) -> View {
        let stride = jitk_core::view::contiguous_stride(shape);
        View::from_parts(BaseId::from(base), DType::Float32, start, shape.into(), stride).unwrap()
    }

    #[test]
    fn nested_block_of_2d_instruction() {
        let mut alloc = BlockIdAlloc::new();
        let add = Arc::new(Instruction::new(Opcode::Add, alloc::vec![view(0, 0, &[3, 4]), view(1, 0, &[3, 4]), view(2, 0, &[3, 4])], None));
        let frees = [BaseId::from(2)].into_iter().collect();
        let b = create_nested_block(&mut alloc, &[add.clone()], 0, frees);
        assert_eq!((b.rank, b.size), (0, 3));
        assert!(b.frees.is_empty());
        let inner = b.local_sub_blocks()[0];
        assert_eq!((inner.rank, inner.size), (1, 4));
        assert!(inner.frees.contains(&BaseId::from(2)));
        assert!(b.validation());
        assert!(b.reshapable);
        assert!(Arc::ptr_eq(&b.all_instr()[0], &add));
        assert_eq!(b.find_last_access_by(Some(BaseId::from(1))).map(|(l, _)| l.rank), Some(1));
        assert!(b.find_last_access_by(Some(BaseId::from(7))).is_none());
    }

    #[test]
    fn sweeps_and_temps() {
        let mut alloc = BlockIdAlloc::new();
        let t = Arc::new(Instruction::new(Opcode::Identity, alloc::vec![view(3, 0, &[2, 5]), view(1, 0, &[2, 5])], None).as_constructor());
        let r = Arc::new(Instruction::sweep(Opcode::AddReduce, view(0, 0, &[2]), view(3, 0, &[2, 5]), 1));
        let frees = [BaseId::from(3)].into_iter().collect();
        let b = create_nested_block(&mut alloc, &[t, r], 0, frees);
        assert!(b.sweeps.is_empty());
        assert_eq!(b.local_sub_blocks()[0].sweeps.len(), 1);
        assert!(b.all_temps().contains(&BaseId::from(3)));
        assert!(b.local_sub_blocks()[0].local_temps().contains(&BaseId::from(3)));
        assert!(b.all_non_temps().contains(&BaseId::from(0)));
        assert!(!b.reshapable);
        assert_eq!(b.local_threading(), 2);
    }

    #[test]
    fn peel_scalar_reduction() {
        let mut alloc = BlockIdAlloc::new();
        let r = Arc::new(Instruction::sweep(Opcode::AddReduce, view(0, 0, &[1]), view(1, 0, &[5]), 0));
        let b = create_nested_block(&mut alloc, &[r], 0, BTreeSet::new());
        assert_eq!(b.sweeps.len(), 1);
        let (first, rest) = peel_first_iteration(&mut alloc, &b);
        assert_eq!(first.len(), 1);
        let Block::Instr { instr, rank } = &first[0] else { panic!() };
        assert_eq!((instr.opcode, *rank), (Opcode::Identity, -1));
        let rest = rest.unwrap();
        assert_eq!(rest.size, 4);
        let instr = &rest.all_instr()[0];
        assert_eq!(instr.opcode, Opcode::AddReduce);
        assert_eq!((instr.operand[1].start, instr.operand[1].shape.as_slice()), (1, [4].as_slice()));
    }
}
