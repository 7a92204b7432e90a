//! Splitting of programs whose views are addressed by arrays written in the same program

use crate::{
    base::BaseId,
    instruction::{InstrPtr, Instruction},
    opcode::Opcode,
};
use alloc::{collections::BTreeMap, collections::BTreeSet, vec::Vec};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum IndexState {
    Read,
    Written,
}

/// Bases used to address other arrays: index arrays of views and
/// index operands of gather and scatter
fn index_reads(instr: &Instruction) -> BTreeSet<BaseId> {
    let mut res = instr.pointer_bases();
    if instr.opcode.is_indirect() {
        if let Some(base) = instr.operand.get(2).and_then(|v| v.base) {
            res.insert(base);
        }
    }
    res
}

/// Split instructions into ordered partitions such that no partition
/// uses an index base after writing it.
/// Frees of index bases are moved right after the last instruction using the base.
pub fn bhir_splitter(instr_list: &[InstrPtr]) -> Vec<Vec<InstrPtr>> {
    let index_bases: BTreeSet<BaseId> = instr_list.iter().flat_map(|i| index_reads(i)).collect();
    let mut partitions: Vec<Vec<InstrPtr>> = Vec::new();
    let mut current: Vec<InstrPtr> = Vec::new();
    let mut state: BTreeMap<BaseId, IndexState> = BTreeMap::new();
    let mut deferred_frees: Vec<InstrPtr> = Vec::new();

    for instr in instr_list {
        if instr.opcode == Opcode::Free && instr.bases().iter().any(|b| index_bases.contains(b)) {
            deferred_frees.push(instr.clone());
            continue;
        }
        let reads = index_reads(instr);
        if reads.iter().any(|b| state.get(b) == Some(&IndexState::Written)) {
            partitions.push(core::mem::take(&mut current));
            state.clear();
        }
        for b in reads {
            state.entry(b).or_insert(IndexState::Read);
        }
        if let Some(out) = instr.output_base() {
            if index_bases.contains(&out) {
                state.insert(out, IndexState::Written);
            }
        }
        current.push(instr.clone());
    }
    if !current.is_empty() || partitions.is_empty() {
        partitions.push(current);
    }

    for free in deferred_frees {
        let freed = free.bases();
        let last_use = partitions.iter().enumerate().rev().find_map(|(p, part)| {
            part.iter()
                .rposition(|i| i.bases().iter().chain(index_reads(i).iter()).any(|b| freed.contains(b)))
                .map(|pos| (p, pos))
        });
        match last_use {
            Some((p, pos)) => partitions[p].insert(pos + 1, free),
            None => {
                if let Some(last) = partitions.last_mut() {
                    last.push(free);
                }
            }
        }
    }
    log::debug!("Split program of {} instructions into {} partitions", instr_list.len(), partitions.len());
    partitions
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{dtype::DType, view::View};
    use alloc::sync::Arc;

    #[test]
    fn gather_after_index_write() {
        let (x, a, out, y) = (BaseId::from(0), BaseId::from(1), BaseId::from(2), BaseId::from(3));
        let xv = View::new(x, DType::Int64, 4);
        let write_x = Arc::new(Instruction::new(Opcode::Range, alloc::vec![xv.clone()], None));
        let gather = Arc::new(Instruction::new(
            Opcode::Gather,
            alloc::vec![View::new(out, DType::Float32, 4), View::new(a, DType::Float32, 8), xv.clone()],
            None,
        ));
        let other = Arc::new(Instruction::new(
            Opcode::Identity,
            alloc::vec![View::new(y, DType::Float32, 4), View::new(a, DType::Float32, 4)],
            None,
        ));
        let free_x = Arc::new(Instruction::free(xv));
        let parts = bhir_splitter(&[write_x.clone(), free_x.clone(), other.clone(), gather.clone()]);
        assert_eq!(parts.len(), 2);
        assert!(Arc::ptr_eq(&parts[0][0], &write_x));
        assert!(Arc::ptr_eq(&parts[0][1], &other));
        assert!(Arc::ptr_eq(&parts[1][0], &gather));
        assert!(Arc::ptr_eq(&parts[1][1], &free_x));
    }

    #[test]
    fn no_split_without_index_writes() {
        let a = View::new(BaseId::from(0), DType::Float32, 4);
        let b = View::new(BaseId::from(1), DType::Float32, 4);
        let instr = Arc::new(Instruction::new(Opcode::Identity, alloc::vec![a, b], None));
        let parts = bhir_splitter(&[instr.clone(), instr]);
        assert_eq!(parts.len(), 1);
        assert_eq!(parts[0].len(), 2);
    }
}
