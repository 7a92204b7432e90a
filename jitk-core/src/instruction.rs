use crate::{
    base::BaseId,
    constant::Constant,
    dtype::DType,
    error::JitError,
    opcode::Opcode,
    view::View,
};
use alloc::{collections::BTreeSet, format, sync::Arc, vec::Vec};
use core::fmt::{Display, Formatter};

/// Instruction: opcode, operands (output first) and optional constant.
/// Instructions are immutable once shared, see [InstrPtr].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instruction {
    /// Operation
    pub opcode: Opcode,
    /// Operands, output first
    pub operand: Vec<View>,
    /// Constant, for reductions and accumulates this is the sweep axis
    pub constant: Option<Constant>,
    /// Output base is created by this instruction
    pub constructor: bool,
}

/// Shared pointer to immutable instruction
pub type InstrPtr = Arc<Instruction>;

impl Instruction {
    /// New instruction
    pub fn new(opcode: Opcode, operand: Vec<View>, constant: Option<Constant>) -> Instruction {
        Instruction { opcode, operand, constant, constructor: false }
    }

    /// Copy of this instruction marked as the constructor of its output base
    pub fn as_constructor(&self) -> Instruction {
        Instruction { constructor: true, ..self.clone() }
    }

    /// Reduction or accumulate of `input` over `axis` into `out`
    pub fn sweep(opcode: Opcode, out: View, input: View, axis: usize) -> Instruction {
        debug_assert!(opcode.is_sweep());
        Instruction {
            opcode,
            operand: alloc::vec![out, input, View::constant(DType::Int64)],
            constant: Some(Constant::I64(axis as i64)),
            constructor: false,
        }
    }

    /// Free of base
    pub fn free(view: View) -> Instruction {
        Instruction { opcode: Opcode::Free, operand: alloc::vec![view], constant: None, constructor: false }
    }

    /// Axis of reduction or accumulate
    pub fn sweep_axis(&self) -> Option<usize> {
        if self.opcode.is_sweep() {
            self.constant.map(|c| c.as_i64() as usize)
        } else {
            None
        }
    }

    /// Shape of the iteration space of this instruction
    pub fn dominating_shape(&self) -> &[i64] {
        if self.opcode.is_system() || self.operand.is_empty() {
            return &[];
        }
        if self.opcode.is_sweep() || matches!(self.opcode, Opcode::Scatter | Opcode::CondScatter) {
            if let Some(v) = self.operand.get(1) {
                return &v.shape;
            }
        }
        &self.operand[0].shape
    }

    /// Number of dimensions of the iteration space
    pub fn ndim(&self) -> usize {
        self.dominating_shape().len()
    }

    /// Bases accessed through operands
    pub fn bases(&self) -> BTreeSet<BaseId> {
        self.operand.iter().filter_map(|v| v.base).collect()
    }

    /// Bases read to compute start, shape or strides of operands
    pub fn pointer_bases(&self) -> BTreeSet<BaseId> {
        self.operand
            .iter()
            .flat_map(|v| [v.start_pointer, v.shape_pointer, v.stride_pointer])
            .flatten()
            .collect()
    }

    /// Base of the output operand
    pub fn output_base(&self) -> Option<BaseId> {
        self.operand.first().and_then(|v| v.base)
    }

    /// DType of operand, constants use the dtype of the constant
    pub fn operand_type(&self, i: usize) -> DType {
        let view = &self.operand[i];
        match (view.base, self.constant) {
            (None, Some(c)) if !self.opcode.is_sweep() => c.dtype(),
            _ => view.dtype,
        }
    }

    /// Does any operand use a constant
    pub fn has_constant(&self) -> bool {
        self.operand.iter().any(View::is_constant)
    }

    /// Can the iteration space be reshaped
    pub fn reshapable(&self) -> bool {
        if !self.opcode.is_reshapable() {
            return false;
        }
        let shape = self.dominating_shape();
        self.operand
            .iter()
            .filter(|v| !v.is_constant())
            .all(|v| v.shape == shape && !v.uses_pointer() && !v.is_sliding())
    }

    /// New instruction with all operands reshaped into shape
    pub fn reshape(&self, shape: &[i64]) -> Result<Instruction, JitError> {
        if !self.reshapable() {
            return Err(JitError::invalid_argument(format!("instruction {self} is not reshapable")));
        }
        let mut res = self.clone();
        for v in res.operand.iter_mut().filter(|v| !v.is_constant()) {
            *v = v.simplify_to_shape(shape)?;
        }
        Ok(res)
    }

    /// New instruction with axis removed from all operands.
    /// The axis must not be the sweep axis.
    pub fn remove_axis(&self, axis: usize) -> Instruction {
        let mut res = self.clone();
        let sweep_axis = self.sweep_axis();
        debug_assert_ne!(sweep_axis, Some(axis));
        for (i, v) in res.operand.iter_mut().enumerate() {
            if v.is_constant() {
                continue;
            }
            let mut a = axis;
            // Reduction output has the sweep axis removed already
            if i == 0 && self.opcode.is_reduction() {
                if let Some(s) = sweep_axis {
                    if axis > s {
                        a -= 1;
                    }
                }
            }
            if a < v.ndim() {
                v.remove_axis(a);
            }
        }
        if let Some(s) = sweep_axis {
            if axis < s {
                res.constant = Some(Constant::I64(s as i64 - 1));
            }
        }
        res
    }

    /// New instruction with two axes swapped in all operands
    pub fn transposed(&self, a: usize, b: usize) -> Result<Instruction, JitError> {
        if self.opcode.is_reduction() {
            return Err(JitError::invalid_argument(format!("can not transpose reduction {self}")));
        }
        let mut res = self.clone();
        for v in res.operand.iter_mut().filter(|v| !v.is_constant()) {
            if a >= v.ndim() || b >= v.ndim() {
                return Err(JitError::invalid_argument(format!("can not transpose axes {a} and {b} of {v}")));
            }
            v.transpose(a, b);
        }
        if let Some(s) = self.sweep_axis() {
            let s = if s == a { b } else if s == b { a } else { s };
            res.constant = Some(Constant::I64(s as i64));
        }
        Ok(res)
    }

    /// Axis of operand `i` iterated by loop over `axis` of the iteration space.
    /// None if the operand does not follow that loop.
    pub fn operand_axis(&self, i: usize, axis: usize) -> Option<usize> {
        let v = &self.operand[i];
        if v.is_constant() || self.indirect_operand(i) {
            return None;
        }
        if i == 0 && self.opcode.is_reduction() {
            let s = self.sweep_axis()?;
            let ndim_in = self.operand.get(1).map_or(0, View::ndim);
            return if axis == s {
                None
            } else if v.ndim() + 1 == ndim_in && axis > s {
                Some(axis - 1)
            } else if axis < v.ndim() {
                Some(axis)
            } else {
                None
            };
        }
        (axis < v.ndim()).then_some(axis)
    }

    /// Instruction executed at one index of `axis`, the axis is removed.
    /// Reductions and accumulates over `axis` become [Opcode::Identity].
    pub fn slice_axis(&self, axis: usize, index: i64) -> Instruction {
        let mut res = self.clone();
        for i in 0..self.operand.len() {
            if let Some(a) = self.operand_axis(i, axis) {
                res.operand[i].slice_axis(a, index);
            }
        }
        if let Some(s) = self.sweep_axis() {
            if s == axis {
                res.opcode = Opcode::Identity;
                res.operand.truncate(2);
                res.constant = None;
            } else if axis < s {
                res.constant = Some(Constant::I64(s as i64 - 1));
            }
        }
        res
    }

    /// Instruction with the first index of `axis` skipped
    pub fn advance_axis(&self, axis: usize) -> Instruction {
        let mut res = self.clone();
        for i in 0..self.operand.len() {
            if let Some(a) = self.operand_axis(i, axis) {
                let v = &mut res.operand[i];
                v.start += v.stride[a];
                v.shape[a] -= 1;
            }
        }
        res
    }

    /// Result depends on the position in the iteration space, not only on operand values
    pub fn is_position_dependent(&self) -> bool {
        matches!(self.opcode, Opcode::Range | Opcode::Random)
    }

    /// Views written at positions given by values of another array,
    /// or read that way. These are treated as accessing the whole base.
    pub fn indirect_operand(&self, i: usize) -> bool {
        match self.opcode {
            Opcode::Gather => i == 1,
            Opcode::Scatter | Opcode::CondScatter => i == 0,
            _ => false,
        }
    }
}

fn overlap(a: &Instruction, ai: usize, b: &Instruction, bi: usize) -> bool {
    let (va, vb) = (&a.operand[ai], &b.operand[bi]);
    if va.is_constant() || vb.is_constant() {
        return false;
    }
    if a.indirect_operand(ai) || b.indirect_operand(bi) {
        return va.base == vb.base;
    }
    !va.disjoint(vb)
}

/// Returns true if `b` must execute after `a`: true, anti or output dependency through
/// overlapping views, dependency through index arrays, or free of an accessed base.
pub fn instr_dependency(a: &Instruction, b: &Instruction) -> bool {
    if a.opcode == Opcode::None || b.opcode == Opcode::None {
        return false;
    }
    if a.opcode.is_system() || b.opcode.is_system() {
        let (ba, bb) = (a.bases(), b.bases());
        if ba.intersection(&bb).next().is_some() {
            return true;
        }
    }
    if a.operand.is_empty() || b.operand.is_empty() {
        return false;
    }
    // Writes of one instruction used to address views of the other
    if let Some(out) = a.output_base() {
        if b.pointer_bases().contains(&out) {
            return true;
        }
    }
    if let Some(out) = b.output_base() {
        if a.pointer_bases().contains(&out) {
            return true;
        }
    }
    (0..b.operand.len()).any(|i| overlap(a, 0, b, i)) || (0..a.operand.len()).any(|i| overlap(b, 0, a, i))
}

/// Can `a` and `b` be executed within the same loop iteration.
/// Every write paired with an access of the same base must be to identical or disjoint views.
pub fn data_parallel_compatible(a: &Instruction, b: &Instruction) -> bool {
    if a.opcode.is_system() || b.opcode.is_system() {
        return true;
    }
    if a.operand.is_empty() || b.operand.is_empty() {
        return true;
    }
    let check = |w: &Instruction, r: &Instruction| {
        let out = &w.operand[0];
        r.operand.iter().enumerate().all(|(i, v)| {
            if v.is_constant() || out.base != v.base {
                return true;
            }
            if w.indirect_operand(0) || r.indirect_operand(i) {
                return false;
            }
            out.disjoint(v) || out == v
        })
    };
    check(a, b) && check(b, a)
}

impl Display for Instruction {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        f.write_fmt(format_args!("{}", self.opcode))?;
        for v in &self.operand {
            f.write_fmt(format_args!(" {v}"))?;
        }
        if let Some(c) = self.constant {
            f.write_fmt(format_args!(" ({c})"))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn view(base: u32, start: i64, shape: &[i64], stride: &[i64]) -> View {
        View::from_parts(BaseId::from(base), DType::Float64, start, shape.into(), stride.into()).unwrap()
    }

    #[test]
    fn dependency_through_overlap() {
        let a = Instruction::new(Opcode::Add, alloc::vec![view(0, 0, &[4], &[1]), view(1, 0, &[4], &[1]), view(2, 0, &[4], &[1])], None);
        let b = Instruction::new(Opcode::Add, alloc::vec![view(3, 0, &[4], &[1]), view(0, 0, &[4], &[1]), view(2, 0, &[4], &[1])], None);
        let c = Instruction::new(Opcode::Add, alloc::vec![view(0, 4, &[4], &[1]), view(1, 0, &[4], &[1]), view(2, 0, &[4], &[1])], None);
        assert!(instr_dependency(&a, &b));
        assert!(!instr_dependency(&a, &c));
        assert!(data_parallel_compatible(&a, &b));
        let shifted = Instruction::new(Opcode::Add, alloc::vec![view(3, 0, &[4], &[1]), view(0, 1, &[4], &[1]), view(2, 0, &[4], &[1])], None);
        assert!(!data_parallel_compatible(&a, &shifted));
        let free = Instruction::free(view(2, 0, &[4], &[1]));
        assert!(instr_dependency(&a, &free));
    }

    #[test]
    fn reduction_axis_removal() {
        let r = Instruction::sweep(Opcode::AddReduce, view(0, 0, &[2, 4], &[4, 1]), view(1, 0, &[2, 3, 4], &[12, 4, 1]), 1);
        assert_eq!(r.dominating_shape(), [2, 3, 4]);
        assert!(!r.reshapable());
        let s = r.remove_axis(2);
        assert_eq!(s.operand[0].shape, [2]);
        assert_eq!(s.operand[1].shape, [2, 3]);
        assert_eq!(s.sweep_axis(), Some(1));
        let s = r.remove_axis(0);
        assert_eq!(s.operand[0].shape, [4]);
        assert_eq!(s.sweep_axis(), Some(0));
    }

    #[test]
    fn peel_reduction_axis() {
        let r = Instruction::sweep(Opcode::AddReduce, view(0, 0, &[1], &[1]), view(1, 0, &[5], &[1]), 0);
        let first = r.slice_axis(0, 0);
        assert_eq!(first.opcode, Opcode::Identity);
        assert_eq!(first.operand.len(), 2);
        assert_eq!(first.operand[1].ndim(), 0);
        assert_eq!(first.operand[0].shape, [1]);
        let rest = r.advance_axis(0);
        assert_eq!((rest.operand[1].start, rest.operand[1].shape[0]), (1, 4));
        assert_eq!(rest.operand[0].start, 0);
        let a = Instruction::sweep(Opcode::AddAccumulate, view(0, 0, &[3, 4], &[4, 1]), view(1, 0, &[3, 4], &[4, 1]), 1);
        let s = a.slice_axis(0, 2);
        assert_eq!(s.sweep_axis(), Some(0));
        assert_eq!(s.operand[0].start, 8);
    }

    #[test]
    fn reshape_elementwise() {
        let a = Instruction::new(Opcode::Multiply, alloc::vec![view(0, 0, &[12], &[1]), view(1, 0, &[12], &[1]), View::constant(DType::Float64)], Some(Constant::f64(2.0)));
        assert_eq!(a.operand_type(2), DType::Float64);
        let r = a.reshape(&[3, 4]).unwrap();
        assert_eq!(r.operand[1].stride, [4, 1]);
        assert!(r.operand[2].is_constant());
    }
}
