//! Dynamic views, changed between repeated executions of one program

use crate::{
    base::Bases,
    error::JitError,
    instruction::{InstrPtr, Instruction},
    view::View,
};
use alloc::{format, sync::Arc};

/// Evaluate slides of view once
pub fn slide_view(view: &mut View) {
    if view.slides.is_empty() {
        return;
    }
    view.iteration_counter += 1;
    for s in view.slides.iter_mut() {
        s.calls += 1;
        if s.calls % s.step_delay.max(1) != 0 {
            continue;
        }
        if s.reset > 0 && s.applied + 1 == s.reset {
            view.start -= s.start_change;
            view.shape[s.dim] -= s.shape_change_total;
            s.start_change = 0;
            s.shape_change_total = 0;
            s.applied = 0;
            continue;
        }
        let mut change = s.slide * s.dim_stride;
        let max_rel_idx = s.dim_stride * s.dim_shape;
        if max_rel_idx != 0 {
            let rel_idx = view.start % max_rel_idx + change;
            if rel_idx < 0 {
                change += max_rel_idx;
            } else if rel_idx >= max_rel_idx {
                change -= max_rel_idx;
            }
        }
        view.start += change;
        view.shape[s.dim] += s.shape_change;
        s.start_change += change;
        s.shape_change_total += s.shape_change;
        s.applied += 1;
    }
}

/// Slide all sliding views. Instructions with sliding views are replaced by new instructions.
pub fn slide_views(instr_list: &mut [InstrPtr]) {
    for instr in instr_list.iter_mut() {
        if !instr.operand.iter().any(View::is_sliding) {
            continue;
        }
        let mut new: Instruction = (**instr).clone();
        for view in new.operand.iter_mut() {
            slide_view(view);
        }
        *instr = Arc::new(new);
    }
}

fn read_pointer(bases: &Bases, view: &View, id: crate::base::BaseId, i: usize) -> Result<i64, JitError> {
    bases.buffer(id)?.get_i64(i).ok_or_else(|| {
        JitError::invalid_argument(format!("index array {id} of view {view} has no element {i}"))
    })
}

/// Read start, shape and strides of views from their index arrays.
/// Start is the first element of its base, shape and strides take one element per axis.
pub fn update_array_iterators(instr_list: &mut [InstrPtr], bases: &Bases) -> Result<(), JitError> {
    for instr in instr_list.iter_mut() {
        if !instr.operand.iter().any(View::uses_pointer) {
            continue;
        }
        let mut new: Instruction = (**instr).clone();
        for view in new.operand.iter_mut() {
            if let Some(id) = view.start_pointer {
                view.start = read_pointer(bases, view, id, 0)?;
            }
            if let Some(id) = view.shape_pointer {
                for d in 0..view.ndim() {
                    view.shape[d] = read_pointer(bases, view, id, d)?;
                }
            }
            if let Some(id) = view.stride_pointer {
                for d in 0..view.ndim() {
                    view.stride[d] = read_pointer(bases, view, id, d)?;
                }
            }
        }
        *instr = Arc::new(new);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        base::{Base, BaseId},
        dtype::DType,
        opcode::Opcode,
        view::Slide,
    };

    fn sliding(slide: Slide) -> View {
        let mut v = View::from_parts(BaseId::from(0), DType::Float32, 0, alloc::vec![3], alloc::vec![1]).unwrap();
        v.add_slide(slide).unwrap();
        v
    }

    #[test]
    fn slide_wraps_around_axis() {
        let mut v = sliding(Slide::new(0, 2, 3, 10, 0));
        for _ in 0..4 {
            slide_view(&mut v);
        }
        assert_eq!(v.start, (2 * 3 * 4) % (3 * 10));
        for _ in 0..2 {
            slide_view(&mut v);
        }
        assert_eq!(v.start, 6);
        let mut v = sliding(Slide::new(0, -1, 1, 10, 0));
        slide_view(&mut v);
        assert_eq!(v.start, 9);
    }

    #[test]
    fn slide_step_delay_and_reset() {
        let mut v = sliding(Slide::new(0, 1, 1, 100, 1).with_step_delay(2));
        let mut starts = alloc::vec::Vec::new();
        for _ in 0..4 {
            slide_view(&mut v);
            starts.push(v.start);
        }
        assert_eq!(starts, [0, 1, 1, 2]);
        assert_eq!(v.shape, [5]);
        let mut v = sliding(Slide::new(0, 1, 1, 100, 0).with_reset(3));
        let mut starts = alloc::vec::Vec::new();
        for _ in 0..6 {
            slide_view(&mut v);
            starts.push(v.start);
        }
        assert_eq!(starts, [1, 2, 0, 1, 2, 0]);
    }

    #[test]
    fn array_iterators() -> Result<(), JitError> {
        let mut bases = Bases::new();
        let data = bases.insert(Base::new(DType::Float32, 16));
        let start = bases.insert(Base::from_buffer(alloc::vec![5i64].into()));
        let mut v = View::new(data, DType::Float32, 4);
        v.start_pointer = Some(start);
        let mut list = alloc::vec![Arc::new(Instruction::new(Opcode::Identity, alloc::vec![v.clone(), v], None))];
        let before = list[0].clone();
        update_array_iterators(&mut list, &bases)?;
        assert_eq!(list[0].operand[0].start, 5);
        assert_eq!(before.operand[0].start, 0);
        Ok(())
    }
}
