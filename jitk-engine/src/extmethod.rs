//! Extension methods, instructions executed by registered host code instead of fused kernels

use jitk_core::{
    base::{BaseId, Bases},
    error::JitError,
    instruction::Instruction,
    view::View,
};

/// Host implementation of an [Opcode::ExtMethod](jitk_core::opcode::Opcode::ExtMethod)
pub trait ExtMethod {
    /// Execute instruction, the output base is allocated
    fn execute(&mut self, instr: &Instruction, bases: &mut Bases) -> Result<(), JitError>;
}

/// Matrix multiplication `out[m, n] = sum_k a[m, k] * b[k, n]` over two dimensional views
#[derive(Debug, Default, Clone, Copy)]
pub struct MatMul;

fn matrix(instr: &Instruction, i: usize) -> Result<(&View, BaseId), JitError> {
    instr
        .operand
        .get(i)
        .filter(|v| v.ndim() == 2)
        .and_then(|v| Some((v, v.base?)))
        .ok_or_else(|| JitError::invalid_argument(format!("operand {i} of {instr} is not a matrix")))
}

fn element(v: &View, r: i64, c: i64) -> Result<usize, JitError> {
    usize::try_from(v.start + r * v.stride[0] + c * v.stride[1])
        .map_err(|_| JitError::invalid_argument(format!("negative element of {v}")))
}

impl ExtMethod for MatMul {
    fn execute(&mut self, instr: &Instruction, bases: &mut Bases) -> Result<(), JitError> {
        let ((out, out_id), (a, a_id), (b, b_id)) = (matrix(instr, 0)?, matrix(instr, 1)?, matrix(instr, 2)?);
        let (m, k, n) = (a.shape[0], a.shape[1], b.shape[1]);
        if b.shape[0] != k || out.shape[..] != [m, n] {
            return Err(JitError::invalid_argument(format!(
                "matmul of {:?} and {:?} into {:?}",
                a.shape, b.shape, out.shape
            )));
        }
        let oob = || JitError::invalid_argument(format!("{instr} reads out of bounds"));
        let mut res = Vec::with_capacity((m * n) as usize);
        let (abuf, bbuf) = (bases.buffer(a_id)?, bases.buffer(b_id)?);
        for r in 0..m {
            for c in 0..n {
                let mut sum = 0.0;
                for j in 0..k {
                    sum += abuf.get_f64(element(a, r, j)?).ok_or_else(oob)? * bbuf.get_f64(element(b, j, c)?).ok_or_else(oob)?;
                }
                res.push(sum);
            }
        }
        let obuf = bases.buffer_mut(out_id)?;
        for (i, x) in res.into_iter().enumerate() {
            let i = i as i64;
            obuf.set_f64(element(out, i / n, i % n)?, x)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jitk_core::{base::Base, dtype::DType, opcode::Opcode};

    #[test]
    fn matmul_of_transposed_view() -> Result<(), JitError> {
        let mut bases = Bases::new();
        let a = bases.insert(Base::from_buffer(vec![1.0f64, 2.0, 3.0, 4.0, 5.0, 6.0].into()));
        let b = bases.insert(Base::from_buffer(vec![1.0f64, 0.0, 0.0, 1.0, 1.0, 1.0].into()));
        let out = bases.insert(Base::new(DType::Float64, 4));
        bases.allocate(out)?;
        // a is 2x3, b is read as the transpose of a 2x3 matrix
        let va = View::from_parts(a, DType::Float64, 0, vec![2, 3], vec![3, 1])?;
        let vb = View::from_parts(b, DType::Float64, 0, vec![3, 2], vec![1, 3])?;
        let vo = View::from_parts(out, DType::Float64, 0, vec![2, 2], vec![2, 1])?;
        let instr = Instruction::new(Opcode::ExtMethod(0), vec![vo, va, vb], None);
        MatMul.execute(&instr, &mut bases)?;
        let res: Vec<f64> = (0..4).filter_map(|i| bases.buffer(out).ok()?.get_f64(i)).collect();
        assert_eq!(res, [1.0, 6.0, 4.0, 15.0]);
        Ok(())
    }
}
