use crate::{base::BaseId, dtype::DType, error::JitError};
use alloc::{format, string::String, vec::Vec};
use core::cmp::Ordering;
use core::fmt::{Display, Formatter, Write};

/// Maximum number of dimensions of a view
pub const MAXDIM: usize = 16;

/// Slide descriptor of a dynamic view.
/// Moves the view along one axis between repeated executions of a program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Slide {
    /// Axis whose shape is changed
    pub dim: usize,
    /// Number of strides to move per application
    pub slide: i64,
    /// Stride of the sliding axis in elements
    pub dim_stride: i64,
    /// Logical extent of the sliding axis, used to wrap negative and overflowing offsets
    pub dim_shape: i64,
    /// Change of `shape[dim]` per application
    pub shape_change: i64,
    /// Slide is applied only every `step_delay`th call, 0 and 1 mean every call
    pub step_delay: u64,
    /// Number of calls in one reset period, 0 disables resets
    pub reset: u64,
    pub(crate) calls: u64,
    pub(crate) applied: u64,
    pub(crate) start_change: i64,
    pub(crate) shape_change_total: i64,
}

impl Slide {
    /// New slide descriptor without step delay and resets
    pub fn new(dim: usize, slide: i64, dim_stride: i64, dim_shape: i64, shape_change: i64) -> Slide {
        Slide {
            dim,
            slide,
            dim_stride,
            dim_shape,
            shape_change,
            step_delay: 1,
            reset: 0,
            calls: 0,
            applied: 0,
            start_change: 0,
            shape_change_total: 0,
        }
    }

    /// Apply slide only every `step_delay`th call
    pub fn with_step_delay(mut self, step_delay: u64) -> Slide {
        self.step_delay = step_delay;
        self
    }

    /// Roll back all changes when the reset period is reached
    pub fn with_reset(mut self, reset: u64) -> Slide {
        self.reset = reset;
        self
    }
}

/// Strided window into a base. View without base is a constant.
#[derive(Debug, Clone)]
pub struct View {
    /// Accessed base, None for constants
    pub base: Option<BaseId>,
    /// Element type of the accessed base
    pub dtype: DType,
    /// Index of the first element
    pub start: i64,
    /// Number of elements in each dimension
    pub shape: Vec<i64>,
    /// Stride of each dimension in elements
    pub stride: Vec<i64>,
    /// Slide descriptors for repeated execution
    pub slides: Vec<Slide>,
    /// How many times the slides were evaluated
    pub iteration_counter: u64,
    /// Base whose first element is the start of this view
    pub start_pointer: Option<BaseId>,
    /// Base whose elements are the shape of this view
    pub shape_pointer: Option<BaseId>,
    /// Base whose elements are the strides of this view
    pub stride_pointer: Option<BaseId>,
}

/// Row-major strides of shape
pub fn contiguous_stride(shape: &[i64]) -> Vec<i64> {
    let mut stride = alloc::vec![0; shape.len()];
    let mut s = 1;
    for (st, sh) in stride.iter_mut().zip(shape).rev() {
        *st = s;
        s *= *sh;
    }
    stride
}

impl View {
    /// Contiguous view of the whole base
    pub fn new(base: BaseId, dtype: DType, nelem: usize) -> View {
        View::with_shape(base, dtype, 0, alloc::vec![nelem as i64], alloc::vec![1])
    }

    fn with_shape(base: BaseId, dtype: DType, start: i64, shape: Vec<i64>, stride: Vec<i64>) -> View {
        View {
            base: Some(base),
            dtype,
            start,
            shape,
            stride,
            slides: Vec::new(),
            iteration_counter: 0,
            start_pointer: None,
            shape_pointer: None,
            stride_pointer: None,
        }
    }

    /// Constant operand of given dtype
    pub fn constant(dtype: DType) -> View {
        View {
            base: None,
            dtype,
            start: 0,
            shape: Vec::new(),
            stride: Vec::new(),
            slides: Vec::new(),
            iteration_counter: 0,
            start_pointer: None,
            shape_pointer: None,
            stride_pointer: None,
        }
    }

    /// View from its parts, shape and stride must have the same length
    #[track_caller]
    pub fn from_parts(base: BaseId, dtype: DType, start: i64, shape: Vec<i64>, stride: Vec<i64>) -> Result<View, JitError> {
        if shape.len() != stride.len() {
            return Err(JitError::invalid_argument(format!(
                "shape {shape:?} and stride {stride:?} have different lengths"
            )));
        }
        if shape.len() > MAXDIM {
            return Err(JitError::invalid_argument(format!(
                "view with {} dimensions, maximum is {MAXDIM}",
                shape.len()
            )));
        }
        if shape.iter().any(|&d| d < 0) {
            return Err(JitError::invalid_argument(format!("negative shape {shape:?}")));
        }
        Ok(View::with_shape(base, dtype, start, shape, stride))
    }

    /// Number of dimensions
    pub fn ndim(&self) -> usize {
        self.shape.len()
    }

    /// Number of accessed elements
    pub fn nelements(&self) -> i64 {
        self.shape.iter().product()
    }

    /// Is this view a constant
    pub fn is_constant(&self) -> bool {
        self.base.is_none()
    }

    /// Are start, shape or stride read from other bases
    pub fn uses_pointer(&self) -> bool {
        self.start_pointer.is_some() || self.shape_pointer.is_some() || self.stride_pointer.is_some()
    }

    /// Has slide descriptors
    pub fn is_sliding(&self) -> bool {
        !self.slides.is_empty()
    }

    /// Add slide descriptor
    pub fn add_slide(&mut self, slide: Slide) -> Result<(), JitError> {
        if self.is_constant() {
            return Err(JitError::invalid_argument("constants can not slide"));
        }
        if slide.dim >= self.ndim() {
            return Err(JitError::invalid_argument(format!(
                "slide over axis {} of view with {} dimensions",
                slide.dim,
                self.ndim()
            )));
        }
        self.slides.push(slide);
        Ok(())
    }

    /// Set row-major strides, returns number of elements
    pub fn set_contiguous_stride(&mut self) -> i64 {
        self.stride = contiguous_stride(&self.shape);
        self.nelements()
    }

    /// Are strides row-major
    pub fn is_contiguous(&self) -> bool {
        self.stride == contiguous_stride(&self.shape)
    }

    /// Does every iteration access the same single element
    pub fn is_scalar(&self) -> bool {
        self.ndim() == 0 || self.nelements() == 1 || self.stride.iter().all(|&s| s == 0)
    }

    /// Same shape as other view
    pub fn same_shape(&self, other: &View) -> bool {
        self.shape == other.shape
    }

    /// Fewest dimensions view accessing the same elements in the same order.
    /// Axes of size one are removed and adjacent axes with compatible strides are merged.
    pub fn simplify(&self) -> View {
        let mut res = self.clone();
        if self.is_constant() {
            return res;
        }
        res.shape.clear();
        res.stride.clear();
        if self.nelements() == 0 {
            res.shape = self.shape.clone();
            res.stride = self.stride.clone();
            return res;
        }
        for (&sh, &st) in self.shape.iter().zip(&self.stride) {
            if sh == 1 {
                continue;
            }
            if let (Some(last_sh), Some(last_st)) = (res.shape.last_mut(), res.stride.last_mut()) {
                if *last_st == st * sh {
                    *last_sh *= sh;
                    *last_st = st;
                    continue;
                }
            }
            res.shape.push(sh);
            res.stride.push(st);
        }
        if res.shape.is_empty() {
            res.shape.push(1);
            res.stride.push(1);
        }
        res
    }

    /// Reshape into `shape` keeping the accessed elements and their order.
    /// Fails if no strides reproduce the access pattern.
    #[track_caller]
    pub fn simplify_to_shape(&self, shape: &[i64]) -> Result<View, JitError> {
        let err = || JitError::invalid_argument(format!("can not simplify {self} to shape {shape:?}"));
        if shape.iter().product::<i64>() != self.nelements() || shape.len() > MAXDIM {
            return Err(err());
        }
        let mut res = self.clone();
        res.shape = shape.into();
        if self.nelements() == 0 {
            res.set_contiguous_stride();
            return Ok(res);
        }
        let simple = self.simplify();
        let mut axes: Vec<(i64, i64)> = simple
            .shape
            .iter()
            .copied()
            .zip(simple.stride.iter().copied())
            .filter(|(sh, _)| *sh != 1)
            .collect();
        let (mut rem, mut cur) = axes.pop().unwrap_or((1, 1));
        let mut stride = alloc::vec![0; shape.len()];
        for (d, &n) in shape.iter().enumerate().rev() {
            if n == 1 {
                stride[d] = cur;
                continue;
            }
            while rem == 1 {
                let Some((sh, st)) = axes.pop() else { break };
                rem = sh;
                cur = st;
            }
            if rem % n != 0 {
                return Err(err());
            }
            stride[d] = cur;
            cur *= n;
            rem /= n;
        }
        if rem != 1 || !axes.is_empty() {
            return Err(err());
        }
        res.stride = stride;
        Ok(res)
    }

    /// Lowest and highest accessed element, the view must not be empty
    pub fn extent(&self) -> (i64, i64) {
        let mut lo = self.start;
        let mut hi = self.start;
        for (&sh, &st) in self.shape.iter().zip(&self.stride) {
            let d = (sh - 1) * st;
            if d < 0 {
                lo += d;
            } else {
                hi += d;
            }
        }
        (lo, hi)
    }

    /// Returns true only if the views provably never access the same element
    pub fn disjoint(&self, other: &View) -> bool {
        if self.is_constant() || other.is_constant() || self.base != other.base {
            return true;
        }
        if self.uses_pointer() || other.uses_pointer() {
            return false;
        }
        if self.nelements() == 0 || other.nelements() == 0 {
            return true;
        }
        let (lo1, hi1) = self.extent();
        let (lo2, hi2) = other.extent();
        if hi1 < lo2 || hi2 < lo1 {
            return true;
        }
        // Interleaved views, all addresses of one view are start + k*g
        let g = self
            .stride
            .iter()
            .zip(&self.shape)
            .chain(other.stride.iter().zip(&other.shape))
            .filter(|(_, sh)| **sh > 1)
            .fold(0, |g, (&st, _)| gcd(g, st.abs()));
        g > 1 && (self.start - other.start).rem_euclid(g) != 0
    }

    /// Insert axis of given size and stride at dim
    pub fn insert_axis(&mut self, dim: usize, size: i64, stride: i64) -> Result<(), JitError> {
        if dim > self.ndim() || self.ndim() >= MAXDIM {
            return Err(JitError::invalid_argument(format!(
                "can not insert axis {dim} into view with {} dimensions",
                self.ndim()
            )));
        }
        self.shape.insert(dim, size);
        self.stride.insert(dim, stride);
        Ok(())
    }

    /// Remove axis
    pub fn remove_axis(&mut self, dim: usize) {
        debug_assert!(dim < self.ndim());
        self.shape.remove(dim);
        self.stride.remove(dim);
    }

    /// Swap two axes
    pub fn transpose(&mut self, a: usize, b: usize) {
        self.shape.swap(a, b);
        self.stride.swap(a, b);
    }

    /// Fix axis at index, removing the axis
    pub fn slice_axis(&mut self, dim: usize, index: i64) {
        self.start += index * self.stride[dim];
        self.remove_axis(dim);
    }

    /// Element offsets in row-major traversal order
    pub fn addresses(&self) -> Vec<i64> {
        let n = self.nelements().max(0) as usize;
        let mut res = Vec::with_capacity(n);
        if n == 0 {
            return res;
        }
        let mut idx = alloc::vec![0i64; self.ndim()];
        loop {
            res.push(self.start + idx.iter().zip(&self.stride).map(|(i, s)| i * s).sum::<i64>());
            let mut d = self.ndim();
            loop {
                if d == 0 {
                    return res;
                }
                d -= 1;
                idx[d] += 1;
                if idx[d] < self.shape[d] {
                    break;
                }
                idx[d] = 0;
            }
        }
    }

    /// Python-like slice notation, per-axis offsets are derived from start
    pub fn python_notation(&self) -> String {
        let Some(base) = self.base else {
            return "const".into();
        };
        let mut order: Vec<usize> = (0..self.ndim()).collect();
        order.sort_by_key(|&d| core::cmp::Reverse(self.stride[d].abs()));
        let mut offsets = alloc::vec![0; self.ndim()];
        let mut rem = self.start;
        for d in order {
            if self.stride[d] != 0 {
                offsets[d] = rem / self.stride[d];
                rem %= self.stride[d];
            }
        }
        let mut res = format!("{base}[");
        for d in 0..self.ndim() {
            let off = offsets[d] * self.stride[d];
            let _ = write!(res, "{}:{}:{}", off, off + self.shape[d] * self.stride[d], self.stride[d]);
            if d + 1 < self.ndim() {
                res.push(',');
            }
        }
        if rem != 0 {
            let _ = write!(res, "+{rem}");
        }
        res.push(']');
        res
    }
}

fn gcd(a: i64, b: i64) -> i64 {
    if b == 0 {
        a
    } else {
        gcd(b, a % b)
    }
}

impl PartialEq for View {
    fn eq(&self, other: &Self) -> bool {
        self.base == other.base && self.start == other.start && self.shape == other.shape && self.stride == other.stride
    }
}

impl Eq for View {}

impl PartialOrd for View {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for View {
    fn cmp(&self, other: &Self) -> Ordering {
        self.base
            .cmp(&other.base)
            .then(self.start.cmp(&other.start))
            .then(self.ndim().cmp(&other.ndim()))
            .then_with(|| self.shape.cmp(&other.shape))
            .then_with(|| self.stride.cmp(&other.stride))
    }
}

impl core::hash::Hash for View {
    fn hash<H: core::hash::Hasher>(&self, state: &mut H) {
        self.base.hash(state);
        self.start.hash(state);
        self.shape.hash(state);
        self.stride.hash(state);
    }
}

impl Display for View {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        match self.base {
            Some(base) => f.write_fmt(format_args!(
                "{base}[start: {}, shape: {:?}, stride: {:?}]",
                self.start, self.shape, self.stride
            )),
            None => f.write_fmt(format_args!("const<{}>", self.dtype)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn view(start: i64, shape: &[i64], stride: &[i64]) -> View {
        View::from_parts(BaseId::from(0), DType::Float32, start, shape.into(), stride.into()).unwrap()
    }

    #[test]
    fn simplify_merges_contiguous() {
        let v = view(2, &[2, 1, 3, 4], &[12, 7, 4, 1]).simplify();
        assert_eq!(v.shape, [24]);
        assert_eq!(v.stride, [1]);
        assert_eq!(v.start, 2);
        let v = view(0, &[1, 1], &[5, 5]).simplify();
        assert_eq!((v.shape.as_slice(), v.stride.as_slice()), ([1].as_slice(), [1].as_slice()));
    }

    #[test]
    fn simplify_to_shape() {
        let v = view(0, &[24], &[1]);
        let r = v.simplify_to_shape(&[2, 3, 4]).unwrap();
        assert_eq!(r.stride, [12, 4, 1]);
        assert_eq!(r.addresses(), v.addresses());
        let t = view(0, &[3, 4], &[1, 3]);
        assert!(t.simplify_to_shape(&[12]).is_err());
        assert!(t.simplify_to_shape(&[3, 2, 2]).unwrap().addresses() == t.addresses());
        assert!(v.simplify_to_shape(&[5, 5]).is_err());
    }

    #[test]
    fn disjoint_views() {
        let a = view(0, &[4], &[1]);
        let b = view(4, &[4], &[1]);
        let c = view(3, &[2], &[1]);
        assert!(a.disjoint(&b));
        assert!(!a.disjoint(&c));
        let even = view(0, &[4], &[2]);
        let odd = view(1, &[4], &[2]);
        assert!(even.disjoint(&odd));
        assert!(!even.disjoint(&view(4, &[2], &[2])));
        assert!(a.disjoint(&View::constant(DType::Float32)));
    }

    #[test]
    fn view_order_and_equality() {
        let a = view(0, &[4], &[1]);
        let mut b = a.clone();
        b.add_slide(Slide::new(0, 1, 1, 4, 0)).unwrap();
        assert_eq!(a, b);
        assert!(a < view(1, &[4], &[1]));
        assert_eq!(View::constant(DType::Int32), View::constant(DType::Int32));
        assert!(View::constant(DType::Int32) < a);
    }

    #[test]
    fn axis_manipulation() {
        let mut v = view(0, &[2, 3], &[3, 1]);
        v.transpose(0, 1);
        assert_eq!(v.addresses(), [0, 3, 1, 4, 2, 5]);
        assert!(!v.is_contiguous());
        v.slice_axis(0, 2);
        assert_eq!(v.addresses(), [2, 5]);
        v.insert_axis(0, 1, 0).unwrap();
        assert_eq!(v.shape, [1, 2]);
        assert!(view(3, &[4], &[0]).is_scalar());
        assert_eq!(view(0, &[2, 3], &[3, 1]).python_notation(), "a0[0:6:3,0:3:1]");
    }
}
