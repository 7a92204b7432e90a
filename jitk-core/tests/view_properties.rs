use itertools::Itertools;
use jitk_core::{base::BaseId, dtype::DType, error::JitError, view::View};
use rand::{rngs::SmallRng, Rng, SeedableRng};

fn random_view(rng: &mut SmallRng, base: u32) -> Result<View, JitError> {
    let ndim = rng.gen_range(1..=4);
    let shape: Vec<i64> = (0..ndim).map(|_| rng.gen_range(1..=4)).collect();
    let mut stride = jitk_core::view::contiguous_stride(&shape);
    // Broadcast, transpose or step over some axes
    for s in stride.iter_mut() {
        match rng.gen_range(0..4) {
            0 => *s = 0,
            1 => *s *= 2,
            _ => {}
        }
    }
    if ndim > 1 && rng.gen_bool(0.3) {
        stride.swap(0, ndim - 1);
    }
    View::from_parts(BaseId::from(base), DType::Float32, rng.gen_range(0..8), shape, stride)
}

#[test]
fn simplify_keeps_address_sequence() -> Result<(), JitError> {
    let mut rng = SmallRng::seed_from_u64(42);
    for _ in 0..500 {
        let v = random_view(&mut rng, 0)?;
        let s = v.simplify();
        assert_eq!(v.addresses(), s.addresses(), "{v} simplified to {s}");
        assert!(s.ndim() <= v.ndim());
        assert_eq!(s.simplify(), s);
    }
    Ok(())
}

#[test]
fn simplify_to_any_factorization() -> Result<(), JitError> {
    let v = View::new(BaseId::from(0), DType::Float64, 24);
    let factors = [1, 2, 3, 4];
    for shape in (0..3).map(|_| factors.iter().copied()).multi_cartesian_product() {
        let n: i64 = shape.iter().product();
        if n != 24 {
            assert!(v.simplify_to_shape(&shape).is_err());
            continue;
        }
        let r = v.simplify_to_shape(&shape)?;
        assert_eq!(r.addresses(), v.addresses());
        assert!(r.is_contiguous());
    }
    Ok(())
}

#[test]
fn disjoint_is_conservative() -> Result<(), JitError> {
    let mut rng = SmallRng::seed_from_u64(7);
    for _ in 0..500 {
        let a = random_view(&mut rng, 0)?;
        let b = random_view(&mut rng, 0)?;
        let overlap = a.addresses().iter().any(|x| b.addresses().contains(x));
        if overlap {
            assert!(!a.disjoint(&b), "{a} and {b} overlap");
        }
    }
    // Disjoint by construction
    for (i, j) in (0..6).tuple_combinations() {
        let a = View::from_parts(BaseId::from(1), DType::Int32, i * 10, vec![2, 5], vec![5, 1])?;
        let b = View::from_parts(BaseId::from(1), DType::Int32, j * 10, vec![10], vec![1])?;
        assert!(a.disjoint(&b));
        assert!(!a.disjoint(&View::from_parts(BaseId::from(1), DType::Int32, i * 10 + 9, vec![1], vec![1])?));
    }
    Ok(())
}
