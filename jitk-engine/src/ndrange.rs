//! Launch geometry of threaded kernels

use crate::config::EngineConfig;
use jitk_core::error::JitError;

/// Global and local size of one dimension.
/// Local size is clamped to the number of threads, global size is a multiple of local size.
pub fn work_ranges(work_group_size: u64, block_size: u64) -> (u64, u64) {
    let local = work_group_size.min(block_size).max(1);
    let global = block_size.div_ceil(local) * local;
    (global, local)
}

/// Global and local sizes for a thread stack of one to three dimensions
pub fn nd_ranges(thread_stack: &[i64], config: &EngineConfig) -> Result<([u64; 3], [u64; 3]), JitError> {
    let b: Vec<u64> = thread_stack.iter().map(|s| (*s).max(0) as u64).collect();
    let (g, l): (Vec<u64>, Vec<u64>) = match b.as_slice() {
        [x] => {
            let x = work_ranges(config.work_group_size_1dx, *x);
            (vec![x.0, 1, 1], vec![x.1, 1, 1])
        }
        [x, y] => {
            let x = work_ranges(config.work_group_size_2dx, *x);
            let y = work_ranges(config.work_group_size_2dy, *y);
            (vec![x.0, y.0, 1], vec![x.1, y.1, 1])
        }
        [x, y, z] => {
            let x = work_ranges(config.work_group_size_3dx, *x);
            let y = work_ranges(config.work_group_size_3dy, *y);
            let z = work_ranges(config.work_group_size_3dz, *z);
            (vec![x.0, y.0, z.0], vec![x.1, y.1, z.1])
        }
        _ => {
            return Err(JitError::invalid_argument(format!(
                "NDRanges: thread stack {thread_stack:?} must have one to three dimensions"
            )))
        }
    };
    Ok(([g[0], g[1], g[2]], [l[0], l[1], l[2]]))
}

#[test]
fn ranges_are_clamped_and_rounded() -> Result<(), JitError> {
    assert_eq!(work_ranges(128, 1000), (1024, 128));
    assert_eq!(work_ranges(128, 5), (5, 5));
    assert_eq!(work_ranges(32, 0), (0, 1));
    let config = EngineConfig::default();
    assert_eq!(nd_ranges(&[100, 7], &config)?, ([128, 8, 1], [32, 4, 1]));
    assert_eq!(nd_ranges(&[3, 3, 3], &config)?, ([3, 4, 4], [3, 2, 2]));
    assert!(nd_ranges(&[], &config).is_err());
    assert!(nd_ranges(&[1, 1, 1, 1], &config).is_err());
    Ok(())
}
