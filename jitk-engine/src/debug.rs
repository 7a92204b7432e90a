/// Debug output selected by bits of the `JITK_DEBUG` environment variable
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DebugMask(pub u32);

impl DebugMask {
    /// Read mask from `JITK_DEBUG`, zero if unset or not a number
    pub fn from_env() -> DebugMask {
        DebugMask(
            std::env::var("JITK_DEBUG")
                .ok()
                .and_then(|x| x.parse::<u32>().ok())
                .unwrap_or(0),
        )
    }

    /// Device and backend messages
    pub const fn dev(self) -> bool {
        self.0 % 2 == 1
    }

    /// Kernel timings
    pub const fn perf(self) -> bool {
        (self.0 >> 1) % 2 == 1
    }

    /// Fused block trees
    pub const fn sched(self) -> bool {
        (self.0 >> 2) % 2 == 1
    }

    /// Symbol tables
    pub const fn ir(self) -> bool {
        (self.0 >> 3) % 2 == 1
    }

    /// Generated source
    pub const fn asm(self) -> bool {
        (self.0 >> 4) % 2 == 1
    }
}

#[test]
fn debug_bits() {
    let d = DebugMask(0b10101);
    assert!(d.dev());
    assert!(!d.perf());
    assert!(d.sched());
    assert!(!d.ir());
    assert!(d.asm());
}
