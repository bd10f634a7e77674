use std::fmt;

use bitflags::bitflags;

bitflags! {
    /// Instruction set extensions of the host
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct CpuFeatures: u32 {
        const SSE2 = 1 << 0;
        const SSE41 = 1 << 1;
        const AVX = 1 << 2;
        const AVX2 = 1 << 3;
        const FMA = 1 << 4;
        const AVX512F = 1 << 5;
        const NEON = 1 << 6;
    }
}

impl CpuFeatures {
    /// Probe the running CPU
    pub fn detect() -> Self {
        #[allow(unused_mut)]
        let mut features = Self::empty();

        #[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
        {
            features.set(Self::SSE2, is_x86_feature_detected!("sse2"));
            features.set(Self::SSE41, is_x86_feature_detected!("sse4.1"));
            features.set(Self::AVX, is_x86_feature_detected!("avx"));
            features.set(Self::AVX2, is_x86_feature_detected!("avx2"));
            features.set(Self::FMA, is_x86_feature_detected!("fma"));
            features.set(Self::AVX512F, is_x86_feature_detected!("avx512f"));
        }

        #[cfg(target_arch = "aarch64")]
        {
            features.set(Self::NEON, std::arch::is_aarch64_feature_detected!("neon"));
        }

        features
    }
}

/// Lowercase flag names separated by spaces
impl fmt::Display for CpuFeatures {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (name, _)) in self.iter_names().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            f.write_str(&name.to_ascii_lowercase())?;
        }
        Ok(())
    }
}
