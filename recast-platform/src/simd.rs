//! SIMD capability probing.
//!
//! Queries the running CPU for vector extensions and derives the widest
//! vector register width the host can use. The engine installs this width as
//! an attribute on every loaded function, so the probe prefers asking the
//! CPU over per-architecture assumptions: AVX-512 and SVE availability
//! varies between parts of the same family.

use std::fmt;

/// Architecture families the vector probe knows how to question.
///
/// Anything else gets the conservative baseline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostArch {
    X86_64,
    Aarch64,
    Riscv64,
    Other,
}

impl HostArch {
    /// The architecture this build runs on.
    pub fn detect() -> Self {
        #[cfg(target_arch = "x86_64")]
        return HostArch::X86_64;
        #[cfg(target_arch = "aarch64")]
        return HostArch::Aarch64;
        #[cfg(target_arch = "riscv64")]
        return HostArch::Riscv64;

        #[allow(unreachable_code)]
        HostArch::Other
    }
}

impl fmt::Display for HostArch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            HostArch::X86_64 => "x86_64",
            HostArch::Aarch64 => "aarch64",
            HostArch::Riscv64 => "riscv64",
            HostArch::Other => "unknown",
        };
        write!(f, "{}", s)
    }
}

/// What the vector units of a host can do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimdCapabilities {
    /// Whether any SIMD support was detected
    pub supported: bool,
    /// Maximum vector register width in bits (128, 256, 512, 2048)
    pub max_vector_width: u32,
    /// Whether 128-bit vectors are supported
    pub v128_supported: bool,
    /// Whether 256-bit vectors are supported
    pub v256_supported: bool,
    /// Whether 512-bit vectors are supported
    pub v512_supported: bool,
    /// Whether fused multiply-add is supported
    pub fma_supported: bool,
    /// Names of detected vector extensions, in detection order
    pub features: Vec<String>,
}

impl Default for SimdCapabilities {
    fn default() -> Self {
        Self {
            supported: false,
            max_vector_width: 128,
            v128_supported: false,
            v256_supported: false,
            v512_supported: false,
            fma_supported: false,
            features: Vec::new(),
        }
    }
}

impl SimdCapabilities {
    /// Probe the running CPU.
    ///
    /// The width hint follows the widest extension found: 512 with AVX-512,
    /// 256 with AVX, 2048 with SVE, 128 otherwise.
    pub fn detect_host() -> Self {
        #[cfg(target_arch = "x86_64")]
        {
            Self::detect_x86_64_runtime()
        }
        #[cfg(target_arch = "aarch64")]
        {
            Self::detect_aarch64_runtime()
        }
        #[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
        {
            Self::baseline(HostArch::detect())
        }
    }

    /// Guaranteed-by-architecture capabilities, used when the CPU cannot be
    /// queried at runtime.
    pub fn baseline(arch: HostArch) -> Self {
        match arch {
            HostArch::X86_64 => Self {
                supported: true,
                max_vector_width: 128, // SSE2 floor; wider needs a runtime check
                v128_supported: true,
                v256_supported: false,
                v512_supported: false,
                fma_supported: false,
                features: vec!["sse2".to_string()],
            },
            HostArch::Aarch64 => Self {
                supported: true,
                max_vector_width: 128, // NEON floor
                v128_supported: true,
                v256_supported: false,
                v512_supported: false,
                fma_supported: true,
                features: vec!["neon".to_string()],
            },
            HostArch::Riscv64 => Self {
                supported: true,
                max_vector_width: 128,
                v128_supported: true,
                v256_supported: false,
                v512_supported: false,
                fma_supported: false,
                features: vec!["v".to_string()],
            },
            HostArch::Other => Self::default(),
        }
    }

    #[cfg(target_arch = "x86_64")]
    fn detect_x86_64_runtime() -> Self {
        let mut caps = Self {
            supported: true,
            v128_supported: true, // SSE2 is baseline for x86_64
            max_vector_width: 128,
            ..Self::default()
        };
        caps.features.push("sse2".to_string());

        for feat in ["sse3", "ssse3", "sse4.1", "sse4.2"] {
            let present = match feat {
                "sse3" => std::arch::is_x86_feature_detected!("sse3"),
                "ssse3" => std::arch::is_x86_feature_detected!("ssse3"),
                "sse4.1" => std::arch::is_x86_feature_detected!("sse4.1"),
                "sse4.2" => std::arch::is_x86_feature_detected!("sse4.2"),
                _ => false,
            };
            if present {
                caps.features.push(feat.to_string());
            }
        }

        if std::arch::is_x86_feature_detected!("avx") {
            caps.features.push("avx".to_string());
            caps.v256_supported = true;
            caps.max_vector_width = 256;
        }
        if std::arch::is_x86_feature_detected!("avx2") {
            caps.features.push("avx2".to_string());
        }
        if std::arch::is_x86_feature_detected!("fma") {
            caps.features.push("fma".to_string());
            caps.fma_supported = true;
        }
        if std::arch::is_x86_feature_detected!("avx512f") {
            caps.features.push("avx512f".to_string());
            caps.v512_supported = true;
            caps.max_vector_width = 512;
        }

        caps
    }

    #[cfg(target_arch = "aarch64")]
    fn detect_aarch64_runtime() -> Self {
        let mut caps = Self {
            supported: true,
            v128_supported: true, // NEON is baseline for AArch64
            max_vector_width: 128,
            fma_supported: true,
            ..Self::default()
        };
        caps.features.push("neon".to_string());

        if std::arch::is_aarch64_feature_detected!("sve") {
            caps.features.push("sve".to_string());
            // SVE registers scale up to 2048 bits; the hint is the ceiling.
            caps.max_vector_width = 2048;
        }

        caps
    }

    /// Check if a specific vector width is supported.
    pub fn supports_vector_width(&self, width: u32) -> bool {
        if !self.supported {
            return false;
        }
        match width {
            128 => self.v128_supported,
            256 => self.v256_supported,
            512 => self.v512_supported,
            _ => width <= self.max_vector_width,
        }
    }

    /// Render the feature bag as a comma-separated attribute string.
    pub fn feature_string(&self) -> String {
        self.features.join(",")
    }
}
