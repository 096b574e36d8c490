//! recast-platform - Host capability probing
//!
//! What the specializer needs to know about the machine it runs on: the
//! architecture family and how wide its usable vector registers are. Kept as
//! a separate crate so the engine and any future back-end components can
//! share it without dependency cycles.
//!
//! ## Modules
//!
//! - [`simd`] - Vector extension probing and the width hint

pub mod simd;

pub use simd::{HostArch, SimdCapabilities};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_arch_matches_build_target() {
        let arch = HostArch::detect();
        #[cfg(target_arch = "x86_64")]
        assert_eq!(arch, HostArch::X86_64);
        #[cfg(target_arch = "aarch64")]
        assert_eq!(arch, HostArch::Aarch64);
        #[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
        assert_ne!(arch, HostArch::X86_64);
    }

    #[test]
    fn test_host_simd_capabilities() {
        let caps = SimdCapabilities::detect_host();
        // Every supported host provides at least 128-bit vectors.
        assert!(caps.max_vector_width >= 128);
    }

    #[test]
    fn test_baseline_never_exceeds_runtime_probe() {
        let baseline = SimdCapabilities::baseline(HostArch::detect());
        let probed = SimdCapabilities::detect_host();
        assert!(baseline.max_vector_width <= probed.max_vector_width);
    }
}
