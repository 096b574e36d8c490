//! Host target probing for the engine.
//!
//! Combines the `recast-platform` vector probe with the Cranelift native ISA
//! check into the single snapshot the engine keeps: triple, CPU name,
//! feature bag, and the vector-register-width hint installed on loaded
//! functions.

use recast_platform::SimdCapabilities;

/// What the engine knows about the machine it runs on.
#[derive(Debug, Clone)]
pub struct TargetProbe {
    pub triple: String,
    pub cpu: String,
    pub features: Vec<String>,
    /// Widest usable vector register in bits: 512 with AVX-512, 256 with
    /// AVX, 2048 with SVE, 128 otherwise. Degrades to 128 when no native
    /// ISA is available.
    pub max_vector_width: u32,
}

impl TargetProbe {
    pub fn probe() -> Self {
        let caps = SimdCapabilities::detect_host();
        let triple = target_lexicon::Triple::host();
        let cpu = triple.architecture.to_string();

        let max_vector_width = if cranelift_native::builder().is_ok() {
            caps.max_vector_width
        } else {
            // No native back-end for this host; keep the baseline hint so
            // IR-level decisions stay conservative.
            128
        };

        TargetProbe {
            triple: triple.to_string(),
            cpu,
            features: caps.features,
            max_vector_width,
        }
    }

    /// Comma-separated feature list for the `@target_features` annotation.
    pub fn feature_string(&self) -> String {
        self.features.join(",")
    }
}
