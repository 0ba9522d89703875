//! Kernel configuration.

use trustgate_core::Identifier;

/// Configuration for the kernel.
///
/// The default vault and default identity are process-wide conveniences;
/// they are carried here rather than looked up implicitly.
#[derive(Debug, Clone)]
pub struct KernelConfig {
    /// Default vault installed in the registry when the kernel opens. Unset
    /// keeps whatever default the registry already has.
    pub default_vault: Option<String>,
    /// Identity this process acts as by default.
    pub default_identity: Option<Identifier>,
    /// Replay the whole change history on every authorization instead of only
    /// reading the current key.
    pub verify_chain_on_authorize: bool,
    /// Extra attempts a kernel-driven rotation makes after losing a
    /// compare-and-swap race.
    pub rotation_retries: u32,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            default_vault: None,
            default_identity: None,
            verify_chain_on_authorize: true,
            rotation_retries: 3,
        }
    }
}
