//! Virtual-to-physical translation.
//!
//! Paging beyond identity mapping is out of scope for this core (see the
//! crate-level Non-goals). [`PagedMMU`] still models the translation step
//! as a distinct stage -- `resolve` is the seam a future page-table walker
//! would extend -- but its only supported configuration is `enabled =
//! false`, under which `resolve(virt) = virt`.

use crate::error::{Result, VmError};

/// Virtual→physical address translation stage.
///
/// Always disabled in this core; `enabled` exists so the translation path
/// is visibly a stage rather than a no-op bypassed by the caller.
pub struct PagedMMU {
    enabled: bool,
}

impl PagedMMU {
    /// Build a `PagedMMU` with paging disabled (the only supported state).
    pub fn new() -> Self {
        PagedMMU { enabled: false }
    }

    /// Whether paging is enabled.
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Resolve a virtual (linear) address to a physical address.
    ///
    /// With paging disabled, `resolve(virt) = virt`. Enabling paging is not
    /// implemented; attempting to do so fails fatally with a decoder-style
    /// error rather than silently behaving as identity-mapped.
    pub fn resolve(&self, virt: u64) -> Result<u64> {
        if self.enabled {
            return Err(VmError::DecoderError {
                ip: virt,
                reason: "paging beyond identity mapping is not supported".into(),
            });
        }
        Ok(virt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_resolve() {
        let mmu = PagedMMU::new();
        assert_eq!(mmu.resolve(0x1234_5678).unwrap(), 0x1234_5678);
    }
}
