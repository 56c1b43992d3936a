//! SMC call numbers used by payload code to request privileged actions
//!
//! Payloads run at a lower privilege level and ask the monitor, via `smc`,
//! to perform the few actions it mediates. Each call is a fixed function
//! number in x0 plus up to three register-passed arguments; the result comes
//! back in x0.

/// Payload reports that it has started successfully.
pub const NOTIFY_PAYLOAD_STARTED: u64 = 0xF200_0000;
/// Payload reports its own crash: x1 = description string, x2 = fault pc.
pub const NOTIFY_PAYLOAD_CRASHED: u64 = 0xF200_0001;
/// Write to the output ring: x1 = data pointer, x2 = length; returns count.
pub const WRITE_STDOUT: u64 = 0xF200_0002;
/// Returns the monitor's ABI version as (major << 8) | minor.
pub const GET_ABI_VERSION: u64 = 0xF200_0003;
/// Route a peripheral interrupt to the payload: x1 = id, x2 = priority.
pub const GIC_IRQ_CONFIGURE: u64 = 0xF200_0010;
/// Enable a previously configured interrupt: x1 = id.
pub const GIC_IRQ_ENABLE: u64 = 0xF200_0011;
/// Disable an interrupt: x1 = id.
pub const GIC_IRQ_DISABLE: u64 = 0xF200_0012;

/// ABI version pair carried in the payload image header and implemented by
/// the monitor. Policy: major must match exactly, payload minor must not
/// exceed the monitor's (forward-compatible additions only).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AbiVersion {
    pub major: u8,
    pub minor: u8,
}

/// The ABI this protocol revision implements.
pub const ABI_VERSION: AbiVersion = AbiVersion { major: 1, minor: 1 };

impl AbiVersion {
    /// True when a payload built against `self` may run on a monitor
    /// implementing `monitor`.
    pub fn compatible_with(self, monitor: AbiVersion) -> bool {
        self.major == monitor.major && self.minor <= monitor.minor
    }

    pub fn to_packed(self) -> u64 {
        ((self.major as u64) << 8) | self.minor as u64
    }

    pub fn from_packed(packed: u64) -> Self {
        Self {
            major: ((packed >> 8) & 0xFF) as u8,
            minor: (packed & 0xFF) as u8,
        }
    }
}

/// GIC priority values payloads may request for their own interrupts.
/// Anything numerically lower (= more urgent) is reserved for the monitor.
pub const PAYLOAD_PRIORITY_MIN_VALUE: u64 = 0x80;
pub const PAYLOAD_PRIORITY_MAX_VALUE: u64 = 0xF0;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn abi_compatibility_policy() {
        let monitor = AbiVersion { major: 1, minor: 1 };
        assert!(AbiVersion { major: 1, minor: 0 }.compatible_with(monitor));
        assert!(AbiVersion { major: 1, minor: 1 }.compatible_with(monitor));
        assert!(!AbiVersion { major: 1, minor: 2 }.compatible_with(monitor));
        assert!(!AbiVersion { major: 2, minor: 0 }.compatible_with(monitor));
        assert!(!AbiVersion { major: 0, minor: 1 }.compatible_with(monitor));
    }

    #[test]
    fn abi_packs_into_one_register() {
        let v = AbiVersion { major: 1, minor: 1 };
        assert_eq!(v.to_packed(), 0x0101);
        assert_eq!(AbiVersion::from_packed(v.to_packed()), v);
    }
}
