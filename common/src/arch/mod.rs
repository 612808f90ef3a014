//! Architecture-specific interrupt masking.
//!
//! Exactly one implementation is exported as [`CpuIrq`]; the locks in
//! [`crate::sync`] are parameterized over it through [`crate::sync::IrqMutex`].

mod host;

pub use host::HostIrq;

cfg_if::cfg_if! {
    if #[cfg(all(target_arch = "arm", target_os = "none"))] {
        mod cortex_m;
        pub use cortex_m::CortexMIrq;
        pub use cortex_m::CortexMIrq as CpuIrq;
    } else {
        pub use host::HostIrq as CpuIrq;
    }
}
