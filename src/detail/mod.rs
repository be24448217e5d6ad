//! Architecture-specific register files and the context-switch primitive.
//!
//! Each supported `(arch, ABI)` pair gets its own small module built around a
//! [`core::arch::global_asm!`] block for the swap itself -- the only part of
//! the crate that cannot be written in safe, portable Rust. The public shape
//! (`Registers`, `init_call_frame`, `swap`, `stack_pointer`) is identical
//! across architectures so [`crate::reg_context::ArchContext`] never has to
//! know which one it is built against.

cfg_if::cfg_if! {
    if #[cfg(target_arch = "x86_64")] {
        mod x86_64;
        pub(crate) use self::x86_64::*;
    } else if #[cfg(target_arch = "aarch64")] {
        mod aarch64;
        pub(crate) use self::aarch64::*;
    } else {
        compile_error!("strand: unsupported target architecture");
    }
}
