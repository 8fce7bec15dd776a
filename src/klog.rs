//! Leveled logging over the two console sinks (`serial`, `vga_buffer`).
//!
//! Subsystems call `klog::info!`/`warn!`/`error!` instead of reaching for
//! `print!`/`serial_print!` directly, the way a kernel with more than a
//! handful of call sites needs a consistent format. Both sinks are already
//! `spin::Mutex`-guarded, so interleaving across concurrent callers is not
//! possible within a single macro invocation.

/// Emits an informational line to both console sinks.
#[macro_export]
macro_rules! klog_info {
    ($($arg:tt)*) => {{
        $crate::println!("[info] {}", format_args!($($arg)*));
        $crate::serial_println!("[info] {}", format_args!($($arg)*));
    }};
}

/// Emits a warning line to both console sinks.
#[macro_export]
macro_rules! klog_warn {
    ($($arg:tt)*) => {{
        $crate::println!("[warn] {}", format_args!($($arg)*));
        $crate::serial_println!("[warn] {}", format_args!($($arg)*));
    }};
}

/// Emits an error line to both console sinks.
#[macro_export]
macro_rules! klog_error {
    ($($arg:tt)*) => {{
        $crate::println!("[error] {}", format_args!($($arg)*));
        $crate::serial_println!("[error] {}", format_args!($($arg)*));
    }};
}

pub use crate::{klog_error as error, klog_info as info, klog_warn as warn};
