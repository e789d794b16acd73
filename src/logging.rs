//! Logging macros with a `[file:line]` prefix
//!
//! Thin wrappers around the `log` crate. Every record carries the call site
//! so a line on the serial console or in `RUST_LOG` output points straight at
//! the code that emitted it.
//!
//! ```ignore
//! info!("queue: dropped {} (full)", line);
//! // [src/queue.rs:57] queue: dropped status() (full)
//! ```
//!
//! The firmware crate imports these instead of the plain `log` macros.

#[macro_export]
macro_rules! info {
    ($($arg:tt)*) => {
        {
            const LOC: &str = concat!("[", file!(), ":", line!(), "]");
            ::log::info!("{} {}", LOC, format_args!($($arg)*))
        }
    };
}

#[macro_export]
macro_rules! warn {
    ($($arg:tt)*) => {
        {
            const LOC: &str = concat!("[", file!(), ":", line!(), "]");
            ::log::warn!("{} {}", LOC, format_args!($($arg)*))
        }
    };
}

#[macro_export]
macro_rules! error {
    ($($arg:tt)*) => {
        {
            const LOC: &str = concat!("[", file!(), ":", line!(), "]");
            ::log::error!("{} {}", LOC, format_args!($($arg)*))
        }
    };
}

#[macro_export]
macro_rules! debug {
    ($($arg:tt)*) => {
        {
            const LOC: &str = concat!("[", file!(), ":", line!(), "]");
            ::log::debug!("{} {}", LOC, format_args!($($arg)*))
        }
    };
}

#[macro_export]
macro_rules! trace {
    ($($arg:tt)*) => {
        {
            const LOC: &str = concat!("[", file!(), ":", line!(), "]");
            ::log::trace!("{} {}", LOC, format_args!($($arg)*))
        }
    };
}
