//! Internal logging macros.
//!
//! Every diagnostic in the crate goes through these macros so the backend is
//! picked once, by feature flag:
//!
//! - `log`: forwards to the [`log`](https://docs.rs/log) facade
//! - `defmt`: forwards to [`defmt`](https://defmt.ferrous-systems.com/)
//! - `esp32-log`: prints through `esp-println`
//!
//! With none of them enabled the macros expand to nothing but still borrow
//! their arguments, so call sites compile identically in every configuration.
//! Arguments must be plain values (`{}` only) so the same format string is
//! valid for both `log` and `defmt`.
#![allow(unused_macros)]

macro_rules! log_event {
    ($level:ident, $s:literal $(, $x:expr)* $(,)?) => {
        {
            #[cfg(feature = "log")]
            ::log::$level!($s $(, $x)*);
            #[cfg(feature = "defmt")]
            ::defmt::$level!($s $(, $x)*);
            #[cfg(feature = "esp32-log")]
            ::esp_println::println!(concat!("[msgbus] ", $s) $(, $x)*);
            #[cfg(not(any(feature = "log", feature = "defmt", feature = "esp32-log")))]
            let _ = ($( & $x ),*);
        }
    };
}

macro_rules! trace {
    ($($arg:tt)*) => { log_event!(trace, $($arg)*) };
}

macro_rules! debug {
    ($($arg:tt)*) => { log_event!(debug, $($arg)*) };
}

macro_rules! info {
    ($($arg:tt)*) => { log_event!(info, $($arg)*) };
}

macro_rules! warn {
    ($($arg:tt)*) => { log_event!(warn, $($arg)*) };
}

macro_rules! error {
    ($($arg:tt)*) => { log_event!(error, $($arg)*) };
}
