//! Log dispatch shared by every module.
//!
//! MCU builds route through `defmt`; host builds route through `tracing`.
//! Format strings stick to plain `{}` placeholders so both back ends accept
//! them, which means logged values implement both `defmt::Format` and
//! `core::fmt::Display`.

macro_rules! panel_log {
    ($level:ident, $($arg:tt)*) => {{
        #[cfg(feature = "defmt")]
        defmt::$level!($($arg)*);
        #[cfg(all(feature = "tracing", not(feature = "defmt")))]
        tracing::$level!($($arg)*);
        #[cfg(not(any(feature = "tracing", feature = "defmt")))]
        if false {
            let _ = core::format_args!($($arg)*);
        }
    }};
}

macro_rules! panel_debug {
    ($($arg:tt)*) => { panel_log!(debug, $($arg)*) };
}

macro_rules! panel_info {
    ($($arg:tt)*) => { panel_log!(info, $($arg)*) };
}

macro_rules! panel_warn {
    ($($arg:tt)*) => { panel_log!(warn, $($arg)*) };
}

macro_rules! panel_error {
    ($($arg:tt)*) => { panel_log!(error, $($arg)*) };
}
