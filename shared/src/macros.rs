// On bare metal everything goes out of COM1. Hosted builds (unit tests, the
// simulator) print through std instead.

#[cfg(target_os = "none")]
#[macro_export]
macro_rules! print {
    ($($arg:tt)*) => {{
        use core::fmt::Write;
        // SAFETY: The serial writer is only used from one context at a time.
        unsafe {
            let _ = write!(
                *core::ptr::addr_of_mut!($crate::serial::SERIAL_WRITER),
                "{}",
                format_args!($($arg)*)
            );
        }
    }};
}

#[cfg(target_os = "none")]
#[macro_export]
macro_rules! println {
    () => {
        $crate::print!("\n")
    };
    ($($arg:tt)*) => {
        $crate::print!("{}\n", format_args!($($arg)*))
    };
}

#[cfg(target_os = "none")]
#[macro_export]
macro_rules! eprintln {
    ($($arg:tt)*) => {
        $crate::println!($($arg)*)
    };
}

#[cfg(not(target_os = "none"))]
#[macro_export]
macro_rules! print {
    ($($arg:tt)*) => {
        ::std::print!($($arg)*)
    };
}

#[cfg(not(target_os = "none"))]
#[macro_export]
macro_rules! println {
    ($($arg:tt)*) => {
        ::std::println!($($arg)*)
    };
}

#[cfg(not(target_os = "none"))]
#[macro_export]
macro_rules! eprintln {
    ($($arg:tt)*) => {
        ::std::eprintln!($($arg)*)
    };
}
