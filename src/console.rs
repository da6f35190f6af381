//! Component F: the console stub backing `sys_cputs`/`sys_cgetc`.
//!
//! The teacher drives a VGA buffer and a serial port side by side behind one
//! lock (`console::print`); neither exists in this crate (no boot path, no
//! hardware), so the sink is a simple in-memory ring the tests can inspect,
//! exercised through the same `print!`/`println!` macro surface and mirrored
//! to `log::info!` the way `doublegate-VeridianOS` funnels kernel
//! diagnostics through `log`.

use alloc::collections::VecDeque;
use alloc::string::String;
use spin::Mutex;

#[cfg(test)]
const INPUT_BUF: usize = 128;

struct Console {
    output: String,
    input: VecDeque<u8>,
}

static CONSOLE: Mutex<Console> = Mutex::new(Console {
    output: String::new(),
    input: VecDeque::new(),
});

pub(crate) fn print(args: core::fmt::Arguments) {
    use core::fmt::Write;
    let mut con = CONSOLE.lock();
    let _ = con.output.write_fmt(args);
    log::info!("{}", args);
}

#[macro_export]
macro_rules! print {
    ($($arg:tt)*) => {
        $crate::console::print(format_args!($($arg)*));
    }
}

#[macro_export]
macro_rules! println {
    () => ($crate::print!("\n"));
    ($($arg:tt)*) => {
        $crate::print!("{}\n", format_args!($($arg)*));
    }
}

/// Writes `len` bytes starting at `buf` to the console. Callers are
/// expected to have already run `user_mem_assert` on the range; this
/// function trusts the slice it is given.
pub(crate) fn cputs(bytes: &[u8]) {
    match core::str::from_utf8(bytes) {
        Ok(s) => print!("{}", s),
        Err(_) => {
            for &b in bytes {
                CONSOLE.lock().output.push(b as char);
            }
        }
    }
}

/// Non-blocking read of one pending input byte, or 0 if none is queued.
/// Matches `sys_cgetc`'s "does not block" contract.
pub(crate) fn cgetc() -> u8 {
    CONSOLE.lock().input.pop_front().unwrap_or(0)
}

/// Test/host-side hook to feed bytes as if typed at the console.
#[cfg(test)]
pub(crate) fn push_input(b: u8) {
    let mut con = CONSOLE.lock();
    if con.input.len() < INPUT_BUF {
        con.input.push_back(b);
    }
}

#[cfg(test)]
pub(crate) fn take_output() -> String {
    core::mem::take(&mut CONSOLE.lock().output)
}
