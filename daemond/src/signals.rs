//! Signal name/number lookup for requests arriving on service FIFOs
//!
//! A request line is either a bare decimal number or a canonical short
//! name without the `SIG` prefix, matched case-insensitively.

use libc::c_int;
use nix::sys::signal::Signal;

const TABLE: &[(c_int, &str)] = &[
    (libc::SIGABRT, "ABRT"),
    (libc::SIGALRM, "ALRM"),
    (libc::SIGBUS, "BUS"),
    (libc::SIGCHLD, "CHLD"),
    #[cfg(any(target_os = "linux", target_os = "android"))]
    (libc::SIGCHLD, "CLD"),
    (libc::SIGCONT, "CONT"),
    #[cfg(any(target_os = "macos", target_os = "freebsd"))]
    (libc::SIGEMT, "EMT"),
    (libc::SIGFPE, "FPE"),
    (libc::SIGHUP, "HUP"),
    (libc::SIGILL, "ILL"),
    #[cfg(any(target_os = "macos", target_os = "freebsd"))]
    (libc::SIGINFO, "INFO"),
    (libc::SIGINT, "INT"),
    (libc::SIGIO, "IO"),
    (libc::SIGIOT, "IOT"),
    (libc::SIGKILL, "KILL"),
    (libc::SIGPIPE, "PIPE"),
    #[cfg(any(target_os = "linux", target_os = "android"))]
    (libc::SIGPOLL, "POLL"),
    (libc::SIGPROF, "PROF"),
    #[cfg(any(target_os = "linux", target_os = "android"))]
    (libc::SIGPWR, "PWR"),
    (libc::SIGQUIT, "QUIT"),
    (libc::SIGSEGV, "SEGV"),
    #[cfg(all(
        any(target_os = "linux", target_os = "android"),
        not(any(target_arch = "mips", target_arch = "mips64", target_arch = "sparc64"))
    ))]
    (libc::SIGSTKFLT, "STKFLT"),
    (libc::SIGSTOP, "STOP"),
    (libc::SIGSYS, "SYS"),
    (libc::SIGTERM, "TERM"),
    (libc::SIGTRAP, "TRAP"),
    (libc::SIGTSTP, "TSTP"),
    (libc::SIGTTIN, "TTIN"),
    (libc::SIGTTOU, "TTOU"),
    (libc::SIGURG, "URG"),
    (libc::SIGUSR1, "USR1"),
    (libc::SIGUSR2, "USR2"),
    (libc::SIGVTALRM, "VTALRM"),
    (libc::SIGWINCH, "WINCH"),
    (libc::SIGXCPU, "XCPU"),
    (libc::SIGXFSZ, "XFSZ"),
];

/// Resolve one request line (without its newline) to a signal number.
///
/// Digits are taken as-is, without checking table membership; the kill
/// call rejects numbers the platform does not know. Zero and values that
/// do not fit a C `int` are rejected here.
pub fn lookup(line: &[u8]) -> Option<c_int> {
    if line.is_empty() {
        return None;
    }
    if line.iter().all(u8::is_ascii_digit) {
        return parse_number(line);
    }
    TABLE
        .iter()
        .find(|(_, name)| name.as_bytes().eq_ignore_ascii_case(line))
        .map(|(num, _)| *num)
}

fn parse_number(digits: &[u8]) -> Option<c_int> {
    let mut value: c_int = 0;
    for &d in digits {
        value = value
            .checked_mul(10)?
            .checked_add(c_int::from(d - b'0'))?;
    }
    (value > 0).then_some(value)
}

/// Render a signal number for logs, e.g. `SIGTERM[15]`
pub fn describe(sig: c_int) -> String {
    match Signal::try_from(sig) {
        Ok(signal) => format!("{}[{sig}]", signal.as_str()),
        Err(_) => format!("SIG?[{sig}]"),
    }
}
