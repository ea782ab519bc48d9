//! Signal name and number parsing for the kill command.

use std::convert::TryFrom;

use anyhow::{bail, Context, Result};
use nix::sys::signal::Signal;

/// Accepts numbers (`15`), short names (`TERM`, case-insensitive) and full
/// names (`SIGTERM`).
pub fn from_str(signal: &str) -> Result<Signal> {
    if let Ok(number) = signal.parse::<i32>() {
        return Signal::try_from(number)
            .with_context(|| format!("{} is not a valid signal number", number));
    }

    let name = signal.to_ascii_uppercase();
    let short = name.strip_prefix("SIG").unwrap_or(&name);

    Ok(match short {
        "HUP" => Signal::SIGHUP,
        "INT" => Signal::SIGINT,
        "QUIT" => Signal::SIGQUIT,
        "ILL" => Signal::SIGILL,
        "TRAP" => Signal::SIGTRAP,
        "ABRT" | "IOT" => Signal::SIGABRT,
        "BUS" => Signal::SIGBUS,
        "FPE" => Signal::SIGFPE,
        "KILL" => Signal::SIGKILL,
        "USR1" => Signal::SIGUSR1,
        "SEGV" => Signal::SIGSEGV,
        "USR2" => Signal::SIGUSR2,
        "PIPE" => Signal::SIGPIPE,
        "ALRM" => Signal::SIGALRM,
        "TERM" => Signal::SIGTERM,
        "STKFLT" => Signal::SIGSTKFLT,
        "CHLD" => Signal::SIGCHLD,
        "CONT" => Signal::SIGCONT,
        "STOP" => Signal::SIGSTOP,
        "TSTP" => Signal::SIGTSTP,
        "TTIN" => Signal::SIGTTIN,
        "TTOU" => Signal::SIGTTOU,
        "URG" => Signal::SIGURG,
        "XCPU" => Signal::SIGXCPU,
        "XFSZ" => Signal::SIGXFSZ,
        "VTALRM" => Signal::SIGVTALRM,
        "PROF" => Signal::SIGPROF,
        "WINCH" => Signal::SIGWINCH,
        "IO" | "POLL" => Signal::SIGIO,
        "PWR" => Signal::SIGPWR,
        "SYS" => Signal::SIGSYS,
        _ => bail!("{} is not a valid signal", signal),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numbers() {
        assert_eq!(from_str("9").unwrap(), Signal::SIGKILL);
        assert_eq!(from_str("15").unwrap(), Signal::SIGTERM);
    }

    #[test]
    fn test_short_names_in_any_case() {
        assert_eq!(from_str("term").unwrap(), Signal::SIGTERM);
        assert_eq!(from_str("KILL").unwrap(), Signal::SIGKILL);
    }

    #[test]
    fn test_full_names() {
        assert_eq!(from_str("SIGTERM").unwrap(), Signal::SIGTERM);
        assert_eq!(from_str("sighup").unwrap(), Signal::SIGHUP);
    }

    #[test]
    fn test_invalid_signals() {
        assert!(from_str("SIGWRONG").is_err());
        assert!(from_str("1000").is_err());
        assert!(from_str("").is_err());
    }
}
