use nix::sys::termios;

use std::io;
use std::os::unix::io::AsRawFd;

/// Whether stdout is a terminal the dashboard can draw on.
pub fn check_terminal() -> bool {
    let stdout_fd = io::stdout().as_raw_fd();
    termios::tcgetattr(stdout_fd).is_ok()
}
