//! Out-of-band shutdown on SIGINT and SIGTERM.
//!
//! The handler runs in signal context, so it is restricted to stopping the
//! peripheral and `_exit`. Ordinary teardown (buffer release, pipeline
//! shutdown) stays on the main path and is skipped entirely here; what
//! matters is that the device never keeps scanning memory the process no
//! longer owns.

use color_eyre::{eyre::eyre, Result};
use nix::sys::signal::{self, SaFlags, SigAction, SigHandler, SigSet, Signal};

use crate::device::hdmi;

extern "C" fn on_signal(signum: libc::c_int) {
    // An interactive interrupt waits for the peripheral to finish its
    // current frame; anything else tears the output down immediately.
    if signum == libc::SIGINT {
        hdmi::signal_stop();
    } else {
        hdmi::signal_stop_now();
    }
    unsafe { libc::_exit(2) };
}

/// Install the termination handlers. Must run before scanout starts so a
/// kill can never leave the peripheral scanning a freed buffer.
pub fn install() -> Result<()> {
    let action = SigAction::new(
        SigHandler::Handler(on_signal),
        SaFlags::empty(),
        SigSet::empty(),
    );
    unsafe {
        signal::sigaction(Signal::SIGINT, &action).map_err(|e| eyre!("sigaction(SIGINT): {e}"))?;
        signal::sigaction(Signal::SIGTERM, &action)
            .map_err(|e| eyre!("sigaction(SIGTERM): {e}"))?;
    }
    Ok(())
}
