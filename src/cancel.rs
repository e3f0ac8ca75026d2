//! One-shot cancellation shared between the writer and the interrupt
//! listener thread.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};

/// Cloneable stop flag. Once set it stays set.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Set from the signal handler; nothing else may happen there.
static INTERRUPTED: AtomicBool = AtomicBool::new(false);

/// Install SIGINT/SIGTERM (or console Ctrl+C) handling and start a listener
/// thread that cancels `token` on the first interrupt.
pub fn install_interrupt_listener(token: CancelToken) -> Result<()> {
    install_handler()?;
    thread::Builder::new()
        .name("interrupt-listener".into())
        .spawn(move || loop {
            if INTERRUPTED.load(Ordering::SeqCst) {
                log::warn!("Interrupt received, stopping after the current chunk");
                token.cancel();
                break;
            }
            thread::sleep(Duration::from_millis(50));
        })
        .context("failed to spawn interrupt listener")?;
    Ok(())
}

#[cfg(unix)]
fn install_handler() -> Result<()> {
    extern "C" fn on_signal(_sig: libc::c_int) {
        INTERRUPTED.store(true, Ordering::SeqCst);
    }

    for sig in [libc::SIGINT, libc::SIGTERM] {
        let prev = unsafe { libc::signal(sig, on_signal as libc::sighandler_t) };
        if prev == libc::SIG_ERR {
            return Err(std::io::Error::last_os_error())
                .with_context(|| format!("cannot install handler for signal {sig}"));
        }
    }
    Ok(())
}

#[cfg(windows)]
fn install_handler() -> Result<()> {
    use windows::core::BOOL;
    use windows::Win32::System::Console::SetConsoleCtrlHandler;

    unsafe extern "system" fn on_ctrl(_ctrl_type: u32) -> BOOL {
        INTERRUPTED.store(true, Ordering::SeqCst);
        BOOL::from(true)
    }

    unsafe { SetConsoleCtrlHandler(Some(on_ctrl), true) }
        .context("cannot install console control handler")
}

#[cfg(not(any(unix, windows)))]
fn install_handler() -> Result<()> {
    log::warn!("Interrupt handling is not available on this platform");
    Ok(())
}
