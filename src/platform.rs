use anyhow::Result;
use crossbeam_channel::Sender;
use std::process;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::thread;
use tracing::{info, warn};

#[cfg(unix)]
use signal_hook::consts::{SIGINT, SIGPIPE, SIGTERM, SIGUSR1};
#[cfg(unix)]
use signal_hook::iterator::Signals;

#[cfg(windows)]
use signal_hook::{consts::SIGINT, flag};

/// Standard Unix exit codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitCode {
    Success = 0,
    GeneralError = 1,
    InvalidUsage = 2,
    SignalInt = 130,  // 128 + SIGINT (2)
    SignalPipe = 141, // 128 + SIGPIPE (13)
    SignalTerm = 143, // 128 + SIGTERM (15)
}

impl ExitCode {
    pub fn exit(self) -> ! {
        process::exit(self as i32)
    }

    fn from_code(code: i32) -> Option<Self> {
        match code {
            130 => Some(ExitCode::SignalInt),
            141 => Some(ExitCode::SignalPipe),
            143 => Some(ExitCode::SignalTerm),
            _ => None,
        }
    }
}

/// Set once a shutdown signal arrived; the reader treats it as end of input
pub static SHOULD_TERMINATE: AtomicBool = AtomicBool::new(false);
/// Exit code of the signal that started a graceful drain, 0 if none did
static SHUTDOWN_EXIT_CODE: AtomicI32 = AtomicI32::new(0);

/// Control messages sent by the signal handler to the coordinator
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Ctrl {
    /// Drain and exit; carries the exit code for the signal that asked
    Shutdown(ExitCode),
    PrintStats,
}

/// What the handler thread does with one delivered signal
#[derive(Debug, Clone, PartialEq, Eq)]
enum SignalAction {
    Send(Ctrl),
    Exit(ExitCode),
    Ignore,
}

#[cfg(unix)]
fn dispatch(sig: i32, shutdowns: &mut usize) -> SignalAction {
    match sig {
        SIGINT | SIGTERM => {
            let code = if sig == SIGINT {
                ExitCode::SignalInt
            } else {
                ExitCode::SignalTerm
            };
            *shutdowns += 1;
            if *shutdowns > 1 {
                return SignalAction::Exit(code);
            }
            SignalAction::Send(Ctrl::Shutdown(code))
        }
        SIGPIPE => SignalAction::Exit(ExitCode::SignalPipe),
        SIGUSR1 => SignalAction::Send(Ctrl::PrintStats),
        _ => SignalAction::Ignore,
    }
}

fn apply(action: SignalAction, sender: &Sender<Ctrl>) {
    match action {
        SignalAction::Send(ctrl) => {
            if let Ctrl::Shutdown(code) = ctrl {
                SHOULD_TERMINATE.store(true, Ordering::Relaxed);
                SHUTDOWN_EXIT_CODE.store(code as i32, Ordering::Relaxed);
                info!("shutdown signal received, draining pipeline (repeat to exit now)");
            }
            let _ = sender.send(ctrl);
        }
        SignalAction::Exit(code) => code.exit(),
        SignalAction::Ignore => {}
    }
}

/// Owns the thread that turns signals into [`Ctrl`] messages
pub struct SignalHandler {
    _handle: thread::JoinHandle<()>,
}

impl SignalHandler {
    #[cfg(unix)]
    pub fn new(ctrl_sender: Sender<Ctrl>) -> Result<Self> {
        let mut signals = Signals::new([SIGINT, SIGPIPE, SIGTERM, SIGUSR1])?;

        let handle = thread::Builder::new()
            .name("drainflow-signals".to_string())
            .spawn(move || {
                let mut shutdowns = 0usize;
                for sig in signals.forever() {
                    let action = dispatch(sig, &mut shutdowns);
                    if action == SignalAction::Ignore {
                        warn!(signal = sig, "ignoring unexpected signal");
                    }
                    apply(action, &ctrl_sender);
                }
            })?;

        Ok(SignalHandler { _handle: handle })
    }

    #[cfg(windows)]
    pub fn new(ctrl_sender: Sender<Ctrl>) -> Result<Self> {
        let interrupted = std::sync::Arc::new(AtomicBool::new(false));
        flag::register(SIGINT, std::sync::Arc::clone(&interrupted))?;

        let handle = thread::Builder::new()
            .name("drainflow-signals".to_string())
            .spawn(move || {
                let mut shutdowns = 0usize;
                loop {
                    thread::sleep(std::time::Duration::from_millis(100));
                    if interrupted.swap(false, Ordering::Relaxed) {
                        shutdowns += 1;
                        let action = if shutdowns > 1 {
                            SignalAction::Exit(ExitCode::SignalInt)
                        } else {
                            SignalAction::Send(Ctrl::Shutdown(ExitCode::SignalInt))
                        };
                        apply(action, &ctrl_sender);
                    }
                }
            })?;

        Ok(SignalHandler { _handle: handle })
    }

    pub fn should_terminate() -> bool {
        SHOULD_TERMINATE.load(Ordering::Relaxed)
    }

    /// Exit code to use after a signal-triggered drain completed
    pub fn shutdown_exit_code() -> Option<ExitCode> {
        ExitCode::from_code(SHUTDOWN_EXIT_CODE.load(Ordering::Relaxed))
    }
}
