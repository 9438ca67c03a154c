//! Process-level cleanup of open sessions.
//!
//! Every open session is registered here. When the process exits normally
//! (through an `atexit` hook) or receives SIGINT, SIGTERM or SIGHUP (through
//! a watcher thread), every session still registered is released: staging
//! files are discarded and lock files that are still ours are deleted.
//!
//! Call [`install`] at the top of `main`, before any other thread starts, so
//! that every later thread inherits the blocked signal mask.
//!
//! SIGKILL cannot be intercepted; a killed holder leaves its lock file behind
//! until its lease runs out or someone clears it.

use crate::exit_codes;
use crate::fs::scratch::PROCESS_SCRATCH;
use crate::session::SessionCleanup;
use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, LazyLock, Mutex, MutexGuard, Once};

static SESSIONS: LazyLock<Mutex<HashMap<u64, Arc<SessionCleanup>>>> =
    LazyLock::new(|| Mutex::new(HashMap::new()));

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

static EXIT_HOOK: Once = Once::new();

fn sessions() -> MutexGuard<'static, HashMap<u64, Arc<SessionCleanup>>> {
    SESSIONS.lock().unwrap_or_else(|poison| poison.into_inner())
}

/// Track an open session; returns its registry id.
pub fn register(session: Arc<SessionCleanup>) -> u64 {
    ensure_exit_hook();
    let id = NEXT_ID.fetch_add(1, Ordering::Relaxed);
    tracing::debug!(session = id, file = %session.target().display(), "session registered");
    sessions().insert(id, session);
    id
}

/// Stop tracking a session after it was released.
pub fn deregister(id: u64) {
    if sessions().remove(&id).is_some() {
        tracing::debug!(session = id, "session deregistered");
    }
}

/// Number of sessions currently registered.
pub fn open_sessions() -> usize {
    sessions().len()
}

/// Release every registered session; returns how many were released.
pub fn release_all() -> usize {
    // Take them out first so that release never runs under the registry lock
    let drained: Vec<_> = sessions().drain().collect();
    let count = drained.len();

    for (id, session) in drained {
        tracing::warn!(session = id, file = %session.target().display(), "releasing unfinished session");
        if let Err(e) = session.release() {
            tracing::warn!(session = id, error = %e, "failed to release session");
        }
    }
    count
}

/// Register the `atexit` hook once.
pub fn ensure_exit_hook() {
    EXIT_HOOK.call_once(|| {
        // SAFETY: `run_exit_hook` is a plain extern "C" fn that never unwinds.
        let rc = unsafe { libc::atexit(run_exit_hook) };
        if rc != 0 {
            tracing::warn!("failed to register exit hook; open sessions will not be released on exit");
        }
    });
}

extern "C" fn run_exit_hook() {
    let _ = std::panic::catch_unwind(|| {
        release_all();
        PROCESS_SCRATCH.cleanup();
    });
}

/// Install the exit hook and the terminating-signal watcher.
pub fn install() -> io::Result<()> {
    ensure_exit_hook();
    install_signal_watcher()
}

#[cfg(unix)]
const TERMINATING_SIGNALS: [libc::c_int; 3] = [libc::SIGINT, libc::SIGTERM, libc::SIGHUP];

#[cfg(unix)]
fn install_signal_watcher() -> io::Result<()> {
    let mut set = std::mem::MaybeUninit::<libc::sigset_t>::uninit();

    // SAFETY: the set is initialized by sigemptyset before any other use, and
    // pthread_sigmask only reads it.
    let set = unsafe {
        libc::sigemptyset(set.as_mut_ptr());
        for signal in TERMINATING_SIGNALS {
            libc::sigaddset(set.as_mut_ptr(), signal);
        }
        let set = set.assume_init();
        let rc = libc::pthread_sigmask(libc::SIG_BLOCK, &set, std::ptr::null_mut());
        if rc != 0 {
            return Err(io::Error::from_raw_os_error(rc));
        }
        set
    };

    std::thread::Builder::new()
        .name("sidelock-signals".to_string())
        .spawn(move || watch_signals(set))?;
    Ok(())
}

#[cfg(unix)]
fn watch_signals(set: libc::sigset_t) {
    let mut signal: libc::c_int = 0;
    // SAFETY: `set` is a valid signal set and `signal` a valid out pointer.
    let rc = unsafe { libc::sigwait(&set, &mut signal) };
    if rc != 0 {
        tracing::warn!(error = %io::Error::from_raw_os_error(rc), "sigwait failed; signal cleanup disabled");
        return;
    }

    tracing::warn!(signal, "terminating signal received, releasing open sessions");
    release_all();
    PROCESS_SCRATCH.cleanup();
    std::process::exit(exit_codes::SIGNAL_BASE + signal);
}

/// Unblock the terminating signals in a child spawned by `command`.
///
/// Children inherit the signal mask that [`install`] sets up, which would
/// leave them deaf to SIGINT and SIGTERM.
#[cfg(unix)]
pub fn unblock_signals_in_child(command: &mut std::process::Command) {
    use std::os::unix::process::CommandExt;

    // SAFETY: the closure only calls async-signal-safe functions on a
    // stack-local signal set.
    unsafe {
        command.pre_exec(|| {
            let mut set = std::mem::MaybeUninit::<libc::sigset_t>::uninit();
            libc::sigemptyset(set.as_mut_ptr());
            for signal in TERMINATING_SIGNALS {
                libc::sigaddset(set.as_mut_ptr(), signal);
            }
            let set = set.assume_init();
            let rc = libc::pthread_sigmask(libc::SIG_UNBLOCK, &set, std::ptr::null_mut());
            if rc != 0 {
                return Err(io::Error::from_raw_os_error(rc));
            }
            Ok(())
        });
    }
}

#[cfg(not(unix))]
fn install_signal_watcher() -> io::Result<()> {
    Ok(())
}

#[cfg(not(unix))]
pub fn unblock_signals_in_child(_command: &mut std::process::Command) {}
