//! Preemption timer.
//!
//! A process-wide `SIGALRM` interval timer (`setitimer(ITIMER_REAL)`). The
//! signal handler only advances [`TICKS`]; scheduling decisions happen
//! outside signal context, at preemption points, where the kernel notices
//! that the tick count moved since the running thread was dispatched.
//!
//! The timer is shared: every runtime with a quantum holds a
//! [`PreemptionTimer`], the first one arms it, and dropping the last one
//! disarms it. The handler stays installed once installed, so a signal
//! already in flight when the timer is disarmed is still harmless.

use crate::errors::TimerError;
use crate::time::{Duration, TICKS};
use spin::Mutex;

struct Registry {
    users: usize,
    quantum: Option<Duration>,
    handler_installed: bool,
}

static REGISTRY: Mutex<Registry> = Mutex::new(Registry {
    users: 0,
    quantum: None,
    handler_installed: false,
});

/// Handle keeping the shared interval timer armed.
#[derive(Debug)]
pub struct PreemptionTimer {
    quantum: Duration,
}

impl PreemptionTimer {
    /// Arm the interval timer with `quantum`, or join the already armed one.
    ///
    /// # Errors
    ///
    /// * `InvalidQuantum` - zero, below one microsecond, or too large
    /// * `SignalHandler` / `Arm` - the OS call failed
    /// * `Unsupported` - built without the `signal-timer` feature
    pub fn start(quantum: Duration) -> Result<Self, TimerError> {
        if quantum.as_micros() == 0 {
            return Err(TimerError::InvalidQuantum);
        }

        let mut registry = REGISTRY.lock();
        match registry.quantum {
            Some(armed) => {
                if armed != quantum {
                    log::debug!(
                        "preemption timer already armed at {:?}; sharing it instead of {:?}",
                        armed,
                        quantum
                    );
                }
                registry.users += 1;
                Ok(Self { quantum: armed })
            }
            None => {
                if !registry.handler_installed {
                    imp::install_handler()?;
                    registry.handler_installed = true;
                }
                imp::arm(Some(quantum))?;
                registry.quantum = Some(quantum);
                registry.users = 1;
                log::debug!("preemption timer armed at {:?}", quantum);
                Ok(Self { quantum })
            }
        }
    }

    /// Interval between ticks.
    pub fn quantum(&self) -> Duration {
        self.quantum
    }

    /// Ticks delivered so far in this process.
    pub fn ticks() -> u64 {
        TICKS.ticks()
    }

    /// Whether any runtime currently keeps the timer armed.
    pub fn is_armed() -> bool {
        REGISTRY.lock().quantum.is_some()
    }
}

impl Drop for PreemptionTimer {
    fn drop(&mut self) {
        let mut registry = REGISTRY.lock();
        registry.users = registry.users.saturating_sub(1);
        if registry.users == 0 {
            if let Err(err) = imp::arm(None) {
                log::warn!("failed to disarm preemption timer: {}", err);
            }
            registry.quantum = None;
            log::debug!("preemption timer disarmed");
        }
    }
}

#[cfg(feature = "signal-timer")]
mod imp {
    use super::*;
    use core::ptr;

    extern "C" fn on_alarm(_signal: libc::c_int) {
        TICKS.increment();
    }

    fn errno() -> i32 {
        std::io::Error::last_os_error().raw_os_error().unwrap_or(0)
    }

    pub(super) fn install_handler() -> Result<(), TimerError> {
        // SAFETY: the action is fully initialized before use, and the handler
        // is async-signal-safe (a single atomic increment).
        unsafe {
            let mut action: libc::sigaction = core::mem::zeroed();
            action.sa_sigaction = on_alarm as extern "C" fn(libc::c_int) as libc::sighandler_t;
            action.sa_flags = libc::SA_RESTART;
            libc::sigemptyset(&mut action.sa_mask);
            if libc::sigaction(libc::SIGALRM, &action, ptr::null_mut()) != 0 {
                return Err(TimerError::SignalHandler(errno()));
            }
        }
        Ok(())
    }

    /// Program the interval timer; `None` disarms it.
    pub(super) fn arm(quantum: Option<Duration>) -> Result<(), TimerError> {
        let interval = match quantum {
            Some(quantum) => libc::timeval {
                tv_sec: libc::time_t::try_from(quantum.as_secs())
                    .map_err(|_| TimerError::InvalidQuantum)?,
                tv_usec: quantum.subsec_micros() as libc::suseconds_t,
            },
            None => libc::timeval {
                tv_sec: 0,
                tv_usec: 0,
            },
        };
        let timer = libc::itimerval {
            it_interval: interval,
            it_value: interval,
        };
        // SAFETY: plain system call with a valid, initialized argument.
        if unsafe { libc::setitimer(libc::ITIMER_REAL, &timer, ptr::null_mut()) } != 0 {
            return Err(TimerError::Arm(errno()));
        }
        Ok(())
    }
}

#[cfg(not(feature = "signal-timer"))]
mod imp {
    use super::*;

    pub(super) fn install_handler() -> Result<(), TimerError> {
        Err(TimerError::Unsupported)
    }

    pub(super) fn arm(quantum: Option<Duration>) -> Result<(), TimerError> {
        match quantum {
            Some(_) => Err(TimerError::Unsupported),
            None => Ok(()),
        }
    }
}

/// Cooperative preemption point for long-running loops.
///
/// Expands to [`thread::preemption_point()`](crate::thread::preemption_point).
#[macro_export]
macro_rules! preemption_point {
    () => {
        $crate::thread::preemption_point()
    };
}
