//! Single-threaded readiness dispatcher.
//!
//! A [`Poller`] owns a registration table keyed by [`Token`]. Each
//! registration may name a descriptor to watch for readability (and, on
//! request, writability) and may carry a one-shot timer.
//! [`Poller::poll_once`] waits in `poll(2)` until a watched descriptor is
//! ready or the nearest armed timer expires, then calls back into an
//! [`EventHandler`] one event at a time.
//!
//! Timers are one-shot: an expired timer is disarmed before its callback
//! runs, and the callback re-arms it if it wants another round.

use std::collections::BTreeMap;
use std::os::fd::RawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use tracing::{trace, warn};

use crate::error::{Result, TransportError};

/// Identifies one registration in a [`Poller`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Token(pub usize);

/// Receives the events a [`Poller`] dispatches.
pub trait EventHandler {
    /// The descriptor registered under `token` is readable, hung up, in
    /// error, or no longer valid.
    fn on_readable(&mut self, token: Token, poller: &mut Poller);

    /// The descriptor registered under `token` accepts writes again. Only
    /// sent while write interest is set.
    fn on_writable(&mut self, token: Token, poller: &mut Poller) {
        let _ = (token, poller);
    }

    /// The timer registered under `token` expired. It is already disarmed.
    fn on_timeout(&mut self, token: Token, poller: &mut Poller);

    /// Return true to make [`Poller::run`] return.
    fn is_finished(&self) -> bool {
        false
    }
}

#[derive(Debug)]
struct Registration {
    fd: Option<RawFd>,
    enabled: bool,
    write_interest: bool,
    interval: Option<Duration>,
    deadline: Option<Instant>,
}

/// The event loop. Construct one, register sources, then drive it.
#[derive(Debug, Default)]
pub struct Poller {
    registrations: BTreeMap<Token, Registration>,
    next_token: usize,
}

impl Poller {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an optional descriptor and an optional timer interval.
    ///
    /// Readiness interest starts enabled; the timer starts disarmed.
    pub fn register(&mut self, fd: Option<RawFd>, timeout: Option<Duration>) -> Token {
        let token = Token(self.next_token);
        self.next_token += 1;
        self.registrations.insert(
            token,
            Registration {
                fd,
                enabled: fd.is_some(),
                write_interest: false,
                interval: timeout,
                deadline: None,
            },
        );
        trace!(token = token.0, ?fd, ?timeout, "registered");
        token
    }

    /// Remove a registration. Unknown tokens are ignored.
    pub fn deregister(&mut self, token: Token) {
        self.registrations.remove(&token);
    }

    /// Resume watching the registration's descriptor.
    pub fn enable(&mut self, token: Token) -> Result<()> {
        self.registration_mut(token)?.enabled = true;
        Ok(())
    }

    /// Stop watching the registration's descriptor. Its timer is unaffected.
    pub fn disable(&mut self, token: Token) -> Result<()> {
        self.registration_mut(token)?.enabled = false;
        Ok(())
    }

    /// Whether readiness interest is enabled for `token`.
    pub fn is_enabled(&self, token: Token) -> bool {
        self.registrations
            .get(&token)
            .is_some_and(|reg| reg.enabled && reg.fd.is_some())
    }

    /// Ask for (or stop asking for) [`EventHandler::on_writable`] callbacks.
    /// Starts off; independent of readiness interest.
    pub fn set_write_interest(&mut self, token: Token, interest: bool) -> Result<()> {
        self.registration_mut(token)?.write_interest = interest;
        Ok(())
    }

    /// Whether write interest is set for `token`.
    pub fn wants_write(&self, token: Token) -> bool {
        self.registrations
            .get(&token)
            .is_some_and(|reg| reg.write_interest)
    }

    /// Change the timer interval used by subsequent arms.
    pub fn set_timeout(&mut self, token: Token, interval: Duration) -> Result<()> {
        self.registration_mut(token)?.interval = Some(interval);
        Ok(())
    }

    /// Start the timer. Arming an armed timer moves its deadline.
    pub fn arm_timeout(&mut self, token: Token) -> Result<()> {
        let reg = self.registration_mut(token)?;
        let interval = reg.interval.ok_or(TransportError::NoTimeout(token.0))?;
        reg.deadline = Some(Instant::now() + interval);
        Ok(())
    }

    /// Stop the timer. Disarming a disarmed timer is a no-op.
    pub fn disarm_timeout(&mut self, token: Token) -> Result<()> {
        self.registration_mut(token)?.deadline = None;
        Ok(())
    }

    /// Push the deadline of an armed timer one interval into the future.
    /// A disarmed timer stays disarmed.
    pub fn reset_timeout_deadline(&mut self, token: Token) -> Result<()> {
        let reg = self.registration_mut(token)?;
        if reg.deadline.is_some() {
            let interval = reg.interval.ok_or(TransportError::NoTimeout(token.0))?;
            reg.deadline = Some(Instant::now() + interval);
        }
        Ok(())
    }

    /// Whether the timer registered under `token` is armed.
    pub fn is_armed(&self, token: Token) -> bool {
        self.registrations
            .get(&token)
            .is_some_and(|reg| reg.deadline.is_some())
    }

    /// The current deadline of `token`'s timer, if armed.
    pub fn deadline(&self, token: Token) -> Option<Instant> {
        self.registrations.get(&token).and_then(|reg| reg.deadline)
    }

    /// The nearest deadline over all armed timers.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.registrations
            .values()
            .filter_map(|reg| reg.deadline)
            .min()
    }

    /// Run one round: wait for readiness or the nearest deadline (at most
    /// `max_wait`), then dispatch what happened.
    pub fn poll_once<H>(&mut self, handler: &mut H, max_wait: Option<Duration>) -> Result<()>
    where
        H: EventHandler + ?Sized,
    {
        let now = Instant::now();
        let mut wait = self
            .next_deadline()
            .map(|deadline| deadline.saturating_duration_since(now));
        if let Some(max) = max_wait {
            wait = Some(wait.map_or(max, |w| w.min(max)));
        }
        let timeout_ms = match wait {
            None => -1,
            Some(w) => w.as_nanos().div_ceil(1_000_000).min(i32::MAX as u128) as libc::c_int,
        };

        let mut tokens = Vec::new();
        let mut fds = Vec::new();
        for (token, reg) in &self.registrations {
            let Some(fd) = reg.fd else {
                continue;
            };
            let mut events = 0;
            if reg.enabled {
                events |= libc::POLLIN;
            }
            if reg.write_interest {
                events |= libc::POLLOUT;
            }
            if events != 0 {
                tokens.push(*token);
                fds.push(libc::pollfd {
                    fd,
                    events,
                    revents: 0,
                });
            }
        }

        // SAFETY: `fds` is a valid, exclusively borrowed array of `fds.len()`
        // pollfd structs for the duration of the call.
        let rc = unsafe { libc::poll(fds.as_mut_ptr(), fds.len() as libc::nfds_t, timeout_ms) };
        if rc < 0 {
            let err = std::io::Error::last_os_error();
            if err.kind() == std::io::ErrorKind::Interrupted {
                return Ok(());
            }
            return Err(err.into());
        }

        // Hangup, error and invalid descriptors count as both readable and
        // writable so the owner's next read or write reports the failure.
        const FAILED: libc::c_short = libc::POLLHUP | libc::POLLERR | libc::POLLNVAL;
        let ready: Vec<(Token, libc::c_short)> = tokens
            .into_iter()
            .zip(fds.iter())
            .filter(|(_, pfd)| pfd.revents != 0)
            .map(|(token, pfd)| (token, pfd.revents))
            .collect();

        for (token, revents) in ready {
            // An earlier callback in this round may have changed interest.
            if revents & (libc::POLLIN | FAILED) != 0 && self.is_enabled(token) {
                trace!(token = token.0, revents, "readable");
                handler.on_readable(token, self);
            }
            if revents & (libc::POLLOUT | FAILED) != 0 && self.wants_write(token) {
                trace!(token = token.0, revents, "writable");
                handler.on_writable(token, self);
            }
        }

        self.dispatch_expired(Instant::now(), handler);
        Ok(())
    }

    /// Fire every timer whose deadline is at or before `now`. Returns the
    /// number of callbacks made.
    pub fn dispatch_expired<H>(&mut self, now: Instant, handler: &mut H) -> usize
    where
        H: EventHandler + ?Sized,
    {
        let expired: Vec<Token> = self
            .registrations
            .iter()
            .filter(|(_, reg)| reg.deadline.is_some_and(|deadline| deadline <= now))
            .map(|(token, _)| *token)
            .collect();

        let mut fired = 0;
        for token in expired {
            let Some(reg) = self.registrations.get_mut(&token) else {
                continue;
            };
            match reg.deadline {
                Some(deadline) if deadline <= now => reg.deadline = None,
                _ => continue,
            }
            trace!(token = token.0, "timer expired");
            handler.on_timeout(token, self);
            fired += 1;
        }
        fired
    }

    /// Drive the loop until `running` is cleared or the handler finishes.
    ///
    /// `tick` bounds each wait so a cleared flag is noticed promptly.
    pub fn run<H>(&mut self, handler: &mut H, running: &AtomicBool, tick: Duration) -> Result<()>
    where
        H: EventHandler + ?Sized,
    {
        while running.load(Ordering::SeqCst) && !handler.is_finished() {
            self.poll_once(handler, Some(tick))?;
        }
        Ok(())
    }

    fn registration_mut(&mut self, token: Token) -> Result<&mut Registration> {
        self.registrations
            .get_mut(&token)
            .ok_or(TransportError::UnknownToken(token.0))
    }
}

/// A layer-owned handle on one registration's timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerHandle {
    token: Token,
}

impl TimerHandle {
    pub fn new(token: Token) -> Self {
        Self { token }
    }

    pub fn token(self) -> Token {
        self.token
    }

    /// Arm (or re-arm) the timer.
    pub fn arm(self, poller: &mut Poller) {
        if let Err(err) = poller.arm_timeout(self.token) {
            warn!(error = %err, "timer arm failed");
        }
    }

    pub fn disarm(self, poller: &mut Poller) {
        if let Err(err) = poller.disarm_timeout(self.token) {
            warn!(error = %err, "timer disarm failed");
        }
    }

    /// Push the deadline if armed.
    pub fn reset(self, poller: &mut Poller) {
        if let Err(err) = poller.reset_timeout_deadline(self.token) {
            warn!(error = %err, "timer reset failed");
        }
    }

    pub fn is_armed(self, poller: &Poller) -> bool {
        poller.is_armed(self.token)
    }
}
