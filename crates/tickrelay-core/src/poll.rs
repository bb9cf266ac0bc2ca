//! Readiness multiplexer.
//!
//! [`PollGroup`] wraps a level-triggered epoll instance and owns one handler
//! object per registered descriptor. [`PollGroup::run_once`] blocks until at
//! least one descriptor is readable and hands exactly one ready handler to the
//! caller. No fairness is attempted across ready descriptors: the relay drains
//! every message of a tick before making progress anyway, and level-triggered
//! readiness guarantees a skipped descriptor is reported again.
//!
//! A `PollGroup` is itself [`AsFd`]: its epoll descriptor turns readable when
//! any registered descriptor is, so groups can be nested inside other groups
//! or waited on by foreign event loops.

use std::{
    collections::HashMap,
    io,
    os::fd::{AsFd, AsRawFd, BorrowedFd, OwnedFd, RawFd},
};

use rustix::event::epoll;

use crate::error::PollError;

/// A set of readable sources, each owning its handler state.
///
/// `T` is the handler: typically a connection object that knows how to read
/// exactly one message from its own descriptor.
///
/// # Invariants
///
/// - At most one handler per descriptor.
/// - A handler's descriptor stays constant while it is registered.
pub struct PollGroup<T> {
    epoll: OwnedFd,
    handlers: HashMap<RawFd, T>,
}

impl<T: AsFd> PollGroup<T> {
    /// Create an empty group.
    pub fn new() -> Result<Self, PollError> {
        let epoll = epoll::create(epoll::CreateFlags::CLOEXEC).map_err(|e| PollError::Control {
            fd: -1,
            source: io::Error::from(e),
        })?;

        Ok(Self { epoll, handlers: HashMap::new() })
    }

    /// Register `handler` under its own descriptor.
    ///
    /// Returns the descriptor, which is the key for later lookups.
    ///
    /// # Errors
    ///
    /// `AlreadyRegistered` if the descriptor already has a handler; the
    /// rejected handler is dropped.
    pub fn add(&mut self, handler: T) -> Result<RawFd, PollError> {
        let fd = handler.as_fd().as_raw_fd();
        if self.handlers.contains_key(&fd) {
            return Err(PollError::AlreadyRegistered(fd));
        }

        epoll::add(
            &self.epoll,
            handler.as_fd(),
            epoll::EventData::new_u64(fd as u64),
            epoll::EventFlags::IN,
        )
        .map_err(|e| PollError::Control { fd, source: io::Error::from(e) })?;

        self.handlers.insert(fd, handler);
        Ok(fd)
    }

    /// Deregister the handler for `fd` and return it.
    ///
    /// # Errors
    ///
    /// `NotRegistered` if nothing is registered under `fd`.
    pub fn remove(&mut self, fd: RawFd) -> Result<T, PollError> {
        let handler = self.handlers.remove(&fd).ok_or(PollError::NotRegistered(fd))?;

        epoll::delete(&self.epoll, handler.as_fd())
            .map_err(|e| PollError::Control { fd, source: io::Error::from(e) })?;

        Ok(handler)
    }

    /// Handler registered under `fd`.
    pub fn get(&self, fd: RawFd) -> Option<&T> {
        self.handlers.get(&fd)
    }

    /// Mutable handler registered under `fd`.
    pub fn get_mut(&mut self, fd: RawFd) -> Option<&mut T> {
        self.handlers.get_mut(&fd)
    }

    /// Number of registered handlers.
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// True if nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// All registered handlers, in no particular order.
    pub fn handlers(&self) -> impl Iterator<Item = &T> {
        self.handlers.values()
    }

    /// Block until some registered descriptor is readable and return it.
    ///
    /// Interrupted waits are retried.
    pub fn wait_ready(&self) -> Result<RawFd, PollError> {
        if self.handlers.is_empty() {
            return Err(PollError::Empty);
        }

        let mut events = epoll::EventVec::with_capacity(1);
        loop {
            match epoll::wait(&self.epoll, &mut events, -1) {
                Ok(()) => {},
                Err(rustix::io::Errno::INTR) => continue,
                Err(e) => return Err(PollError::Wait(io::Error::from(e))),
            }

            if let Some(event) = events.iter().next() {
                return Ok(event.data.u64() as RawFd);
            }
        }
    }

    /// Wait for readiness, then invoke `f` on exactly one ready handler.
    ///
    /// # Errors
    ///
    /// Wait failures are returned as `E` via `From<PollError>`; a readiness
    /// report for a descriptor without a handler is `NotRegistered`.
    pub fn run_once<R, E>(&mut self, f: impl FnOnce(&mut T) -> Result<R, E>) -> Result<R, E>
    where
        E: From<PollError>,
    {
        let fd = self.wait_ready()?;
        let handler = self.handlers.get_mut(&fd).ok_or(PollError::NotRegistered(fd))?;
        f(handler)
    }
}

impl<T> AsFd for PollGroup<T> {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.epoll.as_fd()
    }
}

impl<T> std::fmt::Debug for PollGroup<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PollGroup")
            .field("epoll", &self.epoll.as_raw_fd())
            .field("registered", &self.handlers.len())
            .finish()
    }
}
