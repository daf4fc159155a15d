//! Background thread that advances transactions whose deadlines have passed.

use std::{
    io,
    sync::Weak,
    thread::{self, JoinHandle},
    time::Duration,
};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};

use crate::endpoint::Inner;

/// Messages understood by the timeout driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DriverSignal {
    /// A transaction registered a deadline earlier than the one being slept on.
    Wake,
    /// Stop the thread.
    Shutdown,
}

/// Owns the timeout driver thread. Dropping it stops and joins the thread.
#[derive(Debug)]
pub struct DriverHandle {
    signal: Sender<DriverSignal>,
    thread: Option<JoinHandle<()>>,
}

impl DriverHandle {
    /// Stops the driver and waits for the thread to exit.
    pub fn shutdown(mut self) {
        self.stop();
    }

    /// Returns true while the driver thread is running.
    pub fn is_running(&self) -> bool {
        self.thread.as_ref().is_some_and(|thread| !thread.is_finished())
    }

    fn stop(&mut self) {
        // A disconnected channel means the thread is already gone.
        let _ = self.signal.send(DriverSignal::Shutdown);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                tracing::error!("Timeout driver thread panicked");
            }
        }
    }
}

impl Drop for DriverHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Starts the driver thread for `endpoint`.
///
/// The thread holds only a weak reference, so it exits on its own once the
/// endpoint is dropped.
pub(crate) fn spawn(
    endpoint: Weak<Inner>,
    signal: Sender<DriverSignal>,
    receiver: Receiver<DriverSignal>,
    idle_interval: Duration,
) -> io::Result<DriverHandle> {
    let thread = thread::Builder::new()
        .name("bacflow-timeouts".into())
        .spawn(move || run(endpoint, receiver, idle_interval))?;
    Ok(DriverHandle { signal, thread: Some(thread) })
}

fn run(endpoint: Weak<Inner>, receiver: Receiver<DriverSignal>, idle_interval: Duration) {
    tracing::debug!("Timeout driver started");
    loop {
        let sleep = {
            let Some(inner) = endpoint.upgrade() else {
                break;
            };
            if inner.is_shut_down() {
                break;
            }
            inner.poll_timeouts(inner.now());
            inner.time_until_next_deadline().map_or(idle_interval, |wait| wait.min(idle_interval))
        };
        match receiver.recv_timeout(sleep) {
            Ok(DriverSignal::Wake) | Err(RecvTimeoutError::Timeout) => {}
            Ok(DriverSignal::Shutdown) | Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    tracing::debug!("Timeout driver stopped");
}
