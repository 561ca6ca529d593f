//! Data-available callbacks.
//!
//! The provider calls listeners on its own threads. Those threads never touch
//! host objects: the listener only pushes a [`Notification`] into a channel,
//! and the host drains it with [`Bridge::dispatch_notifications`], calling the
//! registered callbacks under the host's thread state.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::bridge::Bridge;
use crate::dds::{DataReader, EntityHandle, EntityKind, ReaderListener, StatusKind, StatusMask};
use crate::error::Result;
use crate::host::Host;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Notification {
    pub reader: DataReader,
    pub status: StatusKind,
}

/// The reader proxy is held weakly: a registered callback must not keep the
/// proxy, and so its capsule, alive.
struct Registration<H: Host> {
    reader_proxy: H::WeakObject,
    callback: H::Object,
}

type Registrations<H> = Arc<Mutex<HashMap<DataReader, Registration<H>>>>;

pub(crate) struct ListenerHub<H: Host> {
    tx: flume::Sender<Notification>,
    rx: flume::Receiver<Notification>,
    registrations: Registrations<H>,
}

impl<H: Host> Default for ListenerHub<H> {
    fn default() -> Self {
        let (tx, rx) = flume::unbounded();
        Self {
            tx,
            rx,
            registrations: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

impl<H: Host> ListenerHub<H> {
    fn listener(&self) -> ReaderListener {
        let tx = self.tx.clone();
        Arc::new(move |reader, status| {
            trace!("[LSN] {status} on reader {}", reader.0);
            let _ = tx.send(Notification { reader, status });
        })
    }

    fn callback(&self, reader: DataReader) -> Option<(H::WeakObject, H::Object)> {
        self.registrations
            .lock()
            .get(&reader)
            .map(|r| (r.reader_proxy.clone(), r.callback.clone()))
    }

    /// Drops the registration of `reader` once the lock is released, since
    /// dropping a callback can collect proxies and re-enter the hub.
    fn forget(registrations: &Registrations<H>, reader: DataReader) -> bool {
        let removed = registrations.lock().remove(&reader);
        removed.is_some()
    }

    /// Run when a reader capsule is released.
    pub(crate) fn release_hook(&self) -> impl Fn(EntityKind, EntityHandle) + Send + 'static {
        let registrations = Arc::downgrade(&self.registrations);
        move |kind, handle| {
            if kind != EntityKind::DataReader {
                return;
            }
            if let Some(registrations) = registrations.upgrade() {
                if Self::forget(&registrations, DataReader(handle)) {
                    debug!("[LSN] reader {handle} released, callback dropped");
                }
            }
        }
    }
}

impl<H: Host> Bridge<H> {
    /// Calls `callback(reader_proxy)` for every data-available notification
    /// on the reader, once drained by [`Bridge::dispatch_notifications`].
    pub fn set_data_available_callback(&self, reader_proxy: &H::Object, callback: &H::Object) -> Result<()> {
        let reader: DataReader = self.fetch(reader_proxy, "datareader")?;
        let weak_proxy = self.host.downgrade(reader_proxy)?;
        let listener = self.listeners.listener();
        self.provider
            .set_listener(reader, Some(listener), StatusKind::DataAvailable.into())
            .into_result("set_listener")?;
        let replaced = self.listeners.registrations.lock().insert(
            reader,
            Registration {
                reader_proxy: weak_proxy,
                callback: callback.clone(),
            },
        );
        drop(replaced);
        debug!("[LSN] callback set on reader {}", reader.0);
        Ok(())
    }

    pub fn clear_data_available_callback(&self, reader_proxy: &H::Object) -> Result<()> {
        let reader: DataReader = self.fetch(reader_proxy, "datareader")?;
        self.provider
            .set_listener(reader, None, StatusMask::NONE)
            .into_result("set_listener")?;
        ListenerHub::forget(&self.listeners.registrations, reader);
        Ok(())
    }

    /// Notifications received but not yet dispatched.
    pub fn pending_notifications(&self) -> usize {
        self.listeners.rx.len()
    }

    /// Readers with a data-available callback set.
    pub fn callback_count(&self) -> usize {
        self.listeners.registrations.lock().len()
    }

    /// Runs the callbacks for queued notifications and returns how many ran.
    ///
    /// With a `timeout`, first waits that long (interpreter lock released) for
    /// a notification to arrive. Stops at the first callback that fails and
    /// returns its error; later notifications stay queued.
    pub fn dispatch_notifications(&self, timeout: Option<Duration>) -> Result<usize> {
        let rx = &self.listeners.rx;
        let mut next = match timeout {
            Some(timeout) if rx.is_empty() => self.host.allow_threads(|| rx.recv_timeout(timeout).ok()),
            _ => rx.try_recv().ok(),
        };

        let mut dispatched = 0;
        while let Some(notification) = next {
            if let Some((weak_proxy, callback)) = self.listeners.callback(notification.reader) {
                match self.host.upgrade(&weak_proxy) {
                    Some(reader_proxy) => {
                        self.host
                            .with_thread_state(|host| host.call(&callback, &[reader_proxy]))?;
                        dispatched += 1;
                    }
                    None => {
                        trace!("[LSN] reader {} proxy collected", notification.reader.0);
                        ListenerHub::forget(&self.listeners.registrations, notification.reader);
                    }
                }
            }
            next = rx.try_recv().ok();
        }
        Ok(dispatched)
    }

    /// Forgets callbacks whose reader no longer exists.
    pub(crate) fn prune_listeners(&self) {
        let dead: Vec<DataReader> = self
            .listeners
            .registrations
            .lock()
            .keys()
            .filter(|reader| !self.provider.is_alive(reader.0))
            .copied()
            .collect();
        for reader in dead {
            ListenerHub::forget(&self.listeners.registrations, reader);
        }
    }
}
