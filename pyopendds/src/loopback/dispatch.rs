use tracing::{trace, warn};

pub(crate) type Job = Box<dyn FnOnce() + Send>;

/// Runs listener callbacks on a dedicated thread, outside the state lock.
pub(crate) struct Dispatcher {
    tx: flume::Sender<Job>,
}

impl Dispatcher {
    pub fn spawn() -> std::io::Result<Self> {
        let (tx, rx) = flume::unbounded::<Job>();
        std::thread::Builder::new()
            .name("loopback-listener".into())
            .spawn(move || {
                while let Ok(job) = rx.recv() {
                    job();
                }
                trace!("[LOOP] listener thread exiting");
            })?;
        Ok(Self { tx })
    }

    pub fn submit(&self, jobs: Vec<Job>) {
        for job in jobs {
            if self.tx.send(job).is_err() {
                warn!("[LOOP] listener thread is gone, dropping callback");
                return;
            }
        }
    }
}
