//! Reading, writing and waiting on entities bound to host proxies.

use tracing::{trace, warn};

use crate::bridge::Bridge;
use crate::dds::{
    DataReader, DataWriter, DdsDuration, DdsProvider, EntityHandle, ReturnCode, StatusCondition,
    StatusMask, WaitSet,
};
use crate::error::{Error, Result};
use crate::host::Host;

/// A wait set holding one status condition, torn down on drop.
///
/// Detaching and deleting happen on every path out of a wait, including
/// timeouts and errors.
pub struct AttachedCondition<'a> {
    provider: &'a dyn DdsProvider,
    waitset: WaitSet,
    condition: StatusCondition,
}

impl<'a> AttachedCondition<'a> {
    pub fn attach(provider: &'a dyn DdsProvider, entity: EntityHandle, mask: StatusMask) -> Result<Self> {
        let condition = provider
            .status_condition(entity)
            .map_err(|code| Error::DdsOperation {
                operation: "get_statuscondition",
                code,
            })?;
        provider
            .set_enabled_statuses(condition, mask)
            .into_result("set_enabled_statuses")?;

        let waitset = provider.create_waitset();
        if let Err(err) = provider
            .attach_condition(waitset, condition)
            .into_result("attach_condition")
        {
            provider.delete_waitset(waitset);
            return Err(err);
        }
        trace!("[WAIT] attached {condition:?} to {waitset:?}");
        Ok(Self {
            provider,
            waitset,
            condition,
        })
    }

    pub fn wait(&self, timeout: DdsDuration) -> ReturnCode {
        self.provider.wait(self.waitset, timeout)
    }
}

impl Drop for AttachedCondition<'_> {
    fn drop(&mut self) {
        let code = self.provider.detach_condition(self.waitset, self.condition);
        if !code.is_ok() {
            warn!("[WAIT] detach of {:?} failed: {code}", self.condition);
        }
        let code = self.provider.delete_waitset(self.waitset);
        if !code.is_ok() {
            warn!("[WAIT] delete of {:?} failed: {code}", self.waitset);
        }
        trace!("[WAIT] detached {:?}", self.condition);
    }
}

impl<H: Host> Bridge<H> {
    /// Writes `sample` through the writer bound to `writer_proxy`.
    ///
    /// Any code other than `RETCODE_OK` is raised as a DDS operation error,
    /// so a returned code is always OK.
    pub fn write(&self, writer_proxy: &H::Object, sample: &H::Object) -> Result<ReturnCode> {
        let writer: DataWriter = self.fetch(writer_proxy, "datawriter")?;
        let topic_type = self.topic_type_of(writer_proxy)?;
        let code = topic_type.write(&self.context(), self.provider.as_ref(), writer, sample)?;
        trace!("[IO] wrote {} on writer {}", topic_type.type_name(), writer.0);
        Ok(code)
    }

    /// Takes the next sample from the reader bound to `reader_proxy`.
    ///
    /// An empty reader is [`Error::NoDataAvailable`]. A sample that only
    /// notifies an instance state change yields the host `None`.
    pub fn take_next_sample(&self, reader_proxy: &H::Object) -> Result<H::Object> {
        let reader: DataReader = self.fetch(reader_proxy, "datareader")?;
        let topic_type = self.topic_type_of(reader_proxy)?;
        topic_type.take_next_sample(&self.context(), self.provider.as_ref(), reader)
    }

    /// Blocks until one of the statuses in `mask` triggers on the entity
    /// bound to `proxy`, or `timeout` elapses.
    ///
    /// The host interpreter lock is released for the duration of the wait.
    #[tracing::instrument(name = "wait_for", skip(self, proxy), fields(mask = %mask, timeout = %timeout))]
    pub fn wait_for(&self, proxy: &H::Object, mask: StatusMask, timeout: DdsDuration) -> Result<()> {
        let (_, entity) = self.fetch_any(proxy, "entity")?;
        let attached = AttachedCondition::attach(self.provider.as_ref(), entity, mask)?;
        let code = self.host.allow_threads(|| attached.wait(timeout));
        match code {
            ReturnCode::Ok => Ok(()),
            ReturnCode::Timeout => Err(Error::Timeout { timeout, mask }),
            code => Err(Error::DdsOperation {
                operation: "wait",
                code,
            }),
        }
    }
}
