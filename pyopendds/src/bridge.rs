//! The bridge context passed to every host-facing operation.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{debug, trace};

use crate::Builder;
use crate::capsule;
use crate::context::{ClassCache, Context};
use crate::dds::{DdsProvider, Entity, EntityHandle, EntityKind, ProviderVersion};
use crate::error::{Error, Result};
use crate::exception::ExceptionTable;
use crate::host::Host;
use crate::listener::ListenerHub;
use crate::loopback::LoopbackProvider;
use crate::topic_type::{IdlStruct, TopicType, TopicTypeBase, TypeRegistry};

pub const DEFAULT_MODULE: &str = "pyopendds._pyopendds";

/// Proxy attribute linking readers and writers to their topic proxy.
pub const TOPIC_ATTR: &str = "topic";
/// Topic proxy attribute holding the registered type class.
pub const TYPE_ATTR: &str = "type";
/// Participant proxy attribute listing the registered type classes.
pub const REGISTERED_TYPES_ATTR: &str = "_registered_types";

pub struct BridgeBuilder<H: Host> {
    host: H,
    provider: Option<Arc<dyn DdsProvider>>,
    module: String,
}

impl<H: Host> BridgeBuilder<H> {
    pub fn new(host: H) -> Self {
        Self {
            host,
            provider: None,
            module: DEFAULT_MODULE.to_string(),
        }
    }

    /// DDS runtime to drive. Defaults to a fresh [`LoopbackProvider`].
    pub fn with_provider(mut self, provider: Arc<dyn DdsProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    /// Host module the exception classes are qualified with.
    pub fn with_module_name<S: Into<String>>(mut self, module: S) -> Self {
        self.module = module.into();
        self
    }
}

impl<H: Host> Builder for BridgeBuilder<H> {
    type Output = Bridge<H>;

    fn build(self) -> Result<Bridge<H>> {
        let provider = match self.provider {
            Some(provider) => provider,
            None => Arc::new(LoopbackProvider::builder().build()?),
        };
        let exceptions = ExceptionTable::new(&self.host, &self.module)?;
        debug!("[BRIDGE] built for {} over provider {}", self.module, provider.version());
        Ok(Bridge {
            host: self.host,
            provider,
            classes: ClassCache::default(),
            registry: TypeRegistry::default(),
            exceptions,
            listeners: ListenerHub::default(),
            initialized: AtomicBool::new(false),
        })
    }
}

/// Everything a bridge operation needs: host, provider, topic types,
/// exception classes and pending listener notifications.
pub struct Bridge<H: Host> {
    pub(crate) host: H,
    pub(crate) provider: Arc<dyn DdsProvider>,
    pub(crate) classes: ClassCache<H>,
    pub(crate) registry: TypeRegistry<H>,
    pub(crate) exceptions: ExceptionTable<H>,
    pub(crate) listeners: ListenerHub<H>,
    pub(crate) initialized: AtomicBool,
}

impl<H: Host> Bridge<H> {
    pub fn builder(host: H) -> BridgeBuilder<H> {
        BridgeBuilder::new(host)
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn provider(&self) -> &Arc<dyn DdsProvider> {
        &self.provider
    }

    pub fn context(&self) -> Context<'_, H> {
        Context::new(&self.host, &self.classes)
    }

    pub fn registry(&self) -> &TypeRegistry<H> {
        &self.registry
    }

    pub fn exceptions(&self) -> &ExceptionTable<H> {
        &self.exceptions
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    pub fn version(&self) -> ProviderVersion {
        self.provider.version()
    }

    /// Registers the topic type `T`, resolving its host class now.
    pub fn register_topic_type<T: IdlStruct<H>>(&self) -> Result<H::Object> {
        self.register_descriptor(Arc::new(TopicType::<T>::new()))
    }

    pub fn register_descriptor(&self, descriptor: Arc<dyn TopicTypeBase<H>>) -> Result<H::Object> {
        self.registry.register(&self.context(), descriptor)
    }

    /// Builds the host exception object for `err`.
    pub fn exception(&self, err: &Error) -> Result<H::Object> {
        self.exceptions.instantiate(&self.host, err)
    }

    /// The entity bound to `proxy`.
    ///
    /// A capsule whose entity the provider has since deleted is removed from
    /// the proxy and reported as missing.
    pub fn fetch<E: Entity>(&self, proxy: &H::Object, role: &'static str) -> Result<E> {
        let entity: E = capsule::fetch(&self.host, proxy, role)?;
        self.ensure_alive(proxy, entity.handle(), role, E::KIND)?;
        Ok(entity)
    }

    /// Like [`Bridge::fetch`] for any kind of entity.
    pub fn fetch_any(&self, proxy: &H::Object, role: &'static str) -> Result<(EntityKind, EntityHandle)> {
        let (kind, handle) = capsule::fetch_any(&self.host, proxy, role, "entity")?;
        self.ensure_alive(proxy, handle, role, kind)?;
        Ok((kind, handle))
    }

    fn ensure_alive(
        &self,
        proxy: &H::Object,
        handle: EntityHandle,
        role: &'static str,
        kind: EntityKind,
    ) -> Result<()> {
        if self.provider.is_alive(handle) {
            return Ok(());
        }
        trace!("[BRIDGE] {role} holds deleted {kind} {handle}");
        capsule::unbind(&self.host, proxy)?;
        Err(Error::HandleMissing {
            role,
            expected: kind.into(),
        })
    }

    pub(crate) fn require_init(&self, operation: &str) -> Result<()> {
        if self.is_initialized() {
            Ok(())
        } else {
            Err(Error::Init(format!("{operation} called before init")))
        }
    }

    /// The topic type a reader or writer proxy publishes, found through
    /// `proxy.topic.type`.
    pub(crate) fn topic_type_of(&self, proxy: &H::Object) -> Result<Arc<dyn TopicTypeBase<H>>> {
        let host = &self.host;
        let topic = host
            .get_attr(proxy, TOPIC_ATTR)
            .map_err(|_| Error::UnknownType(format!("{} without a topic", host.describe(proxy))))?;
        let class = host
            .get_attr(&topic, TYPE_ATTR)
            .map_err(|_| Error::UnknownType(format!("topic {} without a type", host.describe(&topic))))?;
        self.registry.lookup(host, &class)
    }
}
