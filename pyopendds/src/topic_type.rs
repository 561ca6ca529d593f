//! Topic types: native IDL structures bound to a host class and to the DDS
//! read/write calls for that structure.

use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;

use cdr::{CdrLe, Infinite};
use parking_lot::RwLock;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, trace};

use crate::basic_type::Type;
use crate::context::{Context, HostClass};
use crate::dds::{DataReader, DataWriter, DdsProvider, Participant, ReturnCode};
use crate::error::{Error, Result};
use crate::host::{Host, ObjectId};

/// An IDL structure the bridge can marshal and publish.
///
/// Implemented by [`impl_idl_struct!`](crate::impl_idl_struct).
pub trait IdlStruct<H: Host>:
    HostClass + Type<H> + Serialize + DeserializeOwned + Default + Send + Sync + 'static
{
    /// DDS type name, e.g. `Test::Reading`.
    const TYPE_NAME: &'static str;

    /// Every field converted to a host value, keyed by attribute name.
    fn field_values(cx: &Context<'_, H>, value: &Self) -> Result<Vec<(&'static str, H::Object)>>;

    /// Reads every field from `obj`. The instance has already been checked.
    fn from_fields(cx: &Context<'_, H>, obj: &H::Object) -> Result<Self>;
}

fn check_instance<H: Host, T: IdlStruct<H>>(cx: &Context<'_, H>, obj: &H::Object) -> Result<()> {
    let host = cx.host();
    let class = cx.class_of::<T>()?;
    if host.id(&host.type_of(obj)) != host.id(&class) {
        return Err(Error::type_error(format!(
            "expected a {} instance, got {}",
            T::CLASS_PATH.join("."),
            host.describe(obj)
        )));
    }
    Ok(())
}

/// Converts `value` into a host object.
///
/// With `existing`, the fields of that instance are overwritten in place;
/// otherwise a fresh instance is built with the class's default constructor.
/// All fields are converted before the first assignment, so a failed
/// conversion leaves `existing` untouched.
pub fn struct_to_host<H: Host, T: IdlStruct<H>>(
    cx: &Context<'_, H>,
    value: &T,
    existing: Option<&H::Object>,
) -> Result<H::Object> {
    let host = cx.host();
    let fields = T::field_values(cx, value)?;
    let target = match existing {
        Some(obj) => {
            check_instance::<H, T>(cx, obj)?;
            obj.clone()
        }
        None => host.call(&cx.class_of::<T>()?, &[])?,
    };
    for (name, field) in fields {
        host.set_attr(&target, name, field)?;
    }
    Ok(target)
}

pub fn struct_from_host<H: Host, T: IdlStruct<H>>(cx: &Context<'_, H>, obj: &H::Object) -> Result<T> {
    check_instance::<H, T>(cx, obj)?;
    T::from_fields(cx, obj)
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    cdr::serialize::<_, _, CdrLe>(value, Infinite).map_err(|err| Error::Serialization(err.to_string()))
}

fn decode<T: DeserializeOwned>(payload: &[u8]) -> Result<T> {
    cdr::deserialize::<T>(payload).map_err(|err| Error::Serialization(err.to_string()))
}

/// Type-erased operations on one topic type.
pub trait TopicTypeBase<H: Host>: Send + Sync {
    fn type_name(&self) -> &'static str;

    fn host_class(&self, cx: &Context<'_, H>) -> Result<H::Object>;

    fn register_type(&self, provider: &dyn DdsProvider, participant: Participant) -> Result<()>;

    /// The next sample as a fresh host object, or the host `None` when the
    /// sample only carries an instance state change.
    fn take_next_sample(
        &self,
        cx: &Context<'_, H>,
        provider: &dyn DdsProvider,
        reader: DataReader,
    ) -> Result<H::Object>;

    fn write(
        &self,
        cx: &Context<'_, H>,
        provider: &dyn DdsProvider,
        writer: DataWriter,
        sample: &H::Object,
    ) -> Result<ReturnCode>;
}

pub struct TopicType<T> {
    _marker: PhantomData<fn() -> T>,
}

impl<T> TopicType<T> {
    pub fn new() -> Self {
        TopicType {
            _marker: PhantomData,
        }
    }
}

impl<T> Default for TopicType<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<H: Host, T: IdlStruct<H>> TopicTypeBase<H> for TopicType<T> {
    fn type_name(&self) -> &'static str {
        T::TYPE_NAME
    }

    fn host_class(&self, cx: &Context<'_, H>) -> Result<H::Object> {
        cx.class_of::<T>()
    }

    fn register_type(&self, provider: &dyn DdsProvider, participant: Participant) -> Result<()> {
        provider
            .register_type(participant, T::TYPE_NAME)
            .into_result("register_type")
    }

    fn take_next_sample(
        &self,
        cx: &Context<'_, H>,
        provider: &dyn DdsProvider,
        reader: DataReader,
    ) -> Result<H::Object> {
        match provider.take_next_sample(reader) {
            Ok((_, info)) if !info.valid_data => {
                trace!("[TYPE] {} notice: {}", T::TYPE_NAME, info.instance_state);
                Ok(cx.host().none())
            }
            Ok((payload, _)) => {
                let sample: T = decode(&payload)?;
                T::to_host(cx, &sample)
            }
            Err(ReturnCode::NoData) => Err(Error::NoDataAvailable(format!(
                "{} reader {}",
                T::TYPE_NAME,
                reader.0
            ))),
            Err(code) => Err(Error::DdsOperation {
                operation: "take_next_sample",
                code,
            }),
        }
    }

    fn write(
        &self,
        cx: &Context<'_, H>,
        provider: &dyn DdsProvider,
        writer: DataWriter,
        sample: &H::Object,
    ) -> Result<ReturnCode> {
        let value = T::from_host(cx, sample)?;
        let payload = encode(&value)?;
        let code = provider.write(writer, &payload);
        code.into_result("write")?;
        Ok(code)
    }
}

struct Registered<H: Host> {
    class: H::Object,
    descriptor: Arc<dyn TopicTypeBase<H>>,
}

/// Topic types keyed by the identity of their host class.
///
/// Lookups match the exact class object only; subclasses of a registered
/// class are unknown.
pub struct TypeRegistry<H: Host> {
    entries: RwLock<HashMap<ObjectId, Registered<H>>>,
}

impl<H: Host> Default for TypeRegistry<H> {
    fn default() -> Self {
        TypeRegistry {
            entries: RwLock::new(HashMap::new()),
        }
    }
}

impl<H: Host> TypeRegistry<H> {
    /// Registers `descriptor` under its host class and returns that class.
    /// Registering the same class again replaces the entry.
    pub fn register(&self, cx: &Context<'_, H>, descriptor: Arc<dyn TopicTypeBase<H>>) -> Result<H::Object> {
        let host = cx.host();
        let class = descriptor.host_class(cx)?;
        let id = host.id(&class);
        debug!("[TYPE] registered {} as {:?}", descriptor.type_name(), id);
        self.entries.write().insert(
            id,
            Registered {
                class: class.clone(),
                descriptor,
            },
        );
        Ok(class)
    }

    pub fn lookup(&self, host: &H, class: &H::Object) -> Result<Arc<dyn TopicTypeBase<H>>> {
        self.entries
            .read()
            .get(&host.id(class))
            .map(|entry| entry.descriptor.clone())
            .ok_or_else(|| {
                let name = host
                    .get_attr(class, "__name__")
                    .and_then(|name| host.str_of(&name))
                    .or_else(|_| host.str_of(class))
                    .unwrap_or_else(|_| "<object>".to_string());
                Error::UnknownType(name)
            })
    }

    /// The class registered for a DDS type name.
    pub fn find_by_name(&self, type_name: &str) -> Option<(H::Object, Arc<dyn TopicTypeBase<H>>)> {
        self.entries
            .read()
            .values()
            .find(|entry| entry.descriptor.type_name() == type_name)
            .map(|entry| (entry.class.clone(), entry.descriptor.clone()))
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
