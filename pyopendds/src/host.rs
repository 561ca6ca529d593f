//! The scripting runtime as seen from the bridge.
//!
//! The bridge only ever reaches host objects through [`Host`]: attribute
//! access, calls, instance checks, value constructors and the interpreter
//! lock. Implementations exist for CPython (in `pyopendds-py`) and for the
//! in-memory host used by tests.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use strum::Display;

use crate::capsule::Capsule;
use crate::dds::{EntityHandle, EntityKind};

pub mod memory;

pub type HostResult<T> = std::result::Result<T, HostError>;

/// Identity of a host object, comparable across calls while the object lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum HostErrorKind {
    #[strum(serialize = "AttributeError")]
    Attribute,
    #[strum(serialize = "ImportError")]
    Import,
    #[strum(serialize = "TypeError")]
    Type,
    #[strum(serialize = "OverflowError")]
    Overflow,
    #[strum(serialize = "ValueError")]
    Value,
    #[strum(serialize = "UnicodeError")]
    Encoding,
    #[strum(serialize = "Exception")]
    Other,
}

/// A failure reported by the host.
///
/// `payload` lets a host keep its native exception object so it can be
/// re-raised unchanged once the error has crossed the bridge.
#[derive(Clone, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct HostError {
    pub kind: HostErrorKind,
    pub message: String,
    payload: Option<Arc<dyn Any + Send + Sync>>,
}

impl HostError {
    pub fn new(kind: HostErrorKind, message: impl Into<String>) -> Self {
        HostError {
            kind,
            message: message.into(),
            payload: None,
        }
    }

    pub fn with_payload<P: Any + Send + Sync>(mut self, payload: P) -> Self {
        self.payload = Some(Arc::new(payload));
        self
    }

    pub fn payload<P: Any + Send + Sync>(&self) -> Option<&P> {
        self.payload.as_deref().and_then(|p| p.downcast_ref::<P>())
    }

    pub fn attribute(message: impl Into<String>) -> Self {
        Self::new(HostErrorKind::Attribute, message)
    }

    pub fn type_error(message: impl Into<String>) -> Self {
        Self::new(HostErrorKind::Type, message)
    }
}

impl fmt::Debug for HostError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostError")
            .field("kind", &self.kind)
            .field("message", &self.message)
            .field("payload", &self.payload.is_some())
            .finish()
    }
}

pub trait Host: Send + Sync + 'static {
    type Object: Clone + Send + Sync + 'static;
    /// A reference that does not keep its object alive.
    type WeakObject: Clone + Send + Sync + 'static;

    fn id(&self, obj: &Self::Object) -> ObjectId;

    fn none(&self) -> Self::Object;

    fn is_none(&self, obj: &Self::Object) -> bool;

    fn downgrade(&self, obj: &Self::Object) -> HostResult<Self::WeakObject>;

    /// `None` once the object has been collected.
    fn upgrade(&self, weak: &Self::WeakObject) -> Option<Self::Object>;

    fn import(&self, module: &str) -> HostResult<Self::Object>;

    fn get_attr(&self, obj: &Self::Object, name: &str) -> HostResult<Self::Object>;

    fn set_attr(&self, obj: &Self::Object, name: &str, value: Self::Object) -> HostResult<()>;

    fn del_attr(&self, obj: &Self::Object, name: &str) -> HostResult<()>;

    fn call(&self, callable: &Self::Object, args: &[Self::Object]) -> HostResult<Self::Object>;

    fn type_of(&self, obj: &Self::Object) -> Self::Object;

    fn is_instance(&self, obj: &Self::Object, class: &Self::Object) -> HostResult<bool>;

    fn new_bool(&self, value: bool) -> Self::Object;

    /// Identity check against the host's `True` singleton.
    fn is_true(&self, obj: &Self::Object) -> bool;

    /// Identity check against the host's `False` singleton.
    fn is_false(&self, obj: &Self::Object) -> bool;

    fn new_i64(&self, value: i64) -> Self::Object;

    fn new_u64(&self, value: u64) -> Self::Object;

    fn new_f64(&self, value: f64) -> Self::Object;

    /// Fails with [`HostErrorKind::Overflow`] outside the i64 range and with
    /// [`HostErrorKind::Type`] for non-integers.
    fn as_i64(&self, obj: &Self::Object) -> HostResult<i64>;

    /// Fails with [`HostErrorKind::Overflow`] outside the u64 range and with
    /// [`HostErrorKind::Type`] for non-integers.
    fn as_u64(&self, obj: &Self::Object) -> HostResult<u64>;

    fn as_f64(&self, obj: &Self::Object) -> HostResult<f64>;

    fn new_str(&self, value: &str) -> Self::Object;

    /// The host's "to string" protocol.
    fn str_of(&self, obj: &Self::Object) -> HostResult<String>;

    fn new_list(&self, items: Vec<Self::Object>) -> Self::Object;

    fn list_items(&self, obj: &Self::Object) -> HostResult<Vec<Self::Object>>;

    fn new_tuple(&self, items: Vec<Self::Object>) -> Self::Object;

    /// Wraps `capsule`; the host drops it when the wrapper is collected.
    fn new_capsule(&self, capsule: Capsule) -> HostResult<Self::Object>;

    /// `None` if `obj` is not a capsule created by [`Host::new_capsule`].
    fn capsule_handle(&self, obj: &Self::Object) -> Option<(EntityKind, EntityHandle)>;

    fn new_exception_class(
        &self,
        qualified_name: &str,
        bases: &[Self::Object],
    ) -> HostResult<Self::Object>;

    /// Runs `f` with the interpreter lock released.
    fn allow_threads<T, F>(&self, f: F) -> T
    where
        T: Send,
        F: FnOnce() -> T + Send;

    /// Runs `f` on a thread the host does not own, holding the interpreter
    /// lock for the duration of the call.
    fn with_thread_state<T, F>(&self, f: F) -> T
    where
        F: FnOnce(&Self) -> T;

    /// Short description for error messages.
    fn describe(&self, obj: &Self::Object) -> String {
        let class = self.type_of(obj);
        self.get_attr(&class, "__name__")
            .and_then(|name| self.str_of(&name))
            .or_else(|_| self.str_of(&class))
            .unwrap_or_else(|_| "<object>".to_string())
    }
}
