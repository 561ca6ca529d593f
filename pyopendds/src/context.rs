use std::any::TypeId;
use std::collections::HashMap;

use parking_lot::RwLock;
use tracing::debug;

use crate::error::Result;
use crate::host::Host;

/// Location of the host class mirroring a native type.
pub trait HostClass: 'static {
    /// Module imported to reach the class.
    const MODULE: &'static str;
    /// Attribute walk from the module to the class.
    const CLASS_PATH: &'static [&'static str];
}

/// Host classes resolved so far, one per native type.
pub struct ClassCache<H: Host> {
    classes: RwLock<HashMap<TypeId, H::Object>>,
}

impl<H: Host> Default for ClassCache<H> {
    fn default() -> Self {
        ClassCache {
            classes: RwLock::new(HashMap::new()),
        }
    }
}

impl<H: Host> ClassCache<H> {
    pub fn resolve<T: HostClass>(&self, host: &H) -> Result<H::Object> {
        let key = TypeId::of::<T>();
        if let Some(class) = self.classes.read().get(&key) {
            return Ok(class.clone());
        }

        let mut class = host.import(T::MODULE)?;
        for attr in T::CLASS_PATH {
            class = host.get_attr(&class, attr)?;
        }
        debug!(
            "[CLS] resolved {}.{}",
            T::MODULE,
            T::CLASS_PATH.join(".")
        );

        Ok(self.classes.write().entry(key).or_insert(class).clone())
    }

    pub fn len(&self) -> usize {
        self.classes.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// What every conversion needs: the host and the class cache.
pub struct Context<'a, H: Host> {
    host: &'a H,
    classes: &'a ClassCache<H>,
}

impl<H: Host> Clone for Context<'_, H> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<H: Host> Copy for Context<'_, H> {}

impl<'a, H: Host> Context<'a, H> {
    pub fn new(host: &'a H, classes: &'a ClassCache<H>) -> Self {
        Context { host, classes }
    }

    pub fn host(&self) -> &'a H {
        self.host
    }

    /// The host class for `T`, imported on first use.
    pub fn class_of<T: HostClass>(&self) -> Result<H::Object> {
        self.classes.resolve::<T>(self.host)
    }
}
