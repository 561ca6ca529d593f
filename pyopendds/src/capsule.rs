//! Native handles stored on host proxy objects.
//!
//! A proxy holds at most one [`Capsule`] under [`CAPSULE_ATTR`]. The capsule
//! does not own the entity: the provider does. Dropping the capsule only
//! gives back the proxy's reference, exactly once.

use std::fmt;

use tracing::{debug, trace};

use crate::dds::{Entity, EntityHandle, EntityKind};
use crate::error::{Error, Result};
use crate::host::{Host, HostErrorKind};

/// Reserved attribute holding the capsule on a proxy.
pub const CAPSULE_ATTR: &str = "_cpp_object";

type Release = Box<dyn FnOnce(EntityKind, EntityHandle) + Send>;

pub struct Capsule {
    kind: EntityKind,
    handle: EntityHandle,
    release: Option<Release>,
}

impl Capsule {
    pub fn new<E, F>(entity: E, release: F) -> Self
    where
        E: Entity,
        F: FnOnce(EntityKind, EntityHandle) + Send + 'static,
    {
        Capsule {
            kind: E::KIND,
            handle: entity.handle(),
            release: Some(Box::new(release)),
        }
    }

    pub fn kind(&self) -> EntityKind {
        self.kind
    }

    pub fn handle(&self) -> EntityHandle {
        self.handle
    }
}

impl Drop for Capsule {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            trace!("[CAP] releasing {} {}", self.kind, self.handle);
            release(self.kind, self.handle);
        }
    }
}

impl fmt::Debug for Capsule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Capsule")
            .field("kind", &self.kind)
            .field("handle", &self.handle)
            .finish_non_exhaustive()
    }
}

/// Stores `capsule` on `proxy`, replacing any previous one.
///
/// The replaced capsule is released by the host when its wrapper goes away,
/// never here.
pub fn bind<H: Host>(host: &H, proxy: &H::Object, capsule: Capsule) -> Result<()> {
    let (kind, handle) = (capsule.kind(), capsule.handle());
    let wrapped = host.new_capsule(capsule)?;
    host.set_attr(proxy, CAPSULE_ATTR, wrapped)?;
    debug!("[CAP] bound {kind} {handle}");
    Ok(())
}

/// Reads the capsule on `proxy` whatever its kind.
///
/// A missing attribute is not reported as an attribute error: the lookup
/// failure is dropped and [`Error::HandleMissing`] names the relationship
/// (`role`) that was expected.
pub fn fetch_any<H: Host>(
    host: &H,
    proxy: &H::Object,
    role: &'static str,
    expected: &'static str,
) -> Result<(EntityKind, EntityHandle)> {
    let missing = || Error::HandleMissing { role, expected };
    let wrapped = match host.get_attr(proxy, CAPSULE_ATTR) {
        Ok(wrapped) => wrapped,
        Err(err) => {
            trace!("[CAP] {role} has no capsule: {err}");
            return Err(missing());
        }
    };
    host.capsule_handle(&wrapped).ok_or_else(missing)
}

/// Reads the capsule on `proxy` as an entity of kind `E`.
pub fn fetch<H: Host, E: Entity>(host: &H, proxy: &H::Object, role: &'static str) -> Result<E> {
    let (kind, handle) = fetch_any(host, proxy, role, E::KIND.into())?;
    if kind != E::KIND {
        trace!("[CAP] {role} holds a {kind}, expected {}", E::KIND);
        return Err(Error::HandleMissing {
            role,
            expected: E::KIND.into(),
        });
    }
    Ok(E::from_handle(handle))
}

/// Removes the capsule from `proxy`. Absent capsules are fine.
pub fn unbind<H: Host>(host: &H, proxy: &H::Object) -> Result<()> {
    match host.del_attr(proxy, CAPSULE_ATTR) {
        Ok(()) => Ok(()),
        Err(err) if err.kind == HostErrorKind::Attribute => Ok(()),
        Err(err) => Err(err.into()),
    }
}
