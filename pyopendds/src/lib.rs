pub mod basic_type;
pub mod bridge;
pub mod capsule;
pub mod config;
pub mod context;
pub mod dds;
pub mod encoding;
pub mod error;
pub mod exception;
pub mod factory;
pub mod host;
pub mod listener;
pub mod loopback;
pub mod qos;
pub mod sample_io;
pub mod topic_type;

pub use basic_type::{IdlString, Type};
pub use bridge::{Bridge, BridgeBuilder};
pub use config::InitOptions;
pub use context::{Context, HostClass};
pub use dds::{DdsDuration, DdsProvider, ReturnCode, StatusKind, StatusMask};
pub use error::{Error, ErrorKind, Result};
pub use host::Host;
pub use topic_type::{IdlStruct, TopicType, TopicTypeBase, TypeRegistry};

pub trait Builder {
    type Output;
    fn build(self) -> Result<Self::Output>;
}

#[doc(hidden)]
#[macro_export]
macro_rules! __idl_attr_name {
    ($field:ident) => {
        stringify!($field)
    };
    ($field:ident, $attr:literal) => {
        $attr
    };
}

/// Implements host marshaling for an IDL structure.
///
/// The structure must already derive `serde::Serialize`, `serde::Deserialize`
/// and `Default`. Each listed field maps to a host attribute of the same name,
/// or to the literal given after `=>`.
///
/// ```ignore
/// impl_idl_struct!(Reading, "Test::Reading", module = "basic", class = "Reading", {
///     kind,
///     value,
///     r#where => "where",
/// });
/// ```
#[macro_export]
macro_rules! impl_idl_struct {
    (
        $ty:ty, $type_name:literal, module = $module:literal, class = $($class:literal).+,
        { $($field:ident $(=> $attr:literal)?),* $(,)? }
    ) => {
        impl $crate::context::HostClass for $ty {
            const MODULE: &'static str = $module;
            const CLASS_PATH: &'static [&'static str] = &[$($class),+];
        }

        impl<H: $crate::host::Host> $crate::topic_type::IdlStruct<H> for $ty {
            const TYPE_NAME: &'static str = $type_name;

            fn field_values(
                cx: &$crate::context::Context<'_, H>,
                value: &Self,
            ) -> $crate::error::Result<Vec<(&'static str, H::Object)>> {
                Ok(vec![
                    $((
                        $crate::__idl_attr_name!($field $(, $attr)?),
                        $crate::basic_type::Type::<H>::to_host(cx, &value.$field)?,
                    )),*
                ])
            }

            fn from_fields(
                cx: &$crate::context::Context<'_, H>,
                obj: &H::Object,
            ) -> $crate::error::Result<Self> {
                let host = cx.host();
                Ok(Self {
                    $($field: $crate::basic_type::Type::<H>::from_host(
                        cx,
                        &host.get_attr(obj, $crate::__idl_attr_name!($field $(, $attr)?))?,
                    )?,)*
                    ..Default::default()
                })
            }
        }

        impl<H: $crate::host::Host> $crate::basic_type::Type<H> for $ty {
            fn to_host(
                cx: &$crate::context::Context<'_, H>,
                value: &Self,
            ) -> $crate::error::Result<H::Object> {
                $crate::topic_type::struct_to_host(cx, value, None)
            }

            fn from_host(
                cx: &$crate::context::Context<'_, H>,
                obj: &H::Object,
            ) -> $crate::error::Result<Self> {
                $crate::topic_type::struct_from_host(cx, obj)
            }
        }
    };
}

/// Implements host marshaling for an IDL enumeration.
///
/// The host class is called with the enumerator value, so an `IntEnum`
/// style class round-trips. Host integers that name no enumerator are a
/// range error.
#[macro_export]
macro_rules! impl_idl_enum {
    (
        $ty:ty, module = $module:literal, class = $($class:literal).+,
        { $($variant:ident = $value:literal),+ $(,)? }
    ) => {
        impl $crate::context::HostClass for $ty {
            const MODULE: &'static str = $module;
            const CLASS_PATH: &'static [&'static str] = &[$($class),+];
        }

        impl<H: $crate::host::Host> $crate::basic_type::Type<H> for $ty {
            fn to_host(
                cx: &$crate::context::Context<'_, H>,
                value: &Self,
            ) -> $crate::error::Result<H::Object> {
                let raw: u32 = match value {
                    $(Self::$variant => $value,)+
                };
                let class = cx.class_of::<Self>()?;
                let host = cx.host();
                Ok(host.call(&class, &[host.new_u64(u64::from(raw))])?)
            }

            fn from_host(
                cx: &$crate::context::Context<'_, H>,
                obj: &H::Object,
            ) -> $crate::error::Result<Self> {
                let raw = <u32 as $crate::basic_type::Type<H>>::from_host(cx, obj)?;
                match raw {
                    $($value => Ok(Self::$variant),)+
                    other => Err($crate::error::Error::Range {
                        target: stringify!($ty),
                        value: other.to_string(),
                    }),
                }
            }
        }
    };
}
