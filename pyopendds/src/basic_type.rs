//! Conversions between native IDL values and host values.

use std::fmt;
use std::marker::PhantomData;

use serde::{Deserialize, Serialize};

use crate::context::Context;
use crate::encoding::{Codec, Utf8};
use crate::error::{Error, Result, from_host_number};
use crate::host::{Host, HostErrorKind};

/// Conversion of one native type to and from host objects.
///
/// `to_host` never fails for scalars: every native value is representable on
/// the host. `from_host` checks range against the native type itself.
pub trait Type<H: Host>: Sized {
    fn to_host(cx: &Context<'_, H>, value: &Self) -> Result<H::Object>;

    fn from_host(cx: &Context<'_, H>, obj: &H::Object) -> Result<Self>;
}

impl<H: Host> Type<H> for bool {
    fn to_host(cx: &Context<'_, H>, value: &Self) -> Result<H::Object> {
        Ok(cx.host().new_bool(*value))
    }

    fn from_host(cx: &Context<'_, H>, obj: &H::Object) -> Result<Self> {
        let host = cx.host();
        if host.is_true(obj) {
            Ok(true)
        } else if host.is_false(obj) {
            Ok(false)
        } else {
            Err(Error::type_error(format!(
                "expected True or False, got {}",
                host.describe(obj)
            )))
        }
    }
}

fn host_text<H: Host>(host: &H, obj: &H::Object) -> impl FnOnce() -> String {
    move || host.str_of(obj).unwrap_or_else(|_| "<int>".to_string())
}

macro_rules! impl_signed_type {
    ($($t:ty),*) => {$(
        impl<H: Host> Type<H> for $t {
            fn to_host(cx: &Context<'_, H>, value: &Self) -> Result<H::Object> {
                Ok(cx.host().new_i64(i64::from(*value)))
            }

            fn from_host(cx: &Context<'_, H>, obj: &H::Object) -> Result<Self> {
                let host = cx.host();
                let wide = host
                    .as_i64(obj)
                    .map_err(|err| from_host_number::<$t>(host_text(host, obj), err))?;
                <$t>::try_from(wide).map_err(|_| Error::range::<$t>(wide))
            }
        }
    )*};
}

macro_rules! impl_unsigned_type {
    ($($t:ty),*) => {$(
        impl<H: Host> Type<H> for $t {
            fn to_host(cx: &Context<'_, H>, value: &Self) -> Result<H::Object> {
                Ok(cx.host().new_u64(u64::from(*value)))
            }

            fn from_host(cx: &Context<'_, H>, obj: &H::Object) -> Result<Self> {
                let host = cx.host();
                let wide = host
                    .as_u64(obj)
                    .map_err(|err| from_host_number::<$t>(host_text(host, obj), err))?;
                <$t>::try_from(wide).map_err(|_| Error::range::<$t>(wide))
            }
        }
    )*};
}

impl_signed_type!(i8, i16, i32, i64);
impl_unsigned_type!(u8, u16, u32, u64);

impl<H: Host> Type<H> for f64 {
    fn to_host(cx: &Context<'_, H>, value: &Self) -> Result<H::Object> {
        Ok(cx.host().new_f64(*value))
    }

    fn from_host(cx: &Context<'_, H>, obj: &H::Object) -> Result<Self> {
        let host = cx.host();
        host.as_f64(obj)
            .map_err(|err| from_host_number::<f64>(host_text(host, obj), err))
    }
}

impl<H: Host> Type<H> for f32 {
    fn to_host(cx: &Context<'_, H>, value: &Self) -> Result<H::Object> {
        Ok(cx.host().new_f64(f64::from(*value)))
    }

    fn from_host(cx: &Context<'_, H>, obj: &H::Object) -> Result<Self> {
        let wide = <f64 as Type<H>>::from_host(cx, obj)?;
        if wide.is_finite() && (wide < f64::from(f32::MIN) || wide > f64::from(f32::MAX)) {
            return Err(Error::range::<f32>(wide));
        }
        Ok(wide as f32)
    }
}

/// An IDL `string` stored as raw bytes in the codec `C`.
#[derive(Serialize, Deserialize)]
#[serde(bound = "")]
pub struct IdlString<C = Utf8> {
    bytes: Vec<u8>,
    #[serde(skip)]
    codec: PhantomData<fn() -> C>,
}

impl<C: Codec> IdlString<C> {
    /// Encodes `text` with `C`.
    pub fn new(text: &str) -> Result<Self> {
        Ok(Self::from_bytes(C::encode(text)?))
    }

    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        IdlString {
            bytes,
            codec: PhantomData,
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    pub fn to_text(&self) -> Result<String> {
        C::decode(&self.bytes)
    }
}

impl<C> Default for IdlString<C> {
    fn default() -> Self {
        IdlString {
            bytes: Vec::new(),
            codec: PhantomData,
        }
    }
}

impl<C> Clone for IdlString<C> {
    fn clone(&self) -> Self {
        IdlString {
            bytes: self.bytes.clone(),
            codec: PhantomData,
        }
    }
}

impl<C> PartialEq for IdlString<C> {
    fn eq(&self, other: &Self) -> bool {
        self.bytes == other.bytes
    }
}

impl<C> Eq for IdlString<C> {}

impl<C: Codec> fmt::Debug for IdlString<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match C::decode(&self.bytes) {
            Ok(text) => write!(f, "{text:?}"),
            Err(_) => write!(f, "{}{:?}", C::NAME, self.bytes),
        }
    }
}

impl From<&str> for IdlString<Utf8> {
    fn from(text: &str) -> Self {
        IdlString::from_bytes(text.as_bytes().to_vec())
    }
}

impl From<String> for IdlString<Utf8> {
    fn from(text: String) -> Self {
        IdlString::from_bytes(text.into_bytes())
    }
}

impl<H: Host, C: Codec> Type<H> for IdlString<C> {
    fn to_host(cx: &Context<'_, H>, value: &Self) -> Result<H::Object> {
        let text = C::decode(&value.bytes)?;
        Ok(cx.host().new_str(&text))
    }

    fn from_host(cx: &Context<'_, H>, obj: &H::Object) -> Result<Self> {
        // Any value is accepted and stringified first, like `str(obj)`.
        let text = cx.host().str_of(obj).map_err(|err| match err.kind {
            HostErrorKind::Encoding => Error::Encoding {
                codec: C::NAME,
                action: "encode",
                reason: err.message,
            },
            _ => Error::Host(err),
        })?;
        Self::new(&text)
    }
}

impl<H: Host> Type<H> for String {
    fn to_host(cx: &Context<'_, H>, value: &Self) -> Result<H::Object> {
        Ok(cx.host().new_str(value))
    }

    fn from_host(cx: &Context<'_, H>, obj: &H::Object) -> Result<Self> {
        <IdlString<Utf8> as Type<H>>::from_host(cx, obj).and_then(|s| s.to_text())
    }
}

/// IDL unbounded sequences map to host lists.
impl<H: Host, T: Type<H>> Type<H> for Vec<T> {
    fn to_host(cx: &Context<'_, H>, value: &Self) -> Result<H::Object> {
        let items = value
            .iter()
            .map(|item| T::to_host(cx, item))
            .collect::<Result<Vec<_>>>()?;
        Ok(cx.host().new_list(items))
    }

    fn from_host(cx: &Context<'_, H>, obj: &H::Object) -> Result<Self> {
        cx.host()
            .list_items(obj)
            .map_err(|err| match err.kind {
                HostErrorKind::Type => Error::Type(err.message),
                _ => Error::Host(err),
            })?
            .iter()
            .map(|item| T::from_host(cx, item))
            .collect()
    }
}
