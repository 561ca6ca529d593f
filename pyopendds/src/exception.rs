//! Host exception classes for bridge errors.
//!
//! The table is built once when the host module initializes and is read-only
//! afterwards. Every error kind gets its own class under the common
//! `PyOpenDDS_Error` base; DDS operation errors are further split by return
//! code.

use std::collections::HashMap;

use strum::IntoEnumIterator;
use tracing::trace;

use crate::dds::ReturnCode;
use crate::error::{Error, ErrorKind, Result};
use crate::host::Host;

pub const BASE_EXCEPTION: &str = "PyOpenDDS_Error";

pub struct ExceptionTable<H: Host> {
    module: String,
    base: H::Object,
    kinds: HashMap<ErrorKind, H::Object>,
    return_codes: HashMap<ReturnCode, H::Object>,
}

impl<H: Host> ExceptionTable<H> {
    /// Creates the classes, qualified with `module`.
    ///
    /// Where the host offers a matching built-in exception in `builtins` the
    /// class derives from it as well; a host without one gets the bridge base
    /// alone.
    pub fn new(host: &H, module: &str) -> Result<Self> {
        let builtins = host.import("builtins").ok();
        let builtin = |name: &str| {
            builtins
                .as_ref()
                .and_then(|module| host.get_attr(module, name).ok())
        };

        let mut base_bases = Vec::new();
        base_bases.extend(builtin("Exception"));
        let base = host.new_exception_class(&format!("{module}.{BASE_EXCEPTION}"), &base_bases)?;

        let mut kinds = HashMap::new();
        for kind in ErrorKind::iter().filter(|kind| *kind != ErrorKind::Host) {
            let mut bases = vec![base.clone()];
            bases.extend(kind.builtin_base().and_then(builtin));
            let class = host.new_exception_class(&format!("{module}.{}", kind.exception_name()), &bases)?;
            kinds.insert(kind, class);
        }

        let mut return_codes = HashMap::new();
        if let Some(parent) = kinds.get(&ErrorKind::DdsOperation).cloned() {
            for code in ReturnCode::failures() {
                let class = host.new_exception_class(
                    &format!("{module}.{}", code.exception_name()),
                    std::slice::from_ref(&parent),
                )?;
                return_codes.insert(code, class);
            }
        }

        trace!(
            "[EXC] created {} classes in {module}",
            1 + kinds.len() + return_codes.len()
        );
        Ok(Self {
            module: module.to_string(),
            base,
            kinds,
            return_codes,
        })
    }

    pub fn module(&self) -> &str {
        &self.module
    }

    pub fn base(&self) -> &H::Object {
        &self.base
    }

    /// Most specific class for `err`.
    pub fn class_for(&self, err: &Error) -> &H::Object {
        if let Error::DdsOperation { code, .. } = err {
            if let Some(class) = self.return_codes.get(code) {
                return class;
            }
        }
        self.kinds.get(&err.kind()).unwrap_or(&self.base)
    }

    pub fn class_for_kind(&self, kind: ErrorKind) -> &H::Object {
        self.kinds.get(&kind).unwrap_or(&self.base)
    }

    pub fn class_for_code(&self, code: ReturnCode) -> Option<&H::Object> {
        self.return_codes.get(&code)
    }

    /// Builds the exception instance for `err`. DDS failures carry the native
    /// code as `return_code`.
    pub fn instantiate(&self, host: &H, err: &Error) -> Result<H::Object> {
        let exception = host.call(self.class_for(err), &[host.new_str(&err.to_string())])?;
        if let Some(code) = err.return_code() {
            host.set_attr(&exception, "return_code", host.new_i64(i64::from(code.code())))?;
        }
        Ok(exception)
    }

    /// Every class with its unqualified name, for export on the host module.
    pub fn classes(&self) -> Vec<(String, H::Object)> {
        let mut classes = vec![(BASE_EXCEPTION.to_string(), self.base.clone())];
        for kind in ErrorKind::iter() {
            if let Some(class) = self.kinds.get(&kind) {
                classes.push((kind.exception_name().to_string(), class.clone()));
            }
        }
        for code in ReturnCode::failures() {
            if let Some(class) = self.return_codes.get(&code) {
                classes.push((code.exception_name(), class.clone()));
            }
        }
        classes
    }
}
