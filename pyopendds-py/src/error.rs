use pyo3::exceptions::{
    PyAttributeError, PyException, PyImportError, PyOverflowError, PyRuntimeError, PyTypeError,
    PyUnicodeError, PyValueError,
};
use pyo3::prelude::*;
use pyopendds::Error;
use pyopendds::host::{HostError, HostErrorKind};
use tracing::warn;

/// Trait for converting Rust errors to Python exceptions
pub trait IntoPyErr {
    fn into_pyerr(self) -> PyErr;
}

impl IntoPyErr for Error {
    /// Raises the exception class the bridge created for this error, or the
    /// original Python exception when the error came from Python.
    fn into_pyerr(self) -> PyErr {
        if let Error::Host(err) = self {
            return err.into_pyerr();
        }
        Python::with_gil(|py| {
            let Some(bridge) = crate::BRIDGE.get(py) else {
                return PyRuntimeError::new_err(self.to_string());
            };
            match bridge.exception(&self) {
                Ok(exception) => PyErr::from_value_bound(exception.into_bound(py)),
                Err(err) => {
                    warn!("[PY] no exception object for '{self}': {err}");
                    PyRuntimeError::new_err(self.to_string())
                }
            }
        })
    }
}

impl IntoPyErr for HostError {
    fn into_pyerr(self) -> PyErr {
        if let Some(err) = self.payload::<PyErr>() {
            return Python::with_gil(|py| err.clone_ref(py));
        }
        match self.kind {
            HostErrorKind::Attribute => PyAttributeError::new_err(self.message),
            HostErrorKind::Import => PyImportError::new_err(self.message),
            HostErrorKind::Type => PyTypeError::new_err(self.message),
            HostErrorKind::Overflow => PyOverflowError::new_err(self.message),
            HostErrorKind::Value => PyValueError::new_err(self.message),
            HostErrorKind::Encoding => PyUnicodeError::new_err(self.message),
            HostErrorKind::Other => PyException::new_err(self.message),
        }
    }
}

impl IntoPyErr for anyhow::Error {
    fn into_pyerr(self) -> PyErr {
        PyRuntimeError::new_err(format!("{:#}", self))
    }
}
