//! `Host` implementation for the live CPython interpreter.

use std::fmt;

use parking_lot::Mutex;
use pyo3::exceptions::{
    PyAttributeError, PyException, PyImportError, PyOverflowError, PyTypeError, PyUnicodeError,
    PyValueError,
};
use pyo3::prelude::*;
use pyo3::types::{PyBool, PyDict, PyList, PyLong, PyTuple, PyType};
use pyopendds::capsule::Capsule;
use pyopendds::dds::{EntityHandle, EntityKind};
use pyopendds::host::{Host, HostError, HostErrorKind, HostResult, ObjectId};

/// The capsule stored on a proxy's `_cpp_object` attribute.
#[pyclass(frozen, module = "pyopendds._pyopendds")]
pub struct NativeHandle {
    kind: EntityKind,
    handle: EntityHandle,
    // Only here to be dropped with the Python object.
    _capsule: Mutex<Capsule>,
}

#[pymethods]
impl NativeHandle {
    fn __repr__(&self) -> String {
        format!("<{} {}>", self.kind, self.handle)
    }
}

impl fmt::Debug for NativeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeHandle")
            .field("kind", &self.kind)
            .field("handle", &self.handle)
            .finish_non_exhaustive()
    }
}

fn text(obj: &Bound<'_, PyAny>) -> PyResult<String> {
    Ok(obj.str()?.to_cow()?.into_owned())
}

fn type_name(obj: &Bound<'_, PyAny>) -> String {
    obj.get_type()
        .getattr("__name__")
        .and_then(|name| text(&name))
        .unwrap_or_else(|_| "object".to_string())
}

/// Wraps a Python exception, keeping it as the payload so it can be raised
/// again unchanged.
pub(crate) fn host_error(py: Python<'_>, err: PyErr) -> HostError {
    // UnicodeError derives from ValueError and has to be tested first.
    let kind = if err.is_instance_of::<PyAttributeError>(py) {
        HostErrorKind::Attribute
    } else if err.is_instance_of::<PyImportError>(py) {
        HostErrorKind::Import
    } else if err.is_instance_of::<PyTypeError>(py) {
        HostErrorKind::Type
    } else if err.is_instance_of::<PyOverflowError>(py) {
        HostErrorKind::Overflow
    } else if err.is_instance_of::<PyUnicodeError>(py) {
        HostErrorKind::Encoding
    } else if err.is_instance_of::<PyValueError>(py) {
        HostErrorKind::Value
    } else {
        HostErrorKind::Other
    };
    let message = text(err.value_bound(py).as_any()).unwrap_or_default();
    HostError::new(kind, message).with_payload(err)
}

fn gil<T>(f: impl FnOnce(Python<'_>) -> PyResult<T>) -> HostResult<T> {
    Python::with_gil(|py| f(py).map_err(|err| host_error(py, err)))
}

fn expect_int(obj: &Bound<'_, PyAny>) -> PyResult<()> {
    if obj.is_instance_of::<PyLong>() {
        Ok(())
    } else {
        Err(PyTypeError::new_err(format!(
            "'{}' object cannot be interpreted as an integer",
            type_name(obj)
        )))
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PyHost;

impl Host for PyHost {
    type Object = PyObject;
    /// A `weakref.ref` to the object.
    type WeakObject = PyObject;

    fn id(&self, obj: &PyObject) -> ObjectId {
        ObjectId(obj.as_ptr() as usize)
    }

    fn none(&self) -> PyObject {
        Python::with_gil(|py| py.None())
    }

    fn is_none(&self, obj: &PyObject) -> bool {
        Python::with_gil(|py| obj.is_none(py))
    }

    fn downgrade(&self, obj: &PyObject) -> HostResult<PyObject> {
        gil(|py| {
            PyModule::import_bound(py, "weakref")?
                .getattr("ref")?
                .call1((obj.bind(py),))
                .map(Bound::unbind)
        })
    }

    fn upgrade(&self, weak: &PyObject) -> Option<PyObject> {
        Python::with_gil(|py| {
            weak.bind(py)
                .call0()
                .ok()
                .filter(|obj| !obj.is_none())
                .map(Bound::unbind)
        })
    }

    fn import(&self, module: &str) -> HostResult<PyObject> {
        gil(|py| Ok(PyModule::import_bound(py, module)?.into_any().unbind()))
    }

    fn get_attr(&self, obj: &PyObject, name: &str) -> HostResult<PyObject> {
        gil(|py| obj.bind(py).getattr(name).map(Bound::unbind))
    }

    fn set_attr(&self, obj: &PyObject, name: &str, value: PyObject) -> HostResult<()> {
        gil(|py| obj.bind(py).setattr(name, value))
    }

    fn del_attr(&self, obj: &PyObject, name: &str) -> HostResult<()> {
        gil(|py| obj.bind(py).delattr(name))
    }

    fn call(&self, callable: &PyObject, args: &[PyObject]) -> HostResult<PyObject> {
        gil(|py| {
            let args = PyTuple::new_bound(py, args);
            callable.bind(py).call1(args).map(Bound::unbind)
        })
    }

    fn type_of(&self, obj: &PyObject) -> PyObject {
        Python::with_gil(|py| obj.bind(py).get_type().into_any().unbind())
    }

    fn is_instance(&self, obj: &PyObject, class: &PyObject) -> HostResult<bool> {
        gil(|py| obj.bind(py).is_instance(class.bind(py)))
    }

    fn new_bool(&self, value: bool) -> PyObject {
        Python::with_gil(|py| value.into_py(py))
    }

    fn is_true(&self, obj: &PyObject) -> bool {
        Python::with_gil(|py| {
            obj.bind(py)
                .downcast::<PyBool>()
                .is_ok_and(|value| value.is_true())
        })
    }

    fn is_false(&self, obj: &PyObject) -> bool {
        Python::with_gil(|py| {
            obj.bind(py)
                .downcast::<PyBool>()
                .is_ok_and(|value| !value.is_true())
        })
    }

    fn new_i64(&self, value: i64) -> PyObject {
        Python::with_gil(|py| value.into_py(py))
    }

    fn new_u64(&self, value: u64) -> PyObject {
        Python::with_gil(|py| value.into_py(py))
    }

    fn new_f64(&self, value: f64) -> PyObject {
        Python::with_gil(|py| value.into_py(py))
    }

    fn as_i64(&self, obj: &PyObject) -> HostResult<i64> {
        gil(|py| {
            let obj = obj.bind(py);
            expect_int(obj)?;
            obj.extract()
        })
    }

    fn as_u64(&self, obj: &PyObject) -> HostResult<u64> {
        gil(|py| {
            let obj = obj.bind(py);
            expect_int(obj)?;
            obj.extract()
        })
    }

    fn as_f64(&self, obj: &PyObject) -> HostResult<f64> {
        gil(|py| obj.bind(py).extract())
    }

    fn new_str(&self, value: &str) -> PyObject {
        Python::with_gil(|py| value.into_py(py))
    }

    fn str_of(&self, obj: &PyObject) -> HostResult<String> {
        gil(|py| text(obj.bind(py)))
    }

    fn new_list(&self, items: Vec<PyObject>) -> PyObject {
        Python::with_gil(|py| PyList::new_bound(py, items).into_any().unbind())
    }

    fn list_items(&self, obj: &PyObject) -> HostResult<Vec<PyObject>> {
        gil(|py| {
            let obj = obj.bind(py);
            if let Ok(list) = obj.downcast::<PyList>() {
                Ok(list.iter().map(Bound::unbind).collect())
            } else if let Ok(tuple) = obj.downcast::<PyTuple>() {
                Ok(tuple.iter().map(Bound::unbind).collect())
            } else {
                Err(PyTypeError::new_err(format!(
                    "expected a list, got '{}'",
                    type_name(obj)
                )))
            }
        })
    }

    fn new_tuple(&self, items: Vec<PyObject>) -> PyObject {
        Python::with_gil(|py| PyTuple::new_bound(py, items).into_any().unbind())
    }

    fn new_capsule(&self, capsule: Capsule) -> HostResult<PyObject> {
        let handle = NativeHandle {
            kind: capsule.kind(),
            handle: capsule.handle(),
            _capsule: Mutex::new(capsule),
        };
        gil(|py| Ok(Py::new(py, handle)?.into_any()))
    }

    fn capsule_handle(&self, obj: &PyObject) -> Option<(EntityKind, EntityHandle)> {
        Python::with_gil(|py| {
            obj.bind(py).downcast::<NativeHandle>().ok().map(|native| {
                let native = native.get();
                (native.kind, native.handle)
            })
        })
    }

    fn new_exception_class(&self, qualified_name: &str, bases: &[PyObject]) -> HostResult<PyObject> {
        let (module, name) = qualified_name
            .rsplit_once('.')
            .unwrap_or(("builtins", qualified_name));
        gil(|py| {
            let bases = if bases.is_empty() {
                PyTuple::new_bound(py, [py.get_type_bound::<PyException>()])
            } else {
                PyTuple::new_bound(py, bases)
            };
            let namespace = PyDict::new_bound(py);
            namespace.set_item("__module__", module)?;
            py.get_type_bound::<PyType>()
                .call1((name, bases, namespace))
                .map(Bound::unbind)
        })
    }

    fn allow_threads<T, F>(&self, f: F) -> T
    where
        T: Send,
        F: FnOnce() -> T + Send,
    {
        Python::with_gil(|py| py.allow_threads(f))
    }

    fn with_thread_state<T, F>(&self, f: F) -> T
    where
        F: FnOnce(&Self) -> T,
    {
        Python::with_gil(|_| f(self))
    }
}
