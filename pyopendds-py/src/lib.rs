use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use pyo3::exceptions::{PyRuntimeError, PyValueError};
use pyo3::prelude::*;
use pyo3::sync::GILOnceCell;
use pyo3::types::{PyDict, PyTuple};
use pyopendds::dds::{DdsDuration, ReturnCode, StatusKind, StatusMask};
use pyopendds::loopback::LoopbackProvider;
use pyopendds::topic_type::IdlStruct;
use pyopendds::{Bridge, Builder, InitOptions};
use strum::IntoEnumIterator;
use tracing::debug;

mod error;
mod host;

pub use error::IntoPyErr;
pub use host::{NativeHandle, PyHost};

static BRIDGE: GILOnceCell<Bridge<PyHost>> = GILOnceCell::new();

fn build_bridge(module: &str) -> anyhow::Result<Bridge<PyHost>> {
    let provider = LoopbackProvider::builder()
        .build()
        .context("starting the DDS provider")?;
    Bridge::builder(PyHost)
        .with_provider(Arc::new(provider))
        .with_module_name(module)
        .build()
        .with_context(|| format!("building the {module} bridge"))
}

/// The bridge created when `_pyopendds` was imported.
pub fn bridge(py: Python<'_>) -> PyResult<&'static Bridge<PyHost>> {
    BRIDGE
        .get(py)
        .ok_or_else(|| PyRuntimeError::new_err("_pyopendds has not been imported"))
}

/// Registers the topic type `T` and returns its Python class.
///
/// Modules generated for IDL files call this from their own init, after
/// `_pyopendds` has been imported.
pub fn register_topic_type<T: IdlStruct<PyHost>>(py: Python<'_>) -> PyResult<PyObject> {
    bridge(py)?
        .register_topic_type::<T>()
        .map_err(|e| e.into_pyerr())
}

/// Initialize the DDS provider with command line style arguments
#[pyfunction]
#[pyo3(signature = (*args, default_rtps = true, opendds_debug_level = None))]
fn init_opendds_impl(
    py: Python<'_>,
    args: &Bound<'_, PyTuple>,
    default_rtps: bool,
    opendds_debug_level: Option<i64>,
) -> PyResult<()> {
    let args = args
        .iter()
        .map(|arg| Ok(arg.str()?.to_cow()?.into_owned()))
        .collect::<PyResult<Vec<String>>>()?;
    let mut options = InitOptions::default()
        .with_args(args)
        .with_default_rtps(default_rtps);
    if let Some(level) = opendds_debug_level {
        options = options.with_debug_level(level);
    }
    bridge(py)?.init(&options).map_err(|e| e.into_pyerr())
}

#[pyfunction]
fn create_participant(py: Python<'_>, participant: PyObject, domain: u32) -> PyResult<()> {
    bridge(py)?
        .create_participant(&participant, domain)
        .map_err(|e| e.into_pyerr())
}

/// Delete everything the participant contains
#[pyfunction]
fn participant_cleanup(py: Python<'_>, participant: PyObject) -> PyResult<()> {
    bridge(py)?
        .participant_cleanup(&participant)
        .map_err(|e| e.into_pyerr())
}

#[pyfunction]
fn register_type(py: Python<'_>, participant: PyObject, type_class: PyObject) -> PyResult<()> {
    bridge(py)?
        .register_type(&participant, &type_class)
        .map_err(|e| e.into_pyerr())
}

/// DDS type name of a registered topic type class
#[pyfunction]
fn type_name(py: Python<'_>, type_class: PyObject) -> PyResult<&'static str> {
    bridge(py)?.type_name(&type_class).map_err(|e| e.into_pyerr())
}

#[pyfunction]
fn create_topic(
    py: Python<'_>,
    topic: PyObject,
    participant: PyObject,
    name: String,
    type_name: String,
) -> PyResult<()> {
    bridge(py)?
        .create_topic(&topic, &participant, &name, &type_name)
        .map_err(|e| e.into_pyerr())
}

#[pyfunction]
fn create_publisher(py: Python<'_>, publisher: PyObject, participant: PyObject) -> PyResult<()> {
    bridge(py)?
        .create_publisher(&publisher, &participant)
        .map_err(|e| e.into_pyerr())
}

#[pyfunction]
fn create_subscriber(py: Python<'_>, subscriber: PyObject, participant: PyObject) -> PyResult<()> {
    bridge(py)?
        .create_subscriber(&subscriber, &participant)
        .map_err(|e| e.into_pyerr())
}

#[pyfunction]
#[pyo3(signature = (datawriter, publisher, topic, qos=None))]
fn create_datawriter(
    py: Python<'_>,
    datawriter: PyObject,
    publisher: PyObject,
    topic: PyObject,
    qos: Option<PyObject>,
) -> PyResult<()> {
    bridge(py)?
        .create_datawriter(&datawriter, &publisher, &topic, qos.as_ref())
        .map_err(|e| e.into_pyerr())
}

#[pyfunction]
#[pyo3(signature = (datareader, subscriber, topic, qos=None))]
fn create_datareader(
    py: Python<'_>,
    datareader: PyObject,
    subscriber: PyObject,
    topic: PyObject,
    qos: Option<PyObject>,
) -> PyResult<()> {
    bridge(py)?
        .create_datareader(&datareader, &subscriber, &topic, qos.as_ref())
        .map_err(|e| e.into_pyerr())
}

/// Write a sample, returning RETCODE_OK
#[pyfunction]
fn write(py: Python<'_>, datawriter: PyObject, sample: PyObject) -> PyResult<i32> {
    bridge(py)?
        .write(&datawriter, &sample)
        .map(ReturnCode::code)
        .map_err(|e| e.into_pyerr())
}

/// Take the next sample, raising NoDataAvailable if there is none
///
/// Returns None for a sample that only reports an instance state change.
#[pyfunction]
fn take_next_sample(py: Python<'_>, datareader: PyObject) -> PyResult<PyObject> {
    bridge(py)?
        .take_next_sample(&datareader)
        .map_err(|e| e.into_pyerr())
}

/// Block until one of the statuses in `status` is triggered on the entity
#[pyfunction]
#[pyo3(signature = (entity, status, seconds, nanoseconds = 0))]
fn wait_for(
    py: Python<'_>,
    entity: PyObject,
    status: u32,
    seconds: i64,
    nanoseconds: u64,
) -> PyResult<()> {
    let timeout = DdsDuration::from_parts(seconds, nanoseconds).map_err(|e| e.into_pyerr())?;
    bridge(py)?
        .wait_for(&entity, StatusMask(status), timeout)
        .map_err(|e| e.into_pyerr())
}

#[pyfunction]
fn set_data_available_callback(
    py: Python<'_>,
    datareader: PyObject,
    callback: PyObject,
) -> PyResult<()> {
    bridge(py)?
        .set_data_available_callback(&datareader, &callback)
        .map_err(|e| e.into_pyerr())
}

#[pyfunction]
fn clear_data_available_callback(py: Python<'_>, datareader: PyObject) -> PyResult<()> {
    bridge(py)?
        .clear_data_available_callback(&datareader)
        .map_err(|e| e.into_pyerr())
}

/// Run the callbacks for pending notifications
///
/// Args:
///     timeout: Seconds to wait for a first notification (None = don't wait)
///
/// Returns:
///     How many callbacks ran
#[pyfunction]
#[pyo3(signature = (timeout=None))]
fn dispatch_notifications(py: Python<'_>, timeout: Option<f64>) -> PyResult<usize> {
    let timeout = timeout
        .map(Duration::try_from_secs_f64)
        .transpose()
        .map_err(|e| PyValueError::new_err(format!("invalid timeout: {e}")))?;
    bridge(py)?
        .dispatch_notifications(timeout)
        .map_err(|e| e.into_pyerr())
}

#[pyfunction]
fn opendds_version_str(py: Python<'_>) -> PyResult<String> {
    Ok(bridge(py)?.version().to_string())
}

#[pyfunction]
fn opendds_version_tuple(py: Python<'_>) -> PyResult<(u32, u32, u32)> {
    let version = bridge(py)?.version();
    Ok((version.major, version.minor, version.micro))
}

#[pyfunction]
fn opendds_version_dict(py: Python<'_>) -> PyResult<Bound<'_, PyDict>> {
    let version = bridge(py)?.version();
    let dict = PyDict::new_bound(py);
    dict.set_item("major", version.major)?;
    dict.set_item("minor", version.minor)?;
    dict.set_item("micro", version.micro)?;
    dict.set_item("metadata", version.metadata)?;
    dict.set_item("is_release", version.is_release)?;
    Ok(dict)
}

/// Internal Python bindings for OpenDDS
#[pymodule]
fn _pyopendds(m: &Bound<'_, PyModule>) -> PyResult<()> {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();

    let py = m.py();
    let module: String = m.getattr("__name__")?.extract()?;
    let bridge = BRIDGE.get_or_try_init(py, || build_bridge(&module).map_err(|e| e.into_pyerr()))?;

    // Exception classes
    for (name, class) in bridge.exceptions().classes() {
        m.add(name.as_str(), class)?;
    }

    // Return codes and status kinds
    for code in ReturnCode::iter() {
        m.add(format!("RETCODE_{code}").as_str(), code.code())?;
    }
    for kind in StatusKind::iter() {
        m.add(kind.constant_name().as_str(), kind.bit())?;
    }

    m.add_class::<NativeHandle>()?;

    m.add_function(wrap_pyfunction!(init_opendds_impl, m)?)?;
    m.add_function(wrap_pyfunction!(create_participant, m)?)?;
    m.add_function(wrap_pyfunction!(participant_cleanup, m)?)?;
    m.add_function(wrap_pyfunction!(register_type, m)?)?;
    m.add_function(wrap_pyfunction!(type_name, m)?)?;
    m.add_function(wrap_pyfunction!(create_topic, m)?)?;
    m.add_function(wrap_pyfunction!(create_publisher, m)?)?;
    m.add_function(wrap_pyfunction!(create_subscriber, m)?)?;
    m.add_function(wrap_pyfunction!(create_datawriter, m)?)?;
    m.add_function(wrap_pyfunction!(create_datareader, m)?)?;
    m.add_function(wrap_pyfunction!(write, m)?)?;
    m.add_function(wrap_pyfunction!(take_next_sample, m)?)?;
    m.add_function(wrap_pyfunction!(wait_for, m)?)?;
    m.add_function(wrap_pyfunction!(set_data_available_callback, m)?)?;
    m.add_function(wrap_pyfunction!(clear_data_available_callback, m)?)?;
    m.add_function(wrap_pyfunction!(dispatch_notifications, m)?)?;
    m.add_function(wrap_pyfunction!(opendds_version_str, m)?)?;
    m.add_function(wrap_pyfunction!(opendds_version_tuple, m)?)?;
    m.add_function(wrap_pyfunction!(opendds_version_dict, m)?)?;

    debug!("[PY] {module} loaded, provider {}", bridge.version());
    Ok(())
}
