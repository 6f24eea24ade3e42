//! C ABI bindings for the smallworld index.
//!
//! Handles are opaque boxed pointers; every call routes failures into a
//! thread-local last-error slot that callers drain with
//! `hnsw_get_last_error_utf8`. Functions returning a count use `-1` to
//! signal an error. Vetoed inserts (possible only with
//! `zero_layer_guaranteed = false`) report id `-1` in the output array.
//!
//! Snapshot files written by `hnsw_serialize` carry a one-byte metric tag
//! and the vector dimension ahead of the core snapshot, so
//! `hnsw_deserialize` can rebuild the distance function without help.

use smallworld_core::{DistanceMetric, HnswError, HnswIndex, HnswParams};
use std::cell::RefCell;
use std::ffi::{CStr, CString};
use std::os::raw::{c_char, c_double, c_float, c_int, c_longlong};
use std::slice;

/// Opaque index handle handed across the ABI.
pub struct HnswHandle {
    index: HnswIndex<Vec<f32>>,
    metric: DistanceMetric,
    dim: usize,
}

/// Metric codes of `hnsw_create_with_metric` / the snapshot header.
const METRIC_COSINE: u8 = 0;
const METRIC_SQ_EUCLIDEAN: u8 = 1;
const METRIC_UNIT_COSINE: u8 = 2;

/// Magic prefix of FFI snapshot files: metric + dimension header, then the
/// core snapshot bytes.
const FFI_SNAPSHOT_MAGIC: &[u8; 4] = b"SWF1";

thread_local! {
    static LAST_ERROR: RefCell<Option<CString>> = const { RefCell::new(None) };
}

fn clear_last_error() {
    LAST_ERROR.with(|slot| slot.borrow_mut().take());
}

fn set_last_error(message: impl Into<String>) {
    let message = message.into();
    let c = CString::new(message.replace('\0', " "))
        .unwrap_or_else(|_| CString::new("error message contained NUL").expect("static message"));
    LAST_ERROR.with(|slot| *slot.borrow_mut() = Some(c));
}

fn record(err: HnswError) {
    set_last_error(err.to_string());
}

fn metric_from_code(code: u8) -> Option<DistanceMetric> {
    match code {
        METRIC_COSINE => Some(DistanceMetric::Cosine),
        METRIC_SQ_EUCLIDEAN => Some(DistanceMetric::SqEuclidean),
        METRIC_UNIT_COSINE => Some(DistanceMetric::UnitCosine),
        _ => None,
    }
}

fn metric_code(metric: DistanceMetric) -> u8 {
    match metric {
        DistanceMetric::Cosine => METRIC_COSINE,
        DistanceMetric::SqEuclidean => METRIC_SQ_EUCLIDEAN,
        DistanceMetric::UnitCosine => METRIC_UNIT_COSINE,
    }
}

/// # Safety
/// `ptr` must be null or a pointer from `hnsw_create` / `hnsw_deserialize`
/// that has not been freed.
unsafe fn handle_ref<'a>(ptr: *mut HnswHandle) -> Option<&'a HnswHandle> {
    if ptr.is_null() {
        set_last_error("invalid handle: null pointer");
        return None;
    }
    Some(&*ptr)
}

fn new_handle(dim: usize, metric: DistanceMetric) -> Option<*mut HnswHandle> {
    let params = HnswParams::default();
    match HnswIndex::with_metric(metric, params) {
        Ok(index) => Some(Box::into_raw(Box::new(HnswHandle { index, metric, dim }))),
        Err(e) => {
            record(e);
            None
        }
    }
}

/// Create an index over `dim`-dimensional f32 vectors with the default
/// (cosine) metric. Returns null on error.
///
/// # Safety
/// The returned pointer must be released with `hnsw_free`.
#[no_mangle]
pub unsafe extern "C" fn hnsw_create(dim: c_int) -> *mut HnswHandle {
    clear_last_error();
    if dim <= 0 {
        set_last_error(format!("invalid argument: dim must be >= 1, got {dim}"));
        return std::ptr::null_mut();
    }
    new_handle(dim as usize, DistanceMetric::Cosine).unwrap_or(std::ptr::null_mut())
}

/// Create an index with an explicit metric code: 0 = cosine,
/// 1 = squared euclidean, 2 = unit cosine.
///
/// # Safety
/// The returned pointer must be released with `hnsw_free`.
#[no_mangle]
pub unsafe extern "C" fn hnsw_create_with_metric(dim: c_int, metric: c_int) -> *mut HnswHandle {
    clear_last_error();
    if dim <= 0 {
        set_last_error(format!("invalid argument: dim must be >= 1, got {dim}"));
        return std::ptr::null_mut();
    }
    let Some(metric) = u8::try_from(metric).ok().and_then(metric_from_code) else {
        set_last_error(format!("invalid argument: unknown metric code {metric}"));
        return std::ptr::null_mut();
    };
    new_handle(dim as usize, metric).unwrap_or(std::ptr::null_mut())
}

/// Release an index. Null is ignored.
///
/// # Safety
/// `ptr` must come from `hnsw_create`/`hnsw_deserialize` and must not be
/// used afterwards.
#[no_mangle]
pub unsafe extern "C" fn hnsw_free(ptr: *mut HnswHandle) {
    if !ptr.is_null() {
        drop(Box::from_raw(ptr));
    }
}

/// Insert `n` vectors given as row pointers. Writes one id per row into
/// `out_ids` (`-1` for a vetoed insert) and returns the number of rows
/// processed, or `-1` on error.
///
/// # Safety
/// `vectors` must point to `n` valid rows of `dim` floats; `out_ids` must
/// have room for `n` ints.
#[no_mangle]
pub unsafe extern "C" fn hnsw_add(
    ptr: *mut HnswHandle,
    vectors: *const *const c_float,
    n: c_int,
    dim: c_int,
    out_ids: *mut c_int,
) -> c_int {
    clear_last_error();
    let Some(handle) = handle_ref(ptr) else {
        return -1;
    };
    if vectors.is_null() || out_ids.is_null() || n < 0 {
        set_last_error("invalid argument: null buffer or negative count");
        return -1;
    }
    if dim as usize != handle.dim {
        set_last_error(format!(
            "invalid argument: expected dim {}, got {dim}",
            handle.dim
        ));
        return -1;
    }
    let rows = slice::from_raw_parts(vectors, n as usize);
    let labels: Vec<Vec<f32>> = rows
        .iter()
        .map(|&row| slice::from_raw_parts(row, handle.dim).to_vec())
        .collect();
    match handle.index.add_batch(labels) {
        Ok(ids) => {
            let out = slice::from_raw_parts_mut(out_ids, n as usize);
            for (slot, id) in out.iter_mut().zip(ids) {
                *slot = id.map_or(-1, |v| v as c_int);
            }
            n
        }
        Err(e) => {
            record(e);
            -1
        }
    }
}

/// Remove `n` ids. Errors are reported through the last-error slot.
///
/// # Safety
/// `ids` must point to `n` valid ints.
#[no_mangle]
pub unsafe extern "C" fn hnsw_remove(ptr: *mut HnswHandle, ids: *const c_int, n: c_int) {
    clear_last_error();
    let Some(handle) = handle_ref(ptr) else {
        return;
    };
    if ids.is_null() || n < 0 {
        set_last_error("invalid argument: null buffer or negative count");
        return;
    }
    let ids = slice::from_raw_parts(ids, n as usize);
    let ids: Vec<u32> = match ids
        .iter()
        .map(|&id| u32::try_from(id))
        .collect::<std::result::Result<_, _>>()
    {
        Ok(v) => v,
        Err(_) => {
            set_last_error("invalid argument: negative id");
            return;
        }
    };
    if let Err(e) = handle.index.remove_batch(&ids) {
        record(e);
    }
}

/// k-nearest-neighbor query. Writes up to `k` ids and distances and
/// returns how many were written, or `-1` on error.
///
/// # Safety
/// `query` must point to `dim` floats; `out_ids` and `out_dists` must have
/// room for `k` entries.
#[no_mangle]
pub unsafe extern "C" fn hnsw_knn_query(
    ptr: *mut HnswHandle,
    query: *const c_float,
    dim: c_int,
    k: c_int,
    out_ids: *mut c_int,
    out_dists: *mut c_float,
) -> c_int {
    clear_last_error();
    let Some(handle) = handle_ref(ptr) else {
        return -1;
    };
    if query.is_null() || out_ids.is_null() || out_dists.is_null() {
        set_last_error("invalid argument: null buffer");
        return -1;
    }
    if dim as usize != handle.dim {
        set_last_error(format!(
            "invalid argument: expected dim {}, got {dim}",
            handle.dim
        ));
        return -1;
    }
    if k < 1 {
        set_last_error("invalid argument: k must be >= 1");
        return -1;
    }
    let q = slice::from_raw_parts(query, handle.dim).to_vec();
    match handle.index.knn(&q, k as usize) {
        Ok(results) => {
            let ids = slice::from_raw_parts_mut(out_ids, k as usize);
            let dists = slice::from_raw_parts_mut(out_dists, k as usize);
            for (i, r) in results.iter().enumerate() {
                ids[i] = r.id as c_int;
                dists[i] = r.distance;
            }
            results.len() as c_int
        }
        Err(e) => {
            record(e);
            -1
        }
    }
}

/// Radius query. Writes up to `cap` matches and returns how many were
/// written, or `-1` on error.
///
/// # Safety
/// `query` must point to `dim` floats; `out_ids` and `out_dists` must have
/// room for `cap` entries.
#[no_mangle]
pub unsafe extern "C" fn hnsw_range_query(
    ptr: *mut HnswHandle,
    query: *const c_float,
    dim: c_int,
    radius: c_float,
    cap: c_int,
    out_ids: *mut c_int,
    out_dists: *mut c_float,
) -> c_int {
    clear_last_error();
    let Some(handle) = handle_ref(ptr) else {
        return -1;
    };
    if query.is_null() || out_ids.is_null() || out_dists.is_null() || cap < 0 {
        set_last_error("invalid argument: null buffer or negative capacity");
        return -1;
    }
    if dim as usize != handle.dim {
        set_last_error(format!(
            "invalid argument: expected dim {}, got {dim}",
            handle.dim
        ));
        return -1;
    }
    let q = slice::from_raw_parts(query, handle.dim).to_vec();
    match handle.index.range(&q, radius) {
        Ok(results) => {
            let written = results.len().min(cap as usize);
            let ids = slice::from_raw_parts_mut(out_ids, cap as usize);
            let dists = slice::from_raw_parts_mut(out_dists, cap as usize);
            for (i, r) in results.iter().take(written).enumerate() {
                ids[i] = r.id as c_int;
                dists[i] = r.distance;
            }
            written as c_int
        }
        Err(e) => {
            record(e);
            -1
        }
    }
}

/// Serialize the index to a UTF-8 path of `len` bytes. Returns 0 on
/// success, -1 on error.
///
/// # Safety
/// `path` must point to `len` valid bytes.
#[no_mangle]
pub unsafe extern "C" fn hnsw_serialize(
    ptr: *mut HnswHandle,
    path: *const c_char,
    len: c_int,
) -> c_int {
    clear_last_error();
    let Some(handle) = handle_ref(ptr) else {
        return -1;
    };
    let Some(path) = path_from_raw(path, len) else {
        return -1;
    };
    let core_bytes = match handle.index.to_snapshot_bytes() {
        Ok(bytes) => bytes,
        Err(e) => {
            record(e);
            return -1;
        }
    };
    let mut out = Vec::with_capacity(core_bytes.len() + 9);
    out.extend_from_slice(FFI_SNAPSHOT_MAGIC);
    out.push(metric_code(handle.metric));
    out.extend_from_slice(&(handle.dim as u32).to_le_bytes());
    out.extend_from_slice(&core_bytes);
    if let Err(e) = std::fs::write(&path, &out) {
        set_last_error(format!("i/o error: {e}"));
        return -1;
    }
    0
}

/// Load an index serialized by `hnsw_serialize`. Returns null on error.
///
/// # Safety
/// `path` must point to `len` valid bytes; the returned pointer must be
/// released with `hnsw_free`.
#[no_mangle]
pub unsafe extern "C" fn hnsw_deserialize(path: *const c_char, len: c_int) -> *mut HnswHandle {
    clear_last_error();
    let Some(path) = path_from_raw(path, len) else {
        return std::ptr::null_mut();
    };
    let raw = match std::fs::read(&path) {
        Ok(raw) => raw,
        Err(e) => {
            set_last_error(format!("i/o error: {e}"));
            return std::ptr::null_mut();
        }
    };
    if raw.len() < 9 || &raw[..4] != FFI_SNAPSHOT_MAGIC {
        set_last_error(format!("corrupt snapshot: {path} is not an index file"));
        return std::ptr::null_mut();
    }
    let Some(metric) = metric_from_code(raw[4]) else {
        set_last_error(format!("corrupt snapshot: unknown metric code {}", raw[4]));
        return std::ptr::null_mut();
    };
    let dim = u32::from_le_bytes([raw[5], raw[6], raw[7], raw[8]]) as usize;
    match HnswIndex::from_snapshot_bytes(&raw[9..], metric.distance_fn()) {
        Ok(index) => Box::into_raw(Box::new(HnswHandle { index, metric, dim })),
        Err(e) => {
            record(e);
            std::ptr::null_mut()
        }
    }
}

unsafe fn path_from_raw(path: *const c_char, len: c_int) -> Option<String> {
    if path.is_null() {
        set_last_error("invalid argument: null path");
        return None;
    }
    let bytes = if len > 0 {
        slice::from_raw_parts(path as *const u8, len as usize).to_vec()
    } else {
        CStr::from_ptr(path).to_bytes().to_vec()
    };
    match String::from_utf8(bytes) {
        Ok(s) => Some(s),
        Err(_) => {
            set_last_error("invalid argument: path is not UTF-8");
            None
        }
    }
}

macro_rules! setter {
    ($(#[$doc:meta])* $name:ident, $ty:ty, |$handle:ident, $value:ident| $body:expr) => {
        $(#[$doc])*
        /// Returns 0 on success, -1 on error.
        ///
        /// # Safety
        /// `ptr` must be a live handle.
        #[no_mangle]
        pub unsafe extern "C" fn $name(ptr: *mut HnswHandle, $value: $ty) -> c_int {
            clear_last_error();
            let Some($handle) = handle_ref(ptr) else {
                return -1;
            };
            match $body {
                Ok(()) => 0,
                Err(e) => {
                    record(e);
                    -1
                }
            }
        }
    };
}

setter!(
    /// Set the per-layer out-degree cap `M`.
    hnsw_set_max_edges,
    c_int,
    |handle, value| handle.index.set_max_edges(value.max(0) as usize)
);
setter!(
    /// Set the construction beam width.
    hnsw_set_max_candidates,
    c_int,
    |handle, value| handle.index.set_max_candidates(value.max(0) as usize)
);
setter!(
    /// Set the minimum query beam width.
    hnsw_set_min_nn,
    c_int,
    |handle, value| handle.index.set_min_nn(value.max(0) as usize)
);
setter!(
    /// Set the layer sampler scale `mL`.
    hnsw_set_distribution_rate,
    c_double,
    |handle, value| handle.index.set_distribution_rate(value)
);
setter!(
    /// Set the arena capacity hint (growth only).
    hnsw_set_collection_size,
    c_int,
    |handle, value| handle.index.set_collection_size(value.max(0) as usize)
);
setter!(
    /// Reseed the layer sampler; negative selects OS entropy.
    hnsw_set_random_seed,
    c_longlong,
    |handle, value| handle.index.set_random_seed(value)
);
setter!(
    /// Enable/disable removals (0 = off). Only valid while empty.
    hnsw_set_allow_removals,
    c_int,
    |handle, value| handle.index.set_allow_removals(value != 0)
);
setter!(
    /// Toggle guaranteed base-layer membership (0 = off).
    hnsw_set_zero_layer_guaranteed,
    c_int,
    |handle, value| handle.index.set_zero_layer_guaranteed(value != 0)
);

/// Fetch the thread-local last error as UTF-8. With a null/empty buffer,
/// returns the byte length needed; otherwise copies up to `cap - 1` bytes
/// plus a NUL terminator and returns the copied length. Returns 0 when no
/// error is pending.
///
/// # Safety
/// `buf`, when non-null, must have room for `cap` bytes.
#[no_mangle]
pub unsafe extern "C" fn hnsw_get_last_error_utf8(buf: *mut c_char, cap: c_int) -> c_int {
    LAST_ERROR.with(|slot| {
        let slot = slot.borrow();
        let Some(message) = slot.as_ref() else {
            return 0;
        };
        let bytes = message.as_bytes();
        if buf.is_null() || cap <= 0 {
            return bytes.len() as c_int;
        }
        let n = bytes.len().min(cap as usize - 1);
        let out = slice::from_raw_parts_mut(buf as *mut u8, cap as usize);
        out[..n].copy_from_slice(&bytes[..n]);
        out[n] = 0;
        n as c_int
    })
}
