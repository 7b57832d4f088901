//! C ABI for linking bpsock-core as a static library from Android (NDK) or other C/C++ hosts.
//! The host supplies its bundle protocol engine as a function table (`BpsockEngineOps`); the
//! exported `bpsock_*` functions drive sockets over it.

use std::ffi::{c_void, CStr, CString};
use std::os::raw::{c_char, c_int};
use std::path::{Path, PathBuf};
use std::slice;
use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use crate::bundle::{Bundle, ExtensionBlock, MetadataBlock};
use crate::eid::EndpointId;
use crate::engine::{Engine, EngineStatus, RegistrationToken, StatusCell};
use crate::error::{DtnError, StatusCode};
use crate::options::DeliveryOptions;
use crate::payload::{Payload, PayloadLocation};
use crate::priority::Priority;
use crate::socket::BundleSocket;
use crate::status_report::{StatusReport, StatusReportFlags, StatusReportReason};
use crate::timestamp::BundleTimestamp;

/// Version of this C ABI.
pub const BPSOCK_ABI_VERSION: u32 = 2;

/// Bit of `BpsockStatusReport::times_present` marking `creation` as set.
pub const BPSOCK_REPORT_CREATION: u32 = 1 << 6;

/// Invalid argument or illegal state, refused before reaching the engine.
pub const BPSOCK_ERR_INVALID: c_int = -100;
/// Local I/O failure.
pub const BPSOCK_ERR_IO: c_int = -101;
/// Output buffer too small.
pub const BPSOCK_ERR_BUFFER: c_int = -102;

#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BpsockTimestamp {
    pub seconds: u64,
    pub sequence: u64,
}

impl From<BundleTimestamp> for BpsockTimestamp {
    fn from(t: BundleTimestamp) -> Self {
        Self {
            seconds: t.seconds,
            sequence: t.sequence,
        }
    }
}

impl From<BpsockTimestamp> for BundleTimestamp {
    fn from(t: BpsockTimestamp) -> Self {
        BundleTimestamp::new(t.seconds, t.sequence)
    }
}

/// Extension or metadata block. For metadata blocks `block_type` is the metadata type.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct BpsockBlock {
    pub block_type: u32,
    pub flags: u32,
    pub data: *const u8,
    pub data_len: usize,
}

/// Status report carried by an administrative bundle. Bit `i` of `times_present` marks
/// `times[i]` as set, in the order received, custody accepted, forwarded, delivered, deleted,
/// acknowledged by application; [`BPSOCK_REPORT_CREATION`] marks `creation`.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct BpsockStatusReport {
    pub source: *const c_char,
    pub creation: BpsockTimestamp,
    pub fragment_offset: u32,
    pub orig_length: u32,
    pub reason: u32,
    pub flags: u32,
    pub times_present: u32,
    pub times: [BpsockTimestamp; 6],
}

/// Bundle as exchanged with the host engine. Strings are NUL-terminated and may be null.
/// A non-null `payload_path` means the payload lives in that file; otherwise `payload` and
/// `payload_len` hold it. Block arrays may be null when their length is zero, and
/// `status_report` is null unless the bundle is a status report.
#[repr(C)]
pub struct BpsockBundle {
    pub source: *const c_char,
    pub destination: *const c_char,
    pub reply_to: *const c_char,
    pub priority: u8,
    pub ordinal: u8,
    pub delivery_options: u32,
    pub expiration: i64,
    pub delivery_reg_id: u32,
    pub critical: u8,
    pub unreliable: u8,
    pub flow_label: u32,
    pub creation_seconds: u64,
    pub creation_sequence: u64,
    pub fragment_offset: u32,
    pub orig_length: u32,
    pub payload_location: c_int,
    pub payload: *const u8,
    pub payload_len: usize,
    pub payload_path: *const c_char,
    pub blocks: *const BpsockBlock,
    pub blocks_len: usize,
    pub metadata: *const BpsockBlock,
    pub metadata_len: usize,
    pub status_report: *const BpsockStatusReport,
}

impl BpsockBundle {
    pub fn empty() -> Self {
        Self {
            source: std::ptr::null(),
            destination: std::ptr::null(),
            reply_to: std::ptr::null(),
            priority: 0,
            ordinal: 0,
            delivery_options: 0,
            expiration: 0,
            delivery_reg_id: 0,
            critical: 0,
            unreliable: 0,
            flow_label: 0,
            creation_seconds: 0,
            creation_sequence: 0,
            fragment_offset: 0,
            orig_length: 0,
            payload_location: PayloadLocation::Memory.value(),
            payload: std::ptr::null(),
            payload_len: 0,
            payload_path: std::ptr::null(),
            blocks: std::ptr::null(),
            blocks_len: 0,
            metadata: std::ptr::null(),
            metadata_len: 0,
            status_report: std::ptr::null(),
        }
    }
}

/// Engine entry points provided by the host. Every function returns a raw status code (0 on
/// success) except `local_eid`, which returns the length written or a negative value.
/// Bundles filled by `receive` and `wait_for_bundle` are handed back through `release`.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct BpsockEngineOps {
    pub ctx: *mut c_void,
    pub register:
        extern "C" fn(ctx: *mut c_void, dtn_demux: *const c_char, ipn_demux: c_int, out_token: *mut i64) -> c_int,
    pub unregister: extern "C" fn(ctx: *mut c_void, token: i64) -> c_int,
    pub send: extern "C" fn(ctx: *mut c_void, token: i64, bundle: *const BpsockBundle) -> c_int,
    pub receive: extern "C" fn(
        ctx: *mut c_void,
        token: i64,
        location: c_int,
        timeout_secs: c_int,
        out: *mut BpsockBundle,
    ) -> c_int,
    pub wait_for_bundle: extern "C" fn(
        ctx: *mut c_void,
        token: i64,
        size_threshold: usize,
        scratch_path: *const c_char,
        wait_secs: c_int,
        out: *mut BpsockBundle,
    ) -> c_int,
    pub release: extern "C" fn(ctx: *mut c_void, bundle: *mut BpsockBundle),
    pub local_eid: extern "C" fn(ctx: *mut c_void, token: i64, out_buf: *mut c_char, out_len: usize) -> c_int,
}

/// [`Engine`] over a host function table.
pub struct NativeEngine {
    ops: BpsockEngineOps,
    status: StatusCell,
}

// SAFETY: the host guarantees its entry points may be called from any thread, concurrently,
// and that `ctx` stays valid until the engine is destroyed.
unsafe impl Send for NativeEngine {}
unsafe impl Sync for NativeEngine {}

fn whole_secs(d: Duration) -> c_int {
    let secs = d.as_secs() + u64::from(d.subsec_nanos() > 0);
    secs.min(c_int::MAX as u64) as c_int
}

unsafe fn eid_from(p: *const c_char) -> Option<EndpointId> {
    if p.is_null() {
        return None;
    }
    EndpointId::parse(CStr::from_ptr(p).to_str().ok()?)
}

unsafe fn raw_slice<'a, T>(p: *const T, len: usize) -> &'a [T] {
    if p.is_null() || len == 0 {
        &[]
    } else {
        slice::from_raw_parts(p, len)
    }
}

unsafe fn block_data(b: &BpsockBlock) -> Vec<u8> {
    raw_slice(b.data, b.data_len).to_vec()
}

fn raw_block(block_type: u32, flags: u32, data: &[u8]) -> BpsockBlock {
    BpsockBlock {
        block_type,
        flags,
        data: if data.is_empty() { std::ptr::null() } else { data.as_ptr() },
        data_len: data.len(),
    }
}

fn report_times(r: &StatusReport) -> [Option<BundleTimestamp>; 6] {
    [
        r.receipt_timestamp,
        r.custody_timestamp,
        r.forwarding_timestamp,
        r.delivery_timestamp,
        r.deletion_timestamp,
        r.ack_by_app_timestamp,
    ]
}

fn report_times_mut(r: &mut StatusReport) -> [&mut Option<BundleTimestamp>; 6] {
    [
        &mut r.receipt_timestamp,
        &mut r.custody_timestamp,
        &mut r.forwarding_timestamp,
        &mut r.delivery_timestamp,
        &mut r.deletion_timestamp,
        &mut r.ack_by_app_timestamp,
    ]
}

unsafe fn report_from_raw(raw: &BpsockStatusReport) -> StatusReport {
    let mut report = StatusReport::default();
    report.source = eid_from(raw.source);
    if raw.times_present & BPSOCK_REPORT_CREATION != 0 {
        report.creation_timestamp = Some(raw.creation.into());
    }
    report.fragment_offset = raw.fragment_offset;
    report.orig_length = raw.orig_length;
    report.reason = StatusReportReason::from_code(raw.reason).unwrap_or_default();
    report.flags = StatusReportFlags::decode(raw.flags);
    for (i, slot) in report_times_mut(&mut report).into_iter().enumerate() {
        if raw.times_present & (1 << i) != 0 {
            *slot = Some(raw.times[i].into());
        }
    }
    report
}

fn report_to_raw(report: &StatusReport, source: *const c_char) -> BpsockStatusReport {
    let mut raw = BpsockStatusReport {
        source,
        creation: report.creation_timestamp.map(Into::into).unwrap_or_default(),
        fragment_offset: report.fragment_offset,
        orig_length: report.orig_length,
        reason: report.reason.code(),
        flags: report.flags.encode(),
        times_present: 0,
        times: [BpsockTimestamp::default(); 6],
    };
    if report.creation_timestamp.is_some() {
        raw.times_present |= BPSOCK_REPORT_CREATION;
    }
    for (i, t) in report_times(report).into_iter().enumerate() {
        if let Some(t) = t {
            raw.times_present |= 1 << i;
            raw.times[i] = t.into();
        }
    }
    raw
}

/// Copy a host bundle into an owned [`Bundle`]. `None` when it is malformed.
unsafe fn bundle_from_raw(raw: &BpsockBundle) -> Option<Bundle> {
    let payload = if !raw.payload_path.is_null() {
        let path = PathBuf::from(CStr::from_ptr(raw.payload_path).to_str().ok()?);
        match PayloadLocation::from_value(raw.payload_location) {
            Some(PayloadLocation::TemporaryFile) => Payload::temporary_file(path).ok()?,
            _ => Payload::file(path).ok()?,
        }
    } else if raw.payload.is_null() {
        Payload::Memory(Vec::new())
    } else {
        Payload::memory(slice::from_raw_parts(raw.payload, raw.payload_len))
    };
    let mut bundle = Bundle::default();
    bundle.source = eid_from(raw.source);
    bundle.destination = eid_from(raw.destination);
    bundle.reply_to = eid_from(raw.reply_to);
    bundle.priority = Priority::from_raw(raw.priority, raw.ordinal).ok()?;
    bundle.delivery_options = DeliveryOptions::decode(raw.delivery_options);
    bundle.expiration = raw.expiration;
    bundle.delivery_reg_id = raw.delivery_reg_id;
    bundle.critical = raw.critical != 0;
    bundle.unreliable = raw.unreliable != 0;
    bundle.flow_label = raw.flow_label;
    bundle.creation_timestamp = BundleTimestamp::new(raw.creation_seconds, raw.creation_sequence);
    bundle.fragment_offset = raw.fragment_offset;
    bundle.orig_length = raw.orig_length;
    bundle.blocks = raw_slice(raw.blocks, raw.blocks_len)
        .iter()
        .map(|b| ExtensionBlock {
            block_type: b.block_type,
            flags: b.flags,
            data: block_data(b),
        })
        .collect();
    bundle.metadata = raw_slice(raw.metadata, raw.metadata_len)
        .iter()
        .map(|b| MetadataBlock {
            metadata_type: b.block_type,
            flags: b.flags,
            data: block_data(b),
        })
        .collect();
    if !raw.status_report.is_null() {
        bundle.set_status_report(Some(report_from_raw(&*raw.status_report)));
    }
    bundle.payload = Some(payload);
    Some(bundle)
}

fn c_string(s: &str) -> Result<CString, StatusCode> {
    CString::new(s).map_err(|_| StatusCode::DtnParameters)
}

/// Lend `bundle` to the host as a [`BpsockBundle`] for the duration of `f`.
fn with_raw_bundle<R>(bundle: &Bundle, f: impl FnOnce(&BpsockBundle) -> R) -> Result<R, StatusCode> {
    let eid = |e: &Option<EndpointId>| e.as_ref().map(|e| c_string(&e.to_string())).transpose();
    let source = eid(&bundle.source)?;
    let destination = eid(&bundle.destination)?;
    let reply_to = eid(&bundle.reply_to)?;
    let payload = bundle.payload.as_ref().ok_or(StatusCode::NullPointer)?;
    let path = payload
        .path()
        .map(|p| p.to_str().ok_or(StatusCode::Send).and_then(c_string))
        .transpose()?;
    let data: &[u8] = match payload {
        Payload::Memory(bytes) => bytes,
        _ => &[],
    };
    let as_ptr = |s: &Option<CString>| s.as_ref().map_or(std::ptr::null(), |s| s.as_ptr());
    let blocks: Vec<BpsockBlock> = bundle
        .blocks
        .iter()
        .map(|b| raw_block(b.block_type, b.flags, &b.data))
        .collect();
    let metadata: Vec<BpsockBlock> = bundle
        .metadata
        .iter()
        .map(|m| raw_block(m.metadata_type, m.flags, &m.data))
        .collect();
    let report_source = bundle
        .status_report()
        .map(|r| eid(&r.source))
        .transpose()?
        .flatten();
    let report = bundle
        .status_report()
        .map(|r| report_to_raw(r, as_ptr(&report_source)));
    let raw = BpsockBundle {
        source: as_ptr(&source),
        destination: as_ptr(&destination),
        reply_to: as_ptr(&reply_to),
        priority: bundle.priority.cardinal().value(),
        ordinal: bundle.priority.ordinal(),
        delivery_options: bundle.delivery_options.encode(),
        expiration: bundle.expiration,
        delivery_reg_id: bundle.delivery_reg_id,
        critical: u8::from(bundle.critical),
        unreliable: u8::from(bundle.unreliable),
        flow_label: bundle.flow_label,
        creation_seconds: bundle.creation_timestamp.seconds,
        creation_sequence: bundle.creation_timestamp.sequence,
        fragment_offset: bundle.fragment_offset,
        orig_length: bundle.orig_length,
        payload_location: payload.location().value(),
        payload: if data.is_empty() { std::ptr::null() } else { data.as_ptr() },
        payload_len: data.len(),
        payload_path: as_ptr(&path),
        blocks: if blocks.is_empty() { std::ptr::null() } else { blocks.as_ptr() },
        blocks_len: blocks.len(),
        metadata: if metadata.is_empty() { std::ptr::null() } else { metadata.as_ptr() },
        metadata_len: metadata.len(),
        status_report: report
            .as_ref()
            .map_or(std::ptr::null(), |r| r as *const BpsockStatusReport),
    };
    Ok(f(&raw))
}

impl NativeEngine {
    pub fn new(ops: BpsockEngineOps, status: StatusCell) -> Self {
        Self { ops, status }
    }

    pub fn status_cell(&self) -> StatusCell {
        self.status.clone()
    }

    /// Take ownership of a host-filled bundle and release the host's copy.
    fn adopt(&self, raw: &mut BpsockBundle) -> Option<Bundle> {
        let bundle = unsafe { bundle_from_raw(raw) };
        (self.ops.release)(self.ops.ctx, raw);
        bundle
    }
}

impl Engine for NativeEngine {
    fn register(&self, dtn_demux: &str, ipn_demux: i32) -> Result<RegistrationToken, StatusCode> {
        if !self.status.is_started() {
            return Err(StatusCode::Init);
        }
        let demux = c_string(dtn_demux)?;
        let mut token: i64 = 0;
        StatusCode::check((self.ops.register)(self.ops.ctx, demux.as_ptr(), ipn_demux, &mut token))?;
        Ok(token)
    }

    fn unregister(&self, token: RegistrationToken) -> Result<(), StatusCode> {
        StatusCode::check((self.ops.unregister)(self.ops.ctx, token))
    }

    fn send(&self, token: RegistrationToken, bundle: &Bundle) -> Result<(), StatusCode> {
        let code = with_raw_bundle(bundle, |raw| (self.ops.send)(self.ops.ctx, token, raw))?;
        StatusCode::check(code)
    }

    fn receive(
        &self,
        token: RegistrationToken,
        location: PayloadLocation,
        timeout: Duration,
    ) -> Result<Bundle, StatusCode> {
        let mut raw = BpsockBundle::empty();
        let code = (self.ops.receive)(
            self.ops.ctx,
            token,
            location.value(),
            whole_secs(timeout),
            &mut raw,
        );
        StatusCode::check(code)?;
        self.adopt(&mut raw).ok_or(StatusCode::Receive)
    }

    fn local_eid(&self, token: RegistrationToken) -> Option<String> {
        let mut buf = [0u8; 256];
        let n = (self.ops.local_eid)(self.ops.ctx, token, buf.as_mut_ptr() as *mut c_char, buf.len());
        let n = usize::try_from(n).ok()?.min(buf.len());
        String::from_utf8(buf[..n].to_vec()).ok()
    }

    fn wait_for_bundle(
        &self,
        token: RegistrationToken,
        size_threshold: usize,
        scratch: &Path,
        wait: Duration,
    ) -> Option<Bundle> {
        let path = scratch.to_str().and_then(|s| c_string(s).ok())?;
        let mut raw = BpsockBundle::empty();
        let code = (self.ops.wait_for_bundle)(
            self.ops.ctx,
            token,
            size_threshold,
            path.as_ptr(),
            whole_secs(wait),
            &mut raw,
        );
        if code != 0 {
            return None;
        }
        let bundle = self.adopt(&mut raw);
        if bundle.is_none() {
            warn!(token, "engine returned a malformed bundle");
        }
        bundle
    }
}

/// Negative code for C callers.
fn error_code(e: &DtnError) -> c_int {
    match e {
        DtnError::InvalidArgument(_) | DtnError::IllegalState(_) => BPSOCK_ERR_INVALID,
        DtnError::Io(_) => BPSOCK_ERR_IO,
        other => match other.status_code() {
            Some(code) => -code.raw().abs(),
            None => BPSOCK_ERR_INVALID,
        },
    }
}

/// Returns the ABI version. Used so the staticlib exports a C symbol and is linkable.
#[no_mangle]
pub extern "C" fn bpsock_version() -> u32 {
    BPSOCK_ABI_VERSION
}

/// Create an engine handle over the host's function table (copied). Starts STOPPED.
/// Returns null if `ops` is null.
#[no_mangle]
pub extern "C" fn bpsock_engine_create(ops: *const BpsockEngineOps) -> *mut c_void {
    if ops.is_null() {
        return std::ptr::null_mut();
    }
    let ops = unsafe { *ops };
    let engine = Arc::new(NativeEngine::new(ops, StatusCell::default()));
    Box::into_raw(Box::new(engine)) as *mut c_void
}

/// Publish the engine lifecycle status (0 stopped, 1 starting, 2 started, 3 stopping).
/// Returns 0 on success, -1 on a null handle or unknown status.
#[no_mangle]
pub extern "C" fn bpsock_engine_set_status(h: *mut c_void, status: c_int) -> c_int {
    if h.is_null() {
        return -1;
    }
    let engine = unsafe { &*(h as *const Arc<NativeEngine>) };
    match u8::try_from(status).ok().and_then(EngineStatus::from_value) {
        Some(s) => {
            engine.status.set(s);
            0
        }
        None => -1,
    }
}

/// Destroy an engine handle. Sockets created from it keep the engine alive. No-op if h is null.
#[no_mangle]
pub extern "C" fn bpsock_engine_destroy(h: *mut c_void) {
    if h.is_null() {
        return;
    }
    let _ = unsafe { Box::from_raw(h as *mut Arc<NativeEngine>) };
}

/// Register a socket. `dtn_demux` may be null. Returns a socket handle, or null with the error
/// code stored in `out_err` (when non-null).
#[no_mangle]
pub extern "C" fn bpsock_socket_register(
    engine_h: *mut c_void,
    dtn_demux: *const c_char,
    ipn_demux: c_int,
    out_err: *mut c_int,
) -> *mut c_void {
    let fail = |code: c_int| {
        if !out_err.is_null() {
            unsafe { *out_err = code };
        }
        std::ptr::null_mut()
    };
    if engine_h.is_null() {
        return fail(-1);
    }
    let engine = unsafe { &*(engine_h as *const Arc<NativeEngine>) };
    let demux = if dtn_demux.is_null() {
        ""
    } else {
        match unsafe { CStr::from_ptr(dtn_demux) }.to_str() {
            Ok(s) => s,
            Err(_) => return fail(BPSOCK_ERR_INVALID),
        }
    };
    let engine: Arc<dyn Engine> = engine.clone();
    match BundleSocket::register(engine, demux, ipn_demux) {
        Ok(socket) => {
            if !out_err.is_null() {
                unsafe { *out_err = 0 };
            }
            Box::into_raw(Box::new(socket)) as *mut c_void
        }
        Err(e) => fail(error_code(&e)),
    }
}

/// Unregister a socket. Returns 0 on success or a negative error code.
#[no_mangle]
pub extern "C" fn bpsock_socket_unregister(h: *mut c_void) -> c_int {
    if h.is_null() {
        return -1;
    }
    let socket = unsafe { &*(h as *const BundleSocket) };
    match socket.unregister() {
        Ok(()) => 0,
        Err(e) => error_code(&e),
    }
}

/// Free a socket handle, unregistering it if still registered. No-op if h is null.
#[no_mangle]
pub extern "C" fn bpsock_socket_free(h: *mut c_void) {
    if h.is_null() {
        return;
    }
    let _ = unsafe { Box::from_raw(h as *mut BundleSocket) };
}

/// Write the local endpoint id (NUL-terminated) into out_buf. Returns its length without the
/// NUL, or a negative value on error.
#[no_mangle]
pub extern "C" fn bpsock_socket_local_eid(h: *mut c_void, out_buf: *mut c_char, out_len: usize) -> c_int {
    if h.is_null() || out_buf.is_null() {
        return -1;
    }
    let socket = unsafe { &*(h as *const BundleSocket) };
    let eid = match socket.local_eid() {
        Some(e) => e.to_string(),
        None => return error_code(&DtnError::LocalEid),
    };
    if eid.len() + 1 > out_len {
        return BPSOCK_ERR_BUFFER;
    }
    unsafe {
        out_buf.copy_from_nonoverlapping(eid.as_ptr() as *const c_char, eid.len());
        *out_buf.add(eid.len()) = 0;
    }
    eid.len() as c_int
}

/// Send `len` bytes to `destination` with bulk priority. Returns 0 or a negative error code.
#[no_mangle]
pub extern "C" fn bpsock_socket_send_bytes(
    h: *mut c_void,
    destination: *const c_char,
    expiration_secs: i64,
    data: *const u8,
    len: usize,
) -> c_int {
    if h.is_null() || destination.is_null() || (data.is_null() && len > 0) {
        return -1;
    }
    let socket = unsafe { &*(h as *const BundleSocket) };
    let dest = match unsafe { CStr::from_ptr(destination) }
        .to_str()
        .ok()
        .and_then(EndpointId::parse)
    {
        Some(d) => d,
        None => return BPSOCK_ERR_INVALID,
    };
    let bytes = if len == 0 {
        &[][..]
    } else {
        unsafe { slice::from_raw_parts(data, len) }
    };
    let mut bundle = Bundle::new(dest)
        .with_data(bytes)
        .with_expiration(expiration_secs);
    match socket.send(&mut bundle) {
        Ok(()) => 0,
        Err(e) => error_code(&e),
    }
}

/// Receive one bundle's payload into out_buf. A negative timeout waits indefinitely.
/// Returns bytes written or a negative error code; the bundle is dropped if out_buf is too small.
#[no_mangle]
pub extern "C" fn bpsock_socket_receive_bytes(
    h: *mut c_void,
    timeout_secs: c_int,
    out_buf: *mut u8,
    out_len: usize,
) -> c_int {
    if h.is_null() || out_buf.is_null() {
        return -1;
    }
    let socket = unsafe { &*(h as *const BundleSocket) };
    let timeout = u64::try_from(timeout_secs).ok().map(Duration::from_secs);
    let bundle = match socket.receive_with(Some(PayloadLocation::Memory), timeout) {
        Ok(b) => b,
        Err(e) => return error_code(&e),
    };
    let data = match bundle.data() {
        Some(Ok(d)) => d,
        Some(Err(e)) => return error_code(&DtnError::Io(e)),
        None => &[],
    };
    if data.len() > out_len || data.len() > c_int::MAX as usize {
        return BPSOCK_ERR_BUFFER;
    }
    unsafe {
        out_buf.copy_from_nonoverlapping(data.as_ptr(), data.len());
    }
    data.len() as c_int
}
