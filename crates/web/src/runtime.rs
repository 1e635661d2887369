//! The runtime's side of the bridge: its scheduler and its original driver

use std::any::Any;
use std::rc::Rc;

use bytes::Bytes;
use fsbridge_vfs::{
    Continuation, ExecutionContext, FileRecord, MountDomain, OpenRequest, Payload, Spawner,
    StatReply, StorageDriver, SuspendReason,
};
use futures::future::LocalBoxFuture;
use tracing::warn;
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;

#[wasm_bindgen]
extern "C" {
    /// Scheduler hooks supplied by the runtime's JS shim
    pub type RuntimeScheduler;

    #[wasm_bindgen(method)]
    fn suspend(this: &RuntimeScheduler, code: u32);

    #[wasm_bindgen(method)]
    fn ready(this: &RuntimeScheduler);

    #[wasm_bindgen(method, js_name = scheduleResume)]
    fn schedule_resume(this: &RuntimeScheduler);

    /// The runtime's storage driver before patching, with its mount object
    /// already bound by the shim
    pub type OriginalDriver;

    #[wasm_bindgen(method, js_name = statAsync)]
    fn stat_async(this: &OriginalDriver, path: &str, callback: &JsValue);

    #[wasm_bindgen(method, js_name = listAsync)]
    fn list_async(this: &OriginalDriver, path: &str, callback: &JsValue);

    #[wasm_bindgen(method, js_name = makeFileData)]
    fn make_file_data(
        this: &OriginalDriver,
        path: &str,
        mode: &str,
        uid: u32,
        gid: u32,
        mount: &JsValue,
        callback: &JsValue,
    );

    #[wasm_bindgen(method, js_name = readAsync)]
    fn read_async(this: &OriginalDriver, data: &JsValue, offset: f64, len: f64, callback: &JsValue);

    #[wasm_bindgen(method, js_name = writeAsync)]
    fn write_async(
        this: &OriginalDriver,
        data: &JsValue,
        offset: f64,
        bytes: &js_sys::Uint8Array,
        callback: &JsValue,
    );

    #[wasm_bindgen(method)]
    fn close(this: &OriginalDriver, data: &JsValue, callback: &JsValue);
}

pub struct JsExecutionContext {
    scheduler: RuntimeScheduler,
}

impl JsExecutionContext {
    pub const fn new(scheduler: RuntimeScheduler) -> Self {
        Self { scheduler }
    }
}

impl ExecutionContext for JsExecutionContext {
    fn suspend(&self, reason: SuspendReason) {
        self.scheduler.suspend(reason.code());
    }

    fn ready(&self) {
        self.scheduler.ready();
    }

    fn schedule_resume(&self) {
        self.scheduler.schedule_resume();
    }
}

/// Runs bridge futures on the browser microtask queue
#[derive(Debug, Default, Clone, Copy)]
pub struct WasmSpawner;

impl Spawner for WasmSpawner {
    fn spawn(&self, future: LocalBoxFuture<'static, ()>) {
        wasm_bindgen_futures::spawn_local(future);
    }
}

fn number(object: &JsValue, key: &str) -> f64 {
    js_sys::Reflect::get(object, &key.into())
        .ok()
        .and_then(|v| v.as_f64())
        .unwrap_or(0.0)
}

/// Read a stat object filled in by the original driver
pub fn stat_from_js(value: &JsValue) -> StatReply {
    if value.is_null() || value.is_undefined() {
        return StatReply::default();
    }
    StatReply {
        inode_id: number(value, "inodeId") as u64,
        uid: number(value, "uid") as u32,
        gid: number(value, "gid") as u32,
        perm_type: number(value, "permType") as u32,
        file_length: number(value, "fileLength") as u64,
        last_modified: number(value, "lastModified") as i64,
    }
}

/// The original driver's JS object held by a record
pub fn foreign_data(record: &FileRecord) -> JsValue {
    match &record.payload {
        Payload::Foreign(any) => any
            .downcast_ref::<JsValue>()
            .cloned()
            .unwrap_or(JsValue::NULL),
        _ => JsValue::NULL,
    }
}

/// Wrap a file-data object produced by the original driver
fn foreign_record(path: &str, value: JsValue) -> Option<FileRecord> {
    if value.is_null() || value.is_undefined() {
        return None;
    }
    let perm_type = number(&value, "permType") as u32;
    let record = if perm_type & fsbridge_vfs::record::S_IFDIR != 0 {
        FileRecord::directory(MountDomain::Default, path)
    } else {
        FileRecord::file(
            MountDomain::Default,
            path,
            number(&value, "length") as u64,
            number(&value, "lastModified") as i64,
        )
    };
    let payload: Rc<dyn Any> = Rc::new(value);
    Some(record.with_payload(Payload::Foreign(payload)))
}

/// [`StorageDriver`] over the runtime's original JS driver
pub struct JsStorageDriver {
    driver: OriginalDriver,
}

impl JsStorageDriver {
    pub const fn new(driver: OriginalDriver) -> Self {
        Self { driver }
    }
}

impl StorageDriver for JsStorageDriver {
    fn stat_async(&self, path: &str, reply: Continuation<StatReply>) {
        let callback = Closure::once_into_js(move |value: JsValue| reply.resume(stat_from_js(&value)));
        self.driver.stat_async(path, &callback);
    }

    fn list_async(&self, path: &str, reply: Continuation<Vec<String>>) {
        let callback = Closure::once_into_js(move |value: JsValue| {
            let names = value
                .dyn_into::<js_sys::Array>()
                .map(|a| a.iter().filter_map(|v| v.as_string()).collect())
                .unwrap_or_default();
            reply.resume(names);
        });
        self.driver.list_async(path, &callback);
    }

    fn make_file_data(&self, request: OpenRequest, reply: Continuation<Option<FileRecord>>) {
        let mount = request
            .mount
            .as_ref()
            .and_then(|m| m.downcast_ref::<JsValue>().cloned())
            .unwrap_or(JsValue::UNDEFINED);
        let path = request.path.clone();
        let callback = Closure::once_into_js(move |value: JsValue| {
            let record = foreign_record(&path, value).map(|r| r.owned_by(request.uid, request.gid));
            reply.resume(record);
        });
        self.driver.make_file_data(
            &request.path,
            &request.mode,
            request.uid,
            request.gid,
            &mount,
            &callback,
        );
    }

    fn close(&self, record: &FileRecord, reply: Continuation<()>) {
        let callback = Closure::once_into_js(move || reply.resume(()));
        self.driver.close(&foreign_data(record), &callback);
    }

    fn read_async(&self, record: &FileRecord, offset: u64, len: u64, reply: Continuation<Bytes>) {
        let callback = Closure::once_into_js(move |value: JsValue| {
            let data = value
                .dyn_into::<js_sys::Uint8Array>()
                .map(|a| Bytes::from(a.to_vec()))
                .unwrap_or_default();
            reply.resume(data);
        });
        self.driver
            .read_async(&foreign_data(record), offset as f64, len as f64, &callback);
    }

    fn write_async(&self, record: &FileRecord, offset: u64, data: Bytes, reply: Continuation<usize>) {
        let bytes = js_sys::Uint8Array::from(&data[..]);
        let callback = Closure::once_into_js(move |value: JsValue| {
            let written = value.as_f64().unwrap_or_else(|| {
                warn!("original driver reported no byte count");
                0.0
            });
            reply.resume(written as usize);
        });
        self.driver
            .write_async(&foreign_data(record), offset as f64, &bytes, &callback);
    }
}
