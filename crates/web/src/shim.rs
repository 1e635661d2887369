//! `BridgeHandle`: what the runtime's JS shim installs in place of its driver

use std::any::Any;
use std::rc::Rc;

use bytes::Bytes;
use fsbridge_vfs::{
    BlobSource, BlockingBridge, BridgeConfig, Continuation, DroppedEntry,
    FileRecord, FilesystemBridgeContext, OpenRequest, PatchedDriver, StatReply, StorageDriver,
};
use tracing::{debug, info};
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;
use wasm_bindgen_futures::future_to_promise;

use crate::handles::{JsBlob, WindowPicker};
use crate::runtime::{JsExecutionContext, JsStorageDriver, OriginalDriver, RuntimeScheduler, WasmSpawner};

fn to_js(err: impl std::fmt::Display) -> JsValue {
    js_sys::Error::new(&err.to_string()).into()
}

fn json_to_js(value: &impl serde::Serialize) -> Result<JsValue, JsValue> {
    let text = serde_json::to_string(value).map_err(to_js)?;
    js_sys::JSON::parse(&text)
}

fn call(callback: &js_sys::Function, value: &JsValue) {
    if let Err(e) = callback.call1(&JsValue::NULL, value) {
        tracing::error!(error = ?e, "driver callback threw");
    }
}

fn stat_to_js(stat: &StatReply) -> JsValue {
    json_to_js(stat).unwrap_or(JsValue::NULL)
}

/// A record handed to the runtime
#[wasm_bindgen]
pub struct FileData {
    record: FileRecord,
}

#[wasm_bindgen]
impl FileData {
    #[wasm_bindgen(getter)]
    pub fn path(&self) -> String {
        self.record.path.clone()
    }

    #[wasm_bindgen(getter)]
    pub fn length(&self) -> f64 {
        self.record.byte_length() as f64
    }

    #[wasm_bindgen(getter, js_name = inodeId)]
    pub fn inode_id(&self) -> f64 {
        self.record.inode_id as f64
    }

    #[wasm_bindgen(getter, js_name = permType)]
    pub fn perm_type(&self) -> u32 {
        self.record.to_stat_reply().perm_type
    }

    #[wasm_bindgen(getter, js_name = lastModified)]
    pub fn last_modified(&self) -> f64 {
        self.record.last_modified as f64
    }

    #[wasm_bindgen(getter)]
    pub fn uid(&self) -> u32 {
        self.record.uid
    }

    #[wasm_bindgen(getter)]
    pub fn gid(&self) -> u32 {
        self.record.gid
    }

    #[wasm_bindgen(getter)]
    pub fn mount(&self) -> String {
        self.record.origin.to_string()
    }

    #[wasm_bindgen(getter)]
    pub fn dirty(&self) -> bool {
        self.record.is_dirty()
    }
}

#[wasm_bindgen]
pub struct BridgeHandle {
    context: Rc<FilesystemBridgeContext>,
    driver: Rc<PatchedDriver>,
}

#[wasm_bindgen]
impl BridgeHandle {
    /// Patch `original`; `config` is an optional JSON `BridgeConfig`
    #[wasm_bindgen(constructor)]
    pub fn new(
        original: OriginalDriver,
        scheduler: RuntimeScheduler,
        config: Option<String>,
    ) -> Result<BridgeHandle, JsValue> {
        let config = match config {
            Some(json) => BridgeConfig::from_json_str(&json).map_err(|e| to_js(format!("{e:#}")))?,
            None => BridgeConfig::default(),
        };
        let context = Rc::new(FilesystemBridgeContext::with_http(config).map_err(to_js)?);
        let bridge = BlockingBridge::new(
            Rc::new(JsExecutionContext::new(scheduler)),
            Rc::new(WasmSpawner),
        );
        let driver = PatchedDriver::new(Rc::new(JsStorageDriver::new(original)), context.clone(), bridge);
        info!("storage driver patched");
        Ok(Self {
            context,
            driver: Rc::new(driver),
        })
    }

    // ─────────────────────────────────────────────────────────────────────
    // Driver entry points
    // ─────────────────────────────────────────────────────────────────────

    #[wasm_bindgen(js_name = statAsync)]
    pub fn stat_async(&self, path: &str, callback: js_sys::Function) {
        let reply = Continuation::new("stat", move |stat: StatReply| call(&callback, &stat_to_js(&stat)));
        self.driver.stat_async(path, reply);
    }

    #[wasm_bindgen(js_name = listAsync)]
    pub fn list_async(&self, path: &str, callback: js_sys::Function) {
        let reply = Continuation::new("list", move |names: Vec<String>| {
            let array: js_sys::Array = names.iter().map(|n| JsValue::from_str(n)).collect();
            call(&callback, &array);
        });
        self.driver.list_async(path, reply);
    }

    /// Open or create; the callback receives a `FileData` or `null`
    #[wasm_bindgen(js_name = makeFileData)]
    pub fn make_file_data(
        &self,
        path: &str,
        mode: &str,
        uid: u32,
        gid: u32,
        mount: JsValue,
        callback: js_sys::Function,
    ) {
        let mut request = OpenRequest::new(path, mode).owned_by(uid, gid);
        if !mount.is_undefined() {
            let mount: Rc<dyn Any> = Rc::new(mount);
            request.mount = Some(mount);
        }
        let reply = Continuation::new("open", move |record: Option<FileRecord>| {
            let value = record.map_or(JsValue::NULL, |record| FileData { record }.into());
            call(&callback, &value);
        });
        self.driver.make_file_data(request, reply);
    }

    #[wasm_bindgen(js_name = readAsync)]
    pub fn read_async(&self, data: &FileData, offset: f64, len: f64, callback: js_sys::Function) {
        let reply = Continuation::new("read", move |bytes: Bytes| {
            call(&callback, &js_sys::Uint8Array::from(&bytes[..]));
        });
        self.driver
            .read_async(&data.record, offset as u64, len as u64, reply);
    }

    #[wasm_bindgen(js_name = writeAsync)]
    pub fn write_async(&self, data: &FileData, offset: f64, bytes: &[u8], callback: js_sys::Function) {
        let reply = Continuation::new("write", move |written: usize| {
            call(&callback, &JsValue::from_f64(written as f64));
        });
        self.driver
            .write_async(&data.record, offset as u64, Bytes::copy_from_slice(bytes), reply);
    }

    pub fn close(&self, data: &FileData, callback: js_sys::Function) {
        let reply = Continuation::new("close", move |()| call(&callback, &JsValue::UNDEFINED));
        self.driver.close(&data.record, reply);
    }

    // ─────────────────────────────────────────────────────────────────────
    // Mount management
    // ─────────────────────────────────────────────────────────────────────

    /// Ask the user for a directory and mount it; resolves to its name, or
    /// `null` when the dialog was dismissed
    #[wasm_bindgen(js_name = openFolder)]
    pub fn open_folder(&self) -> js_sys::Promise {
        let (reply, rx) = Continuation::channel("pick");
        self.driver.pick_directory(Rc::new(WindowPicker), reply);
        future_to_promise(async move {
            let name = rx.await.map_err(to_js)?;
            Ok(name.map_or(JsValue::NULL, JsValue::from))
        })
    }

    /// Mount a directory handle obtained elsewhere (e.g. a drop)
    #[wasm_bindgen(js_name = mountFolder)]
    pub fn mount_folder(&self, handle: web_sys::FileSystemDirectoryHandle) -> f64 {
        let generation = self
            .context
            .native()
            .mount_slot()
            .mount(crate::handles::JsDirectoryHandle::new(handle));
        generation as f64
    }

    #[wasm_bindgen(js_name = addFile)]
    pub fn add_file(&self, path: &str, file: web_sys::File) -> String {
        self.context.local().tree_mut().add_file(path, JsBlob::new(file))
    }

    /// Add every `File` in an array or `FileList` at the drop root
    #[wasm_bindgen(js_name = addFiles)]
    pub fn add_files(&self, files: JsValue) -> Result<usize, JsValue> {
        let array = js_sys::Array::from(&files);
        let mut blobs: Vec<Rc<dyn BlobSource>> = Vec::with_capacity(array.length() as usize);
        for item in array.iter() {
            blobs.push(JsBlob::new(item.dyn_into()?));
        }
        let added = self.context.local().tree_mut().add_files(blobs);
        debug!(added, "dropped files registered");
        Ok(added)
    }

    /// Add a dropped tree: each item is a `File` or `{ name, children }`
    #[wasm_bindgen(js_name = addTree)]
    pub fn add_tree(&self, base: &str, entries: js_sys::Array) -> Result<(), JsValue> {
        let entries = dropped_entries(&entries)?;
        self.context.local().tree_mut().add_tree(base, entries);
        Ok(())
    }

    #[wasm_bindgen(js_name = clearLocal)]
    pub fn clear_local(&self) {
        self.context.local().tree_mut().clear();
    }

    /// Mount `owner/repo[@branch]`; resolves to the branch used
    #[wasm_bindgen(js_name = mountRepo)]
    pub fn mount_repo(&self, spec: String) -> js_sys::Promise {
        let context = self.context.clone();
        future_to_promise(async move {
            let mount = context.remote().mount_spec(&spec).await.map_err(to_js)?;
            Ok(mount.branch.into())
        })
    }

    pub fn status(&self) -> Result<JsValue, JsValue> {
        json_to_js(&self.context.status())
    }

    /// Entries under `path`, optionally filtered by a `*`/`?` pattern
    pub fn catalog(&self, path: String, pattern: Option<String>) -> js_sys::Promise {
        let context = self.context.clone();
        future_to_promise(async move {
            let entries = context
                .catalog(&path, pattern.as_deref())
                .await
                .map_err(to_js)?;
            json_to_js(&entries)
        })
    }

    /// Mount a path routes to
    pub fn route(&self, path: &str) -> String {
        self.context.router().route(path).domain.to_string()
    }
}

fn dropped_entries(items: &js_sys::Array) -> Result<Vec<DroppedEntry>, JsValue> {
    let mut entries = Vec::with_capacity(items.length() as usize);
    for item in items.iter() {
        if let Some(file) = item.dyn_ref::<web_sys::File>() {
            entries.push(DroppedEntry::File(JsBlob::new(file.clone())));
            continue;
        }
        let name = js_sys::Reflect::get(&item, &"name".into())?
            .as_string()
            .ok_or_else(|| to_js("dropped directory without a name"))?;
        let children = js_sys::Reflect::get(&item, &"children".into())?;
        let children = dropped_entries(&js_sys::Array::from(&children))?;
        entries.push(DroppedEntry::Directory { name, children });
    }
    Ok(entries)
}
