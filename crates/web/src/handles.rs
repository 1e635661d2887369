//! File System Access handles and dropped `File` blobs behind the bridge's
//! handle traits

use std::rc::Rc;

use async_trait::async_trait;
use bytes::Bytes;
use fsbridge_vfs::{
    BlobSource, BridgeError, DirEntry, DirectoryHandle, DirectoryPicker, FileHandle, FileMetadata,
    Result,
};
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;
use wasm_bindgen_futures::JsFuture;
use web_sys::{
    DomException, FileSystemDirectoryHandle, FileSystemFileHandle, FileSystemGetDirectoryOptions,
    FileSystemGetFileOptions, FileSystemHandle, FileSystemHandleKind, FileSystemWritableFileStream,
};

/// Map a rejected promise to a bridge error
pub fn js_error(value: &JsValue, subject: &str) -> BridgeError {
    if let Some(exception) = value.dyn_ref::<DomException>() {
        return dom_error(&exception.name(), &exception.message(), subject);
    }
    if value.is_instance_of::<js_sys::TypeError>() {
        return BridgeError::InvalidPath(subject.to_string());
    }
    BridgeError::transport(
        value
            .as_string()
            .unwrap_or_else(|| format!("{subject}: {value:?}")),
    )
}

/// Map a `DOMException` by name
fn dom_error(name: &str, message: &str, subject: &str) -> BridgeError {
    match name {
        "NotFoundError" => BridgeError::not_found(subject),
        "TypeMismatchError" => BridgeError::NotADirectory(subject.to_string()),
        "NotAllowedError" | "SecurityError" => BridgeError::PermissionDenied(subject.to_string()),
        "AbortError" => BridgeError::Cancelled,
        "TypeError" => BridgeError::InvalidPath(subject.to_string()),
        name => BridgeError::transport(format!("{name}: {message}")),
    }
}

async fn settle(promise: js_sys::Promise, subject: &str) -> Result<JsValue> {
    JsFuture::from(promise).await.map_err(|e| js_error(&e, subject))
}

fn cast<T: JsCast>(value: JsValue, subject: &str) -> Result<T> {
    value
        .dyn_into::<T>()
        .map_err(|_| BridgeError::transport(format!("{subject}: unexpected handle type")))
}

fn millis_to_seconds(ms: f64) -> i64 {
    (ms / 1000.0).floor() as i64
}

async fn array_buffer(promise: js_sys::Promise, subject: &str) -> Result<Bytes> {
    let buffer = settle(promise, subject).await?;
    Ok(Bytes::from(js_sys::Uint8Array::new(&buffer).to_vec()))
}

#[wasm_bindgen(inline_js = "
    export async function directory_entries(dirHandle) {
        const entries = [];
        for await (const entry of dirHandle.values()) {
            entries.push(entry);
        }
        return entries;
    }
")]
extern "C" {
    fn directory_entries(dir: &FileSystemDirectoryHandle) -> js_sys::Promise;
}

/// A granted `FileSystemDirectoryHandle`
pub struct JsDirectoryHandle {
    name: String,
    handle: FileSystemDirectoryHandle,
}

impl JsDirectoryHandle {
    pub fn new(handle: FileSystemDirectoryHandle) -> Rc<Self> {
        Rc::new(Self {
            name: handle.name(),
            handle,
        })
    }
}

#[async_trait(?Send)]
impl DirectoryHandle for JsDirectoryHandle {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get_directory(&self, name: &str, create: bool) -> Result<Rc<dyn DirectoryHandle>> {
        let options = FileSystemGetDirectoryOptions::new();
        options.set_create(create);
        let promise = self.handle.get_directory_handle_with_options(name, &options);
        let value = settle(promise, name).await?;
        Ok(Self::new(cast(value, name)?))
    }

    async fn get_file(&self, name: &str, create: bool) -> Result<Rc<dyn FileHandle>> {
        let options = FileSystemGetFileOptions::new();
        options.set_create(create);
        let promise = self.handle.get_file_handle_with_options(name, &options);
        let value = settle(promise, name).await?;
        Ok(JsFileHandle::new(cast(value, name)?))
    }

    async fn entries(&self) -> Result<Vec<DirEntry>> {
        let value = settle(directory_entries(&self.handle), &self.name).await?;
        let array: js_sys::Array = cast(value, &self.name)?;
        let mut entries = Vec::with_capacity(array.length() as usize);
        for item in array.iter() {
            let handle: FileSystemHandle = cast(item, &self.name)?;
            entries.push(match handle.kind() {
                FileSystemHandleKind::Directory => DirEntry::dir(handle.name()),
                _ => DirEntry::file(handle.name()),
            });
        }
        Ok(entries)
    }
}

pub struct JsFileHandle {
    name: String,
    handle: FileSystemFileHandle,
}

impl JsFileHandle {
    pub fn new(handle: FileSystemFileHandle) -> Rc<Self> {
        Rc::new(Self {
            name: handle.name(),
            handle,
        })
    }

    async fn file(&self) -> Result<web_sys::File> {
        let value = settle(self.handle.get_file(), &self.name).await?;
        cast(value, &self.name)
    }
}

#[async_trait(?Send)]
impl FileHandle for JsFileHandle {
    fn name(&self) -> &str {
        &self.name
    }

    async fn metadata(&self) -> Result<FileMetadata> {
        let file = self.file().await?;
        Ok(FileMetadata {
            size: file.size() as u64,
            last_modified: millis_to_seconds(file.last_modified()),
        })
    }

    async fn read_all(&self) -> Result<Bytes> {
        let file = self.file().await?;
        array_buffer(file.array_buffer(), &self.name).await
    }

    async fn write_all(&self, data: Bytes) -> Result<()> {
        let value = settle(self.handle.create_writable(), &self.name).await?;
        let writable: FileSystemWritableFileStream = cast(value, &self.name)?;
        let array = js_sys::Uint8Array::from(&data[..]);
        let write = writable
            .write_with_buffer_source(&array)
            .map_err(|e| js_error(&e, &self.name))?;
        settle(write, &self.name).await?;
        settle(writable.close(), &self.name).await?;
        Ok(())
    }
}

/// A dropped `File`, sliced lazily
pub struct JsBlob {
    name: String,
    file: web_sys::File,
}

impl JsBlob {
    pub fn new(file: web_sys::File) -> Rc<Self> {
        Rc::new(Self {
            name: file.name(),
            file,
        })
    }
}

#[async_trait(?Send)]
impl BlobSource for JsBlob {
    fn name(&self) -> &str {
        &self.name
    }

    fn size(&self) -> u64 {
        self.file.size() as u64
    }

    fn last_modified(&self) -> i64 {
        millis_to_seconds(self.file.last_modified())
    }

    async fn slice(&self, start: u64, end: u64) -> Result<Bytes> {
        let blob = self
            .file
            .slice_with_f64_and_f64(start as f64, end as f64)
            .map_err(|e| js_error(&e, &self.name))?;
        array_buffer(blob.array_buffer(), &self.name).await
    }
}

/// `window.showDirectoryPicker({ mode: "readwrite" })`
#[derive(Debug, Default, Clone, Copy)]
pub struct WindowPicker;

#[async_trait(?Send)]
impl DirectoryPicker for WindowPicker {
    async fn pick(&self) -> Result<Rc<dyn DirectoryHandle>> {
        let window = web_sys::window().ok_or_else(|| BridgeError::transport("no window"))?;
        let show = js_sys::Reflect::get(&window, &"showDirectoryPicker".into())
            .ok()
            .and_then(|f| f.dyn_into::<js_sys::Function>().ok())
            .ok_or(BridgeError::Unsupported {
                op: "showDirectoryPicker",
                domain: fsbridge_vfs::MountDomain::Native,
            })?;

        let options = js_sys::Object::new();
        js_sys::Reflect::set(&options, &"mode".into(), &"readwrite".into())
            .map_err(|e| js_error(&e, "picker"))?;
        let promise = show
            .call1(&window, &options)
            .map_err(|e| js_error(&e, "picker"))?;
        let value = settle(cast(promise, "picker")?, "picker").await?;
        Ok(JsDirectoryHandle::new(cast(value, "picker")?))
    }
}
