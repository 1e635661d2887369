//! Browser glue for fsbridge
//!
//! Exposes [`shim::BridgeHandle`] to the runtime's JS shim, which calls it in
//! place of the original storage driver.

pub mod handles;
pub mod logging;
pub mod runtime;
pub mod shim;

pub use shim::{BridgeHandle, FileData};

use wasm_bindgen::prelude::*;

#[wasm_bindgen(start)]
pub fn main_js() {
    console_error_panic_hook::set_once();
    logging::init();
}
