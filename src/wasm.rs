use wasm_bindgen::prelude::*;

#[wasm_bindgen]
pub fn generate_source(canvas_json: &str) -> Result<String, JsValue> {
    crate::generate_source_from_json(canvas_json).map_err(|e| JsValue::from_str(&e.to_string()))
}

#[wasm_bindgen]
pub fn source_digest(canvas_json: &str) -> Result<String, JsValue> {
    crate::generate_source_from_json(canvas_json)
        .map(|source| crate::codegen::source_digest(&source))
        .map_err(|e| JsValue::from_str(&e.to_string()))
}
