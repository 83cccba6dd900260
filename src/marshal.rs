//! Value marshalling across the script/native boundary
//!
//! Values cross as JSON. Functions, symbols and anything nested deeper than
//! the policy's depth limit become `null`; error objects cross as their
//! `"Name: message"` text.

use rquickjs::{Array, Ctx, Exception, IntoJs, Object, Value};
use serde_json::{Map, Value as JsonValue};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::error::describe_value;

pub const DEFAULT_MAX_DEPTH: usize = 64;

/// Shared conversion policy
///
/// Cloned into every capability at install time; the engine can still adjust
/// the depth afterwards and every clone observes the change.
#[derive(Debug, Clone)]
pub struct MarshalPolicy {
    max_depth: Arc<AtomicUsize>,
}

impl Default for MarshalPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_DEPTH)
    }
}

impl MarshalPolicy {
    pub fn new(max_depth: usize) -> Self {
        Self {
            max_depth: Arc::new(AtomicUsize::new(max_depth)),
        }
    }

    pub fn max_depth(&self) -> usize {
        self.max_depth.load(Ordering::Relaxed)
    }

    pub fn set_max_depth(&self, depth: usize) {
        self.max_depth.store(depth, Ordering::Relaxed);
    }

    /// Convert a script value to JSON
    pub fn to_json<'js>(&self, value: &Value<'js>) -> rquickjs::Result<JsonValue> {
        js_to_json(value, 0, self.max_depth())
    }

    /// Convert JSON to a script value
    pub fn to_js<'js>(&self, ctx: &Ctx<'js>, value: &JsonValue) -> rquickjs::Result<Value<'js>> {
        json_to_js(ctx, value)
    }
}

fn js_to_json<'js>(value: &Value<'js>, depth: usize, max_depth: usize) -> rquickjs::Result<JsonValue> {
    if value.is_null() || value.is_undefined() {
        return Ok(JsonValue::Null);
    }
    if let Some(b) = value.as_bool() {
        return Ok(JsonValue::Bool(b));
    }
    if let Some(i) = value.as_int() {
        return Ok(JsonValue::from(i));
    }
    if let Some(f) = value.as_float() {
        // NaN and infinities have no JSON form
        return Ok(serde_json::Number::from_f64(f)
            .map(JsonValue::Number)
            .unwrap_or(JsonValue::Null));
    }
    if let Some(s) = value.as_string() {
        return Ok(JsonValue::String(s.to_string()?));
    }
    if value.is_function() || depth >= max_depth {
        return Ok(JsonValue::Null);
    }
    if let Some(arr) = value.as_array() {
        let mut items = Vec::with_capacity(arr.len());
        for item in arr.iter::<Value>() {
            items.push(js_to_json(&item?, depth + 1, max_depth)?);
        }
        return Ok(JsonValue::Array(items));
    }
    if let Some(obj) = value.as_object() {
        if Exception::from_object(obj.clone()).is_some() {
            return Ok(JsonValue::String(describe_value(value.ctx(), value.clone()).message));
        }
        let mut map = Map::new();
        for prop in obj.props::<String, Value>() {
            let (key, item) = prop?;
            map.insert(key, js_to_json(&item, depth + 1, max_depth)?);
        }
        return Ok(JsonValue::Object(map));
    }

    // Symbols, big integers and other exotic values
    Ok(JsonValue::Null)
}

fn json_to_js<'js>(ctx: &Ctx<'js>, value: &JsonValue) -> rquickjs::Result<Value<'js>> {
    match value {
        JsonValue::Null => Ok(Value::new_null(ctx.clone())),
        JsonValue::Bool(b) => Ok(Value::new_bool(ctx.clone(), *b)),
        JsonValue::Number(n) => match n.as_i64().and_then(|i| i32::try_from(i).ok()) {
            Some(i) => Ok(Value::new_int(ctx.clone(), i)),
            None => Ok(n
                .as_f64()
                .map(|f| Value::new_float(ctx.clone(), f))
                .unwrap_or_else(|| Value::new_null(ctx.clone()))),
        },
        JsonValue::String(s) => s.as_str().into_js(ctx),
        JsonValue::Array(items) => {
            let arr = Array::new(ctx.clone())?;
            for (i, item) in items.iter().enumerate() {
                arr.set(i, json_to_js(ctx, item)?)?;
            }
            Ok(arr.into_value())
        }
        JsonValue::Object(map) => {
            let obj = Object::new(ctx.clone())?;
            for (key, item) in map {
                obj.set(key.as_str(), json_to_js(ctx, item)?)?;
            }
            Ok(obj.into_value())
        }
    }
}
