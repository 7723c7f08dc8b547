// SPDX-License-Identifier: MIT

//! Parameter addressing, coercion and resolution

mod address;
mod coercion;
mod resolver;

pub use address::{IoType, ValueId};
pub use coercion::{coerce, to_f64, to_i64, to_string, ParamType};
pub use resolver::{
    apply_result_mappings, extract_json_path, find_io_value, remap_outputs, resolve,
    resolve_ambient, resolve_mapping, source_id,
};
