//! Declared cost models for the built-in operators and conversions.
//!
//! Local operators are cheap to start and linear in rows; distributed ones
//! pay a scheduling overhead in `prepare` and scale better per row. User
//! specification files are merged over these.

use polyplan_estimator::{InMemorySpecSource, Result};

pub const DEFAULT_SPECS_YAML: &str = r#"
local.collection_source.prepare: { model: linear, fixed_ms: 0.01 }
local.collection_source.main:    { model: linear, per_row_ms: 0.0002, memory_bytes_per_row: 64 }
local.text_file_source.prepare:  { model: linear, fixed_ms: 0.2 }
local.text_file_source.main:     { model: linear, per_row_ms: 0.002, per_kb_ms: 0.01, memory_bytes_per_row: 96 }
local.filter.prepare:            { model: linear, fixed_ms: 0.02 }
local.filter.main:               { model: linear, per_row_ms: 0.002 }
local.map.prepare:               { model: linear, fixed_ms: 0.02 }
local.map.main:                  { model: linear, per_row_ms: 0.0015 }
local.project.prepare:           { model: linear, fixed_ms: 0.02 }
local.project.main:              { model: linear, per_row_ms: 0.001 }
local.union.prepare:             { model: linear, fixed_ms: 0.01 }
local.union.main:                { model: linear, per_row_ms: 0.0002 }
local.sink.prepare:              { model: linear, fixed_ms: 0.05 }
local.sink.main:                 { model: linear, per_row_ms: 0.003, per_kb_ms: 0.01 }

distributed.collection_source.prepare: { model: linear, fixed_ms: 4.0 }
distributed.collection_source.main:    { model: linear, per_row_ms: 0.0002, memory_bytes_per_row: 64 }
distributed.text_file_source.prepare:  { model: linear, fixed_ms: 5.0 }
distributed.text_file_source.main:     { model: linear, per_row_ms: 0.0005, per_kb_ms: 0.003, memory_bytes_per_row: 96 }
distributed.filter.prepare:            { model: linear, fixed_ms: 5.0 }
distributed.filter.main:               { model: linear, per_row_ms: 0.0005, network_ratio: 0.05 }
distributed.map.prepare:               { model: linear, fixed_ms: 5.0 }
distributed.map.main:                  { model: linear, per_row_ms: 0.0004, network_ratio: 0.05 }
distributed.project.prepare:           { model: linear, fixed_ms: 5.0 }
distributed.project.main:              { model: linear, per_row_ms: 0.0003, network_ratio: 0.05 }
distributed.filter_project.prepare:    { model: linear, fixed_ms: 5.0 }
distributed.filter_project.main:       { model: linear, per_row_ms: 0.0006, network_ratio: 0.05 }
distributed.union.prepare:             { model: linear, fixed_ms: 5.0 }
distributed.union.main:                { model: linear, per_row_ms: 0.0001 }
distributed.sink.prepare:              { model: linear, fixed_ms: 5.0 }
distributed.sink.main:                 { model: linear, per_row_ms: 0.001, per_kb_ms: 0.004 }

conversion.collect:     { model: linear, fixed_ms: 0.01, per_row_ms: 0.0005, memory_bytes_per_row: 64 }
conversion.stream:      { model: linear, fixed_ms: 0.01, per_row_ms: 0.0001 }
conversion.parallelize: { model: linear, fixed_ms: 1.0, per_row_ms: 0.001, network_ratio: 1.0 }
conversion.gather:      { model: linear, fixed_ms: 1.0, per_row_ms: 0.001, network_ratio: 1.0 }
"#;

/// The built-in specifications, validated.
pub fn default_specs() -> Result<InMemorySpecSource> {
    InMemorySpecSource::from_yaml_str(DEFAULT_SPECS_YAML)
}

#[cfg(test)]
mod tests {
    use super::*;
    use polyplan_core::channel::CONVERSIONS;
    use polyplan_core::platform::Platform;

    #[test]
    fn every_builtin_key_is_declared() {
        let specs = default_specs().unwrap();
        let keys: Vec<&str> = specs.keys().collect();
        for conv in &CONVERSIONS {
            assert!(keys.contains(&conv.spec_key), "{}", conv.spec_key);
        }
        for platform in Platform::ALL {
            for kind in platform.capabilities().operator_kinds {
                for phase in ["prepare", "main"] {
                    let key = platform.spec_key(kind.name(), phase);
                    assert!(keys.contains(&key.as_str()), "{key}");
                }
            }
        }
    }
}
