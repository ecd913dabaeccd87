//! Layered YAML configuration loading and the policy block consumed by the
//! runtime evidence classifier (§4.6) and PR gate (§4.7).

pub mod policy;
pub mod secrets;

pub use policy::{GradingMode, PolicyBlock, SkillsMode};
pub use secrets::{resolve_secrets, ResolvedSecrets};

use anyhow::{Context, Result};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fs;
use std::path::Path;

/// Load + merge YAML files in order, then canonicalize to JSON and hash.
/// Later files override earlier files via deep-merge.
pub fn load_layered_yaml(paths: &[impl AsRef<Path>]) -> Result<LoadedConfig> {
    let mut merged = Value::Object(Default::default());

    for p in paths {
        let p = p.as_ref();
        let s = fs::read_to_string(p).with_context(|| format!("read config: {p:?}"))?;
        let yaml_val: serde_yaml::Value =
            serde_yaml::from_str(&s).with_context(|| format!("parse yaml: {p:?}"))?;
        let json_val = serde_json::to_value(yaml_val).context("yaml->json conversion failed")?;
        deep_merge(&mut merged, json_val);
    }

    let canonical = canonicalize_json(&merged);

    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    let hash = hex::encode(hasher.finalize());

    Ok(LoadedConfig {
        config_json: serde_json::from_str(&canonical).context("canonical json parse failed")?,
        canonical_json: canonical,
        config_hash: hash,
    })
}

#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config_json: Value,
    pub canonical_json: String,
    pub config_hash: String,
}

/// Deep-merge: objects merge recursively; arrays replaced; scalars overwritten.
fn deep_merge(dst: &mut Value, src: Value) {
    match (dst, src) {
        (Value::Object(dst_map), Value::Object(src_map)) => {
            for (k, v) in src_map {
                match dst_map.get_mut(&k) {
                    Some(existing) => deep_merge(existing, v),
                    None => {
                        dst_map.insert(k, v);
                    }
                }
            }
        }
        (dst_slot, src_val) => {
            *dst_slot = src_val;
        }
    }
}

fn canonicalize_json(v: &Value) -> String {
    let sorted = sort_keys(v);
    serde_json::to_string(&sorted).expect("json serialization must not fail")
}

fn sort_keys(v: &Value) -> Value {
    match v {
        Value::Object(map) => {
            let mut keys: Vec<_> = map.keys().cloned().collect();
            keys.sort();
            let mut new = serde_json::Map::new();
            for k in keys {
                new.insert(k.clone(), sort_keys(&map[&k]));
            }
            Value::Object(new)
        }
        Value::Array(arr) => Value::Array(arr.iter().map(sort_keys).collect()),
        _ => v.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn later_files_override_earlier_ones() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("base.yaml");
        let overlay = dir.path().join("overlay.yaml");
        fs::File::create(&base)
            .unwrap()
            .write_all(b"policy:\n  min_test_commands: 1\n  max_changed_files: 8\n")
            .unwrap();
        fs::File::create(&overlay)
            .unwrap()
            .write_all(b"policy:\n  max_changed_files: 20\n")
            .unwrap();

        let loaded = load_layered_yaml(&[&base, &overlay]).unwrap();
        assert_eq!(loaded.config_json["policy"]["min_test_commands"], 1);
        assert_eq!(loaded.config_json["policy"]["max_changed_files"], 20);
    }

    #[test]
    fn hash_is_stable_for_equal_content_regardless_of_key_order() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.yaml");
        let b = dir.path().join("b.yaml");
        fs::File::create(&a).unwrap().write_all(b"x: 1\ny: 2\n").unwrap();
        fs::File::create(&b).unwrap().write_all(b"y: 2\nx: 1\n").unwrap();
        let la = load_layered_yaml(&[&a]).unwrap();
        let lb = load_layered_yaml(&[&b]).unwrap();
        assert_eq!(la.config_hash, lb.config_hash);
    }
}
