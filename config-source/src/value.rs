//! The delivered configuration value, and the nested-map assembly KV/prefix
//! mode uses (§4.7).

use crate::kv::KvEntry;

/// What [`crate::ConfigSource::read`] returns: a raw blob in blob mode, or a
/// nested map assembled from a prefix scan in KV/prefix mode.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigValue {
    Blob(Vec<u8>),
    Map(serde_yaml::Mapping),
}

/// Parses a raw scalar value read from the store. The default
/// [`YamlScalarParser`] falls back to a plain string when the bytes are not
/// valid YAML, per §4.7 ("scalar values are parsed... when possible, else
/// returned as strings").
pub trait ScalarParser: Send + Sync {
    fn parse(&self, raw: &[u8]) -> serde_yaml::Value;
}

/// Parses each scalar with `serde_yaml`, so `"true"`, `"42"`, `"3.14"` decode
/// to their typed YAML equivalents while anything else is kept as a string.
#[derive(Debug, Clone, Copy, Default)]
pub struct YamlScalarParser;

impl ScalarParser for YamlScalarParser {
    fn parse(&self, raw: &[u8]) -> serde_yaml::Value {
        let text = String::from_utf8_lossy(raw);
        serde_yaml::from_str(&text).unwrap_or_else(|_| serde_yaml::Value::String(text.into_owned()))
    }
}

/// Assembles a nested [`serde_yaml::Mapping`] from `prefix`-scoped entries,
/// splitting each key's remainder on `/` and `.` (§4.7).
pub(crate) fn assemble_map(prefix: &str, entries: &[KvEntry], parser: &dyn ScalarParser) -> serde_yaml::Mapping {
    let mut map = serde_yaml::Mapping::new();
    for entry in entries {
        let Some(relative) = entry.key.strip_prefix(prefix) else { continue };
        let segments: Vec<&str> = relative
            .split(|c| c == '/' || c == '.')
            .filter(|segment| !segment.is_empty())
            .collect();
        if segments.is_empty() {
            continue;
        }
        let value = parser.parse(&entry.value);
        insert_path(&mut map, &segments, value);
    }
    map
}

fn insert_path(map: &mut serde_yaml::Mapping, path: &[&str], value: serde_yaml::Value) {
    let key = serde_yaml::Value::String(path[0].to_string());
    if path.len() == 1 {
        map.insert(key, value);
        return;
    }

    if !matches!(map.get(&key), Some(serde_yaml::Value::Mapping(_))) {
        map.insert(key.clone(), serde_yaml::Value::Mapping(serde_yaml::Mapping::new()));
    }
    if let Some(serde_yaml::Value::Mapping(child)) = map.get_mut(&key) {
        insert_path(child, &path[1..], value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(key: &str, value: &str) -> KvEntry {
        KvEntry { key: key.to_string(), value: value.as_bytes().to_vec() }
    }

    #[test]
    fn nests_keys_split_on_slash_and_dot() {
        let entries = vec![entry("cfg/service.timeout", "30"), entry("cfg/service.retries", "3")];
        let map = assemble_map("cfg/", &entries, &YamlScalarParser);

        let service = map.get("service").and_then(|v| v.as_mapping()).unwrap();
        assert_eq!(service.get("timeout").unwrap().as_i64(), Some(30));
        assert_eq!(service.get("retries").unwrap().as_i64(), Some(3));
    }

    #[test]
    fn unparsable_scalars_fall_back_to_strings() {
        let entries = vec![entry("cfg/name", "checkout-service")];
        let map = assemble_map("cfg/", &entries, &YamlScalarParser);
        assert_eq!(map.get("name").unwrap().as_str(), Some("checkout-service"));
    }
}
