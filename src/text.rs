//! Identifier case conversion between internal snake_case and wire camelCase
//!
//! Leading and trailing underscores are kept verbatim on both sides so that
//! `to_snake_case(&to_camel_case(x)) == x` for any snake_case identifier
//! without doubled underscores or digit-initial words.

use serde_json::{Map, Value};

/// Split `s` into (leading underscores, core, trailing underscores)
fn split_underscores(s: &str) -> (&str, &str, &str) {
    let core_start = s.len() - s.trim_start_matches('_').len();
    if core_start == s.len() {
        return (s, "", "");
    }
    let core_end = s.trim_end_matches('_').len();
    (&s[..core_start], &s[core_start..core_end], &s[core_end..])
}

/// Convert a snake_case identifier to camelCase
#[must_use]
pub fn to_camel_case(s: &str) -> String {
    let (head, core, tail) = split_underscores(s);
    let mut out = String::with_capacity(s.len());
    out.push_str(head);

    for (i, word) in core.split('_').enumerate() {
        if i == 0 {
            out.push_str(word);
            continue;
        }
        let mut chars = word.chars();
        if let Some(first) = chars.next() {
            out.extend(first.to_uppercase());
            out.push_str(chars.as_str());
        }
    }

    out.push_str(tail);
    out
}

/// Convert a camelCase identifier to snake_case
#[must_use]
pub fn to_snake_case(s: &str) -> String {
    let (head, core, tail) = split_underscores(s);
    let mut out = String::with_capacity(s.len() + 4);
    out.push_str(head);

    for (i, c) in core.chars().enumerate() {
        if c.is_uppercase() {
            if i > 0 {
                out.push('_');
            }
            out.extend(c.to_lowercase());
        } else {
            out.push(c);
        }
    }

    out.push_str(tail);
    out
}

/// Rename every key of a JSON object from snake_case to camelCase (one level)
#[must_use]
pub fn camelize_keys(map: &Map<String, Value>) -> Map<String, Value> {
    map.iter()
        .map(|(k, v)| (to_camel_case(k), v.clone()))
        .collect()
}

/// Rename every key of a JSON object from camelCase to snake_case (one level)
#[must_use]
pub fn snakeify_keys(map: &Map<String, Value>) -> Map<String, Value> {
    map.iter()
        .map(|(k, v)| (to_snake_case(k), v.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn camel_case_of_multi_word() {
        assert_eq!(to_camel_case("service_definition"), "serviceDefinition");
        assert_eq!(to_camel_case("override_store"), "overrideStore");
        assert_eq!(to_camel_case("system"), "system");
    }

    #[test]
    fn snake_case_of_multi_word() {
        assert_eq!(to_snake_case("serviceDefinitionRequirement"), "service_definition_requirement");
        assert_eq!(to_snake_case("metaData"), "meta_data");
        assert_eq!(to_snake_case("port"), "port");
    }

    #[test]
    fn underscores_at_edges_survive() {
        assert_eq!(to_camel_case("_private_name"), "_privateName");
        assert_eq!(to_camel_case("trailing_name_"), "trailingName_");
        assert_eq!(to_snake_case("__dunderName__"), "__dunder_name__");
        assert_eq!(to_camel_case("___"), "___");
    }

    #[test]
    fn round_trip_snake_camel_snake() {
        for ident in [
            "a",
            "service_uri",
            "provider_system",
            "authentication_info",
            "end_of_validity",
            "_leading",
            "trailing_",
            "__both_sides__",
            "match_meta_data",
            "x_y_z",
        ] {
            assert_eq!(to_snake_case(&to_camel_case(ident)), ident, "round trip of {ident}");
        }
    }

    #[test]
    fn key_maps_convert_one_level() {
        let mut map = Map::new();
        map.insert("override_store".to_string(), Value::Bool(true));
        map.insert("ping_providers".to_string(), Value::Bool(false));

        let camel = camelize_keys(&map);
        assert_eq!(camel["overrideStore"], Value::Bool(true));
        assert_eq!(camel["pingProviders"], Value::Bool(false));
        assert_eq!(snakeify_keys(&camel), map);
    }
}
