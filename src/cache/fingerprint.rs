//! Cache fingerprint computation (spec §4.7): a stable digest of endpoint
//! identifier, method, path, selected forward headers/query, and — in
//! strict mode — the final exported variables.

use std::collections::BTreeMap;

use sha2::{Digest, Sha256};

use crate::expr::{to_json, Value};
use crate::state::RawView;

pub struct FingerprintInput<'a> {
    pub endpoint_id: &'a str,
    pub method: &'a str,
    pub path: &'a str,
    pub forward: &'a RawView,
    pub selected_headers: &'a [String],
    pub selected_query: &'a [String],
    pub strict_mode: bool,
    pub exported_variables: &'a std::collections::HashMap<String, Value>,
}

pub fn fingerprint(input: &FingerprintInput) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.endpoint_id.as_bytes());
    hasher.update(b"\0");
    hasher.update(input.method.as_bytes());
    hasher.update(b"\0");
    hasher.update(input.path.as_bytes());
    hasher.update(b"\0");

    for name in sorted(input.selected_headers) {
        if let Some(value) = input.forward.headers.get(&name) {
            hasher.update(name.as_bytes());
            hasher.update(b"=");
            hasher.update(value.as_bytes());
            hasher.update(b"\0");
        }
    }
    for name in sorted(input.selected_query) {
        if let Some(value) = input.forward.query.get(&name) {
            hasher.update(name.as_bytes());
            hasher.update(b"=");
            hasher.update(value.as_bytes());
            hasher.update(b"\0");
        }
    }

    if input.strict_mode {
        let ordered: BTreeMap<&String, &Value> = input.exported_variables.iter().collect();
        for (name, value) in ordered {
            hasher.update(name.as_bytes());
            hasher.update(b"=");
            hasher.update(to_json(value).to_string().as_bytes());
            hasher.update(b"\0");
        }
    }

    hex::encode(hasher.finalize())
}

fn sorted(names: &[String]) -> Vec<String> {
    let mut out = names.to_vec();
    out.sort();
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn forward(headers: &[(&str, &str)]) -> RawView {
        RawView {
            headers: headers.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
            query: HashMap::new(),
        }
    }

    #[test]
    fn identical_inputs_produce_identical_fingerprints() {
        let exported = HashMap::new();
        let fwd = forward(&[("x-a", "1")]);
        let selected = vec!["x-a".to_string()];
        let input = FingerprintInput {
            endpoint_id: "ep1",
            method: "GET",
            path: "/x",
            forward: &fwd,
            selected_headers: &selected,
            selected_query: &[],
            strict_mode: true,
            exported_variables: &exported,
        };
        assert_eq!(fingerprint(&input), fingerprint(&input));
    }

    #[test]
    fn different_selected_header_values_change_fingerprint() {
        let exported = HashMap::new();
        let selected = vec!["x-a".to_string()];
        let fwd1 = forward(&[("x-a", "1")]);
        let fwd2 = forward(&[("x-a", "2")]);
        let make = |fwd: &RawView| {
            fingerprint(&FingerprintInput {
                endpoint_id: "ep1",
                method: "GET",
                path: "/x",
                forward: fwd,
                selected_headers: &selected,
                selected_query: &[],
                strict_mode: true,
                exported_variables: &exported,
            })
        };
        assert_ne!(make(&fwd1), make(&fwd2));
    }

    #[test]
    fn strict_mode_folds_in_exported_variables() {
        let fwd = forward(&[]);
        let mut exported_a = HashMap::new();
        exported_a.insert("v".to_string(), Value::Int(1));
        let mut exported_b = HashMap::new();
        exported_b.insert("v".to_string(), Value::Int(2));
        let make = |vars: &HashMap<String, Value>| {
            fingerprint(&FingerprintInput {
                endpoint_id: "ep1",
                method: "GET",
                path: "/x",
                forward: &fwd,
                selected_headers: &[],
                selected_query: &[],
                strict_mode: true,
                exported_variables: vars,
            })
        };
        assert_ne!(make(&exported_a), make(&exported_b));
    }
}
