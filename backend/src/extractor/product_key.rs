//! Deterministic product identity derived from extraction output.
//!
//! The key groups listings for baseline aggregation, so its derivation
//! must be stable across runs: same inputs, same key.

use crate::model::AttrMap;

/// Attribute order per component type. Missing attributes are skipped, so
/// partially-extracted listings still land in a (coarser) group.
fn salient_attrs(component_type: &str) -> &'static [&'static str] {
    match component_type {
        "ram" => &["generation", "ecc", "capacity", "speed"],
        "cpu" => &["family", "model", "cores"],
        "ssd" => &["interface", "form_factor", "capacity"],
        "hdd" => &["interface", "form_factor", "capacity", "rpm"],
        "nic" => &["interface", "speed", "ports"],
        "hba" => &["interface", "mode", "ports"],
        "psu" => &["wattage", "form_factor"],
        "gpu" => &["family", "model", "memory"],
        _ => &[],
    }
}

/// Derive the baseline grouping key, e.g. `ram:ddr4:ecc_reg:32gb:2666`.
///
/// Returns `None` when the classification is empty or unknown; such
/// listings cannot be baselined.
pub fn product_key(component_type: &str, attrs: &AttrMap) -> Option<String> {
    let ct = slug(component_type);
    if ct.is_empty() || ct == "unknown" || ct == "other" {
        return None;
    }

    let mut parts = vec![ct];

    let salient = salient_attrs(component_type);
    if salient.is_empty() {
        // Unrecognized but non-empty type: fall back to sorted key=value
        // pairs so the key stays deterministic.
        let mut kvs: Vec<String> = attrs
            .iter()
            .filter_map(|(k, v)| attr_value(v).map(|val| format!("{}={}", slug(k), val)))
            .collect();
        kvs.sort();
        parts.extend(kvs);
    } else {
        for name in salient {
            if let Some(v) = attrs.get(*name).and_then(attr_value) {
                parts.push(v);
            }
        }
    }

    Some(parts.join(":"))
}

fn attr_value(v: &serde_json::Value) -> Option<String> {
    let s = match v {
        serde_json::Value::String(s) => slug(s),
        serde_json::Value::Number(n) => n.to_string(),
        serde_json::Value::Bool(b) => b.to_string(),
        _ => return None,
    };
    if s.is_empty() { None } else { Some(s) }
}

/// Lowercase and collapse runs of non-alphanumerics to single underscores.
fn slug(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut last_sep = true;
    for c in s.trim().chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c.to_ascii_lowercase());
            last_sep = false;
        } else if !last_sep {
            out.push('_');
            last_sep = true;
        }
    }
    while out.ends_with('_') {
        out.pop();
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attrs(pairs: &[(&str, serde_json::Value)]) -> AttrMap {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn ram_key_uses_fixed_attribute_order() {
        let a = attrs(&[
            ("speed", serde_json::json!(2666)),
            ("capacity", serde_json::json!("32GB")),
            ("ecc", serde_json::json!("ECC REG")),
            ("generation", serde_json::json!("DDR4")),
        ]);
        assert_eq!(
            product_key("ram", &a).as_deref(),
            Some("ram:ddr4:ecc_reg:32gb:2666")
        );
    }

    #[test]
    fn missing_attributes_coarsen_the_key() {
        let a = attrs(&[("generation", serde_json::json!("DDR3"))]);
        assert_eq!(product_key("ram", &a).as_deref(), Some("ram:ddr3"));
    }

    #[test]
    fn unknown_classification_yields_no_key() {
        let a = attrs(&[("anything", serde_json::json!("x"))]);
        assert_eq!(product_key("unknown", &a), None);
        assert_eq!(product_key("", &a), None);
    }

    #[test]
    fn unrecognized_type_sorts_attribute_pairs() {
        let a = attrs(&[
            ("zz", serde_json::json!("last")),
            ("aa", serde_json::json!("first")),
        ]);
        assert_eq!(
            product_key("riser", &a).as_deref(),
            Some("riser:aa=first:zz=last")
        );
    }

    #[test]
    fn derivation_is_deterministic() {
        let a = attrs(&[
            ("generation", serde_json::json!("DDR4")),
            ("capacity", serde_json::json!("16GB")),
        ]);
        let first = product_key("ram", &a);
        for _ in 0..10 {
            assert_eq!(product_key("ram", &a), first);
        }
    }
}
