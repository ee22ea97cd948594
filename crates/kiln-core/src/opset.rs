//! Operator schema versions for the default domain.
//!
//! A node's `since_version` is the version of the operator schema that
//! applies under the graph's imported opset: the newest schema version that
//! is not newer than the opset. Kernels are registered against these
//! versions, so nodes inserted by rewrites must resolve them the same way a
//! loader would.

/// The default (ONNX) operator domain.
pub const DEFAULT_DOMAIN: &str = "";

/// Alias some producers write for the default domain.
pub const ONNX_DOMAIN_ALIAS: &str = "ai.onnx";

/// Schema versions of the operators Kiln knows about, oldest first.
const SCHEMA_VERSIONS: &[(&str, &[i64])] = &[
    ("Add", &[1, 6, 7, 13, 14]),
    ("Gather", &[1, 11, 13]),
    ("Identity", &[1, 13, 14, 16, 19, 21]),
    ("Relu", &[1, 6, 13, 14]),
    ("Shape", &[1, 13, 15, 19, 21]),
    ("Split", &[1, 2, 11, 13, 18]),
    ("Squeeze", &[1, 11, 13, 21]),
    ("Unsqueeze", &[1, 11, 13, 21]),
];

/// Whether a domain string names the default domain.
pub fn is_default_domain(domain: &str) -> bool {
    domain == DEFAULT_DOMAIN || domain == ONNX_DOMAIN_ALIAS
}

/// Resolve the schema version of `op_type` under `opset`.
///
/// Unknown operators (and operators outside the default domain) resolve to
/// the opset version itself.
pub fn since_version(domain: &str, op_type: &str, opset: i64) -> i64 {
    if !is_default_domain(domain) {
        return opset;
    }

    SCHEMA_VERSIONS
        .iter()
        .find(|(name, _)| *name == op_type)
        .and_then(|(_, versions)| versions.iter().rev().find(|&&v| v <= opset).copied())
        .unwrap_or(opset)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_since_version_picks_newest_applicable_schema() {
        assert_eq!(since_version("", "Gather", 12), 11);
        assert_eq!(since_version("", "Gather", 13), 13);
        assert_eq!(since_version("", "Gather", 17), 13);
        assert_eq!(since_version("", "Squeeze", 12), 11);
        assert_eq!(since_version("ai.onnx", "Split", 17), 13);
    }

    #[test]
    fn test_since_version_unknown_operator() {
        assert_eq!(since_version("", "FancyOp", 9), 9);
        assert_eq!(since_version("com.example", "Gather", 3), 3);
    }
}
