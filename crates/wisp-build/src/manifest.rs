use serde::{Deserialize, Serialize};

/// Ordered set of exported function names, in order of first appearance.
///
/// Serializes to the manifest artifact written next to the generated script:
/// `{ "functions": ["echo", "add"] }`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionManifest {
    functions: Vec<String>,
}

impl FunctionManifest {
    /// Build a manifest, collapsing duplicates onto their first occurrence.
    pub fn new(names: impl IntoIterator<Item = String>) -> Self {
        let mut functions: Vec<String> = Vec::new();
        for name in names {
            if !functions.contains(&name) {
                functions.push(name);
            }
        }
        Self { functions }
    }

    pub fn names(&self) -> &[String] {
        &self.functions
    }

    pub fn into_names(self) -> Vec<String> {
        self.functions
    }

    pub fn contains(&self, name: &str) -> bool {
        self.functions.iter().any(|f| f == name)
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicates_keep_first_position() {
        let manifest = FunctionManifest::new(["b", "a", "b", "c", "a"].map(String::from));
        assert_eq!(manifest.names(), ["b", "a", "c"]);
    }

    #[test]
    fn serializes_as_functions_object() {
        let manifest = FunctionManifest::new(["echo".to_string()]);
        let value: serde_json::Value = serde_json::from_str(&manifest.to_json().unwrap()).unwrap();
        assert_eq!(value, serde_json::json!({ "functions": ["echo"] }));
    }
}
