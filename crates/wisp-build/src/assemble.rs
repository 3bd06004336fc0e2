use crate::manifest::FunctionManifest;
use crate::protocol::{ERROR_FLAG, RESULT_END, RESULT_START, USAGE};
use crate::syntax::TokenView;

const HEADER: &str = "// Generated by wisp from a worker source bundle. Do not edit.\n\n";

const ENTRY_POINT: &str = r#"
function __wispEmit(value) {
  process.stdout.write(__WISP_RESULT_START + JSON.stringify(value) + __WISP_RESULT_END + "\n");
}

async function __wispMain(argv) {
  const [functionName, rawPayload] = argv;
  if (functionName === undefined) {
    console.error(__WISP_USAGE);
    process.exitCode = 1;
    return;
  }
  const target = Object.prototype.hasOwnProperty.call(__wispRegistry, functionName)
    ? __wispRegistry[functionName]
    : undefined;
  if (typeof target !== "function") {
    const available = Object.keys(__wispRegistry).join(", ");
    console.error(`Function "${functionName}" not found. Available functions: ${available}`);
    process.exitCode = 1;
    return;
  }
  try {
    const payload = rawPayload === undefined ? {} : JSON.parse(rawPayload);
    const result = await target(payload);
    __wispEmit(result === undefined ? null : result);
  } catch (error) {
    const message = error instanceof Error ? error.message : String(error);
    __wispEmit({ [__WISP_ERROR_FLAG]: true, message });
    process.exitCode = 1;
  }
}

__wispMain(process.argv.slice(2));
"#;

/// A self-contained dispatch script for one source bundle version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedScript {
    source: String,
    manifest: FunctionManifest,
}

impl GeneratedScript {
    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn manifest(&self) -> &FunctionManifest {
        &self.manifest
    }
}

/// Combine stripped user code with a registry of `manifest` and the
/// command-line entry point.
///
/// The script is invoked as `<script> <functionName> [<jsonPayload>]` and
/// writes exactly one `__RESULT__<json>__END_RESULT__` line on success or on
/// a thrown error.
pub fn assemble(stripped: &str, manifest: &FunctionManifest) -> GeneratedScript {
    let code = remove_exports(stripped);

    let mut source = String::with_capacity(code.len() + ENTRY_POINT.len() + 512);
    source.push_str(HEADER);
    source.push_str(code.trim_end());
    source.push_str("\n\nconst __wispRegistry = {\n");
    for name in manifest.names() {
        source.push_str(&format!("  {}: {name},\n", js_string(name)));
    }
    source.push_str("};\n\n");
    source.push_str(&format!("const __WISP_RESULT_START = {};\n", js_string(RESULT_START)));
    source.push_str(&format!("const __WISP_RESULT_END = {};\n", js_string(RESULT_END)));
    source.push_str(&format!("const __WISP_ERROR_FLAG = {};\n", js_string(ERROR_FLAG)));
    source.push_str(&format!("const __WISP_USAGE = {};\n", js_string(USAGE)));
    source.push_str(ENTRY_POINT);

    GeneratedScript {
        source,
        manifest: manifest.clone(),
    }
}

fn js_string(value: &str) -> String {
    serde_json::Value::from(value).to_string()
}

/// Turn top-level `export` statements into plain local definitions.
fn remove_exports(code: &str) -> String {
    let view = TokenView::new(code);
    let mut removed = Vec::new();
    let mut depth = 0usize;

    let mut i = 0;
    while i < view.len() {
        match view.text(i) {
            "{" => depth += 1,
            "}" => depth = depth.saturating_sub(1),
            "export" if depth == 0 => {
                let next = if view.is(i + 1, "default") { i + 2 } else { i + 1 };
                if view.is(next, "{") || view.is(next, "*") {
                    // Re-export lists have no local effect.
                    let last = view.statement_end(i);
                    removed.push(view.start(i)..view.end(last));
                    i = last + 1;
                    continue;
                }
                removed.push(view.start(i)..view.start(next));
                i = next;
                continue;
            }
            _ => {}
        }
        i += 1;
    }

    let mut out = String::with_capacity(code.len());
    let mut pos = 0;
    for range in removed {
        out.push_str(&code[pos..range.start]);
        pos = range.end;
    }
    out.push_str(&code[pos..]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manifest(names: &[&str]) -> FunctionManifest {
        FunctionManifest::new(names.iter().map(|n| n.to_string()))
    }

    #[test]
    fn export_keywords_become_local_definitions() {
        let code = "export async function echo(p) { return p; }\nexport const add = (p) => p.x + p.y;\nexport default function main() {}\nexport { echo as again };\nconst inner = { export: 1 };\n";
        assert_eq!(
            remove_exports(code),
            "async function echo(p) { return p; }\nconst add = (p) => p.x + p.y;\nfunction main() {}\n\nconst inner = { export: 1 };\n"
        );
    }

    #[test]
    fn registry_follows_manifest_order() {
        let script = assemble(
            "export function b() {}\nexport function a() {}\n",
            &manifest(&["b", "a"]),
        );
        let source = script.source();
        let registry = source.find("const __wispRegistry = {\n  \"b\": b,\n  \"a\": a,\n};").unwrap();
        let body = source.find("function b() {}").unwrap();
        assert!(body < registry);
        assert!(!source.contains("export function"));
    }

    #[test]
    fn entry_point_emits_single_marker_line() {
        let script = assemble("export function f() {}", &manifest(&["f"]));
        let source = script.source();
        assert!(source.contains("const __WISP_RESULT_START = \"__RESULT__\";"));
        assert!(source.contains("const __WISP_RESULT_END = \"__END_RESULT__\";"));
        assert!(source.contains("const __WISP_ERROR_FLAG = \"__error\";"));
        assert_eq!(source.matches("process.stdout.write(").count(), 1);
        assert!(source.trim_end().ends_with("__wispMain(process.argv.slice(2));"));
    }
}
