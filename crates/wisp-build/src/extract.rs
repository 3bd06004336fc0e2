use std::collections::HashSet;

use crate::error::BuildError;
use crate::manifest::FunctionManifest;
use crate::syntax::TokenView;

/// Collect the names of top-level exported functions, in order of first
/// appearance.
///
/// Recognized declarations:
///
/// ```text
/// export [async] function[*] NAME[<...>](
/// export const NAME[: T] = [async] [<...>](...) [: R] =>
/// export const NAME[: T] = [async] PARAM =>
/// export const NAME[: T] = [async] function
/// ```
///
/// Comments and string literals are lexed as single tokens, so text that only
/// looks like an export inside them is never reported.
pub fn extract_functions(source: &str) -> FunctionManifest {
    let view = TokenView::new(source);
    let mut seen = HashSet::new();
    let mut names = Vec::new();
    let mut depth = 0usize;

    for i in 0..view.len() {
        match view.text(i) {
            "{" => depth += 1,
            "}" => depth = depth.saturating_sub(1),
            "export" if depth == 0 => {
                if let Some(name) = exported_function(&view, i + 1)
                    && seen.insert(name)
                {
                    names.push(name.to_string());
                }
            }
            _ => {}
        }
    }

    FunctionManifest::new(names)
}

/// Like [`extract_functions`], but an empty result is an error.
pub fn require_functions(source: &str) -> Result<FunctionManifest, BuildError> {
    let manifest = extract_functions(source);
    if manifest.is_empty() {
        return Err(BuildError::NoExports);
    }
    tracing::debug!(functions = ?manifest.names(), "Extracted exported functions");
    Ok(manifest)
}

fn exported_function<'a>(view: &TokenView<'a>, i: usize) -> Option<&'a str> {
    let mut k = i;
    if view.is(k, "async") {
        k += 1;
    }
    if view.is(k, "function") {
        return function_declaration(view, k + 1);
    }
    if k != i || !view.is(k, "const") || !view.is_name(k + 1) {
        return None;
    }

    let name = view.text(k + 1);
    let mut k = k + 2;
    if view.is(k, ":") {
        k = view.parse_type(k + 1)?;
    }
    if !view.is(k, "=") {
        return None;
    }
    k += 1;
    if view.is(k, "async") {
        k += 1;
    }

    let is_function = if view.is(k, "function") {
        true
    } else if view.is(k, "<") {
        let open = view.parse_angle(k)?;
        view.is(open, "(") && view.arrow_after_params(open).is_some()
    } else if view.is(k, "(") {
        view.arrow_after_params(k).is_some()
    } else {
        view.is_name(k) && view.is(k + 1, "=>")
    };
    is_function.then_some(name)
}

fn function_declaration<'a>(view: &TokenView<'a>, i: usize) -> Option<&'a str> {
    let mut k = i;
    if view.is(k, "*") {
        k += 1;
    }
    if !view.is_name(k) {
        return None;
    }
    let name = view.text(k);
    let mut params = k + 1;
    if view.is(params, "<") {
        params = view.parse_angle(params)?;
    }
    view.is(params, "(").then_some(name)
}
