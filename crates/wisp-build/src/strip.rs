//! Erasure of static-type syntax.
//!
//! The stripper walks the significant tokens once and records byte ranges to
//! delete; the output is the input minus those ranges. Nothing is ever
//! inserted or rewritten, so code outside a recognized type construct
//! (including every string, template and numeric literal) is kept
//! byte-for-byte. Constructs it does not recognize pass through unchanged.
//!
//! Recognized constructs:
//!
//! * `interface` declarations and `type` aliases, including their
//!   `export` / `declare` forms, and `declare ...` ambient statements;
//! * `import type ...` statements and type-only specifiers inside mixed
//!   import lists, and `export type { ... }` re-exports;
//! * type parameter lists on functions, generic arrows, classes and calls;
//! * return-type annotations on functions, methods and arrows;
//! * parameter annotations, optional (`?`) markers and `this` parameters;
//! * variable, class field and catch-clause annotations, plus TypeScript
//!   member modifiers and `implements` clauses;
//! * the `abstract` class modifier, abstract members and bodiless method
//!   signatures;
//! * `as` / `satisfies` assertions and postfix non-null `!`.
//!
//! Blank-line runs left behind by a deletion collapse to a single blank line.

use std::collections::HashSet;
use std::ops::Range;

use crate::lexer::TokenKind;
use crate::syntax::TokenView;

/// Member modifiers that exist only in the type layer.
const TS_MODIFIERS: &[&str] = &[
    "public", "private", "protected", "readonly", "override", "declare", "abstract",
];

/// Modifiers that stay in the emitted class body.
const JS_MODIFIERS: &[&str] = &["static", "async", "get", "set", "accessor", "*"];

/// Tokens after which a line break does not end the expression.
const CONTINUATION: &[&str] = &[
    ".", "?.", "=", "(", "[", ",", ":", "?", "+", "-", "*", "/", "%", "&&", "||", "??", "=>",
    "!", "<", ">", "|", "&", "return", "typeof", "await", "new", "extends",
];

/// Return `source` with the type annotations removed.
pub fn strip_types(source: &str) -> String {
    let view = TokenView::new(source);
    let mut stripper = Stripper::new(&view);
    stripper.run();
    let stripped = stripper.finish();
    tracing::debug!(
        input_bytes = source.len(),
        output_bytes = stripped.len(),
        "Stripped type annotations"
    );
    stripped
}

struct Stripper<'v, 'a> {
    view: &'v TokenView<'a>,
    removed: Vec<Range<usize>>,
    dead: Vec<bool>,
    params_done: HashSet<usize>,
}

impl<'v, 'a> Stripper<'v, 'a> {
    fn new(view: &'v TokenView<'a>) -> Self {
        Self {
            view,
            removed: Vec::new(),
            dead: vec![false; view.len()],
            params_done: HashSet::new(),
        }
    }

    fn run(&mut self) {
        let mut i = 0;
        while i < self.view.len() {
            i = if self.dead[i] { i + 1 } else { self.visit(i) };
        }
    }

    fn visit(&mut self, i: usize) -> usize {
        let v = self.view;
        match v.text(i) {
            "interface" | "type" | "declare" if self.at_statement_start(i) => {
                self.visit_type_statement(i, i).unwrap_or(i + 1)
            }
            "import" if self.at_statement_start(i) && !v.is(i + 1, "(") && !v.is(i + 1, ".") => {
                self.visit_import(i)
            }
            "export" => self.visit_export(i),
            "function" => self.visit_function(i),
            "class" => self.visit_class(i),
            "abstract" if v.is(i + 1, "class") => {
                self.remove_span(i, i + 1, v.start(i)..v.start(i + 1));
                i + 1
            }
            "const" | "let" | "var" => self.visit_declaration(i),
            "(" => self.visit_paren(i),
            "<" => self.visit_angle(i),
            "as" | "satisfies" if i > 0 && v.ends_expression(i - 1) => {
                let end = if v.is(i + 1, "const") {
                    Some(i + 2)
                } else {
                    v.parse_type(i + 1)
                };
                match end {
                    Some(end) => {
                        self.remove_with_leading_space(i, end);
                        end
                    }
                    None => i + 1,
                }
            }
            "!" if i > 0 && v.adjacent(i - 1) && v.ends_expression(i - 1) => {
                self.remove(i, i + 1);
                i + 1
            }
            _ => i + 1,
        }
    }

    /// `interface`, `type` alias or `declare` statement starting at `keyword`;
    /// `start` is where removal begins (an `export` in front of it, if any).
    fn visit_type_statement(&mut self, start: usize, keyword: usize) -> Option<usize> {
        let v = self.view;
        let last = match v.text(keyword) {
            "interface" => self.interface_end(keyword)?,
            "type" => {
                if !v.is_name(keyword + 1) {
                    return None;
                }
                let mut k = keyword + 2;
                if v.is(k, "<") {
                    k = v.parse_angle(k)?;
                }
                if !v.is(k, "=") {
                    return None;
                }
                v.statement_end(keyword)
            }
            "declare" if v.is_ident(keyword + 1) => v.statement_end(keyword),
            _ => return None,
        };
        self.remove_statement(start, last);
        Some(last + 1)
    }

    fn interface_end(&self, i: usize) -> Option<usize> {
        let v = self.view;
        if !v.is_name(i + 1) {
            return None;
        }
        let mut k = i + 2;
        while k < v.len() && !v.is(k, "{") {
            match v.text(k) {
                "<" => k = v.parse_angle(k)?,
                ";" | "=" | "(" => return None,
                _ => k += 1,
            }
        }
        v.matching(k)
    }

    fn visit_import(&mut self, i: usize) -> usize {
        let v = self.view;
        let last = v.statement_end(i);
        let type_only = v.is(i + 1, "type") && !v.is(i + 2, "from") && !v.is(i + 2, ",");
        if type_only {
            self.remove_statement(i, last);
            return last + 1;
        }

        let Some(open) = (i + 1..last).find(|&k| v.is(k, "{")) else {
            return last + 1;
        };
        let items = v.list_items(open);
        let is_type = |&(s, e): &(usize, usize)| e - s >= 2 && v.is(s, "type") && v.is_ident(s + 1);
        let kept: Vec<usize> = (0..items.len()).filter(|&j| !is_type(&items[j])).collect();

        let Some(&last_kept) = kept.last() else {
            if items.is_empty() {
                return last + 1;
            }
            if v.is(open - 1, ",") {
                // `import def, { type A } from "x"` keeps the default import.
                let close = v.matching(open).unwrap_or(open);
                self.remove_span(open - 1, close + 1, v.end(open - 2)..v.end(close));
            } else {
                self.remove_statement(i, last);
            }
            return last + 1;
        };

        for (j, &(s, e)) in items.iter().enumerate() {
            if !is_type(&(s, e)) {
                continue;
            }
            if j < last_kept {
                let next_start = items[j + 1].0;
                self.remove_span(s, next_start, v.start(s)..v.start(next_start));
            } else {
                let prev_end = items[last_kept].1;
                self.remove_span(s, e, v.end(prev_end - 1)..v.end(e - 1));
            }
        }
        last + 1
    }

    fn visit_export(&mut self, i: usize) -> usize {
        let v = self.view;
        if v.is(i + 1, "type") && v.is(i + 2, "{") {
            let last = v.statement_end(i);
            self.remove_statement(i, last);
            return last + 1;
        }
        if matches!(v.text(i + 1), "interface" | "type" | "declare")
            && let Some(next) = self.visit_type_statement(i, i + 1)
        {
            return next;
        }
        if v.is(i + 1, "{") {
            // `export { a as b }` is a renaming, not an assertion.
            return v.matching(i + 1).map_or(i + 1, |close| close + 1);
        }
        i + 1
    }

    fn visit_function(&mut self, i: usize) -> usize {
        let v = self.view;
        let mut k = i + 1;
        if v.is(k, "*") {
            k += 1;
        }
        if v.is_name(k) {
            k += 1;
        }
        if v.is(k, "<")
            && let Some(after) = v.parse_angle(k)
        {
            self.remove(k, after);
            k = after;
        }
        if !v.is(k, "(") {
            return i + 1;
        }
        let Some(close) = v.matching(k) else {
            return i + 1;
        };
        self.strip_params(k);
        let mut after = close + 1;
        if v.is(after, ":")
            && let Some(end) = v.parse_type(after + 1)
        {
            self.remove(after, end);
            after = end;
        }

        if !v.is(after, "{") {
            // Overload signature or ambient declaration: no body to keep.
            let mut start = i;
            while start > 0 && matches!(v.text(start - 1), "async" | "export" | "default") {
                start -= 1;
            }
            if self.at_statement_start(start) {
                let last = if v.is(after, ";") { after } else { after.saturating_sub(1) };
                self.remove_statement(start, last);
                return last + 1;
            }
        }
        k + 1
    }

    fn visit_class(&mut self, i: usize) -> usize {
        let v = self.view;
        let mut k = i + 1;
        if v.is_name(k) {
            k += 1;
        }
        if v.is(k, "<")
            && let Some(after) = v.parse_angle(k)
        {
            self.remove(k, after);
            k = after;
        }
        while k < v.len() && !v.is(k, "{") {
            if v.is(k, "implements") {
                let mut end = k + 1;
                while end < v.len() && !v.is(end, "{") {
                    end = if v.is(end, "<") {
                        v.parse_angle(end).unwrap_or(end + 1)
                    } else {
                        end + 1
                    };
                }
                self.remove_with_leading_space(k, end);
                k = end;
                break;
            }
            k = match v.text(k) {
                "(" | "[" => v.matching(k).map_or(k + 1, |close| close + 1),
                // Type arguments on the base class: `extends Base<T>`.
                "<" => match v.parse_angle(k) {
                    Some(after) => {
                        self.remove(k, after);
                        after
                    }
                    None => k + 1,
                },
                _ => k + 1,
            };
        }
        if v.is(k, "{")
            && let Some(close) = v.matching(k)
        {
            self.strip_class_body(k, close);
        }
        i + 1
    }

    fn strip_class_body(&mut self, open: usize, close: usize) {
        let v = self.view;
        let mut m = open + 1;
        while m < close {
            if v.is(m, ";") {
                m += 1;
                continue;
            }
            if v.is(m, "static") && v.is(m + 1, "{") {
                m = v.matching(m + 1).map_or(close, |end| end + 1);
                continue;
            }

            let member = m;
            let mut is_abstract = false;
            loop {
                let named_next = v.is_ident(m + 1) || v.is(m + 1, "[") || v.is(m + 1, "*");
                if TS_MODIFIERS.contains(&v.text(m)) && named_next {
                    is_abstract |= v.is(m, "abstract");
                    self.remove_span(m, m + 1, v.start(m)..v.start(m + 1));
                    m += 1;
                } else if JS_MODIFIERS.contains(&v.text(m)) && named_next {
                    m += 1;
                } else {
                    break;
                }
            }

            m = if v.is(m, "[") {
                v.matching(m).map_or(close, |end| end + 1)
            } else {
                m + 1
            };
            if (v.is(m, "?") || v.is(m, "!")) && (v.is(m + 1, ":") || v.is(m + 1, "(")) {
                self.remove(m, m + 1);
                m += 1;
            }
            if v.is(m, "<")
                && let Some(after) = v.parse_angle(m)
            {
                self.remove(m, after);
                m = after;
            }
            if v.is(m, ":")
                && let Some(end) = v.parse_type(m + 1)
            {
                self.remove(m, end);
                m = end;
            }

            if v.is(m, "(") {
                let Some(params_close) = v.matching(m) else {
                    return;
                };
                self.strip_params(m);
                m = params_close + 1;
                if v.is(m, ":")
                    && let Some(end) = v.parse_type(m + 1)
                {
                    self.remove(m, end);
                    m = end;
                }
                if v.is(m, "{") {
                    m = v.matching(m).map_or(close, |end| end + 1);
                } else {
                    // Abstract method or overload signature: nothing to emit.
                    let last = if v.is(m, ";") { m } else { m - 1 };
                    self.remove_statement(member, last);
                    m = last + 1;
                }
            } else if is_abstract {
                let last = if v.is(m, ";") { m } else { m - 1 };
                self.remove_statement(member, last);
                m = last + 1;
            } else if v.is(m, "=") {
                m = v.statement_end(m).min(close - 1) + 1;
            }
        }
    }

    fn visit_declaration(&mut self, i: usize) -> usize {
        let v = self.view;
        let last = v.statement_end(i);
        let mut k = i + 1;
        loop {
            let Some(after) = self.strip_declarator(k) else {
                return i + 1;
            };
            // Skip the initializer up to the next declarator.
            k = after;
            while k <= last && !v.is(k, ",") {
                match v.text(k) {
                    ";" | ")" | "]" | "}" => return i + 1,
                    "(" | "[" | "{" => match v.matching(k) {
                        Some(close) => k = close + 1,
                        None => return i + 1,
                    },
                    _ => k += 1,
                }
            }
            if k > last {
                return i + 1;
            }
            k += 1;
        }
    }

    /// Strip the annotation of the declarator binding at `k`; returns the
    /// index just past the binding and its annotation.
    fn strip_declarator(&mut self, mut k: usize) -> Option<usize> {
        let v = self.view;
        if v.is(k, "{") || v.is(k, "[") {
            k = v.matching(k)? + 1;
        } else if v.is_name(k) {
            k += 1;
        } else {
            return None;
        }
        if v.is(k, "!") && v.is(k + 1, ":") {
            self.remove(k, k + 1);
            k += 1;
        }
        if v.is(k, ":")
            && let Some(end) = v.parse_type(k + 1)
        {
            self.remove(k, end);
            k = end;
        }
        Some(k)
    }

    fn visit_paren(&mut self, i: usize) -> usize {
        let v = self.view;
        if self.params_done.contains(&i) {
            return i + 1;
        }
        let Some(close) = v.matching(i) else {
            return i + 1;
        };

        if let Some(arrow) = v.arrow_after_params(i) {
            if arrow > close + 1
                && self.in_conditional_branch(i)
                && !self.else_branch_follows(arrow)
            {
                // `ok ? (x) : y => y + 1`: the colon belongs to the conditional.
                return i + 1;
            }
            self.strip_params(i);
            if arrow > close + 1 {
                self.remove(close + 1, arrow);
            }
            return i + 1;
        }

        if i > 0 && v.is(i - 1, "catch") {
            self.strip_params(i);
            return i + 1;
        }

        // Method shorthand in object literals: `name(a: T): R { ... }`.
        let named = i > 0 && v.is_name(i - 1) && !(i > 1 && matches!(v.text(i - 2), "." | "?."));
        if named {
            let mut after = close + 1;
            let mut return_type = None;
            if v.is(after, ":")
                && let Some(end) = v.parse_type(after + 1)
            {
                return_type = Some(after);
                after = end;
            }
            if v.is(after, "{") && self.strip_params(i) {
                if let Some(colon) = return_type {
                    self.remove(colon, after);
                }
            }
        }
        i + 1
    }

    fn visit_angle(&mut self, i: usize) -> usize {
        let v = self.view;
        if i == 0 {
            return i + 1;
        }
        let Some(after) = v.parse_angle(i) else {
            return i + 1;
        };
        if !v.is(after, "(") {
            return i + 1;
        }
        let generic_arrow = matches!(
            v.text(i - 1),
            "=" | "async" | "(" | "," | ":" | "return" | "=>" | "?"
        ) && v.arrow_after_params(after).is_some();
        // Explicit type arguments on a call: `useState<number>(0)`, `new Map<K, V>()`.
        let call_arguments = v.is_name(i - 1)
            && v.adjacent(i - 1)
            && v.adjacent(after - 1)
            && v.parse_type_arguments(i) == Some(after);
        if generic_arrow || call_arguments {
            self.remove(i, after);
            return after;
        }
        i + 1
    }

    /// Strip annotations from the parameter list opened at `open`. Returns
    /// false, leaving the group untouched, if any item is not shaped like a
    /// parameter.
    fn strip_params(&mut self, open: usize) -> bool {
        let v = self.view;
        if !self.params_done.insert(open) {
            return true;
        }

        enum Edit {
            Optional(usize),
            Annotation(usize, usize),
            ThisParam(usize, usize),
        }

        let items = v.list_items(open);
        let mut edits = Vec::new();
        for &(s, e) in &items {
            if v.is(s, "this") && v.is(s + 1, ":") {
                edits.push(Edit::ThisParam(s, e));
                continue;
            }
            let mut k = s;
            if v.is(k, "...") {
                k += 1;
            }
            if v.is(k, "{") || v.is(k, "[") {
                match v.matching(k) {
                    Some(close) if close < e => k = close + 1,
                    _ => return false,
                }
            } else if v.is_name(k) {
                k += 1;
            } else {
                return false;
            }
            if v.is(k, "?") && (k + 1 == e || v.is(k + 1, ":")) {
                edits.push(Edit::Optional(k));
                k += 1;
            }
            if v.is(k, ":") {
                match v.parse_type(k + 1) {
                    Some(end) if end <= e => {
                        edits.push(Edit::Annotation(k, end));
                        k = end;
                    }
                    _ => return false,
                }
            }
            if k < e && !v.is(k, "=") {
                return false;
            }
        }

        for edit in edits {
            match edit {
                Edit::Optional(k) => self.remove(k, k + 1),
                Edit::Annotation(from, to) => self.remove(from, to),
                Edit::ThisParam(s, e) => {
                    let range = if v.is(e, ",") {
                        v.start(s)..v.start(e + 1)
                    } else {
                        v.start(s)..v.end(e - 1)
                    };
                    self.remove_span(s, e + 1, range);
                }
            }
        }
        true
    }

    /// True if the group at `open` is the first operand after a conditional's
    /// `?`, where a following `:` may start the else branch.
    fn in_conditional_branch(&self, open: usize) -> bool {
        let v = self.view;
        let before = if open > 0 && v.is(open - 1, "async") { open - 1 } else { open };
        before > 0 && v.is(before - 1, "?")
    }

    /// True if an arrow body starting after `arrow` is followed by a `:` that
    /// closes the enclosing conditional, so the arrow's own colon is a type.
    fn else_branch_follows(&self, arrow: usize) -> bool {
        let v = self.view;
        let mut pending = 0usize;
        let mut k = arrow + 1;
        while k < v.len() {
            match v.text(k) {
                "(" | "[" | "{" => match v.matching(k) {
                    Some(close) => k = close,
                    None => return false,
                },
                ")" | "]" | "}" | ";" | "," => return false,
                "?" => pending += 1,
                ":" if pending == 0 => return true,
                ":" => pending -= 1,
                _ => {}
            }
            k += 1;
        }
        false
    }

    fn at_statement_start(&self, i: usize) -> bool {
        let v = self.view;
        if i == 0 {
            return true;
        }
        let prev = v.text(i - 1);
        if matches!(prev, ";" | "{" | "}") {
            return true;
        }
        v.starts_line(i) && !CONTINUATION.contains(&prev)
    }

    /// Remove significant tokens `from..to` and whatever lies between them.
    fn remove(&mut self, from: usize, to: usize) {
        if to <= from {
            return;
        }
        let range = self.view.start(from)..self.view.end(to - 1);
        self.remove_span(from, to, range);
    }

    fn remove_with_leading_space(&mut self, from: usize, to: usize) {
        if to <= from {
            return;
        }
        let src = self.view.src;
        let mut start = self.view.start(from);
        while start > 0 && matches!(src.as_bytes()[start - 1], b' ' | b'\t') {
            start -= 1;
        }
        self.remove_span(from, to, start..self.view.end(to - 1));
    }

    /// Remove a whole statement. When it sits on its own line, the whole line
    /// goes.
    fn remove_statement(&mut self, first: usize, last: usize) {
        let v = self.view;
        let src = v.src.as_bytes();
        let mut start = v.start(first);
        let mut end = v.end(last);
        if v.starts_line(first) {
            let mut probe = end;
            while probe < src.len() && matches!(src[probe], b' ' | b'\t') {
                probe += 1;
            }
            if src.get(probe) == Some(&b'\r') {
                probe += 1;
            }
            if src.get(probe) == Some(&b'\n') {
                end = probe + 1;
                // The indentation goes with the line.
                start = v.src[..start].rfind('\n').map_or(0, |p| p + 1);
            }
        }
        self.remove_span(first, last + 1, start..end);
    }

    fn remove_span(&mut self, from: usize, to: usize, bytes: Range<usize>) {
        let to = to.min(self.dead.len());
        for dead in &mut self.dead[from.min(to)..to] {
            *dead = true;
        }
        if !bytes.is_empty() {
            self.removed.push(bytes);
        }
    }

    fn finish(mut self) -> String {
        let src = self.view.src;
        self.removed.sort_by_key(|r| r.start);
        let mut merged: Vec<Range<usize>> = Vec::with_capacity(self.removed.len());
        for range in self.removed {
            match merged.last_mut() {
                Some(last) if range.start <= last.end => last.end = last.end.max(range.end),
                _ => merged.push(range),
            }
        }

        let mut out = String::with_capacity(src.len());
        let mut pending = String::new();
        let mut touched = false;
        let mut cursor = 0;
        for token in &self.view.all {
            let mut pos = token.start;
            while cursor < merged.len() && merged[cursor].end <= pos {
                cursor += 1;
            }
            let mut r = cursor;
            while pos < token.end {
                match merged.get(r) {
                    Some(range) if range.start < token.end => {
                        if range.start > pos {
                            keep(&mut out, &mut pending, &mut touched, token.kind, &src[pos..range.start]);
                        }
                        touched = true;
                        pos = range.end.max(pos);
                        r += 1;
                    }
                    _ => {
                        keep(&mut out, &mut pending, &mut touched, token.kind, &src[pos..token.end]);
                        pos = token.end;
                    }
                }
            }
        }
        flush_whitespace(&mut out, &mut pending, touched);
        out
    }
}

fn keep(out: &mut String, pending: &mut String, touched: &mut bool, kind: TokenKind, text: &str) {
    if kind == TokenKind::Whitespace {
        pending.push_str(text);
    } else {
        flush_whitespace(out, pending, *touched);
        *touched = false;
        out.push_str(text);
    }
}

/// Emit buffered whitespace, collapsing three or more line breaks to one
/// blank line when a deletion produced the run.
fn flush_whitespace(out: &mut String, pending: &mut String, touched: bool) {
    if touched && pending.matches('\n').count() >= 3 {
        let indent = pending.rsplit('\n').next().unwrap_or("");
        out.push_str("\n\n");
        out.push_str(indent);
    } else {
        out.push_str(pending);
    }
    pending.clear();
}
