//! Minimal lexing of stored `CREATE TABLE` text, enough to rewrite one
//! column definition and keep everything else byte for byte.

/// Column change applied during a table rebuild.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColumnChange {
    /// Replace the default; `None` removes it.
    Default(Option<String>),
    /// Enforce (`true`) or drop (`false`) NOT NULL.
    NotNull(bool),
}

/// A `CREATE TABLE` statement split at its top-level parentheses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableDdl<'a> {
    /// Column and table-constraint definitions, trimmed.
    pub definitions: Vec<&'a str>,
    /// Text after the closing parenthesis, e.g. `WITHOUT ROWID`.
    pub suffix: &'a str,
}

const TABLE_CONSTRAINTS: &[&str] = &["CONSTRAINT", "PRIMARY", "UNIQUE", "CHECK", "FOREIGN"];

/// Byte index just past the quoted run or comment starting at `i`, if one does.
fn skip_opaque(sql: &[u8], i: usize) -> Option<usize> {
    let close = match sql[i] {
        b'\'' => b'\'',
        b'"' => b'"',
        b'`' => b'`',
        b'[' => b']',
        b'-' if sql.get(i + 1) == Some(&b'-') => {
            let end = sql[i..].iter().position(|&c| c == b'\n').map_or(sql.len(), |p| i + p + 1);
            return Some(end);
        }
        b'/' if sql.get(i + 1) == Some(&b'*') => {
            let end = sql[i + 2..]
                .windows(2)
                .position(|w| w == b"*/")
                .map_or(sql.len(), |p| i + 2 + p + 2);
            return Some(end);
        }
        _ => return None,
    };
    let mut j = i + 1;
    while j < sql.len() {
        if sql[j] == close {
            // Doubled quote characters escape themselves.
            if close != b']' && sql.get(j + 1) == Some(&close) {
                j += 2;
                continue;
            }
            return Some(j + 1);
        }
        j += 1;
    }
    Some(sql.len())
}

/// Split `sql` into its parenthesized definitions and trailing options.
pub fn split_create_table(sql: &str) -> Option<TableDdl<'_>> {
    let bytes = sql.as_bytes();
    let mut depth = 0usize;
    let mut start = 0;
    let mut definitions = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        if let Some(next) = skip_opaque(bytes, i) {
            i = next;
            continue;
        }
        match bytes[i] {
            b'(' => {
                depth += 1;
                if depth == 1 {
                    start = i + 1;
                }
            }
            b')' if depth > 0 => {
                depth -= 1;
                if depth == 0 {
                    definitions.push(sql[start..i].trim());
                    return Some(TableDdl {
                        definitions,
                        suffix: sql[i + 1..].trim(),
                    });
                }
            }
            b',' if depth == 1 => {
                definitions.push(sql[start..i].trim());
                start = i + 1;
            }
            _ => {}
        }
        i += 1;
    }
    None
}

/// Word, quoted name, or parenthesized group inside one definition.
fn tokens(def: &str) -> Vec<(usize, usize)> {
    let bytes = def.as_bytes();
    let mut out = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i].is_ascii_whitespace() {
            i += 1;
            continue;
        }
        let is_comment = matches!(
            (bytes[i], bytes.get(i + 1)),
            (b'-', Some(b'-')) | (b'/', Some(b'*'))
        );
        if let Some(next) = skip_opaque(bytes, i) {
            if !is_comment {
                out.push((i, next));
            }
            i = next;
            continue;
        }
        if bytes[i] == b'(' {
            let mut depth = 0usize;
            let mut j = i;
            while j < bytes.len() {
                if let Some(next) = skip_opaque(bytes, j) {
                    j = next;
                    continue;
                }
                match bytes[j] {
                    b'(' => depth += 1,
                    b')' => {
                        depth -= 1;
                        if depth == 0 {
                            j += 1;
                            break;
                        }
                    }
                    _ => {}
                }
                j += 1;
            }
            out.push((i, j));
            i = j;
            continue;
        }
        let start = i;
        while i < bytes.len()
            && !bytes[i].is_ascii_whitespace()
            && !matches!(bytes[i], b'(' | b'\'' | b'"' | b'`' | b'[')
        {
            i += 1;
        }
        out.push((start, i));
    }
    out
}

/// Identifier text with its quoting removed.
pub fn unquote(name: &str) -> String {
    let inner = |q: char| {
        name[1..name.len() - 1].replace(&format!("{q}{q}"), &q.to_string())
    };
    match name.chars().next() {
        Some('"') if name.len() >= 2 => inner('"'),
        Some('`') if name.len() >= 2 => inner('`'),
        Some('[') if name.len() >= 2 => name[1..name.len() - 1].to_string(),
        _ => name.to_string(),
    }
}

/// Name of the column `def` declares, or `None` for a table constraint.
pub fn column_name(def: &str) -> Option<String> {
    let &(start, end) = tokens(def).first()?;
    let first = &def[start..end];
    if TABLE_CONSTRAINTS.iter().any(|k| first.eq_ignore_ascii_case(k)) {
        return None;
    }
    Some(unquote(first))
}

/// Rewrite one column definition, leaving its other constraints untouched.
pub fn rewrite_column(def: &str, change: &ColumnChange) -> String {
    let toks = tokens(def);
    let word = |k: usize| toks.get(k).map(|&(s, e)| &def[s..e]);
    let is = |k: usize, kw: &str| word(k).is_some_and(|w| w.eq_ignore_ascii_case(kw));

    let mut drop = vec![false; toks.len()];
    // Skip the column name and start at its constraints.
    let mut k = 1;
    while k < toks.len() {
        if is(k, "DEFAULT") {
            let mut width = 2;
            if word(k + 1).is_some_and(|w| w == "+" || w == "-") {
                width = 3;
            }
            if matches!(change, ColumnChange::Default(_)) {
                mark(&mut drop, k, width, is(k.wrapping_sub(2), "CONSTRAINT"));
            }
            k += width;
            continue;
        }
        let not_null = is(k, "NOT") && is(k + 1, "NULL");
        let null = is(k, "NULL");
        if (not_null || null) && matches!(change, ColumnChange::NotNull(_)) {
            let mut width = if not_null { 2 } else { 1 };
            if is(k + width, "ON") && is(k + width + 1, "CONFLICT") {
                width += 3;
            }
            mark(&mut drop, k, width, is(k.wrapping_sub(2), "CONSTRAINT"));
            k += width;
            continue;
        }
        k += 1;
    }

    let mut out = String::with_capacity(def.len() + 24);
    let mut last = 0;
    let mut prev_end = 0;
    for (idx, &(start, end)) in toks.iter().enumerate() {
        if drop[idx] {
            out.push_str(&def[last..prev_end]);
            last = end;
        }
        prev_end = end;
    }
    out.push_str(&def[last..]);

    match change {
        ColumnChange::Default(Some(expr)) => out.push_str(&format!(" DEFAULT ({expr})")),
        ColumnChange::NotNull(true) => out.push_str(" NOT NULL"),
        ColumnChange::Default(None) | ColumnChange::NotNull(false) => {}
    }
    out
}

/// Mark `width` tokens from `at`, plus a `CONSTRAINT <name>` prefix if present.
fn mark(drop: &mut [bool], at: usize, width: usize, named: bool) {
    let from = if named { at - 2 } else { at };
    for flag in drop.iter_mut().take(at + width).skip(from) {
        *flag = true;
    }
}

/// Reassemble a `CREATE TABLE` for `table` from `definitions` and `suffix`.
pub fn create_table(table: &str, definitions: &[String], suffix: &str) -> String {
    let mut sql = format!("CREATE TABLE {table} ({})", definitions.join(", "));
    if !suffix.is_empty() {
        sql.push(' ');
        sql.push_str(suffix);
    }
    sql
}
