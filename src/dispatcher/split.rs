//! Splits a simple-query batch into individual statements, respecting
//! single/double-quoted strings and dollar-quoted bodies so a semicolon
//! inside a literal never splits the batch (spec §4.4).

/// Splits `sql` on top-level semicolons. A statement that isn't terminated
/// by a trailing `;` is still returned (spec's open question (i): prefer
/// tolerant parsing over requiring the terminator).
pub fn split_statements(sql: &str) -> Vec<String> {
    let mut statements = Vec::new();
    let mut current = String::new();
    let chars: Vec<char> = sql.chars().collect();
    let mut i = 0;
    let mut in_single_quote = false;
    let mut in_double_quote = false;
    let mut dollar_tag: Option<String> = None;

    while i < chars.len() {
        let c = chars[i];

        if let Some(tag) = &dollar_tag {
            current.push(c);
            if c == '$' {
                let candidate: String = chars[i..].iter().take(tag.len()).collect();
                if candidate == *tag {
                    current.extend(chars[i + 1..i + tag.len()].iter());
                    i += tag.len();
                    dollar_tag = None;
                    continue;
                }
            }
            i += 1;
            continue;
        }

        if in_single_quote {
            current.push(c);
            if c == '\'' {
                in_single_quote = false;
            }
            i += 1;
            continue;
        }

        if in_double_quote {
            current.push(c);
            if c == '"' {
                in_double_quote = false;
            }
            i += 1;
            continue;
        }

        match c {
            '\'' => {
                in_single_quote = true;
                current.push(c);
                i += 1;
            }
            '"' => {
                in_double_quote = true;
                current.push(c);
                i += 1;
            }
            '$' => {
                if let Some(tag) = try_dollar_tag(&chars, i) {
                    current.push_str(&tag);
                    i += tag.len();
                    dollar_tag = Some(tag);
                } else {
                    current.push(c);
                    i += 1;
                }
            }
            ';' => {
                statements.push(current.trim().to_string());
                current.clear();
                i += 1;
            }
            _ => {
                current.push(c);
                i += 1;
            }
        }
    }

    let tail = current.trim();
    if !tail.is_empty() {
        statements.push(tail.to_string());
    }
    statements
}

/// Recognises a dollar-quote tag (`$$` or `$tag$`) starting at `i`, if any.
fn try_dollar_tag(chars: &[char], i: usize) -> Option<String> {
    let mut j = i + 1;
    while j < chars.len() && (chars[j].is_ascii_alphanumeric() || chars[j] == '_') {
        j += 1;
    }
    if j < chars.len() && chars[j] == '$' {
        Some(chars[i..=j].iter().collect())
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_simple_batch() {
        let statements = split_statements("SELECT 1; SELECT 2;");
        assert_eq!(statements, vec!["SELECT 1", "SELECT 2"]);
    }

    #[test]
    fn semicolon_inside_string_literal_does_not_split() {
        let statements = split_statements("SELECT 'a;b'; SELECT 2;");
        assert_eq!(statements, vec!["SELECT 'a;b'", "SELECT 2"]);
    }

    #[test]
    fn missing_trailing_semicolon_still_yields_statement() {
        let statements = split_statements("SELECT 1");
        assert_eq!(statements, vec!["SELECT 1"]);
    }

    #[test]
    fn dollar_quoted_body_is_not_split() {
        let statements = split_statements("SELECT $tag$a;b$tag$; SELECT 2;");
        assert_eq!(statements, vec!["SELECT $tag$a;b$tag$", "SELECT 2"]);
    }

    #[test]
    fn empty_query_yields_no_statements() {
        assert!(split_statements("").is_empty());
        assert!(split_statements("   ").is_empty());
    }
}
