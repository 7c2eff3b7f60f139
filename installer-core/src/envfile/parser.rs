// Dotenv reader. Reverses `builder::serialize` exactly and accepts the usual hand-edited forms
// (`export` prefix, single quotes, trailing comments, quoted values spanning several lines).

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("line {line}: {message}")]
pub struct ParseError {
    pub line: usize,
    pub message: String,
}

/// Parsed artifact. Keeps file order; on duplicate keys the first definition wins.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvFile {
    entries: Vec<(String, String)>,
}

impl EnvFile {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

fn valid_key(key: &str) -> bool {
    let mut chars = key.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.')
}

fn only_comment_left(rest: &str) -> bool {
    let rest = rest.trim_start();
    rest.is_empty() || rest.starts_with('#')
}

/// `Ok(None)`: the closing quote is not in `body` yet.
fn parse_double_quoted(body: &str) -> Result<Option<String>, String> {
    let mut out = String::with_capacity(body.len());
    let mut chars = body.char_indices();
    while let Some((i, c)) = chars.next() {
        match c {
            '"' => {
                if !only_comment_left(&body[i + 1..]) {
                    return Err("unexpected text after closing quote".to_string());
                }
                return Ok(Some(out));
            }
            '\\' => match chars.next() {
                Some((_, 'n')) => out.push('\n'),
                Some((_, 'r')) => out.push('\r'),
                Some((_, '\\')) => out.push('\\'),
                Some((_, '"')) => out.push('"'),
                Some((_, '$')) => out.push('$'),
                Some((_, other)) => {
                    out.push('\\');
                    out.push(other);
                }
                None => break,
            },
            other => out.push(other),
        }
    }
    Ok(None)
}

fn parse_single_quoted(body: &str) -> Result<Option<String>, String> {
    match body.find('\'') {
        Some(end) if only_comment_left(&body[end + 1..]) => Ok(Some(body[..end].to_string())),
        Some(_) => Err("unexpected text after closing quote".to_string()),
        None => Ok(None),
    }
}

fn parse_bare(raw: &str) -> String {
    // An inline comment starts at whitespace followed by '#'.
    let mut cut = raw.len();
    let bytes = raw.as_bytes();
    for i in 1..bytes.len() {
        if bytes[i] == b'#' && (bytes[i - 1] == b' ' || bytes[i - 1] == b'\t') {
            cut = i;
            break;
        }
    }
    raw[..cut].trim().to_string()
}

/// Quote style of a value, for continuation handling and error messages.
fn quote_of(raw: &str) -> Option<&'static str> {
    match raw.trim_start().chars().next() {
        Some('"') => Some("double"),
        Some('\'') => Some("single"),
        _ => None,
    }
}

fn parse_value(raw: &str) -> Result<Option<String>, String> {
    let raw = raw.trim_start();
    if let Some(body) = raw.strip_prefix('"') {
        parse_double_quoted(body)
    } else if let Some(body) = raw.strip_prefix('\'') {
        parse_single_quoted(body)
    } else {
        Ok(Some(parse_bare(raw)))
    }
}

pub fn parse(text: &str) -> Result<EnvFile, ParseError> {
    let mut file = EnvFile::default();
    let mut lines = text.lines().enumerate();
    while let Some((idx, line)) = lines.next() {
        let line_no = idx + 1;
        let trimmed = line.trim_start();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let trimmed = trimmed
            .strip_prefix("export ")
            .map(str::trim_start)
            .unwrap_or(trimmed);

        let (key, raw_value) = trimmed.split_once('=').ok_or_else(|| ParseError {
            line: line_no,
            message: "expected KEY=value".to_string(),
        })?;
        let key = key.trim();
        if !valid_key(key) {
            return Err(ParseError {
                line: line_no,
                message: format!("invalid key '{}'", key),
            });
        }

        // A quoted value may continue on the following lines until its closing quote.
        let mut raw = raw_value.to_string();
        let value = loop {
            let parsed = parse_value(&raw).map_err(|message| ParseError {
                line: line_no,
                message: format!("{} for key '{}'", message, key),
            })?;
            if let Some(value) = parsed {
                break value;
            }
            match lines.next() {
                Some((_, next)) => {
                    raw.push('\n');
                    raw.push_str(next);
                }
                None => {
                    return Err(ParseError {
                        line: line_no,
                        message: format!(
                            "unterminated {}-quoted value for key '{}'",
                            quote_of(&raw).unwrap_or("double"),
                            key
                        ),
                    })
                }
            }
        };

        if file.get(key).is_none() {
            file.entries.push((key.to_string(), value));
        }
    }
    Ok(file)
}
