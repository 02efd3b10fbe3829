//! Host CPU set expressions.
//!
//! Pinning options are written as comma-separated lists of CPU ids and
//! inclusive ranges, with `^` marking exclusions: `"0-7,^3,12"`.
//! Exclusions apply after every inclusion regardless of their position.

use std::collections::BTreeSet;

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CpuSetError {
    #[error("invalid cpu set token {token:?} in {spec:?}")]
    InvalidToken { spec: String, token: String },

    #[error("invalid cpu range {start}-{end} in {spec:?}")]
    InvalidRange { spec: String, start: u32, end: u32 },

    #[error("cpu set {0:?} selects no cpus")]
    Empty(String),
}

/// Parse a cpu set expression into the set of selected CPU ids.
pub fn parse_cpu_spec(spec: &str) -> Result<BTreeSet<u32>, CpuSetError> {
    let mut included = BTreeSet::new();
    let mut excluded = BTreeSet::new();

    for raw in spec.split(',') {
        let token = raw.trim();
        if token.is_empty() {
            continue;
        }
        let (target, body) = match token.strip_prefix('^') {
            Some(rest) => (&mut excluded, rest.trim()),
            None => (&mut included, token),
        };
        match body.split_once('-') {
            Some((start, end)) => {
                let start = parse_id(spec, token, start)?;
                let end = parse_id(spec, token, end)?;
                if start > end {
                    return Err(CpuSetError::InvalidRange {
                        spec: spec.to_string(),
                        start,
                        end,
                    });
                }
                target.extend(start..=end);
            }
            None => {
                target.insert(parse_id(spec, token, body)?);
            }
        }
    }

    let selected: BTreeSet<u32> = included.difference(&excluded).copied().collect();
    if selected.is_empty() {
        return Err(CpuSetError::Empty(spec.to_string()));
    }
    Ok(selected)
}

fn parse_id(spec: &str, token: &str, value: &str) -> Result<u32, CpuSetError> {
    value.trim().parse().map_err(|_| CpuSetError::InvalidToken {
        spec: spec.to_string(),
        token: token.to_string(),
    })
}

/// Render a set of CPU ids in the compact range form accepted by
/// [`parse_cpu_spec`].
pub fn format_cpu_spec(cpus: &BTreeSet<u32>) -> String {
    let mut parts: Vec<String> = Vec::new();
    let mut iter = cpus.iter().copied().peekable();
    while let Some(start) = iter.next() {
        let mut end = start;
        while iter.peek() == Some(&(end + 1)) {
            end += 1;
            iter.next();
        }
        if start == end {
            parts.push(start.to_string());
        } else {
            parts.push(format!("{start}-{end}"));
        }
    }
    parts.join(",")
}
