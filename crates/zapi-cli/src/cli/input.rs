//! Input files: plain URL lists or JSON Lines queries.

use anyhow::{bail, Context, Result};
use clap::ValueEnum;
use rand::seq::SliceRandom;
use serde_json::{Map, Value};
use std::fs;
use std::path::Path;
use zapi_core::query::{Query, ECHO_DATA};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum InputType {
    /// One URL per line.
    Txt,
    /// One JSON query object per line.
    Jl,
}

/// Guess the input type from the file extension, then from the first line.
pub fn guess_intype(path: &Path, first_line: &str) -> InputType {
    match path.extension().and_then(|e| e.to_str()) {
        Some("jl" | "jsonl") => return InputType::Jl,
        Some("txt") => return InputType::Txt,
        _ => {}
    }
    if first_line.trim_start().starts_with('{') {
        InputType::Jl
    } else {
        InputType::Txt
    }
}

/// Parses input text into queries. Blank lines are skipped; every query
/// gets `echoData` set to its URL unless it already has one.
pub fn parse_queries(text: &str, path: &Path, intype: Option<InputType>) -> Result<Vec<Query>> {
    let Some(first) = text.lines().next() else {
        return Ok(Vec::new());
    };
    let intype = intype.unwrap_or_else(|| guess_intype(path, first));

    let mut queries = Vec::new();
    for (n, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let mut fields = match intype {
            InputType::Txt => {
                let mut fields = Map::new();
                fields.insert("url".to_string(), Value::String(line.to_string()));
                fields.insert("browserHtml".to_string(), Value::Bool(true));
                fields
            }
            InputType::Jl => match serde_json::from_str::<Value>(line)
                .with_context(|| format!("line {}: invalid JSON", n + 1))?
            {
                Value::Object(fields) => fields,
                _ => bail!("line {}: query must be a JSON object", n + 1),
            },
        };
        if !fields.contains_key(ECHO_DATA) {
            let url = fields.get("url").cloned().unwrap_or(Value::Null);
            fields.insert(ECHO_DATA.to_string(), url);
        }
        queries.push(Query::new(fields));
    }
    Ok(queries)
}

/// Reads the input file. An input without queries is an error.
pub fn read_input(path: &Path, intype: Option<InputType>) -> Result<Vec<Query>> {
    let text = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let queries = parse_queries(&text, path, intype)?;
    if queries.is_empty() {
        bail!("No input queries found. Is the input file empty?");
    }
    Ok(queries)
}

/// Optionally shuffles, then truncates to `limit` (0 means no limit).
pub fn prepare(mut queries: Vec<Query>, shuffle: bool, limit: Option<usize>) -> Vec<Query> {
    if shuffle {
        queries.shuffle(&mut rand::rng());
    }
    if let Some(limit) = limit.filter(|&n| n > 0) {
        queries.truncate(limit);
    }
    queries
}
