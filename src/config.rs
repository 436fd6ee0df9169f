//! Configuration-string parsing.
//!
//! Parses the subset of WiredTiger's nested `key=value,key=(sub=value,...)`
//! grammar this engine actually consumes: `cache_size`, `eviction=(...)`,
//! `checkpoint=(...)`, `allocation_size`, `leaf_page_max`,
//! `internal_page_max`, `isolation`, `in_memory`.

use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::txn::transaction::Isolation;

/// A parsed top-level config string, plus any nested `(...)` groups kept as
/// raw text for the owning module to reparse (e.g. `eviction=(...)`).
#[derive(Debug, Clone, Default)]
pub struct ConfigMap {
    values: HashMap<String, String>,
}

impl ConfigMap {
    /// Parses `key=value,key2=(a=1,b=2),key3` — flags with no `=value` are
    /// recorded with an empty string value.
    pub fn parse(input: &str) -> Result<Self> {
        let mut values = HashMap::new();
        let mut chars = input.char_indices().peekable();
        let mut key_start = 0usize;
        let mut depth = 0i32;

        let mut tokens: Vec<(String, String)> = Vec::new();
        let mut cur_key: Option<String> = None;
        let mut cur_val_start: Option<usize> = None;

        while let Some(&(i, c)) = chars.peek() {
            match c {
                '(' => {
                    depth += 1;
                    chars.next();
                }
                ')' => {
                    depth -= 1;
                    if depth < 0 {
                        return Err(Error::InvalidArgument("unbalanced parentheses in config string".into()));
                    }
                    chars.next();
                }
                '=' if depth == 0 && cur_key.is_none() => {
                    cur_key = Some(input[key_start..i].trim().to_string());
                    cur_val_start = Some(i + 1);
                    chars.next();
                }
                ',' if depth == 0 => {
                    push_token(&mut tokens, input, key_start, i, &mut cur_key, cur_val_start);
                    chars.next();
                    key_start = i + 1;
                }
                _ => {
                    chars.next();
                }
            }
        }
        if depth != 0 {
            return Err(Error::InvalidArgument("unbalanced parentheses in config string".into()));
        }
        push_token(&mut tokens, input, key_start, input.len(), &mut cur_key, cur_val_start);

        for (k, v) in tokens {
            if k.is_empty() {
                continue;
            }
            values.insert(k, v);
        }
        Ok(Self { values })
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(|s| s.as_str())
    }

    pub fn get_u64(&self, key: &str) -> Result<Option<u64>> {
        match self.values.get(key) {
            Some(v) => v
                .trim()
                .parse()
                .map(Some)
                .map_err(|_| Error::InvalidArgument(format!("{key} is not a valid integer"))),
            None => Ok(None),
        }
    }

    pub fn get_bool(&self, key: &str) -> Result<Option<bool>> {
        match self.values.get(key).map(|s| s.trim()) {
            Some("true") | Some("") => Ok(Some(true)),
            Some("false") => Ok(Some(false)),
            Some(other) => Err(Error::InvalidArgument(format!("{key} expects true/false, got {other}"))),
            None => Ok(None),
        }
    }

    /// Reparses a nested group's raw text (e.g. the value of `eviction=(...)`).
    pub fn sub(&self, key: &str) -> Result<ConfigMap> {
        match self.values.get(key) {
            Some(v) => {
                let inner = v.trim().strip_prefix('(').and_then(|s| s.strip_suffix(')')).unwrap_or(v.trim());
                ConfigMap::parse(inner)
            }
            None => Ok(ConfigMap::default()),
        }
    }
}

fn push_token(
    tokens: &mut Vec<(String, String)>,
    input: &str,
    key_start: usize,
    end: usize,
    cur_key: &mut Option<String>,
    cur_val_start: Option<usize>,
) {
    match cur_key.take() {
        Some(k) => {
            let v = input[cur_val_start.unwrap_or(end)..end].trim().to_string();
            tokens.push((k, v));
        }
        None => {
            let k = input[key_start..end].trim().to_string();
            tokens.push((k, String::new()));
        }
    }
}

/// Fully-resolved engine configuration, built by applying a [`ConfigMap`]
/// over these defaults.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub cache_size: u64,
    pub allocation_size: u64,
    pub leaf_page_max: u64,
    pub internal_page_max: u64,
    pub isolation: Isolation,
    pub in_memory: bool,
    pub eviction_workers: u64,
    pub checkpoint_wait_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cache_size: 100 * 1024 * 1024,
            allocation_size: 4096,
            leaf_page_max: 32 * 1024,
            internal_page_max: 4 * 1024,
            isolation: Isolation::Snapshot,
            in_memory: false,
            eviction_workers: 4,
            checkpoint_wait_secs: 0,
        }
    }
}

impl EngineConfig {
    pub fn from_str_config(input: &str) -> Result<Self> {
        let map = ConfigMap::parse(input)?;
        let mut cfg = EngineConfig::default();

        if let Some(v) = map.get_u64("cache_size")? {
            cfg.cache_size = v;
        }
        if let Some(v) = map.get_u64("allocation_size")? {
            cfg.allocation_size = v;
        }
        if let Some(v) = map.get_u64("leaf_page_max")? {
            cfg.leaf_page_max = v;
        }
        if let Some(v) = map.get_u64("internal_page_max")? {
            cfg.internal_page_max = v;
        }
        if let Some(v) = map.get_bool("in_memory")? {
            cfg.in_memory = v;
        }
        if let Some(v) = map.get("isolation") {
            cfg.isolation = match v {
                "read-uncommitted" => Isolation::ReadUncommitted,
                "read-committed" => Isolation::ReadCommitted,
                "snapshot" => Isolation::Snapshot,
                other => return Err(Error::InvalidArgument(format!("unknown isolation level: {other}"))),
            };
        }
        if map.get("eviction").is_some() {
            let eviction = map.sub("eviction")?;
            if let Some(v) = eviction.get_u64("threads_max")? {
                cfg.eviction_workers = v;
            }
        }
        if map.get("checkpoint").is_some() {
            let checkpoint = map.sub("checkpoint")?;
            if let Some(v) = checkpoint.get_u64("wait")? {
                cfg.checkpoint_wait_secs = v;
            }
        }
        Ok(cfg)
    }
}
