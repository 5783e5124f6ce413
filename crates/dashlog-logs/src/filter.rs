use chrono::{DateTime, Utc};
use regex::{Regex, RegexBuilder};
use std::collections::HashSet;

use dashlog_types::{LogFilter, LogLevel, ParsedLogEntry, SearchOptions};

use crate::error::LogError;

/// Compiled form of a `LogFilter`
#[derive(Clone)]
pub struct CompiledFilter {
    /// Exact level; wins over `levels`
    level: Option<LogLevel>,

    /// Any-of levels (empty = all)
    levels: HashSet<LogLevel>,

    component: Option<String>,

    operation_id: Option<String>,

    start_time: Option<DateTime<Utc>>,

    end_time: Option<DateTime<Utc>>,

    /// Lower-cased search text
    search: Option<String>,

    regex: Option<Regex>,
}

impl CompiledFilter {
    /// Compile a filter, validating its regular expression
    pub fn new(filter: &LogFilter) -> Result<Self, LogError> {
        let regex = match &filter.pattern {
            Some(pattern) if !pattern.is_empty() => {
                Some(Regex::new(pattern).map_err(|source| LogError::InvalidPattern {
                    pattern: pattern.clone(),
                    source,
                })?)
            }
            _ => None,
        };

        Ok(Self {
            level: filter.level,
            levels: filter.levels.iter().copied().collect(),
            component: filter.component.clone(),
            operation_id: filter.operation_id.clone(),
            start_time: filter.start_time,
            end_time: filter.end_time,
            search: filter
                .search
                .as_ref()
                .filter(|s| !s.is_empty())
                .map(|s| s.to_lowercase()),
            regex,
        })
    }

    /// Check if a log entry passes every active predicate
    pub fn matches(&self, entry: &ParsedLogEntry) -> bool {
        // Exact level takes precedence over the any-of set
        if let Some(level) = self.level {
            if entry.level != level {
                return false;
            }
        } else if !self.levels.is_empty() && !self.levels.contains(&entry.level) {
            return false;
        }

        if let Some(component) = &self.component {
            if entry.component.as_ref() != Some(component) {
                return false;
            }
        }

        if let Some(operation_id) = &self.operation_id {
            if entry.operation_id.as_ref() != Some(operation_id) {
                return false;
            }
        }

        if self.start_time.is_some_and(|start| entry.timestamp < start) {
            return false;
        }
        if self.end_time.is_some_and(|end| entry.timestamp > end) {
            return false;
        }

        if let Some(search) = &self.search {
            let in_message = entry.message.to_lowercase().contains(search);
            let in_component = entry.component_str().to_lowercase().contains(search);
            if !in_message && !in_component {
                return false;
            }
        }

        if let Some(re) = &self.regex {
            if !re.is_match(&entry.message) && !re.is_match(entry.component_str()) {
                return false;
            }
        }

        true
    }

    /// Check if filter is empty (matches everything)
    pub fn is_empty(&self) -> bool {
        self.level.is_none()
            && self.levels.is_empty()
            && self.component.is_none()
            && self.operation_id.is_none()
            && self.start_time.is_none()
            && self.end_time.is_none()
            && self.search.is_none()
            && self.regex.is_none()
    }
}

impl std::fmt::Debug for CompiledFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledFilter")
            .field("level", &self.level)
            .field("levels", &self.levels)
            .field("component", &self.component)
            .field("operation_id", &self.operation_id)
            .field("search", &self.search)
            .field("regex", &self.regex.as_ref().map(Regex::as_str))
            .finish()
    }
}

/// What to search for
#[derive(Clone, Debug)]
pub enum SearchPattern {
    /// Escaped and matched literally
    Literal(String),
    /// Used as-is; `case_sensitive` does not apply
    Regex(Regex),
}

impl From<&str> for SearchPattern {
    fn from(s: &str) -> Self {
        Self::Literal(s.to_string())
    }
}

impl From<String> for SearchPattern {
    fn from(s: String) -> Self {
        Self::Literal(s)
    }
}

impl From<Regex> for SearchPattern {
    fn from(re: Regex) -> Self {
        Self::Regex(re)
    }
}

/// Compiled search over message, component and optionally metadata
#[derive(Clone, Debug)]
pub struct Searcher {
    regex: Regex,
    include_metadata: bool,
}

impl Searcher {
    pub fn new(pattern: SearchPattern, options: &SearchOptions) -> Result<Self, LogError> {
        let regex = match pattern {
            SearchPattern::Regex(re) => re,
            SearchPattern::Literal(text) => RegexBuilder::new(&regex::escape(&text))
                .case_insensitive(!options.case_sensitive)
                .build()
                .map_err(|source| LogError::InvalidPattern {
                    pattern: text,
                    source,
                })?,
        };

        Ok(Self {
            regex,
            include_metadata: options.include_metadata,
        })
    }

    pub fn matches(&self, entry: &ParsedLogEntry) -> bool {
        if self.regex.is_match(&entry.message) {
            return true;
        }

        if let Some(component) = &entry.component {
            if self.regex.is_match(component) {
                return true;
            }
        }

        if self.include_metadata {
            if let Some(metadata) = &entry.metadata {
                if let Ok(json) = serde_json::to_string(metadata) {
                    return self.regex.is_match(&json);
                }
            }
        }

        false
    }
}
