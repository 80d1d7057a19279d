use std::borrow::Cow;
use std::fmt;

use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};

/// Keys matched exactly rather than with `__icontains`
const EXACT_KEYS: &[&str] = &[
    "id",
    "counter",
    "host",
    "job",
    "page",
    "page_size",
    "order_by",
    "event",
    "event_level",
    "changed",
    "failed",
];

/// Comparison prefixes on values, longest first
const COMPARISONS: &[(&str, &str)] = &[(">=", "gte"), ("<=", "lte"), (">", "gt"), ("<", "lt")];

const NEGATION: &str = "not__";
const CONTAINS: &str = "__icontains";
const FREE_TEXT_KEY: &str = "search";

/// Characters escaped inside one `key:value` item of the URL array
const ITEM: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'_')
    .remove(b'-')
    .remove(b'.')
    .remove(b'~');

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QuerySetError {
    #[error("query set item `{0}` has no `:` separator")]
    MissingSeparator(String),

    #[error("query set item `{0}` is not valid UTF-8 after decoding")]
    InvalidEncoding(String),
}

/// Ordered multimap of REST filter parameters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QuerySet {
    params: Vec<(String, String)>,
}

impl QuerySet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_pairs<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            params: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    pub fn push(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.params.push((key.into(), value.into()));
    }

    pub fn contains(&self, key: &str, value: &str) -> bool {
        self.params.iter().any(|(k, v)| k == key && v == value)
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn remove_key(&mut self, key: &str) {
        self.params.retain(|(k, _)| k != key);
    }

    pub fn pairs(&self) -> impl Iterator<Item = (&str, &str)> {
        self.params.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    /// `application/x-www-form-urlencoded` form for the REST querystring
    pub fn to_query_string(&self) -> String {
        url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(self.pairs())
            .finish()
    }
}

impl fmt::Display for QuerySet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_query_string())
    }
}

/// Split free-text input into terms. Whitespace separates terms; double
/// quotes group words and are dropped.
pub fn split_search_terms(input: &str) -> Vec<String> {
    let mut terms = Vec::new();
    let mut current = String::new();
    let mut quoted = false;

    for c in input.chars() {
        match c {
            '"' => quoted = !quoted,
            c if c.is_whitespace() && !quoted => {
                if !current.is_empty() {
                    terms.push(std::mem::take(&mut current));
                }
            }
            c => current.push(c),
        }
    }
    if !current.is_empty() {
        terms.push(current);
    }

    terms
}

/// Filter pair for a single search term
pub fn term_to_param(term: &str) -> (String, String) {
    let Some((raw_key, value)) = term.split_once(':') else {
        return (FREE_TEXT_KEY.to_string(), term.to_string());
    };

    let (negated, key) = match raw_key.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, raw_key),
    };

    let (key, value) = if key.contains("__") {
        (key.to_string(), value.to_string())
    } else if let Some((lookup, rest)) = COMPARISONS
        .iter()
        .find_map(|(op, lookup)| value.strip_prefix(op).map(|rest| (*lookup, rest)))
    {
        (format!("{key}__{lookup}"), rest.to_string())
    } else if EXACT_KEYS.contains(&key) {
        (key.to_string(), value.to_string())
    } else {
        (format!("{key}{CONTAINS}"), value.to_string())
    };

    if negated {
        (format!("{NEGATION}{key}"), value)
    } else {
        (key, value)
    }
}

/// Parse the search box contents into a query set
pub fn search_input_queryset(input: &str) -> QuerySet {
    QuerySet::from_pairs(split_search_terms(input).iter().map(|t| term_to_param(t)))
}

/// Render one filter pair as the tag a user would have typed. Values with
/// whitespace are quoted so the tag parses back into the same pair.
pub fn param_to_tag(key: &str, value: &str) -> String {
    let value = quote_value(value);
    if key == FREE_TEXT_KEY {
        return value.into_owned();
    }
    if let Some(rest) = key.strip_prefix(NEGATION) {
        return format!("-{}", param_to_tag(rest, unquoted(&value)));
    }
    if let Some(base) = key.strip_suffix(CONTAINS) {
        return format!("{base}:{value}");
    }
    for (op, lookup) in COMPARISONS {
        if let Some(base) = key.strip_suffix(&format!("__{lookup}")) {
            return format!("{base}:{op}{value}");
        }
    }
    format!("{key}:{value}")
}

fn quote_value(value: &str) -> Cow<'_, str> {
    if value.contains(char::is_whitespace) {
        Cow::Owned(format!("\"{value}\""))
    } else {
        Cow::Borrowed(value)
    }
}

fn unquoted(value: &str) -> &str {
    value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .unwrap_or(value)
}

pub fn create_search_tags(queryset: &QuerySet) -> Vec<String> {
    queryset.pairs().map(|(k, v)| param_to_tag(k, v)).collect()
}

/// Add the input's pairs to the active query set. Pairs already present
/// are not duplicated, and paging restarts from the first page.
pub fn merge_queryset(current: &QuerySet, input: &QuerySet) -> QuerySet {
    let mut merged = current.clone();
    for (key, value) in input.pairs() {
        if !merged.contains(key, value) {
            merged.push(key, value);
        }
    }
    merged.remove_key("page");
    merged
}

/// Remove every filter pair the given tag stands for. A pair goes when it
/// renders to the tag or when the tag, typed as input, parses to it.
pub fn remove_terms_from_queryset(queryset: &QuerySet, tag: &str) -> QuerySet {
    let removed = search_input_queryset(tag);
    QuerySet {
        params: queryset
            .params
            .iter()
            .filter(|(k, v)| param_to_tag(k, v) != tag && !removed.contains(k, v))
            .cloned()
            .collect(),
    }
}

/// Pack a query set into the URL array parameter
pub fn encode_arr(queryset: &QuerySet) -> Vec<String> {
    queryset
        .pairs()
        .map(|(k, v)| format!("{}:{}", utf8_percent_encode(k, ITEM), utf8_percent_encode(v, ITEM)))
        .collect()
}

/// Unpack the URL array parameter
pub fn decode_arr<S: AsRef<str>>(items: &[S]) -> Result<QuerySet, QuerySetError> {
    let mut queryset = QuerySet::new();
    for item in items {
        let item = item.as_ref();
        let (key, value) = item
            .split_once(':')
            .ok_or_else(|| QuerySetError::MissingSeparator(item.to_string()))?;
        queryset.push(decode_part(item, key)?, decode_part(item, value)?);
    }
    Ok(queryset)
}

fn decode_part(item: &str, part: &str) -> Result<String, QuerySetError> {
    percent_decode_str(part)
        .decode_utf8()
        .map(Cow::into_owned)
        .map_err(|_| QuerySetError::InvalidEncoding(item.to_string()))
}
