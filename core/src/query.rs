//! Search query parameters.
//!
//! A `Query` is an ordered bag of string parameters serialized as a URL query
//! string. Values are opaque to the client; only a handful of common
//! parameters get typed setters.

use std::collections::BTreeMap;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Query {
    params: BTreeMap<String, String>,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    /// A query for full-text `text`.
    pub fn with_text(text: impl Into<String>) -> Self {
        let mut query = Self::new();
        query.set("query", text);
        query
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.params.remove(key)
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    pub fn query(&mut self, text: impl Into<String>) -> &mut Self {
        self.set("query", text)
    }

    pub fn page(&mut self, page: u32) -> &mut Self {
        self.set("page", page.to_string())
    }

    pub fn hits_per_page(&mut self, hits: u32) -> &mut Self {
        self.set("hitsPerPage", hits.to_string())
    }

    pub fn attributes_to_retrieve<I, S>(&mut self, attributes: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.set("attributesToRetrieve", join(attributes))
    }

    pub fn facets<I, S>(&mut self, facets: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.set("facets", join(facets))
    }

    pub fn filters(&mut self, filters: impl Into<String>) -> &mut Self {
        self.set("filters", filters)
    }

    /// `k=v&...` sorted by key, percent-encoded.
    pub fn build(&self) -> String {
        self.params
            .iter()
            .map(|(key, value)| format!("{}={}", urlencoding::encode(key), urlencoding::encode(value)))
            .collect::<Vec<_>>()
            .join("&")
    }

    /// Inverse of `build`. Pairs that fail to decode are skipped; a key with
    /// no `=` maps to an empty value.
    pub fn parse(query_string: &str) -> Self {
        let mut query = Self::new();
        for pair in query_string.split('&').filter(|p| !p.is_empty()) {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            if let (Ok(key), Ok(value)) = (urlencoding::decode(key), urlencoding::decode(value)) {
                query.set(key.into_owned(), value.into_owned());
            }
        }
        query
    }
}

fn join<I, S>(items: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    items
        .into_iter()
        .map(|s| s.as_ref().to_string())
        .collect::<Vec<_>>()
        .join(",")
}
