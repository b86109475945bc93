//! Query-string parameters for dispatched requests

use std::collections::BTreeMap;

use url::form_urlencoded;

/// Name of the datacenter parameter appended to every request.
pub const DATACENTER_PARAM: &str = "dc";

/// A single query parameter
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Param {
    /// Parameter name
    pub key: String,
    /// Parameter value
    pub value: String,
}

impl Param {
    /// Create a parameter
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

impl<K: Into<String>, V: Into<String>> From<(K, V)> for Param {
    fn from((key, value): (K, V)) -> Self {
        Param::new(key, value)
    }
}

/// Ordered list of query parameters. Repeated keys are allowed.
///
/// ```
/// use consul_client::Query;
///
/// let query: Query = [("recurse", ""), ("keys", "")].into_iter().collect();
/// assert_eq!(query.len(), 2);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Query(Vec<Param>);

impl Query {
    /// An empty query
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Append a parameter, keeping insertion order
    pub fn push(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.push(Param::new(key, value));
    }

    /// Builder-style [`push`](Self::push)
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.push(key, value);
        self
    }

    /// Number of parameters
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True when no parameters are set
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Parameters in insertion order
    pub fn params(&self) -> &[Param] {
        &self.0
    }

    /// Group values by key.
    ///
    /// Key order is not preserved, but every pair appears once per occurrence
    /// and values of a repeated key keep their relative order.
    pub fn values(&self) -> BTreeMap<String, Vec<String>> {
        let mut values: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for param in &self.0 {
            values
                .entry(param.key.clone())
                .or_default()
                .push(param.value.clone());
        }
        values
    }
}

impl<P: Into<Param>> FromIterator<P> for Query {
    fn from_iter<I: IntoIterator<Item = P>>(iter: I) -> Self {
        Self(iter.into_iter().map(Into::into).collect())
    }
}

impl From<Vec<Param>> for Query {
    fn from(params: Vec<Param>) -> Self {
        Self(params)
    }
}

impl IntoIterator for Query {
    type Item = Param;
    type IntoIter = std::vec::IntoIter<Param>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

/// Encode `query` followed by the datacenter parameter.
///
/// `dc` is always written, even when `datacenter` is empty.
pub fn encode_query(query: &Query, datacenter: &str) -> String {
    let mut serializer = form_urlencoded::Serializer::new(String::new());
    for param in query.params() {
        serializer.append_pair(&param.key, &param.value);
    }
    serializer.append_pair(DATACENTER_PARAM, datacenter);
    serializer.finish()
}

/// Parse an encoded query string into the by-key view of [`Query::values`].
pub fn decode_values(raw: &str) -> BTreeMap<String, Vec<String>> {
    form_urlencoded::parse(raw.as_bytes())
        .into_owned()
        .collect::<Query>()
        .values()
}
