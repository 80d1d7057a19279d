use serde_json::{Map, Value};

/// A paginated collection backing a job-output view.
///
/// The view owns the resource; the page cache only reads its paging
/// configuration and looks up results through `model_get`.
pub trait PagedResource {
    /// Pages allowed to keep their event bodies in memory
    fn page_limit(&self) -> usize;

    /// Events per page
    fn page_size(&self) -> usize;

    /// Name of the related collection, e.g. `job_events`
    fn related(&self) -> &str;

    /// Look up a dotted path (`related.job_events.results`) in the model
    fn model_get(&self, path: &str) -> Option<&Value>;
}

#[derive(Debug, Clone)]
pub struct JobEventsResource {
    model: Value,
    related: String,
    page_limit: usize,
    page_size: usize,
}

impl JobEventsResource {
    pub fn new(model: Value, related: impl Into<String>, page_limit: usize, page_size: usize) -> Self {
        Self {
            model,
            related: related.into(),
            page_limit,
            page_size,
        }
    }

    /// Store the latest fetched page under `related.<related>.results`
    pub fn set_results(&mut self, results: Vec<Value>) {
        if !self.model.is_object() {
            self.model = Value::Object(Map::new());
        }

        let related = self.related.clone();
        let collection = self
            .model
            .as_object_mut()
            .and_then(|root| object_entry(root, "related"))
            .and_then(|map| object_entry(map, &related));
        if let Some(collection) = collection {
            collection.insert("results".to_string(), Value::Array(results));
        }
    }
}

/// Child object at `key`, replacing any non-object value found there
fn object_entry<'a>(map: &'a mut Map<String, Value>, key: &str) -> Option<&'a mut Map<String, Value>> {
    if !matches!(map.get(key), Some(Value::Object(_))) {
        map.insert(key.to_string(), Value::Object(Map::new()));
    }
    map.get_mut(key).and_then(Value::as_object_mut)
}

impl PagedResource for JobEventsResource {
    fn page_limit(&self) -> usize {
        self.page_limit
    }

    fn page_size(&self) -> usize {
        self.page_size
    }

    fn related(&self) -> &str {
        &self.related
    }

    fn model_get(&self, path: &str) -> Option<&Value> {
        path.split('.').try_fold(&self.model, |node, segment| match node {
            Value::Object(map) => map.get(segment),
            Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        })
    }
}
