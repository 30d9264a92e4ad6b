//! Merging fetched pages into a keyed, sorted collection.

use std::collections::BTreeMap;
use std::sync::Arc;

use courier_interchange::{Response, StoreUpdate};
use serde_json::{Map, Value};

/// Resource-specific knowledge needed to merge pages.
pub trait Pager: Send + Sync + 'static {
    /// Items contained in one page response.
    fn extract_items(&self, response: &Response) -> Vec<Value>;

    /// Put items in their final display order.
    fn sort_items(&self, items: Vec<Value>) -> Vec<Value>;

    /// Stable identity of an item.
    fn item_id(&self, item: &Value) -> Option<String>;
}

type ExtractFn = dyn Fn(&Response) -> Vec<Value> + Send + Sync;
type SortFn = dyn Fn(Vec<Value>) -> Vec<Value> + Send + Sync;
type IdFn = dyn Fn(&Value) -> Option<String> + Send + Sync;

/// A [`Pager`] made of three closures.
pub struct FnPager {
    extract: Box<ExtractFn>,
    sort: Box<SortFn>,
    id: Box<IdFn>,
}

impl FnPager {
    pub fn new<E, S, I>(extract: E, sort: S, id: I) -> Self
    where
        E: Fn(&Response) -> Vec<Value> + Send + Sync + 'static,
        S: Fn(Vec<Value>) -> Vec<Value> + Send + Sync + 'static,
        I: Fn(&Value) -> Option<String> + Send + Sync + 'static,
    {
        FnPager {
            extract: Box::new(extract),
            sort: Box::new(sort),
            id: Box::new(id),
        }
    }
}

impl Pager for FnPager {
    fn extract_items(&self, response: &Response) -> Vec<Value> {
        (self.extract)(response)
    }

    fn sort_items(&self, items: Vec<Value>) -> Vec<Value> {
        (self.sort)(items)
    }

    fn item_id(&self, item: &Value) -> Option<String> {
        (self.id)(item)
    }
}

/// Where and how one paginated read merges its results.
#[derive(Clone)]
pub struct PageRequest {
    /// Store key of the collection (an object of id → item).
    pub resource_key: String,
    /// Store key of the ordered item ID list.
    pub page_key: String,
    /// First page or refresh: replace the collection instead of merging.
    pub is_initial_request: bool,
    pub pager: Arc<dyn Pager>,
}

impl std::fmt::Debug for PageRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageRequest")
            .field("resource_key", &self.resource_key)
            .field("page_key", &self.page_key)
            .field("is_initial_request", &self.is_initial_request)
            .finish_non_exhaustive()
    }
}

/// `sort(dedupe_by_id(existing ∪ page))`, the page winning on collisions.
/// With `initial`, `existing` is ignored.
pub fn merge_items(
    pager: &dyn Pager,
    existing: Vec<Value>,
    page: Vec<Value>,
    initial: bool,
) -> Vec<Value> {
    let mut by_id: BTreeMap<String, Value> = BTreeMap::new();
    let base = if initial { Vec::new() } else { existing };
    for item in base.into_iter().chain(page) {
        match pager.item_id(&item) {
            Some(id) => {
                by_id.insert(id, item);
            }
            None => tracing::warn!(item = %item, "dropping page item without an id"),
        }
    }
    pager.sort_items(by_id.into_values().collect())
}

/// Items currently stored under a collection key.
pub fn stored_items(collection: Option<Value>) -> Vec<Value> {
    match collection {
        Some(Value::Object(members)) => members.into_iter().map(|(_, v)| v).collect(),
        Some(Value::Array(items)) => items,
        _ => Vec::new(),
    }
}

/// `set` instructions writing a merged collection and its ordered ID list.
pub fn collection_updates(page: &PageRequest, items: &[Value]) -> Vec<StoreUpdate> {
    let mut members = Map::new();
    let mut ids = Vec::with_capacity(items.len());
    for item in items {
        if let Some(id) = page.pager.item_id(item) {
            ids.push(Value::String(id.clone()));
            members.insert(id, item.clone());
        }
    }

    [
        StoreUpdate::set(page.resource_key.clone(), Value::Object(members)),
        StoreUpdate::set(page.page_key.clone(), Value::Array(ids)),
    ]
    .into_iter()
    .filter_map(|update| match update {
        Ok(update) => Some(update),
        Err(e) => {
            tracing::warn!(error = %e, "invalid pagination key");
            None
        }
    })
    .collect()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use serde_json::json;

    /// Items `{"id": .., "created": ..}` sorted newest first.
    pub(crate) fn actions_pager() -> FnPager {
        FnPager::new(
            |response| {
                response
                    .get("items")
                    .and_then(Value::as_array)
                    .cloned()
                    .unwrap_or_default()
            },
            |mut items| {
                items.sort_by_key(|item| std::cmp::Reverse(item["created"].as_i64()));
                items
            },
            |item| item.get("id").and_then(Value::as_str).map(str::to_string),
        )
    }

    fn item(id: &str, created: i64) -> Value {
        json!({"id": id, "created": created})
    }

    #[test]
    fn merge_dedupes_and_sorts() {
        let pager = actions_pager();
        let merged = merge_items(
            &pager,
            vec![item("a", 3), item("b", 2)],
            vec![item("c", 1), json!({"id": "b", "created": 2, "edited": true})],
            false,
        );
        let ids: Vec<&str> = merged.iter().map(|i| i["id"].as_str().unwrap()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
        assert_eq!(merged[1]["edited"], json!(true));
    }

    #[test]
    fn merge_is_idempotent() {
        let pager = actions_pager();
        let page = vec![item("b", 2), item("c", 1)];
        let once = merge_items(&pager, vec![item("a", 3)], page.clone(), false);
        let twice = merge_items(&pager, once.clone(), page, false);
        assert_eq!(once, twice);
    }

    #[test]
    fn initial_request_replaces() {
        let pager = actions_pager();
        let merged = merge_items(&pager, vec![item("a", 3)], vec![item("c", 1)], true);
        assert_eq!(merged, vec![item("c", 1)]);
    }

    #[test]
    fn items_without_id_are_dropped() {
        let pager = actions_pager();
        let merged = merge_items(&pager, vec![], vec![json!({"created": 1})], false);
        assert!(merged.is_empty());
    }

    #[test]
    fn collection_updates_write_members_and_order() {
        let page = PageRequest {
            resource_key: "reportActions_1".to_string(),
            page_key: "reportActionsPages_1".to_string(),
            is_initial_request: false,
            pager: Arc::new(actions_pager()),
        };
        let updates = collection_updates(&page, &[item("b", 2), item("a", 1)]);
        assert_eq!(
            updates[1],
            StoreUpdate::Set {
                key: "reportActionsPages_1".to_string(),
                value: json!(["b", "a"]),
            }
        );
        assert_eq!(stored_items(Some(json!({"a": item("a", 1)}))), vec![item("a", 1)]);
    }
}
