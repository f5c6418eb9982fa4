use std::collections::BTreeSet;

use serde_json::Value;

use crate::error::Result;
use crate::fetch::ReportFilter;
use crate::storage::{Storage, Tier};

pub const FLAGS_STORAGE_KEY: &str = "selected_flags";
pub const COMPONENTS_STORAGE_KEY: &str = "selected_components";

/// Which filter dimension the user picked. Flags and components exclude
/// each other.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Selection {
    #[default]
    None,
    Flags(BTreeSet<String>),
    Components(BTreeSet<String>),
}

fn read_names(value: Option<Value>) -> BTreeSet<String> {
    match value {
        Some(Value::Array(items)) => items
            .into_iter()
            .filter_map(|item| item.as_str().map(str::to_string))
            .collect(),
        _ => BTreeSet::new(),
    }
}

fn names_value(names: &BTreeSet<String>) -> Value {
    Value::Array(names.iter().cloned().map(Value::String).collect())
}

impl Selection {
    /// An empty set selects nothing.
    pub fn flags<I: IntoIterator<Item = String>>(names: I) -> Self {
        let names: BTreeSet<String> = names.into_iter().collect();
        if names.is_empty() {
            Selection::None
        } else {
            Selection::Flags(names)
        }
    }

    pub fn components<I: IntoIterator<Item = String>>(names: I) -> Self {
        let names: BTreeSet<String> = names.into_iter().collect();
        if names.is_empty() {
            Selection::None
        } else {
            Selection::Components(names)
        }
    }

    pub async fn load<S: Storage + ?Sized>(storage: &S) -> Result<Self> {
        let flags = read_names(storage.get(Tier::Local, FLAGS_STORAGE_KEY).await?);
        if !flags.is_empty() {
            return Ok(Selection::Flags(flags));
        }
        let components = read_names(storage.get(Tier::Local, COMPONENTS_STORAGE_KEY).await?);
        Ok(Selection::components(components))
    }

    /// Persist the selection; whichever kind is not selected is cleared.
    pub async fn save<S: Storage + ?Sized>(&self, storage: &S) -> Result<()> {
        let none = BTreeSet::new();
        let (flags, components) = match self {
            Selection::None => (&none, &none),
            Selection::Flags(f) => (f, &none),
            Selection::Components(c) => (&none, c),
        };
        storage
            .set(Tier::Local, FLAGS_STORAGE_KEY, names_value(flags))
            .await?;
        storage
            .set(Tier::Local, COMPONENTS_STORAGE_KEY, names_value(components))
            .await
    }

    pub fn selected_flags(&self) -> Option<&BTreeSet<String>> {
        match self {
            Selection::Flags(f) => Some(f),
            _ => None,
        }
    }

    pub fn selected_components(&self) -> Option<&BTreeSet<String>> {
        match self {
            Selection::Components(c) => Some(c),
            _ => None,
        }
    }

    pub fn is_filtered(&self) -> bool {
        !matches!(self, Selection::None)
    }

    /// One report request per selected name, or a single unfiltered one.
    pub fn filters(&self) -> Vec<ReportFilter> {
        match self {
            Selection::None => vec![ReportFilter::Unfiltered],
            Selection::Flags(f) => f.iter().cloned().map(ReportFilter::Flag).collect(),
            Selection::Components(c) => c.iter().cloned().map(ReportFilter::Component).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;
    use serde_json::json;

    #[tokio::test]
    async fn test_selecting_components_clears_flags() {
        let storage = MemoryStorage::new();
        Selection::flags(["unit".to_string()]).save(&storage).await.unwrap();
        assert_eq!(
            Selection::load(&storage).await.unwrap(),
            Selection::flags(["unit".to_string()])
        );

        Selection::components(["api".to_string()]).save(&storage).await.unwrap();
        let loaded = Selection::load(&storage).await.unwrap();
        assert_eq!(loaded, Selection::components(["api".to_string()]));
        assert_eq!(
            storage.get(Tier::Local, FLAGS_STORAGE_KEY).await.unwrap(),
            Some(json!([]))
        );
    }

    #[tokio::test]
    async fn test_missing_or_malformed_keys_select_nothing() {
        let storage = MemoryStorage::new();
        assert_eq!(Selection::load(&storage).await.unwrap(), Selection::None);
        storage
            .set(Tier::Local, FLAGS_STORAGE_KEY, json!("unit"))
            .await
            .unwrap();
        assert_eq!(Selection::load(&storage).await.unwrap(), Selection::None);
    }

    #[test]
    fn test_filters() {
        assert_eq!(Selection::None.filters(), vec![ReportFilter::Unfiltered]);
        let sel = Selection::flags(["b".to_string(), "a".to_string(), "a".to_string()]);
        assert_eq!(
            sel.filters(),
            vec![ReportFilter::Flag("a".into()), ReportFilter::Flag("b".into())]
        );
        assert_eq!(Selection::flags(Vec::new()), Selection::None);
    }
}
