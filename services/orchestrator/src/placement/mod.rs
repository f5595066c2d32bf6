//! Placement intent resolution.
//!
//! Turns an `allOf`/`anyOf` expression into concrete clusters:
//! - every `allOf` clause contributes mandatory clusters
//! - every `anyOf` entry, nested or top-level, becomes its own group
//!
//! Input order is preserved everywhere, including the order a label lookup
//! returns its clusters in.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::metadata::{ClusterLabelLookup, MetadataError};
use crate::resources::SEPARATOR;

pub type PlacementResult<T> = Result<T, PlacementError>;

#[derive(Debug, thiserror::Error)]
pub enum PlacementError {
    #[error("invalid placement clause: {0}")]
    InvalidClause(String),

    #[error("looking up clusters with label {label} of provider {provider}: {source}")]
    LabelLookup {
        provider: String,
        label: String,
        #[source]
        source: MetadataError,
    },
}

/// A placement expression as stored on an app intent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlacementIntent {
    #[serde(rename = "allOf", default, skip_serializing_if = "Vec::is_empty")]
    pub all_of: Vec<AllOf>,
    #[serde(rename = "anyOf", default, skip_serializing_if = "Vec::is_empty")]
    pub any_of: Vec<AnyOf>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllOf {
    #[serde(rename = "provider-name")]
    pub provider_name: String,
    #[serde(rename = "cluster-name", default, skip_serializing_if = "String::is_empty")]
    pub cluster_name: String,
    #[serde(rename = "cluster-label-name", default, skip_serializing_if = "String::is_empty")]
    pub cluster_label_name: String,
    #[serde(rename = "anyOf", default, skip_serializing_if = "Vec::is_empty")]
    pub any_of: Vec<AnyOf>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnyOf {
    #[serde(rename = "provider-name")]
    pub provider_name: String,
    #[serde(rename = "cluster-name", default, skip_serializing_if = "String::is_empty")]
    pub cluster_name: String,
    #[serde(rename = "cluster-label-name", default, skip_serializing_if = "String::is_empty")]
    pub cluster_label_name: String,
}

/// A cluster, unique by provider and name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClusterRef {
    pub provider: String,
    pub cluster: String,
}

impl ClusterRef {
    pub fn new(provider: impl Into<String>, cluster: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            cluster: cluster.into(),
        }
    }

    /// Key used for the cluster's node in a context tree.
    pub fn key(&self) -> String {
        format!("{}{SEPARATOR}{}", self.provider, self.cluster)
    }
}

impl fmt::Display for ClusterRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{SEPARATOR}{}", self.provider, self.cluster)
    }
}

/// Clusters produced by one `anyOf` entry. Every member gets the full resource set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterGroup {
    pub group_name: String,
    pub optional_clusters: Vec<ClusterRef>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClusterList {
    pub mandatory_clusters: Vec<ClusterRef>,
    pub cluster_groups: Vec<ClusterGroup>,
}

impl ClusterList {
    /// Total clusters across mandatory and grouped entries.
    pub fn cluster_count(&self) -> usize {
        self.mandatory_clusters.len()
            + self
                .cluster_groups
                .iter()
                .map(|g| g.optional_clusters.len())
                .sum::<usize>()
    }

    pub fn is_empty(&self) -> bool {
        self.cluster_count() == 0
    }

    fn push_mandatory(&mut self, cluster: ClusterRef) {
        if !self.mandatory_clusters.contains(&cluster) {
            self.mandatory_clusters.push(cluster);
        }
    }
}

enum Selector<'a> {
    Name(&'a str),
    Label(&'a str),
}

fn selector<'a>(provider: &str, name: &'a str, label: &'a str) -> PlacementResult<Selector<'a>> {
    if provider.is_empty() {
        return Err(PlacementError::InvalidClause(
            "provider-name is required".to_string(),
        ));
    }
    match (name.is_empty(), label.is_empty()) {
        (false, true) => Ok(Selector::Name(name)),
        (true, false) => Ok(Selector::Label(label)),
        (true, true) => Err(PlacementError::InvalidClause(format!(
            "provider {provider}: one of cluster-name or cluster-label-name is required"
        ))),
        (false, false) => Err(PlacementError::InvalidClause(format!(
            "provider {provider}: cluster-name and cluster-label-name are exclusive"
        ))),
    }
}

async fn expand(
    provider: &str,
    selector: &Selector<'_>,
    lookup: &dyn ClusterLabelLookup,
) -> PlacementResult<Vec<ClusterRef>> {
    match selector {
        Selector::Name(name) => Ok(vec![ClusterRef::new(provider, *name)]),
        Selector::Label(label) => {
            let names = lookup
                .clusters_with_label(provider, label)
                .await
                .map_err(|source| PlacementError::LabelLookup {
                    provider: provider.to_string(),
                    label: label.to_string(),
                    source,
                })?;
            debug!(provider, label, count = names.len(), "Expanded cluster label");
            Ok(names
                .into_iter()
                .map(|n| ClusterRef::new(provider, n))
                .collect())
        }
    }
}

async fn resolve_group(
    entry: &AnyOf,
    lookup: &dyn ClusterLabelLookup,
) -> PlacementResult<ClusterGroup> {
    let sel = selector(
        &entry.provider_name,
        &entry.cluster_name,
        &entry.cluster_label_name,
    )?;
    let group_name = match &sel {
        Selector::Name(name) | Selector::Label(name) => name.to_string(),
    };
    Ok(ClusterGroup {
        group_name,
        optional_clusters: expand(&entry.provider_name, &sel, lookup).await?,
    })
}

/// Resolve an intent into mandatory clusters and optional groups.
///
/// An empty result is valid here; callers decide whether it is acceptable.
pub async fn resolve(
    intent: &PlacementIntent,
    lookup: &dyn ClusterLabelLookup,
) -> PlacementResult<ClusterList> {
    let mut list = ClusterList::default();

    for clause in &intent.all_of {
        let sel = selector(
            &clause.provider_name,
            &clause.cluster_name,
            &clause.cluster_label_name,
        )?;
        for cluster in expand(&clause.provider_name, &sel, lookup).await? {
            list.push_mandatory(cluster);
        }
        for entry in &clause.any_of {
            list.cluster_groups.push(resolve_group(entry, lookup).await?);
        }
    }

    for entry in &intent.any_of {
        list.cluster_groups.push(resolve_group(entry, lookup).await?);
    }

    Ok(list)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use async_trait::async_trait;
    use serde_json::json;

    use super::*;
    use crate::metadata::MetadataResult;

    #[derive(Default)]
    struct Labels(HashMap<(String, String), Vec<String>>);

    impl Labels {
        fn with(mut self, provider: &str, label: &str, names: &[&str]) -> Self {
            self.0.insert(
                (provider.to_string(), label.to_string()),
                names.iter().map(|n| n.to_string()).collect(),
            );
            self
        }
    }

    #[async_trait]
    impl ClusterLabelLookup for Labels {
        async fn clusters_with_label(
            &self,
            provider: &str,
            label: &str,
        ) -> MetadataResult<Vec<String>> {
            self.0
                .get(&(provider.to_string(), label.to_string()))
                .cloned()
                .ok_or_else(|| MetadataError::NotFound(format!("{provider}/{label}")))
        }
    }

    fn intent(value: serde_json::Value) -> PlacementIntent {
        serde_json::from_value(value).unwrap()
    }

    #[tokio::test]
    async fn test_two_cluster_names() {
        let i = intent(json!({"allOf": [
            {"provider-name": "aws", "cluster-name": "a"},
            {"provider-name": "aws", "cluster-name": "b"}
        ]}));
        let list = resolve(&i, &Labels::default()).await.unwrap();
        assert_eq!(
            list.mandatory_clusters,
            vec![ClusterRef::new("aws", "a"), ClusterRef::new("aws", "b")]
        );
        assert!(list.cluster_groups.is_empty());
    }

    #[tokio::test]
    async fn test_label_expands_to_all_matches() {
        let i = intent(json!({"allOf": [
            {"provider-name": "aws", "cluster-label-name": "east"}
        ]}));
        let labels = Labels::default().with("aws", "east", &["c1", "c2"]);
        let list = resolve(&i, &labels).await.unwrap();
        assert_eq!(
            list.mandatory_clusters,
            vec![ClusterRef::new("aws", "c1"), ClusterRef::new("aws", "c2")]
        );
    }

    #[tokio::test]
    async fn test_top_level_any_of_one_group_per_entry() {
        let i = intent(json!({"anyOf": [
            {"provider-name": "aws", "cluster-label-name": "us1"},
            {"provider-name": "aws", "cluster-label-name": "us2"}
        ]}));
        let labels = Labels::default()
            .with("aws", "us1", &["a"])
            .with("aws", "us2", &["b", "c"]);
        let list = resolve(&i, &labels).await.unwrap();

        assert!(list.mandatory_clusters.is_empty());
        assert_eq!(list.cluster_groups.len(), 2);
        assert_eq!(list.cluster_groups[0].group_name, "us1");
        assert_eq!(
            list.cluster_groups[0].optional_clusters,
            vec![ClusterRef::new("aws", "a")]
        );
        assert_eq!(list.cluster_groups[1].group_name, "us2");
        assert_eq!(list.cluster_groups[1].optional_clusters.len(), 2);
        assert_eq!(list.cluster_count(), 3);
    }

    #[tokio::test]
    async fn test_nested_any_of_and_dedup() {
        let i = intent(json!({"allOf": [
            {"provider-name": "aws", "cluster-name": "a", "anyOf": [
                {"provider-name": "aws", "cluster-name": "edge"}
            ]},
            {"provider-name": "aws", "cluster-label-name": "all"}
        ]}));
        let labels = Labels::default().with("aws", "all", &["a", "b"]);
        let list = resolve(&i, &labels).await.unwrap();

        assert_eq!(
            list.mandatory_clusters,
            vec![ClusterRef::new("aws", "a"), ClusterRef::new("aws", "b")]
        );
        assert_eq!(list.cluster_groups[0].group_name, "edge");
    }

    #[tokio::test]
    async fn test_label_failure_names_provider_and_label() {
        let i = intent(json!({"allOf": [
            {"provider-name": "aws", "cluster-name": "a"},
            {"provider-name": "gcp", "cluster-label-name": "west"}
        ]}));
        let err = resolve(&i, &Labels::default()).await.unwrap_err();
        match err {
            PlacementError::LabelLookup {
                provider, label, ..
            } => {
                assert_eq!(provider, "gcp");
                assert_eq!(label, "west");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_clause_needs_exactly_one_selector() {
        let both = intent(json!({"allOf": [
            {"provider-name": "aws", "cluster-name": "a", "cluster-label-name": "x"}
        ]}));
        let neither = intent(json!({"anyOf": [{"provider-name": "aws"}]}));
        for i in [both, neither] {
            assert!(matches!(
                resolve(&i, &Labels::default()).await,
                Err(PlacementError::InvalidClause(_))
            ));
        }
    }

    #[tokio::test]
    async fn test_empty_intent_resolves_to_empty_list() {
        let list = resolve(&PlacementIntent::default(), &Labels::default())
            .await
            .unwrap();
        assert!(list.is_empty());
    }
}
