//! The audience catalog shape.
//!
//! On disk and in the cache the catalog is the v2 shape:
//! `level1 -> level2 -> { metadata, items: level3 -> leaf }`. A legacy v1
//! shape (`level1 -> level2 -> level3 -> leaf`, no metadata) is
//! read-compatible and upgraded in memory.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A targetable leaf: one level3 segment.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudienceLeaf {
    pub tags: Vec<String>,
    pub available_audience: u64,
}

/// A level2 node: free-form metadata plus its level3 items.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Level2Node {
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub items: BTreeMap<String, AudienceLeaf>,
}

/// The full catalog, keyed level1 -> level2.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AudienceSpec(pub BTreeMap<String, BTreeMap<String, Level2Node>>);

/// The legacy v1 on-disk shape.
type AudienceSpecV1 =
    BTreeMap<String, BTreeMap<String, BTreeMap<String, AudienceLeaf>>>;

impl AudienceSpec {
    /// Parse catalog bytes, accepting the v2 shape and upgrading the legacy
    /// v1 shape (with empty metadata) on the fly.
    ///
    /// Disambiguation relies on `Level2Node` rejecting unknown fields: a v1
    /// level2 value is a map of level3 names, which can never parse as
    /// `{metadata, items}`.
    pub fn from_json_bytes(bytes: &[u8]) -> serde_json::Result<Self> {
        match serde_json::from_slice::<Self>(bytes) {
            Ok(spec) => Ok(spec),
            Err(v2_err) => match serde_json::from_slice::<AudienceSpecV1>(bytes)
            {
                Ok(v1) => Ok(Self::upgrade_v1(v1)),
                Err(_) => Err(v2_err),
            },
        }
    }

    fn upgrade_v1(v1: AudienceSpecV1) -> Self {
        let spec = v1
            .into_iter()
            .map(|(level1, level2s)| {
                let level2s = level2s
                    .into_iter()
                    .map(|(level2, items)| {
                        let node = Level2Node {
                            metadata: BTreeMap::new(),
                            items,
                        };
                        (level2, node)
                    })
                    .collect();
                (level1, level2s)
            })
            .collect();
        Self(spec)
    }

    /// Insert or replace the addressed leaf, creating intermediate nodes.
    pub fn upsert(
        &mut self,
        level1: &str,
        level2: &str,
        level3: &str,
        leaf: AudienceLeaf,
    ) {
        self.0
            .entry(level1.to_owned())
            .or_default()
            .entry(level2.to_owned())
            .or_default()
            .items
            .insert(level3.to_owned(), leaf);
    }

    /// Remove the addressed leaf. Empty level2 maps are pruned (losing
    /// their metadata), then empty level1 maps. Removing an absent leaf is
    /// a no-op.
    pub fn remove(&mut self, level1: &str, level2: &str, level3: &str) {
        let Some(level2s) = self.0.get_mut(level1) else {
            return;
        };
        if let Some(node) = level2s.get_mut(level2) {
            node.items.remove(level3);
            if node.items.is_empty() {
                level2s.remove(level2);
            }
        }
        if level2s.is_empty() {
            self.0.remove(level1);
        }
    }

    pub fn get(
        &self,
        level1: &str,
        level2: &str,
        level3: &str,
    ) -> Option<&AudienceLeaf> {
        self.0.get(level1)?.get(level2)?.items.get(level3)
    }

    /// Iterate `(level1, level2, level3, leaf)` over all leaves.
    pub fn leaves(
        &self,
    ) -> impl Iterator<Item = (&str, &str, &str, &AudienceLeaf)> {
        self.0.iter().flat_map(|(level1, level2s)| {
            level2s.iter().flat_map(move |(level2, node)| {
                node.items.iter().map(move |(level3, leaf)| {
                    (level1.as_str(), level2.as_str(), level3.as_str(), leaf)
                })
            })
        })
    }

    /// The reader view: leaves with `available_audience > 0`, keeping
    /// level2 nodes that still have items or non-empty metadata.
    pub fn filtered_available(&self) -> Self {
        let mut out = BTreeMap::new();
        for (level1, level2s) in &self.0 {
            let mut out_level2s = BTreeMap::new();
            for (level2, node) in level2s {
                let items: BTreeMap<String, AudienceLeaf> = node
                    .items
                    .iter()
                    .filter(|(_, leaf)| leaf.available_audience > 0)
                    .map(|(level3, leaf)| (level3.clone(), leaf.clone()))
                    .collect();
                if !items.is_empty() || !node.metadata.is_empty() {
                    let filtered = Level2Node {
                        metadata: node.metadata.clone(),
                        items,
                    };
                    out_level2s.insert(level2.clone(), filtered);
                }
            }
            if !out_level2s.is_empty() {
                out.insert(level1.clone(), out_level2s);
            }
        }
        Self(out)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn leaf(tags: &[&str], available: u64) -> AudienceLeaf {
        AudienceLeaf {
            tags: tags.iter().map(|s| s.to_string()).collect(),
            available_audience: available,
        }
    }

    #[test]
    fn v1_upgrades_to_v2() {
        let v1 = serde_json::json!({
            "retail": {
                "tehran": {
                    "district-1": { "tags": ["young"], "availableAudience": 120 }
                }
            }
        });
        let bytes = serde_json::to_vec(&v1).unwrap();
        let spec = AudienceSpec::from_json_bytes(&bytes).unwrap();
        let leaf = spec.get("retail", "tehran", "district-1").unwrap();
        assert_eq!(leaf.available_audience, 120);
        let node = &spec.0["retail"]["tehran"];
        assert!(node.metadata.is_empty());
    }

    #[test]
    fn v2_parses_directly() {
        let v2 = serde_json::json!({
            "retail": {
                "tehran": {
                    "metadata": { "population": 9000000 },
                    "items": {
                        "district-1": { "tags": [], "availableAudience": 5 }
                    }
                }
            }
        });
        let bytes = serde_json::to_vec(&v2).unwrap();
        let spec = AudienceSpec::from_json_bytes(&bytes).unwrap();
        assert_eq!(
            spec.0["retail"]["tehran"].metadata["population"],
            serde_json::json!(9000000),
        );
    }

    #[test]
    fn remove_prunes_empty_nodes() {
        let mut spec = AudienceSpec::default();
        spec.upsert("retail", "tehran", "d1", leaf(&[], 10));
        spec.upsert("retail", "tehran", "d2", leaf(&[], 20));

        spec.remove("retail", "tehran", "d1");
        assert!(spec.get("retail", "tehran", "d2").is_some());

        spec.remove("retail", "tehran", "d2");
        assert!(spec.is_empty());

        // Removing from an empty spec is a no-op.
        spec.remove("retail", "tehran", "d2");
    }

    #[test]
    fn filtered_view_drops_empty_leaves_keeps_metadata_nodes() {
        let mut spec = AudienceSpec::default();
        spec.upsert("retail", "tehran", "d1", leaf(&["young"], 0));
        spec.upsert("retail", "tehran", "d2", leaf(&[], 7));
        spec.upsert("retail", "karaj", "d9", leaf(&[], 0));
        spec.0
            .get_mut("retail")
            .unwrap()
            .get_mut("karaj")
            .unwrap()
            .metadata
            .insert("note".to_owned(), serde_json::json!("kept"));

        let filtered = spec.filtered_available();
        assert!(filtered.get("retail", "tehran", "d1").is_none());
        assert!(filtered.get("retail", "tehran", "d2").is_some());
        // Empty of items but has metadata: the node survives.
        assert!(filtered.0["retail"].contains_key("karaj"));
    }
}
