//! Campaign capacity against the audience catalog.

use crate::models::audience::AudienceSpec;
use crate::models::campaign::CampaignSpec;

/// Sum of `available_audience` over catalog leaves matched by the campaign
/// targeting. A leaf matches iff:
///
/// - its level1 equals the campaign's level1, and
/// - the campaign's level2s are empty or contain the leaf's level2, and
/// - the campaign's level3s are empty or contain the leaf's level3, and
/// - the campaign's tags are empty or intersect the leaf's tags.
///
/// A campaign without a level1 matches nothing.
pub fn capacity(catalog: &AudienceSpec, spec: &CampaignSpec) -> u64 {
    let Some(level1) = spec.level1.as_deref() else {
        return 0;
    };

    catalog
        .leaves()
        .filter(|(leaf_level1, leaf_level2, leaf_level3, leaf)| {
            *leaf_level1 == level1
                && (spec.level2s.is_empty()
                    || spec.level2s.iter().any(|l2| l2 == leaf_level2))
                && (spec.level3s.is_empty()
                    || spec.level3s.iter().any(|l3| l3 == leaf_level3))
                && (spec.tags.is_empty()
                    || leaf.tags.iter().any(|t| spec.tags.contains(t)))
        })
        .map(|(_, _, _, leaf)| leaf.available_audience)
        .sum()
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::models::audience::AudienceLeaf;

    fn catalog() -> AudienceSpec {
        let mut catalog = AudienceSpec::default();
        let leaf = |tags: &[&str], n: u64| AudienceLeaf {
            tags: tags.iter().map(|s| s.to_string()).collect(),
            available_audience: n,
        };
        catalog.upsert("retail", "tehran", "d1", leaf(&["young"], 100));
        catalog.upsert("retail", "tehran", "d2", leaf(&["old"], 200));
        catalog.upsert("retail", "karaj", "k1", leaf(&["young"], 400));
        catalog.upsert("food", "tehran", "d1", leaf(&["young"], 800));
        catalog
    }

    fn spec(level1: &str) -> CampaignSpec {
        CampaignSpec {
            level1: Some(level1.to_owned()),
            ..CampaignSpec::default()
        }
    }

    #[test]
    fn level1_scopes_everything() {
        assert_eq!(capacity(&catalog(), &spec("retail")), 700);
        assert_eq!(capacity(&catalog(), &spec("food")), 800);
        assert_eq!(capacity(&catalog(), &spec("fashion")), 0);
        assert_eq!(capacity(&catalog(), &CampaignSpec::default()), 0);
    }

    #[test]
    fn level2_and_level3_narrow() {
        let mut s = spec("retail");
        s.level2s = vec!["tehran".to_owned()];
        assert_eq!(capacity(&catalog(), &s), 300);

        s.level3s = vec!["d2".to_owned()];
        assert_eq!(capacity(&catalog(), &s), 200);

        // A level3 under an unselected level2 matches nothing.
        s.level3s = vec!["k1".to_owned()];
        assert_eq!(capacity(&catalog(), &s), 0);
    }

    #[test]
    fn tags_require_intersection() {
        let mut s = spec("retail");
        s.tags = vec!["young".to_owned()];
        assert_eq!(capacity(&catalog(), &s), 500);

        s.tags = vec!["young".to_owned(), "old".to_owned()];
        assert_eq!(capacity(&catalog(), &s), 700);

        s.tags = vec!["missing".to_owned()];
        assert_eq!(capacity(&catalog(), &s), 0);
    }
}
