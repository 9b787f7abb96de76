//! Featured / most-viewed ordering for listing pages.
//!
//! The aggregator only reports counts; ordering is a presentation concern and
//! lives here so rendering collaborators share one rule: pinned slugs first,
//! in the order they were pinned, then everything else by views descending.
//! Equal counts keep their listing order.

use super::aggregator::ViewCounts;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RankedItem {
    pub slug: String,
    pub views: u64,
    pub pinned: bool,
}

/// Rank every slug of `counts`, most viewed first.
pub fn rank_by_views(counts: &ViewCounts) -> Vec<RankedItem> {
    let mut ranked: Vec<RankedItem> = counts
        .iter()
        .map(|(slug, views)| RankedItem {
            slug: slug.to_string(),
            views,
            pinned: false,
        })
        .collect();
    // Stable: ties stay in listing order.
    ranked.sort_by(|a, b| b.views.cmp(&a.views));
    ranked
}

/// Pick up to `limit` featured items. Pinned slugs that are not part of the
/// listing are skipped.
pub fn select_featured(counts: &ViewCounts, pinned: &[String], limit: usize) -> Vec<RankedItem> {
    let mut featured: Vec<RankedItem> = Vec::with_capacity(limit);

    for slug in pinned {
        if featured.len() == limit {
            return featured;
        }
        if featured.iter().any(|item| &item.slug == slug) {
            continue;
        }
        if let Some(views) = counts.get(slug) {
            featured.push(RankedItem {
                slug: slug.clone(),
                views,
                pinned: true,
            });
        }
    }

    let remaining = limit - featured.len();
    let fill: Vec<RankedItem> = rank_by_views(counts)
        .into_iter()
        .filter(|item| !featured.iter().any(|f| f.slug == item.slug))
        .take(remaining)
        .collect();
    featured.extend(fill);
    featured
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counts(pairs: &[(&str, u64)]) -> ViewCounts {
        pairs
            .iter()
            .map(|(slug, views)| (slug.to_string(), *views))
            .collect()
    }

    fn slugs(items: &[RankedItem]) -> Vec<&str> {
        items.iter().map(|item| item.slug.as_str()).collect()
    }

    #[test]
    fn ranks_descending_with_stable_ties() {
        let listing = counts(&[("a", 3), ("b", 10), ("c", 3), ("d", 0)]);
        assert_eq!(slugs(&rank_by_views(&listing)), ["b", "a", "c", "d"]);
    }

    #[test]
    fn pinned_items_lead_then_most_viewed_fill() {
        let listing = counts(&[
            ("CarProbe", 40),
            ("GarageBook", 5),
            ("side-quest", 90),
            ("GaragePro", 1),
            ("notes", 60),
        ]);
        let pinned = vec![
            "GarageBook".to_string(),
            "CarProbe".to_string(),
            "GaragePro".to_string(),
        ];

        let featured = select_featured(&listing, &pinned, 4);
        assert_eq!(
            slugs(&featured),
            ["GarageBook", "CarProbe", "GaragePro", "side-quest"]
        );
        assert!(featured[..3].iter().all(|item| item.pinned));
        assert!(!featured[3].pinned);
    }

    #[test]
    fn missing_pins_are_skipped_and_limit_respected() {
        let listing = counts(&[("a", 1), ("b", 2)]);
        let pinned = vec!["gone".to_string(), "a".to_string(), "a".to_string()];

        assert_eq!(slugs(&select_featured(&listing, &pinned, 1)), ["a"]);
        assert_eq!(slugs(&select_featured(&listing, &pinned, 5)), ["a", "b"]);
        assert!(select_featured(&listing, &pinned, 0).is_empty());
    }
}
