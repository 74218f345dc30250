use crate::models::MovieSummary;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SortKey {
    #[default]
    #[serde(rename = "popularity.desc")]
    PopularityDesc,
    #[serde(rename = "popularity.asc")]
    PopularityAsc,
    #[serde(rename = "vote_average.desc")]
    RatingDesc,
    #[serde(rename = "vote_average.asc")]
    RatingAsc,
    #[serde(rename = "release_date.desc")]
    ReleaseDateDesc,
    #[serde(rename = "release_date.asc")]
    ReleaseDateAsc,
    #[serde(rename = "title.asc")]
    TitleAsc,
    #[serde(rename = "title.desc")]
    TitleDesc,
}

impl SortKey {
    pub const ALL: [SortKey; 8] = [
        SortKey::PopularityDesc,
        SortKey::PopularityAsc,
        SortKey::RatingDesc,
        SortKey::RatingAsc,
        SortKey::ReleaseDateDesc,
        SortKey::ReleaseDateAsc,
        SortKey::TitleAsc,
        SortKey::TitleDesc,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SortKey::PopularityDesc => "popularity.desc",
            SortKey::PopularityAsc => "popularity.asc",
            SortKey::RatingDesc => "vote_average.desc",
            SortKey::RatingAsc => "vote_average.asc",
            SortKey::ReleaseDateDesc => "release_date.desc",
            SortKey::ReleaseDateAsc => "release_date.asc",
            SortKey::TitleAsc => "title.asc",
            SortKey::TitleDesc => "title.desc",
        }
    }

    fn is_descending(&self) -> bool {
        matches!(
            self,
            SortKey::PopularityDesc
                | SortKey::RatingDesc
                | SortKey::ReleaseDateDesc
                | SortKey::TitleDesc
        )
    }

    fn ascending(&self, a: &MovieSummary, b: &MovieSummary) -> Ordering {
        match self {
            SortKey::PopularityDesc | SortKey::PopularityAsc => {
                a.popularity.total_cmp(&b.popularity)
            }
            SortKey::RatingDesc | SortKey::RatingAsc => {
                a.vote_average.total_cmp(&b.vote_average)
            }
            // Fixed YYYY-MM-DD format, so lexical order is chronological.
            SortKey::ReleaseDateDesc | SortKey::ReleaseDateAsc => {
                a.release_date.cmp(&b.release_date)
            }
            SortKey::TitleAsc | SortKey::TitleDesc => compare_titles(&a.title, &b.title),
        }
    }

    fn compare(&self, a: &MovieSummary, b: &MovieSummary) -> Ordering {
        let ord = self.ascending(a, b);
        if self.is_descending() {
            ord.reverse()
        } else {
            ord
        }
    }
}

impl FromStr for SortKey {
    type Err = anyhow::Error;
    fn from_str(s: &str) -> anyhow::Result<Self> {
        SortKey::ALL
            .into_iter()
            .find(|k| k.as_str() == s.trim())
            .ok_or_else(|| anyhow::anyhow!("unknown sort key '{}'", s))
    }
}

impl fmt::Display for SortKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the accumulated list is viewed. Never changes what gets fetched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterState {
    #[serde(default)]
    pub genres: BTreeSet<i64>,
    #[serde(default, rename = "sortBy", alias = "sort")]
    pub sort: SortKey,
}

impl FilterState {
    pub fn toggle_genre(&mut self, id: i64) {
        if !self.genres.remove(&id) {
            self.genres.insert(id);
        }
    }

    pub fn clear_genres(&mut self) {
        self.genres.clear();
    }

    pub fn admits(&self, movie: &MovieSummary) -> bool {
        self.genres.is_empty() || movie.has_any_genre(&self.genres)
    }
}

/// Filters by genre intersection and sorts. Ties keep input order.
pub fn compose(list: &[MovieSummary], filter: &FilterState) -> Vec<MovieSummary> {
    let mut out: Vec<MovieSummary> = list
        .iter()
        .filter(|m| filter.admits(m))
        .cloned()
        .collect();
    out.sort_by(|a, b| filter.sort.compare(a, b));
    out
}

// Case-folded comparison first so "alien" and "Alien" sit together; the raw
// comparison keeps the order total. There is no locale collation: scripts
// without case (CJK titles) sort by code point, not by reading or stroke order.
fn compare_titles(a: &str, b: &str) -> Ordering {
    collation_key(a)
        .cmp(&collation_key(b))
        .then_with(|| a.cmp(b))
}

fn collation_key(title: &str) -> String {
    title
        .trim()
        .chars()
        .flat_map(char::to_lowercase)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn movie(id: i64, title: &str, popularity: f64, date: &str, genres: &[i64]) -> MovieSummary {
        MovieSummary {
            id,
            title: title.to_string(),
            original_title: title.to_string(),
            original_language: "en".to_string(),
            overview: String::new(),
            poster_path: None,
            backdrop_path: None,
            release_date: date.to_string(),
            popularity,
            vote_average: popularity / 100.0,
            vote_count: 0,
            genre_ids: genres.to_vec(),
            adult: false,
            video: false,
        }
    }

    fn sample() -> Vec<MovieSummary> {
        vec![
            movie(1, "banana", 50.0, "2025-01-02", &[28]),
            movie(2, "Apple", 70.0, "2024-06-01", &[35]),
            movie(3, "cherry", 50.0, "2025-03-01", &[28, 35]),
            movie(4, "apple", 10.0, "", &[18]),
        ]
    }

    fn ids(list: &[MovieSummary]) -> Vec<i64> {
        list.iter().map(|m| m.id).collect()
    }

    #[test]
    fn empty_genre_set_keeps_everything() {
        let list = sample();
        let out = compose(&list, &FilterState::default());
        let mut got = ids(&out);
        got.sort();
        assert_eq!(got, vec![1, 2, 3, 4]);
    }

    #[test]
    fn genre_filter_is_an_intersection() {
        let list = sample();
        let filter = FilterState {
            genres: BTreeSet::from([28, 18]),
            sort: SortKey::PopularityDesc,
        };
        let out = compose(&list, &filter);
        assert_eq!(ids(&out), vec![1, 3, 4]);
        assert!(out.iter().all(|m| m.has_any_genre(&filter.genres)));
    }

    fn sorted_by(sort: SortKey) -> FilterState {
        FilterState {
            sort,
            ..Default::default()
        }
    }

    #[test]
    fn ties_keep_input_order() {
        let list = sample();
        let desc = compose(&list, &sorted_by(SortKey::PopularityDesc));
        assert_eq!(ids(&desc), vec![2, 1, 3, 4]);
        let asc = compose(&list, &sorted_by(SortKey::PopularityAsc));
        assert_eq!(ids(&asc), vec![4, 1, 3, 2]);
    }

    #[test]
    fn release_date_and_title_orders() {
        let list = sample();
        let newest = compose(&list, &sorted_by(SortKey::ReleaseDateDesc));
        assert_eq!(ids(&newest), vec![3, 1, 2, 4]);
        let titles = compose(&list, &sorted_by(SortKey::TitleAsc));
        assert_eq!(ids(&titles), vec![2, 4, 1, 3]);
        let reversed = compose(&list, &sorted_by(SortKey::TitleDesc));
        assert_eq!(ids(&reversed), vec![3, 1, 4, 2]);
    }

    #[test]
    fn compose_is_idempotent() {
        let list = sample();
        for sort in SortKey::ALL {
            let filter = FilterState { genres: BTreeSet::new(), sort };
            assert_eq!(compose(&list, &filter), compose(&list, &filter), "{sort}");
        }
    }

    #[test]
    fn sort_keys_parse_from_wire_names() {
        for key in SortKey::ALL {
            assert_eq!(key.as_str().parse::<SortKey>().expect("parse"), key);
        }
        assert!("rating.desc".parse::<SortKey>().is_err());
        let filter: FilterState =
            serde_json::from_str(r#"{"genres":[28],"sortBy":"title.asc"}"#).expect("filter");
        assert_eq!(filter.sort, SortKey::TitleAsc);
    }

    #[test]
    fn toggling_a_genre_twice_restores_all() {
        let mut filter = FilterState::default();
        filter.toggle_genre(28);
        assert!(filter.genres.contains(&28));
        filter.toggle_genre(28);
        assert!(filter.genres.is_empty());
    }
}
