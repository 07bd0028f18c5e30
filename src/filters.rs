//! Filter, search and sort state carried in the discover URL.
//!
//! The query string is the canonical state: [`QueryCodec::decode`] turns it
//! into a [`FilterState`] and [`QueryCodec::encode`] writes it back, leaving
//! out every parameter that holds its default so equal states produce equal
//! URLs.

use chrono::Datelike;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub const MIN_YEAR: i32 = 1900;
pub const MIN_RATING: f64 = 0.0;
pub const MAX_RATING: f64 = 10.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SortOption {
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
}

impl SortOption {
    pub const ALL: [SortOption; 6] = [
        SortOption::PopularityDesc,
        SortOption::PopularityAsc,
        SortOption::RatingDesc,
        SortOption::RatingAsc,
        SortOption::ReleaseDateDesc,
        SortOption::ReleaseDateAsc,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SortOption::PopularityDesc => "popularity.desc",
            SortOption::PopularityAsc => "popularity.asc",
            SortOption::RatingDesc => "vote_average.desc",
            SortOption::RatingAsc => "vote_average.asc",
            SortOption::ReleaseDateDesc => "release_date.desc",
            SortOption::ReleaseDateAsc => "release_date.asc",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            SortOption::PopularityDesc => "Popularity (High to Low)",
            SortOption::PopularityAsc => "Popularity (Low to High)",
            SortOption::RatingDesc => "Rating (High to Low)",
            SortOption::RatingAsc => "Rating (Low to High)",
            SortOption::ReleaseDateDesc => "Release Date (Newest)",
            SortOption::ReleaseDateAsc => "Release Date (Oldest)",
        }
    }

    /// Key understood by TMDB's `sort_by` on `/discover/movie`.
    pub fn tmdb_key(&self) -> &'static str {
        match self {
            SortOption::ReleaseDateDesc => "primary_release_date.desc",
            SortOption::ReleaseDateAsc => "primary_release_date.asc",
            other => other.as_str(),
        }
    }
}

impl FromStr for SortOption {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SortOption::ALL
            .into_iter()
            .find(|o| o.as_str() == s)
            .ok_or_else(|| anyhow::anyhow!("unknown sort option '{}'", s))
    }
}

impl fmt::Display for SortOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterState {
    pub query: String,
    pub genres: Vec<i32>,
    pub year_range: (i32, i32),
    pub rating_range: (f64, f64),
    pub sort: SortOption,
}

/// Staged edits from the non-text controls. Nothing reaches the URL until the
/// draft is applied with [`QueryCodec::apply`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FilterDraft {
    #[serde(default)]
    pub genres: Option<Vec<i32>>,
    #[serde(default)]
    pub year_range: Option<(i32, i32)>,
    #[serde(default)]
    pub rating_range: Option<(f64, f64)>,
    #[serde(default)]
    pub sort: Option<SortOption>,
}

impl FilterDraft {
    /// Starts a draft from the state currently in the URL.
    pub fn from_state(state: &FilterState) -> Self {
        Self {
            genres: Some(state.genres.clone()),
            year_range: Some(state.year_range),
            rating_range: Some(state.rating_range),
            sort: Some(state.sort),
        }
    }

    pub fn toggle_genre(&mut self, id: i32) {
        let genres = self.genres.get_or_insert_with(Vec::new);
        if let Some(pos) = genres.iter().position(|g| *g == id) {
            genres.remove(pos);
        } else {
            genres.push(id);
        }
    }
}

/// Gateway-facing translation of a [`FilterState`]; unset bounds are `None`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DiscoverQuery {
    pub genres: Vec<i32>,
    pub from_year: Option<i32>,
    pub to_year: Option<i32>,
    pub min_rating: Option<f64>,
    pub max_rating: Option<f64>,
    pub sort: SortOption,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QueryCodec {
    pub min_year: i32,
    pub max_year: i32,
}

impl Default for QueryCodec {
    fn default() -> Self {
        Self::current()
    }
}

impl QueryCodec {
    /// Year domain ends at the current calendar year.
    pub fn current() -> Self {
        Self::with_max_year(chrono::Utc::now().year())
    }

    pub fn with_max_year(max_year: i32) -> Self {
        Self {
            min_year: MIN_YEAR,
            max_year: max_year.max(MIN_YEAR),
        }
    }

    pub fn default_state(&self) -> FilterState {
        FilterState {
            query: String::new(),
            genres: Vec::new(),
            year_range: (self.min_year, self.max_year),
            rating_range: (MIN_RATING, MAX_RATING),
            sort: SortOption::default(),
        }
    }

    pub fn decode(&self, query_string: &str) -> FilterState {
        let mut state = self.default_state();
        let mut from_year = None;
        let mut to_year = None;
        let mut min_rating = None;
        let mut max_rating = None;
        let mut legacy_query = None;

        for (key, value) in parse_pairs(query_string) {
            match key.as_str() {
                "q" => state.query = value.trim().to_string(),
                "query" => legacy_query = Some(value.trim().to_string()),
                "genres" => state.genres = parse_genres(&value),
                "fromYear" => from_year = value.trim().parse::<i32>().ok(),
                "toYear" => to_year = value.trim().parse::<i32>().ok(),
                "minRating" => min_rating = parse_rating(&value),
                "maxRating" => max_rating = parse_rating(&value),
                "sort" => state.sort = value.parse().unwrap_or_default(),
                _ => {}
            }
        }
        if state.query.is_empty() {
            if let Some(q) = legacy_query {
                state.query = q;
            }
        }

        state.year_range = self.clamp_years((
            from_year.unwrap_or(self.min_year),
            to_year.unwrap_or(self.max_year),
        ));
        state.rating_range = clamp_ratings((
            min_rating.unwrap_or(MIN_RATING),
            max_rating.unwrap_or(MAX_RATING),
        ));
        state
    }

    pub fn encode(&self, state: &FilterState) -> String {
        let mut parts: Vec<String> = Vec::new();
        if !state.query.is_empty() {
            parts.push(format!("q={}", urlencoding::encode(&state.query)));
        }
        if !state.genres.is_empty() {
            let joined = state
                .genres
                .iter()
                .map(|g| g.to_string())
                .collect::<Vec<_>>()
                .join(",");
            parts.push(format!("genres={}", joined));
        }
        let (from, to) = state.year_range;
        if from != self.min_year {
            parts.push(format!("fromYear={}", from));
        }
        if to != self.max_year {
            parts.push(format!("toYear={}", to));
        }
        let (min, max) = state.rating_range;
        if min != MIN_RATING {
            parts.push(format!("minRating={}", min));
        }
        if max != MAX_RATING {
            parts.push(format!("maxRating={}", max));
        }
        if state.sort != SortOption::default() {
            parts.push(format!("sort={}", state.sort));
        }
        parts.join("&")
    }

    pub fn href(&self, path: &str, state: &FilterState) -> String {
        let query = self.encode(state);
        if query.is_empty() {
            path.to_string()
        } else {
            format!("{}?{}", path, query)
        }
    }

    /// Drops every range and genre filter, keeping the search text and sort.
    pub fn clear_filters(&self, state: &FilterState) -> FilterState {
        FilterState {
            query: state.query.clone(),
            sort: state.sort,
            ..self.default_state()
        }
    }

    pub fn apply(&self, state: &FilterState, draft: FilterDraft) -> FilterState {
        let mut next = state.clone();
        if let Some(genres) = draft.genres {
            next.genres = dedupe_genres(genres);
        }
        if let Some(years) = draft.year_range {
            next.year_range = self.clamp_years(years);
        }
        if let Some(ratings) = draft.rating_range {
            next.rating_range = clamp_ratings(ratings);
        }
        if let Some(sort) = draft.sort {
            next.sort = sort;
        }
        next
    }

    pub fn with_query(&self, state: &FilterState, query: &str) -> FilterState {
        FilterState {
            query: query.trim().to_string(),
            ..state.clone()
        }
    }

    pub fn is_filtered(&self, state: &FilterState) -> bool {
        !state.genres.is_empty()
            || state.year_range.0 > self.min_year
            || state.year_range.1 < self.max_year
            || state.rating_range.0 > MIN_RATING
            || state.rating_range.1 < MAX_RATING
    }

    pub fn discover_query(&self, state: &FilterState) -> DiscoverQuery {
        let (from, to) = state.year_range;
        let (min, max) = state.rating_range;
        DiscoverQuery {
            genres: state.genres.clone(),
            from_year: (from != self.min_year).then_some(from),
            to_year: (to != self.max_year).then_some(to),
            min_rating: (min != MIN_RATING).then_some(min),
            max_rating: (max != MAX_RATING).then_some(max),
            sort: state.sort,
        }
    }

    fn clamp_years(&self, (from, to): (i32, i32)) -> (i32, i32) {
        let from = from.clamp(self.min_year, self.max_year);
        let to = to.clamp(self.min_year, self.max_year);
        if from > to {
            (to, from)
        } else {
            (from, to)
        }
    }
}

fn clamp_ratings((min, max): (f64, f64)) -> (f64, f64) {
    let sanitize = |v: f64, fallback: f64| {
        if v.is_finite() {
            v.clamp(MIN_RATING, MAX_RATING)
        } else {
            fallback
        }
    };
    let min = sanitize(min, MIN_RATING);
    let max = sanitize(max, MAX_RATING);
    if min > max {
        (max, min)
    } else {
        (min, max)
    }
}

fn parse_rating(value: &str) -> Option<f64> {
    value.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

fn parse_genres(value: &str) -> Vec<i32> {
    dedupe_genres(
        value
            .split(',')
            .filter_map(|s| s.trim().parse::<i32>().ok())
            .collect(),
    )
}

fn dedupe_genres(genres: Vec<i32>) -> Vec<i32> {
    let mut out: Vec<i32> = Vec::with_capacity(genres.len());
    for id in genres {
        if id > 0 && !out.contains(&id) {
            out.push(id);
        }
    }
    out
}

fn parse_pairs(query_string: &str) -> Vec<(String, String)> {
    query_string
        .trim_start_matches('?')
        .split('&')
        .filter(|s| !s.is_empty())
        .map(|pair| {
            let (k, v) = pair.split_once('=').unwrap_or((pair, ""));
            (decode_component(k), decode_component(v))
        })
        .collect()
}

fn decode_component(raw: &str) -> String {
    let spaced = raw.replace('+', " ");
    match urlencoding::decode(&spaced) {
        Ok(s) => s.into_owned(),
        Err(_) => spaced,
    }
}
