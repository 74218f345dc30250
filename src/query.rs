use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Category {
    #[default]
    Popular,
    NowPlaying,
    TopRated,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Popular => "popular",
            Category::NowPlaying => "now-playing",
            Category::TopRated => "top-rated",
        }
    }

    pub fn title(&self) -> &'static str {
        match self {
            Category::Popular => "熱門電影",
            Category::NowPlaying => "現正上映",
            Category::TopRated => "最高評分",
        }
    }

    /// Lenient form used for the `?category=` parameter: anything unknown browses popular.
    pub fn from_param(value: Option<&str>) -> Self {
        value.and_then(|v| v.parse().ok()).unwrap_or_default()
    }
}

impl FromStr for Category {
    type Err = anyhow::Error;
    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "popular" => Ok(Category::Popular),
            "now-playing" | "now_playing" => Ok(Category::NowPlaying),
            "top-rated" | "top_rated" => Ok(Category::TopRated),
            other => Err(anyhow::anyhow!("unknown category '{}'", other)),
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of one logical page stream. A new key invalidates accumulated pages.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "mode", content = "value", rename_all = "snake_case")]
pub enum QueryKey {
    Browse(Category),
    Search(String),
}

impl QueryKey {
    pub fn resolve(category: Category, text: &str) -> Self {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            QueryKey::Browse(category)
        } else {
            QueryKey::Search(trimmed.to_string())
        }
    }

    pub fn search_text(&self) -> &str {
        match self {
            QueryKey::Browse(_) => "",
            QueryKey::Search(text) => text,
        }
    }
}

impl Default for QueryKey {
    fn default() -> Self {
        QueryKey::Browse(Category::default())
    }
}

impl fmt::Display for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryKey::Browse(c) => write!(f, "browse:{c}"),
            QueryKey::Search(q) => write!(f, "search:{q}"),
        }
    }
}

/// Decides whether the list shows a browse category or search results.
///
/// Search is submit-triggered: only an explicit submit changes the key, typing
/// alone never does. Every method returns the new key only when it differs from
/// the current one, which is the caller's signal to reset its accumulator.
#[derive(Debug, Clone, Default)]
pub struct ModeSwitch {
    category: Category,
    search: String,
}

impl ModeSwitch {
    pub fn new(category: Category) -> Self {
        Self {
            category,
            search: String::new(),
        }
    }

    pub fn current(&self) -> QueryKey {
        QueryKey::resolve(self.category, &self.search)
    }

    pub fn category(&self) -> Category {
        self.category
    }

    pub fn submit(&mut self, text: &str) -> Option<QueryKey> {
        let before = self.current();
        self.search = text.trim().to_string();
        self.changed(before)
    }

    /// Switching category while a search is active keeps the search on screen;
    /// the category takes effect once the search is cleared.
    pub fn select_category(&mut self, category: Category) -> Option<QueryKey> {
        let before = self.current();
        self.category = category;
        self.changed(before)
    }

    pub fn clear(&mut self) -> Option<QueryKey> {
        self.submit("")
    }

    fn changed(&self, before: QueryKey) -> Option<QueryKey> {
        let after = self.current();
        (after != before).then_some(after)
    }
}
