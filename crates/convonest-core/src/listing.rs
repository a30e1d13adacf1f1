//! Paged, sorted view over the fetched posts.

use std::fmt;
use std::str::FromStr;

use convonest_types::Post;

use crate::config::Config;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortKey {
    /// `created_at` descending.
    #[default]
    Newest,
    /// Upvotes minus downvotes, descending.
    Popularity,
}

impl fmt::Display for SortKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SortKey::Newest => write!(f, "newest"),
            SortKey::Popularity => write!(f, "popularity"),
        }
    }
}

impl FromStr for SortKey {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "newest" | "new" | "recent" => Ok(SortKey::Newest),
            "popularity" | "popular" | "top" => Ok(SortKey::Popularity),
            other => Err(format!(
                "Unknown sort key: {other} (expected newest or popularity)"
            )),
        }
    }
}

/// Sorts in place. Both orderings are stable.
pub fn sort_posts(posts: &mut [Post], key: SortKey) {
    match key {
        SortKey::Newest => posts.sort_by(|a, b| b.created_at.cmp(&a.created_at)),
        SortKey::Popularity => posts.sort_by_key(|post| std::cmp::Reverse(post.score())),
    }
}

/// Paging state over a collection of posts.
///
/// Pages are 1-indexed and always within `1..=total_pages()`.
#[derive(Debug, Clone)]
pub struct Listing {
    posts: Vec<Post>,
    sort_key: SortKey,
    tag_filter: Option<String>,
    page: usize,
    page_size: usize,
}

impl Listing {
    /// A page size of zero is treated as one.
    pub fn new(page_size: usize) -> Self {
        Self {
            posts: Vec::new(),
            sort_key: SortKey::default(),
            tag_filter: None,
            page: 1,
            page_size: page_size.max(1),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.page_size)
    }

    /// Replaces the collection, keeping sort, filter and (clamped) page.
    pub fn set_posts(&mut self, posts: Vec<Post>) {
        self.posts = posts;
        self.page = self.page.min(self.total_pages());
    }

    pub fn sort_key(&self) -> SortKey {
        self.sort_key
    }

    pub fn set_sort_key(&mut self, key: SortKey) {
        self.sort_key = key;
        self.page = 1;
    }

    pub fn tag_filter(&self) -> Option<&str> {
        self.tag_filter.as_deref()
    }

    /// Restricts the listing to one tag (case-insensitive). Resets to page 1.
    pub fn set_tag_filter(&mut self, tag: Option<&str>) {
        self.tag_filter = tag
            .map(str::trim)
            .filter(|tag| !tag.is_empty())
            .map(str::to_string);
        self.page = 1;
    }

    pub fn page(&self) -> usize {
        self.page
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Jumps to `page`, clamped to the valid range.
    pub fn go_to(&mut self, page: usize) {
        self.page = page.clamp(1, self.total_pages());
    }

    /// Returns whether the page changed.
    pub fn next_page(&mut self) -> bool {
        let before = self.page;
        self.go_to(self.page + 1);
        self.page != before
    }

    /// Returns whether the page changed.
    pub fn prev_page(&mut self) -> bool {
        let before = self.page;
        self.go_to(self.page.saturating_sub(1));
        self.page != before
    }

    /// Number of posts that pass the tag filter.
    pub fn len(&self) -> usize {
        self.filtered().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn total_pages(&self) -> usize {
        self.len().div_ceil(self.page_size).max(1)
    }

    /// The posts on the current page, in sort order.
    pub fn visible_slice(&self) -> Vec<Post> {
        let mut sorted: Vec<Post> = self.filtered().cloned().collect();
        sort_posts(&mut sorted, self.sort_key);
        sorted
            .into_iter()
            .skip((self.page - 1) * self.page_size)
            .take(self.page_size)
            .collect()
    }

    pub fn get(&self, post_id: &str) -> Option<&Post> {
        self.posts.iter().find(|post| post.id == post_id)
    }

    /// Swaps in a newer version of a post. Returns whether it was present.
    pub fn replace_post(&mut self, post: Post) -> bool {
        match self.posts.iter_mut().find(|existing| existing.id == post.id) {
            Some(existing) => {
                *existing = post;
                true
            }
            None => false,
        }
    }

    fn filtered(&self) -> impl Iterator<Item = &Post> {
        self.posts.iter().filter(move |post| match &self.tag_filter {
            Some(tag) => post.tag.eq_ignore_ascii_case(tag),
            None => true,
        })
    }
}
