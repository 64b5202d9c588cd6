//! URL-safe slug derivation
//!
//! Slugs are derived from the product title (falling back to the category)
//! and must be reproducible: the same title and category always yield the same
//! slug, and collisions inside one run are resolved by a numeric suffix in
//! encounter order.

use std::collections::HashSet;

/// Default maximum slug length in characters.
pub const DEFAULT_MAX_SLUG_LENGTH: usize = 50;

const FALLBACK_SLUG: &str = "product";

/// Lowercase, hyphenate whitespace runs, drop everything that is not
/// `[a-z0-9-]`, collapse hyphens and truncate to `max_len`.
pub fn slugify(text: &str, max_len: usize) -> String {
    let mut slug = String::with_capacity(text.len().min(max_len * 2));
    let mut pending_hyphen = false;

    for ch in text.chars().flat_map(char::to_lowercase) {
        if ch.is_whitespace() || ch == '-' {
            pending_hyphen = true;
        } else if ch.is_ascii_alphanumeric() {
            if pending_hyphen && !slug.is_empty() {
                slug.push('-');
            }
            pending_hyphen = false;
            slug.push(ch);
        }
    }

    truncate_slug(&slug, max_len)
}

/// Slug for a product: title first, then category, then a fixed fallback.
pub fn derive_slug(title: &str, category: &str, max_len: usize) -> String {
    let from_title = slugify(title, max_len);
    if !from_title.is_empty() {
        return from_title;
    }
    let from_category = slugify(category, max_len);
    if !from_category.is_empty() {
        return from_category;
    }
    truncate_slug(FALLBACK_SLUG, max_len)
}

fn truncate_slug(slug: &str, max_len: usize) -> String {
    // slug is ASCII at this point, byte and char positions coincide
    let cut = slug.len().min(max_len);
    slug[..cut].trim_end_matches('-').to_string()
}

/// Tracks slugs already handed out in a run.
#[derive(Debug, Clone)]
pub struct SlugRegistry {
    max_len: usize,
    taken: HashSet<String>,
}

impl SlugRegistry {
    pub fn new(max_len: usize) -> Self {
        Self {
            max_len,
            taken: HashSet::new(),
        }
    }

    /// Reserve `base`, or the first free `base-N` (N = 2, 3, ...) if it is taken.
    /// The base is shortened so the suffixed slug still fits `max_len`.
    pub fn claim(&mut self, base: &str) -> String {
        if self.taken.insert(base.to_string()) {
            return base.to_string();
        }

        let mut counter: usize = 2;
        loop {
            let suffix = format!("-{counter}");
            let room = self.max_len.saturating_sub(suffix.len());
            let stem = truncate_slug(base, room);
            let candidate = if stem.is_empty() {
                format!("{FALLBACK_SLUG}{suffix}")
            } else {
                format!("{stem}{suffix}")
            };
            if self.taken.insert(candidate.clone()) {
                return candidate;
            }
            counter += 1;
        }
    }

    pub fn contains(&self, slug: &str) -> bool {
        self.taken.contains(slug)
    }

    pub fn len(&self) -> usize {
        self.taken.len()
    }

    pub fn is_empty(&self) -> bool {
        self.taken.is_empty()
    }
}

impl Default for SlugRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_SLUG_LENGTH)
    }
}
