//! Listing page parser with selector fallback strategies
//!
//! Every field has an ordered list of CSS selectors; the first one that yields
//! a value wins. Container selectors are tried the same way and the first one
//! matching anything decides the item set for the page.

#![allow(clippy::uninlined_format_args)]

use scraper::{ElementRef, Html, Selector};
use tracing::{debug, warn};
use url::Url;

use crate::domain::SelectorOverrides;
use crate::error::ParseError;

const IMAGE_ATTRIBUTES: [&str; 4] = ["src", "data-src", "data-old-hires", "data-original"];

/// Selector lists per field, in priority order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListingSelectors {
    pub container: Vec<String>,
    pub title: Vec<String>,
    pub price: Vec<String>,
    pub image: Vec<String>,
    pub link: Vec<String>,
}

impl ListingSelectors {
    pub fn new(container: &[&str], title: &[&str], price: &[&str], image: &[&str], link: &[&str]) -> Self {
        let owned = |list: &[&str]| list.iter().map(|s| (*s).to_string()).collect();
        Self {
            container: owned(container),
            title: owned(title),
            price: owned(price),
            image: owned(image),
            link: owned(link),
        }
    }

    /// Target-level overrides replace the platform defaults field by field.
    pub fn with_overrides(mut self, overrides: Option<&SelectorOverrides>) -> Self {
        let Some(overrides) = overrides else {
            return self;
        };
        let apply = |field: &mut Vec<String>, value: &Option<String>| {
            if let Some(selector) = value.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
                *field = vec![selector.to_string()];
            }
        };
        apply(&mut self.container, &overrides.container);
        apply(&mut self.title, &overrides.title);
        apply(&mut self.price, &overrides.price);
        apply(&mut self.image, &overrides.image);
        apply(&mut self.link, &overrides.link);
        self
    }
}

/// Fields found for one listing item. Nothing is guaranteed to be present.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListingItem {
    pub title: Option<String>,
    pub price_text: Option<String>,
    pub image_url: Option<String>,
    pub link: Option<Url>,
}

impl ListingItem {
    pub fn is_empty(&self) -> bool {
        self.title.is_none() && self.price_text.is_none() && self.image_url.is_none() && self.link.is_none()
    }
}

struct CompiledSelector {
    raw: String,
    selector: Selector,
}

/// Parser for extracting product cards from listing pages
pub struct ListingParser {
    container: Vec<CompiledSelector>,
    title: Vec<CompiledSelector>,
    price: Vec<CompiledSelector>,
    image: Vec<CompiledSelector>,
    link: Vec<CompiledSelector>,
}

impl ListingParser {
    pub fn new(selectors: &ListingSelectors) -> Result<Self, ParseError> {
        Ok(Self {
            container: Self::compile_selectors("container", &selectors.container)?,
            title: Self::compile_selectors("title", &selectors.title)?,
            price: Self::compile_selectors("price", &selectors.price)?,
            image: Self::compile_selectors("image", &selectors.image)?,
            link: Self::compile_selectors("link", &selectors.link)?,
        })
    }

    /// Compile selector strings, skipping invalid ones. Fails only when
    /// nothing usable is left for the field.
    fn compile_selectors(field: &str, selector_strings: &[String]) -> Result<Vec<CompiledSelector>, ParseError> {
        let mut compiled = Vec::new();
        let mut last_error = None;

        for raw in selector_strings {
            match Selector::parse(raw) {
                Ok(selector) => compiled.push(CompiledSelector {
                    raw: raw.clone(),
                    selector,
                }),
                Err(e) => {
                    warn!("Failed to compile {} selector '{}': {}", field, raw, e);
                    last_error = Some((raw.clone(), e.to_string()));
                }
            }
        }

        if compiled.is_empty() {
            let (selector, reason) = last_error.unwrap_or_else(|| (String::new(), "no selectors configured".to_string()));
            return Err(ParseError::InvalidSelector {
                field: field.to_string(),
                selector,
                reason,
            });
        }
        Ok(compiled)
    }

    /// Parse a listing page. Items with no usable field are skipped; a page
    /// without any container match is a `ParseError::NoContainers`.
    pub fn parse(&self, html: &str, page_url: &Url) -> Result<Vec<ListingItem>, ParseError> {
        let document = Html::parse_document(html);

        for container in &self.container {
            let elements: Vec<ElementRef> = document.select(&container.selector).collect();
            if elements.is_empty() {
                continue;
            }
            debug!(
                "Found {} product containers on {} using '{}'",
                elements.len(),
                page_url,
                container.raw
            );

            let items = elements
                .iter()
                .enumerate()
                .filter_map(|(index, element)| {
                    let item = self.extract_item(element, page_url);
                    if item.is_empty() {
                        debug!("Skipping empty product container #{} on {}", index, page_url);
                        None
                    } else {
                        Some(item)
                    }
                })
                .collect();
            return Ok(items);
        }

        Err(ParseError::no_containers(
            page_url.as_str(),
            self.container.iter().map(|c| c.raw.clone()).collect(),
        ))
    }

    fn extract_item(&self, element: &ElementRef, page_url: &Url) -> ListingItem {
        let image_element = first_match(element, &self.image);
        let title = extract_text_with_fallbacks(element, &self.title).or_else(|| {
            image_element
                .and_then(|img| img.value().attr("alt"))
                .map(normalize_whitespace)
                .filter(|alt| !alt.is_empty())
        });

        ListingItem {
            title,
            price_text: extract_text_with_fallbacks(element, &self.price),
            image_url: image_element.and_then(|img| extract_image_url(&img, page_url)),
            link: self.extract_link(element, page_url),
        }
    }

    fn extract_link(&self, element: &ElementRef, page_url: &Url) -> Option<Url> {
        self.link
            .iter()
            .filter_map(|compiled| element.select(&compiled.selector).next())
            .chain(std::iter::once(*element))
            .find_map(|candidate| candidate.value().attr("href"))
            .and_then(|href| resolve_url(href, page_url))
    }
}

fn first_match<'a>(element: &ElementRef<'a>, selectors: &[CompiledSelector]) -> Option<ElementRef<'a>> {
    selectors
        .iter()
        .find_map(|compiled| element.select(&compiled.selector).next())
}

/// Extract text content using multiple selectors as fallbacks
fn extract_text_with_fallbacks(element: &ElementRef, selectors: &[CompiledSelector]) -> Option<String> {
    selectors.iter().find_map(|compiled| {
        element
            .select(&compiled.selector)
            .map(|e| normalize_whitespace(&e.text().collect::<String>()))
            .find(|text| !text.is_empty())
    })
}

fn extract_image_url(image: &ElementRef, page_url: &Url) -> Option<String> {
    let value = image.value();
    IMAGE_ATTRIBUTES
        .iter()
        .filter_map(|attr| value.attr(attr))
        .chain(
            value
                .attr("srcset")
                .and_then(|srcset| srcset.split(',').next())
                .and_then(|entry| entry.split_whitespace().next()),
        )
        .map(str::trim)
        .filter(|src| !src.is_empty() && !src.starts_with("data:"))
        .find_map(|src| resolve_url(src, page_url))
        .map(String::from)
}

/// Resolve relative URLs against the page URL
pub fn resolve_url(href: &str, base_url: &Url) -> Option<Url> {
    let href = href.trim();
    if href.is_empty() || href.starts_with("javascript:") || href.starts_with('#') {
        return None;
    }
    base_url
        .join(href)
        .ok()
        .filter(|url| matches!(url.scheme(), "http" | "https"))
}

fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
