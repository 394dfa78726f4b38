//! Listing extraction from marketplace search pages
//!
//! The search page embeds its loader state as a JavaScript assignment
//! (`window.__remixContext = {...};`). We locate that script, parse the object
//! and read the article list out of the buy-sell route's loader data.

use anyhow::{Result, anyhow};
use regex::Regex;
use scraper::{Html, Selector};
use serde_json::Value;
use tracing::debug;

use crate::domain::result_item::RawItem;
use crate::infrastructure::scrape_error::ExtractionError;

/// Bodies shorter than this cannot hold a results page.
pub const MIN_BODY_BYTES: usize = 100;

const ROUTE_KEY: &str = "routes/kr.buy-sell._index";
const DEFAULT_TITLE: &str = "(untitled)";
const DEFAULT_LOCATION: &str = "unknown location";

pub struct PageExtractor {
    script_selector: Selector,
    assignment: Regex,
}

impl PageExtractor {
    pub fn new() -> Result<Self> {
        let script_selector =
            Selector::parse("script").map_err(|e| anyhow!("invalid script selector: {e:?}"))?;
        let assignment = Regex::new(r"window\.__remixContext\s*=\s*")?;
        Ok(Self { script_selector, assignment })
    }

    /// Extracts every listing on the page. Articles without a link are skipped.
    pub fn extract(&self, html: &str) -> Result<Vec<RawItem>, ExtractionError> {
        if html.len() < MIN_BODY_BYTES {
            return Err(ExtractionError::BodyTooShort { length: html.len() });
        }

        let state = self.page_state(html)?;
        let articles = descend(
            &state,
            &["state", "loaderData", ROUTE_KEY, "allPage", "fleamarketArticles"],
        )?;
        let articles = articles
            .as_array()
            .ok_or_else(|| ExtractionError::missing_key("fleamarketArticles", Vec::new()))?;

        let items: Vec<RawItem> = articles.iter().filter_map(parse_article).collect();
        debug!("Extracted {} of {} articles", items.len(), articles.len());
        Ok(items)
    }

    fn page_state(&self, html: &str) -> Result<Value, ExtractionError> {
        let document = Html::parse_document(html);
        for script in document.select(&self.script_selector) {
            let text: String = script.text().collect();
            let Some(found) = self.assignment.find(&text) else {
                continue;
            };
            // Only the first JSON value counts; trailing statements are ignored.
            let mut stream =
                serde_json::Deserializer::from_str(&text[found.end()..]).into_iter::<Value>();
            return match stream.next() {
                Some(Ok(value)) => Ok(value),
                Some(Err(e)) => Err(ExtractionError::InvalidJson { reason: e.to_string() }),
                None => Err(ExtractionError::PayloadNotFound),
            };
        }
        Err(ExtractionError::PayloadNotFound)
    }
}

fn descend<'a>(root: &'a Value, path: &[&str]) -> Result<&'a Value, ExtractionError> {
    path.iter().try_fold(root, |node, key| {
        node.get(key).ok_or_else(|| {
            let available = node
                .as_object()
                .map(|map| map.keys().cloned().collect())
                .unwrap_or_default();
            ExtractionError::missing_key(*key, available)
        })
    })
}

fn text_field(value: &Value, key: &str) -> Option<String> {
    value.get(key).and_then(Value::as_str).map(str::to_string)
}

// dbId 는 숫자 또는 문자열로 내려온다
fn id_field(value: &Value, key: &str) -> Option<i64> {
    match value.get(key)? {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn parse_article(article: &Value) -> Option<RawItem> {
    let Some(href) = article.get("href").and_then(Value::as_str) else {
        debug!("Skipping article without href");
        return None;
    };

    let price = match article.get("price") {
        Some(Value::Number(n)) => Some(n.to_string()),
        Some(Value::String(s)) => Some(s.clone()),
        _ => None,
    };

    let user = article.get("user").unwrap_or(&Value::Null);
    let region = article.get("regionId").unwrap_or(&Value::Null);
    let location = text_field(region, "name").unwrap_or_else(|| DEFAULT_LOCATION.to_string());
    let dong_id = id_field(region, "dbId");

    let link = match dong_id {
        Some(id) => {
            let separator = if href.contains('?') { '&' } else { '?' };
            format!("{href}{separator}in={location}-{id}")
        }
        None => href.to_string(),
    };

    Some(RawItem {
        title: text_field(article, "title").unwrap_or_else(|| DEFAULT_TITLE.to_string()),
        price,
        link,
        thumbnail: text_field(article, "thumbnail"),
        location,
        dong_id,
        status: text_field(article, "status"),
        content: text_field(article, "content"),
        nickname: text_field(user, "nickname"),
        nickname_id: id_field(user, "dbId"),
        category_thumbnail: article
            .get("category")
            .and_then(|c| text_field(c, "thumbnail")),
        created_at: text_field(article, "createdAt"),
        boosted_at: text_field(article, "boostedAt"),
    })
}
