//! Marketplace listings: raw extraction output, normalized rows, result pages

use std::collections::{BTreeMap, HashMap};
use std::str::FromStr;

use chrono::{DateTime, NaiveDateTime, Utc};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

/// A listing as extracted from one partition page, before normalization.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RawItem {
    pub title: String,
    /// Price text as published (number or formatted string).
    pub price: Option<String>,
    pub link: String,
    pub thumbnail: Option<String>,
    pub location: String,
    pub dong_id: Option<i64>,
    pub status: Option<String>,
    pub content: Option<String>,
    pub nickname: Option<String>,
    pub nickname_id: Option<i64>,
    /// Category marker (thumbnail URL of the category icon).
    pub category_thumbnail: Option<String>,
    pub created_at: Option<String>,
    pub boosted_at: Option<String>,
}

/// A listing ready to be upserted, keyed by `link`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewResultItem {
    pub title: String,
    pub price: Option<f64>,
    pub link: String,
    pub thumbnail: Option<String>,
    pub location: String,
    pub dong_id: Option<i64>,
    pub status: Option<String>,
    pub content: Option<String>,
    pub nickname: Option<String>,
    pub nickname_id: Option<i64>,
    pub category_thumbnail: Option<String>,
    pub category_id: Option<i64>,
    pub created_at_origin: Option<DateTime<Utc>>,
    pub boosted_at: Option<DateTime<Utc>>,
}

impl NewResultItem {
    #[must_use]
    pub fn from_raw(raw: RawItem) -> Self {
        let category_id = raw.category_thumbnail.as_deref().and_then(category_id_for);
        Self {
            price: raw.price.as_deref().and_then(parse_price),
            created_at_origin: raw.created_at.as_deref().and_then(parse_timestamp),
            boosted_at: raw.boosted_at.as_deref().and_then(parse_timestamp),
            title: raw.title,
            link: raw.link,
            thumbnail: raw.thumbnail,
            location: raw.location,
            dong_id: raw.dong_id,
            status: raw.status,
            content: raw.content,
            nickname: raw.nickname,
            nickname_id: raw.nickname_id,
            category_thumbnail: raw.category_thumbnail,
            category_id,
        }
    }
}

/// A persisted listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredResultItem {
    pub id: String,
    pub query: String,
    pub title: String,
    pub price: Option<f64>,
    pub link: String,
    pub thumbnail: Option<String>,
    pub location: String,
    pub sido: Option<String>,
    pub dong_id: Option<i64>,
    pub status: Option<String>,
    pub content: Option<String>,
    pub nickname: Option<String>,
    pub nickname_id: Option<i64>,
    pub category_id: Option<i64>,
    pub created_at_origin: Option<DateTime<Utc>>,
    pub boosted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// A stored listing as returned to callers, with its freshness flag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultView {
    #[serde(flatten)]
    pub item: StoredResultItem,
    pub is_new: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultSort {
    #[default]
    CreatedAtDesc,
    PriceAsc,
}

impl FromStr for ResultSort {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created_at_desc" => Ok(Self::CreatedAtDesc),
            "price_asc" => Ok(Self::PriceAsc),
            other => Err(format!("unknown sort order: {other}")),
        }
    }
}

pub const DEFAULT_PAGE_SIZE: u32 = 20;
pub const MAX_PAGE_SIZE: u32 = 100;

/// Pagination and filter options for a job's results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultQuery {
    pub page: u32,
    pub page_size: u32,
    pub sort: ResultSort,
    pub only_available: bool,
    pub category_ids: Vec<i64>,
    pub sido: Option<String>,
}

impl Default for ResultQuery {
    fn default() -> Self {
        Self {
            page: 1,
            page_size: DEFAULT_PAGE_SIZE,
            sort: ResultSort::default(),
            only_available: false,
            category_ids: Vec::new(),
            sido: None,
        }
    }
}

impl ResultQuery {
    #[must_use]
    pub fn first(limit: u32) -> Self {
        Self {
            page_size: limit,
            ..Self::default()
        }
    }

    /// Page number clamped to at least 1.
    #[must_use]
    pub fn effective_page(&self) -> u32 {
        self.page.max(1)
    }

    /// Page size, falling back to the default when outside `1..=100`.
    #[must_use]
    pub fn effective_page_size(&self) -> u32 {
        if (1..=MAX_PAGE_SIZE).contains(&self.page_size) {
            self.page_size
        } else {
            DEFAULT_PAGE_SIZE
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ResultPage {
    pub items: Vec<ResultView>,
    pub total: i64,
    pub page: u32,
    pub page_size: u32,
    pub pages: i64,
    pub has_next: bool,
    pub has_prev: bool,
    /// Listing count per category id over the job's unfiltered results.
    pub category_counts: BTreeMap<i64, i64>,
}

/// Parses a published price.
///
/// Accepts plain numbers, `1,200,000원` style text, and as a last resort joins
/// every digit run (`"약 3만 5천"` -> `35`).
#[must_use]
pub fn parse_price(text: &str) -> Option<f64> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }
    if let Some(value) = finite_number(trimmed) {
        return Some(value);
    }
    let cleaned: String = trimmed.replace([',', ' '], "").replace('원', "");
    if let Some(value) = finite_number(&cleaned) {
        return Some(value);
    }
    let digits: String = trimmed.chars().filter(char::is_ascii_digit).collect();
    if digits.is_empty() {
        None
    } else {
        finite_number(&digits)
    }
}

// "NaN", "inf" 등은 가격이 아님
fn finite_number(text: &str) -> Option<f64> {
    text.parse::<f64>().ok().filter(|value| value.is_finite())
}

/// Parses RFC 3339 (`Z` suffix included) or `%Y-%m-%d %H:%M:%S` taken as UTC.
#[must_use]
pub fn parse_timestamp(text: &str) -> Option<DateTime<Utc>> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%d %H:%M:%S")
        .ok()
        .map(|naive| naive.and_utc())
}

const CATEGORY_ICON_BASE: &str = "https://dnvefa72aowie.cloudfront.net/origin/";

// 카테고리 아이콘 경로 -> 카테고리 ID
static CATEGORY_IDS: Lazy<HashMap<&'static str, i64>> = Lazy::new(|| {
    HashMap::from([
        ("category/202306/2c0811ac0c0f491039082d246cd41de636d58cd6e54368a0b012c386645d7c66.png", 1), // 디지털기기
        ("category/202306/ff36d0fb3a3214a9cc86c79a84262e0d9e11b6d7289ed9aa75e40d0129764fac.png", 172), // 생활가전
        ("category/202306/088e41c5973184228a2e4a50961ceb6fc366bb3eb11b1ee7c7cd66bcdf9c5529.png", 8), // 가구/인테리어
        ("category/202306/22a78937b8a8ccd0003ff7bb7c247b3863a5046f93a36b5341913ff2935efa43.png", 7), // 생활/주방
        ("category/202306/1975d6ba1725dfbe053daa450cec51757a39943104d57fbdd3fc5c7d8ae07605.png", 4), // 유아동
        ("category/202306/987b21e9e02255cb310e4736b16e056d0bfc90c397e423e599b544bad203601e.png", 173), // 유아도서
        ("brand/202402/b99fb12bcc754a08e5a6f359861bafd80d38678a0c58521abdf314949f9c5e58.png", 5), // 여성의류
        ("category/202306/23f6b89ba63da7cf8135e1063bde3811fb6499dc073585eea161b3727a42535e.png", 31), // 여성잡화
        ("category/202306/38dd757c99863d1748f16292142cabfae9621622cc751faff49a79ed60c1c5e7.png", 14), // 남성패션/잡화
        ("category/202306/1efa73a4e3b45610292223f44c42cbe3c7d93395a23f1134426a58d5639c179b.png", 6), // 뷰티/미용
        ("category/202306/6379c3ba41f03dc6e27796c5f106c8b20b57d79ddb3ba52440084fcd4d10d8dd.png", 3), // 스포츠/레저
        ("category/202306/074da39b1114588ebc61447883f5f0059dd4abc16127f4250f559360f40eb0e2.png", 2), // 취미/게임/음반
        ("category/202306/0ce93f6b19d61169b955dae5422aa9f842933d8ccf35dc4c53cea8656a293e40.png", 9), // 도서
        ("category/202306/631cb98e2c7cf46f1f2520f97b0ec2d30ce426c4c158ea3673f84e0aca088181.png", 304), // 티켓/교환권
        ("category/202306/243b21522a5ff57863942f0ed84a04b3cc72f30ca9edda818f31238fc94066ee.png", 305), // 가공식품
        ("brand/202407/c22153f3cca52c69efb2b4c15e8e644ea7118b2f8c07d378ec8b75489c31cf46.png", 483), // 건강기능식품
        ("category/202306/763d2fb8809deb0a5ebd4ef2694ecb2d8b08f501ab185f7167d87a74a33aee10.png", 16), // 반려동물용품
        ("category/202306/248610f466d99a9a7cafa1c75a818a73bf850e05c7f7c205cbc60c7b7b16f876.png", 139), // 식물
        ("category/202306/407b005b01de954b59aff9e21f729b3c30e3ae249acfb643401f235598dea8e3.png", 13), // 기타 중고물품
        ("category/202306/6a729d83f311aa3e8ffa12c9757cfda323591a0018ce2d25da6bf604615e33c2.png", 32), // 삽니다
    ])
});

/// Maps a category icon URL to its numeric category id.
#[must_use]
pub fn category_id_for(thumbnail_url: &str) -> Option<i64> {
    let path = thumbnail_url.trim().strip_prefix(CATEGORY_ICON_BASE)?;
    CATEGORY_IDS.get(path).copied()
}
