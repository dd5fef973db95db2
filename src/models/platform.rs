//! Supported e-commerce platforms.

use std::fmt;

use serde::{Deserialize, Serialize};

/// An external e-commerce site with its own crawler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Platform {
    #[serde(rename = "JD")]
    Jd,
    #[serde(rename = "Taobao")]
    Taobao,
}

impl Platform {
    /// Every platform with a built-in crawler.
    pub const ALL: [Platform; 2] = [Platform::Jd, Platform::Taobao];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Jd => "JD",
            Self::Taobao => "Taobao",
        }
    }

    /// Parse a platform name, ignoring case.
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "jd" => Some(Self::Jd),
            "taobao" => Some(Self::Taobao),
            _ => None,
        }
    }

    /// Registrable domains whose hosts belong to this platform.
    pub fn domains(&self) -> &'static [&'static str] {
        match self {
            Self::Jd => &["jd.com"],
            Self::Taobao => &["taobao.com"],
        }
    }

    /// Whether `host` is one of this platform's domains or a subdomain of one.
    pub fn matches_host(&self, host: &str) -> bool {
        let host = host.trim_end_matches('.').to_ascii_lowercase();
        self.domains().iter().any(|domain| {
            host == *domain
                || host
                    .strip_suffix(domain)
                    .is_some_and(|rest| rest.ends_with('.'))
        })
    }

    /// Stored product id for a listing. Source ids are only unique per platform.
    pub fn product_id(&self, external_id: &str) -> String {
        format!("{}:{}", self.as_str(), external_id)
    }

    /// Cache tag shared by every entry crawled from this platform.
    pub fn cache_tag(&self) -> String {
        format!("platform:{}", self.as_str())
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
