//! Bot and crawler detection over the raw `User-Agent` header
//!
//! Two independent detectors are combined with a logical OR:
//! - the woothee device-fingerprint parser, which tags known crawlers
//! - a substring heuristic for automation tools woothee does not know

use regex::RegexSet;
use std::sync::OnceLock;
use woothee::parser::Parser;

/// Lower-cased fragments that mark automated clients
const CRAWLER_PATTERNS: &[&str] = &[
    r"bot(?:[/_;)\-]|$)",
    r"crawl",
    r"spider",
    r"slurp",
    r"scrap",
    r"archiver",
    r"facebookexternalhit",
    r"mediapartners",
    r"headless",
    r"phantomjs",
    r"lighthouse",
    r"pingdom",
    r"(?:^|[^a-z])uptime(?:robot|-kuma)?(?:[/_;)\-]|$)",
    r"(?:^|[^a-z])monitor(?:ing)?(?:[/_;)\-]|$)",
    r"(?:^|[^a-z])preview(?:[/_;)\-]|$)",
    r"^curl/",
    r"^wget",
    r"^python-",
    r"^java/",
    r"^go-http-client",
    r"^okhttp",
    r"^apache-httpclient",
    r"^libwww-perl",
    r"^node-fetch",
    r"^axios/",
    r"^postmanruntime",
];

static CRAWLER_SET: OnceLock<RegexSet> = OnceLock::new();

fn crawler_set() -> &'static RegexSet {
    CRAWLER_SET.get_or_init(|| RegexSet::new(CRAWLER_PATTERNS).expect("valid crawler patterns"))
}

/// Verdict for a single user-agent
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    Normal,
    /// Identified by the device-fingerprint parser
    Bot,
    /// Identified by the crawler heuristic
    Crawler,
}

impl Classification {
    pub fn is_automated(&self) -> bool {
        !matches!(self, Classification::Normal)
    }
}

pub struct CrawlerDetector;

impl CrawlerDetector {
    pub fn is_crawler(user_agent: &str) -> bool {
        let ua = user_agent.trim().to_lowercase();
        if ua.is_empty() {
            return false;
        }
        crawler_set().is_match(&ua)
    }
}

/// Rejects events sent by bots and crawlers
#[derive(Default, Clone, Copy)]
pub struct BotFilter;

impl BotFilter {
    pub fn new() -> Self {
        Self
    }

    /// Device-fingerprint verdict
    pub fn is_bot(&self, user_agent: &str) -> bool {
        if user_agent.trim().is_empty() {
            return false;
        }
        Parser::new()
            .parse(user_agent)
            .map(|result| result.category == "crawler")
            .unwrap_or(false)
    }

    pub fn classify(&self, user_agent: &str) -> Classification {
        if self.is_bot(user_agent) {
            Classification::Bot
        } else if CrawlerDetector::is_crawler(user_agent) {
            Classification::Crawler
        } else {
            Classification::Normal
        }
    }
}
