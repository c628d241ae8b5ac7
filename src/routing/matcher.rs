//! Special path matching.
//!
//! # Responsibilities
//! - Match the raw path-and-query exactly or by prefix
//! - Classify the administrative paths the proxy answers itself
//!
//! # Design Decisions
//! - Matching is case-sensitive and includes the query, so `/test?x` is
//!   proxied like any other request
//! - No regex to guarantee O(n) matching
//! - First match wins

/// Trait for matching a request's path-and-query.
pub trait Matcher: Send + Sync + std::fmt::Debug {
    fn matches(&self, path_and_query: &str) -> bool;
}

/// Matches one path exactly.
#[derive(Debug, Clone)]
pub struct ExactMatcher {
    path: String,
}

impl ExactMatcher {
    pub fn new(path: impl Into<String>) -> Self {
        Self { path: path.into() }
    }
}

impl Matcher for ExactMatcher {
    fn matches(&self, path_and_query: &str) -> bool {
        path_and_query == self.path
    }
}

/// Matches the request path prefix.
#[derive(Debug, Clone)]
pub struct PathPrefixMatcher {
    prefix: String,
}

impl PathPrefixMatcher {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }
}

impl Matcher for PathPrefixMatcher {
    fn matches(&self, path_and_query: &str) -> bool {
        path_and_query.starts_with(&self.prefix)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpecialPath {
    Favicon,
    Swagger,
    TestPage,
    Shutdown,
    Upload,
}

impl SpecialPath {
    pub fn label(self) -> &'static str {
        match self {
            SpecialPath::Favicon => "favicon",
            SpecialPath::Swagger => "swagger",
            SpecialPath::TestPage => "test_page",
            SpecialPath::Shutdown => "shutdown",
            SpecialPath::Upload => "upload",
        }
    }
}

/// Ordered table of administrative paths.
#[derive(Debug)]
pub struct SpecialPaths {
    entries: Vec<(Box<dyn Matcher>, SpecialPath)>,
}

impl SpecialPaths {
    pub fn new(entries: Vec<(Box<dyn Matcher>, SpecialPath)>) -> Self {
        Self { entries }
    }

    /// The paths the proxy answers without consulting the version table.
    pub fn standard() -> Self {
        Self::new(vec![
            (Box::new(ExactMatcher::new("/favicon.ico")), SpecialPath::Favicon),
            (Box::new(PathPrefixMatcher::new("/swagger")), SpecialPath::Swagger),
            (Box::new(ExactMatcher::new("/test")), SpecialPath::TestPage),
            (Box::new(ExactMatcher::new("/shutdown")), SpecialPath::Shutdown),
            (Box::new(ExactMatcher::new("/upload")), SpecialPath::Upload),
        ])
    }

    pub fn classify(&self, path_and_query: &str) -> Option<SpecialPath> {
        self.entries
            .iter()
            .find(|(matcher, _)| matcher.matches(path_and_query))
            .map(|(_, kind)| *kind)
    }
}

impl Default for SpecialPaths {
    fn default() -> Self {
        Self::standard()
    }
}
