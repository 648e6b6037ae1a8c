use crate::response::Response;

/// Service extensions a server advertised in its EHLO reply.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Capabilities {
    keywords: Vec<String>,
}

impl Capabilities {
    /// Parse an EHLO reply. The first line is the server's greeting and is
    /// not a keyword.
    #[must_use]
    pub fn from_ehlo(response: &Response) -> Self {
        Self {
            keywords: response
                .lines
                .iter()
                .skip(1)
                .map(|line| line.trim().to_string())
                .filter(|line| !line.is_empty())
                .collect(),
        }
    }

    /// Whether `keyword` was advertised (case-insensitive, parameters ignored).
    #[must_use]
    pub fn supports(&self, keyword: &str) -> bool {
        self.keywords.iter().any(|line| {
            line.split_whitespace()
                .next()
                .is_some_and(|word| word.eq_ignore_ascii_case(keyword))
        })
    }

    #[must_use]
    pub fn starttls(&self) -> bool {
        self.supports("STARTTLS")
    }

    /// Mechanisms listed after `AUTH`, upper-cased.
    #[must_use]
    pub fn auth_mechanisms(&self) -> Vec<String> {
        self.parameters("AUTH")
            .map(|params| params.iter().map(|m| m.to_ascii_uppercase()).collect())
            .unwrap_or_default()
    }

    /// Maximum message size from `SIZE`, if the server gave one.
    #[must_use]
    pub fn max_size(&self) -> Option<usize> {
        self.parameters("SIZE")?.first()?.parse().ok()
    }

    #[must_use]
    pub fn keywords(&self) -> &[String] {
        &self.keywords
    }

    fn parameters(&self, keyword: &str) -> Option<Vec<&str>> {
        self.keywords.iter().find_map(|line| {
            let mut words = line.split_whitespace();
            words
                .next()
                .filter(|word| word.eq_ignore_ascii_case(keyword))
                .map(|_| words.collect())
        })
    }
}
