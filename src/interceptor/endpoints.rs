//! URL-pattern classification of intercepted requests.

use regex::Regex;

use crate::events::InterceptKind;

/// A single endpoint pattern.
#[derive(Debug, Clone)]
pub enum Pattern {
    /// Matches when the path contains the string
    Contains(&'static str),
    /// Matches when the regex matches anywhere in the path
    Regex(Regex),
}

impl Pattern {
    /// Builds a regex pattern; an invalid one disables that endpoint.
    pub fn regex(pattern: &str) -> Option<Self> {
        match Regex::new(pattern) {
            Ok(regex) => Some(Pattern::Regex(regex)),
            Err(e) => {
                tracing::error!("❌ Invalid endpoint pattern '{}': {}", pattern, e);
                None
            }
        }
    }

    pub fn matches(&self, path: &str) -> bool {
        match self {
            Pattern::Contains(needle) => path.contains(needle),
            Pattern::Regex(regex) => regex.is_match(path),
        }
    }

    /// First capture group, if this is a regex with one.
    pub fn capture(&self, path: &str) -> Option<String> {
        match self {
            Pattern::Contains(_) => None,
            Pattern::Regex(regex) => regex
                .captures(path)
                .and_then(|caps| caps.get(1))
                .map(|m| m.as_str().to_string()),
        }
    }
}

/// The endpoints one provider exposes.
#[derive(Debug, Clone, Default)]
pub struct EndpointSet {
    pub user_info: Option<Pattern>,
    pub conversation_list: Option<Pattern>,
    pub chat_completion: Option<Pattern>,
    pub specific_conversation: Option<Pattern>,
    /// Only POSTs are considered chat completions
    pub completion_requires_post: bool,
}

impl EndpointSet {
    /// Classifies a request, or `None` for unclassified traffic.
    pub fn classify(&self, url: &str, method: &str) -> Option<InterceptKind> {
        if url.is_empty() {
            return None;
        }
        let path = request_path(url);

        if matches(&self.specific_conversation, &path) {
            return Some(InterceptKind::SpecificConversation);
        }
        if matches(&self.user_info, &path) {
            return Some(InterceptKind::UserInfo);
        }
        if matches(&self.conversation_list, &path) {
            return Some(InterceptKind::ConversationList);
        }
        if matches(&self.chat_completion, &path)
            && (!self.completion_requires_post || method.eq_ignore_ascii_case("POST"))
        {
            return Some(InterceptKind::ChatCompletion);
        }

        tracing::trace!(path = %path, "No endpoint match");
        None
    }

    /// Conversation id captured by the specific-conversation pattern.
    pub fn conversation_id(&self, url: &str) -> Option<String> {
        let path = request_path(url);
        self.specific_conversation
            .as_ref()
            .and_then(|pattern| pattern.capture(&path))
    }
}

fn matches(pattern: &Option<Pattern>, path: &str) -> bool {
    pattern.as_ref().map(|p| p.matches(path)).unwrap_or(false)
}

/// Reduces an absolute URL to `pathname + search`; relative URLs pass through.
pub fn request_path(url: &str) -> String {
    if !url.starts_with("http") {
        return url.to_string();
    }
    match url::Url::parse(url) {
        Ok(parsed) => match parsed.query() {
            Some(query) => format!("{}?{}", parsed.path(), query),
            None => parsed.path().to_string(),
        },
        Err(_) => url.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> EndpointSet {
        EndpointSet {
            user_info: Some(Pattern::Contains("/api/user")),
            conversation_list: Pattern::regex(r"/api/chats(\?.*)?$"),
            chat_completion: Some(Pattern::Contains("/api/chats/send")),
            specific_conversation: Pattern::regex(r"/api/chats/([a-f0-9-]+)$"),
            completion_requires_post: true,
        }
    }

    #[test]
    fn test_request_path_strips_origin() {
        assert_eq!(
            request_path("https://chatgpt.com/backend-api/conversations?offset=0&limit=28"),
            "/backend-api/conversations?offset=0&limit=28"
        );
        assert_eq!(request_path("/relative/path"), "/relative/path");
    }

    #[test]
    fn test_classification_order() {
        let endpoints = sample();
        assert_eq!(
            endpoints.classify("https://x.test/api/chats/abc-123", "GET"),
            Some(InterceptKind::SpecificConversation)
        );
        assert_eq!(
            endpoints.classify("/api/chats?limit=10", "GET"),
            Some(InterceptKind::ConversationList)
        );
        assert_eq!(
            endpoints.classify("/api/user", "GET"),
            Some(InterceptKind::UserInfo)
        );
        assert_eq!(
            endpoints.classify("/api/chats/send", "POST"),
            Some(InterceptKind::ChatCompletion)
        );
        assert_eq!(endpoints.classify("/api/chats/send", "GET"), None);
        assert_eq!(endpoints.classify("/static/app.js", "GET"), None);
        assert_eq!(endpoints.classify("", "GET"), None);
    }

    #[test]
    fn test_conversation_id_capture() {
        let endpoints = sample();
        assert_eq!(
            endpoints.conversation_id("https://x.test/api/chats/abc-123"),
            Some("abc-123".to_string())
        );
        assert_eq!(endpoints.conversation_id("/api/user"), None);
    }
}
