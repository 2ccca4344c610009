//! Static lookup of adapters by hostname, name or provider.

use std::sync::{Arc, OnceLock};

use super::{ChatGptAdapter, ClaudeAdapter, CopilotAdapter, MistralAdapter, PlatformAdapter};
use crate::models::Provider;

pub struct PlatformRegistry {
    adapters: Vec<Arc<dyn PlatformAdapter>>,
}

impl PlatformRegistry {
    pub fn new(adapters: Vec<Arc<dyn PlatformAdapter>>) -> Self {
        Self { adapters }
    }

    /// The fixed set of supported providers.
    pub fn builtin() -> &'static PlatformRegistry {
        static BUILTIN: OnceLock<PlatformRegistry> = OnceLock::new();
        BUILTIN.get_or_init(|| {
            PlatformRegistry::new(vec![
                Arc::new(ChatGptAdapter::new()),
                Arc::new(ClaudeAdapter::new()),
                Arc::new(MistralAdapter::new()),
                Arc::new(CopilotAdapter::new()),
            ])
        })
    }

    /// First adapter whose known hostname is contained in `hostname`.
    pub fn by_hostname(&self, hostname: &str) -> Option<Arc<dyn PlatformAdapter>> {
        if hostname.is_empty() {
            return None;
        }
        self.adapters
            .iter()
            .find(|adapter| adapter.matches_hostname(hostname))
            .cloned()
    }

    pub fn by_name(&self, name: &str) -> Option<Arc<dyn PlatformAdapter>> {
        Provider::from_name(name).and_then(|provider| self.by_provider(provider))
    }

    pub fn by_provider(&self, provider: Provider) -> Option<Arc<dyn PlatformAdapter>> {
        self.adapters
            .iter()
            .find(|adapter| adapter.provider() == provider)
            .cloned()
    }

    pub fn is_supported_host(&self, hostname: &str) -> bool {
        self.by_hostname(hostname).is_some()
    }

    pub fn adapters(&self) -> &[Arc<dyn PlatformAdapter>] {
        &self.adapters
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hostname_lookup() {
        let registry = PlatformRegistry::builtin();
        let cases = [
            ("chatgpt.com", Some(Provider::ChatGpt)),
            ("chat.openai.com", Some(Provider::ChatGpt)),
            ("claude.ai", Some(Provider::Claude)),
            ("chat.mistral.ai", Some(Provider::Mistral)),
            ("copilot.microsoft.com", Some(Provider::Copilot)),
            ("example.com", None),
            ("", None),
        ];
        for (hostname, expected) in cases {
            assert_eq!(
                registry.by_hostname(hostname).map(|a| a.provider()),
                expected,
                "hostname {}",
                hostname
            );
        }
        assert!(!registry.is_supported_host("www.google.com"));
    }

    #[test]
    fn test_name_lookup() {
        let registry = PlatformRegistry::builtin();
        assert_eq!(
            registry.by_name("Claude").map(|a| a.provider()),
            Some(Provider::Claude)
        );
        assert_eq!(
            registry.by_name("chatgpt").map(|a| a.provider()),
            Some(Provider::ChatGpt)
        );
        assert!(registry.by_name("Gemini").is_none());
        assert_eq!(registry.adapters().len(), 4);
    }
}
