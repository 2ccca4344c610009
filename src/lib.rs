pub mod api;
pub mod app;
pub mod bootstrap;
pub mod config;
pub mod error;
pub mod events;
pub mod interceptor;
pub mod io;
pub mod models;
pub mod platforms;
pub mod utils;

// Re-export the main error types for convenience
pub use error::{
    AppError, ErrorCode, ErrorReporter, JaydaiError, JaydaiResult, ParseError,
    TracingErrorReporter,
};

// Re-export the normalized model
pub use models::{AssistantResponse, Conversation, Message, Provider, Role};

// Re-export the event bus
pub use events::{EventBus, InterceptKind, InterceptedTraffic, JaydaiEvent};

// Re-export interception entry points
pub use interceptor::{Fetch, FetchInterceptor, FetchRequest, FetchResponse, FetchSlot};

// Re-export platform adapters
pub use platforms::{PlatformAdapter, PlatformContext, PlatformDispatcher, PlatformRegistry};

// Re-export bootstrap and application
pub use app::ExtensionApp;
pub use bootstrap::{Application, Bootstrap, BootstrapConfig, LifecycleSignal, PageHost};

pub use config::{AppConfig, ConfigManager};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_module_structure() {
        // Test that the main modules are accessible
        assert!(std::any::type_name::<FetchInterceptor>().contains("FetchInterceptor"));
        assert!(std::any::type_name::<PlatformRegistry>().contains("PlatformRegistry"));
    }

    #[test]
    fn test_every_provider_has_an_adapter() {
        let registry = PlatformRegistry::builtin();
        for provider in Provider::ALL {
            assert!(
                registry.by_provider(provider).is_some(),
                "missing adapter for {}",
                provider
            );
        }
    }
}
