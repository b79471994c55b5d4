pub mod api_server;
pub mod envelope;
pub mod evaluator;
pub mod identity_resolver;
pub mod notifier;
pub mod verifier;
