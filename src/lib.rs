// Encrypted token storage (codec, validation, store)
pub mod credentials;

// Key-value backends with TTL
pub mod kv;

// OAuth providers and refresh strategies
pub mod providers;

// Valid-token accessor (fetch, check expiry, refresh)
pub mod accessor;

// Authorization-code flow and CSRF state
pub mod oauth;

// HTTP API
pub mod api;

// Configuration
pub mod config;
