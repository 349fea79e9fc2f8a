pub mod casting;
pub mod client;
pub mod ledger;
pub mod llm;
pub mod manifest;
pub mod presets;
pub mod rate_limit;
pub mod retry;
pub mod router;
pub mod script;
pub mod setup;
pub mod tts;
pub mod workflow;
