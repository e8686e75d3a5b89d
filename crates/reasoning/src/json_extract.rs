//! Re-exports `sa_domain::json_extract` — the balanced-`{...}`-span finder
//! used to pull JSON out of LLM responses that wrap it in prose. Lives in
//! `sa_domain` so `sa_sessions`'s State Extractor can use the same logic
//! without depending on this crate.

pub use sa_domain::json_extract::extract_json_object;
