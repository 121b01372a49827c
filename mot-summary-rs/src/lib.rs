// mot-summary-rs/src/lib.rs
// Library surface for the MOT summary service

pub mod llm_client;
pub mod mot_client;
pub mod stream_registry;
pub mod summary;

mod tests;
