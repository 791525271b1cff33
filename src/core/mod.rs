// ─── Launcher Sync Core ───
// Manifest-driven asset synchronization for the game launcher.
//
// Architecture:
//   core/
//     fingerprint/  Sampled BLAKE2b file fingerprints
//     manifest/     Manifest model, validation + publisher-side report
//     planner/      Local scan into skip/fetch actions
//     transfer/     Concurrent fetch, verify, atomic commit
//     progress/     Event aggregation for the UI layer
//     config        config.toml `[game]` / `[sync]` sections
//     http          Shared HTTP client

pub mod config;
pub mod error;
pub mod fingerprint;
pub mod http;
pub mod manifest;
pub mod planner;
pub mod progress;
pub mod transfer;
