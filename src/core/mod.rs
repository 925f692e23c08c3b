// ─── Server Manager Core ───
// Lifecycle management for locally hosted game servers.
//
// Architecture:
//   core/
//     downloader/  Streaming downloads with SHA-1 validation + artifact fetcher
//     java/        Runtime provisioning (download, extract, normalize)
//     version/     Version manifest + per-version manifest resolution
//     console/     Console log + stdin/stdout bridge
//     instance/    Instance config, agreement flag, on-disk store
//     launch/      Launch preparation, process spawn, lifecycle state machine
//     state/       Settings, registry, manager facade

pub mod console;
pub mod downloader;
pub mod error;
pub mod http;
pub mod instance;
pub mod java;
pub mod launch;
pub mod locks;
pub mod state;
pub mod version;
