// Sound board engine
//
// A small appliance service:
//   - Store short audio clips uploaded through the web UI
//   - Play one clip at a time on the host speaker through an external player
//   - Expose a JSON API for the clip catalog, settings and playback control

pub mod api;
pub mod audio;
pub mod config;
pub mod db;
pub mod error;
