#![forbid(unsafe_code)]

//! Library behind the `ytdl` command: downloads single videos or resyncs
//! whole playlists into a directory of tagged mp4 files.

pub mod config;
pub mod error;
pub mod metadata;
pub mod platform;
pub mod playlist;
pub mod quality;
pub mod sanitize;
pub mod scanner;
pub mod tags;
pub mod video;
pub mod ytdlp;

#[cfg(test)]
mod testing;
