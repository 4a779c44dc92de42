//! Chord Analyzer
//!
//! Recognizes chords in a time span of an audio source. Jobs are submitted to an
//! orchestrator that acquires the audio, then either forwards it to a remote
//! recognizer or runs the local chroma + template-matching pipeline.

pub mod app_state;
pub mod config;
pub mod db;
pub mod models;
pub mod routes;
pub mod services;
