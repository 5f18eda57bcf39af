//! Pure text stages shared by the quick and full extraction passes.
//!
//! None of these touch the filesystem or spawn work, so both passes can run
//! them on the blocking pool and get identical results for identical input.
//!
//! ## Data Flow
//!
//! ```text
//! items ──▶ plain text ──▶ normalize ──▶ layout
//!   └──────────────────────▶ chapters
//! ```
//!
//! 1. [`normalize`] — regex cleanup of spacing artefacts left by markup
//! 2. [`layout`]    — greedy word-wrap into fixed-size pages
//! 3. [`chapters`]  — TOC-first chapter titles, headings as fallback

pub mod chapters;
pub mod layout;
pub mod normalize;
