//! Turns RSS/Atom articles into self-contained `.eml` files.
//!
//! A run fetches each feed, skips articles the [`ledger`] has already seen
//! with the same content length, downloads the images the rest embed into
//! the [`resource`] cache, rewrites their markup to reference the images by
//! Content-ID, and writes one MIME message per article with [`email`].

pub mod article;
pub mod config;
pub mod email;
pub mod feed;
pub mod http;
pub mod ledger;
pub mod markup;
pub mod pipeline;
pub mod resource;
