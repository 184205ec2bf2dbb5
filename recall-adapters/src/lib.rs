//! Adapters for the external collaborators of the recall service.
//!
//! [`traits::ModelAdapter`] is the generation oracle seam; [`openai`] and
//! [`ollama`] implement it over HTTPS. [`embeddings`] provides remote
//! implementations of [`recall_memory::EmbeddingFunction`] on the same client.

#![warn(missing_docs, clippy::pedantic)]

pub mod embeddings;
pub mod ollama;
pub mod openai;
pub mod traits;

mod http_client;
