//! Managed RAG client for ragbot.
//!
//! - [`auth`] exchanges service-account credentials for a bearer token
//! - [`token_store`] caches that token and serializes refreshes
//! - [`retrieval`] queries the knowledge base, re-authenticating once on 401
//! - [`render`] turns retrieved documents into the context text the model reads

pub mod auth;
pub mod render;
pub mod retrieval;
pub mod token_store;

pub use auth::{AccessToken, AuthClient, Credentials, HttpAuthClient};
pub use render::render_context;
pub use retrieval::{
    KnowledgeBase, RetrievalClient, RetrievalRequest, RetrievalResult, RetrievedDocument,
    Retriever,
};
pub use token_store::TokenStore;
