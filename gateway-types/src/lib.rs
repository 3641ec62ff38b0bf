#![deny(missing_docs)]
//! Shared type definitions for the realtime collaboration gateway.
//!
//! This crate groups together the wire-level messages and collaborator
//! traits used across the gateway. It provides:
//!
//! * The workspace identity and canonicalization used to key the
//!   registries (see [`workspace`]).
//! * The decoded bearer token shape and the [`token::TokenDecoder`] trait
//!   implemented by the (out of scope) authentication token issuer (see
//!   [`token`]).
//! * The request/response envelope exchanged with clients over the
//!   connection transport (see [`wire`]).
//! * The error taxonomy shared between the gateway and its clients (see
//!   [`errors`]).
//! * The [`pipeline::Pipeline`] and [`pipeline::PipelineFactory`] traits
//!   that describe the opaque, per-workspace domain engine (see
//!   [`pipeline`]).
//!
//! Implementations of a concrete gateway provide a [`token::TokenDecoder`]
//! and a [`pipeline::PipelineFactory`]; this crate only describes the
//! shapes they must produce and consume.

pub mod errors;
pub mod pipeline;
pub mod token;
pub mod wire;
pub mod workspace;

pub use pipeline::{BroadcastFn, BroadcastMessage, Pipeline, PipelineError, PipelineFactory};
pub use token::{Role, Token, TokenDecodeError, TokenDecoder, TokenExtra};
pub use wire::{Request, RequestId, Response, ResponseError};
pub use workspace::{WorkspaceId, WorkspaceKey};
