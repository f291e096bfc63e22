//! Meshguard - workload authentication and authorization for zero-trust meshes
//!
//! This library provides the core functionality for the Meshguard sidecar:
//! certificate lifecycle management, credential resolvers (mTLS, service JWT,
//! API key, OIDC), role-based authorization, and the resilience layer that
//! keeps identity-provider outages from cascading.

pub mod authorizer;
pub mod certstore;
pub mod config;
pub mod context;
pub mod crypto;
pub mod error;
pub mod handlers;
pub mod keystore;
pub mod metrics;
pub mod middleware;
pub mod resilience;
pub mod resolvers;
pub mod tasks;
pub mod util;
