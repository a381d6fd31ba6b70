//! Resolver backend for atomic swaps between native Bitcoin and an
//! EVM-chain asset.
//!
//! The resolver locks the two legs against the same SHA-256 hash: the user
//! funds a Bitcoin HTLC, the resolver mirrors it with an escrow entry on the
//! EVM settlement contract, and the preimage revealed by the user's EVM claim
//! unlocks the Bitcoin side. Each swap is driven by its own background task
//! ([`swap::coordinator::Coordinator`]); the HTTP surface is a thin binding
//! over [`swap::service::ResolverService`].

pub mod bitcoin;
pub mod config;
pub mod error;
pub mod evm;
pub mod logging;
pub mod secret;
pub mod swap;
