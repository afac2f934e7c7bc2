//! Business logic services

pub mod update_chain;

pub use update_chain::{
    ChainError, ChainRequest, ChainSummary, ProviderOutcome, ProviderReport, RunStatus,
    SourceMode, UpdateChain,
};
