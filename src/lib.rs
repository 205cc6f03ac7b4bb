pub mod archive;
pub mod audit;
pub mod cli;
pub mod config;
pub mod description;
pub mod errors;
pub mod filter;
pub mod fvdl;
pub mod remediation;
pub mod trace;
pub mod utils;
pub mod vuln;
