/// Deployment pointer: a one-line text file holding the contract address.
///
/// The file is looked up in a fixed list of candidate locations; the first
/// one that exists wins.
use std::path::{Path, PathBuf};

use alloy::primitives::Address;

use super::parse_address;
use crate::error::{AnchorError, Result};

pub const DEPLOYMENT_FILE_NAME: &str = "deployed_address.txt";

/// Candidate locations, with an explicitly configured path first.
pub fn candidate_paths(configured: Option<&Path>) -> Vec<PathBuf> {
    let mut candidates = Vec::new();
    if let Some(path) = configured {
        candidates.push(path.to_path_buf());
    }
    candidates.push(PathBuf::from(DEPLOYMENT_FILE_NAME));
    candidates.push(Path::new("server").join(DEPLOYMENT_FILE_NAME));
    candidates.push(Path::new("blockchain").join(DEPLOYMENT_FILE_NAME));
    candidates
}

pub fn find_deployment_file(candidates: &[PathBuf]) -> Option<PathBuf> {
    candidates.iter().find(|p| p.is_file()).cloned()
}

pub fn read_contract_address(path: &Path) -> Result<Address> {
    let contents = std::fs::read_to_string(path)?;
    let line = contents.lines().next().unwrap_or("").trim();
    if line.is_empty() {
        return Err(AnchorError::Config(format!(
            "deployment file {} is empty",
            path.display()
        )));
    }
    parse_address(line)
}
