//! JSON persistence for sampler state.

use std::fs;
use std::io;
use std::path::Path;

use tracing::debug;

use super::{SamplerError, SamplerState};
use crate::storage::write_atomic;

/// Load sampler state, returning `None` if no state has been saved yet.
pub fn load_sampler_state(path: &Path) -> Result<Option<SamplerState>, SamplerError> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(SamplerError::Io {
                path: path.to_path_buf(),
                source: e,
            })
        }
    };

    let state: SamplerState = serde_json::from_str(&raw).map_err(|e| SamplerError::Corrupt {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;

    if !state.multiplier.is_finite() || state.multiplier <= 0.0 {
        return Err(SamplerError::Corrupt {
            path: path.to_path_buf(),
            reason: format!("multiplier {} is not a positive number", state.multiplier),
        });
    }

    Ok(Some(state))
}

/// Atomically write sampler state.
pub fn save_sampler_state(path: &Path, state: &SamplerState) -> Result<(), SamplerError> {
    let json = serde_json::to_vec_pretty(state)?;
    write_atomic(path, &json).map_err(|e| SamplerError::Io {
        path: path.to_path_buf(),
        source: e,
    })?;
    debug!("Saved sampler state to {}", path.display());
    Ok(())
}
