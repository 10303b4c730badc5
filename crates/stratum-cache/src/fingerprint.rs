use sha2::{Digest, Sha256};
use stratum_core::Request;

/// Line positions are bucketed so cursor jitter near a symbol still hits the
/// same cache entry.
const LINE_BUCKET: u32 = 16;

/// Deterministic fingerprint of (operation, normalized identifier, location
/// bucket, scope). Two requests asking the same question hash to the same
/// key; distinct operations never collide by construction.
pub fn request_fingerprint(request: &Request) -> String {
    let mut hasher = Sha256::new();
    hasher.update(request.operation.to_string().as_bytes());
    hasher.update(b"\x1f");
    hasher.update(request.identifier.trim().to_lowercase().as_bytes());
    hasher.update(b"\x1f");
    if let Some(location) = &request.location {
        hasher.update(location.uri.as_bytes());
        hasher.update((location.line / LINE_BUCKET).to_le_bytes());
    }
    hasher.update(b"\x1f");
    if let Some(scope) = &request.scope {
        hasher.update(scope.as_bytes());
    }
    format!("req_{:x}", hasher.finalize())
}
