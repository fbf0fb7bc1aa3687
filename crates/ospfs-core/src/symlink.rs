//! Symlink target encoding and resolution.
//!
//! Plain targets are stored as-is. A conditional target — user syntax
//! `<prefix>?<root_path>:<other_path>` — resolves differently for root and
//! for everyone else; its stored form is `"?" root NUL ":" other`, with the
//! serializer appending the trailing NUL that every inline target carries.

use ospfs_error::{FsError, Result};
use ospfs_types::{nul_terminated_len, MAXNAMELEN, MAXSYMLINKLEN};

/// Encode a user-supplied target into the bytes stored inline in the
/// symlink inode. The stored length becomes the inode's `size`.
pub(crate) fn encode_target(target: &[u8]) -> Result<Vec<u8>> {
    let qmark = target.iter().position(|&b| b == b'?');
    let colon = target.iter().position(|&b| b == b':');

    if let (Some(q), Some(c)) = (qmark, colon) {
        if q < c {
            // Conditional form; the prefix before '?' is discarded.
            let root = &target[q + 1..c];
            let other = &target[c + 1..];
            let encoded_len = root.len() + other.len() + 3;
            // The inline area is smaller than the name limit, so a target
            // that passes the historical length check must also fit it.
            if encoded_len > MAXNAMELEN || encoded_len > MAXSYMLINKLEN {
                return Err(FsError::NameTooLong);
            }

            let mut stored = Vec::with_capacity(encoded_len);
            stored.push(b'?');
            stored.extend_from_slice(root);
            stored.push(0);
            stored.push(b':');
            stored.extend_from_slice(other);
            return Ok(stored);
        }
    }

    if target.len() > MAXSYMLINKLEN {
        return Err(FsError::NameTooLong);
    }
    Ok(target.to_vec())
}

/// Resolve stored target bytes for the calling user.
///
/// Root (uid 0) follows the first path of a conditional link; everyone
/// else follows the second. Plain targets resolve the same for everyone.
pub(crate) fn resolve_target(stored: &[u8], uid: u32) -> Result<Vec<u8>> {
    let until_nul = |bytes: &[u8]| bytes[..nul_terminated_len(bytes)].to_vec();

    if stored.first() != Some(&b'?') {
        return Ok(until_nul(stored));
    }

    if uid == 0 {
        return Ok(until_nul(&stored[1..]));
    }

    let Some(nul) = stored.iter().position(|&b| b == 0) else {
        return Err(FsError::Corruption(
            "conditional symlink has no separator".into(),
        ));
    };
    if stored.get(nul + 1) != Some(&b':') {
        return Err(FsError::Corruption(
            "conditional symlink is missing its ':' arm".into(),
        ));
    }
    Ok(until_nul(&stored[nul + 2..]))
}
